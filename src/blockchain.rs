//! The aggregated blockchain view: one tagged storage per entity plus block
//! headers, VRF hit sources, and activated features, exposed to the
//! evaluator through the read-only [Blockchain] trait. [ScriptBlockchain]
//! is the per-request adapter that stamps every read with the request tag.

use async_trait::async_trait;
use log::info;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::common::{
    AccountScriptInfo, Address, Alias, Asset, AssetDescription, AssetId,
    BalanceSnapshot, BlockHeader, BlockId, DataEntry, Error, Height,
    HitSource, LeaseBalance, RequestTag, TransferPayload, TxId, TxMeta,
};
use crate::db::{
    AccountDataSpace, AccountScriptSpace, AliasSpace, AssetSpace,
    BalanceSpace, BlockHeadersDb, CacheDb, DbCache, FeatureSpace, LeaseSpace,
    TransactionSpace,
};
use crate::node::NodeApi;
use crate::remote::RemoteData;
use crate::storage::{ExactWithHeightStorage, RemoteLoaderFunc};

/// Read-only view the evaluator runs against. Only what RIDE evaluation
/// needs is here; absence of everything else is deliberate.
#[async_trait]
pub trait Blockchain: Send + Sync {
    async fn height(&self) -> Height;
    async fn block_header(
        &self, h: Height,
    ) -> Result<Option<BlockHeader>, Error>;
    async fn hit_source(&self, h: Height)
        -> Result<Option<HitSource>, Error>;
    async fn account_script(
        &self, address: &Address,
    ) -> Result<Option<AccountScriptInfo>, Error>;
    async fn account_data(
        &self, address: &Address, key: &str,
    ) -> Result<Option<DataEntry>, Error>;
    async fn balance(
        &self, address: &Address, asset: &Asset,
    ) -> Result<i64, Error>;
    async fn lease_balance(
        &self, address: &Address,
    ) -> Result<LeaseBalance, Error>;
    async fn resolve_alias(
        &self, alias: &Alias,
    ) -> Result<Option<Address>, Error>;
    async fn asset_description(
        &self, id: &AssetId,
    ) -> Result<Option<AssetDescription>, Error>;
    async fn transfer_by_id(
        &self, id: &TxId,
    ) -> Result<Option<TransferPayload>, Error>;
    async fn transaction_meta(
        &self, id: &TxId,
    ) -> Result<Option<TxMeta>, Error>;
    /// Degenerate by design: one synthetic snapshot at the current height,
    /// whatever the requested range.
    async fn balance_snapshots(
        &self, address: &Address, from: Height, to: Height,
    ) -> Result<Vec<BalanceSnapshot>, Error>;
}

pub type HeaderLoaderFunc = Box<
    dyn Fn(
            Height,
        ) -> Pin<
            Box<
                dyn Future<
                        Output = Result<
                            Option<(BlockHeader, Option<HitSource>)>,
                            Error,
                        >,
                    > + Send,
            >,
        > + Send
        + Sync,
>;

/// Dense header store with an in-memory tail of the last N headers. The
/// authoritative view height is the height of the last applied header.
pub struct BlockHeadersStorage {
    db: BlockHeadersDb,
    tail: RwLock<VecDeque<(Height, BlockHeader, Option<HitSource>)>>,
    window: usize,
    height: AtomicU32,
    loader: HeaderLoaderFunc,
}

impl BlockHeadersStorage {
    pub fn new(
        db: CacheDb, window: usize, loader: HeaderLoaderFunc,
    ) -> Result<Self, Error> {
        let db = BlockHeadersDb::new(db);
        let height = db.last_height()?.unwrap_or(0);
        Ok(Self {
            db,
            tail: RwLock::new(VecDeque::new()),
            window,
            height: AtomicU32::new(height),
            loader,
        })
    }

    pub fn last_height(&self) -> Height {
        self.height.load(Ordering::Acquire)
    }

    pub async fn header(
        &self, h: Height,
    ) -> Result<Option<BlockHeader>, Error> {
        if let Some((_, header, _)) =
            self.tail.read().iter().find(|(th, ..)| *th == h)
        {
            return Ok(Some(header.clone()))
        }
        if let Some((header, _)) = self.db.get(h)? {
            return Ok(Some(header))
        }
        match (self.loader)(h).await? {
            Some((header, hit)) => {
                self.db.set_now(h, &header, hit.as_ref())?;
                Ok(Some(header))
            }
            None => Ok(None),
        }
    }

    /// Hit source from the persistent record, falling back to the node.
    pub async fn stored_hit_source(
        &self, h: Height,
    ) -> Result<Option<HitSource>, Error> {
        if let Some((_, hit)) = self.db.get(h)? {
            return Ok(hit)
        }
        match (self.loader)(h).await? {
            Some((header, hit)) => {
                self.db.set_now(h, &header, hit.as_ref())?;
                Ok(hit)
            }
            None => Ok(None),
        }
    }

    /// Record the header implied by a block append. A competing block at an
    /// already-seen height displaces the old entry.
    pub fn record(
        &self, h: Height, header: &BlockHeader, hit: Option<&HitSource>,
    ) {
        self.db.set(h, header, hit);
        let mut tail = self.tail.write();
        tail.retain(|(th, ..)| *th < h);
        tail.push_back((h, header.clone(), hit.cloned()));
        while tail.len() > self.window {
            tail.pop_front();
        }
        self.height.store(h, Ordering::Release);
    }

    /// A micro-block extends the current block under a new id; the stored
    /// hit source stays.
    pub fn rename_last(&self, id: &BlockId) {
        let mut tail = self.tail.write();
        if let Some((h, header, hit)) = tail.back_mut() {
            header.id = id.clone();
            self.db.set(*h, header, hit.as_ref());
        }
    }

    pub fn remove_from(&self, h_from: Height) -> Result<(), Error> {
        self.db.remove_from(h_from)?;
        let mut tail = self.tail.write();
        tail.retain(|(h, ..)| *h < h_from);
        let current = self.height.load(Ordering::Acquire);
        if current >= h_from {
            self.height
                .store(h_from.saturating_sub(1), Ordering::Release);
        }
        Ok(())
    }

    pub fn range(
        &self, from: Height, to: Height,
    ) -> Result<Vec<BlockHeader>, Error> {
        self.db.range(from, to)
    }
}

/// In-memory dense array of hit sources, anchored at the first recorded
/// height; trimmed by `remove_from` on rollbacks and synthetic forks.
pub struct VrfStorage {
    inner: RwLock<VrfInner>,
}

struct VrfInner {
    base: Height,
    items: Vec<Option<HitSource>>,
}

impl VrfStorage {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(VrfInner {
                base: 0,
                items: Vec::new(),
            }),
        }
    }

    pub fn record(&self, h: Height, hit: Option<HitSource>) {
        let mut inner = self.inner.write();
        if inner.items.is_empty() {
            inner.base = h;
        }
        if h < inner.base {
            return
        }
        let idx = (h - inner.base) as usize;
        if idx >= inner.items.len() {
            inner.items.resize(idx + 1, None);
        }
        inner.items[idx] = hit;
    }

    pub fn get(&self, h: Height) -> Option<HitSource> {
        let inner = self.inner.read();
        if h < inner.base {
            return None
        }
        inner
            .items
            .get((h - inner.base) as usize)
            .cloned()
            .flatten()
    }

    /// Invalidate everything with height `>= h_from`.
    pub fn remove_from(&self, h_from: Height) {
        let mut inner = self.inner.write();
        if h_from <= inner.base {
            inner.items.clear();
        } else {
            let keep = (h_from - inner.base) as usize;
            inner.items.truncate(keep);
        }
    }
}

impl Default for VrfStorage {
    fn default() -> Self {
        Self::new()
    }
}

/// All per-entity storages plus header/VRF/features state, aggregated into
/// one coherent snapshot. Mutated only by the event processor; evaluators
/// see it through read-only views.
pub struct SharedBlockchainData {
    pub account_data: ExactWithHeightStorage<AccountDataSpace>,
    pub account_scripts: ExactWithHeightStorage<AccountScriptSpace>,
    pub assets: ExactWithHeightStorage<AssetSpace>,
    pub aliases: ExactWithHeightStorage<AliasSpace>,
    pub balances: ExactWithHeightStorage<BalanceSpace>,
    pub lease_balances: ExactWithHeightStorage<LeaseSpace>,
    pub transactions: ExactWithHeightStorage<TransactionSpace>,
    pub headers: BlockHeadersStorage,
    pub vrf: VrfStorage,
    features: OnceCell<HashMap<u16, Height>>,
    features_db: DbCache<FeatureSpace>,
    node: Arc<dyn NodeApi>,
    db: CacheDb,
}

impl SharedBlockchainData {
    pub fn new(
        db: CacheDb, node: Arc<dyn NodeApi>, header_window: usize,
    ) -> Result<Arc<Self>, Error> {
        let n = node.clone();
        let account_data: RemoteLoaderFunc<(Address, String), DataEntry> =
            Box::new(move |(address, entry_key)| {
                let node = n.clone();
                Box::pin(async move {
                    node.account_data_entry(&address, &entry_key)
                        .await
                        .map(RemoteData::from)
                })
            });
        let n = node.clone();
        let account_scripts: RemoteLoaderFunc<Address, AccountScriptInfo> =
            Box::new(move |address| {
                let node = n.clone();
                Box::pin(async move {
                    node.account_script(&address).await.map(RemoteData::from)
                })
            });
        let n = node.clone();
        let assets: RemoteLoaderFunc<AssetId, AssetDescription> =
            Box::new(move |id| {
                let node = n.clone();
                Box::pin(async move {
                    node.asset_description(&id).await.map(RemoteData::from)
                })
            });
        let n = node.clone();
        let aliases: RemoteLoaderFunc<Alias, Address> =
            Box::new(move |alias| {
                let node = n.clone();
                Box::pin(async move {
                    node.resolve_alias(&alias).await.map(RemoteData::from)
                })
            });
        let n = node.clone();
        let balances: RemoteLoaderFunc<(Address, Asset), i64> =
            Box::new(move |(address, asset)| {
                let node = n.clone();
                Box::pin(async move {
                    node.balance(&address, &asset)
                        .await
                        .map(RemoteData::Cached)
                })
            });
        let n = node.clone();
        let lease_balances: RemoteLoaderFunc<Address, LeaseBalance> =
            Box::new(move |address| {
                let node = n.clone();
                Box::pin(async move {
                    node.lease_balance(&address).await.map(RemoteData::Cached)
                })
            });
        let n = node.clone();
        let transactions: RemoteLoaderFunc<TxId, TxMeta> =
            Box::new(move |id| {
                let node = n.clone();
                Box::pin(async move {
                    node.transaction(&id).await.map(RemoteData::from)
                })
            });
        let n = node.clone();
        let headers: HeaderLoaderFunc = Box::new(move |h| {
            let node = n.clone();
            Box::pin(async move { node.block_header(h).await })
        });

        Ok(Arc::new(Self {
            account_data: ExactWithHeightStorage::new(db.clone(), account_data),
            account_scripts: ExactWithHeightStorage::new(
                db.clone(),
                account_scripts,
            ),
            assets: ExactWithHeightStorage::new(db.clone(), assets),
            aliases: ExactWithHeightStorage::new(db.clone(), aliases),
            balances: ExactWithHeightStorage::new(db.clone(), balances),
            lease_balances: ExactWithHeightStorage::new(
                db.clone(),
                lease_balances,
            ),
            transactions: ExactWithHeightStorage::new(db.clone(), transactions),
            headers: BlockHeadersStorage::new(
                db.clone(),
                header_window,
                headers,
            )?,
            vrf: VrfStorage::new(),
            features: OnceCell::new(),
            features_db: DbCache::new(db.clone()),
            node,
            db,
        }))
    }

    pub fn db(&self) -> &CacheDb {
        &self.db
    }

    pub fn height(&self) -> Height {
        self.headers.last_height()
    }

    /// Feature activations are assumed stable within a run: loaded once from
    /// the persistent cache or the node, then pinned.
    pub async fn activated_features(
        &self,
    ) -> Result<&HashMap<u16, Height>, Error> {
        if let Some(features) = self.features.get() {
            return Ok(features)
        }
        let stored = self.features_db.get(Height::MAX, &())?;
        let features = match stored {
            RemoteData::Cached(map) => map,
            _ => {
                let h = self.node.current_height().await?;
                let map = self.node.activated_features(h).await?;
                self.features_db
                    .set_now(0, &(), &RemoteData::Cached(map.clone()))?;
                info!("loaded {} activated features from node", map.len());
                map
            }
        };
        Ok(self.features.get_or_init(|| features))
    }

    pub async fn hit_source_at(
        &self, h: Height,
    ) -> Result<Option<HitSource>, Error> {
        if let Some(hit) = self.vrf.get(h) {
            return Ok(Some(hit))
        }
        self.headers.stored_hit_source(h).await
    }
}

/// Per-request read view: forwards every lookup to the shared data with the
/// request's tag attached, so the key becomes a dependency of the request.
/// Never writes.
pub struct ScriptBlockchain {
    shared: Arc<SharedBlockchainData>,
    tag: RequestTag,
}

impl ScriptBlockchain {
    pub fn new(shared: Arc<SharedBlockchainData>, tag: RequestTag) -> Self {
        Self { shared, tag }
    }
}

#[async_trait]
impl Blockchain for ScriptBlockchain {
    async fn height(&self) -> Height {
        self.shared.height()
    }

    async fn block_header(
        &self, h: Height,
    ) -> Result<Option<BlockHeader>, Error> {
        self.shared.headers.header(h).await
    }

    async fn hit_source(
        &self, h: Height,
    ) -> Result<Option<HitSource>, Error> {
        self.shared.hit_source_at(h).await
    }

    async fn account_script(
        &self, address: &Address,
    ) -> Result<Option<AccountScriptInfo>, Error> {
        let h = self.shared.height();
        self.shared
            .account_scripts
            .get(h, address, self.tag)
            .await
    }

    async fn account_data(
        &self, address: &Address, key: &str,
    ) -> Result<Option<DataEntry>, Error> {
        let h = self.shared.height();
        self.shared
            .account_data
            .get(h, &(address.clone(), key.to_string()), self.tag)
            .await
    }

    async fn balance(
        &self, address: &Address, asset: &Asset,
    ) -> Result<i64, Error> {
        let h = self.shared.height();
        Ok(self
            .shared
            .balances
            .get(h, &(address.clone(), asset.clone()), self.tag)
            .await?
            .unwrap_or(0))
    }

    async fn lease_balance(
        &self, address: &Address,
    ) -> Result<LeaseBalance, Error> {
        let h = self.shared.height();
        Ok(self
            .shared
            .lease_balances
            .get(h, address, self.tag)
            .await?
            .unwrap_or_default())
    }

    async fn resolve_alias(
        &self, alias: &Alias,
    ) -> Result<Option<Address>, Error> {
        let h = self.shared.height();
        self.shared.aliases.get(h, alias, self.tag).await
    }

    async fn asset_description(
        &self, id: &AssetId,
    ) -> Result<Option<AssetDescription>, Error> {
        let h = self.shared.height();
        self.shared.assets.get(h, id, self.tag).await
    }

    async fn transfer_by_id(
        &self, id: &TxId,
    ) -> Result<Option<TransferPayload>, Error> {
        Ok(self
            .transaction_meta(id)
            .await?
            .and_then(|meta| meta.transfer))
    }

    async fn transaction_meta(
        &self, id: &TxId,
    ) -> Result<Option<TxMeta>, Error> {
        let h = self.shared.height();
        self.shared.transactions.get(h, id, self.tag).await
    }

    async fn balance_snapshots(
        &self, address: &Address, _from: Height, _to: Height,
    ) -> Result<Vec<BalanceSnapshot>, Error> {
        let height = self.shared.height();
        let regular_balance = self.balance(address, &Asset::Waves).await?;
        let lease = self.lease_balance(address).await?;
        Ok(vec![BalanceSnapshot {
            height,
            regular_balance,
            lease_in: lease.lease_in,
            lease_out: lease.lease_out,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vrf_storage_window() {
        let vrf = VrfStorage::new();
        vrf.record(5, Some(vec![5u8].into()));
        vrf.record(6, Some(vec![6u8].into()));
        vrf.record(7, None);
        assert_eq!(vrf.get(5), Some(vec![5u8].into()));
        assert_eq!(vrf.get(7), None);
        assert_eq!(vrf.get(4), None);

        vrf.remove_from(6);
        assert_eq!(vrf.get(5), Some(vec![5u8].into()));
        assert_eq!(vrf.get(6), None);
    }
}
