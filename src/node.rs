//! Seams to the external collaborators: the node's point-lookup data api,
//! the blockchain-updates stream, and the script evaluator itself. Concrete
//! transports live outside this crate; tests plug in in-memory doubles.

use async_trait::async_trait;
use futures::channel::mpsc;

use std::collections::HashMap;

use crate::blockchain::Blockchain;
use crate::common::{
    AccountScriptInfo, Address, Alias, Asset, AssetDescription, AssetId,
    BlockHeader, DataEntry, Error, EvalError, Height, HitSource,
    LeaseBalance, TxId, TxMeta,
};
use crate::events::BlockchainUpdated;

/// Synchronous point lookups used on cache miss. `None` answers are
/// authoritative absence.
#[async_trait]
pub trait NodeApi: Send + Sync {
    async fn current_height(&self) -> Result<Height, Error>;
    async fn activated_features(
        &self, h: Height,
    ) -> Result<HashMap<u16, Height>, Error>;
    async fn account_data_entry(
        &self, address: &Address, key: &str,
    ) -> Result<Option<DataEntry>, Error>;
    async fn account_script(
        &self, address: &Address,
    ) -> Result<Option<AccountScriptInfo>, Error>;
    async fn block_header(
        &self, h: Height,
    ) -> Result<Option<(BlockHeader, Option<HitSource>)>, Error>;
    async fn asset_description(
        &self, id: &AssetId,
    ) -> Result<Option<AssetDescription>, Error>;
    async fn resolve_alias(
        &self, alias: &Alias,
    ) -> Result<Option<Address>, Error>;
    async fn balance(
        &self, address: &Address, asset: &Asset,
    ) -> Result<i64, Error>;
    async fn lease_balance(
        &self, address: &Address,
    ) -> Result<LeaseBalance, Error>;
    async fn transaction(&self, id: &TxId) -> Result<Option<TxMeta>, Error>;
}

/// Framing of the updates stream as observed by the orchestrator.
#[derive(Debug)]
pub enum StreamItem {
    Next(BlockchainUpdated),
    /// The server closed the subscription.
    Closed,
    /// Transport failure; [Error::Timeout] drives the synthetic fork.
    Failed(Error),
}

/// Server-push subscription to blockchain updates. `to = 0` follows the tip.
#[async_trait]
pub trait UpdatesSource: Send + Sync + 'static {
    async fn stream(
        &self, from: Height, to: Height,
    ) -> Result<mpsc::UnboundedReceiver<StreamItem>, Error>;
}

/// The RIDE evaluator, treated as an opaque function from a blockchain view
/// and a request to a result JSON.
#[async_trait]
pub trait RideEvaluator: Send + Sync {
    async fn evaluate(
        &self, view: &dyn Blockchain, address: &Address,
        request: &serde_json::Value,
    ) -> Result<serde_json::Value, EvalError>;
}
