//! Persistent tier: every entity space lives in one rocksdb instance as a
//! height-indexed ordered byte map. Record keys are
//! `[space tag][entity key bytes][height, big-endian]`, so all versions of a
//! key are contiguous and a reverse seek from `(key, h_max)` lands on the
//! effective record. Writes accumulate in one [rocksdb::WriteBatch] that the
//! event processor commits once per event.

use parking_lot::Mutex;
use rocksdb::{WriteBatch, DB};

use std::collections::HashMap;
use std::io::Read;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use crate::common::{
    AccountScriptInfo, Address, Alias, Asset, AssetDescription, AssetId,
    BlockHeader, BlockId, Bytes, DataEntry, Error, Height, HitSource,
    LeaseBalance, TransferPayload, TxId, TxMeta,
};
use crate::remote::RemoteData;

const TAG_ACCOUNT_DATA: u8 = 0x00;
const TAG_ACCOUNT_SCRIPT: u8 = 0x01;
const TAG_ASSET: u8 = 0x02;
const TAG_ALIAS: u8 = 0x03;
const TAG_BALANCE: u8 = 0x04;
const TAG_LEASE: u8 = 0x05;
const TAG_TRANSACTION: u8 = 0x06;
const TAG_BLOCK_HEADER: u8 = 0x07;
const TAG_FEATURES: u8 = 0x08;

/// Shared handle over the db plus the pending per-event write batch.
#[derive(Clone)]
pub struct CacheDb(Arc<CacheDbInner>);

struct CacheDbInner {
    db: DB,
    wb: Mutex<Option<WriteBatch>>,
}

impl CacheDb {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let mut opts = rocksdb::Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(Self(Arc::new(CacheDbInner {
            db,
            wb: Mutex::new(None),
        })))
    }

    fn db(&self) -> &DB {
        &self.0.db
    }

    fn put_batched(&self, key: Vec<u8>, value: Vec<u8>) {
        let mut wb = self.0.wb.lock();
        wb.get_or_insert_with(WriteBatch::default).put(key, value);
    }

    fn delete_batched(&self, key: Vec<u8>) {
        let mut wb = self.0.wb.lock();
        wb.get_or_insert_with(WriteBatch::default).delete(key);
    }

    /// Write-through used by read-miss population; not part of any event
    /// batch.
    fn put_now(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), Error> {
        Ok(self.db().put(key, value)?)
    }

    /// Atomically apply everything the current event accumulated.
    pub fn commit_batch(&self) -> Result<(), Error> {
        let wb = self.0.wb.lock().take();
        if let Some(wb) = wb {
            self.db().write(wb)?;
        }
        Ok(())
    }
}

// codec helpers; multi-byte values are little-endian, heights inside record
// keys are big-endian so lexicographic order is height order

fn put_u8(out: &mut Vec<u8>, v: u8) {
    out.push(v);
}

fn put_bool(out: &mut Vec<u8>, v: bool) {
    out.push(v as u8);
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_i64(out: &mut Vec<u8>, v: i64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_bytes(out: &mut Vec<u8>, v: &[u8]) {
    put_u32(out, v.len() as u32);
    out.extend_from_slice(v);
}

fn put_str(out: &mut Vec<u8>, v: &str) {
    put_bytes(out, v.as_bytes());
}

fn get_u8(raw: &mut &[u8]) -> Option<u8> {
    let mut b = [0u8; 1];
    raw.read_exact(&mut b).ok()?;
    Some(b[0])
}

fn get_bool(raw: &mut &[u8]) -> Option<bool> {
    Some(get_u8(raw)? != 0)
}

fn get_u16(raw: &mut &[u8]) -> Option<u16> {
    let mut b = [0u8; 2];
    raw.read_exact(&mut b).ok()?;
    Some(u16::from_le_bytes(b))
}

fn get_u32(raw: &mut &[u8]) -> Option<u32> {
    let mut b = [0u8; 4];
    raw.read_exact(&mut b).ok()?;
    Some(u32::from_le_bytes(b))
}

fn get_u64(raw: &mut &[u8]) -> Option<u64> {
    let mut b = [0u8; 8];
    raw.read_exact(&mut b).ok()?;
    Some(u64::from_le_bytes(b))
}

fn get_i64(raw: &mut &[u8]) -> Option<i64> {
    let mut b = [0u8; 8];
    raw.read_exact(&mut b).ok()?;
    Some(i64::from_le_bytes(b))
}

fn get_bytes(raw: &mut &[u8]) -> Option<Vec<u8>> {
    let len = get_u32(raw)? as usize;
    let mut v = vec![0u8; len];
    raw.read_exact(&mut v).ok()?;
    Some(v)
}

fn get_str(raw: &mut &[u8]) -> Option<String> {
    String::from_utf8(get_bytes(raw)?).ok()
}

fn put_h256(out: &mut Vec<u8>, v: &[u8]) {
    out.extend_from_slice(v);
}

fn get_h256(raw: &mut &[u8]) -> Option<[u8; 32]> {
    let mut b = [0u8; 32];
    raw.read_exact(&mut b).ok()?;
    Some(b)
}

fn put_addr(out: &mut Vec<u8>, v: &Address) {
    out.extend_from_slice(v.as_bytes());
}

fn get_addr(raw: &mut &[u8]) -> Option<Address> {
    let mut b = [0u8; Address::LEN];
    raw.read_exact(&mut b).ok()?;
    Some(b.into())
}

fn put_asset(out: &mut Vec<u8>, v: &Asset) {
    match v {
        Asset::Waves => put_u8(out, 0),
        Asset::Issued(id) => {
            put_u8(out, 1);
            put_h256(out, id.as_bytes());
        }
    }
}

fn get_asset(raw: &mut &[u8]) -> Option<Asset> {
    match get_u8(raw)? {
        0 => Some(Asset::Waves),
        1 => Some(Asset::Issued(AssetId::from(get_h256(raw)?))),
        _ => None,
    }
}

fn put_opt_bytes(out: &mut Vec<u8>, v: &Option<Bytes>) {
    match v {
        None => put_u8(out, 0),
        Some(b) => {
            put_u8(out, 1);
            put_bytes(out, b);
        }
    }
}

fn get_opt_bytes(raw: &mut &[u8]) -> Option<Option<Bytes>> {
    match get_u8(raw)? {
        0 => Some(None),
        1 => Some(Some(get_bytes(raw)?.into())),
        _ => None,
    }
}

impl DataEntry {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            DataEntry::Binary { key, value } => {
                put_u8(out, 0);
                put_str(out, key);
                put_bytes(out, value);
            }
            DataEntry::Boolean { key, value } => {
                put_u8(out, 1);
                put_str(out, key);
                put_bool(out, *value);
            }
            DataEntry::Integer { key, value } => {
                put_u8(out, 2);
                put_str(out, key);
                put_i64(out, *value);
            }
            DataEntry::String { key, value } => {
                put_u8(out, 3);
                put_str(out, key);
                put_str(out, value);
            }
        }
    }

    fn decode(raw: &mut &[u8]) -> Option<Self> {
        let variant = get_u8(raw)?;
        let key = get_str(raw)?;
        Some(match variant {
            0 => DataEntry::Binary {
                key,
                value: get_bytes(raw)?.into(),
            },
            1 => DataEntry::Boolean {
                key,
                value: get_bool(raw)?,
            },
            2 => DataEntry::Integer {
                key,
                value: get_i64(raw)?,
            },
            3 => DataEntry::String {
                key,
                value: get_str(raw)?,
            },
            _ => return None,
        })
    }
}

impl AccountScriptInfo {
    fn encode(&self, out: &mut Vec<u8>) {
        put_bytes(out, &self.public_key);
        put_bytes(out, &self.script);
        put_u32(out, self.complexities.len() as u32);
        for (name, complexity) in &self.complexities {
            put_str(out, name);
            put_u64(out, *complexity);
        }
    }

    fn decode(raw: &mut &[u8]) -> Option<Self> {
        let public_key = get_bytes(raw)?.into();
        let script = get_bytes(raw)?.into();
        let n = get_u32(raw)?;
        let mut complexities = HashMap::new();
        for _ in 0..n {
            let name = get_str(raw)?;
            complexities.insert(name, get_u64(raw)?);
        }
        Some(Self {
            public_key,
            script,
            complexities,
        })
    }
}

impl AssetDescription {
    fn encode(&self, out: &mut Vec<u8>) {
        put_addr(out, &self.issuer);
        put_str(out, &self.name);
        put_str(out, &self.description);
        put_u8(out, self.decimals);
        put_bool(out, self.reissuable);
        put_u64(out, self.total_volume);
        put_i64(out, self.sponsorship);
        put_opt_bytes(out, &self.script);
    }

    fn decode(raw: &mut &[u8]) -> Option<Self> {
        Some(Self {
            issuer: get_addr(raw)?,
            name: get_str(raw)?,
            description: get_str(raw)?,
            decimals: get_u8(raw)?,
            reissuable: get_bool(raw)?,
            total_volume: get_u64(raw)?,
            sponsorship: get_i64(raw)?,
            script: get_opt_bytes(raw)?,
        })
    }
}

impl LeaseBalance {
    fn encode(&self, out: &mut Vec<u8>) {
        put_i64(out, self.lease_in);
        put_i64(out, self.lease_out);
    }

    fn decode(raw: &mut &[u8]) -> Option<Self> {
        Some(Self {
            lease_in: get_i64(raw)?,
            lease_out: get_i64(raw)?,
        })
    }
}

impl TransferPayload {
    fn encode(&self, out: &mut Vec<u8>) {
        put_addr(out, &self.sender);
        put_addr(out, &self.recipient);
        put_asset(out, &self.asset);
        put_i64(out, self.amount);
        put_asset(out, &self.fee_asset);
        put_i64(out, self.fee);
        put_bytes(out, &self.attachment);
        put_u64(out, self.timestamp);
    }

    fn decode(raw: &mut &[u8]) -> Option<Self> {
        Some(Self {
            sender: get_addr(raw)?,
            recipient: get_addr(raw)?,
            asset: get_asset(raw)?,
            amount: get_i64(raw)?,
            fee_asset: get_asset(raw)?,
            fee: get_i64(raw)?,
            attachment: get_bytes(raw)?.into(),
            timestamp: get_u64(raw)?,
        })
    }
}

impl TxMeta {
    fn encode(&self, out: &mut Vec<u8>) {
        put_u32(out, self.height);
        match &self.transfer {
            None => put_u8(out, 0),
            Some(t) => {
                put_u8(out, 1);
                t.encode(out);
            }
        }
    }

    fn decode(raw: &mut &[u8]) -> Option<Self> {
        let height = get_u32(raw)?;
        let transfer = match get_u8(raw)? {
            0 => None,
            1 => Some(TransferPayload::decode(raw)?),
            _ => return None,
        };
        Some(Self { height, transfer })
    }
}

impl BlockHeader {
    fn encode(&self, out: &mut Vec<u8>) {
        put_h256(out, self.id.as_bytes());
        put_h256(out, self.reference.as_bytes());
        put_u64(out, self.timestamp);
        put_addr(out, &self.generator);
        put_u64(out, self.base_target);
        put_bytes(out, &self.generation_signature);
    }

    fn decode(raw: &mut &[u8]) -> Option<Self> {
        Some(Self {
            id: BlockId::from(get_h256(raw)?),
            reference: BlockId::from(get_h256(raw)?),
            timestamp: get_u64(raw)?,
            generator: get_addr(raw)?,
            base_target: get_u64(raw)?,
            generation_signature: get_bytes(raw)?.into(),
        })
    }
}

/// One entity space: the record-key tag byte plus the key/value codecs.
pub trait KeySpace {
    const TAG: u8;
    const NAME: &'static str;
    type Key: Clone + Eq + std::hash::Hash + Send + Sync + 'static;
    type Value: Clone + PartialEq + Send + Sync + 'static;

    fn put_key(key: &Self::Key, out: &mut Vec<u8>);
    fn put_value(value: &Self::Value, out: &mut Vec<u8>);
    fn get_value(raw: &mut &[u8]) -> Option<Self::Value>;
}

pub struct AccountDataSpace;
impl KeySpace for AccountDataSpace {
    const TAG: u8 = TAG_ACCOUNT_DATA;
    const NAME: &'static str = "account_data";
    type Key = (Address, String);
    type Value = DataEntry;

    fn put_key((address, key): &Self::Key, out: &mut Vec<u8>) {
        put_addr(out, address);
        // length-prefixed so "x" never prefixes "xy" records
        put_u16(out, key.len() as u16);
        out.extend_from_slice(key.as_bytes());
    }

    fn put_value(value: &Self::Value, out: &mut Vec<u8>) {
        value.encode(out)
    }

    fn get_value(raw: &mut &[u8]) -> Option<Self::Value> {
        DataEntry::decode(raw)
    }
}

pub struct AccountScriptSpace;
impl KeySpace for AccountScriptSpace {
    const TAG: u8 = TAG_ACCOUNT_SCRIPT;
    const NAME: &'static str = "account_script";
    type Key = Address;
    type Value = AccountScriptInfo;

    fn put_key(key: &Self::Key, out: &mut Vec<u8>) {
        put_addr(out, key)
    }

    fn put_value(value: &Self::Value, out: &mut Vec<u8>) {
        value.encode(out)
    }

    fn get_value(raw: &mut &[u8]) -> Option<Self::Value> {
        AccountScriptInfo::decode(raw)
    }
}

pub struct AssetSpace;
impl KeySpace for AssetSpace {
    const TAG: u8 = TAG_ASSET;
    const NAME: &'static str = "asset";
    type Key = AssetId;
    type Value = AssetDescription;

    fn put_key(key: &Self::Key, out: &mut Vec<u8>) {
        put_h256(out, key.as_bytes())
    }

    fn put_value(value: &Self::Value, out: &mut Vec<u8>) {
        value.encode(out)
    }

    fn get_value(raw: &mut &[u8]) -> Option<Self::Value> {
        AssetDescription::decode(raw)
    }
}

pub struct AliasSpace;
impl KeySpace for AliasSpace {
    const TAG: u8 = TAG_ALIAS;
    const NAME: &'static str = "alias";
    type Key = Alias;
    type Value = Address;

    fn put_key(key: &Self::Key, out: &mut Vec<u8>) {
        let name = key.as_str();
        put_u16(out, name.len() as u16);
        out.extend_from_slice(name.as_bytes());
    }

    fn put_value(value: &Self::Value, out: &mut Vec<u8>) {
        put_addr(out, value)
    }

    fn get_value(raw: &mut &[u8]) -> Option<Self::Value> {
        get_addr(raw)
    }
}

pub struct BalanceSpace;
impl KeySpace for BalanceSpace {
    const TAG: u8 = TAG_BALANCE;
    const NAME: &'static str = "balance";
    type Key = (Address, Asset);
    type Value = i64;

    fn put_key((address, asset): &Self::Key, out: &mut Vec<u8>) {
        put_addr(out, address);
        put_asset(out, asset);
    }

    fn put_value(value: &Self::Value, out: &mut Vec<u8>) {
        put_i64(out, *value)
    }

    fn get_value(raw: &mut &[u8]) -> Option<Self::Value> {
        get_i64(raw)
    }
}

pub struct LeaseSpace;
impl KeySpace for LeaseSpace {
    const TAG: u8 = TAG_LEASE;
    const NAME: &'static str = "lease_balance";
    type Key = Address;
    type Value = LeaseBalance;

    fn put_key(key: &Self::Key, out: &mut Vec<u8>) {
        put_addr(out, key)
    }

    fn put_value(value: &Self::Value, out: &mut Vec<u8>) {
        value.encode(out)
    }

    fn get_value(raw: &mut &[u8]) -> Option<Self::Value> {
        LeaseBalance::decode(raw)
    }
}

pub struct TransactionSpace;
impl KeySpace for TransactionSpace {
    const TAG: u8 = TAG_TRANSACTION;
    const NAME: &'static str = "transaction";
    type Key = TxId;
    type Value = TxMeta;

    fn put_key(key: &Self::Key, out: &mut Vec<u8>) {
        put_h256(out, key.as_bytes())
    }

    fn put_value(value: &Self::Value, out: &mut Vec<u8>) {
        value.encode(out)
    }

    fn get_value(raw: &mut &[u8]) -> Option<Self::Value> {
        TxMeta::decode(raw)
    }
}

/// Singleton space for the activated-features map.
pub struct FeatureSpace;
impl KeySpace for FeatureSpace {
    const TAG: u8 = TAG_FEATURES;
    const NAME: &'static str = "activated_features";
    type Key = ();
    type Value = HashMap<u16, Height>;

    fn put_key(_key: &Self::Key, _out: &mut Vec<u8>) {}

    fn put_value(value: &Self::Value, out: &mut Vec<u8>) {
        put_u32(out, value.len() as u32);
        for (feature, height) in value {
            put_u16(out, *feature);
            put_u32(out, *height);
        }
    }

    fn get_value(raw: &mut &[u8]) -> Option<Self::Value> {
        let n = get_u32(raw)?;
        let mut map = HashMap::new();
        for _ in 0..n {
            let feature = get_u16(raw)?;
            map.insert(feature, get_u32(raw)?);
        }
        Some(map)
    }
}

fn encode_remote<S: KeySpace>(v: &RemoteData<S::Value>) -> Vec<u8> {
    let mut out = Vec::new();
    match v {
        // Unknown is filtered out before this point
        RemoteData::Unknown => unreachable!("unknown is never stored"),
        RemoteData::Absent => put_u8(&mut out, 0),
        RemoteData::Cached(v) => {
            put_u8(&mut out, 1);
            S::put_value(v, &mut out);
        }
    }
    out
}

fn decode_remote<S: KeySpace>(
    mut raw: &[u8],
) -> Result<RemoteData<S::Value>, Error> {
    match get_u8(&mut raw) {
        Some(0) => Ok(RemoteData::Absent),
        Some(1) => S::get_value(&mut raw)
            .map(RemoteData::Cached)
            .ok_or(Error::Codec(S::NAME)),
        _ => Err(Error::Codec(S::NAME)),
    }
}

fn record_height(key: &[u8]) -> Result<Height, Error> {
    let tail: [u8; 4] = key[key.len() - 4..]
        .try_into()
        .map_err(|_| Error::Codec("record key"))?;
    Ok(u32::from_be_bytes(tail))
}

/// Height-indexed persistent cache for one entity space.
pub struct DbCache<S: KeySpace> {
    db: CacheDb,
    _space: PhantomData<S>,
}

impl<S: KeySpace> Clone for DbCache<S> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            _space: PhantomData,
        }
    }
}

impl<S: KeySpace> DbCache<S> {
    pub fn new(db: CacheDb) -> Self {
        Self {
            db,
            _space: PhantomData,
        }
    }

    fn prefix(key: &S::Key) -> Vec<u8> {
        let mut out = vec![S::TAG];
        S::put_key(key, &mut out);
        out
    }

    fn record_key(key: &S::Key, h: Height) -> Vec<u8> {
        let mut out = Self::prefix(key);
        out.extend_from_slice(&h.to_be_bytes());
        out
    }

    /// The record with the greatest stored height `<= h_max`, or `Unknown`.
    pub fn get(
        &self, h_max: Height, key: &S::Key,
    ) -> Result<RemoteData<S::Value>, Error> {
        let prefix = Self::prefix(key);
        let mut it = self.db.db().raw_iterator();
        it.seek_for_prev(Self::record_key(key, h_max));
        if it.valid() {
            if let (Some(k), Some(v)) = (it.key(), it.value()) {
                if k.starts_with(&prefix) {
                    return decode_remote::<S>(v)
                }
            }
        }
        it.status()?;
        Ok(RemoteData::Unknown)
    }

    /// Append a record at `h` into the pending batch. Writing the same
    /// `(key, h)` twice is last-write-wins. `Unknown` is never stored.
    pub fn set(&self, h: Height, key: &S::Key, v: &RemoteData<S::Value>) {
        if !v.loaded() {
            return
        }
        self.db
            .put_batched(Self::record_key(key, h), encode_remote::<S>(v));
    }

    /// Immediate write used when a read miss populates the cache.
    pub fn set_now(
        &self, h: Height, key: &S::Key, v: &RemoteData<S::Value>,
    ) -> Result<(), Error> {
        if !v.loaded() {
            return Ok(())
        }
        self.db
            .put_now(Self::record_key(key, h), encode_remote::<S>(v))
    }

    /// Delete every record with height `>= h_from` (into the pending batch)
    /// and return the surviving top record: the value a subsequent read
    /// would see. The survivor is computed from iteration, so the batched
    /// deletes need not land first.
    pub fn remove_from(
        &self, h_from: Height, key: &S::Key,
    ) -> Result<RemoteData<S::Value>, Error> {
        let prefix = Self::prefix(key);
        let mut survivor = RemoteData::Unknown;
        let mut it = self.db.db().raw_iterator();
        it.seek(&prefix);
        while it.valid() {
            let (k, v) = match (it.key(), it.value()) {
                (Some(k), Some(v)) => (k, v),
                _ => break,
            };
            if !k.starts_with(&prefix) {
                break
            }
            if record_height(k)? >= h_from {
                self.db.delete_batched(k.to_vec());
            } else {
                survivor = decode_remote::<S>(v)?;
            }
            it.next();
        }
        it.status()?;
        Ok(survivor)
    }
}

/// Dense block-header store: one record per height, value carries the header
/// plus the optional VRF hit source.
#[derive(Clone)]
pub struct BlockHeadersDb {
    db: CacheDb,
}

impl BlockHeadersDb {
    pub fn new(db: CacheDb) -> Self {
        Self { db }
    }

    fn record_key(h: Height) -> Vec<u8> {
        let mut out = vec![TAG_BLOCK_HEADER];
        out.extend_from_slice(&h.to_be_bytes());
        out
    }

    fn decode(mut raw: &[u8]) -> Result<(BlockHeader, Option<HitSource>), Error> {
        let header =
            BlockHeader::decode(&mut raw).ok_or(Error::Codec("block_header"))?;
        let hit = match get_u8(&mut raw) {
            Some(0) => None,
            Some(1) => Some(
                get_bytes(&mut raw)
                    .ok_or(Error::Codec("block_header"))?
                    .into(),
            ),
            _ => return Err(Error::Codec("block_header")),
        };
        Ok((header, hit))
    }

    pub fn get(
        &self, h: Height,
    ) -> Result<Option<(BlockHeader, Option<HitSource>)>, Error> {
        match self.db.db().get(Self::record_key(h))? {
            None => Ok(None),
            Some(raw) => Ok(Some(Self::decode(&raw)?)),
        }
    }

    fn encode(header: &BlockHeader, hit: Option<&HitSource>) -> Vec<u8> {
        let mut out = Vec::new();
        header.encode(&mut out);
        match hit {
            None => put_u8(&mut out, 0),
            Some(hs) => {
                put_u8(&mut out, 1);
                put_bytes(&mut out, hs);
            }
        }
        out
    }

    pub fn set(
        &self, h: Height, header: &BlockHeader, hit: Option<&HitSource>,
    ) {
        self.db
            .put_batched(Self::record_key(h), Self::encode(header, hit));
    }

    /// Immediate write used when a read miss populates the store.
    pub fn set_now(
        &self, h: Height, header: &BlockHeader, hit: Option<&HitSource>,
    ) -> Result<(), Error> {
        self.db
            .put_now(Self::record_key(h), Self::encode(header, hit))
    }

    pub fn last_height(&self) -> Result<Option<Height>, Error> {
        let mut it = self.db.db().raw_iterator();
        it.seek_for_prev(Self::record_key(Height::MAX));
        if it.valid() {
            if let Some(k) = it.key() {
                if k.first() == Some(&TAG_BLOCK_HEADER) {
                    return Ok(Some(record_height(k)?))
                }
            }
        }
        it.status()?;
        Ok(None)
    }

    /// Headers for `from..=to`, in height order; holes end the run.
    pub fn range(
        &self, from: Height, to: Height,
    ) -> Result<Vec<BlockHeader>, Error> {
        let mut out = Vec::new();
        for h in from..=to {
            match self.get(h)? {
                Some((header, _)) => out.push(header),
                None => break,
            }
        }
        Ok(out)
    }

    /// Strip all records with height `>= h_from` (into the pending batch).
    pub fn remove_from(&self, h_from: Height) -> Result<(), Error> {
        let mut it = self.db.db().raw_iterator();
        it.seek(Self::record_key(h_from));
        while it.valid() {
            let k = match it.key() {
                Some(k) => k,
                None => break,
            };
            if k.first() != Some(&TAG_BLOCK_HEADER) {
                break
            }
            self.db.delete_batched(k.to_vec());
            it.next();
        }
        it.status()?;
        Ok(())
    }
}
