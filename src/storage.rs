//! Hot tier: per-entity in-memory map over the persistent cache, with a tag
//! set per key. Reads through a tagged view subscribe the reader to the key;
//! every later mutation of the key reports exactly that tag set as affected.

use log::debug;
use parking_lot::RwLock;

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;

use crate::common::{Error, Height, RequestTag};
use crate::db::{CacheDb, DbCache, KeySpace};
use crate::remote::RemoteData;

/// Tags whose dependency keys changed and whose scripts must re-run.
pub type AffectedTags = HashSet<RequestTag>;

/// Callback that asks the node for a value the caches have never seen.
/// Answers are authoritative: `Absent` means the chain has no such entry.
pub type RemoteLoaderFunc<K, V> = Box<
    dyn Fn(K) -> Pin<Box<dyn Future<Output = Result<RemoteData<V>, Error>> + Send>>
        + Send
        + Sync,
>;

pub struct ExactWithHeightStorage<S: KeySpace> {
    hot: RwLock<HashMap<S::Key, RemoteData<S::Value>>>,
    tags: RwLock<HashMap<S::Key, HashSet<RequestTag>>>,
    persistent: DbCache<S>,
    loader: RemoteLoaderFunc<S::Key, S::Value>,
}

impl<S: KeySpace> ExactWithHeightStorage<S> {
    pub fn new(db: CacheDb, loader: RemoteLoaderFunc<S::Key, S::Value>) -> Self {
        Self {
            hot: RwLock::new(HashMap::new()),
            tags: RwLock::new(HashMap::new()),
            persistent: DbCache::new(db),
            loader,
        }
    }

    /// Read through the tiers, subscribing `tag` to the key first so a
    /// concurrent mutation cannot slip between the read and the subscribe.
    pub async fn get(
        &self, h: Height, key: &S::Key, tag: RequestTag,
    ) -> Result<Option<S::Value>, Error> {
        self.tags
            .write()
            .entry(key.clone())
            .or_default()
            .insert(tag);
        self.get_untagged(h, key).await
    }

    /// Same read path without touching the tag sets.
    pub async fn get_untagged(
        &self, h: Height, key: &S::Key,
    ) -> Result<Option<S::Value>, Error> {
        if let Some(v) = self.hot.read().get(key) {
            if v.loaded() {
                return Ok(v.as_option().cloned())
            }
        }
        let stored = self.persistent.get(h, key)?;
        if stored.loaded() {
            self.hot.write().insert(key.clone(), stored.clone());
            return Ok(stored.into_option())
        }
        let fetched = (self.loader)(key.clone()).await?;
        debug!("{}: loaded from node at height {}", S::NAME, h);
        self.persistent.set_now(h, key, &fetched)?;
        self.hot.write().insert(key.clone(), fetched.clone());
        Ok(fetched.into_option())
    }

    fn effective(&self, key: &S::Key) -> RemoteData<S::Value> {
        self.hot
            .read()
            .get(key)
            .cloned()
            .unwrap_or(RemoteData::Unknown)
    }

    fn tags_of(&self, key: &S::Key) -> AffectedTags {
        self.tags.read().get(key).cloned().unwrap_or_default()
    }

    /// Write-through of a state-update sub-entry at height `h`. Returns the
    /// key's tag set iff the effective value actually changed; a first
    /// sighting (both tiers `Unknown`) never emits.
    pub fn append(
        &self, h: Height, key: &S::Key, new: RemoteData<S::Value>,
    ) -> Result<AffectedTags, Error> {
        let prev = self.effective(key);
        let prev = if prev.loaded() {
            prev
        } else {
            self.persistent.get(h, key)?
        };
        self.persistent.set(h, key, &new);
        self.hot.write().insert(key.clone(), new.clone());
        if prev.loaded() && prev != new {
            Ok(self.tags_of(key))
        } else {
            Ok(AffectedTags::new())
        }
    }

    /// Undo a single append made at height `h`: strip the persisted records
    /// back and refresh hot from the survivor.
    pub fn undo_append(
        &self, h: Height, key: &S::Key,
    ) -> Result<AffectedTags, Error> {
        let prev = self.effective(key);
        let survivor = self.persistent.remove_from(h, key)?;
        self.hot.write().insert(key.clone(), survivor.clone());
        if prev.loaded() && prev != survivor {
            Ok(self.tags_of(key))
        } else {
            Ok(AffectedTags::new())
        }
    }

    /// Apply the authoritative post-rollback value delivered by a rollback
    /// event: drop everything above `h_to`, re-seat the key at `h_to`.
    pub fn rollback(
        &self, h_to: Height, key: &S::Key, after: RemoteData<S::Value>,
    ) -> Result<AffectedTags, Error> {
        let prev = self.effective(key);
        self.persistent.remove_from(h_to + 1, key)?;
        self.persistent.set(h_to, key, &after);
        self.hot.write().insert(key.clone(), after.clone());
        if prev.loaded() && prev != after {
            Ok(self.tags_of(key))
        } else {
            Ok(AffectedTags::new())
        }
    }
}
