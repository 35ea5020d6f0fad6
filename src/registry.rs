//! Request registry and scheduler: maps `(address, request)` keys to script
//! records, re-runs exactly the affected scripts after each event round, and
//! serves cached results to HTTP callers with per-key admission dedup for
//! first-time requests.

use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, warn};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::blockchain::{Blockchain, ScriptBlockchain, SharedBlockchainData};
use crate::common::{monotonic_ms, Address, EvalError, RequestTag};
use crate::node::RideEvaluator;
use crate::storage::AffectedTags;

/// Identity of a registered script: the target account plus the request
/// JSON in its canonically serialized form (object keys are ordered, so two
/// JSON spellings of the same request collapse into one key).
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct RequestKey {
    pub address: Address,
    text: String,
}

impl RequestKey {
    pub fn new(address: Address, request: &Value) -> Self {
        let text = request.to_string();
        Self { address, text }
    }
}

pub struct RestApiScript {
    pub key: RequestKey,
    pub tag: RequestTag,
    pub request: Value,
    pub last_result: RwLock<Value>,
}

impl RestApiScript {
    fn store(&self, result: Result<Value, EvalError>) {
        let mut json = match result {
            Ok(v) => v,
            Err(e) => {
                warn!("script {} for {}: {}", self.tag.0, self.key.address, e);
                e.to_json()
            }
        };
        if let Value::Object(map) = &mut json {
            map.insert("__lastUpdated".into(), monotonic_ms().into());
        }
        *self.last_result.write() = json;
    }
}

#[derive(Clone)]
pub struct Registry(Arc<RegistryInner>);

struct RegistryInner {
    shared: Arc<SharedBlockchainData>,
    evaluator: Arc<dyn RideEvaluator>,
    scripts: RwLock<HashMap<RequestKey, Arc<RestApiScript>>>,
    by_tag: RwLock<HashMap<RequestTag, Arc<RestApiScript>>>,
    /// In-flight first-time evaluations; concurrent duplicates await the
    /// same shared task.
    admission: Mutex<HashMap<RequestKey, Shared<BoxFuture<'static, Value>>>>,
    next_tag: AtomicU32,
}

impl Registry {
    pub fn new(
        shared: Arc<SharedBlockchainData>, evaluator: Arc<dyn RideEvaluator>,
    ) -> Self {
        Self(Arc::new(RegistryInner {
            shared,
            evaluator,
            scripts: RwLock::new(HashMap::new()),
            by_tag: RwLock::new(HashMap::new()),
            admission: Mutex::new(HashMap::new()),
            next_tag: AtomicU32::new(0),
        }))
    }

    /// Seed the registry from a persisted request list; results stay empty
    /// until the first forced round.
    pub fn prefill(&self, requests: Vec<(Address, Value)>) {
        for (address, request) in requests {
            let key = RequestKey::new(address, &request);
            self.insert_if_absent(key, request, Value::Null);
        }
    }

    fn insert_if_absent(
        &self, key: RequestKey, request: Value, last_result: Value,
    ) -> Arc<RestApiScript> {
        let mut scripts = self.0.scripts.write();
        let script = scripts
            .entry(key.clone())
            .or_insert_with(|| {
                let tag = RequestTag(
                    self.0.next_tag.fetch_add(1, Ordering::SeqCst),
                );
                Arc::new(RestApiScript {
                    key,
                    tag,
                    request,
                    last_result: RwLock::new(last_result),
                })
            })
            .clone();
        self.0.by_tag.write().insert(script.tag, script.clone());
        script
    }

    pub fn script_count(&self) -> usize {
        self.0.scripts.read().len()
    }

    /// Registered requests, for persisting the request list across runs.
    pub fn registered(&self) -> Vec<(Address, Value)> {
        self.0
            .scripts
            .read()
            .values()
            .map(|s| (s.key.address.clone(), s.request.clone()))
            .collect()
    }

    /// Pick this round's targets and clear exactly their tags from the
    /// accumulated set. Tags without a registered script stay put: a
    /// concurrent first-time run may still be inserting its record, and the
    /// next round must not lose that recomputation.
    fn targets(
        &self, force_all: bool, affected: &mut AffectedTags,
    ) -> Vec<Arc<RestApiScript>> {
        if force_all {
            let scripts: Vec<_> =
                self.0.scripts.read().values().cloned().collect();
            for script in &scripts {
                affected.remove(&script.tag);
            }
            scripts
        } else {
            let by_tag = self.0.by_tag.read();
            let tags: Vec<_> = affected.iter().copied().collect();
            let mut out = Vec::new();
            for tag in tags {
                if let Some(script) = by_tag.get(&tag) {
                    affected.remove(&tag);
                    out.push(script.clone());
                }
            }
            out
        }
    }

    /// One evaluation round: run the targets in parallel, publish each new
    /// result. Per-script failures are stored as error JSON and never abort
    /// the batch. The returned future owns everything it needs, so the
    /// caller can run it to completion before touching state again.
    pub fn run_scripts(
        &self, force_all: bool, affected: &mut AffectedTags,
    ) -> BoxFuture<'static, ()> {
        let targets = self.targets(force_all, affected);
        let inner = self.0.clone();
        async move {
            if targets.is_empty() {
                return
            }
            debug!("running {} scripts", targets.len());
            let jobs = targets
                .into_iter()
                .map(|script| Self::run_one(inner.clone(), script));
            futures::future::join_all(jobs).await;
        }
        .boxed()
    }

    async fn run_one(inner: Arc<RegistryInner>, script: Arc<RestApiScript>) {
        let view = ScriptBlockchain::new(inner.shared.clone(), script.tag);
        let result = inner
            .evaluator
            .evaluate(&view, &script.key.address, &script.request)
            .await;
        script.store(result);
    }

    /// Serve the cached result, or admit exactly one first-time evaluation
    /// for this key and let concurrent duplicates await it.
    pub async fn cached_or_run(
        &self, address: Address, request: Value,
    ) -> Value {
        let key = RequestKey::new(address, &request);
        if let Some(script) = self.0.scripts.read().get(&key) {
            return script.last_result.read().clone()
        }
        let task = {
            let mut admission = self.0.admission.lock();
            match admission.get(&key) {
                Some(task) => task.clone(),
                None => {
                    let inner = self.0.clone();
                    let task_key = key.clone();
                    let task = async move {
                        RegistryInner::first_run(inner, task_key, request)
                            .await
                    }
                    .boxed()
                    .shared();
                    admission.insert(key.clone(), task.clone());
                    task
                }
            }
        };
        let out = task.await;
        self.0.admission.lock().remove(&key);
        out
    }
}

impl RegistryInner {
    async fn first_run(
        inner: Arc<Self>, key: RequestKey, request: Value,
    ) -> Value {
        let tag = RequestTag(inner.next_tag.fetch_add(1, Ordering::SeqCst));
        let view = ScriptBlockchain::new(inner.shared.clone(), tag);
        // only dApps are evaluated; absence leaves no registry entry behind
        match view.account_script(&key.address).await {
            Err(e) => return EvalError::transport(&e).to_json(),
            Ok(None) => return EvalError::not_a_dapp(&key.address).to_json(),
            Ok(Some(_)) => {}
        }
        let script = Arc::new(RestApiScript {
            key: key.clone(),
            tag,
            request,
            last_result: RwLock::new(Value::Null),
        });
        let result = inner
            .evaluator
            .evaluate(&view, &key.address, &script.request)
            .await;
        script.store(result);
        let stored = {
            let mut scripts = inner.scripts.write();
            scripts.entry(key).or_insert_with(|| script.clone()).clone()
        };
        inner.by_tag.write().insert(stored.tag, stored.clone());
        let out = stored.last_result.read().clone();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> Address {
        Address::from_slice(&[n; Address::LEN])
    }

    #[test]
    fn test_request_key_canonical() {
        let a: Value =
            serde_json::from_str(r#"{"expr": "1 + 1", "trace": true}"#)
                .unwrap();
        let b: Value =
            serde_json::from_str(r#"{"trace": true, "expr": "1 + 1"}"#)
                .unwrap();
        assert_eq!(
            RequestKey::new(addr(1), &a),
            RequestKey::new(addr(1), &b)
        );
        assert_ne!(
            RequestKey::new(addr(1), &a),
            RequestKey::new(addr(2), &a)
        );
    }
}
