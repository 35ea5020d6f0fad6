//! In-memory doubles for the external collaborators: a node answering point
//! lookups from seeded maps, a channel-backed updates source, and a
//! miniature evaluator that understands just enough RIDE-shaped expressions
//! to drive the end-to-end scenarios.

use async_trait::async_trait;
use futures::channel::mpsc::{self, UnboundedSender};
use log::info;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ride_eval::blockchain::Blockchain;
use ride_eval::common::{
    AccountScriptInfo, Address, Alias, Asset, AssetDescription, AssetId,
    BlockHeader, DataEntry, Error, EvalError, Height, HitSource,
    LeaseBalance, TxId, TxMeta,
};
use ride_eval::node::{NodeApi, RideEvaluator, StreamItem, UpdatesSource};

#[derive(Default)]
struct DummyNodeState {
    height: Height,
    features: HashMap<u16, Height>,
    data: HashMap<(Address, String), DataEntry>,
    scripts: HashMap<Address, AccountScriptInfo>,
    assets: HashMap<AssetId, AssetDescription>,
    aliases: HashMap<Alias, Address>,
    balances: HashMap<(Address, Asset), i64>,
    leases: HashMap<Address, LeaseBalance>,
    transactions: HashMap<TxId, TxMeta>,
    headers: HashMap<Height, (BlockHeader, Option<HitSource>)>,
}

/// Point-lookup node double; everything it answers is seeded by the test.
#[derive(Clone, Default)]
pub struct DummyNode(Arc<RwLock<DummyNodeState>>);

/// A placeholder dApp script body.
pub fn dapp_script() -> AccountScriptInfo {
    AccountScriptInfo {
        public_key: vec![1u8; 32].into(),
        script: vec![0xab, 0x01, 0x02].into(),
        complexities: HashMap::from([("default".to_string(), 10u64)]),
    }
}

impl DummyNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_height(&self, h: Height) {
        self.0.write().height = h;
    }

    pub fn put_data(&self, address: &Address, entry: DataEntry) {
        self.0
            .write()
            .data
            .insert((address.clone(), entry.key().to_string()), entry);
    }

    pub fn put_script(&self, address: &Address, script: AccountScriptInfo) {
        self.0.write().scripts.insert(address.clone(), script);
    }

    pub fn put_balance(&self, address: &Address, asset: Asset, balance: i64) {
        self.0
            .write()
            .balances
            .insert((address.clone(), asset), balance);
    }

    pub fn put_lease(&self, address: &Address, lease: LeaseBalance) {
        self.0.write().leases.insert(address.clone(), lease);
    }

    pub fn put_alias(&self, alias: Alias, address: &Address) {
        self.0.write().aliases.insert(alias, address.clone());
    }

    pub fn put_asset(&self, id: AssetId, description: AssetDescription) {
        self.0.write().assets.insert(id, description);
    }

    pub fn put_transaction(&self, id: TxId, meta: TxMeta) {
        self.0.write().transactions.insert(id, meta);
    }

    pub fn put_header(
        &self, h: Height, header: BlockHeader, hit: Option<HitSource>,
    ) {
        self.0.write().headers.insert(h, (header, hit));
    }
}

#[async_trait]
impl NodeApi for DummyNode {
    async fn current_height(&self) -> Result<Height, Error> {
        info!("current_height()");
        Ok(self.0.read().height)
    }

    async fn activated_features(
        &self, _h: Height,
    ) -> Result<HashMap<u16, Height>, Error> {
        info!("activated_features()");
        Ok(self.0.read().features.clone())
    }

    async fn account_data_entry(
        &self, address: &Address, key: &str,
    ) -> Result<Option<DataEntry>, Error> {
        info!("account_data_entry({}, {})", address, key);
        Ok(self
            .0
            .read()
            .data
            .get(&(address.clone(), key.to_string()))
            .cloned())
    }

    async fn account_script(
        &self, address: &Address,
    ) -> Result<Option<AccountScriptInfo>, Error> {
        info!("account_script({})", address);
        Ok(self.0.read().scripts.get(address).cloned())
    }

    async fn block_header(
        &self, h: Height,
    ) -> Result<Option<(BlockHeader, Option<HitSource>)>, Error> {
        info!("block_header({})", h);
        Ok(self.0.read().headers.get(&h).cloned())
    }

    async fn asset_description(
        &self, id: &AssetId,
    ) -> Result<Option<AssetDescription>, Error> {
        info!("asset_description({})", id);
        Ok(self.0.read().assets.get(id).cloned())
    }

    async fn resolve_alias(
        &self, alias: &Alias,
    ) -> Result<Option<Address>, Error> {
        info!("resolve_alias({})", alias);
        Ok(self.0.read().aliases.get(alias).cloned())
    }

    async fn balance(
        &self, address: &Address, asset: &Asset,
    ) -> Result<i64, Error> {
        info!("balance({}, {})", address, asset);
        Ok(self
            .0
            .read()
            .balances
            .get(&(address.clone(), asset.clone()))
            .copied()
            .unwrap_or(0))
    }

    async fn lease_balance(
        &self, address: &Address,
    ) -> Result<LeaseBalance, Error> {
        info!("lease_balance({})", address);
        Ok(self
            .0
            .read()
            .leases
            .get(address)
            .copied()
            .unwrap_or_default())
    }

    async fn transaction(&self, id: &TxId) -> Result<Option<TxMeta>, Error> {
        info!("transaction({})", id);
        Ok(self.0.read().transactions.get(id).cloned())
    }
}

/// Updates source fed by hand: the test keeps the sender and pushes
/// whatever framing it wants to exercise.
pub struct ChannelUpdates {
    rx: Mutex<Option<mpsc::UnboundedReceiver<StreamItem>>>,
}

impl ChannelUpdates {
    pub fn new() -> (Arc<Self>, UnboundedSender<StreamItem>) {
        let (tx, rx) = mpsc::unbounded();
        (
            Arc::new(Self {
                rx: Mutex::new(Some(rx)),
            }),
            tx,
        )
    }
}

#[async_trait]
impl UpdatesSource for ChannelUpdates {
    async fn stream(
        &self, from: Height, _to: Height,
    ) -> Result<mpsc::UnboundedReceiver<StreamItem>, Error> {
        info!("stream(from={})", from);
        self.rx
            .lock()
            .take()
            .ok_or_else(|| Error::Transport("already subscribed".into()))
    }
}

/// Evaluates `{expr}` requests of the forms the scenarios use:
/// `height`, integer literals, `getIntegerValue(this|Address(0x..), "key")`,
/// `wavesBalance(...)`, optionally compared with `> >= < <= == !=`.
/// Unsupported calls produce a defined evaluation error.
pub struct MiniEvaluator;

#[async_trait]
impl RideEvaluator for MiniEvaluator {
    async fn evaluate(
        &self, view: &dyn Blockchain, address: &Address, request: &Value,
    ) -> Result<Value, EvalError> {
        let expr = request
            .get("expr")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                EvalError::evaluation("expected an {\"expr\": ...} request")
            })?;
        eval_expr(view, address, expr).await
    }
}

const UNSUPPORTED: &[&str] = &["assetScript", "transferTransactionById"];

async fn eval_expr(
    view: &dyn Blockchain, this: &Address, expr: &str,
) -> Result<Value, EvalError> {
    let expr = expr.trim();
    for op in [">=", "<=", "==", "!=", ">", "<"] {
        if let Some(at) = expr.find(op) {
            let lhs = eval_term(view, this, &expr[..at]).await?;
            let rhs = eval_term(view, this, &expr[at + op.len()..]).await?;
            let value = match op {
                ">" => lhs > rhs,
                ">=" => lhs >= rhs,
                "<" => lhs < rhs,
                "<=" => lhs <= rhs,
                "==" => lhs == rhs,
                "!=" => lhs != rhs,
                _ => unreachable!(),
            };
            return Ok(result_json(json!({
                "type": "Boolean",
                "value": value,
            })))
        }
    }
    let value = eval_term(view, this, expr).await?;
    Ok(result_json(json!({"type": "Int", "value": value})))
}

fn result_json(value: Value) -> Value {
    json!({"result": value, "complexity": 2})
}

async fn eval_term(
    view: &dyn Blockchain, this: &Address, term: &str,
) -> Result<i64, EvalError> {
    let term = term.trim();
    if term == "height" {
        return Ok(view.height().await as i64)
    }
    if let Ok(n) = term.parse::<i64>() {
        return Ok(n)
    }
    if let Some(args) = call_args(term, "getIntegerValue") {
        let (target, key) = args.split_once(',').ok_or_else(|| {
            EvalError::evaluation(format!("bad arguments: {}", args))
        })?;
        let address = resolve_target(this, target)?;
        let key = unquote(key)?;
        return match view
            .account_data(&address, key)
            .await
            .map_err(|e| EvalError::transport(&e))?
        {
            Some(DataEntry::Integer { value, .. }) => Ok(value),
            _ => Err(EvalError::evaluation(format!(
                "integer entry not found: {}",
                key
            ))),
        }
    }
    if let Some(args) = call_args(term, "wavesBalance") {
        let address = resolve_target(this, args)?;
        return view
            .balance(&address, &Asset::Waves)
            .await
            .map_err(|e| EvalError::transport(&e))
    }
    for name in UNSUPPORTED {
        if term.starts_with(name) {
            return Err(EvalError::evaluation(format!(
                "{} is not supported",
                name
            )))
        }
    }
    Err(EvalError::evaluation(format!("cannot evaluate: {}", term)))
}

fn call_args<'a>(term: &'a str, name: &str) -> Option<&'a str> {
    term.strip_prefix(name)?
        .trim_start()
        .strip_prefix('(')?
        .strip_suffix(')')
}

fn resolve_target(this: &Address, s: &str) -> Result<Address, EvalError> {
    let s = s.trim();
    if s == "this" {
        return Ok(this.clone())
    }
    if let Some(inner) =
        s.strip_prefix("Address(").and_then(|r| r.strip_suffix(')'))
    {
        return Address::from_str(inner.trim()).map_err(|()| {
            EvalError::evaluation(format!("bad address: {}", inner))
        })
    }
    Err(EvalError::evaluation(format!("bad address term: {}", s)))
}

fn unquote(s: &str) -> Result<&str, EvalError> {
    s.trim()
        .strip_prefix('"')
        .and_then(|r| r.strip_suffix('"'))
        .ok_or_else(|| {
            EvalError::evaluation(format!("expected a quoted key: {}", s))
        })
}

/// Counts `evaluate` invocations; the admission-dedup tests watch it.
pub struct CountingEvaluator {
    inner: MiniEvaluator,
    calls: AtomicUsize,
}

impl CountingEvaluator {
    pub fn new() -> Self {
        Self {
            inner: MiniEvaluator,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for CountingEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RideEvaluator for CountingEvaluator {
    async fn evaluate(
        &self, view: &dyn Blockchain, address: &Address, request: &Value,
    ) -> Result<Value, EvalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.evaluate(view, address, request).await
    }
}
