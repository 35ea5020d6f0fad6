//! End-to-end scenarios: the engine consumes stream items exactly as the
//! orchestrator feeds them, scripts re-run only when their dependencies
//! change, and synthetic forks / rollbacks converge to the right results.

use serde_json::{json, Value};

use std::sync::Arc;

use ride_eval::common::{Address, Error};
use ride_eval::config::AppConfig;
use ride_eval::node::{RideEvaluator, StreamItem};
use ride_eval::sync::{bootstrap, Engine, Flow};

use ride_eval_tools::dummy::{
    dapp_script, ChannelUpdates, CountingEvaluator, DummyNode, MiniEvaluator,
};
use ride_eval_tools::{
    addr, bid, block_append, block_with_txs, empty_event, int_entry,
    micro_append, rollback_to, UpdateBuilder,
};

struct Harness {
    _dir: tempfile::TempDir,
    engine: Engine,
}

async fn start(
    requests: Vec<(Address, Value)>, evaluator: Arc<dyn RideEvaluator>,
    seed: impl FnOnce(&DummyNode),
) -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let cfg: AppConfig = serde_json::from_value(json!({
        "dbPath": dir.path().join("db").to_str().unwrap(),
        "workingOffset": 0,
    }))
    .unwrap();
    let node = DummyNode::new();
    node.set_height(1);
    node.put_header(1, ride_eval_tools::header(1, &bid(1)), None);
    seed(&node);
    let (updates, _events_tx) = ChannelUpdates::new();
    let (engine, _events) = bootstrap(
        &cfg,
        Arc::new(node.clone()),
        updates,
        evaluator,
        requests,
    )
    .await
    .unwrap();
    Harness { _dir: dir, engine }
}

async fn send(engine: &mut Engine, event: ride_eval::events::BlockchainUpdated) {
    assert_eq!(engine.handle(StreamItem::Next(event)).await, Flow::Continue);
}

fn x_request(target: &Address) -> Value {
    json!({
        "expr": format!("getIntegerValue(Address({}), \"x\") > 0", target)
    })
}

async fn result_value(h: &Harness, address: &Address, request: &Value) -> Value {
    let out = h
        .engine
        .registry()
        .cached_or_run(address.clone(), request.clone())
        .await;
    out["result"]["value"].clone()
}

/// Scenario: an integer read toggles with the data entry it depends on.
#[tokio::test]
async fn test_integer_read_toggles() {
    let alice = addr(0xa1);
    let request = x_request(&alice);
    let seed_addr = alice.clone();
    let mut h = start(
        vec![(alice.clone(), request.clone())],
        Arc::new(MiniEvaluator),
        move |node| {
            node.put_script(&seed_addr, dapp_script());
            node.put_data(&seed_addr, int_entry("x", 0));
        },
    )
    .await;

    // warm-up block reaches the working height and forces the first round
    send(&mut h.engine, block_append(1, bid(1), UpdateBuilder::new().build()))
        .await;
    assert_eq!(result_value(&h, &alice, &request).await, json!(false));

    let update = UpdateBuilder::new().data(&alice, int_entry("x", 1)).build();
    send(&mut h.engine, block_append(2, bid(2), update)).await;
    assert_eq!(result_value(&h, &alice, &request).await, json!(true));
}

/// Scenario: a synthetic fork whose re-applied tail carries no relevant
/// change preserves the result.
#[tokio::test]
async fn test_synthetic_fork_preserves_result() {
    let alice = addr(0xa1);
    let request = x_request(&alice);
    let seed_addr = alice.clone();
    let mut h = start(
        vec![(alice.clone(), request.clone())],
        Arc::new(MiniEvaluator),
        move |node| {
            node.put_script(&seed_addr, dapp_script());
            node.put_data(&seed_addr, int_entry("x", 0));
        },
    )
    .await;

    send(&mut h.engine, block_append(1, bid(1), UpdateBuilder::new().build()))
        .await;
    let update = UpdateBuilder::new().data(&alice, int_entry("x", 1)).build();
    send(&mut h.engine, block_append(2, bid(2), update)).await;
    assert_eq!(result_value(&h, &alice, &request).await, json!(true));

    send(&mut h.engine, block_append(3, bid(3), UpdateBuilder::new().build()))
        .await;
    assert_eq!(
        h.engine.handle(StreamItem::Failed(Error::Timeout)).await,
        Flow::Continue
    );
    // the canonical tail comes back as a competing block plus a micro-block
    send(
        &mut h.engine,
        block_append(2, bid(102), UpdateBuilder::new().build()),
    )
    .await;
    send(
        &mut h.engine,
        micro_append(2, bid(103), UpdateBuilder::new().build()),
    )
    .await;
    assert_eq!(result_value(&h, &alice, &request).await, json!(true));
}

/// Scenario: a synthetic fork that drops the only change reverts the
/// result.
#[tokio::test]
async fn test_synthetic_fork_reverts_result() {
    let alice = addr(0xa1);
    let request = x_request(&alice);
    let seed_addr = alice.clone();
    let mut h = start(
        vec![(alice.clone(), request.clone())],
        Arc::new(MiniEvaluator),
        move |node| {
            node.put_script(&seed_addr, dapp_script());
            node.put_data(&seed_addr, int_entry("x", 0));
        },
    )
    .await;

    send(&mut h.engine, block_append(1, bid(1), UpdateBuilder::new().build()))
        .await;
    assert_eq!(result_value(&h, &alice, &request).await, json!(false));
    let update = UpdateBuilder::new().data(&alice, int_entry("x", 1)).build();
    send(&mut h.engine, block_append(2, bid(2), update)).await;
    assert_eq!(result_value(&h, &alice, &request).await, json!(true));

    assert_eq!(
        h.engine.handle(StreamItem::Failed(Error::Timeout)).await,
        Flow::Continue
    );
    // the fork's block at the same height has no x update
    send(
        &mut h.engine,
        block_append(2, bid(102), UpdateBuilder::new().build()),
    )
    .await;
    send(
        &mut h.engine,
        micro_append(2, bid(103), UpdateBuilder::new().build()),
    )
    .await;
    assert_eq!(result_value(&h, &alice, &request).await, json!(false));
}

/// Scenario: an authoritative rollback event with the post-rollback value
/// toggles the result back.
#[tokio::test]
async fn test_rollback_by_event() {
    let alice = addr(0xa1);
    let request = x_request(&alice);
    let seed_addr = alice.clone();
    let mut h = start(
        vec![(alice.clone(), request.clone())],
        Arc::new(MiniEvaluator),
        move |node| {
            node.put_script(&seed_addr, dapp_script());
            node.put_data(&seed_addr, int_entry("x", 0));
        },
    )
    .await;

    send(&mut h.engine, block_append(1, bid(1), UpdateBuilder::new().build()))
        .await;
    send(&mut h.engine, block_append(2, bid(2), UpdateBuilder::new().build()))
        .await;
    let update = UpdateBuilder::new().data(&alice, int_entry("x", 1)).build();
    send(&mut h.engine, block_append(3, bid(3), update)).await;
    assert_eq!(result_value(&h, &alice, &request).await, json!(true));
    assert_eq!(h.engine.shared().height(), 3);

    let after = UpdateBuilder::new().data(&alice, int_entry("x", 0)).build();
    send(&mut h.engine, rollback_to(2, bid(2), after, Vec::new())).await;
    assert_eq!(result_value(&h, &alice, &request).await, json!(false));
    assert_eq!(h.engine.shared().height(), 2);
}

/// Restating an identical value must not re-run the script; changing it
/// must.
#[tokio::test]
async fn test_identical_restate_is_not_affected() {
    let alice = addr(0xa1);
    let request = x_request(&alice);
    let counting = Arc::new(CountingEvaluator::new());
    let seed_addr = alice.clone();
    let mut h = start(
        vec![(alice.clone(), request.clone())],
        counting.clone(),
        move |node| {
            node.put_script(&seed_addr, dapp_script());
            node.put_data(&seed_addr, int_entry("x", 1));
        },
    )
    .await;

    send(&mut h.engine, block_append(1, bid(1), UpdateBuilder::new().build()))
        .await;
    let after_warmup = counting.calls();
    assert_eq!(after_warmup, 1);

    // same value again: not affected, no run
    let update = UpdateBuilder::new().data(&alice, int_entry("x", 1)).build();
    send(&mut h.engine, block_append(2, bid(2), update)).await;
    assert_eq!(counting.calls(), after_warmup);

    // changed value: exactly one more run
    let update = UpdateBuilder::new().data(&alice, int_entry("x", 2)).build();
    send(&mut h.engine, block_append(3, bid(3), update)).await;
    assert_eq!(counting.calls(), after_warmup + 1);

    // empty events are ignored entirely
    send(&mut h.engine, empty_event(3)).await;
    assert_eq!(counting.calls(), after_warmup + 1);
    assert_eq!(h.engine.shared().height(), 3);
}

/// Scenario: concurrent first-time requests admit exactly one evaluation
/// and share its JSON.
#[tokio::test]
async fn test_admission_dedup() {
    let alice = addr(0xa1);
    let request = x_request(&alice);
    let counting = Arc::new(CountingEvaluator::new());
    let seed_addr = alice.clone();
    let h = start(vec![], counting.clone(), move |node| {
        node.put_script(&seed_addr, dapp_script());
        node.put_data(&seed_addr, int_entry("x", 0));
    })
    .await;

    let registry = h.engine.registry();
    let (a, b) = tokio::join!(
        registry.cached_or_run(alice.clone(), request.clone()),
        registry.cached_or_run(alice.clone(), request.clone())
    );
    assert_eq!(a, b);
    assert_eq!(counting.calls(), 1);
    assert_eq!(registry.script_count(), 1);
}

/// Scenario: a non-dApp target yields a validation error and leaves no
/// registry entry behind.
#[tokio::test]
async fn test_non_dapp_is_rejected() {
    let bob = addr(0xb0);
    let request = x_request(&bob);
    let h = start(vec![], Arc::new(MiniEvaluator), |_node| {}).await;

    let out = h
        .engine
        .registry()
        .cached_or_run(bob.clone(), request.clone())
        .await;
    assert_eq!(out["error"], json!(199));
    assert!(out["message"].as_str().unwrap().contains("not a dApp"));
    assert_eq!(h.engine.registry().script_count(), 0);
}

/// Two reads with no intervening event return identical JSON, including
/// the `__lastUpdated` stamp.
#[tokio::test]
async fn test_repeated_reads_are_stable() {
    let alice = addr(0xa1);
    let request = x_request(&alice);
    let seed_addr = alice.clone();
    let mut h = start(
        vec![(alice.clone(), request.clone())],
        Arc::new(MiniEvaluator),
        move |node| {
            node.put_script(&seed_addr, dapp_script());
            node.put_data(&seed_addr, int_entry("x", 5));
        },
    )
    .await;
    send(&mut h.engine, block_append(1, bid(1), UpdateBuilder::new().build()))
        .await;

    let registry = h.engine.registry();
    let a = registry
        .cached_or_run(alice.clone(), request.clone())
        .await;
    let b = registry
        .cached_or_run(alice.clone(), request.clone())
        .await;
    assert_eq!(a, b);
    assert!(a["__lastUpdated"].is_u64());
}

/// Alias collisions resolve to the later append; script sets survive
/// rollbacks (reasserted by forward progress, never reverted).
#[tokio::test]
async fn test_aliases_and_scripts_across_events() {
    use ride_eval::common::Alias;
    use ride_eval::events::{TxAction, TxInfo};
    use ride_eval_tools::txid;

    let alice = addr(0xa1);
    let carol = addr(0xc0);
    let seed_addr = alice.clone();
    let mut h = start(vec![], Arc::new(MiniEvaluator), move |node| {
        node.put_script(&seed_addr, dapp_script());
    })
    .await;

    send(&mut h.engine, block_append(1, bid(1), UpdateBuilder::new().build()))
        .await;
    let create = |n: u64, sender: &Address| TxInfo {
        id: txid(n),
        action: Some(TxAction::CreateAlias {
            sender: sender.clone(),
            alias: Alias::new("merry"),
        }),
        transfer: None,
    };
    send(
        &mut h.engine,
        block_with_txs(
            2,
            bid(2),
            UpdateBuilder::new().build(),
            vec![create(1, &alice)],
        ),
    )
    .await;
    send(
        &mut h.engine,
        block_with_txs(
            3,
            bid(3),
            UpdateBuilder::new().build(),
            vec![create(2, &carol)],
        ),
    )
    .await;

    let shared = h.engine.shared().clone();
    let resolved = shared
        .aliases
        .get_untagged(shared.height(), &Alias::new("merry"))
        .await
        .unwrap();
    assert_eq!(resolved, Some(carol.clone()));

    // set a script at 4, then roll back to 3: the set is not reverted
    let set = TxInfo {
        id: txid(3),
        action: Some(TxAction::SetScript {
            sender: carol.clone(),
            script: Some(dapp_script()),
        }),
        transfer: None,
    };
    send(
        &mut h.engine,
        block_with_txs(4, bid(4), UpdateBuilder::new().build(), vec![set]),
    )
    .await;
    send(
        &mut h.engine,
        rollback_to(3, bid(3), UpdateBuilder::new().build(), vec![txid(3)]),
    )
    .await;
    let script = shared
        .account_scripts
        .get_untagged(shared.height(), &carol)
        .await
        .unwrap();
    assert!(script.is_some());
    // the rolled-back transaction itself is gone
    let meta = shared
        .transactions
        .get_untagged(shared.height(), &txid(3))
        .await
        .unwrap();
    assert_eq!(meta, None);
}

/// Stream close stops the engine; a timeout during warm-up is fatal.
#[tokio::test]
async fn test_stream_termination() {
    let alice = addr(0xa1);
    let seed_addr = alice.clone();
    let mut h = start(vec![], Arc::new(MiniEvaluator), move |node| {
        node.put_script(&seed_addr, dapp_script());
    })
    .await;
    // still in Starting: a failure propagates as a stop
    assert_eq!(
        h.engine.handle(StreamItem::Failed(Error::Timeout)).await,
        Flow::Stop
    );

    let mut h2 = start(vec![], Arc::new(MiniEvaluator), |_| {}).await;
    assert_eq!(h2.engine.handle(StreamItem::Closed).await, Flow::Stop);
}
