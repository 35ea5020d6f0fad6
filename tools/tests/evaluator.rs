//! The mini evaluator against a real tagged view over the dummy node.

use serde_json::{json, Value};

use std::sync::Arc;

use ride_eval::blockchain::{ScriptBlockchain, SharedBlockchainData};
use ride_eval::common::{Asset, RequestTag};
use ride_eval::db::CacheDb;
use ride_eval::node::RideEvaluator;

use ride_eval_tools::dummy::{DummyNode, MiniEvaluator};
use ride_eval_tools::{addr, int_entry};

async fn eval(node: &DummyNode, expr: &str) -> Result<Value, Value> {
    let dir = tempfile::tempdir().unwrap();
    let db = CacheDb::open(dir.path()).unwrap();
    let shared =
        SharedBlockchainData::new(db, Arc::new(node.clone()), 10).unwrap();
    let view = ScriptBlockchain::new(shared, RequestTag(0));
    MiniEvaluator
        .evaluate(&view, &addr(0xa1), &json!({ "expr": expr }))
        .await
        .map_err(|e| e.to_json())
}

#[tokio::test]
async fn test_literals_and_comparisons() {
    let node = DummyNode::new();
    let out = eval(&node, "3").await.unwrap();
    assert_eq!(out["result"]["value"], json!(3));

    let out = eval(&node, "2 >= 2").await.unwrap();
    assert_eq!(out["result"]["value"], json!(true));
    let out = eval(&node, "2 != 2").await.unwrap();
    assert_eq!(out["result"]["value"], json!(false));
}

#[tokio::test]
async fn test_data_and_balance_reads() {
    let alice = addr(0xa1);
    let node = DummyNode::new();
    node.put_data(&alice, int_entry("x", 41));
    node.put_balance(&alice, Asset::Waves, 1_000);

    let out = eval(&node, "getIntegerValue(this, \"x\") > 40")
        .await
        .unwrap();
    assert_eq!(out["result"]["value"], json!(true));

    let expr = format!("getIntegerValue(Address({}), \"x\")", alice);
    let out = eval(&node, &expr).await.unwrap();
    assert_eq!(out["result"]["value"], json!(41));

    let out = eval(&node, "wavesBalance(this) == 1000").await.unwrap();
    assert_eq!(out["result"]["value"], json!(true));
}

#[tokio::test]
async fn test_missing_entry_is_an_error() {
    let node = DummyNode::new();
    let err = eval(&node, "getIntegerValue(this, \"nope\") > 0")
        .await
        .unwrap_err();
    assert_eq!(err["error"], json!(306));
}

#[tokio::test]
async fn test_unsupported_functions() {
    let node = DummyNode::new();
    for expr in ["assetScript(this)", "transferTransactionById(this)"] {
        let err = eval(&node, expr).await.unwrap_err();
        assert_eq!(err["error"], json!(306));
        assert!(err["message"].as_str().unwrap().contains("not supported"));
    }
}

#[tokio::test]
async fn test_bad_request_shape() {
    let dir = tempfile::tempdir().unwrap();
    let db = CacheDb::open(dir.path()).unwrap();
    let shared =
        SharedBlockchainData::new(db, Arc::new(DummyNode::new()), 10)
            .unwrap();
    let view = ScriptBlockchain::new(shared, RequestTag(0));
    let err = MiniEvaluator
        .evaluate(&view, &addr(0xa1), &json!({"call": {}}))
        .await
        .unwrap_err();
    assert_eq!(err.error, 306);
}
