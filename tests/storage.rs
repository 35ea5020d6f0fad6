//! Cache-layer properties driven through the event processor: undo
//! round-trips, replay equivalence, height tracking, and tag flow from a
//! tagged view to the affected set.

use std::sync::Arc;

use ride_eval::blockchain::{
    Blockchain, ScriptBlockchain, SharedBlockchainData,
};
use ride_eval::common::{Asset, RequestTag};
use ride_eval::db::{AccountDataSpace, CacheDb};
use ride_eval::events::EventProcessor;
use ride_eval::storage::{ExactWithHeightStorage, RemoteLoaderFunc};

use ride_eval_tools::dummy::DummyNode;
use ride_eval_tools::{
    addr, bid, block_append, empty_event, int_entry, micro_append,
    rollback_to, UpdateBuilder,
};

fn setup(
    seed: impl FnOnce(&DummyNode),
) -> (
    tempfile::TempDir,
    CacheDb,
    Arc<SharedBlockchainData>,
    EventProcessor,
) {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let db = CacheDb::open(dir.path().join("db")).unwrap();
    let node = DummyNode::new();
    node.set_height(1);
    seed(&node);
    let shared =
        SharedBlockchainData::new(db.clone(), Arc::new(node), 100).unwrap();
    let processor = EventProcessor::new(shared.clone());
    (dir, db, shared, processor)
}

const TAG: RequestTag = RequestTag(1);

/// Append followed by a synthetic undo leaves both tiers value-equal to the
/// state before the append, and reports the subscribed tag.
#[tokio::test]
async fn test_append_undo_roundtrip() {
    let alice = addr(0xa1);
    let seed_addr = alice.clone();
    let (_dir, db, shared, mut processor) = setup(move |node| {
        node.put_data(&seed_addr, int_entry("x", 0));
    });

    processor
        .process(&block_append(1, bid(1), UpdateBuilder::new().build()))
        .unwrap();
    let key = (alice.clone(), "x".to_string());
    // subscribe and pull x into both tiers at height 1
    assert_eq!(
        shared.account_data.get(1, &key, TAG).await.unwrap(),
        Some(int_entry("x", 0))
    );

    let update = UpdateBuilder::new().data(&alice, int_entry("x", 1)).build();
    processor.process(&block_append(2, bid(2), update)).unwrap();
    assert_eq!(
        shared.account_data.get_untagged(2, &key).await.unwrap(),
        Some(int_entry("x", 1))
    );

    processor.force_rollback_one().unwrap();
    assert!(processor.accumulated().affected_scripts.contains(&TAG));
    assert_eq!(
        shared.account_data.get_untagged(2, &key).await.unwrap(),
        Some(int_entry("x", 0))
    );

    // a cold storage over the same db must agree, without asking upstream
    let untouched: RemoteLoaderFunc<_, _> =
        Box::new(|_k| Box::pin(async { panic!("unexpected upstream read") }));
    let cold: ExactWithHeightStorage<AccountDataSpace> =
        ExactWithHeightStorage::new(db, untouched);
    assert_eq!(
        cold.get_untagged(10, &key).await.unwrap(),
        Some(int_entry("x", 0))
    );
}

/// Undo-then-reapply converges to the same state as a direct apply from a
/// fresh start.
#[tokio::test]
async fn test_undo_reapply_equals_fresh_apply() {
    let alice = addr(0xa1);
    let key = (alice.clone(), "x".to_string());
    let update = |v| {
        UpdateBuilder::new()
            .data(&alice, int_entry("x", v))
            .build()
    };

    let seed_addr = alice.clone();
    let (_dir, _db, replayed, mut processor) = setup(move |node| {
        node.put_data(&seed_addr, int_entry("x", 0));
    });
    processor
        .process(&block_append(1, bid(1), UpdateBuilder::new().build()))
        .unwrap();
    processor.process(&block_append(2, bid(2), update(1))).unwrap();
    processor.force_rollback_one().unwrap();
    processor
        .process(&block_append(2, bid(102), update(1)))
        .unwrap();

    let seed_addr = alice.clone();
    let (_dir2, _db2, fresh, mut direct) = setup(move |node| {
        node.put_data(&seed_addr, int_entry("x", 0));
    });
    direct
        .process(&block_append(1, bid(1), UpdateBuilder::new().build()))
        .unwrap();
    direct.process(&block_append(2, bid(102), update(1))).unwrap();

    assert_eq!(replayed.height(), fresh.height());
    assert_eq!(
        replayed.account_data.get_untagged(2, &key).await.unwrap(),
        fresh.account_data.get_untagged(2, &key).await.unwrap()
    );
}

/// The view height is the height of the last applied event, through blocks,
/// micro-blocks, empties and rollbacks.
#[tokio::test]
async fn test_height_tracks_applied_events() {
    let (_dir, _db, shared, mut processor) = setup(|_| {});
    assert_eq!(shared.height(), 0);

    for h in 1..=3u32 {
        processor
            .process(&block_append(
                h,
                bid(h as u64),
                UpdateBuilder::new().build(),
            ))
            .unwrap();
        assert_eq!(shared.height(), h);
    }
    processor
        .process(&micro_append(3, bid(30), UpdateBuilder::new().build()))
        .unwrap();
    assert_eq!(shared.height(), 3);

    processor.process(&empty_event(9)).unwrap();
    assert_eq!(shared.height(), 3);

    processor
        .process(&rollback_to(
            1,
            bid(1),
            UpdateBuilder::new().build(),
            Vec::new(),
        ))
        .unwrap();
    assert_eq!(shared.height(), 1);
}

/// Rollback all the way to height zero is legal and empties the view.
#[tokio::test]
async fn test_rollback_to_zero() {
    let (_dir, _db, shared, mut processor) = setup(|_| {});
    processor
        .process(&block_append(1, bid(1), UpdateBuilder::new().build()))
        .unwrap();
    processor
        .process(&block_append(2, bid(2), UpdateBuilder::new().build()))
        .unwrap();
    processor
        .process(&rollback_to(
            0,
            bid(0),
            UpdateBuilder::new().build(),
            Vec::new(),
        ))
        .unwrap();
    assert_eq!(shared.height(), 0);
    assert!(shared.headers.header(1).await.unwrap().is_none());
}

/// A read through the tagged per-request view subscribes the request, so a
/// later change of that key lands in the affected set.
#[tokio::test]
async fn test_tagged_view_feeds_affected_set() {
    let alice = addr(0xa1);
    let seed_addr = alice.clone();
    let (_dir, _db, shared, mut processor) = setup(move |node| {
        node.put_balance(&seed_addr, Asset::Waves, 100);
    });
    processor
        .process(&block_append(1, bid(1), UpdateBuilder::new().build()))
        .unwrap();

    let view = ScriptBlockchain::new(shared.clone(), TAG);
    assert_eq!(view.balance(&alice, &Asset::Waves).await.unwrap(), 100);

    let update = UpdateBuilder::new()
        .balance(&alice, Asset::Waves, 250)
        .build();
    processor.process(&block_append(2, bid(2), update)).unwrap();
    assert!(processor.accumulated().affected_scripts.contains(&TAG));
    assert_eq!(view.balance(&alice, &Asset::Waves).await.unwrap(), 250);

    // untouched keys do not accumulate anything further for this tag
    let before = processor.accumulated().affected_scripts.len();
    let update = UpdateBuilder::new()
        .balance(&addr(0xcc), Asset::Waves, 7)
        .build();
    processor.process(&block_append(3, bid(3), update)).unwrap();
    assert_eq!(processor.accumulated().affected_scripts.len(), before);
}

/// Balance snapshots collapse to a single synthetic entry at the current
/// height.
#[tokio::test]
async fn test_balance_snapshots_degenerate() {
    let alice = addr(0xa1);
    let seed_addr = alice.clone();
    let (_dir, _db, shared, mut processor) = setup(move |node| {
        node.put_balance(&seed_addr, Asset::Waves, 42);
    });
    processor
        .process(&block_append(1, bid(1), UpdateBuilder::new().build()))
        .unwrap();

    let view = ScriptBlockchain::new(shared.clone(), TAG);
    let snapshots = view.balance_snapshots(&alice, 0, 100).await.unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].height, 1);
    assert_eq!(snapshots[0].regular_balance, 42);
}

/// Deleting a data entry is an absence transition: observable and
/// affecting.
#[tokio::test]
async fn test_data_entry_deletion() {
    let alice = addr(0xa1);
    let seed_addr = alice.clone();
    let (_dir, _db, shared, mut processor) = setup(move |node| {
        node.put_data(&seed_addr, int_entry("x", 7));
    });
    processor
        .process(&block_append(1, bid(1), UpdateBuilder::new().build()))
        .unwrap();
    let key = (alice.clone(), "x".to_string());
    assert_eq!(
        shared.account_data.get(1, &key, TAG).await.unwrap(),
        Some(int_entry("x", 7))
    );

    let update = UpdateBuilder::new().delete_data(&alice, "x").build();
    processor.process(&block_append(2, bid(2), update)).unwrap();
    assert!(processor.accumulated().affected_scripts.contains(&TAG));
    assert_eq!(shared.account_data.get(2, &key, TAG).await.unwrap(), None);
}

/// RemoteData stored as Absent stays authoritative across a cold restart of
/// the hot tier.
#[tokio::test]
async fn test_absent_survives_hot_restart() {
    let alice = addr(0xa1);
    let (_dir, db, shared, mut processor) = setup(|_| {});
    processor
        .process(&block_append(1, bid(1), UpdateBuilder::new().build()))
        .unwrap();
    let key = (alice.clone(), "gone".to_string());
    // the node has nothing: absence gets cached
    assert_eq!(shared.account_data.get(1, &key, TAG).await.unwrap(), None);

    let untouched: RemoteLoaderFunc<_, _> =
        Box::new(|_k| Box::pin(async { panic!("unexpected upstream read") }));
    let cold: ExactWithHeightStorage<AccountDataSpace> =
        ExactWithHeightStorage::new(db, untouched);
    assert_eq!(cold.get_untagged(5, &key).await.unwrap(), None);
}
