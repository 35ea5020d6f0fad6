//! # ride-eval: an incremental RIDE evaluation sidecar
//!
//! Instead of evaluating every REST request from scratch against a full
//! node, this crate keeps an incrementally updated, in-memory projection of
//! exactly the chain state a registered set of `(account, request)` scripts
//! reads, subscribes to the node's blockchain-updates stream, and re-runs
//! only the affected scripts on every block, micro-block or rollback. HTTP
//! callers get the cached result of the last run.
//!
//! # How the pieces fit
//!
//! - [remote]: the `Unknown / Absent / Cached` tri-state every cache tier
//!   speaks.
//! - [db]: per-entity persistent caches over one rocksdb instance, each
//!   record keyed by `(entity key, height)` so replay and rollback are the
//!   same seek-backwards read.
//! - [storage]: the hot tier. Each key carries the set of request tags that
//!   ever read it; a mutation reports exactly that set as affected.
//! - [blockchain]: the aggregated read view ([blockchain::Blockchain]) plus
//!   the per-request adapter that stamps reads with the request tag.
//! - [events]: the blockchain-updates state machine. Appends, micro-block
//!   forks and rollbacks mutate the view and feed the affected-tag set;
//!   a synthetic fork undoes the liquid tail when the upstream times out.
//! - [registry]: script records, parallel re-evaluation rounds and the
//!   admission-deduplicated one-shot path HTTP callers hit.
//! - [sync] (feature `actor`): the Starting / Working / WorkingWithFork
//!   orchestrator driving everything off the stream.
//! - [rpc] (feature `rpc`): the actix-web surface.
//!
//! The RIDE evaluator itself, the node transports and the updates stream
//! are seams ([node]); production wiring plugs gRPC clients in, tests plug
//! in in-memory doubles.
//!
//! # Data flow
//!
//! ```notrust
//!   updates stream ──> SyncService ──> EventProcessor
//!                                          │ mutates
//!                                          v
//!   NodeApi <── miss ── ExactWithHeightStorage (hot ⇄ rocksdb)
//!                                          │ affected tags
//!                                          v
//!                      Registry ── run_scripts ──> evaluate(view, ...)
//!                          ^                            │
//!   HTTP evaluate ─────────┘        last_result <───────┘
//! ```

pub mod blockchain;
pub mod common;
pub mod config;
pub mod db;
pub mod events;
pub mod node;
pub mod registry;
pub mod remote;
pub mod storage;

#[cfg(feature = "rpc")] pub mod rpc;
#[cfg(feature = "actor")] pub mod sync;
