//! Runnable sidecar wired to the in-memory node double: a generator task
//! appends a block every few seconds, the engine re-evaluates the affected
//! scripts, and the HTTP surface serves the cached results.
//!
//! Usage: `demo <config-root> [requests.json]`

use actix::prelude::*;
use log::info;
use serde_json::json;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use ride_eval::config::{load_request_list, AppConfig};
use ride_eval::node::StreamItem;
use ride_eval::rpc::RpcServer;
use ride_eval::sync::{bootstrap, SyncService};

use ride_eval_tools::dummy::{dapp_script, ChannelUpdates, DummyNode, MiniEvaluator};
use ride_eval_tools::{addr, bid, block_append, int_entry, UpdateBuilder};

fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .format(|buf, r| writeln!(buf, "{}: {}", r.level(), r.args()))
    .init();

    let mut args = std::env::args().skip(1);
    let root = match args.next() {
        Some(root) => PathBuf::from(root),
        None => {
            eprintln!("usage: demo <config-root> [requests.json]");
            std::process::exit(2);
        }
    };
    let requests_override = args.next().map(PathBuf::from);

    let cfg = AppConfig::load(&root).unwrap();
    let requests_file = requests_override.or_else(|| cfg.requests_file.clone());

    let alice = addr(0xa1);
    let requests = match &requests_file {
        Some(path) => load_request_list(path).unwrap(),
        None => vec![(
            alice.clone(),
            json!({"expr": "getIntegerValue(this, \"counter\") >= 3"}),
        )],
    };

    // the node double stands in for the gRPC transports
    let node = DummyNode::new();
    node.set_height(1);
    node.put_script(&alice, dapp_script());
    node.put_data(&alice, int_entry("counter", 0));
    node.put_header(1, ride_eval_tools::header(1, &bid(1)), None);
    let (updates, events_tx) = ChannelUpdates::new();

    let system = actix::System::with_tokio_rt(|| {
        tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .enable_time()
            .build()
            .unwrap()
    });

    let (engine, events) = system
        .block_on(bootstrap(
            &cfg,
            Arc::new(node.clone()),
            updates,
            Arc::new(MiniEvaluator),
            requests,
        ))
        .unwrap();
    let registry = engine.registry().clone();
    let shared = engine.shared().clone();

    system.block_on(async {
        SyncService::start_with(engine, events);
    });

    // one block every 5 seconds, bumping alice's counter
    system.block_on(async move {
        actix_rt::spawn(async move {
            let mut interval =
                actix_rt::time::interval(std::time::Duration::from_secs(5));
            let mut h = 1u32;
            let mut counter = 0i64;
            loop {
                interval.tick().await;
                h += 1;
                counter += 1;
                info!("appending block {} (counter={})", h, counter);
                let event = block_append(
                    h,
                    bid(h as u64),
                    UpdateBuilder::new()
                        .data(&addr(0xa1), int_entry("counter", counter))
                        .build(),
                );
                if events_tx
                    .unbounded_send(StreamItem::Next(event))
                    .is_err()
                {
                    break
                }
            }
        });
    });

    let bind = cfg.http_bind.clone();
    system.block_on(async move {
        RpcServer::new(&bind, &registry, &shared).start();
    });
    system.run().unwrap();
}
