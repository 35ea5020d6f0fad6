//! Orchestration across the stream lifetime: warm up until the working
//! height, then serve fresh results, detouring through a synthetic fork
//! whenever the upstream times out. [Engine] is the plain state machine;
//! [SyncService] is the actor shell that feeds it stream items one at a
//! time, letting every script round finish before the next event lands.

use actix::prelude::*;
use futures::channel::mpsc;
use log::{error, info};

use std::sync::Arc;

use crate::blockchain::SharedBlockchainData;
use crate::common::{set_chain_id, Address, Error, Height};
use crate::config::AppConfig;
use crate::db::CacheDb;
use crate::events::{BlockchainUpdated, EventProcessor, Update};
use crate::node::{NodeApi, RideEvaluator, StreamItem, UpdatesSource};
use crate::registry::Registry;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SyncMode {
    /// Warming up: apply events, run nothing, until the working height.
    Starting { working_height: Height },
    Working,
    /// The liquid tail was undone; waiting for the authoritative tail to be
    /// re-applied past the fork origin before resuming evaluation.
    WorkingWithFork { origin_height: Height },
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Flow {
    Continue,
    Stop,
}

pub struct Engine {
    processor: EventProcessor,
    registry: Registry,
    mode: SyncMode,
}

impl Engine {
    pub fn new(
        processor: EventProcessor, registry: Registry, working_height: Height,
    ) -> Self {
        Self {
            processor,
            registry,
            mode: SyncMode::Starting { working_height },
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn shared(&self) -> &Arc<SharedBlockchainData> {
        self.processor.shared()
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    pub async fn handle(&mut self, item: StreamItem) -> Flow {
        match item {
            StreamItem::Next(event) => {
                if let Err(e) = self.processor.process(&event) {
                    // a storage failure mid-event leaves the view desynced
                    panic!("event processing failed: {}", e);
                }
                self.after_event(&event).await;
                Flow::Continue
            }
            StreamItem::Failed(e) => match self.mode {
                SyncMode::Starting { .. } => {
                    error!("updates stream failed during warm-up: {}", e);
                    Flow::Stop
                }
                SyncMode::Working => {
                    info!("upstream failed ({}), forcing a synthetic fork", e);
                    if let Err(e) = self.processor.force_rollback_one() {
                        panic!("synthetic fork failed: {}", e);
                    }
                    self.mode = SyncMode::WorkingWithFork {
                        origin_height: self.shared().height(),
                    };
                    Flow::Continue
                }
                SyncMode::WorkingWithFork { .. } => {
                    panic!(
                        "upstream failed while already resolving a synthetic fork"
                    );
                }
            },
            StreamItem::Closed => {
                info!("updates stream closed");
                Flow::Stop
            }
        }
    }

    async fn after_event(&mut self, event: &BlockchainUpdated) {
        match self.mode {
            SyncMode::Starting { working_height } => {
                if matches!(event.update, Update::Append(_))
                    && event.height >= working_height
                {
                    info!(
                        "reached working height {} at {}",
                        working_height, event.height
                    );
                    self.mode = SyncMode::Working;
                    self.run_round(true).await;
                }
            }
            SyncMode::Working => {
                if !matches!(event.update, Update::Empty) {
                    self.run_round(false).await;
                }
            }
            SyncMode::WorkingWithFork { origin_height } => {
                match event.update {
                    Update::Append(_) if event.height >= origin_height => {
                        info!(
                            "canonical tail re-applied at {}, resuming",
                            event.height
                        );
                        self.mode = SyncMode::Working;
                        self.run_round(false).await;
                    }
                    // an authoritative rollback still publishes its tags
                    Update::Rollback(_) => self.run_round(false).await,
                    _ => {}
                }
            }
        }
    }

    async fn run_round(&mut self, force_all: bool) {
        self.registry
            .run_scripts(force_all, self.processor.affected_mut())
            .await;
    }
}

/// Open the caches, pin the activated features, fix the working height and
/// subscribe to the updates stream.
pub async fn bootstrap(
    cfg: &AppConfig, node: Arc<dyn NodeApi>, updates: Arc<dyn UpdatesSource>,
    evaluator: Arc<dyn RideEvaluator>,
    requests: Vec<(Address, serde_json::Value)>,
) -> Result<(Engine, mpsc::UnboundedReceiver<StreamItem>), Error> {
    set_chain_id(cfg.chain_id);
    let db = CacheDb::open(&cfg.db_path)?;
    let shared =
        SharedBlockchainData::new(db, node.clone(), cfg.header_window)?;
    let features = shared.activated_features().await?;
    info!("{} features activated", features.len());

    let last_known = match shared.headers.last_height() {
        0 => node.current_height().await?,
        h => h,
    };
    let working_height = last_known + cfg.working_offset;
    let from = last_known.max(1);
    info!(
        "subscribing from height {}, working height {}",
        from, working_height
    );
    let events = updates.stream(from, 0).await?;

    let registry = Registry::new(shared.clone(), evaluator);
    registry.prefill(requests);
    info!("{} scripts registered", registry.script_count());
    let processor = EventProcessor::new(shared);
    Ok((Engine::new(processor, registry, working_height), events))
}

/// Actor shell over [Engine]. `ctx.wait` keeps the mailbox and the stream
/// paused until the current event (and its script round) is fully applied,
/// which is exactly the single-consumer ordering the engine relies on.
pub struct SyncService {
    engine: Option<Engine>,
}

impl SyncService {
    pub fn start_with(
        engine: Engine, events: mpsc::UnboundedReceiver<StreamItem>,
    ) -> Addr<Self> {
        SyncService::create(|ctx| {
            ctx.add_stream(events);
            SyncService {
                engine: Some(engine),
            }
        })
    }
}

impl Actor for SyncService {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        info!("sync service started");
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!("sync service stopped");
        System::current().stop();
    }
}

impl StreamHandler<StreamItem> for SyncService {
    fn handle(&mut self, item: StreamItem, ctx: &mut Self::Context) {
        let mut engine =
            self.engine.take().expect("engine taken while waiting");
        let fut = async move {
            let flow = engine.handle(item).await;
            (engine, flow)
        }
        .into_actor(self)
        .map(|(engine, flow), act, ctx| {
            act.engine = Some(engine);
            if flow == Flow::Stop {
                ctx.stop();
            }
        });
        ctx.wait(fut);
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        info!("updates stream finished");
        ctx.stop();
    }
}
