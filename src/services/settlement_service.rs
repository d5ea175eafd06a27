//! Settlement Service
//!
//! Wires the settlement and lifecycle components together and drives them
//! from two periodic loops: a fast one for expired trades and a slow one for
//! tournament lifecycle and balance reclaim.

use crate::config::{Config, ScheduleConfig};
use crate::error::Result;
use crate::services::scheduler::PeriodicTask;
use crate::services::{
    CycleReport, ExpiredTradeFinder, InactiveBalanceReclaimer, LeaderboardRanker, LifecycleReport,
    LifecycleScheduler, LivePriceFeed, PriceResolver, PrizeDistributor, SettlementCycle,
    SqliteStore, TournamentStatsUpdater, TradeSettler,
};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{error, info};

struct RunningLoops {
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<PeriodicTask>,
}

/// Root of the engine. Owns its components; nothing is global.
pub struct SettlementService {
    cycle: Arc<SettlementCycle>,
    lifecycle: Arc<LifecycleScheduler>,
    schedule: ScheduleConfig,
    running: Mutex<Option<RunningLoops>>,
}

impl SettlementService {
    /// Build the full component graph over one store and price feed.
    pub fn new(store: Arc<SqliteStore>, feed: Arc<dyn LivePriceFeed>, config: &Config) -> Self {
        let ranker = LeaderboardRanker::new(store.clone());
        let cycle = SettlementCycle::new(
            ExpiredTradeFinder::new(store.clone()),
            PriceResolver::new(feed, store.clone()),
            TradeSettler::new(store.clone(), config.settlement.clone()),
            TournamentStatsUpdater::new(store.clone(), ranker.clone()),
        );
        let lifecycle = LifecycleScheduler::new(
            store.clone(),
            ranker,
            PrizeDistributor::new(store.clone(), config.settlement.max_prize_rank),
            InactiveBalanceReclaimer::new(store),
        );

        Self {
            cycle: Arc::new(cycle),
            lifecycle: Arc::new(lifecycle),
            schedule: config.schedule.clone(),
            running: Mutex::new(None),
        }
    }

    fn running(&self) -> MutexGuard<'_, Option<RunningLoops>> {
        // The guarded state is a handle list; a poisoned lock leaves it usable
        self.running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.running().is_some()
    }

    /// Start both loops. Returns `false` if they were already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut running = self.running();
        if running.is_some() {
            info!("Settlement service already running");
            return false;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        let cycle = self.cycle.clone();
        let settlement = PeriodicTask::spawn(
            "settlement",
            self.schedule.settlement_interval(),
            shutdown_tx.subscribe(),
            move || {
                let cycle = cycle.clone();
                async move {
                    if let Err(e) = cycle.run().await {
                        error!("Settlement cycle failed: {}", e);
                    }
                }
            },
        );

        let lifecycle = self.lifecycle.clone();
        let tournaments = PeriodicTask::spawn(
            "lifecycle",
            self.schedule.lifecycle_interval(),
            shutdown_tx.subscribe(),
            move || {
                let lifecycle = lifecycle.clone();
                async move {
                    match lifecycle.tick() {
                        Ok(report) if report != LifecycleReport::default() => {
                            info!("Lifecycle tick: {:?}", report)
                        }
                        Ok(_) => {}
                        Err(e) => error!("Lifecycle tick failed: {}", e),
                    }
                }
            },
        );

        *running = Some(RunningLoops {
            shutdown_tx,
            tasks: vec![settlement, tournaments],
        });
        info!("Settlement service started");
        true
    }

    /// Signal both loops and wait for them to finish their current run.
    /// Returns `false` if nothing was running.
    pub async fn stop(&self) -> bool {
        // Taken out so the lock is not held across the awaits
        let loops = self.running().take();
        let Some(loops) = loops else {
            return false;
        };

        let _ = loops.shutdown_tx.send(());
        for task in loops.tasks {
            task.join().await;
        }

        info!("Settlement service stopped");
        true
    }

    /// Run a single settlement pass now.
    pub async fn run_settlement_once(&self) -> Result<CycleReport> {
        self.cycle.run().await
    }

    /// Run a single lifecycle pass now.
    pub fn run_lifecycle_once(&self) -> Result<LifecycleReport> {
        self.lifecycle.tick()
    }
}
