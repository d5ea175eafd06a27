//! Tournament Lifecycle
//!
//! Moves tournaments UPCOMING -> ACTIVE -> COMPLETED as their boundaries pass.
//! Each move is a conditional status update, so when several schedulers race
//! only one of them completes a given tournament and pays its prizes.

use crate::error::Result;
use crate::services::{InactiveBalanceReclaimer, LeaderboardRanker, PrizeDistributor, SqliteStore};
use crate::types::{Tournament, TournamentStatus};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Counters for one lifecycle pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LifecycleReport {
    pub activated: usize,
    pub completed: usize,
    pub prizes_awarded: usize,
    pub balances_reset: usize,
    pub reclaimed: usize,
    pub failures: usize,
}

pub struct LifecycleScheduler {
    store: Arc<SqliteStore>,
    ranker: LeaderboardRanker,
    prizes: PrizeDistributor,
    reclaimer: InactiveBalanceReclaimer,
}

impl LifecycleScheduler {
    pub fn new(
        store: Arc<SqliteStore>,
        ranker: LeaderboardRanker,
        prizes: PrizeDistributor,
        reclaimer: InactiveBalanceReclaimer,
    ) -> Self {
        Self {
            store,
            ranker,
            prizes,
            reclaimer,
        }
    }

    pub fn tick(&self) -> Result<LifecycleReport> {
        self.tick_at(chrono::Utc::now().timestamp_millis())
    }

    /// Run one pass treating `now` (ms) as the current time.
    pub fn tick_at(&self, now: i64) -> Result<LifecycleReport> {
        let mut report = LifecycleReport::default();

        for tournament in self.store.tournaments_due(TournamentStatus::Upcoming, now)? {
            match self.store.transition_tournament(
                &tournament.id,
                TournamentStatus::Upcoming,
                TournamentStatus::Active,
            ) {
                Ok(true) => {
                    info!("Tournament {} ({}) is now active", tournament.name, tournament.id);
                    report.activated += 1;
                }
                Ok(false) => debug!("Tournament {} already activated", tournament.id),
                Err(e) => {
                    report.failures += 1;
                    error!("Failed to activate tournament {}: {}", tournament.id, e);
                }
            }
        }

        for tournament in self.store.tournaments_due(TournamentStatus::Active, now)? {
            match self.store.transition_tournament(
                &tournament.id,
                TournamentStatus::Active,
                TournamentStatus::Completed,
            ) {
                Ok(true) => {
                    report.completed += 1;
                    self.finish(tournament, &mut report);
                }
                Ok(false) => debug!("Tournament {} already completed", tournament.id),
                Err(e) => {
                    report.failures += 1;
                    error!("Failed to complete tournament {}: {}", tournament.id, e);
                }
            }
        }

        match self.reclaimer.reclaim() {
            Ok(n) => report.reclaimed = n,
            Err(e) => {
                report.failures += 1;
                error!("Balance reclaim failed: {}", e);
            }
        }

        Ok(report)
    }

    /// Rank, pay out and reset a tournament this pass moved to COMPLETED.
    fn finish(&self, mut tournament: Tournament, report: &mut LifecycleReport) {
        tournament.status = TournamentStatus::Completed;
        info!("Tournament {} ({}) completed", tournament.name, tournament.id);

        // Final standings; covers tournaments nobody traded in
        if let Err(e) = self.ranker.rank_tournament(&tournament.id, tournament.tournament_type) {
            report.failures += 1;
            error!("Final ranking failed for tournament {}: {}", tournament.id, e);
        }

        match self.prizes.distribute(&tournament) {
            Ok(prizes) => report.prizes_awarded += prizes.awarded,
            Err(e) => {
                report.failures += 1;
                error!("Prize distribution failed for tournament {}: {}", tournament.id, e);
            }
        }

        match self.store.reset_tournament_balances(&tournament.id) {
            Ok(n) => report.balances_reset += n,
            Err(e) => {
                report.failures += 1;
                error!("Balance reset failed for tournament {}: {}", tournament.id, e);
            }
        }
    }
}
