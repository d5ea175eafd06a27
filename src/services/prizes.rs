//! Prize payout for completed tournaments.

use crate::error::{EngineError, Result};
use crate::services::SqliteStore;
use crate::types::{LedgerTag, Tournament, TournamentStatus};
use std::sync::Arc;
use tracing::{debug, info};

/// Ledger prizes are paid into.
pub const PRIZE_LEDGER: LedgerTag = LedgerTag::Live;

/// Summary of one distribution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrizeReport {
    /// Prizes credited to a participant
    pub awarded: usize,
    /// Prizes whose rank nobody holds
    pub unclaimed: usize,
    pub total_amount: f64,
}

/// Credits configured prizes to the participants holding each rank.
///
/// Not guarded against repeats: callers must invoke it once per completed
/// tournament. The lifecycle scheduler does so by only distributing for
/// tournaments its own ACTIVE -> COMPLETED transition moved.
#[derive(Clone)]
pub struct PrizeDistributor {
    store: Arc<SqliteStore>,
    max_prize_rank: u32,
}

impl PrizeDistributor {
    pub fn new(store: Arc<SqliteStore>, max_prize_rank: u32) -> Self {
        Self { store, max_prize_rank }
    }

    pub fn distribute(&self, tournament: &Tournament) -> Result<PrizeReport> {
        if tournament.status != TournamentStatus::Completed {
            return Err(EngineError::InvalidRecord(format!(
                "tournament {} is {}, prizes are paid on completion",
                tournament.id, tournament.status
            )));
        }

        let prizes = self.store.prizes_by_tournament(&tournament.id, self.max_prize_rank)?;
        let mut report = PrizeReport::default();

        for prize in prizes {
            let Some(winner) = self.store.participant_by_rank(&tournament.id, prize.rank)? else {
                debug!("No participant at rank {} in tournament {}", prize.rank, tournament.id);
                report.unclaimed += 1;
                continue;
            };

            let balance = self.store.credit_balance(&winner.user_id, PRIZE_LEDGER, prize.amount)?;
            info!(
                "Awarded {:.2} to {} for rank {} in tournament {} (balance {:.2})",
                prize.amount, winner.user_id, prize.rank, tournament.name, balance
            );
            report.awarded += 1;
            report.total_amount += prize.amount;
        }

        Ok(report)
    }
}
