//! Propagates settled trades into tournament standings.

use crate::error::Result;
use crate::services::{LeaderboardRanker, SqliteStore};
use crate::types::{SettlementEvent, TournamentType};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Applies one settlement to every ACTIVE tournament the trader is in.
#[derive(Clone)]
pub struct TournamentStatsUpdater {
    store: Arc<SqliteStore>,
    ranker: LeaderboardRanker,
}

impl TournamentStatsUpdater {
    pub fn new(store: Arc<SqliteStore>, ranker: LeaderboardRanker) -> Self {
        Self { store, ranker }
    }

    /// Accumulate the event into each active participation, then re-rank
    /// each touched tournament once.
    ///
    /// Returns the IDs of the tournaments that were re-ranked. A failed
    /// re-rank is logged and left for the next settlement to repair.
    pub fn apply(&self, event: &SettlementEvent) -> Result<Vec<String>> {
        let participations = self.store.active_participations(&event.user_id)?;
        if participations.is_empty() {
            return Ok(Vec::new());
        }

        let won = event.won();
        let profit = event.profit();
        let mut touched: BTreeMap<String, TournamentType> = BTreeMap::new();

        for participation in &participations {
            let participant = &participation.participant;
            // Skipped if the tournament completed since the lookup
            if self.store.increment_participant_stats(&participant.id, won, profit)? {
                touched.insert(participant.tournament_id.clone(), participation.tournament_type);
            } else {
                debug!(
                    "Tournament {} no longer active, skipping stats for {}",
                    participant.tournament_id, event.user_id
                );
            }
        }

        let mut reranked = Vec::with_capacity(touched.len());
        for (tournament_id, tournament_type) in touched {
            match self.ranker.rank_tournament(&tournament_id, tournament_type) {
                Ok(_) => reranked.push(tournament_id),
                Err(e) => warn!("Failed to rank tournament {}: {}", tournament_id, e),
            }
        }

        Ok(reranked)
    }
}
