//! Leaderboard Ranking
//!
//! Orders a tournament's participants by the tournament's strategy and
//! rewrites both the participant ranks and the leaderboard entries. Ranks are
//! dense 1..N with no gaps; ties keep enrollment order.

use crate::error::Result;
use crate::services::SqliteStore;
use crate::types::{LeaderboardEntry, TournamentParticipant, TournamentType};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

/// MIXED strategy weights.
const MIXED_PROFIT_WEIGHT: f64 = 0.5;
const MIXED_WIN_RATE_WEIGHT: f64 = 0.3;
const MIXED_VOLUME_WEIGHT: f64 = 0.2;

/// A participant with its computed rank and score.
#[derive(Debug, Clone)]
pub struct RankedParticipant {
    pub participant: TournamentParticipant,
    pub rank: u32,
    pub score: f64,
}

/// Score each participant under `tournament_type`, index-aligned with input.
pub fn score_participants(
    tournament_type: TournamentType,
    participants: &[TournamentParticipant],
) -> Vec<f64> {
    match tournament_type {
        TournamentType::ProfitBased => participants.iter().map(|p| p.total_profit).collect(),
        TournamentType::WinRate => participants.iter().map(|p| p.win_rate()).collect(),
        TournamentType::VolumeBased => participants.iter().map(|p| p.total_trades as f64).collect(),
        TournamentType::Mixed => {
            let max_profit = participants
                .iter()
                .map(|p| p.total_profit)
                .fold(f64::NEG_INFINITY, f64::max);
            let max_trades = participants.iter().map(|p| p.total_trades).max().unwrap_or(0);

            participants
                .iter()
                .map(|p| {
                    // Normalised terms drop out when nothing positive exists to normalise by
                    let profit = if max_profit > 0.0 {
                        p.total_profit / max_profit
                    } else {
                        0.0
                    };
                    let volume = if max_trades > 0 {
                        p.total_trades as f64 / max_trades as f64
                    } else {
                        0.0
                    };

                    MIXED_PROFIT_WEIGHT * profit
                        + MIXED_WIN_RATE_WEIGHT * p.win_rate()
                        + MIXED_VOLUME_WEIGHT * volume
                })
                .collect()
        }
    }
}

/// Sort participants best-first and assign ranks 1..N.
///
/// The sort is stable, so equal scores keep their input order.
pub fn rank_participants(
    tournament_type: TournamentType,
    participants: Vec<TournamentParticipant>,
) -> Vec<RankedParticipant> {
    let scores = score_participants(tournament_type, &participants);
    let mut scored: Vec<(TournamentParticipant, f64)> = participants.into_iter().zip(scores).collect();

    scored.sort_by(|(a, a_score), (b, b_score)| {
        let primary = b_score.partial_cmp(a_score).unwrap_or(Ordering::Equal);
        match tournament_type {
            TournamentType::WinRate => primary.then_with(|| b.total_trades.cmp(&a.total_trades)),
            _ => primary,
        }
    });

    scored
        .into_iter()
        .enumerate()
        .map(|(i, (participant, score))| RankedParticipant {
            participant,
            rank: i as u32 + 1,
            score,
        })
        .collect()
}

/// Recomputes and persists a tournament's standings.
#[derive(Clone)]
pub struct LeaderboardRanker {
    store: Arc<SqliteStore>,
}

impl LeaderboardRanker {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }

    /// Rank every participant of a tournament and write the results.
    ///
    /// Each participant is written in its own small transaction; a failure
    /// part-way leaves a mixed leaderboard that the next pass overwrites.
    pub fn rank_tournament(
        &self,
        tournament_id: &str,
        tournament_type: TournamentType,
    ) -> Result<Vec<LeaderboardEntry>> {
        let participants = self.store.participants_by_tournament(tournament_id)?;
        let ranked = rank_participants(tournament_type, participants);
        let now = chrono::Utc::now().timestamp_millis();

        let mut entries = Vec::with_capacity(ranked.len());
        for ranked in ranked {
            let p = &ranked.participant;
            let entry = LeaderboardEntry {
                tournament_id: tournament_id.to_string(),
                user_id: p.user_id.clone(),
                rank: ranked.rank,
                total_profit: p.total_profit,
                total_trades: p.total_trades,
                win_rate: p.win_rate(),
                score: ranked.score,
                updated_at: now,
            };
            self.store.write_standing(&p.id, &entry)?;
            entries.push(entry);
        }

        let pruned = self.store.prune_leaderboard(tournament_id)?;
        debug!(
            "Ranked {} participants in tournament {} ({}), pruned {} stale entries",
            entries.len(),
            tournament_id,
            tournament_type,
            pruned
        );

        Ok(entries)
    }
}
