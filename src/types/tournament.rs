//! Tournament Types
//!
//! Tournaments, their participants, prizes and the derived leaderboard.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// =============================================================================
// Enums
// =============================================================================

/// Ranking strategy configured per tournament.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TournamentType {
    /// Highest total profit wins
    ProfitBased,
    /// Highest win rate wins, more trades breaks ties
    WinRate,
    /// Most trades wins
    VolumeBased,
    /// Weighted blend of normalised profit, win rate and volume
    Mixed,
}

impl TournamentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TournamentType::ProfitBased => "PROFIT_BASED",
            TournamentType::WinRate => "WIN_RATE",
            TournamentType::VolumeBased => "VOLUME_BASED",
            TournamentType::Mixed => "MIXED",
        }
    }
}

impl std::fmt::Display for TournamentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TournamentType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PROFIT_BASED" => Ok(TournamentType::ProfitBased),
            "WIN_RATE" => Ok(TournamentType::WinRate),
            "VOLUME_BASED" => Ok(TournamentType::VolumeBased),
            "MIXED" => Ok(TournamentType::Mixed),
            other => Err(EngineError::InvalidRecord(format!("unknown tournament type '{}'", other))),
        }
    }
}

/// Tournament status. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TournamentStatus {
    Upcoming,
    Active,
    Completed,
}

impl TournamentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TournamentStatus::Upcoming => "UPCOMING",
            TournamentStatus::Active => "ACTIVE",
            TournamentStatus::Completed => "COMPLETED",
        }
    }

    /// The status a tournament moves to next, if any.
    pub fn next(&self) -> Option<TournamentStatus> {
        match self {
            TournamentStatus::Upcoming => Some(TournamentStatus::Active),
            TournamentStatus::Active => Some(TournamentStatus::Completed),
            TournamentStatus::Completed => None,
        }
    }
}

impl std::fmt::Display for TournamentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TournamentStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UPCOMING" => Ok(TournamentStatus::Upcoming),
            "ACTIVE" => Ok(TournamentStatus::Active),
            "COMPLETED" => Ok(TournamentStatus::Completed),
            other => Err(EngineError::InvalidRecord(format!("unknown tournament status '{}'", other))),
        }
    }
}

// =============================================================================
// Tournament
// =============================================================================

/// A time-boxed trading competition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tournament {
    pub id: String,
    pub name: String,
    pub tournament_type: TournamentType,
    pub status: TournamentStatus,
    /// Becomes ACTIVE at this time (ms)
    pub start_time: i64,
    /// Becomes COMPLETED at this time (ms)
    pub end_time: i64,
    pub created_at: i64,
}

impl Tournament {
    /// Create a new upcoming tournament.
    pub fn new(name: String, tournament_type: TournamentType, start_time: i64, end_time: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            tournament_type,
            status: TournamentStatus::Upcoming,
            start_time,
            end_time,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// A user's enrollment in one tournament, carrying accumulated stats.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TournamentParticipant {
    pub id: String,
    pub tournament_id: String,
    pub user_id: String,
    pub total_trades: u64,
    pub winning_trades: u64,
    /// Signed
    pub total_profit: f64,
    pub current_balance: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
    pub joined_at: i64,
}

impl TournamentParticipant {
    /// Create a fresh participant with the given starting balance.
    pub fn new(tournament_id: String, user_id: String, starting_balance: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tournament_id,
            user_id,
            total_trades: 0,
            winning_trades: 0,
            total_profit: 0.0,
            current_balance: starting_balance,
            rank: None,
            joined_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Winning trades over total trades, 0 when no trades were made.
    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            0.0
        } else {
            self.winning_trades as f64 / self.total_trades as f64
        }
    }
}

/// Prize configured for a finishing rank.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prize {
    pub tournament_id: String,
    pub rank: u32,
    pub amount: f64,
    pub description: String,
}

/// Ranking snapshot for one participant, rewritten on every ranking pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub tournament_id: String,
    pub user_id: String,
    pub rank: u32,
    pub total_profit: f64,
    pub total_trades: u64,
    pub win_rate: f64,
    /// Value the tournament's strategy sorted on
    pub score: f64,
    pub updated_at: i64,
}
