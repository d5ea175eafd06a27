//! Trade Types
//!
//! Types for expiring directional trades, the ledgers they settle into and
//! the instruments they are priced against.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// =============================================================================
// Enums
// =============================================================================

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeDirection {
    /// Wins when the price closes above entry
    Buy,
    /// Wins when the price closes below entry
    Sell,
}

impl TradeDirection {
    /// Decide whether a trade in this direction wins at `closing_price`.
    ///
    /// Equality is a loss in both directions.
    pub fn wins(&self, entry_price: f64, closing_price: f64) -> bool {
        match self {
            TradeDirection::Buy => closing_price > entry_price,
            TradeDirection::Sell => closing_price < entry_price,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradeDirection::Buy => "BUY",
            TradeDirection::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TradeDirection {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Ok(TradeDirection::Buy),
            "SELL" => Ok(TradeDirection::Sell),
            other => Err(EngineError::InvalidRecord(format!("unknown direction '{}'", other))),
        }
    }
}

/// Which of a user's parallel balances a trade or credit applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerTag {
    /// Real-money balance; also the primary ledger for prizes
    Live,
    /// Practice balance
    Demo,
    /// Tournament-scoped balance, reclaimed when no longer eligible
    Tournament,
}

impl LedgerTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerTag::Live => "live",
            LedgerTag::Demo => "demo",
            LedgerTag::Tournament => "tournament",
        }
    }
}

impl std::fmt::Display for LedgerTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LedgerTag {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live" => Ok(LedgerTag::Live),
            "demo" => Ok(LedgerTag::Demo),
            "tournament" => Ok(LedgerTag::Tournament),
            other => Err(EngineError::InvalidRecord(format!("unknown ledger '{}'", other))),
        }
    }
}

/// Trade status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    /// Awaiting expiry and settlement
    Open,
    /// Settled; result and payout are final
    Closed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Open => "open",
            TradeStatus::Closed => "closed",
        }
    }
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TradeStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(TradeStatus::Open),
            "closed" => Ok(TradeStatus::Closed),
            other => Err(EngineError::InvalidRecord(format!("unknown trade status '{}'", other))),
        }
    }
}

/// Settled trade result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeResult {
    Win,
    Loss,
}

impl TradeResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeResult::Win => "win",
            TradeResult::Loss => "loss",
        }
    }
}

impl std::fmt::Display for TradeResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TradeResult {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "win" => Ok(TradeResult::Win),
            "loss" => Ok(TradeResult::Loss),
            other => Err(EngineError::InvalidRecord(format!("unknown trade result '{}'", other))),
        }
    }
}

// =============================================================================
// Trade
// =============================================================================

/// A fixed-stake, fixed-duration directional trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    /// Unique trade ID
    pub id: String,
    /// Owning user
    pub user_id: String,
    /// Instrument symbol
    pub symbol: String,
    /// Buy or sell
    pub direction: TradeDirection,
    /// Amount staked (already reserved when the trade was opened)
    pub stake: f64,
    /// Price at trade open
    pub entry_price: f64,
    /// Scheduled close time (ms)
    pub close_time: i64,
    /// Ledger the trade settles into
    pub ledger: LedgerTag,
    /// Open or closed
    pub status: TradeStatus,
    /// Set once on settlement
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TradeResult>,
    /// Set once on settlement (0 on loss)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payout: Option<f64>,
    /// Price the trade was resolved against
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closing_price: Option<f64>,
    /// When the trade was settled (ms)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<i64>,
    /// When the trade was opened (ms)
    pub created_at: i64,
}

impl Trade {
    /// Create a new open trade.
    pub fn new(
        user_id: String,
        symbol: String,
        direction: TradeDirection,
        stake: f64,
        entry_price: f64,
        close_time: i64,
        ledger: LedgerTag,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            symbol,
            direction,
            stake,
            entry_price,
            close_time,
            ledger,
            status: TradeStatus::Open,
            result: None,
            payout: None,
            closing_price: None,
            settled_at: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == TradeStatus::Open
    }

    /// Whether the scheduled close time has passed at `now` (ms).
    pub fn is_expired(&self, now: i64) -> bool {
        self.close_time <= now
    }

    /// Signed profit of a settled trade: payout on win, minus the stake on loss.
    pub fn profit(&self) -> Option<f64> {
        match self.result? {
            TradeResult::Win => Some(self.payout.unwrap_or(0.0)),
            TradeResult::Loss => Some(-self.stake),
        }
    }
}

// =============================================================================
// Instruments
// =============================================================================

/// Per-instrument settlement configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instrument {
    pub symbol: String,
    /// Win multiplier in percent; the configured default applies when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payout_pct: Option<f64>,
    /// Last known good price, used when the live feed cannot price the symbol
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_price: Option<f64>,
}

// =============================================================================
// Settlement Events
// =============================================================================

/// Emitted once per trade when its close transition succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementEvent {
    pub user_id: String,
    /// Snapshot with final result and payout
    pub trade: Trade,
}

impl SettlementEvent {
    pub fn won(&self) -> bool {
        self.trade.result == Some(TradeResult::Win)
    }

    pub fn profit(&self) -> f64 {
        self.trade.profit().unwrap_or(0.0)
    }
}
