use std::env;
use std::time::Duration;

/// Periodic trigger intervals.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// Fast loop: expired trade settlement (seconds).
    pub settlement_interval_secs: u64,
    /// Slow loop: tournament lifecycle and balance reclaim (seconds).
    pub lifecycle_interval_secs: u64,
}

impl ScheduleConfig {
    pub fn settlement_interval(&self) -> Duration {
        Duration::from_secs(self.settlement_interval_secs.max(1))
    }

    pub fn lifecycle_interval(&self) -> Duration {
        Duration::from_secs(self.lifecycle_interval_secs.max(1))
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            settlement_interval_secs: 10,
            lifecycle_interval_secs: 60,
        }
    }
}

/// Settlement and prize rules.
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Payout percentage applied when an instrument has none configured.
    pub default_payout_pct: f64,
    /// Highest finishing rank eligible for a prize.
    pub max_prize_rank: u32,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            default_payout_pct: 80.0,
            max_prize_rank: 10,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database file.
    pub database_path: String,
    /// Base URL of the live price service.
    pub price_feed_url: String,
    /// Timeout for one batch price request (ms).
    pub price_feed_timeout_ms: u64,
    /// Loop intervals.
    pub schedule: ScheduleConfig,
    /// Settlement rules.
    pub settlement: SettlementConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "data/settlement.db".to_string()),
            price_feed_url: env::var("PRICE_FEED_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:3001".to_string()),
            price_feed_timeout_ms: env::var("PRICE_FEED_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5_000),
            schedule: ScheduleConfig {
                settlement_interval_secs: env::var("SETTLEMENT_INTERVAL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(10),
                lifecycle_interval_secs: env::var("LIFECYCLE_INTERVAL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(60),
            },
            settlement: SettlementConfig {
                default_payout_pct: env::var("DEFAULT_PAYOUT_PCT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .filter(|v: &f64| v.is_finite() && *v >= 0.0)
                    .unwrap_or(80.0),
                max_prize_rank: env::var("MAX_PRIZE_RANK")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(10),
            },
        }
    }

    pub fn price_feed_timeout(&self) -> Duration {
        Duration::from_millis(self.price_feed_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
