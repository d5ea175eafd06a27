//! Settlement engine - settles expiring fixed-payout trades and keeps
//! tournament leaderboards, lifecycles and prize payouts in step.

pub mod config;
pub mod error;
pub mod services;
pub mod types;

pub use config::Config;
pub use error::{EngineError, Result};
pub use services::SettlementService;
