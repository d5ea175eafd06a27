//! Zeroes tournament ledgers of users with no ACTIVE tournament.

use crate::error::Result;
use crate::services::SqliteStore;
use crate::types::LedgerTag;
use std::sync::Arc;
use tracing::{info, warn};

/// Sweeps stale tournament balances. Safe to run any number of times.
#[derive(Clone)]
pub struct InactiveBalanceReclaimer {
    store: Arc<SqliteStore>,
}

impl InactiveBalanceReclaimer {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }

    /// Reset every stale tournament ledger. Returns how many were reset.
    pub fn reclaim(&self) -> Result<usize> {
        let users = self.store.users_with_stale_tournament_balance()?;
        let mut reset = 0;

        for user_id in &users {
            match self.store.reset_balance(user_id, LedgerTag::Tournament) {
                Ok(true) => reset += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to reclaim tournament balance of {}: {}", user_id, e),
            }
        }

        if reset > 0 {
            info!("Reclaimed {} inactive tournament balances", reset);
        }
        Ok(reset)
    }
}
