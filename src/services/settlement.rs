//! Trade Settlement
//!
//! Settles expired trades against resolved prices:
//! - `ExpiredTradeFinder` lists open trades past their close time
//! - `TradeSettler` decides win/loss and performs the guarded close + credit
//! - `SettlementCycle` runs one pass over everything that has expired
//!
//! A trade is closed by a single conditional update (`status = 'open'`) in
//! the same transaction as its ledger credit, so repeated or concurrent
//! settlement of the same trade credits it at most once.

use crate::config::SettlementConfig;
use crate::error::Result;
use crate::services::sqlite_store::{LedgerCredit, TradeClosing};
use crate::services::{PriceResolver, SqliteStore, TournamentStatsUpdater};
use crate::types::{SettlementEvent, Trade, TradeDirection, TradeResult, TradeStatus};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Outcome of one settlement attempt.
#[derive(Debug, Clone)]
pub enum SettleOutcome {
    /// This call closed the trade
    Settled(SettlementEvent),
    /// No price was available; the trade stays open
    Skipped,
    /// Someone else already closed the trade
    AlreadyClosed,
}

/// Result of a trade at `closing_price`.
pub fn decide_result(direction: TradeDirection, entry_price: f64, closing_price: f64) -> TradeResult {
    if direction.wins(entry_price, closing_price) {
        TradeResult::Win
    } else {
        TradeResult::Loss
    }
}

/// Winnings on top of the returned stake.
pub fn compute_payout(stake: f64, payout_pct: f64) -> f64 {
    stake * payout_pct / 100.0
}

// =============================================================================
// Trade Settler
// =============================================================================

/// Settles one trade at a time.
#[derive(Clone)]
pub struct TradeSettler {
    store: Arc<SqliteStore>,
    config: SettlementConfig,
}

impl TradeSettler {
    pub fn new(store: Arc<SqliteStore>, config: SettlementConfig) -> Self {
        Self { store, config }
    }

    /// Payout percentage for a symbol, falling back to the configured default.
    pub fn payout_pct_for(&self, symbol: &str) -> Result<f64> {
        let configured = self
            .store
            .payout_pct(symbol)?
            .filter(|pct| pct.is_finite() && *pct >= 0.0);

        Ok(configured.unwrap_or(self.config.default_payout_pct))
    }

    /// Settle `trade` at `price`.
    ///
    /// A missing price is a skip, not an error. When the guarded close finds
    /// the trade already closed nothing is credited and no event is emitted.
    pub fn settle(&self, trade: &Trade, price: Option<f64>) -> Result<SettleOutcome> {
        if !trade.is_open() {
            return Ok(SettleOutcome::AlreadyClosed);
        }

        let closing_price = match price {
            Some(price) => price,
            None => {
                debug!("No price for {} - deferring trade {}", trade.symbol, trade.id);
                return Ok(SettleOutcome::Skipped);
            }
        };

        let result = decide_result(trade.direction, trade.entry_price, closing_price);
        let (payout, credit) = match result {
            TradeResult::Win => {
                let payout = compute_payout(trade.stake, self.payout_pct_for(&trade.symbol)?);
                let credit = LedgerCredit {
                    user_id: trade.user_id.clone(),
                    ledger: trade.ledger,
                    amount: trade.stake + payout,
                };
                (payout, Some(credit))
            }
            TradeResult::Loss => (0.0, None),
        };

        let closing = TradeClosing {
            result,
            payout,
            closing_price,
            settled_at: chrono::Utc::now().timestamp_millis(),
            credit,
        };

        if !self.store.close_trade(&trade.id, &closing)? {
            debug!("Trade {} was already closed elsewhere", trade.id);
            return Ok(SettleOutcome::AlreadyClosed);
        }

        info!(
            "Settled trade {} ({} {} @ {} -> {}): {} payout {:.2}",
            trade.id, trade.direction, trade.symbol, trade.entry_price, closing_price, result, payout
        );

        let mut snapshot = trade.clone();
        snapshot.status = TradeStatus::Closed;
        snapshot.result = Some(result);
        snapshot.payout = Some(payout);
        snapshot.closing_price = Some(closing_price);
        snapshot.settled_at = Some(closing.settled_at);

        Ok(SettleOutcome::Settled(SettlementEvent {
            user_id: trade.user_id.clone(),
            trade: snapshot,
        }))
    }
}

// =============================================================================
// Expired Trade Finder
// =============================================================================

/// Lists open trades whose close time has passed.
#[derive(Clone)]
pub struct ExpiredTradeFinder {
    store: Arc<SqliteStore>,
}

impl ExpiredTradeFinder {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }

    pub fn find(&self, now: i64) -> Result<Vec<Trade>> {
        self.store.expired_open_trades(now)
    }
}

// =============================================================================
// Settlement Cycle
// =============================================================================

/// Counters for one settlement pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub examined: usize,
    pub settled: usize,
    pub wins: usize,
    pub losses: usize,
    pub skipped: usize,
    pub already_closed: usize,
    pub failed: usize,
    pub tournament_failures: usize,
}

/// One pass: find expired trades, price them, settle each, propagate results.
pub struct SettlementCycle {
    finder: ExpiredTradeFinder,
    resolver: PriceResolver,
    settler: TradeSettler,
    stats: TournamentStatsUpdater,
}

impl SettlementCycle {
    pub fn new(
        finder: ExpiredTradeFinder,
        resolver: PriceResolver,
        settler: TradeSettler,
        stats: TournamentStatsUpdater,
    ) -> Self {
        Self {
            finder,
            resolver,
            settler,
            stats,
        }
    }

    pub async fn run(&self) -> Result<CycleReport> {
        self.run_at(chrono::Utc::now().timestamp_millis()).await
    }

    /// Run one pass treating `now` (ms) as the current time.
    pub async fn run_at(&self, now: i64) -> Result<CycleReport> {
        let trades = self.finder.find(now)?;
        let mut report = CycleReport {
            examined: trades.len(),
            ..Default::default()
        };

        if trades.is_empty() {
            return Ok(report);
        }

        // Price each symbol once per batch
        let symbols: Vec<String> = trades
            .iter()
            .map(|t| t.symbol.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let prices = self.resolver.resolve(&symbols).await;

        for trade in &trades {
            match self.settler.settle(trade, prices.get(&trade.symbol).copied()) {
                Ok(SettleOutcome::Settled(event)) => {
                    report.settled += 1;
                    if event.won() {
                        report.wins += 1;
                    } else {
                        report.losses += 1;
                    }

                    // Tournament stats are best-effort; the settlement stands
                    if let Err(e) = self.stats.apply(&event) {
                        report.tournament_failures += 1;
                        error!("Tournament update failed for trade {}: {}", trade.id, e);
                    }
                }
                Ok(SettleOutcome::Skipped) => report.skipped += 1,
                Ok(SettleOutcome::AlreadyClosed) => report.already_closed += 1,
                Err(e) => {
                    report.failed += 1;
                    error!("Failed to settle trade {}: {}", trade.id, e);
                }
            }
        }

        if report.settled > 0 || report.failed > 0 {
            info!(
                "Settlement cycle: {} examined, {} settled ({} won, {} lost), {} deferred, {} failed",
                report.examined, report.settled, report.wins, report.losses, report.skipped, report.failed
            );
        } else {
            debug!(
                "Settlement cycle: {} examined, {} deferred, {} already closed",
                report.examined, report.skipped, report.already_closed
            );
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Instrument, LedgerTag};

    fn create_test_settler() -> (TradeSettler, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::new_in_memory().expect("Failed to create SQLite"));
        (TradeSettler::new(store.clone(), SettlementConfig::default()), store)
    }

    fn stored_trade(store: &SqliteStore, direction: TradeDirection, stake: f64, entry: f64) -> Trade {
        let trade = Trade::new(
            "alice".to_string(),
            "BTC".to_string(),
            direction,
            stake,
            entry,
            0,
            LedgerTag::Live,
        );
        store.insert_trade(&trade).unwrap();
        trade
    }

    #[test]
    fn test_buy_outcomes() {
        assert_eq!(decide_result(TradeDirection::Buy, 100.0, 101.0), TradeResult::Win);
        assert_eq!(decide_result(TradeDirection::Buy, 100.0, 100.0), TradeResult::Loss);
        assert_eq!(decide_result(TradeDirection::Buy, 100.0, 99.0), TradeResult::Loss);
    }

    #[test]
    fn test_sell_outcomes() {
        assert_eq!(decide_result(TradeDirection::Sell, 100.0, 99.0), TradeResult::Win);
        assert_eq!(decide_result(TradeDirection::Sell, 100.0, 100.0), TradeResult::Loss);
        assert_eq!(decide_result(TradeDirection::Sell, 100.0, 101.0), TradeResult::Loss);
    }

    #[test]
    fn test_win_credits_stake_plus_configured_payout() {
        let (settler, store) = create_test_settler();
        store
            .upsert_instrument(&Instrument {
                symbol: "BTC".to_string(),
                payout_pct: Some(85.0),
                reference_price: None,
            })
            .unwrap();
        let trade = stored_trade(&store, TradeDirection::Buy, 50.0, 100.0);

        let outcome = settler.settle(&trade, Some(101.0)).unwrap();

        let event = match outcome {
            SettleOutcome::Settled(event) => event,
            other => panic!("expected settlement, got {:?}", other),
        };
        assert!(event.won());
        assert_eq!(event.trade.payout, Some(42.5));
        assert_eq!(event.profit(), 42.5);
        assert_eq!(store.balance("alice", LedgerTag::Live).unwrap(), 92.5);
    }

    #[test]
    fn test_missing_payout_config_defaults_to_80() {
        let (settler, store) = create_test_settler();
        let trade = stored_trade(&store, TradeDirection::Sell, 50.0, 100.0);

        settler.settle(&trade, Some(90.0)).unwrap();

        let closed = store.get_trade(&trade.id).unwrap().unwrap();
        assert_eq!(closed.payout, Some(40.0));
        assert_eq!(store.balance("alice", LedgerTag::Live).unwrap(), 90.0);
    }

    #[test]
    fn test_loss_credits_nothing() {
        let (settler, store) = create_test_settler();
        let trade = stored_trade(&store, TradeDirection::Buy, 50.0, 100.0);

        let outcome = settler.settle(&trade, Some(100.0)).unwrap();

        match outcome {
            SettleOutcome::Settled(event) => {
                assert!(!event.won());
                assert_eq!(event.trade.payout, Some(0.0));
                assert_eq!(event.profit(), -50.0);
            }
            other => panic!("expected settlement, got {:?}", other),
        }
        assert_eq!(store.balance("alice", LedgerTag::Live).unwrap(), 0.0);
    }

    #[test]
    fn test_missing_price_is_skipped() {
        let (settler, store) = create_test_settler();
        let trade = stored_trade(&store, TradeDirection::Buy, 50.0, 100.0);

        assert!(matches!(settler.settle(&trade, None).unwrap(), SettleOutcome::Skipped));

        let reloaded = store.get_trade(&trade.id).unwrap().unwrap();
        assert_eq!(reloaded.status, TradeStatus::Open);
    }

    #[test]
    fn test_second_settle_is_noop() {
        let (settler, store) = create_test_settler();
        let trade = stored_trade(&store, TradeDirection::Buy, 50.0, 100.0);

        // Both callers hold the same stale "open" snapshot
        let first = settler.settle(&trade, Some(101.0)).unwrap();
        let second = settler.settle(&trade, Some(50.0)).unwrap();

        assert!(matches!(first, SettleOutcome::Settled(_)));
        assert!(matches!(second, SettleOutcome::AlreadyClosed));
        assert_eq!(store.balance("alice", LedgerTag::Live).unwrap(), 90.0);
        let closed = store.get_trade(&trade.id).unwrap().unwrap();
        assert_eq!(closed.result, Some(TradeResult::Win));
        assert_eq!(closed.closing_price, Some(101.0));
    }

    #[test]
    fn test_credit_goes_to_trade_ledger() {
        let (settler, store) = create_test_settler();
        let trade = Trade::new(
            "bob".to_string(),
            "ETH".to_string(),
            TradeDirection::Buy,
            10.0,
            1.0,
            0,
            LedgerTag::Demo,
        );
        store.insert_trade(&trade).unwrap();

        settler.settle(&trade, Some(2.0)).unwrap();

        assert_eq!(store.balance("bob", LedgerTag::Demo).unwrap(), 18.0);
        assert_eq!(store.balance("bob", LedgerTag::Live).unwrap(), 0.0);
    }
}
