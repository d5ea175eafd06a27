//! End-to-end tournament flow through the settlement service

use async_trait::async_trait;
use settlement_engine::config::{Config, ScheduleConfig, SettlementConfig};
use settlement_engine::error::Result;
use settlement_engine::services::{LivePriceFeed, SettlementService, SqliteStore};
use settlement_engine::types::{
    LedgerTag, Prize, Tournament, TournamentParticipant, TournamentStatus, TournamentType, Trade,
    TradeDirection,
};
use std::collections::HashMap;
use std::sync::Arc;

struct FlatFeed(f64);

#[async_trait]
impl LivePriceFeed for FlatFeed {
    async fn fetch_prices(&self, symbols: &[String]) -> Result<HashMap<String, f64>> {
        Ok(symbols.iter().map(|s| (s.clone(), self.0)).collect())
    }
}

fn test_config() -> Config {
    Config {
        database_path: ":memory:".to_string(),
        price_feed_url: "http://localhost".to_string(),
        price_feed_timeout_ms: 100,
        schedule: ScheduleConfig::default(),
        settlement: SettlementConfig::default(),
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[tokio::test]
async fn test_tournament_runs_from_start_to_payout() {
    let store = Arc::new(SqliteStore::new_in_memory().unwrap());
    let service = SettlementService::new(store.clone(), Arc::new(FlatFeed(110.0)), &test_config());

    let start = now() - 60_000;
    let tournament = Tournament::new("Season".to_string(), TournamentType::VolumeBased, start, start + 30_000);
    store.insert_tournament(&tournament).unwrap();
    store
        .insert_prize(&Prize {
            tournament_id: tournament.id.clone(),
            rank: 1,
            amount: 1_000.0,
            description: "Champion".to_string(),
        })
        .unwrap();
    for user in ["alice", "bob"] {
        store
            .add_participant(&TournamentParticipant::new(tournament.id.clone(), user.to_string(), 500.0))
            .unwrap();
        store.credit_balance(user, LedgerTag::Tournament, 500.0).unwrap();
    }

    // Activate by hand so trades count before the end boundary is processed
    assert!(store
        .transition_tournament(&tournament.id, TournamentStatus::Upcoming, TournamentStatus::Active)
        .unwrap());

    for (user, count) in [("alice", 1), ("bob", 3)] {
        for _ in 0..count {
            let trade = Trade::new(
                user.to_string(),
                "BTC".to_string(),
                TradeDirection::Buy,
                10.0,
                100.0,
                start,
                LedgerTag::Tournament,
            );
            store.insert_trade(&trade).unwrap();
        }
    }

    let report = service.run_settlement_once().await.unwrap();
    assert_eq!(report.settled, 4);
    assert_eq!(report.wins, 4);

    let leaderboard = store.leaderboard(&tournament.id).unwrap();
    assert_eq!(leaderboard[0].user_id, "bob");
    assert_eq!(leaderboard[0].total_trades, 3);

    let report = service.run_lifecycle_once().unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(report.prizes_awarded, 1);
    assert_eq!(report.balances_reset, 2);

    assert_eq!(
        store.get_tournament(&tournament.id).unwrap().unwrap().status,
        TournamentStatus::Completed
    );
    assert_eq!(store.balance("bob", LedgerTag::Live).unwrap(), 1_000.0);
    assert_eq!(store.balance("alice", LedgerTag::Live).unwrap(), 0.0);
    assert_eq!(store.balance("bob", LedgerTag::Tournament).unwrap(), 0.0);

    // A second pass must not pay again
    let report = service.run_lifecycle_once().unwrap();
    assert_eq!(report.completed, 0);
    assert_eq!(store.balance("bob", LedgerTag::Live).unwrap(), 1_000.0);
}

#[tokio::test]
async fn test_racing_schedulers_complete_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("race.db");
    let first = Arc::new(SqliteStore::new(&path).unwrap());
    let second = Arc::new(SqliteStore::new(&path).unwrap());

    let mut tournament = Tournament::new("Race".to_string(), TournamentType::ProfitBased, 0, 1);
    tournament.status = TournamentStatus::Active;
    first.insert_tournament(&tournament).unwrap();
    let mut winner = TournamentParticipant::new(tournament.id.clone(), "alice".to_string(), 0.0);
    winner.rank = Some(1);
    first.add_participant(&winner).unwrap();
    first
        .insert_prize(&Prize {
            tournament_id: tournament.id.clone(),
            rank: 1,
            amount: 300.0,
            description: "Winner".to_string(),
        })
        .unwrap();

    let services = [first.clone(), second]
        .map(|store| SettlementService::new(store, Arc::new(FlatFeed(1.0)), &test_config()));

    let completed: usize = services
        .iter()
        .map(|service| service.run_lifecycle_once().unwrap().completed)
        .sum();

    assert_eq!(completed, 1);
    assert_eq!(first.balance("alice", LedgerTag::Live).unwrap(), 300.0);
}

#[tokio::test]
async fn test_service_loops_settle_in_background() {
    let store = Arc::new(SqliteStore::new_in_memory().unwrap());
    let service = SettlementService::new(store.clone(), Arc::new(FlatFeed(2.0)), &test_config());
    let trade = Trade::new(
        "alice".to_string(),
        "SOL".to_string(),
        TradeDirection::Buy,
        10.0,
        1.0,
        0,
        LedgerTag::Live,
    );
    store.insert_trade(&trade).unwrap();

    assert!(service.start());
    // The first run fires immediately on start
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert!(service.stop().await);

    assert!(!store.get_trade(&trade.id).unwrap().unwrap().is_open());
    assert_eq!(store.balance("alice", LedgerTag::Live).unwrap(), 18.0);
}

#[tokio::test]
async fn test_failed_payout_does_not_block_other_tournaments() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lifecycle.db");
    let store = Arc::new(SqliteStore::new(&path).unwrap());
    let service = SettlementService::new(store.clone(), Arc::new(FlatFeed(1.0)), &test_config());

    // Due first, so its failure comes before the healthy one
    let mut broken = Tournament::new("Broken".to_string(), TournamentType::ProfitBased, 0, 1);
    broken.status = TournamentStatus::Active;
    let mut healthy = Tournament::new("Healthy".to_string(), TournamentType::ProfitBased, 0, 2);
    healthy.status = TournamentStatus::Active;

    for (tournament, user) in [(&broken, "alice"), (&healthy, "bob")] {
        store.insert_tournament(tournament).unwrap();
        store
            .add_participant(&TournamentParticipant::new(tournament.id.clone(), user.to_string(), 0.0))
            .unwrap();
        store
            .insert_prize(&Prize {
                tournament_id: tournament.id.clone(),
                rank: 1,
                amount: 100.0,
                description: "Winner".to_string(),
            })
            .unwrap();
    }

    let raw = rusqlite::Connection::open(&path).unwrap();
    raw.execute(
        "UPDATE tournament_prizes SET amount = 'abc' WHERE tournament_id = ?1",
        [&broken.id],
    )
    .unwrap();

    let report = service.run_lifecycle_once().unwrap();

    assert_eq!(report.completed, 2);
    assert_eq!(report.failures, 1);
    assert_eq!(report.prizes_awarded, 1);
    for tournament in [&broken, &healthy] {
        assert_eq!(
            store.get_tournament(&tournament.id).unwrap().unwrap().status,
            TournamentStatus::Completed
        );
    }
    assert_eq!(store.balance("alice", LedgerTag::Live).unwrap(), 0.0);
    assert_eq!(store.balance("bob", LedgerTag::Live).unwrap(), 100.0);
}
