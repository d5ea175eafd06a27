pub mod leaderboard;
pub mod lifecycle;
pub mod price_feed;
pub mod price_resolver;
pub mod prizes;
pub mod reclaim;
pub mod scheduler;
pub mod settlement;
pub mod settlement_service;
pub mod sqlite_store;
pub mod tournament_stats;

pub use leaderboard::{rank_participants, LeaderboardRanker, RankedParticipant};
pub use lifecycle::{LifecycleReport, LifecycleScheduler};
pub use price_feed::{HttpPriceFeed, LivePriceFeed};
pub use price_resolver::PriceResolver;
pub use prizes::{PrizeDistributor, PrizeReport};
pub use reclaim::InactiveBalanceReclaimer;
pub use scheduler::PeriodicTask;
pub use settlement::{
    compute_payout, decide_result, CycleReport, ExpiredTradeFinder, SettleOutcome, SettlementCycle,
    TradeSettler,
};
pub use settlement_service::SettlementService;
pub use sqlite_store::{ActiveParticipation, LedgerCredit, SqliteStore, TradeClosing};
pub use tournament_stats::TournamentStatsUpdater;
