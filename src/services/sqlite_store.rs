//! SQLite persistence layer for trades, ledgers and tournaments.
//!
//! Every mutation the engine makes goes through this store. The one place
//! that needs real atomicity is [`SqliteStore::close_trade`]: the conditional
//! status update and the ledger credit share a single immediate transaction,
//! so a trade can be credited at most once no matter how many settlers race
//! on it. Everything else is a single statement.

use crate::error::{EngineError, Result};
use crate::types::{
    Instrument, LeaderboardEntry, LedgerTag, Prize, Tournament, TournamentParticipant,
    TournamentStatus, TournamentType, Trade, TradeResult, TradeStatus,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

/// How long a writer waits on a lock held by another connection.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const TRADE_COLUMNS: &str = "id, user_id, symbol, direction, stake, entry_price, close_time, ledger,
     status, result, payout, closing_price, settled_at, created_at";

const PARTICIPANT_COLUMNS: &str = "id, tournament_id, user_id, total_trades, winning_trades,
     total_profit, current_balance, rank, joined_at";

const TOURNAMENT_COLUMNS: &str = "id, name, tournament_type, status, start_time, end_time, created_at";

/// Ledger credit applied alongside a trade close.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerCredit {
    pub user_id: String,
    pub ledger: LedgerTag,
    pub amount: f64,
}

/// Final state written by a successful trade close.
#[derive(Debug, Clone)]
pub struct TradeClosing {
    pub result: TradeResult,
    pub payout: f64,
    pub closing_price: f64,
    pub settled_at: i64,
    /// Applied in the same transaction, only if the close succeeds
    pub credit: Option<LedgerCredit>,
}

/// A participation whose tournament is currently ACTIVE.
#[derive(Debug, Clone)]
pub struct ActiveParticipation {
    pub participant: TournamentParticipant,
    pub tournament_type: TournamentType,
}

/// SQLite store for the settlement engine.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a store at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        info!("SQLite store initialized");
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        debug!("In-memory SQLite store initialized");
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| EngineError::Internal("sqlite connection mutex poisoned".to_string()))
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS instruments (
                symbol TEXT PRIMARY KEY,
                payout_pct REAL,
                reference_price REAL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                direction TEXT NOT NULL,
                stake REAL NOT NULL,
                entry_price REAL NOT NULL,
                close_time INTEGER NOT NULL,
                ledger TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'open',
                result TEXT,
                payout REAL,
                closing_price REAL,
                settled_at INTEGER,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;

        // Expired-trade scan
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_trades_status_close ON trades(status, close_time)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS balances (
                user_id TEXT NOT NULL,
                ledger TEXT NOT NULL,
                amount REAL NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, ledger)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS tournaments (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                tournament_type TEXT NOT NULL,
                status TEXT NOT NULL,
                start_time INTEGER NOT NULL,
                end_time INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_tournaments_status ON tournaments(status)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS tournament_participants (
                id TEXT PRIMARY KEY,
                tournament_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                total_trades INTEGER NOT NULL DEFAULT 0,
                winning_trades INTEGER NOT NULL DEFAULT 0,
                total_profit REAL NOT NULL DEFAULT 0,
                current_balance REAL NOT NULL DEFAULT 0,
                rank INTEGER,
                joined_at INTEGER NOT NULL,
                UNIQUE (tournament_id, user_id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_participants_user ON tournament_participants(user_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_participants_rank
             ON tournament_participants(tournament_id, rank)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS tournament_prizes (
                tournament_id TEXT NOT NULL,
                rank INTEGER NOT NULL,
                amount REAL NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (tournament_id, rank)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS leaderboard_entries (
                tournament_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                rank INTEGER NOT NULL,
                total_profit REAL NOT NULL,
                total_trades INTEGER NOT NULL,
                win_rate REAL NOT NULL,
                score REAL NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (tournament_id, user_id)
            )",
            [],
        )?;

        info!("SQLite schema initialized");
        Ok(())
    }

    // ========== Instrument Methods ==========

    /// Save or update an instrument's configuration.
    pub fn upsert_instrument(&self, instrument: &Instrument) -> Result<()> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().timestamp_millis();

        conn.execute(
            "INSERT INTO instruments (symbol, payout_pct, reference_price, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(symbol) DO UPDATE SET
                payout_pct = excluded.payout_pct,
                reference_price = COALESCE(excluded.reference_price, reference_price),
                updated_at = excluded.updated_at",
            params![instrument.symbol, instrument.payout_pct, instrument.reference_price, now],
        )?;

        Ok(())
    }

    /// Get an instrument by symbol.
    pub fn get_instrument(&self, symbol: &str) -> Result<Option<Instrument>> {
        let conn = self.conn()?;

        let instrument = conn
            .query_row(
                "SELECT symbol, payout_pct, reference_price FROM instruments WHERE symbol = ?1",
                params![symbol],
                |row| {
                    Ok(Instrument {
                        symbol: row.get(0)?,
                        payout_pct: row.get(1)?,
                        reference_price: row.get(2)?,
                    })
                },
            )
            .optional()?;

        Ok(instrument)
    }

    /// Configured payout percentage for a symbol, if any.
    pub fn payout_pct(&self, symbol: &str) -> Result<Option<f64>> {
        Ok(self.get_instrument(symbol)?.and_then(|i| i.payout_pct))
    }

    /// Last persisted reference price for a symbol, if any.
    pub fn reference_price(&self, symbol: &str) -> Result<Option<f64>> {
        Ok(self.get_instrument(symbol)?.and_then(|i| i.reference_price))
    }

    /// Record a fresh reference price, creating the instrument row if needed.
    pub fn update_reference_price(&self, symbol: &str, price: f64) -> Result<()> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().timestamp_millis();

        conn.execute(
            "INSERT INTO instruments (symbol, payout_pct, reference_price, updated_at)
             VALUES (?1, NULL, ?2, ?3)
             ON CONFLICT(symbol) DO UPDATE SET
                reference_price = excluded.reference_price,
                updated_at = excluded.updated_at",
            params![symbol, price, now],
        )?;

        Ok(())
    }

    // ========== Trade Methods ==========

    /// Insert a newly opened trade.
    pub fn insert_trade(&self, trade: &Trade) -> Result<()> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO trades
             (id, user_id, symbol, direction, stake, entry_price, close_time, ledger,
              status, result, payout, closing_price, settled_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                trade.id,
                trade.user_id,
                trade.symbol,
                trade.direction.as_str(),
                trade.stake,
                trade.entry_price,
                trade.close_time,
                trade.ledger.as_str(),
                trade.status.as_str(),
                trade.result.map(|r| r.as_str()),
                trade.payout,
                trade.closing_price,
                trade.settled_at,
                trade.created_at,
            ],
        )?;

        debug!("Inserted trade {} for {}", trade.id, trade.user_id);
        Ok(())
    }

    /// Get a trade by ID.
    pub fn get_trade(&self, trade_id: &str) -> Result<Option<Trade>> {
        let conn = self.conn()?;
        let query = format!("SELECT {} FROM trades WHERE id = ?1", TRADE_COLUMNS);

        let trade = conn
            .query_row(&query, params![trade_id], trade_from_row)
            .optional()?;

        Ok(trade)
    }

    /// All open trades whose scheduled close time is at or before `now`.
    pub fn expired_open_trades(&self, now: i64) -> Result<Vec<Trade>> {
        let conn = self.conn()?;
        let query = format!(
            "SELECT {} FROM trades
             WHERE status = 'open' AND close_time <= ?1
             ORDER BY close_time ASC",
            TRADE_COLUMNS
        );

        let mut stmt = conn.prepare(&query)?;
        let trades = stmt
            .query_map(params![now], trade_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(trades)
    }

    /// Close a trade if it is still open, crediting the ledger in the same
    /// transaction.
    ///
    /// Returns `false` when the trade was no longer open; nothing is written
    /// in that case.
    pub fn close_trade(&self, trade_id: &str, closing: &TradeClosing) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let changed = tx.execute(
            "UPDATE trades
             SET status = 'closed', result = ?1, payout = ?2, closing_price = ?3, settled_at = ?4
             WHERE id = ?5 AND status = 'open'",
            params![
                closing.result.as_str(),
                closing.payout,
                closing.closing_price,
                closing.settled_at,
                trade_id,
            ],
        )?;

        if changed != 1 {
            // Rolled back on drop
            return Ok(false);
        }

        if let Some(credit) = &closing.credit {
            add_to_balance(&tx, &credit.user_id, credit.ledger, credit.amount, closing.settled_at)?;
        }

        tx.commit()?;
        Ok(true)
    }

    // ========== Ledger Methods ==========

    /// Current balance of one ledger (0 when never credited).
    pub fn balance(&self, user_id: &str, ledger: LedgerTag) -> Result<f64> {
        let conn = self.conn()?;

        let amount = conn
            .query_row(
                "SELECT amount FROM balances WHERE user_id = ?1 AND ledger = ?2",
                params![user_id, ledger.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        Ok(amount.unwrap_or(0.0))
    }

    /// Add `amount` to a ledger and return the new balance.
    pub fn credit_balance(&self, user_id: &str, ledger: LedgerTag, amount: f64) -> Result<f64> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().timestamp_millis();

        add_to_balance(&conn, user_id, ledger, amount, now)?;

        let balance = conn.query_row(
            "SELECT amount FROM balances WHERE user_id = ?1 AND ledger = ?2",
            params![user_id, ledger.as_str()],
            |row| row.get(0),
        )?;

        Ok(balance)
    }

    /// Set a ledger to zero. Returns whether it held a nonzero balance.
    pub fn reset_balance(&self, user_id: &str, ledger: LedgerTag) -> Result<bool> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().timestamp_millis();

        let changed = conn.execute(
            "UPDATE balances SET amount = 0, updated_at = ?3
             WHERE user_id = ?1 AND ledger = ?2 AND amount != 0",
            params![user_id, ledger.as_str(), now],
        )?;

        Ok(changed > 0)
    }

    /// Zero the tournament ledger of every participant of one tournament.
    pub fn reset_tournament_balances(&self, tournament_id: &str) -> Result<usize> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().timestamp_millis();

        let changed = conn.execute(
            "UPDATE balances SET amount = 0, updated_at = ?2
             WHERE ledger = 'tournament' AND amount != 0
               AND user_id IN (
                   SELECT user_id FROM tournament_participants WHERE tournament_id = ?1
               )",
            params![tournament_id, now],
        )?;

        Ok(changed)
    }

    /// Users holding a nonzero tournament balance without any ACTIVE enrollment.
    pub fn users_with_stale_tournament_balance(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT b.user_id FROM balances b
             WHERE b.ledger = 'tournament' AND b.amount != 0
               AND NOT EXISTS (
                   SELECT 1 FROM tournament_participants p
                   JOIN tournaments t ON t.id = p.tournament_id
                   WHERE p.user_id = b.user_id AND t.status = 'ACTIVE'
               )
             ORDER BY b.user_id",
        )?;

        let users = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        Ok(users)
    }

    // ========== Tournament Methods ==========

    /// Insert a tournament.
    pub fn insert_tournament(&self, tournament: &Tournament) -> Result<()> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO tournaments
             (id, name, tournament_type, status, start_time, end_time, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                tournament.id,
                tournament.name,
                tournament.tournament_type.as_str(),
                tournament.status.as_str(),
                tournament.start_time,
                tournament.end_time,
                tournament.created_at,
            ],
        )?;

        Ok(())
    }

    /// Get a tournament by ID.
    pub fn get_tournament(&self, tournament_id: &str) -> Result<Option<Tournament>> {
        let conn = self.conn()?;
        let query = format!("SELECT {} FROM tournaments WHERE id = ?1", TOURNAMENT_COLUMNS);

        let tournament = conn
            .query_row(&query, params![tournament_id], tournament_from_row)
            .optional()?;

        Ok(tournament)
    }

    /// Tournaments in `status` whose boundary for leaving that status has
    /// passed: start time for UPCOMING, end time for ACTIVE.
    pub fn tournaments_due(&self, status: TournamentStatus, now: i64) -> Result<Vec<Tournament>> {
        let boundary = match status {
            TournamentStatus::Upcoming => "start_time",
            TournamentStatus::Active => "end_time",
            TournamentStatus::Completed => return Ok(Vec::new()),
        };

        let conn = self.conn()?;
        let query = format!(
            "SELECT {} FROM tournaments
             WHERE status = ?1 AND {} <= ?2
             ORDER BY {} ASC, id ASC",
            TOURNAMENT_COLUMNS, boundary, boundary
        );

        let mut stmt = conn.prepare(&query)?;
        let tournaments = stmt
            .query_map(params![status.as_str(), now], tournament_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(tournaments)
    }

    /// Move a tournament from `from` to `to` if it is still in `from`.
    ///
    /// Only forward, single-step transitions are accepted. Returns whether
    /// this call performed the transition.
    pub fn transition_tournament(
        &self,
        tournament_id: &str,
        from: TournamentStatus,
        to: TournamentStatus,
    ) -> Result<bool> {
        if from.next() != Some(to) {
            return Err(EngineError::InvalidRecord(format!(
                "illegal tournament transition {} -> {}",
                from, to
            )));
        }

        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE tournaments SET status = ?1 WHERE id = ?2 AND status = ?3",
            params![to.as_str(), tournament_id, from.as_str()],
        )?;

        Ok(changed == 1)
    }

    // ========== Participant Methods ==========

    /// Enroll a participant.
    pub fn add_participant(&self, participant: &TournamentParticipant) -> Result<()> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO tournament_participants
             (id, tournament_id, user_id, total_trades, winning_trades, total_profit,
              current_balance, rank, joined_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                participant.id,
                participant.tournament_id,
                participant.user_id,
                participant.total_trades as i64,
                participant.winning_trades as i64,
                participant.total_profit,
                participant.current_balance,
                participant.rank,
                participant.joined_at,
            ],
        )?;

        Ok(())
    }

    /// Remove a user's enrollment in a tournament.
    pub fn remove_participant(&self, tournament_id: &str, user_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "DELETE FROM tournament_participants WHERE tournament_id = ?1 AND user_id = ?2",
            params![tournament_id, user_id],
        )?;
        Ok(changed > 0)
    }

    /// Get one user's participation in a tournament.
    pub fn get_participant(
        &self,
        tournament_id: &str,
        user_id: &str,
    ) -> Result<Option<TournamentParticipant>> {
        let conn = self.conn()?;
        let query = format!(
            "SELECT {} FROM tournament_participants WHERE tournament_id = ?1 AND user_id = ?2",
            PARTICIPANT_COLUMNS
        );

        let participant = conn
            .query_row(&query, params![tournament_id, user_id], participant_from_row)
            .optional()?;

        Ok(participant)
    }

    /// Every participation of `user_id` in a tournament that is ACTIVE.
    pub fn active_participations(&self, user_id: &str) -> Result<Vec<ActiveParticipation>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT p.id, p.tournament_id, p.user_id, p.total_trades, p.winning_trades,
                    p.total_profit, p.current_balance, p.rank, p.joined_at, t.tournament_type
             FROM tournament_participants p
             JOIN tournaments t ON t.id = p.tournament_id
             WHERE p.user_id = ?1 AND t.status = 'ACTIVE'
             ORDER BY p.tournament_id",
        )?;

        let participations = stmt
            .query_map(params![user_id], |row| {
                Ok(ActiveParticipation {
                    participant: participant_from_row(row)?,
                    tournament_type: parse_column(row, 9)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(participations)
    }

    /// Accumulate one settled trade into a participant's stats.
    ///
    /// Applied only while the owning tournament is still ACTIVE; returns
    /// whether the row was updated.
    pub fn increment_participant_stats(
        &self,
        participant_id: &str,
        won: bool,
        profit: f64,
    ) -> Result<bool> {
        let conn = self.conn()?;

        let changed = conn.execute(
            "UPDATE tournament_participants
             SET total_trades = total_trades + 1,
                 winning_trades = winning_trades + ?2,
                 total_profit = total_profit + ?3,
                 current_balance = current_balance + ?3
             WHERE id = ?1
               AND tournament_id IN (SELECT id FROM tournaments WHERE status = 'ACTIVE')",
            params![participant_id, won as i64, profit],
        )?;

        Ok(changed == 1)
    }

    /// All participants of a tournament in stable enrollment order.
    pub fn participants_by_tournament(&self, tournament_id: &str) -> Result<Vec<TournamentParticipant>> {
        let conn = self.conn()?;
        let query = format!(
            "SELECT {} FROM tournament_participants
             WHERE tournament_id = ?1
             ORDER BY joined_at ASC, id ASC",
            PARTICIPANT_COLUMNS
        );

        let mut stmt = conn.prepare(&query)?;
        let participants = stmt
            .query_map(params![tournament_id], participant_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(participants)
    }

    /// The participant currently holding `rank` in a tournament.
    pub fn participant_by_rank(
        &self,
        tournament_id: &str,
        rank: u32,
    ) -> Result<Option<TournamentParticipant>> {
        let conn = self.conn()?;
        let query = format!(
            "SELECT {} FROM tournament_participants
             WHERE tournament_id = ?1 AND rank = ?2
             LIMIT 1",
            PARTICIPANT_COLUMNS
        );

        let participant = conn
            .query_row(&query, params![tournament_id, rank], participant_from_row)
            .optional()?;

        Ok(participant)
    }

    // ========== Leaderboard Methods ==========

    /// Write a participant's rank and upsert the matching leaderboard entry.
    pub fn write_standing(&self, participant_id: &str, entry: &LeaderboardEntry) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "UPDATE tournament_participants SET rank = ?1 WHERE id = ?2",
            params![entry.rank, participant_id],
        )?;

        tx.execute(
            "INSERT INTO leaderboard_entries
             (tournament_id, user_id, rank, total_profit, total_trades, win_rate, score, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(tournament_id, user_id) DO UPDATE SET
                rank = excluded.rank,
                total_profit = excluded.total_profit,
                total_trades = excluded.total_trades,
                win_rate = excluded.win_rate,
                score = excluded.score,
                updated_at = excluded.updated_at",
            params![
                entry.tournament_id,
                entry.user_id,
                entry.rank,
                entry.total_profit,
                entry.total_trades as i64,
                entry.win_rate,
                entry.score,
                entry.updated_at,
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Drop leaderboard entries for users no longer enrolled in the tournament.
    pub fn prune_leaderboard(&self, tournament_id: &str) -> Result<usize> {
        let conn = self.conn()?;

        let removed = conn.execute(
            "DELETE FROM leaderboard_entries
             WHERE tournament_id = ?1
               AND user_id NOT IN (
                   SELECT user_id FROM tournament_participants WHERE tournament_id = ?1
               )",
            params![tournament_id],
        )?;

        Ok(removed)
    }

    /// Leaderboard of a tournament, best rank first.
    pub fn leaderboard(&self, tournament_id: &str) -> Result<Vec<LeaderboardEntry>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT tournament_id, user_id, rank, total_profit, total_trades, win_rate, score, updated_at
             FROM leaderboard_entries
             WHERE tournament_id = ?1
             ORDER BY rank ASC",
        )?;

        let entries = stmt
            .query_map(params![tournament_id], |row| {
                Ok(LeaderboardEntry {
                    tournament_id: row.get(0)?,
                    user_id: row.get(1)?,
                    rank: row.get(2)?,
                    total_profit: row.get(3)?,
                    total_trades: row.get::<_, i64>(4)? as u64,
                    win_rate: row.get(5)?,
                    score: row.get(6)?,
                    updated_at: row.get(7)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entries)
    }

    // ========== Prize Methods ==========

    /// Save or replace the prize for one rank.
    pub fn insert_prize(&self, prize: &Prize) -> Result<()> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO tournament_prizes (tournament_id, rank, amount, description)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(tournament_id, rank) DO UPDATE SET
                amount = excluded.amount,
                description = excluded.description",
            params![prize.tournament_id, prize.rank, prize.amount, prize.description],
        )?;

        Ok(())
    }

    /// Prizes of a tournament for ranks 1..=`max_rank`, best rank first.
    pub fn prizes_by_tournament(&self, tournament_id: &str, max_rank: u32) -> Result<Vec<Prize>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT tournament_id, rank, amount, description
             FROM tournament_prizes
             WHERE tournament_id = ?1 AND rank >= 1 AND rank <= ?2
             ORDER BY rank ASC",
        )?;

        let prizes = stmt
            .query_map(params![tournament_id, max_rank], |row| {
                Ok(Prize {
                    tournament_id: row.get(0)?,
                    rank: row.get(1)?,
                    amount: row.get(2)?,
                    description: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(prizes)
    }
}

/// Add to a ledger, creating the row on first credit.
fn add_to_balance(
    conn: &Connection,
    user_id: &str,
    ledger: LedgerTag,
    amount: f64,
    now: i64,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO balances (user_id, ledger, amount, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(user_id, ledger) DO UPDATE SET
            amount = amount + excluded.amount,
            updated_at = excluded.updated_at",
        params![user_id, ledger.as_str(), amount, now],
    )?;
    Ok(())
}

/// Parse a text column into one of the domain enums.
fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = EngineError>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_optional_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr<Err = EngineError>,
{
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
        None => Ok(None),
    }
}

fn trade_from_row(row: &Row<'_>) -> rusqlite::Result<Trade> {
    Ok(Trade {
        id: row.get(0)?,
        user_id: row.get(1)?,
        symbol: row.get(2)?,
        direction: parse_column(row, 3)?,
        stake: row.get(4)?,
        entry_price: row.get(5)?,
        close_time: row.get(6)?,
        ledger: parse_column(row, 7)?,
        status: parse_column::<TradeStatus>(row, 8)?,
        result: parse_optional_column(row, 9)?,
        payout: row.get(10)?,
        closing_price: row.get(11)?,
        settled_at: row.get(12)?,
        created_at: row.get(13)?,
    })
}

fn participant_from_row(row: &Row<'_>) -> rusqlite::Result<TournamentParticipant> {
    Ok(TournamentParticipant {
        id: row.get(0)?,
        tournament_id: row.get(1)?,
        user_id: row.get(2)?,
        total_trades: row.get::<_, i64>(3)?.max(0) as u64,
        winning_trades: row.get::<_, i64>(4)?.max(0) as u64,
        total_profit: row.get(5)?,
        current_balance: row.get(6)?,
        rank: row.get(7)?,
        joined_at: row.get(8)?,
    })
}

fn tournament_from_row(row: &Row<'_>) -> rusqlite::Result<Tournament> {
    Ok(Tournament {
        id: row.get(0)?,
        name: row.get(1)?,
        tournament_type: parse_column(row, 2)?,
        status: parse_column(row, 3)?,
        start_time: row.get(4)?,
        end_time: row.get(5)?,
        created_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TradeDirection;

    fn open_trade(user: &str, close_time: i64) -> Trade {
        Trade::new(
            user.to_string(),
            "BTC".to_string(),
            TradeDirection::Buy,
            50.0,
            100.0,
            close_time,
            LedgerTag::Live,
        )
    }

    fn win_closing(user: &str, amount: f64) -> TradeClosing {
        TradeClosing {
            result: TradeResult::Win,
            payout: 40.0,
            closing_price: 101.0,
            settled_at: 1_000,
            credit: Some(LedgerCredit {
                user_id: user.to_string(),
                ledger: LedgerTag::Live,
                amount,
            }),
        }
    }

    #[test]
    fn test_trade_roundtrip() {
        let store = SqliteStore::new_in_memory().unwrap();
        let trade = open_trade("alice", 500);
        store.insert_trade(&trade).unwrap();

        let loaded = store.get_trade(&trade.id).unwrap().unwrap();
        assert_eq!(loaded.user_id, "alice");
        assert_eq!(loaded.direction, TradeDirection::Buy);
        assert_eq!(loaded.status, TradeStatus::Open);
        assert!(loaded.result.is_none());
        assert!(store.get_trade("missing").unwrap().is_none());
    }

    #[test]
    fn test_expired_open_trades_filters_by_time_and_status() {
        let store = SqliteStore::new_in_memory().unwrap();
        let due = open_trade("alice", 100);
        let later = open_trade("bob", 10_000);
        store.insert_trade(&due).unwrap();
        store.insert_trade(&later).unwrap();

        let expired = store.expired_open_trades(100).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, due.id);

        store.close_trade(&due.id, &win_closing("alice", 90.0)).unwrap();
        assert!(store.expired_open_trades(100).unwrap().is_empty());
    }

    #[test]
    fn test_close_trade_credits_once() {
        let store = SqliteStore::new_in_memory().unwrap();
        let trade = open_trade("alice", 100);
        store.insert_trade(&trade).unwrap();

        assert!(store.close_trade(&trade.id, &win_closing("alice", 90.0)).unwrap());
        assert!(!store.close_trade(&trade.id, &win_closing("alice", 90.0)).unwrap());

        assert_eq!(store.balance("alice", LedgerTag::Live).unwrap(), 90.0);
        let closed = store.get_trade(&trade.id).unwrap().unwrap();
        assert_eq!(closed.status, TradeStatus::Closed);
        assert_eq!(closed.result, Some(TradeResult::Win));
        assert_eq!(closed.payout, Some(40.0));
        assert_eq!(closed.closing_price, Some(101.0));
    }

    #[test]
    fn test_close_unknown_trade_is_noop() {
        let store = SqliteStore::new_in_memory().unwrap();

        assert!(!store.close_trade("nope", &win_closing("alice", 90.0)).unwrap());
        assert_eq!(store.balance("alice", LedgerTag::Live).unwrap(), 0.0);
    }

    #[test]
    fn test_ledgers_are_independent() {
        let store = SqliteStore::new_in_memory().unwrap();

        store.credit_balance("alice", LedgerTag::Live, 10.0).unwrap();
        store.credit_balance("alice", LedgerTag::Tournament, 25.0).unwrap();
        let live = store.credit_balance("alice", LedgerTag::Live, 5.0).unwrap();

        assert_eq!(live, 15.0);
        assert_eq!(store.balance("alice", LedgerTag::Tournament).unwrap(), 25.0);
        assert_eq!(store.balance("alice", LedgerTag::Demo).unwrap(), 0.0);

        assert!(store.reset_balance("alice", LedgerTag::Tournament).unwrap());
        assert!(!store.reset_balance("alice", LedgerTag::Tournament).unwrap());
        assert_eq!(store.balance("alice", LedgerTag::Live).unwrap(), 15.0);
    }

    #[test]
    fn test_reference_price_upsert() {
        let store = SqliteStore::new_in_memory().unwrap();
        store
            .upsert_instrument(&Instrument {
                symbol: "ETH".to_string(),
                payout_pct: Some(85.0),
                reference_price: None,
            })
            .unwrap();

        store.update_reference_price("ETH", 3000.0).unwrap();
        store.update_reference_price("SOL", 150.0).unwrap();

        assert_eq!(store.payout_pct("ETH").unwrap(), Some(85.0));
        assert_eq!(store.reference_price("ETH").unwrap(), Some(3000.0));
        assert_eq!(store.payout_pct("SOL").unwrap(), None);
        assert_eq!(store.reference_price("SOL").unwrap(), Some(150.0));
        assert_eq!(store.reference_price("XRP").unwrap(), None);
    }

    #[test]
    fn test_transition_tournament_is_conditional() {
        let store = SqliteStore::new_in_memory().unwrap();
        let tournament = Tournament::new("Weekly".to_string(), TournamentType::ProfitBased, 0, 100);
        store.insert_tournament(&tournament).unwrap();

        assert!(store
            .transition_tournament(&tournament.id, TournamentStatus::Upcoming, TournamentStatus::Active)
            .unwrap());
        assert!(!store
            .transition_tournament(&tournament.id, TournamentStatus::Upcoming, TournamentStatus::Active)
            .unwrap());
        assert!(store
            .transition_tournament(&tournament.id, TournamentStatus::Active, TournamentStatus::Upcoming)
            .is_err());

        let loaded = store.get_tournament(&tournament.id).unwrap().unwrap();
        assert_eq!(loaded.status, TournamentStatus::Active);
    }

    #[test]
    fn test_increment_only_applies_to_active_tournaments() {
        let store = SqliteStore::new_in_memory().unwrap();
        let tournament = Tournament::new("Daily".to_string(), TournamentType::WinRate, 0, 100);
        store.insert_tournament(&tournament).unwrap();
        let participant = TournamentParticipant::new(tournament.id.clone(), "alice".to_string(), 1000.0);
        store.add_participant(&participant).unwrap();

        // Still upcoming
        assert!(!store.increment_participant_stats(&participant.id, true, 10.0).unwrap());
        assert!(store.active_participations("alice").unwrap().is_empty());

        store
            .transition_tournament(&tournament.id, TournamentStatus::Upcoming, TournamentStatus::Active)
            .unwrap();
        assert!(store.increment_participant_stats(&participant.id, true, 10.0).unwrap());
        assert!(store.increment_participant_stats(&participant.id, false, -5.0).unwrap());

        let active = store.active_participations("alice").unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].tournament_type, TournamentType::WinRate);
        let stats = &active[0].participant;
        assert_eq!(stats.total_trades, 2);
        assert_eq!(stats.winning_trades, 1);
        assert_eq!(stats.total_profit, 5.0);
        assert_eq!(stats.current_balance, 1005.0);
    }

    #[test]
    fn test_prizes_respect_max_rank() {
        let store = SqliteStore::new_in_memory().unwrap();
        for rank in [1, 2, 11] {
            store
                .insert_prize(&Prize {
                    tournament_id: "t1".to_string(),
                    rank,
                    amount: 100.0 / rank as f64,
                    description: format!("Place {}", rank),
                })
                .unwrap();
        }

        let prizes = store.prizes_by_tournament("t1", 10).unwrap();
        assert_eq!(prizes.iter().map(|p| p.rank).collect::<Vec<_>>(), vec![1, 2]);
    }
}
