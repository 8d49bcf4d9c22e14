//! SQLite gateway on a single pooled connection.
//!
//! One connection linearises every write, and each engine transaction maps to
//! one SQLite transaction. Timestamps are stored as unix milliseconds.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, Sqlite, SqlitePool, Transaction};
use tracing::info;

use super::{Store, StoreError, StoreResult, StoreTx};
use crate::constants::DEFAULT_WEIGHT;
use crate::error::LotteryError;
use crate::state::{
    EditToken, Lottery, LotteryStats, NewParticipant, NewPrize, Participant, Prize, PrizeWeight,
    Winner,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS lotteries (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL DEFAULT '',
        description TEXT NOT NULL DEFAULT '',
        creator_id INTEGER NOT NULL,
        draw_mode TEXT NOT NULL CHECK(draw_mode IN ('timed', 'full', 'manual')),
        draw_time INTEGER,
        max_entries INTEGER,
        status TEXT NOT NULL DEFAULT 'draft' CHECK(status IN ('draft', 'active', 'completed')),
        created_at INTEGER NOT NULL,
        weights_disabled INTEGER NOT NULL DEFAULT 0,
        participant_count INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS prizes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        lottery_id TEXT NOT NULL REFERENCES lotteries(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        quantity INTEGER NOT NULL DEFAULT 1
    )",
    "CREATE TABLE IF NOT EXISTS participants (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        lottery_id TEXT NOT NULL REFERENCES lotteries(id) ON DELETE CASCADE,
        user_id INTEGER NOT NULL,
        username TEXT NOT NULL DEFAULT '',
        first_name TEXT NOT NULL DEFAULT '',
        last_name TEXT NOT NULL DEFAULT '',
        weight INTEGER NOT NULL DEFAULT 1,
        joined_at INTEGER NOT NULL,
        UNIQUE(lottery_id, user_id)
    )",
    "CREATE TABLE IF NOT EXISTS prize_weights (
        lottery_id TEXT NOT NULL REFERENCES lotteries(id) ON DELETE CASCADE,
        user_id INTEGER NOT NULL,
        prize_id INTEGER NOT NULL,
        weight INTEGER NOT NULL,
        PRIMARY KEY (lottery_id, user_id, prize_id)
    )",
    "CREATE TABLE IF NOT EXISTS winners (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        lottery_id TEXT NOT NULL REFERENCES lotteries(id) ON DELETE CASCADE,
        participant_id INTEGER NOT NULL,
        prize_id INTEGER NOT NULL,
        user_id INTEGER NOT NULL,
        username TEXT NOT NULL DEFAULT '',
        prize_name TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS edit_tokens (
        token TEXT PRIMARY KEY,
        lottery_id TEXT NOT NULL REFERENCES lotteries(id) ON DELETE CASCADE,
        expires_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_prizes_lottery ON prizes(lottery_id)",
    "CREATE INDEX IF NOT EXISTS idx_participants_lottery_joined ON participants(lottery_id, joined_at)",
    "CREATE INDEX IF NOT EXISTS idx_winners_lottery ON winners(lottery_id)",
    "CREATE INDEX IF NOT EXISTS idx_edit_tokens_lottery ON edit_tokens(lottery_id)",
    "CREATE INDEX IF NOT EXISTS idx_lotteries_due ON lotteries(status, draw_mode, draw_time)",
    "CREATE INDEX IF NOT EXISTS idx_lotteries_creator ON lotteries(creator_id, created_at)",
];

const LOTTERY_COLUMNS: &str = "id, title, description, creator_id, draw_mode, draw_time, \
    max_entries, status, created_at, weights_disabled, participant_count";

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate,
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `url` and applies the schema.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let mut options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        if !url.contains(":memory:") {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // an in-memory database lives exactly as long as its connection
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        info!(url, "lottery database ready");
        Ok(store)
    }

    async fn migrate(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteTx { tx }))
    }

    async fn get_lottery(&self, id: &str) -> StoreResult<Option<Lottery>> {
        let mut conn = self.pool.acquire().await?;
        select_lottery(&mut conn, id).await
    }

    async fn lottery_exists(&self, id: &str) -> StoreResult<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM lotteries WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    async fn insert_lottery(&self, lottery: &Lottery) -> StoreResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert_lottery_row(&mut conn, lottery).await
    }

    async fn count_created_since(&self, creator_id: i64, since: DateTime<Utc>) -> StoreResult<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM lotteries WHERE creator_id = ? AND created_at >= ?",
        )
        .bind(creator_id)
        .bind(since.timestamp_millis())
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u32)
    }

    async fn prizes(&self, lottery_id: &str) -> StoreResult<Vec<Prize>> {
        let mut conn = self.pool.acquire().await?;
        select_prizes(&mut conn, lottery_id).await
    }

    async fn participant_count(&self, lottery_id: &str) -> StoreResult<u32> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM participants WHERE lottery_id = ?")
            .bind(lottery_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u32)
    }

    async fn participants(&self, lottery_id: &str) -> StoreResult<Vec<Participant>> {
        let mut conn = self.pool.acquire().await?;
        select_participants(&mut conn, lottery_id).await
    }

    async fn winners(&self, lottery_id: &str) -> StoreResult<Vec<Winner>> {
        let rows = sqlx::query_as::<_, WinnerRow>(
            "SELECT id, lottery_id, participant_id, prize_id, user_id, username, prize_name
             FROM winners WHERE lottery_id = ? ORDER BY id",
        )
        .bind(lottery_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Winner::from).collect())
    }

    async fn find_edit_token(&self, lottery_id: &str, token: &str) -> StoreResult<Option<EditToken>> {
        let row = sqlx::query_as::<_, EditTokenRow>(
            "SELECT token, lottery_id, expires_at FROM edit_tokens WHERE lottery_id = ? AND token = ?",
        )
        .bind(lottery_id)
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        row.map(EditToken::try_from).transpose()
    }

    async fn due_lotteries(&self, now: DateTime<Utc>) -> StoreResult<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT l.id FROM lotteries l
             WHERE l.status = 'active' AND (
                (l.draw_mode = 'timed' AND l.draw_time IS NOT NULL AND l.draw_time <= ?)
                OR (
                    l.draw_mode = 'full'
                    AND l.max_entries IS NOT NULL
                    AND (SELECT COUNT(*) FROM participants p WHERE p.lottery_id = l.id) >= l.max_entries
                )
             )
             ORDER BY l.id",
        )
        .bind(now.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn stats(&self, today_start: DateTime<Utc>) -> StoreResult<LotteryStats> {
        let row = sqlx::query_as::<_, StatsRow>(
            "SELECT
                COUNT(*) AS total_count,
                COALESCE(SUM(CASE WHEN created_at >= ? THEN 1 ELSE 0 END), 0) AS today_count,
                COALESCE(SUM(CASE WHEN status = 'active' AND draw_mode = 'timed' THEN 1 ELSE 0 END), 0)
                    AS scheduled_count
             FROM lotteries WHERE status != 'draft'",
        )
        .bind(today_start.timestamp_millis())
        .fetch_one(&self.pool)
        .await?;

        Ok(LotteryStats {
            total_count: row.total_count.max(0) as u64,
            today_count: row.today_count.max(0) as u64,
            scheduled_count: row.scheduled_count.max(0) as u64,
        })
    }
}

pub struct SqliteTx {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl StoreTx for SqliteTx {
    async fn get_lottery(&mut self, id: &str) -> StoreResult<Option<Lottery>> {
        select_lottery(&mut *self.tx, id).await
    }

    async fn insert_lottery(&mut self, lottery: &Lottery) -> StoreResult<()> {
        insert_lottery_row(&mut *self.tx, lottery).await
    }

    async fn update_lottery(&mut self, lottery: &Lottery) -> StoreResult<()> {
        sqlx::query(
            "UPDATE lotteries
             SET title = ?, description = ?, draw_mode = ?, draw_time = ?, max_entries = ?,
                 status = ?, weights_disabled = ?
             WHERE id = ?",
        )
        .bind(&lottery.title)
        .bind(&lottery.description)
        .bind(lottery.draw_mode.as_str())
        .bind(lottery.draw_time.map(|at| at.timestamp_millis()))
        .bind(lottery.max_entries.map(i64::from))
        .bind(lottery.status.as_str())
        .bind(lottery.weights_disabled)
        .bind(&lottery.id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn replace_prizes(&mut self, lottery_id: &str, prizes: &[NewPrize]) -> StoreResult<Vec<Prize>> {
        sqlx::query("DELETE FROM prize_weights WHERE lottery_id = ?")
            .bind(lottery_id)
            .execute(&mut *self.tx)
            .await?;
        sqlx::query("DELETE FROM prizes WHERE lottery_id = ?")
            .bind(lottery_id)
            .execute(&mut *self.tx)
            .await?;

        for prize in prizes {
            sqlx::query("INSERT INTO prizes (lottery_id, name, quantity) VALUES (?, ?, ?)")
                .bind(lottery_id)
                .bind(&prize.name)
                .bind(i64::from(prize.quantity))
                .execute(&mut *self.tx)
                .await?;
        }

        select_prizes(&mut *self.tx, lottery_id).await
    }

    async fn prizes(&mut self, lottery_id: &str) -> StoreResult<Vec<Prize>> {
        select_prizes(&mut *self.tx, lottery_id).await
    }

    async fn participants(&mut self, lottery_id: &str) -> StoreResult<Vec<Participant>> {
        select_participants(&mut *self.tx, lottery_id).await
    }

    async fn add_participant(&mut self, participant: &NewParticipant) -> StoreResult<Participant> {
        let result = sqlx::query(
            "INSERT INTO participants
                (lottery_id, user_id, username, first_name, last_name, weight, joined_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(lottery_id, user_id) DO NOTHING",
        )
        .bind(&participant.lottery_id)
        .bind(participant.user_id)
        .bind(&participant.username)
        .bind(&participant.first_name)
        .bind(&participant.last_name)
        .bind(i64::from(DEFAULT_WEIGHT))
        .bind(participant.joined_at.timestamp_millis())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Duplicate);
        }
        let id = result.last_insert_rowid();

        sqlx::query("UPDATE lotteries SET participant_count = participant_count + 1 WHERE id = ?")
            .bind(&participant.lottery_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(Participant {
            id,
            lottery_id: participant.lottery_id.clone(),
            user_id: participant.user_id,
            username: participant.username.clone(),
            first_name: participant.first_name.clone(),
            last_name: participant.last_name.clone(),
            weight: DEFAULT_WEIGHT,
            prize_weights: Default::default(),
            // round-trip through storage precision
            joined_at: from_millis(participant.joined_at.timestamp_millis())?,
        })
    }

    async fn update_participant_weight(
        &mut self,
        lottery_id: &str,
        user_id: i64,
        weight: u32,
    ) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE participants SET weight = ? WHERE lottery_id = ? AND user_id = ?")
            .bind(i64::from(weight))
            .bind(lottery_id)
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_prize_weight(&mut self, weight: &PrizeWeight) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO prize_weights (lottery_id, user_id, prize_id, weight)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(lottery_id, user_id, prize_id) DO UPDATE SET weight = excluded.weight",
        )
        .bind(&weight.lottery_id)
        .bind(weight.user_id)
        .bind(weight.prize_id)
        .bind(i64::from(weight.weight))
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_prize_weight(
        &mut self,
        lottery_id: &str,
        user_id: i64,
        prize_id: i64,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "DELETE FROM prize_weights WHERE lottery_id = ? AND user_id = ? AND prize_id = ?",
        )
        .bind(lottery_id)
        .bind(user_id)
        .bind(prize_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_participant(&mut self, lottery_id: &str, user_id: i64) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM participants WHERE lottery_id = ? AND user_id = ?")
            .bind(lottery_id)
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query("DELETE FROM prize_weights WHERE lottery_id = ? AND user_id = ?")
            .bind(lottery_id)
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;
        sqlx::query(
            "UPDATE lotteries SET participant_count = MAX(participant_count - 1, 0) WHERE id = ?",
        )
        .bind(lottery_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(true)
    }

    async fn insert_winner(&mut self, winner: &Winner) -> StoreResult<Winner> {
        let result = sqlx::query(
            "INSERT INTO winners (lottery_id, participant_id, prize_id, user_id, username, prize_name)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&winner.lottery_id)
        .bind(winner.participant_id)
        .bind(winner.prize_id)
        .bind(winner.user_id)
        .bind(&winner.username)
        .bind(&winner.prize_name)
        .execute(&mut *self.tx)
        .await?;

        Ok(Winner {
            id: result.last_insert_rowid(),
            ..winner.clone()
        })
    }

    async fn replace_edit_token(&mut self, token: &EditToken) -> StoreResult<()> {
        sqlx::query("DELETE FROM edit_tokens WHERE lottery_id = ?")
            .bind(&token.lottery_id)
            .execute(&mut *self.tx)
            .await?;
        sqlx::query("INSERT INTO edit_tokens (token, lottery_id, expires_at) VALUES (?, ?, ?)")
            .bind(&token.token)
            .bind(&token.lottery_id)
            .bind(token.expires_at.timestamp_millis())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

async fn select_lottery(conn: &mut SqliteConnection, id: &str) -> StoreResult<Option<Lottery>> {
    let row = sqlx::query_as::<_, LotteryRow>(&format!("SELECT {LOTTERY_COLUMNS} FROM lotteries WHERE id = ?"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(Lottery::try_from).transpose()
}

async fn insert_lottery_row(conn: &mut SqliteConnection, lottery: &Lottery) -> StoreResult<()> {
    let result = sqlx::query(&format!(
        "INSERT INTO lotteries ({LOTTERY_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO NOTHING"
    ))
    .bind(&lottery.id)
    .bind(&lottery.title)
    .bind(&lottery.description)
    .bind(lottery.creator_id)
    .bind(lottery.draw_mode.as_str())
    .bind(lottery.draw_time.map(|at| at.timestamp_millis()))
    .bind(lottery.max_entries.map(i64::from))
    .bind(lottery.status.as_str())
    .bind(lottery.created_at.timestamp_millis())
    .bind(lottery.weights_disabled)
    .bind(i64::from(lottery.participant_count))
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::Duplicate);
    }
    Ok(())
}

async fn select_prizes(conn: &mut SqliteConnection, lottery_id: &str) -> StoreResult<Vec<Prize>> {
    let rows = sqlx::query_as::<_, PrizeRow>(
        "SELECT id, lottery_id, name, quantity FROM prizes WHERE lottery_id = ? ORDER BY id",
    )
    .bind(lottery_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows.into_iter().map(Prize::from).collect())
}

async fn select_participants(
    conn: &mut SqliteConnection,
    lottery_id: &str,
) -> StoreResult<Vec<Participant>> {
    let rows = sqlx::query_as::<_, ParticipantRow>(
        "SELECT id, lottery_id, user_id, username, first_name, last_name, weight, joined_at
         FROM participants WHERE lottery_id = ? ORDER BY joined_at, id",
    )
    .bind(lottery_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut participants = rows
        .into_iter()
        .map(Participant::try_from)
        .collect::<StoreResult<Vec<_>>>()?;

    let overrides = sqlx::query_as::<_, (i64, i64, i64)>(
        "SELECT user_id, prize_id, weight FROM prize_weights WHERE lottery_id = ?",
    )
    .bind(lottery_id)
    .fetch_all(&mut *conn)
    .await?;

    for (user_id, prize_id, weight) in overrides {
        if let Some(participant) = participants.iter_mut().find(|p| p.user_id == user_id) {
            participant.prize_weights.insert(prize_id, to_u32(weight));
        }
    }

    Ok(participants)
}

#[derive(Debug, FromRow)]
struct LotteryRow {
    id: String,
    title: String,
    description: String,
    creator_id: i64,
    draw_mode: String,
    draw_time: Option<i64>,
    max_entries: Option<i64>,
    status: String,
    created_at: i64,
    weights_disabled: bool,
    participant_count: i64,
}

impl TryFrom<LotteryRow> for Lottery {
    type Error = StoreError;

    fn try_from(row: LotteryRow) -> StoreResult<Self> {
        Ok(Lottery {
            id: row.id,
            title: row.title,
            description: row.description,
            creator_id: row.creator_id,
            draw_mode: row.draw_mode.parse().map_err(|err: LotteryError| StoreError::Backend(err.to_string()))?,
            draw_time: row.draw_time.map(from_millis).transpose()?,
            max_entries: row.max_entries.map(to_u32),
            status: row.status.parse().map_err(|err: LotteryError| StoreError::Backend(err.to_string()))?,
            created_at: from_millis(row.created_at)?,
            weights_disabled: row.weights_disabled,
            participant_count: to_u32(row.participant_count),
        })
    }
}

#[derive(Debug, FromRow)]
struct PrizeRow {
    id: i64,
    lottery_id: String,
    name: String,
    quantity: i64,
}

impl From<PrizeRow> for Prize {
    fn from(row: PrizeRow) -> Self {
        Prize {
            id: row.id,
            lottery_id: row.lottery_id,
            name: row.name,
            quantity: to_u32(row.quantity),
        }
    }
}

#[derive(Debug, FromRow)]
struct ParticipantRow {
    id: i64,
    lottery_id: String,
    user_id: i64,
    username: String,
    first_name: String,
    last_name: String,
    weight: i64,
    joined_at: i64,
}

impl TryFrom<ParticipantRow> for Participant {
    type Error = StoreError;

    fn try_from(row: ParticipantRow) -> StoreResult<Self> {
        Ok(Participant {
            id: row.id,
            lottery_id: row.lottery_id,
            user_id: row.user_id,
            username: row.username,
            first_name: row.first_name,
            last_name: row.last_name,
            weight: to_u32(row.weight),
            prize_weights: Default::default(),
            joined_at: from_millis(row.joined_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct WinnerRow {
    id: i64,
    lottery_id: String,
    participant_id: i64,
    prize_id: i64,
    user_id: i64,
    username: String,
    prize_name: String,
}

impl From<WinnerRow> for Winner {
    fn from(row: WinnerRow) -> Self {
        Winner {
            id: row.id,
            lottery_id: row.lottery_id,
            participant_id: row.participant_id,
            prize_id: row.prize_id,
            user_id: row.user_id,
            username: row.username,
            prize_name: row.prize_name,
        }
    }
}

#[derive(Debug, FromRow)]
struct EditTokenRow {
    token: String,
    lottery_id: String,
    expires_at: i64,
}

impl TryFrom<EditTokenRow> for EditToken {
    type Error = StoreError;

    fn try_from(row: EditTokenRow) -> StoreResult<Self> {
        Ok(EditToken {
            token: row.token,
            lottery_id: row.lottery_id,
            expires_at: from_millis(row.expires_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct StatsRow {
    total_count: i64,
    today_count: i64,
    scheduled_count: i64,
}

fn from_millis(millis: i64) -> StoreResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| StoreError::Backend(format!("timestamp {millis} out of range")))
}

fn to_u32(value: i64) -> u32 {
    value.clamp(0, i64::from(u32::MAX)) as u32
}
