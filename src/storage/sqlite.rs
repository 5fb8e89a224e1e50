//! SQLite implementation of [`Storage`].
//!
//! Schema is created on connect. Timestamps are stored as INTEGER milliseconds;
//! list-valued fields (reasons) are stored as JSON text.

use super::{QueueEntry, ScoreRecord, SignalRecord, SnapshotRecord, Storage};
use crate::types::{
    CloseReason, DiscoverySource, NewPosition, Position, PositionClose, PositionStatus, Token,
    TokenFill,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, Pool, Sqlite};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, instrument};

#[derive(FromRow)]
struct TokenRow {
    address: String,
    source: String,
    creator: Option<String>,
    bonding_curve: Option<String>,
    name: Option<String>,
    symbol: Option<String>,
    uri: Option<String>,
    initial_virtual_sol_reserves: Option<i64>,
    initial_virtual_token_reserves: Option<i64>,
    discovered_at: i64,
    migrated_at: Option<i64>,
}

impl TokenRow {
    fn into_token(self) -> Result<Token> {
        let source = DiscoverySource::parse(&self.source)
            .ok_or_else(|| anyhow!("Unknown discovery source '{}'", self.source))?;
        Ok(Token {
            address: self.address,
            source,
            creator: self.creator,
            bonding_curve: self.bonding_curve,
            name: self.name,
            symbol: self.symbol,
            uri: self.uri,
            initial_virtual_sol_reserves: self.initial_virtual_sol_reserves.map(|v| v as u64),
            initial_virtual_token_reserves: self.initial_virtual_token_reserves.map(|v| v as u64),
            discovered_at: self.discovered_at as u64,
            migrated_at: self.migrated_at.map(|v| v as u64),
        })
    }
}

#[derive(FromRow)]
struct PositionRow {
    id: i64,
    token: String,
    is_simulated: bool,
    status: String,
    entry_price: f64,
    last_price: Option<f64>,
    exit_price: Option<f64>,
    size_sol: f64,
    close_reason: Option<String>,
    pnl_pct: Option<f64>,
    opened_at: i64,
    closed_at: Option<i64>,
}

impl PositionRow {
    fn into_position(self) -> Result<Position> {
        let status = match self.status.as_str() {
            "open" => PositionStatus::Open,
            "closed" => PositionStatus::Closed,
            other => return Err(anyhow!("Unknown position status '{}'", other)),
        };
        Ok(Position {
            id: self.id,
            token: self.token,
            is_simulated: self.is_simulated,
            status,
            entry_price: self.entry_price,
            last_price: self.last_price,
            exit_price: self.exit_price,
            size_sol: self.size_sol,
            close_reason: self.close_reason.as_deref().map(CloseReason::parse),
            pnl_pct: self.pnl_pct,
            opened_at: self.opened_at as u64,
            closed_at: self.closed_at.map(|v| v as u64),
        })
    }
}

#[derive(FromRow)]
struct QueueRow {
    token: String,
    ordering_score: i64,
    payload: String,
}

const POSITION_COLUMNS: &str = "id, token, is_simulated, status, entry_price, last_price, exit_price, \
     size_sol, close_reason, pnl_pct, opened_at, closed_at";

/// SQLite-backed store.
pub struct SqliteStorage {
    pool: Pool<Sqlite>,
}

impl SqliteStorage {
    /// Connect to `database_url` (e.g. `sqlite:./mint-sentry.db`), creating the file and schema.
    pub async fn connect(database_url: &str) -> Result<Arc<Self>> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database url {}", database_url))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        Self::create_schema(&pool).await?;
        info!("SqliteStorage connected to {}", database_url);
        Ok(Arc::new(Self { pool }))
    }

    /// A private in-memory database. One connection that never expires, so the data lives as long as the pool.
    pub async fn in_memory() -> Result<Arc<Self>> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory SQLite database")?;

        Self::create_schema(&pool).await?;
        Ok(Arc::new(Self { pool }))
    }

    async fn create_schema(pool: &Pool<Sqlite>) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tokens (
                address TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                creator TEXT,
                bonding_curve TEXT,
                name TEXT,
                symbol TEXT,
                uri TEXT,
                initial_virtual_sol_reserves INTEGER,
                initial_virtual_token_reserves INTEGER,
                discovered_at INTEGER NOT NULL,
                migrated_at INTEGER
            );
            "#,
        )
        .execute(pool)
        .await
        .context("Failed to create tokens table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                token TEXT NOT NULL,
                stage TEXT NOT NULL,
                facts_json TEXT NOT NULL,
                taken_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await
        .context("Failed to create snapshots table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scores (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                token TEXT NOT NULL,
                stage TEXT NOT NULL,
                score INTEGER NOT NULL,
                reasons TEXT NOT NULL,
                features_json TEXT NOT NULL,
                scored_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await
        .context("Failed to create scores table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                token TEXT NOT NULL,
                stage TEXT NOT NULL,
                score INTEGER NOT NULL,
                action TEXT NOT NULL,
                reasons TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await
        .context("Failed to create signals table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                token TEXT NOT NULL,
                is_simulated BOOLEAN NOT NULL,
                status TEXT NOT NULL,
                entry_price REAL NOT NULL,
                last_price REAL,
                exit_price REAL,
                size_sol REAL NOT NULL,
                close_reason TEXT,
                pnl_pct REAL,
                opened_at INTEGER NOT NULL,
                closed_at INTEGER
            );
            "#,
        )
        .execute(pool)
        .await
        .context("Failed to create positions table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_positions_status_token ON positions (status, token);")
            .execute(pool)
            .await
            .context("Failed to create positions index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS enrichment_queue (
                token TEXT PRIMARY KEY,
                ordering_score INTEGER NOT NULL,
                payload TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await
        .context("Failed to create enrichment_queue table")?;

        debug!("Schema ready");
        Ok(())
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    #[instrument(skip(self, token), fields(mint = %token.address))]
    async fn insert_token_if_absent(&self, token: &Token) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO tokens (
                address, source, creator, bonding_curve, name, symbol, uri,
                initial_virtual_sol_reserves, initial_virtual_token_reserves,
                discovered_at, migrated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&token.address)
        .bind(token.source.as_str())
        .bind(&token.creator)
        .bind(&token.bonding_curve)
        .bind(&token.name)
        .bind(&token.symbol)
        .bind(&token.uri)
        .bind(token.initial_virtual_sol_reserves.map(|v| v as i64))
        .bind(token.initial_virtual_token_reserves.map(|v| v as i64))
        .bind(token.discovered_at as i64)
        .bind(token.migrated_at.map(|v| v as i64))
        .execute(&self.pool)
        .await
        .context("Failed to insert token")?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_token(&self, address: &str) -> Result<Option<Token>> {
        let row: Option<TokenRow> = sqlx::query_as("SELECT * FROM tokens WHERE address = ?")
            .bind(address)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch token")?;
        row.map(TokenRow::into_token).transpose()
    }

    async fn fill_token_fields(&self, address: &str, fill: &TokenFill) -> Result<()> {
        if fill.is_empty() {
            return Ok(());
        }
        sqlx::query(
            r#"
            UPDATE tokens SET
                creator = COALESCE(creator, ?),
                bonding_curve = COALESCE(bonding_curve, ?),
                name = COALESCE(name, ?),
                symbol = COALESCE(symbol, ?),
                uri = COALESCE(uri, ?)
            WHERE address = ?
            "#,
        )
        .bind(&fill.creator)
        .bind(&fill.bonding_curve)
        .bind(&fill.name)
        .bind(&fill.symbol)
        .bind(&fill.uri)
        .bind(address)
        .execute(&self.pool)
        .await
        .context("Failed to fill token fields")?;
        Ok(())
    }

    async fn mark_migrated(&self, address: &str, migrated_at: u64) -> Result<()> {
        sqlx::query("UPDATE tokens SET migrated_at = COALESCE(migrated_at, ?) WHERE address = ?")
            .bind(migrated_at as i64)
            .bind(address)
            .execute(&self.pool)
            .await
            .context("Failed to mark token migrated")?;
        Ok(())
    }

    async fn insert_snapshot(&self, snapshot: &SnapshotRecord) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO snapshots (token, stage, facts_json, taken_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&snapshot.token)
        .bind(&snapshot.stage)
        .bind(&snapshot.facts_json)
        .bind(snapshot.taken_at as i64)
        .execute(&self.pool)
        .await
        .context("Failed to insert snapshot")?;
        Ok(result.last_insert_rowid())
    }

    async fn insert_score(&self, score: &ScoreRecord) -> Result<i64> {
        let reasons = serde_json::to_string(&score.reasons).context("Failed to encode reasons")?;
        let result = sqlx::query(
            r#"
            INSERT INTO scores (token, stage, score, reasons, features_json, scored_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&score.token)
        .bind(&score.stage)
        .bind(score.score as i64)
        .bind(reasons)
        .bind(&score.features_json)
        .bind(score.scored_at as i64)
        .execute(&self.pool)
        .await
        .context("Failed to insert score")?;
        Ok(result.last_insert_rowid())
    }

    async fn insert_signal(&self, signal: &SignalRecord) -> Result<i64> {
        let reasons = serde_json::to_string(&signal.reasons).context("Failed to encode reasons")?;
        let result = sqlx::query(
            r#"
            INSERT INTO signals (token, stage, score, action, reasons, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&signal.token)
        .bind(&signal.stage)
        .bind(signal.score as i64)
        .bind(&signal.action)
        .bind(reasons)
        .bind(signal.created_at as i64)
        .execute(&self.pool)
        .await
        .context("Failed to insert signal")?;
        Ok(result.last_insert_rowid())
    }

    #[instrument(skip(self, position), fields(mint = %position.token))]
    async fn insert_position(&self, position: &NewPosition) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO positions (token, is_simulated, status, entry_price, size_sol, opened_at)
            VALUES (?, ?, 'open', ?, ?, ?)
            "#,
        )
        .bind(&position.token)
        .bind(position.is_simulated)
        .bind(position.entry_price)
        .bind(position.size_sol)
        .bind(position.opened_at as i64)
        .execute(&self.pool)
        .await
        .context("Failed to insert position")?;
        Ok(result.last_insert_rowid())
    }

    async fn get_position(&self, id: i64) -> Result<Option<Position>> {
        let row: Option<PositionRow> =
            sqlx::query_as(&format!("SELECT {} FROM positions WHERE id = ?", POSITION_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to fetch position")?;
        row.map(PositionRow::into_position).transpose()
    }

    async fn get_open_positions(&self) -> Result<Vec<Position>> {
        let rows: Vec<PositionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM positions WHERE status = 'open' ORDER BY id",
            POSITION_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch open positions")?;
        rows.into_iter().map(PositionRow::into_position).collect()
    }

    async fn get_open_positions_for_token(&self, token: &str) -> Result<Vec<Position>> {
        let rows: Vec<PositionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM positions WHERE status = 'open' AND token = ? ORDER BY id",
            POSITION_COLUMNS
        ))
        .bind(token)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch open positions for token")?;
        rows.into_iter().map(PositionRow::into_position).collect()
    }

    async fn update_position_price(&self, id: i64, price: f64) -> Result<bool> {
        let result = sqlx::query("UPDATE positions SET last_price = ? WHERE id = ? AND status = 'open'")
            .bind(price)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to update position price")?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, close), fields(reason = %close.reason))]
    async fn close_position(&self, id: i64, close: &PositionClose) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE positions SET
                status = 'closed',
                exit_price = ?,
                close_reason = ?,
                pnl_pct = ?,
                closed_at = ?
            WHERE id = ? AND status = 'open'
            "#,
        )
        .bind(close.exit_price)
        .bind(close.reason.as_str())
        .bind(close.pnl_pct)
        .bind(close.closed_at as i64)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to close position")?;
        Ok(result.rows_affected() == 1)
    }

    async fn upsert_queue_entry(&self, entry: &QueueEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO enrichment_queue (token, ordering_score, payload) VALUES (?, ?, ?)
            ON CONFLICT(token) DO UPDATE SET
                ordering_score = excluded.ordering_score,
                payload = excluded.payload
            "#,
        )
        .bind(&entry.token)
        .bind(entry.ordering_score)
        .bind(&entry.payload)
        .execute(&self.pool)
        .await
        .context("Failed to upsert queue entry")?;
        Ok(())
    }

    async fn delete_queue_entry(&self, token: &str) -> Result<()> {
        sqlx::query("DELETE FROM enrichment_queue WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await
            .context("Failed to delete queue entry")?;
        Ok(())
    }

    async fn load_queue_entries(&self) -> Result<Vec<QueueEntry>> {
        let rows: Vec<QueueRow> = sqlx::query_as(
            "SELECT token, ordering_score, payload FROM enrichment_queue ORDER BY ordering_score",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to load queue entries")?;

        Ok(rows
            .into_iter()
            .map(|row| QueueEntry {
                token: row.token,
                ordering_score: row.ordering_score,
                payload: row.payload,
            })
            .collect())
    }

    async fn health_check(&self) -> Result<bool> {
        let result: (i64,) = sqlx::query_as("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Storage health check failed")?;
        Ok(result.0 == 1)
    }
}
