//! Storage abstraction for tokens, enrichment output, positions and the durable queue.
//!
//! The store is the single source of truth: the scheduler mirrors every
//! pending task into it, the guard rebuilds its index from it, and every
//! position mutation is a conditional write against it.

pub mod sqlite;

pub use sqlite::SqliteStorage;

use crate::types::{Address, NewPosition, Position, PositionClose, Token, TokenFill};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Merged facts captured at one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub token: Address,
    pub stage: String,
    /// JSON-encoded merged facts
    pub facts_json: String,
    pub taken_at: u64,
}

/// Score produced at one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub token: Address,
    pub stage: String,
    pub score: u8,
    pub reasons: Vec<String>,
    /// JSON-encoded feature vector
    pub features_json: String,
    pub scored_at: u64,
}

/// Emitted trading signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub token: Address,
    pub stage: String,
    pub score: u8,
    pub action: String,
    pub reasons: Vec<String>,
    pub created_at: u64,
}

/// Durable mirror of one pending enrichment task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub token: Address,
    pub ordering_score: i64,
    /// JSON-encoded task
    pub payload: String,
}

/// Persistence contract used by every subsystem.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Insert a token unless one with the same address exists. Returns true when inserted.
    async fn insert_token_if_absent(&self, token: &Token) -> Result<bool>;

    async fn get_token(&self, address: &str) -> Result<Option<Token>>;

    /// Fill token fields that are still null. Set fields are never overwritten.
    async fn fill_token_fields(&self, address: &str, fill: &TokenFill) -> Result<()>;

    /// Record the graduation time if not already set.
    async fn mark_migrated(&self, address: &str, migrated_at: u64) -> Result<()>;

    async fn insert_snapshot(&self, snapshot: &SnapshotRecord) -> Result<i64>;

    async fn insert_score(&self, score: &ScoreRecord) -> Result<i64>;

    async fn insert_signal(&self, signal: &SignalRecord) -> Result<i64>;

    async fn insert_position(&self, position: &NewPosition) -> Result<i64>;

    async fn get_position(&self, id: i64) -> Result<Option<Position>>;

    async fn get_open_positions(&self) -> Result<Vec<Position>>;

    async fn get_open_positions_for_token(&self, token: &str) -> Result<Vec<Position>>;

    /// Update the last price of an open position. Returns false (no write) once closed.
    async fn update_position_price(&self, id: i64, price: f64) -> Result<bool>;

    /// Apply the terminal mutation. Returns false when the position was already closed.
    async fn close_position(&self, id: i64, close: &PositionClose) -> Result<bool>;

    async fn upsert_queue_entry(&self, entry: &QueueEntry) -> Result<()>;

    async fn delete_queue_entry(&self, token: &str) -> Result<()>;

    async fn load_queue_entries(&self) -> Result<Vec<QueueEntry>>;

    async fn health_check(&self) -> Result<bool>;
}
