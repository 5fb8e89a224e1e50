//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use mint_sentry::clock::ManualClock;
use mint_sentry::metrics::MetricsRegistry;
use mint_sentry::scheduler::{EnrichmentWorker, StageTable, TaskQueue};
use mint_sentry::scoring::{FeatureVector, ScoreOutcome, Scorer};
use mint_sentry::sources::{SourceCategory, SourceError, SourceSet, TokenFacts, TokenFactsSource};
use mint_sentry::storage::{QueueEntry, ScoreRecord, SignalRecord, SnapshotRecord, SqliteStorage, Storage};
use mint_sentry::types::{NewPosition, Position, PositionClose, Token, TokenFill};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const T0: u64 = 1_700_000_000_000;

/// Source returning fixed facts, optionally moving a manual clock to simulate a slow lookup.
pub struct MockSource {
    pub name: &'static str,
    pub category: SourceCategory,
    pub facts: TokenFacts,
    pub fetches: AtomicUsize,
    pub delay: Option<(Arc<ManualClock>, Duration)>,
    pub error: Option<SourceError>,
}

impl MockSource {
    pub fn market(facts: TokenFacts) -> Self {
        Self {
            name: "mock_market",
            category: SourceCategory::Market,
            facts,
            fetches: AtomicUsize::new(0),
            delay: None,
            error: None,
        }
    }

    pub fn failing(name: &'static str, category: SourceCategory, error: SourceError) -> Self {
        Self {
            name,
            category,
            facts: TokenFacts::default(),
            fetches: AtomicUsize::new(0),
            delay: None,
            error: Some(error),
        }
    }

    pub fn with_delay(mut self, clock: Arc<ManualClock>, by: Duration) -> Self {
        self.delay = Some((clock, by));
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenFactsSource for MockSource {
    fn name(&self) -> &str {
        self.name
    }

    fn category(&self) -> SourceCategory {
        self.category
    }

    async fn fetch(&self, _mint: &str) -> Result<TokenFacts, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some((clock, by)) = &self.delay {
            clock.advance(*by);
        }
        match &self.error {
            Some(error) => Err(error.clone()),
            None => Ok(self.facts.clone()),
        }
    }
}

/// Scorer that always returns the same score.
pub struct FixedScorer(pub u8);

impl Scorer for FixedScorer {
    fn score(&self, _features: &FeatureVector) -> ScoreOutcome {
        ScoreOutcome {
            score: self.0,
            reasons: vec![format!("fixed={}", self.0)],
        }
    }
}

/// Scorer that returns a fixed score and keeps every feature vector it saw.
pub struct RecordingScorer {
    pub score: u8,
    pub seen: std::sync::Mutex<Vec<FeatureVector>>,
}

impl RecordingScorer {
    pub fn new(score: u8) -> Self {
        Self {
            score,
            seen: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn last(&self) -> Option<FeatureVector> {
        self.seen.lock().unwrap().last().cloned()
    }
}

impl Scorer for RecordingScorer {
    fn score(&self, features: &FeatureVector) -> ScoreOutcome {
        self.seen.lock().unwrap().push(features.clone());
        ScoreOutcome {
            score: self.score,
            reasons: Vec::new(),
        }
    }
}

pub fn market_facts(price: f64) -> TokenFacts {
    TokenFacts {
        price_usd: Some(price),
        liquidity_usd: Some(25_000.0),
        volume_24h_usd: Some(80_000.0),
        ..Default::default()
    }
}

pub struct Harness {
    pub storage: Arc<SqliteStorage>,
    pub clock: Arc<ManualClock>,
    pub queue: Arc<TaskQueue>,
    pub metrics: MetricsRegistry,
}

pub async fn create_harness(now: u64) -> Harness {
    let storage = SqliteStorage::in_memory()
        .await
        .expect("Failed to create in-memory storage");
    let clock = Arc::new(ManualClock::new(now));
    let queue = TaskQueue::new(storage.clone(), clock.clone());
    Harness {
        storage,
        clock,
        queue,
        metrics: MetricsRegistry::new(),
    }
}

impl Harness {
    pub fn worker(&self, source: Arc<MockSource>, score: u8) -> EnrichmentWorker {
        EnrichmentWorker::new(
            self.storage.clone(),
            self.queue.clone(),
            SourceSet::new().with_source(source),
            Arc::new(FixedScorer(score)),
            StageTable::default(),
            self.metrics.clone(),
            self.clock.clone(),
        )
        .with_lookup_timeout(Duration::from_secs(1))
    }
}

/// SQLite storage whose position closes and queue deletes fail a set number of times,
/// and whose queue upserts can be stalled.
pub struct FlakyStorage {
    pub inner: Arc<SqliteStorage>,
    pub close_failures: AtomicUsize,
    pub delete_failures: AtomicUsize,
    /// Held by a test to stall queue upserts
    pub upsert_gate: Arc<tokio::sync::Mutex<()>>,
}

impl FlakyStorage {
    pub fn new(inner: Arc<SqliteStorage>) -> Self {
        Self {
            inner,
            close_failures: AtomicUsize::new(0),
            delete_failures: AtomicUsize::new(0),
            upsert_gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn fail_closes(self, times: usize) -> Self {
        self.close_failures.store(times, Ordering::SeqCst);
        self
    }

    pub fn fail_deletes(self, times: usize) -> Self {
        self.delete_failures.store(times, Ordering::SeqCst);
        self
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn insert_token_if_absent(&self, token: &Token) -> Result<bool> {
        self.inner.insert_token_if_absent(token).await
    }

    async fn get_token(&self, address: &str) -> Result<Option<Token>> {
        self.inner.get_token(address).await
    }

    async fn fill_token_fields(&self, address: &str, fill: &TokenFill) -> Result<()> {
        self.inner.fill_token_fields(address, fill).await
    }

    async fn mark_migrated(&self, address: &str, migrated_at: u64) -> Result<()> {
        self.inner.mark_migrated(address, migrated_at).await
    }

    async fn insert_snapshot(&self, snapshot: &SnapshotRecord) -> Result<i64> {
        self.inner.insert_snapshot(snapshot).await
    }

    async fn insert_score(&self, score: &ScoreRecord) -> Result<i64> {
        self.inner.insert_score(score).await
    }

    async fn insert_signal(&self, signal: &SignalRecord) -> Result<i64> {
        self.inner.insert_signal(signal).await
    }

    async fn insert_position(&self, position: &NewPosition) -> Result<i64> {
        self.inner.insert_position(position).await
    }

    async fn get_position(&self, id: i64) -> Result<Option<Position>> {
        self.inner.get_position(id).await
    }

    async fn get_open_positions(&self) -> Result<Vec<Position>> {
        self.inner.get_open_positions().await
    }

    async fn get_open_positions_for_token(&self, token: &str) -> Result<Vec<Position>> {
        self.inner.get_open_positions_for_token(token).await
    }

    async fn update_position_price(&self, id: i64, price: f64) -> Result<bool> {
        self.inner.update_position_price(id, price).await
    }

    async fn close_position(&self, id: i64, close: &PositionClose) -> Result<bool> {
        if Self::take_failure(&self.close_failures) {
            bail!("database is locked");
        }
        self.inner.close_position(id, close).await
    }

    async fn upsert_queue_entry(&self, entry: &QueueEntry) -> Result<()> {
        let _gate = self.upsert_gate.lock().await;
        self.inner.upsert_queue_entry(entry).await
    }

    async fn delete_queue_entry(&self, token: &str) -> Result<()> {
        if Self::take_failure(&self.delete_failures) {
            bail!("database is locked");
        }
        self.inner.delete_queue_entry(token).await
    }

    async fn load_queue_entries(&self) -> Result<Vec<QueueEntry>> {
        self.inner.load_queue_entries().await
    }

    async fn health_check(&self) -> Result<bool> {
        self.inner.health_check().await
    }
}
