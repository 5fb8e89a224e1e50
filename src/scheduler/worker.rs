//! Stage processing and the worker pool that drives it.
//!
//! One pass over a dequeued task: staleness check, two-wave lookups,
//! persistence, scoring, signal handling, then prune or reschedule. Stage
//! k+1 is only enqueued after everything for stage k has been written.

use super::fanout::{check_all, fetch_all, merge_facts, LookupResult};
use super::queue::TaskQueue;
use super::stage::{Stage, StageTable};
use super::task::EnrichmentTask;
use crate::clock::Clock;
use crate::metrics::MetricsRegistry;
use crate::scoring::{FeatureVector, Scorer};
use crate::sources::{HolderVerdict, SourceError, SourceSet, TokenFacts};
use crate::storage::{ScoreRecord, SnapshotRecord, Storage};
use crate::trading::{SignalEngine, StageScore};
use crate::types::TokenFill;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Delay added per failed attempt before a stage is retried.
const RETRY_STEP_MS: u64 = 1_000;

/// How a task left the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Too old for its stage; dropped without lookups
    Stale,
    /// No token record to enrich
    TokenMissing,
    Pruned { score: u8 },
    Rescheduled { stage: usize, at: u64 },
    /// Completed the last stage
    Exhausted { score: u8 },
}

impl TaskOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskOutcome::Stale => "stale",
            TaskOutcome::TokenMissing => "token_missing",
            TaskOutcome::Pruned { .. } => "pruned",
            TaskOutcome::Rescheduled { .. } => "rescheduled",
            TaskOutcome::Exhausted { .. } => "exhausted",
        }
    }
}

pub struct EnrichmentWorker {
    storage: Arc<dyn Storage>,
    queue: Arc<TaskQueue>,
    sources: SourceSet,
    scorer: Arc<dyn Scorer>,
    stages: StageTable,
    signals: Option<Arc<SignalEngine>>,
    metrics: MetricsRegistry,
    clock: Arc<dyn Clock>,
    lookup_timeout: Duration,
    max_attempts: u32,
}

impl EnrichmentWorker {
    pub fn new(
        storage: Arc<dyn Storage>,
        queue: Arc<TaskQueue>,
        sources: SourceSet,
        scorer: Arc<dyn Scorer>,
        stages: StageTable,
        metrics: MetricsRegistry,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            queue,
            sources,
            scorer,
            stages,
            signals: None,
            metrics,
            clock,
            lookup_timeout: Duration::from_secs(3),
            max_attempts: 3,
        }
    }

    pub fn with_signals(mut self, signals: Arc<SignalEngine>) -> Self {
        self.signals = Some(signals);
        self
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    /// Run one task end to end and hand its successor (if any) back to the queue.
    #[instrument(skip(self, task), fields(mint = %task.token, stage = task.stage))]
    pub async fn process(&self, task: EnrichmentTask) -> Result<TaskOutcome> {
        let now = self.clock.now_ms();
        let Some(stage) = self.stages.get(task.stage) else {
            warn!("Task for {} points past the stage table", task.token);
            self.queue.complete(&task.token, None).await?;
            return Ok(TaskOutcome::Exhausted {
                score: task.last_score.unwrap_or(0),
            });
        };

        if task.age_ms(now) > stage.max_staleness_ms() {
            debug!(
                "Discarding stale {} at {}: {}ms late",
                task.token,
                stage.name,
                task.age_ms(now)
            );
            self.queue.complete(&task.token, None).await?;
            return Ok(TaskOutcome::Stale);
        }

        if self.storage.get_token(&task.token).await?.is_none() {
            warn!("No token record for {}, dropping task", task.token);
            self.queue.complete(&task.token, None).await?;
            return Ok(TaskOutcome::TokenMissing);
        }

        let started = Instant::now();
        let (facts, verdicts, failed) = self.lookups(&task.token, stage).await;

        let mut risk = task.risk.clone();
        risk.absorb(&facts, &verdicts, failed);

        let fill = TokenFill {
            creator: facts.creator.clone(),
            name: facts.name.clone(),
            symbol: facts.symbol.clone(),
            ..Default::default()
        };
        if !fill.is_empty() {
            self.storage.fill_token_fields(&task.token, &fill).await?;
        }

        let taken_at = self.clock.now_ms();
        self.storage
            .insert_snapshot(&SnapshotRecord {
                token: task.token.clone(),
                stage: stage.name.clone(),
                facts_json: serde_json::to_string(&facts).context("Failed to encode facts")?,
                taken_at,
            })
            .await?;

        let features = FeatureVector::build(&facts, &verdicts, &risk);
        let outcome = self.scorer.score(&features);
        self.storage
            .insert_score(&ScoreRecord {
                token: task.token.clone(),
                stage: stage.name.clone(),
                score: outcome.score,
                reasons: outcome.reasons.clone(),
                features_json: serde_json::to_string(&features).context("Failed to encode features")?,
                scored_at: self.clock.now_ms(),
            })
            .await?;

        if let Some(signals) = &self.signals {
            let scored = StageScore {
                token: task.token.clone(),
                stage: stage.name.clone(),
                signal_eligible: stage.signal_eligible,
                score: outcome.score,
                reasons: outcome.reasons.clone(),
                price_usd: facts.price_usd,
                liquidity_usd: facts.liquidity_usd,
            };
            // Signal failures must not replay the stage; the score is already stored
            if let Err(e) = signals.on_scored(&scored).await {
                warn!("Signal handling failed for {}: {:#}", task.token, e);
            }
        }

        self.metrics
            .record_timing(&format!("stage.{}", stage.name), started.elapsed())
            .await;

        if stage.should_prune(outcome.score) {
            info!(
                "Pruned {} at {} with score {}",
                task.token, stage.name, outcome.score
            );
            self.queue.complete(&task.token, None).await?;
            return Ok(TaskOutcome::Pruned {
                score: outcome.score,
            });
        }

        let next_index = task.stage + 1;
        let Some(next_stage) = self.stages.get(next_index) else {
            info!(
                "{} finished all {} stages, last score {}",
                task.token,
                self.stages.len(),
                outcome.score
            );
            self.queue.complete(&task.token, None).await?;
            return Ok(TaskOutcome::Exhausted {
                score: outcome.score,
            });
        };

        let next = task.advance(
            next_index,
            next_stage.offset_ms(),
            self.clock.now_ms(),
            outcome.score,
            risk,
        );
        let at = next.scheduled_time;
        debug!(
            "{} scored {} at {}, next {} at {}",
            task.token, outcome.score, stage.name, next_stage.name, at
        );
        self.queue.complete(&task.token, Some(next)).await?;
        Ok(TaskOutcome::Rescheduled {
            stage: next_index,
            at,
        })
    }

    /// Wave 1 over the stage's categories, then wave 2 over the holders wave 1 found.
    async fn lookups(
        &self,
        mint: &str,
        stage: &Stage,
    ) -> (TokenFacts, Vec<HolderVerdict>, u32) {
        let sources = self.sources.for_categories(&stage.categories);
        let wave1 = fetch_all(&sources, mint, self.lookup_timeout).await;
        let mut failed = self.account(&wave1).await;
        let facts = merge_facts(&wave1);

        let verdicts = if stage.security_recheck && !facts.holders().is_empty() {
            let wave2 = check_all(
                self.sources.holder_checks(),
                mint,
                facts.holders(),
                self.lookup_timeout,
            )
            .await;
            failed += self.account(&wave2).await;
            wave2
                .into_iter()
                .filter_map(|result| result.outcome.ok())
                .collect()
        } else {
            Vec::new()
        };

        (facts, verdicts, failed)
    }

    /// Record per-source outcomes; returns how many lookups failed.
    async fn account<T>(&self, results: &[LookupResult<T>]) -> u32 {
        let mut failed = 0;
        for result in results {
            self.metrics
                .record_source_result(&result.source, &result.outcome)
                .await;
            match &result.outcome {
                Ok(_) => {}
                Err(SourceError::FatalAuth(detail)) => {
                    failed += 1;
                    error!(
                        "Source {} rejected our credentials, check its configuration: {}",
                        result.source, detail
                    );
                }
                Err(SourceError::NotFound) => {}
                Err(e) => {
                    failed += 1;
                    debug!("Source {} failed: {}", result.source, e);
                }
            }
        }
        failed
    }

    /// Retry a failed task later, or give up after `max_attempts`.
    async fn handle_failure(&self, task: EnrichmentTask, err: anyhow::Error) {
        let attempts = task.attempts + 1;
        if attempts >= self.max_attempts {
            error!(
                "Giving up on {} stage {} after {} attempts: {:#}",
                task.token, task.stage, attempts, err
            );
            self.metrics.increment_counter("scheduler.abandoned").await;
            if let Err(e) = self.queue.complete(&task.token, None).await {
                warn!("Failed to drop queue entry for {}: {:#}", task.token, e);
            }
            return;
        }

        warn!(
            "Stage {} failed for {} (attempt {}): {:#}",
            task.stage, task.token, attempts, err
        );
        self.metrics.increment_counter("scheduler.retried").await;
        let retry = task.retry(attempts, self.clock.now_ms() + RETRY_STEP_MS * attempts as u64);
        let token = retry.token.clone();
        if let Err(e) = self.queue.complete(&token, Some(retry)).await {
            warn!("Failed to requeue {}: {:#}", token, e);
        }
    }

    /// Process one dequeued task, including failure handling and metrics.
    pub async fn run_task(&self, task: EnrichmentTask) -> Option<TaskOutcome> {
        match self.process(task.clone()).await {
            Ok(outcome) => {
                self.metrics
                    .increment_counter(&format!("scheduler.{}", outcome.as_str()))
                    .await;
                Some(outcome)
            }
            Err(e) => {
                self.handle_failure(task, e).await;
                None
            }
        }
    }
}

/// N worker loops sharing one queue.
pub struct WorkerPool;

impl WorkerPool {
    pub fn spawn(
        worker: Arc<EnrichmentWorker>,
        workers: usize,
        idle_poll: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        (0..workers.max(1))
            .map(|id| {
                let worker = Arc::clone(&worker);
                let mut shutdown = shutdown.clone();
                tokio::spawn(async move {
                    debug!("Enrichment worker {} started", id);
                    while let Some(task) = worker.queue.next_due(&mut shutdown, idle_poll).await {
                        worker.run_task(task).await;
                    }
                    debug!("Enrichment worker {} stopped", id);
                })
            })
            .collect()
    }
}
