//! Wiring of every component and the top-level run loop.
//!
//! Everything shared (queue, metrics, guard index, storage) is constructed
//! once here and handed out by `Arc`. A single watch channel stops all loops.

use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::decoder::EventKind;
use crate::discovery::{Discovery, PollingFeed};
use crate::guard::RugGuard;
use crate::metrics::{MetricsRegistry, MetricsSnapshot};
use crate::scheduler::{EnrichmentWorker, TaskQueue, WorkerPool};
use crate::scoring::WeightedScorer;
use crate::sources::{
    ConcentrationCheck, HttpMarketSource, RateLimitedSource, RpcHoldersSource, RpcMintSource,
    SourceSet, TokenFactsSource,
};
use crate::storage::{SqliteStorage, Storage};
use crate::stream::{ListenerRegistry, StreamingClient};
use crate::trading::{LogNotifier, PaperExecutor, SignalEngine, TradingExecutor};
use anyhow::{bail, Context, Result};
use solana_client::nonblocking::rpc_client::RpcClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(60);

pub struct App {
    config: AppConfig,
    storage: Arc<dyn Storage>,
    metrics: MetricsRegistry,
    queue: Arc<TaskQueue>,
    guard: RugGuard,
    worker: Arc<EnrichmentWorker>,
    stream: Arc<StreamingClient>,
    feed: Option<PollingFeed>,
}

impl App {
    /// Production wiring: SQLite storage, HTTP and RPC sources, paper execution.
    pub async fn from_config(config: AppConfig) -> Result<Self> {
        if !config.trading.simulated {
            bail!("trading.simulated=false needs a live executor; use App::assemble to supply one");
        }
        let storage = SqliteStorage::connect(&config.storage.database_url).await?;
        let sources = build_sources(&config)?;
        Self::assemble(
            config,
            storage,
            Arc::new(PaperExecutor),
            sources,
            Arc::new(SystemClock),
        )
    }

    /// Wire components around caller-supplied collaborators.
    pub fn assemble(
        config: AppConfig,
        storage: Arc<dyn Storage>,
        executor: Arc<dyn TradingExecutor>,
        sources: SourceSet,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let metrics = MetricsRegistry::new();
        let queue = TaskQueue::new(storage.clone(), clock.clone());

        let guard = RugGuard::new(storage.clone(), executor.clone(), clock.clone(), &config.guard);
        let signals = SignalEngine::new(
            storage.clone(),
            executor,
            Arc::new(LogNotifier),
            clock.clone(),
            config.trading.clone(),
        )
        .with_guard(guard.clone());

        let stages = config.scheduler.stages.clone();
        let discovery = Discovery::new(
            storage.clone(),
            queue.clone(),
            clock.clone(),
            metrics.clone(),
            stages.first().offset_ms(),
        );

        let worker = EnrichmentWorker::new(
            storage.clone(),
            queue.clone(),
            sources,
            Arc::new(WeightedScorer::new(config.scoring.clone())),
            stages,
            metrics.clone(),
            clock,
        )
        .with_signals(Arc::new(signals))
        .with_lookup_timeout(config.scheduler.lookup_timeout())
        .with_max_attempts(config.scheduler.max_attempts);

        let mut registry = ListenerRegistry::new();
        registry.register(EventKind::NewToken, discovery.clone());
        registry.register(EventKind::Migration, discovery.clone());
        registry.register(EventKind::LiquidityRemoval, Arc::new(guard.clone()));
        let stream = StreamingClient::new(config.stream.clone(), registry);

        let feed = match &config.feed.url {
            Some(url) => Some(PollingFeed::new(
                reqwest::Client::new(),
                url.clone(),
                discovery,
                Duration::from_secs(config.feed.poll_interval_secs.max(1)),
                Duration::from_secs(config.feed.dedupe_ttl_secs.max(1)),
            )),
            None => None,
        };

        Ok(Self {
            config,
            storage,
            metrics,
            queue,
            guard,
            worker: Arc::new(worker),
            stream,
            feed,
        })
    }

    /// Restore state, start every loop and wait for all of them after shutdown.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let report = self
            .queue
            .restore(&self.config.scheduler.stages)
            .await
            .context("Failed to restore enrichment queue")?;
        self.metrics
            .add_counter("scheduler.restored", report.restored as u64)
            .await;
        let watched = self.guard.refresh_index().await?;
        info!(
            "Starting with {} queued tasks and {} watched positions",
            report.restored, watched
        );

        let mut handles: Vec<JoinHandle<()>> = Vec::new();
        handles.push(tokio::spawn(self.guard.clone().run(shutdown.clone())));
        handles.extend(WorkerPool::spawn(
            self.worker.clone(),
            self.config.scheduler.workers,
            self.config.scheduler.idle_poll(),
            shutdown.clone(),
        ));

        let stream = self.stream.clone();
        let stream_shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = stream.run(stream_shutdown).await {
                error!("Transaction stream terminated: {:#}", e);
            }
        }));

        if let Some(feed) = self.feed {
            handles.push(tokio::spawn(feed.run(shutdown.clone())));
        }

        handles.push(tokio::spawn(health_loop(
            self.storage.clone(),
            self.metrics.clone(),
            self.queue.clone(),
            self.guard.clone(),
            self.stream.clone(),
            shutdown,
        )));

        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Background task ended abnormally: {}", e);
            }
        }
        info!("All components stopped");
        Ok(())
    }
}

fn build_sources(config: &AppConfig) -> Result<SourceSet> {
    let sources = &config.sources;
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")?;
    let rpc = Arc::new(RpcClient::new(sources.rpc_url.clone()));
    let cooldown = Duration::from_secs(sources.rate_limit_cooldown_secs);
    let rps = sources.requests_per_second;

    let market = HttpMarketSource::new(http, sources.market_api_url.clone())
        .with_api_key(sources.market_api_key.clone())
        .with_retry_attempts(sources.retry_attempts);

    Ok(SourceSet::new()
        .with_source(rate_limited(Arc::new(market), rps, cooldown))
        .with_source(rate_limited(Arc::new(RpcMintSource::new(rpc.clone())), rps, cooldown))
        .with_source(rate_limited(Arc::new(RpcHoldersSource::new(rpc)), rps, cooldown))
        .with_holder_check(Arc::new(ConcentrationCheck::new(
            sources.concentration_top10_pct,
            sources.concentration_single_pct,
        ))))
}

fn rate_limited(
    inner: Arc<dyn TokenFactsSource>,
    requests_per_second: u32,
    cooldown: Duration,
) -> Arc<dyn TokenFactsSource> {
    Arc::new(RateLimitedSource::new(inner, requests_per_second, cooldown))
}

async fn health_loop(
    storage: Arc<dyn Storage>,
    metrics: MetricsRegistry,
    queue: Arc<TaskQueue>,
    guard: RugGuard,
    stream: Arc<StreamingClient>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(HEALTH_LOG_INTERVAL);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let healthy = storage.health_check().await.unwrap_or(false);
                let snapshot = metrics.snapshot().await;
                let s = stream.stats();
                let g = guard.stats();
                let source_errors = snapshot
                    .counter_prefix_sum("source.")
                    .saturating_sub(source_ok_total(&snapshot));
                info!(
                    "health: storage={} pending={} in_flight={} | stream seen={} decoded={} dispatched={} failed={} reconnects={} | guard received={} matched={} closed={} forced={} | rescheduled={} pruned={} stale={} source_errors={}",
                    if healthy { "ok" } else { "DOWN" },
                    queue.pending_len().await,
                    queue.in_flight_len().await,
                    s.messages_seen,
                    s.events_decoded,
                    s.events_dispatched,
                    s.dispatch_failures,
                    s.reconnects,
                    g.events_received,
                    g.events_matched,
                    g.positions_closed,
                    g.forced_closures,
                    snapshot.counter("scheduler.rescheduled"),
                    snapshot.counter("scheduler.pruned"),
                    snapshot.counter("scheduler.stale"),
                    source_errors,
                );
            }
            _ = shutdown.changed() => break,
        }
    }
}

fn source_ok_total(snapshot: &MetricsSnapshot) -> u64 {
    snapshot
        .counters
        .iter()
        .filter(|(name, _)| name.starts_with("source.") && name.ends_with(".ok"))
        .map(|(_, count)| *count)
        .sum()
}
