//! Named counters and gauges shared by the pipeline.
//!
//! Per-source lookup outcomes, stage outcomes and queue depth land here; the
//! health loop in the binary logs a snapshot periodically.

use crate::sources::SourceError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// Registry of named metrics.
#[derive(Clone, Default)]
pub struct MetricsRegistry {
    metrics: Arc<RwLock<InternalMetrics>>,
}

#[derive(Debug, Default)]
struct InternalMetrics {
    counters: HashMap<String, u64>,
    gauges: HashMap<String, f64>,
    /// Sum and count per timing metric
    timings: HashMap<String, (f64, u64)>,
    last_updates: HashMap<String, Instant>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter metric.
    pub async fn increment_counter(&self, name: &str) {
        self.add_counter(name, 1).await;
    }

    #[instrument(skip(self), fields(metric = %name))]
    pub async fn add_counter(&self, name: &str, value: u64) {
        let mut metrics = self.metrics.write().await;
        *metrics.counters.entry(name.to_string()).or_insert(0) += value;
        metrics.last_updates.insert(name.to_string(), Instant::now());
        debug!("Counter {} += {}", name, value);
    }

    pub async fn set_gauge(&self, name: &str, value: f64) {
        let mut metrics = self.metrics.write().await;
        metrics.gauges.insert(name.to_string(), value);
        metrics.last_updates.insert(name.to_string(), Instant::now());
    }

    /// Record a duration; the snapshot reports the running average.
    pub async fn record_timing(&self, name: &str, duration: Duration) {
        let mut metrics = self.metrics.write().await;
        let entry = metrics.timings.entry(name.to_string()).or_insert((0.0, 0));
        entry.0 += duration.as_secs_f64();
        entry.1 += 1;
        metrics.last_updates.insert(name.to_string(), Instant::now());
    }

    /// Count one lookup outcome as `source.<name>.ok` or `source.<name>.<error kind>`.
    pub async fn record_source_result<T>(&self, source: &str, result: &Result<T, SourceError>) {
        let outcome = match result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        self.increment_counter(&format!("source.{}.{}", source, outcome)).await;
    }

    pub async fn get_counter(&self, name: &str) -> u64 {
        self.metrics.read().await.counters.get(name).copied().unwrap_or(0)
    }

    pub async fn get_gauge(&self, name: &str) -> Option<f64> {
        self.metrics.read().await.gauges.get(name).copied()
    }

    /// Seconds since a metric last changed.
    pub async fn age_of(&self, name: &str) -> Option<Duration> {
        self.metrics
            .read()
            .await
            .last_updates
            .get(name)
            .map(|at| at.elapsed())
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        let metrics = self.metrics.read().await;
        MetricsSnapshot {
            counters: metrics.counters.clone(),
            gauges: metrics.gauges.clone(),
            average_timings: metrics
                .timings
                .iter()
                .map(|(name, (sum, count))| (name.clone(), sum / (*count).max(1) as f64))
                .collect(),
            timestamp: Instant::now(),
        }
    }
}

/// Snapshot of current metrics.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub counters: HashMap<String, u64>,
    pub gauges: HashMap<String, f64>,
    /// Average seconds per timing metric
    pub average_timings: HashMap<String, f64>,
    pub timestamp: Instant,
}

impl MetricsSnapshot {
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    /// Sum of every counter whose name starts with `prefix`.
    pub fn counter_prefix_sum(&self, prefix: &str) -> u64 {
        self.counters
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(_, value)| *value)
            .sum()
    }
}
