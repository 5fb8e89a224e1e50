//! Runtime configuration.
//!
//! Loaded from an optional JSON file named by `MINT_SENTRY_CONFIG`, then
//! overridden by individual `MINT_SENTRY_*` environment variables. Every
//! section has defaults so an empty file (or none) yields a runnable setup.

use crate::scheduler::stage::StageTable;
use crate::scoring::ScoreWeights;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "MINT_SENTRY_CONFIG";
const ENV_PREFIX: &str = "MINT_SENTRY_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Websocket endpoint for `transactionSubscribe`
    pub ws_url: String,
    pub api_key: Option<String>,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
    /// Connection age after which the backoff resets
    pub stable_after_secs: u64,
    /// Reconnect when nothing arrives for this long
    pub idle_timeout_secs: u64,
    pub dispatch_timeout_ms: u64,
    pub dedupe_ttl_secs: u64,
    pub shutdown_grace_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://atlas-mainnet.helius-rpc.com".to_string(),
            api_key: None,
            reconnect_initial_ms: 2_000,
            reconnect_max_ms: 30_000,
            stable_after_secs: 60,
            idle_timeout_secs: 60,
            dispatch_timeout_ms: 5_000,
            dedupe_ttl_secs: 120,
            shutdown_grace_ms: 2_000,
        }
    }
}

impl StreamConfig {
    /// Endpoint with the api key appended when one is configured.
    pub fn endpoint(&self) -> String {
        match &self.api_key {
            Some(key) if !key.is_empty() => {
                let sep = if self.ws_url.contains('?') { '&' } else { '?' };
                format!("{}{}api-key={}", self.ws_url, sep, key)
            }
            _ => self.ws_url.clone(),
        }
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub workers: usize,
    /// Per-lookup timeout inside a fan-out batch
    pub lookup_timeout_ms: u64,
    /// Upper bound on how long an idle worker sleeps before re-checking the queue
    pub idle_poll_ms: u64,
    /// Processing attempts per stage before the task is dropped
    pub max_attempts: u32,
    pub stages: StageTable,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            lookup_timeout_ms: 3_000,
            idle_poll_ms: 500,
            max_attempts: 3,
            stages: StageTable::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub rpc_url: String,
    pub market_api_url: String,
    pub market_api_key: Option<String>,
    pub requests_per_second: u32,
    pub rate_limit_cooldown_secs: u64,
    pub retry_attempts: usize,
    pub concentration_top10_pct: f64,
    pub concentration_single_pct: f64,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
            market_api_url: "https://api.dexscreener.com".to_string(),
            market_api_key: None,
            requests_per_second: 5,
            rate_limit_cooldown_secs: 30,
            retry_attempts: 2,
            concentration_top10_pct: 50.0,
            concentration_single_pct: 20.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// How often the watched mint index is rebuilt from open positions
    pub refresh_interval_secs: u64,
    /// Bound on an emergency market sell before forcing closure
    pub sell_timeout_ms: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 30,
            sell_timeout_ms: 5_000,
        }
    }
}

impl GuardConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn sell_timeout(&self) -> Duration {
        Duration::from_millis(self.sell_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    pub buy_threshold: u8,
    pub strong_buy_threshold: u8,
    pub position_size_sol: f64,
    /// Open paper positions instead of live ones
    pub simulated: bool,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            buy_threshold: 60,
            strong_buy_threshold: 80,
            position_size_sol: 0.1,
            simulated: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:./mint-sentry.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Pull feed endpoint; the feed is disabled when unset
    pub url: Option<String>,
    pub poll_interval_secs: u64,
    pub dedupe_ttl_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: None,
            poll_interval_secs: 30,
            dedupe_ttl_secs: 3_600,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub stream: StreamConfig,
    pub scheduler: SchedulerConfig,
    pub sources: SourcesConfig,
    pub guard: GuardConfig,
    pub trading: TradingConfig,
    pub storage: StorageConfig,
    pub feed: FeedConfig,
    pub scoring: ScoreWeights,
}

impl AppConfig {
    /// Defaults, then the file named by `MINT_SENTRY_CONFIG`, then environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Apply `MINT_SENTRY_*` overrides through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(v) = get("WS_URL") {
            self.stream.ws_url = v;
        }
        if let Some(v) = get("API_KEY") {
            self.stream.api_key = Some(v);
        }
        if let Some(v) = get("RPC_URL") {
            self.sources.rpc_url = v;
        }
        if let Some(v) = get("MARKET_API_URL") {
            self.sources.market_api_url = v;
        }
        if let Some(v) = get("MARKET_API_KEY") {
            self.sources.market_api_key = Some(v);
        }
        if let Some(v) = get("DATABASE_URL") {
            self.storage.database_url = v;
        }
        if let Some(v) = get("FEED_URL") {
            self.feed.url = Some(v);
        }
        if let Some(v) = get("WORKERS") {
            self.scheduler.workers = v
                .parse()
                .with_context(|| format!("Invalid {}WORKERS '{}'", ENV_PREFIX, v))?;
        }
        if let Some(v) = get("BUY_THRESHOLD") {
            self.trading.buy_threshold = v
                .parse()
                .with_context(|| format!("Invalid {}BUY_THRESHOLD '{}'", ENV_PREFIX, v))?;
        }
        if let Some(v) = get("SIMULATED") {
            self.trading.simulated = matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.scheduler.workers == 0 {
            return Err(anyhow!("scheduler.workers must be at least 1"));
        }
        if self.scheduler.max_attempts == 0 {
            return Err(anyhow!("scheduler.max_attempts must be at least 1"));
        }
        if self.trading.strong_buy_threshold < self.trading.buy_threshold {
            return Err(anyhow!(
                "trading.strong_buy_threshold ({}) is below buy_threshold ({})",
                self.trading.strong_buy_threshold,
                self.trading.buy_threshold
            ));
        }
        if self.stream.reconnect_initial_ms == 0 || self.stream.reconnect_max_ms < self.stream.reconnect_initial_ms {
            return Err(anyhow!("stream reconnect bounds are inconsistent"));
        }
        Ok(())
    }
}

/// Builder with the defaults and `with_*` overrides.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: AppConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.config.storage.database_url = url.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.config.scheduler.workers = workers;
        self
    }

    pub fn with_stages(mut self, stages: StageTable) -> Self {
        self.config.scheduler.stages = stages;
        self
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.config.scheduler.lookup_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_idle_poll(mut self, poll: Duration) -> Self {
        self.config.scheduler.idle_poll_ms = poll.as_millis() as u64;
        self
    }

    pub fn with_buy_thresholds(mut self, buy: u8, strong_buy: u8) -> Self {
        self.config.trading.buy_threshold = buy;
        self.config.trading.strong_buy_threshold = strong_buy;
        self
    }

    pub fn with_guard_refresh(mut self, interval: Duration) -> Self {
        self.config.guard.refresh_interval_secs = interval.as_secs();
        self
    }

    pub fn with_feed_url(mut self, url: impl Into<String>) -> Self {
        self.config.feed.url = Some(url.into());
        self
    }

    pub fn with_scoring(mut self, weights: ScoreWeights) -> Self {
        self.config.scoring = weights;
        self
    }

    pub fn build(self) -> Result<AppConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.guard.refresh_interval_secs, 30);
        assert_eq!(config.stream.reconnect_initial_ms, 2_000);
        assert_eq!(config.stream.reconnect_max_ms, 30_000);
        assert_eq!(config.stream.dispatch_timeout(), Duration::from_secs(5));
        assert_eq!(config.trading.buy_threshold, 60);
        assert_eq!(config.scheduler.stages.len(), 6);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"scheduler": {{"workers": 2}}, "trading": {{"buy_threshold": 70}}}}"#).unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.scheduler.workers, 2);
        assert_eq!(config.scheduler.lookup_timeout_ms, 3_000);
        assert_eq!(config.trading.buy_threshold, 70);
        assert_eq!(config.trading.strong_buy_threshold, 80);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("MINT_SENTRY_WORKERS", "8"),
            ("MINT_SENTRY_API_KEY", "secret"),
            ("MINT_SENTRY_SIMULATED", "false"),
        ]);
        let mut config = AppConfig::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.scheduler.workers, 8);
        assert!(!config.trading.simulated);
        assert_eq!(
            config.stream.endpoint(),
            "wss://atlas-mainnet.helius-rpc.com?api-key=secret"
        );

        let mut broken = AppConfig::default();
        assert!(broken
            .apply_overrides(|key| (key == "MINT_SENTRY_WORKERS").then(|| "many".to_string()))
            .is_err());
    }

    #[test]
    fn test_builder_validates() {
        let config = ConfigBuilder::new()
            .with_workers(1)
            .with_buy_thresholds(55, 75)
            .with_database_url("sqlite::memory:")
            .build()
            .unwrap();
        assert_eq!(config.trading.buy_threshold, 55);
        assert_eq!(config.storage.database_url, "sqlite::memory:");

        assert!(ConfigBuilder::new().with_workers(0).build().is_err());
        assert!(ConfigBuilder::new().with_buy_thresholds(80, 60).build().is_err());
    }
}
