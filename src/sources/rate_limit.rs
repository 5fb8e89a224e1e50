//! Per-source request pacing around `governor`.
//!
//! Every call waits for a permit from a direct rate limiter. When the upstream
//! answers with [`SourceError::RateLimited`] the wrapper backs off for a
//! cooldown window and short-circuits calls until it expires.

use super::{SourceCategory, SourceError, TokenFacts, TokenFactsSource};
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const DEFAULT_REQUESTS_PER_SECOND: NonZeroU32 = match NonZeroU32::new(5) {
    Some(value) => value,
    None => unreachable!(),
};

/// Wraps any [`TokenFactsSource`] with a request quota and a 429 cooldown.
pub struct RateLimitedSource {
    inner: Arc<dyn TokenFactsSource>,
    limiter: DefaultDirectRateLimiter,
    cooldown: Duration,
    cooldown_until: Mutex<Option<Instant>>,
}

impl RateLimitedSource {
    pub fn new(inner: Arc<dyn TokenFactsSource>, requests_per_second: u32, cooldown: Duration) -> Self {
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(DEFAULT_REQUESTS_PER_SECOND);
        Self {
            inner,
            limiter: RateLimiter::direct(Quota::per_second(rps)),
            cooldown,
            cooldown_until: Mutex::new(None),
        }
    }

    fn in_cooldown(&self) -> bool {
        let mut guard = match self.cooldown_until.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match *guard {
            Some(until) if Instant::now() < until => true,
            Some(_) => {
                *guard = None;
                false
            }
            None => false,
        }
    }

    fn start_cooldown(&self) {
        let mut guard = match self.cooldown_until.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(Instant::now() + self.cooldown);
    }
}

#[async_trait]
impl TokenFactsSource for RateLimitedSource {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn category(&self) -> SourceCategory {
        self.inner.category()
    }

    async fn fetch(&self, mint: &str) -> Result<TokenFacts, SourceError> {
        if self.in_cooldown() {
            debug!("{} in cooldown, skipping lookup for {}", self.inner.name(), mint);
            return Err(SourceError::RateLimited);
        }

        self.limiter.until_ready().await;

        let result = self.inner.fetch(mint).await;
        if matches!(result, Err(SourceError::RateLimited)) {
            warn!(
                "{} rate limited upstream, cooling down for {:?}",
                self.inner.name(),
                self.cooldown
            );
            self.start_cooldown();
        }
        result
    }
}
