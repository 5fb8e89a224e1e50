//! Reconnect delays built from `tokio-retry` strategies.

use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};

/// Doubling delays starting at `initial`, capped at `max`. Never ends.
pub fn reconnect_schedule(initial: Duration, max: Duration) -> ExponentialBackoff {
    let half_ms = (initial.as_millis() as u64 / 2).max(1);
    ExponentialBackoff::from_millis(2)
        .factor(half_ms)
        .max_delay(max.max(initial))
}

/// Jittered reconnect delays. Build a fresh iterator to start over from `initial`.
pub fn reconnect_delays(initial: Duration, max: Duration) -> impl Iterator<Item = Duration> {
    reconnect_schedule(initial, max).map(jitter)
}
