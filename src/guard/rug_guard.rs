//! Emergency close of positions whose pool liquidity was pulled.
//!
//! Per open position: WATCHED -> CLOSING -> CLOSED. A matching
//! liquidity-removal event moves every watched id of that mint into the
//! debounce set and spawns one independent close task per id. Real positions
//! get a timed market sell; any failure on that path falls back to the same
//! forced total-loss closure simulated positions get directly.

use super::watch_index::WatchedMintIndex;
use crate::clock::Clock;
use crate::config::GuardConfig;
use crate::decoder::{DecodedEvent, LiquidityRemovalEvent};
use crate::storage::Storage;
use crate::stream::EventListener;
use crate::trading::{CloseRequest, TradingExecutor};
use crate::types::{CloseReason, Position, PositionClose};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Default)]
pub struct GuardCounters {
    events_received: AtomicU64,
    events_matched: AtomicU64,
    positions_closed: AtomicU64,
    forced_closures: AtomicU64,
    sell_failures: AtomicU64,
}

/// Point-in-time copy of [`GuardCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GuardStats {
    pub events_received: u64,
    pub events_matched: u64,
    pub positions_closed: u64,
    pub forced_closures: u64,
    pub sell_failures: u64,
}

impl GuardCounters {
    pub fn snapshot(&self) -> GuardStats {
        GuardStats {
            events_received: self.events_received.load(Ordering::Relaxed),
            events_matched: self.events_matched.load(Ordering::Relaxed),
            positions_closed: self.positions_closed.load(Ordering::Relaxed),
            forced_closures: self.forced_closures.load(Ordering::Relaxed),
            sell_failures: self.sell_failures.load(Ordering::Relaxed),
        }
    }
}

/// How a close task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Sold through the executor
    Sold,
    /// Terminal total-loss mutation without a sale
    Forced,
    /// Someone else closed it first, or it no longer exists
    AlreadyClosed,
}

struct GuardShared {
    storage: Arc<dyn Storage>,
    executor: Arc<dyn TradingExecutor>,
    clock: Arc<dyn Clock>,
    index: WatchedMintIndex,
    closing: Mutex<HashSet<i64>>,
    counters: GuardCounters,
    refresh_interval: Duration,
    sell_timeout: Duration,
}

#[derive(Clone)]
pub struct RugGuard {
    shared: Arc<GuardShared>,
}

impl RugGuard {
    pub fn new(
        storage: Arc<dyn Storage>,
        executor: Arc<dyn TradingExecutor>,
        clock: Arc<dyn Clock>,
        config: &GuardConfig,
    ) -> Self {
        Self {
            shared: Arc::new(GuardShared {
                storage,
                executor,
                clock,
                index: WatchedMintIndex::new(),
                closing: Mutex::new(HashSet::new()),
                counters: GuardCounters::default(),
                refresh_interval: config.refresh_interval(),
                sell_timeout: config.sell_timeout(),
            }),
        }
    }

    pub fn stats(&self) -> GuardStats {
        self.shared.counters.snapshot()
    }

    pub fn index(&self) -> &WatchedMintIndex {
        &self.shared.index
    }

    /// Rebuild the index from open positions and prune the debounce set to ids still open.
    pub async fn refresh_index(&self) -> Result<usize> {
        let positions = self.shared.storage.get_open_positions().await?;
        let open_ids: HashSet<i64> = positions.iter().map(|p| p.id).collect();

        self.shared.index.replace(&positions).await;
        self.shared
            .closing
            .lock()
            .await
            .retain(|id| open_ids.contains(id));

        debug!("Watched mint index rebuilt with {} open positions", positions.len());
        Ok(positions.len())
    }

    /// Watch a position immediately instead of waiting for the next refresh.
    pub async fn watch_now(&self, position: &Position) {
        if position.is_open() {
            self.shared.index.insert(&position.token, position.id).await;
        }
    }

    /// Handle one liquidity-removal event. Returns the spawned close tasks.
    #[instrument(skip(self, event), fields(mint = %event.mint))]
    pub async fn react(&self, event: &LiquidityRemovalEvent) -> Vec<JoinHandle<()>> {
        let counters = &self.shared.counters;
        counters.events_received.fetch_add(1, Ordering::Relaxed);

        let ids = self.shared.index.ids_for(&event.mint).await;
        if ids.is_empty() {
            return Vec::new();
        }
        counters.events_matched.fetch_add(1, Ordering::Relaxed);
        warn!(
            "Liquidity removed from pool {} for watched mint {} ({} positions)",
            event.pool,
            event.mint,
            ids.len()
        );

        let fresh: Vec<i64> = {
            let mut closing = self.shared.closing.lock().await;
            ids.into_iter().filter(|id| closing.insert(*id)).collect()
        };

        fresh
            .into_iter()
            .map(|id| {
                let guard = self.clone();
                tokio::spawn(async move { guard.close_guarded(id).await })
            })
            .collect()
    }

    /// Close task body. A failed close is retried once as a forced closure;
    /// if that fails too the id leaves the debounce set so the next event can retry.
    async fn close_guarded(&self, position_id: i64) {
        let result = match self.close_one(position_id).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!("Close of position {} failed, forcing: {:#}", position_id, e);
                self.force_close_one(position_id).await
            }
        };
        match result {
            Ok(outcome) => debug!("Position {} close finished: {:?}", position_id, outcome),
            Err(e) => {
                error!("Failed to close position {}: {:#}", position_id, e);
                self.shared.closing.lock().await.remove(&position_id);
            }
        }
    }

    /// Close one position, re-reading it from storage first.
    pub async fn close_one(&self, position_id: i64) -> Result<CloseOutcome> {
        let Some(position) = self.open_position(position_id).await? else {
            return Ok(CloseOutcome::AlreadyClosed);
        };

        let (close, outcome) = if position.is_simulated {
            self.forced_close()
        } else {
            self.sell_or_force(&position).await
        };
        self.apply_close(&position, close, outcome).await
    }

    /// Total-loss closure without going through the executor.
    pub async fn force_close_one(&self, position_id: i64) -> Result<CloseOutcome> {
        let Some(position) = self.open_position(position_id).await? else {
            return Ok(CloseOutcome::AlreadyClosed);
        };
        let (close, outcome) = self.forced_close();
        self.apply_close(&position, close, outcome).await
    }

    async fn open_position(&self, position_id: i64) -> Result<Option<Position>> {
        Ok(self
            .shared
            .storage
            .get_position(position_id)
            .await?
            .filter(|position| position.is_open()))
    }

    async fn apply_close(
        &self,
        position: &Position,
        close: PositionClose,
        outcome: CloseOutcome,
    ) -> Result<CloseOutcome> {
        let shared = &self.shared;
        let position_id = position.id;
        if !shared.storage.close_position(position_id, &close).await? {
            return Ok(CloseOutcome::AlreadyClosed);
        }

        shared.counters.positions_closed.fetch_add(1, Ordering::Relaxed);
        if outcome == CloseOutcome::Forced {
            shared.counters.forced_closures.fetch_add(1, Ordering::Relaxed);
        }
        info!(
            "Closed position {} on {}: {} pnl={:.1}%",
            position_id, position.token, close.reason, close.pnl_pct
        );
        Ok(outcome)
    }

    fn forced_close(&self) -> (PositionClose, CloseOutcome) {
        (
            PositionClose::total_loss(CloseReason::RugLpRemoved, self.shared.clock.now_ms()),
            CloseOutcome::Forced,
        )
    }

    async fn sell_or_force(&self, position: &Position) -> (PositionClose, CloseOutcome) {
        let shared = &self.shared;
        let request = CloseRequest {
            position_id: position.id,
            token: position.token.clone(),
            size_sol: position.size_sol,
            last_price: position.last_price,
            reason: CloseReason::RugLpRemoved,
        };

        match tokio::time::timeout(shared.sell_timeout, shared.executor.close(&request)).await {
            Ok(Ok(fill)) => (
                PositionClose::at_price(
                    position.entry_price,
                    fill.price,
                    CloseReason::RugLpRemoved,
                    shared.clock.now_ms(),
                ),
                CloseOutcome::Sold,
            ),
            Ok(Err(e)) => {
                warn!("Emergency sell of position {} failed: {}", position.id, e);
                shared.counters.sell_failures.fetch_add(1, Ordering::Relaxed);
                self.forced_close()
            }
            Err(_) => {
                warn!(
                    "Emergency sell of position {} timed out after {:?}",
                    position.id, shared.sell_timeout
                );
                shared.counters.sell_failures.fetch_add(1, Ordering::Relaxed);
                self.forced_close()
            }
        }
    }

    /// Refresh the index on a fixed interval until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "RugGuard running, refreshing every {:?}",
            self.shared.refresh_interval
        );
        let mut ticker = tokio::time::interval(self.shared.refresh_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh_index().await {
                        warn!("Failed to refresh watched mint index: {:#}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("RugGuard stopped");
    }
}

#[async_trait]
impl EventListener for RugGuard {
    fn name(&self) -> &str {
        "rug_guard"
    }

    async fn on_event(&self, event: &DecodedEvent) -> Result<()> {
        if let DecodedEvent::LiquidityRemoval(removal) = event {
            self.react(removal).await;
        }
        Ok(())
    }
}
