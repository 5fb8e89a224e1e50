//! Tests for the rug guard reacting to liquidity removal

mod common;

use async_trait::async_trait;
use common::{create_harness, FlakyStorage, Harness, T0};
use mint_sentry::config::GuardConfig;
use mint_sentry::decoder::{DecodedEvent, LiquidityRemovalEvent};
use mint_sentry::guard::{CloseOutcome, RugGuard};
use mint_sentry::storage::{SqliteStorage, Storage};
use mint_sentry::stream::EventListener;
use mint_sentry::trading::{
    CloseRequest, ExecutionError, Fill, OpenRequest, PaperExecutor, TradingExecutor,
};
use mint_sentry::types::{CloseReason, NewPosition, PositionStatus};
use std::sync::Arc;
use std::time::Duration;

/// Live executor whose sells either fill, fail or hang.
enum LiveExecutor {
    Fills(f64),
    Rejects,
    Hangs,
}

#[async_trait]
impl TradingExecutor for LiveExecutor {
    fn is_simulated(&self) -> bool {
        false
    }

    async fn open(&self, request: &OpenRequest) -> Result<Fill, ExecutionError> {
        Ok(Fill {
            price: request.price,
            size_sol: request.size_sol,
            signature: Some("open-sig".to_string()),
        })
    }

    async fn close(&self, request: &CloseRequest) -> Result<Fill, ExecutionError> {
        match self {
            LiveExecutor::Fills(price) => Ok(Fill {
                price: *price,
                size_sol: request.size_sol,
                signature: Some("close-sig".to_string()),
            }),
            LiveExecutor::Rejects => Err(ExecutionError::Rejected("no route".to_string())),
            LiveExecutor::Hangs => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Err(ExecutionError::Failed("unreachable".to_string()))
            }
        }
    }
}

fn removal(mint: &str, signature: &str) -> LiquidityRemovalEvent {
    LiquidityRemovalEvent {
        signature: signature.to_string(),
        pool: "pool".to_string(),
        mint: mint.to_string(),
        lp_amount: Some(1_000),
    }
}

async fn open_position(h: &Harness, mint: &str, simulated: bool) -> i64 {
    h.storage
        .insert_position(&NewPosition {
            token: mint.to_string(),
            is_simulated: simulated,
            entry_price: 0.002,
            size_sol: 0.5,
            opened_at: T0,
        })
        .await
        .expect("Failed to insert position")
}

fn guard_with(h: &Harness, executor: Arc<dyn TradingExecutor>) -> RugGuard {
    guard_over(h, h.storage.clone(), executor)
}

fn guard_over(h: &Harness, storage: Arc<dyn Storage>, executor: Arc<dyn TradingExecutor>) -> RugGuard {
    let config = GuardConfig {
        refresh_interval_secs: 30,
        sell_timeout_ms: 100,
    };
    RugGuard::new(storage, executor, h.clock.clone(), &config)
}

fn flaky(storage: &Arc<SqliteStorage>) -> FlakyStorage {
    FlakyStorage::new(storage.clone())
}

async fn settle(handles: Vec<tokio::task::JoinHandle<()>>) -> usize {
    let count = handles.len();
    for handle in handles {
        handle.await.expect("close task panicked");
    }
    count
}

#[tokio::test]
async fn test_one_event_closes_every_position_on_the_mint() {
    let h = create_harness(T0).await;
    let mut rugged = Vec::new();
    for _ in 0..3 {
        rugged.push(open_position(&h, "rugged", true).await);
    }
    let bystander = open_position(&h, "healthy", true).await;

    let guard = guard_with(&h, Arc::new(PaperExecutor));
    assert_eq!(guard.refresh_index().await.unwrap(), 4);

    h.clock.set(T0 + 90_000);
    assert_eq!(settle(guard.react(&removal("rugged", "sig-1")).await).await, 3);

    for id in rugged {
        let position = h.storage.get_position(id).await.unwrap().unwrap();
        assert_eq!(position.status, PositionStatus::Closed);
        assert_eq!(position.close_reason, Some(CloseReason::RugLpRemoved));
        assert_eq!(position.pnl_pct, Some(-100.0));
        assert_eq!(position.closed_at, Some(T0 + 90_000));
    }
    let untouched = h.storage.get_position(bystander).await.unwrap().unwrap();
    assert!(untouched.is_open());

    // Redundant delivery of the same removal
    assert_eq!(settle(guard.react(&removal("rugged", "sig-2")).await).await, 0);

    let stats = guard.stats();
    assert_eq!(stats.events_received, 2);
    assert_eq!(stats.positions_closed, 3);
    assert_eq!(stats.forced_closures, 3);
}

#[tokio::test]
async fn test_unwatched_mint_only_counts_the_event() {
    let h = create_harness(T0).await;
    let id = open_position(&h, "watched", true).await;
    let guard = guard_with(&h, Arc::new(PaperExecutor));
    guard.refresh_index().await.unwrap();

    assert_eq!(settle(guard.react(&removal("stranger", "sig")).await).await, 0);

    let stats = guard.stats();
    assert_eq!(stats.events_received, 1);
    assert_eq!(stats.events_matched, 0);
    assert_eq!(stats.positions_closed, 0);
    assert!(h.storage.get_position(id).await.unwrap().unwrap().is_open());
}

#[tokio::test]
async fn test_position_opened_after_refresh_is_invisible_until_watched() {
    let h = create_harness(T0).await;
    let guard = guard_with(&h, Arc::new(PaperExecutor));
    guard.refresh_index().await.unwrap();

    let id = open_position(&h, "late", true).await;
    assert_eq!(settle(guard.react(&removal("late", "sig-1")).await).await, 0);

    let position = h.storage.get_position(id).await.unwrap().unwrap();
    guard.watch_now(&position).await;
    assert_eq!(settle(guard.react(&removal("late", "sig-2")).await).await, 1);
    assert!(!h.storage.get_position(id).await.unwrap().unwrap().is_open());
}

#[tokio::test]
async fn test_live_sell_fills_at_market() {
    let h = create_harness(T0).await;
    let id = open_position(&h, "live", false).await;
    let guard = guard_with(&h, Arc::new(LiveExecutor::Fills(0.001)));
    guard.refresh_index().await.unwrap();

    assert_eq!(guard.close_one(id).await.unwrap(), CloseOutcome::Sold);
    let position = h.storage.get_position(id).await.unwrap().unwrap();
    assert_eq!(position.exit_price, Some(0.001));
    assert_eq!(position.close_reason, Some(CloseReason::RugLpRemoved));
    assert!((position.pnl_pct.unwrap() + 50.0).abs() < 1e-9);
    assert_eq!(guard.stats().forced_closures, 0);
}

#[tokio::test]
async fn test_failed_or_hung_sell_forces_total_loss() {
    for executor in [LiveExecutor::Rejects, LiveExecutor::Hangs] {
        let h = create_harness(T0).await;
        let id = open_position(&h, "live", false).await;
        let guard = guard_with(&h, Arc::new(executor));
        guard.refresh_index().await.unwrap();

        assert_eq!(settle(guard.react(&removal("live", "sig")).await).await, 1);

        let position = h.storage.get_position(id).await.unwrap().unwrap();
        assert_eq!(position.status, PositionStatus::Closed);
        assert_eq!(position.pnl_pct, Some(-100.0));
        let stats = guard.stats();
        assert_eq!(stats.sell_failures, 1);
        assert_eq!(stats.forced_closures, 1);

        assert_eq!(guard.close_one(id).await.unwrap(), CloseOutcome::AlreadyClosed);
    }
}

#[tokio::test]
async fn test_listener_ignores_other_events() {
    let h = create_harness(T0).await;
    let id = open_position(&h, "mint", true).await;
    let guard = guard_with(&h, Arc::new(PaperExecutor));
    guard.refresh_index().await.unwrap();

    let migration = DecodedEvent::Migration(mint_sentry::decoder::MigrationEvent {
        signature: "sig".to_string(),
        mint: Some("mint".to_string()),
    });
    guard.on_event(&migration).await.unwrap();

    assert_eq!(guard.stats().events_received, 0);
    assert!(h.storage.get_position(id).await.unwrap().unwrap().is_open());
}

#[tokio::test]
async fn test_failed_close_is_retried_as_forced_closure() {
    let h = create_harness(T0).await;
    let id = open_position(&h, "live", false).await;
    let storage = Arc::new(flaky(&h.storage).fail_closes(1));
    let guard = guard_over(&h, storage, Arc::new(LiveExecutor::Fills(0.001)));
    guard.refresh_index().await.unwrap();

    assert_eq!(settle(guard.react(&removal("live", "sig")).await).await, 1);

    let position = h.storage.get_position(id).await.unwrap().unwrap();
    assert_eq!(position.status, PositionStatus::Closed);
    assert_eq!(position.close_reason, Some(CloseReason::RugLpRemoved));
    assert_eq!(position.pnl_pct, Some(-100.0));
    assert_eq!(guard.stats().forced_closures, 1);
}

#[tokio::test]
async fn test_unclosable_position_is_released_for_the_next_event() {
    let h = create_harness(T0).await;
    let id = open_position(&h, "stuck", true).await;
    let storage = Arc::new(flaky(&h.storage).fail_closes(2));
    let guard = guard_over(&h, storage, Arc::new(PaperExecutor));
    guard.refresh_index().await.unwrap();

    assert_eq!(settle(guard.react(&removal("stuck", "sig-1")).await).await, 1);
    assert!(h.storage.get_position(id).await.unwrap().unwrap().is_open());

    guard.refresh_index().await.unwrap();
    assert_eq!(settle(guard.react(&removal("stuck", "sig-2")).await).await, 1);

    let position = h.storage.get_position(id).await.unwrap().unwrap();
    assert_eq!(position.status, PositionStatus::Closed);
    assert_eq!(position.pnl_pct, Some(-100.0));
    assert_eq!(guard.stats().positions_closed, 1);
}
