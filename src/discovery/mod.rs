//! Token discovery: launch events, graduations and the pull feed.
//!
//! The first sighting of a mint creates its token record and schedules the
//! first stage. Later sightings only fill launch fields that are still empty.

pub mod feed;

pub use feed::{FeedRecord, PollingFeed};

use crate::clock::Clock;
use crate::decoder::launch::{INITIAL_VIRTUAL_SOL_RESERVES, INITIAL_VIRTUAL_TOKEN_RESERVES};
use crate::decoder::{DecodedEvent, MigrationEvent, NewTokenEvent};
use crate::metrics::MetricsRegistry;
use crate::scheduler::{EnrichmentTask, PriorityClass, TaskQueue};
use crate::storage::Storage;
use crate::stream::EventListener;
use crate::types::{DiscoverySource, Token, TokenFill};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// What a graduation event led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationAction {
    /// The pending task was moved to now with urgent priority
    PulledForward,
    /// Unknown token, registered and scheduled urgently
    Registered,
    /// Known token with nothing pending (in flight, pruned or finished)
    NothingPending,
    /// The transaction did not reveal the mint
    NoMint,
}

pub struct Discovery {
    storage: Arc<dyn Storage>,
    queue: Arc<TaskQueue>,
    clock: Arc<dyn Clock>,
    metrics: MetricsRegistry,
    first_offset_ms: u64,
}

impl Discovery {
    pub fn new(
        storage: Arc<dyn Storage>,
        queue: Arc<TaskQueue>,
        clock: Arc<dyn Clock>,
        metrics: MetricsRegistry,
        first_offset_ms: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            storage,
            queue,
            clock,
            metrics,
            first_offset_ms,
        })
    }

    /// Insert the token if new and schedule its first stage. Returns true for a new token.
    pub async fn register(&self, token: Token, priority: PriorityClass) -> Result<bool> {
        if !self.storage.insert_token_if_absent(&token).await? {
            let fill = TokenFill {
                creator: token.creator.clone(),
                bonding_curve: token.bonding_curve.clone(),
                name: token.name.clone(),
                symbol: token.symbol.clone(),
                uri: token.uri.clone(),
            };
            if !fill.is_empty() {
                self.storage.fill_token_fields(&token.address, &fill).await?;
            }
            debug!("{} already known", token.address);
            return Ok(false);
        }

        let task = EnrichmentTask::first_stage(
            token.address.clone(),
            token.discovered_at,
            self.first_offset_ms,
            priority,
        );
        self.queue.push(task).await?;
        self.metrics
            .increment_counter(&format!("discovery.{}", token.source.as_str()))
            .await;
        info!(
            "Discovered {} ({}) via {}",
            token.address,
            token.symbol.as_deref().unwrap_or("?"),
            token.source.as_str()
        );
        Ok(true)
    }

    #[instrument(skip(self, event), fields(mint = %event.mint))]
    pub async fn on_new_token(&self, event: &NewTokenEvent) -> Result<bool> {
        let mut token = Token::new(
            event.mint.clone(),
            DiscoverySource::LaunchStream,
            self.clock.now_ms(),
        );
        token.creator = Some(event.creator.clone());
        token.bonding_curve = Some(event.bonding_curve.clone());
        token.name = Some(event.name.clone());
        token.symbol = Some(event.symbol.clone());
        token.uri = Some(event.uri.clone());
        token.initial_virtual_sol_reserves = Some(INITIAL_VIRTUAL_SOL_RESERVES);
        token.initial_virtual_token_reserves = Some(INITIAL_VIRTUAL_TOKEN_RESERVES);
        self.register(token, PriorityClass::Normal).await
    }

    pub async fn on_feed_record(&self, record: &FeedRecord) -> Result<bool> {
        let mut token = Token::new(record.mint.clone(), DiscoverySource::Feed, self.clock.now_ms());
        token.creator = record.creator.clone();
        token.name = record.name.clone();
        token.symbol = record.symbol.clone();
        token.uri = record.uri.clone();
        self.register(token, PriorityClass::Normal).await
    }

    /// A graduation pulls pending work forward; unknown mints are registered urgently.
    pub async fn on_migration(&self, event: &MigrationEvent) -> Result<MigrationAction> {
        let Some(mint) = event.mint.as_deref() else {
            debug!("Migration {} without a resolvable mint", event.signature);
            self.metrics.increment_counter("discovery.migration_no_mint").await;
            return Ok(MigrationAction::NoMint);
        };
        let now = self.clock.now_ms();

        let mut token = Token::new(mint, DiscoverySource::Migration, now);
        token.migrated_at = Some(now);
        if self.storage.insert_token_if_absent(&token).await? {
            self.queue
                .push(EnrichmentTask::first_stage(mint, now, 0, PriorityClass::Urgent))
                .await?;
            self.metrics.increment_counter("discovery.migration").await;
            info!("Graduated token {} was unknown, scheduled urgently", mint);
            return Ok(MigrationAction::Registered);
        }

        self.storage.mark_migrated(mint, now).await?;
        if self.queue.pull_forward(mint, now).await? {
            Ok(MigrationAction::PulledForward)
        } else {
            debug!("{} graduated with no pending task", mint);
            Ok(MigrationAction::NothingPending)
        }
    }
}

#[async_trait]
impl EventListener for Discovery {
    fn name(&self) -> &str {
        "discovery"
    }

    async fn on_event(&self, event: &DecodedEvent) -> Result<()> {
        match event {
            DecodedEvent::NewToken(created) => {
                self.on_new_token(created).await?;
            }
            DecodedEvent::Migration(migration) => {
                self.on_migration(migration).await?;
            }
            DecodedEvent::Trade(_) | DecodedEvent::LiquidityRemoval(_) => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::SqliteStorage;

    async fn create_test_discovery(
        now: u64,
    ) -> (Arc<Discovery>, Arc<TaskQueue>, Arc<SqliteStorage>) {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(now));
        let queue = TaskQueue::new(storage.clone(), clock.clone());
        let discovery = Discovery::new(
            storage.clone(),
            queue.clone(),
            clock,
            MetricsRegistry::new(),
            5_000,
        );
        (discovery, queue, storage)
    }

    fn created(mint: &str) -> NewTokenEvent {
        NewTokenEvent {
            signature: "sig".to_string(),
            mint: mint.to_string(),
            creator: "creator".to_string(),
            bonding_curve: "curve".to_string(),
            name: "Test".to_string(),
            symbol: "TST".to_string(),
            uri: "https://example.invalid/meta.json".to_string(),
        }
    }

    #[tokio::test]
    async fn test_first_sighting_schedules_once() {
        let (discovery, queue, storage) = create_test_discovery(1_000).await;

        assert!(discovery.on_new_token(&created("mint-a")).await.unwrap());
        assert!(!discovery.on_new_token(&created("mint-a")).await.unwrap());

        let task = queue.pending_task("mint-a").await.unwrap();
        assert_eq!(task.scheduled_time, 6_000);
        assert_eq!(task.discovery_time, 1_000);

        let token = storage.get_token("mint-a").await.unwrap().unwrap();
        assert_eq!(token.creator.as_deref(), Some("creator"));
        assert_eq!(token.initial_virtual_sol_reserves, Some(INITIAL_VIRTUAL_SOL_RESERVES));
    }

    #[tokio::test]
    async fn test_migration_paths() {
        let (discovery, queue, storage) = create_test_discovery(10_000).await;
        discovery.on_new_token(&created("known")).await.unwrap();

        let migration = |mint: Option<&str>| MigrationEvent {
            signature: "mig".to_string(),
            mint: mint.map(str::to_string),
        };

        assert_eq!(
            discovery.on_migration(&migration(Some("known"))).await.unwrap(),
            MigrationAction::PulledForward
        );
        let task = queue.pending_task("known").await.unwrap();
        assert_eq!(task.priority, PriorityClass::Urgent);
        assert_eq!(task.scheduled_time, 10_000);
        assert!(storage.get_token("known").await.unwrap().unwrap().migrated_at.is_some());

        assert_eq!(
            discovery.on_migration(&migration(Some("fresh"))).await.unwrap(),
            MigrationAction::Registered
        );
        let token = storage.get_token("fresh").await.unwrap().unwrap();
        assert_eq!(token.source, DiscoverySource::Migration);
        assert_eq!(queue.pending_task("fresh").await.unwrap().scheduled_time, 10_000);

        assert_eq!(
            discovery.on_migration(&migration(None)).await.unwrap(),
            MigrationAction::NoMint
        );
    }
}
