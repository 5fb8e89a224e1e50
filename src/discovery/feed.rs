//! Secondary discovery over a periodically pulled JSON feed of recent tokens.

use super::Discovery;
use anyhow::{anyhow, Context, Result};
use moka::future::Cache;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// One token record from the feed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FeedRecord {
    #[serde(alias = "address", alias = "tokenAddress")]
    pub mint: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default, alias = "metadata_uri")]
    pub uri: Option<String>,
    #[serde(default, alias = "deployer")]
    pub creator: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeedBody {
    List(Vec<FeedRecord>),
    Wrapped {
        #[serde(alias = "data", alias = "coins")]
        tokens: Vec<FeedRecord>,
    },
}

/// Accepts a bare array or an object wrapping it.
pub fn parse_records(body: &str) -> Result<Vec<FeedRecord>> {
    let parsed: FeedBody = serde_json::from_str(body).context("Malformed feed response")?;
    Ok(match parsed {
        FeedBody::List(records) => records,
        FeedBody::Wrapped { tokens } => tokens,
    })
}

pub struct PollingFeed {
    client: Client,
    url: String,
    discovery: Arc<Discovery>,
    seen: Cache<String, ()>,
    poll_interval: Duration,
}

impl PollingFeed {
    pub fn new(
        client: Client,
        url: impl Into<String>,
        discovery: Arc<Discovery>,
        poll_interval: Duration,
        dedupe_ttl: Duration,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            discovery,
            seen: Cache::builder()
                .max_capacity(50_000)
                .time_to_live(dedupe_ttl)
                .build(),
            poll_interval,
        }
    }

    /// Feed records not seen recently into discovery. Returns how many were new tokens.
    pub async fn ingest_records(&self, records: Vec<FeedRecord>) -> Result<usize> {
        let mut registered = 0;
        for record in records {
            if record.mint.is_empty() || self.seen.contains_key(&record.mint) {
                continue;
            }
            self.seen.insert(record.mint.clone(), ()).await;
            if self.discovery.on_feed_record(&record).await? {
                registered += 1;
            }
        }
        Ok(registered)
    }

    pub async fn poll_once(&self) -> Result<usize> {
        let response = self
            .client
            .get(&self.url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .context("Feed request failed")?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Feed returned {}", status));
        }
        let body = response.text().await.context("Failed to read feed body")?;
        self.ingest_records(parse_records(&body)?).await
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Polling discovery feed {} every {:?}", self.url, self.poll_interval);
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.poll_once().await {
                        Ok(0) => {}
                        Ok(n) => debug!("Feed produced {} new tokens", n),
                        Err(e) => warn!("Feed poll failed: {:#}", e),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("Discovery feed stopped");
    }
}
