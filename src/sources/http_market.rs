//! Market data over a DexScreener-style HTTP API.

use super::{SourceCategory, SourceError, TokenFacts, TokenFactsSource};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tokio_retry::{strategy::ExponentialBackoff, RetryIf};
use tracing::{debug, instrument};

#[derive(Debug, Deserialize)]
struct PairsResponse {
    #[serde(default)]
    pairs: Option<Vec<Pair>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Pair {
    #[serde(default)]
    base_token: Option<BaseToken>,
    #[serde(default)]
    price_usd: Option<String>,
    #[serde(default)]
    liquidity: Option<Liquidity>,
    #[serde(default)]
    market_cap: Option<f64>,
    #[serde(default)]
    fdv: Option<f64>,
    #[serde(default)]
    volume: Option<Volume>,
    #[serde(default)]
    info: Option<PairInfo>,
}

#[derive(Debug, Deserialize)]
struct BaseToken {
    name: Option<String>,
    symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Liquidity {
    usd: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Volume {
    h24: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct PairInfo {
    #[serde(default)]
    websites: Vec<serde_json::Value>,
    #[serde(default)]
    socials: Vec<serde_json::Value>,
}

/// Price, liquidity and volume for a mint, taken from its deepest pair.
pub struct HttpMarketSource {
    name: String,
    client: Client,
    base_url: String,
    api_key: Option<String>,
    retry_attempts: usize,
}

impl HttpMarketSource {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            name: "dexscreener".to_string(),
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            retry_attempts: 2,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn with_retry_attempts(mut self, attempts: usize) -> Self {
        self.retry_attempts = attempts;
        self
    }

    async fn fetch_once(&self, mint: &str) -> Result<TokenFacts, SourceError> {
        let url = format!("{}/latest/dex/tokens/{}", self.base_url, mint);
        let mut request = self.client.get(&url).timeout(Duration::from_secs(10));
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SourceError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::from_status(
                status.as_u16(),
                format!("{} returned {}", self.name, status),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| SourceError::Transient(e.to_string()))?;
        parse_pairs(&body)
    }
}

/// Pick the pair with the most liquidity and turn it into facts.
pub(crate) fn parse_pairs(body: &str) -> Result<TokenFacts, SourceError> {
    let response: PairsResponse = serde_json::from_str(body)
        .map_err(|e| SourceError::Transient(format!("malformed market response: {}", e)))?;

    let pair_liquidity = |pair: &Pair| pair.liquidity.as_ref().and_then(|l| l.usd).unwrap_or(0.0);
    let best = response
        .pairs
        .unwrap_or_default()
        .into_iter()
        .max_by(|a, b| pair_liquidity(a).total_cmp(&pair_liquidity(b)))
        .ok_or(SourceError::NotFound)?;

    let social_links = best
        .info
        .as_ref()
        .map(|info| (info.websites.len() + info.socials.len()) as u32);

    Ok(TokenFacts {
        name: best.base_token.as_ref().and_then(|t| t.name.clone()),
        symbol: best.base_token.as_ref().and_then(|t| t.symbol.clone()),
        price_usd: best.price_usd.as_deref().and_then(|p| p.parse().ok()),
        liquidity_usd: best.liquidity.as_ref().and_then(|l| l.usd),
        market_cap_usd: best.market_cap.or(best.fdv),
        volume_24h_usd: best.volume.as_ref().and_then(|v| v.h24),
        social_links,
        ..Default::default()
    })
}

#[async_trait]
impl TokenFactsSource for HttpMarketSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> SourceCategory {
        SourceCategory::Market
    }

    #[instrument(skip(self), fields(source = %self.name))]
    async fn fetch(&self, mint: &str) -> Result<TokenFacts, SourceError> {
        let strategy = ExponentialBackoff::from_millis(100)
            .max_delay(Duration::from_secs(2))
            .take(self.retry_attempts);

        let facts = RetryIf::spawn(strategy, || self.fetch_once(mint), SourceError::is_retryable).await?;
        debug!("Market facts for {}: price={:?}", mint, facts.price_usd);
        Ok(facts)
    }
}
