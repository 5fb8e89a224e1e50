//! Generic "fetch token facts" capability consumed by the enrichment workers.
//!
//! A source returns a best-effort [`TokenFacts`] snapshot or a typed
//! [`SourceError`]. Sources are grouped by [`SourceCategory`] so each stage can
//! pick which ones it queries. Holder checks are second-wave lookups that need
//! the first wave's holder list as input.

pub mod holders;
pub mod http_market;
pub mod rate_limit;
pub mod rpc_mint;

pub use holders::ConcentrationCheck;
pub use http_market::HttpMarketSource;
pub use rate_limit::RateLimitedSource;
pub use rpc_mint::{RpcHoldersSource, RpcMintSource};

use crate::types::Address;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Groups of sources a stage can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceCategory {
    /// Price, liquidity, volume
    Market,
    /// Authorities, LP state
    Security,
    /// Holder count and distribution
    Holders,
    /// Links and community
    Social,
}

/// Typed lookup failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    #[error("token not found")]
    NotFound,
    #[error("rate limited")]
    RateLimited,
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("authentication rejected: {0}")]
    FatalAuth(String),
}

impl SourceError {
    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::NotFound => "not_found",
            SourceError::RateLimited => "rate_limited",
            SourceError::Transient(_) => "transient",
            SourceError::FatalAuth(_) => "fatal_auth",
        }
    }

    /// Worth retrying within the same lookup.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SourceError::Transient(_))
    }

    /// Map an HTTP status code to a lookup failure.
    pub fn from_status(status: u16, detail: impl Into<String>) -> Self {
        match status {
            401 | 403 => SourceError::FatalAuth(detail.into()),
            404 => SourceError::NotFound,
            429 => SourceError::RateLimited,
            _ => SourceError::Transient(detail.into()),
        }
    }
}

/// Share of supply held by one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HolderShare {
    pub address: Address,
    /// Percent of total supply (0-100)
    pub pct: f64,
}

/// Best-effort facts about a token. Every field is optional; unknown stays `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenFacts {
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub creator: Option<Address>,
    pub price_usd: Option<f64>,
    pub liquidity_usd: Option<f64>,
    pub market_cap_usd: Option<f64>,
    pub volume_24h_usd: Option<f64>,
    pub holder_count: Option<u64>,
    pub top_holders: Option<Vec<HolderShare>>,
    pub mint_authority_revoked: Option<bool>,
    pub freeze_authority_revoked: Option<bool>,
    pub lp_burned: Option<bool>,
    pub social_links: Option<u32>,
}

macro_rules! fill_missing {
    ($target:expr, $other:expr, $($field:ident),+ $(,)?) => {
        $(
            if $target.$field.is_none() {
                $target.$field = $other.$field;
            }
        )+
    };
}

impl TokenFacts {
    /// Fill fields that are still unknown from `other`. Earlier sources win.
    pub fn merge(&mut self, other: TokenFacts) {
        fill_missing!(
            self,
            other,
            name,
            symbol,
            creator,
            price_usd,
            liquidity_usd,
            market_cap_usd,
            volume_24h_usd,
            holder_count,
            top_holders,
            mint_authority_revoked,
            freeze_authority_revoked,
            lp_burned,
            social_links,
        );
    }

    pub fn is_empty(&self) -> bool {
        *self == TokenFacts::default()
    }

    pub fn holders(&self) -> &[HolderShare] {
        self.top_holders.as_deref().unwrap_or(&[])
    }
}

/// Verdict of a second-wave holder check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HolderVerdict {
    /// Sum of the ten largest holders, percent of supply
    pub top10_pct: f64,
    /// Largest single holder, percent of supply
    pub max_single_pct: f64,
    pub concentrated: bool,
}

/// First-wave lookup.
#[async_trait]
pub trait TokenFactsSource: Send + Sync {
    fn name(&self) -> &str;
    fn category(&self) -> SourceCategory;
    async fn fetch(&self, mint: &str) -> Result<TokenFacts, SourceError>;
}

/// Second-wave lookup over the first wave's holder list.
#[async_trait]
pub trait HolderCheck: Send + Sync {
    fn name(&self) -> &str;
    async fn check(&self, mint: &str, holders: &[HolderShare]) -> Result<HolderVerdict, SourceError>;
}

/// All configured sources, looked up by category per stage.
#[derive(Clone, Default)]
pub struct SourceSet {
    sources: Vec<Arc<dyn TokenFactsSource>>,
    holder_checks: Vec<Arc<dyn HolderCheck>>,
}

impl SourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: Arc<dyn TokenFactsSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_holder_check(mut self, check: Arc<dyn HolderCheck>) -> Self {
        self.holder_checks.push(check);
        self
    }

    /// Sources whose category is in `categories`, in registration order.
    pub fn for_categories(&self, categories: &[SourceCategory]) -> Vec<Arc<dyn TokenFactsSource>> {
        self.sources
            .iter()
            .filter(|source| categories.contains(&source.category()))
            .cloned()
            .collect()
    }

    pub fn holder_checks(&self) -> &[Arc<dyn HolderCheck>] {
        &self.holder_checks
    }

    pub fn len(&self) -> usize {
        self.sources.len() + self.holder_checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
