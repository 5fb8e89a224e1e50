//! Joint lookups with a per-member timeout.
//!
//! Every member of a batch runs concurrently under its own timeout. A failed or
//! timed-out member yields an error result for that slot only; siblings are
//! never cancelled, and batch latency is bounded by the slowest timeout.

use crate::sources::{HolderCheck, HolderShare, HolderVerdict, SourceError, TokenFacts, TokenFactsSource};
use futures_util::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome of one member of a lookup batch.
#[derive(Debug, Clone)]
pub struct LookupResult<T> {
    pub source: String,
    pub outcome: Result<T, SourceError>,
    pub elapsed: Duration,
    pub timed_out: bool,
}

impl<T> LookupResult<T> {
    pub fn value(&self) -> Option<&T> {
        self.outcome.as_ref().ok()
    }
}

async fn timed<T, F>(source: String, limit: Duration, lookup: F) -> LookupResult<T>
where
    F: Future<Output = Result<T, SourceError>>,
{
    let started = Instant::now();
    let (outcome, timed_out) = match tokio::time::timeout(limit, lookup).await {
        Ok(outcome) => (outcome, false),
        Err(_) => (
            Err(SourceError::Transient(format!("timed out after {:?}", limit))),
            true,
        ),
    };
    LookupResult {
        source,
        outcome,
        elapsed: started.elapsed(),
        timed_out,
    }
}

/// First wave: every source fetches the same mint.
pub async fn fetch_all(
    sources: &[Arc<dyn TokenFactsSource>],
    mint: &str,
    limit: Duration,
) -> Vec<LookupResult<TokenFacts>> {
    join_all(
        sources
            .iter()
            .map(|source| timed(source.name().to_string(), limit, source.fetch(mint))),
    )
    .await
}

/// Second wave: holder checks over the first wave's holder list.
pub async fn check_all(
    checks: &[Arc<dyn HolderCheck>],
    mint: &str,
    holders: &[HolderShare],
    limit: Duration,
) -> Vec<LookupResult<HolderVerdict>> {
    join_all(
        checks
            .iter()
            .map(|check| timed(check.name().to_string(), limit, check.check(mint, holders))),
    )
    .await
}

/// Merge first-wave facts in source order; earlier sources win per field.
pub fn merge_facts(results: &[LookupResult<TokenFacts>]) -> TokenFacts {
    results
        .iter()
        .filter_map(|r| r.value().cloned())
        .fold(TokenFacts::default(), |mut merged, facts| {
            merged.merge(facts);
            merged
        })
}
