//! Mint to open-position-ids index, swapped wholesale on every refresh.

use crate::types::{Address, Position};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct WatchedMintIndex {
    inner: RwLock<HashMap<Address, HashSet<i64>>>,
}

impl WatchedMintIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from the authoritative open-position list. Closed entries are ignored.
    pub async fn replace(&self, positions: &[Position]) {
        let mut rebuilt: HashMap<Address, HashSet<i64>> = HashMap::new();
        for position in positions.iter().filter(|p| p.is_open()) {
            rebuilt
                .entry(position.token.clone())
                .or_default()
                .insert(position.id);
        }
        *self.inner.write().await = rebuilt;
    }

    /// Start watching a freshly opened position before the next rebuild.
    pub async fn insert(&self, mint: &str, position_id: i64) {
        self.inner
            .write()
            .await
            .entry(mint.to_string())
            .or_default()
            .insert(position_id);
    }

    /// Watched position ids for a mint, sorted.
    pub async fn ids_for(&self, mint: &str) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .inner
            .read()
            .await
            .get(mint)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    pub async fn mint_count(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn position_count(&self) -> usize {
        self.inner.read().await.values().map(HashSet::len).sum()
    }
}
