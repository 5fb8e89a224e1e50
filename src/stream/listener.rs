//! Per-kind listener registry and the subscription filters derived from it.

use crate::decoder::amm::AMM_PROGRAM_ID;
use crate::decoder::launch::{LAUNCH_PROGRAM_ID, MIGRATION_ACCOUNT};
use crate::decoder::{DecodedEvent, EventKind};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Consumer of decoded events.
#[async_trait]
pub trait EventListener: Send + Sync {
    fn name(&self) -> &str;

    async fn on_event(&self, event: &DecodedEvent) -> Result<()>;
}

/// Which server-side filters the subscription needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionFilters {
    /// Launch program and graduation account
    pub discovery: bool,
    /// AMM program
    pub liquidity: bool,
}

impl SubscriptionFilters {
    pub fn is_empty(&self) -> bool {
        !self.discovery && !self.liquidity
    }

    /// Accounts to include in `transactionSubscribe`.
    pub fn account_include(&self) -> Vec<String> {
        let mut accounts = Vec::new();
        if self.discovery {
            accounts.push(LAUNCH_PROGRAM_ID.to_string());
            accounts.push(MIGRATION_ACCOUNT.to_string());
        }
        if self.liquidity {
            accounts.push(AMM_PROGRAM_ID.to_string());
        }
        accounts
    }
}

#[derive(Default, Clone)]
pub struct ListenerRegistry {
    by_kind: HashMap<EventKind, Vec<Arc<dyn EventListener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: EventKind, listener: Arc<dyn EventListener>) {
        self.by_kind.entry(kind).or_default().push(listener);
    }

    pub fn listeners_for(&self, kind: EventKind) -> &[Arc<dyn EventListener>] {
        self.by_kind.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has(&self, kind: EventKind) -> bool {
        !self.listeners_for(kind).is_empty()
    }

    pub fn subscription_filters(&self) -> SubscriptionFilters {
        SubscriptionFilters {
            discovery: self.has(EventKind::NewToken)
                || self.has(EventKind::Trade)
                || self.has(EventKind::Migration),
            liquidity: self.has(EventKind::LiquidityRemoval),
        }
    }

    pub fn len(&self) -> usize {
        self.by_kind.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
