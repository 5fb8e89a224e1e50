//! Alert sink for emitted signals.

use super::ActionClass;
use crate::types::Address;
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub token: Address,
    pub stage: String,
    pub score: u8,
    pub action: ActionClass,
    pub reasons: Vec<String>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &Alert) -> Result<()>;
}

/// Writes alerts to the log.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        info!(
            "ALERT {} {} score={} stage={} reasons=[{}]",
            alert.action.as_str(),
            alert.token,
            alert.score,
            alert.stage,
            alert.reasons.join(", ")
        );
        Ok(())
    }
}
