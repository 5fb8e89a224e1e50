//! Signals, positions and the execution/notification collaborators.

pub mod executor;
pub mod notifier;
pub mod signals;

pub use executor::{CloseRequest, ExecutionError, Fill, OpenRequest, PaperExecutor, TradingExecutor};
pub use notifier::{Alert, LogNotifier, Notifier};
pub use signals::{SignalDecision, SignalEngine, StageScore};

use serde::Serialize;

/// Action classification of a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionClass {
    StrongBuy,
    Buy,
    Watch,
    Avoid,
}

impl ActionClass {
    /// `Watch` covers scores within 15 points below the buy threshold.
    pub fn from_score(score: u8, buy_threshold: u8, strong_buy_threshold: u8) -> Self {
        if score >= strong_buy_threshold {
            ActionClass::StrongBuy
        } else if score >= buy_threshold {
            ActionClass::Buy
        } else if score >= buy_threshold.saturating_sub(15) {
            ActionClass::Watch
        } else {
            ActionClass::Avoid
        }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self, ActionClass::StrongBuy | ActionClass::Buy)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionClass::StrongBuy => "strong_buy",
            ActionClass::Buy => "buy",
            ActionClass::Watch => "watch",
            ActionClass::Avoid => "avoid",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_classes() {
        assert_eq!(ActionClass::from_score(85, 60, 80), ActionClass::StrongBuy);
        assert_eq!(ActionClass::from_score(60, 60, 80), ActionClass::Buy);
        assert_eq!(ActionClass::from_score(45, 60, 80), ActionClass::Watch);
        assert_eq!(ActionClass::from_score(44, 60, 80), ActionClass::Avoid);
        assert!(ActionClass::Buy.is_buy());
        assert!(!ActionClass::Watch.is_buy());
    }
}
