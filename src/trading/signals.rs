//! Turns stage scores into signals, alerts and positions.

use super::executor::{OpenRequest, TradingExecutor};
use super::notifier::{Alert, Notifier};
use super::ActionClass;
use crate::clock::Clock;
use crate::config::TradingConfig;
use crate::guard::RugGuard;
use crate::storage::{SignalRecord, Storage};
use crate::types::{Address, NewPosition};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Everything the signal engine needs from one completed stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageScore {
    pub token: Address,
    pub stage: String,
    pub signal_eligible: bool,
    pub score: u8,
    pub reasons: Vec<String>,
    pub price_usd: Option<f64>,
    pub liquidity_usd: Option<f64>,
}

/// What happened for one scored stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalDecision {
    pub action: Option<ActionClass>,
    pub signal_id: Option<i64>,
    pub position_id: Option<i64>,
    /// Open positions whose last price was refreshed
    pub prices_updated: usize,
}

pub struct SignalEngine {
    storage: Arc<dyn Storage>,
    executor: Arc<dyn TradingExecutor>,
    notifier: Arc<dyn Notifier>,
    guard: Option<RugGuard>,
    clock: Arc<dyn Clock>,
    config: TradingConfig,
}

impl SignalEngine {
    pub fn new(
        storage: Arc<dyn Storage>,
        executor: Arc<dyn TradingExecutor>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: TradingConfig,
    ) -> Self {
        Self {
            storage,
            executor,
            notifier,
            guard: None,
            clock,
            config,
        }
    }

    /// Register new positions with the guard as soon as they open.
    pub fn with_guard(mut self, guard: RugGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn classify(&self, score: u8) -> ActionClass {
        ActionClass::from_score(score, self.config.buy_threshold, self.config.strong_buy_threshold)
    }

    #[instrument(skip(self, scored), fields(mint = %scored.token, stage = %scored.stage))]
    pub async fn on_scored(&self, scored: &StageScore) -> Result<SignalDecision> {
        let mut decision = SignalDecision::default();
        let open = self.storage.get_open_positions_for_token(&scored.token).await?;

        if let Some(price) = scored.price_usd {
            for position in &open {
                if self.storage.update_position_price(position.id, price).await? {
                    decision.prices_updated += 1;
                }
            }
        }

        if !scored.signal_eligible {
            return Ok(decision);
        }

        let action = self.classify(scored.score);
        decision.action = Some(action);
        if !action.is_buy() {
            debug!("{} scored {} at {}: {}", scored.token, scored.score, scored.stage, action.as_str());
            return Ok(decision);
        }
        if !open.is_empty() {
            debug!("Already holding {}, no new signal", scored.token);
            return Ok(decision);
        }

        let now = self.clock.now_ms();
        let signal_id = self
            .storage
            .insert_signal(&SignalRecord {
                token: scored.token.clone(),
                stage: scored.stage.clone(),
                score: scored.score,
                action: action.as_str().to_string(),
                reasons: scored.reasons.clone(),
                created_at: now,
            })
            .await?;
        decision.signal_id = Some(signal_id);

        let alert = Alert {
            token: scored.token.clone(),
            stage: scored.stage.clone(),
            score: scored.score,
            action,
            reasons: scored.reasons.clone(),
        };
        if let Err(e) = self.notifier.notify(&alert).await {
            warn!("Failed to deliver alert for {}: {:#}", scored.token, e);
        }

        let Some(price) = scored.price_usd else {
            warn!("Signal for {} without a price, not opening a position", scored.token);
            return Ok(decision);
        };

        let request = OpenRequest {
            token: scored.token.clone(),
            price,
            liquidity_usd: scored.liquidity_usd,
            size_sol: self.config.position_size_sol,
        };
        let fill = match self.executor.open(&request).await {
            Ok(fill) => fill,
            Err(e) => {
                warn!("Failed to open position on {}: {}", scored.token, e);
                return Ok(decision);
            }
        };

        let position_id = self
            .storage
            .insert_position(&NewPosition {
                token: scored.token.clone(),
                is_simulated: self.executor.is_simulated(),
                entry_price: fill.price,
                size_sol: fill.size_sol,
                opened_at: self.clock.now_ms(),
            })
            .await?;
        decision.position_id = Some(position_id);

        if let Some(guard) = &self.guard {
            let position = self
                .storage
                .get_position(position_id)
                .await?
                .context("Position vanished right after insert")?;
            guard.watch_now(&position).await;
        }

        info!(
            "Opened {} position {} on {} at {} ({} SOL)",
            if self.executor.is_simulated() { "simulated" } else { "live" },
            position_id,
            scored.token,
            fill.price,
            fill.size_sol
        );
        Ok(decision)
    }
}
