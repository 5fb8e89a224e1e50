//! Enrichment task record and the risk accumulator carried between stages.

use crate::sources::{HolderVerdict, TokenFacts};
use crate::types::Address;
use serde::{Deserialize, Serialize};

/// Tie-breaker at equal scheduled time. Lower runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityClass {
    /// Graduations and other time-critical work
    Urgent = 0,
    Normal = 1,
}

/// Liquidity below this share of the observed peak counts as a drain.
const LIQUIDITY_DRAIN_RATIO: f64 = 0.5;

/// Risk observations accumulated across stages.
///
/// Each flag holds the most recent known observation; `None` means no stage
/// has been able to observe it yet. Unknown values never clear a known one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskAnnotations {
    pub mint_authority_active: Option<bool>,
    pub freeze_authority_active: Option<bool>,
    pub lp_unburned: Option<bool>,
    pub holders_concentrated: Option<bool>,
    /// Highest liquidity seen at any stage, USD
    pub peak_liquidity_usd: Option<f64>,
    pub liquidity_drained: bool,
    /// Lookups that failed or timed out, summed across stages
    pub failed_lookups: u32,
}

impl RiskAnnotations {
    /// Fold one stage's merged facts and holder verdicts into the accumulator.
    pub fn absorb(&mut self, facts: &TokenFacts, verdicts: &[HolderVerdict], failed_lookups: u32) {
        if let Some(revoked) = facts.mint_authority_revoked {
            self.mint_authority_active = Some(!revoked);
        }
        if let Some(revoked) = facts.freeze_authority_revoked {
            self.freeze_authority_active = Some(!revoked);
        }
        if let Some(burned) = facts.lp_burned {
            self.lp_unburned = Some(!burned);
        }
        if !verdicts.is_empty() {
            self.holders_concentrated = Some(verdicts.iter().any(|v| v.concentrated));
        }
        if let Some(liquidity) = facts.liquidity_usd {
            let peak = self.peak_liquidity_usd.map_or(liquidity, |p| p.max(liquidity));
            self.peak_liquidity_usd = Some(peak);
            if peak > 0.0 && liquidity < peak * LIQUIDITY_DRAIN_RATIO {
                self.liquidity_drained = true;
            }
        }
        self.failed_lookups = self.failed_lookups.saturating_add(failed_lookups);
    }

    /// Names of every risk currently flagged.
    pub fn active_flags(&self) -> Vec<&'static str> {
        let mut flags = Vec::new();
        if self.mint_authority_active == Some(true) {
            flags.push("mint_authority_active");
        }
        if self.freeze_authority_active == Some(true) {
            flags.push("freeze_authority_active");
        }
        if self.lp_unburned == Some(true) {
            flags.push("lp_unburned");
        }
        if self.holders_concentrated == Some(true) {
            flags.push("holders_concentrated");
        }
        if self.liquidity_drained {
            flags.push("liquidity_drained");
        }
        flags
    }
}

/// One pending enrichment pass for a token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentTask {
    pub token: Address,
    /// Index into the stage table
    pub stage: usize,
    /// When the task becomes due (ms)
    pub scheduled_time: u64,
    /// Anchor for every stage offset (ms)
    pub discovery_time: u64,
    pub priority: PriorityClass,
    #[serde(default)]
    pub risk: RiskAnnotations,
    #[serde(default)]
    pub last_score: Option<u8>,
    /// Failed processing attempts at this stage
    #[serde(default)]
    pub attempts: u32,
    /// Earliest run time of a retry. Staleness is still measured from `scheduled_time`.
    #[serde(default)]
    pub retry_at: Option<u64>,
}

impl EnrichmentTask {
    /// First-stage task for a freshly discovered token.
    pub fn first_stage(token: impl Into<Address>, discovery_time: u64, first_offset_ms: u64, priority: PriorityClass) -> Self {
        Self {
            token: token.into(),
            stage: 0,
            scheduled_time: discovery_time.saturating_add(first_offset_ms),
            discovery_time,
            priority,
            risk: RiskAnnotations::default(),
            last_score: None,
            attempts: 0,
            retry_at: None,
        }
    }

    /// When the task may run: the scheduled time, or later while a retry is backing off.
    pub fn ready_time(&self) -> u64 {
        self.retry_at.map_or(self.scheduled_time, |at| at.max(self.scheduled_time))
    }

    /// Retry of this stage after a failed attempt, keeping the original due time.
    pub fn retry(&self, attempts: u32, at: u64) -> Self {
        Self {
            attempts,
            retry_at: Some(at),
            ..self.clone()
        }
    }

    /// Ordering key flattened to one integer: ready time first, priority class at equal time.
    pub fn ordering_score(&self) -> i64 {
        let time = i64::try_from(self.ready_time()).unwrap_or(i64::MAX / 2);
        time.saturating_mul(2).saturating_add(self.priority as i64)
    }

    /// Successor task anchored at `discovery_time + next_offset`, clamped to `now` when already past.
    pub fn advance(&self, next_stage: usize, next_offset_ms: u64, now: u64, score: u8, risk: RiskAnnotations) -> Self {
        let anchored = self.discovery_time.saturating_add(next_offset_ms);
        Self {
            token: self.token.clone(),
            stage: next_stage,
            scheduled_time: anchored.max(now),
            discovery_time: self.discovery_time,
            priority: PriorityClass::Normal,
            risk,
            last_score: Some(score),
            attempts: 0,
            retry_at: None,
        }
    }

    pub fn age_ms(&self, now: u64) -> u64 {
        now.saturating_sub(self.scheduled_time)
    }
}
