//! Feature extraction and the default weighted scorer.
//!
//! The scheduler only depends on the [`Scorer`] trait; [`WeightedScorer`] is
//! a reasonable default so the pipeline runs end to end.

use crate::scheduler::task::RiskAnnotations;
use crate::sources::{HolderVerdict, TokenFacts};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Normalised features in `[0, 1]`. `None` means the inputs were unknown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub liquidity: Option<f64>,
    pub volume: Option<f64>,
    pub holders: Option<f64>,
    pub security: Option<f64>,
    pub social: Option<f64>,
    /// Risk flags active at scoring time
    pub risk_flags: Vec<String>,
}

impl FeatureVector {
    pub fn build(facts: &TokenFacts, verdicts: &[HolderVerdict], risk: &RiskAnnotations) -> Self {
        let liquidity = facts.liquidity_usd.map(|usd| log_scale(usd, 5.0));
        let volume = facts.volume_24h_usd.map(|usd| log_scale(usd, 6.0));

        let top10 = verdicts
            .iter()
            .map(|v| v.top10_pct)
            .reduce(f64::max)
            .or_else(|| {
                facts
                    .top_holders
                    .as_ref()
                    .filter(|holders| !holders.is_empty())
                    .map(|holders| holders.iter().take(10).map(|h| h.pct).sum())
            });
        let holders = top10.map(|pct| (1.0 - pct / 100.0).clamp(0.0, 1.0));

        let security = weighted_known(&[
            (facts.mint_authority_revoked, 0.5),
            (facts.freeze_authority_revoked, 0.3),
            (facts.lp_burned, 0.2),
        ]);

        let social = facts.social_links.map(|links| (links as f64 / 3.0).min(1.0));

        Self {
            liquidity,
            volume,
            holders,
            security,
            social,
            risk_flags: risk.active_flags().into_iter().map(str::to_string).collect(),
        }
    }

    pub fn named(&self) -> BTreeMap<&'static str, Option<f64>> {
        BTreeMap::from([
            ("liquidity", self.liquidity),
            ("volume", self.volume),
            ("holders", self.holders),
            ("security", self.security),
            ("social", self.social),
        ])
    }
}

/// `log10(value + 1) / decades`, capped at 1.
fn log_scale(value: f64, decades: f64) -> f64 {
    ((value.max(0.0) + 1.0).log10() / decades).clamp(0.0, 1.0)
}

/// Weighted share of `true` among the known booleans.
fn weighted_known(parts: &[(Option<bool>, f64)]) -> Option<f64> {
    let (hit, known) = parts
        .iter()
        .filter_map(|(value, weight)| value.map(|v| (v, *weight)))
        .fold((0.0, 0.0), |(hit, known), (v, w)| (hit + if v { w } else { 0.0 }, known + w));
    (known > 0.0).then(|| hit / known)
}

/// Result of scoring one feature vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreOutcome {
    /// 0-100
    pub score: u8,
    pub reasons: Vec<String>,
}

/// Opaque scoring function over a feature vector.
pub trait Scorer: Send + Sync {
    fn score(&self, features: &FeatureVector) -> ScoreOutcome;
}

/// Per-feature weights and the flat penalty per active risk flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub liquidity: f64,
    pub volume: f64,
    pub holders: f64,
    pub security: f64,
    pub social: f64,
    /// Points subtracted per risk flag
    pub risk_penalty: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            liquidity: 0.30,
            volume: 0.20,
            holders: 0.20,
            security: 0.20,
            social: 0.10,
            risk_penalty: 15.0,
        }
    }
}

/// Weighted average over known features, scaled to 0-100, minus risk penalties.
#[derive(Debug, Clone, Default)]
pub struct WeightedScorer {
    weights: ScoreWeights,
}

impl WeightedScorer {
    pub fn new(weights: ScoreWeights) -> Self {
        Self { weights }
    }
}

impl Scorer for WeightedScorer {
    fn score(&self, features: &FeatureVector) -> ScoreOutcome {
        let w = &self.weights;
        let weighted = [
            ("liquidity", features.liquidity, w.liquidity),
            ("volume", features.volume, w.volume),
            ("holders", features.holders, w.holders),
            ("security", features.security, w.security),
            ("social", features.social, w.social),
        ];

        let mut reasons = Vec::new();
        let mut sum = 0.0;
        let mut total_weight = 0.0;
        for (name, value, weight) in weighted {
            if let Some(value) = value {
                sum += value * weight;
                total_weight += weight;
                reasons.push(format!("{}={:.2}", name, value));
            }
        }

        if total_weight <= 0.0 {
            reasons.push("no_data".to_string());
            return ScoreOutcome { score: 0, reasons };
        }

        let penalty = w.risk_penalty * features.risk_flags.len() as f64;
        for flag in &features.risk_flags {
            reasons.push(format!("risk:{}", flag));
        }

        let raw = sum / total_weight * 100.0 - penalty;
        ScoreOutcome {
            score: raw.round().clamp(0.0, 100.0) as u8,
            reasons,
        }
    }
}
