//! Static stage table.
//!
//! Each stage is anchored at a fixed offset from discovery. Offsets grow
//! geometrically so early stages react to launch-time data and late ones only
//! confirm the token is still alive.

use crate::sources::SourceCategory;
use anyhow::{anyhow, Result};
use nonempty::NonEmpty;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One scheduled enrichment pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    /// Offset from discovery time
    pub offset_secs: u64,
    /// Source categories queried in the first wave
    pub categories: Vec<SourceCategory>,
    /// Run the second-wave holder checks
    pub security_recheck: bool,
    /// Drop the token when its score falls below this
    pub prune_below: Option<u8>,
    /// Discard the task unprocessed when it is older than this
    pub max_staleness_secs: u64,
    /// Scores at this stage may emit trading signals
    pub signal_eligible: bool,
}

impl Stage {
    pub fn offset(&self) -> Duration {
        Duration::from_secs(self.offset_secs)
    }

    pub fn offset_ms(&self) -> u64 {
        self.offset_secs.saturating_mul(1_000)
    }

    pub fn max_staleness_ms(&self) -> u64 {
        self.max_staleness_secs.saturating_mul(1_000)
    }

    pub fn should_prune(&self, score: u8) -> bool {
        self.prune_below.map_or(false, |threshold| score < threshold)
    }
}

fn stage(
    name: &str,
    offset_secs: u64,
    categories: &[SourceCategory],
    security_recheck: bool,
    prune_below: Option<u8>,
    max_staleness_secs: u64,
    signal_eligible: bool,
) -> Stage {
    Stage {
        name: name.to_string(),
        offset_secs,
        categories: categories.to_vec(),
        security_recheck,
        prune_below,
        max_staleness_secs,
        signal_eligible,
    }
}

/// Ordered, non-empty stage table with strictly increasing offsets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Stage>", into = "Vec<Stage>")]
pub struct StageTable(NonEmpty<Stage>);

impl StageTable {
    pub fn new(stages: Vec<Stage>) -> Result<Self> {
        let stages = NonEmpty::from_vec(stages).ok_or_else(|| anyhow!("stage table cannot be empty"))?;
        for pair in stages.iter().collect::<Vec<_>>().windows(2) {
            if pair[1].offset_secs <= pair[0].offset_secs {
                return Err(anyhow!(
                    "stage '{}' must start after '{}'",
                    pair[1].name,
                    pair[0].name
                ));
            }
        }
        Ok(Self(stages))
    }

    pub fn get(&self, index: usize) -> Option<&Stage> {
        self.0.get(index)
    }

    pub fn first(&self) -> &Stage {
        self.0.first()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// A table always has at least one stage.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn iter(&self) -> impl Iterator<Item = &Stage> {
        self.0.iter()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.iter().position(|s| s.name == name)
    }
}

impl TryFrom<Vec<Stage>> for StageTable {
    type Error = anyhow::Error;

    fn try_from(stages: Vec<Stage>) -> Result<Self> {
        Self::new(stages)
    }
}

impl From<StageTable> for Vec<Stage> {
    fn from(table: StageTable) -> Self {
        table.0.into()
    }
}

impl Default for StageTable {
    /// prescreen at +5s, deep at +30s, then re-checks at 2m, 5m, 15m and 1h.
    fn default() -> Self {
        use SourceCategory::*;
        let first = stage("prescreen", 5, &[Market, Security], false, Some(25), 20, false);
        let rest = vec![
            stage("deep", 30, &[Market, Security, Holders, Social], true, Some(40), 60, true),
            stage("recheck_2m", 120, &[Market, Holders], true, Some(35), 120, true),
            stage("recheck_5m", 300, &[Market, Holders], false, Some(35), 300, true),
            stage("recheck_15m", 900, &[Market, Security], true, Some(30), 900, false),
            stage("recheck_1h", 3_600, &[Market, Holders, Social], true, None, 3_600, false),
        ];
        Self(NonEmpty { head: first, tail: rest })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_is_ordered() {
        let table = StageTable::default();
        assert_eq!(table.len(), 6);
        assert_eq!(table.first().name, "prescreen");
        assert_eq!(table.get(1).map(|s| s.offset_secs), Some(30));
        assert!(StageTable::new(table.iter().cloned().collect()).is_ok());
        assert_eq!(table.index_of("recheck_2m"), Some(2));
    }

    #[test]
    fn test_empty_and_unordered_tables_are_rejected() {
        assert!(StageTable::new(vec![]).is_err());

        let table = StageTable::default();
        let mut stages: Vec<Stage> = table.iter().cloned().collect();
        stages.swap(1, 2);
        assert!(StageTable::new(stages).is_err());
    }

    #[test]
    fn test_should_prune() {
        let table = StageTable::default();
        let deep = table.get(1).expect("deep stage");
        assert!(deep.should_prune(39));
        assert!(!deep.should_prune(40));
        let last = table.get(table.len() - 1).expect("last stage");
        assert!(!last.should_prune(0));
    }

    #[test]
    fn test_table_serde_round_trip_validates() {
        let table = StageTable::default();
        let json = serde_json::to_string(&table).unwrap();
        let back: StageTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back, table);
        assert!(serde_json::from_str::<StageTable>("[]").is_err());
    }
}
