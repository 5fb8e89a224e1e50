//! Second-wave holder concentration check.

use super::{HolderCheck, HolderShare, HolderVerdict, SourceError};
use async_trait::async_trait;
use std::collections::HashSet;

/// Flags supply concentrated in a handful of wallets.
///
/// Addresses in `excluded` (bonding curves, pool vaults, burn addresses) are
/// ignored when summing shares.
pub struct ConcentrationCheck {
    top10_threshold_pct: f64,
    single_threshold_pct: f64,
    excluded: HashSet<String>,
}

impl ConcentrationCheck {
    pub fn new(top10_threshold_pct: f64, single_threshold_pct: f64) -> Self {
        Self {
            top10_threshold_pct,
            single_threshold_pct,
            excluded: HashSet::new(),
        }
    }

    pub fn with_excluded<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded.extend(addresses.into_iter().map(Into::into));
        self
    }

    pub fn evaluate(&self, holders: &[HolderShare]) -> HolderVerdict {
        let mut shares: Vec<f64> = holders
            .iter()
            .filter(|h| !self.excluded.contains(&h.address))
            .map(|h| h.pct)
            .collect();
        shares.sort_by(|a, b| b.total_cmp(a));

        let top10_pct: f64 = shares.iter().take(10).sum();
        let max_single_pct = shares.first().copied().unwrap_or(0.0);

        HolderVerdict {
            top10_pct,
            max_single_pct,
            concentrated: top10_pct > self.top10_threshold_pct
                || max_single_pct > self.single_threshold_pct,
        }
    }
}

impl Default for ConcentrationCheck {
    fn default() -> Self {
        Self::new(50.0, 20.0)
    }
}

#[async_trait]
impl HolderCheck for ConcentrationCheck {
    fn name(&self) -> &str {
        "concentration"
    }

    async fn check(&self, _mint: &str, holders: &[HolderShare]) -> Result<HolderVerdict, SourceError> {
        if holders.is_empty() {
            return Err(SourceError::NotFound);
        }
        Ok(self.evaluate(holders))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn share(address: &str, pct: f64) -> HolderShare {
        HolderShare {
            address: address.to_string(),
            pct,
        }
    }

    #[test]
    fn test_single_whale_is_concentrated() {
        let check = ConcentrationCheck::default();
        let verdict = check.evaluate(&[share("whale", 35.0), share("a", 2.0)]);
        assert!(verdict.concentrated);
        assert_eq!(verdict.max_single_pct, 35.0);
        assert_eq!(verdict.top10_pct, 37.0);
    }

    #[test]
    fn test_excluded_curve_account_is_ignored() {
        let check = ConcentrationCheck::default().with_excluded(["curve"]);
        let verdict = check.evaluate(&[share("curve", 80.0), share("a", 3.0), share("b", 2.0)]);
        assert!(!verdict.concentrated);
        assert_eq!(verdict.max_single_pct, 3.0);
    }

    #[tokio::test]
    async fn test_empty_holder_list_is_not_found() {
        let check = ConcentrationCheck::default();
        assert_eq!(check.check("mint", &[]).await, Err(SourceError::NotFound));
    }
}
