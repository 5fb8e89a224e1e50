//! On-chain facts read straight from the SPL mint and its largest accounts.

use super::{HolderShare, SourceCategory, SourceError, TokenFacts, TokenFactsSource};
use async_trait::async_trait;
use solana_client::client_error::ClientError;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, instrument};

/// SPL token mint account size.
const MINT_LEN: usize = 82;

/// Fields of interest from an SPL mint account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MintInfo {
    pub supply: u64,
    pub decimals: u8,
    pub has_mint_authority: bool,
    pub has_freeze_authority: bool,
}

/// Parse the packed SPL mint layout:
/// `COption<Pubkey>` mint authority (0..36), supply (36..44), decimals (44),
/// initialized flag (45), `COption<Pubkey>` freeze authority (46..82).
pub fn parse_mint_account(data: &[u8]) -> Option<MintInfo> {
    if data.len() < MINT_LEN {
        return None;
    }
    let tag = |offset: usize| -> Option<bool> {
        let raw = u32::from_le_bytes(data.get(offset..offset + 4)?.try_into().ok()?);
        match raw {
            0 => Some(false),
            1 => Some(true),
            _ => None,
        }
    };

    Some(MintInfo {
        has_mint_authority: tag(0)?,
        supply: u64::from_le_bytes(data.get(36..44)?.try_into().ok()?),
        decimals: *data.get(44)?,
        has_freeze_authority: tag(46)?,
    })
}

fn map_client_error(error: ClientError) -> SourceError {
    let message = error.to_string();
    if message.contains("AccountNotFound") || message.contains("could not find account") {
        SourceError::NotFound
    } else if message.contains("429") {
        SourceError::RateLimited
    } else {
        SourceError::Transient(message)
    }
}

fn parse_mint_key(mint: &str) -> Result<Pubkey, SourceError> {
    Pubkey::from_str(mint).map_err(|_| SourceError::NotFound)
}

/// Mint and freeze authority state.
pub struct RpcMintSource {
    rpc: Arc<RpcClient>,
}

impl RpcMintSource {
    pub fn new(rpc: Arc<RpcClient>) -> Self {
        Self { rpc }
    }
}

#[async_trait]
impl TokenFactsSource for RpcMintSource {
    fn name(&self) -> &str {
        "rpc_mint"
    }

    fn category(&self) -> SourceCategory {
        SourceCategory::Security
    }

    #[instrument(skip(self))]
    async fn fetch(&self, mint: &str) -> Result<TokenFacts, SourceError> {
        let key = parse_mint_key(mint)?;
        let account = self.rpc.get_account(&key).await.map_err(map_client_error)?;
        let info = parse_mint_account(&account.data)
            .ok_or_else(|| SourceError::Transient("account is not an SPL mint".to_string()))?;

        debug!(
            "Mint {}: supply={} decimals={} mint_auth={} freeze_auth={}",
            mint, info.supply, info.decimals, info.has_mint_authority, info.has_freeze_authority
        );

        Ok(TokenFacts {
            mint_authority_revoked: Some(!info.has_mint_authority),
            freeze_authority_revoked: Some(!info.has_freeze_authority),
            ..Default::default()
        })
    }
}

/// Largest token accounts as a share of supply.
pub struct RpcHoldersSource {
    rpc: Arc<RpcClient>,
}

impl RpcHoldersSource {
    pub fn new(rpc: Arc<RpcClient>) -> Self {
        Self { rpc }
    }
}

/// Turn raw balances into percent-of-supply shares.
pub fn holder_shares(balances: &[(String, u64)], supply: u64) -> Vec<HolderShare> {
    balances
        .iter()
        .map(|(address, amount)| HolderShare {
            address: address.clone(),
            pct: if supply > 0 {
                *amount as f64 / supply as f64 * 100.0
            } else {
                0.0
            },
        })
        .collect()
}

#[async_trait]
impl TokenFactsSource for RpcHoldersSource {
    fn name(&self) -> &str {
        "rpc_holders"
    }

    fn category(&self) -> SourceCategory {
        SourceCategory::Holders
    }

    #[instrument(skip(self))]
    async fn fetch(&self, mint: &str) -> Result<TokenFacts, SourceError> {
        let key = parse_mint_key(mint)?;
        let supply = self
            .rpc
            .get_token_supply(&key)
            .await
            .map_err(map_client_error)?
            .amount
            .parse::<u64>()
            .map_err(|e| SourceError::Transient(format!("bad supply: {}", e)))?;

        let largest = self
            .rpc
            .get_token_largest_accounts(&key)
            .await
            .map_err(map_client_error)?;

        let balances: Vec<(String, u64)> = largest
            .into_iter()
            .filter_map(|account| {
                let amount = account.amount.amount.parse::<u64>().ok()?;
                Some((account.address, amount))
            })
            .collect();

        let holders = holder_shares(&balances, supply);
        debug!("{} largest holders fetched for {}", holders.len(), mint);

        Ok(TokenFacts {
            top_holders: Some(holders),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mint_bytes(mint_auth: bool, supply: u64, decimals: u8, freeze_auth: bool) -> Vec<u8> {
        let mut data = vec![0u8; MINT_LEN];
        data[0..4].copy_from_slice(&(mint_auth as u32).to_le_bytes());
        data[36..44].copy_from_slice(&supply.to_le_bytes());
        data[44] = decimals;
        data[45] = 1;
        data[46..50].copy_from_slice(&(freeze_auth as u32).to_le_bytes());
        data
    }

    #[test]
    fn test_parse_revoked_authorities() {
        let info = parse_mint_account(&mint_bytes(false, 1_000_000, 6, false)).expect("mint");
        assert_eq!(info.supply, 1_000_000);
        assert_eq!(info.decimals, 6);
        assert!(!info.has_mint_authority);
        assert!(!info.has_freeze_authority);

        let info = parse_mint_account(&mint_bytes(true, 5, 9, true)).expect("mint");
        assert!(info.has_mint_authority);
        assert!(info.has_freeze_authority);
    }

    #[test]
    fn test_short_or_corrupt_mint_is_none() {
        assert!(parse_mint_account(&[0u8; 40]).is_none());
        let mut data = mint_bytes(false, 1, 0, false);
        data[0] = 7;
        assert!(parse_mint_account(&data).is_none());
    }

    #[test]
    fn test_holder_shares() {
        let shares = holder_shares(&[("a".to_string(), 250), ("b".to_string(), 50)], 1_000);
        assert_eq!(shares[0].pct, 25.0);
        assert_eq!(shares[1].pct, 5.0);
        assert_eq!(holder_shares(&[("a".to_string(), 1)], 0)[0].pct, 0.0);
    }

    #[test]
    fn test_invalid_mint_key_is_not_found() {
        assert_eq!(parse_mint_key("not-a-key"), Err(SourceError::NotFound));
    }
}
