//! Core records shared by the discovery, enrichment and guard subsystems.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A base58 account address. Stored and compared as text everywhere outside the decoder.
pub type Address = String;

/// Raw lamports per SOL.
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Convert raw lamports into SOL for display fields.
pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}

/// Where a token was first seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoverySource {
    /// Create instruction observed on the launch program stream
    LaunchStream,
    /// First seen through a graduation transaction
    Migration,
    /// Secondary pull feed
    Feed,
}

impl DiscoverySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoverySource::LaunchStream => "launch_stream",
            DiscoverySource::Migration => "migration",
            DiscoverySource::Feed => "feed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "launch_stream" => Some(DiscoverySource::LaunchStream),
            "migration" => Some(DiscoverySource::Migration),
            "feed" => Some(DiscoverySource::Feed),
            _ => None,
        }
    }
}

/// A token discovered on-chain.
///
/// `creator`, `bonding_curve` and the initial reserves are filled once; later
/// writes only land on fields that are still empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    /// Mint address (unique key)
    pub address: Address,
    /// How the token was discovered
    pub source: DiscoverySource,
    /// Creator wallet
    pub creator: Option<Address>,
    /// Bonding curve account on the launch program
    pub bonding_curve: Option<Address>,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub uri: Option<String>,
    /// Initial virtual SOL reserves in lamports
    pub initial_virtual_sol_reserves: Option<u64>,
    /// Initial virtual token reserves in raw units
    pub initial_virtual_token_reserves: Option<u64>,
    /// Discovery timestamp (ms)
    pub discovered_at: u64,
    /// Graduation timestamp (ms), if seen
    pub migrated_at: Option<u64>,
}

impl Token {
    /// A bare token record with only the required fields set.
    pub fn new(address: impl Into<Address>, source: DiscoverySource, discovered_at: u64) -> Self {
        Self {
            address: address.into(),
            source,
            creator: None,
            bonding_curve: None,
            name: None,
            symbol: None,
            uri: None,
            initial_virtual_sol_reserves: None,
            initial_virtual_token_reserves: None,
            discovered_at,
            migrated_at: None,
        }
    }
}

/// Fields that later stages may fill on an existing token. `None` means "no new information".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenFill {
    pub creator: Option<Address>,
    pub bonding_curve: Option<Address>,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub uri: Option<String>,
}

impl TokenFill {
    pub fn is_empty(&self) -> bool {
        self.creator.is_none()
            && self.bonding_curve.is_none()
            && self.name.is_none()
            && self.symbol.is_none()
            && self.uri.is_none()
    }
}

/// Lifecycle status of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "open",
            PositionStatus::Closed => "closed",
        }
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    /// Pooled liquidity was pulled on-chain
    RugLpRemoved,
    /// Any other reason code recorded by an external collaborator
    Other(String),
}

impl CloseReason {
    pub fn as_str(&self) -> &str {
        match self {
            CloseReason::RugLpRemoved => "rug_lp_removed",
            CloseReason::Other(code) => code.as_str(),
        }
    }

    pub fn parse(code: &str) -> Self {
        match code {
            "rug_lp_removed" => CloseReason::RugLpRemoved,
            other => CloseReason::Other(other.to_string()),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A simulated or real position on a token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: i64,
    pub token: Address,
    pub is_simulated: bool,
    pub status: PositionStatus,
    /// Entry price in USD
    pub entry_price: f64,
    /// Most recent observed price while open
    pub last_price: Option<f64>,
    pub exit_price: Option<f64>,
    /// Size in SOL
    pub size_sol: f64,
    pub close_reason: Option<CloseReason>,
    /// Realised PnL in percent of entry
    pub pnl_pct: Option<f64>,
    pub opened_at: u64,
    pub closed_at: Option<u64>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }
}

/// Insert payload for a new open position.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPosition {
    pub token: Address,
    pub is_simulated: bool,
    pub entry_price: f64,
    pub size_sol: f64,
    pub opened_at: u64,
}

/// Terminal mutation applied to an open position.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionClose {
    pub exit_price: f64,
    pub reason: CloseReason,
    pub pnl_pct: f64,
    pub closed_at: u64,
}

impl PositionClose {
    /// Total loss closure used once liquidity is confirmed gone.
    pub fn total_loss(reason: CloseReason, closed_at: u64) -> Self {
        Self {
            exit_price: 0.0,
            reason,
            pnl_pct: -100.0,
            closed_at,
        }
    }

    /// Closure at an actual fill price.
    pub fn at_price(entry_price: f64, exit_price: f64, reason: CloseReason, closed_at: u64) -> Self {
        let pnl_pct = if entry_price > 0.0 {
            (exit_price / entry_price - 1.0) * 100.0
        } else {
            -100.0
        };
        Self {
            exit_price,
            reason,
            pnl_pct,
            closed_at,
        }
    }
}
