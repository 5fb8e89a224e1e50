//! Typed events produced by the decoder.

use crate::types::{lamports_to_sol, Address};
use serde::Serialize;

/// Event categories used for listener registration and subscription filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    NewToken,
    Trade,
    Migration,
    LiquidityRemoval,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::NewToken,
        EventKind::Trade,
        EventKind::Migration,
        EventKind::LiquidityRemoval,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::NewToken => "new_token",
            EventKind::Trade => "trade",
            EventKind::Migration => "migration",
            EventKind::LiquidityRemoval => "liquidity_removal",
        }
    }
}

/// A token created on the launch program.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewTokenEvent {
    pub signature: String,
    pub mint: Address,
    pub creator: Address,
    pub bonding_curve: Address,
    pub name: String,
    pub symbol: String,
    pub uri: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// A buy or sell against a bonding curve.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeEvent {
    pub signature: String,
    pub mint: Address,
    pub trader: Address,
    pub bonding_curve: Address,
    pub side: TradeSide,
    /// Raw token amount
    pub token_amount: u64,
    /// Max SOL cost (buy) or min SOL output (sell), raw lamports
    pub sol_bound_lamports: u64,
    /// `sol_bound_lamports` in SOL, for display only
    pub sol_bound: f64,
}

impl TradeEvent {
    pub(crate) fn new(
        signature: String,
        mint: Address,
        trader: Address,
        bonding_curve: Address,
        side: TradeSide,
        token_amount: u64,
        sol_bound_lamports: u64,
    ) -> Self {
        Self {
            signature,
            mint,
            trader,
            bonding_curve,
            side,
            token_amount,
            sol_bound_lamports,
            sol_bound: lamports_to_sol(sol_bound_lamports),
        }
    }
}

/// A bonding-curve token graduating to an AMM pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationEvent {
    pub signature: String,
    /// Best-effort mint taken from a launch-program instruction in the same transaction
    pub mint: Option<Address>,
}

/// Liquidity withdrawn from an AMM pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiquidityRemovalEvent {
    pub signature: String,
    pub pool: Address,
    /// The non wrapped-SOL side of the pool
    pub mint: Address,
    /// Raw LP amount withdrawn, when present in the instruction data
    pub lp_amount: Option<u64>,
}

/// Everything the decoder can extract from a transaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecodedEvent {
    NewToken(NewTokenEvent),
    Trade(TradeEvent),
    Migration(MigrationEvent),
    LiquidityRemoval(LiquidityRemovalEvent),
}

impl DecodedEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DecodedEvent::NewToken(_) => EventKind::NewToken,
            DecodedEvent::Trade(_) => EventKind::Trade,
            DecodedEvent::Migration(_) => EventKind::Migration,
            DecodedEvent::LiquidityRemoval(_) => EventKind::LiquidityRemoval,
        }
    }

    pub fn signature(&self) -> &str {
        match self {
            DecodedEvent::NewToken(e) => &e.signature,
            DecodedEvent::Trade(e) => &e.signature,
            DecodedEvent::Migration(e) => &e.signature,
            DecodedEvent::LiquidityRemoval(e) => &e.signature,
        }
    }

    pub fn mint(&self) -> Option<&str> {
        match self {
            DecodedEvent::NewToken(e) => Some(&e.mint),
            DecodedEvent::Trade(e) => Some(&e.mint),
            DecodedEvent::Migration(e) => e.mint.as_deref(),
            DecodedEvent::LiquidityRemoval(e) => Some(&e.mint),
        }
    }
}
