//! Bonding-curve launch program (pump.fun) instructions.

use super::cursor::ByteCursor;
use super::events::{DecodedEvent, MigrationEvent, NewTokenEvent, TradeEvent, TradeSide};
use super::{account_at, RawInstruction, RawTransaction};
use solana_sdk::{pubkey, pubkey::Pubkey};

pub const LAUNCH_PROGRAM_ID: Pubkey = pubkey!("6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P");

/// Account that signs every bonding-curve graduation.
pub const MIGRATION_ACCOUNT: Pubkey = pubkey!("39azUYFWPz3VHgKCf3VChUwbpURdCHRxjWVowf5jUJjg");

pub const CREATE_DISCRIMINATOR: [u8; 8] = [24, 30, 200, 40, 5, 28, 7, 119];
pub const BUY_DISCRIMINATOR: [u8; 8] = [102, 6, 61, 18, 1, 218, 235, 234];
pub const SELL_DISCRIMINATOR: [u8; 8] = [51, 230, 133, 164, 1, 30, 0, 54];

/// Virtual reserves every curve starts with.
pub const INITIAL_VIRTUAL_SOL_RESERVES: u64 = 30_000_000_000;
pub const INITIAL_VIRTUAL_TOKEN_RESERVES: u64 = 1_073_000_000_000_000;

const DISCRIMINATOR_LEN: usize = 8;

// create: mint, mint_authority, bonding_curve, associated_bonding_curve, global,
// mpl_token_metadata, metadata, user, ...
const CREATE_MINT: usize = 0;
const CREATE_BONDING_CURVE: usize = 2;
const CREATE_USER: usize = 7;

// buy/sell: global, fee_recipient, mint, bonding_curve, associated_bonding_curve,
// associated_user, user, ...
const TRADE_MINT: usize = 2;
const TRADE_BONDING_CURVE: usize = 3;
const TRADE_USER: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchInstruction {
    Create,
    Buy,
    Sell,
}

/// Classify by the 8-byte discriminator prefix.
pub fn classify(data: &[u8]) -> Option<LaunchInstruction> {
    let prefix: [u8; 8] = data.get(..DISCRIMINATOR_LEN)?.try_into().ok()?;
    match prefix {
        CREATE_DISCRIMINATOR => Some(LaunchInstruction::Create),
        BUY_DISCRIMINATOR => Some(LaunchInstruction::Buy),
        SELL_DISCRIMINATOR => Some(LaunchInstruction::Sell),
        _ => None,
    }
}

pub fn decode(signature: &str, keys: &[Pubkey], instruction: &RawInstruction) -> Option<DecodedEvent> {
    match classify(&instruction.data)? {
        LaunchInstruction::Create => decode_create(signature, keys, instruction).map(DecodedEvent::NewToken),
        LaunchInstruction::Buy => {
            decode_trade(signature, keys, instruction, TradeSide::Buy).map(DecodedEvent::Trade)
        }
        LaunchInstruction::Sell => {
            decode_trade(signature, keys, instruction, TradeSide::Sell).map(DecodedEvent::Trade)
        }
    }
}

/// name, symbol and uri as length-prefixed strings, then an optional creator key.
pub fn decode_create(
    signature: &str,
    keys: &[Pubkey],
    instruction: &RawInstruction,
) -> Option<NewTokenEvent> {
    let mut cursor = ByteCursor::new(&instruction.data, DISCRIMINATOR_LEN);
    let name = cursor.read_string()?;
    let symbol = cursor.read_string()?;
    let uri = cursor.read_string()?;
    let creator_arg = cursor.read_pubkey();

    let mint = account_at(keys, instruction, CREATE_MINT)?;
    let bonding_curve = account_at(keys, instruction, CREATE_BONDING_CURVE)?;
    let creator = account_at(keys, instruction, CREATE_USER).or(creator_arg)?;

    Some(NewTokenEvent {
        signature: signature.to_string(),
        mint: mint.to_string(),
        creator: creator.to_string(),
        bonding_curve: bonding_curve.to_string(),
        name,
        symbol,
        uri,
    })
}

/// Token amount and SOL bound, both u64 little-endian after the discriminator.
pub fn decode_trade(
    signature: &str,
    keys: &[Pubkey],
    instruction: &RawInstruction,
    side: TradeSide,
) -> Option<TradeEvent> {
    let mut cursor = ByteCursor::new(&instruction.data, DISCRIMINATOR_LEN);
    let token_amount = cursor.read_u64_le()?;
    let sol_bound = cursor.read_u64_le()?;

    let trader = account_at(keys, instruction, TRADE_USER)?;
    let mint = account_at(keys, instruction, TRADE_MINT)?;
    let bonding_curve = account_at(keys, instruction, TRADE_BONDING_CURVE)?;

    Some(TradeEvent::new(
        signature.to_string(),
        mint.to_string(),
        trader.to_string(),
        bonding_curve.to_string(),
        side,
        token_amount,
        sol_bound,
    ))
}

/// Presence of the graduation account anywhere in the keys marks a migration.
///
/// No instruction data is decoded; the mint is taken from the first
/// non-create launch-program instruction that has one at the trade mint slot.
pub fn detect_migration(tx: &RawTransaction) -> Option<MigrationEvent> {
    if !tx.account_keys.contains(&MIGRATION_ACCOUNT) {
        return None;
    }

    let mint = tx
        .instructions
        .iter()
        .filter(|ix| tx.program_id(ix) == Some(&LAUNCH_PROGRAM_ID))
        .filter(|ix| classify(&ix.data) != Some(LaunchInstruction::Create))
        .find_map(|ix| account_at(&tx.account_keys, ix, TRADE_MINT))
        .map(|mint| mint.to_string());

    Some(MigrationEvent {
        signature: tx.signature.clone(),
        mint,
    })
}
