//! Protocol decoder for the launch program and the AMM liquidity program.
//!
//! Everything in here is a pure function from raw transaction parts to typed
//! events. Short buffers, out-of-range account indices and invalid UTF-8 all
//! degrade to "no event" for that instruction; nothing panics or returns an
//! error past this module.

pub mod amm;
mod cursor;
pub mod events;
pub mod launch;

pub use events::{
    DecodedEvent, EventKind, LiquidityRemovalEvent, MigrationEvent, NewTokenEvent, TradeEvent,
    TradeSide,
};

use solana_sdk::pubkey::Pubkey;

/// One compiled instruction, outer or inner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawInstruction {
    /// Index of the program id in the transaction's account keys
    pub program_id_index: u8,
    /// Instruction-local account list, as indices into the account keys
    pub accounts: Vec<u8>,
    pub data: Vec<u8>,
}

/// The parts of a transaction the decoder needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTransaction {
    pub signature: String,
    /// Static keys followed by address-table writable and readonly keys
    pub account_keys: Vec<Pubkey>,
    /// Outer instructions followed by inner (CPI) instructions
    pub instructions: Vec<RawInstruction>,
}

impl RawTransaction {
    pub fn program_id(&self, instruction: &RawInstruction) -> Option<&Pubkey> {
        self.account_keys.get(instruction.program_id_index as usize)
    }
}

/// Resolve the account at `position` in the instruction-local list into the global key list.
pub(crate) fn account_at(
    keys: &[Pubkey],
    instruction: &RawInstruction,
    position: usize,
) -> Option<Pubkey> {
    let key_index = *instruction.accounts.get(position)? as usize;
    keys.get(key_index).copied()
}

/// Decode every recognised instruction in a transaction, plus the migration marker.
pub fn decode_transaction(tx: &RawTransaction) -> Vec<DecodedEvent> {
    let mut events = Vec::new();

    for instruction in &tx.instructions {
        let Some(program_id) = tx.program_id(instruction) else {
            continue;
        };
        let event = if *program_id == launch::LAUNCH_PROGRAM_ID {
            launch::decode(&tx.signature, &tx.account_keys, instruction)
        } else if *program_id == amm::AMM_PROGRAM_ID {
            amm::decode(&tx.signature, &tx.account_keys, instruction).map(DecodedEvent::LiquidityRemoval)
        } else {
            None
        };
        if let Some(event) = event {
            events.push(event);
        }
    }

    if let Some(migration) = launch::detect_migration(tx) {
        events.push(DecodedEvent::Migration(migration));
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade_data(discriminator: [u8; 8], amount: u64, bound: u64) -> Vec<u8> {
        let mut data = discriminator.to_vec();
        data.extend_from_slice(&amount.to_le_bytes());
        data.extend_from_slice(&bound.to_le_bytes());
        data
    }

    #[test]
    fn test_unknown_program_yields_nothing() {
        let keys = vec![Pubkey::new_unique(), Pubkey::new_unique()];
        let tx = RawTransaction {
            signature: "sig".to_string(),
            account_keys: keys,
            instructions: vec![RawInstruction {
                program_id_index: 1,
                accounts: vec![0],
                data: vec![1, 2, 3],
            }],
        };
        assert!(decode_transaction(&tx).is_empty());
    }

    #[test]
    fn test_program_index_out_of_range_is_skipped() {
        let tx = RawTransaction {
            signature: "sig".to_string(),
            account_keys: vec![Pubkey::new_unique()],
            instructions: vec![RawInstruction {
                program_id_index: 9,
                accounts: vec![],
                data: launch::BUY_DISCRIMINATOR.to_vec(),
            }],
        };
        assert!(decode_transaction(&tx).is_empty());
    }

    #[test]
    fn test_mixed_transaction_decodes_each_instruction() {
        let mint = Pubkey::new_unique();
        let curve = Pubkey::new_unique();
        let trader = Pubkey::new_unique();
        let mut keys: Vec<Pubkey> = (0..7).map(|_| Pubkey::new_unique()).collect();
        keys[2] = mint;
        keys[3] = curve;
        keys[6] = trader;
        keys.push(launch::LAUNCH_PROGRAM_ID);
        keys.push(launch::MIGRATION_ACCOUNT);

        let tx = RawTransaction {
            signature: "sig-mixed".to_string(),
            account_keys: keys,
            instructions: vec![RawInstruction {
                program_id_index: 7,
                accounts: (0..7).collect(),
                data: trade_data(launch::SELL_DISCRIMINATOR, 500, 2_000_000_000),
            }],
        };

        let events = decode_transaction(&tx);
        assert_eq!(events.len(), 2);
        match &events[0] {
            DecodedEvent::Trade(trade) => {
                assert_eq!(trade.side, TradeSide::Sell);
                assert_eq!(trade.mint, mint.to_string());
                assert_eq!(trade.trader, trader.to_string());
                assert_eq!(trade.token_amount, 500);
                assert_eq!(trade.sol_bound, 2.0);
            }
            other => panic!("expected trade, got {:?}", other),
        }
        match &events[1] {
            DecodedEvent::Migration(migration) => {
                assert_eq!(migration.mint.as_deref(), Some(mint.to_string().as_str()));
            }
            other => panic!("expected migration, got {:?}", other),
        }
    }
}
