//! AMM liquidity program (Raydium AMM v4) remove-liquidity decoding.

use super::cursor::ByteCursor;
use super::events::LiquidityRemovalEvent;
use super::{account_at, RawInstruction};
use solana_sdk::{pubkey, pubkey::Pubkey};

pub const AMM_PROGRAM_ID: Pubkey = pubkey!("675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8");

pub const WRAPPED_SOL_MINT: Pubkey = pubkey!("So11111111111111111111111111111111111111112");

/// Leading opcode byte of the withdraw instruction.
pub const REMOVE_LIQUIDITY_OPCODE: u8 = 4;

const POOL_ACCOUNT: usize = 1;
const POOL_MINT_A_ACCOUNT: usize = 8;
const POOL_MINT_B_ACCOUNT: usize = 9;

pub fn decode(signature: &str, keys: &[Pubkey], instruction: &RawInstruction) -> Option<LiquidityRemovalEvent> {
    if *instruction.data.first()? != REMOVE_LIQUIDITY_OPCODE {
        return None;
    }

    let pool = account_at(keys, instruction, POOL_ACCOUNT)?;
    let mint_a = account_at(keys, instruction, POOL_MINT_A_ACCOUNT)?;
    let mint_b = account_at(keys, instruction, POOL_MINT_B_ACCOUNT)?;

    let mint = match (mint_a == WRAPPED_SOL_MINT, mint_b == WRAPPED_SOL_MINT) {
        (true, true) => return None,
        (true, false) => mint_b,
        _ => mint_a,
    };

    let lp_amount = ByteCursor::new(&instruction.data, 1).read_u64_le();

    Some(LiquidityRemovalEvent {
        signature: signature.to_string(),
        pool: pool.to_string(),
        mint: mint.to_string(),
        lp_amount,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(mint_a: Pubkey, mint_b: Pubkey) -> (Vec<Pubkey>, RawInstruction) {
        let mut keys: Vec<Pubkey> = (0..10).map(|_| Pubkey::new_unique()).collect();
        keys[8] = mint_a;
        keys[9] = mint_b;
        let mut data = vec![REMOVE_LIQUIDITY_OPCODE];
        data.extend_from_slice(&1_234u64.to_le_bytes());
        let instruction = RawInstruction {
            program_id_index: 0,
            accounts: (0..10).collect(),
            data,
        };
        (keys, instruction)
    }

    #[test]
    fn test_token_is_the_non_wsol_side() {
        let token = Pubkey::new_unique();

        let (keys, instruction) = fixture(WRAPPED_SOL_MINT, token);
        let event = decode("sig", &keys, &instruction).expect("decodes");
        assert_eq!(event.mint, token.to_string());
        assert_eq!(event.pool, keys[1].to_string());
        assert_eq!(event.lp_amount, Some(1_234));

        let (keys, instruction) = fixture(token, WRAPPED_SOL_MINT);
        let event = decode("sig", &keys, &instruction).expect("decodes");
        assert_eq!(event.mint, token.to_string());
    }

    #[test]
    fn test_amount_is_optional() {
        let (keys, mut instruction) = fixture(WRAPPED_SOL_MINT, Pubkey::new_unique());
        instruction.data.truncate(5);
        let event = decode("sig", &keys, &instruction).expect("opcode alone is enough");
        assert_eq!(event.lp_amount, None);
    }

    #[test]
    fn test_other_opcodes_and_empty_data_are_ignored() {
        let (keys, mut instruction) = fixture(WRAPPED_SOL_MINT, Pubkey::new_unique());
        instruction.data[0] = 9;
        assert!(decode("sig", &keys, &instruction).is_none());

        instruction.data.clear();
        assert!(decode("sig", &keys, &instruction).is_none());
    }

    #[test]
    fn test_missing_mint_accounts_is_none() {
        let (keys, mut instruction) = fixture(WRAPPED_SOL_MINT, Pubkey::new_unique());
        instruction.accounts.truncate(9);
        assert!(decode("sig", &keys, &instruction).is_none());

        let (keys, mut instruction) = fixture(WRAPPED_SOL_MINT, Pubkey::new_unique());
        instruction.accounts[9] = 77;
        assert!(decode("sig", &keys, &instruction).is_none());
    }

    #[test]
    fn test_wsol_on_both_sides_is_none() {
        let (keys, instruction) = fixture(WRAPPED_SOL_MINT, WRAPPED_SOL_MINT);
        assert!(decode("sig", &keys, &instruction).is_none());
    }
}
