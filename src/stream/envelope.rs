//! Parsing of websocket frames into decoder input.
//!
//! A `transactionNotification` carries the transaction as base64 wire bytes
//! plus a meta block. The meta supplies the address-table keys that follow the
//! static keys, and the inner (CPI) instructions with bs58 data.

use crate::decoder::{RawInstruction, RawTransaction};
use serde::Deserialize;
use serde_json::Value;
use solana_sdk::pubkey::Pubkey;
use solana_transaction_status::EncodedTransaction;
use std::str::FromStr;

/// What one text frame turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    Transaction(RawTransaction),
    /// Subscription acknowledged with this id
    Subscribed(u64),
    /// JSON-RPC error reply
    RpcError(String),
    /// Failed transactions, unknown methods and similar
    Ignored,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<Value>,
    method: Option<String>,
    params: Option<NotificationParams>,
}

#[derive(Debug, Deserialize)]
struct NotificationParams {
    result: Value,
}

#[derive(Debug, Deserialize)]
struct NotificationResult {
    signature: Option<String>,
    transaction: TransactionWithMeta,
}

#[derive(Debug, Deserialize)]
struct TransactionWithMeta {
    transaction: EncodedTransaction,
    meta: Option<TransactionMeta>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionMeta {
    err: Option<Value>,
    loaded_addresses: Option<LoadedAddresses>,
    inner_instructions: Option<Vec<InnerInstructionSet>>,
}

#[derive(Debug, Default, Deserialize)]
struct LoadedAddresses {
    #[serde(default)]
    writable: Vec<String>,
    #[serde(default)]
    readonly: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct InnerInstructionSet {
    instructions: Vec<InnerInstruction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InnerInstruction {
    program_id_index: u8,
    accounts: Vec<u8>,
    data: String,
}

/// Parse one text frame. Malformed frames are an error for the caller to count.
pub fn parse_message(text: &str) -> Result<StreamMessage, serde_json::Error> {
    let envelope: Envelope = serde_json::from_str(text)?;

    if let Some(error) = envelope.error {
        return Ok(StreamMessage::RpcError(error.to_string()));
    }
    if envelope.method.is_none() {
        if let (Some(_), Some(id)) = (envelope.id, envelope.result.as_ref().and_then(Value::as_u64)) {
            return Ok(StreamMessage::Subscribed(id));
        }
        return Ok(StreamMessage::Ignored);
    }
    if envelope.method.as_deref() != Some("transactionNotification") {
        return Ok(StreamMessage::Ignored);
    }
    let Some(params) = envelope.params else {
        return Ok(StreamMessage::Ignored);
    };

    let result: NotificationResult = serde_json::from_value(params.result)?;
    Ok(raw_transaction(result)
        .map(StreamMessage::Transaction)
        .unwrap_or(StreamMessage::Ignored))
}

fn raw_transaction(result: NotificationResult) -> Option<RawTransaction> {
    let meta = result.transaction.meta.unwrap_or_default();
    if meta.err.as_ref().is_some_and(|err| !err.is_null()) {
        return None;
    }

    let tx = result.transaction.transaction.decode()?;
    let signature = result
        .signature
        .or_else(|| tx.signatures.first().map(|s| s.to_string()))?;

    let mut account_keys: Vec<Pubkey> = tx.message.static_account_keys().to_vec();
    if let Some(loaded) = meta.loaded_addresses {
        for key in loaded.writable.iter().chain(loaded.readonly.iter()) {
            account_keys.push(Pubkey::from_str(key).ok()?);
        }
    }

    let mut instructions: Vec<RawInstruction> = tx
        .message
        .instructions()
        .iter()
        .map(|ix| RawInstruction {
            program_id_index: ix.program_id_index,
            accounts: ix.accounts.clone(),
            data: ix.data.clone(),
        })
        .collect();

    for set in meta.inner_instructions.unwrap_or_default() {
        for inner in set.instructions {
            // An undecodable inner payload only loses that instruction
            let Ok(data) = bs58::decode(&inner.data).into_vec() else {
                continue;
            };
            instructions.push(RawInstruction {
                program_id_index: inner.program_id_index,
                accounts: inner.accounts,
                data,
            });
        }
    }

    Some(RawTransaction {
        signature,
        account_keys,
        instructions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use serde_json::json;
    use solana_sdk::instruction::{AccountMeta, Instruction};
    use solana_sdk::message::{Message, VersionedMessage};
    use solana_sdk::signature::Signature;
    use solana_sdk::transaction::VersionedTransaction;

    fn encoded_tx(program: Pubkey, account: Pubkey) -> String {
        let payer = Pubkey::new_unique();
        let instruction =
            Instruction::new_with_bytes(program, &[7, 7, 7], vec![AccountMeta::new(account, false)]);
        let message = Message::new(&[instruction], Some(&payer));
        let tx = VersionedTransaction {
            signatures: vec![Signature::default()],
            message: VersionedMessage::Legacy(message),
        };
        base64::engine::general_purpose::STANDARD.encode(bincode::serialize(&tx).unwrap())
    }

    fn notification(encoded: &str, err: Value) -> String {
        let writable = Pubkey::new_unique().to_string();
        let readonly = Pubkey::new_unique().to_string();
        json!({
            "jsonrpc": "2.0",
            "method": "transactionNotification",
            "params": {
                "subscription": 42,
                "result": {
                    "signature": "5abc",
                    "slot": 1,
                    "transaction": {
                        "transaction": [encoded, "base64"],
                        "meta": {
                            "err": err,
                            "loadedAddresses": { "writable": [writable], "readonly": [readonly] },
                            "innerInstructions": [{
                                "index": 0,
                                "instructions": [{
                                    "programIdIndex": 2,
                                    "accounts": [1, 3],
                                    "data": bs58::encode([4u8, 1, 0, 0, 0, 0, 0, 0, 0]).into_string()
                                }]
                            }]
                        }
                    }
                }
            }
        })
        .to_string()
    }

    #[test]
    fn test_notification_includes_loaded_keys_and_inner_instructions() {
        let program = Pubkey::new_unique();
        let account = Pubkey::new_unique();
        let text = notification(&encoded_tx(program, account), Value::Null);

        let StreamMessage::Transaction(tx) = parse_message(&text).unwrap() else {
            panic!("expected a transaction");
        };
        assert_eq!(tx.signature, "5abc");
        // payer, account, program + two loaded keys
        assert_eq!(tx.account_keys.len(), 5);
        assert!(tx.account_keys.contains(&program));
        assert_eq!(tx.instructions.len(), 2);
        assert_eq!(tx.instructions[0].data, vec![7, 7, 7]);
        assert_eq!(tx.instructions[1].data[0], 4);
        assert_eq!(tx.instructions[1].accounts, vec![1, 3]);
    }

    #[test]
    fn test_failed_transaction_is_ignored() {
        let text = notification(
            &encoded_tx(Pubkey::new_unique(), Pubkey::new_unique()),
            json!({"InstructionError": [0, "Custom"]}),
        );
        assert_eq!(parse_message(&text).unwrap(), StreamMessage::Ignored);
    }

    #[test]
    fn test_control_frames() {
        assert_eq!(
            parse_message(r#"{"jsonrpc":"2.0","result":9001,"id":1}"#).unwrap(),
            StreamMessage::Subscribed(9001)
        );
        assert!(matches!(
            parse_message(r#"{"jsonrpc":"2.0","error":{"code":-32601,"message":"nope"},"id":1}"#).unwrap(),
            StreamMessage::RpcError(_)
        ));
        assert_eq!(
            parse_message(r#"{"jsonrpc":"2.0","method":"slotNotification","params":{"result":{}}}"#).unwrap(),
            StreamMessage::Ignored
        );
        assert!(parse_message("not json").is_err());
    }
}
