use alloy::primitives::{Address, TxHash, U256};
use serde::Serialize;

use crate::ledger::TransferLog;

/// One observed ERC-20 `Transfer` into the merchant account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferEvent {
    pub tx_hash: TxHash,
    pub from: Address,
    pub to: Address,
    #[serde(serialize_with = "amount::serialize")]
    pub value: U256,
    pub token_symbol: String,
    pub token_address: Address,
    pub block_number: u64,
    /// Position of the log within its block; secondary sort key.
    pub log_index: u64,
}

impl TransferEvent {
    pub fn from_log(log: TransferLog, token_symbol: &str) -> Self {
        Self {
            tx_hash: log.tx_hash,
            from: log.from,
            to: log.to,
            value: log.value,
            token_symbol: token_symbol.to_string(),
            token_address: log.token,
            block_number: log.block_number,
            log_index: log.log_index,
        }
    }
}

/// Outcome of matching an expected amount against observed transfers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationResult {
    pub confirmed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<TxHash>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "amount::serialize_opt"
    )]
    pub amount: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
}

impl ReconciliationResult {
    pub fn unconfirmed() -> Self {
        Self {
            confirmed: false,
            tx_hash: None,
            amount: None,
            token_symbol: None,
            block_number: None,
        }
    }

    pub fn matched(event: &TransferEvent) -> Self {
        Self {
            confirmed: true,
            tx_hash: Some(event.tx_hash),
            amount: Some(event.value),
            token_symbol: Some(event.token_symbol.clone()),
            block_number: Some(event.block_number),
        }
    }
}

/// Outcome of confirming one specific claimed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentConfirmation {
    pub confirmed: bool,
    pub tx_hash: TxHash,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "amount::serialize_opt"
    )]
    pub amount: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
}

impl PaymentConfirmation {
    pub fn unconfirmed(tx_hash: TxHash) -> Self {
        Self {
            confirmed: false,
            tx_hash,
            amount: None,
            token_symbol: None,
            block_number: None,
        }
    }
}

/// Amounts go over the wire as decimal strings of base units.
mod amount {
    use alloy::primitives::U256;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &U256, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_string())
    }

    pub fn serialize_opt<S: Serializer>(value: &Option<U256>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => s.serialize_str(&v.to_string()),
            None => s.serialize_none(),
        }
    }
}
