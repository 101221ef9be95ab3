//! Read-only access to the ledger: head height, ERC-20 transfer logs and
//! transaction receipts.

use std::future::Future;

use alloy::primitives::{Address, TxHash, U256};
use alloy::providers::Provider;
use alloy::rpc::types::{Filter, Log};
use alloy::sol_types::SolEvent;
use alloy::transports::{RpcError, TransportError};

use crate::error::LedgerError;
use crate::ERC20;

/// JSON-RPC error codes providers use for rate limiting. Treated as
/// transient, like transport failures.
const RATE_LIMIT_CODES: [i64; 2] = [429, -32005];

/// A decoded `Transfer(from, to, value)` log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferLog {
    pub token: Address,
    pub tx_hash: TxHash,
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub block_number: u64,
    pub log_index: u64,
}

/// The parts of a transaction receipt the reconciler looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptSummary {
    pub tx_hash: TxHash,
    /// Execution status. `false` means the transaction reverted.
    pub success: bool,
    pub block_number: Option<u64>,
}

/// Ledger RPC backend.
///
/// Implementations report network trouble as [`LedgerError::Transport`] and
/// error responses as [`LedgerError::Rejected`]; the reconciler retries only
/// the former.
pub trait LedgerRpc: Send + Sync {
    /// Current chain head.
    fn block_number(&self) -> impl Future<Output = Result<u64, LedgerError>> + Send;

    /// `Transfer` logs emitted by `token` with `to == recipient` in
    /// `[from_block, to_block]`.
    fn transfer_logs(
        &self,
        token: Address,
        recipient: Address,
        from_block: u64,
        to_block: u64,
    ) -> impl Future<Output = Result<Vec<TransferLog>, LedgerError>> + Send;

    /// Receipt of `tx_hash`, or `None` if the ledger does not know it (yet).
    fn transaction_receipt(
        &self,
        tx_hash: TxHash,
    ) -> impl Future<Output = Result<Option<ReceiptSummary>, LedgerError>> + Send;
}

/// [`LedgerRpc`] over an alloy provider.
#[derive(Debug, Clone)]
pub struct AlloyLedger<P> {
    provider: P,
}

impl<P> AlloyLedger<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }
}

impl<P> LedgerRpc for AlloyLedger<P>
where
    P: Provider + Send + Sync,
{
    async fn block_number(&self) -> Result<u64, LedgerError> {
        self.provider.get_block_number().await.map_err(classify)
    }

    async fn transfer_logs(
        &self,
        token: Address,
        recipient: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TransferLog>, LedgerError> {
        let filter = Filter::new()
            .address(token)
            .event_signature(ERC20::Transfer::SIGNATURE_HASH)
            .topic2(recipient.into_word())
            .from_block(from_block)
            .to_block(to_block);

        let logs = self.provider.get_logs(&filter).await.map_err(classify)?;
        Ok(logs.iter().filter_map(decode_transfer).collect())
    }

    async fn transaction_receipt(
        &self,
        tx_hash: TxHash,
    ) -> Result<Option<ReceiptSummary>, LedgerError> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(classify)?;

        Ok(receipt.map(|r| ReceiptSummary {
            tx_hash: r.transaction_hash,
            success: r.status(),
            block_number: r.block_number,
        }))
    }
}

/// Query an ERC-20 contract's `symbol()`.
pub async fn token_symbol<P: Provider>(provider: &P, token: Address) -> Result<String, LedgerError> {
    let contract = ERC20::new(token, provider);
    contract
        .symbol()
        .call()
        .await
        .map_err(|e| LedgerError::Rejected(format!("symbol() failed for {token}: {e}")))
}

/// Decode a raw log into a [`TransferLog`]. Pending, removed or foreign logs
/// yield `None`.
pub fn decode_transfer(log: &Log) -> Option<TransferLog> {
    if log.removed {
        return None;
    }
    let block_number = log.block_number?;
    let tx_hash = log.transaction_hash?;
    let log_index = log.log_index.unwrap_or_default();

    match log.log_decode::<ERC20::Transfer>() {
        Ok(decoded) => {
            let event = decoded.inner.data;
            Some(TransferLog {
                token: decoded.inner.address,
                tx_hash,
                from: event.from,
                to: event.to,
                value: event.value,
                block_number,
                log_index,
            })
        }
        Err(e) => {
            tracing::debug!(tx = %tx_hash, error = %e, "skipping undecodable transfer log");
            None
        }
    }
}

fn classify(err: TransportError) -> LedgerError {
    match &err {
        RpcError::Transport(_) => LedgerError::Transport(err.to_string()),
        RpcError::ErrorResp(payload) if RATE_LIMIT_CODES.contains(&payload.code) => {
            LedgerError::Transport(err.to_string())
        }
        _ => LedgerError::Rejected(err.to_string()),
    }
}
