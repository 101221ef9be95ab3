//! Webhook-independent payment confirmation by reading the ledger directly.
//!
//! Queries are scoped to the configured merchant and token allow-list. Each
//! call re-queries the ledger; the only state carried between calls is the
//! `last_scanned_block` hint.

use std::sync::atomic::{AtomicU64, Ordering};

use alloy::primitives::{Address, TxHash, U256};
use futures::future::try_join_all;

use crate::constants::{ReconcilerConfig, TokenContract, TOLERANCE_DIVISOR};
use crate::error::ReconcileError;
use crate::ledger::LedgerRpc;
use crate::types::{PaymentConfirmation, ReconciliationResult, TransferEvent};

/// Parameters of one scan. Unset fields fall back to the reconciler config
/// and the chain head. With only one end of the range given, the other lies
/// `blocks_to_scan` blocks away from it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanRequest {
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    pub blocks_to_scan: Option<u64>,
    pub merchant: Option<Address>,
    /// Token symbol or contract address; must name an allow-listed token.
    pub token_filter: Option<String>,
}

/// Inclusive `[expected - tol, expected + tol]` with `tol = floor(expected / 100)`.
pub fn tolerance_window(expected: U256) -> (U256, U256) {
    let tolerance = expected / U256::from(TOLERANCE_DIVISOR);
    (
        expected.saturating_sub(tolerance),
        expected.saturating_add(tolerance),
    )
}

/// First transfer, in the given order, whose value lies in the tolerance
/// window. Ties go to the earlier transfer, not the closer amount.
pub fn first_match(transfers: &[TransferEvent], expected: U256) -> Option<&TransferEvent> {
    let (low, high) = tolerance_window(expected);
    transfers
        .iter()
        .find(|t| t.value >= low && t.value <= high)
}

const NEVER_SCANNED: u64 = u64::MAX;

pub struct ChainReconciler<L> {
    ledger: L,
    config: ReconcilerConfig,
    /// Observability hint only; `NEVER_SCANNED` until the first scan.
    last_scanned_block: AtomicU64,
}

impl<L> ChainReconciler<L> {
    pub fn new(ledger: L, config: ReconcilerConfig) -> Self {
        Self {
            ledger,
            config,
            last_scanned_block: AtomicU64::new(NEVER_SCANNED),
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn last_scanned_block(&self) -> Option<u64> {
        match self.last_scanned_block.load(Ordering::Relaxed) {
            NEVER_SCANNED => None,
            n => Some(n),
        }
    }

    fn resolve_merchant(&self, merchant: Option<Address>) -> Result<Address, ReconcileError> {
        merchant.or(self.config.merchant).ok_or_else(|| {
            ReconcileError::MisconfiguredReconciler("no merchant address configured".to_string())
        })
    }

    fn select_tokens(&self, filter: Option<&str>) -> Result<Vec<&TokenContract>, ReconcileError> {
        if self.config.tokens.is_empty() {
            return Err(ReconcileError::MisconfiguredReconciler(
                "no token contracts allow-listed".to_string(),
            ));
        }
        Ok(match filter.map(str::trim).filter(|f| !f.is_empty()) {
            Some(f) => self.config.tokens.iter().filter(|t| t.matches(f)).collect(),
            None => self.config.tokens.iter().collect(),
        })
    }
}

impl<L: LedgerRpc> ChainReconciler<L> {
    /// Current chain head, under the retry policy.
    pub async fn head_block(&self) -> Result<u64, ReconcileError> {
        self.config
            .retry
            .run("eth_blockNumber", || self.ledger.block_number())
            .await
    }

    /// Transfers into the merchant across the allow-listed tokens, ordered by
    /// ascending block number then log position.
    ///
    /// Contracts are queried concurrently; the merge is sorted afterwards so
    /// completion order never shows in the output.
    pub async fn scan_transfers(
        &self,
        request: &ScanRequest,
    ) -> Result<Vec<TransferEvent>, ReconcileError> {
        let merchant = self.resolve_merchant(request.merchant)?;
        let tokens = self.select_tokens(request.token_filter.as_deref())?;

        let span = request.blocks_to_scan.unwrap_or(self.config.blocks_to_scan);
        let (from_block, to_block) = match (request.from_block, request.to_block) {
            (Some(from), Some(to)) => (from, to),
            (None, Some(to)) => (to.saturating_sub(span), to),
            // An open end runs `span` blocks forward, never past the head.
            (Some(from), None) => {
                let head = self.head_block().await?;
                (from, head.min(from.saturating_add(span)))
            }
            (None, None) => {
                let head = self.head_block().await?;
                (head.saturating_sub(span), head)
            }
        };

        if from_block > to_block {
            return Err(ReconcileError::InvalidRequest(format!(
                "fromBlock {from_block} is after toBlock {to_block}"
            )));
        }
        if tokens.is_empty() {
            tracing::debug!(filter = ?request.token_filter, "token filter matches no allow-listed contract");
            return Ok(Vec::new());
        }

        let queries = tokens.iter().map(|token| async move {
            let logs = self
                .config
                .retry
                .run("eth_getLogs", || {
                    self.ledger
                        .transfer_logs(token.address, merchant, from_block, to_block)
                })
                .await?;
            Ok::<_, ReconcileError>(
                logs.into_iter()
                    .filter(|log| log.to == merchant && log.token == token.address)
                    .map(|log| TransferEvent::from_log(log, &token.symbol))
                    .collect::<Vec<_>>(),
            )
        });

        let mut transfers: Vec<TransferEvent> =
            try_join_all(queries).await?.into_iter().flatten().collect();
        transfers.sort_by_key(|t| (t.block_number, t.log_index));

        self.last_scanned_block.store(to_block, Ordering::Relaxed);
        tracing::debug!(
            from_block,
            to_block,
            contracts = tokens.len(),
            found = transfers.len(),
            "transfer scan complete"
        );
        Ok(transfers)
    }

    /// Look for a transfer within ±1% of `expected_amount_raw` (base units).
    ///
    /// The lowest-block match wins even if a later transfer is closer to the
    /// exact amount. No match is an unconfirmed result, not an error.
    pub async fn check_payment_received(
        &self,
        expected_amount_raw: U256,
        request: &ScanRequest,
    ) -> Result<ReconciliationResult, ReconcileError> {
        if expected_amount_raw.is_zero() {
            return Err(ReconcileError::InvalidRequest(
                "expected amount must be non-zero".to_string(),
            ));
        }

        let transfers = self.scan_transfers(request).await?;
        match first_match(&transfers, expected_amount_raw) {
            Some(hit) => {
                tracing::info!(
                    tx = %hit.tx_hash,
                    amount = %hit.value,
                    expected = %expected_amount_raw,
                    token = %hit.token_symbol,
                    block = hit.block_number,
                    "payment found on-chain"
                );
                Ok(ReconciliationResult::matched(hit))
            }
            None => {
                tracing::info!(
                    expected = %expected_amount_raw,
                    scanned = transfers.len(),
                    "no matching payment in scanned range"
                );
                Ok(ReconciliationResult::unconfirmed())
            }
        }
    }

    /// Confirm one claimed transaction paid the merchant in an allow-listed
    /// token.
    ///
    /// A reverted receipt is unconfirmed without any log query. Otherwise the
    /// transfer logs of the receipt's block are searched for this exact hash.
    pub async fn confirm_payment(
        &self,
        tx_hash: TxHash,
        merchant: Option<Address>,
    ) -> Result<PaymentConfirmation, ReconcileError> {
        let merchant = self.resolve_merchant(merchant)?;
        // Fail on an empty allow-list before spending a receipt query.
        self.select_tokens(None)?;

        let receipt = self
            .config
            .retry
            .run("eth_getTransactionReceipt", || {
                self.ledger.transaction_receipt(tx_hash)
            })
            .await?;

        let Some(receipt) = receipt else {
            tracing::info!(tx = %tx_hash, "claimed transaction not found on-chain");
            return Ok(PaymentConfirmation::unconfirmed(tx_hash));
        };
        if !receipt.success {
            tracing::warn!(tx = %tx_hash, "claimed transaction reverted");
            return Ok(PaymentConfirmation::unconfirmed(tx_hash));
        }
        let Some(block) = receipt.block_number else {
            tracing::info!(tx = %tx_hash, "claimed transaction not yet in a block");
            return Ok(PaymentConfirmation::unconfirmed(tx_hash));
        };

        let transfers = self
            .scan_transfers(&ScanRequest {
                from_block: Some(block),
                to_block: Some(block),
                merchant: Some(merchant),
                ..ScanRequest::default()
            })
            .await?;

        match transfers.iter().find(|t| t.tx_hash == tx_hash) {
            Some(hit) => {
                tracing::info!(
                    tx = %tx_hash,
                    amount = %hit.value,
                    token = %hit.token_symbol,
                    block,
                    "claimed payment confirmed"
                );
                Ok(PaymentConfirmation {
                    confirmed: true,
                    tx_hash,
                    amount: Some(hit.value),
                    token_symbol: Some(hit.token_symbol.clone()),
                    block_number: Some(block),
                })
            }
            None => {
                tracing::info!(
                    tx = %tx_hash,
                    "claimed transaction carries no allow-listed transfer to merchant"
                );
                Ok(PaymentConfirmation::unconfirmed(tx_hash))
            }
        }
    }
}
