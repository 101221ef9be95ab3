use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{Address, TxHash, U256};

use pix_reconcile::ledger::{ReceiptSummary, TransferLog};
use pix_reconcile::{
    ChainReconciler, LedgerError, LedgerRpc, ReconcileError, ReconcilerConfig, RetryPolicy,
    ScanRequest, TokenContract,
};

const MERCHANT: Address = Address::repeat_byte(0x4d);
const PAYER: Address = Address::repeat_byte(0x50);
const USDC: Address = Address::repeat_byte(0xc1);
const USDT: Address = Address::repeat_byte(0xc2);

/// In-memory ledger. Honors the token/recipient/range filter like a node would.
#[derive(Clone, Default)]
struct MockLedger {
    head: u64,
    logs: Vec<TransferLog>,
    receipts: HashMap<TxHash, ReceiptSummary>,
    /// Artificial latency per token contract.
    delays: HashMap<Address, Duration>,
    down: bool,
    log_calls: Arc<AtomicUsize>,
    /// Every `[from, to]` passed to `transfer_logs`.
    ranges: Arc<Mutex<Vec<(u64, u64)>>>,
}

impl LedgerRpc for MockLedger {
    async fn block_number(&self) -> Result<u64, LedgerError> {
        if self.down {
            return Err(LedgerError::Transport("connection refused".into()));
        }
        Ok(self.head)
    }

    async fn transfer_logs(
        &self,
        token: Address,
        recipient: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TransferLog>, LedgerError> {
        self.log_calls.fetch_add(1, Ordering::SeqCst);
        self.ranges.lock().unwrap().push((from_block, to_block));
        if self.down {
            return Err(LedgerError::Transport("connection refused".into()));
        }
        if let Some(delay) = self.delays.get(&token) {
            tokio::time::sleep(*delay).await;
        }
        Ok(self
            .logs
            .iter()
            .filter(|l| {
                l.token == token
                    && l.to == recipient
                    && l.block_number >= from_block
                    && l.block_number <= to_block
            })
            .cloned()
            .collect())
    }

    async fn transaction_receipt(
        &self,
        tx_hash: TxHash,
    ) -> Result<Option<ReceiptSummary>, LedgerError> {
        if self.down {
            return Err(LedgerError::Transport("connection refused".into()));
        }
        Ok(self.receipts.get(&tx_hash).cloned())
    }
}

fn tx(n: u8) -> TxHash {
    TxHash::repeat_byte(n)
}

fn transfer(token: Address, tx_hash: TxHash, value: u64, block: u64, index: u64) -> TransferLog {
    TransferLog {
        token,
        tx_hash,
        from: PAYER,
        to: MERCHANT,
        value: U256::from(value),
        block_number: block,
        log_index: index,
    }
}

fn config() -> ReconcilerConfig {
    ReconcilerConfig {
        retry: RetryPolicy {
            max_attempts: 2,
            call_timeout: Duration::from_millis(500),
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        },
        ..ReconcilerConfig::new(
            MERCHANT,
            vec![
                TokenContract::new("USDC", USDC),
                TokenContract::new("USDT", USDT),
            ],
        )
    }
}

fn ledger_with(logs: Vec<TransferLog>) -> MockLedger {
    MockLedger {
        head: 1_000,
        logs,
        ..MockLedger::default()
    }
}

// -- checkPaymentReceived --

#[tokio::test]
async fn test_exact_amount_confirmed_with_tx_hash() {
    let reconciler = ChainReconciler::new(
        ledger_with(vec![transfer(USDC, tx(1), 25_000_000, 950, 0)]),
        config(),
    );

    let result = reconciler
        .check_payment_received(U256::from(25_000_000u64), &ScanRequest::default())
        .await
        .unwrap();

    assert!(result.confirmed);
    assert_eq!(result.tx_hash, Some(tx(1)));
    assert_eq!(result.amount, Some(U256::from(25_000_000u64)));
    assert_eq!(result.token_symbol.as_deref(), Some("USDC"));
    assert_eq!(result.block_number, Some(950));
}

#[tokio::test]
async fn test_within_one_percent_confirmed() {
    let reconciler = ChainReconciler::new(
        ledger_with(vec![transfer(USDC, tx(1), 999, 990, 0)]),
        config(),
    );
    let result = reconciler
        .check_payment_received(U256::from(1_000u64), &ScanRequest::default())
        .await
        .unwrap();
    assert!(result.confirmed);
    assert_eq!(result.amount, Some(U256::from(999u64)));
}

#[tokio::test]
async fn test_window_edges_inclusive() {
    for (value, expected_confirmed) in [(990, true), (1_010, true), (989, false), (1_011, false)] {
        let reconciler = ChainReconciler::new(
            ledger_with(vec![transfer(USDC, tx(1), value, 990, 0)]),
            config(),
        );
        let result = reconciler
            .check_payment_received(U256::from(1_000u64), &ScanRequest::default())
            .await
            .unwrap();
        assert_eq!(result.confirmed, expected_confirmed, "value {value}");
    }
}

#[tokio::test]
async fn test_outside_window_is_unconfirmed_not_error() {
    let reconciler = ChainReconciler::new(
        ledger_with(vec![transfer(USDC, tx(1), 900, 990, 0)]),
        config(),
    );
    let result = reconciler
        .check_payment_received(U256::from(1_000u64), &ScanRequest::default())
        .await
        .unwrap();
    assert!(!result.confirmed);
    assert_eq!(result.tx_hash, None);
}

#[tokio::test]
async fn test_first_in_window_wins_over_closest() {
    // Two distinct transfers land in the same window. The earlier one is
    // accepted even though the later one is the exact amount: a known
    // false-positive risk when payments of similar size arrive together.
    let reconciler = ChainReconciler::new(
        ledger_with(vec![
            transfer(USDT, tx(2), 1_000, 960, 0),
            transfer(USDC, tx(1), 1_009, 955, 4),
        ]),
        config(),
    );
    let result = reconciler
        .check_payment_received(U256::from(1_000u64), &ScanRequest::default())
        .await
        .unwrap();
    assert!(result.confirmed);
    assert_eq!(result.tx_hash, Some(tx(1)));
    assert_eq!(result.block_number, Some(955));
}

#[tokio::test]
async fn test_zero_expected_amount_rejected() {
    let reconciler = ChainReconciler::new(ledger_with(vec![]), config());
    let err = reconciler
        .check_payment_received(U256::ZERO, &ScanRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::InvalidRequest(_)));
}

// -- scanTransfers --

#[tokio::test]
async fn test_scan_defaults_to_head_minus_window() {
    let reconciler = ChainReconciler::new(
        ledger_with(vec![
            transfer(USDC, tx(1), 10, 700, 0),
            transfer(USDC, tx(2), 20, 800, 0),
            transfer(USDC, tx(3), 30, 1_000, 0),
        ]),
        config(),
    );
    assert_eq!(reconciler.last_scanned_block(), None);

    let transfers = reconciler
        .scan_transfers(&ScanRequest::default())
        .await
        .unwrap();

    let blocks: Vec<u64> = transfers.iter().map(|t| t.block_number).collect();
    assert_eq!(blocks, vec![800, 1_000]);
    assert_eq!(reconciler.last_scanned_block(), Some(1_000));
}

#[tokio::test]
async fn test_scan_explicit_range() {
    let reconciler = ChainReconciler::new(
        ledger_with(vec![
            transfer(USDC, tx(1), 10, 100, 0),
            transfer(USDC, tx(2), 20, 150, 0),
        ]),
        config(),
    );
    let transfers = reconciler
        .scan_transfers(&ScanRequest {
            to_block: Some(120),
            blocks_to_scan: Some(50),
            ..ScanRequest::default()
        })
        .await
        .unwrap();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].tx_hash, tx(1));
}

#[tokio::test]
async fn test_scan_from_block_only_is_bounded_by_window() {
    let mut ledger = ledger_with(vec![
        transfer(USDC, tx(1), 10, 40, 0),
        transfer(USDC, tx(2), 20, 60, 0),
    ]);
    ledger.head = 20_000_000;
    let ranges = ledger.ranges.clone();
    let reconciler = ChainReconciler::new(
        ledger,
        ReconcilerConfig {
            tokens: vec![TokenContract::new("USDC", USDC)],
            ..config()
        },
    );

    let transfers = reconciler
        .scan_transfers(&ScanRequest {
            from_block: Some(0),
            blocks_to_scan: Some(50),
            ..ScanRequest::default()
        })
        .await
        .unwrap();

    assert_eq!(*ranges.lock().unwrap(), vec![(0, 50)]);
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].tx_hash, tx(1));
    assert_eq!(reconciler.last_scanned_block(), Some(50));
}

#[tokio::test]
async fn test_scan_from_block_only_stops_at_head() {
    let ledger = ledger_with(vec![]);
    let ranges = ledger.ranges.clone();
    let reconciler = ChainReconciler::new(
        ledger,
        ReconcilerConfig {
            tokens: vec![TokenContract::new("USDC", USDC)],
            ..config()
        },
    );

    reconciler
        .scan_transfers(&ScanRequest {
            from_block: Some(900),
            ..ScanRequest::default()
        })
        .await
        .unwrap();

    // Default window is 200 blocks, but the head is 1000.
    assert_eq!(*ranges.lock().unwrap(), vec![(900, 1_000)]);
}

#[tokio::test]
async fn test_scan_ending_at_genesis_is_reported() {
    let reconciler = ChainReconciler::new(ledger_with(vec![]), config());
    reconciler
        .scan_transfers(&ScanRequest {
            from_block: Some(0),
            to_block: Some(0),
            ..ScanRequest::default()
        })
        .await
        .unwrap();
    assert_eq!(reconciler.last_scanned_block(), Some(0));
}

#[tokio::test]
async fn test_scan_merges_contracts_in_block_order_despite_latency() {
    let mut ledger = ledger_with(vec![
        transfer(USDC, tx(1), 1, 905, 2),
        transfer(USDT, tx(2), 2, 903, 0),
        transfer(USDT, tx(3), 3, 907, 1),
        transfer(USDC, tx(4), 4, 905, 1),
    ]);
    // USDT answers first, USDC last.
    ledger.delays.insert(USDC, Duration::from_millis(40));

    let reconciler = ChainReconciler::new(ledger, config());
    let transfers = reconciler
        .scan_transfers(&ScanRequest::default())
        .await
        .unwrap();

    let order: Vec<TxHash> = transfers.iter().map(|t| t.tx_hash).collect();
    assert_eq!(order, vec![tx(2), tx(4), tx(1), tx(3)]);
}

#[tokio::test]
async fn test_token_filter_restricts_contracts() {
    let ledger = ledger_with(vec![
        transfer(USDC, tx(1), 1_000, 950, 0),
        transfer(USDT, tx(2), 1_000, 960, 0),
    ]);
    let calls = ledger.log_calls.clone();
    let reconciler = ChainReconciler::new(ledger, config());

    let transfers = reconciler
        .scan_transfers(&ScanRequest {
            token_filter: Some("usdt".to_string()),
            ..ScanRequest::default()
        })
        .await
        .unwrap();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].token_symbol, "USDT");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unknown_token_filter_matches_nothing() {
    let ledger = ledger_with(vec![transfer(USDC, tx(1), 1_000, 950, 0)]);
    let calls = ledger.log_calls.clone();
    let reconciler = ChainReconciler::new(ledger, config());

    let transfers = reconciler
        .scan_transfers(&ScanRequest {
            token_filter: Some("DAI".to_string()),
            ..ScanRequest::default()
        })
        .await
        .unwrap();
    assert!(transfers.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_inverted_range_rejected() {
    let reconciler = ChainReconciler::new(ledger_with(vec![]), config());
    let err = reconciler
        .scan_transfers(&ScanRequest {
            from_block: Some(500),
            to_block: Some(400),
            ..ScanRequest::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_unreachable_ledger_is_error_not_unconfirmed() {
    let mut ledger = ledger_with(vec![transfer(USDC, tx(1), 1_000, 950, 0)]);
    ledger.down = true;
    let reconciler = ChainReconciler::new(ledger, config());

    let err = reconciler
        .check_payment_received(U256::from(1_000u64), &ScanRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::RpcUnavailable(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_missing_merchant_is_misconfigured() {
    let mut cfg = config();
    cfg.merchant = None;
    let reconciler = ChainReconciler::new(ledger_with(vec![]), cfg);

    let err = reconciler
        .scan_transfers(&ScanRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::MisconfiguredReconciler(_)));
    assert!(!err.is_retryable());

    // A per-call merchant is enough.
    assert!(reconciler
        .scan_transfers(&ScanRequest {
            merchant: Some(MERCHANT),
            ..ScanRequest::default()
        })
        .await
        .is_ok());
}

#[tokio::test]
async fn test_empty_allow_list_is_misconfigured() {
    let mut cfg = config();
    cfg.tokens.clear();
    let reconciler = ChainReconciler::new(ledger_with(vec![]), cfg);
    let err = reconciler
        .confirm_payment(tx(1), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::MisconfiguredReconciler(_)));
}

// -- confirmPayment --

fn receipt(hash: TxHash, success: bool, block: u64) -> ReceiptSummary {
    ReceiptSummary {
        tx_hash: hash,
        success,
        block_number: Some(block),
    }
}

#[tokio::test]
async fn test_confirm_matching_transaction() {
    let mut ledger = ledger_with(vec![
        transfer(USDC, tx(9), 5_000, 42, 0),
        transfer(USDC, tx(7), 12_345, 42, 1),
    ]);
    ledger.receipts.insert(tx(7), receipt(tx(7), true, 42));
    let reconciler = ChainReconciler::new(ledger, config());

    let confirmation = reconciler.confirm_payment(tx(7), None).await.unwrap();
    assert!(confirmation.confirmed);
    assert_eq!(confirmation.tx_hash, tx(7));
    assert_eq!(confirmation.amount, Some(U256::from(12_345u64)));
    assert_eq!(confirmation.token_symbol.as_deref(), Some("USDC"));
    assert_eq!(confirmation.block_number, Some(42));
}

#[tokio::test]
async fn test_confirm_failed_receipt_skips_log_scan() {
    let mut ledger = ledger_with(vec![transfer(USDC, tx(7), 12_345, 42, 0)]);
    ledger.receipts.insert(tx(7), receipt(tx(7), false, 42));
    let calls = ledger.log_calls.clone();
    let reconciler = ChainReconciler::new(ledger, config());

    let confirmation = reconciler.confirm_payment(tx(7), None).await.unwrap();
    assert!(!confirmation.confirmed);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_confirm_transaction_without_merchant_transfer() {
    // Successful transaction in the same block, but only someone else's
    // transfer to the merchant is there.
    let mut ledger = ledger_with(vec![transfer(USDC, tx(9), 5_000, 42, 0)]);
    ledger.receipts.insert(tx(7), receipt(tx(7), true, 42));
    let reconciler = ChainReconciler::new(ledger, config());

    let confirmation = reconciler.confirm_payment(tx(7), None).await.unwrap();
    assert!(!confirmation.confirmed);
    assert_eq!(confirmation.amount, None);
}

#[tokio::test]
async fn test_confirm_unknown_transaction() {
    let reconciler = ChainReconciler::new(ledger_with(vec![]), config());
    let confirmation = reconciler.confirm_payment(tx(7), None).await.unwrap();
    assert!(!confirmation.confirmed);
}

#[tokio::test]
async fn test_confirm_with_ledger_down_is_error() {
    let mut ledger = ledger_with(vec![]);
    ledger.down = true;
    let reconciler = ChainReconciler::new(ledger, config());
    let err = reconciler.confirm_payment(tx(7), None).await.unwrap_err();
    assert!(matches!(err, ReconcileError::RpcUnavailable(_)));
}
