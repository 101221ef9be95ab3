use std::time::Duration;

use alloy::primitives::Address;

use crate::retry::RetryPolicy;

/// Blocks scanned back from the head when no explicit range is given.
pub const DEFAULT_BLOCKS_TO_SCAN: u64 = 200;

/// Expected amounts match observed transfers within `expected / TOLERANCE_DIVISOR`
/// in either direction (±1%).
pub const TOLERANCE_DIVISOR: u64 = 100;

/// Per-call deadline on ledger RPC requests.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// Attempts per ledger call before surfacing `RpcUnavailable`.
pub const DEFAULT_RPC_MAX_ATTEMPTS: u32 = 3;

pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(250);
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(4);

/// An allow-listed ERC-20 contract the merchant accepts payment in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenContract {
    pub symbol: String,
    pub address: Address,
}

impl TokenContract {
    pub fn new(symbol: impl Into<String>, address: Address) -> Self {
        Self {
            symbol: symbol.into(),
            address,
        }
    }

    /// Match a filter given as a symbol (case-insensitive) or an address.
    pub fn matches(&self, filter: &str) -> bool {
        let filter = filter.trim();
        if let Ok(addr) = filter.parse::<Address>() {
            return addr == self.address;
        }
        self.symbol.eq_ignore_ascii_case(filter)
    }
}

/// Runtime reconciler configuration. Loaded once at startup and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Account expected to receive payments. `None` leaves the reconciler
    /// unusable until a merchant is passed per call.
    pub merchant: Option<Address>,
    /// Contracts queried for transfers. Nothing outside this list is ever
    /// considered a payment.
    pub tokens: Vec<TokenContract>,
    pub blocks_to_scan: u64,
    pub retry: RetryPolicy,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            merchant: None,
            tokens: Vec::new(),
            blocks_to_scan: DEFAULT_BLOCKS_TO_SCAN,
            retry: RetryPolicy::default(),
        }
    }
}

impl ReconcilerConfig {
    pub fn new(merchant: Address, tokens: Vec<TokenContract>) -> Self {
        Self {
            merchant: Some(merchant),
            tokens,
            ..Self::default()
        }
    }
}
