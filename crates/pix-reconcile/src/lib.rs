//! Trust boundary for PIX-to-crypto payment confirmation.
//!
//! Two untrusted channels report that a customer paid: the PIX processor's
//! webhook and the blockchain itself. This crate authenticates the first and
//! independently reads the second, and issues the short-lived encrypted
//! tokens used for magic-link and admin-session authentication.
//!
//! # Components
//!
//! - **Webhook verification** ([`WebhookVerifier`]): HMAC-SHA256 over the raw
//!   request body, compared in constant time. A failed check means reject;
//!   the ledger is never consulted as a bypass.
//! - **Chain reconciliation** ([`ChainReconciler`]): scans ERC-20 `Transfer`
//!   logs into the merchant across allow-listed contracts, matches expected
//!   amounts within ±1%, and confirms specific claimed transactions.
//! - **Tokens** ([`TokenService`]): ChaCha20-Poly1305 sealed payloads with
//!   expiry, clock-skew and type checks, plus optional revocation.
//!
//! # Quick example (reconciliation)
//!
//! ```no_run
//! use alloy::primitives::{address, U256};
//! use alloy::providers::ProviderBuilder;
//! use pix_reconcile::{AlloyLedger, ChainReconciler, ReconcilerConfig, ScanRequest, TokenContract};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let provider = ProviderBuilder::new().connect_http("https://rpc.example".parse().unwrap());
//! let config = ReconcilerConfig::new(
//!     address!("0x1111111111111111111111111111111111111111"),
//!     vec![TokenContract::new("USDC", address!("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"))],
//! );
//! let reconciler = ChainReconciler::new(AlloyLedger::new(provider), config);
//!
//! let result = reconciler
//!     .check_payment_received(U256::from(25_000_000u64), &ScanRequest::default())
//!     .await
//!     .unwrap();
//! println!("confirmed: {}", result.confirmed);
//! # }
//! ```

// Primitives
pub mod constants;
pub mod error;
pub mod hmac;
pub mod security;
pub mod types;

// Authentication
pub mod magic_link;
pub mod revocation;
pub mod token;
pub mod webhook;

// Ledger reconciliation
pub mod erc20;
pub mod ledger;
pub mod reconciler;
pub mod retry;

// Re-exports
pub use constants::*;
pub use error::{LedgerError, ReconcileError, TokenError};
pub use types::*;

pub use erc20::ERC20;

pub use ledger::{AlloyLedger, LedgerRpc};
pub use reconciler::{ChainReconciler, ScanRequest};
pub use retry::RetryPolicy;
pub use revocation::{InMemoryRevocationStore, RevocationStore};
pub use token::{DecodedToken, IssuedToken, TokenKind, TokenPayload, TokenService, TokenTtls};
pub use webhook::{SignatureEncoding, WebhookVerifier};
