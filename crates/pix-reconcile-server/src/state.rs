use std::sync::Arc;

use alloy::providers::DynProvider;
use pix_reconcile::{
    AlloyLedger, ChainReconciler, InMemoryRevocationStore, TokenService, WebhookVerifier,
};
use url::Url;

use crate::delivery::MagicLinkDelivery;
use crate::error::ApiError;

/// Reconciler over a type-erased HTTP provider.
pub type Reconciler = ChainReconciler<AlloyLedger<DynProvider>>;

/// Shared application state. Built once at startup, read-only afterwards.
pub struct AppState {
    pub webhook: WebhookVerifier,
    /// Header the processor's signature arrives in.
    pub signature_header: String,
    /// Issues and validates magic-link and session tokens. Has
    /// `revocations` attached.
    pub tokens: TokenService,
    pub revocations: Arc<InMemoryRevocationStore>,
    /// None when no RPC endpoint is configured.
    pub reconciler: Option<Reconciler>,
    pub app_url: Url,
    pub admin_emails: Vec<String>,
    /// None disables magic-link issuance.
    pub delivery: Option<MagicLinkDelivery>,
    /// Separate bearer token for /metrics.
    pub metrics_token: Option<Vec<u8>>,
}

impl AppState {
    /// Whether `email` (already normalized) may hold an admin session.
    pub fn is_admin(&self, email: &str) -> bool {
        self.admin_emails.iter().any(|a| a == email)
    }

    pub fn reconciler(&self) -> Result<&Reconciler, ApiError> {
        self.reconciler
            .as_ref()
            .ok_or_else(|| ApiError::Unavailable("reconciler disabled: RPC_URL not set".to_string()))
    }
}
