use thiserror::Error;

/// Errors returned by [`TokenService`](crate::token::TokenService).
///
/// Everything except the input and encryption variants is an authentication
/// failure. Callers facing end users must collapse those into one generic
/// message; see [`TokenError::is_authentication`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token subject must not be empty")]
    EmptySubject,

    #[error("invalid email address")]
    InvalidEmail,

    #[error("token ttl must be positive")]
    InvalidTtl,

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("token invalid")]
    Invalid,

    #[error("token expired")]
    Expired,

    #[error("token issued in the future")]
    ClockSkew,

    #[error("token type mismatch")]
    TypeMismatch,

    #[error("token revoked")]
    Revoked,
}

impl TokenError {
    /// True for failures that concern a presented token rather than the
    /// caller's input or the service configuration.
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            TokenError::Invalid
                | TokenError::Expired
                | TokenError::ClockSkew
                | TokenError::TypeMismatch
                | TokenError::Revoked
        )
    }
}

/// Errors returned by [`ChainReconciler`](crate::reconciler::ChainReconciler).
///
/// "No matching payment" is not an error: it is reported as an unconfirmed
/// result. Only failures to obtain an answer end up here.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Ledger endpoint unreachable, timed out or cancelled. Retryable.
    #[error("ledger rpc unavailable: {0}")]
    RpcUnavailable(String),

    /// The ledger answered with an error response. Not retried.
    #[error("ledger rejected request: {0}")]
    LedgerRejected(String),

    /// Missing merchant address or RPC endpoint. Fatal.
    #[error("reconciler misconfigured: {0}")]
    MisconfiguredReconciler(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ReconcileError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReconcileError::RpcUnavailable(_))
    }
}

/// Failure reported by a [`LedgerRpc`](crate::ledger::LedgerRpc) backend.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rpc error response: {0}")]
    Rejected(String),
}
