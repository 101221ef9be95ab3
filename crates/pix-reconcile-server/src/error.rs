use actix_web::{HttpResponse, ResponseError};
use pix_reconcile::{ReconcileError, TokenError};

/// Errors returned by request handlers.
///
/// Causes are logged in full; the response body only ever carries the
/// outward message.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Authentication failed. The message is the same for every cause.
    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),

    /// A dependency (ledger, delivery relay) is down or not configured.
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ReconcileError> for ApiError {
    fn from(e: ReconcileError) -> Self {
        match e {
            ReconcileError::InvalidRequest(msg) => ApiError::BadRequest(msg),
            ReconcileError::RpcUnavailable(msg) => {
                ApiError::Unavailable(format!("ledger unavailable: {msg}"))
            }
            ReconcileError::MisconfiguredReconciler(msg) => {
                ApiError::Unavailable(format!("reconciler misconfigured: {msg}"))
            }
            ReconcileError::LedgerRejected(msg) => {
                ApiError::Internal(format!("ledger rejected request: {msg}"))
            }
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(e: TokenError) -> Self {
        if e.is_authentication() {
            return ApiError::Unauthorized(AUTH_REQUIRED);
        }
        match e {
            TokenError::Encryption(msg) => ApiError::Internal(msg),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

pub const AUTH_REQUIRED: &str = "authentication required";
pub const LINK_INVALID: &str = "link invalid or expired";
pub const SIGNATURE_INVALID: &str = "invalid signature";

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        match self {
            ApiError::BadRequest(msg) => HttpResponse::BadRequest().json(serde_json::json!({
                "error": "bad_request",
                "message": msg
            })),
            ApiError::Unauthorized(msg) => HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "unauthorized",
                "message": msg
            })),
            ApiError::Unavailable(msg) => {
                tracing::warn!("Service unavailable: {}", msg);
                HttpResponse::ServiceUnavailable().json(serde_json::json!({
                    "error": "unavailable",
                    "message": "Service temporarily unavailable, retry later"
                }))
            }
            ApiError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "internal_error",
                    "message": "An internal error occurred"
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn test_token_failures_collapse_to_one_message() {
        for e in [
            TokenError::Invalid,
            TokenError::Expired,
            TokenError::ClockSkew,
            TokenError::TypeMismatch,
            TokenError::Revoked,
        ] {
            let api: ApiError = e.into();
            assert!(matches!(api, ApiError::Unauthorized(AUTH_REQUIRED)));
            assert_eq!(api.error_response().status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[test]
    fn test_reconcile_error_status_codes() {
        let cases = [
            (ReconcileError::InvalidRequest("x".into()), StatusCode::BAD_REQUEST),
            (ReconcileError::RpcUnavailable("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (
                ReconcileError::MisconfiguredReconciler("x".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ReconcileError::LedgerRejected("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (e, status) in cases {
            assert_eq!(ApiError::from(e).error_response().status(), status);
        }
    }

    #[test]
    fn test_input_errors_are_bad_requests() {
        assert!(matches!(
            ApiError::from(TokenError::InvalidEmail),
            ApiError::BadRequest(_)
        ));
        assert!(matches!(
            ApiError::from(TokenError::Encryption("x".into())),
            ApiError::Internal(_)
        ));
    }
}
