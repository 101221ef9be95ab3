//! Admin session cookies and bearer tokens.

use std::time::Duration;

use actix_web::cookie::{time, Cookie, SameSite};
use actix_web::HttpRequest;
use pix_reconcile::{DecodedToken, TokenKind};

use crate::error::{ApiError, AUTH_REQUIRED};
use crate::metrics;
use crate::state::AppState;

pub const SESSION_COOKIE: &str = "admin_session";

/// `admin_session` cookie carrying `token`, living as long as the session.
pub fn session_cookie(token: &str, ttl: Duration) -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE, token.to_string())
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Strict)
        .max_age(time::Duration::seconds(ttl.as_secs() as i64))
        .finish()
}

/// Cookie that clears `admin_session` in the browser.
pub fn removal_cookie() -> Cookie<'static> {
    let mut cookie = Cookie::build(SESSION_COOKIE, "")
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Strict)
        .finish();
    cookie.make_removal();
    cookie
}

/// Session token from the cookie, else from `Authorization: Bearer`.
pub fn presented_session_token(req: &HttpRequest) -> Option<String> {
    if let Some(cookie) = req.cookie(SESSION_COOKIE) {
        if !cookie.value().is_empty() {
            return Some(cookie.value().to_string());
        }
    }
    req.headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Validate the presented admin session.
///
/// Fails with one uniform 401 whether the token is missing, forged,
/// expired, revoked, of the wrong kind, or names someone no longer on the
/// admin list.
pub fn require_admin(req: &HttpRequest, state: &AppState) -> Result<DecodedToken, ApiError> {
    let kind = TokenKind::AdminSession.as_str();
    let Some(token) = presented_session_token(req) else {
        metrics::TOKEN_VALIDATIONS
            .with_label_values(&[kind, "missing"])
            .inc();
        return Err(ApiError::Unauthorized(AUTH_REQUIRED));
    };

    let session = state
        .tokens
        .validate(&token, TokenKind::AdminSession)
        .map_err(|e| {
            metrics::TOKEN_VALIDATIONS
                .with_label_values(&[kind, metrics::token_failure_label(&e)])
                .inc();
            tracing::debug!(reason = %e, "admin session rejected");
            ApiError::from(e)
        })?;

    if !state.is_admin(&session.payload.subject) {
        metrics::TOKEN_VALIDATIONS
            .with_label_values(&[kind, "not_admin"])
            .inc();
        tracing::warn!(id = %session.payload.id, "session subject is no longer an admin");
        return Err(ApiError::Unauthorized(AUTH_REQUIRED));
    }

    metrics::TOKEN_VALIDATIONS.with_label_values(&[kind, "ok"]).inc();
    Ok(session)
}
