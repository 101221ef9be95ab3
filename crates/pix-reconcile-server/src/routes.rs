use std::time::Instant;

use actix_web::{get, post, web, HttpRequest, HttpResponse};
use alloy::primitives::{Address, TxHash, U256};
use pix_reconcile::magic_link::{issue_magic_link, normalize_email};
use pix_reconcile::security::constant_time_eq;
use pix_reconcile::{ReconcileError, ScanRequest, TokenKind};
use serde::Deserialize;

use crate::auth::{self, require_admin};
use crate::delivery::MagicLinkMessage;
use crate::error::{ApiError, LINK_INVALID, SIGNATURE_INVALID};
use crate::metrics;
use crate::state::AppState;

/// Largest range an admin scan may request in one call.
pub const MAX_BLOCKS_PER_SCAN: u64 = 10_000;

/// Register every endpoint.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(metrics_endpoint)
        .service(pix_webhook)
        .service(request_magic_link)
        .service(verify_magic_link)
        .service(admin_session)
        .service(logout)
        .service(reconcile_transfers)
        .service(reconcile_check)
        .service(reconcile_confirm);
}

/// JSON body errors rendered like every other 400.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(65_536)
        .error_handler(|err, _req| ApiError::BadRequest(err.to_string()).into())
}

#[get("/health")]
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let Some(reconciler) = &state.reconciler else {
        return HttpResponse::Ok().json(serde_json::json!({
            "status": "ok",
            "service": "pix-reconcile",
            "reconciler": "disabled",
        }));
    };
    match reconciler.head_block().await {
        Ok(block) => HttpResponse::Ok().json(serde_json::json!({
            "status": "ok",
            "service": "pix-reconcile",
            "reconciler": "ok",
            "latestBlock": block.to_string(),
            "lastScannedBlock": reconciler.last_scanned_block().map(|b| b.to_string()),
        })),
        Err(_) => HttpResponse::ServiceUnavailable().json(serde_json::json!({
            "status": "degraded",
            "service": "pix-reconcile",
            "reconciler": "unreachable",
        })),
    }
}

#[get("/metrics")]
pub async fn metrics_endpoint(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let Some(token) = &state.metrics_token else {
        return HttpResponse::Forbidden().json(serde_json::json!({
            "error": "forbidden",
            "message": "Set METRICS_TOKEN to access /metrics"
        }));
    };
    let authorized = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| constant_time_eq(t.as_bytes(), token))
        .unwrap_or(false);

    if !authorized {
        return HttpResponse::Unauthorized().json(serde_json::json!({
            "error": "unauthorized",
            "message": "Valid Bearer token required for /metrics"
        }));
    }
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(metrics::metrics_output())
}

// -- PIX webhook --

/// PIX processor notification. The signature is checked over the raw body
/// before anything parses it.
#[post("/webhooks/pix")]
pub async fn pix_webhook(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let signature = req
        .headers()
        .get(state.signature_header.as_str())
        .and_then(|v| v.to_str().ok());

    if signature.is_none() {
        tracing::warn!(header = %state.signature_header, "webhook signature header missing");
        metrics::WEBHOOK_REQUESTS
            .with_label_values(&["missing"])
            .inc();
        return Err(ApiError::Unauthorized(SIGNATURE_INVALID));
    }
    if !state.webhook.verify(&body, signature) {
        tracing::warn!(len = body.len(), "webhook signature mismatch");
        metrics::WEBHOOK_REQUESTS
            .with_label_values(&["invalid"])
            .inc();
        return Err(ApiError::Unauthorized(SIGNATURE_INVALID));
    }

    let event: serde_json::Value = serde_json::from_slice(&body).map_err(|e| {
        metrics::WEBHOOK_REQUESTS
            .with_label_values(&["malformed"])
            .inc();
        ApiError::BadRequest(format!("malformed webhook body: {e}"))
    })?;
    let kind = event
        .get("event")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    metrics::WEBHOOK_REQUESTS
        .with_label_values(&["accepted"])
        .inc();
    tracing::info!(event = %kind, "pix webhook accepted");
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "received": true,
        "event": kind,
    })))
}

// -- Admin login --

#[derive(Deserialize)]
pub struct MagicLinkRequest {
    pub email: String,
}

/// Send a login link if `email` is an admin. The answer is identical either
/// way.
#[post("/auth/magic-link")]
pub async fn request_magic_link(
    state: web::Data<AppState>,
    body: web::Json<MagicLinkRequest>,
) -> Result<HttpResponse, ApiError> {
    let Some(delivery) = &state.delivery else {
        return Err(ApiError::Unavailable(
            "magic-link delivery not configured".to_string(),
        ));
    };
    let email = normalize_email(&body.email)?;

    if state.is_admin(&email) {
        let link = issue_magic_link(&state.tokens, &state.app_url, &email)?;
        delivery.dispatch(MagicLinkMessage::new(&link));
        metrics::MAGIC_LINKS.with_label_values(&["sent"]).inc();
        tracing::info!(expires_at = %link.expires_at, "magic link issued");
    } else {
        metrics::MAGIC_LINKS.with_label_values(&["ignored"]).inc();
        tracing::debug!("magic link requested for non-admin address");
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({ "sent": true })))
}

#[derive(Deserialize)]
pub struct MagicLinkQuery {
    pub token: Option<String>,
}

/// Exchange a magic-link token for an admin session cookie. Each link works
/// once: it is spent atomically before the session is issued, so concurrent
/// requests with the same link yield one session.
#[get("/auth/magic")]
pub async fn verify_magic_link(
    state: web::Data<AppState>,
    query: web::Query<MagicLinkQuery>,
) -> Result<HttpResponse, ApiError> {
    let kind = TokenKind::MagicLink.as_str();
    let token = query.token.as_deref().unwrap_or_default();

    let link = state
        .tokens
        .validate(token, TokenKind::MagicLink)
        .map_err(|e| {
            metrics::TOKEN_VALIDATIONS
                .with_label_values(&[kind, metrics::token_failure_label(&e)])
                .inc();
            tracing::debug!(reason = %e, "magic link rejected");
            ApiError::Unauthorized(LINK_INVALID)
        })?;

    if !state.is_admin(&link.payload.subject) {
        metrics::TOKEN_VALIDATIONS
            .with_label_values(&[kind, "not_admin"])
            .inc();
        return Err(ApiError::Unauthorized(LINK_INVALID));
    }
    state.tokens.consume(&link.payload).map_err(|e| {
        metrics::TOKEN_VALIDATIONS
            .with_label_values(&[kind, metrics::token_failure_label(&e)])
            .inc();
        ApiError::Unauthorized(LINK_INVALID)
    })?;
    metrics::TOKEN_VALIDATIONS.with_label_values(&[kind, "ok"]).inc();

    let session = state
        .tokens
        .issue(TokenKind::AdminSession, &link.payload.subject, None)?;
    tracing::info!(id = %session.payload.id, "admin session started");

    Ok(HttpResponse::Ok()
        .cookie(auth::session_cookie(
            &session.token,
            state.tokens.ttls().admin_session,
        ))
        .json(serde_json::json!({
            "authenticated": true,
            "email": session.payload.subject,
            "expiresAt": session.payload.expires_at,
        })))
}

#[get("/admin/session")]
pub async fn admin_session(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let session = require_admin(&req, &state)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "email": session.payload.subject,
        "issuedAt": session.payload.issued_at,
        "expiresAt": session.payload.expires_at,
        "remainingSecs": session.remaining.as_secs(),
        "permissions": session.payload.permissions,
    })))
}

/// Revoke the presented session, if any, and clear the cookie.
#[post("/auth/logout")]
pub async fn logout(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    if let Some(token) = auth::presented_session_token(&req) {
        if let Ok(session) = state.tokens.validate(&token, TokenKind::AdminSession) {
            state.tokens.revoke(&session.payload);
        }
    }
    HttpResponse::Ok()
        .cookie(auth::removal_cookie())
        .json(serde_json::json!({ "loggedOut": true }))
}

// -- Reconciliation --

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanParams {
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    pub blocks_to_scan: Option<u64>,
    pub merchant: Option<Address>,
    /// Symbol or contract address.
    pub token: Option<String>,
}

impl ScanParams {
    pub fn into_request(self) -> Result<ScanRequest, ApiError> {
        if self.blocks_to_scan.is_some_and(|n| n > MAX_BLOCKS_PER_SCAN) {
            return Err(ApiError::BadRequest(format!(
                "blocksToScan may not exceed {MAX_BLOCKS_PER_SCAN}"
            )));
        }
        if let (Some(from), Some(to)) = (self.from_block, self.to_block) {
            if to.saturating_sub(from) > MAX_BLOCKS_PER_SCAN {
                return Err(ApiError::BadRequest(format!(
                    "block range may not exceed {MAX_BLOCKS_PER_SCAN}"
                )));
            }
        }
        Ok(ScanRequest {
            from_block: self.from_block,
            to_block: self.to_block,
            blocks_to_scan: self.blocks_to_scan,
            merchant: self.merchant,
            token_filter: self.token,
        })
    }
}

fn record_outcome(operation: &'static str, started: Instant, result: &'static str) {
    metrics::RECONCILE_REQUESTS
        .with_label_values(&[operation, result])
        .inc();
    metrics::RECONCILE_LATENCY
        .with_label_values(&[operation])
        .observe(started.elapsed().as_secs_f64());
}

fn record_error(operation: &'static str, started: Instant, e: &ReconcileError) {
    record_outcome(operation, started, "error");
    tracing::warn!(operation, error = %e, retryable = e.is_retryable(), "reconciliation failed");
}

#[get("/reconcile/transfers")]
pub async fn reconcile_transfers(
    req: HttpRequest,
    state: web::Data<AppState>,
    query: web::Query<ScanParams>,
) -> Result<HttpResponse, ApiError> {
    require_admin(&req, &state)?;
    let reconciler = state.reconciler()?;
    let request = query.into_inner().into_request()?;

    let started = Instant::now();
    let transfers = reconciler.scan_transfers(&request).await.map_err(|e| {
        record_error("scan", started, &e);
        ApiError::from(e)
    })?;
    record_outcome("scan", started, "ok");

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "count": transfers.len(),
        "lastScannedBlock": reconciler.last_scanned_block().map(|b| b.to_string()),
        "transfers": transfers,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckPaymentRequest {
    /// Base units, as a decimal string.
    pub expected_amount_raw: String,
    #[serde(flatten)]
    pub scan: ScanParams,
}

#[post("/reconcile/check")]
pub async fn reconcile_check(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<CheckPaymentRequest>,
) -> Result<HttpResponse, ApiError> {
    require_admin(&req, &state)?;
    let reconciler = state.reconciler()?;

    let body = body.into_inner();
    let expected = U256::from_str_radix(body.expected_amount_raw.trim(), 10).map_err(|_| {
        ApiError::BadRequest("expectedAmountRaw must be a decimal integer".to_string())
    })?;
    let request = body.scan.into_request()?;

    let started = Instant::now();
    let result = reconciler
        .check_payment_received(expected, &request)
        .await
        .map_err(|e| {
            record_error("check", started, &e);
            ApiError::from(e)
        })?;
    record_outcome(
        "check",
        started,
        if result.confirmed { "confirmed" } else { "unconfirmed" },
    );

    Ok(HttpResponse::Ok().json(result))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPaymentRequest {
    pub tx_hash: String,
}

/// Public: a customer claims a transaction paid us. Always checked against
/// the configured merchant, never a caller-supplied one.
#[post("/reconcile/confirm")]
pub async fn reconcile_confirm(
    state: web::Data<AppState>,
    body: web::Json<ConfirmPaymentRequest>,
) -> Result<HttpResponse, ApiError> {
    let reconciler = state.reconciler()?;
    let tx_hash: TxHash = body
        .tx_hash
        .trim()
        .parse()
        .map_err(|_| ApiError::BadRequest("txHash must be a 32-byte hex hash".to_string()))?;

    let started = Instant::now();
    let confirmation = reconciler
        .confirm_payment(tx_hash, None)
        .await
        .map_err(|e| {
            record_error("confirm", started, &e);
            ApiError::from(e)
        })?;
    record_outcome(
        "confirm",
        started,
        if confirmation.confirmed {
            "confirmed"
        } else {
            "unconfirmed"
        },
    );

    Ok(HttpResponse::Ok().json(confirmation))
}
