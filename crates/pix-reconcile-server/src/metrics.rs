use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};
use std::sync::LazyLock;

use pix_reconcile::TokenError;

pub static WEBHOOK_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "pix_webhook_requests_total",
        "Inbound PIX webhooks by verification outcome",
        &["result"]
    )
    .unwrap()
});

pub static TOKEN_VALIDATIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "pix_token_validations_total",
        "Token validations by kind and outcome",
        &["kind", "result"]
    )
    .unwrap()
});

pub static MAGIC_LINKS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "pix_magic_link_requests_total",
        "Magic-link requests by outcome",
        &["result"]
    )
    .unwrap()
});

pub static RECONCILE_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "pix_reconcile_requests_total",
        "Reconciliation calls by operation and outcome",
        &["operation", "result"]
    )
    .unwrap()
});

pub static RECONCILE_LATENCY: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "pix_reconcile_duration_seconds",
        "Reconciliation latency in seconds, ledger round-trips included",
        &["operation"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .unwrap()
});

/// Metric label for a token validation failure.
pub fn token_failure_label(e: &TokenError) -> &'static str {
    match e {
        TokenError::Expired => "expired",
        TokenError::ClockSkew => "clock_skew",
        TokenError::TypeMismatch => "type_mismatch",
        TokenError::Revoked => "revoked",
        _ => "invalid",
    }
}

pub fn metrics_output() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
