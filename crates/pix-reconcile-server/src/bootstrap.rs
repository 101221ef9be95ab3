//! Turn a [`ServerConfig`] into the shared [`AppState`].

use std::sync::Arc;
use std::time::Duration;

use alloy::providers::{Provider, ProviderBuilder};
use pix_reconcile::hmac::derive_key;
use pix_reconcile::ledger::token_symbol;
use pix_reconcile::{
    AlloyLedger, ChainReconciler, InMemoryRevocationStore, ReconcilerConfig, RevocationStore,
    TokenContract, TokenService, WebhookVerifier,
};

use crate::config::{ConfigError, ContractEntry, ServerConfig};
use crate::delivery::{delivery_client, validate_delivery_url, MagicLinkDelivery};
use crate::state::{AppState, Reconciler};

/// Domain label for the relay signing key, derived from the token key.
const DELIVERY_KEY_LABEL: &[u8] = b"pix-reconcile/magic-link-delivery";

const REVOCATION_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Build the application state.
///
/// Fails only on configuration that cannot work at all. An unreachable
/// ledger at startup is not fatal: symbols that cannot be read fall back to
/// the contract address and calls surface `RpcUnavailable` later.
pub async fn build_state(config: &ServerConfig) -> Result<AppState, ConfigError> {
    let revocations = Arc::new(InMemoryRevocationStore::new());
    let tokens = TokenService::new(&config.token_key)
        .map_err(|e| ConfigError::Invalid {
            var: "TOKEN_ENCRYPTION_KEY",
            reason: e.to_string(),
        })?
        .with_ttls(config.token_ttls)
        .with_revocation_store(revocations.clone());

    let delivery = config.delivery_url.as_ref().map(|url| {
        validate_delivery_url(url);
        MagicLinkDelivery::new(
            delivery_client(),
            url.clone(),
            derive_key(&config.token_key, DELIVERY_KEY_LABEL),
        )
    });
    if delivery.is_none() {
        tracing::warn!("MAGIC_LINK_DELIVERY_URL not set; magic-link login disabled");
    }

    let reconciler = match &config.rpc_url {
        Some(url) => Some(build_reconciler(config, url.clone()).await),
        None => None,
    };

    Ok(AppState {
        webhook: WebhookVerifier::new(config.webhook_secret.to_vec(), config.signature_encoding),
        signature_header: config.signature_header.clone(),
        tokens,
        revocations,
        reconciler,
        app_url: config.app_url.clone(),
        admin_emails: config.admin_emails.clone(),
        delivery,
        metrics_token: config.metrics_token.clone().map(String::into_bytes),
    })
}

async fn build_reconciler(config: &ServerConfig, rpc_url: url::Url) -> Reconciler {
    let provider = ProviderBuilder::new().connect_http(rpc_url).erased();

    let mut tokens = Vec::with_capacity(config.token_contracts.len());
    for entry in &config.token_contracts {
        tokens.push(resolve_contract(&provider, entry, config.retry.call_timeout).await);
    }
    if tokens.is_empty() {
        tracing::warn!("TOKEN_CONTRACTS is empty; every reconciliation call will fail");
    }
    for token in &tokens {
        tracing::info!(symbol = %token.symbol, address = %token.address, "accepting token");
    }

    let reconciler_config = ReconcilerConfig {
        merchant: config.merchant_address,
        tokens,
        blocks_to_scan: config.blocks_to_scan,
        retry: config.retry,
    };
    ChainReconciler::new(AlloyLedger::new(provider), reconciler_config)
}

/// Use the configured symbol, or read `symbol()` from the contract.
async fn resolve_contract<P: Provider>(
    provider: &P,
    entry: &ContractEntry,
    timeout: Duration,
) -> TokenContract {
    if let Some(symbol) = &entry.symbol {
        return TokenContract::new(symbol.clone(), entry.address);
    }
    match tokio::time::timeout(timeout, token_symbol(provider, entry.address)).await {
        Ok(Ok(symbol)) => TokenContract::new(symbol, entry.address),
        Ok(Err(e)) => {
            tracing::warn!(address = %entry.address, error = %e, "could not read token symbol");
            TokenContract::new(entry.address.to_string(), entry.address)
        }
        Err(_) => {
            tracing::warn!(address = %entry.address, "token symbol lookup timed out");
            TokenContract::new(entry.address.to_string(), entry.address)
        }
    }
}

/// Periodically drop revocations whose tokens have expired anyway.
pub fn start_revocation_purge(store: Arc<InMemoryRevocationStore>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(REVOCATION_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            let purged = store.purge_expired(chrono::Utc::now());
            if purged > 0 {
                tracing::info!(purged, remaining = store.len(), "purged expired revocations");
            }
        }
    })
}
