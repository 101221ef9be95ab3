//! Hands magic links to the relay that emails them.
//!
//! Each link is POSTed as JSON with an `X-Webhook-Signature` HMAC header so
//! the relay can tell our requests from anyone else's. Delivery runs in the
//! background: the requester gets the same answer whether or not the email
//! belongs to an admin.

use std::time::Duration;

use chrono::{DateTime, Utc};
use pix_reconcile::magic_link::MagicLink;
use serde::Serialize;
use url::Url;
use zeroize::Zeroizing;

pub const DELIVERY_EVENT: &str = "auth.magic_link";
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MagicLinkMessage {
    pub event: &'static str,
    pub email: String,
    pub link: String,
    pub expires_at: DateTime<Utc>,
    pub timestamp: i64,
}

impl MagicLinkMessage {
    pub fn new(link: &MagicLink) -> Self {
        Self {
            event: DELIVERY_EVENT,
            email: link.email.clone(),
            link: link.url.to_string(),
            expires_at: link.expires_at,
            timestamp: Utc::now().timestamp(),
        }
    }
}

/// HTTP client for relay calls: bounded timeout, no redirects.
pub fn delivery_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(DELIVERY_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Warn when the relay URL would carry login links in cleartext.
pub fn validate_delivery_url(url: &Url) {
    if url.scheme() != "https" {
        tracing::warn!(
            url = %url,
            "magic-link delivery URL does not use HTTPS; login links will travel in cleartext"
        );
    }
}

#[derive(Clone)]
pub struct MagicLinkDelivery {
    client: reqwest::Client,
    url: Url,
    signing_key: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for MagicLinkDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MagicLinkDelivery")
            .field("url", &self.url.as_str())
            .field("signing_key", &"[REDACTED]")
            .finish()
    }
}

impl MagicLinkDelivery {
    pub fn new(client: reqwest::Client, url: Url, signing_key: Vec<u8>) -> Self {
        Self {
            client,
            url,
            signing_key: Zeroizing::new(signing_key),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Serialize and sign `message`. Returns the body and its signature.
    pub fn sign(&self, message: &MagicLinkMessage) -> Result<(Vec<u8>, String), serde_json::Error> {
        let body = serde_json::to_vec(message)?;
        let signature = pix_reconcile::hmac::compute_hmac(&self.signing_key, &body);
        Ok((body, signature))
    }

    /// Fire-and-forget POST of `message` to the relay.
    pub fn dispatch(&self, message: MagicLinkMessage) {
        let (body, signature) = match self.sign(&message) {
            Ok(signed) => signed,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize magic-link message");
                return;
            }
        };

        let client = self.client.clone();
        let url = self.url.clone();
        tokio::spawn(async move {
            let result = client
                .post(url.clone())
                .header("content-type", "application/json")
                .header(SIGNATURE_HEADER, signature)
                .body(body)
                .send()
                .await;
            match result {
                Ok(resp) if resp.status().is_success() => {
                    tracing::debug!(url = %url, status = %resp.status(), "magic link delivered")
                }
                Ok(resp) => {
                    tracing::warn!(url = %url, status = %resp.status(), "magic-link relay refused delivery")
                }
                Err(e) => tracing::warn!(url = %url, error = %e, "magic-link delivery failed"),
            }
        });
    }
}
