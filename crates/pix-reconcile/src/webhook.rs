//! Authentication of inbound PIX processor notifications.
//!
//! The processor signs the exact request body with HMAC-SHA256 under a
//! shared secret and sends the encoded MAC in a header. Verification always
//! runs over the raw bytes received on the wire, never over a re-serialized
//! JSON value.

use std::fmt;
use std::str::FromStr;

use zeroize::Zeroizing;

use crate::hmac::{compute_hmac, compute_hmac_base64};
use crate::security::constant_time_eq;

/// Header carrying the processor's signature unless configured otherwise.
pub const DEFAULT_SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// How the processor encodes the MAC in its signature header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureEncoding {
    /// Lowercase hex, 64 characters.
    #[default]
    Hex,
    /// Standard base64 with padding, 44 characters.
    Base64,
}

impl FromStr for SignatureEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hex" => Ok(SignatureEncoding::Hex),
            "base64" => Ok(SignatureEncoding::Base64),
            other => Err(format!("unknown signature encoding '{other}'")),
        }
    }
}

/// Encode the expected signature of `raw_body` the way the processor does.
pub fn encode_signature(secret: &[u8], raw_body: &[u8], encoding: SignatureEncoding) -> String {
    match encoding {
        SignatureEncoding::Hex => compute_hmac(secret, raw_body),
        SignatureEncoding::Base64 => compute_hmac_base64(secret, raw_body),
    }
}

/// Check `supplied_signature` against HMAC-SHA256(`secret`, `raw_body`).
///
/// Returns `false` on any mismatch, an empty signature or an empty secret.
/// The comparison is over the encoded form and runs in constant time.
pub fn verify(
    raw_body: &[u8],
    supplied_signature: &str,
    secret: &[u8],
    encoding: SignatureEncoding,
) -> bool {
    if secret.is_empty() || supplied_signature.is_empty() {
        return false;
    }
    let expected = encode_signature(secret, raw_body, encoding);
    constant_time_eq(expected.as_bytes(), supplied_signature.as_bytes())
}

/// Holds the shared webhook secret for the lifetime of the process.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Zeroizing<Vec<u8>>,
    encoding: SignatureEncoding,
}

impl fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("secret", &"[REDACTED]")
            .field("encoding", &self.encoding)
            .finish()
    }
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<Vec<u8>>, encoding: SignatureEncoding) -> Self {
        Self {
            secret: Zeroizing::new(secret.into()),
            encoding,
        }
    }

    pub fn encoding(&self) -> SignatureEncoding {
        self.encoding
    }

    /// Verify a request. A missing header is a plain rejection.
    pub fn verify(&self, raw_body: &[u8], supplied_signature: Option<&str>) -> bool {
        match supplied_signature {
            Some(sig) => verify(raw_body, sig, &self.secret, self.encoding),
            None => false,
        }
    }

    /// Produce the signature the processor would send for `raw_body`.
    pub fn sign(&self, raw_body: &[u8]) -> String {
        encode_signature(&self.secret, raw_body, self.encoding)
    }
}
