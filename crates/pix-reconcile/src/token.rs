//! Encrypted, expiring bearer tokens for magic links and admin sessions.
//!
//! A token is `base64url(nonce ‖ tag ‖ ciphertext)` where the ciphertext is
//! the JSON payload sealed with ChaCha20-Poly1305 under the service key and a
//! fresh random 96-bit nonce. Nothing is stored server-side; validity is a
//! pure function of the token, the key and the current time (plus the
//! optional revocation set).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use chacha20poly1305::aead::{AeadInPlace, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce, Tag};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::error::TokenError;
use crate::revocation::RevocationStore;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Tokens longer than this are rejected before decoding.
pub const MAX_TOKEN_LEN: usize = 4096;

/// How far in the future `issuedAt` may lie before a token is refused.
pub const MAX_CLOCK_SKEW_SECS: i64 = 60;

pub const DEFAULT_MAGIC_LINK_TTL: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_ADMIN_SESSION_TTL: Duration = Duration::from_secs(60 * 60);

/// Bound into every ciphertext as associated data.
const TOKEN_AAD: &[u8] = b"pix-reconcile/token/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    MagicLink,
    AdminSession,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::MagicLink => "magic_link",
            TokenKind::AdminSession => "admin_session",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Plaintext carried inside a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    /// Random identifier, used as the revocation key.
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: TokenKind,
    /// Email for magic links, admin identity for sessions.
    pub subject: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub issued_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub payload: TokenPayload,
}

#[derive(Debug, Clone)]
pub struct DecodedToken {
    pub payload: TokenPayload,
    /// `expiresAt - now` at validation time.
    pub remaining: Duration,
}

/// Lifetimes applied when `issue` is called without an explicit ttl.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenTtls {
    pub magic_link: Duration,
    pub admin_session: Duration,
}

impl Default for TokenTtls {
    fn default() -> Self {
        Self {
            magic_link: DEFAULT_MAGIC_LINK_TTL,
            admin_session: DEFAULT_ADMIN_SESSION_TTL,
        }
    }
}

impl TokenTtls {
    pub fn for_kind(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::MagicLink => self.magic_link,
            TokenKind::AdminSession => self.admin_session,
        }
    }
}

/// Decode token key material given as hex (64 chars) or base64.
pub fn decode_key(encoded: &str) -> Result<Zeroizing<Vec<u8>>, TokenError> {
    let encoded = encoded.trim();
    let bytes = if encoded.len() == KEY_LEN * 2 && encoded.bytes().all(|b| b.is_ascii_hexdigit())
    {
        hex::decode(encoded).ok()
    } else {
        STANDARD
            .decode(encoded)
            .or_else(|_| URL_SAFE.decode(encoded))
            .or_else(|_| URL_SAFE_NO_PAD.decode(encoded))
            .ok()
    };
    match bytes {
        Some(b) if b.len() == KEY_LEN => Ok(Zeroizing::new(b)),
        Some(b) => Err(TokenError::Encryption(format!(
            "token key must be {KEY_LEN} bytes, got {}",
            b.len()
        ))),
        None => Err(TokenError::Encryption(
            "token key is neither hex nor base64".to_string(),
        )),
    }
}

/// Issues and validates tokens. Owns the encryption key.
pub struct TokenService {
    cipher: ChaCha20Poly1305,
    ttls: TokenTtls,
    revocations: Option<Arc<dyn RevocationStore>>,
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenService")
            .field("key", &"[REDACTED]")
            .field("ttls", &self.ttls)
            .field("revocation", &self.revocations.is_some())
            .finish()
    }
}

impl TokenService {
    /// Build a service from raw key bytes.
    ///
    /// Fails with [`TokenError::Encryption`] when the key is missing or not
    /// exactly 32 bytes; this is a configuration error and not retryable.
    pub fn new(key: &[u8]) -> Result<Self, TokenError> {
        if key.len() != KEY_LEN {
            return Err(TokenError::Encryption(format!(
                "token key must be {KEY_LEN} bytes, got {}",
                key.len()
            )));
        }
        let cipher = ChaCha20Poly1305::new_from_slice(key)
            .map_err(|e| TokenError::Encryption(e.to_string()))?;
        Ok(Self {
            cipher,
            ttls: TokenTtls::default(),
            revocations: None,
        })
    }

    pub fn with_ttls(mut self, ttls: TokenTtls) -> Self {
        self.ttls = ttls;
        self
    }

    /// Attach a revocation set. Validation then rejects revoked ids.
    pub fn with_revocation_store(mut self, store: Arc<dyn RevocationStore>) -> Self {
        self.revocations = Some(store);
        self
    }

    pub fn ttls(&self) -> TokenTtls {
        self.ttls
    }

    pub fn issue(
        &self,
        kind: TokenKind,
        subject: &str,
        ttl: Option<Duration>,
    ) -> Result<IssuedToken, TokenError> {
        self.issue_at(kind, subject, ttl, None, Utc::now())
    }

    pub fn issue_with_permissions(
        &self,
        kind: TokenKind,
        subject: &str,
        ttl: Option<Duration>,
        permissions: Vec<String>,
    ) -> Result<IssuedToken, TokenError> {
        self.issue_at(kind, subject, ttl, Some(permissions), Utc::now())
    }

    /// Issue a token as if the current time were `now`.
    pub fn issue_at(
        &self,
        kind: TokenKind,
        subject: &str,
        ttl: Option<Duration>,
        permissions: Option<Vec<String>>,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        if subject.trim().is_empty() {
            return Err(TokenError::EmptySubject);
        }
        let ttl = ttl.unwrap_or_else(|| self.ttls.for_kind(kind));
        if ttl.is_zero() {
            return Err(TokenError::InvalidTtl);
        }
        let ttl = chrono::Duration::from_std(ttl).map_err(|_| TokenError::InvalidTtl)?;
        // Payload timestamps carry millisecond precision.
        let now = DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);
        let expires_at = now.checked_add_signed(ttl).ok_or(TokenError::InvalidTtl)?;

        let payload = TokenPayload {
            id: Uuid::new_v4(),
            kind,
            subject: subject.to_string(),
            issued_at: now,
            expires_at,
            permissions,
        };

        let token = self.seal(&payload)?;
        tracing::debug!(kind = %kind, id = %payload.id, "token issued");
        Ok(IssuedToken { token, payload })
    }

    pub fn validate(&self, token: &str, expected: TokenKind) -> Result<DecodedToken, TokenError> {
        self.validate_at(token, expected, Utc::now())
    }

    /// Validate a token as if the current time were `now`.
    ///
    /// Every decoding, decryption or structural failure yields the same
    /// [`TokenError::Invalid`]; the specific cause is only logged.
    pub fn validate_at(
        &self,
        token: &str,
        expected: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<DecodedToken, TokenError> {
        let payload = self.open(token)?;

        if now > payload.expires_at {
            tracing::debug!(id = %payload.id, "token rejected: expired");
            return Err(TokenError::Expired);
        }
        if payload.issued_at > now + chrono::Duration::seconds(MAX_CLOCK_SKEW_SECS) {
            tracing::warn!(id = %payload.id, "token rejected: issued in the future");
            return Err(TokenError::ClockSkew);
        }
        if payload.kind != expected {
            tracing::debug!(
                id = %payload.id,
                kind = %payload.kind,
                expected = %expected,
                "token rejected: type mismatch"
            );
            return Err(TokenError::TypeMismatch);
        }
        if let Some(store) = &self.revocations {
            if store.is_revoked(&payload.id) {
                tracing::debug!(id = %payload.id, "token rejected: revoked");
                return Err(TokenError::Revoked);
            }
        }

        let remaining = (payload.expires_at - now).to_std().unwrap_or_default();
        Ok(DecodedToken { payload, remaining })
    }

    /// Revoke a token until its natural expiry. Returns `false` when no
    /// revocation store is attached.
    pub fn revoke(&self, payload: &TokenPayload) -> bool {
        match &self.revocations {
            Some(store) => {
                store.revoke(payload.id, payload.expires_at);
                tracing::info!(id = %payload.id, kind = %payload.kind, "token revoked");
                true
            }
            None => false,
        }
    }

    /// Spend a single-use token. Of several concurrent callers holding the
    /// same validated payload, only one gets `Ok`; the rest get
    /// [`TokenError::Revoked`]. Without a revocation store nothing can be
    /// spent and every call succeeds.
    pub fn consume(&self, payload: &TokenPayload) -> Result<(), TokenError> {
        let Some(store) = &self.revocations else {
            return Ok(());
        };
        if store.revoke_once(payload.id, payload.expires_at) {
            tracing::info!(id = %payload.id, kind = %payload.kind, "token consumed");
            Ok(())
        } else {
            tracing::warn!(id = %payload.id, kind = %payload.kind, "token already consumed");
            Err(TokenError::Revoked)
        }
    }

    fn seal(&self, payload: &TokenPayload) -> Result<String, TokenError> {
        let mut buffer =
            serde_json::to_vec(payload).map_err(|e| TokenError::Encryption(e.to_string()))?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let tag = self
            .cipher
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), TOKEN_AAD, &mut buffer)
            .map_err(|_| TokenError::Encryption("aead seal failed".to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + TAG_LEN + buffer.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&tag);
        out.extend_from_slice(&buffer);
        Ok(URL_SAFE_NO_PAD.encode(out))
    }

    fn open(&self, token: &str) -> Result<TokenPayload, TokenError> {
        if token.is_empty() || token.len() > MAX_TOKEN_LEN {
            tracing::debug!(len = token.len(), "token rejected: bad length");
            return Err(TokenError::Invalid);
        }
        let bytes = URL_SAFE_NO_PAD.decode(token).map_err(|e| {
            tracing::debug!(error = %e, "token rejected: not base64url");
            TokenError::Invalid
        })?;
        if bytes.len() < NONCE_LEN + TAG_LEN {
            tracing::debug!(len = bytes.len(), "token rejected: too short");
            return Err(TokenError::Invalid);
        }

        let (nonce, rest) = bytes.split_at(NONCE_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);
        let mut buffer = Zeroizing::new(ciphertext.to_vec());

        self.cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(nonce),
                TOKEN_AAD,
                buffer.as_mut_slice(),
                Tag::from_slice(tag),
            )
            .map_err(|_| {
                tracing::debug!("token rejected: authentication tag mismatch");
                TokenError::Invalid
            })?;

        let payload: TokenPayload = serde_json::from_slice(&buffer).map_err(|e| {
            tracing::debug!(error = %e, "token rejected: malformed payload");
            TokenError::Invalid
        })?;

        if payload.subject.is_empty() || payload.expires_at < payload.issued_at {
            tracing::debug!(id = %payload.id, "token rejected: inconsistent payload");
            return Err(TokenError::Invalid);
        }
        Ok(payload)
    }
}
