use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Raw HMAC-SHA256 tag over `body`.
pub fn hmac_sha256(secret: &[u8], body: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// Compute HMAC-SHA256 over the given body bytes using the shared secret.
/// Returns the lowercase hex-encoded MAC.
pub fn compute_hmac(secret: &[u8], body: &[u8]) -> String {
    hex::encode(hmac_sha256(secret, body))
}

/// Same MAC as [`compute_hmac`], standard base64 with padding.
pub fn compute_hmac_base64(secret: &[u8], body: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(hmac_sha256(secret, body))
}

/// Derive a domain-separated subkey so one configured secret never signs
/// two kinds of message.
pub fn derive_key(secret: &[u8], label: &[u8]) -> Vec<u8> {
    hmac_sha256(secret, label).to_vec()
}
