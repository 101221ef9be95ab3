//! Timing-safe equality for webhook signatures and the `/metrics` bearer
//! token. Built on the `subtle` crate.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// `true` when `supplied` equals `expected`, in time independent of where
/// they first differ.
///
/// Each side is reduced to its SHA-256 digest first; a short or truncated
/// signature therefore costs the same as a full-length wrong one.
pub fn constant_time_eq(expected: &[u8], supplied: &[u8]) -> bool {
    let expected_digest = Sha256::digest(expected);
    let supplied_digest = Sha256::digest(supplied);
    expected_digest.ct_eq(&supplied_digest).into()
}
