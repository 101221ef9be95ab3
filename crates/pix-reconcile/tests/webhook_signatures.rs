use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use pix_reconcile::hmac::{compute_hmac, hmac_sha256};
use pix_reconcile::webhook::{encode_signature, verify};
use pix_reconcile::{SignatureEncoding, WebhookVerifier};

const BODY: &[u8] = br#"{"event":"charge.paid"}"#;

#[test]
fn test_processor_signature_accepted() {
    let verifier = WebhookVerifier::new(b"s1".to_vec(), SignatureEncoding::Hex);
    let signature = compute_hmac(b"s1", BODY);
    assert!(verifier.verify(BODY, Some(&signature)));
}

#[test]
fn test_signature_under_other_secret_rejected() {
    let signature = compute_hmac(b"s1", BODY);
    assert!(!verify(BODY, &signature, b"s2", SignatureEncoding::Hex));
}

#[test]
fn test_body_must_be_byte_exact() {
    let signature = compute_hmac(b"s1", BODY);
    let pretty = br#"{ "event": "charge.paid" }"#;
    let trailing_newline = b"{\"event\":\"charge.paid\"}\n";
    assert!(!verify(pretty, &signature, b"s1", SignatureEncoding::Hex));
    assert!(!verify(
        trailing_newline,
        &signature,
        b"s1",
        SignatureEncoding::Hex
    ));
}

#[test]
fn test_base64_processors() {
    let verifier = WebhookVerifier::new(b"s1".to_vec(), SignatureEncoding::Base64);
    let signature = STANDARD.encode(hmac_sha256(b"s1", BODY));
    assert_eq!(signature, encode_signature(b"s1", BODY, SignatureEncoding::Base64));
    assert!(verifier.verify(BODY, Some(&signature)));

    // Hex form of the right MAC is still the wrong wire format.
    assert!(!verifier.verify(BODY, Some(&compute_hmac(b"s1", BODY))));
}

#[test]
fn test_truncated_or_missing_signature_rejected() {
    let verifier = WebhookVerifier::new(b"s1".to_vec(), SignatureEncoding::Hex);
    let signature = compute_hmac(b"s1", BODY);
    assert!(!verifier.verify(BODY, Some(&signature[..32])));
    assert!(!verifier.verify(BODY, Some("")));
    assert!(!verifier.verify(BODY, None));
}
