//! Signature verification for inbound webhooks. Every check runs over the
//! exact raw request bytes, before any JSON parsing, and compares digests in
//! constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Verifies a Meta `X-Hub-Signature-256` header (`sha256=<hex>`) against the
/// raw request body.
pub fn verify_hub_signature(secret: &str, header: &str, body: &[u8]) -> bool {
    let Some(hex_digest) = header.strip_prefix("sha256=") else {
        warn!("signature header missing sha256= prefix");
        return false;
    };
    verify_hex_hmac(secret, hex_digest, body)
}

/// Verifies a bare hex HMAC-SHA256 header over the raw body, the form some
/// PSPs use instead of a field-level checksum.
pub fn verify_header_hmac(secret: &str, header: &str, body: &[u8]) -> bool {
    verify_hex_hmac(secret, header.trim(), body)
}

/// Verifies a field-level checksum: the values of all fields except
/// `checksum`, concatenated in key order, HMAC-SHA256 under the shared
/// secret, hex-encoded.
pub fn verify_checksum_fields(
    secret: &str,
    fields: &serde_json::Map<String, serde_json::Value>,
    checksum: &str,
) -> bool {
    let mut keys: Vec<&String> = fields.keys().filter(|k| *k != "checksum").collect();
    keys.sort();

    let mut payload = String::new();
    for key in keys {
        match &fields[key.as_str()] {
            serde_json::Value::String(s) => payload.push_str(s),
            serde_json::Value::Null => {}
            other => payload.push_str(&other.to_string()),
        }
    }
    verify_hex_hmac(secret, checksum.trim(), payload.as_bytes())
}

fn verify_hex_hmac(secret: &str, expected_hex: &str, payload: &[u8]) -> bool {
    let Ok(expected) = hex::decode(expected_hex) else {
        warn!("signature is not valid hex");
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    let computed = mac.finalize().into_bytes();
    constant_time_eq(&computed, &expected)
}

/// Comparison that does not leak the position of the first mismatch.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn hub_signature_accepts_valid_header() {
        let body = br#"{"object":"whatsapp_business_account"}"#;
        let header = format!("sha256={}", sign("app-secret", body));
        assert!(verify_hub_signature("app-secret", &header, body));
    }

    #[test]
    fn hub_signature_rejects_tampered_body() {
        let body = br#"{"object":"whatsapp_business_account"}"#;
        let header = format!("sha256={}", sign("app-secret", body));
        assert!(!verify_hub_signature(
            "app-secret",
            &header,
            br#"{"object":"tampered"}"#
        ));
    }

    #[test]
    fn hub_signature_rejects_wrong_secret_and_bad_format() {
        let body = b"payload";
        let header = format!("sha256={}", sign("other-secret", body));
        assert!(!verify_hub_signature("app-secret", &header, body));
        assert!(!verify_hub_signature("app-secret", "md5=abcdef", body));
        assert!(!verify_hub_signature("app-secret", "sha256=nothex!", body));
    }

    #[test]
    fn checksum_covers_sorted_values_excluding_itself() {
        let secret = "psp-secret";
        // Keys deliberately out of order; concatenation is by sorted key:
        // amount, orderReference, status.
        let checksum = sign(secret, b"12500DK-1004SUCCESS");
        let fields = serde_json::json!({
            "status": "SUCCESS",
            "orderReference": "DK-1004",
            "amount": "12500",
            "checksum": checksum,
        });
        let map = fields.as_object().unwrap();
        assert!(verify_checksum_fields(secret, map, &checksum));
    }

    #[test]
    fn checksum_rejects_value_tampering() {
        let secret = "psp-secret";
        let checksum = sign(secret, b"12500DK-1004SUCCESS");
        let fields = serde_json::json!({
            "status": "SUCCESS",
            "orderReference": "DK-1004",
            "amount": "99999",
            "checksum": checksum,
        });
        let map = fields.as_object().unwrap();
        assert!(!verify_checksum_fields(secret, map, &checksum));
    }

    #[test]
    fn checksum_handles_numeric_fields() {
        let secret = "psp-secret";
        let checksum = sign(secret, b"12500DK-1004");
        let fields = serde_json::json!({
            "orderReference": "DK-1004",
            "amount": 12500,
            "checksum": checksum,
        });
        let map = fields.as_object().unwrap();
        assert!(verify_checksum_fields(secret, map, &checksum));
    }

    #[test]
    fn header_hmac_over_raw_body() {
        let body = br#"{"event":"payment.success"}"#;
        let header = sign("psp-secret", body);
        assert!(verify_header_hmac("psp-secret", &header, body));
        assert!(!verify_header_hmac("psp-secret", &header, b"{}"));
    }

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
