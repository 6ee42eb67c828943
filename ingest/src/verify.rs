use hmac::{Hmac, Mac};
use sha2::Sha256;

use corelib::WebhookConfiguration;

type HmacSha256 = Hmac<Sha256>;

/// Verifies a webhook's HMAC-SHA256 signature against the stored per-config
/// secret (§4.7 `verify`). `signature_hex` is the lowercase-hex digest as
/// sent in the marketplace's signature header.
pub fn verify_signature(config: &WebhookConfiguration, raw_body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected_bytes) = hex::decode(signature_hex.trim()) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(config.secret.as_bytes()) else {
        return false;
    };
    mac.update(raw_body);

    mac.verify_slice(&expected_bytes).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> WebhookConfiguration {
        WebhookConfiguration {
            user_id: uuid::Uuid::new_v4(),
            marketplace: "poshmark".to_string(),
            endpoint: "https://example.com/hook".to_string(),
            secret: "top-secret".to_string(),
            subscribed_events: vec!["sale".to_string()],
            verified: true,
            consecutive_errors: 0,
        }
    }

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn accepts_a_correctly_signed_body() {
        let cfg = config();
        let body = br#"{"event":"sale"}"#;
        let sig = sign(&cfg.secret, body);
        assert!(verify_signature(&cfg, body, &sig));
    }

    #[test]
    fn rejects_a_tampered_body() {
        let cfg = config();
        let sig = sign(&cfg.secret, br#"{"event":"sale"}"#);
        assert!(!verify_signature(&cfg, br#"{"event":"sale","amount":999}"#, &sig));
    }

    #[test]
    fn rejects_garbage_signatures() {
        let cfg = config();
        assert!(!verify_signature(&cfg, b"body", "not-hex"));
    }
}
