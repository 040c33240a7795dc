//! Constant-time CSRF token issuance and verification (spec.md §4, §7
//! `CSRFInvalid`). Tokens are an HMAC-SHA256 over a per-request nonce,
//! keyed by the process-wide `CSRF_SECRET` — no session store, matching
//! spec.md §1's note that full session/cookie handling is an external
//! collaborator's concern.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub fn issue(secret: &str, nonce: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(nonce.as_bytes());
    let tag = mac.finalize().into_bytes();
    format!("{}.{}", nonce, hex::encode(tag))
}

/// Verifies a `<nonce>.<hmac-hex>` token in constant time.
pub fn verify(secret: &str, token: &str) -> bool {
    let Some((nonce, tag_hex)) = token.split_once('.') else { return false };
    let Ok(given_tag) = hex::decode(tag_hex) else { return false };

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(nonce.as_bytes());
    let expected_tag = mac.finalize().into_bytes();

    expected_tag.as_slice().ct_eq(&given_tag).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies() {
        let token = issue("secret", "nonce-1");
        assert!(verify("secret", &token));
    }

    #[test]
    fn tampered_token_is_rejected() {
        let mut token = issue("secret", "nonce-1");
        token.push('0');
        assert!(!verify("secret", &token));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue("secret", "nonce-1");
        assert!(!verify("other-secret", &token));
    }
}
