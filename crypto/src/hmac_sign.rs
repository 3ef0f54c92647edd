//! HMAC-SHA256 signing/verification (§6 terminal frames and control-plane
//! requests both use this).

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Signs `message` with `key`, returning a lowercase hex digest.
pub fn sign(message: &[u8], key: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies `signature` (lowercase hex) against `message` and `key` in
/// constant time, satisfying the §8 signature law:
/// `verify(sign(m, k), k) = true`, `verify(sign(m, k), k') = false` for
/// `k != k'`.
pub fn verify(message: &[u8], key: &[u8], signature: &str) -> bool {
    let Ok(given) = hex::decode(signature) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(message);
    let expected = mac.finalize().into_bytes();
    expected.ct_eq(&given).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_succeeds_with_matching_key() {
        let sig = sign(b"payload", b"secret");
        assert!(verify(b"payload", b"secret", &sig));
    }

    #[test]
    fn wrong_key_fails() {
        let sig = sign(b"payload", b"secret");
        assert!(!verify(b"payload", b"other", &sig));
    }

    #[test]
    fn tampered_message_fails() {
        let sig = sign(b"payload", b"secret");
        assert!(!verify(b"tampered", b"secret", &sig));
    }

    #[test]
    fn malformed_signature_does_not_panic() {
        assert!(!verify(b"payload", b"secret", "not-hex!!"));
    }
}
