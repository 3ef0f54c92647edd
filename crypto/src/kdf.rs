//! PBKDF2-HMAC-SHA256 key derivation for the operator passphrase fallback
//! (§9 "Secrets at rest": "on platforms without such a store, require an
//! operator-supplied passphrase at startup").

use crate::error::CryptoError;

pub const KEY_LEN: usize = 32;
pub const SALT_LEN: usize = 16;
const ITERATIONS: u32 = 600_000;

pub fn random_salt() -> [u8; SALT_LEN] {
    use rand::RngCore;
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);
    salt
}

/// Derives a 256-bit AES-GCM key from an operator passphrase and salt.
pub fn derive_key(passphrase: &str, salt: &[u8]) -> Result<[u8; KEY_LEN], CryptoError> {
    let mut key = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<sha2::Sha256>(passphrase.as_bytes(), salt, ITERATIONS, &mut key);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_inputs_derive_same_key() {
        let salt = random_salt();
        let k1 = derive_key("hunter2", &salt).unwrap();
        let k2 = derive_key("hunter2", &salt).unwrap();
        assert_eq!(k1, k2);
    }

    #[test]
    fn different_salts_derive_different_keys() {
        let k1 = derive_key("hunter2", &random_salt()).unwrap();
        let k2 = derive_key("hunter2", &random_salt()).unwrap();
        assert_ne!(k1, k2);
    }
}
