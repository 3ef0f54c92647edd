//! Secrets-at-rest: encrypts/decrypts the `Credentials` bundle persisted as
//! `secrets.enc` (§6), deriving the encryption key from an OS-provided
//! secret store when available, falling back to an operator passphrase
//! (§9 "Secrets at rest").

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use serde::{Deserialize, Serialize};

use crate::error::CryptoError;
use crate::kdf::{self, KEY_LEN, SALT_LEN};
use agent_types::Credentials;

const NONCE_LEN: usize = 12;

/// On-disk layout of `secrets.enc`: a passphrase-derivation salt (unused and
/// zeroed when the key came from the OS keychain) followed by the AES-GCM
/// nonce and ciphertext.
#[derive(Serialize, Deserialize)]
struct SealedBundle {
    salt: [u8; SALT_LEN],
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
}

/// Where the AES key protecting `secrets.enc` comes from.
#[derive(Debug, Clone)]
pub enum KeySource {
    /// A random key generated once and stored in the OS secret store
    /// (`keyring`), keyed by `(service, account)`.
    OsKeychain { service: String, account: String },
    /// Derived via PBKDF2 from an operator-supplied passphrase plus the
    /// salt stored alongside the ciphertext.
    Passphrase(String),
}

#[derive(Debug, Clone)]
pub struct SecretStore {
    source: KeySource,
}

impl SecretStore {
    pub fn new(source: KeySource) -> Self {
        Self { source }
    }

    /// Encrypts `creds` and returns the bytes to write to `secrets.enc`.
    pub fn seal(&self, creds: &Credentials) -> Result<Vec<u8>, CryptoError> {
        let (key, salt) = self.resolve_key_for_seal()?;
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| CryptoError::Encrypt)?;
        let nonce_bytes = random_nonce();
        let nonce = Nonce::from_slice(&nonce_bytes);
        let plaintext =
            serde_json::to_vec(creds).map_err(|e| CryptoError::Malformed(e.to_string()))?;
        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_ref())
            .map_err(|_| CryptoError::Encrypt)?;
        let bundle = SealedBundle {
            salt,
            nonce: nonce_bytes,
            ciphertext,
        };
        serde_json::to_vec(&bundle).map_err(|e| CryptoError::Malformed(e.to_string()))
    }

    /// Decrypts a `secrets.enc` byte blob back into [`Credentials`].
    pub fn unseal(&self, bytes: &[u8]) -> Result<Credentials, CryptoError> {
        let bundle: SealedBundle =
            serde_json::from_slice(bytes).map_err(|e| CryptoError::Malformed(e.to_string()))?;
        let key = self.resolve_key_for_unseal(&bundle.salt)?;
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| CryptoError::Decrypt)?;
        let nonce = Nonce::from_slice(&bundle.nonce);
        let plaintext = cipher
            .decrypt(nonce, bundle.ciphertext.as_ref())
            .map_err(|_| CryptoError::Decrypt)?;
        serde_json::from_slice(&plaintext).map_err(|e| CryptoError::Malformed(e.to_string()))
    }

    fn resolve_key_for_seal(&self) -> Result<([u8; KEY_LEN], [u8; SALT_LEN]), CryptoError> {
        match &self.source {
            KeySource::OsKeychain { service, account } => {
                let key = os_keychain_key(service, account, true)?;
                Ok((key, [0u8; SALT_LEN]))
            }
            KeySource::Passphrase(passphrase) => {
                let salt = kdf::random_salt();
                let key = kdf::derive_key(passphrase, &salt)?;
                Ok((key, salt))
            }
        }
    }

    fn resolve_key_for_unseal(&self, salt: &[u8; SALT_LEN]) -> Result<[u8; KEY_LEN], CryptoError> {
        match &self.source {
            KeySource::OsKeychain { service, account } => {
                os_keychain_key(service, account, false)
            }
            KeySource::Passphrase(passphrase) => kdf::derive_key(passphrase, salt),
        }
    }
}

fn random_nonce() -> [u8; NONCE_LEN] {
    use rand::RngCore;
    let mut nonce = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce);
    nonce
}

/// Fetches (or, on first use, generates and stores) a 256-bit key in the OS
/// secret store via `keyring`. `create_if_missing` is only true on the seal
/// path — unsealing should never silently mint a new key.
fn os_keychain_key(
    service: &str,
    account: &str,
    create_if_missing: bool,
) -> Result<[u8; KEY_LEN], CryptoError> {
    let entry = keyring::Entry::new(service, account)
        .map_err(|e| CryptoError::KeyringUnavailable(e.to_string()))?;

    match entry.get_password() {
        Ok(encoded) => {
            let raw = hex::decode(encoded).map_err(|e| CryptoError::Malformed(e.to_string()))?;
            raw.try_into()
                .map_err(|_| CryptoError::Malformed("stored key has wrong length".into()))
        }
        Err(keyring::Error::NoEntry) if create_if_missing => {
            let mut key = [0u8; KEY_LEN];
            use rand::RngCore;
            rand::rng().fill_bytes(&mut key);
            entry
                .set_password(&hex::encode(key))
                .map_err(|e| CryptoError::KeyringUnavailable(e.to_string()))?;
            Ok(key)
        }
        Err(e) => Err(CryptoError::KeyringUnavailable(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials {
            api_key: "key".into(),
            api_secret: "secret".into(),
            shared_secret: "shared".into(),
        }
    }

    #[test]
    fn passphrase_round_trip() {
        let store = SecretStore::new(KeySource::Passphrase("correct horse battery staple".into()));
        let sealed = store.seal(&creds()).unwrap();
        let opened = store.unseal(&sealed).unwrap();
        assert_eq!(opened.api_key, "key");
        assert_eq!(opened.shared_secret, "shared");
    }

    #[test]
    fn wrong_passphrase_fails_to_decrypt() {
        let sealed = SecretStore::new(KeySource::Passphrase("right".into()))
            .seal(&creds())
            .unwrap();
        let err = SecretStore::new(KeySource::Passphrase("wrong".into()))
            .unseal(&sealed)
            .unwrap_err();
        assert!(matches!(err, CryptoError::Decrypt));
    }
}
