use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key derivation failed: {0}")]
    Kdf(String),

    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed (wrong key or corrupted ciphertext)")]
    Decrypt,

    #[error("malformed secret bundle: {0}")]
    Malformed(String),

    #[error("OS secret store unavailable: {0}")]
    KeyringUnavailable(String),

    #[error("no passphrase supplied and no OS secret store is available")]
    NoPassphrase,
}
