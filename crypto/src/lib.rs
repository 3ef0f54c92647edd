#![forbid(unsafe_code)]
#![warn(unused, missing_debug_implementations, rust_2018_idioms)]

//! Cryptographic primitives (C1): HMAC signing/verification for terminal and
//! control-plane messages, PBKDF2 key derivation, and AES-256-GCM encryption
//! for secrets at rest.
//!
//! Nothing here holds a plaintext long-term key in memory longer than it has
//! to: [`SecretStore::unseal`] returns a `Credentials` value the caller owns,
//! and the derived AES key is dropped as soon as encryption/decryption
//! returns.

pub mod error;
pub mod hmac_sign;
pub mod kdf;
pub mod secretstore;

pub use error::CryptoError;
pub use hmac_sign::{sign, verify};
pub use secretstore::SecretStore;
