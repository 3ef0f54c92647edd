//! Top-level error aggregation for the main controller (C10), following the
//! teacher's `core::error::ToucanError` pattern: one enum, `#[from]` each
//! per-crate error type, so `main` can `?` through startup without manual
//! `map_err` chains.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Crypto(#[from] agent_crypto::CryptoError),

    #[error(transparent)]
    Audit(#[from] agent_audit::AuditError),

    #[error("startup preflight failed: {0}")]
    Preflight(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no secret store available and no passphrase supplied")]
    NoSecretSource,

    #[error("no credentials found at {path} and no bootstrap credentials were supplied")]
    MissingCredentials { path: std::path::PathBuf },

    #[error("invalid elevated credential")]
    InvalidElevatedCredential,
}

impl AgentError {
    /// Process exit code per spec §6 "Operator surface (minimum)": 0
    /// normal, 1 fatal config, 2 credential failure, 3 unrecoverable
    /// local-store corruption.
    pub fn exit_code(&self) -> i32 {
        match self {
            AgentError::Config(_) | AgentError::Preflight(_) => 1,
            AgentError::Crypto(_) | AgentError::NoSecretSource | AgentError::MissingCredentials { .. } | AgentError::InvalidElevatedCredential => 2,
            AgentError::Audit(_) => 3,
            AgentError::Io(_) | AgentError::Json(_) => 1,
        }
    }
}
