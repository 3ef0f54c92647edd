use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize audit record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("audit writer task is no longer running")]
    Closed,

    #[error("audit log recovery found a corrupt record at line {line}: {detail}")]
    RecoveryCorrupt { line: usize, detail: String },

    #[error("audit batch write failed: {0}")]
    WriteFailed(String),
}
