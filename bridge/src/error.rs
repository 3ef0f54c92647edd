use thiserror::Error;

/// Transport-layer errors (§7 "Transport" taxonomy). The pipeline decides
/// retry policy from these; the bridge itself never retries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("bridge request timed out")]
    Timeout,

    #[error("no healthy endpoint available")]
    Unavailable,

    #[error("endpoint in-flight cap reached")]
    Busy,

    #[error("reply signature or framing invalid: {0}")]
    Protocol(String),

    #[error("terminal-side error: {0}")]
    Terminal(String),
}
