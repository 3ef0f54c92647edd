//! Errors surfaced by the control-plane link (C9, §7 "Transport" errors
//! originate here).

#[derive(Debug, thiserror::Error)]
pub enum ControlPlaneError {
    #[error("control-plane request failed: {0}")]
    Request(String),

    #[error("control-plane returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response body: {0}")]
    Malformed(String),

    #[error("push subscription rejected: {0}")]
    PushRejected(String),

    #[error("push channel is closed")]
    PushClosed,

    #[error("agent is not yet registered with the control plane")]
    NotRegistered,

    #[error("audit write failed: {0}")]
    Audit(#[from] agent_audit::AuditError),
}

impl From<reqwest::Error> for ControlPlaneError {
    fn from(e: reqwest::Error) -> Self {
        ControlPlaneError::Request(e.to_string())
    }
}
