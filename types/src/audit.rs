//! [`AuditEvent`]: the durable, append-only record unit (§3, §4.7).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Security,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Strictly increasing across all persisted events, across restarts
    /// (§8 "Audit monotonicity").
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    pub payload: Value,
    pub severity: Severity,
}

impl AuditEvent {
    pub fn new(
        seq: u64,
        timestamp: DateTime<Utc>,
        kind: impl Into<String>,
        payload: Value,
        severity: Severity,
    ) -> Self {
        Self {
            seq,
            timestamp,
            kind: kind.into(),
            payload,
            severity,
        }
    }
}
