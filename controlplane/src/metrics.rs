//! Concrete shape of the `systemMetrics` field carried on every heartbeat
//! (§4.5 "Heartbeat": `{status, version, platform, accountSnapshot,
//! systemMetrics}`). The distilled spec leaves this an unspecified blob; a
//! complete agent types it end to end so the heartbeat body is well-formed
//! JSON rather than an ad hoc map.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub uptime_seconds: u64,
    pub queue_depth: usize,
    pub dedup_set_size: usize,
}

impl SystemMetrics {
    pub fn zero() -> Self {
        Self {
            cpu_percent: 0.0,
            memory_bytes: 0,
            uptime_seconds: 0,
            queue_depth: 0,
            dedup_set_size: 0,
        }
    }
}

/// Implemented by whatever owns the numbers (the main controller, §5
/// "Shared resources"): the link needs fresh metrics every heartbeat but
/// must not depend on `agent-pipeline` or a process-metrics crate directly.
pub trait SystemMetricsSource: Send + Sync {
    fn snapshot(&self) -> SystemMetrics;
}
