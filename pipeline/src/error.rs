//! Error taxonomy for the command pipeline (C8, §7).
//!
//! [`FailureKind`] realizes §7's taxonomy as a concrete type with a
//! `is_retryable` predicate, rather than ad-hoc strings: `Validation` and
//! `Policy` failures are rejected/denied at intake or validation and never
//! retried; `Transport` failures are retried per §4.1 step 5; `Terminal`
//! failures are surfaced verbatim and never retried.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("audit log error: {0}")]
    Audit(#[from] agent_audit::AuditError),

    #[error("pipeline is shutting down")]
    ShuttingDown,
}

/// A classified reason a dispatched command did not reach `executed`
/// (§7 "Taxonomy"). Distinct from [`agent_types::SubmitError`], which
/// covers intake rejections before a command is ever queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FailureKind {
    /// Rejected at intake: malformed or unauthenticated. Never retried.
    Validation { reason: String },
    /// Denied by the safety validator. Never retried; may latch the
    /// emergency stop (§4.2 items 8-9).
    Policy { reason: agent_safety::DenyReason },
    /// `bridgeTimeout`, `bridgeUnavailable`, `bridgeBusy`, or a
    /// control-plane 5xx/timeout. Retryable per §4.1 step 5.
    Transport { reason: String },
    /// Symbol rejected, insufficient margin, invalid price, market closed.
    /// Surfaced verbatim; never retried.
    Terminal { reason: String },
    /// Audit write failure, disk full, key-store unavailable. Fatal for
    /// the affected write; degrades the agent to read-only for trading.
    Local { reason: String },
    /// Internal invariant violation. Captured and logged with a
    /// security-severity audit event; the containing task is isolated and
    /// restarted by the main controller (§7 "Programming").
    Programming { reason: String },
}

impl FailureKind {
    /// Whether a command that failed for this reason is eligible to
    /// re-enter `queued` (§3 `CommandState`, §4.1 step 5). Retry eligibility
    /// still requires the command's own [`agent_types::CommandKind::is_retryable`]
    /// to hold — this only classifies the failure itself.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::Transport { .. })
    }

    pub fn reason_code(&self) -> &str {
        match self {
            FailureKind::Validation { reason }
            | FailureKind::Transport { reason }
            | FailureKind::Terminal { reason }
            | FailureKind::Local { reason }
            | FailureKind::Programming { reason } => reason,
            FailureKind::Policy { reason } => reason.as_ref(),
        }
    }
}

trait DenyReasonCode {
    fn as_ref(&self) -> &str;
}

impl DenyReasonCode for agent_safety::DenyReason {
    fn as_ref(&self) -> &str {
        match self {
            agent_safety::DenyReason::EmergencyStopActive => "emergencyStopActive",
            agent_safety::DenyReason::SymbolNotAllowed => "symbolNotAllowed",
            agent_safety::DenyReason::TimeForbidden => "timeForbidden",
            agent_safety::DenyReason::StaleAccount => "staleAccount",
            agent_safety::DenyReason::PositionLimit => "positionLimit",
            agent_safety::DenyReason::LotTooLarge => "lotTooLarge",
            agent_safety::DenyReason::RiskTooHigh => "riskTooHigh",
            agent_safety::DenyReason::DailyLossExceeded => "dailyLossExceeded",
            agent_safety::DenyReason::DrawdownExceeded => "drawdownExceeded",
        }
    }
}
