//! [`Outcome`]: the terminal-state record produced for every accepted
//! command (§4.1 "Outcome reporting", §8 "Outcome completeness").
//!
//! Every outcome is persisted to the audit log and enqueued onto the
//! [`agent_audit::Outbox`] for upstream reporting in the same step, so the
//! two are never out of sync with each other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use agent_types::{CommandId, CommandKind};

use crate::error::FailureKind;

/// The terminal classification an outcome reports. A superset of
/// [`agent_types::CommandState`]'s four terminal states: `Rejected` covers
/// an intake-time denial (§4.1 (a)-(c)), which never enters the state
/// machine at all, so it does not belong on `CommandState` itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutcomeKind {
    Rejected,
    Executed,
    Failed,
    Cancelled,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub command_id: CommandId,
    pub kind: CommandKind,
    pub outcome: OutcomeKind,
    pub failure: Option<FailureKind>,
    /// Kind-specific result data: e.g. `{"ticket": 777}` for an executed
    /// `OPEN_POSITION` (§8 scenario 1).
    pub result: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl Outcome {
    pub fn executed(command_id: CommandId, kind: CommandKind, result: serde_json::Value) -> Self {
        Self {
            command_id,
            kind,
            outcome: OutcomeKind::Executed,
            failure: None,
            result,
            occurred_at: Utc::now(),
        }
    }

    pub fn failed(command_id: CommandId, kind: CommandKind, failure: FailureKind) -> Self {
        Self {
            command_id,
            kind,
            outcome: OutcomeKind::Failed,
            failure: Some(failure),
            result: serde_json::Value::Null,
            occurred_at: Utc::now(),
        }
    }

    pub fn rejected(command_id: CommandId, kind: CommandKind, reason: impl Into<String>) -> Self {
        Self {
            command_id,
            kind,
            outcome: OutcomeKind::Rejected,
            failure: Some(FailureKind::Validation {
                reason: reason.into(),
            }),
            result: serde_json::Value::Null,
            occurred_at: Utc::now(),
        }
    }

    pub fn cancelled(command_id: CommandId, kind: CommandKind) -> Self {
        Self {
            command_id,
            kind,
            outcome: OutcomeKind::Cancelled,
            failure: None,
            result: serde_json::Value::Null,
            occurred_at: Utc::now(),
        }
    }

    pub fn expired(command_id: CommandId, kind: CommandKind) -> Self {
        Self {
            command_id,
            kind,
            outcome: OutcomeKind::Expired,
            failure: None,
            result: serde_json::Value::Null,
            occurred_at: Utc::now(),
        }
    }

    /// Whether this outcome represents a fill, for the trade-reporting
    /// open question (§9, clarified in `SPEC_FULL.md` §C.1): only a
    /// successfully executed `OpenPosition`/`ClosePosition` is also posted
    /// to `POST /agent/{id}/trades`.
    pub fn is_fill(&self) -> bool {
        self.outcome == OutcomeKind::Executed
            && matches!(self.kind, CommandKind::OpenPosition | CommandKind::ClosePosition)
    }
}
