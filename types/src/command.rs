//! [`Command`] and its state machine.
//!
//! A `Command` is immutable once accepted by the pipeline (§3, §4.1); what
//! mutates is the [`CommandState`] attached to it by the pipeline's dispatch
//! loop.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::position::Side;

/// Opaque, process-lifetime-unique command identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, derive_more::Display,
)]
pub struct CommandId(pub Uuid);

impl CommandId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CommandId {
    fn default() -> Self {
        Self::new()
    }
}

/// Who originated a [`Command`].
///
/// Only `ControlPlane` and `Operator` commands require a verified signature
/// (§3 invariants); `Strategy`-sourced commands are produced internally by
/// this process and never cross the signature boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Source {
    ControlPlane,
    Strategy,
    Operator,
}

impl Source {
    pub fn requires_signature(self) -> bool {
        !matches!(self, Source::Strategy)
    }
}

/// Dispatch priority. Ordering is `Critical > High > Normal > Low`; the
/// derived `Ord` impl is relied on by the pipeline's binary-heap queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    pub fn is_critical(self) -> bool {
        matches!(self, Priority::Critical)
    }
}

/// Command kind discriminant, independent of payload contents so dispatch
/// logic (timeouts, retry eligibility, preemption) can switch on it without
/// matching the full payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandKind {
    OpenPosition,
    ClosePosition,
    ModifyPosition,
    CloseAll,
    StartStrategy,
    StopStrategy,
    EmergencyStop,
    QueryAccount,
    Ping,
}

impl CommandKind {
    /// Trading actions must pass through the safety validator (§4.1 step 2).
    pub fn is_trading_action(self) -> bool {
        matches!(
            self,
            CommandKind::OpenPosition
                | CommandKind::ClosePosition
                | CommandKind::ModifyPosition
                | CommandKind::CloseAll
        )
    }

    /// Per-kind bridge timeout (§4.1 step 3, §5 "Timeouts summary").
    pub fn bridge_timeout(self, critical: bool) -> std::time::Duration {
        use std::time::Duration;
        if critical {
            return Duration::from_secs(2);
        }
        match self {
            CommandKind::QueryAccount => Duration::from_secs(5),
            _ => Duration::from_secs(10),
        }
    }

    /// Whether a `failed` outcome for this kind is eligible to re-enter
    /// `queued` for retry (§3 `CommandState`, §4.1 step 5).
    pub fn is_retryable(self) -> bool {
        !matches!(self, CommandKind::EmergencyStop | CommandKind::CloseAll)
    }
}

/// Kind-specific command data. The active variant always agrees with
/// [`Command::kind`]; this is enforced in [`Command::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandPayload {
    OpenPosition {
        symbol: String,
        side: Side,
        volume: Decimal,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
        strategy_id: Option<String>,
    },
    ClosePosition {
        ticket: i64,
    },
    ModifyPosition {
        ticket: i64,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
    },
    CloseAll,
    StartStrategy {
        strategy_id: String,
    },
    StopStrategy {
        strategy_id: String,
    },
    EmergencyStop,
    QueryAccount,
    Ping,
}

impl CommandPayload {
    pub fn kind(&self) -> CommandKind {
        match self {
            CommandPayload::OpenPosition { .. } => CommandKind::OpenPosition,
            CommandPayload::ClosePosition { .. } => CommandKind::ClosePosition,
            CommandPayload::ModifyPosition { .. } => CommandKind::ModifyPosition,
            CommandPayload::CloseAll => CommandKind::CloseAll,
            CommandPayload::StartStrategy { .. } => CommandKind::StartStrategy,
            CommandPayload::StopStrategy { .. } => CommandKind::StopStrategy,
            CommandPayload::EmergencyStop => CommandKind::EmergencyStop,
            CommandPayload::QueryAccount => CommandKind::QueryAccount,
            CommandPayload::Ping => CommandKind::Ping,
        }
    }
}

/// Hex-encoded HMAC-SHA256 signature over a command's canonical form.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(pub String);

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}...)", &self.0.get(..8).unwrap_or(&self.0))
    }
}

/// An authenticated instruction to perform or change a trading action.
///
/// Immutable once constructed. See `spec.md` §3 for field invariants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: CommandId,
    pub priority: Priority,
    pub payload: CommandPayload,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub signature: Option<Signature>,
    pub source: Source,
}

/// Returned by [`Command::new`] when a structural invariant is violated.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CommandBuildError {
    #[error("expiresAt ({expires_at}) must be after issuedAt ({issued_at})")]
    ExpiryBeforeIssue {
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },
    #[error("source {source:?} requires a signature")]
    MissingSignature { source: Source },
}

impl Command {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        priority: Priority,
        payload: CommandPayload,
        issued_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
        signature: Option<Signature>,
        source: Source,
    ) -> Result<Self, CommandBuildError> {
        if let Some(expires_at) = expires_at {
            if expires_at <= issued_at {
                return Err(CommandBuildError::ExpiryBeforeIssue {
                    issued_at,
                    expires_at,
                });
            }
        }
        if source.requires_signature() && signature.is_none() {
            return Err(CommandBuildError::MissingSignature { source });
        }
        Ok(Self {
            id: CommandId::new(),
            priority,
            payload,
            issued_at,
            expires_at,
            signature,
            source,
        })
    }

    pub fn kind(&self) -> CommandKind {
        self.payload.kind()
    }

    /// Canonical byte form signed over by §6's terminal/control-plane
    /// signature schemes: `id || kind || payload-json || issuedAt`.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(self.id.0.as_bytes());
        buf.extend_from_slice(format!("{:?}", self.kind()).as_bytes());
        if let Ok(payload_json) = serde_json::to_vec(&self.payload) {
            buf.extend_from_slice(&payload_json);
        }
        buf.extend_from_slice(self.issued_at.timestamp_millis().to_string().as_bytes());
        buf
    }

    pub fn is_expired(&self, now: DateTime<Utc>, skew: chrono::Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => now - skew > expires_at,
            None => false,
        }
    }
}

/// Command lifecycle state (§3). Transitions are monotonic except that
/// `Failed` may re-enter `Queued` (bounded retry) and `Executing` is the
/// only state with two terminals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommandState {
    Received,
    Queued,
    Validating,
    Dispatching,
    AwaitingAck,
    Executing,
    Executed,
    Failed,
    Cancelled,
    Expired,
}

impl CommandState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CommandState::Executed
                | CommandState::Failed
                | CommandState::Cancelled
                | CommandState::Expired
        )
    }

    /// Whether `cancel(id)` is permitted from this state (§5 "Cancellation").
    pub fn cancellable(self) -> bool {
        matches!(
            self,
            CommandState::Received | CommandState::Queued | CommandState::Validating
        )
    }

    /// Validates a proposed transition against the table in §3/§4.1.
    /// `retry` distinguishes the one legal backward edge
    /// (`Failed -> Queued`) from an illegal regression.
    pub fn can_transition_to(self, next: CommandState) -> bool {
        use CommandState::*;
        matches!(
            (self, next),
            (Received, Queued)
                | (Received, Cancelled)
                | (Received, Expired)
                | (Queued, Validating)
                | (Queued, Cancelled)
                | (Queued, Expired)
                | (Validating, Dispatching)
                | (Validating, Failed)
                | (Validating, Cancelled)
                | (Dispatching, AwaitingAck)
                | (Dispatching, Executing)
                | (Dispatching, Failed)
                | (AwaitingAck, Executing)
                | (AwaitingAck, Failed)
                | (Executing, Executed)
                | (Executing, Failed)
                | (Failed, Queued)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_open(source: Source, signature: Option<Signature>) -> Result<Command, CommandBuildError> {
        Command::new(
            Priority::Normal,
            CommandPayload::OpenPosition {
                symbol: "EURUSD".into(),
                side: Side::Buy,
                volume: Decimal::new(1, 1),
                stop_loss: None,
                take_profit: None,
                strategy_id: None,
            },
            Utc::now(),
            Some(Utc::now() + chrono::Duration::seconds(30)),
            signature,
            source,
        )
    }

    #[test]
    fn control_plane_command_requires_signature() {
        let err = sample_open(Source::ControlPlane, None).unwrap_err();
        assert_eq!(err, CommandBuildError::MissingSignature { source: Source::ControlPlane });
    }

    #[test]
    fn strategy_command_does_not_require_signature() {
        assert!(sample_open(Source::Strategy, None).is_ok());
    }

    #[test]
    fn expiry_before_issue_rejected() {
        let now = Utc::now();
        let err = Command::new(
            Priority::Normal,
            CommandPayload::Ping,
            now,
            Some(now - chrono::Duration::seconds(1)),
            None,
            Source::Strategy,
        )
        .unwrap_err();
        assert!(matches!(err, CommandBuildError::ExpiryBeforeIssue { .. }));
    }

    #[test]
    fn state_machine_allows_retry_but_not_arbitrary_regression() {
        assert!(CommandState::Failed.can_transition_to(CommandState::Queued));
        assert!(!CommandState::Executed.can_transition_to(CommandState::Queued));
        assert!(!CommandState::Queued.can_transition_to(CommandState::Executed));
    }

    #[test]
    fn terminal_states_are_exactly_four() {
        use CommandState::*;
        let all = [
            Received, Queued, Validating, Dispatching, AwaitingAck, Executing, Executed, Failed,
            Cancelled, Expired,
        ];
        let terminal_count = all.iter().filter(|s| s.is_terminal()).count();
        assert_eq!(terminal_count, 4);
    }
}
