//! Narrow capability interfaces shared across component boundaries so
//! crates on either side of a boundary don't need a hard dependency on each
//! other (§5 "Shared resources", §9 "Push client dependency" applies the
//! same pattern to the control-plane push transport).
//!
//! [`CommandSink`] lets `agent-strategy` submit candidate orders into
//! `agent-pipeline` without depending on it. [`AccountSource`] lets any
//! reader observe the heartbeat-refreshed [`crate::AccountSnapshot`]
//! without depending on `agent-controlplane`. [`CandleFetcher`] lets
//! `agent-strategy` ask the terminal bridge to backfill a
//! (symbol, timeframe) series without depending on `agent-bridge`.

use async_trait::async_trait;

use crate::account::AccountSnapshot;
use crate::command::{Command, CommandId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("duplicate command id")]
    Duplicate,
    #[error("signature invalid or missing")]
    BadSignature,
    #[error("command already expired")]
    Expired,
    #[error("clock skew exceeds tolerance")]
    ClockSkew,
    #[error("queue is shutting down")]
    ShuttingDown,
    #[error("no strategy registered with this id")]
    UnknownStrategy,
}

/// Why [`CommandSink::cancel`] failed. Mirrors `CommandState` reachability:
/// a command not currently tracked, or one already past
/// `{received, queued, validating}`, cannot be cancelled (§5 "Cancellation").
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CancelError {
    #[error("no such command")]
    NotFound,
    #[error("command already past the cancellable window")]
    NotCancellable,
}

/// Implemented by the command pipeline (C8); called by the strategy monitor
/// (C7) and the control-plane link (C9) so every order — manual or
/// autonomous — shares one intake and audit path (§2 "Control flow").
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn submit(&self, command: Command) -> Result<CommandId, SubmitError>;

    /// Cancels a still-queued command (§4.1 "Command pipeline" contract,
    /// §5 "Cancellation"). Called from the control-plane link's `cancel`
    /// push event as well as any future operator-facing cancel path.
    async fn cancel(&self, id: CommandId) -> Result<(), CancelError>;
}

/// Implemented by whatever owns the live [`AccountSnapshot`] (the
/// control-plane link's heartbeat handler); read by the safety validator
/// and strategy monitor (§5 "Account snapshot": "single-writer ...
/// multi-reader").
pub trait AccountSource: Send + Sync {
    fn latest(&self) -> Option<AccountSnapshot>;
}

/// Implemented by the terminal bridge; called by the strategy monitor when
/// its market data cache has no series for a (symbol, timeframe) it needs
/// (§4.4 step 1: "request a fetch via C3 and skip this tick"). Fire-and
/// -forget: the call requests a refresh without the caller waiting on it.
pub trait CandleFetcher: Send + Sync {
    fn request_fetch(&self, symbol: &str, timeframe: &str);
}

/// Implemented by the strategy monitor; called by the command pipeline when
/// it dispatches a `START_STRATEGY`/`STOP_STRATEGY` command, so activating a
/// strategy shares the same intake/audit path as every other command
/// (§2 "Control flow") instead of being a side channel.
#[async_trait]
pub trait StrategyControl: Send + Sync {
    async fn activate(&self, strategy_id: &str) -> Result<(), SubmitError>;
    async fn deactivate(&self, strategy_id: &str) -> Result<(), SubmitError>;
}

/// Implemented by the strategy monitor; called by the command pipeline
/// after every terminal outcome that carries a `strategy_id` so
/// `MonitorState.hasOpenPosition`/`openTicket` stays in sync without the
/// pipeline depending on `agent-strategy` directly (§4.4 "Open-position
/// tracking").
pub trait StrategyOutcomeSink: Send + Sync {
    fn record_outcome(&self, strategy_id: &str, opened_ticket: Option<i64>);
}
