#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    missing_debug_implementations,
    rust_2018_idioms
)]

//! Shared domain types for the trading execution agent.
//!
//! This crate has no logic beyond invariant-preserving constructors, the
//! `Command` state machine transition table, and the `SyncShutdown`/
//! `AsyncShutdown` component-lifecycle traits shared across crates. Every
//! other crate in the workspace depends on it; it depends on nothing in the
//! workspace.

pub mod account;
pub mod audit;
pub mod candle;
pub mod command;
pub mod credentials;
pub mod integration;
pub mod monitor;
pub mod position;
pub mod safety;
pub mod shutdown;
pub mod strategy;

pub use account::AccountSnapshot;
pub use audit::{AuditEvent, Severity};
pub use candle::Candle;
pub use command::{
    Command, CommandBuildError, CommandId, CommandKind, CommandPayload, CommandState, Priority,
    Signature, Source,
};
pub use credentials::{Credentials, ElevatedCredential};
pub use integration::{
    AccountSource, CancelError, CandleFetcher, CommandSink, StrategyControl, StrategyOutcomeSink,
    SubmitError,
};
pub use monitor::MonitorState;
pub use position::{Position, Side};
pub use safety::SafetyLimits;
pub use shutdown::{AsyncShutdown, SyncShutdown};
pub use strategy::{
    BoolOp, Comparator, IndicatorRef, MacdComponent, RiskSpec, RuleNode, Strategy, StrategyFilter,
};
