#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_crate_dependencies,
    unused_extern_crates,
    clippy::unused_self,
    clippy::useless_let_if_seq,
    missing_debug_implementations,
    rust_2018_idioms
)]
#![allow(clippy::type_complexity, clippy::too_many_arguments, type_alias_bounds)]

//! Strategy monitor (C7, §4.4): evaluates active strategies' rule trees
//! against cached market data and submits candidate orders.
//!
//! [`monitor::StrategyMonitor`] owns one tick loop per active strategy.
//! [`rule`] is the rule-tree interpreter, [`filters`] the per-tick gating
//! checks, and [`sizing`] turns a truthy entry signal into a sized
//! candidate order.

pub mod filters;
pub mod monitor;
pub mod rule;
pub mod sizing;

pub use filters::{SkipReason, TickContext};
pub use monitor::StrategyMonitor;
pub use sizing::CandidateOrder;
