#![forbid(unsafe_code)]
#![warn(unused, missing_debug_implementations, rust_2018_idioms)]

//! Terminal bridge (C3): request/reply transport to the trading terminal.
//!
//! [`BridgePool`] owns a small pool of [`endpoint::TerminalEndpoint`]s,
//! lazily connected, heartbeated, and reconnected with backoff (§4.3). The
//! pipeline (`agent-pipeline`) is the only caller and owns retry policy —
//! this crate never retries internally.

pub mod endpoint;
pub mod error;
pub mod frame;
pub mod pool;

pub use endpoint::{MockConnector, MockEndpoint, TerminalConnector, TerminalEndpoint};
pub use error::BridgeError;
pub use frame::{Frame, FrameKind, FrameReply};
pub use pool::{admission_check, BridgePool};
