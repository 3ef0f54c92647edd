#![forbid(unsafe_code)]
#![warn(unused, missing_debug_implementations, rust_2018_idioms)]

//! Pre-trade safety validator (C4): a synchronous policy gate every trading
//! command must pass, plus the one process-wide emergency-stop latch
//! (§4.2, §9 "Global state").

pub mod checks;
pub mod error;
pub mod latch;
pub mod validator;

pub use error::DenyReason;
pub use latch::Latch;
pub use validator::{LatchCause, SafetyValidator, TradeRequest, Verdict};
