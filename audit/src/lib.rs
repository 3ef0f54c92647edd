#![forbid(unsafe_code)]
#![warn(unused, missing_debug_implementations, rust_2018_idioms)]

//! Append-only audit log and durable outcome outbox (C2).
//!
//! [`AuditLog`] is the system of record for every command transition, safety
//! decision, and security event; [`Outbox`] is the durable queue the
//! control-plane link drains (§4.5, §4.7, §6).

pub mod error;
pub mod log;
pub mod outbox;

pub use error::AuditError;
pub use log::AuditLog;
pub use outbox::{Outbox, OutboxEntry};
