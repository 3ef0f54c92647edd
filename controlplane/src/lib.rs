#![forbid(unsafe_code)]
#![warn(unused, missing_debug_implementations, rust_2018_idioms)]

//! Control-plane link (C9, §4.5): push-channel subscription, REST fallback
//! polling, heartbeat, credentialed authentication, and bounded
//! reconnection.
//!
//! [`ControlPlaneLink`] is the facade the main controller owns; [`RestClient`]
//! is the signed HTTP client for §6's control-plane surface, and [`PushClient`]
//! is the narrow capability interface §9 requires so this crate never names a
//! vendor push protocol.

pub mod error;
pub mod link;
pub mod metrics;
pub mod push;
pub mod rest;

pub use error::ControlPlaneError;
pub use link::{ControlPlaneLink, ControlPlaneLinkConfig};
pub use metrics::{SystemMetrics, SystemMetricsSource};
pub use push::{InMemoryPushClient, PushClient, PushEvent};
pub use rest::RestClient;
