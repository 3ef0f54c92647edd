//! Endpoint abstraction: a single request/reply channel to the trading
//! terminal, and a connector that produces one on demand.
//!
//! Mirrors the teacher's `ProfitBackend` trait / `new_backend()` split: real
//! terminal wiring is platform- and vendor-specific and lives outside this
//! crate; `MockEndpoint`/`MockConnector` stand in whenever no real terminal
//! is configured, exactly like the teacher's DLL-vs-mock fallback.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::error::BridgeError;
use crate::frame::{Frame, FrameReply};

#[async_trait]
pub trait TerminalEndpoint: Send + Sync {
    async fn send(&self, frame: Frame) -> Result<FrameReply, BridgeError>;
}

#[async_trait]
pub trait TerminalConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn TerminalEndpoint>, BridgeError>;
}

/// Echoes every frame back as `ok: true` with the request payload as data.
/// Used in tests and whenever no real terminal artifact is installed
/// (§6 "Operator surface": "install/update terminal artifacts").
#[derive(Debug, Default)]
pub struct MockEndpoint {
    requests_served: AtomicU64,
}

#[async_trait]
impl TerminalEndpoint for MockEndpoint {
    async fn send(&self, frame: Frame) -> Result<FrameReply, BridgeError> {
        self.requests_served.fetch_add(1, Ordering::Relaxed);
        Ok(FrameReply {
            correlation_id: frame.correlation_id,
            ok: true,
            data: Some(frame.payload),
            error: None,
        })
    }
}

#[derive(Debug, Default)]
pub struct MockConnector;

#[async_trait]
impl TerminalConnector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn TerminalEndpoint>, BridgeError> {
        Ok(Box::new(MockEndpoint::default()))
    }
}
