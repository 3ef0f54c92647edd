//! Push-channel capability abstraction (§9 "Push client dependency": "the
//! control-plane push protocol is an external vendor protocol ... the core
//! contains no vendor specifics").
//!
//! [`PushClient`] exposes exactly the four operations the design notes name
//! — `subscribe`, `onMessage`, `onDisconnect`, `close` — so a real
//! implementation (backed by whatever the control plane actually speaks:
//! a managed pub/sub SDK, a raw WebSocket, long-polling) plugs in without
//! this crate ever naming it. [`InMemoryPushClient`] is the deterministic
//! fake used in tests and described in `SPEC_FULL.md`'s test-tooling
//! section.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::ControlPlaneError;

/// A parsed push message, tagged by the channel event types §6 documents:
/// `command`, `cancel`, `resetSafety`, `configUpdate`.
#[derive(Debug, Clone)]
pub enum PushEvent {
    Command(serde_json::Value),
    Cancel(serde_json::Value),
    ResetSafety(serde_json::Value),
    ConfigUpdate(serde_json::Value),
}

impl PushEvent {
    /// Parses a raw push frame `{"type": "...", ...}` into a [`PushEvent`],
    /// or `None` for an event type this agent doesn't act on.
    pub fn parse(raw: &serde_json::Value) -> Option<Self> {
        let kind = raw.get("type")?.as_str()?;
        match kind {
            "command" => Some(PushEvent::Command(raw.clone())),
            "cancel" => Some(PushEvent::Cancel(raw.clone())),
            "resetSafety" => Some(PushEvent::ResetSafety(raw.clone())),
            "configUpdate" => Some(PushEvent::ConfigUpdate(raw.clone())),
            _ => None,
        }
    }
}

type MessageHandler = Box<dyn Fn(PushEvent) + Send + Sync>;
type DisconnectHandler = Box<dyn Fn() + Send + Sync>;

/// Capability interface for the push transport. Implementors authenticate
/// `subscribe` with a server-signed token (§6 "Push channel") and invoke the
/// registered handlers from whatever task owns their I/O loop.
#[async_trait]
pub trait PushClient: Send + Sync {
    async fn subscribe(&self, channel: &str, token: &str) -> Result<(), ControlPlaneError>;
    fn on_message(&self, handler: MessageHandler);
    fn on_disconnect(&self, handler: DisconnectHandler);
    async fn close(&self);
}

#[derive(Default)]
struct Handlers {
    on_message: Option<MessageHandler>,
    on_disconnect: Option<DisconnectHandler>,
}

/// Deterministic in-memory [`PushClient`] for tests: `emit` and
/// `simulate_disconnect` drive the registered handlers directly, with no
/// real network involved.
pub struct InMemoryPushClient {
    handlers: Arc<Mutex<Handlers>>,
    subscribed: Mutex<bool>,
}

impl std::fmt::Debug for InMemoryPushClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryPushClient")
            .field("subscribed", &*self.subscribed.lock())
            .finish()
    }
}

impl InMemoryPushClient {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Mutex::new(Handlers::default())),
            subscribed: Mutex::new(false),
        }
    }

    pub fn emit(&self, event: PushEvent) {
        if let Some(handler) = &self.handlers.lock().on_message {
            handler(event);
        }
    }

    pub fn simulate_disconnect(&self) {
        *self.subscribed.lock() = false;
        if let Some(handler) = &self.handlers.lock().on_disconnect {
            handler();
        }
    }

    pub fn is_subscribed(&self) -> bool {
        *self.subscribed.lock()
    }
}

impl Default for InMemoryPushClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PushClient for InMemoryPushClient {
    async fn subscribe(&self, _channel: &str, _token: &str) -> Result<(), ControlPlaneError> {
        *self.subscribed.lock() = true;
        Ok(())
    }

    fn on_message(&self, handler: MessageHandler) {
        self.handlers.lock().on_message = Some(handler);
    }

    fn on_disconnect(&self, handler: DisconnectHandler) {
        self.handlers.lock().on_disconnect = Some(handler);
    }

    async fn close(&self) {
        *self.subscribed.lock() = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn emitted_events_reach_the_registered_handler() {
        let client = InMemoryPushClient::new();
        client.subscribe("agent-1", "token").await.unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        client.on_message(Box::new(move |_event| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        }));

        client.emit(PushEvent::Command(serde_json::json!({"type": "command"})));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disconnect_fires_handler_and_clears_subscription() {
        let client = InMemoryPushClient::new();
        client.subscribe("agent-1", "token").await.unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        client.on_disconnect(Box::new(move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        }));

        client.simulate_disconnect();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!client.is_subscribed());
    }

    #[test]
    fn parse_recognizes_documented_event_types() {
        assert!(matches!(
            PushEvent::parse(&serde_json::json!({"type": "command"})),
            Some(PushEvent::Command(_))
        ));
        assert!(matches!(
            PushEvent::parse(&serde_json::json!({"type": "resetSafety"})),
            Some(PushEvent::ResetSafety(_))
        ));
        assert!(PushEvent::parse(&serde_json::json!({"type": "unknown"})).is_none());
    }
}
