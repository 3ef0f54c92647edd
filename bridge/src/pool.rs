//! Connection pool over [`TerminalEndpoint`]s (§4.3, §5).
//!
//! Endpoints connect lazily on first use. A background task per endpoint
//! sends a heartbeat frame every 5 s; three consecutive misses mark the
//! endpoint unhealthy and trigger reconnect with exponential backoff (base
//! 1 s, cap 30 s). `request` multiplexes across healthy endpoints and fails
//! fast (`bridgeUnavailable`/`bridgeBusy`) rather than queueing unboundedly.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::timeout;
use uuid::Uuid;

use crate::endpoint::{TerminalConnector, TerminalEndpoint};
use crate::error::BridgeError;
use crate::frame::{Frame, FrameKind, FrameReply};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const MAX_MISSED_HEARTBEATS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);
const DEFAULT_IN_FLIGHT_CAP: usize = 8;

struct Slot {
    endpoint: Mutex<Option<Box<dyn TerminalEndpoint>>>,
    healthy: AtomicBool,
    missed_heartbeats: AtomicU32,
    in_flight: AtomicU32,
    reconnect_attempts: AtomicU32,
}

impl Slot {
    fn new() -> Self {
        Self {
            endpoint: Mutex::new(None),
            healthy: AtomicBool::new(false),
            missed_heartbeats: AtomicU32::new(0),
            in_flight: AtomicU32::new(0),
            reconnect_attempts: AtomicU32::new(0),
        }
    }
}

/// A pool of request/reply endpoints to the trading terminal, multiplexing
/// outstanding requests across them by `correlationId` the way the wire
/// frame itself already tags each request (§6).
pub struct BridgePool {
    slots: Vec<Arc<Slot>>,
    connector: Arc<dyn TerminalConnector>,
    shared_secret: Vec<u8>,
    in_flight_cap: usize,
    next_slot: AtomicU64,
}

impl std::fmt::Debug for BridgePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgePool")
            .field("pool_size", &self.slots.len())
            .field("healthy", &self.healthy_count())
            .finish()
    }
}

impl BridgePool {
    /// Builds a pool of `pool_size` endpoints (default 3, §4.3) and spawns
    /// one heartbeat/reconnect task per slot.
    pub fn spawn(
        connector: Arc<dyn TerminalConnector>,
        shared_secret: Vec<u8>,
        pool_size: usize,
        in_flight_cap: usize,
    ) -> Arc<Self> {
        let pool = Arc::new(Self {
            slots: (0..pool_size.max(1)).map(|_| Arc::new(Slot::new())).collect(),
            connector,
            shared_secret,
            in_flight_cap,
            next_slot: AtomicU64::new(0),
        });

        for slot in pool.slots.clone() {
            let pool = pool.clone();
            tokio::spawn(async move { heartbeat_loop(pool, slot).await });
        }

        pool
    }

    pub fn with_default_capacity(connector: Arc<dyn TerminalConnector>, shared_secret: Vec<u8>) -> Arc<Self> {
        Self::spawn(connector, shared_secret, 3, DEFAULT_IN_FLIGHT_CAP)
    }

    /// True iff at least one endpoint is healthy (§4.3 "the pool exposes
    /// `healthy()` iff >=1 endpoint is healthy").
    pub fn healthy(&self) -> bool {
        self.healthy_count() > 0
    }

    fn healthy_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.healthy.load(Ordering::Relaxed))
            .count()
    }

    /// Issues a request through the pool, respecting `deadline` (the
    /// caller-supplied per-request timeout from §4.1 step 3). Never retries
    /// internally — retry policy belongs to the pipeline (§4.3).
    pub async fn request(
        &self,
        kind: FrameKind,
        payload: serde_json::Value,
        deadline: Duration,
    ) -> Result<FrameReply, BridgeError> {
        admission_check(self)?;

        let Some(slot) = self.pick_slot() else {
            // Lost the race against a concurrent request between the
            // admission check and slot selection.
            return Err(BridgeError::Busy);
        };

        slot.in_flight.fetch_add(1, Ordering::Relaxed);
        let result = self.send_on_slot(&slot, kind, payload, deadline).await;
        slot.in_flight.fetch_sub(1, Ordering::Relaxed);
        result
    }

    /// Round-robins across healthy slots with spare in-flight capacity.
    fn pick_slot(&self) -> Option<Arc<Slot>> {
        let len = self.slots.len() as u64;
        let start = self.next_slot.fetch_add(1, Ordering::Relaxed) % len;

        for offset in 0..len {
            let idx = ((start + offset) % len) as usize;
            let slot = &self.slots[idx];
            if !slot.healthy.load(Ordering::Relaxed) {
                continue;
            }
            if (slot.in_flight.load(Ordering::Relaxed) as usize) < self.in_flight_cap {
                return Some(slot.clone());
            }
        }
        None
    }

    async fn send_on_slot(
        &self,
        slot: &Slot,
        kind: FrameKind,
        payload: serde_json::Value,
        deadline: Duration,
    ) -> Result<FrameReply, BridgeError> {
        let mut guard = slot.endpoint.lock().await;
        if guard.is_none() {
            match self.connector.connect().await {
                Ok(ep) => *guard = Some(ep),
                Err(e) => return Err(e),
            }
        }
        let endpoint = guard.as_ref().expect("connected above");

        let frame = Frame::sign(
            Uuid::new_v4().to_string(),
            now_millis(),
            kind,
            payload,
            &self.shared_secret,
        );

        match timeout(deadline, endpoint.send(frame)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                // Late reply, if it ever arrives, is discarded by dropping
                // the `send` future here; the correlation is abandoned.
                Err(BridgeError::Timeout)
            }
        }
    }
}

/// Distinguishes "no healthy endpoint" from "all healthy endpoints
/// saturated" before a request is attempted, matching §4.3's two distinct
/// fast-fail errors.
pub fn admission_check(pool: &BridgePool) -> Result<(), BridgeError> {
    if !pool.healthy() {
        return Err(BridgeError::Unavailable);
    }
    let saturated = pool
        .slots
        .iter()
        .filter(|s| s.healthy.load(Ordering::Relaxed))
        .all(|s| (s.in_flight.load(Ordering::Relaxed) as usize) >= pool.in_flight_cap);
    if saturated {
        return Err(BridgeError::Busy);
    }
    Ok(())
}

async fn heartbeat_loop(pool: Arc<BridgePool>, slot: Arc<Slot>) {
    loop {
        {
            let mut guard = slot.endpoint.lock().await;
            if guard.is_none() {
                match pool.connector.connect().await {
                    Ok(ep) => {
                        *guard = Some(ep);
                        slot.healthy.store(true, Ordering::Relaxed);
                        slot.missed_heartbeats.store(0, Ordering::Relaxed);
                        slot.reconnect_attempts.store(0, Ordering::Relaxed);
                    }
                    Err(_) => {
                        drop(guard);
                        backoff_sleep(&slot).await;
                        continue;
                    }
                }
            }
        }

        let ping_ok = {
            let guard = slot.endpoint.lock().await;
            if let Some(endpoint) = guard.as_ref() {
                let frame = Frame::sign(
                    Uuid::new_v4().to_string(),
                    now_millis(),
                    FrameKind::Ping,
                    serde_json::json!({}),
                    &pool.shared_secret,
                );
                timeout(Duration::from_secs(2), endpoint.send(frame))
                    .await
                    .map(|r| r.is_ok())
                    .unwrap_or(false)
            } else {
                false
            }
        };

        if ping_ok {
            slot.missed_heartbeats.store(0, Ordering::Relaxed);
            slot.healthy.store(true, Ordering::Relaxed);
            tokio::time::sleep(HEARTBEAT_INTERVAL).await;
        } else {
            let missed = slot.missed_heartbeats.fetch_add(1, Ordering::Relaxed) + 1;
            if missed >= MAX_MISSED_HEARTBEATS {
                slot.healthy.store(false, Ordering::Relaxed);
                *slot.endpoint.lock().await = None;
                backoff_sleep(&slot).await;
            } else {
                tokio::time::sleep(HEARTBEAT_INTERVAL).await;
            }
        }
    }
}

async fn backoff_sleep(slot: &Slot) {
    let attempt = slot.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    let backoff = BACKOFF_BASE.saturating_mul(1 << attempt.min(6)).min(BACKOFF_CAP);
    tokio::time::sleep(backoff).await;
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::MockConnector;

    #[tokio::test]
    async fn request_succeeds_once_endpoint_becomes_healthy() {
        let pool = BridgePool::spawn(Arc::new(MockConnector), b"secret".to_vec(), 2, 4);

        // Give the heartbeat task a moment to connect and mark healthy.
        let mut attempts = 0;
        while !pool.healthy() && attempts < 50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            attempts += 1;
        }
        assert!(pool.healthy());

        let reply = pool
            .request(FrameKind::Ping, serde_json::json!({}), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(reply.ok);
    }

    #[test]
    fn admission_check_rejects_when_no_healthy_slot() {
        let pool = BridgePool {
            slots: vec![Arc::new(Slot::new())],
            connector: Arc::new(MockConnector),
            shared_secret: vec![],
            in_flight_cap: 1,
            next_slot: AtomicU64::new(0),
        };
        assert_eq!(admission_check(&pool), Err(BridgeError::Unavailable));
    }
}
