//! The control-plane link facade (C9, §4.5): wires the signed REST client,
//! the push-channel abstraction, the heartbeat loop, REST fallback polling,
//! and durable outcome shipping into the one handle the main controller
//! owns.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;

use agent_audit::{AuditLog, Outbox};
use agent_bridge::{BridgePool, FrameKind};
use agent_safety::SafetyValidator;
use agent_types::{
    AccountSnapshot, AccountSource, Command, CommandId, CommandSink, Credentials, Severity,
};

use crate::error::ControlPlaneError;
use crate::metrics::SystemMetricsSource;
use crate::push::{PushClient, PushEvent};
use crate::rest::RestClient;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const POLL_FALLBACK_INTERVAL: Duration = Duration::from_secs(15);
const OUTBOX_DRAIN_INTERVAL: Duration = Duration::from_secs(3);
const CONTROL_PLANE_TIMEOUT: Duration = Duration::from_secs(10);
const ACCOUNT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);
const RECONNECT_BASE: Duration = Duration::from_secs(2);
const RECONNECT_CAP: Duration = Duration::from_secs(60);
const DEGRADE_THRESHOLD: u32 = 10;

/// Everything [`ControlPlaneLink::spawn`] needs to wire up C9. Bundled so the
/// constructor's signature stays readable as the set of collaborators grows.
pub struct ControlPlaneLinkConfig {
    pub base_url: url::Url,
    pub agent_id: String,
    pub push_channel: String,
    pub push_token: String,
}

pub struct ControlPlaneLink {
    rest: RestClient,
    agent_id: String,
    credentials: RwLock<Arc<Credentials>>,
    push_channel: String,
    push_token: String,

    bridge: Arc<BridgePool>,
    pipeline: Arc<dyn CommandSink>,
    safety: Arc<SafetyValidator>,
    audit: AuditLog,
    outbox: Arc<Outbox>,
    push: Arc<dyn PushClient>,
    metrics: Arc<dyn SystemMetricsSource>,

    account: RwLock<Option<AccountSnapshot>>,
    push_healthy: AtomicBool,
    consecutive_failures: AtomicU32,
    degraded_emitted: AtomicBool,
    disconnect: Notify,
    shutting_down: AtomicBool,
}

impl std::fmt::Debug for ControlPlaneLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlPlaneLink")
            .field("agent_id", &self.agent_id)
            .field("push_healthy", &self.push_healthy.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ControlPlaneLink {
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        config: ControlPlaneLinkConfig,
        credentials: Arc<Credentials>,
        bridge: Arc<BridgePool>,
        pipeline: Arc<dyn CommandSink>,
        safety: Arc<SafetyValidator>,
        audit: AuditLog,
        outbox: Arc<Outbox>,
        push: Arc<dyn PushClient>,
        metrics: Arc<dyn SystemMetricsSource>,
    ) -> Arc<Self> {
        let link = Arc::new(Self {
            rest: RestClient::new(config.base_url),
            agent_id: config.agent_id,
            credentials: RwLock::new(credentials),
            push_channel: config.push_channel,
            push_token: config.push_token,
            bridge,
            pipeline,
            safety,
            audit,
            outbox,
            push,
            metrics,
            account: RwLock::new(None),
            push_healthy: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            degraded_emitted: AtomicBool::new(false),
            disconnect: Notify::new(),
            shutting_down: AtomicBool::new(false),
        });

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        link.install_push_handlers(event_tx);

        tokio::spawn(run_heartbeat_loop(link.clone()));
        tokio::spawn(run_poll_fallback_loop(link.clone()));
        tokio::spawn(run_outbox_drain_loop(link.clone()));
        tokio::spawn(run_push_reconnect_loop(link.clone()));
        tokio::spawn(run_event_processing_loop(link.clone(), event_rx));

        link
    }

    /// Registers the `onMessage`/`onDisconnect` callbacks once, at
    /// construction: the reconnect loop re-`subscribe`s the same
    /// [`PushClient`] handle repeatedly, but the handlers only need wiring
    /// up the first time.
    fn install_push_handlers(self: &Arc<Self>, event_tx: mpsc::UnboundedSender<PushEvent>) {
        self.push.on_message(Box::new(move |event| {
            let _ = event_tx.send(event);
        }));

        let disconnected = self.clone();
        self.push.on_disconnect(Box::new(move || {
            disconnected.push_healthy.store(false, Ordering::Relaxed);
            disconnected.disconnect.notify_one();
        }));
    }

    pub fn rotate_credentials(&self, credentials: Arc<Credentials>) {
        *self.credentials.write() = credentials;
    }

    fn credentials(&self) -> Arc<Credentials> {
        self.credentials.read().clone()
    }

    pub fn is_push_healthy(&self) -> bool {
        self.push_healthy.load(Ordering::Relaxed)
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded_emitted.load(Ordering::Relaxed)
    }

    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
        self.push.close().await;
    }

    async fn refresh_account_snapshot(&self) -> Option<AccountSnapshot> {
        let reply = self
            .bridge
            .request(FrameKind::AccountInfo, serde_json::json!({}), ACCOUNT_QUERY_TIMEOUT)
            .await
            .ok()?;

        if !reply.ok {
            return None;
        }
        let data = reply.data?;
        let snapshot: AccountSnapshot = serde_json::from_value(data).ok()?;
        *self.account.write() = Some(snapshot.clone());
        Some(snapshot)
    }

    async fn run_heartbeat(&self) {
        let account = self.refresh_account_snapshot().await;
        let status = if self.push_healthy.load(Ordering::Relaxed) {
            "connected"
        } else if self.degraded_emitted.load(Ordering::Relaxed) {
            "degraded"
        } else {
            "polling"
        };

        let body = serde_json::json!({
            "status": status,
            "version": env!("CARGO_PKG_VERSION"),
            "platform": std::env::consts::OS,
            "accountSnapshot": account,
            "systemMetrics": self.metrics.snapshot(),
        });

        let creds = self.credentials();
        let result = timeout(
            CONTROL_PLANE_TIMEOUT,
            self.rest.heartbeat(&self.agent_id, &creds.api_key, creds.api_secret.as_bytes(), &body),
        )
        .await;

        match result {
            Ok(Ok(response)) => self.ingest_pending_commands(&response).await,
            Ok(Err(e)) => tracing::warn!(error = %e, "heartbeat request failed"),
            Err(_) => tracing::warn!("heartbeat request timed out"),
        }
    }

    async fn run_poll_fallback(&self) {
        if self.push_healthy.load(Ordering::Relaxed) {
            return;
        }
        let creds = self.credentials();
        match timeout(
            CONTROL_PLANE_TIMEOUT,
            self.rest.poll_pending(&self.agent_id, &creds.api_key, creds.api_secret.as_bytes()),
        )
        .await
        {
            Ok(Ok(response)) => self.ingest_pending_commands(&response).await,
            Ok(Err(e)) => tracing::warn!(error = %e, "pending-commands poll failed"),
            Err(_) => tracing::warn!("pending-commands poll timed out"),
        }
    }

    /// Parses `{"commands": [...]}` out of a heartbeat or poll reply and
    /// submits each one to the pipeline, which is itself responsible for
    /// dedup (§4.5 "deduplicated by command id against the pipeline's dedup
    /// window").
    async fn ingest_pending_commands(&self, response: &serde_json::Value) {
        let Some(commands) = response.get("commands").and_then(|c| c.as_array()) else {
            return;
        };
        for raw in commands {
            self.submit_raw_command(raw.clone()).await;
        }
    }

    async fn submit_raw_command(&self, raw: serde_json::Value) {
        let command: Command = match serde_json::from_value(raw) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "discarding malformed command from control plane");
                return;
            }
        };
        match self.pipeline.submit(command).await {
            Ok(_) | Err(agent_types::SubmitError::Duplicate) => {}
            Err(e) => tracing::warn!(error = %e, "control-plane command rejected at intake"),
        }
    }

    /// Forwards a `cancel` push event (§6 "Push channel") to the pipeline's
    /// `CommandSink::cancel`. The pipeline is the sole authority on whether
    /// a command is still in a cancellable state (§5 "Cancellation").
    async fn handle_cancel(&self, raw: serde_json::Value) {
        let Some(id) = raw
            .get("commandId")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<uuid::Uuid>().ok())
            .map(CommandId)
        else {
            tracing::warn!(payload = %raw, "cancel push event missing or malformed commandId");
            return;
        };
        if let Err(e) = self.pipeline.cancel(id).await {
            tracing::debug!(command_id = %id, error = %e, "cancel requested via push channel could not be applied");
        }
    }

    async fn handle_push_event(&self, event: PushEvent) {
        match event {
            PushEvent::Command(raw) => self.submit_raw_command(raw).await,
            PushEvent::Cancel(raw) => self.handle_cancel(raw).await,
            PushEvent::ResetSafety(raw) => self.handle_reset_safety(raw).await,
            PushEvent::ConfigUpdate(raw) => {
                tracing::info!(payload = %raw, "configUpdate received, ignoring: live reconfiguration is out of scope");
            }
        }
    }

    /// `resetSafety` bypasses the command pipeline entirely: it is a
    /// direct operation on the latch, gated on an elevated credential
    /// carried in the event, not a `Command` that needs queueing, dispatch,
    /// or an outcome report (§4.2 "Latch semantics").
    async fn handle_reset_safety(&self, raw: serde_json::Value) {
        let Some(presented) = raw.get("elevatedCredential").and_then(|v| v.as_str()) else {
            tracing::warn!("resetSafety push event missing elevatedCredential, ignoring");
            return;
        };
        let creds = self.credentials();
        let expected = &creds.api_secret;
        if !constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
            tracing::warn!("resetSafety push event presented an invalid elevated credential");
            let _ = self
                .audit
                .append(
                    "safety.reset.denied",
                    serde_json::json!({ "reason": "invalidElevatedCredential" }),
                    Severity::Security,
                )
                .await;
            return;
        }
        self.safety.reset();
        let _ = self
            .audit
            .append("safety.reset", serde_json::json!({ "source": "pushChannel" }), Severity::Security)
            .await;
    }

    async fn drain_outbox_once(&self) {
        let creds = self.credentials();
        for entry in self.outbox.pending().await {
            let body = serde_json::json!({
                "commandId": entry.command_id,
                "state": entry.kind,
                "result": entry.payload,
            });

            let patched = timeout(
                CONTROL_PLANE_TIMEOUT,
                self.rest.patch_command(&self.agent_id, &creds.api_key, creds.api_secret.as_bytes(), &body),
            )
            .await;

            let Ok(Ok(_)) = patched else {
                continue;
            };

            if is_fill_kind(entry.command_kind, &entry.kind) {
                let _ = timeout(
                    CONTROL_PLANE_TIMEOUT,
                    self.rest.post_trade(&self.agent_id, &creds.api_key, creds.api_secret.as_bytes(), &body),
                )
                .await;
            }

            if let Err(e) = self.outbox.acknowledge(entry.command_id).await {
                tracing::error!(error = %e, command_id = %entry.command_id, "failed to acknowledge drained outbox entry");
            }
        }
    }
}

fn is_fill_kind(kind: agent_types::CommandKind, outcome_kind: &str) -> bool {
    use agent_types::CommandKind::*;
    outcome_kind == "executed" && matches!(kind, OpenPosition | ClosePosition)
}

/// `elevatedCredential` is compared, not HMAC-verified: it is itself the
/// shared secret an operator tool presents, not a signature over a message.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.ct_eq(b).into()
}

impl AccountSource for ControlPlaneLink {
    fn latest(&self) -> Option<AccountSnapshot> {
        self.account.read().clone()
    }
}

async fn run_heartbeat_loop(link: Arc<ControlPlaneLink>) {
    loop {
        if link.shutting_down.load(Ordering::Relaxed) {
            return;
        }
        link.run_heartbeat().await;
        tokio::time::sleep(HEARTBEAT_INTERVAL).await;
    }
}

async fn run_poll_fallback_loop(link: Arc<ControlPlaneLink>) {
    loop {
        if link.shutting_down.load(Ordering::Relaxed) {
            return;
        }
        tokio::time::sleep(POLL_FALLBACK_INTERVAL).await;
        link.run_poll_fallback().await;
    }
}

async fn run_outbox_drain_loop(link: Arc<ControlPlaneLink>) {
    loop {
        if link.shutting_down.load(Ordering::Relaxed) {
            return;
        }
        link.drain_outbox_once().await;
        tokio::time::sleep(OUTBOX_DRAIN_INTERVAL).await;
    }
}

async fn run_event_processing_loop(
    link: Arc<ControlPlaneLink>,
    mut events: mpsc::UnboundedReceiver<PushEvent>,
) {
    while let Some(event) = events.recv().await {
        link.handle_push_event(event).await;
    }
}

/// Owns the subscribe/reconnect/backoff state machine (§4.5 "Reconnection").
/// Never exits: a permanently unreachable control plane degrades visibility,
/// it does not stop the agent.
async fn run_push_reconnect_loop(link: Arc<ControlPlaneLink>) {
    loop {
        if link.shutting_down.load(Ordering::Relaxed) {
            return;
        }

        match link.push.subscribe(&link.push_channel, &link.push_token).await {
            Ok(()) => {
                link.push_healthy.store(true, Ordering::Relaxed);
                link.consecutive_failures.store(0, Ordering::Relaxed);
                link.degraded_emitted.store(false, Ordering::Relaxed);
                link.disconnect.notified().await;
                continue;
            }
            Err(e) => {
                tracing::warn!(error = %e, "push subscribe failed");
            }
        }

        let attempt = link.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if attempt >= DEGRADE_THRESHOLD && !link.degraded_emitted.swap(true, Ordering::Relaxed) {
            let _ = link
                .audit
                .append(
                    "controlplane.degraded",
                    serde_json::json!({ "consecutiveFailures": attempt }),
                    Severity::Warn,
                )
                .await;
        }

        let backoff = RECONNECT_BASE.saturating_mul(1u32 << attempt.min(5)).min(RECONNECT_CAP);
        tokio::time::sleep(backoff).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::SystemMetrics;
    use crate::push::InMemoryPushClient;
    use agent_bridge::MockConnector;
    use agent_safety::SafetyValidator;
    use agent_types::{CancelError, CommandId, SubmitError};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Mutex as StdMutex;

    struct RecordingSink {
        submitted: Arc<StdMutex<Vec<Command>>>,
    }

    #[async_trait]
    impl CommandSink for RecordingSink {
        async fn submit(&self, command: Command) -> Result<CommandId, SubmitError> {
            let id = command.id;
            self.submitted.lock().unwrap().push(command);
            Ok(id)
        }

        async fn cancel(&self, _id: CommandId) -> Result<(), CancelError> {
            Err(CancelError::NotFound)
        }
    }

    struct FixedMetrics;
    impl SystemMetricsSource for FixedMetrics {
        fn snapshot(&self) -> SystemMetrics {
            SystemMetrics::zero()
        }
    }

    fn credentials() -> Arc<Credentials> {
        Arc::new(Credentials {
            api_key: "key".into(),
            api_secret: "sekret".into(),
            shared_secret: "sharedsekret".into(),
        })
    }

    async fn build_link(
        pipeline: Arc<dyn CommandSink>,
        push: Arc<InMemoryPushClient>,
    ) -> (Arc<ControlPlaneLink>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::open(dir.path().join("audit.log")).await.unwrap();
        let outbox = Arc::new(Outbox::load(dir.path().join("outbox.log")).await.unwrap());
        let safety = Arc::new(SafetyValidator::new(
            agent_types::SafetyLimits {
                max_daily_loss_pct: 100.0,
                max_drawdown_pct: 100.0,
                max_open_positions: 10,
                max_lot_size: dec!(10),
                max_risk_per_trade_pct: 100.0,
                allowed_symbols: vec![],
                forbidden_hours: vec![],
            },
            dec!(10000),
            Utc::now(),
        ));
        let bridge = BridgePool::spawn(Arc::new(MockConnector), b"shared".to_vec(), 1, 4);

        let link = ControlPlaneLink::spawn(
            ControlPlaneLinkConfig {
                base_url: url::Url::parse("http://127.0.0.1:1/").unwrap(),
                agent_id: "agent-1".into(),
                push_channel: "agent-1".into(),
                push_token: "token".into(),
            },
            credentials(),
            bridge,
            pipeline,
            safety,
            audit,
            outbox,
            push,
            Arc::new(FixedMetrics),
        );
        (link, dir)
    }

    #[tokio::test]
    async fn reset_safety_with_valid_credential_clears_the_latch() {
        let submitted = Arc::new(StdMutex::new(Vec::new()));
        let sink: Arc<dyn CommandSink> = Arc::new(RecordingSink { submitted });
        let push = Arc::new(InMemoryPushClient::new());
        let (link, _dir) = build_link(sink, push.clone()).await;

        link.safety.emergency_stop();
        assert!(link.safety.is_latched());

        link.handle_reset_safety(serde_json::json!({ "elevatedCredential": "sekret" })).await;
        assert!(!link.safety.is_latched());
    }

    #[tokio::test]
    async fn reset_safety_with_wrong_credential_is_ignored() {
        let submitted = Arc::new(StdMutex::new(Vec::new()));
        let sink: Arc<dyn CommandSink> = Arc::new(RecordingSink { submitted });
        let push = Arc::new(InMemoryPushClient::new());
        let (link, _dir) = build_link(sink, push.clone()).await;

        link.safety.emergency_stop();
        link.handle_reset_safety(serde_json::json!({ "elevatedCredential": "wrong" })).await;
        assert!(link.safety.is_latched());
    }

    #[tokio::test]
    async fn push_command_event_reaches_the_pipeline() {
        let submitted = Arc::new(StdMutex::new(Vec::new()));
        let sink: Arc<dyn CommandSink> = Arc::new(RecordingSink { submitted: submitted.clone() });
        let push = Arc::new(InMemoryPushClient::new());
        let (_link, _dir) = build_link(sink, push.clone()).await;

        // Give the reconnect loop a moment to subscribe and wire handlers.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let command = Command::new(
            agent_types::Priority::Normal,
            agent_types::CommandPayload::Ping,
            Utc::now(),
            None,
            None,
            agent_types::Source::Strategy,
        )
        .unwrap();
        push.emit(PushEvent::Command(serde_json::to_value(&command).unwrap()));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(submitted.lock().unwrap().len(), 1);
    }

    #[test]
    fn is_fill_kind_only_true_for_executed_open_or_close() {
        use agent_types::CommandKind::*;
        assert!(is_fill_kind(OpenPosition, "executed"));
        assert!(is_fill_kind(ClosePosition, "executed"));
        assert!(!is_fill_kind(OpenPosition, "failed"));
        assert!(!is_fill_kind(Ping, "executed"));
    }
}
