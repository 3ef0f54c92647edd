//! Local operator control surface (`SPEC_FULL.md` B.5 item 1): `reset-safety`
//! and `status` are short-lived CLI invocations that need to reach into an
//! already-running `agent run` process. This mirrors the control-plane
//! link's own poll/report pattern (`agent_controlplane::ControlPlaneLink`'s
//! poll-fallback loop and its `resetSafety` push handler) but polls a local
//! file instead of an HTTP endpoint, so a single-host operator tool doesn't
//! need a new IPC transport invented for it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use agent_audit::AuditLog;
use agent_bridge::BridgePool;
use agent_controlplane::ControlPlaneLink;
use agent_pipeline::CommandPipeline;
use agent_safety::SafetyValidator;
use agent_types::{Credentials, Severity};

const POLL_INTERVAL: Duration = Duration::from_secs(3);
const STATUS_INTERVAL: Duration = Duration::from_secs(5);

fn control_request_path(data_dir: &Path) -> PathBuf {
    data_dir.join("control.request.json")
}

fn status_path(data_dir: &Path) -> PathBuf {
    data_dir.join("status.json")
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
enum ControlRequest {
    ResetSafety { elevated_credential: String },
}

/// Writes a `resetSafety` request for the running agent to pick up on its
/// next poll. Used by the `reset-safety` CLI subcommand; this call itself
/// doesn't learn whether the credential was accepted, only that the request
/// was handed off (the running process's audit log is authoritative).
pub async fn request_reset_safety(data_dir: &Path, elevated_credential: String) -> std::io::Result<()> {
    let request = ControlRequest::ResetSafety { elevated_credential };
    let bytes = serde_json::to_vec_pretty(&request).expect("ControlRequest always serializes");
    tokio::fs::write(control_request_path(data_dir), bytes).await
}

/// Snapshot of a running agent's health, written by [`run_status_writer_loop`]
/// and read back by the `status` CLI subcommand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub emergency_stop_latched: bool,
    pub bridge_healthy: bool,
    pub push_healthy: bool,
    pub control_plane_degraded: bool,
    pub queue_depth: usize,
    pub dedup_set_size: usize,
}

pub async fn read_status(data_dir: &Path) -> Option<StatusSnapshot> {
    let bytes = tokio::fs::read(status_path(data_dir)).await.ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Polls for a pending `control.request.json` every [`POLL_INTERVAL`] and
/// actions it with the same constant-time elevated-credential check the
/// push-channel `resetSafety` handler applies. Never returns; the caller
/// wraps it in [`crate::supervisor::supervise`].
pub async fn run_local_control_loop(
    data_dir: PathBuf,
    credentials: Arc<Credentials>,
    safety: Arc<SafetyValidator>,
    audit: AuditLog,
) {
    let path = control_request_path(&data_dir);
    loop {
        tokio::time::sleep(POLL_INTERVAL).await;

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(_) => continue,
        };
        let _ = tokio::fs::remove_file(&path).await;

        let request: ControlRequest = match serde_json::from_slice(&bytes) {
            Ok(request) => request,
            Err(_) => {
                tracing::warn!("malformed local control request, discarding");
                continue;
            }
        };

        match request {
            ControlRequest::ResetSafety { elevated_credential } => {
                let accepted: bool = elevated_credential
                    .as_bytes()
                    .ct_eq(credentials.api_secret.as_bytes())
                    .into();
                if accepted {
                    safety.reset();
                    let _ = audit
                        .append(
                            "safety.reset",
                            serde_json::json!({ "source": "localControl" }),
                            Severity::Security,
                        )
                        .await;
                    tracing::info!("emergency-stop latch cleared via local control surface");
                } else {
                    tracing::warn!("reset-safety request presented an invalid elevated credential");
                    let _ = audit
                        .append(
                            "safety.reset.denied",
                            serde_json::json!({
                                "reason": "invalidElevatedCredential",
                                "source": "localControl"
                            }),
                            Severity::Security,
                        )
                        .await;
                }
            }
        }
    }
}

/// Writes a [`StatusSnapshot`] every [`STATUS_INTERVAL`] so a separate
/// `status` CLI invocation has something to read. Never returns; the caller
/// wraps it in [`crate::supervisor::supervise`].
pub async fn run_status_writer_loop(
    data_dir: PathBuf,
    pipeline: Arc<CommandPipeline>,
    safety: Arc<SafetyValidator>,
    bridge: Arc<BridgePool>,
    link: Arc<ControlPlaneLink>,
) {
    loop {
        let snapshot = StatusSnapshot {
            timestamp: chrono::Utc::now(),
            emergency_stop_latched: safety.is_latched(),
            bridge_healthy: bridge.healthy(),
            push_healthy: link.is_push_healthy(),
            control_plane_degraded: link.is_degraded(),
            queue_depth: pipeline.queue_depth().await,
            dedup_set_size: pipeline.dedup_set_size().await,
        };
        if let Ok(bytes) = serde_json::to_vec_pretty(&snapshot) {
            let _ = tokio::fs::write(status_path(&data_dir), bytes).await;
        }
        tokio::time::sleep(STATUS_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_audit::Outbox;
    use agent_types::{AccountSnapshot, AccountSource, SafetyLimits, StrategyControl, StrategyOutcomeSink, SubmitError};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    struct NullAccountSource;
    impl AccountSource for NullAccountSource {
        fn latest(&self) -> Option<AccountSnapshot> {
            None
        }
    }
    struct NullStrategyControl;
    #[async_trait]
    impl StrategyControl for NullStrategyControl {
        async fn activate(&self, _strategy_id: &str) -> Result<(), SubmitError> {
            Ok(())
        }
        async fn deactivate(&self, _strategy_id: &str) -> Result<(), SubmitError> {
            Ok(())
        }
    }
    struct NullOutcomeSink;
    impl StrategyOutcomeSink for NullOutcomeSink {
        fn record_outcome(&self, _strategy_id: &str, _opened_ticket: Option<i64>) {}
    }

    fn credentials() -> Arc<Credentials> {
        Arc::new(Credentials {
            api_key: "key".into(),
            api_secret: "correct-elevated-secret".into(),
            shared_secret: "shared".into(),
        })
    }

    #[tokio::test]
    async fn valid_credential_clears_the_latch() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::open(dir.path().join("audit.log")).await.unwrap();
        let safety = Arc::new(SafetyValidator::new(
            SafetyLimits {
                max_daily_loss_pct: 5.0,
                max_drawdown_pct: 10.0,
                max_open_positions: 5,
                max_lot_size: dec!(1),
                max_risk_per_trade_pct: 2.0,
                allowed_symbols: vec!["EURUSD".into()],
                forbidden_hours: vec![],
            },
            dec!(10000),
            chrono::Utc::now(),
        ));
        safety.emergency_stop();
        assert!(safety.is_latched());

        request_reset_safety(dir.path(), "correct-elevated-secret".into())
            .await
            .unwrap();

        let creds = credentials();
        let safety_clone = safety.clone();
        let audit_clone = audit.clone();
        let data_dir = dir.path().to_path_buf();
        tokio::spawn(run_local_control_loop(data_dir, creds, safety_clone, audit_clone));

        let mut attempts = 0;
        while safety.is_latched() && attempts < 50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            attempts += 1;
        }
        assert!(!safety.is_latched());
    }

    #[tokio::test]
    async fn status_writer_round_trips_through_the_snapshot_file() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::open(dir.path().join("audit.log")).await.unwrap();
        let outbox = Arc::new(Outbox::load(dir.path().join("outbox.log")).await.unwrap());
        let safety = Arc::new(SafetyValidator::new(
            SafetyLimits {
                max_daily_loss_pct: 5.0,
                max_drawdown_pct: 10.0,
                max_open_positions: 5,
                max_lot_size: dec!(1),
                max_risk_per_trade_pct: 2.0,
                allowed_symbols: vec!["EURUSD".into()],
                forbidden_hours: vec![],
            },
            dec!(10000),
            chrono::Utc::now(),
        ));
        let connector = Arc::new(agent_bridge::MockConnector);
        let bridge = BridgePool::with_default_capacity(connector, b"secret".to_vec());
        let pipeline = CommandPipeline::new(
            safety.clone(),
            bridge.clone(),
            audit.clone(),
            outbox.clone(),
            Arc::new(NullAccountSource),
            Arc::new(NullStrategyControl),
            Arc::new(NullOutcomeSink),
            b"intake-secret".to_vec(),
            vec![],
        );
        let push = Arc::new(agent_controlplane::InMemoryPushClient::new());
        let metrics = Arc::new(crate::metrics::ProcessMetricsSource::new(pipeline.clone()));
        let link = ControlPlaneLink::spawn(
            agent_controlplane::ControlPlaneLinkConfig {
                base_url: url::Url::parse("https://control.example.com").unwrap(),
                agent_id: "agent-1".into(),
                push_channel: "agent-1".into(),
                push_token: "token".into(),
            },
            credentials(),
            bridge.clone(),
            pipeline.clone(),
            safety.clone(),
            audit.clone(),
            outbox.clone(),
            push,
            metrics,
        );

        let data_dir = dir.path().to_path_buf();
        tokio::spawn(run_status_writer_loop(data_dir, pipeline, safety, bridge, link));

        let mut snapshot = None;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if let Some(s) = read_status(dir.path()).await {
                snapshot = Some(s);
                break;
            }
        }
        assert!(snapshot.is_some());
    }
}
