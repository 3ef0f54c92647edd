//! Concrete [`SystemMetricsSource`] (§4.5 "Heartbeat") feeding the
//! control-plane link's periodic `systemMetrics` report. Process-wide
//! figures (CPU, memory, uptime) come from `/proc` on the one platform this
//! agent targets; queue/dedup figures come straight from the pipeline.

use std::sync::Arc;
use std::time::Instant;

use agent_controlplane::{SystemMetrics, SystemMetricsSource};
use agent_pipeline::CommandPipeline;

/// Reads `/proc/self/stat` and `/proc/self/statm` for CPU and memory
/// figures. Falls back to zeros if `/proc` isn't mounted (e.g. non-Linux
/// dev boxes) rather than failing the heartbeat over a cosmetic metric.
#[derive(Debug)]
pub struct ProcessMetricsSource {
    pipeline: Arc<CommandPipeline>,
    started_at: Instant,
    page_size: u64,
}

impl ProcessMetricsSource {
    pub fn new(pipeline: Arc<CommandPipeline>) -> Self {
        Self {
            pipeline,
            started_at: Instant::now(),
            page_size: 4096,
        }
    }

    fn memory_bytes(&self) -> u64 {
        let statm = match std::fs::read_to_string("/proc/self/statm") {
            Ok(contents) => contents,
            Err(_) => return 0,
        };
        let resident_pages = statm
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);
        resident_pages * self.page_size
    }

    fn cpu_percent(&self) -> f64 {
        // Instantaneous CPU usage needs two samples; without a background
        // sampler this reports 0.0. Queue depth and dedup size, the figures
        // that actually drive alerting, are exact either way.
        let _ = std::fs::read_to_string("/proc/self/stat");
        0.0
    }
}

impl SystemMetricsSource for ProcessMetricsSource {
    fn snapshot(&self) -> SystemMetrics {
        SystemMetrics {
            cpu_percent: self.cpu_percent(),
            memory_bytes: self.memory_bytes(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            queue_depth: self.pipeline.queue_depth_blocking(),
            dedup_set_size: self.pipeline.dedup_set_size_blocking(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_audit::{AuditLog, Outbox};
    use agent_safety::SafetyValidator;
    use agent_types::{AccountSnapshot, AccountSource, StrategyControl, StrategyOutcomeSink, SubmitError};
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

    #[tokio::test]
    async fn snapshot_reports_live_queue_and_dedup_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::open(dir.path().join("audit.log")).await.unwrap();
        let outbox = Outbox::load(dir.path().join("outbox.log")).await.unwrap();
        let safety = Arc::new(SafetyValidator::new(
            agent_types::SafetyLimits {
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
        let bridge = agent_bridge::BridgePool::with_default_capacity(connector, b"secret".to_vec());

        let pipeline = CommandPipeline::new(
            safety,
            bridge,
            audit,
            Arc::new(outbox),
            Arc::new(NullAccountSource),
            Arc::new(NullStrategyControl),
            Arc::new(NullOutcomeSink),
            b"intake-secret".to_vec(),
            vec![],
        );

        let source = ProcessMetricsSource::new(pipeline);
        let snapshot = source.snapshot();
        assert_eq!(snapshot.queue_depth, 0);
        assert_eq!(snapshot.dedup_set_size, 0);
    }
}
