//! The strategy monitor itself (C7, §4.4): one cooperative tick loop per
//! active strategy. A slow evaluation on one strategy never starves
//! another because each loop is an independent tokio task; the per-tick
//! budget (default 2 s) is enforced with a timeout around the whole
//! algorithm, not just the bridge call.
//!
//! `MonitorState` is specified per-strategy (§3), so a strategy configured
//! with more than one symbol trades only its first `symbols`/`timeframes`
//! entry — the single-instrument-per-strategy reading recorded in
//! `DESIGN.md`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex as SyncMutex;
use rust_decimal::prelude::ToPrimitive;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use agent_audit::AuditLog;
use agent_market::cache::SeriesKey;
use agent_market::MarketDataCache;
use agent_types::{
    AccountSource, CandleFetcher, Command, CommandPayload, CommandSink, MonitorState, Priority,
    Source, Strategy, StrategyControl, StrategyOutcomeSink, SubmitError,
};

use crate::filters::{self, SkipReason, TickContext};
use crate::rule;
use crate::sizing;

const TICK_BUDGET: Duration = Duration::from_secs(2);

pub struct StrategyMonitor {
    cache: Arc<MarketDataCache>,
    audit: AuditLog,
    sink: Arc<dyn CommandSink>,
    fetcher: Arc<dyn CandleFetcher>,
    account: Arc<dyn AccountSource>,
    states: Arc<SyncMutex<HashMap<String, MonitorState>>>,
    handles: Mutex<HashMap<String, JoinHandle<()>>>,
    definitions: SyncMutex<HashMap<String, Strategy>>,
}

impl std::fmt::Debug for StrategyMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyMonitor")
            .field("active", &self.states.lock().len())
            .finish_non_exhaustive()
    }
}

impl StrategyMonitor {
    pub fn new(
        cache: Arc<MarketDataCache>,
        audit: AuditLog,
        sink: Arc<dyn CommandSink>,
        fetcher: Arc<dyn CandleFetcher>,
        account: Arc<dyn AccountSource>,
    ) -> Arc<Self> {
        Arc::new(Self {
            cache,
            audit,
            sink,
            fetcher,
            account,
            states: Arc::new(SyncMutex::new(HashMap::new())),
            handles: Mutex::new(HashMap::new()),
            definitions: SyncMutex::new(HashMap::new()),
        })
    }

    /// Registers `strategy`'s configuration without activating it. Called by
    /// the main controller at startup for every configured strategy, so a
    /// later `START_STRATEGY` command (which carries only a strategy id) has
    /// something to look up.
    pub fn register(&self, strategy: Strategy) {
        self.definitions.lock().insert(strategy.id.clone(), strategy);
    }

    /// Activates `strategy`: spawns its tick loop and resets its
    /// `MonitorState`. Re-activating an already-active strategy restarts
    /// the loop from a fresh state.
    pub async fn start(self: &Arc<Self>, strategy: Strategy) {
        let id = strategy.id.clone();
        self.stop(&id).await;

        self.states
            .lock()
            .insert(id.clone(), MonitorState::new(id.clone()));

        let monitor = self.clone();
        let interval = Duration::from_millis(strategy.effective_tick_interval_ms());
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if timeout(TICK_BUDGET, monitor.tick(&strategy)).await.is_err() {
                    tracing::warn!(strategy_id = %strategy.id, "strategy tick exceeded budget");
                }
            }
        });

        self.handles.lock().await.insert(id, handle);
    }

    pub async fn stop(&self, strategy_id: &str) {
        if let Some(handle) = self.handles.lock().await.remove(strategy_id) {
            handle.abort();
        }
    }

    pub fn monitor_state(&self, strategy_id: &str) -> Option<MonitorState> {
        self.states.lock().get(strategy_id).cloned()
    }

    /// Updates `MonitorState.hasOpenPosition`/`openTicket` from an outcome
    /// report tagged with `strategy_id` (§4.4 "Open-position tracking").
    pub fn record_outcome(&self, strategy_id: &str, opened_ticket: Option<i64>) {
        let mut states = self.states.lock();
        if let Some(state) = states.get_mut(strategy_id) {
            match opened_ticket {
                Some(ticket) => state.record_open(ticket),
                None => state.record_close(),
            }
        }
    }

    async fn tick(&self, strategy: &Strategy) {
        let now = Utc::now();
        {
            let mut states = self.states.lock();
            if let Some(state) = states.get_mut(&strategy.id) {
                state.record_check(now);
            }
        }

        let (Some(symbol), Some(timeframe)) =
            (strategy.symbols.first(), strategy.timeframes.first())
        else {
            self.skip(strategy, SkipReason::NoCandles.as_str()).await;
            return;
        };

        let key = SeriesKey::new(symbol.clone(), timeframe.clone());
        let Some(candles) = self.cache.snapshot(&key) else {
            self.fetcher.request_fetch(symbol, timeframe);
            self.skip(strategy, SkipReason::NoCandles.as_str()).await;
            return;
        };

        let ctx = TickContext {
            hour: now_hour(now),
            spread_pips: None,
        };
        if let Some(reason) = filters::evaluate_filters(&strategy.filters, ctx, &candles) {
            self.skip(strategy, reason.as_str()).await;
            return;
        }

        let has_open_position = self
            .states
            .lock()
            .get(&strategy.id)
            .map(|s| s.has_open_position)
            .unwrap_or(false);

        if has_open_position {
            self.evaluate_exit(strategy, &candles).await;
            return;
        }

        let in_cooldown = self
            .states
            .lock()
            .get(&strategy.id)
            .map(|s| s.in_cooldown(now, strategy.cooldown_ms))
            .unwrap_or(false);
        if in_cooldown {
            self.skip(strategy, SkipReason::Cooldown.as_str()).await;
            return;
        }

        self.evaluate_entry(strategy, symbol, &candles).await;
    }

    async fn evaluate_exit(&self, strategy: &Strategy, candles: &[agent_types::Candle]) {
        match rule::evaluate(&strategy.exit_rules, candles) {
            Some(true) => {
                let ticket = self
                    .states
                    .lock()
                    .get(&strategy.id)
                    .and_then(|s| s.open_ticket);
                if let Some(ticket) = ticket {
                    self.submit(strategy, CommandPayload::ClosePosition { ticket }).await;
                    self.record_signal(strategy);
                }
            }
            Some(false) => self.skip(strategy, "exit_conditions_not_met").await,
            None => self.skip(strategy, "insufficient_history").await,
        }
    }

    async fn evaluate_entry(&self, strategy: &Strategy, symbol: &str, candles: &[agent_types::Candle]) {
        match rule::evaluate(&strategy.entry_rules, candles) {
            Some(true) => {
                let Some(account) = self.account.latest() else {
                    self.skip(strategy, "no_account_snapshot").await;
                    return;
                };
                let entry_price = candles.last().map(|c| c.close).unwrap_or(0.0);
                let equity = account.equity.to_f64().unwrap_or(0.0);
                let candidate = sizing::build_candidate(
                    symbol,
                    &strategy.entry_rules,
                    entry_price,
                    equity,
                    &strategy.risk_spec,
                );
                self.submit(
                    strategy,
                    CommandPayload::OpenPosition {
                        symbol: candidate.symbol,
                        side: candidate.side,
                        volume: candidate.volume,
                        stop_loss: Some(candidate.stop_loss),
                        take_profit: Some(candidate.take_profit),
                        strategy_id: Some(strategy.id.clone()),
                    },
                )
                .await;
                self.record_signal(strategy);
            }
            Some(false) => self.skip(strategy, "entry_conditions_not_met").await,
            None => self.skip(strategy, "insufficient_history").await,
        }
    }

    fn record_signal(&self, strategy: &Strategy) {
        let mut states = self.states.lock();
        if let Some(state) = states.get_mut(&strategy.id) {
            state.record_signal(Utc::now());
        }
    }

    async fn submit(&self, strategy: &Strategy, payload: CommandPayload) {
        let command = Command::new(
            Priority::Normal,
            payload,
            Utc::now(),
            None,
            None,
            Source::Strategy,
        );
        match command {
            Ok(command) => {
                if let Err(e) = self.sink.submit(command).await {
                    tracing::warn!(strategy_id = %strategy.id, error = %e, "strategy order submission failed");
                }
            }
            Err(e) => tracing::error!(strategy_id = %strategy.id, error = %e, "failed to build strategy command"),
        }
    }

    async fn skip(&self, strategy: &Strategy, reason: &str) {
        if let Err(e) = self.audit.record_skip(&strategy.id, reason).await {
            tracing::warn!(error = %e, "failed to audit strategy skip");
        }
    }
}

/// Lets the command pipeline drive `START_STRATEGY`/`STOP_STRATEGY` through
/// the same trait-object boundary it uses for every other capability
/// (§2 "Control flow": manual and autonomous orders share one path).
#[async_trait::async_trait]
impl StrategyControl for Arc<StrategyMonitor> {
    async fn activate(&self, strategy_id: &str) -> Result<(), SubmitError> {
        let definition = self.definitions.lock().get(strategy_id).cloned();
        match definition {
            Some(strategy) => {
                self.start(strategy).await;
                Ok(())
            }
            None => Err(SubmitError::UnknownStrategy),
        }
    }

    async fn deactivate(&self, strategy_id: &str) -> Result<(), SubmitError> {
        self.stop(strategy_id).await;
        Ok(())
    }
}

impl StrategyOutcomeSink for Arc<StrategyMonitor> {
    fn record_outcome(&self, strategy_id: &str, opened_ticket: Option<i64>) {
        StrategyMonitor::record_outcome(self, strategy_id, opened_ticket);
    }
}

fn now_hour(now: chrono::DateTime<Utc>) -> u8 {
    use chrono::Timelike;
    now.hour() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_types::{CancelError, CommandId, RiskSpec, RuleNode, SubmitError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullFetcher;
    impl CandleFetcher for NullFetcher {
        fn request_fetch(&self, _symbol: &str, _timeframe: &str) {}
    }

    struct NoAccount;
    impl AccountSource for NoAccount {
        fn latest(&self) -> Option<agent_types::AccountSnapshot> {
            None
        }
    }

    struct CountingSink {
        submitted: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl CommandSink for CountingSink {
        async fn submit(&self, _command: Command) -> Result<CommandId, SubmitError> {
            self.submitted.fetch_add(1, Ordering::Relaxed);
            Ok(CommandId::new())
        }

        async fn cancel(&self, _id: CommandId) -> Result<(), CancelError> {
            Err(CancelError::NotFound)
        }
    }

    fn strategy() -> Strategy {
        Strategy {
            id: "s1".into(),
            name: "test".into(),
            active: true,
            symbols: vec!["EURUSD".into()],
            timeframes: vec!["M5".into()],
            entry_rules: RuleNode::Constant { value: 1.0 },
            exit_rules: RuleNode::Constant { value: 0.0 },
            filters: vec![],
            cooldown_ms: 60_000,
            tick_interval_ms: 5_000,
            risk_spec: RiskSpec {
                risk_per_trade_pct: 1.0,
                stop_loss_pips: 20.0,
                take_profit_pips: 40.0,
            },
        }
    }

    #[tokio::test]
    async fn skip_without_candles_does_not_submit() {
        let cache = Arc::new(MarketDataCache::new());
        let (audit_dir, audit) = test_audit().await;
        let sink = Arc::new(CountingSink {
            submitted: AtomicUsize::new(0),
        });
        let monitor = StrategyMonitor::new(cache, audit, sink.clone(), Arc::new(NullFetcher), Arc::new(NoAccount));
        monitor.tick(&strategy()).await;
        assert_eq!(sink.submitted.load(Ordering::Relaxed), 0);
        drop(audit_dir);
    }

    async fn test_audit() -> (tempfile::TempDir, AuditLog) {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(dir.path().join("audit.log")).await.unwrap();
        (dir, log)
    }
}
