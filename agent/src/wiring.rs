//! Deferred capability handles (§5 "Shared resources").
//!
//! `CommandPipeline`, `ControlPlaneLink`, and `StrategyMonitor` each need a
//! trait object implemented by one of the other two: the pipeline needs an
//! `AccountSource` (the link) and a `StrategyControl`/`StrategyOutcomeSink`
//! (the monitor); the link and the monitor both need a `CommandSink` (the
//! pipeline); the monitor also needs the link's `AccountSource`. None of
//! the three can be constructed strictly before the others.
//!
//! The teacher's `core::system::builder::SystemBuilder` resolves its wiring
//! with generic type parameters threaded through a single-pass builder,
//! which works when the dependency graph is a DAG. This graph is not a DAG
//! — it is a genuine cycle — so instead each deferred handle is constructed
//! first as an empty cell, handed to every constructor that needs it, and
//! filled in with `.set()` once the real component exists. Every real
//! trait method call happens after wiring completes and before the agent
//! starts accepting commands, so the "not yet set" branch below is dead in
//! production; it only matters for the brief window during controller
//! startup.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::OnceCell as SyncOnceCell;
use tokio::sync::OnceCell as AsyncOnceCell;

use agent_types::{
    AccountSnapshot, AccountSource, CancelError, Command, CommandId, CommandSink, StrategyControl,
    StrategyOutcomeSink, SubmitError,
};

/// Forwards [`AccountSource::latest`] to whatever is `set` later. Backed by
/// a sync `OnceCell` since the trait method is sync.
#[derive(Default)]
pub struct DeferredAccountSource {
    inner: SyncOnceCell<Arc<dyn AccountSource>>,
}

impl std::fmt::Debug for DeferredAccountSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredAccountSource")
            .field("wired", &self.inner.get().is_some())
            .finish()
    }
}

impl DeferredAccountSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Called exactly once, after the real source (the control-plane link)
    /// is constructed. Panics on a second call: that would mean the
    /// controller's wiring ran twice, which is a startup bug worth failing
    /// loudly on rather than silently ignoring.
    pub fn set(&self, source: Arc<dyn AccountSource>) {
        if self.inner.set(source).is_err() {
            panic!("DeferredAccountSource wired twice");
        }
    }
}

impl AccountSource for DeferredAccountSource {
    fn latest(&self) -> Option<AccountSnapshot> {
        self.inner.get().and_then(|source| source.latest())
    }
}

/// Forwards [`CommandSink::submit`] to whatever is `set` later.
#[derive(Default)]
pub struct DeferredCommandSink {
    inner: AsyncOnceCell<Arc<dyn CommandSink>>,
}

impl std::fmt::Debug for DeferredCommandSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredCommandSink")
            .field("wired", &self.inner.initialized())
            .finish()
    }
}

impl DeferredCommandSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, sink: Arc<dyn CommandSink>) {
        if self.inner.set(sink).is_err() {
            panic!("DeferredCommandSink wired twice");
        }
    }
}

#[async_trait]
impl CommandSink for DeferredCommandSink {
    async fn submit(&self, command: Command) -> Result<CommandId, SubmitError> {
        match self.inner.get() {
            Some(sink) => sink.submit(command).await,
            // Only reachable if something submits before controller startup
            // finishes wiring; there is no dedicated "not ready yet"
            // variant, so this is reported the same way a shutting-down
            // pipeline would reject a late submission.
            None => Err(SubmitError::ShuttingDown),
        }
    }

    async fn cancel(&self, id: CommandId) -> Result<(), CancelError> {
        match self.inner.get() {
            Some(sink) => sink.cancel(id).await,
            None => Err(CancelError::NotFound),
        }
    }
}

/// Forwards [`StrategyControl::activate`]/`deactivate` to whatever is `set`
/// later.
#[derive(Default)]
pub struct DeferredStrategyControl {
    inner: AsyncOnceCell<Arc<dyn StrategyControl>>,
}

impl std::fmt::Debug for DeferredStrategyControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredStrategyControl")
            .field("wired", &self.inner.initialized())
            .finish()
    }
}

impl DeferredStrategyControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, control: Arc<dyn StrategyControl>) {
        if self.inner.set(control).is_err() {
            panic!("DeferredStrategyControl wired twice");
        }
    }
}

#[async_trait]
impl StrategyControl for DeferredStrategyControl {
    async fn activate(&self, strategy_id: &str) -> Result<(), SubmitError> {
        match self.inner.get() {
            Some(control) => control.activate(strategy_id).await,
            None => Err(SubmitError::ShuttingDown),
        }
    }

    async fn deactivate(&self, strategy_id: &str) -> Result<(), SubmitError> {
        match self.inner.get() {
            Some(control) => control.deactivate(strategy_id).await,
            None => Err(SubmitError::ShuttingDown),
        }
    }
}

/// Forwards [`StrategyOutcomeSink::record_outcome`] to whatever is `set`
/// later. Silently drops the report if called before wiring completes:
/// the trait has no error return, and a trade outcome reported a few
/// milliseconds before the monitor exists has nowhere else to go.
#[derive(Default)]
pub struct DeferredStrategyOutcomeSink {
    inner: SyncOnceCell<Arc<dyn StrategyOutcomeSink>>,
}

impl std::fmt::Debug for DeferredStrategyOutcomeSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredStrategyOutcomeSink")
            .field("wired", &self.inner.get().is_some())
            .finish()
    }
}

impl DeferredStrategyOutcomeSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, sink: Arc<dyn StrategyOutcomeSink>) {
        if self.inner.set(sink).is_err() {
            panic!("DeferredStrategyOutcomeSink wired twice");
        }
    }
}

impl StrategyOutcomeSink for DeferredStrategyOutcomeSink {
    fn record_outcome(&self, strategy_id: &str, opened_ticket: Option<i64>) {
        if let Some(sink) = self.inner.get() {
            sink.record_outcome(strategy_id, opened_ticket);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_source_forwards_once_set() {
        struct Fixed(AccountSnapshot);
        impl AccountSource for Fixed {
            fn latest(&self) -> Option<AccountSnapshot> {
                Some(self.0.clone())
            }
        }

        let deferred = DeferredAccountSource::new();
        assert!(deferred.latest().is_none());

        let snapshot = AccountSnapshot {
            balance: Default::default(),
            equity: Default::default(),
            margin: Default::default(),
            free_margin: Default::default(),
            open_positions: vec![],
            timestamp: chrono::Utc::now(),
        };
        deferred.set(Arc::new(Fixed(snapshot.clone())));
        assert_eq!(deferred.latest(), Some(snapshot));
    }

    #[tokio::test]
    async fn command_sink_rejects_before_wiring() {
        let deferred = DeferredCommandSink::new();
        let command = test_command();
        let err = deferred.submit(command).await.unwrap_err();
        assert!(matches!(err, SubmitError::ShuttingDown));
    }

    fn test_command() -> Command {
        use agent_types::{CommandPayload, Priority, Source};
        Command::new(
            Priority::Normal,
            CommandPayload::Ping,
            chrono::Utc::now(),
            None,
            None,
            Source::Strategy,
        )
        .expect("strategy-sourced ping needs no signature and has no expiry to validate")
    }
}
