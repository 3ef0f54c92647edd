//! Trading execution agent entry point (C10 main controller, `SPEC_FULL.md`
//! B.5 item 1 "Operator CLI").
//!
//! `run` wires C1-C9 (safety validator, bridge pool, audit log, outbox,
//! command pipeline, strategy monitor, control-plane link) together through
//! the [`wiring`] module's deferred capability cells, since the dependency
//! graph between the pipeline, the link, and the monitor is a genuine
//! cycle. `reset-safety`, `export-audit`, and `status` are short-lived
//! commands that either reach into an already-running `run` process
//! through [`control`], or (export-audit) read the on-disk log directly.

mod audit_export;
mod candles;
mod config;
mod control;
mod error;
mod logging;
mod metrics;
mod preflight;
mod secrets;
mod supervisor;
mod wiring;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use agent_audit::{AuditLog, Outbox};
use agent_bridge::{BridgePool, MockConnector};
use agent_controlplane::{ControlPlaneLink, ControlPlaneLinkConfig, InMemoryPushClient};
use agent_market::MarketDataCache;
use agent_pipeline::CommandPipeline;
use agent_safety::SafetyValidator;
use agent_strategy::StrategyMonitor;
use agent_types::{AccountSource, CommandSink, Severity, StrategyControl, StrategyOutcomeSink};

use crate::candles::BridgeCandleFetcher;
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::metrics::ProcessMetricsSource;
use crate::wiring::{
    DeferredAccountSource, DeferredCommandSink, DeferredStrategyControl, DeferredStrategyOutcomeSink,
};

#[derive(Debug, Parser)]
#[command(name = "agent", about = "Trading execution agent")]
struct Cli {
    /// Path to `config.json`.
    #[arg(long, short = 'c', default_value = "config.json", global = true)]
    config: PathBuf,

    /// Emit structured (one JSON object per line) logs instead of
    /// human-readable ones.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Run the agent until interrupted (Ctrl-C / SIGTERM).
    Run,
    /// Clear the emergency-stop latch on an already-running agent.
    ResetSafety {
        /// The elevated credential guarding this operation (§4.2).
        #[arg(long)]
        elevated_credential: String,
    },
    /// Print the audit events with `seq` in `[from, to]` to stdout.
    ExportAudit {
        #[arg(long)]
        from: u64,
        #[arg(long)]
        to: u64,
    },
    /// Print the latch state, bridge health, and control-plane link state
    /// of an already-running agent.
    Status,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.log_json {
        logging::init_json_logging();
    } else {
        logging::init_logging();
    }

    let outcome = match &cli.command {
        CliCommand::Run => run(&cli.config).await,
        CliCommand::ResetSafety { elevated_credential } => {
            reset_safety(&cli.config, elevated_credential.clone()).await
        }
        CliCommand::ExportAudit { from, to } => export_audit(&cli.config, *from, *to).await,
        CliCommand::Status => status(&cli.config).await,
    };

    if let Err(err) = outcome {
        tracing::error!(error = %err, "agent exited with an error");
        std::process::exit(err.exit_code());
    }
}

/// Loads `config.json` and resolves the data directory — the two things
/// every subcommand needs before it can do anything else.
async fn load_config_and_data_dir(config_path: &std::path::Path) -> Result<(AgentConfig, PathBuf), AgentError> {
    let config = AgentConfig::load(config_path)?;
    let data_dir = config.resolve_data_dir()?;
    Ok((config, data_dir))
}

async fn reset_safety(config_path: &std::path::Path, elevated_credential: String) -> Result<(), AgentError> {
    let (_config, data_dir) = load_config_and_data_dir(config_path).await?;
    control::request_reset_safety(&data_dir, elevated_credential).await?;
    println!("reset-safety request submitted; check `agent status` or the audit log to confirm it was accepted");
    Ok(())
}

async fn export_audit(config_path: &std::path::Path, from: u64, to: u64) -> Result<(), AgentError> {
    let (_config, data_dir) = load_config_and_data_dir(config_path).await?;
    let events = audit_export::export_range(&data_dir, from, to).await?;
    for event in events {
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}

async fn status(config_path: &std::path::Path) -> Result<(), AgentError> {
    let (_config, data_dir) = load_config_and_data_dir(config_path).await?;
    match control::read_status(&data_dir).await {
        Some(snapshot) => {
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        None => {
            println!("no status snapshot found; is `agent run` currently running against this data directory?");
        }
    }
    Ok(())
}

/// Full component wiring and main loop (`SPEC_FULL.md` §4, §5, §9).
async fn run(config_path: &std::path::Path) -> Result<(), AgentError> {
    let (config, data_dir) = load_config_and_data_dir(config_path).await?;

    let search_dirs = preflight::default_search_dirs(&data_dir);
    preflight::check_terminal_library(&search_dirs)?;

    let credentials = secrets::load_or_bootstrap(&data_dir, &config.secret_source, &config.agent_id).await?;

    let audit = AuditLog::open(data_dir.join("audit.log")).await?;
    let outbox = Arc::new(Outbox::load(data_dir.join("outbox.log")).await?);

    audit
        .append(
            "agent.starting",
            serde_json::json!({ "agentId": config.agent_id }),
            Severity::Info,
        )
        .await?;

    // A real deployment supplies a `TerminalConnector` backed by the native
    // bridge artifact `preflight::check_terminal_library` just confirmed is
    // present; this workspace doesn't link that FFI directly (§9 "the core
    // contains no vendor specifics" applies equally to the terminal
    // transport as to the push channel), so `MockConnector` stands in here.
    let connector = Arc::new(MockConnector);
    let bridge = BridgePool::spawn(
        connector,
        credentials.shared_secret.as_bytes().to_vec(),
        config.bridge.0.pool_size,
        config.bridge.0.in_flight_cap,
    );

    // Seeded at zero: no `AccountSource` exists yet to query a real opening
    // balance from (the control-plane link, which is the account source,
    // itself needs the pipeline constructed first — see `wiring`). The
    // daily-loss/drawdown baseline corrects itself at the next calendar-day
    // rollover; until then this only affects how much loss looks like it
    // happened "today" relative to a balance of zero, which is
    // conservative rather than permissive.
    let safety = Arc::new(SafetyValidator::new(
        config.safety.clone(),
        rust_decimal::Decimal::ZERO,
        chrono::Utc::now(),
    ));

    let deferred_account_source = DeferredAccountSource::new();
    let deferred_command_sink = DeferredCommandSink::new();
    let deferred_strategy_control = DeferredStrategyControl::new();
    let deferred_strategy_outcomes = DeferredStrategyOutcomeSink::new();

    let pipeline = CommandPipeline::new(
        safety.clone(),
        bridge.clone(),
        audit.clone(),
        outbox.clone(),
        deferred_account_source.clone() as Arc<dyn AccountSource>,
        deferred_strategy_control.clone() as Arc<dyn StrategyControl>,
        deferred_strategy_outcomes.clone() as Arc<dyn StrategyOutcomeSink>,
        credentials.api_secret.as_bytes().to_vec(),
        vec![],
    );
    deferred_command_sink.set(pipeline.clone());

    let market_cache = Arc::new(MarketDataCache::new());
    let candle_fetcher = BridgeCandleFetcher::new(bridge.clone(), market_cache.clone());
    let monitor = StrategyMonitor::new(
        market_cache,
        audit.clone(),
        deferred_command_sink.clone() as Arc<dyn CommandSink>,
        candle_fetcher,
        deferred_account_source.clone() as Arc<dyn AccountSource>,
    );
    deferred_strategy_control.set(Arc::new(monitor.clone()) as Arc<dyn StrategyControl>);
    deferred_strategy_outcomes.set(Arc::new(monitor.clone()) as Arc<dyn StrategyOutcomeSink>);

    let push: Arc<dyn agent_controlplane::PushClient> = Arc::new(InMemoryPushClient::new());
    let metrics_source = Arc::new(ProcessMetricsSource::new(pipeline.clone()));
    let base_url = url::Url::parse(&config.control_plane.base_url)
        .map_err(|e| AgentError::Config(format!("controlPlane.baseUrl: {e}")))?;

    let link = ControlPlaneLink::spawn(
        ControlPlaneLinkConfig {
            base_url,
            agent_id: config.agent_id.clone(),
            push_channel: config.control_plane.push_channel.clone(),
            push_token: config.control_plane.push_token.clone(),
        },
        credentials.clone(),
        bridge.clone(),
        deferred_command_sink.clone() as Arc<dyn CommandSink>,
        safety.clone(),
        audit.clone(),
        outbox.clone(),
        push,
        metrics_source,
    );
    deferred_account_source.set(link.clone() as Arc<dyn AccountSource>);

    let mut started_strategy_ids = Vec::new();
    for strategy_ref in &config.strategies {
        let strategy = strategy_ref.resolve(&data_dir)?;
        let id = strategy.id.clone();
        let should_start = strategy.active;
        monitor.register(strategy.clone());
        if should_start {
            monitor.start(strategy).await;
            started_strategy_ids.push(id);
        }
    }

    supervisor::supervise("local-control", audit.clone(), {
        let data_dir = data_dir.clone();
        let credentials = credentials.clone();
        let safety = safety.clone();
        let audit = audit.clone();
        move || {
            control::run_local_control_loop(data_dir.clone(), credentials.clone(), safety.clone(), audit.clone())
        }
    });

    supervisor::supervise("status-writer", audit.clone(), {
        let data_dir = data_dir.clone();
        let pipeline = pipeline.clone();
        let safety = safety.clone();
        let bridge = bridge.clone();
        let link = link.clone();
        move || {
            control::run_status_writer_loop(
                data_dir.clone(),
                pipeline.clone(),
                safety.clone(),
                bridge.clone(),
                link.clone(),
            )
        }
    });

    audit
        .append("agent.started", serde_json::json!({}), Severity::Info)
        .await?;
    tracing::info!(agent_id = %config.agent_id, "agent started");

    tokio::signal::ctrl_c().await.ok();
    tracing::info!("shutdown signal received, shutting down");

    pipeline.shutdown().await;
    link.shutdown().await;
    for strategy_id in &started_strategy_ids {
        monitor.stop(strategy_id).await;
    }

    // Drop this process's references to every component holding its own
    // `audit` clone, per `AuditLog::shutdown`'s own doc comment. The
    // supervised `local-control`/`status-writer` loops still hold their
    // clones (`supervise` has no cancellation handle), so the writer task
    // realistically won't observe every sender drop before the grace
    // window below elapses; the timeout, not a clean join, is what bounds
    // shutdown in that case, and the process exit that follows reclaims
    // everything regardless.
    drop(link);
    drop(monitor);
    drop(pipeline);
    drop(deferred_account_source);
    drop(deferred_command_sink);
    drop(deferred_strategy_control);
    drop(deferred_strategy_outcomes);

    let mut audit = audit;
    use agent_types::AsyncShutdown;
    if tokio::time::timeout(std::time::Duration::from_secs(10), audit.shutdown())
        .await
        .is_err()
    {
        tracing::warn!("audit log shutdown did not complete within the grace window");
    }

    Ok(())
}
