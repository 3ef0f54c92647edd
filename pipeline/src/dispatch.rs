//! Per-command dispatch algorithm (§4.1 "Dispatch", steps 1-6).
//!
//! [`dispatch_one`] is the core of the dispatcher loop: given a popped
//! [`Command`] and the handles it needs, it runs validation, talks to the
//! terminal bridge with the configured retry policy, and returns the
//! terminal [`Outcome`]. It never touches the queue or the dedup set —
//! those are the pipeline facade's job.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;

use agent_bridge::{BridgeError, BridgePool, FrameKind, FrameReply};
use agent_safety::{SafetyValidator, TradeRequest, Verdict};
use agent_types::{
    AccountSnapshot, Command, CommandKind, CommandPayload, Position, StrategyControl,
    StrategyOutcomeSink,
};

use crate::error::FailureKind;
use crate::outcome::Outcome;

const RETRY_BASE: Duration = Duration::from_millis(500);
const RETRY_CAP: Duration = Duration::from_secs(8);
const MAX_ATTEMPTS: u32 = 3;

/// What the dispatcher needs to run one command to a terminal state. Bundled
/// so `dispatch_one`'s signature stays readable as the pipeline grows.
pub struct DispatchContext<'a> {
    pub bridge: &'a Arc<BridgePool>,
    pub safety: &'a Arc<SafetyValidator>,
    pub strategy_control: &'a Arc<dyn StrategyControl>,
    pub strategy_outcomes: &'a Arc<dyn StrategyOutcomeSink>,
    pub account: Option<AccountSnapshot>,
    pub positions: Vec<Position>,
}

/// Runs §4.1 steps 1-6 against `command` and returns the resulting
/// [`Outcome`], along with any [`Position`] mutation the caller should
/// apply to its single-writer position cache.
pub async fn dispatch_one(ctx: &DispatchContext<'_>, command: &Command) -> (Outcome, PositionDelta) {
    let kind = command.kind();

    if kind.is_trading_action() {
        if let Verdict::Deny(reason) = validate_trade(ctx, command) {
            return (
                Outcome::failed(command.id, kind, FailureKind::Policy { reason }),
                PositionDelta::None,
            );
        }
    }

    match &command.payload {
        CommandPayload::StartStrategy { strategy_id } => {
            return control_outcome(command.id, kind, strategy_id, ctx.strategy_control.activate(strategy_id).await);
        }
        CommandPayload::StopStrategy { strategy_id } => {
            return control_outcome(command.id, kind, strategy_id, ctx.strategy_control.deactivate(strategy_id).await);
        }
        CommandPayload::EmergencyStop => {
            ctx.safety.emergency_stop();
            return (Outcome::executed(command.id, kind, serde_json::json!({})), PositionDelta::None);
        }
        _ => {}
    }

    let (frame_kind, payload) = to_frame(&command.payload);
    let deadline = kind.bridge_timeout(command.priority.is_critical());
    let retryable_kind = kind.is_retryable();

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match ctx.bridge.request(frame_kind, payload.clone(), deadline).await {
            Ok(reply) => return finish_on_reply(ctx, command, kind, reply),
            Err(err) => {
                let transient = matches!(
                    err,
                    BridgeError::Timeout | BridgeError::Unavailable | BridgeError::Busy
                );
                if transient && retryable_kind && attempt < MAX_ATTEMPTS {
                    tokio::time::sleep(backoff_for(attempt - 1)).await;
                    continue;
                }
                return finish_on_bridge_error(ctx, command, kind, err);
            }
        }
    }
}

fn backoff_for(attempt: u32) -> Duration {
    let scaled = RETRY_BASE.saturating_mul(1u32 << attempt.min(4));
    scaled.min(RETRY_CAP)
}

fn control_outcome(
    command_id: agent_types::CommandId,
    kind: CommandKind,
    strategy_id: &str,
    result: Result<(), agent_types::SubmitError>,
) -> (Outcome, PositionDelta) {
    match result {
        Ok(()) => (
            Outcome::executed(command_id, kind, serde_json::json!({ "strategyId": strategy_id })),
            PositionDelta::None,
        ),
        Err(e) => (
            Outcome::failed(command_id, kind, FailureKind::Validation { reason: e.to_string() }),
            PositionDelta::None,
        ),
    }
}

fn finish_on_reply(
    ctx: &DispatchContext<'_>,
    command: &Command,
    kind: CommandKind,
    reply: FrameReply,
) -> (Outcome, PositionDelta) {
    if reply.ok {
        let delta = position_delta_for(command, &reply);
        notify_strategy(ctx, command, &delta);
        (
            Outcome::executed(command.id, kind, reply.data.unwrap_or(serde_json::Value::Null)),
            delta,
        )
    } else {
        let reason = reply.error.unwrap_or_else(|| "terminal rejected request".into());
        if kind.is_trading_action() {
            ctx.safety.record_trade_failure(Utc::now());
        }
        (
            Outcome::failed(command.id, kind, FailureKind::Terminal { reason }),
            PositionDelta::None,
        )
    }
}

fn finish_on_bridge_error(
    ctx: &DispatchContext<'_>,
    command: &Command,
    kind: CommandKind,
    err: BridgeError,
) -> (Outcome, PositionDelta) {
    let failure = match err {
        BridgeError::Timeout => FailureKind::Transport { reason: "bridgeTimeout".into() },
        BridgeError::Unavailable => FailureKind::Transport { reason: "bridgeUnavailable".into() },
        BridgeError::Busy => FailureKind::Transport { reason: "bridgeBusy".into() },
        BridgeError::Protocol(reason) | BridgeError::Terminal(reason) => {
            FailureKind::Terminal { reason }
        }
    };
    if kind.is_trading_action() {
        ctx.safety.record_trade_failure(Utc::now());
    }
    (Outcome::failed(command.id, kind, failure), PositionDelta::None)
}

fn validate_trade(ctx: &DispatchContext<'_>, command: &Command) -> Verdict {
    let Some(account) = &ctx.account else {
        return Verdict::Deny(agent_safety::DenyReason::StaleAccount);
    };

    let trade = match &command.payload {
        CommandPayload::OpenPosition {
            symbol,
            volume,
            stop_loss,
            ..
        } => Some(TradeRequest {
            symbol,
            volume: *volume,
            entry_price: last_known_price(account, symbol),
            stop_loss: *stop_loss,
            symbol_risk_factor: Decimal::ONE,
        }),
        _ => None,
    };

    let hour = {
        use chrono::Timelike;
        Utc::now().hour() as u8
    };

    ctx.safety.validate(account, &ctx.positions, hour, Utc::now(), trade)
}

/// The account snapshot carries no quote feed of its own; an open position
/// on the same symbol is the closest proxy for "last known price" the
/// snapshot gives us. Falls back to zero (which the risk-per-trade check
/// then treats as "no stop distance known", the conservative direction)
/// when the symbol has no open position yet.
fn last_known_price(account: &AccountSnapshot, symbol: &str) -> Decimal {
    account
        .open_positions
        .iter()
        .find(|p| p.symbol == symbol)
        .map(|p| p.open_price)
        .unwrap_or(Decimal::ZERO)
}

fn to_frame(payload: &CommandPayload) -> (FrameKind, serde_json::Value) {
    let kind = match payload {
        CommandPayload::OpenPosition { .. } => FrameKind::OpenOrder,
        CommandPayload::ClosePosition { .. } => FrameKind::CloseOrder,
        CommandPayload::ModifyPosition { .. } => FrameKind::ModifyOrder,
        CommandPayload::CloseAll => FrameKind::CloseAll,
        CommandPayload::QueryAccount => FrameKind::AccountInfo,
        _ => FrameKind::Ping,
    };
    let value = serde_json::to_value(payload).unwrap_or(serde_json::Value::Null);
    (kind, value)
}

/// What, if anything, the pipeline facade should apply to its single-writer
/// position cache after this dispatch (§4.1 step 4, §3 "Position").
#[derive(Debug, Clone)]
pub enum PositionDelta {
    None,
    Opened(Position),
    Closed { ticket: i64 },
}

fn position_delta_for(command: &Command, reply: &FrameReply) -> PositionDelta {
    match &command.payload {
        CommandPayload::OpenPosition {
            symbol,
            side,
            volume,
            stop_loss,
            take_profit,
            strategy_id,
        } => {
            let ticket = reply
                .data
                .as_ref()
                .and_then(|d| d.get("ticket"))
                .and_then(|t| t.as_i64())
                .unwrap_or_default();
            let open_price = reply
                .data
                .as_ref()
                .and_then(|d| d.get("openPrice"))
                .cloned()
                .and_then(|v| serde_json::from_value::<Decimal>(v).ok())
                .unwrap_or_default();
            PositionDelta::Opened(Position {
                ticket,
                symbol: symbol.clone(),
                side: *side,
                volume: *volume,
                open_price,
                stop_loss: *stop_loss,
                take_profit: *take_profit,
                opened_at: Utc::now(),
                strategy_id: strategy_id.clone(),
            })
        }
        CommandPayload::ClosePosition { ticket } => PositionDelta::Closed { ticket: *ticket },
        _ => PositionDelta::None,
    }
}

fn notify_strategy(ctx: &DispatchContext<'_>, command: &Command, delta: &PositionDelta) {
    let strategy_id = match &command.payload {
        CommandPayload::OpenPosition { strategy_id: Some(id), .. } => Some(id.clone()),
        CommandPayload::ClosePosition { .. } => ctx
            .positions
            .iter()
            .find(|p| matches!(delta, PositionDelta::Closed { ticket } if *ticket == p.ticket))
            .and_then(|p| p.strategy_id.clone()),
        _ => None,
    };
    let Some(strategy_id) = strategy_id else { return };
    match delta {
        PositionDelta::Opened(position) => {
            ctx.strategy_outcomes.record_outcome(&strategy_id, Some(position.ticket));
        }
        PositionDelta::Closed { .. } => {
            ctx.strategy_outcomes.record_outcome(&strategy_id, None);
        }
        PositionDelta::None => {}
    }
}
