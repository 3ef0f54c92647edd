use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reason codes for a safety denial (§4.2), in the order checks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(rename_all = "camelCase")]
pub enum DenyReason {
    #[error("emergency stop is latched")]
    EmergencyStopActive,
    #[error("symbol is not in the allowed list")]
    SymbolNotAllowed,
    #[error("current hour is within a forbidden trading window")]
    TimeForbidden,
    #[error("account snapshot is stale")]
    StaleAccount,
    #[error("opening this position would exceed the open-position limit")]
    PositionLimit,
    #[error("requested volume exceeds the maximum lot size")]
    LotTooLarge,
    #[error("risk per trade exceeds the configured maximum")]
    RiskTooHigh,
    #[error("daily loss limit exceeded")]
    DailyLossExceeded,
    #[error("drawdown limit exceeded")]
    DrawdownExceeded,
}
