//! [`Strategy`] configuration and its rule-tree representation (§3, §9
//! "Dynamic rule trees").
//!
//! Rules arrive as a tagged variant tree, not a script: constants, indicator
//! references, comparisons, and boolean combinators. The interpreter that
//! walks this tree lives in `agent-strategy`; this crate only defines the
//! shape so it can be deserialized off the wire (control-plane `command`
//! payload, `configUpdate` push event) without pulling in evaluation logic.

use serde::{Deserialize, Serialize};

/// A single named indicator series, parameterised the way `agent-market`'s
/// indicator functions are (`rsi(14)`, `ema(50)`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "indicator", rename_all = "snake_case")]
pub enum IndicatorRef {
    Rsi { period: usize },
    Ema { period: usize },
    Sma { period: usize },
    Atr { period: usize },
    /// MACD exposes either the macd line or the signal line; `component`
    /// selects which.
    Macd {
        fast: usize,
        slow: usize,
        signal: usize,
        component: MacdComponent,
    },
    /// The close price of the last closed candle — not an indicator, but
    /// lets comparisons reference raw price without a special-cased node.
    ClosePrice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacdComponent {
    Macd,
    Signal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    Equal,
    /// `current` and `prior` straddle the right-hand operand with opposite
    /// signs — the crossover semantics of §4.6.
    CrossesAbove,
    CrossesBelow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoolOp {
    And,
    Or,
}

/// A node in a strategy's entry/exit rule tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum RuleNode {
    Constant { value: f64 },
    Indicator { indicator: IndicatorRef },
    Comparison {
        op: Comparator,
        left: Box<RuleNode>,
        right: Box<RuleNode>,
    },
    Boolean {
        op: BoolOp,
        terms: Vec<RuleNode>,
    },
    Not { term: Box<RuleNode> },
}

/// Position sizing and protective-order parameters derived from account risk
/// (§4.4 item 5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSpec {
    pub risk_per_trade_pct: f64,
    pub stop_loss_pips: f64,
    pub take_profit_pips: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: String,
    pub name: String,
    pub active: bool,
    pub symbols: Vec<String>,
    pub timeframes: Vec<String>,
    pub entry_rules: RuleNode,
    pub exit_rules: RuleNode,
    pub filters: Vec<StrategyFilter>,
    pub cooldown_ms: u64,
    /// The strategy's configured tick period; the monitor actually ticks at
    /// `max(tick_interval_ms, 5_000)` (§4.4 "Scheduling": a 5 s floor).
    pub tick_interval_ms: u64,
    pub risk_spec: RiskSpec,
}

impl Strategy {
    /// The monitor's effective tick period for this strategy (§4.4
    /// "Scheduling").
    pub fn effective_tick_interval_ms(&self) -> u64 {
        self.tick_interval_ms.max(5_000)
    }
}

/// Per-tick gating filters (§4.4 step 2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "filter", rename_all = "snake_case")]
pub enum StrategyFilter {
    Session { start_hour: u8, end_hour: u8 },
    TimeOfDay { allowed_hours: Vec<u8> },
    MaxSpreadPips { max_spread: f64 },
    MinVolatilityAtr { min_atr: f64, period: usize },
}
