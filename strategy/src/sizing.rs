//! Candidate order construction from a truthy entry signal (§4.4 step 5):
//! side, volume (from `RiskSpec`), stop-loss, and take-profit.
//!
//! Two details the spec leaves to the implementer are resolved here and
//! recorded in `DESIGN.md`: pip value is approximated at the standard
//! forex convention of $10/pip per 1.0 lot (majors, no JPY adjustment),
//! and side is inferred from the polarity of the entry rule's comparator
//! rather than a dedicated field, since the rule-tree wire format (§9) has
//! no explicit side slot.

use rust_decimal::Decimal;

use agent_types::{BoolOp, Comparator, RiskSpec, RuleNode, Side};

const PIP_SIZE: f64 = 0.0001;
const PIP_VALUE_PER_LOT: f64 = 10.0;

#[derive(Debug, Clone, PartialEq)]
pub struct CandidateOrder {
    pub symbol: String,
    pub side: Side,
    pub volume: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
}

/// Builds the candidate order for `symbol` at `entry_price`, given the
/// strategy's risk spec and current account equity.
pub fn build_candidate(
    symbol: &str,
    entry_rule: &RuleNode,
    entry_price: f64,
    equity: f64,
    risk: &RiskSpec,
) -> CandidateOrder {
    let side = infer_side(entry_rule);

    let risk_amount = equity * (risk.risk_per_trade_pct / 100.0);
    let volume = if risk.stop_loss_pips > 0.0 {
        risk_amount / (risk.stop_loss_pips * PIP_VALUE_PER_LOT)
    } else {
        0.0
    };
    let volume = Decimal::try_from(volume.max(0.0)).unwrap_or_default();

    let sl_distance = risk.stop_loss_pips * PIP_SIZE;
    let tp_distance = risk.take_profit_pips * PIP_SIZE;
    let (stop_loss, take_profit) = match side {
        Side::Buy => (entry_price - sl_distance, entry_price + tp_distance),
        Side::Sell => (entry_price + sl_distance, entry_price - tp_distance),
    };

    CandidateOrder {
        symbol: symbol.to_string(),
        side,
        volume,
        stop_loss: Decimal::try_from(stop_loss).unwrap_or_default(),
        take_profit: Decimal::try_from(take_profit).unwrap_or_default(),
    }
}

/// Walks the tree for the first `crossesAbove`/`crossesBelow` comparator
/// and infers a buy/sell bias from it; defaults to `Buy` for trees with
/// neither (e.g. pure threshold comparisons), matching how a naive
/// trend-following rule is usually phrased as "price crosses above X".
fn infer_side(node: &RuleNode) -> Side {
    match node {
        RuleNode::Comparison { op, .. } => match op {
            Comparator::CrossesAbove | Comparator::GreaterThan | Comparator::GreaterOrEqual => {
                Side::Buy
            }
            Comparator::CrossesBelow | Comparator::LessThan | Comparator::LessOrEqual => {
                Side::Sell
            }
            Comparator::Equal => Side::Buy,
        },
        RuleNode::Boolean { op: BoolOp::And, terms } | RuleNode::Boolean { op: BoolOp::Or, terms } => {
            terms.first().map(infer_side).unwrap_or(Side::Buy)
        }
        RuleNode::Not { term } => infer_side(term).opposite(),
        RuleNode::Constant { .. } | RuleNode::Indicator { .. } => Side::Buy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_types::RiskSpec;

    fn risk() -> RiskSpec {
        RiskSpec {
            risk_per_trade_pct: 1.0,
            stop_loss_pips: 20.0,
            take_profit_pips: 40.0,
        }
    }

    #[test]
    fn buy_signal_places_stop_below_entry() {
        let rule = RuleNode::Comparison {
            op: Comparator::CrossesAbove,
            left: Box::new(RuleNode::Constant { value: 1.0 }),
            right: Box::new(RuleNode::Constant { value: 0.0 }),
        };
        let order = build_candidate("EURUSD", &rule, 1.1000, 10_000.0, &risk());
        assert_eq!(order.side, Side::Buy);
        assert!(order.stop_loss < Decimal::try_from(1.1000).unwrap());
        assert!(order.take_profit > Decimal::try_from(1.1000).unwrap());
    }

    #[test]
    fn sell_signal_places_stop_above_entry() {
        let rule = RuleNode::Comparison {
            op: Comparator::CrossesBelow,
            left: Box::new(RuleNode::Constant { value: 0.0 }),
            right: Box::new(RuleNode::Constant { value: 1.0 }),
        };
        let order = build_candidate("EURUSD", &rule, 1.1000, 10_000.0, &risk());
        assert_eq!(order.side, Side::Sell);
        assert!(order.stop_loss > Decimal::try_from(1.1000).unwrap());
    }

    #[test]
    fn volume_scales_with_equity() {
        let order_small = build_candidate(
            "EURUSD",
            &RuleNode::Constant { value: 1.0 },
            1.1,
            1_000.0,
            &risk(),
        );
        let order_large = build_candidate(
            "EURUSD",
            &RuleNode::Constant { value: 1.0 },
            1.1,
            10_000.0,
            &risk(),
        );
        assert!(order_large.volume > order_small.volume);
    }
}
