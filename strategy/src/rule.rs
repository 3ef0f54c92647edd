//! Rule-tree interpreter (§9 "Dynamic rule trees").
//!
//! Strategy rules arrive as a tagged variant tree — constants, indicator
//! references, comparisons, boolean combinators — never as an embedded
//! script. This module is the whole interpreter: it walks the tree and
//! produces a `bool` (for a rule set) or an [`IndicatorValue`] (for the
//! atoms a comparison compares).

use agent_market::indicators::{self, IndicatorValue};
use agent_types::{BoolOp, Comparator, IndicatorRef, MacdComponent, RuleNode};
use agent_types::Candle;

/// Evaluates a rule tree's root against a closed candle series. `None`
/// means "not enough history yet" — callers treat that the same as a
/// failing filter (skip the tick).
pub fn evaluate(node: &RuleNode, candles: &[Candle]) -> Option<bool> {
    match node {
        RuleNode::Comparison { op, left, right } => {
            let l = eval_value(left, candles)?;
            let r = eval_value(right, candles)?;
            Some(apply_comparator(*op, &l, &r))
        }
        RuleNode::Boolean { op, terms } => {
            let mut results = terms.iter().map(|t| evaluate(t, candles));
            match op {
                BoolOp::And => {
                    let mut all = true;
                    for r in &mut results {
                        all &= r?;
                    }
                    Some(all)
                }
                BoolOp::Or => {
                    let mut any = false;
                    for r in &mut results {
                        any |= r?;
                    }
                    Some(any)
                }
            }
        }
        RuleNode::Not { term } => evaluate(term, candles).map(|b| !b),
        // A bare value node at the root is treated as truthy iff non-zero,
        // so a rule tree that degenerates to a single constant or
        // indicator reference still has well-defined semantics.
        RuleNode::Constant { .. } | RuleNode::Indicator { .. } => {
            eval_value(node, candles).map(|v| v.current != 0.0)
        }
    }
}

fn eval_value(node: &RuleNode, candles: &[Candle]) -> Option<IndicatorValue> {
    match node {
        RuleNode::Constant { value } => Some(IndicatorValue {
            current: *value,
            prior: Some(*value),
        }),
        RuleNode::Indicator { indicator } => eval_indicator(indicator, candles),
        RuleNode::Comparison { .. } | RuleNode::Boolean { .. } | RuleNode::Not { .. } => None,
    }
}

fn eval_indicator(indicator: &IndicatorRef, candles: &[Candle]) -> Option<IndicatorValue> {
    match indicator {
        IndicatorRef::Rsi { period } => indicators::rsi(candles, *period),
        IndicatorRef::Ema { period } => indicators::ema(candles, *period),
        IndicatorRef::Sma { period } => indicators::sma(candles, *period),
        IndicatorRef::Atr { period } => indicators::atr(candles, *period),
        IndicatorRef::Macd {
            fast,
            slow,
            signal,
            component,
        } => {
            let (macd_value, signal_value) = indicators::macd(candles, *fast, *slow, *signal)?;
            Some(match component {
                MacdComponent::Macd => macd_value,
                MacdComponent::Signal => signal_value,
            })
        }
        IndicatorRef::ClosePrice => {
            let current = candles.last()?.close;
            let prior = (candles.len() >= 2).then(|| candles[candles.len() - 2].close);
            Some(IndicatorValue { current, prior })
        }
    }
}

fn apply_comparator(op: Comparator, left: &IndicatorValue, right: &IndicatorValue) -> bool {
    match op {
        Comparator::GreaterThan => left.current > right.current,
        Comparator::GreaterOrEqual => left.current >= right.current,
        Comparator::LessThan => left.current < right.current,
        Comparator::LessOrEqual => left.current <= right.current,
        Comparator::Equal => (left.current - right.current).abs() < f64::EPSILON,
        Comparator::CrossesAbove => left.crosses_above(right),
        Comparator::CrossesBelow => left.crosses_below(right),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn candles(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle {
                open_time: Utc.timestamp_opt(1_700_000_000 + i as i64 * 60, 0).unwrap(),
                open: c,
                high: c,
                low: c,
                close: c,
                volume: 1.0,
            })
            .collect()
    }

    #[test]
    fn simple_comparison_evaluates() {
        let tree = RuleNode::Comparison {
            op: Comparator::GreaterThan,
            left: Box::new(RuleNode::Indicator {
                indicator: IndicatorRef::ClosePrice,
            }),
            right: Box::new(RuleNode::Constant { value: 5.0 }),
        };
        assert_eq!(evaluate(&tree, &candles(&[1.0, 2.0, 10.0])), Some(true));
        assert_eq!(evaluate(&tree, &candles(&[1.0, 2.0, 3.0])), Some(false));
    }

    #[test]
    fn boolean_and_short_circuits_on_missing_history() {
        let tree = RuleNode::Boolean {
            op: BoolOp::And,
            terms: vec![
                RuleNode::Comparison {
                    op: Comparator::GreaterThan,
                    left: Box::new(RuleNode::Indicator {
                        indicator: IndicatorRef::Rsi { period: 14 },
                    }),
                    right: Box::new(RuleNode::Constant { value: 50.0 }),
                },
                RuleNode::Constant { value: 1.0 },
            ],
        };
        assert_eq!(evaluate(&tree, &candles(&[1.0, 2.0])), None);
    }

    #[test]
    fn not_negates_inner_result() {
        let tree = RuleNode::Not {
            term: Box::new(RuleNode::Constant { value: 1.0 }),
        };
        assert_eq!(evaluate(&tree, &candles(&[1.0])), Some(false));
    }
}
