//! Per-tick gating filters (§4.4 step 2): session, time-of-day, spread,
//! volatility floor. The first filter that fails is the reported skip
//! reason (§4.4 step 6: "every skip must be observable").

use agent_market::indicators;
use agent_types::{Candle, StrategyFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Session,
    TimeOfDay,
    Spread,
    Volatility,
    Cooldown,
    NoCandles,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::Session => "session",
            SkipReason::TimeOfDay => "time_of_day",
            SkipReason::Spread => "spread",
            SkipReason::Volatility => "volatility",
            SkipReason::Cooldown => "cooldown",
            SkipReason::NoCandles => "no_candles",
        }
    }
}

/// What a filter needs to know about the current tick, beyond the rule
/// tree's own candle series.
#[derive(Debug, Clone, Copy)]
pub struct TickContext {
    pub hour: u8,
    pub spread_pips: Option<f64>,
}

/// Runs every filter in order, returning the first failure. `None` means
/// every filter passed.
pub fn evaluate_filters(
    filters: &[StrategyFilter],
    ctx: TickContext,
    candles: &[Candle],
) -> Option<SkipReason> {
    for filter in filters {
        if !passes(filter, ctx, candles) {
            return Some(reason_for(filter));
        }
    }
    None
}

fn reason_for(filter: &StrategyFilter) -> SkipReason {
    match filter {
        StrategyFilter::Session { .. } => SkipReason::Session,
        StrategyFilter::TimeOfDay { .. } => SkipReason::TimeOfDay,
        StrategyFilter::MaxSpreadPips { .. } => SkipReason::Spread,
        StrategyFilter::MinVolatilityAtr { .. } => SkipReason::Volatility,
    }
}

fn passes(filter: &StrategyFilter, ctx: TickContext, candles: &[Candle]) -> bool {
    match filter {
        StrategyFilter::Session { start_hour, end_hour } => {
            if start_hour <= end_hour {
                ctx.hour >= *start_hour && ctx.hour < *end_hour
            } else {
                ctx.hour >= *start_hour || ctx.hour < *end_hour
            }
        }
        StrategyFilter::TimeOfDay { allowed_hours } => allowed_hours.contains(&ctx.hour),
        StrategyFilter::MaxSpreadPips { max_spread } => {
            ctx.spread_pips.map_or(true, |spread| spread <= *max_spread)
        }
        StrategyFilter::MinVolatilityAtr { min_atr, period } => {
            match indicators::atr(candles, *period) {
                Some(value) => value.current >= *min_atr,
                None => false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_of_day_filter_rejects_excluded_hour() {
        let filters = vec![StrategyFilter::TimeOfDay {
            allowed_hours: vec![9, 10, 11],
        }];
        let ctx = TickContext { hour: 14, spread_pips: None };
        assert_eq!(
            evaluate_filters(&filters, ctx, &[]),
            Some(SkipReason::TimeOfDay)
        );
    }

    #[test]
    fn spread_filter_passes_when_within_bound() {
        let filters = vec![StrategyFilter::MaxSpreadPips { max_spread: 2.0 }];
        let ctx = TickContext { hour: 9, spread_pips: Some(1.5) };
        assert_eq!(evaluate_filters(&filters, ctx, &[]), None);
    }

    #[test]
    fn no_filters_always_passes() {
        let ctx = TickContext { hour: 0, spread_pips: None };
        assert_eq!(evaluate_filters(&[], ctx, &[]), None);
    }
}
