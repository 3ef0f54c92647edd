//! [`SafetyLimits`]: pre-trade policy configuration plus the runtime
//! emergency-stop latch (§3, §4.2).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyLimits {
    pub max_daily_loss_pct: f64,
    pub max_drawdown_pct: f64,
    pub max_open_positions: usize,
    pub max_lot_size: rust_decimal::Decimal,
    pub max_risk_per_trade_pct: f64,
    pub allowed_symbols: Vec<String>,
    /// Hour-of-day ranges (0-23, local wall clock) during which trading is
    /// forbidden. `(22, 2)` means 22:00 through 02:00, wrapping midnight.
    pub forbidden_hours: Vec<(u8, u8)>,
}

impl SafetyLimits {
    pub fn is_symbol_allowed(&self, symbol: &str) -> bool {
        self.allowed_symbols.iter().any(|s| s == symbol)
    }

    pub fn is_hour_forbidden(&self, hour: u8) -> bool {
        self.forbidden_hours.iter().any(|&(start, end)| {
            if start <= end {
                hour >= start && hour < end
            } else {
                hour >= start || hour < end
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> SafetyLimits {
        SafetyLimits {
            max_daily_loss_pct: 5.0,
            max_drawdown_pct: 10.0,
            max_open_positions: 5,
            max_lot_size: rust_decimal::Decimal::ONE,
            max_risk_per_trade_pct: 2.0,
            allowed_symbols: vec!["EURUSD".into()],
            forbidden_hours: vec![(22, 2)],
        }
    }

    #[test]
    fn wrapping_forbidden_window_spans_midnight() {
        let limits = limits();
        assert!(limits.is_hour_forbidden(23));
        assert!(limits.is_hour_forbidden(0));
        assert!(limits.is_hour_forbidden(1));
        assert!(!limits.is_hour_forbidden(2));
        assert!(!limits.is_hour_forbidden(12));
    }

    #[test]
    fn symbol_allowlist() {
        let limits = limits();
        assert!(limits.is_symbol_allowed("EURUSD"));
        assert!(!limits.is_symbol_allowed("GBPUSD"));
    }
}
