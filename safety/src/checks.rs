//! Individual pre-trade checks (§4.2), each implementing [`SafetyCheck`].
//!
//! Mirrors the teacher's `RiskCheck` trait / `CheckHigherThan` template: one
//! small, independently testable struct per check, composed in order by
//! [`crate::SafetyValidator::validate`].

use rust_decimal::Decimal;

use crate::error::DenyReason;

/// General interface for a single pre-trade check.
pub trait SafetyCheck {
    type Input;

    fn check(&self, input: &Self::Input) -> Result<(), DenyReason>;
}

/// Fails if `input > limit` (§4.2 items 6-9 all reduce to this shape).
pub struct CheckHigherThan<T> {
    pub limit: T,
    pub reason: DenyReason,
}

impl<T> SafetyCheck for CheckHigherThan<T>
where
    T: PartialOrd,
{
    type Input = T;

    fn check(&self, input: &Self::Input) -> Result<(), DenyReason> {
        if input > &self.limit {
            Err(self.reason)
        } else {
            Ok(())
        }
    }
}

/// Distance-to-stop-loss risk calculation (§4.2 item 7):
/// `distance * volume * risk_factor / equity`, expressed as a percentage.
pub fn risk_per_trade_pct(
    entry_price: Decimal,
    stop_loss: Decimal,
    volume: Decimal,
    symbol_risk_factor: Decimal,
    equity: Decimal,
) -> f64 {
    if equity.is_zero() {
        return f64::INFINITY;
    }
    let distance = (entry_price - stop_loss).abs();
    let risk = distance * volume * symbol_risk_factor / equity * Decimal::ONE_HUNDRED;
    risk.try_into().unwrap_or(f64::INFINITY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn check_higher_than_denies_above_limit() {
        let check = CheckHigherThan {
            limit: dec!(1.0),
            reason: DenyReason::LotTooLarge,
        };
        assert_eq!(check.check(&dec!(1.5)), Err(DenyReason::LotTooLarge));
        assert_eq!(check.check(&dec!(1.0)), Ok(()));
    }

    #[test]
    fn risk_per_trade_matches_hand_computation() {
        // entry 1.1000, sl 1.0950 -> distance 0.0050; volume 0.1; equity 10000.
        let pct = risk_per_trade_pct(dec!(1.1000), dec!(1.0950), dec!(0.1), dec!(1), dec!(10000));
        assert!((pct - 0.000005).abs() < 1e-9);
    }
}
