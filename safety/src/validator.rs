//! The safety validator itself (C4, §4.2): a synchronous pre-trade gate.
//!
//! `validate` never yields and never propagates an error — it always
//! returns a [`Verdict`], mirroring how the teacher's `RiskManager::check`
//! returns `RiskApproved`/`RiskRefused` pairs rather than a `Result` the
//! caller must unwind (§5 "Propagation": "the safety validator never
//! propagates — it returns a verdict").

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use agent_types::{AccountSnapshot, Position, SafetyLimits};

use crate::checks::{risk_per_trade_pct, CheckHigherThan, SafetyCheck};
use crate::error::DenyReason;
use crate::latch::Latch;

const STALE_ACCOUNT_MAX_AGE: chrono::Duration = chrono::Duration::seconds(30);
const REPEATED_FAILURE_THRESHOLD: usize = 5;
const REPEATED_FAILURE_WINDOW: chrono::Duration = chrono::Duration::seconds(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny(DenyReason),
}

impl Verdict {
    pub fn is_allowed(self) -> bool {
        matches!(self, Verdict::Allow)
    }
}

/// Why the latch was tripped, for audit payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchCause {
    DailyLossExceeded,
    DrawdownExceeded,
    RepeatedTradeFailures,
}

/// An intended OPEN_POSITION, the only command kind the risk-per-trade and
/// lot-size checks apply to (§4.2 items 6-7).
#[derive(Debug, Clone)]
pub struct TradeRequest<'a> {
    pub symbol: &'a str,
    pub volume: Decimal,
    pub entry_price: Decimal,
    pub stop_loss: Option<Decimal>,
    /// Per-symbol risk multiplier; `Decimal::ONE` when not specified.
    pub symbol_risk_factor: Decimal,
}

struct DailyState {
    day: NaiveDate,
    balance_at_day_start: Decimal,
    peak_equity_since_day_start: Decimal,
}

/// Sliding window of recent permanent trade-failure timestamps, used to
/// auto-latch after repeated dispatch failures (§4.1 step 6).
struct FailureWindow {
    timestamps: VecDeque<DateTime<Utc>>,
}

impl FailureWindow {
    fn new() -> Self {
        Self {
            timestamps: VecDeque::new(),
        }
    }

    fn record(&mut self, now: DateTime<Utc>) -> usize {
        self.timestamps.push_back(now);
        while let Some(&front) = self.timestamps.front() {
            if now - front > REPEATED_FAILURE_WINDOW {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
        self.timestamps.len()
    }
}

pub struct SafetyValidator {
    limits: Mutex<SafetyLimits>,
    latch: Latch,
    daily: Mutex<DailyState>,
    failures: Mutex<FailureWindow>,
}

impl std::fmt::Debug for SafetyValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafetyValidator")
            .field("latched", &self.latch.is_tripped())
            .finish_non_exhaustive()
    }
}

impl SafetyValidator {
    pub fn new(limits: SafetyLimits, opening_balance: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            limits: Mutex::new(limits),
            latch: Latch::default(),
            daily: Mutex::new(DailyState {
                day: now.date_naive(),
                balance_at_day_start: opening_balance,
                peak_equity_since_day_start: opening_balance,
            }),
            failures: Mutex::new(FailureWindow::new()),
        }
    }

    pub fn is_latched(&self) -> bool {
        self.latch.is_tripped()
    }

    /// Trips the latch directly, for an `EMERGENCY_STOP` command (§3
    /// `CommandKind::EmergencyStop`) rather than a threshold breach.
    pub fn emergency_stop(&self) {
        self.latch.trip();
    }

    /// Clears the latch. Callers must authenticate the OPERATOR-signed
    /// `RESET_SAFETY` elevated credential *before* calling this (§4.2
    /// "Latch semantics"); the clearance audit record is the caller's
    /// responsibility too.
    pub fn reset(&self) {
        self.latch.clear();
    }

    pub fn update_limits(&self, limits: SafetyLimits) {
        *self.limits.lock().unwrap() = limits;
    }

    /// Runs the ordered checks in §4.2, short-circuiting on first deny.
    /// `hour` is the local wall-clock hour (0-23); `trade` is `None` for
    /// non-OPEN_POSITION trading actions (CLOSE/MODIFY/CLOSE_ALL), which
    /// skip the symbol/lot/risk checks but still observe the latch,
    /// freshness, and position-limit gates.
    pub fn validate(
        &self,
        account: &AccountSnapshot,
        positions: &[Position],
        hour: u8,
        now: DateTime<Utc>,
        trade: Option<TradeRequest<'_>>,
    ) -> Verdict {
        self.roll_day_if_needed(account, now);

        if self.latch.is_tripped() {
            return Verdict::Deny(DenyReason::EmergencyStopActive);
        }

        if let Some(req) = &trade {
            let limits = self.limits.lock().unwrap();
            if !limits.is_symbol_allowed(req.symbol) {
                return Verdict::Deny(DenyReason::SymbolNotAllowed);
            }
        }

        {
            let limits = self.limits.lock().unwrap();
            if limits.is_hour_forbidden(hour) {
                return Verdict::Deny(DenyReason::TimeForbidden);
            }
        }

        if !account.is_fresh(now, STALE_ACCOUNT_MAX_AGE) {
            return Verdict::Deny(DenyReason::StaleAccount);
        }

        if trade.is_some() {
            let limits = self.limits.lock().unwrap();
            let check = CheckHigherThan {
                limit: limits.max_open_positions,
                reason: DenyReason::PositionLimit,
            };
            if check.check(&(positions.len() + 1)).is_err() {
                return Verdict::Deny(DenyReason::PositionLimit);
            }
        }

        if let Some(req) = &trade {
            let limits = self.limits.lock().unwrap();
            let lot_check = CheckHigherThan {
                limit: limits.max_lot_size,
                reason: DenyReason::LotTooLarge,
            };
            if lot_check.check(&req.volume).is_err() {
                return Verdict::Deny(DenyReason::LotTooLarge);
            }

            if let Some(stop_loss) = req.stop_loss {
                let pct = risk_per_trade_pct(
                    req.entry_price,
                    stop_loss,
                    req.volume,
                    req.symbol_risk_factor,
                    account.equity,
                );
                if pct > limits.max_risk_per_trade_pct {
                    return Verdict::Deny(DenyReason::RiskTooHigh);
                }
            }
        }

        let (daily_loss_pct, drawdown_pct, max_daily_loss_pct, max_drawdown_pct) = {
            let mut daily = self.daily.lock().unwrap();
            daily.peak_equity_since_day_start = daily.peak_equity_since_day_start.max(account.equity);
            let limits = self.limits.lock().unwrap();

            let daily_loss_pct = pct_drop(daily.balance_at_day_start, account.equity);
            let drawdown_pct = pct_drop(daily.peak_equity_since_day_start, account.equity);
            (
                daily_loss_pct,
                drawdown_pct,
                limits.max_daily_loss_pct,
                limits.max_drawdown_pct,
            )
        };

        if daily_loss_pct > max_daily_loss_pct {
            self.latch.trip();
            return Verdict::Deny(DenyReason::DailyLossExceeded);
        }

        if drawdown_pct > max_drawdown_pct {
            self.latch.trip();
            return Verdict::Deny(DenyReason::DrawdownExceeded);
        }

        Verdict::Allow
    }

    /// Called by the pipeline on every permanent trade-command failure
    /// (§4.1 step 6). Returns `Some(LatchCause::RepeatedTradeFailures)` the
    /// moment the 5-in-60s threshold is crossed, so the caller can emit and
    /// audit the event; returns `None` otherwise, including on every call
    /// after the latch is already tripped for this reason.
    pub fn record_trade_failure(&self, now: DateTime<Utc>) -> Option<LatchCause> {
        let count = self.failures.lock().unwrap().record(now);
        if count >= REPEATED_FAILURE_THRESHOLD && !self.latch.is_tripped() {
            self.latch.trip();
            Some(LatchCause::RepeatedTradeFailures)
        } else {
            None
        }
    }

    fn roll_day_if_needed(&self, account: &AccountSnapshot, now: DateTime<Utc>) {
        let mut daily = self.daily.lock().unwrap();
        let today = now.date_naive();
        if today != daily.day {
            daily.day = today;
            daily.balance_at_day_start = account.balance;
            daily.peak_equity_since_day_start = account.equity;
        }
    }
}

fn pct_drop(reference: Decimal, current: Decimal) -> f64 {
    if reference.is_zero() {
        return 0.0;
    }
    let drop = (reference - current) / reference * Decimal::ONE_HUNDRED;
    drop.try_into().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn limits() -> SafetyLimits {
        SafetyLimits {
            max_daily_loss_pct: 5.0,
            max_drawdown_pct: 10.0,
            max_open_positions: 5,
            max_lot_size: dec!(1.0),
            max_risk_per_trade_pct: 2.0,
            allowed_symbols: vec!["EURUSD".into()],
            forbidden_hours: vec![],
        }
    }

    fn account(equity: Decimal, now: DateTime<Utc>) -> AccountSnapshot {
        AccountSnapshot {
            balance: equity,
            equity,
            margin: dec!(0),
            free_margin: equity,
            open_positions: vec![],
            timestamp: now,
        }
    }

    #[test]
    fn happy_path_open_allows() {
        let now = Utc::now();
        let validator = SafetyValidator::new(limits(), dec!(10000), now);
        let acc = account(dec!(10000), now);
        let verdict = validator.validate(
            &acc,
            &[],
            12,
            now,
            Some(TradeRequest {
                symbol: "EURUSD",
                volume: dec!(0.1),
                entry_price: dec!(1.1000),
                stop_loss: Some(dec!(1.0950)),
                symbol_risk_factor: dec!(1),
            }),
        );
        assert_eq!(verdict, Verdict::Allow);
    }

    #[test]
    fn latched_denies_before_any_other_check() {
        let now = Utc::now();
        let validator = SafetyValidator::new(limits(), dec!(10000), now);
        validator.latch.trip();
        let acc = account(dec!(10000), now);
        let verdict = validator.validate(&acc, &[], 12, now, None);
        assert_eq!(verdict, Verdict::Deny(DenyReason::EmergencyStopActive));
    }

    #[test]
    fn symbol_not_allowed_denied() {
        let now = Utc::now();
        let validator = SafetyValidator::new(limits(), dec!(10000), now);
        let acc = account(dec!(10000), now);
        let verdict = validator.validate(
            &acc,
            &[],
            12,
            now,
            Some(TradeRequest {
                symbol: "GBPUSD",
                volume: dec!(0.1),
                entry_price: dec!(1.1),
                stop_loss: None,
                symbol_risk_factor: dec!(1),
            }),
        );
        assert_eq!(verdict, Verdict::Deny(DenyReason::SymbolNotAllowed));
    }

    #[test]
    fn daily_loss_denies_and_latches() {
        let now = Utc::now();
        let validator = SafetyValidator::new(limits(), dec!(10000), now);
        // equity dropped 6% -> exceeds 5% max_daily_loss_pct
        let acc = account(dec!(9400), now);
        let verdict = validator.validate(&acc, &[], 12, now, None);
        assert_eq!(verdict, Verdict::Deny(DenyReason::DailyLossExceeded));
        assert!(validator.is_latched());
    }

    #[test]
    fn repeated_failures_latch_on_fifth_within_window() {
        let now = Utc::now();
        let validator = SafetyValidator::new(limits(), dec!(10000), now);
        for i in 0..4 {
            assert_eq!(
                validator.record_trade_failure(now + chrono::Duration::seconds(i)),
                None
            );
        }
        assert_eq!(
            validator.record_trade_failure(now + chrono::Duration::seconds(5)),
            Some(LatchCause::RepeatedTradeFailures)
        );
        assert!(validator.is_latched());
    }

    #[test]
    fn reset_clears_latch() {
        let now = Utc::now();
        let validator = SafetyValidator::new(limits(), dec!(10000), now);
        validator.latch.trip();
        validator.reset();
        assert!(!validator.is_latched());
    }
}
