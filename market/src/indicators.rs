//! Pure indicator functions over a candle slice (§4.6 "Indicators").
//!
//! Each function returns the value at the last closed candle plus the
//! prior value, so callers can detect a crossover by sign change of
//! `current - signal` between consecutive closed candles without
//! recomputing the whole series twice.

use agent_types::Candle;

/// `current` at the last closed candle, `prior` one candle before that.
/// `None` when there isn't enough history for either point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorValue {
    pub current: f64,
    pub prior: Option<f64>,
}

impl IndicatorValue {
    /// Crossover is a sign change of `current - signal` vs. `prior - signal`
    /// between consecutive closed candles (§4.6 "Numeric semantics").
    pub fn crosses_above(&self, signal: &IndicatorValue) -> bool {
        match (self.prior, signal.prior) {
            (Some(prior), Some(prior_signal)) => {
                prior - prior_signal <= 0.0 && self.current - signal.current > 0.0
            }
            _ => false,
        }
    }

    pub fn crosses_below(&self, signal: &IndicatorValue) -> bool {
        match (self.prior, signal.prior) {
            (Some(prior), Some(prior_signal)) => {
                prior - prior_signal >= 0.0 && self.current - signal.current < 0.0
            }
            _ => false,
        }
    }
}

fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

/// Simple moving average over `n` closes.
pub fn sma(candles: &[Candle], n: usize) -> Option<IndicatorValue> {
    let closes = closes(candles);
    sma_series(&closes, n)
}

fn sma_series(closes: &[f64], n: usize) -> Option<IndicatorValue> {
    if n == 0 || closes.len() < n {
        return None;
    }
    let current = mean(&closes[closes.len() - n..]);
    let prior = if closes.len() >= n + 1 {
        Some(mean(&closes[closes.len() - 1 - n..closes.len() - 1]))
    } else {
        None
    };
    Some(IndicatorValue { current, prior })
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Exponential moving average over `n` closes. Seeded with an SMA of the
/// first `n` values, then smoothed with `alpha = 2 / (n + 1)`.
pub fn ema(candles: &[Candle], n: usize) -> Option<IndicatorValue> {
    let closes = closes(candles);
    ema_series(&closes, n).and_then(|series| last_two(&series))
}

fn ema_series(closes: &[f64], n: usize) -> Option<Vec<f64>> {
    if n == 0 || closes.len() < n {
        return None;
    }
    let alpha = 2.0 / (n as f64 + 1.0);
    let mut out = Vec::with_capacity(closes.len() - n + 1);
    let mut prev = mean(&closes[0..n]);
    out.push(prev);
    for &price in &closes[n..] {
        prev = alpha * price + (1.0 - alpha) * prev;
        out.push(prev);
    }
    Some(out)
}

fn last_two(series: &[f64]) -> Option<IndicatorValue> {
    let current = *series.last()?;
    let prior = if series.len() >= 2 {
        Some(series[series.len() - 2])
    } else {
        None
    };
    Some(IndicatorValue { current, prior })
}

/// Relative Strength Index over `n` periods (Wilder smoothing).
pub fn rsi(candles: &[Candle], n: usize) -> Option<IndicatorValue> {
    let closes = closes(candles);
    if n == 0 || closes.len() < n + 2 {
        return None;
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let mut avg_gain = deltas[..n].iter().map(|d| d.max(0.0)).sum::<f64>() / n as f64;
    let mut avg_loss = deltas[..n].iter().map(|d| (-d).max(0.0)).sum::<f64>() / n as f64;

    let mut values = Vec::with_capacity(deltas.len() - n + 1);
    values.push(rsi_from_averages(avg_gain, avg_loss));

    for &delta in &deltas[n..] {
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);
        avg_gain = (avg_gain * (n as f64 - 1.0) + gain) / n as f64;
        avg_loss = (avg_loss * (n as f64 - 1.0) + loss) / n as f64;
        values.push(rsi_from_averages(avg_gain, avg_loss));
    }

    last_two(&values)
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

/// Average True Range over `n` periods.
pub fn atr(candles: &[Candle], n: usize) -> Option<IndicatorValue> {
    if n == 0 || candles.len() < n + 2 {
        return None;
    }

    let true_ranges: Vec<f64> = candles
        .windows(2)
        .map(|w| {
            let (prev, cur) = (&w[0], &w[1]);
            let hl = cur.high - cur.low;
            let hc = (cur.high - prev.close).abs();
            let lc = (cur.low - prev.close).abs();
            hl.max(hc).max(lc)
        })
        .collect();

    sma_series(&true_ranges, n)
}

/// MACD line and signal line. Returns `(macd, signal)`, both as
/// [`IndicatorValue`]s over the same index space so crossovers between them
/// can be detected with [`IndicatorValue::crosses_above`].
pub fn macd(
    candles: &[Candle],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> Option<(IndicatorValue, IndicatorValue)> {
    let closes = closes(candles);
    if slow == 0 || fast >= slow || closes.len() < slow {
        return None;
    }

    let fast_ema = ema_series(&closes, fast)?;
    let slow_ema = ema_series(&closes, slow)?;

    // Align: fast_ema starts `slow - fast` points earlier than slow_ema.
    let offset = slow - fast;
    if fast_ema.len() <= offset {
        return None;
    }
    let macd_line: Vec<f64> = fast_ema[offset..]
        .iter()
        .zip(slow_ema.iter())
        .map(|(f, s)| f - s)
        .collect();

    let signal_line = ema_series(&macd_line, signal_period)?;
    let macd_aligned = &macd_line[macd_line.len() - signal_line.len()..];

    let macd_value = last_two(macd_aligned)?;
    let signal_value = last_two(&signal_line)?;
    Some((macd_value, signal_value))
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
                high: c + 0.5,
                low: c - 0.5,
                close: c,
                volume: 1.0,
            })
            .collect()
    }

    #[test]
    fn sma_matches_hand_computation() {
        let c = candles(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let value = sma(&c, 3).unwrap();
        assert!((value.current - 4.0).abs() < 1e-9); // avg(3,4,5)
        assert!((value.prior.unwrap() - 3.0).abs() < 1e-9); // avg(2,3,4)
    }

    #[test]
    fn rsi_is_100_when_no_losses() {
        let series: Vec<f64> = (1..=17).map(|i| i as f64).collect();
        let c = candles(&series);
        let value = rsi(&c, 14).unwrap();
        assert!((value.current - 100.0).abs() < 1e-9);
    }

    #[test]
    fn insufficient_history_returns_none() {
        let c = candles(&[1.0, 2.0]);
        assert!(sma(&c, 5).is_none());
        assert!(rsi(&c, 14).is_none());
        assert!(atr(&c, 14).is_none());
        assert!(macd(&c, 12, 26, 9).is_none());
    }

    #[test]
    fn crossover_detects_sign_change() {
        let fast = IndicatorValue { current: 1.0, prior: Some(-1.0) };
        let slow = IndicatorValue { current: 0.0, prior: Some(0.0) };
        assert!(fast.crosses_above(&slow));
        assert!(!fast.crosses_below(&slow));
    }
}
