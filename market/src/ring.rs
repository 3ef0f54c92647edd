//! Bounded candle ring for a single (symbol, timeframe) (§3 `Candle`, §4.6
//! "Cache", §8 "Candle ring at capacity").
//!
//! Inserts are ordered by `openTime`; a candle whose `openTime` already
//! exists replaces the prior entry (the currently-forming candle being
//! updated tick-by-tick). Once the ring is at capacity, the oldest candle
//! is discarded to make room for a genuinely new `openTime`.

use agent_types::Candle;

/// Default ring capacity (§3: "typically 500", large enough to satisfy the
/// deepest indicator lookback).
pub const DEFAULT_CAPACITY: usize = 500;

#[derive(Debug, Clone)]
pub struct CandleRing {
    capacity: usize,
    candles: Vec<Candle>,
}

impl CandleRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            candles: Vec::with_capacity(capacity.min(DEFAULT_CAPACITY)),
        }
    }

    /// Inserts or updates `candle`. If a candle with the same `open_time`
    /// already exists (the forming-candle update case), it is replaced in
    /// place; otherwise the candle is appended and, if the ring is now over
    /// capacity, the oldest candle is discarded.
    pub fn upsert(&mut self, candle: Candle) {
        if let Some(existing) = self
            .candles
            .iter_mut()
            .rev()
            .find(|c| c.open_time == candle.open_time)
        {
            *existing = candle;
            return;
        }

        self.candles.push(candle);
        self.candles.sort_by_key(|c| c.open_time);
        if self.candles.len() > self.capacity {
            self.candles.remove(0);
        }
    }

    /// A copy-on-read snapshot: indicators computed against this array see
    /// a stable view even if `upsert` runs concurrently on the writer side
    /// (§4.6 "a copy-on-read semantic so indicators see a stable view").
    pub fn snapshot(&self) -> Vec<Candle> {
        self.candles.clone()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// The most recent *closed* candle, i.e. excluding a still-forming last
    /// bar if the caller knows one is in progress. Callers that don't
    /// distinguish simply treat the last element as closed, matching how
    /// indicators are specified to read "the last closed candle" (§4.6).
    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn candle(minute: i64, close: f64) -> Candle {
        Candle {
            open_time: Utc.timestamp_opt(1_700_000_000 + minute * 60, 0).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn same_open_time_replaces_in_place() {
        let mut ring = CandleRing::new(10);
        ring.upsert(candle(0, 1.0));
        ring.upsert(candle(0, 1.5));
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.last().unwrap().close, 1.5);
    }

    #[test]
    fn over_capacity_drops_oldest() {
        let mut ring = CandleRing::new(3);
        for i in 0..5 {
            ring.upsert(candle(i, i as f64));
        }
        let snap = ring.snapshot();
        assert_eq!(snap.len(), 3);
        assert_eq!(snap[0].close, 2.0);
        assert_eq!(snap[2].close, 4.0);
    }

    #[test]
    fn indicator_over_bounded_tail_matches_unbounded_tail() {
        // The boundary law from §8: results computed from a bounded ring
        // equal those from the same tail on an unbounded buffer.
        let mut bounded = CandleRing::new(3);
        let mut unbounded = Vec::new();
        for i in 0..10 {
            bounded.upsert(candle(i, i as f64));
            unbounded.push(candle(i, i as f64));
        }
        let tail: Vec<_> = unbounded[unbounded.len() - 3..].to_vec();
        assert_eq!(bounded.snapshot(), tail);
    }
}
