//! Market data cache (C5, §4.6 "Cache"): one [`CandleRing`] per
//! (symbol, timeframe), fed from the terminal bridge.

use fnv::FnvHashMap;
use parking_lot::RwLock;

use agent_types::Candle;

use crate::ring::{CandleRing, DEFAULT_CAPACITY};

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct SeriesKey {
    pub symbol: String,
    pub timeframe: String,
}

impl SeriesKey {
    pub fn new(symbol: impl Into<String>, timeframe: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe: timeframe.into(),
        }
    }
}

#[derive(Debug, Default)]
pub struct MarketDataCache {
    series: RwLock<FnvHashMap<SeriesKey, CandleRing>>,
    capacity: usize,
}

impl MarketDataCache {
    pub fn new() -> Self {
        Self {
            series: RwLock::new(FnvHashMap::default()),
            capacity: DEFAULT_CAPACITY,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            series: RwLock::new(FnvHashMap::default()),
            capacity,
        }
    }

    /// Inserts or updates a candle for `key` (§4.6 "Inserts are ordered by
    /// openTime; a candle whose openTime already exists replaces the prior
    /// entry").
    pub fn upsert(&self, key: &SeriesKey, candle: Candle) {
        let mut series = self.series.write();
        series
            .entry(key.clone())
            .or_insert_with(|| CandleRing::new(self.capacity))
            .upsert(candle);
    }

    /// A copy-on-read snapshot for `key`, or `None` if no candles have ever
    /// been cached for it (§4.4 step 1: "if unavailable, request a fetch via
    /// C3 and skip this tick").
    pub fn snapshot(&self, key: &SeriesKey) -> Option<Vec<Candle>> {
        let series = self.series.read();
        series.get(key).map(CandleRing::snapshot)
    }

    pub fn has_series(&self, key: &SeriesKey) -> bool {
        self.series.read().contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn candle(close: f64) -> Candle {
        Candle {
            open_time: Utc::now(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn unknown_series_returns_none() {
        let cache = MarketDataCache::new();
        let key = SeriesKey::new("EURUSD", "M5");
        assert!(cache.snapshot(&key).is_none());
    }

    #[test]
    fn separate_keys_have_independent_rings() {
        let cache = MarketDataCache::new();
        let k1 = SeriesKey::new("EURUSD", "M5");
        let k2 = SeriesKey::new("EURUSD", "M15");
        cache.upsert(&k1, candle(1.0));
        assert!(cache.snapshot(&k1).is_some());
        assert!(cache.snapshot(&k2).is_none());
    }
}
