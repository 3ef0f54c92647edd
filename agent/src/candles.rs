//! [`CandleFetcher`] adapter (§4.4 "Market data"): the strategy monitor asks
//! for a refetch when its cached series looks stale; this turns that
//! request into a `GET_CANDLES` bridge frame and upserts the reply into the
//! shared cache the monitor reads back from.
//!
//! `request_fetch` is sync-signature-but-fire-and-forget by design (the
//! trait returns `()`): the monitor's tick loop must not block on bridge
//! round-trip latency, it just re-reads whatever is in the cache on its
//! next tick.

use std::sync::Arc;
use std::time::Duration;

use agent_bridge::{BridgePool, FrameKind};
use agent_market::{MarketDataCache, SeriesKey};
use agent_types::{Candle, CandleFetcher};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::warn;

const FETCH_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct BridgeCandleFetcher {
    bridge: Arc<BridgePool>,
    cache: Arc<MarketDataCache>,
}

impl BridgeCandleFetcher {
    pub fn new(bridge: Arc<BridgePool>, cache: Arc<MarketDataCache>) -> Arc<Self> {
        Arc::new(Self { bridge, cache })
    }
}

#[derive(Debug, Deserialize)]
struct WireCandle {
    open_time: DateTime<Utc>,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
}

impl From<WireCandle> for Candle {
    fn from(c: WireCandle) -> Self {
        Candle {
            open_time: c.open_time,
            open: c.open.to_f64().unwrap_or_default(),
            high: c.high.to_f64().unwrap_or_default(),
            low: c.low.to_f64().unwrap_or_default(),
            close: c.close.to_f64().unwrap_or_default(),
            volume: c.volume.to_f64().unwrap_or_default(),
        }
    }
}

impl CandleFetcher for BridgeCandleFetcher {
    fn request_fetch(&self, symbol: &str, timeframe: &str) {
        let bridge = self.bridge.clone();
        let cache = self.cache.clone();
        let key = SeriesKey::new(symbol, timeframe);
        let payload = serde_json::json!({ "symbol": symbol, "timeframe": timeframe });

        tokio::spawn(async move {
            let reply = match bridge.request(FrameKind::GetCandles, payload, FETCH_DEADLINE).await {
                Ok(reply) => reply,
                Err(err) => {
                    warn!(symbol = %key.symbol, timeframe = %key.timeframe, error = %err, "candle fetch failed");
                    return;
                }
            };

            if !reply.ok {
                warn!(
                    symbol = %key.symbol,
                    timeframe = %key.timeframe,
                    error = reply.error.as_deref().unwrap_or("unknown"),
                    "terminal rejected candle fetch"
                );
                return;
            }

            let Some(data) = reply.data else {
                warn!(symbol = %key.symbol, timeframe = %key.timeframe, "candle fetch reply carried no data");
                return;
            };

            let candles: Vec<WireCandle> = match serde_json::from_value(data) {
                Ok(candles) => candles,
                Err(err) => {
                    warn!(symbol = %key.symbol, timeframe = %key.timeframe, error = %err, "malformed candle payload");
                    return;
                }
            };

            for candle in candles {
                cache.upsert(&key, candle.into());
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_bridge::MockConnector;

    #[tokio::test]
    async fn unreachable_bridge_does_not_panic() {
        let bridge = BridgePool::with_default_capacity(Arc::new(MockConnector), b"secret".to_vec());
        let cache = Arc::new(MarketDataCache::new());
        let fetcher = BridgeCandleFetcher::new(bridge, cache.clone());

        fetcher.request_fetch("EURUSD", "1m");
        tokio::time::sleep(Duration::from_millis(50)).await;
        // The mock terminal echoes the request payload back as `data`,
        // which doesn't deserialize as a candle array; this just exercises
        // that the fire-and-forget task handles that shape without panicking.
        assert!(!cache.has_series(&SeriesKey::new("EURUSD", "1m")));
    }
}
