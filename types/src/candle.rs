//! [`Candle`]: an OHLCV bar for a single (symbol, timeframe, openTime)
//! (§3, §4.6). The bounded ring that stores these lives in `agent-market`;
//! this crate only defines the bar shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}
