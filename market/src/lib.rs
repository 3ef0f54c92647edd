#![forbid(unsafe_code)]
#![warn(unused, missing_debug_implementations, rust_2018_idioms)]

//! Market data cache and indicator engine (C5, C6, §4.6).
//!
//! [`MarketDataCache`] holds a bounded [`ring::CandleRing`] per
//! (symbol, timeframe); the free functions in [`indicators`] are pure
//! numeric functions over a candle slice with no knowledge of the cache.

pub mod cache;
pub mod indicators;
pub mod ring;

pub use cache::{MarketDataCache, SeriesKey};
pub use ring::CandleRing;
