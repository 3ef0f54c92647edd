//! Tracing setup (`SPEC_FULL.md` B.1), grounded on `core::logging`: an
//! `EnvFilter` defaulting to `info`, with a plain or JSON-formatted `fmt`
//! layer selected by `--log-format`.

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

fn env_filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy()
}

/// Human-readable, single-line-per-event logging for terminals.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer())
        .init();
}

/// Structured logging for shipping to a log collector: one JSON object per
/// line, event fields flattened to the top level rather than nested under
/// `fields`.
pub fn init_json_logging() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().json().flatten_event(true))
        .init();
}
