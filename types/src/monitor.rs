//! [`MonitorState`]: per-active-strategy runtime state (§3).
//!
//! Owned by the strategy monitor; readable by other components but never
//! mutated outside it (§3 "Ownership & lifecycle").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorState {
    pub strategy_id: String,
    pub last_check_at: Option<DateTime<Utc>>,
    pub last_signal_at: Option<DateTime<Utc>>,
    pub checks_count: u64,
    pub signals_count: u64,
    pub has_open_position: bool,
    pub open_ticket: Option<i64>,
}

impl MonitorState {
    pub fn new(strategy_id: impl Into<String>) -> Self {
        Self {
            strategy_id: strategy_id.into(),
            last_check_at: None,
            last_signal_at: None,
            checks_count: 0,
            signals_count: 0,
            has_open_position: false,
            open_ticket: None,
        }
    }

    /// True while `cooldown_ms` have not yet elapsed since the last signal
    /// (§4.4 step 4).
    pub fn in_cooldown(&self, now: DateTime<Utc>, cooldown_ms: u64) -> bool {
        match self.last_signal_at {
            Some(last) => now - last < chrono::Duration::milliseconds(cooldown_ms as i64),
            None => false,
        }
    }

    pub fn record_check(&mut self, now: DateTime<Utc>) {
        self.last_check_at = Some(now);
        self.checks_count += 1;
    }

    pub fn record_signal(&mut self, now: DateTime<Utc>) {
        self.last_signal_at = Some(now);
        self.signals_count += 1;
    }

    pub fn record_open(&mut self, ticket: i64) {
        self.has_open_position = true;
        self.open_ticket = Some(ticket);
    }

    pub fn record_close(&mut self) {
        self.has_open_position = false;
        self.open_ticket = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooldown_expires_after_configured_window() {
        let mut state = MonitorState::new("s1");
        let t0 = Utc::now();
        state.record_signal(t0);
        assert!(state.in_cooldown(t0 + chrono::Duration::milliseconds(30_000), 60_000));
        assert!(!state.in_cooldown(t0 + chrono::Duration::milliseconds(60_001), 60_000));
    }
}
