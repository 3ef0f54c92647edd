//! [`AccountSnapshot`]: refreshed at heartbeat cadence, cached single-writer
//! multi-reader (§5 "Shared resources").

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::position::Position;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub balance: Decimal,
    pub equity: Decimal,
    pub margin: Decimal,
    pub free_margin: Decimal,
    pub open_positions: Vec<Position>,
    pub timestamp: DateTime<Utc>,
}

impl AccountSnapshot {
    /// Age relative to `now`; used by the safety validator's freshness check
    /// (§4.2 item 4) and the pipeline's staleness guards.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.timestamp
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        self.age(now) <= max_age
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn freshness_boundary_is_inclusive() {
        let now = Utc::now();
        let snap = AccountSnapshot {
            balance: dec!(10000),
            equity: dec!(10000),
            margin: dec!(0),
            free_margin: dec!(10000),
            open_positions: vec![],
            timestamp: now - chrono::Duration::seconds(30),
        };
        assert!(snap.is_fresh(now, chrono::Duration::seconds(30)));
        assert!(!snap.is_fresh(now, chrono::Duration::seconds(29)));
    }
}
