//! In-memory dedup window (§4.1 "Intake": "last 10 000 ids, TTL 1 h").
//!
//! This is pipeline-private state (§5 "Shared resources": "Dedup set:
//! pipeline-private"). It only covers ids seen *this process lifetime*;
//! intake additionally checks the audit log for ids persisted as already
//! processed before a restart (§4.1 item (c)) — callers seed this window
//! from that recovery scan via [`DedupWindow::seed`].

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use fnv::FnvHashSet;

use agent_types::CommandId;

pub const DEFAULT_CAPACITY: usize = 10_000;
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

struct Entry {
    id: CommandId,
    seen_at: Instant,
}

/// A bounded, TTL-expiring set of recently-seen command ids. FIFO eviction
/// when at capacity, lazy TTL eviction on every `contains`/`insert` call.
pub struct DedupWindow {
    capacity: usize,
    ttl: Duration,
    order: VecDeque<Entry>,
    members: FnvHashSet<CommandId>,
}

impl std::fmt::Debug for DedupWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupWindow")
            .field("len", &self.members.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl DedupWindow {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            order: VecDeque::new(),
            members: FnvHashSet::default(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }

    /// Seeds the window with ids recovered from the audit log at startup
    /// (§4.1 item (c): "or if persisted in the audit log as previously
    /// processed"), so a just-restarted agent still rejects a replayed
    /// duplicate even before it has processed anything new.
    pub fn seed(&mut self, ids: impl IntoIterator<Item = CommandId>) {
        let now = Instant::now();
        for id in ids {
            if self.members.insert(id) {
                self.order.push_back(Entry { id, seen_at: now });
            }
        }
        self.evict_overflow();
    }

    /// True if `id` has been seen within the TTL window (§4.1 item (b)).
    pub fn contains(&mut self, id: CommandId) -> bool {
        self.evict_expired();
        self.members.contains(&id)
    }

    /// Current member count, for the heartbeat's `systemMetrics.dedupSetSize`
    /// (§4.5). Does not evict first, so this is a point-in-time upper bound.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Records `id` as seen. Call only after a command has been accepted
    /// (post-dedup-check), not on every submit attempt.
    pub fn record(&mut self, id: CommandId) {
        self.evict_expired();
        if self.members.insert(id) {
            self.order.push_back(Entry {
                id,
                seen_at: Instant::now(),
            });
        }
        self.evict_overflow();
    }

    fn evict_expired(&mut self) {
        let ttl = self.ttl;
        let now = Instant::now();
        while let Some(front) = self.order.front() {
            if now.duration_since(front.seen_at) > ttl {
                let entry = self.order.pop_front().expect("checked by front()");
                self.members.remove(&entry.id);
            } else {
                break;
            }
        }
    }

    fn evict_overflow(&mut self) {
        while self.order.len() > self.capacity {
            if let Some(entry) = self.order.pop_front() {
                self.members.remove(&entry.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_detects_duplicate() {
        let mut window = DedupWindow::new(10, Duration::from_secs(60));
        let id = CommandId::new();
        assert!(!window.contains(id));
        window.record(id);
        assert!(window.contains(id));
    }

    #[test]
    fn overflow_evicts_oldest_first() {
        let mut window = DedupWindow::new(2, Duration::from_secs(60));
        let a = CommandId::new();
        let b = CommandId::new();
        let c = CommandId::new();
        window.record(a);
        window.record(b);
        window.record(c);
        assert!(!window.contains(a));
        assert!(window.contains(b));
        assert!(window.contains(c));
    }

    #[test]
    fn seeded_ids_are_recognized_as_duplicates() {
        let mut window = DedupWindow::with_defaults();
        let id = CommandId::new();
        window.seed([id]);
        assert!(window.contains(id));
    }
}
