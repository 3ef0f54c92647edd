//! Bounded priority queue (§4.1 "Queueing").
//!
//! Strict priority with FIFO within a priority; critical commands preempt
//! at the head. Bounded at a default capacity of 1024; on overflow the
//! lowest-priority pending command is evicted and a backpressure event is
//! the caller's responsibility to emit (this module only reports what it
//! evicted).

use std::collections::BTreeMap;

use agent_types::{Command, CommandId, Priority};

pub const DEFAULT_CAPACITY: usize = 1024;

fn priority_rank(priority: Priority) -> u8 {
    match priority {
        Priority::Critical => 0,
        Priority::High => 1,
        Priority::Normal => 2,
        Priority::Low => 3,
    }
}

/// Orders ascending exactly in dispatch order: critical-before-high-
/// before-normal-before-low, FIFO (smallest `seq` first) within a class.
/// `BTreeMap::first_key_value` is therefore always "what to dispatch next"
/// and `BTreeMap::last_key_value` is always "the worst candidate to evict".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    rank: u8,
    seq: u64,
}

#[derive(Debug)]
pub struct PriorityQueue {
    capacity: usize,
    next_seq: u64,
    entries: BTreeMap<QueueKey, Command>,
}

/// Reports what happened to an overflowing `push` (§4.1 "the queue is
/// bounded ... overflow drops the lowest-priority pending command and
/// emits a backpressure event").
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    Accepted,
    /// Carries the evicted command itself (not just its id) so the caller
    /// can report an accurate `expired`/backpressure outcome for it.
    AcceptedWithEviction(Command),
    /// The queue was full and every pending entry was critical, so nothing
    /// could be evicted (§4.1: "critical commands are never evicted").
    /// Implementers' choice, recorded in `DESIGN.md`: the new command is
    /// still admitted rather than rejected, since rejecting a trading
    /// command outright is a worse outcome than a transient over-capacity
    /// queue of critical work.
    AcceptedOverCapacity,
}

impl PriorityQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_seq: 0,
            entries: BTreeMap::new(),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, command: Command) -> PushOutcome {
        let key = QueueKey {
            rank: priority_rank(command.priority),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.entries.insert(key, command);

        if self.entries.len() <= self.capacity {
            return PushOutcome::Accepted;
        }

        match self.evict_worst() {
            Some(evicted) => PushOutcome::AcceptedWithEviction(evicted),
            None => PushOutcome::AcceptedOverCapacity,
        }
    }

    /// Removes and returns the highest-priority, earliest-queued command.
    pub fn pop(&mut self) -> Option<Command> {
        let key = *self.entries.keys().next()?;
        self.entries.remove(&key)
    }

    /// Removes a specific queued command by id (cancellation of a command
    /// still in `{received, queued, validating}`, §5 "Cancellation").
    pub fn remove(&mut self, id: CommandId) -> Option<Command> {
        let key = self
            .entries
            .iter()
            .find(|(_, cmd)| cmd.id == id)
            .map(|(k, _)| *k)?;
        self.entries.remove(&key)
    }

    pub fn contains(&self, id: CommandId) -> bool {
        self.entries.values().any(|cmd| cmd.id == id)
    }

    /// Evicts the lowest-priority, most-recently-queued non-critical entry.
    /// Returns `None` if every pending entry is critical.
    fn evict_worst(&mut self) -> Option<Command> {
        let worst_key = self
            .entries
            .iter()
            .rev()
            .find(|(_, cmd)| !cmd.priority.is_critical())
            .map(|(k, _)| *k)?;
        self.entries.remove(&worst_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_types::{CommandPayload, Source};
    use chrono::Utc;

    fn command(priority: Priority) -> Command {
        Command::new(priority, CommandPayload::Ping, Utc::now(), None, None, Source::Strategy)
            .unwrap()
    }

    #[test]
    fn critical_pops_before_lower_priority_even_if_queued_later() {
        let mut queue = PriorityQueue::new(10);
        queue.push(command(Priority::Normal));
        queue.push(command(Priority::Critical));
        let first = queue.pop().unwrap();
        assert_eq!(first.priority, Priority::Critical);
    }

    #[test]
    fn fifo_within_same_priority() {
        let mut queue = PriorityQueue::new(10);
        let a = command(Priority::Normal);
        let b = command(Priority::Normal);
        let a_id = a.id;
        queue.push(a);
        queue.push(b);
        assert_eq!(queue.pop().unwrap().id, a_id);
    }

    #[test]
    fn overflow_evicts_lowest_priority() {
        let mut queue = PriorityQueue::new(1);
        queue.push(command(Priority::Low));
        let outcome = queue.push(command(Priority::Critical));
        assert!(matches!(outcome, PushOutcome::AcceptedWithEviction(_)));
        assert_eq!(queue.pop().unwrap().priority, Priority::Critical);
        assert!(queue.is_empty());
    }

    #[test]
    fn critical_never_evicted_even_over_capacity() {
        let mut queue = PriorityQueue::new(1);
        queue.push(command(Priority::Critical));
        let outcome = queue.push(command(Priority::Critical));
        assert_eq!(outcome, PushOutcome::AcceptedOverCapacity);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn cancel_removes_queued_command() {
        let mut queue = PriorityQueue::new(10);
        let cmd = command(Priority::Normal);
        let id = cmd.id;
        queue.push(cmd);
        assert!(queue.remove(id).is_some());
        assert!(queue.pop().is_none());
    }
}
