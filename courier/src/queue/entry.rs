//! Queue types for the pending-message queue

use std::cmp::Ordering;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::domain::{Message, MessageId};

/// Where a queued message is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryPhase {
    /// Waiting for the next dispatch pass
    Waiting,
    /// A dispatch task owns the message right now
    Dispatching,
    /// Sent; tracked until acknowledged or the deadline passes
    AwaitingAck,
}

/// Longest representable wait; later deadlines are clamped to this
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `start + wait` without overflow; oversized waits end at [`FAR_FUTURE`]
pub fn deadline_after(start: Instant, wait: Duration) -> Instant {
    start.checked_add(wait.min(FAR_FUTURE)).unwrap_or(start)
}

/// A message held by the queue
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub message: Message,
    pub phase: EntryPhase,
    pub enqueued_at: Instant,
    pub deadline: Instant,
    pub await_ack: bool,
}

impl QueueEntry {
    pub fn new(message: Message, timeout: Duration, await_ack: bool) -> Self {
        let enqueued_at = Instant::now();
        Self {
            message,
            phase: EntryPhase::Waiting,
            enqueued_at,
            deadline: deadline_after(enqueued_at, timeout),
            await_ack,
        }
    }

    /// Time left before the deadline, zero once passed
    pub fn remaining(&self, now: Instant) -> Duration {
        self.deadline.saturating_duration_since(now)
    }
}

/// Heap item ordering entries by deadline, earliest first
///
/// Items are never removed when an entry settles early; stale items are
/// skipped when popped.
#[derive(Debug, Clone)]
pub struct Deadline {
    pub at: Instant,
    pub id: MessageId,
}

impl Eq for Deadline {}

impl PartialEq for Deadline {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.id == other.id
    }
}

impl Ord for Deadline {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap, so the earliest deadline must compare greatest
        other.at.cmp(&self.at).then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Deadline {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Running totals for the queue
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub enqueued: u64,
    pub sent: u64,
    pub delivered: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub peak_depth: usize,
}

/// Point-in-time view of the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub waiting: usize,
    pub dispatching: usize,
    pub awaiting_ack: usize,
    pub stats: QueueStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;

    #[test]
    fn test_heap_pops_earliest_deadline() {
        let now = Instant::now();
        let mut heap = BinaryHeap::new();
        heap.push(Deadline {
            at: now + Duration::from_secs(30),
            id: MessageId::from_string("late"),
        });
        heap.push(Deadline {
            at: now + Duration::from_secs(1),
            id: MessageId::from_string("early"),
        });
        heap.push(Deadline {
            at: now + Duration::from_secs(5),
            id: MessageId::from_string("middle"),
        });

        let order: Vec<_> = std::iter::from_fn(|| heap.pop()).map(|d| d.id.to_string()).collect();
        assert_eq!(order, vec!["early", "middle", "late"]);
    }

    #[test]
    fn test_entry_deadline() {
        let entry = QueueEntry::new(Message::new("Captain", "Agent-1", "x"), Duration::from_secs(10), false);
        assert_eq!(entry.phase, EntryPhase::Waiting);
        assert_eq!(entry.remaining(entry.enqueued_at), Duration::from_secs(10));
        assert_eq!(entry.remaining(entry.deadline + Duration::from_secs(1)), Duration::ZERO);
    }

    #[test]
    fn test_oversized_timeout_is_clamped() {
        let entry = QueueEntry::new(Message::new("Captain", "Agent-1", "x"), Duration::MAX, false);
        assert_eq!(entry.remaining(entry.enqueued_at), FAR_FUTURE);

        let now = Instant::now();
        assert_eq!(deadline_after(now, Duration::from_secs(u64::MAX)), now + FAR_FUTURE);
        assert_eq!(deadline_after(now, Duration::from_secs(5)), now + Duration::from_secs(5));
    }
}
