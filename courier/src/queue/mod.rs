//! Pending-message queue
//!
//! Holds messages that declare a response deadline. A background loop wakes
//! at the earlier of the next tick and the earliest deadline, expires what
//! is overdue and dispatches the rest through the orchestrator. High and
//! urgent messages wake the loop as soon as they are enqueued.

mod entry;
mod scheduler;

use thiserror::Error;

use crate::domain::{DeliveryStatus, MessageId};

pub use entry::{Deadline, EntryPhase, QueueEntry, QueueSnapshot, QueueStats, deadline_after};
pub use scheduler::PendingQueue;

/// Enqueue and acknowledgment failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Message {id} has no recipient")]
    EmptyRecipient { id: MessageId },

    #[error("Message {id} is already queued")]
    Duplicate { id: MessageId },

    #[error("Message {id} is {status}, only pending messages can be queued")]
    NotPending { id: MessageId, status: DeliveryStatus },

    #[error("Message {id} is not awaiting acknowledgment")]
    NotAwaitingAck { id: MessageId },

    #[error("Queue is shut down")]
    Closed,
}
