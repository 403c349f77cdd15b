//! PendingQueue implementation

use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::domain::{DeliveryStatus, Message, MessageId};
use crate::filter::{FormatRules, format_content};
use crate::history::MessageHistory;
use crate::orchestrator::FallbackOrchestrator;

use super::QueueError;
use super::entry::{Deadline, EntryPhase, QueueEntry, QueueSnapshot, QueueStats, deadline_after};

/// Internal state protected by mutex
struct QueueInner {
    /// Active entries by message ID
    entries: HashMap<MessageId, QueueEntry>,

    /// Deadlines, earliest first (may hold stale items)
    deadlines: BinaryHeap<Deadline>,

    stats: QueueStats,
    closed: bool,
}

/// Why the run loop woke up
enum Wake {
    Timer,
    Expedite,
    Reschedule,
}

/// Timeout-aware holding area for messages awaiting dispatch or acknowledgment
pub struct PendingQueue {
    orchestrator: Arc<FallbackOrchestrator>,
    rules: FormatRules,
    tick_interval: Duration,
    default_timeout: Duration,
    history: Arc<MessageHistory>,
    inner: Mutex<QueueInner>,
    /// Run a dispatch pass now (high/urgent enqueue)
    expedite: Notify,
    /// Recompute the next wake-up (new deadline, shutdown)
    reschedule: Notify,
    /// An entry left the active set or started awaiting acknowledgment
    settled: Notify,
}

impl PendingQueue {
    pub fn new(
        orchestrator: Arc<FallbackOrchestrator>,
        rules: FormatRules,
        config: &QueueConfig,
        history: Arc<MessageHistory>,
    ) -> Self {
        debug!(?config, "PendingQueue::new: called");
        Self {
            orchestrator,
            rules,
            tick_interval: config.tick_interval(),
            default_timeout: config.default_timeout(),
            history,
            inner: Mutex::new(QueueInner {
                entries: HashMap::new(),
                deadlines: BinaryHeap::new(),
                stats: QueueStats::default(),
                closed: false,
            }),
            expedite: Notify::new(),
            reschedule: Notify::new(),
            settled: Notify::new(),
        }
    }

    /// Override the tick interval (sub-second ticks are not expressible in config)
    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn history(&self) -> &Arc<MessageHistory> {
        &self.history
    }

    /// Queue a pending message; `timeout` defaults to the configured response timeout
    pub async fn enqueue(
        &self,
        message: Message,
        timeout: Option<Duration>,
        await_ack: bool,
    ) -> Result<MessageId, QueueError> {
        let id = message.id().clone();
        debug!(%id, recipient = %message.recipient(), ?timeout, await_ack, "PendingQueue::enqueue: called");

        if !message.has_recipient() {
            return Err(QueueError::EmptyRecipient { id });
        }
        if message.status() != DeliveryStatus::Pending {
            return Err(QueueError::NotPending {
                id,
                status: message.status(),
            });
        }

        let timeout = timeout.unwrap_or(self.default_timeout);
        let expedited = message.priority().is_expedited();
        let priority = message.priority();

        {
            let mut inner = self.inner.lock().await;
            if inner.closed {
                return Err(QueueError::Closed);
            }
            if inner.entries.contains_key(&id) {
                return Err(QueueError::Duplicate { id });
            }

            let entry = QueueEntry::new(message, timeout, await_ack);
            inner.deadlines.push(Deadline {
                at: entry.deadline,
                id: id.clone(),
            });
            inner.entries.insert(id.clone(), entry);
            inner.stats.enqueued += 1;
            inner.stats.peak_depth = inner.stats.peak_depth.max(inner.entries.len());
        }

        info!(%id, %priority, ?timeout, "Message queued");
        if expedited {
            debug!(%id, "PendingQueue::enqueue: expedited, waking dispatcher");
            self.expedite.notify_one();
        } else {
            self.reschedule.notify_one();
        }
        Ok(id)
    }

    /// Mark a sent message as delivered
    pub async fn acknowledge(&self, id: &MessageId) -> Result<DeliveryStatus, QueueError> {
        debug!(%id, "PendingQueue::acknowledge: called");
        let message = {
            let mut inner = self.inner.lock().await;
            let awaiting = inner
                .entries
                .get(id)
                .is_some_and(|e| e.phase == EntryPhase::AwaitingAck);
            let entry = match inner.entries.remove(id) {
                Some(entry) if awaiting => entry,
                Some(entry) => {
                    inner.entries.insert(id.clone(), entry);
                    return Err(QueueError::NotAwaitingAck { id: id.clone() });
                }
                None => return Err(QueueError::NotAwaitingAck { id: id.clone() }),
            };
            inner.stats.delivered += 1;
            let mut message = entry.message;
            message.transition(DeliveryStatus::Delivered);
            message
        };

        info!(%id, "Message acknowledged");
        self.history.record(&message).await;
        self.settled.notify_waiters();
        Ok(message.status())
    }

    /// Current status of a queued or recently settled message
    pub async fn status(&self, id: &MessageId) -> Option<DeliveryStatus> {
        let active = {
            let inner = self.inner.lock().await;
            inner.entries.get(id).map(|e| e.message.status())
        };
        active.or_else(|| self.history.find(id).map(|r| r.status))
    }

    /// Wait until `id` leaves the active set or starts awaiting acknowledgment
    pub async fn settled(&self, id: &MessageId) -> Option<DeliveryStatus> {
        loop {
            let notified = self.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let inner = self.inner.lock().await;
                match inner.entries.get(id) {
                    Some(entry) if entry.phase == EntryPhase::AwaitingAck => return Some(entry.message.status()),
                    Some(_) => {}
                    None => return self.history.find(id).map(|r| r.status),
                }
            }
            notified.await;
        }
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        let inner = self.inner.lock().await;
        let count = |phase: EntryPhase| inner.entries.values().filter(|e| e.phase == phase).count();
        QueueSnapshot {
            waiting: count(EntryPhase::Waiting),
            dispatching: count(EntryPhase::Dispatching),
            awaiting_ack: count(EntryPhase::AwaitingAck),
            stats: inner.stats.clone(),
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stop accepting messages and end the run loop
    pub async fn shutdown(&self) {
        debug!("PendingQueue::shutdown: called");
        self.inner.lock().await.closed = true;
        self.reschedule.notify_one();
    }

    /// Move every overdue entry not currently being dispatched to TIMEOUT
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let expired = {
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;
            let mut expired = Vec::new();

            while inner.deadlines.peek().is_some_and(|d| d.at <= now) {
                let Some(deadline) = inner.deadlines.pop() else {
                    break;
                };
                // in-flight dispatches enforce their own deadline
                let live = inner
                    .entries
                    .get(&deadline.id)
                    .is_some_and(|e| e.deadline == deadline.at && e.phase != EntryPhase::Dispatching);
                if !live {
                    continue;
                }
                if let Some(mut entry) = inner.entries.remove(&deadline.id) {
                    entry.message.mark_timeout();
                    inner.stats.timed_out += 1;
                    expired.push(entry.message);
                }
            }
            expired
        };

        for message in &expired {
            warn!(id = %message.id(), recipient = %message.recipient(), "Message timed out");
            self.orchestrator.metrics().record_timeout();
            self.history.record(message).await;
        }
        if !expired.is_empty() {
            self.settled.notify_waiters();
        }
        expired.len()
    }

    /// Sweep, dispatch every waiting entry and wait for the dispatches to finish
    pub async fn process_now(self: &Arc<Self>) -> usize {
        debug!("PendingQueue::process_now: called");
        let handles = self.start_pass().await;
        let count = handles.len();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Dispatch supervisor failed");
            }
        }
        count
    }

    /// Background loop; returns after [`PendingQueue::shutdown`]
    pub async fn run(self: Arc<Self>) {
        info!(tick = ?self.tick_interval, "Pending queue started");
        let mut next_tick = Instant::now();

        loop {
            if self.inner.lock().await.closed {
                break;
            }

            let now = Instant::now();
            if now >= next_tick {
                let started = self.start_pass().await.len();
                debug!(started, "PendingQueue::run: tick");
                next_tick = deadline_after(now, self.tick_interval);
            } else {
                self.sweep_expired().await;
            }

            let earliest = self.inner.lock().await.deadlines.peek().map(|d| d.at);
            let wake_at = earliest.map_or(next_tick, |at| at.min(next_tick));

            let wake = tokio::select! {
                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(wake_at)) => Wake::Timer,
                _ = self.expedite.notified() => Wake::Expedite,
                _ = self.reschedule.notified() => Wake::Reschedule,
            };

            match wake {
                Wake::Expedite => {
                    let started = self.start_pass().await.len();
                    debug!(started, "PendingQueue::run: expedited pass");
                }
                Wake::Timer | Wake::Reschedule => {}
            }
        }

        info!("Pending queue stopped");
    }

    /// Sweep, then spawn a dispatch task per waiting entry
    async fn start_pass(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        self.sweep_expired().await;

        let ready: Vec<(MessageId, Message, Duration)> = {
            let now = Instant::now();
            let mut inner = self.inner.lock().await;
            inner
                .entries
                .values_mut()
                .filter(|e| e.phase == EntryPhase::Waiting)
                .map(|e| {
                    e.phase = EntryPhase::Dispatching;
                    (e.message.id().clone(), e.message.clone(), e.remaining(now))
                })
                .collect()
        };

        ready
            .into_iter()
            .map(|(id, message, remaining)| {
                let queue = Arc::clone(self);
                tokio::spawn(async move { queue.dispatch(id, message, remaining).await })
            })
            .collect()
    }

    /// Deliver one message, bounded by its deadline and isolated in its own task
    async fn dispatch(&self, id: MessageId, mut message: Message, remaining: Duration) {
        debug!(%id, ?remaining, "PendingQueue::dispatch: called");

        let body = format_content(message.content(), &self.rules);
        let orchestrator = Arc::clone(&self.orchestrator);
        let mut attempt = message.clone();
        let task = tokio::spawn(async move {
            orchestrator.send(&mut attempt, &body).await;
            attempt
        });
        let abort = task.abort_handle();

        let settled = match tokio::time::timeout(remaining, task).await {
            Ok(Ok(sent)) => sent,
            Ok(Err(e)) => {
                error!(%id, error = %e, "Dispatch task failed");
                message.mark_failed(format!("dispatch task failed: {}", e));
                self.orchestrator.metrics().record(false);
                message
            }
            Err(_) => {
                abort.abort();
                warn!(%id, "Deadline passed during dispatch");
                message.mark_timeout();
                message
            }
        };

        self.settle(id, settled).await;
    }

    /// Record a dispatch outcome; sent messages awaiting acknowledgment stay tracked
    async fn settle(&self, id: MessageId, message: Message) {
        let status = message.status();
        debug!(%id, %status, "PendingQueue::settle: called");

        let finished = {
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;
            match status {
                DeliveryStatus::Sent => inner.stats.sent += 1,
                DeliveryStatus::Failed => inner.stats.failed += 1,
                DeliveryStatus::Timeout => inner.stats.timed_out += 1,
                _ => {}
            }

            let awaiting_ack = status == DeliveryStatus::Sent && inner.entries.get(&id).is_some_and(|e| e.await_ack);
            if awaiting_ack {
                if let Some(entry) = inner.entries.get_mut(&id) {
                    entry.message = message;
                    entry.phase = EntryPhase::AwaitingAck;
                    // the sweep may have dropped this deadline while dispatching
                    inner.deadlines.push(Deadline {
                        at: entry.deadline,
                        id: id.clone(),
                    });
                }
                None
            } else {
                inner.entries.remove(&id);
                Some(message)
            }
        };

        if status == DeliveryStatus::Timeout {
            self.orchestrator.metrics().record_timeout();
        }
        if let Some(message) = finished {
            self.history.record(&message).await;
        }
        self.settled.notify_waiters();
    }
}
