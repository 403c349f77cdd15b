//! Delivery history
//!
//! Every message that reaches a terminal or sent state leaves one record.
//! Records live in a bounded in-memory ring and, when configured, are also
//! appended to a JSONL file that survives restarts.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use eyre::Result;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::domain::{DeliveryMethod, DeliveryStatus, Message, MessageId, Priority};

/// Outcome of one message, as persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: MessageId,
    pub sender: String,
    pub recipient: String,
    pub priority: Priority,
    pub status: DeliveryStatus,
    pub method: Option<DeliveryMethod>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

impl HistoryRecord {
    pub fn from_message(message: &Message) -> Self {
        Self {
            id: message.id().clone(),
            sender: message.sender().to_string(),
            recipient: message.recipient().to_string(),
            priority: message.priority(),
            status: message.status(),
            method: message.delivery_method(),
            error: message.last_error().map(str::to_string),
            created_at: message.created_at(),
            recorded_at: Utc::now(),
        }
    }
}

/// Append-only JSONL file of history records
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        debug!(?path, "HistoryStore::new: called");
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record
    pub async fn append(&self, record: &HistoryRecord) -> Result<()> {
        debug!(id = %record.id, status = %record.status, "HistoryStore::append: called");
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }

        let line = serde_json::to_string(record)? + "\n";
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// All records in file order; unreadable lines are skipped
    pub async fn load(&self) -> Result<Vec<HistoryRecord>> {
        debug!(path = ?self.path, "HistoryStore::load: called");
        if !fs::try_exists(&self.path).await? {
            debug!("HistoryStore::load: history file does not exist");
            return Ok(vec![]);
        }

        let content = fs::read_to_string(&self.path).await?;
        let records: Vec<HistoryRecord> = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable history line");
                    None
                }
            })
            .collect();
        debug!(count = records.len(), "HistoryStore::load: returning records");
        Ok(records)
    }
}

/// Bounded in-memory history with optional persistence
pub struct MessageHistory {
    limit: usize,
    records: Mutex<VecDeque<HistoryRecord>>,
    store: Option<HistoryStore>,
}

impl MessageHistory {
    pub fn new(limit: usize) -> Self {
        debug!(limit, "MessageHistory::new: called");
        Self {
            limit: limit.max(1),
            records: Mutex::new(VecDeque::new()),
            store: None,
        }
    }

    /// Persist records to `store` and seed memory from what it already holds
    pub async fn with_store(limit: usize, store: HistoryStore) -> Result<Self> {
        debug!(limit, path = ?store.path(), "MessageHistory::with_store: called");
        let history = Self::new(limit);
        let existing = store.load().await?;
        {
            let mut records = history.records.lock().unwrap_or_else(PoisonError::into_inner);
            let skip = existing.len().saturating_sub(history.limit);
            records.extend(existing.into_iter().skip(skip));
        }
        Ok(Self {
            store: Some(store),
            ..history
        })
    }

    /// Record the current state of `message`
    pub async fn record(&self, message: &Message) {
        let record = HistoryRecord::from_message(message);
        debug!(id = %record.id, status = %record.status, "MessageHistory::record: called");

        {
            let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
            records.push_back(record.clone());
            while records.len() > self.limit {
                records.pop_front();
            }
        }

        // memory stays authoritative when the file cannot be written
        if let Some(store) = &self.store
            && let Err(e) = store.append(&record).await
        {
            warn!(id = %record.id, error = %e, "Failed to persist history record");
        }
    }

    /// Up to `n` most recent records, newest first
    pub fn recent(&self, n: usize) -> Vec<HistoryRecord> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.iter().rev().take(n).cloned().collect()
    }

    /// Latest record for a message ID
    pub fn find(&self, id: &MessageId) -> Option<HistoryRecord> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.iter().rev().find(|r| &r.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
