//! Message domain type
//!
//! A message is created once per recipient and carries its own delivery
//! status. Content is fixed at construction; formatting for a particular
//! channel produces a separate string and never touches the stored content.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::id::MessageId;
use super::priority::Priority;

/// Kind of message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Text,
    Broadcast,
    System,
    AgentToAgent,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Broadcast => write!(f, "broadcast"),
            Self::System => write!(f, "system"),
            Self::AgentToAgent => write!(f, "agent_to_agent"),
        }
    }
}

/// Topic tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tag {
    #[default]
    General,
    Coordination,
    System,
    Task,
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::General => write!(f, "general"),
            Self::Coordination => write!(f, "coordination"),
            Self::System => write!(f, "system"),
            Self::Task => write!(f, "task"),
        }
    }
}

impl std::str::FromStr for Tag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "general" => Ok(Self::General),
            "coordination" => Ok(Self::Coordination),
            "system" => Ok(Self::System),
            "task" => Ok(Self::Task),
            _ => Err(format!("Unknown tag: {}", s)),
        }
    }
}

/// Delivery status of a message
///
/// `Pending` is initial. `Failed`, `Timeout` and `Delivered` are terminal.
/// `Sent` is terminal for fire-and-forget messages; messages awaiting an
/// acknowledgment may still move from `Sent` to `Delivered` or `Timeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    #[default]
    Pending,
    Sent,
    Delivered,
    Failed,
    Timeout,
}

impl DeliveryStatus {
    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(&self, next: DeliveryStatus) -> bool {
        use DeliveryStatus::*;
        matches!(
            (self, next),
            (Pending, Sent) | (Pending, Failed) | (Pending, Timeout) | (Sent, Delivered) | (Sent, Timeout)
        )
    }

    /// No further transitions are possible from this status
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Delivered | Self::Failed | Self::Timeout)
    }

    /// Counts as a successful delivery attempt
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Sent | Self::Delivered)
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Sent => write!(f, "sent"),
            Self::Delivered => write!(f, "delivered"),
            Self::Failed => write!(f, "failed"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Channel a message was delivered through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    SimulatedInput,
    FileDrop,
}

impl std::fmt::Display for DeliveryMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SimulatedInput => write!(f, "simulated_input"),
            Self::FileDrop => write!(f, "file_drop"),
        }
    }
}

/// A single captain-to-agent message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    content: String,
    sender: String,
    recipient: String,
    message_type: MessageType,
    priority: Priority,
    tags: BTreeSet<Tag>,
    created_at: DateTime<Utc>,
    status: DeliveryStatus,
    delivery_method: Option<DeliveryMethod>,
    /// Last error seen while delivering (if any)
    #[serde(default)]
    last_error: Option<String>,
}

impl Message {
    /// Create a new pending text message with a generated ID
    pub fn new(sender: impl Into<String>, recipient: impl Into<String>, content: impl Into<String>) -> Self {
        Self::with_id(MessageId::generate(), sender, recipient, content)
    }

    /// Create with a specific ID (for testing or recovery)
    pub fn with_id(
        id: MessageId,
        sender: impl Into<String>,
        recipient: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut tags = BTreeSet::new();
        tags.insert(Tag::General);
        Self {
            id,
            content: content.into(),
            sender: sender.into(),
            recipient: recipient.into(),
            message_type: MessageType::Text,
            priority: Priority::Normal,
            tags,
            created_at: Utc::now(),
            status: DeliveryStatus::Pending,
            delivery_method: None,
            last_error: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    /// Replace the tag set with a single tag
    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tags.clear();
        self.tags.insert(tag);
        self
    }

    /// Add a tag to the existing set
    pub fn add_tag(mut self, tag: Tag) -> Self {
        self.tags.insert(tag);
        self
    }

    pub fn id(&self) -> &MessageId {
        &self.id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn tags(&self) -> &BTreeSet<Tag> {
        &self.tags
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> DeliveryStatus {
        self.status
    }

    pub fn delivery_method(&self) -> Option<DeliveryMethod> {
        self.delivery_method
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Recipient is non-empty after trimming
    pub fn has_recipient(&self) -> bool {
        !self.recipient.trim().is_empty()
    }

    /// Move to `next` if the transition is legal; returns whether it happened
    pub fn transition(&mut self, next: DeliveryStatus) -> bool {
        if self.status.can_transition_to(next) {
            debug!(id = %self.id, from = %self.status, to = %next, "Message::transition: applied");
            self.status = next;
            true
        } else {
            debug!(id = %self.id, from = %self.status, to = %next, "Message::transition: rejected");
            false
        }
    }

    /// Mark sent through `method`
    pub fn mark_sent(&mut self, method: DeliveryMethod) -> bool {
        let moved = self.transition(DeliveryStatus::Sent);
        if moved {
            self.delivery_method = Some(method);
            self.last_error = None;
        }
        moved
    }

    /// Mark failed, keeping the reason for history
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> bool {
        let moved = self.transition(DeliveryStatus::Failed);
        if moved {
            self.last_error = Some(reason.into());
        }
        moved
    }

    /// Mark timed out
    pub fn mark_timeout(&mut self) -> bool {
        let moved = self.transition(DeliveryStatus::Timeout);
        if moved {
            self.last_error = Some("response deadline elapsed".to_string());
        }
        moved
    }

    /// Record the error from a provider attempt without changing status
    pub fn note_error(&mut self, reason: impl Into<String>) {
        self.last_error = Some(reason.into());
    }
}
