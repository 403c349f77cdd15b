//! Courier - captain-to-agent message delivery
//!
//! Courier delivers short text messages from a coordinating "captain" to a
//! roster of agent sessions. Each message is cleaned up, checked against
//! spam rules and then delivered by the first method that works.
//!
//! # Core Concepts
//!
//! - **Simulated input first**: click the agent's input field, paste, submit
//! - **File drop fallback**: a timestamped file in the agent's inbox
//! - **One pointer**: simulated-input sequences never interleave
//! - **Deadlines**: queued messages that cannot go out in time end as TIMEOUT
//!
//! # Modules
//!
//! - [`domain`] - Message, priority, tags, delivery status
//! - [`registry`] - Agent input coordinates with a source fallback chain
//! - [`delivery`] - Delivery providers and the automation seam
//! - [`filter`] - Content formatting and spam suppression
//! - [`orchestrator`] - Ordered provider fallback under the pointer lock
//! - [`broadcast`] - Roster fan-out
//! - [`queue`] - Timeout-aware pending-message queue
//! - [`service`] - Caller-facing messaging API
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod broadcast;
pub mod cli;
pub mod config;
pub mod delivery;
pub mod domain;
pub mod filter;
pub mod history;
pub mod metrics;
pub mod orchestrator;
pub mod queue;
pub mod registry;
pub mod service;

// Test doubles; integration tests enable them through the `testing` feature
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types
pub use broadcast::BroadcastCoordinator;
pub use config::{AmbiguousSubmitPolicy, Config};
pub use delivery::{
    BackendError, DeliveryError, DeliveryProvider, DeliveryTarget, FileDropProvider, InputBackend,
    SimulatedInputProvider, UnavailableBackend, XdotoolBackend,
};
pub use domain::{DeliveryMethod, DeliveryStatus, Message, MessageId, MessageType, Priority, Tag};
pub use filter::{FilterVerdict, FormatRules, SpamFilter, format_content};
pub use history::{HistoryRecord, HistoryStore, MessageHistory};
pub use metrics::{DeliveryMetrics, MetricsSnapshot};
pub use orchestrator::FallbackOrchestrator;
pub use queue::{PendingQueue, QueueError, QueueSnapshot, QueueStats};
pub use registry::{AgentCoordinates, CoordinateRegistry, CoordinateSource};
pub use service::{MessagingService, SendOutcome, SendRequest};
