//! MessagingService - the caller-facing messaging API
//!
//! Owns the whole pipeline (filter, orchestrator, providers, registry,
//! metrics, history) and is constructed explicitly by the caller. Requests
//! in any calling convention are resolved into a [`SendRequest`] once, at
//! the boundary.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use eyre::{Context, Result};
use tracing::{debug, info};

use crate::broadcast::BroadcastCoordinator;
use crate::config::Config;
use crate::delivery::{FileDropProvider, InputBackend, SimulatedInputProvider, UnavailableBackend, XdotoolBackend};
use crate::domain::{Message, Priority, Tag};
use crate::filter::{FilterVerdict, FormatRules, SpamFilter};
use crate::history::{HistoryStore, MessageHistory};
use crate::metrics::{DeliveryMetrics, MetricsSnapshot};
use crate::orchestrator::FallbackOrchestrator;
use crate::queue::PendingQueue;
use crate::registry::{CoordinateRegistry, CoordinateSource};

/// Sender used when the caller does not name one
pub const DEFAULT_SENDER: &str = "Captain";

/// Sender used for broadcasts when the caller does not name one
pub const DEFAULT_BROADCAST_SENDER: &str = "System";

/// A send request, resolved from whatever the caller had in hand
#[derive(Debug, Clone)]
pub enum SendRequest {
    /// One recipient, content and routing fields
    Direct {
        recipient: String,
        content: String,
        sender: String,
        priority: Priority,
        tag: Tag,
    },
    /// Every roster agent except `exclude`
    Broadcast {
        content: String,
        sender: String,
        priority: Priority,
        exclude: BTreeSet<String>,
    },
    /// A message the caller already built
    Prebuilt(Message),
}

impl SendRequest {
    /// Direct message from the captain at normal priority
    pub fn direct(recipient: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Direct {
            recipient: recipient.into(),
            content: content.into(),
            sender: DEFAULT_SENDER.to_string(),
            priority: Priority::default(),
            tag: Tag::default(),
        }
    }

    /// Broadcast to the whole roster
    pub fn broadcast(content: impl Into<String>, sender: impl Into<String>) -> Self {
        Self::Broadcast {
            content: content.into(),
            sender: sender.into(),
            priority: Priority::default(),
            exclude: BTreeSet::new(),
        }
    }

    pub fn prebuilt(message: Message) -> Self {
        Self::Prebuilt(message)
    }

    pub fn with_priority(mut self, value: Priority) -> Self {
        match &mut self {
            Self::Direct { priority, .. } | Self::Broadcast { priority, .. } => *priority = value,
            Self::Prebuilt(_) => debug!("SendRequest::with_priority: prebuilt message keeps its own priority"),
        }
        self
    }

    pub fn with_tag(mut self, value: Tag) -> Self {
        if let Self::Direct { tag, .. } = &mut self {
            *tag = value;
        }
        self
    }

    pub fn with_sender(mut self, value: impl Into<String>) -> Self {
        match &mut self {
            Self::Direct { sender, .. } | Self::Broadcast { sender, .. } => *sender = value.into(),
            Self::Prebuilt(_) => {}
        }
        self
    }

    /// Leave these agents out of a broadcast
    pub fn excluding<I, S>(mut self, agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Self::Broadcast { exclude, .. } = &mut self {
            exclude.extend(agents.into_iter().map(Into::into));
        }
        self
    }
}

/// Result of a [`SendRequest`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Single(bool),
    Broadcast(BTreeMap<String, bool>),
}

impl SendOutcome {
    /// Every recipient succeeded (an empty broadcast did not)
    pub fn all_succeeded(&self) -> bool {
        match self {
            Self::Single(ok) => *ok,
            Self::Broadcast(results) => !results.is_empty() && results.values().all(|ok| *ok),
        }
    }
}

/// Filter one message, deliver it and record the outcome
pub(crate) async fn deliver_filtered(
    filter: &SpamFilter,
    orchestrator: &FallbackOrchestrator,
    history: &MessageHistory,
    message: &mut Message,
) -> bool {
    match filter.evaluate(message.content(), message.recipient()) {
        FilterVerdict::Send(body) => {
            let delivered = orchestrator.send(message, &body).await;
            history.record(message).await;
            delivered
        }
        verdict => {
            info!(id = %message.id(), recipient = %message.recipient(), ?verdict, "Message suppressed");
            message.note_error("suppressed by filter");
            orchestrator.metrics().record_suppressed();
            false
        }
    }
}

/// Entry point for captain-to-agent messaging
pub struct MessagingService {
    config: Config,
    registry: Arc<CoordinateRegistry>,
    filter: Arc<SpamFilter>,
    orchestrator: Arc<FallbackOrchestrator>,
    broadcaster: BroadcastCoordinator,
    metrics: Arc<DeliveryMetrics>,
    history: Arc<MessageHistory>,
}

impl MessagingService {
    /// Build from config with the platform automation backend
    pub async fn from_config(config: Config) -> Result<Self> {
        let backend: Arc<dyn InputBackend> = if config.input.enabled {
            Arc::new(XdotoolBackend::new(config.input.type_delay_ms))
        } else {
            Arc::new(UnavailableBackend)
        };
        Self::with_backend(config, backend).await
    }

    /// Build from config with a caller-supplied automation backend
    pub async fn with_backend(config: Config, backend: Arc<dyn InputBackend>) -> Result<Self> {
        debug!(backend = backend.name(), "MessagingService::with_backend: called");
        let sources = CoordinateSource::default_chain(config.coordinates.primary.clone(), config.coordinates.legacy.clone());
        let registry = Arc::new(CoordinateRegistry::new(sources));
        Self::assemble(config, backend, registry).await
    }

    /// Build around an existing registry
    pub async fn assemble(
        config: Config,
        backend: Arc<dyn InputBackend>,
        registry: Arc<CoordinateRegistry>,
    ) -> Result<Self> {
        debug!(agents = registry.len(), "MessagingService::assemble: called");
        let metrics = Arc::new(DeliveryMetrics::new());
        let history = match &config.history.file {
            Some(path) => MessageHistory::with_store(config.queue.history_limit, HistoryStore::new(path))
                .await
                .context(format!("Failed to open history file {}", path.display()))?,
            None => MessageHistory::new(config.queue.history_limit),
        };
        let history = Arc::new(history);

        let input = Arc::new(SimulatedInputProvider::new(backend, registry.clone(), config.input.clone()));
        let file_drop = Arc::new(FileDropProvider::new(config.file_drop.workspace_root.clone()));
        let orchestrator = Arc::new(FallbackOrchestrator::new(
            registry.clone(),
            input,
            file_drop,
            config.input.ambiguous_submit,
            metrics.clone(),
        ));
        let filter = Arc::new(SpamFilter::new(&config.filter));
        let broadcaster = BroadcastCoordinator::new(
            config.roster.agents.clone(),
            filter.clone(),
            orchestrator.clone(),
            history.clone(),
        );

        info!(agents = registry.len(), roster = config.roster.agents.len(), "Messaging service ready");
        Ok(Self {
            config,
            registry,
            filter,
            orchestrator,
            broadcaster,
            metrics,
            history,
        })
    }

    /// Send `content` to one agent
    pub async fn send(&self, recipient: &str, content: &str, priority: Priority, tag: Tag) -> bool {
        debug!(%recipient, %priority, %tag, "MessagingService::send: called");
        let mut message = Message::new(DEFAULT_SENDER, recipient, content)
            .with_priority(priority)
            .with_tag(tag);
        self.deliver(&mut message).await
    }

    /// Send to every roster agent
    pub async fn broadcast(&self, content: &str, sender: &str) -> BTreeMap<String, bool> {
        self.broadcast_excluding(content, sender, &BTreeSet::new()).await
    }

    pub async fn broadcast_excluding(
        &self,
        content: &str,
        sender: &str,
        exclude: &BTreeSet<String>,
    ) -> BTreeMap<String, bool> {
        debug!(%sender, excluded = exclude.len(), "MessagingService::broadcast_excluding: called");
        self.broadcaster
            .broadcast(content, sender, Priority::default(), exclude)
            .await
    }

    /// Resolve and execute a send request
    pub async fn submit(&self, request: SendRequest) -> SendOutcome {
        match request {
            SendRequest::Direct {
                recipient,
                content,
                sender,
                priority,
                tag,
            } => {
                let mut message = Message::new(sender, recipient, content)
                    .with_priority(priority)
                    .with_tag(tag);
                SendOutcome::Single(self.deliver(&mut message).await)
            }
            SendRequest::Broadcast {
                content,
                sender,
                priority,
                exclude,
            } => SendOutcome::Broadcast(self.broadcaster.broadcast(&content, &sender, priority, &exclude).await),
            SendRequest::Prebuilt(mut message) => SendOutcome::Single(self.deliver(&mut message).await),
        }
    }

    /// `(x, y, monitor)` for an agent with coordinates
    pub fn get_coordinates(&self, recipient: &str) -> Option<(u32, u32, u32)> {
        self.registry.get(recipient).map(|c| c.as_tuple())
    }

    /// Roster agents, or the agents with coordinates when no roster is configured
    pub fn list_agents(&self) -> Vec<String> {
        if self.config.roster.agents.is_empty() {
            self.registry.list_agents()
        } else {
            self.config.roster.agents.clone()
        }
    }

    /// Re-read the coordinate sources
    pub fn reload_coordinates(&self) -> usize {
        self.registry.reload()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn history(&self) -> &Arc<MessageHistory> {
        &self.history
    }

    pub fn registry(&self) -> &Arc<CoordinateRegistry> {
        &self.registry
    }

    pub fn filter(&self) -> &Arc<SpamFilter> {
        &self.filter
    }

    /// A pending-message queue sharing this service's delivery chain and history
    pub fn pending_queue(&self) -> Arc<PendingQueue> {
        Arc::new(PendingQueue::new(
            self.orchestrator.clone(),
            FormatRules::from(&self.config.filter),
            &self.config.queue,
            self.history.clone(),
        ))
    }

    async fn deliver(&self, message: &mut Message) -> bool {
        deliver_filtered(&self.filter, &self.orchestrator, &self.history, message).await
    }
}
