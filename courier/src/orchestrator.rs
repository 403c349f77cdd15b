//! FallbackOrchestrator - ordered delivery chain for a single message
//!
//! Plans the targets for a message (simulated input when the recipient has
//! coordinates and automation is available, then file-drop) and tries them
//! strictly in order. The pointer is process-global, so a call whose plan
//! includes simulated input holds the pointer lock for the whole chain.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::AmbiguousSubmitPolicy;
use crate::delivery::{DeliveryError, DeliveryProvider, DeliveryTarget, FileDropProvider};
use crate::domain::{DeliveryMethod, DeliveryStatus, Message};
use crate::metrics::DeliveryMetrics;
use crate::registry::CoordinateRegistry;

/// Tries delivery providers in priority order
pub struct FallbackOrchestrator {
    registry: Arc<CoordinateRegistry>,
    input: Arc<dyn DeliveryProvider>,
    file_drop: Arc<FileDropProvider>,
    policy: AmbiguousSubmitPolicy,
    metrics: Arc<DeliveryMetrics>,
    pointer: Mutex<()>,
}

impl FallbackOrchestrator {
    pub fn new(
        registry: Arc<CoordinateRegistry>,
        input: Arc<dyn DeliveryProvider>,
        file_drop: Arc<FileDropProvider>,
        policy: AmbiguousSubmitPolicy,
        metrics: Arc<DeliveryMetrics>,
    ) -> Self {
        debug!(?policy, "FallbackOrchestrator::new: called");
        Self {
            registry,
            input,
            file_drop,
            policy,
            metrics,
            pointer: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<CoordinateRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<DeliveryMetrics> {
        &self.metrics
    }

    /// Ordered delivery targets for `message`
    pub async fn plan(&self, message: &Message) -> Vec<DeliveryTarget> {
        debug!(id = %message.id(), recipient = %message.recipient(), "FallbackOrchestrator::plan: called");
        let mut targets = Vec::with_capacity(2);

        if let Some(coordinates) = self.registry.get(message.recipient()) {
            if self.input.is_available().await {
                targets.push(DeliveryTarget::SimulatedInput(coordinates));
            } else {
                debug!(recipient = %message.recipient(), "FallbackOrchestrator::plan: simulated input unavailable");
            }
        }

        match self.file_drop.inbox_for(message.recipient()) {
            Ok(inbox) => targets.push(DeliveryTarget::FileDrop { inbox }),
            Err(e) => warn!(recipient = %message.recipient(), error = %e, "No file-drop target"),
        }

        targets
    }

    /// Deliver `body` (the formatted form of `message`); sets the message
    /// status and records the attempt in metrics
    pub async fn send(&self, message: &mut Message, body: &str) -> bool {
        debug!(id = %message.id(), recipient = %message.recipient(), "FallbackOrchestrator::send: called");

        if message.status() != DeliveryStatus::Pending {
            warn!(id = %message.id(), status = %message.status(), "Refusing to send a message that is not pending");
            return false;
        }

        if !message.has_recipient() {
            message.mark_failed("empty recipient");
            self.metrics.record(false);
            return false;
        }

        let targets = self.plan(message).await;
        if targets.is_empty() {
            message.mark_failed("no delivery target");
            self.metrics.record(false);
            return false;
        }

        let _pointer = if targets.iter().any(|t| t.method() == DeliveryMethod::SimulatedInput) {
            debug!(id = %message.id(), "FallbackOrchestrator::send: waiting for pointer");
            Some(self.pointer.lock().await)
        } else {
            None
        };

        let mut last_error = None;
        for target in &targets {
            let provider = self.provider_for(target);
            match provider.deliver(message, body, target).await {
                Ok(()) => return self.succeeded(message, target.method()),
                Err(DeliveryError::AmbiguousSubmit { reason }) if self.policy == AmbiguousSubmitPolicy::AtMostOnce => {
                    warn!(id = %message.id(), %reason, "Submit outcome unknown, assuming delivered");
                    message.note_error(format!("ambiguous submit: {}", reason));
                    return self.succeeded(message, target.method());
                }
                Err(e) if e.is_fatal_for_message() => {
                    warn!(id = %message.id(), error = %e, "Delivery impossible for this message");
                    last_error = Some(e.to_string());
                    break;
                }
                Err(e) => {
                    warn!(id = %message.id(), method = %target.method(), error = %e, "Delivery attempt failed, falling back");
                    message.note_error(e.to_string());
                    last_error = Some(e.to_string());
                }
            }
        }

        let reason = last_error.unwrap_or_else(|| "all providers failed".to_string());
        warn!(id = %message.id(), recipient = %message.recipient(), %reason, "Message delivery failed");
        message.mark_failed(reason);
        self.metrics.record(false);
        false
    }

    fn provider_for(&self, target: &DeliveryTarget) -> &dyn DeliveryProvider {
        match target {
            DeliveryTarget::SimulatedInput(_) => &*self.input,
            DeliveryTarget::FileDrop { .. } => &*self.file_drop,
        }
    }

    fn succeeded(&self, message: &mut Message, method: DeliveryMethod) -> bool {
        message.mark_sent(method);
        self.metrics.record(true);
        self.metrics.record_method(method);
        info!(id = %message.id(), recipient = %message.recipient(), %method, "Message sent");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InputConfig;
    use crate::delivery::SimulatedInputProvider;
    use crate::registry::AgentCoordinates;
    use crate::testing::{BackendCall, RecordingBackend};
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        backend: Arc<RecordingBackend>,
        orchestrator: FallbackOrchestrator,
    }

    fn fixture(backend: RecordingBackend, policy: AmbiguousSubmitPolicy, step_delay_ms: u64) -> Fixture {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(backend);
        let registry = Arc::new(CoordinateRegistry::from_entries(vec![
            AgentCoordinates::new("Agent-1", 100, 200),
            AgentCoordinates::new("Agent-4", 400, 200),
        ]));
        let config = InputConfig {
            backoff_ms: 1,
            step_delay_ms,
            command_timeout_ms: 500,
            ..Default::default()
        };
        let input = Arc::new(SimulatedInputProvider::new(backend.clone(), registry.clone(), config));
        let orchestrator = FallbackOrchestrator::new(
            registry,
            input,
            Arc::new(FileDropProvider::new(dir.path())),
            policy,
            Arc::new(DeliveryMetrics::new()),
        );
        Fixture {
            dir,
            backend,
            orchestrator,
        }
    }

    fn inbox_files(dir: &TempDir, agent: &str) -> Vec<std::path::PathBuf> {
        let inbox = dir.path().join("agent_workspaces").join(agent).join("inbox");
        match std::fs::read_dir(inbox) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => vec![],
        }
    }

    #[tokio::test]
    async fn test_plan_orders_input_first() {
        let f = fixture(RecordingBackend::new(), AmbiguousSubmitPolicy::AtLeastOnce, 0);

        let targets = f.orchestrator.plan(&Message::new("Captain", "Agent-1", "x")).await;
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].method(), DeliveryMethod::SimulatedInput);
        assert_eq!(targets[1].method(), DeliveryMethod::FileDrop);

        let targets = f.orchestrator.plan(&Message::new("Captain", "Agent-2", "x")).await;
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].method(), DeliveryMethod::FileDrop);
    }

    #[tokio::test]
    async fn test_plan_skips_unavailable_input() {
        let f = fixture(RecordingBackend::new().unavailable(), AmbiguousSubmitPolicy::AtLeastOnce, 0);
        let targets = f.orchestrator.plan(&Message::new("Captain", "Agent-1", "x")).await;
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].method(), DeliveryMethod::FileDrop);
    }

    #[tokio::test]
    async fn test_simulated_input_success_writes_no_file() {
        let f = fixture(RecordingBackend::new(), AmbiguousSubmitPolicy::AtLeastOnce, 0);
        let mut message = Message::new("Captain", "Agent-1", "hello");

        assert!(f.orchestrator.send(&mut message, "hello").await);
        assert_eq!(message.status(), DeliveryStatus::Sent);
        assert_eq!(message.delivery_method(), Some(DeliveryMethod::SimulatedInput));
        assert_eq!(f.backend.typed(), vec!["hello"]);
        assert!(inbox_files(&f.dir, "Agent-1").is_empty());
    }

    #[tokio::test]
    async fn test_input_failure_falls_back_to_file_drop() {
        let f = fixture(RecordingBackend::new().fail_clicks(10), AmbiguousSubmitPolicy::AtLeastOnce, 0);
        let mut message = Message::new("Captain", "Agent-1", "original ==== content");

        assert!(f.orchestrator.send(&mut message, "formatted").await);
        assert_eq!(message.delivery_method(), Some(DeliveryMethod::FileDrop));

        let files = inbox_files(&f.dir, "Agent-1");
        assert_eq!(files.len(), 1);
        let contents = std::fs::read_to_string(&files[0]).unwrap();
        assert!(contents.contains("original ==== content"));

        let snapshot = f.orchestrator.metrics().snapshot();
        assert_eq!(snapshot.total, 1);
        assert_eq!(snapshot.successful, 1);
        assert_eq!(snapshot.by_method["file_drop"], 1);
    }

    #[tokio::test]
    async fn test_no_coordinates_never_touches_input() {
        let f = fixture(RecordingBackend::new(), AmbiguousSubmitPolicy::AtLeastOnce, 0);
        let mut message = Message::new("Captain", "Agent-2", "hello");

        assert!(f.orchestrator.send(&mut message, "hello").await);
        assert!(f.backend.calls().is_empty());
        assert_eq!(inbox_files(&f.dir, "Agent-2").len(), 1);
    }

    #[tokio::test]
    async fn test_ambiguous_submit_at_least_once_falls_back() {
        let f = fixture(RecordingBackend::new().fail_submit("Return"), AmbiguousSubmitPolicy::AtLeastOnce, 0);
        let mut message = Message::new("Captain", "Agent-1", "hello");

        assert!(f.orchestrator.send(&mut message, "hello").await);
        assert_eq!(message.delivery_method(), Some(DeliveryMethod::FileDrop));
        assert_eq!(f.backend.sequences_started(), 1);
        assert_eq!(inbox_files(&f.dir, "Agent-1").len(), 1);
    }

    #[tokio::test]
    async fn test_ambiguous_submit_at_most_once_stops() {
        let f = fixture(RecordingBackend::new().fail_submit("Return"), AmbiguousSubmitPolicy::AtMostOnce, 0);
        let mut message = Message::new("Captain", "Agent-1", "hello");

        assert!(f.orchestrator.send(&mut message, "hello").await);
        assert_eq!(message.delivery_method(), Some(DeliveryMethod::SimulatedInput));
        assert!(message.last_error().unwrap().contains("ambiguous"));
        assert!(inbox_files(&f.dir, "Agent-1").is_empty());
    }

    #[tokio::test]
    async fn test_invalid_recipient_fails() {
        let f = fixture(RecordingBackend::new(), AmbiguousSubmitPolicy::AtLeastOnce, 0);
        let mut message = Message::new("Captain", "../etc", "hello");

        assert!(!f.orchestrator.send(&mut message, "hello").await);
        assert_eq!(message.status(), DeliveryStatus::Failed);
        assert_eq!(f.orchestrator.metrics().snapshot().failed, 1);
    }

    #[tokio::test]
    async fn test_non_pending_message_refused() {
        let f = fixture(RecordingBackend::new(), AmbiguousSubmitPolicy::AtLeastOnce, 0);
        let mut message = Message::new("Captain", "Agent-1", "hello");
        message.mark_timeout();

        assert!(!f.orchestrator.send(&mut message, "hello").await);
        assert_eq!(message.status(), DeliveryStatus::Timeout);
        assert!(f.backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_sends_never_interleave_pointer_use() {
        let f = fixture(RecordingBackend::new(), AmbiguousSubmitPolicy::AtLeastOnce, 5);
        let mut first = Message::new("Captain", "Agent-1", "one");
        let mut second = Message::new("Captain", "Agent-4", "two");

        let (a, b) = tokio::join!(
            f.orchestrator.send(&mut first, "one"),
            f.orchestrator.send(&mut second, "two")
        );
        assert!(a && b);

        let calls = f.backend.calls();
        assert_eq!(calls.len(), 12);
        for sequence in calls.chunks(6) {
            assert!(matches!(sequence[0], BackendCall::Move { .. }));
            assert_eq!(sequence[5], BackendCall::Key("Return".to_string()));
        }
    }
}
