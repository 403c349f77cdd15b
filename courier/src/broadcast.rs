//! BroadcastCoordinator - fan one message out to the roster
//!
//! One message per recipient, delivered sequentially in roster order. A
//! failure for one recipient never stops the others; the result map makes
//! partial success explicit.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use tracing::{debug, info};

use crate::domain::{Message, MessageType, Priority};
use crate::filter::SpamFilter;
use crate::history::MessageHistory;
use crate::orchestrator::FallbackOrchestrator;
use crate::service::deliver_filtered;

/// Fans a message out to all agents except the excluded ones
pub struct BroadcastCoordinator {
    roster: Vec<String>,
    filter: Arc<SpamFilter>,
    orchestrator: Arc<FallbackOrchestrator>,
    history: Arc<MessageHistory>,
}

impl BroadcastCoordinator {
    /// `roster` fixes the recipient order; when empty the registry's agents are used
    pub fn new(
        roster: Vec<String>,
        filter: Arc<SpamFilter>,
        orchestrator: Arc<FallbackOrchestrator>,
        history: Arc<MessageHistory>,
    ) -> Self {
        debug!(roster_len = roster.len(), "BroadcastCoordinator::new: called");
        Self {
            roster,
            filter,
            orchestrator,
            history,
        }
    }

    /// Recipients in delivery order, duplicates and excluded agents removed
    pub fn recipients(&self, exclude: &BTreeSet<String>) -> Vec<String> {
        let source = if self.roster.is_empty() {
            self.orchestrator.registry().list_agents()
        } else {
            self.roster.clone()
        };

        let mut seen = HashSet::new();
        source
            .into_iter()
            .filter(|agent| !agent.trim().is_empty())
            .filter(|agent| !exclude.contains(agent))
            .filter(|agent| seen.insert(agent.clone()))
            .collect()
    }

    /// Deliver `content` from `sender` to every recipient; one entry per recipient
    pub async fn broadcast(
        &self,
        content: &str,
        sender: &str,
        priority: Priority,
        exclude: &BTreeSet<String>,
    ) -> BTreeMap<String, bool> {
        let recipients = self.recipients(exclude);
        debug!(%sender, count = recipients.len(), "BroadcastCoordinator::broadcast: called");

        let mut results = BTreeMap::new();
        for agent in recipients {
            let mut message = Message::new(sender, agent.as_str(), content)
                .with_type(MessageType::Broadcast)
                .with_priority(priority);
            let delivered = deliver_filtered(&self.filter, &self.orchestrator, &self.history, &mut message).await;
            debug!(%agent, delivered, "BroadcastCoordinator::broadcast: recipient done");
            results.insert(agent, delivered);
        }

        let succeeded = results.values().filter(|ok| **ok).count();
        info!(%sender, total = results.len(), succeeded, "Broadcast complete");
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AmbiguousSubmitPolicy, FilterConfig};
    use crate::registry::{AgentCoordinates, CoordinateRegistry};
    use crate::testing::{self, RecordingBackend};
    use tempfile::TempDir;

    fn coordinator(roster: Vec<String>, registry: CoordinateRegistry, dir: &TempDir) -> BroadcastCoordinator {
        let orchestrator = testing::orchestrator(
            Arc::new(RecordingBackend::new()),
            Arc::new(registry),
            dir.path(),
            AmbiguousSubmitPolicy::AtLeastOnce,
        );
        BroadcastCoordinator::new(
            roster,
            Arc::new(SpamFilter::new(&FilterConfig::default())),
            Arc::new(orchestrator),
            Arc::new(MessageHistory::new(50)),
        )
    }

    fn roster(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_recipients_exclude_and_dedupe() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(
            roster(&["Agent-1", "Agent-2", "Agent-1", "", "Agent-3"]),
            CoordinateRegistry::empty(),
            &dir,
        );
        let exclude = BTreeSet::from(["Agent-2".to_string()]);
        assert_eq!(coordinator.recipients(&exclude), roster(&["Agent-1", "Agent-3"]));
    }

    #[test]
    fn test_empty_roster_uses_registry() {
        let dir = TempDir::new().unwrap();
        let registry = CoordinateRegistry::from_entries(vec![
            AgentCoordinates::new("Agent-10", 1, 1),
            AgentCoordinates::new("Agent-2", 1, 1),
        ]);
        let coordinator = coordinator(Vec::new(), registry, &dir);
        assert_eq!(coordinator.recipients(&BTreeSet::new()), roster(&["Agent-2", "Agent-10"]));
    }

    #[tokio::test]
    async fn test_partial_failure_is_explicit() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(roster(&["Agent-1", "../bad", "Agent-3"]), CoordinateRegistry::empty(), &dir);

        let results = coordinator
            .broadcast("status check", "Captain", Priority::Normal, &BTreeSet::new())
            .await;

        assert_eq!(results.len(), 3);
        assert!(results["Agent-1"]);
        assert!(!results["../bad"]);
        assert!(results["Agent-3"]);
    }

    #[tokio::test]
    async fn test_suppressed_recipient_reports_false() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(roster(&["Agent-1", "Agent-2"]), CoordinateRegistry::empty(), &dir);
        for _ in 0..3 {
            coordinator.filter.format_and_guard("ping", "Agent-2");
        }

        let results = coordinator
            .broadcast("ping", "Captain", Priority::Normal, &BTreeSet::new())
            .await;
        assert!(results["Agent-1"]);
        assert!(!results["Agent-2"]);
        assert_eq!(coordinator.orchestrator.metrics().snapshot().suppressed, 1);
    }
}
