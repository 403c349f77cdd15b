//! CoordinateRegistry - per-agent input targets

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::source::{CoordinateSource, RegistryError};

/// Screen location of an agent's chat input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCoordinates {
    pub agent_id: String,
    pub x: u32,
    pub y: u32,
    /// Monitor index, 0 is the primary display
    #[serde(default)]
    pub monitor: u32,
}

impl AgentCoordinates {
    pub fn new(agent_id: impl Into<String>, x: u32, y: u32) -> Self {
        Self {
            agent_id: agent_id.into(),
            x,
            y,
            monitor: 0,
        }
    }

    pub fn on_monitor(mut self, monitor: u32) -> Self {
        self.monitor = monitor;
        self
    }

    /// `(x, y, monitor)`
    pub fn as_tuple(&self) -> (u32, u32, u32) {
        (self.x, self.y, self.monitor)
    }
}

/// Compare agent IDs so that `Agent-2` sorts before `Agent-10`
pub fn natural_order(a: &str, b: &str) -> Ordering {
    fn split(id: &str) -> (&str, Option<u64>) {
        let digits = id.chars().rev().take_while(|c| c.is_ascii_digit()).count();
        let (stem, num) = id.split_at(id.len() - digits);
        (stem, num.parse().ok())
    }

    let (stem_a, num_a) = split(a);
    let (stem_b, num_b) = split(b);
    stem_a
        .cmp(stem_b)
        .then_with(|| num_a.cmp(&num_b))
        .then_with(|| a.cmp(b))
}

/// Registry of agent coordinates, read-mostly after load
pub struct CoordinateRegistry {
    sources: Vec<CoordinateSource>,
    entries: RwLock<BTreeMap<String, AgentCoordinates>>,
}

impl CoordinateRegistry {
    /// Create a registry over `sources` and load it
    pub fn new(sources: Vec<CoordinateSource>) -> Self {
        debug!(source_count = sources.len(), "CoordinateRegistry::new: called");
        let registry = Self {
            sources,
            entries: RwLock::new(BTreeMap::new()),
        };
        registry.load();
        registry
    }

    /// Registry from in-memory entries, no backing files
    pub fn from_entries(entries: impl IntoIterator<Item = AgentCoordinates>) -> Self {
        let entries = entries.into_iter().map(|c| (c.agent_id.clone(), c)).collect();
        Self {
            sources: Vec::new(),
            entries: RwLock::new(entries),
        }
    }

    /// Empty registry: every agent falls back to file-drop
    pub fn empty() -> Self {
        Self::from_entries(Vec::new())
    }

    /// Read the first source that parses and replace the current entries
    ///
    /// Sources that are missing or unparsable are logged and skipped. When no
    /// source parses the registry becomes empty.
    pub fn load(&self) -> BTreeMap<String, AgentCoordinates> {
        debug!("CoordinateRegistry::load: called");
        let mut loaded = None;

        for source in &self.sources {
            match source.read() {
                Ok(entries) => {
                    info!(
                        path = %source.path.display(),
                        count = entries.len(),
                        "Loaded agent coordinates"
                    );
                    loaded = Some(entries);
                    break;
                }
                Err(RegistryError::Missing { path }) => {
                    debug!(path = %path.display(), "CoordinateRegistry::load: source missing, trying next");
                }
                Err(e) => {
                    warn!(error = %e, "Coordinate source unusable, trying next");
                }
            }
        }

        let entries = loaded.unwrap_or_else(|| {
            if !self.sources.is_empty() {
                warn!("No usable coordinate source; simulated-input delivery disabled");
            }
            BTreeMap::new()
        });

        match self.entries.write() {
            Ok(mut guard) => *guard = entries.clone(),
            Err(poisoned) => *poisoned.into_inner() = entries.clone(),
        }
        entries
    }

    /// Re-read the sources (hot reload)
    pub fn reload(&self) -> usize {
        debug!("CoordinateRegistry::reload: called");
        self.load().len()
    }

    /// Coordinates for an agent
    pub fn get(&self, agent_id: &str) -> Option<AgentCoordinates> {
        debug!(%agent_id, "CoordinateRegistry::get: called");
        self.read_entries(|entries| entries.get(agent_id).cloned())
    }

    /// Agents with valid coordinates, in natural order
    pub fn list_agents(&self) -> Vec<String> {
        debug!("CoordinateRegistry::list_agents: called");
        let mut agents = self.read_entries(|entries| entries.keys().cloned().collect::<Vec<_>>());
        agents.sort_by(|a, b| natural_order(a, b));
        agents
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.read_entries(|entries| entries.contains_key(agent_id))
    }

    pub fn len(&self) -> usize {
        self.read_entries(|entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or replace an agent's coordinates; returns the previous value
    pub fn update(&self, coordinates: AgentCoordinates) -> Option<AgentCoordinates> {
        debug!(agent_id = %coordinates.agent_id, x = coordinates.x, y = coordinates.y, "CoordinateRegistry::update: called");
        let key = coordinates.agent_id.clone();
        match self.entries.write() {
            Ok(mut guard) => guard.insert(key, coordinates),
            Err(poisoned) => poisoned.into_inner().insert(key, coordinates),
        }
    }

    /// Add coordinates for an agent that has none; existing entries are kept
    pub fn add(&self, coordinates: AgentCoordinates) -> bool {
        debug!(agent_id = %coordinates.agent_id, "CoordinateRegistry::add: called");
        let mut guard = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.contains_key(&coordinates.agent_id) {
            debug!(agent_id = %coordinates.agent_id, "CoordinateRegistry::add: already present");
            return false;
        }
        guard.insert(coordinates.agent_id.clone(), coordinates);
        true
    }

    fn read_entries<T>(&self, f: impl FnOnce(&BTreeMap<String, AgentCoordinates>) -> T) -> T {
        match self.entries.read() {
            Ok(guard) => f(&guard),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }
}
