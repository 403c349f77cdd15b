//! Coordinate source files and their formats

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::coordinates::AgentCoordinates;

/// Errors reading a single coordinate source
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Coordinate source not found: {path}")]
    Missing { path: PathBuf },

    #[error("Failed to read coordinate source {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse coordinate source {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unexpected layout in {path}: {reason}")]
    Layout { path: PathBuf, reason: String },
}

/// Layout of a coordinate file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// `{ "agents": { "Agent-1": { "chat_input_coordinates": [x, y] } } }`
    Agents,
    /// `{ "Agent-1": [x, y] }` or `{ "Agent-1": [x, y, monitor] }`
    Flat,
}

/// One coordinate file and the layout it is expected to have
#[derive(Debug, Clone)]
pub struct CoordinateSource {
    pub path: PathBuf,
    pub format: SourceFormat,
}

impl CoordinateSource {
    pub fn new(path: impl Into<PathBuf>, format: SourceFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }

    /// Primary file followed by the legacy flat file
    pub fn default_chain(primary: impl Into<PathBuf>, legacy: impl Into<PathBuf>) -> Vec<Self> {
        vec![
            Self::new(primary, SourceFormat::Agents),
            Self::new(legacy, SourceFormat::Flat),
        ]
    }

    /// Read and parse the source; invalid individual entries are skipped
    pub fn read(&self) -> Result<BTreeMap<String, AgentCoordinates>, RegistryError> {
        debug!(path = %self.path.display(), format = ?self.format, "CoordinateSource::read: called");
        if !self.path.exists() {
            return Err(RegistryError::Missing {
                path: self.path.clone(),
            });
        }

        let content = std::fs::read_to_string(&self.path).map_err(|source| RegistryError::Io {
            path: self.path.clone(),
            source,
        })?;

        let value: Value = serde_json::from_str(&content).map_err(|source| RegistryError::Parse {
            path: self.path.clone(),
            source,
        })?;

        match self.format {
            SourceFormat::Agents => parse_agents_layout(&self.path, &value),
            SourceFormat::Flat => parse_flat_layout(&self.path, &value),
        }
    }
}

fn parse_agents_layout(path: &Path, value: &Value) -> Result<BTreeMap<String, AgentCoordinates>, RegistryError> {
    let agents = value
        .get("agents")
        .and_then(Value::as_object)
        .ok_or_else(|| RegistryError::Layout {
            path: path.to_path_buf(),
            reason: "missing \"agents\" object".to_string(),
        })?;

    let mut entries = BTreeMap::new();
    for (agent_id, agent) in agents {
        let Some(coords) = agent.get("chat_input_coordinates").and_then(Value::as_array) else {
            warn!(%agent_id, path = %path.display(), "Skipping agent without chat_input_coordinates");
            continue;
        };
        let monitor = match agent.get("monitor") {
            None => None,
            Some(value) => match non_negative(value) {
                Some(m) => Some(m),
                None => {
                    warn!(%agent_id, path = %path.display(), %value, "Skipping agent with invalid monitor");
                    continue;
                }
            },
        };
        match coordinates_from_array(agent_id, coords, monitor) {
            Some(c) => {
                entries.insert(agent_id.clone(), c);
            }
            None => warn!(%agent_id, path = %path.display(), "Skipping invalid coordinates"),
        }
    }
    Ok(entries)
}

fn parse_flat_layout(path: &Path, value: &Value) -> Result<BTreeMap<String, AgentCoordinates>, RegistryError> {
    let map = value.as_object().ok_or_else(|| RegistryError::Layout {
        path: path.to_path_buf(),
        reason: "expected a JSON object".to_string(),
    })?;

    let mut entries = BTreeMap::new();
    for (agent_id, coords) in map {
        let Some(coords) = coords.as_array() else {
            warn!(%agent_id, path = %path.display(), "Skipping non-array coordinates");
            continue;
        };
        if coords.len() != 2 && coords.len() != 3 {
            warn!(%agent_id, len = coords.len(), "Skipping coordinates with wrong arity");
            continue;
        }
        match coordinates_from_array(agent_id, coords, None) {
            Some(c) => {
                entries.insert(agent_id.clone(), c);
            }
            None => warn!(%agent_id, path = %path.display(), "Skipping invalid coordinates"),
        }
    }
    Ok(entries)
}

/// `[x, y]` or `[x, y, monitor]`; an explicit monitor field wins over the third element
fn coordinates_from_array(agent_id: &str, coords: &[Value], monitor: Option<u32>) -> Option<AgentCoordinates> {
    let x = coords.first().and_then(non_negative)?;
    let y = coords.get(1).and_then(non_negative)?;
    let monitor = match (monitor, coords.get(2)) {
        (Some(m), _) => m,
        (None, Some(value)) => non_negative(value)?,
        (None, None) => 0,
    };
    Some(AgentCoordinates::new(agent_id, x, y).on_monitor(monitor))
}

fn non_negative(value: &Value) -> Option<u32> {
    let n = value.as_f64()?;
    if n.is_finite() && n >= 0.0 && n <= u32::MAX as f64 {
        Some(n.round() as u32)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_agents_layout() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "coords.json",
            r#"{"agents": {
                "Agent-1": {"chat_input_coordinates": [100, 200]},
                "Agent-2": {"chat_input_coordinates": [300, 400], "monitor": 1}
            }}"#,
        );

        let entries = CoordinateSource::new(path, SourceFormat::Agents).read().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries["Agent-1"].x, 100);
        assert_eq!(entries["Agent-1"].monitor, 0);
        assert_eq!(entries["Agent-2"].monitor, 1);
    }

    #[test]
    fn test_invalid_entries_skipped() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "coords.json",
            r#"{"agents": {
                "Agent-1": {"chat_input_coordinates": [100]},
                "Agent-2": {"chat_input_coordinates": ["a", 5]},
                "Agent-3": {"chat_input_coordinates": [-4, 5]},
                "Agent-4": {"role": "tester"},
                "Agent-5": {"chat_input_coordinates": [7, 8]}
            }}"#,
        );

        let entries = CoordinateSource::new(path, SourceFormat::Agents).read().unwrap();
        assert_eq!(entries.keys().collect::<Vec<_>>(), vec!["Agent-5"]);
    }

    #[test]
    fn test_out_of_range_monitor_skipped() {
        let dir = TempDir::new().unwrap();
        let agents = write(
            &dir,
            "coords.json",
            r#"{"agents": {
                "Agent-1": {"chat_input_coordinates": [10, 20], "monitor": 4294967296},
                "Agent-2": {"chat_input_coordinates": [10, 20], "monitor": -1},
                "Agent-3": {"chat_input_coordinates": [10, 20], "monitor": 4294967295}
            }}"#,
        );
        let entries = CoordinateSource::new(agents, SourceFormat::Agents).read().unwrap();
        assert_eq!(entries.keys().collect::<Vec<_>>(), vec!["Agent-3"]);
        assert_eq!(entries["Agent-3"].monitor, u32::MAX);

        let flat = write(&dir, "legacy.json", r#"{"Agent-1": [10, 20, 4294967296], "Agent-2": [10, 20, 1]}"#);
        let entries = CoordinateSource::new(flat, SourceFormat::Flat).read().unwrap();
        assert_eq!(entries.keys().collect::<Vec<_>>(), vec!["Agent-2"]);
    }

    #[test]
    fn test_flat_layout() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "legacy.json",
            r#"{"Agent-1": [10, 20], "Agent-2": [30, 40, 2], "Agent-3": [1, 2, 3, 4], "Agent-4": "nope"}"#,
        );

        let entries = CoordinateSource::new(path, SourceFormat::Flat).read().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries["Agent-2"].monitor, 2);
        assert!(!entries.contains_key("Agent-3"));
    }

    #[test]
    fn test_missing_file() {
        let source = CoordinateSource::new("/nonexistent/coords.json", SourceFormat::Agents);
        assert!(matches!(source.read(), Err(RegistryError::Missing { .. })));
    }

    #[test]
    fn test_wrong_layout() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "coords.json", r#"{"Agent-1": [10, 20]}"#);
        let err = CoordinateSource::new(path, SourceFormat::Agents).read().unwrap_err();
        assert!(matches!(err, RegistryError::Layout { .. }));
        assert!(err.to_string().contains("agents"));
    }

    #[test]
    fn test_unparsable() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "coords.json", "{ not json");
        let err = CoordinateSource::new(path, SourceFormat::Flat).read().unwrap_err();
        assert!(matches!(err, RegistryError::Parse { .. }));
    }
}
