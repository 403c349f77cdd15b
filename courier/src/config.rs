//! Courier configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main courier configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Ordered agent roster (broadcast order)
    pub roster: RosterConfig,

    /// Coordinate source files
    pub coordinates: CoordinatesConfig,

    /// Simulated-input delivery
    pub input: InputConfig,

    /// File-drop delivery
    #[serde(rename = "file-drop")]
    pub file_drop: FileDropConfig,

    /// Formatting and spam suppression
    pub filter: FilterConfig,

    /// Pending-message queue
    pub queue: QueueConfig,

    /// Delivery history persistence
    pub history: HistoryConfig,

    /// Log level (overridden by --log-level)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, it must load
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .courier.yml
        let local_config = PathBuf::from(".courier.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/courier/courier.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("courier").join("courier.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Ordered list of agent IDs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RosterConfig {
    pub agents: Vec<String>,
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            agents: (1..=8).map(|n| format!("Agent-{}", n)).collect(),
        }
    }
}

/// Coordinate source files, tried in order
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatesConfig {
    /// `{ "agents": { "Agent-1": { "chat_input_coordinates": [x, y] } } }`
    pub primary: PathBuf,

    /// Flat `{ "Agent-1": [x, y, monitor?] }`
    pub legacy: PathBuf,
}

impl Default for CoordinatesConfig {
    fn default() -> Self {
        Self {
            primary: PathBuf::from("config/coordinates.json"),
            legacy: PathBuf::from("config/agent_coordinates.json"),
        }
    }
}

impl CoordinatesConfig {
    /// Sources in preference order
    pub fn sources(&self) -> Vec<PathBuf> {
        vec![self.primary.clone(), self.legacy.clone()]
    }
}

/// What to assume when the submit keystroke itself reports failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AmbiguousSubmitPolicy {
    /// Fall back to file-drop; the agent may see the message twice
    #[default]
    AtLeastOnce,
    /// Treat the message as delivered; the agent may never see it
    AtMostOnce,
}

/// Simulated-input delivery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Disable to force file-drop for everyone
    pub enabled: bool,

    /// Attempts of the whole pointer/keyboard sequence
    pub attempts: u32,

    /// Backoff between attempts (multiplied by attempt number)
    #[serde(rename = "backoff-ms")]
    pub backoff_ms: u64,

    /// Pause between sequence steps
    #[serde(rename = "step-delay-ms")]
    pub step_delay_ms: u64,

    /// Per-keystroke delay while typing
    #[serde(rename = "type-delay-ms")]
    pub type_delay_ms: u64,

    /// Key pressed to submit the message
    #[serde(rename = "submit-key")]
    pub submit_key: String,

    /// Key chord that inserts a line break without submitting
    #[serde(rename = "newline-key")]
    pub newline_key: String,

    /// Upper bound on a single automation command
    #[serde(rename = "command-timeout-ms")]
    pub command_timeout_ms: u64,

    #[serde(rename = "ambiguous-submit")]
    pub ambiguous_submit: AmbiguousSubmitPolicy,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            attempts: 2,
            backoff_ms: 500,
            step_delay_ms: 100,
            type_delay_ms: 1,
            submit_key: "Return".to_string(),
            newline_key: "shift+Return".to_string(),
            command_timeout_ms: 10_000,
            ambiguous_submit: AmbiguousSubmitPolicy::AtLeastOnce,
        }
    }
}

impl InputConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// File-drop delivery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileDropConfig {
    /// Directory containing `agent_workspaces/`
    #[serde(rename = "workspace-root")]
    pub workspace_root: PathBuf,
}

impl Default for FileDropConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("."),
        }
    }
}

/// Formatting and duplicate suppression
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Platform message limit in characters
    #[serde(rename = "max-length")]
    pub max_length: usize,

    /// Appended when content is cut
    #[serde(rename = "truncation-marker")]
    pub truncation_marker: String,

    /// Identical messages allowed in a row before suppression
    #[serde(rename = "max-repeats")]
    pub max_repeats: u32,

    /// Longest run of separator characters kept
    #[serde(rename = "separator-run")]
    pub separator_run: usize,

    /// Content matching any of these is never sent
    #[serde(rename = "suppress-patterns")]
    pub suppress_patterns: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            max_length: 2000,
            truncation_marker: "\n... [truncated]".to_string(),
            max_repeats: 3,
            separator_run: 20,
            suppress_patterns: vec![
                // nothing but separator lines
                r"^(?:\s*[=\-_*#~]{3,}\s*)+$".to_string(),
                // a bare reminder banner with no body
                r"(?i)^\s*(?:[^\w\s]\s*)*(?:friendly\s+)?reminder\s*[:!]?\s*(?:[^\w\s]\s*)*$".to_string(),
                // keepalive chatter
                r"(?i)^\s*\[?(?:heartbeat|keep-?alive)\]?\s*$".to_string(),
            ],
        }
    }
}

/// Pending-message queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Interval between dispatch passes
    #[serde(rename = "tick-interval-secs")]
    pub tick_interval_secs: u64,

    /// Response timeout when the caller does not declare one
    #[serde(rename = "default-timeout-secs")]
    pub default_timeout_secs: u64,

    /// Terminal entries kept in memory
    #[serde(rename = "history-limit")]
    pub history_limit: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 30,
            default_timeout_secs: 300,
            history_limit: 1000,
        }
    }
}

impl QueueConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }
}

/// Delivery history persistence
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Append-only JSONL file; history stays in memory when unset
    pub file: Option<PathBuf>,
}
