//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

use crate::domain::{Priority, Tag};

/// Courier - captain-to-agent message delivery
#[derive(Parser)]
#[command(
    name = "courier",
    about = "Deliver messages to agents by simulated input, with file-drop fallback",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Send a message to one agent
    Send {
        /// Recipient agent ID
        recipient: String,

        /// Message content
        content: String,

        /// Priority (low, normal, high, urgent)
        #[arg(short, long, default_value = "normal")]
        priority: Priority,

        /// Tag (general, coordination, system, task)
        #[arg(short, long, default_value = "general")]
        tag: Tag,

        /// Sender ID
        #[arg(short, long, default_value = "Captain")]
        sender: String,
    },

    /// Send a message to every roster agent
    Broadcast {
        /// Message content
        content: String,

        /// Sender ID
        #[arg(short, long, default_value = "System")]
        sender: String,

        /// Priority (low, normal, high, urgent)
        #[arg(short, long, default_value = "normal")]
        priority: Priority,

        /// Agents to leave out (repeatable)
        #[arg(short = 'x', long = "exclude")]
        exclude: Vec<String>,
    },

    /// List agents and whether they have coordinates
    Agents,

    /// Show the input coordinates of one agent
    Coords {
        /// Agent ID
        agent: String,
    },

    /// Queue a message with a response timeout and wait until it settles
    Queue {
        /// Recipient agent ID
        recipient: String,

        /// Message content
        content: String,

        /// Priority (low, normal, high, urgent)
        #[arg(short, long, default_value = "normal")]
        priority: Priority,

        /// Response timeout in seconds (default from config)
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Show persisted delivery history
    History {
        /// Number of records to show
        #[arg(short = 'n', long, default_value = "20")]
        lines: usize,
    },
}

/// Result of checking a required tool
pub struct ToolCheck {
    pub name: &'static str,
    pub available: bool,
    pub version: Option<String>,
}

impl ToolCheck {
    /// Check if a tool is available and get its version
    pub fn check(name: &'static str, version_args: &[&str]) -> Self {
        debug!(name, ?version_args, "ToolCheck::check: called");
        let result = std::process::Command::new(name).args(version_args).output();

        match result {
            Ok(output) if output.status.success() => {
                let version_str = String::from_utf8_lossy(&output.stdout);
                Self {
                    name,
                    available: true,
                    version: Some(parse_version(&version_str)),
                }
            }
            _ => {
                debug!(name, "ToolCheck::check: tool not available");
                Self {
                    name,
                    available: false,
                    version: None,
                }
            }
        }
    }
}

/// Parse version from command output (extracts first version-like string)
fn parse_version(output: &str) -> String {
    for word in output.split_whitespace() {
        let word = word.trim_start_matches('v');
        if word.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            let version: String = word.chars().take_while(|c| c.is_ascii_digit() || *c == '.').collect();
            if !version.is_empty() {
                return version;
            }
        }
    }
    "unknown".to_string()
}

/// Automation tools used for simulated-input delivery
pub fn check_required_tools() -> Vec<ToolCheck> {
    debug!("check_required_tools: called");
    vec![ToolCheck::check("xdotool", &["version"])]
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("courier")
        .join("logs")
        .join("courier.log")
}

/// Generate the after_help text with tool checks and the log location
pub fn generate_after_help() -> String {
    debug!("generate_after_help: called");
    let mut help = String::new();

    help.push_str("Required Tools:\n");
    for tool in check_required_tools() {
        let icon = if tool.available { "\u{2705}" } else { "\u{274C}" };
        let version = tool.version.as_deref().unwrap_or("not found (file-drop only)");
        help.push_str(&format!("  {} {:<10} {}\n", icon, tool.name, version));
    }

    help.push('\n');
    help.push_str(&format!("Logs are written to: {}\n", get_log_path().display()));
    help
}

/// Output format for command results
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_send_defaults() {
        let cli = Cli::parse_from(["courier", "send", "Agent-1", "hello"]);
        match cli.command {
            Command::Send {
                recipient,
                content,
                priority,
                tag,
                sender,
            } => {
                assert_eq!(recipient, "Agent-1");
                assert_eq!(content, "hello");
                assert_eq!(priority, Priority::Normal);
                assert_eq!(tag, Tag::General);
                assert_eq!(sender, "Captain");
            }
            other => panic!("Expected Send, got {:?}", other),
        }
        assert_eq!(cli.format, OutputFormat::Text);
    }

    #[test]
    fn test_cli_parse_send_priority_and_tag() {
        let cli = Cli::parse_from(["courier", "send", "Agent-2", "go", "-p", "URGENT", "-t", "task"]);
        assert!(matches!(
            cli.command,
            Command::Send {
                priority: Priority::Urgent,
                tag: Tag::Task,
                ..
            }
        ));
    }

    #[test]
    fn test_cli_parse_broadcast_excludes() {
        let cli = Cli::parse_from(["courier", "broadcast", "status check", "-x", "Agent-3", "-x", "Agent-6"]);
        if let Command::Broadcast { exclude, sender, .. } = cli.command {
            assert_eq!(exclude, vec!["Agent-3", "Agent-6"]);
            assert_eq!(sender, "System");
        } else {
            panic!("Expected Broadcast command");
        }
    }

    #[test]
    fn test_cli_parse_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["courier", "agents", "--format", "json", "-l", "debug"]);
        assert!(matches!(cli.command, Command::Agents));
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_cli_parse_queue_timeout() {
        let cli = Cli::parse_from(["courier", "queue", "Agent-1", "hi", "--timeout", "5"]);
        assert!(matches!(cli.command, Command::Queue { timeout: Some(5), .. }));
    }

    #[test]
    fn test_cli_rejects_unknown_priority() {
        assert!(Cli::try_parse_from(["courier", "send", "Agent-1", "x", "-p", "whenever"]).is_err());
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("plain".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert!("table".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("xdotool version 3.20160805.1"), "3.20160805.1");
        assert_eq!(parse_version("no digits here"), "unknown");
    }
}
