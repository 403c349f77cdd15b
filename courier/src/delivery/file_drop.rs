//! File-drop delivery
//!
//! Writes one markdown file per message into
//! `<root>/agent_workspaces/<agent>/inbox/`. Files are never overwritten, so
//! the inbox doubles as an audit trail of everything that was sent.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::domain::{DeliveryMethod, Message};

use super::error::DeliveryError;
use super::{DeliveryProvider, DeliveryTarget};

const WORKSPACES_DIR: &str = "agent_workspaces";
const INBOX_DIR: &str = "inbox";

/// Collision retries before giving up on a unique name
const MAX_NAME_ATTEMPTS: u32 = 100;

/// Render the message file: header block, separator, raw content
pub fn render_message_file(message: &Message) -> String {
    let tags = message
        .tags()
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "# Message\n\n\
         From: {}\n\
         To: {}\n\
         Priority: {}\n\
         Type: {}\n\
         Tags: {}\n\
         Timestamp: {}\n\
         Message-ID: {}\n\
         \n---\n\n\
         {}\n",
        message.sender(),
        message.recipient(),
        message.priority(),
        message.message_type(),
        tags,
        message.created_at().to_rfc3339(),
        message.id(),
        message.content()
    )
}

/// Delivers by writing message files into per-agent inboxes
pub struct FileDropProvider {
    workspace_root: PathBuf,
}

impl FileDropProvider {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        let workspace_root = workspace_root.into();
        debug!(root = %workspace_root.display(), "FileDropProvider::new: called");
        Self { workspace_root }
    }

    /// Inbox directory for an agent; rejects IDs that would escape the workspace
    pub fn inbox_for(&self, agent_id: &str) -> Result<PathBuf, DeliveryError> {
        let valid = !agent_id.trim().is_empty()
            && !agent_id.starts_with('.')
            && !agent_id.contains(['/', '\\', '\0'])
            && agent_id != "..";
        if !valid {
            return Err(DeliveryError::InvalidRecipient {
                recipient: agent_id.to_string(),
            });
        }
        Ok(self.workspace_root.join(WORKSPACES_DIR).join(agent_id).join(INBOX_DIR))
    }

    /// Write the message file and return its path
    pub async fn send(&self, message: &Message) -> Result<PathBuf, DeliveryError> {
        let inbox = self.inbox_for(message.recipient())?;
        self.write_into(&inbox, message).await
    }

    async fn write_into(&self, inbox: &Path, message: &Message) -> Result<PathBuf, DeliveryError> {
        debug!(id = %message.id(), inbox = %inbox.display(), "FileDropProvider::write_into: called");
        fs::create_dir_all(inbox).await.map_err(|source| DeliveryError::Io {
            path: inbox.to_path_buf(),
            source,
        })?;

        let stamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let id = message.id().file_component();
        let contents = render_message_file(message);

        for n in 0..MAX_NAME_ATTEMPTS {
            let name = if n == 0 {
                format!("MESSAGE_{}_{}.md", stamp, id)
            } else {
                format!("MESSAGE_{}-{}_{}.md", stamp, n, id)
            };
            let path = inbox.join(name);

            let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    debug!(path = %path.display(), "FileDropProvider::write_into: name taken");
                    continue;
                }
                Err(source) => return Err(DeliveryError::Io { path, source }),
            };

            let written = async {
                file.write_all(contents.as_bytes()).await?;
                file.flush().await?;
                file.sync_all().await
            }
            .await;
            if let Err(source) = written {
                return Err(DeliveryError::Io { path, source });
            }

            info!(id = %message.id(), recipient = %message.recipient(), path = %path.display(), "Message file written");
            return Ok(path);
        }

        Err(DeliveryError::Io {
            path: inbox.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::AlreadyExists, "no free message file name"),
        })
    }
}

#[async_trait]
impl DeliveryProvider for FileDropProvider {
    fn method(&self) -> DeliveryMethod {
        DeliveryMethod::FileDrop
    }

    /// Available while the workspace directory can be created
    async fn is_available(&self) -> bool {
        let root = self.workspace_root.join(WORKSPACES_DIR);
        match fs::create_dir_all(&root).await {
            Ok(()) => fs::metadata(&root)
                .await
                .map(|m| !m.permissions().readonly())
                .unwrap_or(false),
            Err(e) => {
                debug!(root = %root.display(), error = %e, "FileDropProvider::is_available: cannot create root");
                false
            }
        }
    }

    async fn deliver(&self, message: &Message, _body: &str, target: &DeliveryTarget) -> Result<(), DeliveryError> {
        debug!(id = %message.id(), recipient = %message.recipient(), "FileDropProvider::deliver: called");
        match target {
            DeliveryTarget::FileDrop { inbox } => self.write_into(inbox, message).await.map(|_| ()),
            other => Err(DeliveryError::TargetMismatch {
                method: DeliveryMethod::FileDrop,
                target: other.method(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MessageId, Priority};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_writes_file_with_header_and_raw_content() {
        let dir = TempDir::new().unwrap();
        let provider = FileDropProvider::new(dir.path());
        let message = Message::new("Captain", "Agent-2", "hello\n\n==== raw body ====").with_priority(Priority::High);

        let path = provider.send(&message).await.unwrap();

        let inbox = dir.path().join("agent_workspaces").join("Agent-2").join("inbox");
        assert_eq!(path.parent().unwrap(), inbox);
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("MESSAGE_"));
        assert!(name.ends_with(&format!("_{}.md", message.id())));

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("From: Captain"));
        assert!(contents.contains("To: Agent-2"));
        assert!(contents.contains("Priority: high"));
        assert!(contents.contains(&format!("Message-ID: {}", message.id())));
        assert!(contents.contains("hello\n\n==== raw body ===="));
    }

    #[tokio::test]
    async fn test_same_message_twice_never_overwrites() {
        let dir = TempDir::new().unwrap();
        let provider = FileDropProvider::new(dir.path());
        let message = Message::with_id(MessageId::from_string("msg-fixed"), "Captain", "Agent-1", "again");

        let first = provider.send(&message).await.unwrap();
        let second = provider.send(&message).await.unwrap();
        assert_ne!(first, second);
        assert!(first.exists() && second.exists());
        assert!(second.to_string_lossy().ends_with("_msg-fixed.md"));
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let dir = TempDir::new().unwrap();
        let provider = FileDropProvider::new(dir.path());

        for bad in ["../escape", "..", "", "a/b", ".hidden"] {
            let message = Message::new("Captain", bad, "x");
            let result = provider.send(&message).await;
            assert!(
                matches!(result, Err(DeliveryError::InvalidRecipient { .. })),
                "accepted {:?}",
                bad
            );
        }
    }

    #[tokio::test]
    async fn test_unsafe_ids_are_sanitized() {
        let dir = TempDir::new().unwrap();
        let provider = FileDropProvider::new(dir.path());
        let message = Message::with_id(MessageId::from_string("ext/id:7"), "Captain", "Agent-1", "x");

        let path = provider.send(&message).await.unwrap();
        assert!(path.to_string_lossy().ends_with("_ext_id_7.md"));
    }

    #[tokio::test]
    async fn test_available_for_writable_root() {
        let dir = TempDir::new().unwrap();
        let provider = FileDropProvider::new(dir.path());
        assert!(provider.is_available().await);
    }
}
