//! Message ID generation
//!
//! IDs use the format `msg-{uuid-v7-hex}`. UUIDv7 is time-ordered, so IDs sort
//! by creation and never repeat within a process lifetime.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique message identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Generate a fresh ID
    pub fn generate() -> Self {
        Self(format!("msg-{}", Uuid::now_v7().simple()))
    }

    /// Wrap an existing ID string (recovery, callers that bring their own IDs)
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if the ID can be embedded in a file name without escaping
    pub fn is_filename_safe(&self) -> bool {
        !self.0.is_empty() && self.0.chars().all(is_filename_char)
    }

    /// The ID as a file name component; unsafe characters become `_`
    pub fn file_component(&self) -> Cow<'_, str> {
        if self.is_filename_safe() {
            Cow::Borrowed(&self.0)
        } else {
            Cow::Owned(
                self.0
                    .chars()
                    .map(|c| if is_filename_char(c) { c } else { '_' })
                    .collect(),
            )
        }
    }
}

fn is_filename_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for MessageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_format() {
        let id = MessageId::generate();
        assert!(id.as_str().starts_with("msg-"));
        assert_eq!(id.as_str().len(), 4 + 32);
        assert!(id.is_filename_safe());
    }

    #[test]
    fn test_generate_unique() {
        let ids: HashSet<_> = (0..1000).map(|_| MessageId::generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_filename_safety() {
        assert!(!MessageId::from_string("../etc/passwd").is_filename_safe());
        assert!(!MessageId::from_string("").is_filename_safe());
        assert!(MessageId::from_string("custom_id-42").is_filename_safe());
    }

    #[test]
    fn test_file_component() {
        let id = MessageId::generate();
        assert!(matches!(id.file_component(), Cow::Borrowed(_)));
        assert_eq!(id.file_component(), id.as_str());
        assert_eq!(MessageId::from_string("../a b").file_component(), "___a_b");
    }
}
