//! Delivery error types

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::domain::DeliveryMethod;

/// Step of the simulated-input sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputStep {
    Move,
    Click,
    Clear,
    Type,
    Submit,
}

impl std::fmt::Display for InputStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Move => write!(f, "move"),
            Self::Click => write!(f, "click"),
            Self::Clear => write!(f, "clear"),
            Self::Type => write!(f, "type"),
            Self::Submit => write!(f, "submit"),
        }
    }
}

/// Failure reported by an automation backend
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct BackendError(pub String);

impl BackendError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Errors from a single provider attempt
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("{method} provider unavailable: {reason}")]
    Unavailable { method: DeliveryMethod, reason: String },

    #[error("Automation step {step} failed: {source}")]
    Automation {
        step: InputStep,
        #[source]
        source: BackendError,
    },

    #[error("Automation step {step} timed out after {timeout:?}")]
    StepTimeout { step: InputStep, timeout: Duration },

    #[error("Submit keystroke failed after text was entered, delivery state unknown: {reason}")]
    AmbiguousSubmit { reason: String },

    #[error("Invalid recipient: {recipient:?}")]
    InvalidRecipient { recipient: String },

    #[error("{method} provider cannot handle a {target} target")]
    TargetMismatch {
        method: DeliveryMethod,
        target: DeliveryMethod,
    },

    #[error("Failed to write {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DeliveryError {
    /// Retrying the same provider may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Automation { .. } | Self::StepTimeout { .. } | Self::Io { .. } => true,
            Self::Unavailable { .. }
            | Self::AmbiguousSubmit { .. }
            | Self::InvalidRecipient { .. }
            | Self::TargetMismatch { .. } => false,
        }
    }

    /// No provider can deliver this message, so the fallback chain stops
    pub fn is_fatal_for_message(&self) -> bool {
        matches!(self, Self::InvalidRecipient { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let step = DeliveryError::Automation {
            step: InputStep::Click,
            source: BackendError::new("xdotool exited 1"),
        };
        assert!(step.is_transient());
        assert!(!step.is_fatal_for_message());

        let ambiguous = DeliveryError::AmbiguousSubmit {
            reason: "no display".to_string(),
        };
        assert!(!ambiguous.is_transient());

        let recipient = DeliveryError::InvalidRecipient {
            recipient: "../x".to_string(),
        };
        assert!(!recipient.is_transient());
        assert!(recipient.is_fatal_for_message());
    }

    #[test]
    fn test_messages() {
        let err = DeliveryError::Automation {
            step: InputStep::Type,
            source: BackendError::new("boom"),
        };
        assert!(err.to_string().contains("type"));
        assert!(err.to_string().contains("boom"));

        let err = DeliveryError::Unavailable {
            method: DeliveryMethod::SimulatedInput,
            reason: "no coordinates".to_string(),
        };
        assert!(err.to_string().contains("simulated_input"));
    }
}
