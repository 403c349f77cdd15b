//! Delivery providers
//!
//! Two interchangeable strategies deliver a formatted message to one agent:
//! - [`SimulatedInputProvider`] drives the pointer and keyboard at the
//!   agent's chat input
//! - [`FileDropProvider`] writes a message file into the agent's inbox
//!
//! Each strategy consumes its own kind of [`DeliveryTarget`]. The
//! orchestrator decides the order of targets; providers never fall back on
//! their own.

mod error;
mod file_drop;
mod input;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::domain::{DeliveryMethod, Message};
use crate::registry::AgentCoordinates;

pub use error::{BackendError, DeliveryError, InputStep};
pub use file_drop::{FileDropProvider, render_message_file};
pub use input::{InputBackend, SimulatedInputProvider, UnavailableBackend, XdotoolBackend};

/// Where a delivery attempt is aimed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryTarget {
    /// Pointer/keyboard automation at a screen location
    SimulatedInput(AgentCoordinates),
    /// Message file in an agent inbox directory
    FileDrop { inbox: PathBuf },
}

impl DeliveryTarget {
    pub fn method(&self) -> DeliveryMethod {
        match self {
            Self::SimulatedInput(_) => DeliveryMethod::SimulatedInput,
            Self::FileDrop { .. } => DeliveryMethod::FileDrop,
        }
    }
}

/// A delivery strategy
#[async_trait]
pub trait DeliveryProvider: Send + Sync {
    /// Method recorded on messages this provider delivers
    fn method(&self) -> DeliveryMethod;

    /// Whether the provider can be attempted at all right now
    async fn is_available(&self) -> bool;

    /// Deliver `body` (the formatted form of `message`) to `target`
    async fn deliver(&self, message: &Message, body: &str, target: &DeliveryTarget) -> Result<(), DeliveryError>;
}
