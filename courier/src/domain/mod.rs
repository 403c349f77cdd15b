//! Domain types for captain-to-agent messaging
//!
//! - [`Message`] - the unit of communication and its delivery lifecycle
//! - [`Priority`] - urgency level, drives the queue fast-path
//! - [`MessageId`] - process-unique identifier, also used in file-drop names

mod id;
mod message;
mod priority;

pub use id::MessageId;
pub use message::{DeliveryMethod, DeliveryStatus, Message, MessageType, Tag};
pub use priority::Priority;
