//! Coordinate registry
//!
//! Holds the screen location of each agent's chat input. Loaded from the
//! first configuration source that parses; a registry with no usable source
//! is empty rather than an error.

mod coordinates;
mod source;

pub use coordinates::{AgentCoordinates, CoordinateRegistry, natural_order};
pub use source::{CoordinateSource, RegistryError, SourceFormat};
