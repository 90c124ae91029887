//! Circuit Model
//!
//! Arena-style circuit representation (components and connections in flat
//! vectors, referenced by id), invariant validation, and a petgraph view
//! used for traversal.

pub mod graph;
pub mod model;
pub mod validate;

pub use graph::{CircuitGraph, GraphStats};
pub use model::*;
pub use validate::{attribute_applies, validate_draft};
