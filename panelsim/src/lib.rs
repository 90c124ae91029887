//! Panelsim - electrical panel schematic import and load-flow simulation
//!
//! Uploaded PDF schematics are turned into circuit graphs, stored per
//! organization, and simulated on demand to flag overloads, undersized
//! conductors and excessive voltage drop.
//!
//! # Quick Start
//!
//! ```no_run
//! use panelsim::prelude::*;
//!
//! let core = PanelsimCore::in_memory(EngineConfig::default()).unwrap();
//! let org = OrgId::new("acme");
//! let bytes = std::fs::read("panel.pdf").unwrap();
//!
//! let outcome = core
//!     .import(&org, &Upload::pdf("panel.pdf", bytes), None, &CancelToken::new())
//!     .unwrap();
//! println!("confidence {:.2}", outcome.report.confidence());
//!
//! let result = core.simulate(&org, outcome.circuit.id, &CancelToken::new()).unwrap();
//! for violation in &result.violations {
//!     println!("{}: {}", violation.severity, violation.message);
//! }
//! ```
//!
//! # Pipeline
//!
//! - **Ingestion**: positioned text blocks from a PDF, page by page
//! - **Interpretation**: ruleset-driven recognition into a circuit draft
//!   plus a confidence report
//! - **Store**: tenant-scoped SQLite persistence with simulation history
//! - **Simulation**: iterative load-flow with rating checks

pub mod cancel;
pub mod circuit;
pub mod config;
pub mod core;
pub mod ingest;
pub mod interpret;
pub mod service;
pub mod simulation;
pub mod store;

// Re-export main types
pub use cancel::CancelToken;
pub use circuit::{
    Circuit, CircuitDraft, CircuitId, ClientId, Component, ComponentKind, Conductor,
    ConductorMaterial, Connection, OrgId, PositionHint, RatedAttributes,
};
pub use config::{ConfigError, EngineConfig, ImportOptions, SimulationOptions};
pub use core::{is_pdf_content_type, ImportOutcome, PanelsimCore, PanelsimError, Upload};
pub use ingest::{IngestError, Ingestor, TextBlock};
pub use interpret::{ConfidenceReport, InterpretError, Interpretation, Interpreter, Ruleset};
pub use service::CircuitService;
pub use simulation::{
    OverallStatus, Severity, SimulationError, SimulationResult, Simulator, Violation,
    ViolationKind,
};
pub use store::{CircuitRepository, NewCircuit, SqliteCircuitStore, StoreError};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        CancelToken, Circuit, CircuitDraft, CircuitId, CircuitService, ClientId, Component,
        ComponentKind, Connection, EngineConfig, ImportOutcome, OrgId, OverallStatus,
        PanelsimCore, PanelsimError, Severity, SimulationResult, Upload, Violation,
        ViolationKind,
    };
}
