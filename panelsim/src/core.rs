//! Synchronous pipeline shared by the async service and the CLI.
//! No runtime or presentation dependencies.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::circuit::{Circuit, CircuitId, ClientId, OrgId};
use crate::config::{ConfigError, EngineConfig};
use crate::ingest::{IngestError, Ingestor};
use crate::interpret::{ConfidenceReport, InterpretError, Interpretation, Interpreter, Ruleset};
use crate::simulation::{SimulationError, SimulationResult, Simulator};
use crate::store::{CircuitRepository, NewCircuit, SqliteCircuitStore, StoreError};

/// The only content type accepted for uploads
pub const PDF_CONTENT_TYPE: &str = "application/pdf";

#[derive(Debug, thiserror::Error)]
pub enum PanelsimError {
    #[error("Ingestion failed: {0}")]
    Ingest(IngestError),
    #[error("Interpretation failed: {0}")]
    Interpret(InterpretError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Simulation failed: {0}")]
    Simulation(SimulationError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unsupported content type '{0}', expected application/pdf")]
    UnsupportedContentType(String),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Operation timed out after {0:?}")]
    TimedOut(Duration),
    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<IngestError> for PanelsimError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::Cancelled => PanelsimError::Cancelled,
            other => PanelsimError::Ingest(other),
        }
    }
}

impl From<InterpretError> for PanelsimError {
    fn from(e: InterpretError) -> Self {
        match e {
            InterpretError::Ingest(inner) => inner.into(),
            other => PanelsimError::Interpret(other),
        }
    }
}

impl From<SimulationError> for PanelsimError {
    fn from(e: SimulationError) -> Self {
        match e {
            SimulationError::Cancelled => PanelsimError::Cancelled,
            other => PanelsimError::Simulation(other),
        }
    }
}

impl PanelsimError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PanelsimError::Store(e) if e.is_not_found())
    }
}

/// A stored circuit together with what the interpreter could not place
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportOutcome {
    pub circuit: Circuit,
    pub report: ConfidenceReport,
}

/// Upload metadata and payload
#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn pdf(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content_type: PDF_CONTENT_TYPE.to_string(),
            bytes,
        }
    }
}

/// `application/pdf`, ignoring case and parameters such as `; charset=`
pub fn is_pdf_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|essence| essence.trim().eq_ignore_ascii_case(PDF_CONTENT_TYPE))
        .unwrap_or(false)
}

/// Ingest, interpret, store and simulate, with the tenant passed
/// explicitly to every call.
pub struct PanelsimCore {
    ingestor: Ingestor,
    interpreter: Interpreter,
    simulator: Simulator,
    repository: Arc<dyn CircuitRepository>,
}

impl PanelsimCore {
    pub fn new(config: EngineConfig, repository: Arc<dyn CircuitRepository>) -> Result<Self, PanelsimError> {
        config.validate()?;
        let ruleset = match &config.ruleset_path {
            Some(path) => Ruleset::load(path)?,
            None => Ruleset::builtin()?,
        };
        Ok(Self {
            ingestor: Ingestor::new(config.import),
            interpreter: Interpreter::new(ruleset)?,
            simulator: Simulator::new(config.simulation),
            repository,
        })
    }

    /// Core over a fresh in-memory store
    pub fn in_memory(config: EngineConfig) -> Result<Self, PanelsimError> {
        Self::new(config, Arc::new(SqliteCircuitStore::open_in_memory()?))
    }

    /// Replace the recognition ruleset
    pub fn with_ruleset(mut self, ruleset: Ruleset) -> Result<Self, PanelsimError> {
        self.interpreter = Interpreter::new(ruleset)?;
        Ok(self)
    }

    pub fn repository(&self) -> &Arc<dyn CircuitRepository> {
        &self.repository
    }

    pub fn ruleset(&self) -> &Ruleset {
        self.interpreter.ruleset()
    }

    /// Ingest and interpret an upload without storing anything
    pub fn inspect(&self, upload: &Upload, cancel: &CancelToken) -> Result<Interpretation, PanelsimError> {
        if !is_pdf_content_type(&upload.content_type) {
            return Err(PanelsimError::UnsupportedContentType(upload.content_type.clone()));
        }
        let document = self.ingestor.open(&upload.bytes)?;
        let interpretation = self
            .interpreter
            .interpret(&upload.name, document.text_blocks(cancel))?;
        Ok(interpretation)
    }

    /// Inspect an upload and store the recognised circuit under `org`
    pub fn import(
        &self,
        org: &OrgId,
        upload: &Upload,
        client: Option<ClientId>,
        cancel: &CancelToken,
    ) -> Result<ImportOutcome, PanelsimError> {
        let Interpretation { draft, report } = self.inspect(upload, cancel)?;
        if !cancel.commit() {
            return Err(PanelsimError::Cancelled);
        }

        let new = NewCircuit {
            draft,
            client_id: client,
        };
        let circuit = self.repository.create(org, new)?;
        tracing::info!(
            "Imported '{}' as circuit {} (confidence {:.2})",
            upload.name,
            circuit.id,
            report.confidence()
        );
        Ok(ImportOutcome { circuit, report })
    }

    pub fn list(&self, org: &OrgId) -> Result<Vec<Circuit>, PanelsimError> {
        Ok(self.repository.list_by_organization(org)?)
    }

    pub fn get(&self, org: &OrgId, id: CircuitId) -> Result<Circuit, PanelsimError> {
        Ok(self.repository.get_by_id(id, org)?)
    }

    /// Simulate a stored circuit and append the result to its history
    pub fn simulate(
        &self,
        org: &OrgId,
        id: CircuitId,
        cancel: &CancelToken,
    ) -> Result<SimulationResult, PanelsimError> {
        let circuit = self.repository.get_by_id(id, org)?;
        let result = self.simulator.simulate(&circuit, cancel)?;
        if !cancel.commit() {
            return Err(PanelsimError::Cancelled);
        }
        self.repository.save_simulation(org, &result)?;
        Ok(result)
    }

    pub fn history(&self, org: &OrgId, id: CircuitId) -> Result<Vec<SimulationResult>, PanelsimError> {
        Ok(self.repository.list_simulations(org, id)?)
    }

    pub fn detach_client(&self, org: &OrgId, client: &ClientId) -> Result<usize, PanelsimError> {
        Ok(self.repository.detach_client(org, client)?)
    }
}
