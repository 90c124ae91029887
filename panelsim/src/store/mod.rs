//! Circuit Store
//!
//! Tenant-scoped persistence of circuits and their simulation history.
//! Every operation takes the organization explicitly; a record owned by a
//! different organization is reported exactly like a missing one.

pub mod sqlite;

use thiserror::Error;
use uuid::Uuid;

use crate::circuit::{Circuit, CircuitDraft, CircuitId, ClientId, OrgId};
use crate::simulation::SimulationResult;

pub use sqlite::SqliteCircuitStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Validation failed: {}", .0.join("; "))]
    ValidationFailed(Vec<String>),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Lock error: {0}")]
    Lock(String),
}

impl StoreError {
    pub(crate) fn circuit_not_found(id: CircuitId) -> Self {
        StoreError::NotFound {
            entity: "circuit",
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Input to [`CircuitRepository::create`]
#[derive(Debug, Clone, PartialEq)]
pub struct NewCircuit {
    pub draft: CircuitDraft,
    pub client_id: Option<ClientId>,
}

impl NewCircuit {
    pub fn new(draft: CircuitDraft) -> Self {
        Self {
            draft,
            client_id: None,
        }
    }

    pub fn with_client(mut self, client_id: ClientId) -> Self {
        self.client_id = Some(client_id);
        self
    }
}

impl From<CircuitDraft> for NewCircuit {
    fn from(draft: CircuitDraft) -> Self {
        Self::new(draft)
    }
}

/// Persistence seam for circuits and simulation results
pub trait CircuitRepository: Send + Sync {
    /// Validate and insert a circuit. The identifier is assigned by the
    /// backing store.
    fn create(&self, org: &OrgId, new: NewCircuit) -> Result<Circuit>;

    /// All circuits of an organization, most recent first
    fn list_by_organization(&self, org: &OrgId) -> Result<Vec<Circuit>>;

    fn list_by_client(&self, org: &OrgId, client: &ClientId) -> Result<Vec<Circuit>>;

    fn get_by_id(&self, id: CircuitId, org: &OrgId) -> Result<Circuit>;

    /// Clear the client reference of every circuit of `org` that points at
    /// `client`. The circuits are kept. Returns how many were updated.
    fn detach_client(&self, org: &OrgId, client: &ClientId) -> Result<usize>;

    /// Append a result to the history of a circuit owned by `org`
    fn save_simulation(&self, org: &OrgId, result: &SimulationResult) -> Result<()>;

    fn get_simulation(&self, org: &OrgId, id: Uuid) -> Result<SimulationResult>;

    /// Simulation history of a circuit, most recent first
    fn list_simulations(&self, org: &OrgId, circuit: CircuitId) -> Result<Vec<SimulationResult>>;
}
