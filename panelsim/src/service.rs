//! Async facade over [`PanelsimCore`].
//!
//! Parsing, interpretation, solving and SQLite access all block, so each
//! call runs on tokio's blocking pool. The optional timeout trips the
//! job's [`CancelToken`]; the job stops at its next checkpoint and the
//! caller gets [`PanelsimError::TimedOut`]. A job that already committed
//! to a write is awaited instead, so a timed-out call never leaves a
//! stored record behind.
//!
//! ```text
//!   caller ──► CircuitService ──spawn_blocking──► PanelsimCore
//!                   │                                 ▲
//!                   └── timeout ── cancel() ──────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;

use crate::cancel::CancelToken;
use crate::circuit::{Circuit, CircuitId, ClientId, OrgId};
use crate::core::{ImportOutcome, PanelsimCore, PanelsimError, Upload};
use crate::interpret::Interpretation;
use crate::simulation::SimulationResult;

#[derive(Clone)]
pub struct CircuitService {
    core: Arc<PanelsimCore>,
    timeout: Option<Duration>,
}

impl CircuitService {
    pub fn new(core: PanelsimCore) -> Self {
        Self {
            core: Arc::new(core),
            timeout: None,
        }
    }

    /// Bound every blocking job to `limit`
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    pub fn core(&self) -> &PanelsimCore {
        &self.core
    }

    pub async fn inspect(&self, upload: Upload) -> Result<Interpretation, PanelsimError> {
        self.run_blocking(move |core, cancel| core.inspect(&upload, cancel))
            .await
    }

    pub async fn import_pdf(
        &self,
        org: OrgId,
        upload: Upload,
        client: Option<ClientId>,
    ) -> Result<ImportOutcome, PanelsimError> {
        self.run_blocking(move |core, cancel| core.import(&org, &upload, client, cancel))
            .await
    }

    pub async fn list(&self, org: OrgId) -> Result<Vec<Circuit>, PanelsimError> {
        self.run_blocking(move |core, _| core.list(&org)).await
    }

    pub async fn get(&self, org: OrgId, id: CircuitId) -> Result<Circuit, PanelsimError> {
        self.run_blocking(move |core, _| core.get(&org, id)).await
    }

    pub async fn simulate(&self, org: OrgId, id: CircuitId) -> Result<SimulationResult, PanelsimError> {
        self.run_blocking(move |core, cancel| core.simulate(&org, id, cancel))
            .await
    }

    /// Simulate several circuits concurrently. Results come back in the
    /// order of `ids`; one failure does not affect the others.
    pub async fn simulate_all(
        &self,
        org: OrgId,
        ids: Vec<CircuitId>,
    ) -> Vec<Result<SimulationResult, PanelsimError>> {
        let mut set = JoinSet::new();
        for (slot, id) in ids.iter().copied().enumerate() {
            let service = self.clone();
            let org = org.clone();
            set.spawn(async move { (slot, service.simulate(org, id).await) });
        }

        let mut results: Vec<Option<Result<SimulationResult, PanelsimError>>> =
            (0..ids.len()).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((slot, result)) => results[slot] = Some(result),
                Err(e) => tracing::warn!("Simulation task failed: {}", e),
            }
        }

        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(PanelsimError::Task("simulation task aborted".to_string()))))
            .collect()
    }

    pub async fn history(
        &self,
        org: OrgId,
        id: CircuitId,
    ) -> Result<Vec<SimulationResult>, PanelsimError> {
        self.run_blocking(move |core, _| core.history(&org, id)).await
    }

    pub async fn detach_client(&self, org: OrgId, client: ClientId) -> Result<usize, PanelsimError> {
        self.run_blocking(move |core, _| core.detach_client(&org, &client))
            .await
    }

    async fn run_blocking<T, F>(&self, job: F) -> Result<T, PanelsimError>
    where
        T: Send + 'static,
        F: FnOnce(&PanelsimCore, &CancelToken) -> Result<T, PanelsimError> + Send + 'static,
    {
        let core = Arc::clone(&self.core);
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let mut handle = tokio::task::spawn_blocking(move || job(&core, &token));

        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => joined,
                Err(_) if cancel.cancel() => {
                    tracing::warn!("Job exceeded {:?}, cancelled", limit);
                    return Err(PanelsimError::TimedOut(limit));
                }
                Err(_) => {
                    tracing::debug!("Job exceeded {:?} after committing, awaiting it", limit);
                    handle.await
                }
            },
            None => handle.await,
        };
        joined.map_err(|e| PanelsimError::Task(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::{CircuitDraft, Component, ComponentKind, Connection};
    use crate::config::EngineConfig;
    use crate::store::{self, CircuitRepository, NewCircuit, SqliteCircuitStore};
    use uuid::Uuid;

    fn service() -> CircuitService {
        CircuitService::new(PanelsimCore::in_memory(EngineConfig::default()).unwrap())
    }

    fn store_radial(service: &CircuitService, org: &OrgId, name: &str) -> CircuitId {
        let draft = CircuitDraft::new(name)
            .with_component(Component::new("T1", ComponentKind::Source).with_voltage(230.0))
            .with_component(Component::new("L1", ComponentKind::Load).with_current(4.0))
            .with_connection(Connection::new("W1", "T1", "L1"));
        service.core().repository().create(org, draft.into()).unwrap().id
    }

    #[tokio::test]
    async fn test_unsupported_content_type() {
        let upload = Upload {
            name: "photo".to_string(),
            content_type: "image/png".to_string(),
            bytes: vec![0x89, 0x50],
        };
        let err = service()
            .import_pdf(OrgId::new("acme"), upload, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PanelsimError::UnsupportedContentType(_)));
    }

    #[tokio::test]
    async fn test_simulate_then_history() {
        let service = service();
        let org = OrgId::new("acme");
        let id = store_radial(&service, &org, "Panel A");

        let first = service.simulate(org.clone(), id).await.unwrap();
        let second = service.simulate(org.clone(), id).await.unwrap();
        let history = service.history(org, id).await.unwrap();

        assert_eq!(history.len(), 2);
        let ids: Vec<_> = history.iter().map(|r| r.id).collect();
        assert!(ids.contains(&first.id));
        assert!(ids.contains(&second.id));
    }

    #[tokio::test]
    async fn test_simulate_all_keeps_order() {
        let service = service();
        let org = OrgId::new("acme");
        let a = store_radial(&service, &org, "A");
        let b = store_radial(&service, &org, "B");
        let missing = CircuitId(9999);

        let results = service.simulate_all(org, vec![b, missing, a]).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().circuit_id, b);
        assert!(results[1].as_ref().unwrap_err().is_not_found());
        assert_eq!(results[2].as_ref().unwrap().circuit_id, a);
    }

    #[tokio::test]
    async fn test_other_tenant_cannot_simulate() {
        let service = service();
        let id = store_radial(&service, &OrgId::new("acme"), "A");
        let err = service.simulate(OrgId::new("globex"), id).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(service.list(OrgId::new("globex")).await.unwrap().is_empty());
    }

    /// Store whose simulation writes outlast the service timeout
    struct SlowHistory {
        inner: SqliteCircuitStore,
        delay: Duration,
    }

    impl CircuitRepository for SlowHistory {
        fn create(&self, org: &OrgId, new: NewCircuit) -> store::Result<Circuit> {
            self.inner.create(org, new)
        }

        fn list_by_organization(&self, org: &OrgId) -> store::Result<Vec<Circuit>> {
            self.inner.list_by_organization(org)
        }

        fn list_by_client(&self, org: &OrgId, client: &ClientId) -> store::Result<Vec<Circuit>> {
            self.inner.list_by_client(org, client)
        }

        fn get_by_id(&self, id: CircuitId, org: &OrgId) -> store::Result<Circuit> {
            self.inner.get_by_id(id, org)
        }

        fn detach_client(&self, org: &OrgId, client: &ClientId) -> store::Result<usize> {
            self.inner.detach_client(org, client)
        }

        fn save_simulation(&self, org: &OrgId, result: &SimulationResult) -> store::Result<()> {
            std::thread::sleep(self.delay);
            self.inner.save_simulation(org, result)
        }

        fn get_simulation(&self, org: &OrgId, id: Uuid) -> store::Result<SimulationResult> {
            self.inner.get_simulation(org, id)
        }

        fn list_simulations(
            &self,
            org: &OrgId,
            circuit: CircuitId,
        ) -> store::Result<Vec<SimulationResult>> {
            self.inner.list_simulations(org, circuit)
        }
    }

    #[tokio::test]
    async fn test_timeout_after_commit_waits_for_write() {
        let repository = Arc::new(SlowHistory {
            inner: SqliteCircuitStore::open_in_memory().unwrap(),
            delay: Duration::from_millis(300),
        });
        let core = PanelsimCore::new(EngineConfig::default(), repository).unwrap();
        let service = CircuitService::new(core).with_timeout(Duration::from_millis(50));
        let org = OrgId::new("acme");
        let id = store_radial(&service, &org, "Slow");

        let result = service.simulate(org.clone(), id).await.unwrap();

        let history = service.history(org, id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, result.id);
    }

    #[tokio::test]
    async fn test_timeout_trips_cancel() {
        let service = service().with_timeout(Duration::from_millis(20));
        let (tx, rx) = std::sync::mpsc::channel();

        let err = service
            .run_blocking(move |_, cancel| {
                while !cancel.is_cancelled() {
                    std::thread::sleep(Duration::from_millis(1));
                }
                let _ = tx.send(());
                Err::<(), _>(PanelsimError::Cancelled)
            })
            .await
            .unwrap_err();

        assert!(matches!(err, PanelsimError::TimedOut(_)));
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }
}
