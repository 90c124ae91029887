//! End-to-end: PDF upload through import, simulation and history

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{many_pages_pdf, overloaded_board_pdf, prose_pdf, radial_board_pdf};
use panelsim::prelude::*;
use panelsim::{EngineConfig, IngestError, InterpretError, SqliteCircuitStore};
use tempfile::TempDir;

fn core_at(dir: &TempDir) -> PanelsimCore {
    let store = SqliteCircuitStore::open(&dir.path().join("pipeline.db")).unwrap();
    PanelsimCore::new(EngineConfig::default(), Arc::new(store)).unwrap()
}

#[test]
fn test_import_then_simulate_radial_board() {
    let dir = TempDir::new().unwrap();
    let core = core_at(&dir);
    let org = OrgId::new("acme");

    let outcome = core
        .import(
            &org,
            &Upload::pdf("radial.pdf", radial_board_pdf()),
            Some(ClientId::new("c-1")),
            &CancelToken::new(),
        )
        .expect("import should succeed");
    assert_eq!(outcome.circuit.name, "radial.pdf");
    assert_eq!(outcome.circuit.components.len(), 6);
    assert_eq!(outcome.report.confidence(), 1.0);

    let result = core
        .simulate(&org, outcome.circuit.id, &CancelToken::new())
        .unwrap();
    assert_eq!(result.status, OverallStatus::Ok, "{:?}", result.violations);
    assert!((result.components["Q1"].current_a - 13.0).abs() < 0.01);

    let history = core.history(&org, outcome.circuit.id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, result.id);
}

#[test]
fn test_overloaded_board_warns_on_the_load() {
    let dir = TempDir::new().unwrap();
    let core = core_at(&dir);
    let org = OrgId::new("acme");

    let outcome = core
        .import(
            &org,
            &Upload::pdf("heater.pdf", overloaded_board_pdf()),
            None,
            &CancelToken::new(),
        )
        .unwrap();
    let result = core
        .simulate(&org, outcome.circuit.id, &CancelToken::new())
        .unwrap();

    assert_eq!(result.status, OverallStatus::Warning);
    assert_eq!(result.violations.len(), 1);
    assert_eq!(result.violations[0].kind, ViolationKind::Overload);
    assert_eq!(result.violations[0].component_id.as_deref(), Some("L1"));
}

#[test]
fn test_failed_imports_store_nothing() {
    let dir = TempDir::new().unwrap();
    let core = core_at(&dir);
    let org = OrgId::new("acme");
    let cancel = CancelToken::new();

    let err = core
        .import(&org, &Upload::pdf("report.pdf", prose_pdf()), None, &cancel)
        .unwrap_err();
    assert!(matches!(
        err,
        PanelsimError::Interpret(InterpretError::UnrecognizedSchema { blocks: 2 })
    ));

    let err = core
        .import(&org, &Upload::pdf("junk.pdf", b"%PDF-1.4 junk".to_vec()), None, &cancel)
        .unwrap_err();
    assert!(matches!(err, PanelsimError::Ingest(IngestError::UnreadableDocument(_))));

    let err = core
        .import(
            &org,
            &Upload {
                name: "board.txt".to_string(),
                content_type: "text/plain".to_string(),
                bytes: radial_board_pdf(),
            },
            None,
            &cancel,
        )
        .unwrap_err();
    assert!(matches!(err, PanelsimError::UnsupportedContentType(_)));

    assert!(core.list(&org).unwrap().is_empty());
}

#[test]
fn test_page_limit_from_config() {
    let mut config = EngineConfig::default();
    config.import.max_pages = 2;
    let core = PanelsimCore::in_memory(config).unwrap();

    let err = core
        .import(
            &OrgId::new("acme"),
            &Upload::pdf("big.pdf", many_pages_pdf(5)),
            None,
            &CancelToken::new(),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        PanelsimError::Ingest(IngestError::PageLimitExceeded { pages: 5, limit: 2 })
    ));
}

#[test]
fn test_cancelled_import() {
    let core = PanelsimCore::in_memory(EngineConfig::default()).unwrap();
    let org = OrgId::new("acme");
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = core
        .import(&org, &Upload::pdf("radial.pdf", radial_board_pdf()), None, &cancel)
        .unwrap_err();
    assert!(matches!(err, PanelsimError::Cancelled));
    assert!(core.list(&org).unwrap().is_empty());
}

#[tokio::test]
async fn test_service_round_trip() {
    let service = CircuitService::new(PanelsimCore::in_memory(EngineConfig::default()).unwrap())
        .with_timeout(Duration::from_secs(30));
    let org = OrgId::new("acme");

    let radial = service
        .import_pdf(org.clone(), Upload::pdf("radial.pdf", radial_board_pdf()), None)
        .await
        .unwrap();
    let heater = service
        .import_pdf(org.clone(), Upload::pdf("heater.pdf", overloaded_board_pdf()), None)
        .await
        .unwrap();

    let listed = service.list(org.clone()).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, heater.circuit.id);

    let results = service
        .simulate_all(org.clone(), vec![radial.circuit.id, heater.circuit.id])
        .await;
    assert_eq!(results[0].as_ref().unwrap().status, OverallStatus::Ok);
    assert_eq!(results[1].as_ref().unwrap().status, OverallStatus::Warning);

    let err = service
        .simulate(OrgId::new("globex"), radial.circuit.id)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}
