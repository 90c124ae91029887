//! Simulation scenarios on stored circuits

use panelsim::prelude::*;
use panelsim::simulation::ComponentStatus;
use panelsim::{
    CircuitRepository, Conductor, ConductorMaterial, SimulationOptions, Simulator,
    SqliteCircuitStore,
};

fn store(draft: CircuitDraft) -> Circuit {
    SqliteCircuitStore::open_in_memory()
        .unwrap()
        .create(&OrgId::new("acme"), draft.into())
        .unwrap()
}

fn source_and_load(load_amps: f64) -> CircuitDraft {
    CircuitDraft::new("Direct feed")
        .with_component(
            Component::new("T1", ComponentKind::Source)
                .with_voltage(230.0)
                .with_current(16.0),
        )
        .with_component(Component::new("L1", ComponentKind::Load).with_current(load_amps))
        .with_connection(Connection::new("W1", "T1", "L1"))
}

fn run(circuit: &Circuit) -> SimulationResult {
    Simulator::default()
        .simulate(circuit, &CancelToken::new())
        .expect("simulation should run")
}

#[test]
fn test_load_within_rating_is_ok() {
    let result = run(&store(source_and_load(10.0)));

    assert_eq!(result.status, OverallStatus::Ok);
    assert!(result.violations.is_empty());
    assert!(result.converged);
    assert!((result.components["L1"].current_a - 10.0).abs() < 1e-6);
    assert!((result.components["L1"].voltage_v - 230.0).abs() < 0.1);
}

#[test]
fn test_overloaded_load_gets_single_violation() {
    let result = run(&store(source_and_load(20.0)));

    assert_eq!(result.violations.len(), 1, "{:?}", result.violations);
    let violation = &result.violations[0];
    assert_eq!(violation.kind, ViolationKind::Overload);
    assert_eq!(violation.component_id.as_deref(), Some("L1"));
    assert_eq!(violation.severity, Severity::Warning);
    assert_eq!(result.status, OverallStatus::Warning);
    assert_eq!(result.components["L1"].status, ComponentStatus::Overloaded);
}

#[test]
fn test_severity_follows_configured_threshold() {
    let circuit = store(source_and_load(20.0));
    let simulator = Simulator::new(SimulationOptions::default().with_fault_overload_ratio(1.2));
    let result = simulator.simulate(&circuit, &CancelToken::new()).unwrap();

    assert_eq!(result.violations.len(), 1);
    assert_eq!(result.violations[0].severity, Severity::Fault);
    assert_eq!(result.status, OverallStatus::Fault);
}

#[test]
fn test_isolated_component_does_not_disturb_others() {
    let connected = run(&store(source_and_load(10.0)));
    let with_island = run(&store(
        source_and_load(10.0).with_component(Component::new("L9", ComponentKind::Load).with_current(50.0)),
    ));

    assert_eq!(with_island.components["L9"].status, ComponentStatus::Unpowered);
    assert_eq!(with_island.components["L9"].current_a, 0.0);
    assert!(with_island.violations.is_empty());
    assert!(
        (with_island.components["L1"].voltage_v - connected.components["L1"].voltage_v).abs() < 1e-9
    );
    assert!(
        (with_island.components["L1"].current_a - connected.components["L1"].current_a).abs() < 1e-9
    );
}

#[test]
fn test_every_component_has_one_reading() {
    let circuit = store(
        CircuitDraft::new("Board")
            .with_component(Component::new("T1", ComponentKind::Source).with_voltage(230.0))
            .with_component(Component::new("X1", ComponentKind::Bus))
            .with_component(Component::new("Q1", ComponentKind::Breaker).with_current(16.0))
            .with_component(Component::new("Q2", ComponentKind::Breaker).with_current(10.0))
            .with_component(Component::new("L1", ComponentKind::Load).with_current(6.0))
            .with_component(Component::new("L2", ComponentKind::Load).with_power(920.0))
            .with_component(Component::new("L3", ComponentKind::Load).with_current(1.0))
            .with_connection(Connection::new("W1", "T1", "X1"))
            .with_connection(Connection::new("W2", "X1", "Q1"))
            .with_connection(Connection::new("W3", "X1", "Q2"))
            .with_connection(Connection::new("W4", "Q1", "L1"))
            .with_connection(Connection::new("W5", "Q2", "L2")),
    );
    let result = run(&circuit);

    assert_eq!(result.components.len(), circuit.components.len());
    for component in &circuit.components {
        assert!(result.components.contains_key(&component.id));
    }
    assert_eq!(result.connections.len(), circuit.connections.len());
    assert!(result.iterations <= SimulationOptions::default().max_iterations);
    assert!((result.components["L2"].current_a - 4.0).abs() < 0.01);
}

#[test]
fn test_ring_main_splits_current() {
    let feeder = Conductor::new(2.5, ConductorMaterial::Copper).with_length(10.0);
    let circuit = store(
        CircuitDraft::new("Ring")
            .with_component(Component::new("T1", ComponentKind::Source).with_voltage(230.0))
            .with_component(Component::new("X1", ComponentKind::Bus))
            .with_component(Component::new("X2", ComponentKind::Bus))
            .with_component(Component::new("L1", ComponentKind::Load).with_current(10.0))
            .with_connection(Connection::new("W1", "T1", "X1"))
            .with_connection(Connection::new("W2", "T1", "X2"))
            .with_connection(Connection::new("W3", "X1", "L1").with_conductor(feeder.clone()))
            .with_connection(Connection::new("W4", "X2", "L1").with_conductor(feeder)),
    );
    let result = run(&circuit);

    assert!(result.converged);
    assert!((result.connections["W3"].current_a.abs() - 5.0).abs() < 0.01);
    assert!((result.connections["W4"].current_a.abs() - 5.0).abs() < 0.01);
    assert_eq!(result.connections["W3"].to, "L1");
}

#[test]
fn test_parallel_breakers_carry_load_within_ratings() {
    let circuit = store(
        CircuitDraft::new("Dual feed")
            .with_component(Component::new("T1", ComponentKind::Source).with_voltage(230.0))
            .with_component(Component::new("Q1", ComponentKind::Breaker).with_current(10.0))
            .with_component(Component::new("Q2", ComponentKind::Breaker).with_current(10.0))
            .with_component(Component::new("L1", ComponentKind::Load).with_current(15.0))
            .with_connection(Connection::new("W1", "T1", "Q1"))
            .with_connection(Connection::new("W2", "T1", "Q2"))
            .with_connection(Connection::new("W3", "Q1", "L1"))
            .with_connection(Connection::new("W4", "Q2", "L1")),
    );
    let result = run(&circuit);

    assert_eq!(result.status, OverallStatus::Ok, "{:?}", result.violations);
    for breaker in ["Q1", "Q2"] {
        assert!(result.components[breaker].current_a <= 10.0);
        assert_eq!(result.components[breaker].status, ComponentStatus::Ok);
    }
    assert_eq!(result.components["L1"].status, ComponentStatus::Ok);
}

#[test]
fn test_meshed_feed_limited_by_narrowest_cut() {
    // Two breakers in parallel behind one 16 A main
    let circuit = store(
        CircuitDraft::new("Meshed")
            .with_component(
                Component::new("T1", ComponentKind::Source)
                    .with_voltage(230.0)
                    .with_current(16.0),
            )
            .with_component(Component::new("Q1", ComponentKind::Breaker).with_current(10.0))
            .with_component(Component::new("Q2", ComponentKind::Breaker).with_current(10.0))
            .with_component(Component::new("L1", ComponentKind::Load).with_current(18.0))
            .with_connection(Connection::new("W1", "T1", "Q1"))
            .with_connection(Connection::new("W2", "T1", "Q2"))
            .with_connection(Connection::new("W3", "Q1", "L1"))
            .with_connection(Connection::new("W4", "Q2", "L1")),
    );
    let result = run(&circuit);

    assert_eq!(result.violations.len(), 1, "{:?}", result.violations);
    assert_eq!(result.violations[0].component_id.as_deref(), Some("L1"));
    assert!((result.violations[0].limit - 16.0).abs() < 1e-9);
}

#[test]
fn test_dead_source_result_reads_back() {
    let store = SqliteCircuitStore::open_in_memory().unwrap();
    let org = OrgId::new("acme");
    let stored = store
        .create(
            &org,
            CircuitDraft::new("Feed")
                .with_component(Component::new("T1", ComponentKind::Source).with_voltage(230.0))
                .with_component(Component::new("L1", ComponentKind::Load).with_power(100.0))
                .with_connection(Connection::new("W1", "T1", "L1"))
                .into(),
        )
        .unwrap();

    // Circuits built in memory skip validation
    let mut dead = stored.clone();
    for component in dead.components.iter_mut().filter(|c| c.id == "T1") {
        component.rated.voltage_v = Some(0.0);
    }
    let result = run(&dead);

    assert!(result.is_finite());
    assert!(!result.converged);
    assert_eq!(result.status, OverallStatus::Fault);
    assert_eq!(result.count(ViolationKind::NonConvergent), 1);

    store.save_simulation(&org, &result).unwrap();
    let history = store.list_simulations(&org, stored.id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].components, result.components);
}

#[test]
fn test_looser_tolerance_needs_no_more_iterations() {
    let circuit = store(source_and_load(10.0));
    let strict = run(&circuit);
    let loose = Simulator::new(SimulationOptions::default().with_tolerance(1e-2))
        .simulate(&circuit, &CancelToken::new())
        .unwrap();

    assert!(loose.converged);
    assert!(loose.iterations <= strict.iterations);
}

#[test]
fn test_simulation_leaves_circuit_untouched() {
    let circuit = store(source_and_load(20.0));
    let before = circuit.clone();
    let _ = run(&circuit);
    let _ = run(&circuit);
    assert_eq!(circuit, before);
}

#[test]
fn test_results_are_distinct_snapshots() {
    let circuit = store(source_and_load(10.0));
    let first = run(&circuit);
    let second = run(&circuit);

    assert_ne!(first.id, second.id);
    assert_eq!(first.components, second.components);
}
