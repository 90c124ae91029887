//! Simulate a hand-built radial board and print the readings.
//! Run with: cargo run --example simulate_radial [load amps]

use panelsim::prelude::*;
use panelsim::{CircuitRepository, Conductor, ConductorMaterial};

fn main() -> Result<(), PanelsimError> {
    let load_amps: f64 = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(10.0);

    let draft = CircuitDraft::new("Radial board")
        .with_component(Component::new("T1", ComponentKind::Source).with_voltage(230.0))
        .with_component(Component::new("Q1", ComponentKind::Breaker).with_current(16.0))
        .with_component(Component::new("L1", ComponentKind::Load).with_current(load_amps))
        .with_connection(Connection::new("W1", "T1", "Q1"))
        .with_connection(
            Connection::new("W2", "Q1", "L1")
                .with_conductor(Conductor::new(2.5, ConductorMaterial::Copper).with_length(25.0)),
        );

    let core = PanelsimCore::in_memory(EngineConfig::default())?;
    let org = OrgId::new("example");
    let circuit = core.repository().create(&org, draft.into())?;
    let result = core.simulate(&org, circuit.id, &CancelToken::new())?;

    println!("{}: {} after {} iterations", circuit.name, result.status, result.iterations);
    for (id, reading) in &result.components {
        println!(
            "  {:<4} {:>8.2} V {:>7.2} A  {}",
            id, reading.voltage_v, reading.current_a, reading.status
        );
    }
    for violation in &result.violations {
        println!("  [{}] {}", violation.severity, violation.message);
    }

    if result.status == OverallStatus::Fault {
        std::process::exit(1);
    }
    Ok(())
}
