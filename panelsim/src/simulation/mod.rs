//! Simulation Engine
//!
//! Steady-state load-flow over a stored circuit:
//!
//! 1. Breadth-first search from every source marks the powered set and
//!    seeds node voltages with the feeding source's voltage.
//! 2. Branch resistances come from conductor data (`2·ρ·L/A`) or a fixed
//!    link resistance; cables add half their own resistance to each
//!    incident connection.
//! 3. Gauss-Seidel relaxation solves the node voltages ([`solver`]).
//! 4. Rating checks turn currents and voltages into violations.
//!
//! The circuit is only borrowed. Each run yields a new
//! [`SimulationResult`] and nothing else changes.

pub mod ampacity;
mod checks;
pub mod result;
mod solver;

use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::circuit::{
    Circuit, CircuitId, Component, ComponentKind, ConductorMaterial, Connection,
};
use crate::config::SimulationOptions;
pub use result::{
    ComponentReading, ComponentStatus, ConnectionReading, OverallStatus, Severity,
    SimulationResult, Violation, ViolationKind,
};
use solver::{Demand, Network};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulationError {
    #[error("Circuit {0} has no components")]
    EmptyCircuit(CircuitId),
    #[error("Simulation cancelled")]
    Cancelled,
}

/// Constant-power loads are evaluated at no less than this share of their
/// nominal voltage.
const POWER_FLOOR_RATIO: f64 = 0.1;

/// Runs simulations with a fixed set of options
#[derive(Debug, Clone, Default)]
pub struct Simulator {
    options: SimulationOptions,
}

impl Simulator {
    pub fn new(options: SimulationOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SimulationOptions {
        &self.options
    }

    pub fn simulate(
        &self,
        circuit: &Circuit,
        cancel: &CancelToken,
    ) -> Result<SimulationResult, SimulationError> {
        if !circuit.is_simulatable() {
            return Err(SimulationError::EmptyCircuit(circuit.id));
        }
        if cancel.is_cancelled() {
            return Err(SimulationError::Cancelled);
        }

        let components = &circuit.components;
        let connections = &circuit.connections;
        let options = &self.options;
        let graph = circuit.graph();

        let source_voltage = |i: usize| {
            components[i]
                .rated
                .voltage_v
                .unwrap_or(options.default_source_voltage_v)
        };
        let fed_by = graph.feeding_sources(|i| components[i].is_source());
        let powered: Vec<bool> = fed_by.iter().map(Option::is_some).collect();
        let nominal: Vec<f64> = fed_by
            .iter()
            .map(|f| f.map(source_voltage).unwrap_or(0.0))
            .collect();
        let fixed: Vec<Option<f64>> = (0..components.len())
            .map(|i| components[i].is_source().then(|| source_voltage(i)))
            .collect();
        let demand: Vec<Demand> = components.iter().map(demand_of).collect();
        let floor: Vec<f64> = nominal.iter().map(|v| v * POWER_FLOOR_RATIO).collect();
        let resistance = branch_resistances(components, connections, options);

        let unpowered = powered.iter().filter(|p| !**p).count();
        if unpowered > 0 {
            tracing::debug!(
                "Circuit {}: {} components not reached by any source",
                circuit.id,
                unpowered
            );
        }

        let network = Network {
            graph: &graph,
            resistance: &resistance,
            fixed: &fixed,
            seed: &nominal,
            powered: &powered,
            demand: &demand,
            floor: &floor,
        };
        let solution = solver::solve(&network, options, cancel)?;
        let mut diverged = false;
        let voltages: Vec<f64> = solution
            .voltages
            .into_iter()
            .map(|v| finite_or_zero(v, &mut diverged))
            .collect();

        // Signed connection currents, positive from source to target
        let mut flows: Vec<f64> = vec![0.0; connections.len()];
        let mut inflow: Vec<f64> = vec![0.0; components.len()];
        let mut outflow: Vec<f64> = vec![0.0; components.len()];
        for (k, connection) in connections.iter().enumerate() {
            let Some((a, b)) = graph.endpoints(connection) else {
                continue;
            };
            let (a, b) = (graph.component_index(a), graph.component_index(b));
            if !powered[a] || !powered[b] {
                continue;
            }
            let flow = finite_or_zero((voltages[a] - voltages[b]) / resistance[k], &mut diverged);
            flows[k] = flow;
            let (from, to) = if flow >= 0.0 { (a, b) } else { (b, a) };
            outflow[from] += flow.abs();
            inflow[to] += flow.abs();
        }

        let currents: Vec<f64> = (0..components.len())
            .map(|i| {
                let current = if !powered[i] {
                    0.0
                } else if components[i].is_load() {
                    demand[i].current_at(voltages[i], floor[i])
                } else {
                    inflow[i].max(outflow[i])
                };
                finite_or_zero(current, &mut diverged)
            })
            .collect();

        if diverged {
            tracing::warn!(
                "Circuit {}: solver produced non-finite values, readings zeroed",
                circuit.id
            );
        }
        let converged = solution.converged && !diverged;

        let mut violations = Vec::new();
        if !converged {
            violations.push(Violation {
                kind: ViolationKind::NonConvergent,
                severity: Severity::Fault,
                component_id: None,
                connection_id: None,
                measured: solution.residual,
                limit: options.tolerance_v,
                message: if diverged {
                    format!("solver diverged after {} iterations", solution.iterations)
                } else {
                    format!(
                        "solver did not converge within {} iterations",
                        solution.iterations
                    )
                },
            });
        }
        violations.extend(checks::run(
            &checks::Observed {
                components,
                connections,
                graph: &graph,
                powered: &powered,
                nominal: &nominal,
                voltages: &voltages,
                currents: &currents,
                flows: &flows,
            },
            options,
        ));

        let mut component_readings = BTreeMap::new();
        for (i, component) in components.iter().enumerate() {
            let reading = if powered[i] {
                ComponentReading {
                    voltage_v: voltages[i],
                    current_a: currents[i],
                    status: status_of(&component.id, &violations),
                }
            } else {
                ComponentReading::unpowered()
            };
            component_readings.insert(component.id.clone(), reading);
        }

        let mut connection_readings = BTreeMap::new();
        for (k, connection) in connections.iter().enumerate() {
            let (from, to) = if flows[k] >= 0.0 {
                (&connection.source, &connection.target)
            } else {
                (&connection.target, &connection.source)
            };
            connection_readings.insert(
                connection.id.clone(),
                ConnectionReading {
                    current_a: flows[k].abs(),
                    from: from.clone(),
                    to: to.clone(),
                },
            );
        }

        let status = OverallStatus::from_violations(&violations);
        tracing::info!(
            "Simulated circuit {}: {} after {} iterations, {} violations",
            circuit.id,
            status,
            solution.iterations,
            violations.len()
        );

        Ok(SimulationResult {
            id: Uuid::new_v4(),
            circuit_id: circuit.id,
            computed_at: Utc::now(),
            components: component_readings,
            connections: connection_readings,
            violations,
            iterations: solution.iterations,
            converged,
            status,
        })
    }
}

/// Non-finite values become zero and set `diverged`.
fn finite_or_zero(value: f64, diverged: &mut bool) -> f64 {
    if value.is_finite() {
        value
    } else {
        *diverged = true;
        0.0
    }
}

fn demand_of(component: &Component) -> Demand {
    if !component.is_load() {
        return Demand::None;
    }
    match (component.rated.current_a, component.rated.power_w) {
        (Some(amps), _) => Demand::Current(amps),
        (None, Some(watts)) => Demand::Power(watts),
        (None, None) => Demand::None,
    }
}

fn status_of(component_id: &str, violations: &[Violation]) -> ComponentStatus {
    let mut status = ComponentStatus::Ok;
    for violation in violations {
        if violation.component_id.as_deref() != Some(component_id) {
            continue;
        }
        match violation.kind {
            ViolationKind::Overload | ViolationKind::UndersizedConductor => {
                return ComponentStatus::Overloaded
            }
            ViolationKind::VoltageDrop => status = ComponentStatus::UnderVoltage,
            ViolationKind::NonConvergent => {}
        }
    }
    status
}

/// `2·ρ·L/A` for a go-and-return run
fn run_resistance(material: ConductorMaterial, length_m: f64, cross_section_mm2: f64) -> f64 {
    2.0 * material.resistivity() * length_m / cross_section_mm2
}

fn usable(r: f64) -> Option<f64> {
    (r.is_finite() && r > 0.0).then_some(r)
}

fn branch_resistances(
    components: &[Component],
    connections: &[Connection],
    options: &SimulationOptions,
) -> Vec<f64> {
    let cable_halves: HashMap<&str, f64> = components
        .iter()
        .filter(|c| c.kind == ComponentKind::Cable)
        .filter_map(|c| {
            let own = c.rated.impedance_ohm.or_else(|| {
                match (c.rated.length_m, c.rated.cross_section_mm2) {
                    (Some(l), Some(a)) => usable(run_resistance(ConductorMaterial::Copper, l, a)),
                    _ => None,
                }
            })?;
            (own.is_finite() && own >= 0.0).then_some((c.id.as_str(), own / 2.0))
        })
        .collect();

    connections
        .iter()
        .map(|connection| {
            let base = connection
                .conductor
                .as_ref()
                .and_then(|c| match (c.length_m, c.cross_section_mm2) {
                    (Some(l), Some(a)) => usable(run_resistance(
                        c.material.unwrap_or(ConductorMaterial::Copper),
                        l,
                        a,
                    )),
                    _ => None,
                })
                .unwrap_or(options.link_resistance_ohm);
            let halves = cable_halves.get(connection.source.as_str()).copied().unwrap_or(0.0)
                + cable_halves.get(connection.target.as_str()).copied().unwrap_or(0.0);
            base + halves
        })
        .collect()
}
