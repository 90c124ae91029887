//! Rating checks on a solved network.
//!
//! Violations are produced in a fixed order: load overloads, device
//! overloads, conductor sizing, voltage drop. Within each group they follow
//! component or connection order.

use std::collections::{HashSet, VecDeque};

use crate::circuit::{CircuitGraph, Component, ComponentKind, ConductorMaterial, Connection};
use crate::config::SimulationOptions;

use super::ampacity::ampacity;
use super::result::{Severity, Violation, ViolationKind};

/// Currents below this are treated as no flow.
const FLOW_EPSILON: f64 = 1e-9;

/// Solved state handed to the checks. All slices are indexed like the
/// circuit's components or connections.
pub(crate) struct Observed<'a> {
    pub components: &'a [Component],
    pub connections: &'a [Connection],
    pub graph: &'a CircuitGraph,
    pub powered: &'a [bool],
    /// Nominal voltage of the feeding source, per component
    pub nominal: &'a [f64],
    pub voltages: &'a [f64],
    /// Draw for loads, throughput otherwise
    pub currents: &'a [f64],
    /// Signed connection current, positive from `source` to `target`
    pub flows: &'a [f64],
}

pub(crate) fn run(observed: &Observed<'_>, options: &SimulationOptions) -> Vec<Violation> {
    let mut violations = Vec::new();

    let overloaded_loads = load_overloads(observed, options, &mut violations);
    device_overloads(observed, options, &overloaded_loads, &mut violations);
    conductor_sizing(observed, options, &mut violations);
    voltage_drop(observed, options, &mut violations);

    violations
}

fn severity(measured: f64, limit: f64, options: &SimulationOptions) -> Severity {
    if limit > 0.0 && measured / limit >= options.fault_overload_ratio {
        Severity::Fault
    } else {
        Severity::Warning
    }
}

fn exceeds(measured: f64, limit: f64) -> bool {
    measured > limit * (1.0 + 1e-9) + FLOW_EPSILON
}

/// Rating that limits current through a component, if any
fn capacity(component: &Component) -> f64 {
    if component.kind.is_current_limiting() {
        component.rated.current_a.unwrap_or(f64::INFINITY)
    } else {
        f64::INFINITY
    }
}

/// Residual capacities below this count as saturated.
const CAPACITY_EPSILON: f64 = 1e-12;

/// Flow network over the component ratings. Every component becomes an
/// in-node `2i` and an out-node `2i + 1` joined by its rating; connections
/// join out-nodes to in-nodes in both directions without limit. Sources
/// are fed from a common root and are never entered from the network.
struct SupplyNetwork {
    /// `(head, capacity)`; edge `e ^ 1` is the reverse of edge `e`
    edges: Vec<(usize, f64)>,
    adjacency: Vec<Vec<usize>>,
    root: usize,
    /// Stands in for an unrated link; larger than every finite cut
    unbounded: f64,
}

impl SupplyNetwork {
    fn build(observed: &Observed<'_>) -> Self {
        let components = observed.components;
        let count = components.len();
        let finite_total: f64 = components
            .iter()
            .map(capacity)
            .filter(|c| c.is_finite())
            .sum();
        let mut network = Self {
            edges: Vec::new(),
            adjacency: vec![Vec::new(); 2 * count + 1],
            root: 2 * count,
            unbounded: finite_total + 1.0,
        };

        for (i, component) in components.iter().enumerate() {
            if !observed.powered[i] {
                continue;
            }
            let limit = capacity(component);
            network.add_edge(2 * i, 2 * i + 1, limit);
            if component.is_source() {
                network.add_edge(network.root, 2 * i, f64::INFINITY);
            }
        }

        for connection in observed.connections {
            let Some((a, b)) = observed.graph.endpoints(connection) else {
                continue;
            };
            let (a, b) = (observed.graph.component_index(a), observed.graph.component_index(b));
            if !observed.powered[a] || !observed.powered[b] {
                continue;
            }
            for (from, to) in [(a, b), (b, a)] {
                if !components[to].is_source() {
                    network.add_edge(2 * from + 1, 2 * to, f64::INFINITY);
                }
            }
        }
        network
    }

    fn add_edge(&mut self, from: usize, to: usize, capacity: f64) {
        let capacity = if capacity.is_finite() {
            capacity
        } else {
            self.unbounded
        };
        self.adjacency[from].push(self.edges.len());
        self.edges.push((to, capacity));
        self.adjacency[to].push(self.edges.len());
        self.edges.push((from, 0.0));
    }

    /// Edmonds-Karp from the root to `sink`. `None` when the sink can be
    /// reached without crossing a rated component.
    fn max_flow(&self, sink: usize) -> Option<f64> {
        let mut residual: Vec<f64> = self.edges.iter().map(|(_, c)| *c).collect();
        let mut total = 0.0;

        loop {
            let mut via: Vec<Option<usize>> = vec![None; self.adjacency.len()];
            let mut queue = VecDeque::from([self.root]);
            while let Some(node) = queue.pop_front() {
                if node == sink {
                    break;
                }
                for &edge in &self.adjacency[node] {
                    let head = self.edges[edge].0;
                    if head != self.root && via[head].is_none() && residual[edge] > CAPACITY_EPSILON {
                        via[head] = Some(edge);
                        queue.push_back(head);
                    }
                }
            }
            if via[sink].is_none() {
                break;
            }

            let mut push = f64::INFINITY;
            let mut node = sink;
            while let Some(edge) = via[node] {
                push = push.min(residual[edge]);
                node = self.edges[edge ^ 1].0;
            }
            let mut node = sink;
            while let Some(edge) = via[node] {
                residual[edge] -= push;
                residual[edge ^ 1] += push;
                node = self.edges[edge ^ 1].0;
            }
            total += push;
            if total >= self.unbounded {
                return None;
            }
        }
        Some(total)
    }
}

/// Loads whose draw exceeds what all sources together can deliver to them
/// through the rated components in between. Returns `(component index,
/// draw)` of each.
fn load_overloads(
    observed: &Observed<'_>,
    options: &SimulationOptions,
    violations: &mut Vec<Violation>,
) -> Vec<(usize, f64)> {
    let network = SupplyNetwork::build(observed);
    let mut overloaded = Vec::new();

    for (i, component) in observed.components.iter().enumerate() {
        if !component.is_load() || !observed.powered[i] {
            continue;
        }
        let Some(limit) = network.max_flow(2 * i) else {
            continue;
        };
        let measured = observed.currents[i];
        if !exceeds(measured, limit) {
            continue;
        }
        violations.push(Violation {
            kind: ViolationKind::Overload,
            severity: severity(measured, limit, options),
            component_id: Some(component.id.clone()),
            connection_id: None,
            measured,
            limit,
            message: format!(
                "{} draws {:.2} A but its supply is limited to {:.2} A",
                component.id, measured, limit
            ),
        });
        overloaded.push((i, measured));
    }
    overloaded
}

/// Rated non-load components carrying more than their rating. An overload
/// is not reported again on a device when an overloaded load downstream of
/// it draws more than the device rating by itself.
fn device_overloads(
    observed: &Observed<'_>,
    options: &SimulationOptions,
    overloaded_loads: &[(usize, f64)],
    violations: &mut Vec<Violation>,
) {
    for (i, component) in observed.components.iter().enumerate() {
        if component.is_load() || !observed.powered[i] {
            continue;
        }
        let Some(limit) = component.rated.current_a else {
            continue;
        };
        let measured = observed.currents[i];
        if !exceeds(measured, limit) {
            continue;
        }

        let downstream = downstream_of(observed, i);
        let explained = overloaded_loads
            .iter()
            .any(|(load, draw)| downstream.contains(load) && exceeds(*draw, limit));
        if explained {
            tracing::debug!(
                "Overload on {} explained by an overloaded load downstream",
                component.id
            );
            continue;
        }

        violations.push(Violation {
            kind: ViolationKind::Overload,
            severity: severity(measured, limit, options),
            component_id: Some(component.id.clone()),
            connection_id: None,
            measured,
            limit,
            message: format!(
                "{} {} carries {:.2} A, rated {:.2} A",
                component.kind, component.id, measured, limit
            ),
        });
    }
}

/// Components reached from `start` by following the direction of current
/// flow, without passing through another source.
fn downstream_of(observed: &Observed<'_>, start: usize) -> HashSet<usize> {
    let mut seen = HashSet::new();
    let mut stack = vec![start];
    seen.insert(start);

    while let Some(u) = stack.pop() {
        let Some(node) = observed.graph.node_by_component(u) else {
            continue;
        };
        for (conn, next) in observed.graph.incident(node) {
            let v = observed.graph.component_index(next);
            if seen.contains(&v) || observed.components[v].is_source() {
                continue;
            }
            let from_source_end = observed.connections[conn].source == observed.components[u].id;
            let flow = observed.flows[conn];
            let away = if from_source_end {
                flow > FLOW_EPSILON
            } else {
                flow < -FLOW_EPSILON
            };
            if away {
                seen.insert(v);
                stack.push(v);
            }
        }
    }
    seen
}

/// Conductors carrying more than their ampacity: connections with a known
/// cross-section, and cables that have a cross-section but no explicit
/// current rating.
fn conductor_sizing(
    observed: &Observed<'_>,
    options: &SimulationOptions,
    violations: &mut Vec<Violation>,
) {
    for (k, connection) in observed.connections.iter().enumerate() {
        let Some(conductor) = &connection.conductor else {
            continue;
        };
        let Some(cross_section) = conductor.cross_section_mm2 else {
            continue;
        };
        let material = conductor.material.unwrap_or(ConductorMaterial::Copper);
        let limit = ampacity(material, cross_section);
        let measured = observed.flows[k].abs();
        if !exceeds(measured, limit) {
            continue;
        }
        violations.push(Violation {
            kind: ViolationKind::UndersizedConductor,
            severity: severity(measured, limit, options),
            component_id: None,
            connection_id: Some(connection.id.clone()),
            measured,
            limit,
            message: format!(
                "{} ({} mm² {}) carries {:.2} A, ampacity {:.2} A",
                connection.id, cross_section, material, measured, limit
            ),
        });
    }

    for (i, component) in observed.components.iter().enumerate() {
        if component.kind != ComponentKind::Cable
            || component.rated.current_a.is_some()
            || !observed.powered[i]
        {
            continue;
        }
        let Some(cross_section) = component.rated.cross_section_mm2 else {
            continue;
        };
        let limit = ampacity(ConductorMaterial::Copper, cross_section);
        let measured = observed.currents[i];
        if !exceeds(measured, limit) {
            continue;
        }
        violations.push(Violation {
            kind: ViolationKind::UndersizedConductor,
            severity: severity(measured, limit, options),
            component_id: Some(component.id.clone()),
            connection_id: None,
            measured,
            limit,
            message: format!(
                "cable {} ({} mm²) carries {:.2} A, ampacity {:.2} A",
                component.id, cross_section, measured, limit
            ),
        });
    }
}

fn voltage_drop(observed: &Observed<'_>, options: &SimulationOptions, violations: &mut Vec<Violation>) {
    for (i, component) in observed.components.iter().enumerate() {
        if component.is_source() || !observed.powered[i] {
            continue;
        }
        let nominal = observed.nominal[i];
        if nominal <= 0.0 {
            continue;
        }
        let drop_percent = (nominal - observed.voltages[i]) / nominal * 100.0;
        if drop_percent <= options.max_voltage_drop_percent {
            continue;
        }
        violations.push(Violation {
            kind: ViolationKind::VoltageDrop,
            severity: Severity::Warning,
            component_id: Some(component.id.clone()),
            connection_id: None,
            measured: drop_percent,
            limit: options.max_voltage_drop_percent,
            message: format!(
                "{} is at {:.1} V, {:.2} % below {:.1} V",
                component.id, observed.voltages[i], drop_percent, nominal
            ),
        });
    }
}
