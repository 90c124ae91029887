//! Gauss-Seidel relaxation on node voltages.
//!
//! Every component is a node. Sources hold a fixed voltage, loads inject a
//! constant current or draw constant power, everything else only passes
//! current on. Each sweep updates the free nodes in component order:
//!
//! ```text
//!   V_i = (Σ_j V_j / R_ij  -  I_i) / Σ_j 1 / R_ij
//! ```
//!
//! The sweep order is fixed, so a given circuit always takes the same
//! number of iterations.

use crate::cancel::CancelToken;
use crate::circuit::CircuitGraph;
use crate::config::SimulationOptions;

use super::SimulationError;

/// What a node draws from the network
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Demand {
    None,
    Current(f64),
    Power(f64),
}

impl Demand {
    /// Current drawn at voltage `v`. Constant-power draw is evaluated no
    /// lower than `floor_v` so a collapsing node cannot demand unbounded
    /// current.
    pub(crate) fn current_at(&self, v: f64, floor_v: f64) -> f64 {
        match *self {
            Demand::None => 0.0,
            Demand::Current(a) => a,
            Demand::Power(w) => w / v.max(floor_v),
        }
    }
}

pub(crate) struct Network<'a> {
    pub graph: &'a CircuitGraph,
    /// Per connection
    pub resistance: &'a [f64],
    /// Per component; `Some` for sources
    pub fixed: &'a [Option<f64>],
    /// Per component; initial voltage, zero when unpowered
    pub seed: &'a [f64],
    pub powered: &'a [bool],
    pub demand: &'a [Demand],
    /// Per component; lower voltage bound for constant-power draw
    pub floor: &'a [f64],
}

#[derive(Debug, Clone)]
pub(crate) struct Solution {
    pub voltages: Vec<f64>,
    pub iterations: usize,
    pub converged: bool,
    /// Largest update of the last finite sweep
    pub residual: f64,
}

pub(crate) fn solve(
    network: &Network<'_>,
    options: &SimulationOptions,
    cancel: &CancelToken,
) -> Result<Solution, SimulationError> {
    let count = network.seed.len();
    let mut voltages = network.seed.to_vec();

    // (conductance, neighbour component) per free node
    let mut free: Vec<(usize, Vec<(f64, usize)>)> = Vec::new();
    for i in 0..count {
        if !network.powered[i] || network.fixed[i].is_some() {
            continue;
        }
        let Some(node) = network.graph.node_by_component(i) else {
            continue;
        };
        let neighbours: Vec<(f64, usize)> = network
            .graph
            .incident(node)
            .into_iter()
            .map(|(conn, other)| {
                (
                    1.0 / network.resistance[conn],
                    network.graph.component_index(other),
                )
            })
            .collect();
        if !neighbours.is_empty() {
            free.push((i, neighbours));
        }
    }

    if free.is_empty() {
        return Ok(Solution {
            voltages,
            iterations: 0,
            converged: true,
            residual: 0.0,
        });
    }

    let mut residual = 0.0;
    let mut iterations = 0;
    while iterations < options.max_iterations {
        if cancel.is_cancelled() {
            tracing::debug!("Solver cancelled after {} iterations", iterations);
            return Err(SimulationError::Cancelled);
        }
        iterations += 1;

        let mut max_delta: f64 = 0.0;
        for (i, neighbours) in &free {
            let mut conductance = 0.0;
            let mut weighted = 0.0;
            for &(g, j) in neighbours {
                conductance += g;
                weighted += g * voltages[j];
            }
            let drawn = network.demand[*i].current_at(voltages[*i], network.floor[*i]);
            let updated = (weighted - drawn) / conductance;
            max_delta = max_delta.max((updated - voltages[*i]).abs());
            voltages[*i] = updated;
        }
        if !max_delta.is_finite() {
            tracing::warn!("Solver diverged after {} iterations", iterations);
            break;
        }
        residual = max_delta;
        if residual < options.tolerance_v {
            return Ok(Solution {
                voltages,
                iterations,
                converged: true,
                residual,
            });
        }
    }

    tracing::warn!(
        "Solver stopped after {} iterations with residual {:e} V",
        iterations,
        residual
    );
    Ok(Solution {
        voltages,
        iterations,
        converged: false,
        residual,
    })
}
