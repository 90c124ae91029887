//! Simulation output types. A result is immutable once produced and is
//! stored as history next to its circuit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::circuit::CircuitId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    Ok,
    Overloaded,
    UnderVoltage,
    Unpowered,
}

impl fmt::Display for ComponentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComponentStatus::Ok => "ok",
            ComponentStatus::Overloaded => "overloaded",
            ComponentStatus::UnderVoltage => "under_voltage",
            ComponentStatus::Unpowered => "unpowered",
        };
        f.pad(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentReading {
    pub voltage_v: f64,
    /// Draw for loads, throughput for everything else
    pub current_a: f64,
    pub status: ComponentStatus,
}

impl ComponentReading {
    pub fn unpowered() -> Self {
        Self {
            voltage_v: 0.0,
            current_a: 0.0,
            status: ComponentStatus::Unpowered,
        }
    }
}

/// Current through a connection, with the direction it flows in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionReading {
    pub current_a: f64,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Overload,
    UndersizedConductor,
    VoltageDrop,
    NonConvergent,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ViolationKind::Overload => "overload",
            ViolationKind::UndersizedConductor => "undersized_conductor",
            ViolationKind::VoltageDrop => "voltage_drop",
            ViolationKind::NonConvergent => "non_convergent",
        };
        f.pad(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Fault,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Fault => write!(f, "fault"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    pub measured: f64,
    pub limit: f64,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Ok,
    Warning,
    Fault,
}

impl OverallStatus {
    /// Worst severity among the violations
    pub fn from_violations(violations: &[Violation]) -> Self {
        match violations.iter().map(|v| v.severity).max() {
            None => OverallStatus::Ok,
            Some(Severity::Warning) => OverallStatus::Warning,
            Some(Severity::Fault) => OverallStatus::Fault,
        }
    }
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            OverallStatus::Ok => "ok",
            OverallStatus::Warning => "warning",
            OverallStatus::Fault => "fault",
        })
    }
}

/// Immutable outcome of one simulation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub id: Uuid,
    pub circuit_id: CircuitId,
    pub computed_at: DateTime<Utc>,
    /// One reading per component id
    pub components: BTreeMap<String, ComponentReading>,
    pub connections: BTreeMap<String, ConnectionReading>,
    pub violations: Vec<Violation>,
    pub iterations: usize,
    pub converged: bool,
    pub status: OverallStatus,
}

impl SimulationResult {
    /// Whether every number in the result is finite and so survives a
    /// JSON round trip.
    pub fn is_finite(&self) -> bool {
        self.components
            .values()
            .all(|r| r.voltage_v.is_finite() && r.current_a.is_finite())
            && self.connections.values().all(|r| r.current_a.is_finite())
            && self
                .violations
                .iter()
                .all(|v| v.measured.is_finite() && v.limit.is_finite())
    }

    pub fn count(&self, kind: ViolationKind) -> usize {
        self.violations.iter().filter(|v| v.kind == kind).count()
    }
}
