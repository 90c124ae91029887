//! Circuit Data Types
//!
//! Plain, serde-friendly types shared by the interpreter, the store and the
//! simulation engine. Components and connections live in flat vectors and
//! reference each other by id, so cyclic networks (ring mains) need no
//! ownership tricks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::graph::{CircuitGraph, GraphStats};

/// Organization (tenant) identifier. Every store operation requires one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrgId(String);

impl OrgId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client identifier. A circuit only holds a weak reference to its client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier assigned by the store on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CircuitId(pub i64);

impl fmt::Display for CircuitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Closed set of component kinds found on distribution schematics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Source,
    Breaker,
    Load,
    Bus,
    Cable,
    ProtectiveDevice,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 6] = [
        ComponentKind::Source,
        ComponentKind::Breaker,
        ComponentKind::Load,
        ComponentKind::Bus,
        ComponentKind::Cable,
        ComponentKind::ProtectiveDevice,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Source => "source",
            ComponentKind::Breaker => "breaker",
            ComponentKind::Load => "load",
            ComponentKind::Bus => "bus",
            ComponentKind::Cable => "cable",
            ComponentKind::ProtectiveDevice => "protective_device",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }

    /// Whether the kind limits the current passing through it.
    pub fn is_current_limiting(&self) -> bool {
        !matches!(self, ComponentKind::Load)
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Rated attributes of a component. Which fields apply depends on the kind.
///
/// `current_a` means supply capacity for sources, the rating for breakers,
/// protective devices, buses and cables, and the demand for loads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RatedAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voltage_v: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_a: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_w: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length_m: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impedance_ohm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cross_section_mm2: Option<f64>,
}

impl RatedAttributes {
    pub fn is_empty(&self) -> bool {
        self.named_values().iter().all(|(_, v)| v.is_none())
    }

    /// All fields with their names, in declaration order.
    pub fn named_values(&self) -> [(&'static str, Option<f64>); 6] {
        [
            ("voltage_v", self.voltage_v),
            ("current_a", self.current_a),
            ("power_w", self.power_w),
            ("length_m", self.length_m),
            ("impedance_ohm", self.impedance_ohm),
            ("cross_section_mm2", self.cross_section_mm2),
        ]
    }

    /// Fill fields that are unset here from `other`. Returns the names of
    /// fields where both sides are set but disagree; those keep `self`.
    pub fn merge_missing(&mut self, other: &RatedAttributes) -> Vec<&'static str> {
        let mut conflicts = Vec::new();
        let pairs: [(&'static str, &mut Option<f64>, Option<f64>); 6] = [
            ("voltage_v", &mut self.voltage_v, other.voltage_v),
            ("current_a", &mut self.current_a, other.current_a),
            ("power_w", &mut self.power_w, other.power_w),
            ("length_m", &mut self.length_m, other.length_m),
            ("impedance_ohm", &mut self.impedance_ohm, other.impedance_ohm),
            ("cross_section_mm2", &mut self.cross_section_mm2, other.cross_section_mm2),
        ];
        for (name, mine, theirs) in pairs {
            match (*mine, theirs) {
                (None, Some(v)) => *mine = Some(v),
                (Some(a), Some(b)) if a != b => conflicts.push(name),
                _ => {}
            }
        }
        conflicts
    }
}

/// Where a component was found in the source document (PDF user space).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionHint {
    pub page: u32,
    pub x: f64,
    pub y: f64,
}

impl PositionHint {
    pub fn new(page: u32, x: f64, y: f64) -> Self {
        Self { page, x, y }
    }

    pub fn distance_to(&self, other: &PositionHint) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// A node in the circuit graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub id: String,
    pub kind: ComponentKind,
    #[serde(default)]
    pub rated: RatedAttributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<PositionHint>,
}

impl Component {
    pub fn new(id: impl Into<String>, kind: ComponentKind) -> Self {
        Self {
            id: id.into(),
            kind,
            rated: RatedAttributes::default(),
            label: None,
            position: None,
        }
    }

    pub fn with_voltage(mut self, volts: f64) -> Self {
        self.rated.voltage_v = Some(volts);
        self
    }

    pub fn with_current(mut self, amps: f64) -> Self {
        self.rated.current_a = Some(amps);
        self
    }

    pub fn with_power(mut self, watts: f64) -> Self {
        self.rated.power_w = Some(watts);
        self
    }

    pub fn with_length(mut self, metres: f64) -> Self {
        self.rated.length_m = Some(metres);
        self
    }

    pub fn with_impedance(mut self, ohms: f64) -> Self {
        self.rated.impedance_ohm = Some(ohms);
        self
    }

    pub fn with_cross_section(mut self, mm2: f64) -> Self {
        self.rated.cross_section_mm2 = Some(mm2);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_position(mut self, page: u32, x: f64, y: f64) -> Self {
        self.position = Some(PositionHint::new(page, x, y));
        self
    }

    pub fn is_source(&self) -> bool {
        self.kind == ComponentKind::Source
    }

    pub fn is_load(&self) -> bool {
        self.kind == ComponentKind::Load
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConductorMaterial {
    Copper,
    Aluminium,
}

impl ConductorMaterial {
    /// Resistivity at operating temperature in Ω·mm²/m
    pub fn resistivity(&self) -> f64 {
        match self {
            ConductorMaterial::Copper => 0.0175,
            ConductorMaterial::Aluminium => 0.028,
        }
    }
}

impl fmt::Display for ConductorMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConductorMaterial::Copper => write!(f, "Cu"),
            ConductorMaterial::Aluminium => write!(f, "Al"),
        }
    }
}

/// Conductor attributes of a connection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conductor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cross_section_mm2: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub material: Option<ConductorMaterial>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length_m: Option<f64>,
}

impl Conductor {
    pub fn new(cross_section_mm2: f64, material: ConductorMaterial) -> Self {
        Self {
            cross_section_mm2: Some(cross_section_mm2),
            material: Some(material),
            length_m: None,
        }
    }

    pub fn with_length(mut self, metres: f64) -> Self {
        self.length_m = Some(metres);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.cross_section_mm2.is_none() && self.material.is_none() && self.length_m.is_none()
    }
}

/// An edge joining two components
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conductor: Option<Conductor>,
}

impl Connection {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            conductor: None,
        }
    }

    pub fn with_conductor(mut self, conductor: Conductor) -> Self {
        self.conductor = Some(conductor);
        self
    }

    /// Both endpoints, order-independent.
    pub fn joins(&self, a: &str, b: &str) -> bool {
        (self.source == a && self.target == b) || (self.source == b && self.target == a)
    }
}

/// An unpersisted candidate circuit, as produced by the interpreter or
/// assembled by hand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CircuitDraft {
    pub name: String,
    #[serde(default)]
    pub components: Vec<Component>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl CircuitDraft {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            components: Vec::new(),
            connections: Vec::new(),
        }
    }

    pub fn with_component(mut self, component: Component) -> Self {
        self.components.push(component);
        self
    }

    pub fn with_connection(mut self, connection: Connection) -> Self {
        self.connections.push(connection);
        self
    }

    pub fn component(&self, id: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.id == id)
    }
}

/// A persisted circuit, always owned by exactly one organization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Circuit {
    pub id: CircuitId,
    pub organization_id: OrgId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
    pub name: String,
    pub components: Vec<Component>,
    pub connections: Vec<Connection>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Circuit {
    pub fn is_simulatable(&self) -> bool {
        !self.components.is_empty()
    }

    pub fn graph(&self) -> CircuitGraph {
        CircuitGraph::build(&self.components, &self.connections)
    }

    pub fn graph_stats(&self) -> GraphStats {
        self.graph().stats(&self.components)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in ComponentKind::ALL {
            assert_eq!(ComponentKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ComponentKind::parse("transformer"), None);
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ComponentKind::ProtectiveDevice).unwrap();
        assert_eq!(json, "\"protective_device\"");
    }

    #[test]
    fn test_merge_missing_keeps_first_seen() {
        let mut first = RatedAttributes {
            current_a: Some(16.0),
            ..Default::default()
        };
        let second = RatedAttributes {
            current_a: Some(20.0),
            voltage_v: Some(230.0),
            ..Default::default()
        };

        let conflicts = first.merge_missing(&second);
        assert_eq!(conflicts, vec!["current_a"]);
        assert_eq!(first.current_a, Some(16.0));
        assert_eq!(first.voltage_v, Some(230.0));
    }

    #[test]
    fn test_connection_joins_is_order_independent() {
        let conn = Connection::new("W1", "Q1", "L1");
        assert!(conn.joins("Q1", "L1"));
        assert!(conn.joins("L1", "Q1"));
        assert!(!conn.joins("Q1", "Q2"));
    }

    #[test]
    fn test_empty_attributes() {
        assert!(RatedAttributes::default().is_empty());
        assert!(!Component::new("L1", ComponentKind::Load).with_current(10.0).rated.is_empty());
    }
}
