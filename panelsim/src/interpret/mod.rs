//! Schematic Interpreter
//!
//! Turns positioned text blocks into a candidate circuit and a report of
//! everything that could not be placed.
//!
//! ```text
//!   TextBlock ──▶ connection rules ──▶ pending connection ─┐
//!       │                                                   │
//!       ├──────▶ component rules ──▶ component (merged      │
//!       │                            on repeat mentions)    │
//!       │                                                   ▼
//!       └──────▶ attribute-only ──▶ nearest component   resolve endpoints,
//!                (230V, 16A, ...)   within radius        assign ids
//!                                                           │
//!                                                           ▼
//!                                    Interpretation { draft, report }
//! ```
//!
//! Partial recognition is normal: the draft holds what was recognised and
//! the report holds what was not. Only a document with no recognisable
//! component at all is an error.

pub mod ruleset;
pub mod units;

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

use crate::circuit::{
    attribute_applies, CircuitDraft, Component, ComponentKind, Conductor, Connection,
    RatedAttributes,
};
use crate::ingest::{IngestError, TextBlock};
pub use ruleset::{ComponentRule, ConnectionRule, Ruleset};
use ruleset::CompiledRuleset;
use units::Quantity;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InterpretError {
    #[error("No components recognised in {blocks} text blocks")]
    UnrecognizedSchema { blocks: usize },
    #[error("Invalid ruleset: {0}")]
    InvalidRuleset(String),
    #[error(transparent)]
    Ingest(#[from] IngestError),
}

/// Two mentions of the same component disagree on an attribute. The first
/// mention's value is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentConflict {
    pub component_id: String,
    pub attribute: String,
    pub kept: String,
    pub discarded: String,
    pub page: u32,
}

/// Two connections join the same pair of components with different
/// conductor data. The first one is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConflict {
    pub source: String,
    pub target: String,
    pub kept: Option<Conductor>,
    pub discarded: Option<Conductor>,
    pub page: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RejectReason {
    SelfLoop,
    UnknownEndpoint { component_id: String },
    DuplicateId,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::SelfLoop => write!(f, "connects a component to itself"),
            RejectReason::UnknownEndpoint { component_id } => {
                write!(f, "unknown component {}", component_id)
            }
            RejectReason::DuplicateId => write!(f, "connection id already used"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedConnection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
    pub reason: RejectReason,
    pub page: u32,
}

/// A recognised quantity that does not apply where it was found, such as
/// a length on a breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IgnoredAttribute {
    /// Component id, or `source->target` for a connection
    pub subject: String,
    pub attribute: String,
    pub value: String,
    pub page: u32,
}

/// How much of the document the interpreter understood
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceReport {
    pub total_blocks: usize,
    pub recognized_blocks: usize,
    pub unmatched: Vec<TextBlock>,
    pub component_conflicts: Vec<ComponentConflict>,
    pub connection_conflicts: Vec<ConnectionConflict>,
    pub rejected_connections: Vec<RejectedConnection>,
    pub ignored_attributes: Vec<IgnoredAttribute>,
}

impl ConfidenceReport {
    /// Share of text blocks that contributed to the draft, in `[0, 1]`
    pub fn confidence(&self) -> f64 {
        if self.total_blocks == 0 {
            return 0.0;
        }
        self.recognized_blocks as f64 / self.total_blocks as f64
    }

    /// Nothing unmatched, conflicting or rejected
    pub fn is_clean(&self) -> bool {
        self.unmatched.is_empty()
            && self.component_conflicts.is_empty()
            && self.connection_conflicts.is_empty()
            && self.rejected_connections.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interpretation {
    pub draft: CircuitDraft,
    pub report: ConfidenceReport,
}

/// Applies a compiled ruleset to text blocks
#[derive(Debug, Clone)]
pub struct Interpreter {
    ruleset: Ruleset,
    compiled: CompiledRuleset,
}

impl Interpreter {
    pub fn new(ruleset: Ruleset) -> Result<Self, InterpretError> {
        let compiled = ruleset.compile()?;
        Ok(Self { ruleset, compiled })
    }

    /// Interpreter over the embedded low-voltage ruleset
    pub fn builtin() -> Result<Self, InterpretError> {
        Self::new(Ruleset::builtin()?)
    }

    pub fn ruleset(&self) -> &Ruleset {
        &self.ruleset
    }

    /// Interpret a block sequence, as produced by
    /// [`PdfDocument::text_blocks`](crate::ingest::PdfDocument::text_blocks).
    /// The first ingestion error aborts interpretation.
    pub fn interpret<I>(&self, name: &str, blocks: I) -> Result<Interpretation, InterpretError>
    where
        I: IntoIterator<Item = Result<TextBlock, IngestError>>,
    {
        let mut assembly = Assembly::default();
        for block in blocks {
            assembly.process(&self.compiled, block?);
        }

        if assembly.components.is_empty() {
            tracing::info!(
                "No components recognised in {} text blocks",
                assembly.report.total_blocks
            );
            return Err(InterpretError::UnrecognizedSchema {
                blocks: assembly.report.total_blocks,
            });
        }

        let connections = assembly.resolve_connections();
        let Assembly {
            components, report, ..
        } = assembly;

        tracing::info!(
            "Interpreted '{}': {} components, {} connections, {}/{} blocks recognised",
            name,
            components.len(),
            connections.len(),
            report.recognized_blocks,
            report.total_blocks
        );

        Ok(Interpretation {
            draft: CircuitDraft {
                name: name.to_string(),
                components,
                connections,
            },
            report,
        })
    }

    /// Interpret blocks that are already in memory
    pub fn interpret_blocks(
        &self,
        name: &str,
        blocks: &[TextBlock],
    ) -> Result<Interpretation, InterpretError> {
        self.interpret(name, blocks.iter().cloned().map(Ok))
    }
}

#[derive(Debug, Clone)]
struct PendingConnection {
    id: Option<String>,
    source: String,
    target: String,
    conductor: Option<Conductor>,
    page: u32,
}

/// Mutable state of one interpretation run
#[derive(Debug, Default)]
struct Assembly {
    components: Vec<Component>,
    /// component id -> position in `components`
    index: HashMap<String, usize>,
    pending: Vec<PendingConnection>,
    report: ConfidenceReport,
}

impl Assembly {
    fn process(&mut self, rules: &CompiledRuleset, block: TextBlock) {
        self.report.total_blocks += 1;
        let text = block.text.trim();

        if let Some(pending) = self.match_connection(rules, text, &block) {
            self.pending.push(pending);
            self.report.recognized_blocks += 1;
            return;
        }

        for (kind, regex) in &rules.component_rules {
            let Some(caps) = regex.captures(text) else {
                continue;
            };
            let Some(whole) = caps.get(0) else {
                continue;
            };
            let id = caps.name("id").unwrap_or(whole).as_str().to_string();
            if id.is_empty() {
                continue;
            }
            self.note_skipped_prefix(&block, &text[..whole.start()]);
            let rest = &text[whole.end()..];
            self.add_component(*kind, id, rest, &block);
            self.report.recognized_blocks += 1;
            return;
        }

        let annotation = units::scan(text);
        if annotation.is_pure() {
            if let Some(target) = self.nearest_component(&block, rules.attach_radius) {
                tracing::debug!(
                    "Attached '{}' to {}",
                    text,
                    self.components[target].id
                );
                self.apply_quantities(target, &annotation.quantities, block.page);
                self.report.recognized_blocks += 1;
                return;
            }
        }

        tracing::debug!("Unmatched block on page {}: '{}'", block.page, text);
        self.report.unmatched.push(block);
    }

    /// Text ahead of a rule match is kept in the report as unmatched.
    fn note_skipped_prefix(&mut self, block: &TextBlock, prefix: &str) {
        let prefix = prefix.trim();
        if prefix.is_empty() {
            return;
        }
        tracing::debug!("Unmatched prefix on page {}: '{}'", block.page, prefix);
        self.report
            .unmatched
            .push(TextBlock::new(block.page, block.x, block.y, prefix));
    }

    fn match_connection(
        &mut self,
        rules: &CompiledRuleset,
        text: &str,
        block: &TextBlock,
    ) -> Option<PendingConnection> {
        let page = block.page;
        for regex in &rules.connection_rules {
            let Some(caps) = regex.captures(text) else {
                continue;
            };
            let (Some(source), Some(target), Some(whole)) =
                (caps.name("from"), caps.name("to"), caps.get(0))
            else {
                continue;
            };
            self.note_skipped_prefix(block, &text[..whole.start()]);
            let source = source.as_str().to_string();
            let target = target.as_str().to_string();
            let conductor =
                self.conductor_from(&format!("{}->{}", source, target), &text[whole.end()..], page);
            return Some(PendingConnection {
                id: caps.name("id").map(|m| m.as_str().to_string()),
                source,
                target,
                conductor,
                page,
            });
        }
        None
    }

    fn conductor_from(&mut self, subject: &str, rest: &str, page: u32) -> Option<Conductor> {
        let mut conductor = Conductor::default();
        for quantity in units::scan(rest).quantities {
            let accepted = match quantity {
                Quantity::CrossSection(v) if v > 0.0 && v.is_finite() => {
                    *conductor.cross_section_mm2.get_or_insert(v) == v
                }
                Quantity::Length(v) if v > 0.0 && v.is_finite() => {
                    *conductor.length_m.get_or_insert(v) == v
                }
                Quantity::Material(m) => *conductor.material.get_or_insert(m) == m,
                _ => false,
            };
            if !accepted {
                let (attribute, value) = describe(&quantity);
                self.ignore(subject, attribute, value, page);
            }
        }
        (!conductor.is_empty()).then_some(conductor)
    }

    fn add_component(&mut self, kind: ComponentKind, id: String, rest: &str, block: &TextBlock) {
        let annotation = units::scan(rest);
        let label = (!annotation.words.is_empty()).then(|| annotation.words.join(" "));

        let target = match self.index.get(&id) {
            Some(&existing) => {
                let component = &mut self.components[existing];
                if component.kind != kind {
                    self.report.component_conflicts.push(ComponentConflict {
                        component_id: id.clone(),
                        attribute: "kind".to_string(),
                        kept: component.kind.to_string(),
                        discarded: kind.to_string(),
                        page: block.page,
                    });
                }
                if component.label.is_none() {
                    component.label = label;
                }
                existing
            }
            None => {
                let mut component = Component::new(id.clone(), kind).with_position(
                    block.page,
                    block.x,
                    block.y,
                );
                component.label = label;
                self.components.push(component);
                self.index.insert(id, self.components.len() - 1);
                self.components.len() - 1
            }
        };

        self.apply_quantities(target, &annotation.quantities, block.page);
    }

    fn apply_quantities(&mut self, target: usize, quantities: &[Quantity], page: u32) {
        for quantity in quantities {
            let component = &self.components[target];
            let (attribute, value) = describe(quantity);
            let single = match rated_from(quantity) {
                Some(single) if attribute_applies(component.kind, attribute) => single,
                _ => {
                    let subject = component.id.clone();
                    self.ignore(&subject, attribute, value, page);
                    continue;
                }
            };

            let component = &mut self.components[target];
            for name in component.rated.merge_missing(&single) {
                let kept = lookup(&component.rated, name);
                let discarded = lookup(&single, name);
                self.report.component_conflicts.push(ComponentConflict {
                    component_id: component.id.clone(),
                    attribute: name.to_string(),
                    kept,
                    discarded,
                    page,
                });
            }
        }
    }

    /// Nearest component on the same page within `radius`. On equal
    /// distance the earlier recognised component wins.
    fn nearest_component(&self, block: &TextBlock, radius: f64) -> Option<usize> {
        let here = crate::circuit::PositionHint::new(block.page, block.x, block.y);
        let mut best: Option<(usize, f64)> = None;
        for (i, component) in self.components.iter().enumerate() {
            let Some(position) = component.position else {
                continue;
            };
            if position.page != block.page {
                continue;
            }
            let distance = position.distance_to(&here);
            if distance > radius {
                continue;
            }
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((i, distance));
            }
        }
        best.map(|(i, _)| i)
    }

    fn ignore(&mut self, subject: &str, attribute: &str, value: String, page: u32) {
        self.report.ignored_attributes.push(IgnoredAttribute {
            subject: subject.to_string(),
            attribute: attribute.to_string(),
            value,
            page,
        });
    }

    fn reject(&mut self, candidate: PendingConnection, reason: RejectReason) {
        tracing::debug!(
            "Rejected connection {} -> {}: {}",
            candidate.source,
            candidate.target,
            reason
        );
        self.report.rejected_connections.push(RejectedConnection {
            id: candidate.id,
            source: candidate.source,
            target: candidate.target,
            reason,
            page: candidate.page,
        });
    }

    /// Validate endpoints, fold repeated pairs into conflicts and assign ids.
    fn resolve_connections(&mut self) -> Vec<Connection> {
        let pending = std::mem::take(&mut self.pending);
        // explicit id (if any) and the connection, id assigned below
        let mut accepted: Vec<(Option<String>, Connection)> = Vec::new();
        let mut explicit_ids: HashSet<String> = HashSet::new();

        for candidate in pending {
            if candidate.source == candidate.target {
                self.reject(candidate, RejectReason::SelfLoop);
                continue;
            }
            let missing = [&candidate.source, &candidate.target]
                .into_iter()
                .find(|id| !self.index.contains_key(id.as_str()))
                .cloned();
            if let Some(missing) = missing {
                self.reject(
                    candidate,
                    RejectReason::UnknownEndpoint {
                        component_id: missing,
                    },
                );
                continue;
            }

            let existing = accepted
                .iter()
                .map(|(_, c)| c)
                .find(|c| c.joins(&candidate.source, &candidate.target));
            if let Some(first) = existing {
                if first.conductor != candidate.conductor {
                    self.report.connection_conflicts.push(ConnectionConflict {
                        source: first.source.clone(),
                        target: first.target.clone(),
                        kept: first.conductor.clone(),
                        discarded: candidate.conductor,
                        page: candidate.page,
                    });
                }
                continue;
            }

            let duplicate = candidate
                .id
                .as_ref()
                .is_some_and(|id| !explicit_ids.insert(id.clone()));
            if duplicate {
                self.reject(candidate, RejectReason::DuplicateId);
                continue;
            }

            let connection = Connection::new(String::new(), candidate.source, candidate.target);
            let connection = match candidate.conductor {
                Some(conductor) => connection.with_conductor(conductor),
                None => connection,
            };
            accepted.push((candidate.id, connection));
        }

        let mut next = 1usize;
        accepted
            .into_iter()
            .map(|(explicit, mut connection)| {
                connection.id = match explicit {
                    Some(id) => id,
                    None => loop {
                        let id = format!("W{}", next);
                        next += 1;
                        if !explicit_ids.contains(&id) && !self.index.contains_key(&id) {
                            break id;
                        }
                    },
                };
                connection
            })
            .collect()
    }
}

/// A quantity as a single-field attribute set, for the component fields
fn rated_from(quantity: &Quantity) -> Option<RatedAttributes> {
    let mut rated = RatedAttributes::default();
    match *quantity {
        Quantity::Voltage(v) => rated.voltage_v = Some(v),
        Quantity::Current(v) => rated.current_a = Some(v),
        Quantity::Power(v) => rated.power_w = Some(v),
        Quantity::Length(v) => rated.length_m = Some(v),
        Quantity::Impedance(v) => rated.impedance_ohm = Some(v),
        Quantity::CrossSection(v) => rated.cross_section_mm2 = Some(v),
        Quantity::Material(_) => return None,
    }
    if rated.named_values().iter().any(|(_, v)| v.is_some_and(|v| !v.is_finite())) {
        return None;
    }
    Some(rated)
}

fn describe(quantity: &Quantity) -> (&'static str, String) {
    match quantity {
        Quantity::Voltage(v) => ("voltage_v", v.to_string()),
        Quantity::Current(v) => ("current_a", v.to_string()),
        Quantity::Power(v) => ("power_w", v.to_string()),
        Quantity::Length(v) => ("length_m", v.to_string()),
        Quantity::Impedance(v) => ("impedance_ohm", v.to_string()),
        Quantity::CrossSection(v) => ("cross_section_mm2", v.to_string()),
        Quantity::Material(m) => ("material", m.to_string()),
    }
}

fn lookup(rated: &RatedAttributes, name: &str) -> String {
    rated
        .named_values()
        .iter()
        .find(|(n, _)| *n == name)
        .and_then(|(_, v)| *v)
        .map(|v| v.to_string())
        .unwrap_or_default()
}
