//! Structural validation of circuit drafts before they are persisted.

use std::collections::HashSet;

use super::model::{CircuitDraft, ComponentKind, RatedAttributes};

/// Check a draft against the circuit invariants.
///
/// Returns every problem found, in a stable order, rather than stopping at
/// the first one.
pub fn validate_draft(draft: &CircuitDraft) -> Result<(), Vec<String>> {
    let mut problems = Vec::new();

    if draft.name.trim().is_empty() {
        problems.push("circuit name must not be empty".to_string());
    }

    let mut component_ids: HashSet<&str> = HashSet::new();
    for component in &draft.components {
        if component.id.trim().is_empty() {
            problems.push("component id must not be empty".to_string());
            continue;
        }
        if !component_ids.insert(component.id.as_str()) {
            problems.push(format!("duplicate component id '{}'", component.id));
        }
        check_attributes(&component.id, component.kind, &component.rated, &mut problems);
    }

    let mut connection_ids: HashSet<&str> = HashSet::new();
    for connection in &draft.connections {
        if connection.id.trim().is_empty() {
            problems.push("connection id must not be empty".to_string());
        } else if !connection_ids.insert(connection.id.as_str()) {
            problems.push(format!("duplicate connection id '{}'", connection.id));
        }
        for endpoint in [&connection.source, &connection.target] {
            if !component_ids.contains(endpoint.as_str()) {
                problems.push(format!(
                    "connection '{}' references unknown component '{}'",
                    connection.id, endpoint
                ));
            }
        }
        if connection.source == connection.target {
            problems.push(format!(
                "connection '{}' joins component '{}' to itself",
                connection.id, connection.source
            ));
        }
        if let Some(conductor) = &connection.conductor {
            for (name, value) in [
                ("cross_section_mm2", conductor.cross_section_mm2),
                ("length_m", conductor.length_m),
            ] {
                if let Some(v) = value {
                    if !v.is_finite() || v <= 0.0 {
                        problems.push(format!(
                            "connection '{}' has invalid {} ({})",
                            connection.id, name, v
                        ));
                    }
                }
            }
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems)
    }
}

fn check_attributes(
    id: &str,
    kind: ComponentKind,
    rated: &RatedAttributes,
    problems: &mut Vec<String>,
) {
    for (name, value) in rated.named_values() {
        let Some(v) = value else { continue };
        if !v.is_finite() || v < 0.0 {
            problems.push(format!("component '{}' has invalid {} ({})", id, name, v));
        } else if kind == ComponentKind::Source && name == "voltage_v" && v == 0.0 {
            problems.push(format!("source '{}' must have a positive voltage_v", id));
        } else if !attribute_applies(kind, name) {
            problems.push(format!("{} does not apply to {} component '{}'", name, kind, id));
        }
    }
}

/// Which rated attributes make sense for which kind.
pub fn attribute_applies(kind: ComponentKind, attribute: &str) -> bool {
    match attribute {
        "voltage_v" | "current_a" => true,
        "power_w" => matches!(kind, ComponentKind::Load | ComponentKind::Source),
        "length_m" | "impedance_ohm" | "cross_section_mm2" => kind == ComponentKind::Cable,
        _ => false,
    }
}
