//! Recognition Rulesets
//!
//! A ruleset maps text patterns to component kinds and connections. The
//! default ruleset is compiled into the binary; custom rulesets are JSON
//! files with the same shape:
//!
//! ```json
//! {
//!   "name": "site-a",
//!   "attach_radius": 30.0,
//!   "connection_rules": [{ "pattern": "^(?P<from>\\w+) -> (?P<to>\\w+)" }],
//!   "component_rules": [{ "kind": "breaker", "pattern": "^(?P<id>Q\\d+)" }]
//! }
//! ```
//!
//! Component rules are tried in order and the first match wins. A component
//! pattern may capture `id`; without it the whole match is the id.
//! Connection patterns must capture `from` and `to` and may capture `id`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::InterpretError;
use crate::circuit::ComponentKind;

const EMBEDDED_DEFAULT: &str = include_str!("../../rulesets/default.json");

fn default_attach_radius() -> f64 {
    40.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub kind: ComponentKind,
    pub pattern: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub pattern: String,
}

/// Serialized form of a ruleset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ruleset {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Distance (PDF points) within which an attribute-only block attaches
    /// to the nearest recognised component
    #[serde(default = "default_attach_radius")]
    pub attach_radius: f64,
    #[serde(default)]
    pub connection_rules: Vec<ConnectionRule>,
    #[serde(default)]
    pub component_rules: Vec<ComponentRule>,
}

impl Ruleset {
    /// The embedded ruleset for low-voltage distribution schematics
    pub fn builtin() -> Result<Self, InterpretError> {
        Self::from_json(EMBEDDED_DEFAULT)
    }

    pub fn from_json(content: &str) -> Result<Self, InterpretError> {
        serde_json::from_str(content).map_err(|e| InterpretError::InvalidRuleset(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, InterpretError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            InterpretError::InvalidRuleset(format!("failed to read {}: {}", path.display(), e))
        })?;
        let ruleset = Self::from_json(&content)?;
        tracing::info!(
            "Loaded ruleset '{}' from {} ({} component rules, {} connection rules)",
            ruleset.name,
            path.display(),
            ruleset.component_rules.len(),
            ruleset.connection_rules.len()
        );
        Ok(ruleset)
    }

    pub(crate) fn compile(&self) -> Result<CompiledRuleset, InterpretError> {
        if !self.attach_radius.is_finite() || self.attach_radius < 0.0 {
            return Err(InterpretError::InvalidRuleset(format!(
                "attach_radius must be a non-negative number, got {}",
                self.attach_radius
            )));
        }
        if self.component_rules.is_empty() {
            return Err(InterpretError::InvalidRuleset(
                "ruleset has no component rules".to_string(),
            ));
        }

        let mut component_rules = Vec::with_capacity(self.component_rules.len());
        for rule in &self.component_rules {
            component_rules.push((rule.kind, compile_pattern(&rule.pattern)?));
        }

        let mut connection_rules = Vec::with_capacity(self.connection_rules.len());
        for rule in &self.connection_rules {
            let regex = compile_pattern(&rule.pattern)?;
            let names: Vec<&str> = regex.capture_names().flatten().collect();
            if !names.contains(&"from") || !names.contains(&"to") {
                return Err(InterpretError::InvalidRuleset(format!(
                    "connection pattern '{}' must capture 'from' and 'to'",
                    rule.pattern
                )));
            }
            connection_rules.push(regex);
        }

        Ok(CompiledRuleset {
            attach_radius: self.attach_radius,
            component_rules,
            connection_rules,
        })
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex, InterpretError> {
    Regex::new(pattern)
        .map_err(|e| InterpretError::InvalidRuleset(format!("bad pattern '{}': {}", pattern, e)))
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledRuleset {
    pub attach_radius: f64,
    pub component_rules: Vec<(ComponentKind, Regex)>,
    pub connection_rules: Vec<Regex>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_compiles() {
        let ruleset = Ruleset::builtin().unwrap();
        let compiled = ruleset.compile().unwrap();
        assert_eq!(compiled.component_rules.len(), 6);
        assert_eq!(compiled.connection_rules.len(), 1);
    }

    #[test]
    fn test_builtin_kind_mapping() {
        let compiled = Ruleset::builtin().unwrap().compile().unwrap();
        let kind_of = |text: &str| {
            compiled
                .component_rules
                .iter()
                .find(|(_, re)| re.is_match(text))
                .map(|(kind, _)| *kind)
        };

        assert_eq!(kind_of("T1 230V"), Some(ComponentKind::Source));
        assert_eq!(kind_of("TR2"), Some(ComponentKind::Source));
        assert_eq!(kind_of("Q3 16A"), Some(ComponentKind::Breaker));
        assert_eq!(kind_of("RCD1 40A 30mA"), Some(ComponentKind::ProtectiveDevice));
        assert_eq!(kind_of("F2"), Some(ComponentKind::ProtectiveDevice));
        assert_eq!(kind_of("BB1"), Some(ComponentKind::Bus));
        assert_eq!(kind_of("CBL4 25m"), Some(ComponentKind::Cable));
        assert_eq!(kind_of("L7 Kitchen"), Some(ComponentKind::Load));
        assert_eq!(kind_of("Kitchen"), None);
    }

    #[test]
    fn test_connection_rule_requires_endpoints() {
        let ruleset = Ruleset::from_json(
            r#"{
                "name": "broken",
                "component_rules": [{"kind": "load", "pattern": "^L\\d+"}],
                "connection_rules": [{"pattern": "^(?P<a>\\w+)-(?P<b>\\w+)"}]
            }"#,
        )
        .unwrap();
        assert!(matches!(ruleset.compile(), Err(InterpretError::InvalidRuleset(_))));
    }

    #[test]
    fn test_bad_regex_reported() {
        let ruleset = Ruleset::from_json(
            r#"{"name": "bad", "component_rules": [{"kind": "load", "pattern": "(L"}]}"#,
        )
        .unwrap();
        let err = ruleset.compile().unwrap_err();
        assert!(err.to_string().contains("bad pattern"));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let result = Ruleset::from_json(
            r#"{"name": "bad", "component_rules": [{"kind": "transformer", "pattern": "^T"}]}"#,
        );
        assert!(result.is_err());
    }
}
