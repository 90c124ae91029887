//! Engine configuration.
//!
//! Every field has a default, so a config file only needs to name what it
//! changes:
//!
//! ```json
//! {
//!   "import": { "max_pages": 10 },
//!   "simulation": { "max_iterations": 2000, "fault_overload_ratio": 1.25 }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Limits applied to untrusted uploads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    /// Documents with more pages are rejected before any page is decoded
    pub max_pages: usize,
    /// Buffers larger than this are rejected before parsing
    pub max_bytes: usize,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            max_pages: 50,
            max_bytes: 20 * 1024 * 1024,
        }
    }
}

/// Numerics of the simulation engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationOptions {
    /// Relaxation iteration cap
    pub max_iterations: usize,
    /// Largest voltage update (V) at which the solve counts as converged
    pub tolerance_v: f64,
    /// Voltage of sources without a rated voltage
    pub default_source_voltage_v: f64,
    /// Resistance of a connection without conductor data
    pub link_resistance_ohm: f64,
    /// measured/limit ratio from which an overload is a fault
    pub fault_overload_ratio: f64,
    /// Allowed drop below the feeding source voltage, in percent
    pub max_voltage_drop_percent: f64,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
            tolerance_v: 1e-6,
            default_source_voltage_v: 230.0,
            link_resistance_ohm: 0.001,
            fault_overload_ratio: 1.5,
            max_voltage_drop_percent: 5.0,
        }
    }
}

impl SimulationOptions {
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_tolerance(mut self, tolerance_v: f64) -> Self {
        self.tolerance_v = tolerance_v;
        self
    }

    pub fn with_fault_overload_ratio(mut self, ratio: f64) -> Self {
        self.fault_overload_ratio = ratio;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::Invalid {
                field: "simulation.max_iterations",
                reason: "must be at least 1".to_string(),
            });
        }
        let positive = [
            ("simulation.tolerance_v", self.tolerance_v),
            ("simulation.default_source_voltage_v", self.default_source_voltage_v),
            ("simulation.link_resistance_ohm", self.link_resistance_ohm),
            ("simulation.fault_overload_ratio", self.fault_overload_ratio),
            ("simulation.max_voltage_drop_percent", self.max_voltage_drop_percent),
        ];
        for (field, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("must be a positive number, got {}", value),
                });
            }
        }
        Ok(())
    }
}

/// Top-level configuration for the import and simulation pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub import: ImportOptions,
    pub simulation: SimulationOptions,
    /// Custom recognition ruleset; the embedded default is used when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ruleset_path: Option<PathBuf>,
}

impl EngineConfig {
    /// Load a JSON config file. Relative `ruleset_path`s resolve against
    /// the config file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_json(&content)?;
        if let (Some(ruleset), Some(dir)) = (config.ruleset_path.as_ref(), path.parent()) {
            if ruleset.is_relative() {
                config.ruleset_path = Some(dir.join(ruleset));
            }
        }
        tracing::debug!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.import.max_pages == 0 {
            return Err(ConfigError::Invalid {
                field: "import.max_pages",
                reason: "must be at least 1".to_string(),
            });
        }
        self.simulation.validate()
    }
}
