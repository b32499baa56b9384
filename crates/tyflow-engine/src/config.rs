//! Inference configuration
//!
//! Tunables for the analyses and the constraint engine, loadable from TOML:
//!
//! ```toml
//! contribution_limit = 2000
//! barrier_object_limit = 10
//! debug_mode = false
//! analysis_memory_limit = 4096
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tunables for analysis and inference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Object-set growth budget per type object before sets collapse to any-object
    pub contribution_limit: u32,

    /// Object count at which barriers on a set are replaced by direct adds
    pub barrier_object_limit: usize,

    /// Inline capacity hint for small object sets
    pub set_array_size: usize,

    /// Scripts with more fixed slots than this are not inlineable
    pub local_limit: u32,

    /// Treat every local as escaping and the return slot as used
    pub debug_mode: bool,

    /// Maximum instruction records and define lists one analysis pass may allocate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_memory_limit: Option<usize>,

    /// Maximum number of type sets the engine may allocate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_type_sets: Option<usize>,

    /// Guard property reads at observed-type opcodes with barriers
    pub use_property_type_barriers: bool,

    /// Maximum definite properties recorded for a constructor
    pub max_definite_properties: u32,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            contribution_limit: 2000,
            barrier_object_limit: 10,
            set_array_size: 8,
            local_limit: 50,
            debug_mode: false,
            analysis_memory_limit: None,
            max_type_sets: None,
            use_property_type_barriers: true,
            max_definite_properties: 64,
        }
    }
}

impl InferenceConfig {
    /// Load a configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse a configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: InferenceConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.contribution_limit == 0 {
            return Err(ConfigError::Invalid(
                "contribution_limit must be positive".to_string(),
            ));
        }
        if self.barrier_object_limit == 0 {
            return Err(ConfigError::Invalid(
                "barrier_object_limit must be positive".to_string(),
            ));
        }
        if self.set_array_size == 0 {
            return Err(ConfigError::Invalid(
                "set_array_size must be positive".to_string(),
            ));
        }
        if self.local_limit > u16::MAX as u32 {
            return Err(ConfigError::Invalid(format!(
                "local_limit {} exceeds the addressable slot range",
                self.local_limit
            )));
        }
        if self.analysis_memory_limit == Some(0) {
            return Err(ConfigError::Invalid(
                "analysis_memory_limit must be positive when set".to_string(),
            ));
        }
        Ok(())
    }
}
