//! Host configuration
//!
//! A host describes which preset to run and how far the compiler may go in a small YAML
//! file:
//!
//! ```yaml
//! preset: shaders/crt/crt-simple.slangp
//! parameters:
//!   CURVATURE: 0.2
//! max_history_depth: 8
//! ```

use crate::graph::{DEFAULT_MAX_HISTORY_DEPTH, DEFAULT_MAX_PASSES, Limits};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_max_history_depth() -> u32 {
    DEFAULT_MAX_HISTORY_DEPTH
}

fn default_max_passes() -> usize {
    DEFAULT_MAX_PASSES
}

fn default_validate() -> bool {
    true
}

/// Pipeline configuration as parsed from YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Preset file path, or the name of a bundled preset
    #[serde(default)]
    pub preset: Option<String>,
    /// Parameter values applied on top of the preset's own
    #[serde(default)]
    pub parameters: BTreeMap<String, f32>,
    #[serde(default = "default_max_history_depth")]
    pub max_history_depth: u32,
    #[serde(default = "default_max_passes")]
    pub max_passes: usize,
    /// Check generated sources with naga before handing them to the graphics API
    #[serde(default = "default_validate")]
    pub validate: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            preset: None,
            parameters: BTreeMap::new(),
            max_history_depth: DEFAULT_MAX_HISTORY_DEPTH,
            max_passes: DEFAULT_MAX_PASSES,
            validate: true,
        }
    }
}

impl PipelineConfig {
    /// Parses a configuration from YAML content
    ///
    /// # Arguments
    /// * `yaml_content` - YAML string containing the configuration
    pub fn from_yaml(yaml_content: &str) -> Result<Self, serde_norway::Error> {
        serde_norway::from_str(yaml_content)
    }

    /// Parses a configuration from a YAML file
    ///
    /// # Arguments
    /// * `path` - Path to the YAML file
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_yaml(&content)?)
    }

    pub fn limits(&self) -> Limits {
        Limits {
            max_history_depth: self.max_history_depth,
            max_passes: self.max_passes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config() {
        let yaml = r#"
preset: shaders/crt/crt-simple.slangp
parameters:
  CURVATURE: 0.2
  SCANLINE_WEIGHT: 1
max_history_depth: 8
max_passes: 12
validate: false
"#;
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.preset.as_deref(), Some("shaders/crt/crt-simple.slangp"));
        assert_eq!(config.parameters["CURVATURE"], 0.2);
        assert_eq!(config.parameters["SCANLINE_WEIGHT"], 1.0);
        assert_eq!(config.limits(), Limits { max_history_depth: 8, max_passes: 12 });
        assert!(!config.validate);
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::from_yaml("preset: crt-simple\n").unwrap();
        assert_eq!(config.limits(), Limits::default());
        assert!(config.parameters.is_empty());
        assert!(config.validate);
        assert_eq!(PipelineConfig::default().max_passes, DEFAULT_MAX_PASSES);
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(PipelineConfig::from_yaml("max_history_depth: deep\n").is_err());
    }
}
