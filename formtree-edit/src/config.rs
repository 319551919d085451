//! Editor configuration, read from `formtree.toml`.
//!
//! ```toml
//! max_pending_autosaves = 64
//!
//! [autosave]
//! enabled = true
//! debounce_ms = 300
//!
//! [pipeline]
//! root = "input"
//! sections = ["input", "stage1", "stage2"]
//!
//! [[validators]]
//! unit = "characters"
//! scope = "chars"
//! function_ref = "validate_characters"
//! ```

use crate::error::{EditError, EditResult};
use crate::invalidation::Pipeline;
use crate::validation::ValidationUnit;
use formtree_types::SectionKey;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Autosave settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutosaveConfig {
    /// Edit mode: when false, drafts persist only on explicit save.
    pub enabled: bool,
    /// Coalescing window for rapid edits.
    pub debounce_ms: u64,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 300,
        }
    }
}

/// Progressive section order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub root: String,
    pub sections: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            root: "input".to_string(),
            sections: vec!["input".to_string()],
        }
    }
}

/// One configured validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Unit key, e.g. `node` or `characters`.
    pub unit: String,
    /// Dotted scope the unit covers; empty covers the whole node.
    #[serde(default)]
    pub scope: String,
    /// Function passed to the invoker. Units without one only run local
    /// rule checks.
    #[serde(default)]
    pub function_ref: Option<String>,
}

/// Top-level editor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    pub autosave: AutosaveConfig,
    pub pipeline: PipelineConfig,
    pub validators: Vec<ValidatorConfig>,
    /// Capacity of the autosave command channel.
    pub max_pending_autosaves: usize,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            autosave: AutosaveConfig::default(),
            pipeline: PipelineConfig::default(),
            validators: Vec::new(),
            max_pending_autosaves: 64,
        }
    }
}

impl EditorConfig {
    /// Parses a TOML document, rejecting invalid content.
    pub fn from_toml_str(source: &str) -> EditResult<Self> {
        let config: Self = toml::from_str(source).map_err(|e| EditError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a file, falling back to defaults when the
    /// file is missing or invalid.
    pub fn load_from(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "no editor config found, using defaults");
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(contents) => match Self::from_toml_str(&contents) {
                Ok(config) => {
                    info!(path = %path.display(), "loaded editor config");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "invalid editor config, using defaults");
                    Self::default()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read editor config, using defaults");
                Self::default()
            }
        }
    }

    fn validate(&self) -> EditResult<()> {
        if self.max_pending_autosaves == 0 {
            return Err(EditError::Config(
                "max_pending_autosaves must be at least 1".to_string(),
            ));
        }
        self.pipeline()?;
        let mut units = std::collections::HashSet::new();
        for v in &self.validators {
            if v.unit.trim().is_empty() {
                return Err(EditError::Config("validator with blank unit".to_string()));
            }
            if !units.insert(v.unit.as_str()) {
                return Err(EditError::Config(format!("duplicate validator unit '{}'", v.unit)));
            }
        }
        Ok(())
    }

    /// Debounce window as a duration.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.autosave.debounce_ms)
    }

    /// The configured section pipeline.
    pub fn pipeline(&self) -> EditResult<Pipeline> {
        let parse = |s: &str| {
            SectionKey::new(s).map_err(|e| EditError::Config(format!("pipeline: {e}")))
        };
        let root = parse(&self.pipeline.root)?;
        let sections = self
            .pipeline
            .sections
            .iter()
            .map(|s| parse(s))
            .collect::<EditResult<Vec<_>>>()?;
        Pipeline::new(root, sections)
    }

    /// Validation units for every configured validator.
    pub fn validation_units(&self) -> Vec<ValidationUnit> {
        self.validators
            .iter()
            .map(|v| ValidationUnit {
                key: v.unit.clone(),
                scope: v.scope.clone(),
                function_ref: v.function_ref.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_from_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EditorConfig::load_from(dir.path().join("nonexistent.toml"));
        assert_eq!(config, EditorConfig::default());
    }

    #[test]
    fn load_from_invalid_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("formtree.toml");
        std::fs::write(&path, "autosave = 3").unwrap();
        assert_eq!(EditorConfig::load_from(path), EditorConfig::default());
    }

    #[test]
    fn load_from_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("formtree.toml");
        std::fs::write(&path, "[autosave]\ndebounce_ms = 50\n").unwrap();
        let config = EditorConfig::load_from(path);
        assert_eq!(config.debounce(), Duration::from_millis(50));
        assert!(config.autosave.enabled);
    }
}
