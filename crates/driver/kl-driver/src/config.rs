//! Pipeline configuration loaded from TOML

use crate::phase::Phase;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Failure to read or parse a configuration file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        /// File that was read
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },
    /// The contents are not a valid configuration
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Which phases run and what is checked between them
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoweringConfig {
    /// Phase switches
    pub phases: PhaseSettings,
    /// Checks between and after phases
    pub checks: CheckSettings,
}

/// `[phases]` table
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseSettings {
    /// Phases that are skipped
    pub disabled: Vec<Phase>,
    /// Phases whose output is printed after they run
    pub verbose: Vec<Phase>,
}

/// `[checks]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckSettings {
    /// Run the structural verifier after every phase
    pub verify_after_each_phase: bool,
    /// Fail when a pass left constructs it should have removed
    pub require_exhaustive: bool,
}

impl Default for CheckSettings {
    fn default() -> Self {
        Self {
            verify_after_each_phase: true,
            require_exhaustive: true,
        }
    }
}

impl LoweringConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Whether `phase` runs
    pub fn is_enabled(&self, phase: Phase) -> bool {
        !self.phases.disabled.contains(&phase)
    }

    /// Whether `phase` prints its output
    pub fn is_verbose(&self, phase: Phase) -> bool {
        self.phases.verbose.contains(&phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = LoweringConfig::from_toml_str("").unwrap();
        assert_eq!(config, LoweringConfig::default());
        assert!(config.checks.verify_after_each_phase);
        assert!(config.checks.require_exhaustive);
        assert!(Phase::ALL.iter().all(|phase| config.is_enabled(*phase)));
    }

    #[test]
    fn test_phase_tables_parse() {
        let config = LoweringConfig::from_toml_str(
            r#"
            [phases]
            disabled = ["varargs", "objc_export"]
            verbose = ["coroutines"]

            [checks]
            require_exhaustive = false
            "#,
        )
        .unwrap();
        assert!(!config.is_enabled(Phase::Varargs));
        assert!(!config.is_enabled(Phase::ObjCExport));
        assert!(config.is_verbose(Phase::Coroutines));
        assert!(config.checks.verify_after_each_phase);
        assert!(!config.checks.require_exhaustive);
    }

    #[test]
    fn test_unknown_phase_is_rejected() {
        let error = LoweringConfig::from_toml_str("[phases]\ndisabled = [\"inlining\"]").unwrap_err();
        assert!(matches!(error, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[phases]\nverbose = [\"inline\"]").unwrap();
        let config = LoweringConfig::load(file.path()).unwrap();
        assert!(config.is_verbose(Phase::Inline));

        let missing = file.path().with_extension("missing");
        assert!(matches!(LoweringConfig::load(&missing), Err(ConfigError::Io { .. })));
    }
}
