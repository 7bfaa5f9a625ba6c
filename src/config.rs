//! Runtime configuration (`causeway.toml`)
//!
//! ```toml
//! [reconcile]
//! save_unmatched_sends = true
//!
//! [matching]
//! search_budget = 250000
//!
//! [batch]
//! jobs = 4
//! ```
//!
//! Every section and key is optional. Command-line flags override file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "causeway.toml";

/// Stream reconciliation options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Keep sends whose receive never appeared as one-sided messages
    ///
    /// When false (default), such sends are discarded and counted as errors.
    pub save_unmatched_sends: bool,
}

/// Structural matcher options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Match states one recognizer check may explore; 0 disables the bound
    ///
    /// Nested `xor`/`repeat`/`future` combinations can blow up
    /// combinatorially. A check that runs out of budget is reported as
    /// exhausted rather than as a mismatch.
    ///
    /// Default: 1,000,000
    pub search_budget: u64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            search_budget: 1_000_000,
        }
    }
}

impl MatchConfig {
    /// No exploration bound at all
    pub fn unbounded() -> Self {
        Self { search_budget: 0 }
    }

    /// The effective budget, `None` when unbounded
    pub fn budget(&self) -> Option<u64> {
        (self.search_budget > 0).then_some(self.search_budget)
    }
}

/// Batch execution options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Worker threads matching paths; 1 runs inline
    pub jobs: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { jobs: 1 }
    }
}

/// Complete runtime configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CausewayConfig {
    pub reconcile: ReconcileConfig,
    pub matching: MatchConfig,
    pub batch: BatchConfig,
}

impl CausewayConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: CausewayConfig =
            toml::from_str(content).context("Failed to parse TOML configuration")?;
        Ok(config)
    }

    /// Load `path` if given, else `causeway.toml` when present, else defaults
    pub fn discover(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = CausewayConfig::default();
        assert!(!config.reconcile.save_unmatched_sends);
        assert_eq!(config.matching.budget(), Some(1_000_000));
        assert_eq!(config.batch.jobs, 1);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = CausewayConfig::from_toml_str("[batch]\njobs = 8\n").unwrap();
        assert_eq!(config.batch.jobs, 8);
        assert_eq!(config.matching, MatchConfig::default());
    }

    #[test]
    fn test_zero_budget_is_unbounded() {
        let config = CausewayConfig::from_toml_str("[matching]\nsearch_budget = 0\n").unwrap();
        assert_eq!(config.matching.budget(), None);
        assert_eq!(config.matching, MatchConfig::unbounded());
    }

    #[test]
    fn test_invalid_toml() {
        assert!(CausewayConfig::from_toml_str("[batch\njobs = ").is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[reconcile]\nsave_unmatched_sends = true").unwrap();
        let config = CausewayConfig::from_file(file.path()).unwrap();
        assert!(config.reconcile.save_unmatched_sends);
    }

    #[test]
    fn test_discover_explicit_missing_file_fails() {
        assert!(CausewayConfig::discover(Some(Path::new("/nonexistent/causeway.toml"))).is_err());
    }
}
