//! Orchestrator configuration.

use serde::{Deserialize, Serialize};

use crate::job::available_parallelism;

/// Configuration for the batch orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum conversions in flight at once.
    /// Defaults to the hardware parallelism (4 when unknown).
    #[serde(default)]
    pub max_parallel: Option<usize>,

    /// Name template for downloads.
    /// `%name%`, `%extension%` and `%date%` are substituted.
    #[serde(default = "default_filename_format")]
    pub filename_format: String,
}

fn default_filename_format() -> String {
    "VERT_%name%".to_string()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_parallel: None,
            filename_format: default_filename_format(),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = Some(max_parallel);
        self
    }

    pub fn with_filename_format(mut self, format: impl Into<String>) -> Self {
        self.filename_format = format.into();
        self
    }

    /// Size of the conversion queue, at least 1.
    pub fn parallelism(&self) -> usize {
        self.max_parallel
            .unwrap_or_else(available_parallelism)
            .max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_parallel, None);
        assert_eq!(config.filename_format, "VERT_%name%");
        assert_eq!(config.parallelism(), available_parallelism());
    }

    #[test]
    fn test_deserialize_full() {
        let toml = r#"
            max_parallel = 2
            filename_format = "%name%_converted"
        "#;
        let config: OrchestratorConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.parallelism(), 2);
        assert_eq!(config.filename_format, "%name%_converted");
    }

    #[test]
    fn test_parallelism_never_zero() {
        let config = OrchestratorConfig::default().with_max_parallel(0);
        assert_eq!(config.parallelism(), 1);
    }
}
