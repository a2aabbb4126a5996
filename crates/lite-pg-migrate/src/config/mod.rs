//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration for two DSNs with default migration settings.
    pub fn from_dsns(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: EndpointConfig::new(source),
            target: EndpointConfig::new(target),
            schema: None,
            migration: MigrationConfig::default(),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// SHA256 hash of the endpoints, for resume validation.
    ///
    /// Tuning knobs such as the batch size may change between attempts, so
    /// only the source and target sections are hashed.
    pub fn hash(&self) -> String {
        let yaml = serde_yaml::to_string(&(&self.source, &self.target)).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(yaml.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
source:
  dsn: sqlite:///learning.db
target:
  dsn: postgresql://app:pw@localhost:5432/learning
schema: schemas/learning_platform.yaml
migration:
  batch_size: 500
  sample_tables: [emerging_skills]
"#;

    #[test]
    fn test_from_yaml_applies_defaults() {
        let config = Config::from_yaml(CONFIG).unwrap();
        assert_eq!(config.migration.batch_size, 500);
        assert_eq!(config.migration.max_data_loss_percent, 5.0);
        assert_eq!(config.migration.validation_sample_size, 100);
        assert!(config.migration.post_validation);
        assert_eq!(config.migration.max_record_failure_percent, None);
        assert_eq!(
            config.schema.as_deref(),
            Some(Path::new("schemas/learning_platform.yaml"))
        );
    }

    #[test]
    fn test_hash_ignores_tuning() {
        let a = Config::from_yaml(CONFIG).unwrap();
        let mut b = a.clone();
        b.migration.batch_size = 10;
        assert_eq!(a.hash(), b.hash());

        b.target.dsn = "postgresql://app:pw@localhost:5432/other".to_string();
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_empty_yaml_is_error() {
        assert!(Config::from_yaml("").is_err());
    }
}
