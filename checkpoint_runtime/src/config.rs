//! Runner configuration.
//!
//! A JSON document naming where checkpoints live and which schemas the
//! validator accepts:
//!
//! ```json
//! {
//!   "store_dir": "/var/lib/checkpoints",
//!   "keep_snapshots": 5,
//!   "journal": true,
//!   "schemas": [
//!     {"event_type": "visit", "version": 1,
//!      "fields": {"ptid": {"type": "string"}}}
//!   ]
//! }
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use checkpoint_kernel::schema::{RegistryError, SchemaDefinition, SchemaRegistry};

use crate::file_store::FileCheckpointStore;
use crate::journal::RunJournal;
use crate::orchestrator::Orchestrator;

/// File name of the run journal inside `store_dir`.
pub const JOURNAL_FILE: &str = "runs.journal";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("invalid schema set: {0}")]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerConfig {
    pub store_dir: PathBuf,
    /// Snapshot files kept per checkpoint; 0 keeps all.
    #[serde(default = "default_keep_snapshots")]
    pub keep_snapshots: usize,
    /// Append run summaries to `<store_dir>/runs.journal`.
    #[serde(default = "default_journal")]
    pub journal: bool,
    pub schemas: Vec<SchemaDefinition>,
}

fn default_keep_snapshots() -> usize {
    10
}

fn default_journal() -> bool {
    true
}

impl RunnerConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("store_dir must not be empty".to_string()));
        }
        if self.schemas.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one schema definition is required".to_string(),
            ));
        }
        Ok(())
    }

    pub fn build_registry(&self) -> Result<Arc<SchemaRegistry>, ConfigError> {
        Ok(Arc::new(SchemaRegistry::new(self.schemas.clone())?))
    }

    pub fn journal_path(&self) -> PathBuf {
        self.store_dir.join(JOURNAL_FILE)
    }

    /// File-backed orchestrator, journaled if enabled.
    pub fn build_orchestrator(&self) -> Result<Orchestrator<FileCheckpointStore>, ConfigError> {
        let registry = self.build_registry()?;
        let store = FileCheckpointStore::new(&self.store_dir).with_retention(self.keep_snapshots);
        let mut orchestrator = Orchestrator::new(registry, store);
        if self.journal {
            orchestrator = orchestrator.with_journal(RunJournal::open(&self.journal_path())?);
        }
        tracing::info!(
            store_dir = %self.store_dir.display(),
            schemas = self.schemas.len(),
            journal = self.journal,
            "orchestrator configured"
        );
        Ok(orchestrator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "store_dir": "/tmp/checkpoints",
        "schemas": [{"event_type": "visit", "version": 1, "fields": {"ptid": {"type": "string"}}}]
    }"#;

    #[test]
    fn defaults_apply() {
        let config = RunnerConfig::from_json_str(MINIMAL).unwrap();
        assert_eq!(config.keep_snapshots, 10);
        assert!(config.journal);
        assert_eq!(config.journal_path(), PathBuf::from("/tmp/checkpoints/runs.journal"));
        let registry = config.build_registry().unwrap();
        assert_eq!(registry.latest_version("visit"), Some(1));
    }

    #[test]
    fn unknown_keys_and_empty_schemas_are_rejected() {
        let unknown = MINIMAL.replacen("\"store_dir\"", "\"colour\": 1, \"store_dir\"", 1);
        assert!(matches!(
            RunnerConfig::from_json_str(&unknown),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            RunnerConfig::from_json_str(r#"{"store_dir": "x", "schemas": []}"#),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn duplicate_schemas_fail_registry_build() {
        let json = r#"{
            "store_dir": "x",
            "schemas": [
                {"event_type": "visit", "version": 1, "fields": {}},
                {"event_type": "visit", "version": 1, "fields": {}}
            ]
        }"#;
        let config = RunnerConfig::from_json_str(json).unwrap();
        assert!(matches!(config.build_registry(), Err(ConfigError::Registry(_))));
    }
}
