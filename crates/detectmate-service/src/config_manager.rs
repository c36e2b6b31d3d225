//! Validated, thread-safe runtime parameters with file persistence.
//!
//! The manager owns at most one current parameters document. With a schema
//! attached, every load and update passes through validation before the
//! document is replaced, so a failed update leaves the previous parameters
//! untouched. Persistence is explicit: `update` and `save` are separate
//! operations and the `reconfigure` command only saves when asked to.

use std::fs;
use std::sync::{Arc, Mutex, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

const CONFIG_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::config");

/// Validation strategy for a parameters document.
///
/// Implementations typically round-trip the JSON value through a typed serde
/// struct and check its field constraints.
pub trait ConfigSchema: Send + Sync {
    /// The document instantiated when no file exists yet.
    fn defaults(&self) -> Value;
    /// Validates a candidate document, returning its normalized form.
    fn validate(&self, value: &Value) -> Result<Value, ConfigValidationError>;
}

/// A candidate document violated the schema.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ConfigValidationError {
    message: String,
}

impl ConfigValidationError {
    /// Builds an error from a display message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Owner of the current, validated parameters document.
pub struct ConfigManager {
    path: Utf8PathBuf,
    schema: Option<Arc<dyn ConfigSchema>>,
    state: Mutex<Option<Value>>,
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigManager")
            .field("path", &self.path)
            .field("has_schema", &self.schema.is_some())
            .field("state", &self.state)
            .finish()
    }
}

impl ConfigManager {
    /// Creates a manager backed by `path` and performs the initial load.
    pub fn new(
        path: Utf8PathBuf,
        schema: Option<Arc<dyn ConfigSchema>>,
    ) -> Result<Self, ConfigManagerError> {
        let manager = Self {
            path,
            schema,
            state: Mutex::new(None),
        };
        manager.load()?;
        Ok(manager)
    }

    /// File backing this manager.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// (Re)loads the document from disk.
    ///
    /// A missing file is instantiated from the schema defaults and saved
    /// immediately; without a schema the parameters stay unset.
    pub fn load(&self) -> Result<(), ConfigManagerError> {
        debug!(target: CONFIG_TARGET, path = %self.path, "loading parameters");
        if !self.path.as_std_path().exists() {
            match &self.schema {
                Some(schema) => {
                    info!(
                        target: CONFIG_TARGET,
                        path = %self.path,
                        "parameter file missing, creating defaults"
                    );
                    let defaults = schema.defaults();
                    *self.lock_state() = Some(defaults);
                    self.save()?;
                }
                None => {
                    warn!(
                        target: CONFIG_TARGET,
                        path = %self.path,
                        "parameter file missing and no schema provided, parameters stay unset"
                    );
                }
            }
            return Ok(());
        }

        let text = fs::read_to_string(self.path.as_std_path()).map_err(|source| {
            error!(target: CONFIG_TARGET, path = %self.path, error = %source, "failed to read parameters");
            ConfigManagerError::Read {
                path: self.path.clone(),
                source,
            }
        })?;
        let data: Value = serde_yaml::from_str(&text).map_err(|source| {
            error!(target: CONFIG_TARGET, path = %self.path, error = %source, "failed to parse parameters");
            ConfigManagerError::Parse {
                path: self.path.clone(),
                source,
            }
        })?;
        if data.is_null() {
            // Empty document: leave parameters unset.
            return Ok(());
        }

        let document = match &self.schema {
            Some(schema) => schema.validate(&data).map_err(|source| {
                error!(target: CONFIG_TARGET, path = %self.path, error = %source, "parameter validation failed");
                ConfigManagerError::Validation(source)
            })?,
            None => data,
        };
        *self.lock_state() = Some(document);
        Ok(())
    }

    /// Replaces the document after validating the candidate value.
    ///
    /// On a validation error the in-memory parameters are left unchanged.
    pub fn update(&self, value: Value) -> Result<(), ConfigManagerError> {
        let mut state = self.lock_state();
        let document = match &self.schema {
            Some(schema) => schema.validate(&value)?,
            None => value,
        };
        info!(target: CONFIG_TARGET, "parameters updated");
        *state = Some(document);
        Ok(())
    }

    /// Writes the current document to disk as block-style YAML.
    pub fn save(&self) -> Result<(), ConfigManagerError> {
        let state = self.lock_state();
        let Some(document) = state.as_ref() else {
            return Ok(());
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_str().is_empty()
        {
            fs::create_dir_all(parent.as_std_path()).map_err(|source| {
                error!(target: CONFIG_TARGET, path = %parent, error = %source, "failed to create parameter directory");
                ConfigManagerError::CreateDirectory {
                    path: parent.to_path_buf(),
                    source,
                }
            })?;
        }

        let yaml =
            serde_yaml::to_string(document).map_err(|source| ConfigManagerError::Serialize { source })?;
        fs::write(self.path.as_std_path(), yaml).map_err(|source| {
            error!(target: CONFIG_TARGET, path = %self.path, error = %source, "failed to write parameters");
            ConfigManagerError::Write {
                path: self.path.clone(),
                source,
            }
        })?;
        debug!(target: CONFIG_TARGET, path = %self.path, "parameters saved");
        Ok(())
    }

    /// Snapshot of the current document, if any.
    #[must_use]
    pub fn get(&self) -> Option<Value> {
        self.lock_state().clone()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, Option<Value>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Errors raised by [`ConfigManager`] operations.
#[derive(Debug, Error)]
pub enum ConfigManagerError {
    /// Parameter file could not be read.
    #[error("failed to read parameter file {path}: {source}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Parameter file is not valid YAML.
    #[error("invalid YAML in parameter file {path}: {source}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    /// The document violated the schema.
    #[error(transparent)]
    Validation(#[from] ConfigValidationError),
    /// The parameter directory could not be created.
    #[error("failed to create parameter directory {path}: {source}")]
    CreateDirectory {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Serializing the document failed.
    #[error("failed to serialize parameters: {source}")]
    Serialize {
        #[source]
        source: serde_yaml::Error,
    },
    /// Writing the parameter file failed.
    #[error("failed to write parameter file {path}: {source}")]
    Write {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    struct DetectorConfig {
        threshold: f64,
        enabled: bool,
    }

    impl Default for DetectorConfig {
        fn default() -> Self {
            Self {
                threshold: 0.5,
                enabled: true,
            }
        }
    }

    struct DetectorSchema;

    impl ConfigSchema for DetectorSchema {
        fn defaults(&self) -> Value {
            serde_json::to_value(DetectorConfig::default()).unwrap_or(Value::Null)
        }

        fn validate(&self, value: &Value) -> Result<Value, ConfigValidationError> {
            let config: DetectorConfig = serde_json::from_value(value.clone())
                .map_err(|error| ConfigValidationError::new(error.to_string()))?;
            if !(0.0..=1.0).contains(&config.threshold) {
                return Err(ConfigValidationError::new(format!(
                    "threshold {} is outside 0.0..=1.0",
                    config.threshold
                )));
            }
            serde_json::to_value(&config)
                .map_err(|error| ConfigValidationError::new(error.to_string()))
        }
    }

    fn param_path(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().join("params.yaml")).expect("utf8 path")
    }

    #[test]
    fn missing_file_with_schema_creates_defaults_on_disk() {
        let dir = TempDir::new().expect("temporary directory");
        let path = param_path(&dir);
        let manager = ConfigManager::new(path.clone(), Some(Arc::new(DetectorSchema)))
            .expect("create manager");

        let document = manager.get().expect("defaults loaded");
        assert_eq!(document["threshold"], json!(0.5));
        assert_eq!(document["enabled"], json!(true));
        assert!(path.as_std_path().exists());
    }

    #[test]
    fn missing_file_without_schema_leaves_parameters_unset() {
        let dir = TempDir::new().expect("temporary directory");
        let manager = ConfigManager::new(param_path(&dir), None).expect("create manager");
        assert!(manager.get().is_none());
    }

    #[test]
    fn existing_file_is_validated_at_load() {
        let dir = TempDir::new().expect("temporary directory");
        let path = param_path(&dir);
        fs::write(path.as_std_path(), "threshold: 0.7\nenabled: false\n").expect("seed file");

        let manager =
            ConfigManager::new(path, Some(Arc::new(DetectorSchema))).expect("create manager");
        let document = manager.get().expect("document loaded");
        assert_eq!(document["threshold"], json!(0.7));
        assert_eq!(document["enabled"], json!(false));
    }

    #[test]
    fn invalid_file_propagates_at_load() {
        let dir = TempDir::new().expect("temporary directory");
        let path = param_path(&dir);
        fs::write(path.as_std_path(), "threshold: 3.5\nenabled: true\n").expect("seed file");

        let error = ConfigManager::new(path, Some(Arc::new(DetectorSchema)))
            .expect_err("out-of-range threshold");
        assert!(matches!(error, ConfigManagerError::Validation(_)));
    }

    #[test]
    fn failed_update_leaves_parameters_unchanged() {
        let dir = TempDir::new().expect("temporary directory");
        let manager = ConfigManager::new(param_path(&dir), Some(Arc::new(DetectorSchema)))
            .expect("create manager");

        manager
            .update(json!({"threshold": 0.8, "enabled": true}))
            .expect("valid update");
        manager
            .update(json!({"threshold": 2.0, "enabled": true}))
            .expect_err("invalid update");

        let document = manager.get().expect("document present");
        assert_eq!(document["threshold"], json!(0.8));
    }

    #[test]
    fn save_and_reload_roundtrip() {
        let dir = TempDir::new().expect("temporary directory");
        let path = param_path(&dir);
        {
            let manager = ConfigManager::new(path.clone(), Some(Arc::new(DetectorSchema)))
                .expect("create manager");
            manager
                .update(json!({"threshold": 0.9, "enabled": false}))
                .expect("valid update");
            manager.save().expect("save");
        }

        let reloaded =
            ConfigManager::new(path, Some(Arc::new(DetectorSchema))).expect("reload manager");
        let document = reloaded.get().expect("document present");
        assert_eq!(document["threshold"], json!(0.9));
        assert_eq!(document["enabled"], json!(false));
    }

    #[test]
    fn update_without_schema_stores_the_raw_mapping() {
        let dir = TempDir::new().expect("temporary directory");
        let manager = ConfigManager::new(param_path(&dir), None).expect("create manager");
        manager
            .update(json!({"anything": ["goes", 1, true]}))
            .expect("raw update");
        let document = manager.get().expect("document present");
        assert_eq!(document["anything"][1], json!(1));
    }
}
