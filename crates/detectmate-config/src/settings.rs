//! Typed runtime settings for a service instance.
//!
//! Settings are assembled from a YAML document overlaid with `DETECTMATE_*`
//! environment variables, then resolved against the defaults. Resolution
//! validates every address and always populates `component_id`, so a
//! constructed [`Settings`] value is internally consistent and can be treated
//! as frozen by the workers that read it.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::address::{Address, AddressParseError};
use crate::defaults;
use crate::identity::{ComponentId, ComponentIdError};
use crate::loader;

/// Immutable configuration for one pipeline service component.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settings {
    /// Stable human-readable name, when configured.
    pub component_name: Option<String>,
    /// Stable identifier; derived when not supplied explicitly.
    pub component_id: ComponentId,
    /// Component kind, e.g. `detector` or `parser`.
    pub component_type: String,

    /// Directory for log files, created on demand.
    pub log_dir: Utf8PathBuf,
    /// Mirror log records to the console.
    pub log_to_console: bool,
    /// Write log records to `<log_dir>/<type>_<id>.log`.
    pub log_to_file: bool,
    /// Log filter expression.
    pub log_level: String,

    /// Command channel endpoint.
    pub manager_addr: Address,
    /// Command receive timeout in milliseconds; enables cooperative stop.
    pub manager_recv_timeout: u64,
    /// Manager worker join budget in seconds.
    pub manager_thread_join_timeout: f64,

    /// Engine input endpoint.
    pub engine_addr: Address,
    /// Start the engine worker during construction.
    pub engine_autostart: bool,
    /// Engine receive timeout in milliseconds.
    pub engine_recv_timeout: u64,

    /// Downstream peers, fanned out to in order.
    pub out_addr: Vec<Address>,
    /// Dial budget per output connection attempt, in milliseconds.
    pub out_dial_timeout: u64,
    /// Send-buffer size per output socket, in bytes.
    pub out_buffer_size: usize,

    /// Runtime parameter document backing the config manager.
    pub config_file: Option<Utf8PathBuf>,
}

impl Settings {
    /// Loads settings from an optional YAML file with environment overrides.
    ///
    /// A missing path or file yields the defaults; environment variables win
    /// over file values either way.
    pub fn from_yaml(path: Option<&Utf8Path>) -> Result<Self, SettingsError> {
        Self::resolve(loader::load_overlay(path)?)
    }

    /// Resolves an overlay against the defaults and derives the identity.
    pub fn resolve(overlay: SettingsOverlay) -> Result<Self, SettingsError> {
        let component_type = overlay
            .component_type
            .unwrap_or_else(|| defaults::DEFAULT_COMPONENT_TYPE.to_owned());
        let manager_addr = overlay
            .manager_addr
            .unwrap_or_else(defaults::default_manager_addr);
        let engine_addr = overlay
            .engine_addr
            .unwrap_or_else(defaults::default_engine_addr);

        let component_id = match overlay.component_id {
            Some(explicit) => ComponentId::parse(&explicit)?,
            None => match &overlay.component_name {
                Some(name) => ComponentId::from_name(&component_type, name),
                None => ComponentId::from_addresses(&component_type, &manager_addr, &engine_addr),
            },
        };

        Ok(Self {
            component_name: overlay.component_name,
            component_id,
            component_type,
            log_dir: overlay.log_dir.unwrap_or_else(defaults::default_log_dir),
            log_to_console: overlay.log_to_console.unwrap_or(true),
            log_to_file: overlay.log_to_file.unwrap_or(true),
            log_level: overlay
                .log_level
                .unwrap_or_else(|| defaults::DEFAULT_LOG_LEVEL.to_owned()),
            manager_addr,
            manager_recv_timeout: overlay
                .manager_recv_timeout
                .unwrap_or(defaults::DEFAULT_MANAGER_RECV_TIMEOUT_MS),
            manager_thread_join_timeout: overlay
                .manager_thread_join_timeout
                .unwrap_or(defaults::DEFAULT_MANAGER_JOIN_TIMEOUT_SECS),
            engine_addr,
            engine_autostart: overlay.engine_autostart.unwrap_or(true),
            engine_recv_timeout: overlay
                .engine_recv_timeout
                .unwrap_or(defaults::DEFAULT_ENGINE_RECV_TIMEOUT_MS),
            out_addr: overlay.out_addr.unwrap_or_default(),
            out_dial_timeout: overlay
                .out_dial_timeout
                .unwrap_or(defaults::DEFAULT_OUT_DIAL_TIMEOUT_MS),
            out_buffer_size: overlay
                .out_buffer_size
                .unwrap_or(defaults::DEFAULT_OUT_BUFFER_SIZE),
            config_file: overlay.config_file,
        })
    }

    /// Command-channel receive window.
    #[must_use]
    pub fn manager_recv_timeout(&self) -> Duration {
        Duration::from_millis(self.manager_recv_timeout)
    }

    /// Manager worker join budget.
    #[must_use]
    pub fn manager_join_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.manager_thread_join_timeout.max(0.0))
    }

    /// Engine input receive window.
    #[must_use]
    pub fn engine_recv_timeout(&self) -> Duration {
        Duration::from_millis(self.engine_recv_timeout)
    }

    /// Per-attempt output dial budget.
    #[must_use]
    pub fn out_dial_timeout(&self) -> Duration {
        Duration::from_millis(self.out_dial_timeout)
    }
}

impl Default for Settings {
    fn default() -> Self {
        let component_type = defaults::DEFAULT_COMPONENT_TYPE.to_owned();
        let manager_addr = defaults::default_manager_addr();
        let engine_addr = defaults::default_engine_addr();
        let component_id =
            ComponentId::from_addresses(&component_type, &manager_addr, &engine_addr);
        Self {
            component_name: None,
            component_id,
            component_type,
            log_dir: defaults::default_log_dir(),
            log_to_console: true,
            log_to_file: true,
            log_level: defaults::DEFAULT_LOG_LEVEL.to_owned(),
            manager_addr,
            manager_recv_timeout: defaults::DEFAULT_MANAGER_RECV_TIMEOUT_MS,
            manager_thread_join_timeout: defaults::DEFAULT_MANAGER_JOIN_TIMEOUT_SECS,
            engine_addr,
            engine_autostart: true,
            engine_recv_timeout: defaults::DEFAULT_ENGINE_RECV_TIMEOUT_MS,
            out_addr: Vec::new(),
            out_dial_timeout: defaults::DEFAULT_OUT_DIAL_TIMEOUT_MS,
            out_buffer_size: defaults::DEFAULT_OUT_BUFFER_SIZE,
            config_file: None,
        }
    }
}

/// Partially specified settings, as read from YAML before resolution.
///
/// Unknown fields are rejected so typos in a settings file fail fast.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsOverlay {
    pub component_name: Option<String>,
    pub component_id: Option<String>,
    pub component_type: Option<String>,
    pub log_dir: Option<Utf8PathBuf>,
    pub log_to_console: Option<bool>,
    pub log_to_file: Option<bool>,
    pub log_level: Option<String>,
    pub manager_addr: Option<Address>,
    pub manager_recv_timeout: Option<u64>,
    pub manager_thread_join_timeout: Option<f64>,
    pub engine_addr: Option<Address>,
    pub engine_autostart: Option<bool>,
    pub engine_recv_timeout: Option<u64>,
    pub out_addr: Option<Vec<Address>>,
    pub out_dial_timeout: Option<u64>,
    pub out_buffer_size: Option<usize>,
    pub config_file: Option<Utf8PathBuf>,
}

/// Errors raised while loading or resolving settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Settings file could not be read.
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Settings file is not valid YAML for the settings model.
    #[error("invalid settings file {path}: {source}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    /// An address value failed validation.
    #[error("invalid address: {0}")]
    Address(#[from] AddressParseError),
    /// An explicit component id failed validation.
    #[error(transparent)]
    ComponentId(#[from] ComponentIdError),
    /// Environment override names a field that does not exist.
    #[error("unknown settings field in environment variable {name}")]
    UnknownEnvField { name: String },
    /// Environment override carries an unparsable value.
    #[error("invalid value in environment variable {name}: {reason}")]
    InvalidEnvValue { name: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_the_documented_table() {
        let settings = Settings::default();
        assert_eq!(settings.component_type, "core");
        assert_eq!(
            settings.manager_addr.to_string(),
            "ipc:///tmp/detectmate.cmd.ipc"
        );
        assert_eq!(
            settings.engine_addr.to_string(),
            "ipc:///tmp/detectmate.engine.ipc"
        );
        assert_eq!(settings.manager_recv_timeout(), Duration::from_millis(100));
        assert_eq!(settings.engine_recv_timeout(), Duration::from_millis(100));
        assert_eq!(settings.manager_join_timeout(), Duration::from_secs(1));
        assert_eq!(settings.out_dial_timeout(), Duration::from_millis(1000));
        assert_eq!(settings.out_buffer_size, 8192);
        assert!(settings.engine_autostart);
        assert!(settings.out_addr.is_empty());
        assert!(settings.config_file.is_none());
    }

    #[test]
    fn explicit_id_wins_over_derivation() {
        let overlay = SettingsOverlay {
            component_id: Some("00112233445566778899aabbccddeeff".to_owned()),
            component_name: Some("detector-1".to_owned()),
            ..SettingsOverlay::default()
        };
        let settings = Settings::resolve(overlay).expect("resolve settings");
        assert_eq!(
            settings.component_id.as_str(),
            "00112233445566778899aabbccddeeff"
        );
    }

    #[test]
    fn named_components_share_an_id_across_addresses() {
        let first = Settings::resolve(SettingsOverlay {
            component_name: Some("detector-1".to_owned()),
            component_type: Some("detector".to_owned()),
            ..SettingsOverlay::default()
        })
        .expect("resolve settings");
        let second = Settings::resolve(SettingsOverlay {
            component_name: Some("detector-1".to_owned()),
            component_type: Some("detector".to_owned()),
            manager_addr: Some(Address::tcp("127.0.0.1", 7000)),
            ..SettingsOverlay::default()
        })
        .expect("resolve settings");
        assert_eq!(first.component_id, second.component_id);
    }

    #[test]
    fn unnamed_components_derive_from_addresses() {
        let base = Settings::default();
        let moved = Settings::resolve(SettingsOverlay {
            engine_addr: Some(Address::ipc("/tmp/elsewhere.ipc")),
            ..SettingsOverlay::default()
        })
        .expect("resolve settings");
        assert_ne!(base.component_id, moved.component_id);
    }

    #[test]
    fn settings_survive_a_yaml_roundtrip() {
        let mut settings = Settings::default();
        settings.component_name = Some("parser-2".to_owned());
        settings.out_addr = vec![
            Address::tcp("127.0.0.1", 6001),
            Address::ipc("/tmp/out.ipc"),
        ];
        settings.config_file = Some(Utf8PathBuf::from("/tmp/params.yaml"));

        let yaml = serde_yaml::to_string(&settings).expect("serialize settings");
        let overlay: SettingsOverlay = serde_yaml::from_str(&yaml).expect("parse settings yaml");
        let restored = Settings::resolve(overlay).expect("resolve settings");
        assert_eq!(restored, settings);
    }
}
