//! Error types for the CLI runtime.

use std::io;

use camino::Utf8PathBuf;
use thiserror::Error;

use detectmate_config::SettingsError;
use detectmate_service::{ProcessorError, ServiceError};

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("{0}")]
    Settings(#[from] SettingsError),
    #[error("settings file not found: {path}")]
    SettingsNotFound { path: Utf8PathBuf },
    #[error("config file not found: {path}")]
    ConfigNotFound { path: Utf8PathBuf },
    #[error("failed to read config file {path}: {source}")]
    ReadConfig {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid YAML in config file {path}: {source}")]
    ParseConfig {
        path: Utf8PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to encode config payload: {0}")]
    EncodeConfig(serde_json::Error),
    #[error("failed to build service: {0}")]
    Service(#[from] ServiceError),
    #[error("failed to set up service IO: {0}")]
    Setup(#[from] ProcessorError),
    #[error("failed to install signal handlers: {source}")]
    Signals {
        #[source]
        source: io::Error,
    },
    #[error("unsupported transport for command channel: {0}")]
    UnsupportedTransport(String),
    #[error("failed to connect to service at {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to send command: {0}")]
    SendRequest(io::Error),
    #[error("failed to read reply: {0}")]
    ReadReply(io::Error),
    #[error("service reply was not valid UTF-8")]
    InvalidReply,
}
