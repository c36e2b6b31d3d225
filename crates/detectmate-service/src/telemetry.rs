//! Structured logging initialisation for service processes.
//!
//! Builds the global `tracing` subscriber from the settings' log policy: an
//! optional console layer on stderr and an optional file layer writing
//! `<log_dir>/<component_type>_<component_id>.log`. Installation happens at
//! most once per process; later calls reuse the existing subscriber.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::sync::Arc;

use camino::Utf8PathBuf;
use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;

use detectmate_config::Settings;

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// Handle returned when telemetry has been initialised.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Errors encountered while configuring telemetry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The configured log level is not a valid filter expression.
    #[error("invalid log level: {0}")]
    Filter(String),
    /// The log directory could not be created.
    #[error("failed to create log directory {path}: {source}")]
    CreateLogDir {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    /// The log file could not be opened.
    #[error("failed to open log file {path}: {source}")]
    OpenLogFile {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    /// Installing the global subscriber failed.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Configures the global tracing subscriber when invoked for the first time.
pub fn initialise(settings: &Settings) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| install_subscriber(settings))
        .map(|_| TelemetryHandle)
}

fn install_subscriber(settings: &Settings) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(settings.log_level.to_ascii_lowercase())
        .map_err(|error| TelemetryError::Filter(error.to_string()))?;

    let console_layer = settings
        .log_to_console
        .then(|| fmt::layer().with_target(true).with_writer(io::stderr));

    let file_layer = if settings.log_to_file {
        let file = Arc::new(open_log_file(settings)?);
        Some(
            fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(move || LogFileWriter(Arc::clone(&file))),
        )
    } else {
        None
    };

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer);
    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}

fn open_log_file(settings: &Settings) -> Result<File, TelemetryError> {
    fs::create_dir_all(settings.log_dir.as_std_path()).map_err(|source| {
        TelemetryError::CreateLogDir {
            path: settings.log_dir.clone(),
            source,
        }
    })?;
    let path = settings.log_dir.join(format!(
        "{}_{}.log",
        settings.component_type, settings.component_id
    ));
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path.as_std_path())
        .map_err(|source| TelemetryError::OpenLogFile { path, source })
}

struct LogFileWriter(Arc<File>);

impl io::Write for LogFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&*self.0).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (&*self.0).flush()
    }
}
