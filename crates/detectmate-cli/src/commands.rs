//! Implementations of the lifecycle subcommands.

use std::fs;
use std::sync::Arc;
use std::thread;

use camino::Utf8Path;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::info;

use detectmate_config::Settings;
use detectmate_service::{LifecycleLatch, PassthroughProcessor, Service};

use crate::client;
use crate::errors::AppError;

const CLI_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::commands");

/// Hosts a generic core service in the foreground until stopped.
///
/// Stop arrives either as a `stop` command on the manager channel or as
/// SIGINT/SIGTERM; both set the lifecycle latch and unwind through the
/// normal teardown path.
pub(crate) fn start(
    settings_path: Option<&Utf8Path>,
    config_path: Option<&Utf8Path>,
) -> Result<(), AppError> {
    let mut settings = load_settings(settings_path)?;
    if let Some(config) = config_path {
        if !config.as_std_path().exists() {
            return Err(AppError::ConfigNotFound {
                path: config.to_path_buf(),
            });
        }
        settings.config_file = Some(config.to_path_buf());
    }

    let service = Service::new(settings, Arc::new(PassthroughProcessor))?;
    install_signal_handler(service.latch())?;
    service.setup_io()?;
    info!(
        target: CLI_TARGET,
        component_id = %service.settings().component_id,
        "service running"
    );
    service.run();
    Ok(())
}

pub(crate) fn stop(settings_path: &Utf8Path) -> Result<String, AppError> {
    let settings = load_settings(Some(settings_path))?;
    client::request(&settings.manager_addr, "stop")
}

pub(crate) fn status(settings_path: &Utf8Path) -> Result<String, AppError> {
    let settings = load_settings(Some(settings_path))?;
    client::request(&settings.manager_addr, "status")
}

pub(crate) fn reconfigure(
    settings_path: &Utf8Path,
    config_path: &Utf8Path,
    persist: bool,
) -> Result<String, AppError> {
    let settings = load_settings(Some(settings_path))?;
    let payload = read_config_payload(config_path)?;
    let command = if persist {
        format!("reconfigure persist {payload}")
    } else {
        format!("reconfigure {payload}")
    };
    client::request(&settings.manager_addr, &command)
}

/// Loads settings, requiring an explicitly named file to exist.
fn load_settings(path: Option<&Utf8Path>) -> Result<Settings, AppError> {
    if let Some(path) = path
        && !path.as_std_path().exists()
    {
        return Err(AppError::SettingsNotFound {
            path: path.to_path_buf(),
        });
    }
    Ok(Settings::from_yaml(path)?)
}

/// Reads a YAML parameters file and re-encodes it as the JSON command payload.
fn read_config_payload(path: &Utf8Path) -> Result<String, AppError> {
    if !path.as_std_path().exists() {
        return Err(AppError::ConfigNotFound {
            path: path.to_path_buf(),
        });
    }
    let text = fs::read_to_string(path.as_std_path()).map_err(|source| AppError::ReadConfig {
        path: path.to_path_buf(),
        source,
    })?;
    let data: serde_json::Value =
        serde_yaml::from_str(&text).map_err(|source| AppError::ParseConfig {
            path: path.to_path_buf(),
            source,
        })?;
    serde_json::to_string(&data).map_err(AppError::EncodeConfig)
}

fn install_signal_handler(latch: Arc<LifecycleLatch>) -> Result<(), AppError> {
    let mut signals =
        Signals::new([SIGINT, SIGTERM]).map_err(|source| AppError::Signals { source })?;
    thread::spawn(move || {
        if let Some(signal) = signals.forever().next() {
            info!(target: CLI_TARGET, signal, "shutdown signal received");
            latch.set();
        }
    });
    Ok(())
}
