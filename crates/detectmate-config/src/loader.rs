//! Settings loader: YAML file plus `DETECTMATE_*` environment overlay.
//!
//! File values are parsed into a [`SettingsOverlay`]; environment variables
//! then replace individual fields. Unknown override names are rejected so a
//! misspelt variable cannot silently fall back to a default.

use std::env;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::address::Address;
use crate::defaults::ENV_PREFIX;
use crate::settings::{SettingsError, SettingsOverlay};

pub(crate) fn load_overlay(path: Option<&Utf8Path>) -> Result<SettingsOverlay, SettingsError> {
    let mut overlay = match path {
        Some(path) if path.as_std_path().exists() => read_overlay(path)?,
        _ => SettingsOverlay::default(),
    };
    apply_env_overrides(&mut overlay)?;
    Ok(overlay)
}

fn read_overlay(path: &Utf8Path) -> Result<SettingsOverlay, SettingsError> {
    let text = fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if text.trim().is_empty() {
        return Ok(SettingsOverlay::default());
    }
    serde_yaml::from_str(&text).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn apply_env_overrides(overlay: &mut SettingsOverlay) -> Result<(), SettingsError> {
    let mut vars: Vec<(String, String)> = env::vars()
        .filter(|(key, _)| key.starts_with(ENV_PREFIX))
        .collect();
    // Deterministic application order regardless of environment iteration.
    vars.sort();

    for (key, value) in vars {
        let field = key
            .strip_prefix(ENV_PREFIX)
            .unwrap_or_default()
            .to_ascii_lowercase();
        apply_one(overlay, &key, &field, value)?;
    }
    Ok(())
}

fn apply_one(
    overlay: &mut SettingsOverlay,
    name: &str,
    field: &str,
    value: String,
) -> Result<(), SettingsError> {
    match field {
        "component_name" => overlay.component_name = Some(value),
        "component_id" => overlay.component_id = Some(value),
        "component_type" => overlay.component_type = Some(value),
        "log_dir" => overlay.log_dir = Some(Utf8PathBuf::from(value)),
        "log_to_console" => overlay.log_to_console = Some(parse_bool(name, &value)?),
        "log_to_file" => overlay.log_to_file = Some(parse_bool(name, &value)?),
        "log_level" => overlay.log_level = Some(value),
        "manager_addr" => overlay.manager_addr = Some(parse_address(name, &value)?),
        "manager_recv_timeout" => overlay.manager_recv_timeout = Some(parse_u64(name, &value)?),
        "manager_thread_join_timeout" => {
            overlay.manager_thread_join_timeout = Some(parse_f64(name, &value)?);
        }
        "engine_addr" => overlay.engine_addr = Some(parse_address(name, &value)?),
        "engine_autostart" => overlay.engine_autostart = Some(parse_bool(name, &value)?),
        "engine_recv_timeout" => overlay.engine_recv_timeout = Some(parse_u64(name, &value)?),
        "out_addr" => overlay.out_addr = Some(parse_address_list(name, &value)?),
        "out_dial_timeout" => overlay.out_dial_timeout = Some(parse_u64(name, &value)?),
        "out_buffer_size" => overlay.out_buffer_size = Some(parse_usize(name, &value)?),
        "config_file" => overlay.config_file = Some(Utf8PathBuf::from(value)),
        // Core settings are flat, so nested `__` names also land here.
        _ => {
            return Err(SettingsError::UnknownEnvField {
                name: name.to_owned(),
            });
        }
    }
    Ok(())
}

fn parse_bool(name: &str, value: &str) -> Result<bool, SettingsError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(SettingsError::InvalidEnvValue {
            name: name.to_owned(),
            reason: format!("expected a boolean, got '{other}'"),
        }),
    }
}

fn parse_u64(name: &str, value: &str) -> Result<u64, SettingsError> {
    value
        .trim()
        .parse()
        .map_err(|_| SettingsError::InvalidEnvValue {
            name: name.to_owned(),
            reason: format!("expected an integer, got '{value}'"),
        })
}

fn parse_usize(name: &str, value: &str) -> Result<usize, SettingsError> {
    value
        .trim()
        .parse()
        .map_err(|_| SettingsError::InvalidEnvValue {
            name: name.to_owned(),
            reason: format!("expected an integer, got '{value}'"),
        })
}

fn parse_f64(name: &str, value: &str) -> Result<f64, SettingsError> {
    value
        .trim()
        .parse()
        .map_err(|_| SettingsError::InvalidEnvValue {
            name: name.to_owned(),
            reason: format!("expected a number, got '{value}'"),
        })
}

fn parse_address(name: &str, value: &str) -> Result<Address, SettingsError> {
    value
        .trim()
        .parse()
        .map_err(|error| SettingsError::InvalidEnvValue {
            name: name.to_owned(),
            reason: format!("{error}"),
        })
}

/// Accepts either a JSON array of URLs or a comma-separated list.
fn parse_address_list(name: &str, value: &str) -> Result<Vec<Address>, SettingsError> {
    let trimmed = value.trim();
    let parts: Vec<String> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).map_err(|error| SettingsError::InvalidEnvValue {
            name: name.to_owned(),
            reason: format!("expected a JSON array of addresses: {error}"),
        })?
    } else {
        trimmed
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_owned)
            .collect()
    };

    parts
        .iter()
        .map(|part| parse_address(name, part))
        .collect()
}
