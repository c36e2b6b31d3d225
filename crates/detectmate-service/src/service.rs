//! Service composition: identity + Manager + Engine + ConfigManager.
//!
//! A service owns the lifecycle latch and wires the canonical commands
//! (`start`, `stop`, `status`, `reconfigure`; `ping` is built into the
//! manager). Construction order matters: telemetry and the latch first, then
//! the manager (so the command channel is up before the engine), then the
//! engine (which may auto-start), then the config manager. The command
//! handlers reach the engine and config manager through late-bound cells so
//! the manager can be constructed before they exist.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use detectmate_config::Settings;

use crate::config_manager::{ConfigManager, ConfigManagerError, ConfigSchema};
use crate::engine::{Engine, EngineError};
use crate::lifecycle::LifecycleLatch;
use crate::manager::{CommandError, CommandRegistry, Manager};
use crate::processor::{Processor, ProcessorError};
use crate::telemetry::{self, TelemetryError};
use crate::transport::{
    EngineSocketFactory, ManagerSocketFactory, SocketError, StreamEngineSocketFactory,
    StreamManagerSocketFactory,
};

const SERVICE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::service");

/// Collaborators a service can be built with.
///
/// The defaults cover production wiring; tests swap the socket factories for
/// in-memory implementations and attach a config schema.
pub struct ServiceOptions {
    /// Validation schema for the config manager, when one applies.
    pub config_schema: Option<Arc<dyn ConfigSchema>>,
    /// Factory for the engine input and output sockets.
    pub engine_sockets: Arc<dyn EngineSocketFactory>,
    /// Factory for the command channel socket.
    pub manager_sockets: Arc<dyn ManagerSocketFactory>,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            config_schema: None,
            engine_sockets: Arc::new(StreamEngineSocketFactory),
            manager_sockets: Arc::new(StreamManagerSocketFactory),
        }
    }
}

/// One running pipeline component.
pub struct Service {
    settings: Settings,
    latch: Arc<LifecycleLatch>,
    engine: Arc<Engine>,
    manager: Manager,
    config_manager: Option<Arc<ConfigManager>>,
    processor: Arc<dyn Processor>,
}

impl Service {
    /// Builds a service with the default collaborators.
    pub fn new(settings: Settings, processor: Arc<dyn Processor>) -> Result<Self, ServiceError> {
        Self::with_options(settings, processor, ServiceOptions::default())
    }

    /// Builds a service with explicit collaborators.
    pub fn with_options(
        settings: Settings,
        processor: Arc<dyn Processor>,
        options: ServiceOptions,
    ) -> Result<Self, ServiceError> {
        telemetry::initialise(&settings)?;

        let latch = Arc::new(LifecycleLatch::new());
        let engine_cell: Arc<OnceCell<Arc<Engine>>> = Arc::new(OnceCell::new());
        let config_cell: Arc<OnceCell<Arc<ConfigManager>>> = Arc::new(OnceCell::new());

        let registry = build_registry(&settings, &latch, &engine_cell, &config_cell);
        let manager = Manager::start(
            &settings,
            registry,
            options.manager_sockets.as_ref(),
            Arc::clone(&latch),
        )
        .map_err(|source| ServiceError::Manager { source })?;

        let engine = match Engine::new(
            &settings,
            Arc::clone(&processor),
            options.engine_sockets.as_ref(),
        ) {
            Ok(engine) => Arc::new(engine),
            Err(source) => {
                manager.close();
                return Err(ServiceError::Engine(source));
            }
        };
        let _ = engine_cell.set(Arc::clone(&engine));

        let config_manager = match &settings.config_file {
            Some(path) => {
                debug!(target: SERVICE_TARGET, path = %path, "initialising config manager");
                match ConfigManager::new(path.clone(), options.config_schema) {
                    Ok(manager_value) => {
                        let manager_value = Arc::new(manager_value);
                        let _ = config_cell.set(Arc::clone(&manager_value));
                        Some(manager_value)
                    }
                    Err(source) => {
                        let _ = engine.stop();
                        manager.close();
                        return Err(ServiceError::Config(source));
                    }
                }
            }
            None => None,
        };

        debug!(
            target: SERVICE_TARGET,
            component_type = %settings.component_type,
            component_id = %settings.component_id,
            "service created"
        );
        Ok(Self {
            settings,
            latch,
            engine,
            manager,
            config_manager,
            processor,
        })
    }

    /// Resolved settings this service runs with.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The stop latch; setting it makes [`Service::run`] return.
    #[must_use]
    pub fn latch(&self) -> Arc<LifecycleLatch> {
        Arc::clone(&self.latch)
    }

    /// Whether the engine worker is running.
    #[must_use]
    pub fn engine_running(&self) -> bool {
        self.engine.is_running()
    }

    /// Config manager, when a `config_file` is configured.
    #[must_use]
    pub fn config_manager(&self) -> Option<&Arc<ConfigManager>> {
        self.config_manager.as_ref()
    }

    /// Hook run when the service enters its scope.
    pub fn setup_io(&self) -> Result<(), ProcessorError> {
        self.processor.setup()?;
        info!(target: SERVICE_TARGET, "setup_io: ready to process messages");
        Ok(())
    }

    /// Kicks off the engine, then blocks until stop is requested.
    pub fn run(&self) {
        if self.engine.is_running() {
            debug!(target: SERVICE_TARGET, "engine already running");
        } else {
            info!(target: SERVICE_TARGET, "{}", self.engine.start());
        }

        self.latch.wait();

        // stop() is idempotent, so shutdown always routes through the
        // engine's close-and-join sequence no matter who requested it.
        if let Err(error) = self.engine.stop() {
            error!(target: SERVICE_TARGET, %error, "failed to stop engine");
        }
    }

    /// Requests stop and shuts the engine down.
    pub fn stop(&self) -> Result<(), EngineError> {
        self.latch.set();
        self.engine.stop()
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        self.latch.set();
        if let Err(error) = self.engine.stop() {
            warn!(target: SERVICE_TARGET, %error, "engine stop during teardown failed");
        }
        self.manager.close();
    }
}

fn build_registry(
    settings: &Settings,
    latch: &Arc<LifecycleLatch>,
    engine_cell: &Arc<OnceCell<Arc<Engine>>>,
    config_cell: &Arc<OnceCell<Arc<ConfigManager>>>,
) -> CommandRegistry {
    let mut registry = CommandRegistry::new();

    {
        let engine = Arc::clone(engine_cell);
        registry.register_no_arg("start", move || {
            let engine = bound_engine(&engine)?;
            let reply = engine.start();
            info!(target: SERVICE_TARGET, "{reply}");
            Ok(reply.to_owned())
        });
    }

    {
        let engine = Arc::clone(engine_cell);
        let latch = Arc::clone(latch);
        registry.register_no_arg("stop", move || {
            if latch.is_set() {
                return Ok("already stopping or stopped".to_owned());
            }
            info!(target: SERVICE_TARGET, "stop command received");
            latch.set();
            let engine = bound_engine(&engine)?;
            match engine.stop() {
                Ok(()) => Ok("engine stopped".to_owned()),
                Err(error) => {
                    error!(target: SERVICE_TARGET, %error, "failed to stop engine");
                    Ok(format!("error: failed to stop engine - {error}"))
                }
            }
        });
    }

    {
        let settings = settings.clone();
        let engine = Arc::clone(engine_cell);
        let config = Arc::clone(config_cell);
        registry.register_no_arg("status", move || {
            let running = engine.get().is_some_and(|engine| engine.is_running());
            let report = status_report(&settings, running, config.get());
            serde_json::to_string_pretty(&report)
                .map_err(|error| CommandError::new(format!("failed to serialize status: {error}")))
        });
    }

    {
        let config = Arc::clone(config_cell);
        registry.register_with_command("reconfigure", move |command| {
            Ok(handle_reconfigure(config.get(), command))
        });
    }

    registry
}

fn bound_engine(cell: &OnceCell<Arc<Engine>>) -> Result<&Arc<Engine>, CommandError> {
    cell.get()
        .ok_or_else(|| CommandError::new("engine not initialised yet"))
}

fn status_report(settings: &Settings, running: bool, config: Option<&Arc<ConfigManager>>) -> Value {
    let configs = match config {
        Some(manager) => manager.get().unwrap_or_else(|| {
            warn!(target: SERVICE_TARGET, "config manager holds no parameters");
            json!({})
        }),
        None => {
            warn!(target: SERVICE_TARGET, "no config manager initialised");
            json!({})
        }
    };
    json!({
        "status": {
            "component_type": &settings.component_type,
            "component_id": settings.component_id.as_str(),
            "running": running,
        },
        "settings": settings,
        "configs": configs,
    })
}

fn handle_reconfigure(manager: Option<&Arc<ConfigManager>>, command: &str) -> String {
    let Some(manager) = manager else {
        return "reconfigure: no config manager configured".to_owned();
    };

    // Command shape: `reconfigure [persist] <json>`.
    let rest = command
        .split_once(char::is_whitespace)
        .map(|(_, rest)| rest.trim())
        .unwrap_or_default();
    let (persist, payload) = match strip_keyword(rest, "persist") {
        Some(stripped) => (true, stripped),
        None => (false, rest),
    };

    if payload.is_empty() {
        return "reconfigure: no-op (no payload)".to_owned();
    }
    let Ok(data) = serde_json::from_str::<Value>(payload) else {
        return "reconfigure: invalid JSON".to_owned();
    };

    match manager.update(data) {
        Ok(()) => {
            if persist
                && let Err(error) = manager.save()
            {
                return format!("reconfigure: error - {error}");
            }
            info!(target: SERVICE_TARGET, persist, "reconfigured");
            "reconfigure: ok".to_owned()
        }
        Err(error) => format!("reconfigure: error - {error}"),
    }
}

fn strip_keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let mut parts = text.splitn(2, char::is_whitespace);
    match parts.next() {
        Some(token) if token.eq_ignore_ascii_case(keyword) => {
            Some(parts.next().unwrap_or_default().trim_start())
        }
        _ => None,
    }
}

/// Errors raised while assembling a service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Telemetry could not be initialised.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    /// The command channel could not be bound.
    #[error("failed to start manager: {source}")]
    Manager {
        #[source]
        source: SocketError,
    },
    /// The engine could not be constructed.
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// The config manager could not load its document.
    #[error(transparent)]
    Config(#[from] ConfigManagerError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_keyword_matches_case_insensitively() {
        assert_eq!(strip_keyword("persist {\"a\":1}", "persist"), Some("{\"a\":1}"));
        assert_eq!(strip_keyword("PERSIST {}", "persist"), Some("{}"));
        assert_eq!(strip_keyword("persist", "persist"), Some(""));
        assert_eq!(strip_keyword("{\"a\":1}", "persist"), None);
    }

    #[test]
    fn reconfigure_without_manager_reports_it() {
        assert_eq!(
            handle_reconfigure(None, "reconfigure {\"a\":1}"),
            "reconfigure: no config manager configured"
        );
    }
}
