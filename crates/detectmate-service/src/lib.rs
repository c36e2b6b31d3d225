//! Runtime for long-lived DetectMate pipeline service components.
//!
//! A [`Service`] composes two background workers under one identity: the
//! [`Engine`] drives the receive → process → fan-out loop over message
//! sockets, and the [`Manager`] serves the out-of-band command channel
//! (`ping`, `start`, `stop`, `status`, `reconfigure`). Runtime parameters
//! live in a [`ConfigManager`] backed by a YAML file, and the message
//! transform is injected as a [`Processor`].
//!
//! Transports are abstracted behind socket factories so the core never
//! references a concrete transport outside the factory implementations.

mod config_manager;
mod engine;
mod lifecycle;
mod manager;
mod processor;
mod service;
pub mod telemetry;
pub mod transport;

pub use config_manager::{ConfigManager, ConfigManagerError, ConfigSchema, ConfigValidationError};
pub use engine::{Engine, EngineError};
pub use lifecycle::LifecycleLatch;
pub use manager::{CommandError, CommandHandler, CommandRegistry, Manager};
pub use processor::{PassthroughProcessor, Processor, ProcessorError};
pub use service::{Service, ServiceError, ServiceOptions};
