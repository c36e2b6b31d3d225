//! Default values shared by the settings model and its loader.

use camino::Utf8PathBuf;

use crate::address::Address;

/// Prefix for environment-variable overrides (`DETECTMATE_LOG_LEVEL` etc.).
pub const ENV_PREFIX: &str = "DETECTMATE_";

/// Component type assigned when none is configured.
pub const DEFAULT_COMPONENT_TYPE: &str = "core";

/// Directory for per-component log files.
pub const DEFAULT_LOG_DIR: &str = "./logs";

/// Default log level expression.
pub const DEFAULT_LOG_LEVEL: &str = "INFO";

/// Receive timeout for the command channel, in milliseconds.
pub const DEFAULT_MANAGER_RECV_TIMEOUT_MS: u64 = 100;

/// Join budget for the manager worker, in seconds.
pub const DEFAULT_MANAGER_JOIN_TIMEOUT_SECS: f64 = 1.0;

/// Receive timeout for the engine input channel, in milliseconds.
pub const DEFAULT_ENGINE_RECV_TIMEOUT_MS: u64 = 100;

/// Dial budget for each output peer, in milliseconds.
pub const DEFAULT_OUT_DIAL_TIMEOUT_MS: u64 = 1000;

/// Send-buffer size per output socket, in bytes.
pub const DEFAULT_OUT_BUFFER_SIZE: usize = 8192;

/// Default command-channel endpoint.
#[must_use]
pub fn default_manager_addr() -> Address {
    Address::Ipc {
        path: Utf8PathBuf::from("/tmp/detectmate.cmd.ipc"),
    }
}

/// Default engine input endpoint.
#[must_use]
pub fn default_engine_addr() -> Address {
    Address::Ipc {
        path: Utf8PathBuf::from("/tmp/detectmate.engine.ipc"),
    }
}

/// Default log directory.
#[must_use]
pub fn default_log_dir() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_LOG_DIR)
}
