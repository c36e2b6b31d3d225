//! Command-line argument definitions.

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

/// Command-line interface for DetectMate pipeline services.
#[derive(Parser, Debug)]
#[command(name = "detectmate", about = "Control DetectMate pipeline services")]
pub(crate) struct Cli {
    /// The lifecycle command to run.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Lifecycle subcommands.
#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Runs a service in the foreground until stopped.
    Start {
        /// Service settings YAML file.
        #[arg(long)]
        settings: Option<Utf8PathBuf>,
        /// Runtime parameters YAML file backing the config manager.
        #[arg(long)]
        config: Option<Utf8PathBuf>,
    },
    /// Stops a running service.
    Stop {
        /// Service settings YAML file (for the manager address).
        #[arg(long)]
        settings: Utf8PathBuf,
    },
    /// Prints the status report of a running service.
    Status {
        /// Service settings YAML file (for the manager address).
        #[arg(long)]
        settings: Utf8PathBuf,
    },
    /// Pushes new runtime parameters to a running service.
    Reconfigure {
        /// Service settings YAML file (for the manager address).
        #[arg(long)]
        settings: Utf8PathBuf,
        /// New parameters as a YAML file.
        #[arg(long)]
        config: Utf8PathBuf,
        /// Also persist the parameters to the service's parameter file.
        #[arg(long)]
        persist: bool,
    },
}
