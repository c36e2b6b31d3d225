//! CLI entrypoint for DetectMate service control.
//!
//! The binary delegates to [`detectmate_cli::run`], which parses the
//! subcommand, loads settings, and either hosts a service (`start`) or talks
//! to a running one over its command channel.

use std::process::ExitCode;

fn main() -> ExitCode {
    detectmate_cli::run(std::env::args_os())
}
