//! CLI runtime for DetectMate service control.
//!
//! Subcommands: `start` hosts a generic core service in the foreground;
//! `stop`, `status`, and `reconfigure` talk to a running service over its
//! command channel. Command replies go to stdout; errors go to stderr with
//! exit code 1.

use std::ffi::OsString;
use std::process::ExitCode;

mod cli;
mod client;
mod commands;
mod errors;

use cli::{Cli, Command};
use clap::Parser;
use errors::AppError;

/// Parses arguments and runs the selected subcommand.
pub fn run(args: impl IntoIterator<Item = OsString>) -> ExitCode {
    let cli = Cli::parse_from(args);
    match execute(&cli.command) {
        Ok(Some(reply)) => {
            println!("{reply}");
            ExitCode::SUCCESS
        }
        Ok(None) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

fn execute(command: &Command) -> Result<Option<String>, AppError> {
    match command {
        Command::Start { settings, config } => {
            commands::start(settings.as_deref(), config.as_deref())?;
            Ok(None)
        }
        Command::Stop { settings } => commands::stop(settings).map(Some),
        Command::Status { settings } => commands::status(settings).map(Some),
        Command::Reconfigure {
            settings,
            config,
            persist,
        } => commands::reconfigure(settings, config, *persist).map(Some),
    }
}
