//! `fleetmon` CLI - fleet telemetry poller for rented GPU instances
//!
//! Provides commands for running one poll cycle, watching the fleet
//! continuously, and listing the current directory snapshot.

mod cli;
mod commands;
mod error;
mod format;

use clap::Parser;
use cli::Cli;

fn main() {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    if !cli.quiet {
        fleetmon_core::trace::init_tracing(cli.verbose, !cli.no_color);
    }

    let result = commands::dispatch(config_path, cli.command);

    if let Err(e) = result {
        if !cli.quiet {
            eprintln!("Error: {e}");
        }
        std::process::exit(e.exit_code());
    }
}
