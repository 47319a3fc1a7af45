//! Command handler modules for the CLI.

mod instances;
mod poll;
mod watch;

use std::path::Path;

use fleetmon_core::config::FleetConfig;
use fleetmon_core::parser::LogLineParser;
use fleetmon_core::poller::{FleetPoller, SshProbe};
use fleetmon_core::InstanceDirectory;

use crate::cli::Commands;
use crate::error::CliError;

/// Dispatch a CLI command to the appropriate handler.
pub fn dispatch(config_path: Option<&Path>, command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Poll { format } => poll::cmd_poll(config_path, format),
        Commands::Watch { cycles } => watch::cmd_watch(config_path, cycles),
        Commands::Instances { format } => instances::cmd_instances(config_path, format),
    }
}

/// Builds the tokio runtime the async commands run on
fn runtime() -> Result<tokio::runtime::Runtime, CliError> {
    tokio::runtime::Runtime::new().map_err(CliError::Io)
}

/// Loads the configuration from the given or default path
fn load_config(config_path: Option<&Path>) -> Result<FleetConfig, CliError> {
    Ok(FleetConfig::load(config_path)?)
}

/// Builds the directory client from the loaded config
fn build_directory(config: &FleetConfig) -> Result<InstanceDirectory, CliError> {
    let directory_config = config.directory_config()?;
    Ok(InstanceDirectory::new(directory_config)?)
}

/// Builds the production poller (SSH probe + configured parser and limits)
fn build_poller(config: &FleetConfig) -> FleetPoller<SshProbe> {
    let probe = SshProbe {
        credential: config.credential.to_credential(),
        limits: config.session_limits(),
        worker_log_path: config.worker_log_path.clone(),
        max_output_bytes: config.max_output_bytes,
    };
    FleetPoller::new(probe, LogLineParser::new(config.grammar), config.poll_limits())
}
