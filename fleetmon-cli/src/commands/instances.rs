//! Directory snapshot command.

use std::path::Path;

use crate::cli::OutputFormat;
use crate::error::CliError;
use crate::format::format_instances_table;

/// Fetches the current instance directory and prints it
pub fn cmd_instances(config_path: Option<&Path>, format: OutputFormat) -> Result<(), CliError> {
    let config = super::load_config(config_path)?;
    let directory = super::build_directory(&config)?;

    let snapshot = super::runtime()?.block_on(async { directory.fetch().await })?;

    match format {
        OutputFormat::Table => println!("{}", format_instances_table(&snapshot)),
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&snapshot)
                .map_err(|e| CliError::Output(e.to_string()))?;
            println!("{json}");
        }
    }

    Ok(())
}
