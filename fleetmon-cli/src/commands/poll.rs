//! One-shot poll command.

use std::path::Path;

use fleetmon_core::report::build_report;

use crate::cli::OutputFormat;
use crate::error::CliError;
use crate::format::format_report_table;

/// Runs one full poll cycle and prints the report
pub fn cmd_poll(config_path: Option<&Path>, format: OutputFormat) -> Result<(), CliError> {
    let config = super::load_config(config_path)?;
    let directory = super::build_directory(&config)?;
    let poller = super::build_poller(&config);

    let report = super::runtime()?.block_on(async {
        let snapshot = directory.fetch().await?;
        tracing::info!(instances = snapshot.len(), "Polling fleet");
        let results = poller.poll(&snapshot).await;
        Ok::<_, CliError>(build_report(&results, &snapshot))
    })?;

    match format {
        OutputFormat::Table => println!("{}", format_report_table(&report)),
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&report)
                .map_err(|e| CliError::Output(e.to_string()))?;
            println!("{json}");
        }
    }

    Ok(())
}
