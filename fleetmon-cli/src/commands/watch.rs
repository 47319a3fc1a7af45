//! Continuous polling command.

use std::path::Path;

use fleetmon_core::PollerEvent;

use crate::error::CliError;
use crate::format::{format_cycle_summary, format_report_table};

/// Polls on the configured interval, printing each cycle's report, until
/// Ctrl-C or the optional cycle limit is reached
pub fn cmd_watch(config_path: Option<&Path>, cycles: Option<u64>) -> Result<(), CliError> {
    let config = super::load_config(config_path)?;
    let directory = super::build_directory(&config)?;
    let poller = super::build_poller(&config);
    let interval = config.poll_interval();

    super::runtime()?.block_on(async move {
        let (handle, mut events) = fleetmon_core::start_poller(interval, directory, poller);
        let mut completed: u64 = 0;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupt received, stopping");
                    handle.stop().await;
                }
                event = events.recv() => match event {
                    Some(PollerEvent::CycleComplete(report)) => {
                        println!("{}", format_report_table(&report));
                        println!("{}", format_cycle_summary(&report));
                        completed += 1;
                        if cycles.is_some_and(|limit| completed >= limit) {
                            handle.stop().await;
                        }
                    }
                    Some(PollerEvent::DirectoryError(reason)) => {
                        eprintln!("directory query failed, cycle skipped: {reason}");
                    }
                    Some(PollerEvent::Stopped) | None => break,
                },
            }
        }

        Ok(())
    })
}
