//! CLI argument parsing types using `clap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// `fleetmon` command-line interface for polling a rented GPU fleet
#[derive(Parser)]
#[command(name = "fleetmon")]
#[command(author, version, about = "Fleet telemetry poller for rented GPU instances")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, env = "FLEETMON_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase output verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run one poll cycle and print the fleet report
    #[command(about = "Poll every active instance once and print the report")]
    Poll {
        /// Output format for the report
        #[arg(short, long, default_value = "table", value_enum)]
        format: OutputFormat,
    },

    /// Poll the fleet continuously until interrupted
    #[command(about = "Poll on the configured interval, printing each cycle's report")]
    Watch {
        /// Stop after this many completed cycles (default: run until Ctrl-C)
        #[arg(long)]
        cycles: Option<u64>,
    },

    /// List the current directory snapshot without polling
    #[command(about = "Query the provider directory and list active instances")]
    Instances {
        /// Output format for the instance list
        #[arg(short, long, default_value = "table", value_enum)]
        format: OutputFormat,
    },
}

/// Output formats for reports and listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Aligned text table
    Table,
    /// JSON document
    Json,
}
