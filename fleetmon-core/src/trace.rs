//! Tracing integration for structured logging
//!
//! Every poll attempt leaves a structured diagnostic trail (instance id,
//! error kind, raw log line) through the `tracing` macros; this module only
//! wires up the subscriber. `RUST_LOG` overrides the verbosity-derived
//! default filter.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initializes the global tracing subscriber.
///
/// `verbosity` maps to the default level: 0 → warn, 1 → info, 2 → debug,
/// 3+ → trace. `ansi` disables color codes when false (the `NO_COLOR`
/// convention). Safe to call more than once; later calls are no-ops.
pub fn init_tracing(verbosity: u8, ansi: bool) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("fleetmon_core={default_level},fleetmon_cli={default_level}")));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(ansi)
                .with_writer(std::io::stderr),
        )
        .try_init();
}
