//! Data models for fleet polling
//!
//! All types are transport-free and serializable so reports can be rendered
//! as tables or exported as JSON. Descriptors and results are created fresh
//! each poll cycle and discarded at cycle end; nothing here carries
//! cross-cycle state.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One active rented instance as advertised by the provider directory
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceDescriptor {
    /// Provider-assigned unique instance id
    pub id: u64,
    /// GPU model name, `"unknown"` when the directory omits it
    pub gpu_name: String,
    /// Rental price in dollars per hour; `None` means unknown, never zero
    pub price_per_hour: Option<f64>,
    /// SSH host advertised by the provider
    pub host: String,
    /// SSH port advertised by the provider
    pub port: u16,
}

/// Progress metrics extracted from one worker log line
///
/// Both numeric fields are always present together; a line that yields only
/// one of them is a parse failure, never a partial `Metrics`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    /// Worker runtime in fractional hours (`H + M/60 + S/3600`)
    pub elapsed_hours: f64,
    /// Cumulative completed-block count at poll time
    pub block_count: u64,
    /// The log line the metrics were extracted from, kept for diagnostics
    pub raw_line: String,
}

/// Outcome of polling a single instance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PollStatus {
    /// The log line was fetched and parsed
    Success(Metrics),
    /// The instance could not be reached, authenticated, or executed on
    ConnectionFailure(String),
    /// The log line was fetched but did not match the grammar
    ParseFailure(String),
}

/// One instance's result for one poll cycle
///
/// Exactly one is produced per instance per cycle, regardless of outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollResult {
    /// The polled instance's id
    pub instance_id: u64,
    /// What happened
    pub status: PollStatus,
    /// When the result was recorded
    pub timestamp: DateTime<Utc>,
}

impl PollResult {
    /// Creates a result stamped with the current time
    #[must_use]
    pub fn new(instance_id: u64, status: PollStatus) -> Self {
        Self {
            instance_id,
            status,
            timestamp: Utc::now(),
        }
    }
}

/// One row of the aggregated fleet report
///
/// Metric fields are `None` for instances whose poll failed; rate fields are
/// total functions of the inputs (0 on degenerate denominators), so a `Some`
/// row never carries a poisoned value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    /// Instance id
    pub instance_id: u64,
    /// GPU model name from the directory snapshot
    pub gpu_name: String,
    /// Rental price in dollars per hour, if known
    pub price_per_hour: Option<f64>,
    /// Worker runtime in hours
    pub elapsed_hours: Option<f64>,
    /// Blocks completed per hour of runtime
    pub blocks_per_hour: Option<f64>,
    /// Blocks completed per dollar spent
    pub blocks_per_dollar: Option<f64>,
}

/// Aggregated report for one poll cycle, ordered by instance id
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    /// One row per instance in the directory snapshot
    pub rows: Vec<ReportRow>,
    /// When the report was built
    pub generated_at: DateTime<Utc>,
}

impl Report {
    /// Returns the number of rows whose poll succeeded
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.rows
            .iter()
            .filter(|r| r.elapsed_hours.is_some())
            .count()
    }
}
