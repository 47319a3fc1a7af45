//! `fleetmon` Core Library
//!
//! This crate provides the core functionality for the fleetmon GPU fleet
//! telemetry poller: instance discovery, remote sessions, log-line parsing,
//! concurrent polling, and report aggregation.
//!
//! # Crate Structure
//!
//! - [`models`] - Core data structures (`InstanceDescriptor`, `Metrics`, `PollResult`, `Report`)
//! - [`config`] - Poller configuration loaded from TOML
//! - [`directory`] - Rental provider directory client (HTTP + JSON)
//! - [`session`] - One-shot SSH sessions with scoped connection lifetime
//! - [`parser`] - Worker log-line parser (ANSI stripping + versioned grammar)
//! - [`poller`] - Bounded concurrent fan-out across the fleet
//! - [`report`] - Per-instance report aggregation with derived rates
//! - [`trace`] - Tracing subscriber setup

// Enable missing_docs warning for public API documentation
#![warn(missing_docs)]

pub mod config;
pub mod directory;
pub mod models;
pub mod parser;
pub mod poller;
pub mod report;
pub mod session;
pub mod trace;

pub use config::{ApiKeySource, ConfigError, CredentialConfig, FleetConfig};
pub use directory::{DirectoryConfig, DirectoryError, InstanceDirectory};
pub use models::{InstanceDescriptor, Metrics, PollResult, PollStatus, Report, ReportRow};
pub use parser::{CounterLabel, LineGrammar, LogLineParser, ParseError, ParsedLine};
pub use poller::{
    FleetPoller, InstanceProbe, PollCancellation, PollLimits, PollerEvent, PollerHandle, SshProbe,
    start_poller,
};
pub use report::build_report;
pub use session::{ConnectError, ExecError, RemoteSession, SessionLimits, SshCredential};
