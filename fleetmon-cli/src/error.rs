//! CLI error types and exit codes.

/// Exit codes for CLI operations
pub mod exit_codes {
    /// General error - configuration, validation, or other local errors
    pub const GENERAL_ERROR: i32 = 1;
    /// Directory failure - the provider directory could not be queried
    pub const DIRECTORY_FAILURE: i32 = 2;
}

/// CLI error type
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Directory query failed
    #[error("Directory error: {0}")]
    Directory(String),

    /// Serialization error
    #[error("Output error: {0}")]
    Output(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<fleetmon_core::ConfigError> for CliError {
    fn from(err: fleetmon_core::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<fleetmon_core::DirectoryError> for CliError {
    fn from(err: fleetmon_core::DirectoryError) -> Self {
        Self::Directory(err.to_string())
    }
}

impl CliError {
    /// The process exit code for this error
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Directory(_) => exit_codes::DIRECTORY_FAILURE,
            Self::Config(_) | Self::Output(_) | Self::Io(_) => exit_codes::GENERAL_ERROR,
        }
    }
}
