//! CLI error type.

use std::fmt;

use spectile::logging::LoggingError;
use spectile::RunError;

/// Errors reported by CLI commands.
#[derive(Debug)]
pub enum CliError {
    /// Invalid or incomplete command-line configuration.
    Config(String),

    /// The run stopped with an error.
    Run(RunError),

    /// The run ended with cells still unfinished.
    Unfinished(usize),

    /// Reading the status file failed.
    Status(String),

    /// Logging could not be initialized.
    Logging(LoggingError),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Unfinished(_) => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "{}", msg),
            CliError::Run(e) => write!(f, "{}", e),
            CliError::Unfinished(1) => write!(
                f,
                "1 tile is corrupt or incomplete; re-run with the same parameters"
            ),
            CliError::Unfinished(n) => write!(
                f,
                "{} tiles are corrupt or incomplete; re-run with the same parameters",
                n
            ),
            CliError::Status(msg) => write!(f, "cannot read status: {}", msg),
            CliError::Logging(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CliError {}

impl From<RunError> for CliError {
    fn from(e: RunError) -> Self {
        CliError::Run(e)
    }
}

impl From<LoggingError> for CliError {
    fn from(e: LoggingError) -> Self {
        CliError::Logging(e)
    }
}
