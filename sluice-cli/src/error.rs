//! CLI error types and result alias.

use miette::Diagnostic;
use sluice_migrate::MigrateError;
use thiserror::Error;

/// Result type alias for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// CLI error types
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// IO error
    #[error("IO error: {0}")]
    #[diagnostic(code(sluice::io))]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    #[diagnostic(code(sluice::config))]
    Config(String),

    /// Error raised by the engine
    #[error("{0}")]
    #[diagnostic(code(sluice::engine))]
    Engine(#[from] MigrateError),

    /// A batch finished with failed files
    #[error("{0}")]
    #[diagnostic(code(sluice::batch_failed))]
    BatchFailed(String),

    /// Stopped by Ctrl-C
    #[error("Interrupted")]
    #[diagnostic(code(sluice::interrupted))]
    Interrupted,
}

impl CliError {
    /// Stable identifier, the engine's own kind for engine errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Config(_) => "config",
            Self::Engine(e) => e.kind(),
            Self::BatchFailed(_) => "batch_failed",
            Self::Interrupted => "interrupted",
        }
    }

    /// Process exit code.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::BatchFailed(_) => 2,
            Self::Interrupted => 130,
            _ => 1,
        }
    }

    /// `{"error": {"kind", "message"}}`
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "kind": self.kind(),
                "message": self.to_string(),
            }
        })
    }
}

impl From<toml::de::Error> for CliError {
    fn from(err: toml::de::Error) -> Self {
        CliError::Config(format!("Failed to parse TOML: {}", err))
    }
}

impl From<toml::ser::Error> for CliError {
    fn from(err: toml::ser::Error) -> Self {
        CliError::Config(format!("Failed to serialize TOML: {}", err))
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        CliError::Io(std::io::Error::other(err))
    }
}
