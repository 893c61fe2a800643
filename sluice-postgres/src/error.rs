//! Error types for PostgreSQL operations.

use sluice_migrate::MigrateError;
use thiserror::Error;

/// Result type for PostgreSQL operations.
pub type PgResult<T> = Result<T, PgError>;

/// Errors that can occur during PostgreSQL operations.
#[derive(Error, Debug)]
pub enum PgError {
    /// PostgreSQL error.
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// Column type the engine cannot read.
    #[error("type conversion error: {0}")]
    TypeConversion(String),
}

impl PgError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a type conversion error.
    pub fn type_conversion(message: impl Into<String>) -> Self {
        Self::TypeConversion(message.into())
    }

    /// Check if this is a connection error.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            Self::Postgres(e) => e.is_closed(),
            _ => false,
        }
    }
}

impl From<PgError> for MigrateError {
    fn from(err: PgError) -> Self {
        match err {
            PgError::Config(msg) => MigrateError::config(msg),
            // Server errors carry the useful part in the db error body
            PgError::Postgres(e) => match e.as_db_error() {
                Some(db) => {
                    MigrateError::database(format!("{}: {}", db.code().code(), db.message()))
                }
                None => MigrateError::database(e.to_string()),
            },
            other => MigrateError::database(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PgError::config("missing host");
        assert_eq!(err.to_string(), "configuration error: missing host");
    }

    #[test]
    fn test_into_migrate_error() {
        let err: MigrateError = PgError::config("bad url").into();
        assert_eq!(err.kind(), "config");

        let err: MigrateError = PgError::type_conversion("numeric").into();
        assert_eq!(err.kind(), "database");
    }

    #[test]
    fn test_is_connection_error() {
        assert!(PgError::connection("refused").is_connection_error());
        assert!(!PgError::config("x").is_connection_error());
    }
}
