//! Logging setup for the `sluice` binary.
//!
//! # Environment Variables
//!
//! - `SLUICE_LOG` - `EnvFilter` directives, e.g. `info` or `sluice_migrate=debug` (default: `warn`)
//! - `SLUICE_LOG_FORMAT=pretty|compact|json` - output format (default: compact)
//!
//! Logs go to stderr so `--format json` output on stdout stays parseable.

use std::env;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Filter directives.
pub const LOG_ENV: &str = "SLUICE_LOG";

/// Output format.
pub const LOG_FORMAT_ENV: &str = "SLUICE_LOG_FORMAT";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "pretty" => Self::Pretty,
            "json" => Self::Json,
            _ => Self::Compact,
        }
    }
}

/// Get the configured log format from `SLUICE_LOG_FORMAT`.
pub fn log_format() -> LogFormat {
    env::var(LOG_FORMAT_ENV)
        .map(|f| LogFormat::parse(&f))
        .unwrap_or(LogFormat::Compact)
}

/// Install the global subscriber. Call once at startup.
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry().with(filter);

    let result = match log_format() {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .try_init(),
    };

    if result.is_ok() {
        tracing::debug!(format = ?log_format(), "Logging initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_format() {
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("compact"), LogFormat::Compact);
        assert_eq!(LogFormat::parse("fancy"), LogFormat::Compact);
    }
}
