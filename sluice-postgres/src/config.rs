//! PostgreSQL connection configuration.

use std::time::Duration;

use crate::error::{PgError, PgResult};

/// Default `application_name`, shown in `pg_stat_activity`.
pub const DEFAULT_APPLICATION_NAME: &str = "sluice";

/// PostgreSQL connection configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgConfig {
    /// Host (default: localhost).
    pub host: String,
    /// Port (default: 5432).
    pub port: u16,
    /// Database name.
    pub database: String,
    /// Username (default: postgres).
    pub user: String,
    /// Password.
    pub password: Option<String>,
    /// SSL mode.
    pub ssl_mode: SslMode,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Server-side `statement_timeout` for the session.
    pub statement_timeout: Option<Duration>,
    /// Application name.
    pub application_name: String,
}

/// SSL mode for connections.
///
/// Connections are opened without TLS, so `require` is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    Disable,
    #[default]
    Prefer,
}

impl PgConfig {
    /// Parse a `postgres://` or `postgresql://` URL.
    ///
    /// Recognized query parameters: `sslmode`, `connect_timeout` (seconds),
    /// `statement_timeout` (milliseconds) and `application_name`.
    pub fn from_url(url: &str) -> PgResult<Self> {
        let parsed = url::Url::parse(url)
            .map_err(|e| PgError::config(format!("invalid database URL: {}", e)))?;

        if parsed.scheme() != "postgresql" && parsed.scheme() != "postgres" {
            return Err(PgError::config(format!(
                "invalid scheme: expected 'postgresql' or 'postgres', got '{}'",
                parsed.scheme()
            )));
        }

        let database = parsed.path().trim_start_matches('/').to_string();
        if database.is_empty() {
            return Err(PgError::config("missing database name in URL"));
        }

        let mut config = Self {
            host: parsed.host_str().unwrap_or("localhost").to_string(),
            port: parsed.port().unwrap_or(5432),
            database,
            user: match parsed.username() {
                "" => "postgres".to_string(),
                user => user.to_string(),
            },
            password: parsed.password().map(String::from),
            ssl_mode: SslMode::default(),
            connect_timeout: Duration::from_secs(30),
            statement_timeout: None,
            application_name: DEFAULT_APPLICATION_NAME.to_string(),
        };

        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "sslmode" => {
                    config.ssl_mode = match value.as_ref() {
                        "disable" => SslMode::Disable,
                        "prefer" | "allow" => SslMode::Prefer,
                        other => {
                            return Err(PgError::config(format!(
                                "unsupported sslmode '{}': TLS connections are not available",
                                other
                            )));
                        }
                    };
                }
                "connect_timeout" => {
                    let secs: u64 = value
                        .parse()
                        .map_err(|_| PgError::config("invalid connect_timeout"))?;
                    config.connect_timeout = Duration::from_secs(secs);
                }
                "statement_timeout" => {
                    let ms: u64 = value
                        .parse()
                        .map_err(|_| PgError::config("invalid statement_timeout"))?;
                    config.statement_timeout = Some(Duration::from_millis(ms));
                }
                "application_name" => config.application_name = value.into_owned(),
                _ => {}
            }
        }

        Ok(config)
    }

    /// The connection target with the password masked, for logs and errors.
    pub fn redacted(&self) -> String {
        let auth = match self.password {
            Some(_) => format!("{}:***", self.user),
            None => self.user.clone(),
        };
        format!(
            "postgresql://{}@{}:{}/{}",
            auth, self.host, self.port, self.database
        )
    }

    /// Set the statement timeout.
    pub fn statement_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.statement_timeout = timeout;
        self
    }

    /// Convert to a tokio-postgres config.
    pub fn to_pg_config(&self) -> tokio_postgres::Config {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .dbname(&self.database)
            .user(&self.user)
            .application_name(&self.application_name)
            .connect_timeout(self.connect_timeout);

        if let Some(ref password) = self.password {
            config.password(password);
        }

        if let Some(timeout) = self.statement_timeout {
            config.options(format!("-c statement_timeout={}", timeout.as_millis()));
        }

        config
    }
}
