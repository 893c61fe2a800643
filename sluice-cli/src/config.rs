//! CLI configuration handling.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use sluice_migrate::{EngineConfig, Rules};

use crate::error::{CliError, CliResult};

/// Default config file name (lives in project root)
pub const CONFIG_FILE_NAME: &str = "sluice.toml";

/// Overrides `database.url`.
pub const DATABASE_URL_ENV: &str = "SLUICE_DATABASE_URL";

/// Default schema directory (relative to project root)
pub const SCHEMA_DIR: &str = "schema";

/// Default changesets directory (relative to project root)
pub const CHANGESETS_DIR: &str = "changesets";

/// Sluice CLI configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,

    /// File discovery and output paths
    pub paths: PathsConfig,

    /// Lock settings
    pub lock: LockConfig,

    /// Execution settings
    pub run: RunConfig,

    /// Identity settings
    pub identity: IdentityConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> CliResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Create a default config for a specific provider
    pub fn default_for_provider(provider: &str) -> Self {
        let mut config = Self::default();
        config.database.provider = provider.to_string();
        config
    }

    /// The database URL, with `SLUICE_DATABASE_URL` taking precedence.
    pub fn database_url(&self) -> CliResult<String> {
        std::env::var(DATABASE_URL_ENV)
            .ok()
            .filter(|url| !url.is_empty())
            .or_else(|| self.database.url.clone())
            .ok_or_else(|| {
                CliError::Config(format!(
                    "no database URL: set [database] url in {} or {}",
                    CONFIG_FILE_NAME, DATABASE_URL_ENV
                ))
            })
    }

    /// Discovery rules from `[paths]`.
    pub fn rules(&self) -> Rules {
        Rules {
            include: self.paths.include.clone(),
            exclude: self.paths.exclude.clone(),
        }
    }

    /// Engine settings for a project rooted at `project_root`.
    pub fn engine_config(&self, project_root: &Path) -> EngineConfig {
        EngineConfig::new()
            .project_root(project_root)
            .changesets_dir(&self.paths.changesets)
            .output_dir(&self.paths.output)
            .lock_ttl(Duration::from_secs(self.lock.ttl_secs))
            .statement_timeout(match self.run.statement_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            })
            .strict(self.run.strict)
            .abort_on_error(self.run.abort_on_error)
    }
}

/// Database configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database provider (sqlite, postgresql, mysql, mssql)
    pub provider: String,

    /// Database connection URL
    pub url: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            provider: "sqlite".to_string(),
            url: None,
        }
    }
}

/// Path configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Files or directories to run, relative to the project root
    pub include: Vec<PathBuf>,

    /// Regex patterns of relative paths to skip
    pub exclude: Vec<String>,

    /// Changeset folders
    pub changesets: PathBuf,

    /// Dry-run output
    pub output: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            include: vec![PathBuf::from(SCHEMA_DIR)],
            exclude: Vec::new(),
            changesets: PathBuf::from(CHANGESETS_DIR),
            output: PathBuf::from(sluice_migrate::runner::DEFAULT_OUTPUT_DIR),
        }
    }
}

/// Lock configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Lease length in seconds
    pub ttl_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_secs: sluice_migrate::engine::DEFAULT_LOCK_TTL.as_secs(),
        }
    }
}

/// Execution configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Fail drifted files instead of re-running them
    pub strict: bool,

    /// Stop a batch at the first failed file
    pub abort_on_error: bool,

    /// Per-statement timeout in seconds, 0 to disable
    pub statement_timeout_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            strict: false,
            abort_on_error: true,
            statement_timeout_secs: sluice_migrate::engine::DEFAULT_STATEMENT_TIMEOUT.as_secs(),
        }
    }
}

/// Identity configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Fixed actor name
    pub actor: Option<String>,
}
