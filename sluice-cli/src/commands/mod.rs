//! CLI command implementations.

pub mod bootstrap;
pub mod changeset;
pub mod history;
pub mod init;
pub mod lock;
pub mod run;
pub mod version;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sluice_migrate::{BatchStatus, Connection, Dialect, Engine, MigrateResult, RunOptions};
use tracing::{debug, warn};

use crate::cli::{Cli, ExecArgs, OutputFormat};
use crate::config::Config;
use crate::error::{CliError, CliResult};
use crate::identity;

/// Everything a command needs from the global flags and the config file.
#[derive(Debug, Clone)]
pub struct Context {
    pub config: Config,
    pub project_root: PathBuf,
    pub actor: String,
    pub format: OutputFormat,
}

impl Context {
    /// Load the config named by `--config`; a missing file means defaults.
    pub fn load(cli: &Cli) -> CliResult<Self> {
        let config = if cli.config.exists() {
            Config::load(&cli.config)?
        } else {
            debug!(path = %cli.config.display(), "No config file, using defaults");
            Config::default()
        };

        let project_root = match cli.config.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let actor = identity::resolve(cli.actor.as_deref(), &config);

        Ok(Self {
            config,
            project_root,
            actor,
            format: cli.format,
        })
    }

    /// Whether results should be printed as JSON.
    pub fn json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Connect to the configured database and build an engine over it.
    pub async fn engine(&self) -> CliResult<Engine> {
        let conn = connect(&self.config, &self.project_root).await?;
        Ok(Engine::new(
            conn,
            self.config.engine_config(&self.project_root),
        ))
    }

    /// Run options from the config with per-command flags on top.
    pub fn run_options(&self, engine: &Engine, exec: &ExecArgs) -> RunOptions {
        let base = engine.run_options();
        let strict = base.strict || exec.strict;
        let abort_on_error = base.abort_on_error && !exec.continue_on_error;
        base.strict(strict)
            .abort_on_error(abort_on_error)
            .dry_run(exec.dry_run)
    }
}

/// Open a connection for the configured provider.
pub async fn connect(config: &Config, project_root: &Path) -> CliResult<Arc<dyn Connection>> {
    let url = config.database_url()?;
    let dialect: Dialect = config.database.provider.parse()?;
    debug!(dialect = %dialect, "Connecting");

    match dialect {
        #[cfg(feature = "sqlite")]
        Dialect::Sqlite => {
            let mut sqlite = sluice_sqlite::SqliteConfig::from_url(&url)
                .map_err(sluice_migrate::MigrateError::from)?;
            // Relative database files live next to the config file
            let relative = match &sqlite.path {
                sluice_sqlite::DatabasePath::File(path) if path.is_relative() => {
                    Some(project_root.join(path))
                }
                _ => None,
            };
            if let Some(path) = relative {
                sqlite.path = sluice_sqlite::DatabasePath::File(path);
            }
            let conn: Arc<dyn Connection> = Arc::new(
                sluice_sqlite::SqliteConnection::open(sqlite)
                    .await
                    .map_err(sluice_migrate::MigrateError::from)?,
            );
            Ok(conn)
        }
        #[cfg(feature = "postgres")]
        Dialect::Postgres => {
            let conn: Arc<dyn Connection> = Arc::new(
                sluice_postgres::PgConnection::connect(&url)
                    .await
                    .map_err(sluice_migrate::MigrateError::from)?,
            );
            Ok(conn)
        }
        other => Err(CliError::Config(format!(
            "no bundled driver for provider '{}'",
            other
        ))),
    }
}

/// Drive a mutating engine call until it finishes or the user presses Ctrl-C.
///
/// On interrupt the call is dropped and the lock it took is released before
/// returning [`CliError::Interrupted`].
pub async fn until_interrupted<T, F>(engine: &Engine, work: F) -> CliResult<T>
where
    F: Future<Output = MigrateResult<T>>,
{
    tokio::select! {
        result = work => Ok(result?),
        Ok(()) = tokio::signal::ctrl_c() => {
            match engine.release_interrupted().await {
                Ok(true) => warn!("Interrupted, lock released"),
                Ok(false) => warn!("Interrupted"),
                Err(e) => warn!(error = %e, "Interrupted, lock left to expire"),
            }
            Err(CliError::Interrupted)
        }
    }
}

/// Turn a finished batch into the process outcome: partial or failed exits with 2.
pub fn batch_outcome(status: BatchStatus, summary: String) -> CliResult<()> {
    match status {
        BatchStatus::Success => Ok(()),
        BatchStatus::Partial | BatchStatus::Failed => Err(CliError::BatchFailed(format!(
            "batch finished {}: {}",
            status, summary
        ))),
    }
}
