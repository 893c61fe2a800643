//! Locked engine facade.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::changeset::{BatchChangeResult, ChangeResult, ChangesetEngine, ChangesetStatus};
use crate::connection::Connection;
use crate::discover::{Candidate, Rules, discover};
use crate::error::{MigrateError, MigrateResult};
use crate::events::{EventSink, TracingSink};
use crate::history::{
    FileExecutionRecord, HistoryStore, OperationSummary, SqlHistoryStore, compare_versions,
};
use crate::lock::{Lock, LockGrant, LockManager, LockStatus};
use crate::render::{PlainRenderer, RenderContext, Renderer};
use crate::runner::{BatchResult, DEFAULT_OUTPUT_DIR, FileRunner, RunOptions};

/// Version written to the tracking tables by `bootstrap`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default lock time-to-live.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(15 * 60);

/// Default per-call database timeout.
pub const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Configuration for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root that history keys are relative to.
    pub project_root: PathBuf,
    /// Changeset folders, relative to the project root.
    pub changesets_dir: PathBuf,
    /// Dry-run output, relative to the project root.
    pub output_dir: PathBuf,
    /// Lock time-to-live; choose longer than any single run.
    pub lock_ttl: Duration,
    /// Bound on each database call.
    pub statement_timeout: Option<Duration>,
    /// Fail on checksum drift instead of re-running.
    pub strict: bool,
    /// Stop a batch at the first failure.
    pub abort_on_error: bool,
    /// Variables handed to the renderer.
    pub variables: RenderContext,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            changesets_dir: PathBuf::from("changesets"),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            lock_ttl: DEFAULT_LOCK_TTL,
            statement_timeout: Some(DEFAULT_STATEMENT_TIMEOUT),
            strict: false,
            abort_on_error: true,
            variables: RenderContext::new(),
        }
    }
}

impl EngineConfig {
    /// Create a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the project root.
    pub fn project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = root.into();
        self
    }

    /// Set the changesets directory.
    pub fn changesets_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.changesets_dir = dir.into();
        self
    }

    /// Set the dry-run output directory.
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Set the lock TTL.
    pub fn lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    /// Set the statement timeout. `None` disables it.
    pub fn statement_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.statement_timeout = timeout;
        self
    }

    /// Enable strict mode.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Set the abort-on-error policy.
    pub fn abort_on_error(mut self, abort: bool) -> Self {
        self.abort_on_error = abort;
        self
    }

    /// Add a renderer variable.
    pub fn variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    /// Run options derived from this configuration.
    pub fn run_options(&self) -> RunOptions {
        RunOptions::new()
            .strict(self.strict)
            .abort_on_error(self.abort_on_error)
            .output_dir(self.project_root.join(&self.output_dir))
    }
}

/// The engine: every mutating call runs under the cross-process lock.
pub struct Engine {
    conn: Arc<dyn Connection>,
    store: Arc<dyn HistoryStore>,
    renderer: Arc<dyn Renderer>,
    events: Arc<dyn EventSink>,
    config: EngineConfig,
    /// Token of the lock taken by the operation in flight.
    in_flight: Mutex<Option<String>>,
}

impl Engine {
    /// Create an engine keeping history in the tracking tables of `conn`.
    pub fn new(conn: Arc<dyn Connection>, config: EngineConfig) -> Self {
        let mut store = SqlHistoryStore::new(conn.clone());
        if let Some(timeout) = config.statement_timeout {
            store = store.with_timeout(timeout);
        }
        Self::with_store(conn, Arc::new(store), config)
    }

    /// Create an engine over an explicit history store.
    pub fn with_store(
        conn: Arc<dyn Connection>,
        store: Arc<dyn HistoryStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            conn,
            store,
            renderer: Arc::new(PlainRenderer),
            events: Arc::new(TracingSink),
            config,
            in_flight: Mutex::new(None),
        }
    }

    /// Use `renderer` for SQL templates.
    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Report events to `events`.
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// The configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The history store.
    pub fn store(&self) -> &dyn HistoryStore {
        self.store.as_ref()
    }

    /// Run options derived from the configuration.
    pub fn run_options(&self) -> RunOptions {
        self.config.run_options()
    }

    fn locks(&self) -> LockManager<'_> {
        LockManager::new(self.store.as_ref(), self.events.as_ref())
    }

    fn runner<'a>(&'a self, actor: &'a str) -> FileRunner<'a> {
        FileRunner::new(self.conn.as_ref(), self.store.as_ref(), actor)
            .with_renderer(self.renderer.as_ref())
            .with_events(self.events.as_ref())
            .with_context(&self.config.variables)
            .with_statement_timeout(self.config.statement_timeout)
    }

    fn changesets<'a>(&'a self, actor: &'a str) -> ChangesetEngine<'a> {
        ChangesetEngine::new(
            self.conn.as_ref(),
            self.store.as_ref(),
            actor,
            &self.config.project_root,
            &self.config.changesets_dir,
        )
        .with_renderer(self.renderer.as_ref())
        .with_events(self.events.as_ref())
        .with_context(&self.config.variables)
        .with_statement_timeout(self.config.statement_timeout)
    }

    /// Create the tracking tables if needed and record the engine version.
    pub async fn bootstrap(&self) -> MigrateResult<()> {
        self.store.bootstrap(VERSION).await?;
        info!(version = VERSION, "Tracking tables ready");
        Ok(())
    }

    /// Whether the tracking tables exist.
    pub async fn tables_exist(&self) -> MigrateResult<bool> {
        self.store.tables_exist().await
    }

    async fn ensure_bootstrapped(&self) -> MigrateResult<()> {
        if !self.store.tables_exist().await? {
            return Err(MigrateError::NotBootstrapped);
        }
        if let Some(recorded) = self.store.schema_version().await? {
            if compare_versions(&recorded, VERSION) == Ordering::Greater {
                return Err(MigrateError::VersionMismatch {
                    recorded,
                    running: VERSION.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Current lock state.
    pub async fn lock_status(&self) -> MigrateResult<LockStatus> {
        self.ensure_bootstrapped().await?;
        self.locks().status().await
    }

    /// Acquire (or renew) the lock for `actor` with the configured TTL.
    pub async fn acquire_lock(&self, actor: &str) -> MigrateResult<Lock> {
        self.ensure_bootstrapped().await?;
        self.locks().acquire(actor, self.config.lock_ttl).await
    }

    /// Release the lock owned by `token`.
    pub async fn release_lock(&self, token: &str) -> MigrateResult<()> {
        self.ensure_bootstrapped().await?;
        self.locks().release(token).await
    }

    /// Release the lock held by `actor`, whatever its token.
    pub async fn release_own_lock(&self, actor: &str) -> MigrateResult<()> {
        self.ensure_bootstrapped().await?;
        let locks = self.locks();
        match self.store.read_lock().await? {
            Some(lock) if lock.holder == actor => locks.release(&lock.token).await,
            Some(lock) => Err(MigrateError::LockOwnership {
                holder: lock.holder,
            }),
            None => Err(MigrateError::LockNotFound),
        }
    }

    /// Remove the lock regardless of holder.
    pub async fn force_release_lock(&self, actor: &str) -> MigrateResult<Option<Lock>> {
        self.ensure_bootstrapped().await?;
        warn!(actor = %actor, "Force-releasing lock");
        self.locks().force_release(actor).await
    }

    async fn begin(&self, actor: &str) -> MigrateResult<LockGrant> {
        self.ensure_bootstrapped().await?;
        let grant = self.locks().acquire_grant(actor, self.config.lock_ttl).await?;
        if !grant.renewed {
            *self.in_flight.lock() = Some(grant.lock.token.clone());
        }
        Ok(grant)
    }

    /// Release the lock taken by [`Engine::begin`] unless it was already held.
    async fn finish<T>(&self, grant: LockGrant, result: MigrateResult<T>) -> MigrateResult<T> {
        if grant.renewed {
            return result;
        }
        self.in_flight.lock().take();
        let released = self.locks().release(&grant.lock.token).await;
        match (result, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => {
                warn!(error = %e, "Failed to release lock");
                Err(e)
            }
            (Err(e), Err(release_err)) => {
                warn!(error = %release_err, "Failed to release lock after error");
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
        }
    }

    /// Clean up after a mutating call whose future was dropped mid-flight.
    ///
    /// Aborts the statement still running on the connection, then releases
    /// the lock that call acquired. A lock the actor held before the call is
    /// left alone. Returns whether a lock was released.
    pub async fn release_interrupted(&self) -> MigrateResult<bool> {
        let Some(token) = self.in_flight.lock().take() else {
            return Ok(false);
        };
        warn!("Releasing lock of an interrupted operation");
        self.conn.interrupt();
        self.locks().release(&token).await?;
        Ok(true)
    }

    /// Resolve discovery rules against the project root.
    pub async fn discover(&self, rules: &Rules) -> MigrateResult<Vec<Candidate>> {
        discover(&self.config.project_root, rules).await
    }

    /// Run `files` under the lock.
    pub async fn run_files(
        &self,
        actor: &str,
        files: &[Candidate],
        options: &RunOptions,
    ) -> MigrateResult<BatchResult> {
        let grant = self.begin(actor).await?;
        let result = self.runner(actor).run(files, options).await;
        self.finish(grant, result).await
    }

    /// Apply one changeset under the lock.
    pub async fn apply(
        &self,
        actor: &str,
        name: &str,
        options: &RunOptions,
    ) -> MigrateResult<ChangeResult> {
        let grant = self.begin(actor).await?;
        let result = self.changesets(actor).apply(name, options).await;
        self.finish(grant, result).await
    }

    /// Revert one changeset under the lock.
    pub async fn revert(
        &self,
        actor: &str,
        name: &str,
        options: &RunOptions,
    ) -> MigrateResult<ChangeResult> {
        let grant = self.begin(actor).await?;
        let result = self.changesets(actor).revert(name, options).await;
        self.finish(grant, result).await
    }

    /// Apply every pending changeset under the lock.
    pub async fn fast_forward(
        &self,
        actor: &str,
        options: &RunOptions,
    ) -> MigrateResult<BatchChangeResult> {
        let grant = self.begin(actor).await?;
        let result = self.changesets(actor).fast_forward(options).await;
        self.finish(grant, result).await
    }

    /// Revert the last `count` changesets under the lock.
    pub async fn rewind(
        &self,
        actor: &str,
        count: usize,
        options: &RunOptions,
    ) -> MigrateResult<BatchChangeResult> {
        let grant = self.begin(actor).await?;
        let result = self.changesets(actor).rewind(count, options).await;
        self.finish(grant, result).await
    }

    /// State of every changeset.
    pub async fn changeset_status(&self) -> MigrateResult<Vec<ChangesetStatus>> {
        self.ensure_bootstrapped().await?;
        self.changesets("").status().await
    }

    /// Scaffold a new changeset. Does not touch the database.
    pub async fn create_changeset(&self, name: &str) -> MigrateResult<PathBuf> {
        self.changesets("").create(name).await
    }

    /// Directory holding changeset folders.
    pub fn changesets_path(&self) -> PathBuf {
        self.config.project_root.join(&self.config.changesets_dir)
    }

    /// Every record written by one operation.
    pub async fn operation(&self, operation_id: &str) -> MigrateResult<Vec<FileExecutionRecord>> {
        self.ensure_bootstrapped().await?;
        self.store.executions_for_operation(operation_id).await
    }

    /// The latest operations, newest first.
    pub async fn recent_operations(&self, limit: usize) -> MigrateResult<Vec<OperationSummary>> {
        self.ensure_bootstrapped().await?;
        self.store.recent_operations(limit).await
    }

    /// Project root that history keys are relative to.
    pub fn project_root(&self) -> &Path {
        &self.config.project_root
    }
}
