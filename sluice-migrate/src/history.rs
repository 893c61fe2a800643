//! History store: the tracking tables inside the target database.
//!
//! Three record kinds live here: the singleton lock row, per-file execution
//! records, and per-changeset records. Everything is persisted in the target
//! database itself so that independent processes pointed at the same database
//! see the same state.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::connection::{Connection, Row, SqlValue, with_timeout};
use crate::dialect::{
    Bound, CHANGESETS_TABLE, DialectSql, EXECUTIONS_TABLE, LOCK_TABLE, TRACKING_TABLES,
    VERSION_TABLE, bind,
};
use crate::error::{MigrateError, MigrateResult};
use crate::lock::Lock;

/// Outcome stored for one file attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Executed without error.
    Success,
    /// Execution or rendering failed.
    Failed,
    /// Not executed.
    Skipped,
}

impl ExecutionStatus {
    /// Stored representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(MigrateError::database(format!(
                "unknown execution status '{}'",
                other
            ))),
        }
    }
}

/// A stored file execution record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileExecutionRecord {
    /// Row id, increasing in insertion order.
    pub id: i64,
    /// Invocation this attempt belongs to.
    pub operation_id: String,
    /// Path relative to the project root.
    pub filepath: String,
    /// Checksum of the rendered content.
    pub checksum: String,
    /// Outcome.
    pub status: ExecutionStatus,
    /// Why the file was skipped.
    pub skip_reason: Option<String>,
    /// Why the file failed.
    pub error_message: Option<String>,
    /// Execution time.
    pub duration_ms: i64,
    /// Database clock at insertion.
    pub executed_at: DateTime<Utc>,
    /// Actor that ran the file.
    pub executed_by: String,
}

/// A file execution record about to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionEntry {
    pub operation_id: String,
    pub filepath: String,
    pub checksum: String,
    pub status: ExecutionStatus,
    pub skip_reason: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: i64,
    pub executed_by: String,
}

/// A stored changeset record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesetRecord {
    /// Changeset folder name.
    pub name: String,
    /// When it was (last) applied.
    pub applied_at: DateTime<Utc>,
    /// When it was reverted, if it has been since the last apply.
    pub reverted_at: Option<DateTime<Utc>>,
    /// Checksum of the manifest at apply time.
    pub manifest_checksum: Option<String>,
    /// Actor that applied it.
    pub applied_by: Option<String>,
}

impl ChangesetRecord {
    /// Applied and not reverted since.
    pub fn is_applied(&self) -> bool {
        self.reverted_at.is_none()
    }
}

/// Files grouped by operation, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationSummary {
    pub operation_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub executed_by: String,
    pub files: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub skipped: i64,
}

/// Result of one atomic acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAttempt {
    /// The row now belongs to the caller (fresh, taken over, or renewed).
    Acquired(Lock),
    /// Another actor holds an unexpired lock.
    Held(Lock),
    /// The takeover matched nothing and the row is gone; the insert may be retried.
    Vanished,
}

/// Result of a token-checked delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockRelease {
    /// The row was deleted.
    Released,
    /// No unexpired lock exists.
    NotFound,
    /// The unexpired lock belongs to someone else.
    NotOwner(Lock),
}

/// Persistence for lock, execution, and changeset records.
///
/// Every write is a single statement, atomic at the row level.
#[async_trait::async_trait]
pub trait HistoryStore: Send + Sync {
    /// Create the tracking tables if absent and record `version`.
    async fn bootstrap(&self, version: &str) -> MigrateResult<()>;

    /// Whether every tracking table exists.
    async fn tables_exist(&self) -> MigrateResult<bool>;

    /// Version recorded by the last bootstrap.
    async fn schema_version(&self) -> MigrateResult<Option<String>>;

    /// Insert the lock row, or take over an expired or same-holder row.
    async fn try_acquire_lock(
        &self,
        holder: &str,
        token: &str,
        ttl: Duration,
    ) -> MigrateResult<LockAttempt>;

    /// The current lock, unless absent or expired.
    async fn read_lock(&self) -> MigrateResult<Option<Lock>>;

    /// Delete the lock row if `token` owns it.
    async fn delete_lock(&self, token: &str) -> MigrateResult<LockRelease>;

    /// Delete the lock row unconditionally, returning what was there.
    async fn force_delete_lock(&self) -> MigrateResult<Option<Lock>>;

    /// Append a file execution record.
    async fn insert_execution(&self, entry: &ExecutionEntry) -> MigrateResult<()>;

    /// Most recent `success` record for `filepath`.
    async fn last_success(&self, filepath: &str) -> MigrateResult<Option<FileExecutionRecord>>;

    /// Every record written by one operation, in execution order.
    async fn executions_for_operation(
        &self,
        operation_id: &str,
    ) -> MigrateResult<Vec<FileExecutionRecord>>;

    /// The latest `limit` operations.
    async fn recent_operations(&self, limit: usize) -> MigrateResult<Vec<OperationSummary>>;

    /// Record for one changeset.
    async fn changeset(&self, name: &str) -> MigrateResult<Option<ChangesetRecord>>;

    /// Every changeset record, ordered by name.
    async fn changesets(&self) -> MigrateResult<Vec<ChangesetRecord>>;

    /// Mark a changeset applied, creating or resetting its record.
    async fn record_applied(
        &self,
        name: &str,
        manifest_checksum: Option<&str>,
        actor: &str,
    ) -> MigrateResult<ChangesetRecord>;

    /// Mark an applied changeset reverted.
    ///
    /// Fails with [`MigrateError::ChangesetNotApplied`] when there is no
    /// applied, un-reverted record.
    async fn record_reverted(&self, name: &str) -> MigrateResult<ChangesetRecord>;
}

/// Compare dotted version strings numerically.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    fn parts(v: &str) -> Vec<u64> {
        v.trim_start_matches('v')
            .split(['.', '-', '+'])
            .take(3)
            .map(|p| p.parse().unwrap_or(0))
            .collect()
    }
    parts(a).cmp(&parts(b))
}

fn check_version(recorded: &str, running: &str) -> MigrateResult<bool> {
    match compare_versions(recorded, running) {
        Ordering::Greater => Err(MigrateError::VersionMismatch {
            recorded: recorded.to_string(),
            running: running.to_string(),
        }),
        Ordering::Less => Ok(true),
        Ordering::Equal => Ok(false),
    }
}

fn millis(row: &Row, column: &str) -> MigrateResult<DateTime<Utc>> {
    let ms = row.integer(column)?;
    to_datetime(ms)
}

fn opt_millis(row: &Row, column: &str) -> MigrateResult<Option<DateTime<Utc>>> {
    row.opt_integer(column)?.map(to_datetime).transpose()
}

fn to_datetime(ms: i64) -> MigrateResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| MigrateError::database(format!("timestamp out of range: {}", ms)))
}

const LOCK_COLUMNS: &str = "holder, token, acquired_at, expires_at";
const EXECUTION_COLUMNS: &str = "id, operation_id, filepath, checksum, status, skip_reason, \
                                 error_message, duration_ms, executed_at, executed_by";
const CHANGESET_COLUMNS: &str = "name, applied_at, reverted_at, manifest_checksum, applied_by";

fn lock_from_row(row: &Row) -> MigrateResult<Lock> {
    Ok(Lock {
        holder: row.text("holder")?,
        token: row.text("token")?,
        acquired_at: millis(row, "acquired_at")?,
        expires_at: millis(row, "expires_at")?,
    })
}

fn execution_from_row(row: &Row) -> MigrateResult<FileExecutionRecord> {
    Ok(FileExecutionRecord {
        id: row.integer("id")?,
        operation_id: row.text("operation_id")?,
        filepath: row.text("filepath")?,
        checksum: row.text("checksum")?,
        status: row.text("status")?.parse()?,
        skip_reason: row.opt_text("skip_reason")?,
        error_message: row.opt_text("error_message")?,
        duration_ms: row.integer("duration_ms")?,
        executed_at: millis(row, "executed_at")?,
        executed_by: row.text("executed_by")?,
    })
}

fn changeset_from_row(row: &Row) -> MigrateResult<ChangesetRecord> {
    Ok(ChangesetRecord {
        name: row.text("name")?,
        applied_at: millis(row, "applied_at")?,
        reverted_at: opt_millis(row, "reverted_at")?,
        manifest_checksum: row.opt_text("manifest_checksum")?,
        applied_by: row.opt_text("applied_by")?,
    })
}

fn operation_from_row(row: &Row) -> MigrateResult<OperationSummary> {
    Ok(OperationSummary {
        operation_id: row.text("operation_id")?,
        started_at: millis(row, "started_at")?,
        finished_at: millis(row, "finished_at")?,
        executed_by: row.text("executed_by")?,
        files: row.integer("files")?,
        succeeded: row.integer("succeeded")?,
        failed: row.integer("failed")?,
        skipped: row.integer("skipped")?,
    })
}

/// History store backed by the tracking tables of a live connection.
pub struct SqlHistoryStore<C> {
    conn: C,
    timeout: Option<Duration>,
}

impl<C: Connection> SqlHistoryStore<C> {
    /// Create a store over `conn`.
    pub fn new(conn: C) -> Self {
        Self {
            conn,
            timeout: None,
        }
    }

    /// Bound every call by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The underlying connection.
    pub fn connection(&self) -> &C {
        &self.conn
    }

    fn sql(&self) -> &'static dyn DialectSql {
        self.conn.dialect().sql()
    }

    fn bind(&self, template: &str, args: &[(&str, SqlValue)]) -> MigrateResult<Bound> {
        bind(self.sql(), template, args)
    }

    async fn exec(&self, template: &str, args: &[(&str, SqlValue)]) -> MigrateResult<u64> {
        let bound = self.bind(template, args)?;
        debug!(sql = %bound.sql, "Executing statement");
        with_timeout(self.timeout, self.conn.execute(&bound.sql, &bound.params)).await
    }

    async fn fetch(&self, template: &str, args: &[(&str, SqlValue)]) -> MigrateResult<Vec<Row>> {
        let bound = self.bind(template, args)?;
        debug!(sql = %bound.sql, "Executing query");
        with_timeout(self.timeout, self.conn.query(&bound.sql, &bound.params)).await
    }

    async fn fetch_one(
        &self,
        template: &str,
        args: &[(&str, SqlValue)],
    ) -> MigrateResult<Option<Row>> {
        Ok(self.fetch(template, args).await?.into_iter().next())
    }

    async fn read_lock_row(&self) -> MigrateResult<Option<Lock>> {
        let sql = format!("SELECT {LOCK_COLUMNS} FROM {LOCK_TABLE} WHERE id = 1");
        self.fetch_one(&sql, &[])
            .await?
            .as_ref()
            .map(lock_from_row)
            .transpose()
    }

    async fn require_changeset(&self, name: &str) -> MigrateResult<ChangesetRecord> {
        self.changeset(name)
            .await?
            .ok_or_else(|| MigrateError::database(format!("changeset '{}' record vanished", name)))
    }
}

#[async_trait::async_trait]
impl<C: Connection> HistoryStore for SqlHistoryStore<C> {
    async fn bootstrap(&self, version: &str) -> MigrateResult<()> {
        let ddl = self.sql().bootstrap_sql();
        debug!(dialect = %self.conn.dialect(), "Creating tracking tables");
        with_timeout(self.timeout, self.conn.execute_script(&ddl)).await?;

        match self.schema_version().await? {
            None => {
                self.exec(
                    &format!(
                        "INSERT INTO {VERSION_TABLE} (id, version, installed_at) \
                         VALUES (1, :version, {{now}})"
                    ),
                    &[("version", version.into())],
                )
                .await?;
            }
            Some(recorded) => {
                if check_version(&recorded, version)? {
                    self.exec(
                        &format!(
                            "UPDATE {VERSION_TABLE} SET version = :version, installed_at = {{now}} \
                             WHERE id = 1"
                        ),
                        &[("version", version.into())],
                    )
                    .await?;
                }
            }
        }
        Ok(())
    }

    async fn tables_exist(&self) -> MigrateResult<bool> {
        let sql = self.sql().tables_exist_sql();
        let row = self.fetch_one(&sql, &[]).await?;
        let count = match row {
            Some(row) => row.integer("n")?,
            None => 0,
        };
        Ok(count == TRACKING_TABLES.len() as i64)
    }

    async fn schema_version(&self) -> MigrateResult<Option<String>> {
        let sql = format!("SELECT version FROM {VERSION_TABLE} WHERE id = 1");
        match self.fetch_one(&sql, &[]).await? {
            Some(row) => Ok(Some(row.text("version")?)),
            None => Ok(None),
        }
    }

    async fn try_acquire_lock(
        &self,
        holder: &str,
        token: &str,
        ttl: Duration,
    ) -> MigrateResult<LockAttempt> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX / 2);
        let args = [
            ("holder", SqlValue::from(holder)),
            ("token", SqlValue::from(token)),
            ("ttl_ms", SqlValue::from(ttl_ms)),
        ];

        let inserted = self.exec(&self.sql().insert_lock_sql(), &args).await?;
        let taken = inserted > 0 || self.exec(&self.sql().takeover_lock_sql(), &args).await? > 0;

        match self.read_lock_row().await? {
            Some(lock) if taken => Ok(LockAttempt::Acquired(lock)),
            Some(lock) if lock.holder == holder => Ok(LockAttempt::Acquired(lock)),
            Some(lock) => Ok(LockAttempt::Held(lock)),
            None => Ok(LockAttempt::Vanished),
        }
    }

    async fn read_lock(&self) -> MigrateResult<Option<Lock>> {
        let sql = format!(
            "SELECT {LOCK_COLUMNS} FROM {LOCK_TABLE} WHERE id = 1 AND expires_at > {{now}}"
        );
        self.fetch_one(&sql, &[])
            .await?
            .as_ref()
            .map(lock_from_row)
            .transpose()
    }

    async fn delete_lock(&self, token: &str) -> MigrateResult<LockRelease> {
        let deleted = self
            .exec(
                &format!("DELETE FROM {LOCK_TABLE} WHERE id = 1 AND token = :token"),
                &[("token", token.into())],
            )
            .await?;
        if deleted > 0 {
            return Ok(LockRelease::Released);
        }
        match self.read_lock().await? {
            Some(lock) => Ok(LockRelease::NotOwner(lock)),
            None => Ok(LockRelease::NotFound),
        }
    }

    async fn force_delete_lock(&self) -> MigrateResult<Option<Lock>> {
        let previous = self.read_lock_row().await?;
        self.exec(&format!("DELETE FROM {LOCK_TABLE} WHERE id = 1"), &[])
            .await?;
        Ok(previous)
    }

    async fn insert_execution(&self, entry: &ExecutionEntry) -> MigrateResult<()> {
        let sql = format!(
            "INSERT INTO {EXECUTIONS_TABLE} (operation_id, filepath, checksum, status, \
             skip_reason, error_message, duration_ms, executed_at, executed_by) \
             VALUES (:operation_id, :filepath, :checksum, :status, :skip_reason, \
             :error_message, :duration_ms, {{now}}, :executed_by)"
        );
        self.exec(
            &sql,
            &[
                ("operation_id", entry.operation_id.as_str().into()),
                ("filepath", entry.filepath.as_str().into()),
                ("checksum", entry.checksum.as_str().into()),
                ("status", entry.status.as_str().into()),
                ("skip_reason", entry.skip_reason.clone().into()),
                ("error_message", entry.error_message.clone().into()),
                ("duration_ms", entry.duration_ms.into()),
                ("executed_by", entry.executed_by.as_str().into()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn last_success(&self, filepath: &str) -> MigrateResult<Option<FileExecutionRecord>> {
        let select = format!(
            "SELECT {EXECUTION_COLUMNS} FROM {EXECUTIONS_TABLE} \
             WHERE filepath = :filepath AND status = 'success' \
             ORDER BY executed_at DESC, id DESC"
        );
        let sql = self.sql().limit(&select, 1);
        self.fetch_one(&sql, &[("filepath", filepath.into())])
            .await?
            .as_ref()
            .map(execution_from_row)
            .transpose()
    }

    async fn executions_for_operation(
        &self,
        operation_id: &str,
    ) -> MigrateResult<Vec<FileExecutionRecord>> {
        let sql = format!(
            "SELECT {EXECUTION_COLUMNS} FROM {EXECUTIONS_TABLE} \
             WHERE operation_id = :operation_id ORDER BY id ASC"
        );
        self.fetch(&sql, &[("operation_id", operation_id.into())])
            .await?
            .iter()
            .map(execution_from_row)
            .collect()
    }

    async fn recent_operations(&self, limit: usize) -> MigrateResult<Vec<OperationSummary>> {
        let select = format!(
            "SELECT operation_id, MIN(executed_at) AS started_at, MAX(executed_at) AS finished_at, \
             MAX(executed_by) AS executed_by, COUNT(*) AS files, \
             SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END) AS succeeded, \
             SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END) AS failed, \
             SUM(CASE WHEN status = 'skipped' THEN 1 ELSE 0 END) AS skipped \
             FROM {EXECUTIONS_TABLE} GROUP BY operation_id ORDER BY MAX(id) DESC"
        );
        let sql = self.sql().limit(&select, limit);
        self.fetch(&sql, &[])
            .await?
            .iter()
            .map(operation_from_row)
            .collect()
    }

    async fn changeset(&self, name: &str) -> MigrateResult<Option<ChangesetRecord>> {
        let sql = format!("SELECT {CHANGESET_COLUMNS} FROM {CHANGESETS_TABLE} WHERE name = :name");
        self.fetch_one(&sql, &[("name", name.into())])
            .await?
            .as_ref()
            .map(changeset_from_row)
            .transpose()
    }

    async fn changesets(&self) -> MigrateResult<Vec<ChangesetRecord>> {
        let sql = format!("SELECT {CHANGESET_COLUMNS} FROM {CHANGESETS_TABLE} ORDER BY name ASC");
        self.fetch(&sql, &[])
            .await?
            .iter()
            .map(changeset_from_row)
            .collect()
    }

    async fn record_applied(
        &self,
        name: &str,
        manifest_checksum: Option<&str>,
        actor: &str,
    ) -> MigrateResult<ChangesetRecord> {
        let args = [
            ("name", SqlValue::from(name)),
            ("manifest_checksum", SqlValue::from(manifest_checksum)),
            ("applied_by", SqlValue::from(actor)),
        ];

        // A re-apply must land strictly after the previous revert.
        let updated = self
            .exec(
                &format!(
                    "UPDATE {CHANGESETS_TABLE} SET \
                     applied_at = CASE WHEN reverted_at IS NOT NULL AND reverted_at >= {{now}} \
                     THEN reverted_at + 1 ELSE {{now}} END, \
                     reverted_at = NULL, \
                     manifest_checksum = :manifest_checksum, \
                     applied_by = :applied_by \
                     WHERE name = :name"
                ),
                &args,
            )
            .await?;

        if updated == 0 {
            self.exec(
                &format!(
                    "INSERT INTO {CHANGESETS_TABLE} (name, applied_at, reverted_at, \
                     manifest_checksum, applied_by) \
                     VALUES (:name, {{now}}, NULL, :manifest_checksum, :applied_by)"
                ),
                &args,
            )
            .await?;
        }

        self.require_changeset(name).await
    }

    async fn record_reverted(&self, name: &str) -> MigrateResult<ChangesetRecord> {
        let updated = self
            .exec(
                &format!(
                    "UPDATE {CHANGESETS_TABLE} SET \
                     reverted_at = CASE WHEN applied_at >= {{now}} \
                     THEN applied_at + 1 ELSE {{now}} END \
                     WHERE name = :name AND reverted_at IS NULL"
                ),
                &[("name", name.into())],
            )
            .await?;
        if updated == 0 {
            return Err(MigrateError::ChangesetNotApplied(name.to_string()));
        }
        self.require_changeset(name).await
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    version: Option<String>,
    lock: Option<Lock>,
    executions: Vec<FileExecutionRecord>,
    changesets: BTreeMap<String, ChangesetRecord>,
}

/// In-process history store with the same contract as [`SqlHistoryStore`].
///
/// Uses the local clock. Nothing is shared across processes, so the lock only
/// arbitrates between callers holding the same store.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryHistoryStore {
    /// Create an empty, un-bootstrapped store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every execution record, in insertion order.
    pub fn executions(&self) -> Vec<FileExecutionRecord> {
        self.state.lock().executions.clone()
    }
}

fn ttl_delta(ttl: Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX)
}

fn after(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if previous >= now {
        previous + chrono::Duration::milliseconds(1)
    } else {
        now
    }
}

#[async_trait::async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn bootstrap(&self, version: &str) -> MigrateResult<()> {
        let mut state = self.state.lock();
        let update = match &state.version {
            None => true,
            Some(recorded) => check_version(recorded, version)?,
        };
        if update {
            state.version = Some(version.to_string());
        }
        Ok(())
    }

    async fn tables_exist(&self) -> MigrateResult<bool> {
        Ok(self.state.lock().version.is_some())
    }

    async fn schema_version(&self) -> MigrateResult<Option<String>> {
        Ok(self.state.lock().version.clone())
    }

    async fn try_acquire_lock(
        &self,
        holder: &str,
        token: &str,
        ttl: Duration,
    ) -> MigrateResult<LockAttempt> {
        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(ttl_delta(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let mut state = self.state.lock();

        if let Some(lock) = state.lock.as_mut().filter(|lock| lock.expires_at > now) {
            if lock.holder != holder {
                return Ok(LockAttempt::Held(lock.clone()));
            }
            lock.expires_at = expires_at;
            return Ok(LockAttempt::Acquired(lock.clone()));
        }

        let lock = Lock {
            holder: holder.to_string(),
            token: token.to_string(),
            acquired_at: now,
            expires_at,
        };
        state.lock = Some(lock.clone());
        Ok(LockAttempt::Acquired(lock))
    }

    async fn read_lock(&self) -> MigrateResult<Option<Lock>> {
        let now = Utc::now();
        Ok(self
            .state
            .lock()
            .lock
            .clone()
            .filter(|lock| lock.expires_at > now))
    }

    async fn delete_lock(&self, token: &str) -> MigrateResult<LockRelease> {
        let now = Utc::now();
        let mut state = self.state.lock();
        match state.lock.clone() {
            Some(lock) if lock.token == token => {
                state.lock = None;
                Ok(LockRelease::Released)
            }
            Some(lock) if lock.expires_at > now => Ok(LockRelease::NotOwner(lock)),
            _ => Ok(LockRelease::NotFound),
        }
    }

    async fn force_delete_lock(&self) -> MigrateResult<Option<Lock>> {
        Ok(self.state.lock().lock.take())
    }

    async fn insert_execution(&self, entry: &ExecutionEntry) -> MigrateResult<()> {
        let mut state = self.state.lock();
        let id = state.executions.len() as i64 + 1;
        state.executions.push(FileExecutionRecord {
            id,
            operation_id: entry.operation_id.clone(),
            filepath: entry.filepath.clone(),
            checksum: entry.checksum.clone(),
            status: entry.status,
            skip_reason: entry.skip_reason.clone(),
            error_message: entry.error_message.clone(),
            duration_ms: entry.duration_ms,
            executed_at: Utc::now(),
            executed_by: entry.executed_by.clone(),
        });
        Ok(())
    }

    async fn last_success(&self, filepath: &str) -> MigrateResult<Option<FileExecutionRecord>> {
        Ok(self
            .state
            .lock()
            .executions
            .iter()
            .rev()
            .find(|r| r.filepath == filepath && r.status == ExecutionStatus::Success)
            .cloned())
    }

    async fn executions_for_operation(
        &self,
        operation_id: &str,
    ) -> MigrateResult<Vec<FileExecutionRecord>> {
        Ok(self
            .state
            .lock()
            .executions
            .iter()
            .filter(|r| r.operation_id == operation_id)
            .cloned()
            .collect())
    }

    async fn recent_operations(&self, limit: usize) -> MigrateResult<Vec<OperationSummary>> {
        let state = self.state.lock();
        let mut summaries: Vec<(i64, OperationSummary)> = Vec::new();

        for record in &state.executions {
            let index = match summaries
                .iter()
                .position(|(_, s)| s.operation_id == record.operation_id)
            {
                Some(index) => index,
                None => {
                    summaries.push((
                        record.id,
                        OperationSummary {
                            operation_id: record.operation_id.clone(),
                            started_at: record.executed_at,
                            finished_at: record.executed_at,
                            executed_by: record.executed_by.clone(),
                            files: 0,
                            succeeded: 0,
                            failed: 0,
                            skipped: 0,
                        },
                    ));
                    summaries.len() - 1
                }
            };
            let (last_id, summary) = &mut summaries[index];
            *last_id = record.id;
            summary.finished_at = record.executed_at;
            summary.files += 1;
            match record.status {
                ExecutionStatus::Success => summary.succeeded += 1,
                ExecutionStatus::Failed => summary.failed += 1,
                ExecutionStatus::Skipped => summary.skipped += 1,
            }
        }

        summaries.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(summaries
            .into_iter()
            .take(limit)
            .map(|(_, summary)| summary)
            .collect())
    }

    async fn changeset(&self, name: &str) -> MigrateResult<Option<ChangesetRecord>> {
        Ok(self.state.lock().changesets.get(name).cloned())
    }

    async fn changesets(&self) -> MigrateResult<Vec<ChangesetRecord>> {
        Ok(self.state.lock().changesets.values().cloned().collect())
    }

    async fn record_applied(
        &self,
        name: &str,
        manifest_checksum: Option<&str>,
        actor: &str,
    ) -> MigrateResult<ChangesetRecord> {
        let now = Utc::now();
        let mut state = self.state.lock();
        let applied_at = match state.changesets.get(name).and_then(|r| r.reverted_at) {
            Some(reverted_at) => after(reverted_at, now),
            None => now,
        };
        let record = ChangesetRecord {
            name: name.to_string(),
            applied_at,
            reverted_at: None,
            manifest_checksum: manifest_checksum.map(str::to_string),
            applied_by: Some(actor.to_string()),
        };
        state.changesets.insert(name.to_string(), record.clone());
        Ok(record)
    }

    async fn record_reverted(&self, name: &str) -> MigrateResult<ChangesetRecord> {
        let now = Utc::now();
        let mut state = self.state.lock();
        match state.changesets.get_mut(name) {
            Some(record) if record.is_applied() => {
                record.reverted_at = Some(after(record.applied_at, now));
                Ok(record.clone())
            }
            _ => Err(MigrateError::ChangesetNotApplied(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(op: &str, path: &str, status: ExecutionStatus) -> ExecutionEntry {
        ExecutionEntry {
            operation_id: op.to_string(),
            filepath: path.to_string(),
            checksum: "abc".to_string(),
            status,
            skip_reason: None,
            error_message: None,
            duration_ms: 3,
            executed_by: "ops@bastion".to_string(),
        }
    }

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("0.4.0", "0.10.0"), Ordering::Less);
        assert_eq!(compare_versions("1.2.3", "1.2.3"), Ordering::Equal);
        assert_eq!(compare_versions("v2.0.0", "1.9.9"), Ordering::Greater);
    }

    #[test]
    fn test_execution_status_roundtrip() {
        for status in [
            ExecutionStatus::Success,
            ExecutionStatus::Failed,
            ExecutionStatus::Skipped,
        ] {
            assert_eq!(status.as_str().parse::<ExecutionStatus>().unwrap(), status);
        }
        assert!("dry-run".parse::<ExecutionStatus>().is_err());
    }

    #[tokio::test]
    async fn test_memory_bootstrap_rejects_newer_version() {
        let store = MemoryHistoryStore::new();
        assert!(!store.tables_exist().await.unwrap());

        store.bootstrap("0.5.0").await.unwrap();
        assert!(store.tables_exist().await.unwrap());

        let err = store.bootstrap("0.4.0").await.unwrap_err();
        assert!(matches!(err, MigrateError::VersionMismatch { .. }));

        store.bootstrap("0.6.0").await.unwrap();
        assert_eq!(store.schema_version().await.unwrap().as_deref(), Some("0.6.0"));
    }

    #[tokio::test]
    async fn test_memory_last_success_ignores_failures() {
        let store = MemoryHistoryStore::new();
        store
            .insert_execution(&entry("op1", "a.sql", ExecutionStatus::Success))
            .await
            .unwrap();
        store
            .insert_execution(&entry("op2", "a.sql", ExecutionStatus::Failed))
            .await
            .unwrap();

        let last = store.last_success("a.sql").await.unwrap().unwrap();
        assert_eq!(last.operation_id, "op1");
        assert!(store.last_success("b.sql").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_recent_operations() {
        let store = MemoryHistoryStore::new();
        store
            .insert_execution(&entry("op1", "a.sql", ExecutionStatus::Success))
            .await
            .unwrap();
        store
            .insert_execution(&entry("op2", "a.sql", ExecutionStatus::Skipped))
            .await
            .unwrap();
        store
            .insert_execution(&entry("op2", "b.sql", ExecutionStatus::Failed))
            .await
            .unwrap();

        let ops = store.recent_operations(10).await.unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].operation_id, "op2");
        assert_eq!(ops[0].files, 2);
        assert_eq!(ops[0].skipped, 1);
        assert_eq!(ops[0].failed, 1);

        assert_eq!(store.recent_operations(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_memory_changeset_lifecycle() {
        let store = MemoryHistoryStore::new();
        let applied = store
            .record_applied("20240101_users", Some("m1"), "ops")
            .await
            .unwrap();
        assert!(applied.is_applied());

        let reverted = store.record_reverted("20240101_users").await.unwrap();
        assert!(reverted.reverted_at.unwrap() > reverted.applied_at);

        let err = store.record_reverted("20240101_users").await.unwrap_err();
        assert!(matches!(err, MigrateError::ChangesetNotApplied(_)));

        let reapplied = store
            .record_applied("20240101_users", None, "ops")
            .await
            .unwrap();
        assert!(reapplied.is_applied());
        assert!(reapplied.applied_at > reverted.reverted_at.unwrap());
        assert_eq!(store.changesets().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_memory_lock_rules() {
        let store = MemoryHistoryStore::new();
        let ttl = Duration::from_secs(60);

        let first = store.try_acquire_lock("alice", "t1", ttl).await.unwrap();
        assert!(matches!(first, LockAttempt::Acquired(ref l) if l.token == "t1"));

        let renewed = store.try_acquire_lock("alice", "t2", ttl).await.unwrap();
        assert!(matches!(renewed, LockAttempt::Acquired(ref l) if l.token == "t1"));

        let blocked = store.try_acquire_lock("bob", "t3", ttl).await.unwrap();
        assert!(matches!(blocked, LockAttempt::Held(ref l) if l.holder == "alice"));

        assert!(matches!(
            store.delete_lock("t3").await.unwrap(),
            LockRelease::NotOwner(_)
        ));
        assert_eq!(store.delete_lock("t1").await.unwrap(), LockRelease::Released);
        assert_eq!(store.delete_lock("t1").await.unwrap(), LockRelease::NotFound);
    }
}
