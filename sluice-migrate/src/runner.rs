//! File runner.
//!
//! Executes an ordered list of SQL files against a connection, deciding per
//! file whether it must run based on the last successful checksum recorded
//! in the history store.
//!
//! Per-file failures are captured in [`FileResult`], not returned as errors.
//! Only history-store failures abort a batch with `Err`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::checksum::checksum;
use crate::connection::{Connection, with_timeout};
use crate::discover::Candidate;
use crate::error::MigrateResult;
use crate::events::{Event, EventSink, NoopSink};
use crate::history::{ExecutionEntry, ExecutionStatus, HistoryStore};
use crate::render::{PlainRenderer, RenderContext, Renderer};

/// Skip reason for files whose content already ran successfully.
pub const SKIP_UNCHANGED: &str = "unchanged";

/// Default location for dry-run output.
pub const DEFAULT_OUTPUT_DIR: &str = ".sluice/dry-run";

static EMPTY_CONTEXT: RenderContext = BTreeMap::new();

/// Options controlling one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Run files even when their content already ran.
    pub force: bool,
    /// Render to `output_dir` instead of executing.
    pub dry_run: bool,
    /// Stop at the first failed file.
    pub abort_on_error: bool,
    /// Treat a checksum change on a previously applied file as a failure.
    pub strict: bool,
    /// Destination for dry-run output.
    pub output_dir: PathBuf,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            force: false,
            dry_run: false,
            abort_on_error: true,
            strict: false,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
        }
    }
}

impl RunOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set force mode.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Set dry-run mode.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Set the abort-on-error policy.
    pub fn abort_on_error(mut self, abort: bool) -> Self {
        self.abort_on_error = abort;
        self
    }

    /// Set strict mode.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Set the dry-run output directory.
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }
}

/// What happened to one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FileOutcome {
    /// Executed.
    Success { duration_ms: i64 },
    /// Not executed.
    Skipped { reason: String },
    /// Rendered to disk.
    DryRun { output_path: PathBuf },
    /// Rendering, drift check, or execution failed.
    Failed { error: String, duration_ms: i64 },
}

/// Result for one file in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileResult {
    /// History key.
    pub filepath: String,
    /// Checksum of the rendered content, when rendering succeeded.
    pub checksum: Option<String>,
    /// Outcome.
    #[serde(flatten)]
    pub outcome: FileOutcome,
}

impl FileResult {
    /// Whether this file failed.
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, FileOutcome::Failed { .. })
    }
}

/// Aggregate status of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    /// Nothing failed.
    Success,
    /// Some items failed, some did not.
    Partial,
    /// Every attempted item failed.
    Failed,
}

impl BatchStatus {
    /// Aggregate `ok` non-failed and `failed` failed items.
    ///
    /// An empty batch is a success.
    pub fn aggregate(ok: usize, failed: usize) -> Self {
        match (ok, failed) {
            (_, 0) => Self::Success,
            (0, _) => Self::Failed,
            _ => Self::Partial,
        }
    }

    /// Stable name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of running a batch of files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    /// Groups every record written by this batch.
    pub operation_id: String,
    /// Aggregate status.
    pub status: BatchStatus,
    /// Per-file results in execution order.
    pub file_results: Vec<FileResult>,
    /// Wall time for the batch.
    pub duration_ms: i64,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub dry_run: usize,
}

impl BatchResult {
    fn from_results(operation_id: &str, file_results: Vec<FileResult>, duration_ms: i64) -> Self {
        let mut result = Self {
            operation_id: operation_id.to_string(),
            status: BatchStatus::Success,
            file_results,
            duration_ms,
            succeeded: 0,
            skipped: 0,
            failed: 0,
            dry_run: 0,
        };
        for file in &result.file_results {
            match file.outcome {
                FileOutcome::Success { .. } => result.succeeded += 1,
                FileOutcome::Skipped { .. } => result.skipped += 1,
                FileOutcome::DryRun { .. } => result.dry_run += 1,
                FileOutcome::Failed { .. } => result.failed += 1,
            }
        }
        result.status = BatchStatus::aggregate(
            result.succeeded + result.skipped + result.dry_run,
            result.failed,
        );
        result
    }

    /// Whether every file succeeded, was skipped, or was rendered.
    pub fn is_success(&self) -> bool {
        self.status == BatchStatus::Success
    }

    /// Get a summary of the batch.
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{} succeeded, {} skipped, {} failed",
            self.succeeded, self.skipped, self.failed
        );
        if self.dry_run > 0 {
            summary.push_str(&format!(", {} rendered", self.dry_run));
        }
        summary.push_str(&format!(" in {}ms", self.duration_ms));
        summary
    }
}

fn elapsed_ms(started: Instant) -> i64 {
    i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)
}

/// Destination of a dry-run render for `key`.
pub fn dry_run_path(output_dir: &Path, key: &str) -> PathBuf {
    output_dir.join(key.strip_suffix(".tpl").unwrap_or(key))
}

/// Runs files sequentially and records each attempt.
pub struct FileRunner<'a> {
    conn: &'a dyn Connection,
    store: &'a dyn HistoryStore,
    renderer: &'a dyn Renderer,
    events: &'a dyn EventSink,
    context: &'a RenderContext,
    actor: &'a str,
    statement_timeout: Option<Duration>,
}

impl<'a> FileRunner<'a> {
    /// Create a runner executing as `actor`.
    pub fn new(conn: &'a dyn Connection, store: &'a dyn HistoryStore, actor: &'a str) -> Self {
        Self {
            conn,
            store,
            renderer: &PlainRenderer,
            events: &NoopSink,
            context: &EMPTY_CONTEXT,
            actor,
            statement_timeout: None,
        }
    }

    /// Use `renderer` to produce SQL text.
    pub fn with_renderer(mut self, renderer: &'a dyn Renderer) -> Self {
        self.renderer = renderer;
        self
    }

    /// Report progress to `events`.
    pub fn with_events(mut self, events: &'a dyn EventSink) -> Self {
        self.events = events;
        self
    }

    /// Variables passed to the renderer.
    pub fn with_context(mut self, context: &'a RenderContext) -> Self {
        self.context = context;
        self
    }

    /// Bound each file's execution by `timeout`.
    pub fn with_statement_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.statement_timeout = timeout;
        self
    }

    /// Run `files` as a new operation.
    pub async fn run(
        &self,
        files: &[Candidate],
        options: &RunOptions,
    ) -> MigrateResult<BatchResult> {
        let operation_id = Uuid::new_v4().to_string();
        self.run_in_operation(&operation_id, files, options).await
    }

    /// Run `files`, recording them under `operation_id`.
    pub async fn run_in_operation(
        &self,
        operation_id: &str,
        files: &[Candidate],
        options: &RunOptions,
    ) -> MigrateResult<BatchResult> {
        let started = Instant::now();
        self.events.emit(&Event::BatchStarted {
            operation_id: operation_id.to_string(),
            files: files.len(),
        });

        let mut results = Vec::with_capacity(files.len());
        for candidate in files {
            let result = self.run_file(operation_id, candidate, options).await?;
            let failed = result.is_failed();
            results.push(result);
            if failed && options.abort_on_error {
                warn!(filepath = %candidate.key, "Aborting batch after failure");
                break;
            }
        }

        let batch = BatchResult::from_results(operation_id, results, elapsed_ms(started));
        info!(
            operation_id = %operation_id,
            status = %batch.status,
            "Batch finished: {}",
            batch.summary()
        );
        self.events.emit(&Event::BatchFinished {
            operation_id: operation_id.to_string(),
            status: batch.status,
            duration_ms: batch.duration_ms,
        });
        Ok(batch)
    }

    async fn run_file(
        &self,
        operation_id: &str,
        candidate: &Candidate,
        options: &RunOptions,
    ) -> MigrateResult<FileResult> {
        let started = Instant::now();

        let sql = match self.renderer.render(&candidate.path, self.context).await {
            Ok(sql) => sql,
            Err(e) => {
                let error = format!("render failed: {}", e);
                return self
                    .fail(operation_id, candidate, None, error, elapsed_ms(started), options)
                    .await;
            }
        };
        let sum = checksum(&sql);

        if !options.force {
            if let Some(previous) = self.store.last_success(&candidate.key).await? {
                if previous.checksum == sum {
                    return self.skip(operation_id, candidate, sum, options).await;
                }
                if options.strict {
                    let error = format!(
                        "checksum drift: previously applied as {}, now {}",
                        previous.checksum, sum
                    );
                    warn!(filepath = %candidate.key, "Checksum drift in strict mode");
                    return self
                        .fail(operation_id, candidate, Some(sum), error, 0, options)
                        .await;
                }
                warn!(filepath = %candidate.key, "Content changed since last run, re-running");
            }
        }

        if options.dry_run {
            return self.render_to_disk(operation_id, candidate, sum, &sql, options).await;
        }

        self.events.emit(&Event::FileStarted {
            operation_id: operation_id.to_string(),
            filepath: candidate.key.clone(),
        });

        match with_timeout(self.statement_timeout, self.conn.execute_script(&sql)).await {
            Ok(()) => {
                let duration_ms = elapsed_ms(started);
                self.record(
                    operation_id,
                    candidate,
                    &sum,
                    ExecutionStatus::Success,
                    None,
                    None,
                    duration_ms,
                )
                .await?;
                self.events.emit(&Event::FileFinished {
                    operation_id: operation_id.to_string(),
                    filepath: candidate.key.clone(),
                    success: true,
                    duration_ms,
                    error: None,
                });
                Ok(FileResult {
                    filepath: candidate.key.clone(),
                    checksum: Some(sum),
                    outcome: FileOutcome::Success { duration_ms },
                })
            }
            Err(e) => {
                self.fail(
                    operation_id,
                    candidate,
                    Some(sum),
                    e.to_string(),
                    elapsed_ms(started),
                    options,
                )
                .await
            }
        }
    }

    async fn skip(
        &self,
        operation_id: &str,
        candidate: &Candidate,
        sum: String,
        options: &RunOptions,
    ) -> MigrateResult<FileResult> {
        if !options.dry_run {
            self.record(
                operation_id,
                candidate,
                &sum,
                ExecutionStatus::Skipped,
                Some(SKIP_UNCHANGED),
                None,
                0,
            )
            .await?;
        }
        self.events.emit(&Event::FileSkipped {
            operation_id: operation_id.to_string(),
            filepath: candidate.key.clone(),
            reason: SKIP_UNCHANGED.to_string(),
        });
        Ok(FileResult {
            filepath: candidate.key.clone(),
            checksum: Some(sum),
            outcome: FileOutcome::Skipped {
                reason: SKIP_UNCHANGED.to_string(),
            },
        })
    }

    async fn fail(
        &self,
        operation_id: &str,
        candidate: &Candidate,
        sum: Option<String>,
        error: String,
        duration_ms: i64,
        options: &RunOptions,
    ) -> MigrateResult<FileResult> {
        if !options.dry_run {
            self.record(
                operation_id,
                candidate,
                sum.as_deref().unwrap_or_default(),
                ExecutionStatus::Failed,
                None,
                Some(error.as_str()),
                duration_ms,
            )
            .await?;
        }
        self.events.emit(&Event::FileFinished {
            operation_id: operation_id.to_string(),
            filepath: candidate.key.clone(),
            success: false,
            duration_ms,
            error: Some(error.clone()),
        });
        Ok(FileResult {
            filepath: candidate.key.clone(),
            checksum: sum,
            outcome: FileOutcome::Failed { error, duration_ms },
        })
    }

    async fn render_to_disk(
        &self,
        operation_id: &str,
        candidate: &Candidate,
        sum: String,
        sql: &str,
        options: &RunOptions,
    ) -> MigrateResult<FileResult> {
        let output_path = dry_run_path(&options.output_dir, &candidate.key);
        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&output_path, sql).await?;

        self.events.emit(&Event::FileDryRun {
            operation_id: operation_id.to_string(),
            filepath: candidate.key.clone(),
            output_path: output_path.display().to_string(),
        });
        Ok(FileResult {
            filepath: candidate.key.clone(),
            checksum: Some(sum),
            outcome: FileOutcome::DryRun { output_path },
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        operation_id: &str,
        candidate: &Candidate,
        sum: &str,
        status: ExecutionStatus,
        skip_reason: Option<&str>,
        error_message: Option<&str>,
        duration_ms: i64,
    ) -> MigrateResult<()> {
        self.store
            .insert_execution(&ExecutionEntry {
                operation_id: operation_id.to_string(),
                filepath: candidate.key.clone(),
                checksum: sum.to_string(),
                status,
                skip_reason: skip_reason.map(str::to_string),
                error_message: error_message.map(str::to_string),
                duration_ms,
                executed_by: self.actor.to_string(),
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryHistoryStore;
    use crate::testing::FakeConnection;
    use pretty_assertions::assert_eq;

    struct Fixture {
        dir: tempfile::TempDir,
        files: Vec<Candidate>,
    }

    impl Fixture {
        async fn new(bodies: &[(&str, &str)]) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mut files = Vec::new();
            for (name, body) in bodies {
                let path = dir.path().join(name);
                tokio::fs::write(&path, body).await.unwrap();
                files.push(Candidate::new(dir.path(), path));
            }
            Self { dir, files }
        }

        async fn rewrite(&self, index: usize, body: &str) {
            tokio::fs::write(&self.files[index].path, body).await.unwrap();
        }
    }

    fn outcomes(batch: &BatchResult) -> Vec<&'static str> {
        batch
            .file_results
            .iter()
            .map(|r| match r.outcome {
                FileOutcome::Success { .. } => "success",
                FileOutcome::Skipped { .. } => "skipped",
                FileOutcome::DryRun { .. } => "dry_run",
                FileOutcome::Failed { .. } => "failed",
            })
            .collect()
    }

    #[test]
    fn test_aggregate() {
        assert_eq!(BatchStatus::aggregate(0, 0), BatchStatus::Success);
        assert_eq!(BatchStatus::aggregate(3, 0), BatchStatus::Success);
        assert_eq!(BatchStatus::aggregate(2, 1), BatchStatus::Partial);
        assert_eq!(BatchStatus::aggregate(0, 2), BatchStatus::Failed);
    }

    #[test]
    fn test_dry_run_path_strips_template_suffix() {
        assert_eq!(
            dry_run_path(Path::new("out"), "schema/001_users.sql.tpl"),
            PathBuf::from("out/schema/001_users.sql")
        );
    }

    #[tokio::test]
    async fn test_second_run_skips_unchanged() {
        let fx = Fixture::new(&[
            ("001.sql", "CREATE TABLE a (id INT);"),
            ("002.sql", "CREATE TABLE b (id INT);"),
        ])
        .await;
        let conn = FakeConnection::new();
        let store = MemoryHistoryStore::new();
        let runner = FileRunner::new(&conn, &store, "ops");

        let first = runner.run(&fx.files, &RunOptions::new()).await.unwrap();
        assert_eq!(outcomes(&first), vec!["success", "success"]);

        let second = runner.run(&fx.files, &RunOptions::new()).await.unwrap();
        assert_eq!(outcomes(&second), vec!["skipped", "skipped"]);
        assert_eq!(second.status, BatchStatus::Success);
        assert_eq!(conn.scripts().len(), 2);

        let successes = store
            .executions()
            .iter()
            .filter(|r| r.status == ExecutionStatus::Success)
            .count();
        assert_eq!(successes, 2);
    }

    #[tokio::test]
    async fn test_changed_file_reruns() {
        let fx = Fixture::new(&[("001.sql", "CREATE TABLE a (id INT);")]).await;
        let conn = FakeConnection::new();
        let store = MemoryHistoryStore::new();
        let runner = FileRunner::new(&conn, &store, "ops");

        runner.run(&fx.files, &RunOptions::new()).await.unwrap();
        fx.rewrite(0, "CREATE TABLE a (id BIGINT);").await;

        let batch = runner.run(&fx.files, &RunOptions::new()).await.unwrap();
        assert_eq!(outcomes(&batch), vec!["success"]);
        assert_eq!(conn.scripts().len(), 2);
    }

    #[tokio::test]
    async fn test_strict_mode_fails_on_drift() {
        let fx = Fixture::new(&[("001.sql", "CREATE TABLE a (id INT);")]).await;
        let conn = FakeConnection::new();
        let store = MemoryHistoryStore::new();
        let runner = FileRunner::new(&conn, &store, "ops");

        runner.run(&fx.files, &RunOptions::new()).await.unwrap();
        fx.rewrite(0, "CREATE TABLE a (id BIGINT);").await;

        let batch = runner
            .run(&fx.files, &RunOptions::new().strict(true))
            .await
            .unwrap();
        assert_eq!(batch.status, BatchStatus::Failed);
        match &batch.file_results[0].outcome {
            FileOutcome::Failed { error, .. } => assert!(error.contains("checksum drift")),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(conn.scripts().len(), 1);
    }

    #[tokio::test]
    async fn test_force_reruns_unchanged() {
        let fx = Fixture::new(&[("001.sql", "SELECT 1;")]).await;
        let conn = FakeConnection::new();
        let store = MemoryHistoryStore::new();
        let runner = FileRunner::new(&conn, &store, "ops");

        runner.run(&fx.files, &RunOptions::new()).await.unwrap();
        let batch = runner
            .run(&fx.files, &RunOptions::new().force(true))
            .await
            .unwrap();
        assert_eq!(outcomes(&batch), vec!["success"]);
    }

    #[tokio::test]
    async fn test_continue_on_error_is_partial() {
        let fx = Fixture::new(&[
            ("001.sql", "SELECT 1;"),
            ("002.sql", "SELECT BROKEN;"),
            ("003.sql", "SELECT 3;"),
        ])
        .await;
        let conn = FakeConnection::failing_on("BROKEN");
        let store = MemoryHistoryStore::new();
        let runner = FileRunner::new(&conn, &store, "ops");

        let batch = runner
            .run(&fx.files, &RunOptions::new().abort_on_error(false))
            .await
            .unwrap();

        assert_eq!(batch.status, BatchStatus::Partial);
        assert_eq!(outcomes(&batch), vec!["success", "failed", "success"]);
        assert_eq!(batch.failed, 1);
        assert_eq!(store.executions().len(), 3);
    }

    #[tokio::test]
    async fn test_abort_on_error_stops() {
        let fx = Fixture::new(&[
            ("001.sql", "SELECT 1;"),
            ("002.sql", "SELECT BROKEN;"),
            ("003.sql", "SELECT 3;"),
        ])
        .await;
        let conn = FakeConnection::failing_on("BROKEN");
        let store = MemoryHistoryStore::new();
        let runner = FileRunner::new(&conn, &store, "ops");

        let batch = runner.run(&fx.files, &RunOptions::new()).await.unwrap();

        assert_eq!(batch.status, BatchStatus::Partial);
        assert_eq!(outcomes(&batch), vec!["success", "failed"]);
        let recorded: Vec<String> = store.executions().into_iter().map(|r| r.filepath).collect();
        assert_eq!(recorded, vec!["001.sql", "002.sql"]);

        let failed = &store.executions()[1];
        assert!(failed.error_message.as_deref().unwrap().contains("BROKEN"));
        assert_eq!(failed.executed_by, "ops");
    }

    #[tokio::test]
    async fn test_all_failed() {
        let fx = Fixture::new(&[("001.sql", "BROKEN")]).await;
        let conn = FakeConnection::failing_on("BROKEN");
        let store = MemoryHistoryStore::new();
        let batch = FileRunner::new(&conn, &store, "ops")
            .run(&fx.files, &RunOptions::new())
            .await
            .unwrap();
        assert_eq!(batch.status, BatchStatus::Failed);
    }

    #[tokio::test]
    async fn test_dry_run_writes_output_only() {
        let fx = Fixture::new(&[("001.sql.tpl", "SELECT 1;")]).await;
        let conn = FakeConnection::new();
        let store = MemoryHistoryStore::new();
        let out = fx.dir.path().join("out");

        let batch = FileRunner::new(&conn, &store, "ops")
            .run(&fx.files, &RunOptions::new().dry_run(true).output_dir(&out))
            .await
            .unwrap();

        assert_eq!(batch.status, BatchStatus::Success);
        assert_eq!(batch.dry_run, 1);
        let written = tokio::fs::read_to_string(out.join("001.sql")).await.unwrap();
        assert_eq!(written, "SELECT 1;");
        assert!(conn.scripts().is_empty());
        assert!(store.executions().is_empty());
    }

    #[tokio::test]
    async fn test_empty_batch_is_success() {
        let conn = FakeConnection::new();
        let store = MemoryHistoryStore::new();
        let batch = FileRunner::new(&conn, &store, "ops")
            .run(&[], &RunOptions::new())
            .await
            .unwrap();
        assert_eq!(batch.status, BatchStatus::Success);
        assert!(batch.file_results.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_recorded_failure() {
        let dir = tempfile::tempdir().unwrap();
        let files = vec![Candidate::new(dir.path(), dir.path().join("gone.sql"))];
        let conn = FakeConnection::new();
        let store = MemoryHistoryStore::new();

        let batch = FileRunner::new(&conn, &store, "ops")
            .run(&files, &RunOptions::new())
            .await
            .unwrap();
        assert_eq!(batch.status, BatchStatus::Failed);
        assert_eq!(store.executions()[0].status, ExecutionStatus::Failed);
    }
}
