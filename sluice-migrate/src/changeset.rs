//! Changeset engine.
//!
//! A changeset is a folder under the changesets directory:
//!
//! ```text
//! changesets/
//! ├── 20240301120000_add_users/
//! │   ├── change/
//! │   │   └── 001.sql
//! │   ├── revert/
//! │   │   └── 001.sql
//! │   └── manifest.toml      (optional)
//! └── 20240315093000_add_posts/
//!     └── ...
//! ```
//!
//! Each changeset moves `unapplied -> applied -> reverted`, and back to
//! applied on re-apply. A changeset recorded as applied whose folder has
//! disappeared is orphaned. Every structural check runs before the first
//! file is executed.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::checksum::{checksum, sort_keys};
use crate::connection::Connection;
use crate::discover::{Candidate, walk_sql_files};
use crate::error::{MigrateError, MigrateResult};
use crate::events::{Event, EventSink, NoopSink};
use crate::history::{ChangesetRecord, HistoryStore};
use crate::render::{RenderContext, Renderer};
use crate::runner::{BatchResult, BatchStatus, FileRunner, RunOptions};

/// Folder holding the files that apply a changeset.
pub const CHANGE_DIR: &str = "change";
/// Folder holding the files that revert a changeset.
pub const REVERT_DIR: &str = "revert";
/// Optional manifest of referenced schema files.
pub const MANIFEST_FILE: &str = "manifest.toml";

/// Which side of a changeset is being run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Run `change/`.
    Apply,
    /// Run `revert/`.
    Revert,
}

impl Direction {
    fn folder(self) -> &'static str {
        match self {
            Self::Apply => CHANGE_DIR,
            Self::Revert => REVERT_DIR,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Apply => write!(f, "apply"),
            Self::Revert => write!(f, "revert"),
        }
    }
}

/// Where a changeset stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangesetState {
    /// No record.
    Unapplied,
    /// Applied and not reverted.
    Applied,
    /// Reverted since the last apply.
    Reverted,
    /// Applied, but the folder is gone.
    Orphaned,
}

impl fmt::Display for ChangesetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unapplied => "unapplied",
            Self::Applied => "applied",
            Self::Reverted => "reverted",
            Self::Orphaned => "orphaned",
        };
        f.write_str(s)
    }
}

/// Files a changeset is allowed to reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Referenced files.
    #[serde(default)]
    pub include: Vec<ManifestEntry>,
}

/// One manifest entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Path relative to the project root.
    pub path: PathBuf,
    /// Expected SHA-256 of the file, if pinned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// One changeset in a status listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesetStatus {
    pub name: String,
    pub state: ChangesetState,
    pub applied_at: Option<DateTime<Utc>>,
    pub reverted_at: Option<DateTime<Utc>>,
}

/// Result of moving one changeset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeResult {
    /// Changeset name.
    pub name: String,
    /// Which side ran.
    pub direction: Direction,
    /// The underlying file batch.
    pub batch: BatchResult,
    /// Non-fatal findings from validation.
    pub warnings: Vec<String>,
}

impl ChangeResult {
    /// Whether every file in the changeset succeeded.
    pub fn is_success(&self) -> bool {
        self.batch.is_success()
    }
}

/// Result of moving several changesets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchChangeResult {
    /// Aggregate status over changesets.
    pub status: BatchStatus,
    /// Per-changeset results in execution order.
    pub results: Vec<ChangeResult>,
}

impl BatchChangeResult {
    fn from_results(results: Vec<ChangeResult>) -> Self {
        let failed = results.iter().filter(|r| !r.is_success()).count();
        Self {
            status: BatchStatus::aggregate(results.len() - failed, failed),
            results,
        }
    }

    /// Whether every changeset succeeded.
    pub fn is_success(&self) -> bool {
        self.status == BatchStatus::Success
    }

    /// Get a summary of the batch.
    pub fn summary(&self) -> String {
        let ok = self.results.iter().filter(|r| r.is_success()).count();
        format!("{} of {} changesets succeeded", ok, self.results.len())
    }
}

/// A changeset that passed validation for one direction.
#[derive(Debug)]
struct Prepared {
    name: String,
    direction: Direction,
    files: Vec<Candidate>,
    manifest_checksum: Option<String>,
    warnings: Vec<String>,
}

/// Applies and reverts changesets through a [`FileRunner`].
pub struct ChangesetEngine<'a> {
    runner: FileRunner<'a>,
    store: &'a dyn HistoryStore,
    events: &'a dyn EventSink,
    actor: &'a str,
    project_root: PathBuf,
    changesets_dir: PathBuf,
}

impl<'a> ChangesetEngine<'a> {
    /// Create an engine for changesets in `changesets_dir` (relative to `project_root`).
    pub fn new(
        conn: &'a dyn Connection,
        store: &'a dyn HistoryStore,
        actor: &'a str,
        project_root: impl Into<PathBuf>,
        changesets_dir: impl AsRef<Path>,
    ) -> Self {
        let project_root = project_root.into();
        let changesets_dir = project_root.join(changesets_dir);
        Self {
            runner: FileRunner::new(conn, store, actor),
            store,
            events: &NoopSink,
            actor,
            project_root,
            changesets_dir,
        }
    }

    /// Use `renderer` for changeset files.
    pub fn with_renderer(mut self, renderer: &'a dyn Renderer) -> Self {
        self.runner = self.runner.with_renderer(renderer);
        self
    }

    /// Report progress to `events`.
    pub fn with_events(mut self, events: &'a dyn EventSink) -> Self {
        self.runner = self.runner.with_events(events);
        self.events = events;
        self
    }

    /// Variables passed to the renderer.
    pub fn with_context(mut self, context: &'a RenderContext) -> Self {
        self.runner = self.runner.with_context(context);
        self
    }

    /// Bound each file's execution by `timeout`.
    pub fn with_statement_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.runner = self.runner.with_statement_timeout(timeout);
        self
    }

    /// Directory holding the changeset folders.
    pub fn changesets_dir(&self) -> &Path {
        &self.changesets_dir
    }

    fn folder(&self, name: &str) -> PathBuf {
        self.changesets_dir.join(name)
    }

    /// Names of every changeset folder on disk, in lexical order.
    pub async fn folder_names(&self) -> MigrateResult<Vec<String>> {
        if !self.changesets_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.changesets_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Apply one changeset.
    ///
    /// `options.force` bypasses the already-applied guard.
    pub async fn apply(&self, name: &str, options: &RunOptions) -> MigrateResult<ChangeResult> {
        let prepared = self.prepare_apply(name, options).await?;
        self.execute(prepared, options).await
    }

    /// Revert one applied changeset.
    pub async fn revert(&self, name: &str, options: &RunOptions) -> MigrateResult<ChangeResult> {
        let prepared = self.prepare_revert(name, options).await?;
        self.execute(prepared, options).await
    }

    /// Apply every unapplied changeset in name order.
    ///
    /// All pending changesets are validated before the first one runs.
    pub async fn fast_forward(&self, options: &RunOptions) -> MigrateResult<BatchChangeResult> {
        let records = self.records_by_name().await?;
        let pending: Vec<String> = self
            .folder_names()
            .await?
            .into_iter()
            .filter(|name| !records.get(name).is_some_and(ChangesetRecord::is_applied))
            .collect();

        let mut prepared = Vec::with_capacity(pending.len());
        for name in &pending {
            prepared.push(self.prepare_apply(name, options).await?);
        }
        self.execute_all(prepared, options).await
    }

    /// Revert the last `count` applied changesets, newest first.
    ///
    /// All targets are validated before the first one runs.
    pub async fn rewind(
        &self,
        count: usize,
        options: &RunOptions,
    ) -> MigrateResult<BatchChangeResult> {
        let mut applied: Vec<ChangesetRecord> = self
            .store
            .changesets()
            .await?
            .into_iter()
            .filter(ChangesetRecord::is_applied)
            .collect();
        applied.sort_by(|a, b| b.name.cmp(&a.name));
        applied.truncate(count);

        let mut prepared = Vec::with_capacity(applied.len());
        for record in &applied {
            prepared.push(self.prepare_revert(&record.name, options).await?);
        }
        self.execute_all(prepared, options).await
    }

    /// Every changeset known on disk or in history.
    pub async fn status(&self) -> MigrateResult<Vec<ChangesetStatus>> {
        let records = self.records_by_name().await?;
        let on_disk: BTreeSet<String> = self.folder_names().await?.into_iter().collect();
        let names: BTreeSet<&String> = on_disk.iter().chain(records.keys()).collect();

        Ok(names
            .into_iter()
            .map(|name| {
                let record = records.get(name);
                let state = match record {
                    None => ChangesetState::Unapplied,
                    Some(r) if !r.is_applied() => ChangesetState::Reverted,
                    Some(_) if on_disk.contains(name) => ChangesetState::Applied,
                    Some(_) => ChangesetState::Orphaned,
                };
                ChangesetStatus {
                    name: name.clone(),
                    state,
                    applied_at: record.map(|r| r.applied_at),
                    reverted_at: record.and_then(|r| r.reverted_at),
                }
            })
            .collect())
    }

    /// Scaffold a new changeset folder named `<timestamp>_<name>`.
    pub async fn create(&self, name: &str) -> MigrateResult<PathBuf> {
        scaffold(&self.changesets_dir, name).await
    }

    async fn records_by_name(&self) -> MigrateResult<BTreeMap<String, ChangesetRecord>> {
        Ok(self
            .store
            .changesets()
            .await?
            .into_iter()
            .map(|r| (r.name.clone(), r))
            .collect())
    }

    async fn prepare_apply(&self, name: &str, options: &RunOptions) -> MigrateResult<Prepared> {
        if !self.folder(name).is_dir() {
            return Err(MigrateError::ChangesetNotFound(name.to_string()));
        }

        if let Some(record) = self.store.changeset(name).await? {
            if record.is_applied() && !options.force {
                return Err(MigrateError::ChangesetAlreadyApplied {
                    name: name.to_string(),
                    applied_at: record.applied_at,
                });
            }
        }

        self.validate(name, Direction::Apply, options.strict).await
    }

    async fn prepare_revert(&self, name: &str, options: &RunOptions) -> MigrateResult<Prepared> {
        let record = self
            .store
            .changeset(name)
            .await?
            .filter(ChangesetRecord::is_applied)
            .ok_or_else(|| MigrateError::ChangesetNotApplied(name.to_string()))?;

        if !self.folder(name).is_dir() {
            return Err(MigrateError::ChangesetOrphaned(name.to_string()));
        }

        let mut prepared = self.validate(name, Direction::Revert, options.strict).await?;

        if record.manifest_checksum != prepared.manifest_checksum {
            if options.strict {
                return Err(MigrateError::validation(
                    name,
                    "manifest changed since the changeset was applied",
                ));
            }
            warn!(changeset = %name, "Manifest changed since apply");
            prepared
                .warnings
                .push("manifest changed since the changeset was applied".to_string());
        }

        Ok(prepared)
    }

    async fn validate(
        &self,
        name: &str,
        direction: Direction,
        strict: bool,
    ) -> MigrateResult<Prepared> {
        let folder = self.folder(name);
        let side = folder.join(direction.folder());
        if !side.is_dir() {
            return Err(MigrateError::validation(
                name,
                format!("missing {}/ folder", direction.folder()),
            ));
        }

        let mut files: Vec<Candidate> = walk_sql_files(&side)
            .await?
            .into_iter()
            .map(|path| Candidate::new(&self.project_root, path))
            .collect();
        sort_keys(&mut files, |c| c.key.as_str());
        if files.is_empty() {
            return Err(MigrateError::validation(
                name,
                format!("{}/ contains no SQL files", direction.folder()),
            ));
        }

        let mut warnings = Vec::new();
        let manifest_path = folder.join(MANIFEST_FILE);
        let manifest_checksum = if manifest_path.is_file() {
            let raw = tokio::fs::read_to_string(&manifest_path).await?;
            self.check_manifest(&manifest_path, &raw, strict, &mut warnings)
                .await?;
            Some(checksum(&raw))
        } else {
            None
        };

        Ok(Prepared {
            name: name.to_string(),
            direction,
            files,
            manifest_checksum,
            warnings,
        })
    }

    async fn check_manifest(
        &self,
        manifest_path: &Path,
        raw: &str,
        strict: bool,
        warnings: &mut Vec<String>,
    ) -> MigrateResult<()> {
        let manifest: Manifest = toml::from_str(raw).map_err(|e| MigrateError::Manifest {
            path: manifest_path.to_path_buf(),
            reason: e.to_string(),
        })?;

        for entry in &manifest.include {
            if !self.project_root.join(&entry.path).is_file() {
                return Err(MigrateError::ManifestReference {
                    manifest: manifest_path.to_path_buf(),
                    missing: entry.path.clone(),
                });
            }
        }

        for entry in &manifest.include {
            let Some(expected) = &entry.checksum else {
                continue;
            };
            let content = tokio::fs::read_to_string(self.project_root.join(&entry.path)).await?;
            let actual = checksum(&content);
            if &actual == expected {
                continue;
            }
            if strict {
                return Err(MigrateError::ManifestChecksumMismatch {
                    manifest: manifest_path.to_path_buf(),
                    path: entry.path.clone(),
                    expected: expected.clone(),
                    actual,
                });
            }
            warn!(path = %entry.path.display(), "Manifest checksum mismatch");
            warnings.push(format!(
                "{} changed since the manifest was written",
                entry.path.display()
            ));
        }

        Ok(())
    }

    async fn execute(
        &self,
        prepared: Prepared,
        options: &RunOptions,
    ) -> MigrateResult<ChangeResult> {
        let Prepared {
            name,
            direction,
            files,
            manifest_checksum,
            warnings,
        } = prepared;

        self.events.emit(&Event::ChangesetStarted {
            name: name.clone(),
            direction,
        });

        // The changeset record is the idempotency guard, so every file runs.
        let file_options = options.clone().force(true);
        let batch = self.runner.run(&files, &file_options).await?;

        if batch.is_success() && !options.dry_run {
            match direction {
                Direction::Apply => {
                    self.store
                        .record_applied(&name, manifest_checksum.as_deref(), self.actor)
                        .await?;
                }
                Direction::Revert => {
                    self.store.record_reverted(&name).await?;
                }
            }
        }

        info!(
            changeset = %name,
            direction = %direction,
            status = %batch.status,
            "Changeset finished"
        );
        self.events.emit(&Event::ChangesetFinished {
            name: name.clone(),
            direction,
            status: batch.status,
        });

        Ok(ChangeResult {
            name,
            direction,
            batch,
            warnings,
        })
    }

    async fn execute_all(
        &self,
        prepared: Vec<Prepared>,
        options: &RunOptions,
    ) -> MigrateResult<BatchChangeResult> {
        let mut results = Vec::with_capacity(prepared.len());
        for changeset in prepared {
            let result = self.execute(changeset, options).await?;
            let failed = !result.is_success();
            results.push(result);
            if failed && options.abort_on_error {
                break;
            }
        }
        Ok(BatchChangeResult::from_results(results))
    }
}

/// Create `<changesets_dir>/<YYYYMMDDHHMMSS>_<name>/{change,revert}/001.sql`.
///
/// Touches only the filesystem.
pub async fn scaffold(changesets_dir: &Path, name: &str) -> MigrateResult<PathBuf> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(MigrateError::config(format!(
            "invalid changeset name '{}': use letters, digits, '_' or '-'",
            name
        )));
    }

    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let folder = changesets_dir.join(format!("{}_{}", timestamp, name));
    if folder.exists() {
        return Err(MigrateError::config(format!(
            "changeset folder already exists: {}",
            folder.display()
        )));
    }

    for side in [CHANGE_DIR, REVERT_DIR] {
        let dir = folder.join(side);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join("001.sql"), "").await?;
    }

    info!(path = %folder.display(), "Created changeset");
    Ok(folder)
}
