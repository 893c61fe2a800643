//! Error types for the change execution engine.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type alias for engine operations.
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Errors that can occur while locking, running files, or moving changesets.
///
/// Per-file execution failures are not errors: they are captured in
/// [`FileResult`](crate::runner::FileResult) so a batch can keep going.
#[derive(Debug, Error)]
pub enum MigrateError {
    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database operation error.
    #[error("Database error: {0}")]
    Database(String),

    /// A database call did not finish within the configured timeout.
    #[error("Database call timed out after {0:?}")]
    Timeout(Duration),

    /// The tracking tables have not been created yet.
    #[error("Tracking tables are missing; run bootstrap first")]
    NotBootstrapped,

    /// The database was bootstrapped by a newer release.
    #[error("Database was bootstrapped by sluice {recorded}, which is newer than {running}")]
    VersionMismatch {
        /// Version recorded in the database.
        recorded: String,
        /// Version of the running engine.
        running: String,
    },

    /// Another actor holds an unexpired lock.
    #[error("Lock is held by '{holder}' since {held_since}")]
    LockAcquire {
        /// Current lock holder.
        holder: String,
        /// When the holder first acquired the lock.
        held_since: DateTime<Utc>,
    },

    /// Release was requested but no lock exists.
    #[error("No lock is currently held")]
    LockNotFound,

    /// Release was requested with a token that does not own the lock.
    #[error("Lock token does not belong to the current holder '{holder}'")]
    LockOwnership {
        /// Current lock holder.
        holder: String,
    },

    /// Changeset has an applied record and `force` was not given.
    #[error("Changeset '{name}' was already applied at {applied_at}")]
    ChangesetAlreadyApplied {
        /// Changeset name.
        name: String,
        /// When it was applied.
        applied_at: DateTime<Utc>,
    },

    /// Changeset has no applied (and un-reverted) record.
    #[error("Changeset '{0}' is not applied")]
    ChangesetNotApplied(String),

    /// Changeset folder does not exist.
    #[error("Changeset '{0}' not found")]
    ChangesetNotFound(String),

    /// Changeset is recorded as applied but its folder is gone.
    #[error("Changeset '{0}' is recorded as applied but its folder no longer exists")]
    ChangesetOrphaned(String),

    /// Structural problem with a changeset folder.
    #[error("Invalid changeset '{name}': {reason}")]
    ChangesetValidation {
        /// Changeset name.
        name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A manifest lists a file that does not exist.
    #[error(
        "Manifest {} references missing file {}",
        .manifest.display(),
        .missing.display()
    )]
    ManifestReference {
        /// Path to the manifest.
        manifest: PathBuf,
        /// The path that could not be resolved.
        missing: PathBuf,
    },

    /// A manifest lists a file whose content no longer matches (strict mode).
    #[error(
        "Manifest {} expects {} to have checksum {expected}, found {actual}",
        .manifest.display(),
        .path.display()
    )]
    ManifestChecksumMismatch {
        /// Path to the manifest.
        manifest: PathBuf,
        /// Referenced file.
        path: PathBuf,
        /// Checksum listed in the manifest.
        expected: String,
        /// Checksum of the file on disk.
        actual: String,
    },

    /// A manifest could not be parsed.
    #[error("Invalid manifest {}: {reason}", .path.display())]
    Manifest {
        /// Path to the manifest.
        path: PathBuf,
        /// Parse failure.
        reason: String,
    },

    /// Invalid engine configuration or discovery rules.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl MigrateError {
    /// Create a database error.
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a changeset validation error.
    pub fn validation(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ChangesetValidation {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Stable machine-readable identifier for scripting.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Database(_) => "database",
            Self::Timeout(_) => "timeout",
            Self::NotBootstrapped => "not_bootstrapped",
            Self::VersionMismatch { .. } => "version_mismatch",
            Self::LockAcquire { .. } => "lock_acquire",
            Self::LockNotFound => "lock_not_found",
            Self::LockOwnership { .. } => "lock_ownership",
            Self::ChangesetAlreadyApplied { .. } => "changeset_already_applied",
            Self::ChangesetNotApplied(_) => "changeset_not_applied",
            Self::ChangesetNotFound(_) => "changeset_not_found",
            Self::ChangesetOrphaned(_) => "changeset_orphaned",
            Self::ChangesetValidation { .. } => "changeset_validation",
            Self::ManifestReference { .. } => "manifest_reference",
            Self::ManifestChecksumMismatch { .. } => "manifest_checksum_mismatch",
            Self::Manifest { .. } => "manifest",
            Self::Config(_) => "config",
        }
    }

    /// Contention that a caller may reasonably retry later.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::LockAcquire { .. } | Self::Timeout(_))
    }

    /// Raised before any file was executed.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::ChangesetValidation { .. }
                | Self::ManifestReference { .. }
                | Self::ManifestChecksumMismatch { .. }
                | Self::Manifest { .. }
        )
    }
}
