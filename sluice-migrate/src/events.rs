//! Engine events.
//!
//! The engine reports progress through an [`EventSink`] passed in by the
//! caller. Sinks decide what to do with it: log it, render it, collect it.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::changeset::Direction;
use crate::runner::BatchStatus;

/// Something observable that happened inside the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// The lock was acquired or renewed.
    LockAcquired {
        holder: String,
        expires_at: DateTime<Utc>,
        renewed: bool,
    },
    /// The lock was released by its holder.
    LockReleased { holder: Option<String> },
    /// Acquisition failed because someone else holds the lock.
    LockBlocked {
        actor: String,
        holder: String,
        held_since: DateTime<Utc>,
    },
    /// The lock was removed administratively.
    LockForceReleased {
        actor: String,
        previous_holder: Option<String>,
    },
    /// A file batch started.
    BatchStarted { operation_id: String, files: usize },
    /// A file is about to execute.
    FileStarted { operation_id: String, filepath: String },
    /// A file was skipped.
    FileSkipped {
        operation_id: String,
        filepath: String,
        reason: String,
    },
    /// A file was rendered to disk instead of executed.
    FileDryRun {
        operation_id: String,
        filepath: String,
        output_path: String,
    },
    /// A file finished executing.
    FileFinished {
        operation_id: String,
        filepath: String,
        success: bool,
        duration_ms: i64,
        error: Option<String>,
    },
    /// A file batch finished.
    BatchFinished {
        operation_id: String,
        status: BatchStatus,
        duration_ms: i64,
    },
    /// A changeset started moving.
    ChangesetStarted { name: String, direction: Direction },
    /// A changeset finished moving.
    ChangesetFinished {
        name: String,
        direction: Direction,
        status: BatchStatus,
    },
}

/// Receiver for engine events.
pub trait EventSink: Send + Sync {
    /// Handle one event.
    fn emit(&self, event: &Event);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: &Event) {}
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &Event) {
        match event {
            Event::LockAcquired {
                holder,
                expires_at,
                renewed,
            } => tracing::info!(
                holder = %holder,
                expires_at = %expires_at,
                renewed,
                "lock acquired"
            ),
            Event::LockReleased { holder } => tracing::info!(holder = ?holder, "lock released"),
            Event::LockBlocked {
                actor,
                holder,
                held_since,
            } => tracing::warn!(
                actor = %actor,
                holder = %holder,
                held_since = %held_since,
                "lock blocked"
            ),
            Event::LockForceReleased {
                actor,
                previous_holder,
            } => tracing::warn!(
                actor = %actor,
                previous_holder = ?previous_holder,
                "lock force-released"
            ),
            Event::BatchStarted { operation_id, files } => {
                tracing::info!(operation_id = %operation_id, files, "batch started")
            }
            Event::FileStarted {
                operation_id,
                filepath,
            } => tracing::debug!(
                operation_id = %operation_id,
                filepath = %filepath,
                "file started"
            ),
            Event::FileSkipped {
                filepath, reason, ..
            } => tracing::info!(filepath = %filepath, reason = %reason, "file skipped"),
            Event::FileDryRun {
                filepath,
                output_path,
                ..
            } => tracing::info!(
                filepath = %filepath,
                output = %output_path,
                "file rendered (dry run)"
            ),
            Event::FileFinished {
                filepath,
                success: true,
                duration_ms,
                ..
            } => tracing::info!(filepath = %filepath, duration_ms, "file executed"),
            Event::FileFinished {
                filepath,
                duration_ms,
                error,
                ..
            } => tracing::warn!(filepath = %filepath, duration_ms, error = ?error, "file failed"),
            Event::BatchFinished {
                operation_id,
                status,
                duration_ms,
            } => tracing::info!(
                operation_id = %operation_id,
                status = %status,
                duration_ms,
                "batch finished"
            ),
            Event::ChangesetStarted { name, direction } => {
                tracing::info!(changeset = %name, direction = %direction, "changeset started")
            }
            Event::ChangesetFinished {
                name,
                direction,
                status,
            } => tracing::info!(
                changeset = %name,
                direction = %direction,
                status = %status,
                "changeset finished"
            ),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<Event>>,
}

impl CollectingSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events seen so far.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Drain the collected events.
    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: &Event) {
        self.events.lock().push(event.clone());
    }
}
