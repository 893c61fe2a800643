//! # sluice-migrate
//!
//! Change execution engine for Sluice.
//!
//! This crate provides functionality for:
//! - A cross-process lock stored in the target database, with TTL expiry
//! - Running ordered SQL files with checksum-based skip decisions
//! - Applying and reverting changesets, with manifest and orphan checks
//! - Auditable execution history kept inside the target database
//! - Tracking-table SQL for SQLite, PostgreSQL, MySQL and SQL Server
//!
//! ## Architecture
//!
//! Every mutating call acquires the lock, does its work, and releases the
//! lock on the way out. The changeset engine drives the file runner; both
//! write to the history store, which lives in the target database.
//!
//! ```text
//! ┌──────────────┐     ┌────────────────┐     ┌─────────────┐
//! │    Engine    │────▶│  Lock Manager  │────▶│             │
//! └──────────────┘     └────────────────┘     │             │
//!        │                                    │   History   │
//!        ▼                                    │    Store    │
//! ┌──────────────┐     ┌────────────────┐     │  (tracking  │
//! │  Changesets  │────▶│  File Runner   │────▶│   tables)   │
//! └──────────────┘     └────────────────┘     └─────────────┘
//!                              │
//!                              ▼
//!                      ┌────────────────┐
//!                      │   Connection   │
//!                      └────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sluice_migrate::{Engine, EngineConfig, Rules};
//!
//! async fn deploy(
//!     conn: Arc<dyn sluice_migrate::Connection>,
//! ) -> sluice_migrate::MigrateResult<()> {
//!     let engine = Engine::new(conn, EngineConfig::new().project_root("."));
//!
//!     // Creates the tracking tables on first use
//!     engine.bootstrap().await?;
//!
//!     // Run every schema file that changed since the last run
//!     let files = engine.discover(&Rules::new().include("schema")).await?;
//!     let batch = engine
//!         .run_files("ci@runner-7", &files, &engine.run_options())
//!         .await?;
//!     println!("{}", batch.summary());
//!
//!     // Apply every pending changeset
//!     let result = engine.fast_forward("ci@runner-7", &engine.run_options()).await?;
//!     println!("{}", result.summary());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Changesets
//!
//! ```text
//! changesets/
//! ├── 20240301120000_add_users/
//! │   ├── change/001.sql
//! │   ├── revert/001.sql
//! │   └── manifest.toml
//! └── 20240315093000_add_posts/
//!     └── change/001.sql
//! ```
//!
//! A manifest lists the schema files a changeset depends on:
//!
//! ```toml
//! [[include]]
//! path = "schema/tables/users.sql"
//! checksum = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
//! ```

pub mod changeset;
pub mod checksum;
pub mod connection;
pub mod dialect;
pub mod discover;
pub mod engine;
pub mod error;
pub mod events;
pub mod history;
pub mod lock;
pub mod render;
pub mod runner;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports
pub use changeset::{
    BatchChangeResult, ChangeResult, ChangesetEngine, ChangesetState, ChangesetStatus, Direction,
    Manifest, ManifestEntry, scaffold,
};
pub use checksum::{checksum, path_key, sort_keys};
pub use connection::{Connection, Row, SqlValue};
pub use dialect::{Dialect, DialectSql};
pub use discover::{Candidate, Rules, discover};
pub use engine::{Engine, EngineConfig, VERSION};
pub use error::{MigrateError, MigrateResult};
pub use events::{CollectingSink, Event, EventSink, NoopSink, TracingSink};
pub use history::{
    ChangesetRecord, ExecutionStatus, FileExecutionRecord, HistoryStore, MemoryHistoryStore,
    OperationSummary, SqlHistoryStore,
};
pub use lock::{Lock, LockManager, LockStatus};
pub use render::{PlainRenderer, RenderContext, Renderer};
pub use runner::{BatchResult, BatchStatus, FileOutcome, FileResult, FileRunner, RunOptions};
