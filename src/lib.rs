//! # Sluice
//!
//! Database change execution for teams that keep their schema as SQL files.
//!
//! Sluice provides:
//! - A cross-process lock stored in the target database
//! - Checksum-tracked SQL files that only re-run when they change
//! - Changesets with change and revert sides, applied in name order
//! - An execution history kept next to the data it describes
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sluice::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), sluice::MigrateError> {
//!     let conn = sluice::sqlite::SqliteConnection::connect("sqlite://app.db").await?;
//!     let engine = Engine::new(Arc::new(conn), EngineConfig::new().project_root("."));
//!
//!     engine.bootstrap().await?;
//!
//!     let files = engine.discover(&Rules::new().include("schema")).await?;
//!     let batch = engine.run_files("deploy", &files, &engine.run_options()).await?;
//!     println!("{}", batch.summary());
//!
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// The change execution engine.
pub mod migrate {
    pub use sluice_migrate::*;
}

/// SQLite driver.
#[cfg(feature = "sqlite")]
#[cfg_attr(docsrs, doc(cfg(feature = "sqlite")))]
pub mod sqlite {
    pub use sluice_sqlite::*;
}

/// PostgreSQL driver.
#[cfg(feature = "postgres")]
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
pub mod postgres {
    pub use sluice_postgres::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use sluice_migrate::{
        BatchResult, BatchStatus, ChangesetState, Connection, Dialect, Engine, EngineConfig,
        LockStatus, MigrateError, MigrateResult, Rules, RunOptions,
    };
}

// Re-export key types at the crate root
pub use sluice_migrate::{Engine, EngineConfig, MigrateError, MigrateResult};
