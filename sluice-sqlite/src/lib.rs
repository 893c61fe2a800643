//! SQLite connection for Sluice.
//!
//! Wraps a single `tokio-rusqlite` connection and exposes it through the
//! [`sluice_migrate::Connection`] trait, so the engine can keep its tracking
//! tables and run change scripts against a SQLite file.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sluice_migrate::{Engine, EngineConfig};
//! use sluice_sqlite::SqliteConnection;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let conn = SqliteConnection::connect("sqlite://./app.db").await?;
//!     let engine = Engine::new(Arc::new(conn), EngineConfig::new());
//!     engine.bootstrap().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;

pub use config::{DatabasePath, JournalMode, SqliteConfig, SynchronousMode};
pub use connection::SqliteConnection;
pub use error::{SqliteError, SqliteResult};
