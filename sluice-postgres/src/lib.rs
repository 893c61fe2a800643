//! PostgreSQL connection for Sluice.
//!
//! Opens a single `tokio-postgres` client and exposes it through the
//! [`sluice_migrate::Connection`] trait.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sluice_migrate::{Engine, EngineConfig};
//! use sluice_postgres::PgConnection;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let conn = PgConnection::connect("postgresql://deploy@localhost/app").await?;
//!     let engine = Engine::new(Arc::new(conn), EngineConfig::new());
//!     engine.bootstrap().await?;
//!     Ok(())
//! }
//! ```
//!
//! Set `SLUICE_TEST_POSTGRES_URL` to run the integration tests against a
//! live server.

pub mod config;
pub mod connection;
pub mod error;

pub use config::{PgConfig, SslMode};
pub use connection::PgConnection;
pub use error::{PgError, PgResult};
