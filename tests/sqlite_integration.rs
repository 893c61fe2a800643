//! Integration tests for the facade crate over the bundled SQLite driver.
//!
//! These tests drive a whole deployment through `sluice` re-exports:
//! bootstrap, schema files, then changesets.

#![cfg(feature = "sqlite")]

use std::path::Path;
use std::sync::Arc;

use sluice::prelude::*;
use sluice::sqlite::{SqliteConfig, SqliteConnection};

async fn engine(root: &Path) -> Engine {
    let conn = SqliteConnection::open(SqliteConfig::file(root.join("app.db")))
        .await
        .expect("Failed to open database");
    Engine::new(Arc::new(conn), EngineConfig::new().project_root(root))
}

fn write(root: &Path, rel: &str, sql: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, sql).unwrap();
}

/// Test a full deployment from an empty database
#[tokio::test]
async fn test_deploy_schema_then_changesets() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "schema/001_users.sql", "CREATE TABLE users (id INTEGER PRIMARY KEY);");
    write(
        root,
        "changesets/20240301120000_seed/change/001.sql",
        "INSERT INTO users (id) VALUES (1);",
    );
    write(
        root,
        "changesets/20240301120000_seed/revert/001.sql",
        "DELETE FROM users WHERE id = 1;",
    );

    let engine = engine(root).await;
    engine.bootstrap().await.unwrap();

    let files = engine.discover(&Rules::new().include("schema")).await.unwrap();
    let batch = engine
        .run_files("deploy", &files, &engine.run_options())
        .await
        .unwrap();
    assert_eq!(batch.status, BatchStatus::Success);
    assert_eq!(batch.succeeded, 1);

    let result = engine
        .fast_forward("deploy", &engine.run_options())
        .await
        .unwrap();
    assert!(result.is_success());

    let status = engine.changeset_status().await.unwrap();
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].state, ChangesetState::Applied);
    assert!(matches!(engine.lock_status().await.unwrap(), LockStatus::Free));
}

/// Test that a second engine sees the first one's history
#[tokio::test]
async fn test_history_is_shared_between_engines() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "schema/views.sql", "CREATE VIEW one AS SELECT 1 AS n;");

    let first = engine(root).await;
    first.bootstrap().await.unwrap();
    let files = first.discover(&Rules::new().include("schema")).await.unwrap();
    first
        .run_files("runner-a", &files, &first.run_options())
        .await
        .unwrap();

    let second = engine(root).await;
    let files = second.discover(&Rules::new().include("schema")).await.unwrap();
    let batch = second
        .run_files("runner-b", &files, &second.run_options())
        .await
        .unwrap();
    assert_eq!(batch.skipped, 1);
    assert_eq!(batch.succeeded, 0);
}
