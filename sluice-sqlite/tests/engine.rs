//! End-to-end engine behavior against a SQLite file.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use sluice_migrate::{
    BatchStatus, ChangesetState, Connection, Engine, EngineConfig, ExecutionStatus, MigrateError,
    Rules, SqlValue,
};
use sluice_sqlite::{SqliteConfig, SqliteConnection};
use tempfile::TempDir;

struct Project {
    dir: TempDir,
}

impl Project {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn write(&self, rel: &str, contents: &str) {
        let path = self.root().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    async fn connect(&self) -> Arc<SqliteConnection> {
        let config = SqliteConfig::file(self.root().join("app.db"));
        Arc::new(SqliteConnection::open(config).await.unwrap())
    }

    async fn engine(&self) -> Engine {
        self.engine_with(EngineConfig::new()).await
    }

    async fn engine_with(&self, config: EngineConfig) -> Engine {
        let engine = Engine::new(self.connect().await, config.project_root(self.root()));
        engine.bootstrap().await.unwrap();
        engine
    }
}

async fn count(conn: &dyn Connection, table: &str) -> i64 {
    let rows = conn
        .query(&format!("SELECT COUNT(*) AS n FROM {}", table), &[])
        .await
        .unwrap();
    rows[0].integer("n").unwrap()
}

#[tokio::test]
async fn test_bootstrap_is_idempotent() {
    let project = Project::new();
    let engine = Engine::new(
        project.connect().await,
        EngineConfig::new().project_root(project.root()),
    );

    assert!(!engine.tables_exist().await.unwrap());
    assert!(matches!(
        engine.lock_status().await,
        Err(MigrateError::NotBootstrapped)
    ));

    engine.bootstrap().await.unwrap();
    engine.bootstrap().await.unwrap();
    assert!(engine.tables_exist().await.unwrap());
    assert!(engine.lock_status().await.unwrap().is_free());
}

#[tokio::test]
async fn test_unchanged_files_are_skipped() {
    let project = Project::new();
    project.write("schema/001_users.sql", "CREATE TABLE users (id INTEGER);");
    project.write("schema/002_posts.sql", "CREATE TABLE posts (id INTEGER);");
    let engine = project.engine().await;

    let files = engine.discover(&Rules::new().include("schema")).await.unwrap();
    let options = engine.run_options();

    let first = engine.run_files("alice", &files, &options).await.unwrap();
    assert_eq!(first.status, BatchStatus::Success);
    assert_eq!(first.succeeded, 2);

    let second = engine.run_files("alice", &files, &options).await.unwrap();
    assert_eq!(second.status, BatchStatus::Success);
    assert_eq!(second.succeeded, 0);
    assert_eq!(second.skipped, 2);

    let records = engine.operation(&second.operation_id).await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.status == ExecutionStatus::Skipped));
    assert!(engine.lock_status().await.unwrap().is_free());
}

#[tokio::test]
async fn test_edited_file_runs_again() {
    let project = Project::new();
    project.write("schema/views.sql", "CREATE VIEW v AS SELECT 1 AS n;");
    let engine = project.engine().await;
    let files = engine.discover(&Rules::new().include("schema")).await.unwrap();
    let options = engine.run_options();

    engine.run_files("alice", &files, &options).await.unwrap();

    project.write(
        "schema/views.sql",
        "DROP VIEW IF EXISTS v; CREATE VIEW v AS SELECT 2 AS n;",
    );
    let batch = engine.run_files("alice", &files, &options).await.unwrap();
    assert_eq!(batch.succeeded, 1);
    assert_eq!(batch.skipped, 0);

    let conn = project.connect().await;
    let rows = conn.query("SELECT n FROM v", &[]).await.unwrap();
    assert_eq!(rows[0].integer("n").unwrap(), 2);
}

#[tokio::test]
async fn test_lock_excludes_other_actors() {
    let project = Project::new();
    project.write("schema/a.sql", "CREATE TABLE a (id INTEGER);");
    let alice = project.engine().await;
    let bob = Engine::new(
        project.connect().await,
        EngineConfig::new().project_root(project.root()),
    );

    let lock = alice.acquire_lock("alice").await.unwrap();

    let err = bob.acquire_lock("bob").await.unwrap_err();
    match err {
        MigrateError::LockAcquire { holder, .. } => assert_eq!(holder, "alice"),
        other => panic!("expected LockAcquire, got {:?}", other),
    }

    let files = bob.discover(&Rules::new().include("schema")).await.unwrap();
    let err = bob
        .run_files("bob", &files, &bob.run_options())
        .await
        .unwrap_err();
    assert!(err.is_recoverable());

    assert!(matches!(
        bob.release_lock("not-the-token").await,
        Err(MigrateError::LockOwnership { .. })
    ));

    alice.release_lock(&lock.token).await.unwrap();
    let taken = bob.acquire_lock("bob").await.unwrap();
    assert_eq!(taken.holder, "bob");
}

#[tokio::test]
async fn test_concurrent_acquires_have_one_winner() {
    let project = Project::new();
    project.engine().await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let engine = Engine::new(
            project.connect().await,
            EngineConfig::new().project_root(project.root()),
        );
        handles.push(tokio::spawn(async move {
            engine.acquire_lock(&format!("runner-{}", i)).await
        }));
    }

    let mut winners = Vec::new();
    let mut blocked = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(lock) => winners.push(lock.holder),
            Err(MigrateError::LockAcquire { holder, .. }) => blocked.push(holder),
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    assert_eq!(winners.len(), 1);
    assert_eq!(blocked.len(), 7);
    assert!(blocked.iter().all(|holder| *holder == winners[0]));
}

#[tokio::test]
async fn test_own_expired_lock_is_released_after_run() {
    let project = Project::new();
    project.write("schema/a.sql", "CREATE TABLE a (id INTEGER);");
    let crashed = project
        .engine_with(EngineConfig::new().lock_ttl(Duration::from_millis(200)))
        .await;
    let stale = crashed.acquire_lock("ci").await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    let engine = project.engine().await;
    let files = engine.discover(&Rules::new().include("schema")).await.unwrap();
    let batch = engine
        .run_files("ci", &files, &engine.run_options())
        .await
        .unwrap();
    assert_eq!(batch.status, BatchStatus::Success);
    assert!(engine.lock_status().await.unwrap().is_free());

    let fresh = engine.acquire_lock("bob").await.unwrap();
    assert_eq!(fresh.holder, "bob");
    assert!(fresh.acquired_at > stale.acquired_at);
}

#[tokio::test]
async fn test_reacquire_renews_same_lock() {
    let project = Project::new();
    let engine = project.engine().await;

    let first = engine.acquire_lock("alice").await.unwrap();
    let second = engine.acquire_lock("alice").await.unwrap();

    assert_eq!(first.token, second.token);
    assert!(second.expires_at >= first.expires_at);
}

#[tokio::test]
async fn test_outer_hold_survives_operation() {
    let project = Project::new();
    project.write("schema/a.sql", "CREATE TABLE a (id INTEGER);");
    let engine = project.engine().await;

    let lock = engine.acquire_lock("alice").await.unwrap();
    let files = engine.discover(&Rules::new().include("schema")).await.unwrap();
    engine
        .run_files("alice", &files, &engine.run_options())
        .await
        .unwrap();

    assert!(!engine.lock_status().await.unwrap().is_free());
    engine.release_lock(&lock.token).await.unwrap();
    assert!(engine.lock_status().await.unwrap().is_free());
}

#[tokio::test]
async fn test_expired_lock_is_taken_over() {
    let project = Project::new();
    let config = EngineConfig::new().lock_ttl(Duration::from_millis(300));
    let alice = project.engine_with(config.clone()).await;
    let bob = project.engine_with(config).await;

    let stale = alice.acquire_lock("alice").await.unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert!(bob.lock_status().await.unwrap().is_free());
    let fresh = bob.acquire_lock("bob").await.unwrap();
    assert_eq!(fresh.holder, "bob");
    assert_ne!(fresh.token, stale.token);

    assert!(alice.release_lock(&stale.token).await.is_err());
}

#[tokio::test]
async fn test_apply_revert_round_trip() {
    let project = Project::new();
    project.write(
        "changesets/20240301120000_users/change/001.sql",
        "CREATE TABLE users (id INTEGER);",
    );
    project.write(
        "changesets/20240301120000_users/revert/001.sql",
        "DROP TABLE users;",
    );
    let engine = project.engine().await;
    let options = engine.run_options();
    let name = "20240301120000_users";

    let applied = engine.apply("alice", name, &options).await.unwrap();
    assert!(applied.is_success());
    let record = engine.store().changeset(name).await.unwrap().unwrap();
    assert!(record.is_applied());
    assert_eq!(record.applied_by.as_deref(), Some("alice"));

    assert!(matches!(
        engine.apply("alice", name, &options).await,
        Err(MigrateError::ChangesetAlreadyApplied { .. })
    ));

    engine.revert("alice", name, &options).await.unwrap();
    let reverted = engine.store().changeset(name).await.unwrap().unwrap();
    let reverted_at = reverted.reverted_at.unwrap();
    assert!(reverted_at > reverted.applied_at);

    let status = engine.changeset_status().await.unwrap();
    assert_eq!(status[0].state, ChangesetState::Reverted);

    engine.apply("alice", name, &options).await.unwrap();
    let reapplied = engine.store().changeset(name).await.unwrap().unwrap();
    assert!(reapplied.is_applied());
    assert!(reapplied.applied_at > reverted_at);

    let conn = project.connect().await;
    assert_eq!(count(conn.as_ref(), "users").await, 0);
}

#[tokio::test]
async fn test_orphaned_changeset_cannot_revert() {
    let project = Project::new();
    project.write("changesets/20240301120000_tmp/change/001.sql", "CREATE TABLE tmp (id INTEGER);");
    project.write("changesets/20240301120000_tmp/revert/001.sql", "DROP TABLE tmp;");
    let engine = project.engine().await;
    let options = engine.run_options();

    engine.apply("alice", "20240301120000_tmp", &options).await.unwrap();
    std::fs::remove_dir_all(project.root().join("changesets/20240301120000_tmp")).unwrap();

    let status = engine.changeset_status().await.unwrap();
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].state, ChangesetState::Orphaned);

    assert!(matches!(
        engine.revert("alice", "20240301120000_tmp", &options).await,
        Err(MigrateError::ChangesetOrphaned(_))
    ));
}

#[tokio::test]
async fn test_manifest_failure_writes_nothing() {
    let project = Project::new();
    project.write("changesets/20240301120000_bad/change/001.sql", "CREATE TABLE x (id INTEGER);");
    project.write(
        "changesets/20240301120000_bad/manifest.toml",
        "[[include]]\npath = \"schema/missing.sql\"\n",
    );
    let engine = project.engine().await;

    let err = engine
        .apply("alice", "20240301120000_bad", &engine.run_options())
        .await
        .unwrap_err();
    assert!(matches!(err, MigrateError::ManifestReference { .. }));
    assert!(err.is_validation());

    let conn = project.connect().await;
    assert_eq!(count(conn.as_ref(), "sluice_executions").await, 0);
    assert_eq!(count(conn.as_ref(), "sluice_changesets").await, 0);
    assert!(engine.lock_status().await.unwrap().is_free());
}

#[tokio::test]
async fn test_failing_file_gives_partial_batch() {
    let project = Project::new();
    project.write("schema/001_ok.sql", "CREATE TABLE ok (id INTEGER);");
    project.write("schema/002_broken.sql", "CREATE TABLE (;");
    project.write("schema/003_after.sql", "CREATE TABLE after (id INTEGER);");
    let engine = project
        .engine_with(EngineConfig::new().abort_on_error(false))
        .await;

    let files = engine.discover(&Rules::new().include("schema")).await.unwrap();
    let batch = engine
        .run_files("alice", &files, &engine.run_options())
        .await
        .unwrap();

    assert_eq!(batch.status, BatchStatus::Partial);
    assert_eq!(batch.succeeded, 2);
    assert_eq!(batch.failed, 1);

    let records = engine.operation(&batch.operation_id).await.unwrap();
    let failed: Vec<_> = records
        .iter()
        .filter(|r| r.status == ExecutionStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].filepath, "schema/002_broken.sql");
    assert!(failed[0].error_message.is_some());
}

#[tokio::test]
async fn test_abort_on_error_stops_batch() {
    let project = Project::new();
    project.write("schema/001_broken.sql", "CREATE TABLE (;");
    project.write("schema/002_after.sql", "CREATE TABLE after (id INTEGER);");
    let engine = project.engine().await;

    let files = engine.discover(&Rules::new().include("schema")).await.unwrap();
    let batch = engine
        .run_files("alice", &files, &engine.run_options())
        .await
        .unwrap();

    assert_eq!(batch.status, BatchStatus::Failed);
    assert_eq!(batch.file_results.len(), 1);

    let conn = project.connect().await;
    let rows = conn
        .query(
            "SELECT COUNT(*) AS n FROM sqlite_master WHERE name = ?1",
            &[SqlValue::from("after")],
        )
        .await
        .unwrap();
    assert_eq!(rows[0].integer("n").unwrap(), 0);
    assert!(engine.lock_status().await.unwrap().is_free());
}

#[tokio::test]
async fn test_history_lists_operations() {
    let project = Project::new();
    project.write("schema/a.sql", "CREATE TABLE a (id INTEGER);");
    let engine = project.engine().await;
    let files = engine.discover(&Rules::new().include("schema")).await.unwrap();

    engine.run_files("alice", &files, &engine.run_options()).await.unwrap();
    engine.run_files("bob", &files, &engine.run_options()).await.unwrap();

    let ops = engine.recent_operations(10).await.unwrap();
    assert_eq!(ops.len(), 2);
    assert_eq!(ops[0].executed_by, "bob");
    assert_eq!(ops[0].skipped, 1);
    assert_eq!(ops[1].succeeded, 1);
}
