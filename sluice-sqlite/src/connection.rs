//! SQLite connection wrapper.

use async_trait::async_trait;
use rusqlite::params_from_iter;
use rusqlite::types::{Value, ValueRef};
use sluice_migrate::{Connection, Dialect, MigrateResult, Row, SqlValue};
use tracing::{debug, info};

use crate::config::SqliteConfig;
use crate::error::{SqliteError, SqliteResult};

/// One open SQLite connection.
///
/// Calls are serialized onto the connection's background thread by
/// `tokio-rusqlite`. Open one `SqliteConnection` per process; two processes
/// sharing a file coordinate through the engine's lock table.
pub struct SqliteConnection {
    conn: tokio_rusqlite::Connection,
    interrupt: rusqlite::InterruptHandle,
    config: SqliteConfig,
}

impl SqliteConnection {
    /// Open a connection and apply the configured pragmas.
    pub async fn open(config: SqliteConfig) -> SqliteResult<Self> {
        let conn = match &config.path {
            crate::DatabasePath::Memory => tokio_rusqlite::Connection::open_in_memory().await?,
            crate::DatabasePath::File(path) => tokio_rusqlite::Connection::open(path)
                .await
                .map_err(|e| {
                    SqliteError::connection(format!("cannot open {}: {}", path.display(), e))
                })?,
        };

        let init = config.init_sql();
        let interrupt = conn
            .call(move |conn| {
                conn.execute_batch(&init)?;
                Ok(conn.get_interrupt_handle())
            })
            .await?;

        info!(path = %config.path.display(), "Opened SQLite database");
        Ok(Self {
            conn,
            interrupt,
            config,
        })
    }

    /// Parse `url` and open it.
    pub async fn connect(url: &str) -> SqliteResult<Self> {
        Self::open(SqliteConfig::from_url(url)?).await
    }

    /// The settings this connection was opened with.
    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }
}

fn to_sqlite(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::Integer(*i),
        SqlValue::Text(s) => Value::Text(s.clone()),
    }
}

fn from_sqlite(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Integer(i),
        ValueRef::Real(f) => SqlValue::Text(f.to_string()),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            SqlValue::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

#[async_trait]
impl Connection for SqliteConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> MigrateResult<u64> {
        let sql = sql.to_string();
        let params: Vec<Value> = params.iter().map(to_sqlite).collect();

        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(&sql, params_from_iter(params.iter()))?;
                Ok(changed)
            })
            .await
            .map_err(SqliteError::from)?;

        Ok(changed as u64)
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> MigrateResult<Vec<Row>> {
        let sql = sql.to_string();
        let params: Vec<Value> = params.iter().map(to_sqlite).collect();

        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let columns: Vec<String> = stmt
                    .column_names()
                    .iter()
                    .map(|s| s.to_string())
                    .collect();

                let mut rows = stmt.query(params_from_iter(params.iter()))?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    let mut converted = Row::new();
                    for (i, column) in columns.iter().enumerate() {
                        converted.push(column.clone(), from_sqlite(row.get_ref(i)?));
                    }
                    out.push(converted);
                }
                Ok(out)
            })
            .await
            .map_err(SqliteError::from)?;

        Ok(rows)
    }

    async fn execute_script(&self, sql: &str) -> MigrateResult<()> {
        let sql = sql.to_string();
        debug!(bytes = sql.len(), "Executing script");

        self.conn
            .call(move |conn| {
                conn.execute_batch(&sql)?;
                Ok(())
            })
            .await
            .map_err(SqliteError::from)?;

        Ok(())
    }

    fn interrupt(&self) {
        debug!("Interrupting running statement");
        self.interrupt.interrupt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_execute_and_query() {
        let conn = SqliteConnection::open(SqliteConfig::memory()).await.unwrap();
        conn.execute_script("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, score REAL);")
            .await
            .unwrap();

        let changed = conn
            .execute(
                "INSERT INTO t (id, name, score) VALUES (?1, ?2, 1.5)",
                &[SqlValue::Integer(7), SqlValue::Text("alice".into())],
            )
            .await
            .unwrap();
        assert_eq!(changed, 1);

        conn.execute(
            "INSERT INTO t (id, name) VALUES (?1, ?2)",
            &[SqlValue::Integer(8), SqlValue::Null],
        )
        .await
        .unwrap();

        let rows = conn
            .query("SELECT id, name, score FROM t ORDER BY id", &[])
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].integer("id").unwrap(), 7);
        assert_eq!(rows[0].text("name").unwrap(), "alice");
        assert_eq!(rows[0].text("score").unwrap(), "1.5");
        assert_eq!(rows[1].opt_text("name").unwrap(), None);
    }

    #[tokio::test]
    async fn test_interrupt_aborts_running_script() {
        let conn = SqliteConnection::open(SqliteConfig::memory()).await.unwrap();
        let conn = std::sync::Arc::new(conn);

        let running = conn.clone();
        let script = tokio::spawn(async move {
            running
                .execute_script(
                    "CREATE TABLE n AS WITH RECURSIVE c(x) AS \
                     (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 10000000000) \
                     SELECT count(*) AS total FROM c;",
                )
                .await
        });

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        conn.interrupt();

        assert!(script.await.unwrap().is_err());
        let rows = conn.query("SELECT 1 AS one", &[]).await.unwrap();
        assert_eq!(rows[0].integer("one").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reused_numbered_placeholder() {
        let conn = SqliteConnection::open(SqliteConfig::memory()).await.unwrap();
        let rows = conn
            .query("SELECT ?1 + ?1 AS n", &[SqlValue::Integer(21)])
            .await
            .unwrap();
        assert_eq!(rows[0].integer("n").unwrap(), 42);
    }

    #[tokio::test]
    async fn test_script_error_is_database_error() {
        let conn = SqliteConnection::open(SqliteConfig::memory()).await.unwrap();
        let err = conn.execute_script("CREATE TABLE (;").await.unwrap_err();
        assert_eq!(err.kind(), "database");
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.db");

        let conn = SqliteConnection::open(SqliteConfig::file(&path)).await.unwrap();
        conn.execute_script("CREATE TABLE t (id INTEGER); INSERT INTO t VALUES (1);")
            .await
            .unwrap();
        drop(conn);

        let conn = SqliteConnection::connect(&format!("sqlite://{}", path.display()))
            .await
            .unwrap();
        let rows = conn.query("SELECT COUNT(*) AS n FROM t", &[]).await.unwrap();
        assert_eq!(rows[0].integer("n").unwrap(), 1);
    }
}
