//! The connection boundary.
//!
//! Connection establishment belongs to the driver crates; the engine only
//! needs an open, dialect-tagged handle that can run parameterized statements,
//! return rows, and execute multi-statement scripts.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dialect::Dialect;
use crate::error::{MigrateError, MigrateResult};

/// A bound parameter or a column value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    /// SQL NULL (always bound as a text-typed null).
    Null,
    /// 64-bit integer.
    Integer(i64),
    /// Text.
    Text(String),
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

/// A result row with named columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    columns: Vec<(String, SqlValue)>,
}

impl Row {
    /// Create an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column.
    pub fn push(&mut self, name: impl Into<String>, value: SqlValue) {
        self.columns.push((name.into(), value));
    }

    /// Builder form of [`Row::push`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.push(name, value.into());
        self
    }

    /// Look up a column, ignoring ASCII case.
    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(column, _)| column.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    fn require(&self, name: &str) -> MigrateResult<&SqlValue> {
        self.get(name)
            .ok_or_else(|| MigrateError::database(format!("missing column '{}'", name)))
    }

    /// Non-null text column.
    pub fn text(&self, name: &str) -> MigrateResult<String> {
        self.opt_text(name)?
            .ok_or_else(|| MigrateError::database(format!("column '{}' is NULL", name)))
    }

    /// Nullable text column.
    pub fn opt_text(&self, name: &str) -> MigrateResult<Option<String>> {
        match self.require(name)? {
            SqlValue::Null => Ok(None),
            SqlValue::Text(s) => Ok(Some(s.clone())),
            SqlValue::Integer(i) => Ok(Some(i.to_string())),
        }
    }

    /// Non-null integer column.
    pub fn integer(&self, name: &str) -> MigrateResult<i64> {
        self.opt_integer(name)?
            .ok_or_else(|| MigrateError::database(format!("column '{}' is NULL", name)))
    }

    /// Nullable integer column. Numeric text is accepted.
    pub fn opt_integer(&self, name: &str) -> MigrateResult<Option<i64>> {
        match self.require(name)? {
            SqlValue::Null => Ok(None),
            SqlValue::Integer(i) => Ok(Some(*i)),
            SqlValue::Text(s) => s.trim().parse::<i64>().map(Some).map_err(|_| {
                MigrateError::database(format!("column '{}' is not an integer: {}", name, s))
            }),
        }
    }
}

/// An open connection to the target database.
#[async_trait::async_trait]
pub trait Connection: Send + Sync {
    /// Dialect spoken by this connection.
    fn dialect(&self) -> Dialect;

    /// Execute one statement and return the number of affected rows.
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> MigrateResult<u64>;

    /// Run one query and return its rows.
    async fn query(&self, sql: &str, params: &[SqlValue]) -> MigrateResult<Vec<Row>>;

    /// Execute a script that may contain several statements.
    async fn execute_script(&self, sql: &str) -> MigrateResult<()>;

    /// Abort the statement currently running on the server, if any.
    ///
    /// Called after the future driving that statement was dropped, so the
    /// connection becomes usable again. Drivers without cancellation keep
    /// the default, which does nothing.
    fn interrupt(&self) {}
}

#[async_trait::async_trait]
impl<C: Connection + ?Sized> Connection for Arc<C> {
    fn dialect(&self) -> Dialect {
        (**self).dialect()
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> MigrateResult<u64> {
        (**self).execute(sql, params).await
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> MigrateResult<Vec<Row>> {
        (**self).query(sql, params).await
    }

    async fn execute_script(&self, sql: &str) -> MigrateResult<()> {
        (**self).execute_script(sql).await
    }

    fn interrupt(&self) {
        (**self).interrupt()
    }
}

#[async_trait::async_trait]
impl<C: Connection + ?Sized> Connection for &C {
    fn dialect(&self) -> Dialect {
        (**self).dialect()
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> MigrateResult<u64> {
        (**self).execute(sql, params).await
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> MigrateResult<Vec<Row>> {
        (**self).query(sql, params).await
    }

    async fn execute_script(&self, sql: &str) -> MigrateResult<()> {
        (**self).execute_script(sql).await
    }

    fn interrupt(&self) {
        (**self).interrupt()
    }
}

/// Bound a database call by `limit`, when one is set.
pub async fn with_timeout<T, F>(limit: Option<Duration>, call: F) -> MigrateResult<T>
where
    F: Future<Output = MigrateResult<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| MigrateError::Timeout(limit))?,
        None => call.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_getters() {
        let row = Row::new()
            .with("Holder", "ops@bastion")
            .with("expires_at", 1_700_000_000_000_i64)
            .with("note", None::<String>)
            .with("count", "42");

        assert_eq!(row.text("holder").unwrap(), "ops@bastion");
        assert_eq!(row.integer("EXPIRES_AT").unwrap(), 1_700_000_000_000);
        assert_eq!(row.opt_text("note").unwrap(), None);
        assert_eq!(row.integer("count").unwrap(), 42);
        assert!(row.text("note").is_err());
        assert!(row.integer("missing").is_err());
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result: MigrateResult<()> = with_timeout(Some(Duration::from_millis(10)), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(MigrateError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_with_timeout_passes_through() {
        let value = with_timeout(None, async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }
}
