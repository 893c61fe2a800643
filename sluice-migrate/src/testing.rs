//! Scripted connection for unit tests.

use parking_lot::Mutex;

use crate::connection::{Connection, Row, SqlValue};
use crate::dialect::Dialect;
use crate::error::{MigrateError, MigrateResult};

/// Records every script and fails or stalls the ones containing a marker.
#[derive(Debug, Default)]
pub struct FakeConnection {
    scripts: Mutex<Vec<String>>,
    fail_marker: Option<String>,
    stall_marker: Option<String>,
    interrupts: Mutex<usize>,
}

impl FakeConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any script containing `marker`.
    pub fn failing_on(marker: &str) -> Self {
        Self {
            fail_marker: Some(marker.to_string()),
            ..Self::default()
        }
    }

    /// Never finish any script containing `marker`.
    pub fn stalling_on(marker: &str) -> Self {
        Self {
            stall_marker: Some(marker.to_string()),
            ..Self::default()
        }
    }

    pub fn interrupts(&self) -> usize {
        *self.interrupts.lock()
    }

    pub fn scripts(&self) -> Vec<String> {
        self.scripts.lock().clone()
    }
}

#[async_trait::async_trait]
impl Connection for FakeConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn execute(&self, _sql: &str, _params: &[SqlValue]) -> MigrateResult<u64> {
        Ok(0)
    }

    async fn query(&self, _sql: &str, _params: &[SqlValue]) -> MigrateResult<Vec<Row>> {
        Ok(Vec::new())
    }

    async fn execute_script(&self, sql: &str) -> MigrateResult<()> {
        self.scripts.lock().push(sql.to_string());
        if let Some(marker) = &self.stall_marker {
            if sql.contains(marker.as_str()) {
                std::future::pending::<()>().await;
            }
        }
        match &self.fail_marker {
            Some(marker) if sql.contains(marker.as_str()) => {
                Err(MigrateError::database(format!("syntax error near \"{}\"", marker)))
            }
            _ => Ok(()),
        }
    }

    fn interrupt(&self) {
        *self.interrupts.lock() += 1;
    }
}
