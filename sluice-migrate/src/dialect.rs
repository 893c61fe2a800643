//! Per-dialect SQL for the tracking tables and the lock.
//!
//! Escaping, catalog queries, insert-if-absent and clock expressions are
//! genuinely different per database, so each dialect gets its own strategy.
//! Plain CRUD statements are written once as templates with `:name`
//! parameters and a `{now}` clock marker, then bound through [`bind`].

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::connection::SqlValue;
use crate::error::{MigrateError, MigrateResult};

/// Table holding the bootstrap version row.
pub const VERSION_TABLE: &str = "sluice_version";
/// Table holding per-file execution records.
pub const EXECUTIONS_TABLE: &str = "sluice_executions";
/// Table holding the singleton lock row.
pub const LOCK_TABLE: &str = "sluice_lock";
/// Table holding per-changeset records.
pub const CHANGESETS_TABLE: &str = "sluice_changesets";

/// All tracking tables, in creation order.
pub const TRACKING_TABLES: [&str; 4] =
    [VERSION_TABLE, EXECUTIONS_TABLE, LOCK_TABLE, CHANGESETS_TABLE];

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// SQLite.
    Sqlite,
    /// PostgreSQL.
    Postgres,
    /// MySQL / MariaDB.
    Mysql,
    /// Microsoft SQL Server.
    Mssql,
}

impl Dialect {
    /// The SQL strategy for this dialect.
    pub fn sql(self) -> &'static dyn DialectSql {
        match self {
            Self::Sqlite => &SqliteDialect,
            Self::Postgres => &PostgresDialect,
            Self::Mysql => &MySqlDialect,
            Self::Mssql => &MssqlDialect,
        }
    }

    /// Canonical provider name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
            Self::Mssql => "mssql",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "mysql" | "mariadb" => Ok(Self::Mysql),
            "mssql" | "sqlserver" | "tsql" => Ok(Self::Mssql),
            other => Err(MigrateError::config(format!("unknown dialect '{}'", other))),
        }
    }
}

/// Dialect-specific SQL generation.
pub trait DialectSql: Send + Sync {
    /// The dialect this strategy generates for.
    fn dialect(&self) -> Dialect;

    /// Placeholder for the `n`th (1-based) parameter.
    fn placeholder(&self, n: usize) -> String;

    /// Whether a placeholder can be referenced more than once.
    fn numbered_placeholders(&self) -> bool {
        true
    }

    /// Quote an identifier.
    fn quote_ident(&self, ident: &str) -> String;

    /// Expression evaluating to the server clock in epoch milliseconds.
    fn now_millis(&self) -> &'static str;

    /// Idempotent DDL for every tracking table.
    fn bootstrap_sql(&self) -> String;

    /// Query returning one row with column `n`: how many tracking tables exist.
    fn tables_exist_sql(&self) -> String;

    /// Insert the lock row unless one exists. Parameters: holder, token, ttl_ms.
    fn insert_lock_sql(&self) -> String;

    /// Limit a `SELECT` to `n` rows.
    fn limit(&self, select: &str, n: usize) -> String {
        format!("{} LIMIT {}", select, n)
    }

    /// Take the lock row over when it is expired or already ours.
    ///
    /// Renewing an unexpired lock of the same holder keeps the token and
    /// `acquired_at`; any other takeover, including of the holder's own
    /// expired lock, installs the new token. Parameters: holder, token, ttl_ms.
    fn takeover_lock_sql(&self) -> String {
        // MySQL evaluates SET left to right, so `expires_at` and `holder`
        // are assigned after the CASE arms that read them.
        format!(
            "UPDATE {LOCK_TABLE} SET \
             token = CASE WHEN holder = :holder AND expires_at > {{now}} \
             THEN token ELSE :token END, \
             acquired_at = CASE WHEN holder = :holder AND expires_at > {{now}} \
             THEN acquired_at ELSE {{now}} END, \
             expires_at = {{now}} + :ttl_ms, \
             holder = :holder \
             WHERE id = 1 AND (holder = :holder OR expires_at <= {{now}})"
        )
    }
}

fn in_list(tables: &[&str]) -> String {
    tables
        .iter()
        .map(|t| format!("'{}'", t))
        .collect::<Vec<_>>()
        .join(", ")
}

/// SQLite strategy.
pub struct SqliteDialect;

impl DialectSql for SqliteDialect {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn placeholder(&self, n: usize) -> String {
        format!("?{}", n)
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn now_millis(&self) -> &'static str {
        "CAST((julianday('now') - 2440587.5) * 86400000.0 AS INTEGER)"
    }

    fn bootstrap_sql(&self) -> String {
        format!(
            r#"
CREATE TABLE IF NOT EXISTS {VERSION_TABLE} (
    id INTEGER PRIMARY KEY,
    version TEXT NOT NULL,
    installed_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS {EXECUTIONS_TABLE} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    operation_id TEXT NOT NULL,
    filepath TEXT NOT NULL,
    checksum TEXT NOT NULL,
    status TEXT NOT NULL,
    skip_reason TEXT,
    error_message TEXT,
    duration_ms INTEGER NOT NULL DEFAULT 0,
    executed_at INTEGER NOT NULL,
    executed_by TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS {EXECUTIONS_TABLE}_filepath_idx
    ON {EXECUTIONS_TABLE} (filepath, status);

CREATE INDEX IF NOT EXISTS {EXECUTIONS_TABLE}_operation_idx
    ON {EXECUTIONS_TABLE} (operation_id);

CREATE TABLE IF NOT EXISTS {LOCK_TABLE} (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    holder TEXT NOT NULL,
    token TEXT NOT NULL,
    acquired_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS {CHANGESETS_TABLE} (
    name TEXT PRIMARY KEY,
    applied_at INTEGER NOT NULL,
    reverted_at INTEGER,
    manifest_checksum TEXT,
    applied_by TEXT
);
"#
        )
    }

    fn tables_exist_sql(&self) -> String {
        format!(
            "SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'table' AND name IN ({})",
            in_list(&TRACKING_TABLES)
        )
    }

    fn insert_lock_sql(&self) -> String {
        format!(
            "INSERT OR IGNORE INTO {LOCK_TABLE} (id, holder, token, acquired_at, expires_at) \
             VALUES (1, :holder, :token, {{now}}, {{now}} + :ttl_ms)"
        )
    }
}

/// PostgreSQL strategy.
pub struct PostgresDialect;

impl DialectSql for PostgresDialect {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn placeholder(&self, n: usize) -> String {
        format!("${}", n)
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn now_millis(&self) -> &'static str {
        "CAST(EXTRACT(EPOCH FROM clock_timestamp()) * 1000 AS BIGINT)"
    }

    fn bootstrap_sql(&self) -> String {
        format!(
            r#"
CREATE TABLE IF NOT EXISTS {VERSION_TABLE} (
    id INTEGER PRIMARY KEY,
    version VARCHAR(64) NOT NULL,
    installed_at BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS {EXECUTIONS_TABLE} (
    id BIGSERIAL PRIMARY KEY,
    operation_id VARCHAR(64) NOT NULL,
    filepath VARCHAR(512) NOT NULL,
    checksum VARCHAR(64) NOT NULL,
    status VARCHAR(16) NOT NULL,
    skip_reason VARCHAR(255),
    error_message TEXT,
    duration_ms BIGINT NOT NULL DEFAULT 0,
    executed_at BIGINT NOT NULL,
    executed_by VARCHAR(255) NOT NULL
);

CREATE INDEX IF NOT EXISTS {EXECUTIONS_TABLE}_filepath_idx
    ON {EXECUTIONS_TABLE} (filepath, status);

CREATE INDEX IF NOT EXISTS {EXECUTIONS_TABLE}_operation_idx
    ON {EXECUTIONS_TABLE} (operation_id);

CREATE TABLE IF NOT EXISTS {LOCK_TABLE} (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    holder VARCHAR(255) NOT NULL,
    token VARCHAR(64) NOT NULL,
    acquired_at BIGINT NOT NULL,
    expires_at BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS {CHANGESETS_TABLE} (
    name VARCHAR(255) PRIMARY KEY,
    applied_at BIGINT NOT NULL,
    reverted_at BIGINT,
    manifest_checksum VARCHAR(64),
    applied_by VARCHAR(255)
);
"#
        )
    }

    fn tables_exist_sql(&self) -> String {
        format!(
            "SELECT COUNT(*) AS n FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name IN ({})",
            in_list(&TRACKING_TABLES)
        )
    }

    fn insert_lock_sql(&self) -> String {
        format!(
            "INSERT INTO {LOCK_TABLE} (id, holder, token, acquired_at, expires_at) \
             VALUES (1, :holder, :token, {{now}}, {{now}} + :ttl_ms) \
             ON CONFLICT (id) DO NOTHING"
        )
    }
}

/// MySQL strategy.
pub struct MySqlDialect;

impl DialectSql for MySqlDialect {
    fn dialect(&self) -> Dialect {
        Dialect::Mysql
    }

    fn placeholder(&self, _n: usize) -> String {
        "?".to_string()
    }

    fn numbered_placeholders(&self) -> bool {
        false
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    fn now_millis(&self) -> &'static str {
        "CAST(UNIX_TIMESTAMP(NOW(3)) * 1000 AS SIGNED)"
    }

    fn bootstrap_sql(&self) -> String {
        format!(
            r#"
CREATE TABLE IF NOT EXISTS {VERSION_TABLE} (
    id INT PRIMARY KEY,
    version VARCHAR(64) NOT NULL,
    installed_at BIGINT NOT NULL
) ENGINE=InnoDB;

CREATE TABLE IF NOT EXISTS {EXECUTIONS_TABLE} (
    id BIGINT AUTO_INCREMENT PRIMARY KEY,
    operation_id VARCHAR(64) NOT NULL,
    filepath VARCHAR(512) NOT NULL,
    checksum VARCHAR(64) NOT NULL,
    status VARCHAR(16) NOT NULL,
    skip_reason VARCHAR(255),
    error_message TEXT,
    duration_ms BIGINT NOT NULL DEFAULT 0,
    executed_at BIGINT NOT NULL,
    executed_by VARCHAR(255) NOT NULL,
    INDEX {EXECUTIONS_TABLE}_filepath_idx (filepath, status),
    INDEX {EXECUTIONS_TABLE}_operation_idx (operation_id)
) ENGINE=InnoDB;

CREATE TABLE IF NOT EXISTS {LOCK_TABLE} (
    id INT PRIMARY KEY,
    holder VARCHAR(255) NOT NULL,
    token VARCHAR(64) NOT NULL,
    acquired_at BIGINT NOT NULL,
    expires_at BIGINT NOT NULL,
    CHECK (id = 1)
) ENGINE=InnoDB;

CREATE TABLE IF NOT EXISTS {CHANGESETS_TABLE} (
    name VARCHAR(255) PRIMARY KEY,
    applied_at BIGINT NOT NULL,
    reverted_at BIGINT NULL,
    manifest_checksum VARCHAR(64),
    applied_by VARCHAR(255)
) ENGINE=InnoDB;
"#
        )
    }

    fn tables_exist_sql(&self) -> String {
        format!(
            "SELECT COUNT(*) AS n FROM information_schema.tables \
             WHERE table_schema = DATABASE() AND table_name IN ({})",
            in_list(&TRACKING_TABLES)
        )
    }

    fn insert_lock_sql(&self) -> String {
        format!(
            "INSERT IGNORE INTO {LOCK_TABLE} (id, holder, token, acquired_at, expires_at) \
             VALUES (1, :holder, :token, {{now}}, {{now}} + :ttl_ms)"
        )
    }
}

/// SQL Server strategy.
pub struct MssqlDialect;

impl DialectSql for MssqlDialect {
    fn dialect(&self) -> Dialect {
        Dialect::Mssql
    }

    fn placeholder(&self, n: usize) -> String {
        format!("@P{}", n)
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("[{}]", ident.replace(']', "]]"))
    }

    fn now_millis(&self) -> &'static str {
        "DATEDIFF_BIG(MILLISECOND, '1970-01-01', SYSUTCDATETIME())"
    }

    fn bootstrap_sql(&self) -> String {
        format!(
            r#"
IF OBJECT_ID(N'{VERSION_TABLE}', N'U') IS NULL
CREATE TABLE {VERSION_TABLE} (
    id INT PRIMARY KEY,
    version NVARCHAR(64) NOT NULL,
    installed_at BIGINT NOT NULL
);

IF OBJECT_ID(N'{EXECUTIONS_TABLE}', N'U') IS NULL
BEGIN
    CREATE TABLE {EXECUTIONS_TABLE} (
        id BIGINT IDENTITY(1,1) PRIMARY KEY,
        operation_id NVARCHAR(64) NOT NULL,
        filepath NVARCHAR(512) NOT NULL,
        checksum NVARCHAR(64) NOT NULL,
        status NVARCHAR(16) NOT NULL,
        skip_reason NVARCHAR(255) NULL,
        error_message NVARCHAR(MAX) NULL,
        duration_ms BIGINT NOT NULL DEFAULT 0,
        executed_at BIGINT NOT NULL,
        executed_by NVARCHAR(255) NOT NULL
    );
    CREATE INDEX {EXECUTIONS_TABLE}_filepath_idx ON {EXECUTIONS_TABLE} (filepath, status);
    CREATE INDEX {EXECUTIONS_TABLE}_operation_idx ON {EXECUTIONS_TABLE} (operation_id);
END;

IF OBJECT_ID(N'{LOCK_TABLE}', N'U') IS NULL
CREATE TABLE {LOCK_TABLE} (
    id INT PRIMARY KEY CHECK (id = 1),
    holder NVARCHAR(255) NOT NULL,
    token NVARCHAR(64) NOT NULL,
    acquired_at BIGINT NOT NULL,
    expires_at BIGINT NOT NULL
);

IF OBJECT_ID(N'{CHANGESETS_TABLE}', N'U') IS NULL
CREATE TABLE {CHANGESETS_TABLE} (
    name NVARCHAR(255) PRIMARY KEY,
    applied_at BIGINT NOT NULL,
    reverted_at BIGINT NULL,
    manifest_checksum NVARCHAR(64) NULL,
    applied_by NVARCHAR(255) NULL
);
"#
        )
    }

    fn tables_exist_sql(&self) -> String {
        format!(
            "SELECT COUNT(*) AS n FROM INFORMATION_SCHEMA.TABLES \
             WHERE TABLE_SCHEMA = SCHEMA_NAME() AND TABLE_NAME IN ({})",
            in_list(&TRACKING_TABLES)
        )
    }

    fn insert_lock_sql(&self) -> String {
        format!(
            "INSERT INTO {LOCK_TABLE} (id, holder, token, acquired_at, expires_at) \
             SELECT 1, :holder, :token, {{now}}, {{now}} + :ttl_ms \
             WHERE NOT EXISTS (SELECT 1 FROM {LOCK_TABLE} WITH (UPDLOCK, HOLDLOCK) WHERE id = 1)"
        )
    }

    fn limit(&self, select: &str, n: usize) -> String {
        match select.strip_prefix("SELECT ") {
            Some(rest) => format!("SELECT TOP {} {}", n, rest),
            None => select.to_string(),
        }
    }
}

/// A statement ready to hand to a [`Connection`](crate::connection::Connection).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bound {
    /// Dialect SQL text.
    pub sql: String,
    /// Parameters in placeholder order.
    pub params: Vec<SqlValue>,
}

static PARAM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r":([a-z_][a-z0-9_]*)").expect("parameter pattern is valid")
});

/// Expand `{now}` and bind `:name` parameters for `dialect`.
///
/// Numbered dialects reuse one placeholder per name; positional dialects
/// repeat the value for every occurrence.
pub fn bind(
    dialect: &dyn DialectSql,
    template: &str,
    args: &[(&str, SqlValue)],
) -> MigrateResult<Bound> {
    let template = template.replace("{now}", dialect.now_millis());
    let mut sql = String::with_capacity(template.len());
    let mut params = Vec::new();
    let mut names: Vec<&str> = Vec::new();
    let mut last = 0;

    for caps in PARAM.captures_iter(&template) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let name = name.as_str();
        let value = args
            .iter()
            .find(|(arg, _)| *arg == name)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| MigrateError::database(format!("unbound parameter ':{}'", name)))?;

        sql.push_str(&template[last..whole.start()]);
        if dialect.numbered_placeholders() {
            let index = match names.iter().position(|n| *n == name) {
                Some(index) => index,
                None => {
                    names.push(name);
                    params.push(value);
                    names.len() - 1
                }
            };
            sql.push_str(&dialect.placeholder(index + 1));
        } else {
            params.push(value);
            sql.push_str(&dialect.placeholder(params.len()));
        }
        last = whole.end();
    }
    sql.push_str(&template[last..]);

    Ok(Bound { sql, params })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_dialect_from_str() {
        assert_eq!("postgresql".parse::<Dialect>().unwrap(), Dialect::Postgres);
        assert_eq!("SQLite".parse::<Dialect>().unwrap(), Dialect::Sqlite);
        assert_eq!("mariadb".parse::<Dialect>().unwrap(), Dialect::Mysql);
        assert_eq!("sqlserver".parse::<Dialect>().unwrap(), Dialect::Mssql);
        assert!("oracle".parse::<Dialect>().is_err());
    }

    #[test]
    fn test_bind_numbered_reuses_placeholders() {
        let bound = bind(
            &PostgresDialect,
            "UPDATE t SET a = :holder, b = :token WHERE c = :holder",
            &[("holder", "me".into()), ("token", "abc".into())],
        )
        .unwrap();

        assert_eq!(bound.sql, "UPDATE t SET a = $1, b = $2 WHERE c = $1");
        assert_eq!(bound.params, vec![SqlValue::from("me"), SqlValue::from("abc")]);
    }

    #[test]
    fn test_bind_positional_repeats_values() {
        let bound = bind(
            &MySqlDialect,
            "UPDATE t SET a = :holder, b = :token WHERE c = :holder",
            &[("holder", "me".into()), ("token", "abc".into())],
        )
        .unwrap();

        assert_eq!(bound.sql, "UPDATE t SET a = ?, b = ? WHERE c = ?");
        assert_eq!(
            bound.params,
            vec![
                SqlValue::from("me"),
                SqlValue::from("abc"),
                SqlValue::from("me")
            ]
        );
    }

    #[test]
    fn test_bind_expands_clock() {
        let bound = bind(&MssqlDialect, "SELECT {now} AS now_ms", &[]).unwrap();
        assert!(bound.sql.contains("SYSUTCDATETIME()"));
        assert!(bound.params.is_empty());
    }

    #[test]
    fn test_bind_rejects_unbound() {
        let err = bind(&SqliteDialect, "SELECT :missing", &[]).unwrap_err();
        assert!(err.to_string().contains(":missing"));
    }

    #[test]
    fn test_bootstrap_creates_every_table() {
        for dialect in [
            Dialect::Sqlite,
            Dialect::Postgres,
            Dialect::Mysql,
            Dialect::Mssql,
        ] {
            let ddl = dialect.sql().bootstrap_sql();
            for table in TRACKING_TABLES {
                assert!(ddl.contains(table), "{} DDL misses {}", dialect, table);
            }
        }
    }

    #[test]
    fn test_insert_lock_is_conditional() {
        assert!(SqliteDialect.insert_lock_sql().contains("INSERT OR IGNORE"));
        assert!(PostgresDialect.insert_lock_sql().contains("ON CONFLICT (id) DO NOTHING"));
        assert!(MySqlDialect.insert_lock_sql().contains("INSERT IGNORE"));
        assert!(MssqlDialect.insert_lock_sql().contains("HOLDLOCK"));
    }

    #[test]
    fn test_takeover_assigns_holder_last() {
        let sql = SqliteDialect.takeover_lock_sql();
        let holder_set = sql.find("holder = :holder WHERE").unwrap();
        assert!(sql.find("token = CASE").unwrap() < holder_set);
        assert!(sql.contains("expires_at <= {now}"));
    }

    #[test]
    fn test_takeover_keeps_token_only_for_live_lock() {
        let sql = SqliteDialect.takeover_lock_sql();
        let live = "holder = :holder AND expires_at > {now}";
        assert_eq!(sql.matches(live).count(), 2);

        let expires_set = sql.find("expires_at = {now} + :ttl_ms").unwrap();
        assert!(sql.find("acquired_at = CASE").unwrap() < expires_set);
    }

    #[test]
    fn test_limit() {
        assert_eq!(
            PostgresDialect.limit("SELECT a FROM t ORDER BY a", 1),
            "SELECT a FROM t ORDER BY a LIMIT 1"
        );
        assert_eq!(
            MssqlDialect.limit("SELECT a FROM t ORDER BY a", 1),
            "SELECT TOP 1 a FROM t ORDER BY a"
        );
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(PostgresDialect.quote_ident("lock"), "\"lock\"");
        assert_eq!(MySqlDialect.quote_ident("lock"), "`lock`");
        assert_eq!(MssqlDialect.quote_ident("lock"), "[lock]");
    }
}
