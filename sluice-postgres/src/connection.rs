//! PostgreSQL connection wrapper.

use async_trait::async_trait;
use sluice_migrate::{Connection, Dialect, MigrateResult, Row, SqlValue};
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error, info, warn};

use crate::config::PgConfig;
use crate::error::{PgError, PgResult};

type BoxedParam = Box<dyn ToSql + Sync + Send>;

/// One open PostgreSQL session.
pub struct PgConnection {
    client: Client,
    config: PgConfig,
}

impl PgConnection {
    /// Connect using `config`.
    ///
    /// The socket is driven by a background task that lives as long as the
    /// client.
    pub async fn open(config: PgConfig) -> PgResult<Self> {
        let (client, connection) = config.to_pg_config().connect(NoTls).await.map_err(|e| {
            PgError::connection(format!("cannot connect to {}: {}", config.redacted(), e))
        })?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection closed with error");
            }
        });

        info!(server = %config.redacted(), "Connected to PostgreSQL");
        Ok(Self { client, config })
    }

    /// Parse `url` and connect.
    pub async fn connect(url: &str) -> PgResult<Self> {
        Self::open(PgConfig::from_url(url)?).await
    }

    /// The settings this connection was opened with.
    pub fn config(&self) -> &PgConfig {
        &self.config
    }

    /// Get the underlying tokio-postgres client.
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

fn to_param(value: &SqlValue) -> BoxedParam {
    match value {
        SqlValue::Null => Box::new(None::<String>),
        SqlValue::Integer(i) => Box::new(*i),
        SqlValue::Text(s) => Box::new(s.clone()),
    }
}

fn column_value(row: &tokio_postgres::Row, index: usize, ty: &Type) -> PgResult<SqlValue> {
    let convert = |e: tokio_postgres::Error| PgError::type_conversion(e.to_string());

    let value: SqlValue = if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(index).map_err(convert)?.into()
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(index)
            .map_err(convert)?
            .map(i64::from)
            .into()
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(index)
            .map_err(convert)?
            .map(i64::from)
            .into()
    } else if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(index)
            .map_err(convert)?
            .map(i64::from)
            .into()
    } else if *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR || *ty == Type::NAME
    {
        row.try_get::<_, Option<String>>(index).map_err(convert)?.into()
    } else {
        return Err(PgError::type_conversion(format!(
            "unsupported column type {} at index {}",
            ty, index
        )));
    };
    Ok(value)
}

fn convert_row(row: &tokio_postgres::Row) -> PgResult<Row> {
    let mut converted = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        converted.push(column.name(), column_value(row, index, column.type_())?);
    }
    Ok(converted)
}

#[async_trait]
impl Connection for PgConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> MigrateResult<u64> {
        let boxed: Vec<BoxedParam> = params.iter().map(to_param).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = boxed
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let count = self
            .client
            .execute(sql, &refs)
            .await
            .map_err(PgError::from)?;
        Ok(count)
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> MigrateResult<Vec<Row>> {
        let boxed: Vec<BoxedParam> = params.iter().map(to_param).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = boxed
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let rows = self
            .client
            .query(sql, &refs)
            .await
            .map_err(PgError::from)?;

        let converted = rows.iter().map(convert_row).collect::<PgResult<Vec<_>>>()?;
        Ok(converted)
    }

    async fn execute_script(&self, sql: &str) -> MigrateResult<()> {
        debug!(bytes = sql.len(), "Executing script");
        self.client.batch_execute(sql).await.map_err(PgError::from)?;
        Ok(())
    }

    fn interrupt(&self) {
        let token = self.client.cancel_token();
        debug!("Cancelling running query");
        tokio::spawn(async move {
            if let Err(e) = token.cancel_query(NoTls).await {
                warn!(error = %e, "Failed to cancel running query");
            }
        });
    }
}
