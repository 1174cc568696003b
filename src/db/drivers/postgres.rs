// PostgreSQL Driver
// Implements DatabaseDriver trait for PostgreSQL using tokio-postgres

use crate::db::drivers::pg_types::{cell_from_sql, RawValue};
use crate::db::result::ResultSet;
use crate::db::schema::{split_table_name, ColumnInfo, TableInfo};
use crate::db::traits::{
    CellValue, Connection, DatabaseConfig, DatabaseDriver, DatabaseError, DatabaseType,
    StatementOutcome,
};
use futures::TryStreamExt;
use tokio::task::JoinHandle;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, warn};

/// PostgreSQL specific connection wrapper
pub struct PostgresConnection {
    pub id: String,
    client: Client,
    /// Drives the socket; finishes once the client is dropped
    task: JoinHandle<Result<(), tokio_postgres::Error>>,
}

#[async_trait::async_trait]
impl Connection for PostgresConnection {
    fn connection_id(&self) -> &str {
        &self.id
    }

    async fn is_alive(&self) -> bool {
        !self.client.is_closed() && self.client.simple_query("SELECT 1").await.is_ok()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn std::any::Any + Send> {
        self
    }
}

/// PostgreSQL driver implementation
pub struct PostgresDriver;

impl PostgresDriver {
    /// Create a new PostgreSQL driver
    pub fn new() -> Self {
        Self
    }

    /// Build PostgreSQL connection string from config
    fn build_connection_string(config: &DatabaseConfig) -> Result<String, DatabaseError> {
        let host = config
            .host
            .as_ref()
            .ok_or_else(|| DatabaseError::InvalidConfig("Host is required".to_string()))?;
        let port = config.get_port();
        if config.database.is_empty() {
            return Err(DatabaseError::InvalidConfig("Database name is required".to_string()));
        }
        let username = config
            .username
            .as_ref()
            .ok_or_else(|| DatabaseError::InvalidConfig("Username is required".to_string()))?;
        let sslmode = config.postgres_sslmode.as_deref().unwrap_or("prefer");

        let conn_string = format!(
            "host={} port={} dbname={} user={} password={} sslmode={}",
            quote_value(host),
            port,
            quote_value(&config.database),
            quote_value(username),
            quote_value(&config.password),
            quote_value(sslmode)
        );

        Ok(conn_string)
    }

    async fn open(config: &DatabaseConfig) -> Result<PostgresConnection, DatabaseError> {
        let conn_string = Self::build_connection_string(config)?;
        let (client, connection) = tokio_postgres::connect(&conn_string, NoTls)
            .await
            .map_err(|e| {
                DatabaseError::ConnectionFailure(format!("PostgreSQL connection failed: {}", e))
            })?;

        let task = tokio::spawn(async move {
            let result = connection.await;
            if let Err(e) = &result {
                warn!("PostgreSQL connection error: {}", e);
            }
            result
        });

        Ok(PostgresConnection {
            id: config.id.clone(),
            client,
            task,
        })
    }

    fn downcast(conn: &dyn Connection) -> Result<&PostgresConnection, DatabaseError> {
        conn.as_any()
            .downcast_ref::<PostgresConnection>()
            .ok_or(DatabaseError::InvalidConnection)
    }

    fn row_to_cells(row: &Row) -> Result<Vec<CellValue>, DatabaseError> {
        row.columns()
            .iter()
            .enumerate()
            .map(|(idx, column)| {
                let raw = row
                    .try_get::<_, Option<RawValue>>(idx)
                    .map_err(statement_error)?;
                cell_from_sql(column.type_(), raw.map(|r| r.0)).map_err(|e| {
                    DatabaseError::StatementFailure(format!(
                        "cannot decode column '{}': {}",
                        column.name(),
                        e
                    ))
                })
            })
            .collect()
    }
}

impl Default for PostgresDriver {
    fn default() -> Self {
        Self::new()
    }
}

/// Quote a libpq connection string value when it contains spaces, quotes or backslashes
fn quote_value(value: &str) -> String {
    if !value.is_empty() && !value.contains([' ', '\'', '\\']) {
        return value.to_string();
    }
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn statement_error(err: tokio_postgres::Error) -> DatabaseError {
    match err.as_db_error() {
        Some(db) => DatabaseError::StatementFailure(format!("{}: {}", db.code().code(), db.message())),
        None if err.is_closed() => DatabaseError::ConnectionFailure(err.to_string()),
        None => DatabaseError::StatementFailure(err.to_string()),
    }
}

#[async_trait::async_trait]
impl DatabaseDriver for PostgresDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgresql
    }

    async fn test_connection(&self, config: &DatabaseConfig) -> Result<bool, DatabaseError> {
        let conn = Self::open(config).await?;
        let alive = conn.is_alive().await;
        self.close(Box::new(conn)).await?;
        Ok(alive)
    }

    async fn connect(&self, config: &DatabaseConfig) -> Result<Box<dyn Connection>, DatabaseError> {
        let conn = Self::open(config).await?;
        debug!("connected to {}", config.describe());
        Ok(Box::new(conn))
    }

    async fn close(&self, conn: Box<dyn Connection>) -> Result<(), DatabaseError> {
        let postgres_conn = conn
            .into_any()
            .downcast::<PostgresConnection>()
            .map_err(|_| DatabaseError::InvalidConnection)?;
        let PostgresConnection { client, task, .. } = *postgres_conn;
        drop(client);

        match task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(DatabaseError::ConnectionFailure(e.to_string())),
            Err(e) => Err(DatabaseError::ConnectionFailure(format!(
                "PostgreSQL connection task failed: {}",
                e
            ))),
        }
    }

    async fn execute(
        &self,
        conn: &dyn Connection,
        sql: &str,
        params: &[CellValue],
    ) -> Result<StatementOutcome, DatabaseError> {
        let postgres_conn = Self::downcast(conn)?;
        let client = &postgres_conn.client;

        let stmt = client.prepare(sql).await.map_err(statement_error)?;
        let param_refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        if stmt.columns().is_empty() {
            let affected = client
                .execute(&stmt, &param_refs)
                .await
                .map_err(statement_error)?;
            return Ok(StatementOutcome::RowCount(affected));
        }

        let columns: Vec<ColumnInfo> = stmt
            .columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| ColumnInfo::new(col.name(), col.type_().name()).with_ordinal(idx as i32 + 1))
            .collect();

        let rows: Vec<Row> = client
            .query_raw(&stmt, param_refs.iter().copied())
            .await
            .map_err(statement_error)?
            .try_collect()
            .await
            .map_err(statement_error)?;

        let data = rows
            .iter()
            .map(Self::row_to_cells)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(StatementOutcome::Rows(ResultSet::new(columns, data)))
    }

    async fn get_tables(&self, conn: &dyn Connection) -> Result<Vec<TableInfo>, DatabaseError> {
        let postgres_conn = Self::downcast(conn)?;

        let query = r#"
            SELECT table_schema::text, table_name::text, table_type::text
            FROM information_schema.tables
            WHERE table_schema NOT IN ('pg_catalog', 'information_schema')
            ORDER BY table_schema, table_name
        "#;

        let rows = postgres_conn
            .client
            .query(query, &[])
            .await
            .map_err(statement_error)?;

        rows.iter()
            .map(|row| {
                Ok(TableInfo {
                    schema_name: row.try_get(0).map_err(statement_error)?,
                    table_name: row.try_get(1).map_err(statement_error)?,
                    table_type: row.try_get(2).map_err(statement_error)?,
                })
            })
            .collect()
    }

    async fn get_columns(
        &self,
        conn: &dyn Connection,
        table_name: &str,
    ) -> Result<Vec<ColumnInfo>, DatabaseError> {
        let postgres_conn = Self::downcast(conn)?;
        let (schema, table) = split_table_name(table_name, DatabaseType::Postgresql.default_schema());

        let query = r#"
            SELECT
                c.column_name::text,
                c.data_type::text,
                c.character_maximum_length::int4,
                c.numeric_precision::int4,
                c.numeric_scale::int4,
                c.is_nullable = 'YES',
                c.column_default::text,
                c.ordinal_position::int4,
                (c.is_identity = 'YES' OR c.column_default LIKE 'nextval(%'),
                EXISTS (
                    SELECT 1
                    FROM information_schema.table_constraints tc
                    JOIN information_schema.key_column_usage kcu
                      ON tc.constraint_name = kcu.constraint_name
                     AND tc.table_schema = kcu.table_schema
                    WHERE tc.constraint_type = 'PRIMARY KEY'
                      AND tc.table_schema = c.table_schema
                      AND tc.table_name = c.table_name
                      AND kcu.column_name = c.column_name
                )
            FROM information_schema.columns c
            WHERE c.table_schema = $1 AND c.table_name = $2
            ORDER BY c.ordinal_position
        "#;

        let rows = postgres_conn
            .client
            .query(query, &[&schema, &table])
            .await
            .map_err(statement_error)?;

        rows.iter()
            .map(|row| {
                let name: String = row.try_get(0).map_err(statement_error)?;
                let data_type: String = row.try_get(1).map_err(statement_error)?;
                let max_length: Option<i32> = row.try_get(2).map_err(statement_error)?;
                let precision: Option<i32> = row.try_get(3).map_err(statement_error)?;
                let scale: Option<i32> = row.try_get(4).map_err(statement_error)?;

                let mut col = ColumnInfo::new(name, data_type)
                    .with_ordinal(row.try_get(7).map_err(statement_error)?)
                    .with_numeric(precision, scale);
                if max_length.is_some() {
                    col.max_length = max_length;
                }
                col.is_nullable = row.try_get(5).map_err(statement_error)?;
                col.column_default = row.try_get(6).map_err(statement_error)?;
                col.is_identity = row
                    .try_get::<_, Option<bool>>(8)
                    .map_err(statement_error)?
                    .unwrap_or(false);
                col.is_primary_key = row.try_get(9).map_err(statement_error)?;
                Ok(col)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> DatabaseConfig {
        let mut config = DatabaseConfig::new("Test DB".to_string(), DatabaseType::Postgresql);
        config.host = Some("localhost".to_string());
        config.database = "testdb".to_string();
        config.username = Some("testuser".to_string());
        config.password = "testpass".to_string();
        config
    }

    #[test]
    fn test_driver_type() {
        let driver = PostgresDriver::new();
        assert_eq!(driver.database_type(), DatabaseType::Postgresql);
        assert_eq!(driver.driver_name(), "PostgreSQL");
    }

    #[test]
    fn test_connection_string_building() {
        let mut config = sample_config();
        config.port = Some(5433);

        let conn_string = PostgresDriver::build_connection_string(&config).unwrap();
        assert!(conn_string.contains("host=localhost"));
        assert!(conn_string.contains("port=5433"));
        assert!(conn_string.contains("dbname=testdb"));
        assert!(conn_string.contains("user=testuser"));
        assert!(conn_string.contains("password=testpass"));
    }

    #[test]
    fn test_default_ssl_mode() {
        let conn_string = PostgresDriver::build_connection_string(&sample_config()).unwrap();
        assert!(conn_string.contains("sslmode=prefer"));
        assert!(conn_string.contains("port=5432"));
    }

    #[test]
    fn test_custom_ssl_mode() {
        let mut config = sample_config();
        config.postgres_sslmode = Some("disable".to_string());

        let conn_string = PostgresDriver::build_connection_string(&config).unwrap();
        assert!(conn_string.contains("sslmode=disable"));
    }

    #[test]
    fn test_values_are_quoted_when_needed() {
        let mut config = sample_config();
        config.password = "it's a secret".to_string();
        let conn_string = PostgresDriver::build_connection_string(&config).unwrap();
        assert!(conn_string.contains(r"password='it\'s a secret'"));

        config.password = String::new();
        let conn_string = PostgresDriver::build_connection_string(&config).unwrap();
        assert!(conn_string.contains("password=''"));

        // The quoted form is accepted by the connection string parser
        config.password = r"back\slash".to_string();
        let conn_string = PostgresDriver::build_connection_string(&config).unwrap();
        let parsed: tokio_postgres::Config = conn_string.parse().unwrap();
        assert_eq!(parsed.get_password(), Some(r"back\slash".as_bytes()));
    }

    #[test]
    fn test_missing_settings_are_rejected() {
        let mut config = sample_config();
        config.username = None;
        assert!(matches!(
            PostgresDriver::build_connection_string(&config),
            Err(DatabaseError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connection_failure() {
        let mut config = sample_config();
        config.host = Some("127.0.0.1".to_string());
        config.port = Some(1);
        config.postgres_sslmode = Some("disable".to_string());

        let result = PostgresDriver::new().connect(&config).await;
        assert!(matches!(result, Err(DatabaseError::ConnectionFailure(_))));
    }
}
