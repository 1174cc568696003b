// SQLite Driver
// Implements DatabaseDriver for SQLite files and in-memory databases using rusqlite

use crate::db::decimal::Decimal;
use crate::db::result::ResultSet;
use crate::db::schema::{split_table_name, ColumnInfo, ColumnKind, TableInfo};
use crate::db::traits::{
    CellValue, Connection, DatabaseConfig, DatabaseDriver, DatabaseError, DatabaseType,
    StatementOutcome,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection as RusqliteConnection, OpenFlags};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::debug;

const MEMORY_DATABASE: &str = ":memory:";

/// SQLite specific connection wrapper
pub struct SqliteConnection {
    pub id: String,
    pub conn: Mutex<RusqliteConnection>,
}

#[async_trait::async_trait]
impl Connection for SqliteConnection {
    fn connection_id(&self) -> &str {
        &self.id
    }

    async fn is_alive(&self) -> bool {
        self.conn
            .lock()
            .await
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn std::any::Any + Send> {
        self
    }
}

/// SQLite driver implementation
pub struct SqliteDriver;

impl SqliteDriver {
    /// Create a new SQLite driver
    pub fn new() -> Self {
        Self
    }

    /// Extract database path from config
    fn get_database_path(config: &DatabaseConfig) -> Result<String, DatabaseError> {
        if config.database.is_empty() {
            return Err(DatabaseError::InvalidConfig(
                "SQLite database path is required".to_string(),
            ));
        }

        // Expand ~ to home directory if present
        let path = match config.database.strip_prefix("~/") {
            Some(rest) => match std::env::var_os("HOME") {
                Some(home) => Path::new(&home).join(rest).to_string_lossy().to_string(),
                None => config.database.clone(),
            },
            None => config.database.clone(),
        };

        Ok(path)
    }

    /// Open SQLite connection
    fn open_connection(path: &str) -> Result<RusqliteConnection, DatabaseError> {
        let conn = if path == MEMORY_DATABASE {
            RusqliteConnection::open_in_memory()
        } else {
            RusqliteConnection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
            )
        };
        conn.map_err(|e| {
            DatabaseError::ConnectionFailure(format!("Failed to open SQLite database {}: {}", path, e))
        })
    }

    fn downcast(conn: &dyn Connection) -> Result<&SqliteConnection, DatabaseError> {
        conn.as_any()
            .downcast_ref::<SqliteConnection>()
            .ok_or(DatabaseError::InvalidConnection)
    }
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn statement_error(err: rusqlite::Error) -> DatabaseError {
    DatabaseError::StatementFailure(err.to_string())
}

#[async_trait::async_trait]
impl DatabaseDriver for SqliteDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Sqlite
    }

    async fn test_connection(&self, config: &DatabaseConfig) -> Result<bool, DatabaseError> {
        let path = Self::get_database_path(config)?;
        let conn = Self::open_connection(&path)?;
        Ok(conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).is_ok())
    }

    async fn connect(&self, config: &DatabaseConfig) -> Result<Box<dyn Connection>, DatabaseError> {
        let path = Self::get_database_path(config)?;
        let sqlite_conn = Self::open_connection(&path)?;
        debug!("opened SQLite database {}", path);

        Ok(Box::new(SqliteConnection {
            id: config.id.clone(),
            conn: Mutex::new(sqlite_conn),
        }))
    }

    async fn close(&self, conn: Box<dyn Connection>) -> Result<(), DatabaseError> {
        let sqlite_conn = conn
            .into_any()
            .downcast::<SqliteConnection>()
            .map_err(|_| DatabaseError::InvalidConnection)?;
        sqlite_conn
            .conn
            .into_inner()
            .close()
            .map_err(|(_, e)| DatabaseError::ConnectionFailure(format!("Failed to close SQLite database: {}", e)))
    }

    async fn execute(
        &self,
        conn: &dyn Connection,
        sql: &str,
        params: &[CellValue],
    ) -> Result<StatementOutcome, DatabaseError> {
        let sqlite_conn = Self::downcast(conn)?;
        let conn_guard = sqlite_conn.conn.lock().await;

        let mut stmt = conn_guard.prepare(sql).map_err(statement_error)?;
        let values: Vec<Value> = params.iter().map(to_sqlite_value).collect();

        // Statements without result columns report the number of changed rows
        if stmt.column_count() == 0 {
            let changed = stmt
                .execute(params_from_iter(values.iter()))
                .map_err(statement_error)?;
            return Ok(StatementOutcome::RowCount(changed as u64));
        }

        let columns: Vec<ColumnInfo> = stmt
            .columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                ColumnInfo::new(col.name(), col.decl_type().unwrap_or("")).with_ordinal(idx as i32 + 1)
            })
            .collect();

        let mut rows = stmt
            .query(params_from_iter(values.iter()))
            .map_err(statement_error)?;
        let mut data = Vec::new();
        while let Some(row) = rows.next().map_err(statement_error)? {
            let cells = columns
                .iter()
                .enumerate()
                .map(|(idx, col)| row.get_ref(idx).map(|v| cell_value_from_ref(v, col.kind)))
                .collect::<Result<Vec<_>, _>>()
                .map_err(statement_error)?;
            data.push(cells);
        }

        Ok(StatementOutcome::Rows(ResultSet::new(columns, data)))
    }

    async fn get_tables(&self, conn: &dyn Connection) -> Result<Vec<TableInfo>, DatabaseError> {
        let sqlite_conn = Self::downcast(conn)?;
        let conn_guard = sqlite_conn.conn.lock().await;

        let query = r#"
            SELECT name, type
            FROM sqlite_master
            WHERE type IN ('table', 'view')
            AND name NOT LIKE 'sqlite_%'
            ORDER BY name
        "#;

        let mut stmt = conn_guard.prepare(query).map_err(statement_error)?;
        let tables = stmt
            .query_map([], |row| {
                Ok(TableInfo {
                    schema_name: "main".to_string(), // SQLite doesn't have schemas
                    table_name: row.get(0)?,
                    table_type: row.get(1)?,
                })
            })
            .map_err(statement_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(statement_error)?;

        Ok(tables)
    }

    async fn get_columns(
        &self,
        conn: &dyn Connection,
        table_name: &str,
    ) -> Result<Vec<ColumnInfo>, DatabaseError> {
        let sqlite_conn = Self::downcast(conn)?;
        let conn_guard = sqlite_conn.conn.lock().await;
        let (schema, table) = split_table_name(table_name, DatabaseType::Sqlite.default_schema());

        let query = r#"
            SELECT cid, name, type, "notnull", dflt_value, pk
            FROM pragma_table_info(?1, ?2)
            ORDER BY cid
        "#;

        let mut stmt = conn_guard.prepare(query).map_err(statement_error)?;
        let columns = stmt
            .query_map([table, schema], |row| {
                let cid: i32 = row.get(0)?;
                let name: String = row.get(1)?;
                let data_type: String = row.get(2)?;
                let not_null: bool = row.get(3)?;
                let default: Option<String> = row.get(4)?;
                let pk: i32 = row.get(5)?;

                let mut col = ColumnInfo::new(name, data_type.clone()).with_ordinal(cid + 1);
                col.is_nullable = !not_null && pk == 0;
                col.is_primary_key = pk > 0;
                col.is_identity = pk > 0 && data_type.eq_ignore_ascii_case("INTEGER"); // ROWID alias
                col.column_default = default;
                Ok(col)
            })
            .map_err(statement_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(statement_error)?;

        Ok(columns)
    }
}

fn to_sqlite_value(cell: &CellValue) -> Value {
    match cell {
        CellValue::Null => Value::Null,
        CellValue::Bool(b) => Value::Integer(i64::from(*b)),
        CellValue::Int(i) => Value::Integer(*i),
        CellValue::Decimal(d) => Value::Real(d.to_f64()),
        CellValue::Float(f) => Value::Real(*f),
        CellValue::Text(s) => Value::Text(s.clone()),
        CellValue::Binary(b) => Value::Blob(b.clone()),
        other => Value::Text(crate::render::coerce(other)),
    }
}

/// Map a stored value using the column's declared type.
///
/// SQLite stores dates as text and booleans as integers; values that do not fit the
/// declared type keep their storage class.
fn cell_value_from_ref(value: ValueRef<'_>, kind: ColumnKind) -> CellValue {
    match value {
        ValueRef::Null => CellValue::Null,
        ValueRef::Integer(i) => match kind {
            ColumnKind::Boolean => CellValue::Bool(i != 0),
            ColumnKind::Decimal => CellValue::Decimal(Decimal::from(i)),
            ColumnKind::Float => CellValue::Float(i as f64),
            _ => CellValue::Int(i),
        },
        ValueRef::Real(f) => match kind {
            ColumnKind::Decimal if f.is_finite() => Decimal::parse(&f.to_string())
                .map(CellValue::Decimal)
                .unwrap_or(CellValue::Float(f)),
            _ => CellValue::Float(f),
        },
        // TEXT is not guaranteed to hold valid UTF-8; keep such bytes intact
        ValueRef::Text(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => text_cell(text, kind).unwrap_or_else(|| CellValue::Text(text.to_string())),
            Err(_) => CellValue::Binary(bytes.to_vec()),
        },
        ValueRef::Blob(bytes) => CellValue::Binary(bytes.to_vec()),
    }
}

fn text_cell(text: &str, kind: ColumnKind) -> Option<CellValue> {
    match kind {
        ColumnKind::Date => NaiveDate::parse_from_str(text, "%Y-%m-%d").ok().map(CellValue::Date),
        ColumnKind::Time => ["%H:%M:%S%.f", "%H:%M"]
            .iter()
            .find_map(|fmt| NaiveTime::parse_from_str(text, fmt).ok())
            .map(CellValue::Time),
        ColumnKind::Timestamp => ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
            .map(CellValue::Timestamp),
        ColumnKind::TimestampTz => DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%:z")
            .or_else(|_| DateTime::parse_from_rfc3339(text))
            .ok()
            .map(CellValue::TimestampTz),
        ColumnKind::Decimal => Decimal::parse(text).ok().map(CellValue::Decimal),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::result::RowCursor;

    async fn memory_connection() -> (SqliteDriver, Box<dyn Connection>) {
        let driver = SqliteDriver::new();
        let mut config = DatabaseConfig::new("Test DB".to_string(), DatabaseType::Sqlite);
        config.database = MEMORY_DATABASE.to_string();
        let conn = driver.connect(&config).await.unwrap();
        (driver, conn)
    }

    async fn rows_of(driver: &SqliteDriver, conn: &dyn Connection, sql: &str) -> ResultSet {
        match driver.execute(conn, sql, &[]).await.unwrap() {
            StatementOutcome::Rows(rs) => rs,
            other => panic!("expected rows, got {:?}", other),
        }
    }

    #[test]
    fn test_driver_type() {
        let driver = SqliteDriver::new();
        assert_eq!(driver.database_type(), DatabaseType::Sqlite);
        assert_eq!(driver.driver_name(), "SQLite");
    }

    #[tokio::test]
    async fn test_ddl_and_dml_report_counts() {
        let (driver, conn) = memory_connection().await;
        let created = driver
            .execute(conn.as_ref(), "CREATE TABLE menu (id INTEGER PRIMARY KEY, name TEXT)", &[])
            .await
            .unwrap();
        assert!(matches!(created, StatementOutcome::RowCount(0)));

        let inserted = driver
            .execute(
                conn.as_ref(),
                "INSERT INTO menu (id, name) VALUES (?, ?), (?, ?)",
                &[CellValue::Int(1), "Soup".into(), CellValue::Int(2), "Salad".into()],
            )
            .await
            .unwrap();
        assert!(matches!(inserted, StatementOutcome::RowCount(2)));
    }

    #[tokio::test]
    async fn test_values_follow_declared_types() {
        let (driver, conn) = memory_connection().await;
        driver
            .execute(
                conn.as_ref(),
                "CREATE TABLE dish (id INTEGER, name VARCHAR(40), price NUMERIC(6,2), \
                 vegan BOOLEAN, added DATE, served TIMESTAMP, ratio REAL, photo BLOB, note TEXT)",
                &[],
            )
            .await
            .unwrap();
        driver
            .execute(
                conn.as_ref(),
                "INSERT INTO dish VALUES (3, 'Hamburger', 3.75, 0, '2024-03-01', \
                 '2024-03-01 12:30:00', 0.5, x'CAFE', NULL)",
                &[],
            )
            .await
            .unwrap();

        let mut rs = rows_of(&driver, conn.as_ref(), "SELECT * FROM dish").await;
        assert_eq!(rs.columns()[2].display_scale(), Some(2));

        let row = rs.next_row().unwrap().unwrap();
        assert_eq!(row[0], CellValue::Int(3));
        assert_eq!(row[1], CellValue::from("Hamburger"));
        assert_eq!(row[2], CellValue::Decimal(Decimal::parse("3.75").unwrap()));
        assert_eq!(row[3], CellValue::Bool(false));
        assert_eq!(row[4], CellValue::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()));
        assert_eq!(
            row[5],
            CellValue::Timestamp(
                NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(12, 30, 0).unwrap()
            )
        );
        assert_eq!(row[6], CellValue::Float(0.5));
        assert_eq!(row[7], CellValue::Binary(vec![0xCA, 0xFE]));
        assert_eq!(row[8], CellValue::Null);
    }

    #[tokio::test]
    async fn test_parameters_are_bound() {
        let (driver, conn) = memory_connection().await;
        let mut rs = match driver
            .execute(
                conn.as_ref(),
                "SELECT ? AS a, ? AS b, ? AS c",
                &[CellValue::Null, CellValue::Bool(true), "Ресторан #2".into()],
            )
            .await
            .unwrap()
        {
            StatementOutcome::Rows(rs) => rs,
            other => panic!("expected rows, got {:?}", other),
        };
        let row = rs.next_row().unwrap().unwrap();
        assert_eq!(row, vec![CellValue::Null, CellValue::Int(1), "Ресторан #2".into()]);
    }

    #[tokio::test]
    async fn test_invalid_utf8_text_is_kept_as_bytes() {
        let (driver, conn) = memory_connection().await;
        let mut rs = rows_of(&driver, conn.as_ref(), "SELECT CAST(x'C3FF41' AS TEXT) AS t, 'é' AS ok").await;
        assert_eq!(
            rs.next_row().unwrap().unwrap(),
            vec![CellValue::Binary(vec![0xC3, 0xFF, 0x41]), CellValue::from("é")]
        );
    }

    #[tokio::test]
    async fn test_invalid_sql_is_statement_failure() {
        let (driver, conn) = memory_connection().await;
        let err = driver.execute(conn.as_ref(), "SELEC 1", &[]).await.unwrap_err();
        assert!(matches!(err, DatabaseError::StatementFailure(_)));
    }

    #[tokio::test]
    async fn test_schema_metadata() {
        let (driver, conn) = memory_connection().await;
        driver
            .execute(
                conn.as_ref(),
                "CREATE TABLE restaurant (id INTEGER PRIMARY KEY, name TEXT NOT NULL, \
                 manager VARCHAR(30) DEFAULT 'none')",
                &[],
            )
            .await
            .unwrap();
        driver
            .execute(conn.as_ref(), "CREATE VIEW names AS SELECT name FROM restaurant", &[])
            .await
            .unwrap();

        let tables = driver.get_tables(conn.as_ref()).await.unwrap();
        let names: Vec<_> = tables.iter().map(|t| (t.table_name.as_str(), t.table_type.as_str())).collect();
        assert_eq!(names, vec![("names", "view"), ("restaurant", "table")]);

        let columns = driver.get_columns(conn.as_ref(), "main.restaurant").await.unwrap();
        assert_eq!(columns.len(), 3);
        assert!(columns[0].is_primary_key && columns[0].is_identity);
        assert!(!columns[1].is_nullable);
        assert_eq!(columns[2].max_length, Some(30));
        assert_eq!(columns[2].column_default.as_deref(), Some("'none'"));
        assert_eq!(columns[2].ordinal_position, 3);

        assert!(driver.get_columns(conn.as_ref(), "missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_connection() {
        let (driver, conn) = memory_connection().await;
        assert!(conn.is_alive().await);
        driver.close(conn).await.unwrap();
    }

    #[tokio::test]
    async fn test_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("menu.db");
        let mut config = DatabaseConfig::new("file".to_string(), DatabaseType::Sqlite);
        config.database = path.to_string_lossy().to_string();

        let driver = SqliteDriver::new();
        assert!(driver.test_connection(&config).await.unwrap());
        let conn = driver.connect(&config).await.unwrap();
        driver.execute(conn.as_ref(), "CREATE TABLE t (x INT)", &[]).await.unwrap();
        driver.close(conn).await.unwrap();
        assert!(path.exists());
    }
}
