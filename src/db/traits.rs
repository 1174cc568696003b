// Database Driver Traits
// Defines the database client contract and the values it hands back

use crate::db::decimal::Decimal;
use crate::db::result::ResultSet;
use crate::db::schema::{ColumnInfo, ColumnKind, TableInfo};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// Supported database types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    Sqlite,
    Mssql,
    Postgresql,
}

impl DatabaseType {
    /// Display name for messages
    pub fn display_name(&self) -> &'static str {
        match self {
            DatabaseType::Sqlite => "SQLite",
            DatabaseType::Mssql => "Microsoft SQL Server",
            DatabaseType::Postgresql => "PostgreSQL",
        }
    }

    /// Default port for the database type
    pub fn default_port(&self) -> u16 {
        match self {
            DatabaseType::Sqlite => 0, // File-based, no port
            DatabaseType::Mssql => 1433,
            DatabaseType::Postgresql => 5432,
        }
    }

    /// Schema used when a table name is not qualified
    pub fn default_schema(&self) -> &'static str {
        match self {
            DatabaseType::Sqlite => "main",
            DatabaseType::Mssql => "dbo",
            DatabaseType::Postgresql => "public",
        }
    }
}

/// Common database error type
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    ConnectionFailure(String),

    #[error("Statement failed: {0}")]
    StatementFailure(String),

    #[error("Driver not found for database type: {0:?}")]
    DriverNotFound(DatabaseType),

    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    #[error("Invalid connection type")]
    InvalidConnection,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Cell value in a result set
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Decimal(Decimal),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<FixedOffset>),
    Binary(Vec<u8>),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Logical kind of a non-null value
    pub fn kind(&self) -> Option<ColumnKind> {
        Some(match self {
            CellValue::Null => return None,
            CellValue::Bool(_) => ColumnKind::Boolean,
            CellValue::Int(_) => ColumnKind::Integer,
            CellValue::Decimal(_) => ColumnKind::Decimal,
            CellValue::Float(_) => ColumnKind::Float,
            CellValue::Text(_) => ColumnKind::Text,
            CellValue::Date(_) => ColumnKind::Date,
            CellValue::Time(_) => ColumnKind::Time,
            CellValue::Timestamp(_) => ColumnKind::Timestamp,
            CellValue::TimestampTz(_) => ColumnKind::TimestampTz,
            CellValue::Binary(_) => ColumnKind::Binary,
        })
    }

    /// Interpret a command-line parameter literal.
    ///
    /// `NULL` (any case), `true`/`false`, integers and plain decimals get their typed
    /// value; everything else is text. Quote with single quotes to force text.
    pub fn parse_literal(literal: &str) -> Self {
        if literal.len() >= 2 && literal.starts_with('\'') && literal.ends_with('\'') {
            return CellValue::Text(literal[1..literal.len() - 1].replace("''", "'"));
        }
        if literal.eq_ignore_ascii_case("null") {
            return CellValue::Null;
        }
        if literal.eq_ignore_ascii_case("true") {
            return CellValue::Bool(true);
        }
        if literal.eq_ignore_ascii_case("false") {
            return CellValue::Bool(false);
        }
        if let Ok(i) = literal.parse::<i64>() {
            return CellValue::Int(i);
        }
        if literal.contains('.') {
            if let Ok(d) = Decimal::parse(literal) {
                return CellValue::Decimal(d);
            }
        }
        CellValue::Text(literal.to_string())
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Int(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Bool(value)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(CellValue::Null)
    }
}

/// What a single statement produced
#[derive(Debug)]
pub enum StatementOutcome {
    /// A row cursor (SELECT and friends)
    Rows(ResultSet),
    /// A batch that produced more than one result set, in order
    RowSets(Vec<ResultSet>),
    /// Rows affected by DDL/DML
    RowCount(u64),
}

impl StatementOutcome {
    /// Build the outcome for the result sets a batch produced
    pub fn from_result_sets(mut sets: Vec<ResultSet>) -> Self {
        match sets.len() {
            0 => StatementOutcome::RowCount(0),
            1 => StatementOutcome::Rows(sets.remove(0)),
            _ => StatementOutcome::RowSets(sets),
        }
    }

    /// Every result set, in the order the server sent them
    pub fn into_result_sets(self) -> Vec<ResultSet> {
        match self {
            StatementOutcome::Rows(rows) => vec![rows],
            StatementOutcome::RowSets(sets) => sets,
            StatementOutcome::RowCount(_) => Vec::new(),
        }
    }
}

/// Connection trait - all database connections must implement this
#[async_trait::async_trait]
pub trait Connection: Send + Sync {
    /// Get the connection ID
    fn connection_id(&self) -> &str;

    /// Test if the connection is alive
    async fn is_alive(&self) -> bool;

    /// Allow downcasting for driver-specific operations
    fn as_any(&self) -> &dyn std::any::Any;

    /// Owned downcasting, used when the driver closes the connection
    fn into_any(self: Box<Self>) -> Box<dyn std::any::Any + Send>;
}

/// Database driver trait - all database drivers must implement this
#[async_trait::async_trait]
pub trait DatabaseDriver: Send + Sync {
    // --- Metadata ---
    /// Get the database type this driver supports
    fn database_type(&self) -> DatabaseType;

    /// Get the display name for this driver
    fn driver_name(&self) -> &'static str {
        self.database_type().display_name()
    }

    // --- Connection Management ---
    /// Test a connection configuration without keeping the connection
    async fn test_connection(&self, config: &DatabaseConfig) -> Result<bool, DatabaseError>;

    /// Create a new connection from configuration
    async fn connect(&self, config: &DatabaseConfig) -> Result<Box<dyn Connection>, DatabaseError>;

    /// Release a connection. Dropping a connection also releases it, without reporting errors.
    async fn close(&self, conn: Box<dyn Connection>) -> Result<(), DatabaseError>;

    // --- Statement Execution ---
    /// Execute one SQL statement with positional parameters
    async fn execute(
        &self,
        conn: &dyn Connection,
        sql: &str,
        params: &[CellValue],
    ) -> Result<StatementOutcome, DatabaseError>;

    // --- Schema Metadata ---
    /// Get list of tables/views
    async fn get_tables(&self, conn: &dyn Connection) -> Result<Vec<TableInfo>, DatabaseError>;

    /// Get columns for a specific table (`table` or `schema.table`)
    async fn get_columns(
        &self,
        conn: &dyn Connection,
        table_name: &str,
    ) -> Result<Vec<ColumnInfo>, DatabaseError>;
}

/// Unified database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "new_config_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub database_type: DatabaseType,

    // Common connection fields
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: String,

    // MS-SQL specific
    #[serde(default)]
    pub mssql_encrypt: Option<bool>,
    #[serde(default)]
    pub mssql_trust_cert: Option<bool>,

    // PostgreSQL specific
    #[serde(default)]
    pub postgres_sslmode: Option<String>, // "disable", "prefer", "require"
}

fn new_config_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl DatabaseConfig {
    pub fn new(name: String, database_type: DatabaseType) -> Self {
        Self {
            id: new_config_id(),
            name,
            database_type,
            host: None,
            port: None,
            database: String::new(),
            username: None,
            password: String::new(),
            mssql_encrypt: None,
            mssql_trust_cert: None,
            postgres_sslmode: None,
        }
    }

    pub fn validate(&self) -> Result<(), DatabaseError> {
        match self.database_type {
            DatabaseType::Sqlite => {
                if self.database.is_empty() {
                    return Err(DatabaseError::InvalidConfig(
                        "SQLite database path is required".to_string(),
                    ));
                }
            }
            DatabaseType::Mssql | DatabaseType::Postgresql => {
                if self.host.as_ref().map(|h| h.is_empty()).unwrap_or(true) {
                    return Err(DatabaseError::InvalidConfig("Host is required".to_string()));
                }
                if self.username.as_ref().map(|u| u.is_empty()).unwrap_or(true) {
                    return Err(DatabaseError::InvalidConfig("Username is required".to_string()));
                }
                if self.database.is_empty() {
                    return Err(DatabaseError::InvalidConfig("Database name is required".to_string()));
                }
            }
        }
        Ok(())
    }

    pub fn get_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.database_type.default_port())
    }

    /// Short description for logs, never includes the password
    pub fn describe(&self) -> String {
        match self.database_type {
            DatabaseType::Sqlite => format!("sqlite:{}", self.database),
            _ => format!(
                "{}://{}@{}:{}/{}",
                match self.database_type {
                    DatabaseType::Mssql => "mssql",
                    _ => "postgres",
                },
                self.username.as_deref().unwrap_or(""),
                self.host.as_deref().unwrap_or(""),
                self.get_port(),
                self.database
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_from_result_sets() {
        let set = || ResultSet::new(vec![ColumnInfo::new("n", "int")], vec![vec![CellValue::Int(1)]]);

        assert!(matches!(StatementOutcome::from_result_sets(Vec::new()), StatementOutcome::RowCount(0)));
        assert!(matches!(StatementOutcome::from_result_sets(vec![set()]), StatementOutcome::Rows(_)));

        let outcome = StatementOutcome::from_result_sets(vec![set(), set(), set()]);
        assert_eq!(outcome.into_result_sets().len(), 3);
        assert!(StatementOutcome::RowCount(5).into_result_sets().is_empty());
    }

    #[test]
    fn test_parse_literal() {
        assert_eq!(CellValue::parse_literal("NULL"), CellValue::Null);
        assert_eq!(CellValue::parse_literal("true"), CellValue::Bool(true));
        assert_eq!(CellValue::parse_literal("-42"), CellValue::Int(-42));
        assert_eq!(
            CellValue::parse_literal("3.75"),
            CellValue::Decimal(Decimal::parse("3.75").unwrap())
        );
        assert_eq!(CellValue::parse_literal("Hamburger"), CellValue::from("Hamburger"));
        assert_eq!(CellValue::parse_literal("'42'"), CellValue::from("42"));
        assert_eq!(CellValue::parse_literal("'it''s'"), CellValue::from("it's"));
        assert_eq!(CellValue::parse_literal("1.2.3"), CellValue::from("1.2.3"));
    }

    #[test]
    fn test_kind_of_values() {
        assert_eq!(CellValue::Null.kind(), None);
        assert_eq!(CellValue::Int(1).kind(), Some(ColumnKind::Integer));
        assert_eq!(CellValue::from("x").kind(), Some(ColumnKind::Text));
    }

    #[test]
    fn test_option_into_cell() {
        let none: Option<i64> = None;
        assert_eq!(CellValue::from(none), CellValue::Null);
        assert_eq!(CellValue::from(Some(7i64)), CellValue::Int(7));
    }

    #[test]
    fn test_config_validation() {
        let mut config = DatabaseConfig::new("Test DB".to_string(), DatabaseType::Postgresql);
        assert!(config.validate().is_err());

        config.host = Some("localhost".to_string());
        config.username = Some("postgres".to_string());
        config.database = "restaurants".to_string();
        assert!(config.validate().is_ok());
        assert_eq!(config.get_port(), 5432);
    }

    #[test]
    fn test_describe_hides_password() {
        let mut config = DatabaseConfig::new("Test DB".to_string(), DatabaseType::Mssql);
        config.host = Some("db".to_string());
        config.username = Some("sa".to_string());
        config.password = "secret".to_string();
        config.database = "master".to_string();

        let described = config.describe();
        assert_eq!(described, "mssql://sa@db:1433/master");
        assert!(!described.contains("secret"));
    }

    #[test]
    fn test_profile_deserialization_defaults() {
        let config: DatabaseConfig =
            serde_json::from_str(r#"{"database_type": "sqlite", "database": ":memory:"}"#).unwrap();
        assert_eq!(config.database_type, DatabaseType::Sqlite);
        assert!(!config.id.is_empty());
        assert!(config.password.is_empty());
    }
}
