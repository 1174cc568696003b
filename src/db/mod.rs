// Database Module
// Driver contract, result model, connection descriptors and script execution

pub mod connection;
pub mod decimal;
pub mod drivers;
pub mod query;
pub mod registry;
pub mod result;
pub mod schema;
pub mod traits;

pub use connection::{resolve_config, ConnectionOverrides};
pub use decimal::{Decimal, DecimalParseError};
pub use drivers::{MssqlDriver, PostgresDriver, SqliteDriver};
pub use query::{split_statements, QueryEngine, StatementReport};
pub use registry::DriverRegistry;
pub use result::{CursorError, ResultSet, RowCursor};
pub use schema::{ColumnInfo, ColumnKind, TableInfo};
pub use traits::{
    CellValue, Connection, DatabaseConfig, DatabaseDriver, DatabaseError, DatabaseType,
    StatementOutcome,
};
