// Database Drivers
// One DatabaseDriver implementation per supported backend

pub mod mssql;
pub mod pg_types;
pub mod postgres;
pub mod sqlite;

// Re-export drivers
pub use mssql::MssqlDriver;
pub use postgres::PostgresDriver;
pub use sqlite::SqliteDriver;
