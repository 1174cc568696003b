// sqltab
// Run SQL against SQL Server, PostgreSQL or SQLite and print results as tab-delimited tables

pub mod cli;
pub mod commands;
pub mod db;
pub mod logging;
pub mod render;
