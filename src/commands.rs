// Command Handlers
// Connects, runs one CLI command and renders each result table to the output sink

use crate::cli::{Args, Command};
use crate::db::{
    resolve_config, CellValue, ColumnInfo, Connection, DatabaseConfig, DatabaseDriver,
    DatabaseError, DriverRegistry, QueryEngine, ResultSet, StatementOutcome, StatementReport,
    TableInfo,
};
use crate::render::{renderer_for, OutputFormat, RenderError, RenderOptions, ResultRenderer};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors surfaced to the binary, which prints them and exits with status 1
#[derive(Error, Debug)]
pub enum CommandError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("table not found: {0}")]
    TableNotFound(String),
}

/// Writes one result table per row-returning statement, separated by a blank line
pub struct TableSink<'a> {
    renderer: Box<dyn ResultRenderer>,
    out: &'a mut dyn Write,
    tables: usize,
}

impl<'a> TableSink<'a> {
    pub fn new(format: OutputFormat, options: RenderOptions, out: &'a mut dyn Write) -> Self {
        Self {
            renderer: renderer_for(format, options),
            out,
            tables: 0,
        }
    }

    /// Number of tables written so far
    pub fn tables(&self) -> usize {
        self.tables
    }

    pub fn write_table(&mut self, result: &mut ResultSet) -> Result<usize, CommandError> {
        if self.tables > 0 {
            writeln!(self.out)?;
        }
        let rows = self.renderer.render_to(result, self.out)?;
        self.tables += 1;
        Ok(rows)
    }

    fn write_report(&mut self, report: StatementReport) -> Result<(), CommandError> {
        for mut result in report.outcome.into_result_sets() {
            let rows = self.write_table(&mut result)?;
            debug!(statement = report.index + 1, "rendered {} row(s)", rows);
        }
        Ok(())
    }
}

/// Resolve the connection from the arguments and run the selected command
pub async fn execute(args: &Args, out: &mut dyn Write) -> Result<(), CommandError> {
    let config = resolve_config(
        args.connection.url.as_deref(),
        args.connection.profile.as_deref(),
        &args.connection.overrides(),
    )?;
    let registry = DriverRegistry::with_builtin_drivers().await;
    let driver = registry.get_driver(config.database_type).await?;

    let mut sink = TableSink::new(args.render.format, args.render.options(), out);
    run_command(driver, &config, &args.command, &mut sink).await
}

/// Run one command against a fresh connection. The connection is closed on every path.
pub async fn run_command(
    driver: Arc<dyn DatabaseDriver>,
    config: &DatabaseConfig,
    command: &Command,
    sink: &mut TableSink<'_>,
) -> Result<(), CommandError> {
    if let Command::Ping = command {
        return ping(driver.as_ref(), config, sink).await;
    }

    let conn = driver.connect(config).await?;
    info!("connected to {} ({})", config.describe(), driver.driver_name());

    let engine = QueryEngine::new(Arc::clone(&driver));
    let result = dispatch(&engine, conn.as_ref(), command, sink).await;

    if let Err(e) = driver.close(conn).await {
        warn!("failed to close connection: {}", e);
    } else {
        debug!("connection closed");
    }
    result
}

async fn dispatch(
    engine: &QueryEngine,
    conn: &dyn Connection,
    command: &Command,
    sink: &mut TableSink<'_>,
) -> Result<(), CommandError> {
    match command {
        Command::Query { sql, params } => {
            let params: Vec<CellValue> = params.iter().map(|p| CellValue::parse_literal(p)).collect();
            let report = engine.execute(conn, sql, &params).await?;
            sink.write_report(report)
        }
        Command::Run { file } => {
            let script = read_script(file)?;
            let count = engine
                .run_script(conn, &script, |report| sink.write_report(report))
                .await?;
            info!("{} statement(s) executed", count);
            Ok(())
        }
        Command::Tables => {
            let tables = engine.driver().get_tables(conn).await?;
            sink.write_table(&mut tables_result(tables))?;
            Ok(())
        }
        Command::Describe { table } => {
            let columns = engine.driver().get_columns(conn, table).await?;
            if columns.is_empty() {
                return Err(CommandError::TableNotFound(table.clone()));
            }
            sink.write_table(&mut columns_result(columns))?;
            Ok(())
        }
        Command::Ping => Ok(()),
    }
}

async fn ping(
    driver: &dyn DatabaseDriver,
    config: &DatabaseConfig,
    sink: &mut TableSink<'_>,
) -> Result<(), CommandError> {
    if !driver.test_connection(config).await? {
        return Err(DatabaseError::ConnectionFailure(format!(
            "{} did not answer",
            config.describe()
        ))
        .into());
    }
    writeln!(sink.out, "{}: ok", config.describe())?;
    Ok(())
}

fn read_script(file: &Path) -> Result<String, CommandError> {
    if file.as_os_str() == "-" {
        let mut script = String::new();
        std::io::stdin().read_to_string(&mut script)?;
        return Ok(script);
    }
    Ok(std::fs::read_to_string(file)?)
}

fn tables_result(tables: Vec<TableInfo>) -> ResultSet {
    let columns = vec![
        ColumnInfo::new("schema", "text"),
        ColumnInfo::new("name", "text"),
        ColumnInfo::new("type", "text"),
    ];
    let rows = tables
        .into_iter()
        .map(|t| {
            vec![
                CellValue::Text(t.schema_name),
                CellValue::Text(t.table_name),
                CellValue::Text(t.table_type),
            ]
        })
        .collect();
    ResultSet::new(columns, rows)
}

fn columns_result(columns: Vec<ColumnInfo>) -> ResultSet {
    let header = vec![
        ColumnInfo::new("column", "text"),
        ColumnInfo::new("type", "text"),
        ColumnInfo::new("length", "int"),
        ColumnInfo::new("precision", "int"),
        ColumnInfo::new("scale", "int"),
        ColumnInfo::new("nullable", "boolean"),
        ColumnInfo::new("primary_key", "boolean"),
        ColumnInfo::new("identity", "boolean"),
        ColumnInfo::new("default", "text"),
    ];
    let rows = columns
        .into_iter()
        .map(|c| {
            vec![
                CellValue::Text(c.name),
                CellValue::Text(c.data_type),
                c.max_length.map(i64::from).into(),
                c.precision.map(i64::from).into(),
                c.scale.map(i64::from).into(),
                CellValue::Bool(c.is_nullable),
                CellValue::Bool(c.is_primary_key),
                CellValue::Bool(c.is_identity),
                c.column_default.into(),
            ]
        })
        .collect();
    ResultSet::new(header, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DatabaseType, SqliteDriver};

    fn memory_config() -> DatabaseConfig {
        let mut config = DatabaseConfig::new("test".to_string(), DatabaseType::Sqlite);
        config.database = ":memory:".to_string();
        config
    }

    async fn run_to_string(command: Command, options: RenderOptions) -> Result<String, CommandError> {
        let mut out = Vec::new();
        {
            let mut sink = TableSink::new(OutputFormat::Tab, options, &mut out);
            run_command(Arc::new(SqliteDriver::new()), &memory_config(), &command, &mut sink).await?;
        }
        Ok(String::from_utf8(out).unwrap())
    }

    fn script_file(sql: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(sql.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_query_with_params() {
        let output = run_to_string(
            Command::Query {
                sql: "SELECT ? AS id, ? AS name, ? AS manager".to_string(),
                params: vec!["3".to_string(), "Hamburger".to_string(), "NULL".to_string()],
            },
            RenderOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(output, "id\tname\tmanager\n3\tHamburger\tNULL\n");
    }

    #[tokio::test]
    async fn test_script_prints_one_table_per_query() {
        let file = script_file(
            "CREATE TABLE menu (id INTEGER, name VARCHAR(40), price NUMERIC(6,2));\n\
             INSERT INTO menu VALUES (3, 'Hamburger', 3.75), (4, 'Ресторан #2', 12.5);\n\
             SELECT * FROM menu ORDER BY id;\n\
             SELECT count(*) AS n FROM menu;",
        );
        let output = run_to_string(
            Command::Run {
                file: file.path().to_path_buf(),
            },
            RenderOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(
            output,
            "id\tname\tprice\n3\tHamburger\t3.75\n4\tРесторан #2\t12.50\n\nn\n2\n"
        );
    }

    #[test]
    fn test_batch_with_several_result_sets_prints_each_table() {
        let first = ResultSet::new(vec![ColumnInfo::new("id", "int")], vec![vec![CellValue::Int(1)]]);
        let second = ResultSet::new(
            vec![ColumnInfo::new("name", "nvarchar")],
            vec![vec!["Soup".into()], vec!["Salad".into()]],
        );
        let report = StatementReport {
            index: 0,
            statement: "DECLARE @x INT = 1; SELECT @x AS id; SELECT name FROM menu".to_string(),
            outcome: StatementOutcome::from_result_sets(vec![first, second]),
            execution_time_ms: 0,
        };
        assert!(matches!(report.outcome, StatementOutcome::RowSets(ref sets) if sets.len() == 2));

        let mut out = Vec::new();
        {
            let mut sink = TableSink::new(OutputFormat::Tab, RenderOptions::default(), &mut out);
            sink.write_report(report).unwrap();
            assert_eq!(sink.tables(), 2);
        }
        assert_eq!(String::from_utf8(out).unwrap(), "id\n1\n\nname\nSoup\nSalad\n");
    }

    #[tokio::test]
    async fn test_script_stops_at_first_error() {
        let file = script_file("SELECT 1 AS a;\nSELEC broken;\nSELECT 2 AS b;");
        let mut out = Vec::new();
        let result = {
            let mut sink = TableSink::new(OutputFormat::Tab, RenderOptions::default(), &mut out);
            run_command(
                Arc::new(SqliteDriver::new()),
                &memory_config(),
                &Command::Run {
                    file: file.path().to_path_buf(),
                },
                &mut sink,
            )
            .await
        };
        assert!(matches!(
            result,
            Err(CommandError::Database(DatabaseError::StatementFailure(_)))
        ));
        assert_eq!(String::from_utf8(out).unwrap(), "a\n1\n");
    }

    #[tokio::test]
    async fn test_tables_and_describe() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = memory_config();
        config.database = dir.path().join("menu.db").to_string_lossy().into_owned();

        let run = |command: Command| {
            let config = config.clone();
            async move {
                let mut out = Vec::new();
                {
                    let mut sink = TableSink::new(OutputFormat::Tab, RenderOptions::default(), &mut out);
                    run_command(Arc::new(SqliteDriver::new()), &config, &command, &mut sink)
                        .await
                        .unwrap();
                }
                String::from_utf8(out).unwrap()
            }
        };

        let script = script_file(
            "CREATE TABLE menu (id INTEGER PRIMARY KEY, name VARCHAR(40) NOT NULL, price NUMERIC(6,2) DEFAULT 0);\n\
             CREATE VIEW cheap AS SELECT * FROM menu WHERE price < 5;",
        );
        assert_eq!(
            run(Command::Run {
                file: script.path().to_path_buf()
            })
            .await,
            ""
        );

        assert_eq!(
            run(Command::Tables).await,
            "schema\tname\ttype\nmain\tcheap\tview\nmain\tmenu\ttable\n"
        );
        assert_eq!(
            run(Command::Describe {
                table: "menu".to_string()
            })
            .await,
            "column\ttype\tlength\tprecision\tscale\tnullable\tprimary_key\tidentity\tdefault\n\
             id\tINTEGER\tNULL\tNULL\tNULL\tfalse\ttrue\ttrue\tNULL\n\
             name\tVARCHAR(40)\t40\tNULL\tNULL\tfalse\tfalse\tfalse\tNULL\n\
             price\tNUMERIC(6,2)\tNULL\t6\t2\ttrue\tfalse\tfalse\t0\n"
        );
    }

    #[tokio::test]
    async fn test_describe_missing_table() {
        let result = run_to_string(
            Command::Describe {
                table: "nope".to_string(),
            },
            RenderOptions::default(),
        )
        .await;
        assert!(matches!(result, Err(CommandError::TableNotFound(t)) if t == "nope"));
    }

    #[tokio::test]
    async fn test_tables_on_empty_database() {
        let output = run_to_string(Command::Tables, RenderOptions::default()).await.unwrap();
        assert_eq!(output, "schema\tname\ttype\n");
    }

    #[tokio::test]
    async fn test_ping() {
        let output = run_to_string(Command::Ping, RenderOptions::default()).await.unwrap();
        assert_eq!(output, "sqlite::memory:: ok\n");
    }

    #[tokio::test]
    async fn test_execute_resolves_url() {
        let args = <Args as clap::Parser>::parse_from([
            "sqltab",
            "--url",
            "sqlite::memory:",
            "--null-token",
            "",
            "query",
            "SELECT NULL AS x, 1 AS y",
        ]);
        let mut out = Vec::new();
        execute(&args, &mut out).await.unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "x\ty\n\t1\n");
    }

    #[tokio::test]
    async fn test_execute_requires_connection() {
        let args = <Args as clap::Parser>::parse_from(["sqltab", "tables"]);
        let mut out = Vec::new();
        let err = execute(&args, &mut out).await.unwrap_err();
        assert!(err.to_string().contains("no connection given"));
    }
}
