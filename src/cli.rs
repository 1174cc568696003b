// CLI Arguments
// clap definitions; connection and rendering flags are global so they can follow the subcommand

use crate::db::{ConnectionOverrides, DatabaseType};
use crate::render::{OutputFormat, RenderOptions};
use clap::{ArgAction, Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(flatten)]
    pub render: RenderArgs,

    /// More log output on stderr (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Database backend selectable on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Driver {
    Sqlite,
    #[value(alias = "sqlserver")]
    Mssql,
    #[value(alias = "postgresql")]
    Postgres,
}

impl From<Driver> for DatabaseType {
    fn from(driver: Driver) -> Self {
        match driver {
            Driver::Sqlite => DatabaseType::Sqlite,
            Driver::Mssql => DatabaseType::Mssql,
            Driver::Postgres => DatabaseType::Postgresql,
        }
    }
}

#[derive(ClapArgs, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// Connection URL: mssql://, postgres://, sqlite:<path> or sqlite::memory:
    #[arg(long, env = "SQLTAB_URL", global = true)]
    pub url: Option<String>,

    /// JSON connection profile
    #[arg(long, global = true)]
    pub profile: Option<PathBuf>,

    /// Database backend, when neither --url nor --profile is given
    #[arg(long, value_enum, global = true)]
    pub driver: Option<Driver>,

    #[arg(long, global = true)]
    pub host: Option<String>,

    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Database name, or the file path for SQLite
    #[arg(long, global = true)]
    pub database: Option<String>,

    #[arg(long, global = true)]
    pub user: Option<String>,

    #[arg(long, env = "SQLTAB_PASSWORD", hide_env_values = true, global = true)]
    pub password: Option<String>,
}

impl ConnectionArgs {
    pub fn overrides(&self) -> ConnectionOverrides {
        ConnectionOverrides {
            database_type: self.driver.map(DatabaseType::from),
            host: self.host.clone(),
            port: self.port,
            database: self.database.clone(),
            username: self.user.clone(),
            password: self.password.clone(),
        }
    }
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RenderArgs {
    /// Output format
    #[arg(long, value_enum, default_value_t, global = true)]
    pub format: OutputFormat,

    /// Text written for NULL values
    #[arg(long, default_value = "NULL", global = true)]
    pub null_token: String,

    /// Field delimiter: a single character, or `\t` / `tab`
    #[arg(long, value_parser = parse_delimiter, global = true)]
    pub delimiter: Option<char>,

    /// Omit the header line
    #[arg(long, global = true)]
    pub no_header: bool,

    /// Write tabs, newlines and backslashes inside fields unescaped
    #[arg(long, global = true)]
    pub no_escape: bool,

    /// Stop after this many rows per result
    #[arg(long, global = true)]
    pub max_rows: Option<usize>,
}

impl RenderArgs {
    pub fn options(&self) -> RenderOptions {
        let defaults = RenderOptions::for_format(self.format);
        RenderOptions {
            delimiter: self.delimiter.unwrap_or(defaults.delimiter),
            null_token: self.null_token.clone(),
            include_header: !self.no_header,
            escape_fields: !self.no_escape,
            max_rows: self.max_rows,
        }
    }
}

fn parse_delimiter(value: &str) -> Result<char, String> {
    match value {
        "\\t" | "tab" => return Ok('\t'),
        "\\n" | "\\r" => return Err("line breaks cannot be used as a delimiter".to_string()),
        _ => {}
    }
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some('\n' | '\r'), None) => Err("line breaks cannot be used as a delimiter".to_string()),
        // Escapes are a backslash plus a letter, so these would split escaped fields
        (Some(c), None) if c == '\\' || c.is_alphanumeric() => Err(format!(
            "delimiter '{}' clashes with field escaping: use punctuation or a tab",
            c
        )),
        (Some(c), None) => Ok(c),
        _ => Err(format!("delimiter must be a single character, got '{}'", value)),
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run one statement and print its result
    Query {
        /// SQL text
        sql: String,

        /// Positional parameter (NULL, true/false, numbers, or text; quote as 'x' to force text)
        #[arg(short, long = "param")]
        params: Vec<String>,
    },

    /// Run a script of statements separated by `;` or `GO` lines
    Run {
        /// Script file, or `-` for standard input
        file: PathBuf,
    },

    /// List tables and views
    Tables,

    /// Show the columns of a table
    Describe {
        /// Table name, optionally schema-qualified
        table: String,
    },

    /// Check that the database is reachable
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_with_params() {
        let args = Args::parse_from([
            "sqltab",
            "--url",
            "sqlite::memory:",
            "query",
            "SELECT ?, ?",
            "--param",
            "3",
            "-p",
            "Hamburger",
        ]);
        assert_eq!(args.connection.url.as_deref(), Some("sqlite::memory:"));
        match args.command {
            Command::Query { sql, params } => {
                assert_eq!(sql, "SELECT ?, ?");
                assert_eq!(params, vec!["3", "Hamburger"]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::parse_from([
            "sqltab", "tables", "--driver", "sqlserver", "--host", "db", "--format", "csv", "-vv",
        ]);
        assert_eq!(args.verbose, 2);
        assert_eq!(args.connection.driver, Some(Driver::Mssql));
        assert_eq!(args.render.format, OutputFormat::Csv);
        assert_eq!(args.render.options().delimiter, ',');

        let overrides = args.connection.overrides();
        assert_eq!(overrides.database_type, Some(DatabaseType::Mssql));
        assert_eq!(overrides.host.as_deref(), Some("db"));
    }

    #[test]
    fn test_render_options() {
        let args = Args::parse_from([
            "sqltab",
            "--null-token",
            "",
            "--delimiter",
            "|",
            "--no-header",
            "--max-rows",
            "5",
            "ping",
        ]);
        let options = args.render.options();
        assert_eq!(options.null_token, "");
        assert_eq!(options.delimiter, '|');
        assert!(!options.include_header);
        assert!(options.escape_fields);
        assert_eq!(options.max_rows, Some(5));
    }

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["sqltab", "describe", "dbo.Menu"]);
        assert_eq!(args.render.options(), RenderOptions::default());
        assert_eq!(args.verbose, 0);
    }

    #[test]
    fn test_parse_delimiter() {
        assert_eq!(parse_delimiter("\\t"), Ok('\t'));
        assert_eq!(parse_delimiter("tab"), Ok('\t'));
        assert_eq!(parse_delimiter(";"), Ok(';'));
        assert!(parse_delimiter("ab").is_err());
        assert!(parse_delimiter("").is_err());
        assert!(parse_delimiter("\\n").is_err());
        assert_eq!(parse_delimiter(","), Ok(','));
    }

    #[test]
    fn test_delimiter_cannot_clash_with_escapes() {
        for bad in ["n", "r", "t", "x", "7", "\\", "é"] {
            assert!(parse_delimiter(bad).is_err(), "{:?} was accepted", bad);
        }
        assert!(Args::try_parse_from(["sqltab", "--delimiter", "n", "ping"]).is_err());
    }
}
