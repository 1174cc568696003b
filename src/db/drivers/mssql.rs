// MS-SQL Driver
// Implements DatabaseDriver trait for MS-SQL using tiberius over a single TCP connection

use crate::db::decimal::Decimal;
use crate::db::query::statement_returns_rows;
use crate::db::result::ResultSet;
use crate::db::schema::{split_table_name, ColumnInfo, TableInfo};
use crate::db::traits::{
    CellValue, Connection, DatabaseConfig, DatabaseDriver, DatabaseError, DatabaseType,
    StatementOutcome,
};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use futures::TryStreamExt;
use std::borrow::Cow;
use tiberius::numeric::Numeric;
use tiberius::{
    AuthMethod, Client, ColumnData, ColumnType, Config, EncryptionLevel, FromSql, QueryItem, ToSql,
};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

type MssqlClient = Client<Compat<TcpStream>>;

/// Login failed because the password has expired
const PASSWORD_EXPIRED: u32 = 18488;

/// Rows collected for one result set of a batch
struct PendingResult {
    columns: Vec<ColumnInfo>,
    types: Vec<ColumnType>,
    rows: Vec<Vec<CellValue>>,
}

/// MS-SQL specific connection wrapper
pub struct MssqlConnection {
    pub id: String,
    client: Mutex<MssqlClient>,
}

#[async_trait::async_trait]
impl Connection for MssqlConnection {
    fn connection_id(&self) -> &str {
        &self.id
    }

    async fn is_alive(&self) -> bool {
        let mut client = self.client.lock().await;
        let alive = match client.simple_query("SELECT 1").await {
            Ok(stream) => stream.into_results().await.is_ok(),
            Err(_) => false,
        };
        alive
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn std::any::Any + Send> {
        self
    }
}

/// MS-SQL driver implementation
pub struct MssqlDriver;

impl MssqlDriver {
    /// Create a new MS-SQL driver
    pub fn new() -> Self {
        Self
    }

    /// Convert unified DatabaseConfig to a tiberius Config
    fn to_tiberius_config(config: &DatabaseConfig) -> Result<Config, DatabaseError> {
        let host = config
            .host
            .as_deref()
            .ok_or_else(|| DatabaseError::InvalidConfig("Host is required".to_string()))?;
        let username = config
            .username
            .as_deref()
            .ok_or_else(|| DatabaseError::InvalidConfig("Username is required".to_string()))?;

        let mut tiberius_config = Config::new();
        tiberius_config.host(host);
        tiberius_config.port(config.get_port());
        tiberius_config.database(&config.database);
        tiberius_config.authentication(AuthMethod::sql_server(username, &config.password));

        if config.mssql_trust_cert.unwrap_or(true) {
            tiberius_config.trust_cert();
        }

        tiberius_config.encryption(if config.mssql_encrypt.unwrap_or(false) {
            EncryptionLevel::Required
        } else {
            EncryptionLevel::Off
        });

        Ok(tiberius_config)
    }

    async fn open_tcp(addr: &str) -> Result<TcpStream, DatabaseError> {
        let tcp = TcpStream::connect(addr)
            .await
            .map_err(|e| DatabaseError::ConnectionFailure(format!("TCP connection to {} failed: {}", addr, e)))?;
        tcp.set_nodelay(true)
            .map_err(|e| DatabaseError::ConnectionFailure(format!("Failed to set TCP_NODELAY: {}", e)))?;
        Ok(tcp)
    }

    async fn open(config: &DatabaseConfig) -> Result<MssqlClient, DatabaseError> {
        let tiberius_config = Self::to_tiberius_config(config)?;
        let tcp = Self::open_tcp(&tiberius_config.get_addr()).await?;

        match Client::connect(tiberius_config.clone(), tcp.compat_write()).await {
            Ok(client) => Ok(client),
            // The server may redirect the login to another node
            Err(tiberius::error::Error::Routing { host, port }) => {
                info!("login redirected to {}:{}", host, port);
                let mut routed = tiberius_config;
                routed.host(&host);
                routed.port(port);
                let tcp = Self::open_tcp(&routed.get_addr()).await?;
                Client::connect(routed, tcp.compat_write())
                    .await
                    .map_err(connection_error)
            }
            Err(e) => Err(connection_error(e)),
        }
    }

    fn downcast(conn: &dyn Connection) -> Result<&MssqlConnection, DatabaseError> {
        conn.as_any()
            .downcast_ref::<MssqlConnection>()
            .ok_or(DatabaseError::InvalidConnection)
    }

    /// Convert Tiberius ColumnType to string
    fn column_type_to_string(col_type: &ColumnType) -> String {
        match col_type {
            ColumnType::Int1 => "tinyint".to_string(),
            ColumnType::Int2 => "smallint".to_string(),
            ColumnType::Int4 => "int".to_string(),
            ColumnType::Int8 => "bigint".to_string(),
            ColumnType::Intn => "int".to_string(),
            ColumnType::Float4 => "real".to_string(),
            ColumnType::Float8 => "float".to_string(),
            ColumnType::Floatn => "float".to_string(),
            ColumnType::Decimaln | ColumnType::Numericn => "decimal".to_string(),
            ColumnType::Money | ColumnType::Money4 => "money".to_string(),
            ColumnType::Bit | ColumnType::Bitn => "bit".to_string(),
            ColumnType::BigVarChar | ColumnType::BigChar | ColumnType::NVarchar | ColumnType::NChar
            | ColumnType::Text | ColumnType::NText => "nvarchar".to_string(),
            ColumnType::Datetime | ColumnType::Datetimen => "datetime".to_string(),
            ColumnType::Datetime2 => "datetime2".to_string(),
            ColumnType::Datetime4 => "smalldatetime".to_string(),
            ColumnType::Daten => "date".to_string(),
            ColumnType::Timen => "time".to_string(),
            ColumnType::DatetimeOffsetn => "datetimeoffset".to_string(),
            ColumnType::BigVarBin | ColumnType::BigBinary => "varbinary".to_string(),
            ColumnType::Image => "image".to_string(),
            ColumnType::Guid => "uniqueidentifier".to_string(),
            ColumnType::Xml => "xml".to_string(),
            ColumnType::Null => "null".to_string(),
            _ => format!("{:?}", col_type).to_lowercase(),
        }
    }
}

impl Default for MssqlDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn connection_error(err: tiberius::error::Error) -> DatabaseError {
    if let tiberius::error::Error::Server(e) = &err {
        if e.code() == PASSWORD_EXPIRED {
            return DatabaseError::ConnectionFailure(format!("Password expired: {}", e.message()));
        }
    }
    DatabaseError::ConnectionFailure(err.to_string())
}

fn statement_error(err: tiberius::error::Error) -> DatabaseError {
    match &err {
        tiberius::error::Error::Server(e) => {
            DatabaseError::StatementFailure(format!("{} (error {})", e.message(), e.code()))
        }
        tiberius::error::Error::Io { .. } => DatabaseError::ConnectionFailure(err.to_string()),
        _ => DatabaseError::StatementFailure(err.to_string()),
    }
}

/// Extract cell value from a decoded column.
///
/// Money arrives as a float and is shown with its four fixed decimals.
fn cell_from_column_data(data: ColumnData<'static>, col_type: &ColumnType) -> Result<CellValue, DatabaseError> {
    let cell = match data {
        ColumnData::U8(v) => v.map(|v| CellValue::Int(v.into())),
        ColumnData::I16(v) => v.map(|v| CellValue::Int(v.into())),
        ColumnData::I32(v) => v.map(|v| CellValue::Int(v.into())),
        ColumnData::I64(v) => v.map(CellValue::Int),
        ColumnData::F32(v) => v.map(|v| CellValue::Float(v.into())),
        ColumnData::F64(v) => v.map(|v| {
            if matches!(col_type, ColumnType::Money | ColumnType::Money4) {
                Decimal::parse(&format!("{:.4}", v))
                    .map(CellValue::Decimal)
                    .unwrap_or(CellValue::Float(v))
            } else {
                CellValue::Float(v)
            }
        }),
        ColumnData::Bit(v) => v.map(CellValue::Bool),
        ColumnData::String(v) => v.map(|s| CellValue::Text(s.into_owned())),
        ColumnData::Guid(v) => v.map(|u| CellValue::Text(u.to_string())),
        ColumnData::Binary(v) => v.map(|b| CellValue::Binary(b.into_owned())),
        ColumnData::Numeric(v) => {
            v.map(|n| CellValue::Decimal(Decimal::from_unscaled(n.value(), n.scale().into())))
        }
        ColumnData::Xml(v) => v.map(|xml| CellValue::Text(xml.into_owned().into_string())),
        other => temporal_cell(&other).map_err(statement_error)?,
    };
    Ok(cell.unwrap_or(CellValue::Null))
}

fn temporal_cell(data: &ColumnData<'static>) -> tiberius::Result<Option<CellValue>> {
    Ok(match data {
        ColumnData::Date(_) => NaiveDate::from_sql(data)?.map(CellValue::Date),
        ColumnData::Time(_) => NaiveTime::from_sql(data)?.map(CellValue::Time),
        ColumnData::DateTimeOffset(_) => {
            DateTime::<FixedOffset>::from_sql(data)?.map(CellValue::TimestampTz)
        }
        _ => NaiveDateTime::from_sql(data)?.map(CellValue::Timestamp),
    })
}

impl ToSql for CellValue {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            CellValue::Null => ColumnData::String(None),
            CellValue::Bool(b) => ColumnData::Bit(Some(*b)),
            CellValue::Int(i) => ColumnData::I64(Some(*i)),
            CellValue::Decimal(d) => match d.to_unscaled() {
                Some((value, scale)) => ColumnData::Numeric(Some(Numeric::new_with_scale(value, scale))),
                None => ColumnData::String(Some(Cow::Owned(d.to_string()))),
            },
            CellValue::Float(f) => ColumnData::F64(Some(*f)),
            CellValue::Text(s) => ColumnData::String(Some(Cow::Borrowed(s.as_str()))),
            CellValue::Date(d) => d.to_sql(),
            CellValue::Time(t) => t.to_sql(),
            CellValue::Timestamp(ts) => ts.to_sql(),
            CellValue::TimestampTz(ts) => ts.to_sql(),
            CellValue::Binary(b) => ColumnData::Binary(Some(Cow::Borrowed(b.as_slice()))),
        }
    }
}

#[async_trait::async_trait]
impl DatabaseDriver for MssqlDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Mssql
    }

    async fn test_connection(&self, config: &DatabaseConfig) -> Result<bool, DatabaseError> {
        let client = Self::open(config).await?;
        client
            .close()
            .await
            .map_err(|e| DatabaseError::ConnectionFailure(e.to_string()))?;
        Ok(true)
    }

    async fn connect(&self, config: &DatabaseConfig) -> Result<Box<dyn Connection>, DatabaseError> {
        let client = Self::open(config).await?;
        debug!("connected to {}", config.describe());

        Ok(Box::new(MssqlConnection {
            id: config.id.clone(),
            client: Mutex::new(client),
        }))
    }

    async fn close(&self, conn: Box<dyn Connection>) -> Result<(), DatabaseError> {
        let mssql_conn = conn
            .into_any()
            .downcast::<MssqlConnection>()
            .map_err(|_| DatabaseError::InvalidConnection)?;
        mssql_conn
            .client
            .into_inner()
            .close()
            .await
            .map_err(|e| DatabaseError::ConnectionFailure(e.to_string()))
    }

    async fn execute(
        &self,
        conn: &dyn Connection,
        sql: &str,
        params: &[CellValue],
    ) -> Result<StatementOutcome, DatabaseError> {
        let mssql_conn = Self::downcast(conn)?;
        let mut client = mssql_conn.client.lock().await;
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();

        // The TDS stream does not tell a count-only batch apart up front
        if !statement_returns_rows(sql) {
            let result = client
                .execute(sql, &param_refs)
                .await
                .map_err(statement_error)?;
            return Ok(StatementOutcome::RowCount(result.total()));
        }

        let stream = if param_refs.is_empty() {
            client.simple_query(sql).await
        } else {
            client.query(sql, &param_refs).await
        };
        let mut stream = stream.map_err(statement_error)?;

        // A batch can hold several SELECTs; each metadata token starts a new result set
        let mut pending: Vec<PendingResult> = Vec::new();
        while let Some(item) = stream.try_next().await.map_err(statement_error)? {
            match item {
                QueryItem::Metadata(meta) => {
                    let (columns, types): (Vec<ColumnInfo>, Vec<ColumnType>) = meta
                        .columns()
                        .iter()
                        .enumerate()
                        .map(|(idx, col)| {
                            let info = ColumnInfo::new(col.name(), Self::column_type_to_string(&col.column_type()))
                                .with_ordinal(idx as i32 + 1);
                            (info, col.column_type())
                        })
                        .unzip();
                    pending.push(PendingResult { columns, types, rows: Vec::new() });
                }
                QueryItem::Row(row) => {
                    let Some(current) = pending.last_mut() else {
                        continue;
                    };
                    let cells = row
                        .into_iter()
                        .zip(current.types.iter())
                        .map(|(value, col_type)| cell_from_column_data(value, col_type))
                        .collect::<Result<Vec<_>, _>>()?;
                    current.rows.push(cells);
                }
            }
        }

        debug!(result_sets = pending.len(), "batch finished");
        Ok(StatementOutcome::from_result_sets(
            pending.into_iter().map(|p| ResultSet::new(p.columns, p.rows)).collect(),
        ))
    }

    async fn get_tables(&self, conn: &dyn Connection) -> Result<Vec<TableInfo>, DatabaseError> {
        let mssql_conn = Self::downcast(conn)?;
        let mut client = mssql_conn.client.lock().await;

        let query = r#"
            SELECT
                s.name as schema_name,
                o.name as table_name,
                CASE o.type WHEN 'V' THEN 'VIEW' ELSE 'BASE TABLE' END as table_type
            FROM sys.objects o
            JOIN sys.schemas s ON o.schema_id = s.schema_id
            WHERE o.type IN ('U', 'V') AND o.is_ms_shipped = 0
            ORDER BY s.name, o.name
        "#;

        let stream = client.simple_query(query).await.map_err(statement_error)?;
        let rows = stream.into_first_result().await.map_err(statement_error)?;

        rows.iter()
            .map(|row| {
                let text = |idx: usize| -> Result<String, DatabaseError> {
                    Ok(row
                        .try_get::<&str, _>(idx)
                        .map_err(statement_error)?
                        .unwrap_or_default()
                        .to_string())
                };
                Ok(TableInfo {
                    schema_name: text(0)?,
                    table_name: text(1)?,
                    table_type: text(2)?,
                })
            })
            .collect()
    }

    async fn get_columns(
        &self,
        conn: &dyn Connection,
        table_name: &str,
    ) -> Result<Vec<ColumnInfo>, DatabaseError> {
        let mssql_conn = Self::downcast(conn)?;
        let mut client = mssql_conn.client.lock().await;
        let (schema, table) = split_table_name(table_name, DatabaseType::Mssql.default_schema());

        let query = r#"
            SELECT
                c.name as column_name,
                t.name as data_type,
                CAST(c.max_length AS int) as max_length,
                CAST(c.precision AS int) as precision,
                CAST(c.scale AS int) as scale,
                c.is_nullable,
                c.is_identity,
                OBJECT_DEFINITION(c.default_object_id) as column_default,
                c.column_id,
                CAST(CASE WHEN EXISTS (
                    SELECT 1
                    FROM sys.indexes i
                    JOIN sys.index_columns ic
                      ON i.object_id = ic.object_id AND i.index_id = ic.index_id
                    WHERE i.is_primary_key = 1
                      AND ic.object_id = c.object_id
                      AND ic.column_id = c.column_id
                ) THEN 1 ELSE 0 END AS bit) as is_primary_key
            FROM sys.columns c
            JOIN sys.types t ON c.user_type_id = t.user_type_id
            JOIN sys.objects o ON c.object_id = o.object_id
            JOIN sys.schemas s ON o.schema_id = s.schema_id
            WHERE s.name = @P1 AND o.name = @P2 AND o.type IN ('U', 'V')
            ORDER BY c.column_id
        "#;

        let stream = client
            .query(query, &[&schema, &table])
            .await
            .map_err(statement_error)?;
        let rows = stream.into_first_result().await.map_err(statement_error)?;

        rows.iter()
            .map(|row| {
                let name = row.try_get::<&str, _>(0).map_err(statement_error)?.unwrap_or_default();
                let data_type = row.try_get::<&str, _>(1).map_err(statement_error)?.unwrap_or_default();
                let max_length = row.try_get::<i32, _>(2).map_err(statement_error)?;
                let precision = row.try_get::<i32, _>(3).map_err(statement_error)?;
                let scale = row.try_get::<i32, _>(4).map_err(statement_error)?;
                let column_id = row.try_get::<i32, _>(8).map_err(statement_error)?.unwrap_or(0);

                let mut col = ColumnInfo::new(name, data_type).with_ordinal(column_id);
                if col.kind.is_numeric() {
                    col = col.with_numeric(precision, scale);
                }
                col.max_length = char_length(data_type, max_length).or(col.max_length);
                col.is_nullable = row.try_get::<bool, _>(5).map_err(statement_error)?.unwrap_or(true);
                col.is_identity = row.try_get::<bool, _>(6).map_err(statement_error)?.unwrap_or(false);
                col.column_default = row
                    .try_get::<&str, _>(7)
                    .map_err(statement_error)?
                    .map(|s| s.to_string());
                col.is_primary_key = row.try_get::<bool, _>(9).map_err(statement_error)?.unwrap_or(false);
                Ok(col)
            })
            .collect()
    }
}

/// sys.columns reports byte lengths; -1 means (max)
fn char_length(data_type: &str, max_length: Option<i32>) -> Option<i32> {
    let bytes = max_length.filter(|len| *len > 0)?;
    match data_type {
        "nchar" | "nvarchar" => Some(bytes / 2),
        "char" | "varchar" | "binary" | "varbinary" => Some(bytes),
        _ => None,
    }
}
