// Schema Metadata
// Column and table descriptions shared by every driver, plus declared-type parsing

use serde::{Deserialize, Serialize};

/// Logical column type, derived from the driver's declared type name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Boolean,
    Integer,
    Decimal,
    Float,
    Text,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Binary,
    /// Dynamically typed or unrecognised (SQLite without a declared type, xml, json, ...)
    Unknown,
}

impl ColumnKind {
    /// Whether cells of this column are rendered as numbers
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnKind::Integer | ColumnKind::Decimal | ColumnKind::Float)
    }
}

/// Represents a column in a result set, table or view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Native type name as reported by the driver (e.g. `nvarchar`, `numeric(6,2)`)
    pub data_type: String,
    pub kind: ColumnKind,
    pub max_length: Option<i32>,
    pub precision: Option<i32>,
    pub scale: Option<i32>,
    pub is_nullable: bool,
    pub is_primary_key: bool,
    pub is_identity: bool,
    pub column_default: Option<String>,
    pub ordinal_position: i32,
}

impl ColumnInfo {
    /// Describe a column from its name and declared type.
    ///
    /// Precision, scale and length are taken from the type modifier when present,
    /// so `numeric(6,2)` yields precision 6 and scale 2.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        let data_type = data_type.into();
        let declared = DeclaredType::parse(&data_type);
        let (precision, scale, max_length) = match declared.kind {
            ColumnKind::Decimal => {
                // DECIMAL(p) means scale 0; a bare DECIMAL leaves the scale to each value
                let scale = declared.second.or(declared.first.map(|_| 0));
                (declared.first, scale, None)
            }
            ColumnKind::Text | ColumnKind::Binary => (None, None, declared.first),
            _ => (None, None, None),
        };

        Self {
            name: name.into(),
            data_type,
            kind: declared.kind,
            max_length,
            precision,
            scale,
            is_nullable: true,
            is_primary_key: false,
            is_identity: false,
            column_default: None,
            ordinal_position: 0,
        }
    }

    pub fn with_ordinal(mut self, ordinal_position: i32) -> Self {
        self.ordinal_position = ordinal_position;
        self
    }

    /// Override precision and scale reported separately from the type name
    pub fn with_numeric(mut self, precision: Option<i32>, scale: Option<i32>) -> Self {
        if precision.is_some() {
            self.precision = precision;
        }
        if scale.is_some() {
            self.scale = scale;
        }
        self
    }

    /// Fixed number of fractional digits numeric cells of this column render with
    pub fn display_scale(&self) -> Option<u32> {
        if self.kind != ColumnKind::Decimal {
            return None;
        }
        self.scale.and_then(|s| u32::try_from(s).ok())
    }
}

/// Represents a table or view in the database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub schema_name: String,
    pub table_name: String,
    pub table_type: String, // "BASE TABLE", "VIEW", "table", ...
}

/// Split a possibly schema-qualified table name, falling back to `default_schema`
pub fn split_table_name<'a>(name: &'a str, default_schema: &'a str) -> (&'a str, &'a str) {
    match name.split_once('.') {
        Some((schema, table)) if !schema.is_empty() && !table.is_empty() => {
            (trim_identifier(schema), trim_identifier(table))
        }
        _ => (default_schema, trim_identifier(name)),
    }
}

fn trim_identifier(ident: &str) -> &str {
    ident
        .trim()
        .trim_start_matches(['[', '"', '`'])
        .trim_end_matches([']', '"', '`'])
}

/// A declared column type split into its base name and up to two numeric modifiers
#[derive(Debug, Clone, PartialEq)]
struct DeclaredType {
    kind: ColumnKind,
    first: Option<i32>,
    second: Option<i32>,
}

impl DeclaredType {
    fn parse(declared: &str) -> Self {
        let lowered = declared.trim().to_lowercase();
        let (base, modifiers) = match lowered.split_once('(') {
            Some((base, rest)) => (base.trim().to_string(), rest.trim_end_matches(')').to_string()),
            None => (lowered.clone(), String::new()),
        };

        let mut numbers = modifiers.split(',').map(|m| m.trim().parse::<i32>().ok());
        let first = numbers.next().flatten();
        let second = numbers.next().flatten();

        Self {
            kind: kind_for_base_type(&base),
            first,
            second,
        }
    }
}

fn kind_for_base_type(base: &str) -> ColumnKind {
    match base {
        "bit" | "bool" | "boolean" => ColumnKind::Boolean,
        "tinyint" | "smallint" | "int" | "integer" | "bigint" | "int2" | "int4" | "int8"
        | "mediumint" | "serial" | "bigserial" | "smallserial" | "oid" => ColumnKind::Integer,
        "decimal" | "numeric" | "money" | "smallmoney" | "number" => ColumnKind::Decimal,
        "real" | "float" | "float4" | "float8" | "double" | "double precision" => ColumnKind::Float,
        "char" | "nchar" | "varchar" | "nvarchar" | "text" | "ntext" | "character"
        | "character varying" | "bpchar" | "name" | "clob" | "string" | "uniqueidentifier"
        | "uuid" | "citext" => ColumnKind::Text,
        "date" => ColumnKind::Date,
        "time" | "time without time zone" => ColumnKind::Time,
        "datetime" | "datetime2" | "smalldatetime" | "timestamp"
        | "timestamp without time zone" => ColumnKind::Timestamp,
        "datetimeoffset" | "timestamptz" | "timestamp with time zone" => ColumnKind::TimestampTz,
        "binary" | "varbinary" | "image" | "blob" | "bytea" => ColumnKind::Binary,
        _ if base.contains("int") => ColumnKind::Integer,
        _ if base.contains("char") || base.contains("clob") || base.contains("text") => {
            ColumnKind::Text
        }
        _ => ColumnKind::Unknown,
    }
}
