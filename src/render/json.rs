// JSON Renderer
// Writes a row cursor as a JSON array with one object per row, one row per line

use super::{next_checked_row, CellCoercer, RenderError, RenderOptions, ResultRenderer};
use crate::db::result::RowCursor;
use crate::db::schema::ColumnInfo;
use crate::db::CellValue;
use serde_json::{json, Map, Value};
use std::io::Write;

/// JSON renderer for query results.
///
/// Keys keep the column order. Exact decimals and temporal values are written
/// as strings in their display form; NULL is always JSON `null`.
pub struct JsonRenderer {
    options: RenderOptions,
    coercer: CellCoercer,
}

impl JsonRenderer {
    pub fn new(options: RenderOptions) -> Self {
        let coercer = CellCoercer::new(options.null_token.clone());
        Self { options, coercer }
    }

    pub fn with_default_options() -> Self {
        Self::new(RenderOptions::default())
    }

    /// Render into a string (for smaller results)
    pub fn render_to_string(&self, cursor: &mut dyn RowCursor) -> Result<String, RenderError> {
        let mut output = Vec::new();
        self.write_json_streaming(&mut output, cursor)?;
        String::from_utf8(output).map_err(|e| RenderError::SerializationError(e.to_string()))
    }

    fn write_json_streaming(
        &self,
        writer: &mut dyn Write,
        cursor: &mut dyn RowCursor,
    ) -> Result<usize, RenderError> {
        let limit = self.options.row_limit();
        let mut written = 0;

        write!(writer, "[")?;
        while written < limit {
            let Some(row) = next_checked_row(cursor, written + 1)? else {
                break;
            };
            let obj = self.row_to_json_object(cursor.columns(), &row);
            let json_str = serde_json::to_string(&obj)
                .map_err(|e| RenderError::SerializationError(e.to_string()))?;

            if written > 0 {
                write!(writer, ",")?;
            }
            write!(writer, "\n  {}", json_str)?;
            written += 1;
        }
        if written > 0 {
            writeln!(writer)?;
        }
        writeln!(writer, "]")?;

        Ok(written)
    }

    fn row_to_json_object(&self, columns: &[ColumnInfo], row: &[CellValue]) -> Value {
        let mut obj = Map::new();
        for (col, value) in columns.iter().zip(row.iter()) {
            obj.insert(col.name.clone(), self.cell_to_json_value(value, col));
        }
        Value::Object(obj)
    }

    fn cell_to_json_value(&self, value: &CellValue, column: &ColumnInfo) -> Value {
        match value {
            CellValue::Null => Value::Null,
            CellValue::Bool(b) => Value::Bool(*b),
            CellValue::Int(i) if column.display_scale().is_none() => json!(*i),
            CellValue::Float(f) if f.is_finite() && column.display_scale().is_none() => json!(*f),
            other => Value::String(self.coercer.coerce_in(other, column)),
        }
    }
}

impl ResultRenderer for JsonRenderer {
    fn render_to(&self, cursor: &mut dyn RowCursor, out: &mut dyn Write) -> Result<usize, RenderError> {
        self.write_json_streaming(out, cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::result::ResultSet;
    use crate::render::test_support::restaurants;

    fn sample_columns() -> Vec<ColumnInfo> {
        vec![
            ColumnInfo::new("id", "int4"),
            ColumnInfo::new("name", "nvarchar"),
            ColumnInfo::new("active", "bit"),
            ColumnInfo::new("ratio", "float8"),
        ]
    }

    fn sample_rows() -> Vec<Vec<CellValue>> {
        vec![
            vec![
                CellValue::Int(1),
                CellValue::from("Alice"),
                CellValue::Bool(true),
                CellValue::Float(0.5),
            ],
            vec![
                CellValue::Int(2),
                CellValue::from("Bob"),
                CellValue::Null,
                CellValue::Float(f64::NAN),
            ],
        ]
    }

    #[test]
    fn test_json_basic() {
        let mut rs = ResultSet::new(sample_columns(), sample_rows());
        let json = JsonRenderer::with_default_options().render_to_string(&mut rs).unwrap();

        let parsed: Vec<Value> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 2);

        assert_eq!(parsed[0]["id"], 1);
        assert_eq!(parsed[0]["name"], "Alice");
        assert_eq!(parsed[0]["active"], true);
        assert_eq!(parsed[0]["ratio"], 0.5);

        assert_eq!(parsed[1]["id"], 2);
        assert!(parsed[1]["active"].is_null());
        assert_eq!(parsed[1]["ratio"], "NaN");
    }

    #[test]
    fn test_json_one_row_per_line_in_column_order() {
        let json = JsonRenderer::with_default_options()
            .render_to_string(&mut restaurants())
            .unwrap();
        let lines: Vec<&str> = json.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "[");
        assert_eq!(
            lines[1],
            r#"  {"ID":3,"NAME":"Hamburger","PRICE":"3.75","MANAGER":"Bob"},"#
        );
        assert_eq!(
            lines[2],
            r#"  {"ID":4,"NAME":"Ресторан #2","PRICE":"12.50","MANAGER":null}"#
        );
        assert_eq!(lines[3], "]");
    }

    #[test]
    fn test_json_empty_result() {
        let mut rs = ResultSet::empty(sample_columns());
        let json = JsonRenderer::with_default_options().render_to_string(&mut rs).unwrap();
        assert_eq!(json, "[]\n");
    }
}
