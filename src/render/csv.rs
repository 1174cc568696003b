// CSV Renderer
// Writes a row cursor as CSV, quoting fields that contain the delimiter, quotes or line breaks

use super::{next_checked_row, CellCoercer, RenderError, RenderOptions, ResultRenderer};
use crate::db::result::RowCursor;
use std::io::Write;

const QUOTE: char = '"';

/// CSV renderer for query results
pub struct CsvRenderer {
    options: RenderOptions,
    coercer: CellCoercer,
}

impl CsvRenderer {
    pub fn new(options: RenderOptions) -> Self {
        let coercer = CellCoercer::new(options.null_token.clone());
        Self { options, coercer }
    }

    pub fn with_default_options() -> Self {
        Self::new(RenderOptions::for_format(super::OutputFormat::Csv))
    }

    /// Render into a string (for smaller results)
    pub fn render_to_string(&self, cursor: &mut dyn RowCursor) -> Result<String, RenderError> {
        let mut output = Vec::new();
        self.write_csv(&mut output, cursor)?;
        String::from_utf8(output).map_err(|e| RenderError::SerializationError(e.to_string()))
    }

    fn write_csv(&self, writer: &mut dyn Write, cursor: &mut dyn RowCursor) -> Result<usize, RenderError> {
        if self.options.include_header {
            let header: Vec<String> = cursor
                .columns()
                .iter()
                .map(|col| self.escape_csv_field(&col.name))
                .collect();
            self.write_line(writer, &header)?;
        }

        let limit = self.options.row_limit();
        let mut written = 0;
        while written < limit {
            let Some(row) = next_checked_row(cursor, written + 1)? else {
                break;
            };
            let fields: Vec<String> = cursor
                .columns()
                .iter()
                .zip(row.iter())
                .map(|(col, cell)| self.escape_csv_field(&self.coercer.coerce_in(cell, col)))
                .collect();
            self.write_line(writer, &fields)?;
            written += 1;
        }

        Ok(written)
    }

    fn write_line(&self, writer: &mut dyn Write, fields: &[String]) -> Result<(), RenderError> {
        writeln!(writer, "{}", fields.join(&self.options.delimiter.to_string()))?;
        Ok(())
    }

    fn escape_csv_field(&self, value: &str) -> String {
        let needs_quoting = value.contains(self.options.delimiter)
            || value.contains(QUOTE)
            || value.contains('\n')
            || value.contains('\r');

        if needs_quoting {
            let escaped = value.replace(QUOTE, "\"\"");
            format!("{}{}{}", QUOTE, escaped, QUOTE)
        } else {
            value.to_string()
        }
    }
}

impl ResultRenderer for CsvRenderer {
    fn render_to(&self, cursor: &mut dyn RowCursor, out: &mut dyn Write) -> Result<usize, RenderError> {
        self.write_csv(out, cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::result::ResultSet;
    use crate::db::schema::ColumnInfo;
    use crate::db::CellValue;
    use crate::render::test_support::restaurants;

    fn sample_columns() -> Vec<ColumnInfo> {
        vec![
            ColumnInfo::new("id", "int4"),
            ColumnInfo::new("name", "nvarchar"),
            ColumnInfo::new("value", "float8"),
        ]
    }

    fn sample_rows() -> Vec<Vec<CellValue>> {
        vec![
            vec![CellValue::Int(1), CellValue::from("Alice"), CellValue::Float(100.5)],
            vec![CellValue::Int(2), CellValue::from("Bob, Jr."), CellValue::Null],
            vec![
                CellValue::Int(3),
                CellValue::from("Charlie \"The Great\""),
                CellValue::Float(200.0),
            ],
        ]
    }

    fn sample() -> ResultSet {
        ResultSet::new(sample_columns(), sample_rows())
    }

    #[test]
    fn test_csv_basic() {
        let csv = CsvRenderer::with_default_options()
            .render_to_string(&mut sample())
            .unwrap();

        assert!(csv.starts_with("id,name,value\n"));
        assert!(csv.contains("1,Alice,100.5\n"));
        assert!(csv.contains("2,\"Bob, Jr.\",NULL\n"));
        assert!(csv.contains("\"Charlie \"\"The Great\"\"\""));
        assert!(csv.ends_with("200\n"));
    }

    #[test]
    fn test_csv_no_headers() {
        let options = RenderOptions {
            include_header: false,
            ..RenderOptions::for_format(crate::render::OutputFormat::Csv)
        };
        let csv = CsvRenderer::new(options).render_to_string(&mut sample()).unwrap();
        assert!(csv.starts_with("1,Alice,100.5"));
    }

    #[test]
    fn test_csv_custom_delimiter() {
        let options = RenderOptions {
            delimiter: ';',
            ..Default::default()
        };
        let csv = CsvRenderer::new(options).render_to_string(&mut sample()).unwrap();
        assert!(csv.contains("id;name;value"));
        assert!(csv.contains("2;Bob, Jr.;NULL"));
    }

    #[test]
    fn test_csv_uses_column_scale_and_unicode() {
        let csv = CsvRenderer::with_default_options()
            .render_to_string(&mut restaurants())
            .unwrap();
        assert!(csv.contains("4,Ресторан #2,12.50,NULL\n"));
    }
}
