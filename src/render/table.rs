// Tabular Result Renderer
// Header line of column names followed by one delimited line per row

use super::{next_checked_row, CellCoercer, RenderError, RenderOptions, ResultRenderer};
use crate::db::result::RowCursor;
use crate::db::CellValue;
use std::fmt;
use std::io::Write;

/// Rendered text, one entry per line without line terminators
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RenderedTable {
    lines: Vec<String>,
}

impl RenderedTable {
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

impl fmt::Display for RenderedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

/// Renders rows as delimited text lines
pub struct TableRenderer {
    options: RenderOptions,
    coercer: CellCoercer,
}

impl TableRenderer {
    pub fn new(options: RenderOptions) -> Self {
        let coercer = CellCoercer::new(options.null_token.clone());
        Self { options, coercer }
    }

    pub fn with_default_options() -> Self {
        Self::new(RenderOptions::default())
    }

    /// Render the whole cursor into memory
    pub fn render(&self, cursor: &mut dyn RowCursor) -> Result<RenderedTable, RenderError> {
        let mut lines = Vec::new();
        self.render_lines(cursor, |line| {
            lines.push(line);
            Ok(())
        })?;
        Ok(RenderedTable { lines })
    }

    /// Stream lines to `writer` as rows are read; returns the number of data rows written
    pub fn render_to<W: Write + ?Sized>(
        &self,
        cursor: &mut dyn RowCursor,
        writer: &mut W,
    ) -> Result<usize, RenderError> {
        self.render_lines(cursor, |line| {
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
            Ok(())
        })
    }

    fn render_lines<F>(&self, cursor: &mut dyn RowCursor, mut emit: F) -> Result<usize, RenderError>
    where
        F: FnMut(String) -> Result<(), RenderError>,
    {
        if self.options.include_header {
            let header = cursor
                .columns()
                .iter()
                .map(|col| self.field(&col.name))
                .collect::<Vec<_>>();
            emit(self.join(&header))?;
        }

        let limit = self.options.row_limit();
        let mut written = 0;
        while written < limit {
            let Some(row) = next_checked_row(cursor, written + 1)? else {
                break;
            };
            let fields = cursor
                .columns()
                .iter()
                .zip(row.iter())
                .map(|(col, cell)| match cell {
                    // Null token is written as configured, never escaped
                    CellValue::Null => self.options.null_token.clone(),
                    _ => self.field(&self.coercer.coerce_in(cell, col)),
                })
                .collect::<Vec<_>>();
            emit(self.join(&fields))?;
            written += 1;
        }

        Ok(written)
    }

    fn join(&self, fields: &[String]) -> String {
        let mut sep = [0u8; 4];
        fields.join(self.options.delimiter.encode_utf8(&mut sep))
    }

    fn field(&self, text: &str) -> String {
        if self.options.escape_fields {
            escape_field(text, self.options.delimiter)
        } else {
            text.to_string()
        }
    }
}

impl ResultRenderer for TableRenderer {
    fn render_to(&self, cursor: &mut dyn RowCursor, out: &mut dyn Write) -> Result<usize, RenderError> {
        TableRenderer::render_to(self, cursor, out)
    }
}

/// Backslash-escape a field so it cannot break the line or field structure
pub fn escape_field(text: &str, delimiter: char) -> String {
    if !text.contains(|c: char| c == '\\' || c == '\n' || c == '\r' || c == delimiter) {
        return text.to_string();
    }
    let mut escaped = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' if delimiter == '\t' => escaped.push_str("\\t"),
            c if c == delimiter => {
                escaped.push('\\');
                escaped.push(c);
            }
            c => escaped.push(c),
        }
    }
    escaped
}
