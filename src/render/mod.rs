// Result Rendering
// Turns a row cursor into delimited text, CSV or JSON on any output sink

pub mod coerce;
pub mod csv;
pub mod json;
pub mod table;

pub use coerce::{coerce, CellCoercer};
pub use csv::CsvRenderer;
pub use json::JsonRenderer;
pub use table::{RenderedTable, TableRenderer};

use crate::db::result::{CursorError, RowCursor};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::io::Write;
use thiserror::Error;

/// Output format for row-returning statements
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Header line plus one tab-delimited line per row
    #[default]
    Tab,
    /// RFC 4180 style CSV
    Csv,
    /// JSON array with one object per row
    Json,
}

impl OutputFormat {
    pub fn default_delimiter(&self) -> char {
        match self {
            OutputFormat::Csv => ',',
            OutputFormat::Tab | OutputFormat::Json => '\t',
        }
    }
}

/// Options shared by every renderer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderOptions {
    /// Field separator (tab and CSV output)
    pub delimiter: char,
    /// Text written for NULL cells
    pub null_token: String,
    /// Emit the header line (tab and CSV output)
    pub include_header: bool,
    /// Backslash-escape the delimiter, backslash and line breaks inside fields (tab output)
    pub escape_fields: bool,
    /// Stop after this many rows (None = all rows)
    pub max_rows: Option<usize>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            delimiter: '\t',
            null_token: "NULL".to_string(),
            include_header: true,
            escape_fields: true,
            max_rows: None,
        }
    }
}

impl RenderOptions {
    /// Defaults for a given output format
    pub fn for_format(format: OutputFormat) -> Self {
        Self {
            delimiter: format.default_delimiter(),
            ..Default::default()
        }
    }

    pub(crate) fn row_limit(&self) -> usize {
        self.max_rows.unwrap_or(usize::MAX)
    }
}

/// Rendering errors
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("malformed result: row {row} has {actual} cells but the result has {expected} columns")]
    MalformedResult {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("cursor is exhausted: iteration attempted after end of data")]
    ExhaustedCursor,

    #[error("failed to fetch row: {0}")]
    Fetch(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<CursorError> for RenderError {
    fn from(err: CursorError) -> Self {
        match err {
            CursorError::Exhausted => RenderError::ExhaustedCursor,
            CursorError::Fetch(msg) => RenderError::Fetch(msg),
        }
    }
}

/// Common interface of the output formats
pub trait ResultRenderer {
    /// Consume the cursor and write every row to `out`, returning the number of rows written
    fn render_to(&self, cursor: &mut dyn RowCursor, out: &mut dyn Write) -> Result<usize, RenderError>;
}

/// Build the renderer for an output format
pub fn renderer_for(format: OutputFormat, options: RenderOptions) -> Box<dyn ResultRenderer> {
    match format {
        OutputFormat::Tab => Box::new(TableRenderer::new(options)),
        OutputFormat::Csv => Box::new(CsvRenderer::new(options)),
        OutputFormat::Json => Box::new(JsonRenderer::new(options)),
    }
}

/// Fetch the next row and verify it matches the column count.
/// `row` is the 1-based number the row will have.
pub(crate) fn next_checked_row(
    cursor: &mut dyn RowCursor,
    row: usize,
) -> Result<Option<Vec<crate::db::CellValue>>, RenderError> {
    let expected = cursor.columns().len();
    match cursor.next_row()? {
        Some(cells) if cells.len() != expected => Err(RenderError::MalformedResult {
            row,
            expected,
            actual: cells.len(),
        }),
        other => Ok(other),
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_renderer_for_each_format() {
        for format in [OutputFormat::Tab, OutputFormat::Csv, OutputFormat::Json] {
            let renderer = renderer_for(format, RenderOptions::for_format(format));
            let mut out = Vec::new();
            let written = renderer.render_to(&mut restaurants(), &mut out).unwrap();
            assert_eq!(written, 2, "{:?}", format);
            assert!(String::from_utf8(out).unwrap().contains("Hamburger"));
        }
    }

    #[test]
    fn test_format_defaults() {
        assert_eq!(RenderOptions::for_format(OutputFormat::Csv).delimiter, ',');
        assert_eq!(RenderOptions::for_format(OutputFormat::Tab).delimiter, '\t');
        assert_eq!(RenderOptions::default().null_token, "NULL");
    }
}
