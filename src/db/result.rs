// Result Sets
// Materialized rows returned by a driver and the forward-only cursor renderers consume

use crate::db::schema::ColumnInfo;
use crate::db::traits::CellValue;
use thiserror::Error;

/// Errors raised while reading rows from a cursor
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CursorError {
    #[error("cursor is exhausted: end of data was already reported")]
    Exhausted,

    #[error("failed to fetch row: {0}")]
    Fetch(String),
}

/// Forward-only, single-pass access to the rows of a result.
///
/// `next_row` returns `Ok(None)` exactly once at end of data; any later call
/// fails with [`CursorError::Exhausted`].
pub trait RowCursor {
    /// Column schema, in the order the source reported it
    fn columns(&self) -> &[ColumnInfo];

    /// Advance to the next row
    fn next_row(&mut self) -> Result<Option<Vec<CellValue>>, CursorError>;
}

/// A fully fetched result set
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    columns: Vec<ColumnInfo>,
    rows: Vec<Vec<CellValue>>,
    position: usize,
    after_last: bool,
}

impl ResultSet {
    pub fn new(columns: Vec<ColumnInfo>, rows: Vec<Vec<CellValue>>) -> Self {
        Self {
            columns,
            rows,
            position: 0,
            after_last: false,
        }
    }

    /// A result with columns but no rows
    pub fn empty(columns: Vec<ColumnInfo>) -> Self {
        Self::new(columns, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }

    /// Move the cursor back before the first row
    pub fn rewind(&mut self) {
        self.position = 0;
        self.after_last = false;
    }

    /// Zero-based ordinal of a column, matched case-insensitively
    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// 1-based number of the row last returned, 0 before the first row and after the last
    pub fn row_number(&self) -> usize {
        if self.after_last {
            0
        } else {
            self.position
        }
    }

    pub fn is_after_last(&self) -> bool {
        self.after_last
    }
}

impl RowCursor for ResultSet {
    fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    fn next_row(&mut self) -> Result<Option<Vec<CellValue>>, CursorError> {
        if self.after_last {
            return Err(CursorError::Exhausted);
        }
        match self.rows.get(self.position) {
            Some(row) => {
                self.position += 1;
                Ok(Some(row.clone()))
            }
            None => {
                self.after_last = true;
                Ok(None)
            }
        }
    }
}
