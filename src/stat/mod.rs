//! Tabular snapshots of PostgreSQL statistics views and the delta engine
//! that turns two successive snapshots into per-second rates.
//!
//! A [`StatTable`] is produced once per poll, either from a live query
//! ([`StatTable::from_query`]) or by [`calculate_delta`]. Cells are kept as
//! text plus a validity bit; numeric meaning is derived on demand by each
//! operation that needs it.

mod delta;
mod table;

pub use delta::{DiffRange, calculate_delta, diff};
pub use table::{Cell, StatTable};

/// Error type for snapshot construction and delta computation.
#[derive(Debug, Clone, PartialEq)]
pub enum StatError {
    /// Connection is closed or broken.
    Connection(String),
    /// Query execution or row scanning failed.
    Query(String),
    /// A cell inside the diff range is not numeric.
    Parse {
        row: usize,
        column: usize,
        value: String,
    },
    /// A row does not have one cell per column.
    Shape {
        row: usize,
        expected: usize,
        got: usize,
    },
    /// The diff range points past the last column.
    DiffRange {
        start: usize,
        len: usize,
        columns: usize,
    },
}

impl std::fmt::Display for StatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatError::Connection(msg) => write!(f, "connection error: {}", msg),
            StatError::Query(msg) => write!(f, "query error: {}", msg),
            StatError::Parse { row, column, value } => write!(
                f,
                "cannot parse '{}' as a number (row {}, column {})",
                value, row, column
            ),
            StatError::Shape { row, expected, got } => write!(
                f,
                "row {} has {} cells, expected {}",
                row, got, expected
            ),
            StatError::DiffRange {
                start,
                len,
                columns,
            } => write!(
                f,
                "diff range {}..{} is out of bounds for {} columns",
                start,
                start + len,
                columns
            ),
        }
    }
}

impl std::error::Error for StatError {}

impl From<postgres::Error> for StatError {
    fn from(e: postgres::Error) -> Self {
        let msg = crate::collector::format_postgres_error(&e);
        if e.is_closed() {
            StatError::Connection(msg)
        } else {
            StatError::Query(msg)
        }
    }
}
