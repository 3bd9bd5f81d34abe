//! Delta engine: per-cell differences between two snapshots of the same view.

use std::collections::HashMap;
use std::time::Duration;

use super::{Cell, StatError, StatTable};

/// Contiguous span of columns holding cumulative counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffRange {
    pub start: usize,
    pub len: usize,
}

impl DiffRange {
    /// Range that diffs nothing.
    pub const NONE: DiffRange = DiffRange { start: 0, len: 0 };

    pub const fn new(start: usize, len: usize) -> Self {
        Self { start, len }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the last diffed column.
    pub fn end(&self) -> usize {
        self.start + self.len
    }

    pub fn contains(&self, column: usize) -> bool {
        column >= self.start && column < self.end()
    }
}

/// Computes absolute deltas between `current` and `previous`.
///
/// Rows are correlated by their first `key_columns` cells. Rows new since
/// `previous` are copied as is, rows gone from `current` are dropped, and
/// the output keeps the row order of `current`. With `key_columns == 0`
/// rows are correlated by position.
pub fn diff(
    current: &StatTable,
    previous: &StatTable,
    key_columns: usize,
    range: DiffRange,
) -> Result<StatTable, StatError> {
    compute(current, previous, key_columns, range, None)
}

/// Computes per-second rates between two snapshots and sorts the result by
/// the first diffed column.
///
/// An empty `range` returns `current` untouched. A zero `interval` skips
/// the diff and returns a sorted copy of `current`.
pub fn calculate_delta(
    current: &StatTable,
    previous: &StatTable,
    key_columns: usize,
    range: DiffRange,
    interval: Duration,
    descending: bool,
) -> Result<StatTable, StatError> {
    if range.is_empty() {
        return Ok(current.clone());
    }

    let mut result = if interval.is_zero() {
        current.clone()
    } else {
        compute(
            current,
            previous,
            key_columns,
            range,
            Some(interval.as_secs_f64()),
        )?
    };

    result.sort(range.start, descending);
    Ok(result)
}

fn compute(
    current: &StatTable,
    previous: &StatTable,
    key_columns: usize,
    range: DiffRange,
    interval: Option<f64>,
) -> Result<StatTable, StatError> {
    if range.is_empty() {
        return Ok(current.clone());
    }

    let columns = current.column_count();
    if range.end() > columns {
        return Err(StatError::DiffRange {
            start: range.start,
            len: range.len,
            columns,
        });
    }

    // A previous row can only be matched if it carries every cell we read.
    let needed = key_columns.max(range.end());
    let index: HashMap<Vec<Option<&str>>, &[Cell]> = if key_columns == 0 {
        HashMap::new()
    } else {
        previous
            .rows()
            .iter()
            .filter(|r| r.len() >= needed)
            .map(|r| (row_key(r, key_columns), r.as_slice()))
            .collect()
    };

    let mut rows = Vec::with_capacity(current.row_count());
    for (idx, row) in current.rows().iter().enumerate() {
        let matched = if key_columns == 0 {
            previous
                .rows()
                .get(idx)
                .map(Vec::as_slice)
                .filter(|r| r.len() >= needed)
        } else if row.len() < key_columns {
            None
        } else {
            index.get(&row_key(row, key_columns)).copied()
        };

        let Some(prev) = matched else {
            rows.push(row.clone());
            continue;
        };

        let cells = row
            .iter()
            .enumerate()
            .map(|(col, cell)| {
                if col < key_columns || !range.contains(col) {
                    Ok(cell.clone())
                } else {
                    delta_cell(idx, col, cell, &prev[col], interval)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        rows.push(cells);
    }

    StatTable::new(current.columns().to_vec(), rows)
}

fn row_key(row: &[Cell], key_columns: usize) -> Vec<Option<&str>> {
    row[..key_columns].iter().map(Cell::as_str).collect()
}

/// Formats `curr - prev`, scaled by `interval` seconds when given.
///
/// A value written with a decimal point on either side makes the delta
/// fractional (two digits); otherwise it is rendered as an integer.
fn delta_cell(
    row: usize,
    column: usize,
    curr: &Cell,
    prev: &Cell,
    interval: Option<f64>,
) -> Result<Cell, StatError> {
    let parse_err = |c: &Cell| StatError::Parse {
        row,
        column,
        value: c.value.clone(),
    };
    let as_f64 = |c: &Cell| {
        c.as_str()
            .and_then(|v| v.parse::<f64>().ok())
            .ok_or_else(|| parse_err(c))
    };

    if curr.value.contains('.') || prev.value.contains('.') {
        let delta = as_f64(curr)? - as_f64(prev)?;
        let rate = interval.map_or(delta, |secs| delta / secs);
        return Ok(Cell::new(format!("{:.2}", rate)));
    }

    let as_i64 = |c: &Cell| c.as_str().and_then(|v| v.parse::<i64>().ok());
    let exact = as_i64(curr)
        .zip(as_i64(prev))
        .and_then(|(c, p)| c.checked_sub(p));

    let value = match (exact, interval) {
        (Some(delta), None) => delta,
        (Some(delta), Some(secs)) if secs == 1.0 => delta,
        (Some(delta), Some(secs)) => (delta as f64 / secs).round() as i64,
        // Exponent notation or out of i64 range.
        (None, _) => {
            let delta = as_f64(curr)? - as_f64(prev)?;
            interval.map_or(delta, |secs| delta / secs).round() as i64
        }
    };

    Ok(Cell::new(value.to_string()))
}
