//! Rectangular table of nullable text cells.

use std::cmp::Ordering;
use std::io;

use postgres::{Client, SimpleQueryMessage};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::StatError;

/// Single value of a result set: text representation plus a validity flag.
///
/// `valid` is false exactly when the server returned NULL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub value: String,
    pub valid: bool,
}

impl Cell {
    /// Creates a non-null cell.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            valid: true,
        }
    }

    /// Creates a NULL cell.
    pub fn null() -> Self {
        Self::default()
    }

    /// Returns the text of a non-null cell.
    pub fn as_str(&self) -> Option<&str> {
        self.valid.then_some(self.value.as_str())
    }
}

/// Snapshot of one statistics view.
///
/// Every row has exactly one cell per column. `valid == false` means
/// "no data" (the view does not apply to this server), which is distinct
/// from a valid table with zero rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawStatTable")]
pub struct StatTable {
    valid: bool,
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

/// Unchecked serde form of [`StatTable`].
#[derive(Deserialize)]
struct RawStatTable {
    valid: bool,
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl TryFrom<RawStatTable> for StatTable {
    type Error = StatError;

    fn try_from(raw: RawStatTable) -> Result<Self, Self::Error> {
        let mut table = StatTable::new(raw.columns, raw.rows)?;
        table.valid = raw.valid;
        Ok(table)
    }
}

impl StatTable {
    /// Builds a valid table, checking that every row matches the column count.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Result<Self, StatError> {
        if let Some((idx, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, r)| r.len() != columns.len())
        {
            return Err(StatError::Shape {
                row: idx,
                expected: columns.len(),
                got: row.len(),
            });
        }

        Ok(Self {
            valid: true,
            columns,
            rows,
        })
    }

    /// Table without data, used for views that do not apply to the server.
    pub fn invalid() -> Self {
        Self {
            valid: false,
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Executes `sql` and reads the whole result set as text.
    ///
    /// Uses the simple query protocol so every cell arrives in the server's
    /// own text representation regardless of its SQL type.
    pub fn from_query(client: &mut Client, sql: &str) -> Result<Self, StatError> {
        if client.is_closed() {
            return Err(StatError::Connection("connection is closed".to_string()));
        }

        let messages = client.simple_query(sql)?;

        let mut columns: Option<Vec<String>> = None;
        let mut rows = Vec::new();
        for message in messages {
            match message {
                SimpleQueryMessage::RowDescription(desc) => {
                    columns.get_or_insert_with(|| {
                        desc.iter().map(|c| c.name().to_string()).collect()
                    });
                }
                SimpleQueryMessage::Row(row) => {
                    if columns.is_none() {
                        columns = Some(row.columns().iter().map(|c| c.name().to_string()).collect());
                    }
                    let cells = (0..row.len())
                        .map(|i| match row.try_get(i) {
                            Ok(Some(v)) => Ok(Cell::new(v)),
                            Ok(None) => Ok(Cell::null()),
                            Err(e) => Err(StatError::Query(e.to_string())),
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    rows.push(cells);
                }
                _ => {}
            }
        }

        Self::new(columns.unwrap_or_default(), rows)
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Returns index of the first column with the given name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Sorts rows by one column.
    ///
    /// If every non-null value of the column parses as a float, rows are
    /// ordered numerically (NULLs lowest); otherwise the raw strings are
    /// compared. Equal keys keep their relative order.
    pub fn sort(&mut self, column: usize, descending: bool) {
        if self.rows.is_empty() || column >= self.columns.len() {
            return;
        }

        let numeric = self
            .rows
            .iter()
            .filter_map(|r| r.get(column).and_then(Cell::as_str))
            .all(|v| v.parse::<f64>().is_ok());

        let direct = |ord: Ordering| if descending { ord.reverse() } else { ord };

        if numeric {
            let mut keyed: Vec<(f64, Vec<Cell>)> = self
                .rows
                .drain(..)
                .map(|r| {
                    let key = r
                        .get(column)
                        .and_then(Cell::as_str)
                        .and_then(|v| v.parse::<f64>().ok())
                        .unwrap_or(f64::NEG_INFINITY);
                    (key, r)
                })
                .collect();
            keyed.sort_by(|(a, _), (b, _)| direct(a.total_cmp(b)));
            self.rows = keyed.into_iter().map(|(_, r)| r).collect();
        } else {
            self.rows.sort_by(|a, b| {
                let a = a.get(column).and_then(Cell::as_str);
                let b = b.get(column).and_then(Cell::as_str);
                direct(a.cmp(&b))
            });
        }
    }

    /// Keeps only rows whose cell in `column` matches `pattern`.
    ///
    /// NULL cells never match. An out-of-range column leaves the table as is.
    pub fn retain_matching(&mut self, column: usize, pattern: &Regex) {
        if column >= self.columns.len() {
            return;
        }
        self.rows
            .retain(|r| {
                r.get(column)
                    .and_then(Cell::as_str)
                    .is_some_and(|v| pattern.is_match(v))
            });
    }

    /// Writes the table as aligned text: a header line, then one line per row.
    pub fn write<W: io::Write>(&self, out: &mut W) -> io::Result<()> {
        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.chars().count()).collect();
        for row in &self.rows {
            for (w, cell) in widths.iter_mut().zip(row) {
                *w = (*w).max(cell.value.chars().count());
            }
        }

        write_line(out, self.columns.iter().map(String::as_str), &widths)?;
        for row in &self.rows {
            write_line(
                out,
                row.iter().map(|c| c.as_str().unwrap_or("")),
                &widths,
            )?;
        }
        Ok(())
    }
}

fn write_line<'a, W: io::Write>(
    out: &mut W,
    cells: impl Iterator<Item = &'a str>,
    widths: &[usize],
) -> io::Result<()> {
    let line = cells
        .zip(widths)
        .map(|(v, w)| format!("{:<width$}", v, width = *w))
        .collect::<Vec<_>>()
        .join("  ");
    writeln!(out, "{}", line.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(columns: &[&str], rows: &[&[&str]]) -> StatTable {
        StatTable::new(
            columns.iter().map(|c| c.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|v| Cell::new(*v)).collect())
                .collect(),
        )
        .unwrap()
    }

    fn column(t: &StatTable, idx: usize) -> Vec<&str> {
        t.rows().iter().map(|r| r[idx].value.as_str()).collect()
    }

    fn sample() -> StatTable {
        table(
            &["col1", "col2", "col3", "col4"],
            &[
                &["3", "direct", "row1:value3", "row1:value4"],
                &["2", "cilla", "row2:value3", "row2:value4"],
                &["4", "arktika", "row2:value3", "row2:value4"],
                &["1", "bronze", "row2:value3", "row2:value4"],
            ],
        )
    }

    #[test]
    fn test_new_rejects_ragged_rows() {
        let err = StatTable::new(
            vec!["a".to_string(), "b".to_string()],
            vec![vec![Cell::new("1"), Cell::new("2")], vec![Cell::new("3")]],
        )
        .unwrap_err();
        assert_eq!(
            err,
            StatError::Shape {
                row: 1,
                expected: 2,
                got: 1
            }
        );
    }

    #[test]
    fn test_invalid_table_is_distinct_from_empty() {
        let invalid = StatTable::invalid();
        let empty = table(&["a"], &[]);
        assert!(!invalid.is_valid());
        assert!(empty.is_valid());
        assert_eq!(empty.row_count(), 0);
        assert_eq!(empty.column_count(), 1);
    }

    #[test]
    fn test_sort_numeric() {
        let mut t = sample();
        t.sort(0, false);
        assert_eq!(column(&t, 0), vec!["1", "2", "3", "4"]);
        t.sort(0, true);
        assert_eq!(column(&t, 0), vec!["4", "3", "2", "1"]);
    }

    #[test]
    fn test_sort_lexical() {
        let mut t = sample();
        t.sort(1, false);
        assert_eq!(column(&t, 1), vec!["arktika", "bronze", "cilla", "direct"]);
        t.sort(1, true);
        assert_eq!(column(&t, 1), vec!["direct", "cilla", "bronze", "arktika"]);
    }

    #[test]
    fn test_sort_numeric_not_lexical() {
        let mut t = table(&["n"], &[&["10"], &["2"], &["1.5"], &["-3"]]);
        t.sort(0, false);
        assert_eq!(column(&t, 0), vec!["-3", "1.5", "2", "10"]);
    }

    #[test]
    fn test_sort_mixed_column_falls_back_to_lexical() {
        let mut t = table(&["v"], &[&["10"], &["2"], &["apple"]]);
        t.sort(0, false);
        assert_eq!(column(&t, 0), vec!["10", "2", "apple"]);
    }

    #[test]
    fn test_sort_is_stable() {
        let mut t = table(
            &["k", "v"],
            &[&["a", "1"], &["b", "2"], &["c", "1"], &["d", "2"]],
        );
        t.sort(1, false);
        assert_eq!(column(&t, 0), vec!["a", "c", "b", "d"]);
        t.sort(1, true);
        assert_eq!(column(&t, 0), vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn test_sort_nulls_are_lowest() {
        let mut t = StatTable::new(
            vec!["v".to_string()],
            vec![vec![Cell::new("5")], vec![Cell::null()], vec![Cell::new("-1")]],
        )
        .unwrap();
        t.sort(0, false);
        assert!(!t.rows()[0][0].valid);
        assert_eq!(t.rows()[1][0].value, "-1");
        assert_eq!(t.rows()[2][0].value, "5");
    }

    #[test]
    fn test_sort_empty_table() {
        let mut t = table(&["col1"], &[]);
        t.sort(0, false);
        assert!(t.rows().is_empty());
        assert!(t.is_valid());
    }

    #[test]
    fn test_sort_out_of_range_column_is_noop() {
        let mut t = sample();
        let before = t.clone();
        t.sort(10, true);
        assert_eq!(t, before);
    }

    #[test]
    fn test_retain_matching() {
        let mut t = sample();
        t.retain_matching(1, &Regex::new("^(a|b)").unwrap());
        assert_eq!(column(&t, 1), vec!["arktika", "bronze"]);
    }

    #[test]
    fn test_column_index() {
        let t = sample();
        assert_eq!(t.column_index("col3"), Some(2));
        assert_eq!(t.column_index("missing"), None);
    }

    #[test]
    fn test_write() {
        let t = sample();
        let mut buf = Vec::new();
        t.write(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("col1"));
        assert!(text.contains("row1:value4"));
        assert!(text.contains("row2:value4"));
        assert_eq!(text.lines().count(), 5);
    }

    #[test]
    fn test_write_aligns_columns() {
        let t = table(&["id", "name"], &[&["1", "a"], &["100", "bb"]]);
        let mut buf = Vec::new();
        t.write(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["id   name", "1    a", "100  bb"]);
    }

    #[test]
    fn test_serde_form_keeps_validity() {
        let t = StatTable::new(
            vec!["a".to_string()],
            vec![vec![Cell::null()], vec![Cell::new("x")]],
        )
        .unwrap();
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["valid"], true);
        assert_eq!(json["columns"][0], "a");
        assert_eq!(json["rows"][0][0]["valid"], false);
        assert_eq!(json["rows"][1][0]["value"], "x");
    }

    #[test]
    fn test_deserialize_checks_shape() {
        let ragged = r#"{"valid":true,"columns":["a","b"],"rows":[
            [{"value":"1","valid":true},{"value":"2","valid":true}],
            [{"value":"3","valid":true}]
        ]}"#;
        let err = serde_json::from_str::<StatTable>(ragged).unwrap_err();
        assert!(err.to_string().contains("row 1"), "{}", err);

        let t = table(&["a", "b"], &[&["1", "x"], &["2", "y"]]);
        let json = serde_json::to_string(&t).unwrap();
        let mut back: StatTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
        back.sort(1, true);
        assert_eq!(column(&back, 1), vec!["y", "x"]);

        let invalid: StatTable =
            serde_json::from_str(&serde_json::to_string(&StatTable::invalid()).unwrap()).unwrap();
        assert!(!invalid.is_valid());
    }
}
