//! Fetch results returned by the storage engine.
//!
//! A [`FetchResults`] is the time-aligned table produced by a single fetch or
//! export call: one column of values per data source, plus the step and the
//! timestamps of the first and last rows. It is never mutated after
//! construction.

use serde::Serialize;

/// Time-aligned values keyed by column name.
///
/// `start` is the timestamp of the first row and `end` the timestamp of the
/// last, both as reported by the engine. Every column holds the same number of
/// rows; NaN marks a row with no data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchResults {
    start: i64,
    end: i64,
    step: u64,
    columns: Vec<String>,
    values: Vec<Vec<f64>>,
}

impl FetchResults {
    /// Creates a result table.
    ///
    /// `values` holds one entry per column, in the same order as `columns`.
    pub fn new(
        start: i64,
        end: i64,
        step: u64,
        columns: Vec<String>,
        values: Vec<Vec<f64>>,
    ) -> Self {
        debug_assert!(step > 0, "fetch step must be positive");
        debug_assert!(end >= start, "fetch end precedes start");
        debug_assert_eq!(columns.len(), values.len());
        Self {
            start,
            end,
            step,
            columns,
            values,
        }
    }

    /// Timestamp of the first row, in seconds.
    pub fn start(&self) -> i64 {
        self.start
    }

    /// Timestamp of the last row, in seconds.
    pub fn end(&self) -> i64 {
        self.end
    }

    /// Interval between rows, in seconds.
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Column names in engine order. Names are not guaranteed to be unique.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Values per column, in the same order as [`columns`](Self::columns).
    pub fn values(&self) -> &[Vec<f64>] {
        &self.values
    }

    /// Number of rows in every column.
    pub fn row_count(&self) -> usize {
        self.values.first().map_or(0, Vec::len)
    }

    /// Resolves a column by exact, case-sensitive name.
    ///
    /// When the name appears more than once the last matching index is
    /// returned.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        let mut index = None;
        for (i, column) in self.columns.iter().enumerate() {
            if column == name {
                index = Some(i);
            }
        }
        index
    }

    /// Returns the values of the column resolved by [`column_index`](Self::column_index).
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.column_index(name).map(|i| self.values[i].as_slice())
    }

    /// Iterates over the timestamp of every row.
    #[allow(clippy::cast_possible_wrap)] // steps are seconds, far below i64::MAX
    pub fn timestamps(&self) -> impl Iterator<Item = i64> + '_ {
        (0..self.row_count()).map(move |row| self.start + row as i64 * self.step as i64)
    }
}
