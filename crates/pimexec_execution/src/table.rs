use pimexec_error::{PimexecError, Result};

/// Dense row-major table of fixed-width signed integers.
///
/// Every row holds exactly `column_count` values. Tables are owned by the
/// host; slices of a table are handed to compute units for the duration of a
/// phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    column_count: usize,
    values: Vec<i64>,
}

impl Table {
    pub fn try_new(column_count: usize, values: Vec<i64>) -> Result<Self> {
        if column_count == 0 {
            return Err(PimexecError::new("Table must have at least one column"));
        }
        if values.len() % column_count != 0 {
            return Err(PimexecError::new(format!(
                "Value count {} not divisible by column count {}",
                values.len(),
                column_count,
            )));
        }
        Ok(Table {
            column_count,
            values,
        })
    }

    pub fn empty(column_count: usize) -> Self {
        Table {
            column_count,
            values: Vec::new(),
        }
    }

    pub fn column_count(&self) -> usize {
        self.column_count
    }

    pub fn row_count(&self) -> usize {
        self.values.len() / self.column_count
    }

    pub fn shape(&self) -> TableShape {
        TableShape {
            row_count: self.row_count(),
            column_count: self.column_count,
        }
    }

    pub fn values(&self) -> &[i64] {
        &self.values
    }

    /// Get a row by index, panicking if out of bounds.
    pub fn row(&self, idx: usize) -> &[i64] {
        let start = idx * self.column_count;
        &self.values[start..start + self.column_count]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[i64]> {
        self.values.chunks_exact(self.column_count)
    }

    /// Row-aligned slice of the underlying values.
    pub fn row_slice(&self, start_row: usize, row_count: usize) -> Result<&[i64]> {
        let start = start_row * self.column_count;
        let end = start + row_count * self.column_count;
        if end > self.values.len() {
            return Err(PimexecError::new(format!(
                "Row slice [{start_row}, {}) out of bounds for table with {} rows",
                start_row + row_count,
                self.row_count(),
            )));
        }
        Ok(&self.values[start..end])
    }

    pub fn push_row(&mut self, row: &[i64]) -> Result<()> {
        if row.len() != self.column_count {
            return Err(PimexecError::new(format!(
                "Row width {} does not match column count {}",
                row.len(),
                self.column_count,
            )));
        }
        self.values.extend_from_slice(row);
        Ok(())
    }
}

/// Row and column counts for a table, without the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableShape {
    pub row_count: usize,
    pub column_count: usize,
}

/// Selection predicate, keeping rows where `row[column] > threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectPredicate {
    pub column: usize,
    pub threshold: i64,
}

impl SelectPredicate {
    pub fn new(column: usize, threshold: i64) -> Self {
        SelectPredicate { column, threshold }
    }

    pub fn matches(&self, row: &[i64]) -> bool {
        row[self.column] > self.threshold
    }
}
