use pimexec_error::{PimexecError, Result};

use crate::table::Table;

/// One unit's sorted output: a run of rows non-decreasing by the join key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortedRun {
    pub column_count: usize,
    pub values: Vec<i64>,
}

impl SortedRun {
    pub fn row_count(&self) -> usize {
        self.values.len() / self.column_count
    }
}

/// Combine per-unit sorted runs into a single fully sorted table.
///
/// Pairwise binary-tree reduction: each round merges adjacent run pairs until
/// one run remains, mirroring the tree merge the units perform across their
/// threads. Runs are merged host-side with a two-pointer scan (the host has
/// no cache-block constraint), preferring the left run on equal keys.
pub fn merge_runs(runs: Vec<SortedRun>, column_count: usize, key_column: usize) -> Result<Table> {
    if key_column >= column_count {
        return Err(PimexecError::new(format!(
            "Key column {key_column} out of bounds for {column_count} columns"
        )));
    }
    for run in &runs {
        if run.column_count != column_count {
            return Err(PimexecError::new(format!(
                "Run width {} does not match expected {column_count} columns",
                run.column_count,
            )));
        }
    }

    let mut current = runs;
    while current.len() > 1 {
        let mut next = Vec::with_capacity(current.len().div_ceil(2));
        let mut pairs = current.into_iter();
        while let Some(left) = pairs.next() {
            match pairs.next() {
                Some(right) => next.push(merge_pair(left, right, key_column)),
                None => next.push(left),
            }
        }
        current = next;
    }

    match current.pop() {
        Some(run) => Table::try_new(column_count, run.values),
        None => Ok(Table::empty(column_count)),
    }
}

fn merge_pair(left: SortedRun, right: SortedRun, key_column: usize) -> SortedRun {
    let width = left.column_count;
    let mut values = Vec::with_capacity(left.values.len() + right.values.len());

    let mut left_rows = left.values.chunks_exact(width).peekable();
    let mut right_rows = right.values.chunks_exact(width).peekable();

    loop {
        let take_left = match (left_rows.peek(), right_rows.peek()) {
            (Some(l), Some(r)) => l[key_column] <= r[key_column],
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        let row = if take_left {
            left_rows.next()
        } else {
            right_rows.next()
        };
        if let Some(row) = row {
            values.extend_from_slice(row);
        }
    }

    SortedRun {
        column_count: width,
        values,
    }
}
