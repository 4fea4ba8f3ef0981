use pimexec_error::{PimexecError, Result};

use crate::table::Table;

/// Inner equi-join of two sorted tables by linear merge.
///
/// Both inputs must be sorted non-decreasing on their key column. The scan
/// advances the side with the smaller key on a mismatch; on a match it emits
/// one joined row and advances both sides. Duplicate keys therefore pair up
/// positionally rather than producing a cross product.
///
/// Output rows are `[left columns..., right columns except the right key]`.
pub fn merge_join(
    left: &Table,
    right: &Table,
    left_key: usize,
    right_key: usize,
) -> Result<Table> {
    if left_key >= left.column_count() || right_key >= right.column_count() {
        return Err(PimexecError::new(format!(
            "Join keys ({left_key}, {right_key}) out of bounds for ({}, {}) columns",
            left.column_count(),
            right.column_count(),
        )));
    }

    let out_columns = left.column_count() + right.column_count() - 1;
    let mut output = Table::empty(out_columns);
    let mut joined = Vec::with_capacity(out_columns);

    let mut left_idx = 0;
    let mut right_idx = 0;
    while left_idx < left.row_count() && right_idx < right.row_count() {
        let left_row = left.row(left_idx);
        let right_row = right.row(right_idx);

        if left_row[left_key] == right_row[right_key] {
            joined.clear();
            joined.extend_from_slice(left_row);
            for (column, value) in right_row.iter().enumerate() {
                if column != right_key {
                    joined.push(*value);
                }
            }
            output.push_row(&joined)?;
            left_idx += 1;
            right_idx += 1;
        } else if left_row[left_key] < right_row[right_key] {
            left_idx += 1;
        } else {
            right_idx += 1;
        }
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(column_count: usize, values: Vec<i64>) -> Table {
        Table::try_new(column_count, values).unwrap()
    }

    #[test]
    fn join_matching_keys() {
        let left = table(2, vec![1, 10, 2, 20, 4, 40]);
        let right = table(3, vec![2, 200, 201, 3, 300, 301, 4, 400, 401]);

        let out = merge_join(&left, &right, 0, 0).unwrap();
        assert_eq!(4, out.column_count());
        assert_eq!(&[2, 20, 200, 201, 4, 40, 400, 401], out.values());
    }

    #[test]
    fn join_no_matches() {
        // Post-select, post-sort inputs of the canonical scenario: A kept
        // (1, 60), B kept (2, 70) and (5, 99); ids never line up.
        let left = table(2, vec![1, 60]);
        let right = table(2, vec![2, 70, 5, 99]);

        let out = merge_join(&left, &right, 0, 0).unwrap();
        assert_eq!(0, out.row_count());
        assert_eq!(3, out.column_count());
    }

    #[test]
    fn join_duplicate_keys_pair_positionally() {
        // Two 5-keyed rows on each side pair up one-to-one, no cross product.
        let left = table(2, vec![5, 1, 5, 2]);
        let right = table(2, vec![5, 10, 5, 20, 5, 30]);

        let out = merge_join(&left, &right, 0, 0).unwrap();
        assert_eq!(&[5, 1, 10, 5, 2, 20], out.values());
    }

    #[test]
    fn join_respects_distinct_key_columns() {
        let left = table(2, vec![10, 1, 20, 2]);
        let right = table(2, vec![7, 2, 8, 3]);

        // Key is column 1 on both sides here; only key 2 lines up.
        let out = merge_join(&left, &right, 1, 1).unwrap();
        assert_eq!(&[20, 2, 7], out.values());
    }

    #[test]
    fn join_key_out_of_bounds_is_fatal() {
        let left = table(2, vec![1, 2]);
        let right = table(2, vec![1, 2]);
        merge_join(&left, &right, 2, 0).unwrap_err();
    }
}
