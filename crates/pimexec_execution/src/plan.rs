use pimexec_error::{PimexecError, Result};

use crate::table::TableShape;

/// Identifies which of the two input tables a unit serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableId {
    Left,
    Right,
}

/// Which contiguous slice of which table a unit operates on.
///
/// Also serves as the host<->unit control block: the same record is written to
/// a unit before launch and read back after completion, with `row_count`
/// shrinking after the select phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionAssignment {
    pub table_id: TableId,
    pub column_count: usize,
    pub row_count: usize,
}

/// Workload assignments for the whole fleet.
///
/// Invariants:
/// - Units below `pivot` serve the left table, units at or above serve the
///   right table.
/// - Pre-pivot row counts sum to the left table's total, post-pivot to the
///   right table's total. No row is duplicated or dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPlan {
    assignments: Vec<PartitionAssignment>,
    pivot: usize,
}

impl PartitionPlan {
    /// Plan the initial split of both tables across the fleet.
    ///
    /// Units are filled in fleet order, left rows first. Every unit gets the
    /// target row count except the boundary unit (which takes whatever is left
    /// of the left table) and the last unit (which absorbs all remaining right
    /// rows). If the left table is an exact multiple of the target, the unit
    /// after the last full left unit starts the right table directly; a plan
    /// that would assign zero rows to any unit is an error.
    pub fn try_new(left: TableShape, right: TableShape, fleet_size: usize) -> Result<Self> {
        if fleet_size < 2 {
            return Err(PimexecError::new(
                "Fleet must have at least two units (one per table)",
            ));
        }

        let total = left.row_count + right.row_count;
        let target = total / fleet_size;
        if target == 0 {
            return Err(PimexecError::new(format!(
                "Fewer input rows ({total}) than units ({fleet_size})"
            )));
        }

        let mut assignments = Vec::with_capacity(fleet_size);
        let mut remaining_left = left.row_count;
        let mut remaining_right = right.row_count;
        let mut pivot = None;

        for unit in 0..fleet_size {
            if remaining_left > 0 {
                let take = remaining_left.min(target);
                assignments.push(PartitionAssignment {
                    table_id: TableId::Left,
                    column_count: left.column_count,
                    row_count: take,
                });
                remaining_left -= take;
                if remaining_left == 0 {
                    pivot = Some(unit + 1);
                }
            } else {
                let take = if unit == fleet_size - 1 {
                    remaining_right
                } else {
                    remaining_right.min(target)
                };
                if take == 0 {
                    return Err(PimexecError::new(format!(
                        "Plan would assign zero rows to unit {unit}"
                    )));
                }
                assignments.push(PartitionAssignment {
                    table_id: TableId::Right,
                    column_count: right.column_count,
                    row_count: take,
                });
                remaining_right -= take;
            }
        }

        if remaining_left > 0 {
            return Err(PimexecError::new(format!(
                "Fleet of {fleet_size} exhausted with {remaining_left} left rows unassigned"
            )));
        }
        let pivot = match pivot {
            Some(pivot) if pivot < fleet_size => pivot,
            _ => {
                return Err(PimexecError::new(
                    "No unit available for the right table after placing the left table",
                ))
            }
        };
        debug_assert_eq!(0, remaining_right);

        Ok(PartitionPlan { assignments, pivot })
    }

    /// Re-plan the per-unit distribution for the sort phase using post-select
    /// row totals.
    ///
    /// Left rows are split evenly across all pre-pivot units and right rows
    /// across all post-pivot units, with the last unit of each group absorbing
    /// the remainder. Post-select totals may be smaller than a group, so
    /// zero-row assignments are allowed here; the unit engines treat them as
    /// no-ops.
    pub fn replan_for_sort(&mut self, left_total: usize, right_total: usize) {
        let left_units = self.pivot;
        let per_left = left_total / left_units;
        for assignment in &mut self.assignments[..self.pivot - 1] {
            assignment.row_count = per_left;
        }
        self.assignments[self.pivot - 1].row_count = left_total - (left_units - 1) * per_left;

        let right_units = self.assignments.len() - self.pivot;
        let per_right = right_total / right_units;
        let last = self.assignments.len() - 1;
        for assignment in &mut self.assignments[self.pivot..last] {
            assignment.row_count = per_right;
        }
        self.assignments[last].row_count = right_total - (right_units - 1) * per_right;
    }

    /// Fold a unit's post-phase control block back into the plan.
    pub fn update_assignment(&mut self, unit: usize, control: PartitionAssignment) -> Result<()> {
        let assignment = self.assignments.get_mut(unit).ok_or_else(|| {
            PimexecError::new(format!("Unit {unit} out of bounds for plan"))
        })?;
        if assignment.table_id != control.table_id
            || assignment.column_count != control.column_count
        {
            return Err(PimexecError::new(format!(
                "Control block for unit {unit} does not match its assignment"
            )));
        }
        assignment.row_count = control.row_count;
        Ok(())
    }

    pub fn assignments(&self) -> &[PartitionAssignment] {
        &self.assignments
    }

    pub fn pivot(&self) -> usize {
        self.pivot
    }

    pub fn fleet_size(&self) -> usize {
        self.assignments.len()
    }

    /// Sum of assigned rows for one side.
    pub fn side_total(&self, table_id: TableId) -> usize {
        self.assignments
            .iter()
            .filter(|a| a.table_id == table_id)
            .map(|a| a.row_count)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(row_count: usize, column_count: usize) -> TableShape {
        TableShape {
            row_count,
            column_count,
        }
    }

    fn assert_complete(plan: &PartitionPlan, left_rows: usize, right_rows: usize) {
        let pre: usize = plan.assignments()[..plan.pivot()]
            .iter()
            .map(|a| a.row_count)
            .sum();
        let post: usize = plan.assignments()[plan.pivot()..]
            .iter()
            .map(|a| a.row_count)
            .sum();
        assert_eq!(left_rows, pre);
        assert_eq!(right_rows, post);
        for assignment in &plan.assignments()[..plan.pivot()] {
            assert_eq!(TableId::Left, assignment.table_id);
        }
        for assignment in &plan.assignments()[plan.pivot()..] {
            assert_eq!(TableId::Right, assignment.table_id);
        }
    }

    #[test]
    fn split_with_boundary_unit() {
        // target = 4, left exhausts mid-unit at unit 2.
        let plan = PartitionPlan::try_new(shape(10, 3), shape(10, 2), 5).unwrap();
        assert_eq!(3, plan.pivot());
        let counts: Vec<_> = plan.assignments().iter().map(|a| a.row_count).collect();
        assert_eq!(vec![4, 4, 2, 4, 6], counts);
        assert_complete(&plan, 10, 10);
    }

    #[test]
    fn split_exact_multiple_has_no_zero_unit() {
        // left = 8 is an exact multiple of target 4; the pivot unit starts the
        // right table directly.
        let plan = PartitionPlan::try_new(shape(8, 2), shape(12, 2), 5).unwrap();
        assert_eq!(2, plan.pivot());
        let counts: Vec<_> = plan.assignments().iter().map(|a| a.row_count).collect();
        assert_eq!(vec![4, 4, 4, 4, 4], counts);
        assert!(plan.assignments().iter().all(|a| a.row_count > 0));
        assert_complete(&plan, 8, 12);
    }

    #[test]
    fn last_unit_absorbs_right_remainder() {
        let plan = PartitionPlan::try_new(shape(1, 2), shape(8, 2), 5).unwrap();
        assert_eq!(1, plan.pivot());
        let counts: Vec<_> = plan.assignments().iter().map(|a| a.row_count).collect();
        assert_eq!(vec![1, 1, 1, 1, 5], counts);
        assert_complete(&plan, 1, 8);
    }

    #[test]
    fn completeness_over_many_shapes() {
        for left_rows in 1..20 {
            for right_rows in 1..20 {
                for fleet_size in 2..8 {
                    let plan = match PartitionPlan::try_new(
                        shape(left_rows, 4),
                        shape(right_rows, 3),
                        fleet_size,
                    ) {
                        Ok(plan) => plan,
                        // Degenerate configs are rejected, never mis-planned.
                        Err(_) => continue,
                    };
                    assert_complete(&plan, left_rows, right_rows);
                    assert!(plan.assignments().iter().all(|a| a.row_count > 0));
                }
            }
        }
    }

    #[test]
    fn rejects_fleet_too_small_for_rows() {
        PartitionPlan::try_new(shape(1, 2), shape(1, 2), 5).unwrap_err();
    }

    #[test]
    fn rejects_left_overflowing_fleet() {
        // target = 5, left alone needs all four units.
        PartitionPlan::try_new(shape(20, 2), shape(1, 2), 4).unwrap_err();
    }

    #[test]
    fn replan_for_sort_splits_groups_evenly() {
        let mut plan = PartitionPlan::try_new(shape(10, 3), shape(10, 2), 5).unwrap();
        plan.replan_for_sort(7, 5);
        let counts: Vec<_> = plan.assignments().iter().map(|a| a.row_count).collect();
        // Three left units, two right units; last of each group absorbs the
        // remainder.
        assert_eq!(vec![2, 2, 3, 2, 3], counts);
        assert_complete(&plan, 7, 5);
    }

    #[test]
    fn replan_for_sort_allows_zero_rows() {
        let mut plan = PartitionPlan::try_new(shape(10, 3), shape(10, 2), 5).unwrap();
        plan.replan_for_sort(1, 2);
        let counts: Vec<_> = plan.assignments().iter().map(|a| a.row_count).collect();
        assert_eq!(vec![0, 0, 1, 1, 1], counts);
        assert_complete(&plan, 1, 2);
    }
}
