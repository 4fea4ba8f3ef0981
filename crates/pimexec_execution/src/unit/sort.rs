use std::sync::Barrier;

use parking_lot::Mutex;
use pimexec_error::{PimexecError, Result};

use super::bulk::BulkMemory;

/// A thread's contiguous sorted run inside bulk memory during the merge
/// stage.
///
/// Ownership of a segment transfers to the absorbing thread when it is
/// merged; the absorbed thread must not touch its former segment again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Segment {
    pub start_row: usize,
    pub row_count: usize,
}

/// Shared state for one unit's sort phase.
#[derive(Debug)]
pub struct SortContext<'a> {
    pub bulk: &'a BulkMemory,
    pub key_column: usize,
    pub row_count: usize,
    pub row_width: usize,
    pub thread_count: usize,
    pub barrier: &'a Barrier,
    /// Per-thread segment descriptors, indexed by thread.
    pub segments: &'a [Mutex<Segment>],
}

/// Explicit stack of quicksort index ranges.
///
/// Capacity is sized to the maximum depth the middle-element pivot can
/// reasonably produce; exceeding it is a fatal condition rather than silent
/// memory corruption.
#[derive(Debug)]
struct FrameStack {
    frames: Vec<(usize, usize)>,
    capacity: usize,
}

impl FrameStack {
    /// Stack sized for sorting `row_count` rows: `2 * ceil(log2(n))` plus
    /// slack.
    fn for_rows(row_count: usize) -> Self {
        let depth = row_count.max(2).next_power_of_two().trailing_zeros() as usize;
        let capacity = 2 * depth + 8;
        FrameStack {
            frames: Vec::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, left: usize, right: usize) -> Result<()> {
        if self.frames.len() == self.capacity {
            return Err(PimexecError::new(format!(
                "Quicksort frame stack overflow at capacity {}",
                self.capacity,
            )));
        }
        self.frames.push((left, right));
        Ok(())
    }

    fn pop(&mut self) -> Option<(usize, usize)> {
        self.frames.pop()
    }
}

/// In-place Hoare quicksort of `row_count` rows starting at `base_row`,
/// keyed on `key_column`.
///
/// Rows are compared and swapped through three row-sized scratch buffers; the
/// pivot is the middle element's key. Sub-ranges are pushed only when they
/// hold more than one element.
fn quicksort_range(
    bulk: &BulkMemory,
    base_row: usize,
    row_count: usize,
    row_width: usize,
    key_column: usize,
) -> Result<()> {
    if row_count < 2 {
        return Ok(());
    }

    let mut pivot_row = vec![0_i64; row_width];
    let mut row_i = vec![0_i64; row_width];
    let mut row_j = vec![0_i64; row_width];

    let mut stack = FrameStack::for_rows(row_count);
    stack.push(0, row_count - 1)?;

    while let Some((left, right)) = stack.pop() {
        bulk.read_row(base_row + (left + right) / 2, &mut pivot_row)?;
        let pivot = pivot_row[key_column];

        let mut i = left as isize;
        let mut j = right as isize;

        while i <= j {
            bulk.read_row(base_row + i as usize, &mut row_i)?;
            if row_i[key_column] < pivot {
                i += 1;
                continue;
            }
            bulk.read_row(base_row + j as usize, &mut row_j)?;
            if row_j[key_column] > pivot {
                j -= 1;
                continue;
            }
            // Crossing rows; swap the full tuples, not just the keys.
            bulk.write_row(base_row + j as usize, &row_i)?;
            bulk.write_row(base_row + i as usize, &row_j)?;
            i += 1;
            j -= 1;
        }

        // Push the larger subrange first so the smaller one is processed
        // next; pending ranges then at least halve per level, keeping the
        // stack within its logarithmic capacity even on skewed partitions.
        let left_size = (j - left as isize + 1).max(0) as usize;
        let right_size = (right as isize - i + 1).max(0) as usize;
        if left_size > right_size {
            if left_size > 1 {
                stack.push(left, j as usize)?;
            }
            if right_size > 1 {
                stack.push(i as usize, right)?;
            }
        } else {
            if right_size > 1 {
                stack.push(i as usize, right)?;
            }
            if left_size > 1 {
                stack.push(left, j as usize)?;
            }
        }
    }

    Ok(())
}

/// Merge the `right` segment into `left` in place.
///
/// Insertion-merge: for each left row whose key exceeds the right segment's
/// head, swap the two rows, then shift-insert the displaced head forward
/// until the right segment is sorted again. Both segments stay sorted
/// throughout, and afterwards every left row is <= every right row, so the
/// combined contiguous range is fully sorted.
fn merge_into(ctx: &SortContext, left: Segment, right: Segment) -> Result<()> {
    if right.row_count == 0 {
        return Ok(());
    }
    debug_assert_eq!(left.start_row + left.row_count, right.start_row);

    let mut left_row = vec![0_i64; ctx.row_width];
    let mut head_row = vec![0_i64; ctx.row_width];
    let mut shift_row = vec![0_i64; ctx.row_width];
    let key = ctx.key_column;

    for idx in 0..left.row_count {
        ctx.bulk.read_row(left.start_row + idx, &mut left_row)?;
        ctx.bulk.read_row(right.start_row, &mut head_row)?;

        if left_row[key] > head_row[key] {
            ctx.bulk.write_row(right.start_row, &left_row)?;
            ctx.bulk.write_row(left.start_row + idx, &head_row)?;

            // Re-insert the displaced row at its sorted position within the
            // right segment, scanning forward only as far as needed.
            let mut insert_idx = 1;
            while insert_idx < right.row_count {
                ctx.bulk.read_row(right.start_row + insert_idx, &mut shift_row)?;
                if shift_row[key] >= left_row[key] {
                    break;
                }
                ctx.bulk
                    .write_row(right.start_row + insert_idx - 1, &shift_row)?;
                insert_idx += 1;
            }
            ctx.bulk
                .write_row(right.start_row + insert_idx - 1, &left_row)?;
        }
    }

    Ok(())
}

/// Rounds needed for the pairwise tree merge across `thread_count` threads.
fn merge_rounds(thread_count: usize) -> usize {
    thread_count.next_power_of_two().trailing_zeros() as usize
}

/// Cooperative sort routine for one thread of a unit.
///
/// Stage 1: sort this thread's contiguous row range in place. Stage 2: tree
/// merge; at each round, threads at multiples of `step` absorb the segment of
/// the thread `step/2` above them, with a full barrier between rounds.
pub fn sort_thread(ctx: &SortContext, thread_idx: usize) -> Result<()> {
    let per_thread = ctx.row_count / ctx.thread_count;
    let start_row = thread_idx * per_thread;
    let segment_rows = if thread_idx == ctx.thread_count - 1 {
        ctx.row_count - start_row
    } else {
        per_thread
    };
    *ctx.segments[thread_idx].lock() = Segment {
        start_row,
        row_count: segment_rows,
    };

    quicksort_range(
        ctx.bulk,
        start_row,
        segment_rows,
        ctx.row_width,
        ctx.key_column,
    )?;

    ctx.barrier.wait();

    let mut step = 2;
    for _ in 0..merge_rounds(ctx.thread_count) {
        if thread_idx % step == 0 {
            let target = thread_idx + step / 2;
            if target < ctx.thread_count {
                let absorbed = *ctx.segments[target].lock();
                let mut own = ctx.segments[thread_idx].lock();
                merge_into(ctx, *own, absorbed)?;
                own.row_count += absorbed.row_count;
            }
        }
        step *= 2;
        ctx.barrier.wait();
    }

    Ok(())
}
