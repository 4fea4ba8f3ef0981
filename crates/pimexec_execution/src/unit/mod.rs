pub mod bulk;
pub mod handshake;
pub mod select;
pub mod sort;

use std::sync::Barrier;

use parking_lot::Mutex;
use pimexec_error::{OptionExt, PimexecError, Result};
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

use self::bulk::BulkMemory;
use self::sort::Segment;
use crate::plan::PartitionAssignment;
use crate::table::SelectPredicate;

/// Default cache block size in bytes, matching the reference deployment.
pub const DEFAULT_CACHE_BLOCK_BYTES: usize = 256;

/// One parallel processing element: a bulk memory region plus a fixed pool of
/// cooperative threads.
///
/// The host writes a control block and a row slice before launching a phase,
/// then reads both back once the phase completes. Units never communicate
/// with each other during a phase.
pub struct ComputeUnit {
    unit_id: usize,
    thread_count: usize,
    cache_block_bytes: usize,
    pool: ThreadPool,
    bulk: BulkMemory,
    control: Mutex<Option<PartitionAssignment>>,
}

impl std::fmt::Debug for ComputeUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeUnit")
            .field("unit_id", &self.unit_id)
            .field("thread_count", &self.thread_count)
            .finish_non_exhaustive()
    }
}

impl ComputeUnit {
    pub fn try_new(unit_id: usize, thread_count: usize, cache_block_bytes: usize) -> Result<Self> {
        if thread_count == 0 {
            return Err(PimexecError::new("Unit needs at least one thread"));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(thread_count)
            .thread_name(move |idx| format!("pimexec-unit{unit_id}-thread{idx}"))
            .build()
            .map_err(|e| {
                PimexecError::with_source("Failed to build unit thread pool", Box::new(e))
            })?;

        Ok(ComputeUnit {
            unit_id,
            thread_count,
            cache_block_bytes,
            pool,
            bulk: BulkMemory::new(),
            control: Mutex::new(None),
        })
    }

    pub fn unit_id(&self) -> usize {
        self.unit_id
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// Inbound transfer: control block plus the unit's row slice.
    ///
    /// A mismatch between the declared assignment and the data actually
    /// transferred is fatal.
    pub fn load(&self, assignment: PartitionAssignment, rows: &[i64]) -> Result<()> {
        if assignment.column_count == 0 {
            return Err(PimexecError::new("Assignment must have at least one column"));
        }
        if rows.len() != assignment.row_count * assignment.column_count {
            return Err(PimexecError::new(format!(
                "Unit {} assigned {} rows of {} columns but received {} values",
                self.unit_id,
                assignment.row_count,
                assignment.column_count,
                rows.len(),
            )));
        }
        self.bulk.load_rows(assignment.column_count, rows)?;
        *self.control.lock() = Some(assignment);
        Ok(())
    }

    /// Read the control block back, post-phase.
    pub fn control(&self) -> Result<PartitionAssignment> {
        (*self.control.lock()).required("unit assignment")
    }

    /// Outbound transfer of the unit's current rows.
    pub fn read_rows(&self) -> Result<Vec<i64>> {
        let control = self.control()?;
        self.bulk.read_back(control.row_count)
    }

    /// Run the select phase: compact rows matching `predicate` into a
    /// contiguous prefix of bulk memory, preserving relative order.
    ///
    /// Returns the surviving row count, which also becomes the control
    /// block's new `row_count`.
    pub fn run_select(&self, predicate: SelectPredicate) -> Result<usize> {
        let control = self.control()?;
        if predicate.column >= control.column_count {
            return Err(PimexecError::new(format!(
                "Select column {} out of bounds for {} columns",
                predicate.column, control.column_count,
            )));
        }
        if control.row_count == 0 {
            return Ok(0);
        }

        let block_rows = select::cache_block_rows(
            self.cache_block_bytes,
            control.column_count,
            control.row_count,
            self.thread_count,
        );
        let chunk_count = control.row_count.div_ceil(block_rows);
        let rounds = chunk_count.div_ceil(self.thread_count);

        let barrier = Barrier::new(self.thread_count);
        let links = handshake::handshake_links(self.thread_count);
        let partial = Mutex::new(0);

        let ctx = select::SelectContext {
            bulk: &self.bulk,
            predicate,
            row_count: control.row_count,
            row_width: control.column_count,
            block_rows,
            thread_count: self.thread_count,
            rounds,
            barrier: &barrier,
            links: &links,
            partial: &partial,
        };

        for result in self
            .pool
            .broadcast(|bctx| select::select_thread(&ctx, bctx.index()))
        {
            result?;
        }

        let survivors = *partial.lock();
        if let Some(control) = self.control.lock().as_mut() {
            control.row_count = survivors;
        }
        debug!(unit_id = self.unit_id, survivors, "unit select complete");
        Ok(survivors)
    }

    /// Run the sort phase: local quicksort per thread, then the pairwise tree
    /// merge, leaving the unit's full row range sorted by `key_column`.
    pub fn run_sort(&self, key_column: usize) -> Result<usize> {
        let control = self.control()?;
        if key_column >= control.column_count {
            return Err(PimexecError::new(format!(
                "Key column {key_column} out of bounds for {} columns",
                control.column_count,
            )));
        }
        if control.row_count == 0 {
            return Ok(0);
        }

        let barrier = Barrier::new(self.thread_count);
        let segments: Vec<Mutex<Segment>> = (0..self.thread_count)
            .map(|_| Mutex::new(Segment::default()))
            .collect();

        let ctx = sort::SortContext {
            bulk: &self.bulk,
            key_column,
            row_count: control.row_count,
            row_width: control.column_count,
            thread_count: self.thread_count,
            barrier: &barrier,
            segments: &segments,
        };

        for result in self
            .pool
            .broadcast(|bctx| sort::sort_thread(&ctx, bctx.index()))
        {
            result?;
        }

        // Thread 0's segment must have accumulated the unit's full range.
        let merged = segments[0].lock().row_count;
        if merged != control.row_count {
            return Err(PimexecError::new(format!(
                "Unit {} merge produced {merged} rows, expected {}",
                self.unit_id, control.row_count,
            )));
        }
        debug!(
            unit_id = self.unit_id,
            rows = control.row_count,
            "unit sort complete"
        );
        Ok(control.row_count)
    }
}
