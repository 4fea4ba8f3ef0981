use parking_lot::RwLock;
use pimexec_error::{PimexecError, Result};

/// Bulk memory region attached to a single compute unit.
///
/// Holds the unit's row slice for the duration of a phase. All addressing is
/// row-aligned; threads stage data in and out through [`CacheBlock`]s or
/// single-row scratch buffers. Block reads take the shared lock and writes
/// the exclusive lock, modeling the unit's single memory bus.
#[derive(Debug, Default)]
pub struct BulkMemory {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    row_width: usize,
    values: Vec<i64>,
}

impl BulkMemory {
    pub fn new() -> Self {
        BulkMemory::default()
    }

    /// Host-side inbound transfer. Replaces the region's contents.
    pub fn load_rows(&self, row_width: usize, values: &[i64]) -> Result<()> {
        if row_width == 0 || values.len() % row_width != 0 {
            return Err(PimexecError::new(format!(
                "Transfer of {} values is not row-aligned for width {row_width}",
                values.len(),
            )));
        }
        let mut inner = self.inner.write();
        inner.row_width = row_width;
        inner.values.clear();
        inner.values.extend_from_slice(values);
        Ok(())
    }

    /// Host-side outbound transfer of the first `row_count` rows.
    pub fn read_back(&self, row_count: usize) -> Result<Vec<i64>> {
        let inner = self.inner.read();
        let len = row_count * inner.row_width;
        if len > inner.values.len() {
            return Err(PimexecError::new(format!(
                "Outbound transfer of {row_count} rows exceeds region of {} rows",
                inner.values.len() / inner.row_width.max(1),
            )));
        }
        Ok(inner.values[..len].to_vec())
    }

    /// Read up to `block`'s capacity starting at `start_row`, bounded by
    /// `row_count`.
    pub fn read_block(&self, start_row: usize, row_count: usize, block: &mut CacheBlock) -> Result<()> {
        let inner = self.inner.read();
        let start = start_row * inner.row_width;
        let end = start + row_count * inner.row_width;
        if row_count > block.capacity_rows {
            return Err(PimexecError::new(format!(
                "Block read of {row_count} rows exceeds cache block capacity {}",
                block.capacity_rows,
            )));
        }
        if end > inner.values.len() {
            return Err(PimexecError::new(format!(
                "Block read rows [{start_row}, {}) out of bounds",
                start_row + row_count,
            )));
        }
        block.values.clear();
        block.values.extend_from_slice(&inner.values[start..end]);
        Ok(())
    }

    /// Write all rows held in `block` starting at `start_row`.
    pub fn write_block(&self, start_row: usize, block: &CacheBlock) -> Result<()> {
        let mut inner = self.inner.write();
        let start = start_row * inner.row_width;
        let end = start + block.values.len();
        if end > inner.values.len() {
            return Err(PimexecError::new(format!(
                "Block write rows [{start_row}, {}) out of bounds",
                start_row + block.row_count(),
            )));
        }
        inner.values[start..end].copy_from_slice(&block.values);
        Ok(())
    }

    /// Read one row into a row-sized scratch buffer.
    pub fn read_row(&self, row_idx: usize, out: &mut [i64]) -> Result<()> {
        let inner = self.inner.read();
        let start = row_idx * inner.row_width;
        let end = start + inner.row_width;
        if out.len() != inner.row_width || end > inner.values.len() {
            return Err(PimexecError::new(format!("Row read {row_idx} out of bounds")));
        }
        out.copy_from_slice(&inner.values[start..end]);
        Ok(())
    }

    /// Write one row from a row-sized scratch buffer.
    pub fn write_row(&self, row_idx: usize, row: &[i64]) -> Result<()> {
        let mut inner = self.inner.write();
        let start = row_idx * inner.row_width;
        let end = start + inner.row_width;
        if row.len() != inner.row_width || end > inner.values.len() {
            return Err(PimexecError::new(format!("Row write {row_idx} out of bounds")));
        }
        inner.values[start..end].copy_from_slice(row);
        Ok(())
    }

    pub fn row_width(&self) -> usize {
        self.inner.read().row_width
    }
}

/// Small fixed-capacity buffer staging rows between bulk memory and compute.
///
/// Sized to an integral number of full rows.
#[derive(Debug)]
pub struct CacheBlock {
    row_width: usize,
    capacity_rows: usize,
    values: Vec<i64>,
}

impl CacheBlock {
    pub fn new(row_width: usize, capacity_rows: usize) -> Self {
        CacheBlock {
            row_width,
            capacity_rows,
            values: Vec::with_capacity(row_width * capacity_rows),
        }
    }

    pub fn row_count(&self) -> usize {
        self.values.len() / self.row_width
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn row(&self, idx: usize) -> &[i64] {
        let start = idx * self.row_width;
        &self.values[start..start + self.row_width]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[i64]> {
        self.values.chunks_exact(self.row_width)
    }

    /// Append one row. Exceeding the block's capacity is fatal.
    pub fn push_row(&mut self, row: &[i64]) -> Result<()> {
        if self.row_count() == self.capacity_rows {
            return Err(PimexecError::new(format!(
                "Cache block overflow at {} rows",
                self.capacity_rows,
            )));
        }
        debug_assert_eq!(self.row_width, row.len());
        self.values.extend_from_slice(row);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_round_trip() {
        let bulk = BulkMemory::new();
        bulk.load_rows(2, &[1, 2, 3, 4, 5, 6]).unwrap();

        let mut block = CacheBlock::new(2, 2);
        bulk.read_block(1, 2, &mut block).unwrap();
        assert_eq!(2, block.row_count());
        assert_eq!(&[3, 4], block.row(0));

        bulk.write_block(0, &block).unwrap();
        assert_eq!(vec![3, 4, 5, 6, 5, 6], bulk.read_back(3).unwrap());
    }

    #[test]
    fn row_scratch_round_trip() {
        let bulk = BulkMemory::new();
        bulk.load_rows(3, &[1, 2, 3, 4, 5, 6]).unwrap();

        let mut scratch = vec![0; 3];
        bulk.read_row(1, &mut scratch).unwrap();
        assert_eq!(vec![4, 5, 6], scratch);
        bulk.write_row(0, &scratch).unwrap();
        assert_eq!(vec![4, 5, 6, 4, 5, 6], bulk.read_back(2).unwrap());
    }

    #[test]
    fn unaligned_transfer_errors() {
        let bulk = BulkMemory::new();
        bulk.load_rows(2, &[1, 2, 3]).unwrap_err();
    }

    #[test]
    fn cache_block_overflow_is_fatal() {
        let mut block = CacheBlock::new(2, 1);
        block.push_row(&[1, 2]).unwrap();
        block.push_row(&[3, 4]).unwrap_err();
    }

    #[test]
    fn out_of_bounds_block_read_errors() {
        let bulk = BulkMemory::new();
        bulk.load_rows(2, &[1, 2, 3, 4]).unwrap();
        let mut block = CacheBlock::new(2, 4);
        bulk.read_block(1, 2, &mut block).unwrap_err();
    }
}
