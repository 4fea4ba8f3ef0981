use std::sync::Barrier;

use parking_lot::Mutex;
use pimexec_error::Result;

use super::bulk::{BulkMemory, CacheBlock};
use super::handshake::HandshakeLink;
use crate::table::SelectPredicate;

/// Shared state for one unit's select phase.
#[derive(Debug)]
pub struct SelectContext<'a> {
    pub bulk: &'a BulkMemory,
    pub predicate: SelectPredicate,
    pub row_count: usize,
    pub row_width: usize,
    /// Rows per cache block, guaranteed >= 1.
    pub block_rows: usize,
    pub thread_count: usize,
    /// Chunk rounds every thread participates in, including threads without a
    /// chunk in the final round.
    pub rounds: usize,
    pub barrier: &'a Barrier,
    pub links: &'a [HandshakeLink],
    /// Running survivor total across rounds. Written only by the last thread,
    /// between barriers, so reads never race the update.
    pub partial: &'a Mutex<usize>,
}

/// Size a cache block in rows for the select phase.
///
/// The block never exceeds the per-thread row share, and always holds at
/// least one full row.
pub fn cache_block_rows(
    cache_bytes: usize,
    row_width: usize,
    row_count: usize,
    thread_count: usize,
) -> usize {
    let row_bytes = row_width * std::mem::size_of::<i64>();
    let block_rows = (cache_bytes / row_bytes).max(1);
    let per_thread = (row_count / thread_count).max(1);
    block_rows.min(per_thread)
}

/// Cooperative select routine for one thread of a unit.
///
/// Threads claim cache-block-sized chunks round-robin at stride
/// `thread_count`. Per round: read the claimed chunk, filter it into a second
/// cache block, obtain the running prefix count from the lower-indexed
/// threads via the handshake chain, then write the survivors to the compacted
/// prefix of bulk memory at `partial + p_count`. Survivor writes always land
/// at or below rows already consumed, so they never clobber unread chunks.
pub fn select_thread(ctx: &SelectContext, thread_idx: usize) -> Result<()> {
    let mut chunk = CacheBlock::new(ctx.row_width, ctx.block_rows);
    let mut survivors = CacheBlock::new(ctx.row_width, ctx.block_rows);
    let link = &ctx.links[thread_idx];

    for round in 0..ctx.rounds {
        let chunk_idx = round * ctx.thread_count + thread_idx;
        let start_row = chunk_idx * ctx.block_rows;
        let chunk_rows = if start_row < ctx.row_count {
            ctx.block_rows.min(ctx.row_count - start_row)
        } else {
            // No chunk for this thread this round; it still takes part in the
            // handshake and barriers with a zero count.
            0
        };

        if chunk_rows > 0 {
            ctx.bulk.read_block(start_row, chunk_rows, &mut chunk)?;
        } else {
            chunk.clear();
        }

        // All reads for this round complete before any write below.
        ctx.barrier.wait();

        survivors.clear();
        for row in chunk.rows() {
            if ctx.predicate.matches(row) {
                survivors.push_row(row)?;
            }
        }
        let l_count = survivors.row_count();

        let p_count = link.wait_prefix()?;
        link.post_prefix(p_count + l_count)?;

        ctx.barrier.wait();

        let base = *ctx.partial.lock();
        if l_count > 0 {
            ctx.bulk.write_block(base + p_count, &survivors)?;
        }

        ctx.barrier.wait();

        if thread_idx == ctx.thread_count - 1 {
            // Round total, visible to every thread once they pass the next
            // rendezvous.
            *ctx.partial.lock() = base + p_count + l_count;
        }
    }

    Ok(())
}
