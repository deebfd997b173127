// ========================================================================================
//
//                               THE WORK PARTITIONER
//
// ========================================================================================
//
// Splits the matrix's row-tiles into fixed-size batches, balances the
// batches across lanes, and prunes each lane's vector traffic down to the
// minimal contiguous chunk window its tiles can reference. Pure input-only
// computation: rerunning with the same inputs yields the identical
// partition, which is what makes lane-count-independent numerics testable.

use crate::types::{CHUNK_WIDTH, RowColumnExtent};

/// One lane's slice of the work, computed once per invocation and consumed
/// by all three of that lane's pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneAssignment {
    /// Global index of the lane's first batch.
    pub start_batch: usize,
    /// Batches owned by this lane (`0` for a surplus lane).
    pub num_batches: usize,
    /// Global index of the lane's first row-tile.
    pub start_tile: usize,
    /// Row-tiles owned; the final batch may be partial.
    pub num_tiles: usize,
    /// First vector chunk this lane must stream.
    pub start_chunk: usize,
    /// Chunks to stream; `0` means the lane owns no valid entries and must
    /// skip vector streaming entirely.
    pub num_chunks: usize,
}

impl LaneAssignment {
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.num_tiles == 0
    }
}

/// Balanced, remainder-aware split of `ceil(tiles_total / tiles_per_batch)`
/// batches over `lanes` lanes, plus per-lane chunk-range pruning from the
/// row-tile extents.
///
/// The first `batches_total % lanes` lanes receive one extra batch so the
/// unit totals match exactly; when `batches_total < lanes` the surplus
/// lanes get empty assignments. Tile counts are clamped to `tiles_total`,
/// so only the last non-empty lane can end on a partial batch.
pub fn partition_lanes(
    tiles_total: usize,
    tiles_per_batch: usize,
    lanes: usize,
    tile_extents: &[RowColumnExtent],
) -> Vec<LaneAssignment> {
    assert!(tiles_per_batch > 0, "batch size must be nonzero");
    assert!(lanes > 0, "at least one lane is required");

    let batches_total = tiles_total.div_ceil(tiles_per_batch);
    let base = batches_total / lanes;
    let remainder = batches_total % lanes;

    let mut assignments = Vec::with_capacity(lanes);
    let mut start_batch = 0usize;
    for lane in 0..lanes {
        let units = if lane < remainder { base + 1 } else { base };
        // A trailing idle lane after a partial final batch would otherwise
        // start past the end of the tile space; clamp so contiguity holds
        // and the output carve stays exact.
        let start_tile = (start_batch * tiles_per_batch).min(tiles_total);
        let num_tiles = (units * tiles_per_batch).min(tiles_total.saturating_sub(start_tile));

        let extent = tile_extents
            .iter()
            .skip(start_tile)
            .take(num_tiles)
            .fold(RowColumnExtent::EMPTY, |acc, e| acc.merge(e));

        let (start_chunk, num_chunks) = if extent.is_empty() {
            (0, 0)
        } else {
            let start_chunk = extent.min_col as usize / CHUNK_WIDTH;
            let end_chunk = extent.max_col as usize / CHUNK_WIDTH;
            (start_chunk, end_chunk - start_chunk + 1)
        };

        assignments.push(LaneAssignment {
            start_batch,
            num_batches: units,
            start_tile,
            num_tiles,
            start_chunk,
            num_chunks,
        });
        start_batch += units;
    }
    assignments
}
