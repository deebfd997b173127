// ========================================================================================
//
//                       CHUNK-RESIDENT OPERAND COLLECTION
//
// ========================================================================================
//
// The gather half of the fetch/gather stage: as each vector chunk becomes
// resident, every address-tile cell whose column address falls inside the
// chunk's range is resolved to its `x` value and written into the parallel
// "collected" buffer at the same faced offset. A per-row cursor survives
// across chunks, so each row is walked exactly once over the whole chunk
// range. Early exit on the sentinel and on addresses beyond the resident
// chunk is only correct because addresses within a row's valid prefix are
// non-decreasing and chunks arrive in increasing order — the invariant
// `SparseMatrix::new` enforces at the boundary.

use crate::tile::faced_offset;
use crate::types::{SENTINEL_ADDR, TILE_CELLS, TILE_DIM};

/// Per-batch gather progress: one column cursor per row of each tile.
///
/// A cursor of `TILE_DIM` marks the row exhausted (its sentinel padding was
/// reached). Reset at the start of every batch.
pub struct GatherState {
    row_cursor: Vec<u8>,
}

impl GatherState {
    pub fn new(max_tiles_per_batch: usize) -> Self {
        Self {
            row_cursor: vec![0; max_tiles_per_batch * TILE_DIM],
        }
    }

    pub fn reset(&mut self) {
        self.row_cursor.fill(0);
    }

    /// Resolves one resident chunk against a batch of address tiles.
    ///
    /// `chunk_start` is the absolute index of the chunk's first element;
    /// `chunk` is the resident slice of `x` (possibly short at the vector's
    /// tail). Cells addressing earlier chunks were resolved on a previous
    /// call; cells addressing later chunks are left for a future call.
    pub fn collect_chunk(
        &mut self,
        addr_tiles: &[u32],
        collected: &mut [f32],
        chunk: &[f32],
        chunk_start: usize,
    ) {
        debug_assert_eq!(addr_tiles.len(), collected.len());
        let num_tiles = addr_tiles.len() / TILE_CELLS;
        let chunk_end = chunk_start + chunk.len();

        for t in 0..num_tiles {
            let tile_addrs = &addr_tiles[t * TILE_CELLS..(t + 1) * TILE_CELLS];
            let tile_collect = &mut collected[t * TILE_CELLS..(t + 1) * TILE_CELLS];
            for row in 0..TILE_DIM {
                let cursor = &mut self.row_cursor[t * TILE_DIM + row];
                let mut col = *cursor as usize;
                while col < TILE_DIM {
                    let off = faced_offset(row, col);
                    let addr = tile_addrs[off];
                    if addr == SENTINEL_ADDR {
                        col = TILE_DIM; // padding reached, row done
                        break;
                    }
                    let addr = addr as usize;
                    if addr >= chunk_end {
                        // Sorted row: everything further right is also
                        // beyond this chunk. Resume here next chunk.
                        break;
                    }
                    if addr >= chunk_start {
                        tile_collect[off] = chunk[addr - chunk_start];
                    }
                    col += 1;
                }
                *cursor = col as u8;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds one faced address tile from a list of per-row address prefixes.
    fn addr_tile(rows: &[&[u32]]) -> Vec<u32> {
        let mut tile = vec![SENTINEL_ADDR; TILE_CELLS];
        for (r, addrs) in rows.iter().enumerate() {
            for (c, &a) in addrs.iter().enumerate() {
                tile[faced_offset(r, c)] = a;
            }
        }
        tile
    }

    #[test]
    fn single_chunk_collects_every_valid_cell() {
        let tile = addr_tile(&[&[0, 3, 7], &[1], &[]]);
        let mut collected = vec![0.0f32; TILE_CELLS];
        let x: Vec<f32> = (0..8).map(|i| 10.0 + i as f32).collect();

        let mut state = GatherState::new(1);
        state.collect_chunk(&tile, &mut collected, &x, 0);

        assert_eq!(collected[faced_offset(0, 0)], 10.0);
        assert_eq!(collected[faced_offset(0, 1)], 13.0);
        assert_eq!(collected[faced_offset(0, 2)], 17.0);
        assert_eq!(collected[faced_offset(1, 0)], 11.0);
        // Untouched cells keep their zero fill.
        assert_eq!(collected[faced_offset(2, 0)], 0.0);
    }

    #[test]
    fn rows_straddling_chunks_resume_at_their_cursor() {
        // Row 0 references both chunk 0 (addr 5) and chunk 1 (addr 300).
        let tile = addr_tile(&[&[5, 300], &[290]]);
        let mut collected = vec![0.0f32; TILE_CELLS];
        let mut state = GatherState::new(1);

        let chunk0: Vec<f32> = (0..256).map(|i| i as f32).collect();
        state.collect_chunk(&tile, &mut collected, &chunk0, 0);
        assert_eq!(collected[faced_offset(0, 0)], 5.0);
        assert_eq!(collected[faced_offset(0, 1)], 0.0); // not yet resident

        let chunk1: Vec<f32> = (256..512).map(|i| i as f32).collect();
        state.collect_chunk(&tile, &mut collected, &chunk1, 256);
        assert_eq!(collected[faced_offset(0, 1)], 300.0);
        assert_eq!(collected[faced_offset(1, 0)], 290.0);
    }

    #[test]
    fn pruned_windows_skip_leading_chunks() {
        // All addresses live in chunk 2; streaming starts there.
        let tile = addr_tile(&[&[520, 700]]);
        let mut collected = vec![0.0f32; TILE_CELLS];
        let mut state = GatherState::new(1);

        let chunk2: Vec<f32> = (512..768).map(|i| i as f32 * 2.0).collect();
        state.collect_chunk(&tile, &mut collected, &chunk2, 512);
        assert_eq!(collected[faced_offset(0, 0)], 1040.0);
        assert_eq!(collected[faced_offset(0, 1)], 1400.0);
    }

    #[test]
    fn short_tail_chunk_bounds_the_window() {
        // x has 260 elements: chunk 1 is only 4 long.
        let tile = addr_tile(&[&[259]]);
        let mut collected = vec![0.0f32; TILE_CELLS];
        let mut state = GatherState::new(1);
        let x: Vec<f32> = (0..260).map(|i| i as f32).collect();

        state.collect_chunk(&tile, &mut collected, &x[..256], 0);
        state.collect_chunk(&tile, &mut collected, &x[256..], 256);
        assert_eq!(collected[faced_offset(0, 0)], 259.0);
    }

    #[test]
    fn reset_clears_cursors_between_batches() {
        let tile = addr_tile(&[&[1]]);
        let mut collected = vec![0.0f32; TILE_CELLS];
        let mut state = GatherState::new(1);
        let x = vec![0.0f32, 42.0];

        state.collect_chunk(&tile, &mut collected, &x, 0);
        assert_eq!(collected[faced_offset(0, 0)], 42.0);

        // Without a reset the cursor would stand past the entry.
        collected[faced_offset(0, 0)] = 0.0;
        state.reset();
        state.collect_chunk(&tile, &mut collected, &x, 0);
        assert_eq!(collected[faced_offset(0, 0)], 42.0);
    }
}
