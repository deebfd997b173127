// ========================================================================================
//
//                      The kernel: tile multiply-accumulate
//
// ========================================================================================
//
// The innermost loop of the engine. A kernel consumes one faced matrix-value
// tile with its matched collected-operand tile and produces 32 row results.
// Two interchangeable strategies exist; the choice is fixed when the
// pipeline context is built, because the two use different batch sizes and
// result-block shapes (32-float lines packed into pages vs. full 1024-cell
// product tiles fixed up at write-back).

use crate::tile::{faced_coords, faced_offset};
use crate::types::{SENTINEL_ADDR, TILE_CELLS, TILE_DIM};
use ndarray::Array2;

/// Which multiply kernel the pipeline runs. Selected per deployment, not
/// per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiplyStrategy {
    /// Per-row scalar walk with sentinel early-exit; 8-tile batches,
    /// results packed into 256-float pages.
    DirectAccumulate,
    /// Dense 32x32 block product with diagonal extraction; 4-tile batches,
    /// results written as full tiles and reordered at write-back.
    BlockMatmul,
}

impl MultiplyStrategy {
    /// Row-tiles per pipeline batch. The block path carries 1024-cell
    /// result tiles, so it runs smaller batches to bound buffer residency.
    #[inline(always)]
    pub fn tiles_per_batch(&self) -> usize {
        match self {
            MultiplyStrategy::DirectAccumulate => 8,
            MultiplyStrategy::BlockMatmul => 4,
        }
    }

    /// Result cells emitted per tile.
    #[inline(always)]
    pub fn result_cells_per_tile(&self) -> usize {
        match self {
            MultiplyStrategy::DirectAccumulate => TILE_DIM,
            MultiplyStrategy::BlockMatmul => TILE_CELLS,
        }
    }
}

/// Direct accumulate: for each of the 32 rows, walk the faced layout
/// left-to-right accumulating `value * collected`, stopping at the first
/// sentinel. Writes one scalar per row into `out[..32]`.
pub fn accumulate_tile(values: &[f32], addrs: &[u32], collected: &[f32], out: &mut [f32]) {
    debug_assert!(values.len() >= TILE_CELLS && addrs.len() >= TILE_CELLS);
    debug_assert!(out.len() >= TILE_DIM);

    for row in 0..TILE_DIM {
        let mut sum = 0.0f32;
        for col in 0..TILE_DIM {
            let off = faced_offset(row, col);
            if addrs[off] == SENTINEL_ADDR {
                break;
            }
            sum += values[off] * collected[off];
        }
        out[row] = sum;
    }
}

/// Block matmul: lift both faced tiles to dense 32x32 blocks, multiply the
/// value block against the transposed collected block, and scatter the
/// product back to faced order into `out[..1024]`.
///
/// The gather places each row's matched operands at that row's own slots,
/// so the wanted per-row dot products land on the product's diagonal
/// (`out[faced_offset(d, d)]`); the write-back stage extracts them. The
/// value tile is zero beyond each row's valid prefix and the collected
/// tile is zero-filled before gathering, so sentinel cells contribute
/// nothing to the product.
pub fn matmul_tile(values: &[f32], collected: &[f32], out: &mut [f32]) {
    debug_assert!(values.len() >= TILE_CELLS && collected.len() >= TILE_CELLS);
    debug_assert!(out.len() >= TILE_CELLS);

    let lift = |tile: &[f32]| {
        let mut dense = Array2::<f32>::zeros((TILE_DIM, TILE_DIM));
        for off in 0..TILE_CELLS {
            let (r, c) = faced_coords(off);
            dense[[r, c]] = tile[off];
        }
        dense
    };

    let a = lift(&values[..TILE_CELLS]);
    let b = lift(&collected[..TILE_CELLS]);
    let product = a.dot(&b.t());

    for off in 0..TILE_CELLS {
        let (r, c) = faced_coords(off);
        out[off] = product[[r, c]];
    }
}

/// The diagonal-reorder fixup run by the write-back stage before a block
/// result is issued: index 0 is already in place, indices `1..32` are
/// gathered from the faced diagonal. Mutates in place; each diagonal cell
/// sits at or beyond its destination, so the forward walk never clobbers
/// an unread source.
#[inline]
pub fn reorder_diagonal(block: &mut [f32]) {
    debug_assert!(block.len() >= TILE_CELLS);
    for d in 1..TILE_DIM {
        block[d] = block[faced_offset(d, d)];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Fills faced value/address/collected tiles from per-row (addr, value,
    /// operand) triples.
    fn faced_fixture(rows: &[&[(u32, f32, f32)]]) -> (Vec<f32>, Vec<u32>, Vec<f32>) {
        let mut values = vec![0.0f32; TILE_CELLS];
        let mut addrs = vec![SENTINEL_ADDR; TILE_CELLS];
        let mut collected = vec![0.0f32; TILE_CELLS];
        for (r, row) in rows.iter().enumerate() {
            for (c, &(a, v, x)) in row.iter().enumerate() {
                let off = faced_offset(r, c);
                addrs[off] = a;
                values[off] = v;
                collected[off] = x;
            }
        }
        (values, addrs, collected)
    }

    #[test]
    fn accumulate_sums_valid_prefix_only() {
        let (values, addrs, collected) = faced_fixture(&[
            &[(0, 2.0, 3.0), (4, 5.0, 7.0)],
            &[(1, -1.0, 4.0)],
            &[],
        ]);
        let mut out = vec![0.0f32; TILE_DIM];
        accumulate_tile(&values, &addrs, &collected, &mut out);
        assert_eq!(out[0], 2.0 * 3.0 + 5.0 * 7.0);
        assert_eq!(out[1], -4.0);
        assert_eq!(out[2], 0.0);
    }

    #[test]
    fn matmul_diagonal_matches_accumulate() {
        // A full-ish tile: row r has min(r+1, 32) entries.
        let rows: Vec<Vec<(u32, f32, f32)>> = (0..TILE_DIM)
            .map(|r| {
                (0..(r + 1).min(TILE_DIM))
                    .map(|c| (c as u32, (r + c) as f32 * 0.5 - 3.0, (c + 1) as f32 * 0.25))
                    .collect()
            })
            .collect();
        let row_refs: Vec<&[(u32, f32, f32)]> = rows.iter().map(|r| r.as_slice()).collect();
        let (values, addrs, collected) = faced_fixture(&row_refs);

        let mut direct = vec![0.0f32; TILE_DIM];
        accumulate_tile(&values, &addrs, &collected, &mut direct);

        let mut product = vec![0.0f32; TILE_CELLS];
        matmul_tile(&values, &collected, &mut product);
        reorder_diagonal(&mut product);

        for r in 0..TILE_DIM {
            assert_relative_eq!(product[r], direct[r], max_relative = 1e-5);
        }
    }

    #[test]
    fn matmul_ignores_sentinel_cells() {
        // Garbage in collected cells beyond the valid prefix must not leak:
        // the value tile is zero there.
        let (values, addrs, mut collected) = faced_fixture(&[&[(0, 2.0, 5.0)]]);
        collected[faced_offset(0, 1)] = f32::MAX;
        let _ = addrs;

        let mut product = vec![0.0f32; TILE_CELLS];
        matmul_tile(&values, &collected, &mut product);
        reorder_diagonal(&mut product);
        assert_eq!(product[0], 10.0);
        assert_eq!(product[1], 0.0);
    }

    #[test]
    fn reorder_pulls_from_faced_diagonal() {
        let mut block = vec![0.0f32; TILE_CELLS];
        for d in 0..TILE_DIM {
            block[faced_offset(d, d)] = 100.0 + d as f32;
        }
        reorder_diagonal(&mut block);
        for d in 0..TILE_DIM {
            assert_eq!(block[d], 100.0 + d as f32);
        }
    }

    #[test]
    fn strategy_sizing_is_fixed() {
        assert_eq!(MultiplyStrategy::DirectAccumulate.tiles_per_batch(), 8);
        assert_eq!(MultiplyStrategy::BlockMatmul.tiles_per_batch(), 4);
        assert_eq!(
            MultiplyStrategy::DirectAccumulate.result_cells_per_tile(),
            TILE_DIM
        );
        assert_eq!(MultiplyStrategy::BlockMatmul.result_cells_per_tile(), TILE_CELLS);
    }
}
