// ========================================================================================
//
//                      TILE LAYOUT TRANSFORM & FACED ADDRESSING
//
// ========================================================================================
//
// This module owns the on-wire layout of the pipeline's transfer unit: the
// 32x32 tile, stored as four contiguous 16x16 quadrant faces (top-left,
// top-right, bottom-left, bottom-right). The block-matmul strategy and the
// diagonal write-back both address tiles through `faced_offset`, so this
// mapping is part of the public contract and tested independently of the
// rest of the pipeline.

use crate::ellpack::EllpackMatrix;
use crate::types::{
    FACE_CELLS, FACE_DIM, RowColumnExtent, SENTINEL_ADDR, TILE_CELLS, TILE_DIM,
};
use rayon::prelude::*;

/// Maps logical in-tile coordinates to the linear index in faced storage.
///
/// Quadrant order: TL, TR, BL, BR, each a contiguous 16x16 block. The
/// `row >> 5` term lets callers address rows of a vertical stack of tiles
/// linearly.
#[inline(always)]
pub fn faced_offset(row: usize, col: usize) -> usize {
    let in_face_row = row & 0xF;
    let in_face_col = col & 0xF;
    let face_id = ((row & 0x10) >> 3) | ((col & 0x10) >> 4) | ((row >> 5) << 2);
    face_id * FACE_CELLS + in_face_row * FACE_DIM + in_face_col
}

/// Exact inverse of `faced_offset` within one tile.
#[inline(always)]
pub fn faced_coords(offset: usize) -> (usize, usize) {
    let face_id = offset / FACE_CELLS;
    let within = offset % FACE_CELLS;
    let row = ((face_id & 0b10) << 3) | (within / FACE_DIM) | ((face_id >> 2) << 5);
    let col = ((face_id & 0b01) << 4) | (within % FACE_DIM);
    (row, col)
}

/// Re-lays a row-major `nrow x width` buffer into tile-major faced storage.
///
/// Output length is `ceil(nrow/32) * ceil(width/32) * 1024`; cells beyond
/// the matrix bounds carry `pad`. Placement: logical cell `(r, c)` lands in
/// tile `(r/32, c/32)` at `faced_offset(r%32, c%32)`.
pub fn tilize<T: Copy + Send + Sync>(src: &[T], nrow: usize, width: usize, pad: T) -> Vec<T> {
    debug_assert_eq!(src.len(), nrow * width);
    let tiles_r = nrow.div_ceil(TILE_DIM);
    let tiles_c = width.div_ceil(TILE_DIM);

    let mut out = vec![pad; tiles_r * tiles_c * TILE_CELLS];
    out.par_chunks_mut(TILE_CELLS)
        .enumerate()
        .for_each(|(tile_idx, tile)| {
            let tr = tile_idx / tiles_c;
            let tc = tile_idx % tiles_c;
            for r in 0..TILE_DIM {
                let global_r = tr * TILE_DIM + r;
                if global_r >= nrow {
                    break;
                }
                for c in 0..TILE_DIM {
                    let global_c = tc * TILE_DIM + c;
                    if global_c >= width {
                        break;
                    }
                    tile[faced_offset(r, c)] = src[global_r * width + global_c];
                }
            }
        });
    out
}

/// Inverse of `tilize` over the in-bounds cells.
pub fn untilize<T: Copy + Default>(tiled: &[T], nrow: usize, width: usize) -> Vec<T> {
    let tiles_c = width.div_ceil(TILE_DIM);
    let mut out = vec![T::default(); nrow * width];
    for (i, slot) in out.iter_mut().enumerate() {
        let (r, c) = (i / width, i % width);
        let tile_idx = (r / TILE_DIM) * tiles_c + c / TILE_DIM;
        *slot = tiled[tile_idx * TILE_CELLS + faced_offset(r % TILE_DIM, c % TILE_DIM)];
    }
    out
}

/// The tiled, faced representation of an ELLPACK matrix, ready to stream.
///
/// Built once from an `EllpackMatrix` and immutable thereafter. With the
/// default width of 32 the tiling is one tile wide, so `row_tiles` indexes
/// both the tile grid and the output rows (`tile * 32 .. tile * 32 + 32`).
#[derive(Debug)]
pub struct TiledEllpack {
    nrow: usize,
    ncol: usize,
    row_tiles: usize,
    col_tiles: usize,
    values: Vec<f32>,
    col_addrs: Vec<u32>,
    tile_extents: Vec<RowColumnExtent>,
}

impl TiledEllpack {
    /// Applies the layout transform and reduces the builder's per-row
    /// extents to one pruning extent per row-tile.
    pub fn from_ellpack(matrix: &EllpackMatrix) -> Self {
        let nrow = matrix.nrow();
        let width = matrix.width();
        let row_tiles = nrow.div_ceil(TILE_DIM);
        let col_tiles = width.div_ceil(TILE_DIM);

        let values = tilize(matrix.values(), nrow, width, 0.0f32);
        let col_addrs = tilize(matrix.col_addrs(), nrow, width, SENTINEL_ADDR);

        let tile_extents = (0..row_tiles)
            .map(|tr| {
                let first = tr * TILE_DIM;
                let last = ((tr + 1) * TILE_DIM).min(nrow);
                matrix.row_extents()[first..last]
                    .iter()
                    .fold(RowColumnExtent::EMPTY, |acc, e| acc.merge(e))
            })
            .collect();

        Self {
            nrow,
            ncol: matrix.ncol(),
            row_tiles,
            col_tiles,
            values,
            col_addrs,
            tile_extents,
        }
    }

    #[inline(always)]
    pub fn nrow(&self) -> usize {
        self.nrow
    }

    #[inline(always)]
    pub fn ncol(&self) -> usize {
        self.ncol
    }

    #[inline(always)]
    pub fn row_tiles(&self) -> usize {
        self.row_tiles
    }

    #[inline(always)]
    pub fn col_tiles(&self) -> usize {
        self.col_tiles
    }

    #[inline(always)]
    pub fn tile_extents(&self) -> &[RowColumnExtent] {
        &self.tile_extents
    }

    /// Faced value cells of row-tile `tile` (the full one-tile-wide page).
    #[inline(always)]
    pub fn value_tile(&self, tile: usize) -> &[f32] {
        &self.values[tile * self.col_tiles * TILE_CELLS..(tile + 1) * self.col_tiles * TILE_CELLS]
    }

    /// Faced address cells of row-tile `tile`.
    #[inline(always)]
    pub fn addr_tile(&self, tile: usize) -> &[u32] {
        &self.col_addrs
            [tile * self.col_tiles * TILE_CELLS..(tile + 1) * self.col_tiles * TILE_CELLS]
    }

    #[inline(always)]
    pub fn tiled_values(&self) -> &[f32] {
        &self.values
    }

    #[inline(always)]
    pub fn tiled_addrs(&self) -> &[u32] {
        &self.col_addrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SparseMatrix;

    #[test]
    fn faced_offset_is_a_bijection() {
        let mut seen = vec![false; TILE_CELLS];
        for r in 0..TILE_DIM {
            for c in 0..TILE_DIM {
                let off = faced_offset(r, c);
                assert!(off < TILE_CELLS);
                assert!(!seen[off], "offset {off} hit twice");
                seen[off] = true;
                assert_eq!(faced_coords(off), (r, c));
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn faced_offset_matches_quadrant_order() {
        // One spot check per face: TL, TR, BL, BR at 256-cell strides.
        assert_eq!(faced_offset(0, 0), 0);
        assert_eq!(faced_offset(0, 16), 256);
        assert_eq!(faced_offset(16, 0), 512);
        assert_eq!(faced_offset(16, 16), 768);
        assert_eq!(faced_offset(1, 2), 18);
    }

    #[test]
    fn tilize_pads_and_round_trips() {
        // 40 rows x 5 cols: 2 row-tiles, 1 col-tile, mostly padding.
        let nrow = 40;
        let width = 5;
        let src: Vec<f32> = (0..nrow * width).map(|i| i as f32).collect();
        let tiled = tilize(&src, nrow, width, -1.0f32);
        assert_eq!(tiled.len(), 2 * TILE_CELLS);
        assert_eq!(tiled[faced_offset(3, 4)], src[3 * width + 4]);
        // Cell (0, 5) is out of bounds and must hold the pad value.
        assert_eq!(tiled[faced_offset(0, 5)], -1.0);
        assert_eq!(untilize(&tiled, nrow, width), src);
    }

    #[test]
    fn ellpack_round_trip_is_bit_exact() {
        // 50-row bidiagonal matrix, degree <= 2, no truncation.
        let nrow = 50;
        let mut offsets = vec![0usize];
        let mut cols = Vec::new();
        let mut vals = Vec::new();
        for r in 0..nrow {
            cols.push(r as u32);
            vals.push(1.0 + r as f32 * 0.25);
            if r + 1 < nrow {
                cols.push(r as u32 + 1);
                vals.push(-0.5);
            }
            offsets.push(cols.len());
        }
        let csr = SparseMatrix::new(nrow, nrow, offsets, cols, vals).unwrap();
        let ell = EllpackMatrix::from_csr(&csr, 32);
        let tiled = TiledEllpack::from_ellpack(&ell);

        let vals_back = untilize(tiled.tiled_values(), nrow, ell.width());
        let addrs_back = untilize(tiled.tiled_addrs(), nrow, ell.width());
        assert_eq!(vals_back, ell.values());
        assert_eq!(addrs_back, ell.col_addrs());
    }

    #[test]
    fn tile_extents_reduce_per_row_extents() {
        // Row 0 touches column 100, row 40 touches column 3.
        let csr = SparseMatrix::new(
            41,
            128,
            {
                let mut o = vec![0usize; 42];
                o[1..].iter_mut().enumerate().for_each(|(r, v)| {
                    *v = if r == 0 || r == 40 { 1 } else { 0 };
                });
                for i in 1..42 {
                    o[i] += o[i - 1];
                }
                o
            },
            vec![100, 3],
            vec![1.0, 2.0],
        )
        .unwrap();
        let tiled = TiledEllpack::from_ellpack(&EllpackMatrix::from_csr(&csr, 32));
        assert_eq!(tiled.row_tiles(), 2);
        assert_eq!(tiled.tile_extents()[0].min_col, 100);
        assert_eq!(tiled.tile_extents()[0].max_col, 100);
        assert_eq!(tiled.tile_extents()[1].min_col, 3);
        assert_eq!(tiled.tile_extents()[1].max_col, 3);
    }
}
