// ========================================================================================
//
//                        STRUCTURED TEST-PROBLEM GENERATOR
//
// ========================================================================================
//
// Builds the classic 3D finite-difference stencil system on an
// `nx * ny * nz` grid: 27.0 on the diagonal, -1.0 for each in-bounds
// neighbor, with a known exact solution of all ones. Row `i`'s right-hand
// side is then `27.0 - (nnz_row - 1)`, which makes `A * xexact == b` an
// exact (not merely approximate) identity in f32 and a convenient
// end-to-end oracle. Neighbor offsets are emitted in lexicographic
// `(dz, dy, dx)` order, which is ascending column order, so the rows come
// out sorted as `SparseMatrix::new` requires.

use crate::types::{MatrixError, SparseMatrix};

/// Which neighborhood the generator connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StencilKind {
    /// All 26 neighbors of the unit cube (plus the center).
    TwentySevenPoint,
    /// Only face neighbors: offsets with at most one nonzero component.
    SevenPoint,
}

/// A generated stencil system: the matrix, an all-zero starting vector, the
/// right-hand side, and the exact solution (all ones).
#[derive(Debug)]
pub struct StencilProblem {
    pub matrix: SparseMatrix,
    pub x0: Vec<f32>,
    pub b: Vec<f32>,
    pub xexact: Vec<f32>,
}

/// Generates the stencil system for an `nx * ny * nz` grid.
pub fn generate(nx: usize, ny: usize, nz: usize, kind: StencilKind) -> Result<StencilProblem, MatrixError> {
    let n = nx * ny * nz;
    let mut row_offsets = Vec::with_capacity(n + 1);
    let mut col_indices = Vec::with_capacity(n * 27);
    let mut values = Vec::with_capacity(n * 27);
    let mut b = Vec::with_capacity(n);
    row_offsets.push(0);

    for iz in 0..nz as isize {
        for iy in 0..ny as isize {
            for ix in 0..nx as isize {
                let row = iz * (nx * ny) as isize + iy * nx as isize + ix;
                let mut nnz_row = 0usize;
                for dz in -1..=1isize {
                    for dy in -1..=1isize {
                        for dx in -1..=1isize {
                            if kind == StencilKind::SevenPoint && dx * dx + dy * dy + dz * dz > 1 {
                                continue;
                            }
                            let (jx, jy, jz) = (ix + dx, iy + dy, iz + dz);
                            if jx < 0
                                || jy < 0
                                || jz < 0
                                || jx >= nx as isize
                                || jy >= ny as isize
                                || jz >= nz as isize
                            {
                                continue;
                            }
                            let col = row + dz * (nx * ny) as isize + dy * nx as isize + dx;
                            col_indices.push(col as u32);
                            values.push(if col == row { 27.0 } else { -1.0 });
                            nnz_row += 1;
                        }
                    }
                }
                row_offsets.push(col_indices.len());
                // Row sum with xexact = 1: the diagonal minus one per
                // off-diagonal neighbor.
                b.push(27.0 - (nnz_row as f32 - 1.0));
            }
        }
    }

    log::info!(
        "generated {n}x{n} stencil system ({} nonzeros, {:?})",
        col_indices.len(),
        kind
    );

    let matrix = SparseMatrix::new(n, n, row_offsets, col_indices, values)?;
    Ok(StencilProblem {
        matrix,
        x0: vec![0.0; n],
        b,
        xexact: vec![1.0; n],
    })
}
