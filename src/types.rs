// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// This file is ONLY for types and constants that are SHARED BETWEEN FILES, not
// types that are used in a single module.

use thiserror::Error;

// --- Engine sizing constants ---
// Fixed by the layout contract: the faced addressing in `tile.rs` is
// hard-wired to 32x32 tiles with 16x16 faces, and the write-back stage
// packs 256-float pages.

/// Side length of one square matrix tile, the unit of pipeline transfer.
pub const TILE_DIM: usize = 32;
/// Side length of one quadrant face within a tile.
pub const FACE_DIM: usize = 16;
/// Cells in one face (16 * 16).
pub const FACE_CELLS: usize = FACE_DIM * FACE_DIM;
/// Cells in one tile (32 * 32).
pub const TILE_CELLS: usize = TILE_DIM * TILE_DIM;
/// Maximum ELLPACK row width. Rows with more nonzeros are truncated.
pub const MAX_ELLPACK_WIDTH: usize = 32;
/// Elements of `x` streamed per vector chunk (one 1 KiB page of f32).
pub const CHUNK_WIDTH: usize = 256;
/// Reserved column address marking "no entry" / padding.
pub const SENTINEL_ADDR: u32 = u32::MAX;

/// Column min/max over the valid addresses of one row-tile.
///
/// Pruning-only metadata: the partitioner uses it to shrink each lane's
/// chunk window, it never affects numeric results. An all-empty tile is
/// represented as `(SENTINEL_ADDR, 0)` — "no dependency".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowColumnExtent {
    pub min_col: u32,
    pub max_col: u32,
}

impl RowColumnExtent {
    /// The identity under `merge`: an extent that depends on nothing.
    pub const EMPTY: Self = Self {
        min_col: SENTINEL_ADDR,
        max_col: 0,
    };

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min_col > self.max_col
    }

    #[inline]
    pub fn merge(&self, other: &Self) -> Self {
        Self {
            min_col: self.min_col.min(other.min_col),
            max_col: self.max_col.max(other.max_col),
        }
    }

    /// Widens the extent to cover one observed column address.
    #[inline]
    pub fn cover(&mut self, col: u32) {
        self.min_col = self.min_col.min(col);
        self.max_col = self.max_col.max(col);
    }
}

/// Rejected-input errors raised before any pipeline work starts.
///
/// Structural violations are fatal to the call; they are never retried and
/// never partially applied.
#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("matrix must have at least one row")]
    EmptyMatrix,
    #[error("row offsets must have nrow + 1 entries (got {got}, expected {expected})")]
    BadOffsetLength { got: usize, expected: usize },
    #[error("row offsets must be non-decreasing (offset[{row}] = {prev} precedes {next})")]
    NonMonotoneOffsets { row: usize, prev: usize, next: usize },
    #[error("row offsets address {nnz} nonzeros but {got} column indices / values were supplied")]
    BadArrayLength { nnz: usize, got: usize },
    #[error("column index {col} in row {row} is out of range (ncol = {ncol})")]
    ColumnOutOfRange { row: usize, col: u32, ncol: usize },
    #[error("column indices in row {row} are not sorted ({prev} followed by {next}); \
             the gather stage's early-exit relies on non-decreasing addresses")]
    UnsortedRow { row: usize, prev: u32, next: u32 },
}

/// A validated CSR matrix, the input contract of the ELLPACK builder.
///
/// Successful construction is a proof that the structure is well-formed:
/// strictly bounded offsets, in-range column indices, and the sorted-row
/// invariant the streaming gather depends on. The fields are private so the
/// proof cannot be invalidated after the fact.
#[derive(Debug, Clone)]
pub struct SparseMatrix {
    nrow: usize,
    ncol: usize,
    row_offsets: Vec<usize>,
    col_indices: Vec<u32>,
    values: Vec<f32>,
}

impl SparseMatrix {
    /// Validates and adopts raw CSR arrays.
    ///
    /// Rejects: zero rows, malformed offset arrays, column indices outside
    /// `[0, ncol)`, and rows whose column indices are not non-decreasing.
    /// The last check is not optional hygiene — an unsorted row would make
    /// the gather stage silently undercollect (see `gather.rs`).
    pub fn new(
        nrow: usize,
        ncol: usize,
        row_offsets: Vec<usize>,
        col_indices: Vec<u32>,
        values: Vec<f32>,
    ) -> Result<Self, MatrixError> {
        if nrow == 0 {
            return Err(MatrixError::EmptyMatrix);
        }
        if row_offsets.len() != nrow + 1 {
            return Err(MatrixError::BadOffsetLength {
                got: row_offsets.len(),
                expected: nrow + 1,
            });
        }
        for row in 0..nrow {
            if row_offsets[row] > row_offsets[row + 1] {
                return Err(MatrixError::NonMonotoneOffsets {
                    row,
                    prev: row_offsets[row],
                    next: row_offsets[row + 1],
                });
            }
        }
        let nnz = row_offsets[nrow];
        if col_indices.len() != nnz || values.len() != nnz {
            return Err(MatrixError::BadArrayLength {
                nnz,
                got: col_indices.len().min(values.len()),
            });
        }
        for row in 0..nrow {
            let cols = &col_indices[row_offsets[row]..row_offsets[row + 1]];
            for (i, &col) in cols.iter().enumerate() {
                if (col as usize) >= ncol {
                    return Err(MatrixError::ColumnOutOfRange { row, col, ncol });
                }
                if i > 0 && cols[i - 1] > col {
                    return Err(MatrixError::UnsortedRow {
                        row,
                        prev: cols[i - 1],
                        next: col,
                    });
                }
            }
        }
        Ok(Self {
            nrow,
            ncol,
            row_offsets,
            col_indices,
            values,
        })
    }

    #[inline(always)]
    pub fn nrow(&self) -> usize {
        self.nrow
    }

    #[inline(always)]
    pub fn ncol(&self) -> usize {
        self.ncol
    }

    /// Number of nonzeros in row `r`.
    #[inline(always)]
    pub fn row_degree(&self, r: usize) -> usize {
        self.row_offsets[r + 1] - self.row_offsets[r]
    }

    /// Column indices of row `r`'s nonzeros.
    #[inline(always)]
    pub fn row_cols(&self, r: usize) -> &[u32] {
        &self.col_indices[self.row_offsets[r]..self.row_offsets[r + 1]]
    }

    /// Values of row `r`'s nonzeros.
    #[inline(always)]
    pub fn row_vals(&self, r: usize) -> &[f32] {
        &self.values[self.row_offsets[r]..self.row_offsets[r + 1]]
    }
}
