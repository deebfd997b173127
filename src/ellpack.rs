// ========================================================================================
//
//                               THE ELLPACK BUILDER
//
// ========================================================================================
//
// Converts a validated CSR matrix into the fixed-width-per-row ELLPACK form
// the streaming pipeline consumes. Built once, immutable thereafter. The
// builder also computes the per-row column extents the partitioner later
// reduces for chunk-range pruning.

use crate::types::{MAX_ELLPACK_WIDTH, RowColumnExtent, SENTINEL_ADDR, SparseMatrix};

/// Fixed-width sparse storage: `nrow x width` values and column addresses,
/// row-major, valid entries left-aligned in each row.
///
/// Padding cells carry `0.0` / `SENTINEL_ADDR`. Within each row's valid
/// prefix the addresses are non-decreasing — inherited from the validated
/// CSR input and required by the gather stage's early exit.
#[derive(Debug)]
pub struct EllpackMatrix {
    nrow: usize,
    ncol: usize,
    width: usize,
    values: Vec<f32>,
    col_addrs: Vec<u32>,
    row_extents: Vec<RowColumnExtent>,
}

impl EllpackMatrix {
    /// Builds the ELLPACK form of `csr` with row width capped at
    /// `max_width` (clamped to the layout limit of 32).
    ///
    /// Rows whose degree exceeds the width are truncated to their first
    /// `width` entries — CSR write order, lowest column first — and a
    /// warning diagnostic is emitted once. Truncation is lossy and
    /// documented, not an error.
    pub fn from_csr(csr: &SparseMatrix, max_width: usize) -> Self {
        let nrow = csr.nrow();
        let cap = max_width.min(MAX_ELLPACK_WIDTH).max(1);

        let max_degree = (0..nrow).map(|r| csr.row_degree(r)).max().unwrap_or(0);
        let width = if max_degree > cap {
            log::warn!(
                "max nonzeros per row ({max_degree}) exceeds ELLPACK width ({cap}); truncating"
            );
            cap
        } else {
            // Keep at least one slot so a fully-empty matrix still has a
            // well-formed (all-sentinel) layout.
            max_degree.max(1)
        };

        let mut values = vec![0.0f32; nrow * width];
        let mut col_addrs = vec![SENTINEL_ADDR; nrow * width];
        let mut row_extents = vec![RowColumnExtent::EMPTY; nrow];

        for r in 0..nrow {
            let keep = csr.row_degree(r).min(width);
            let cols = &csr.row_cols(r)[..keep];
            let vals = &csr.row_vals(r)[..keep];
            values[r * width..r * width + keep].copy_from_slice(vals);
            col_addrs[r * width..r * width + keep].copy_from_slice(cols);
            for &col in cols {
                row_extents[r].cover(col);
            }
        }

        Self {
            nrow,
            ncol: csr.ncol(),
            width,
            values,
            col_addrs,
            row_extents,
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

    /// The fixed per-row slot count `W`.
    #[inline(always)]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline(always)]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    #[inline(always)]
    pub fn col_addrs(&self) -> &[u32] {
        &self.col_addrs
    }

    /// Per-row `(min_col, max_col)` over valid entries; `EMPTY` for a row
    /// with no entries ("no dependency").
    #[inline(always)]
    pub fn row_extents(&self) -> &[RowColumnExtent] {
        &self.row_extents
    }

    /// Scalar row-major SpMV over the ELLPACK arrays.
    ///
    /// This is the oracle the pipeline is cross-checked against: it defines
    /// `y[r]` for the (possibly truncated) matrix this structure represents,
    /// accumulating in row-slot order exactly like both multiply strategies.
    pub fn spmv_reference(&self, x: &[f32]) -> Vec<f32> {
        assert_eq!(x.len(), self.ncol);
        let mut y = vec![0.0f32; self.nrow];
        for r in 0..self.nrow {
            let row = r * self.width;
            let mut sum = 0.0f32;
            for s in 0..self.width {
                let addr = self.col_addrs[row + s];
                if addr == SENTINEL_ADDR {
                    break;
                }
                sum += self.values[row + s] * x[addr as usize];
            }
            y[r] = sum;
        }
        y
    }
}
