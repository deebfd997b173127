// ========================================================================================
//
//                                  ELLMV: CRATE ROOT
//
// ========================================================================================
//
// A streaming sparse matrix-vector engine for matrices too large to hold
// next to the compute: the matrix is converted once to fixed-width ELLPACK,
// re-laid into faced 32x32 tiles, and streamed through per-lane
// fetch/gather -> multiply -> write-back pipelines in bounded batches. The
// module graph is a straight line through the data's lifecycle:
//
//   types    - shared constants, the validated CSR input contract
//   ellpack  - CSR -> fixed-width ELLPACK conversion (width cap, extents)
//   tile     - faced tile layout transform and addressing
//   partition- batch/lane split and per-lane chunk-window pruning
//   gather   - chunk-resident operand collection with per-row cursors
//   kernel   - the two tile multiply strategies
//   pipeline - lanes, channels, buffer pools, and the public `spmv`
//   stencil  - structured 3D test-problem generator

pub mod ellpack;
pub mod gather;
pub mod kernel;
pub mod partition;
pub mod pipeline;
pub mod stencil;
pub mod tile;
pub mod types;

pub use ellpack::EllpackMatrix;
pub use kernel::MultiplyStrategy;
pub use pipeline::{SpmvContext, SpmvError, spmv};
pub use tile::TiledEllpack;
pub use types::{MatrixError, SparseMatrix};
