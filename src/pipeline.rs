// ========================================================================================
//
//                        THE STREAMING COMPUTE PIPELINE
//
// ========================================================================================
//
// Orchestrates the per-lane three-stage pipeline: fetch/gather streams
// matrix tiles and pruned vector chunks into pooled lane-local buffers and
// assembles collected operand tiles; multiply-accumulate applies the
// configured kernel; write-back lands result blocks in the lane's disjoint
// slice of `y`. Stages are scoped threads connected by bounded
// crossbeam channels — a stage blocks when its input is empty or its
// output is full, which is the only flow control in the engine. Lanes
// share nothing but the read-only matrix and input vector.

use crate::gather::GatherState;
use crate::kernel::{self, MultiplyStrategy};
use crate::partition::{LaneAssignment, partition_lanes};
use crate::tile::TiledEllpack;
use crate::types::{CHUNK_WIDTH, TILE_CELLS, TILE_DIM};
use crossbeam_channel::{Receiver, Sender, bounded};
use crossbeam_queue::ArrayQueue;
use std::sync::Arc;
use std::thread;
use thiserror::Error;

// --- Pipeline tuning parameters ---

/// Batches in flight between fetch/gather and multiply-accumulate.
/// Two is the minimum that overlaps fetch of batch N+1 with compute of
/// batch N (double buffering).
const BATCH_CHANNEL_BOUND: usize = 2;
/// Result blocks in flight between multiply-accumulate and write-back.
const RESULT_CHANNEL_BOUND: usize = 4;

/// Rejected-input errors of the SpMV entry point.
#[derive(Debug, Clone, Error)]
pub enum SpmvError {
    #[error("input vector has {got} elements but the matrix has {expected} columns")]
    DimensionMismatch { got: usize, expected: usize },
}

/// Caller-owned execution context for the engine.
///
/// The strategy is fixed at construction (the two kernels use different
/// batch sizes and result-block shapes); the lane count defaults to the
/// machine's logical CPUs. There is no hidden global state: contexts are
/// plain values, created and dropped by the caller.
#[derive(Debug, Clone)]
pub struct SpmvContext {
    strategy: MultiplyStrategy,
    lanes: usize,
}

impl SpmvContext {
    pub fn new(strategy: MultiplyStrategy) -> Self {
        Self {
            strategy,
            lanes: num_cpus::get().max(1),
        }
    }

    /// Overrides the lane count. Partitioning never affects numerics, only
    /// scheduling, so any positive count yields identical results.
    pub fn with_lanes(mut self, lanes: usize) -> Self {
        assert!(lanes > 0, "at least one lane is required");
        self.lanes = lanes;
        self
    }

    #[inline(always)]
    pub fn strategy(&self) -> MultiplyStrategy {
        self.strategy
    }

    #[inline(always)]
    pub fn lanes(&self) -> usize {
        self.lanes
    }
}

/// Computes `y = A * x` over the tiled matrix.
///
/// Synchronous; returns when every lane has drained. The postcondition is
/// the row-major ELLPACK dot product (`EllpackMatrix::spmv_reference`)
/// over the possibly-truncated representation, bit-identical for any lane
/// count.
pub fn spmv(ctx: &SpmvContext, matrix: &TiledEllpack, x: &[f32]) -> Result<Vec<f32>, SpmvError> {
    if x.len() != matrix.ncol() {
        return Err(SpmvError::DimensionMismatch {
            got: x.len(),
            expected: matrix.ncol(),
        });
    }

    let strategy = ctx.strategy();
    let assignments = partition_lanes(
        matrix.row_tiles(),
        strategy.tiles_per_batch(),
        ctx.lanes(),
        matrix.tile_extents(),
    );

    log::debug!(
        "spmv: {} tiles over {} lanes ({} tiles/batch, {:?})",
        matrix.row_tiles(),
        ctx.lanes(),
        strategy.tiles_per_batch(),
        strategy,
    );

    let mut y = vec![0.0f32; matrix.nrow()];
    let lane_outputs = carve_output(&mut y, &assignments, matrix.nrow());

    thread::scope(|s| {
        for (assignment, y_lane) in assignments.iter().zip(lane_outputs) {
            s.spawn(move || run_lane(strategy, matrix, x, *assignment, y_lane));
        }
    });

    Ok(y)
}

/// Hands each lane its disjoint row range of `y`. Assignments cover the
/// tile space contiguously in lane order, so a sequential carve is exact;
/// idle lanes receive an empty slice.
fn carve_output<'a>(
    mut y: &'a mut [f32],
    assignments: &[LaneAssignment],
    nrow: usize,
) -> Vec<&'a mut [f32]> {
    let mut slices = Vec::with_capacity(assignments.len());
    let mut carved = 0usize;
    for a in assignments {
        let end = ((a.start_tile + a.num_tiles) * TILE_DIM).min(nrow);
        let (lane, rest) = y.split_at_mut(end - carved);
        slices.push(lane);
        y = rest;
        carved = end;
    }
    slices
}

/// Reusable per-batch staging buffers, cycled through the lane's pool so
/// the steady state allocates nothing.
struct BatchBuffers {
    values: Vec<f32>,
    addrs: Vec<u32>,
    collected: Vec<f32>,
}

/// The payload between fetch/gather and multiply-accumulate: a batch of
/// matrix tiles with their fully-collected operand tiles.
struct TileBatch {
    first_tile: usize,
    tiles: usize,
    buffers: BatchBuffers,
}

/// The payload between multiply-accumulate and write-back. For the direct
/// strategy, `data` packs `tiles * 32` row results (one page per batch);
/// for the block strategy, one full 1024-cell product tile per block.
struct ResultBlock {
    first_tile: usize,
    data: Vec<f32>,
}

/// Runs one lane to completion: spawns the fetch/gather and compute stages
/// and drives write-back on the current thread.
fn run_lane(
    strategy: MultiplyStrategy,
    matrix: &TiledEllpack,
    x: &[f32],
    assignment: LaneAssignment,
    y_lane: &mut [f32],
) {
    if assignment.is_idle() {
        return;
    }

    let (batch_tx, batch_rx) = bounded::<TileBatch>(BATCH_CHANNEL_BOUND);
    let (result_tx, result_rx) = bounded::<ResultBlock>(RESULT_CHANNEL_BOUND);

    // Pool capacities exceed the channel bounds by one so no stage ever
    // stalls on an empty pool while the channel still has space.
    let batch_pool = Arc::new(ArrayQueue::<BatchBuffers>::new(BATCH_CHANNEL_BOUND + 1));
    let result_pool = Arc::new(ArrayQueue::<Vec<f32>>::new(RESULT_CHANNEL_BOUND + 1));

    thread::scope(|s| {
        {
            let batch_pool = Arc::clone(&batch_pool);
            s.spawn(move || fetch_gather_stage(strategy, matrix, x, assignment, batch_pool, batch_tx));
        }
        {
            let batch_pool = Arc::clone(&batch_pool);
            let result_pool = Arc::clone(&result_pool);
            s.spawn(move || {
                compute_stage(strategy, batch_rx, result_tx, batch_pool, result_pool)
            });
        }
        write_back_stage(strategy, result_rx, result_pool, assignment, y_lane);
    });
}

/// Stage 1: fetch each owned batch's value/address tiles into pooled
/// buffers, zero a collected buffer, stream the lane's pruned chunk window
/// in increasing order resolving operands as each chunk becomes resident,
/// then hand the completed batch downstream. Blocks on the bounded channel
/// when compute falls behind.
fn fetch_gather_stage(
    strategy: MultiplyStrategy,
    matrix: &TiledEllpack,
    x: &[f32],
    assignment: LaneAssignment,
    batch_pool: Arc<ArrayQueue<BatchBuffers>>,
    batch_tx: Sender<TileBatch>,
) {
    let tiles_per_batch = strategy.tiles_per_batch();
    let end_tile = assignment.start_tile + assignment.num_tiles;
    let mut gather = GatherState::new(tiles_per_batch);

    let mut first_tile = assignment.start_tile;
    while first_tile < end_tile {
        let tiles = tiles_per_batch.min(end_tile - first_tile);
        let cells = tiles * TILE_CELLS;

        let mut buffers = batch_pool.pop().unwrap_or_else(|| BatchBuffers {
            values: Vec::with_capacity(tiles_per_batch * TILE_CELLS),
            addrs: Vec::with_capacity(tiles_per_batch * TILE_CELLS),
            collected: Vec::with_capacity(tiles_per_batch * TILE_CELLS),
        });

        buffers.values.clear();
        buffers.addrs.clear();
        for tile in first_tile..first_tile + tiles {
            buffers.values.extend_from_slice(matrix.value_tile(tile));
            buffers.addrs.extend_from_slice(matrix.addr_tile(tile));
        }
        debug_assert_eq!(buffers.values.len(), cells);
        // Zero-filled so cells the gather never touches contribute exactly
        // nothing under either kernel.
        buffers.collected.clear();
        buffers.collected.resize(cells, 0.0);

        gather.reset();
        for c in assignment.start_chunk..assignment.start_chunk + assignment.num_chunks {
            let chunk_start = c * CHUNK_WIDTH;
            let chunk_end = (chunk_start + CHUNK_WIDTH).min(x.len());
            gather.collect_chunk(
                &buffers.addrs,
                &mut buffers.collected,
                &x[chunk_start..chunk_end],
                chunk_start,
            );
        }

        if batch_tx
            .send(TileBatch {
                first_tile,
                tiles,
                buffers,
            })
            .is_err()
        {
            // Downstream died; a hung lane is a bug, not a recoverable
            // condition, so just stop producing.
            return;
        }
        first_tile += tiles;
    }
}

/// Stage 2: apply the configured kernel to each tile of each batch. The
/// direct path packs one result page per batch; the block path emits one
/// product tile per matrix tile. Batch buffers return to the pool as soon
/// as the batch is consumed.
fn compute_stage(
    strategy: MultiplyStrategy,
    batch_rx: Receiver<TileBatch>,
    result_tx: Sender<ResultBlock>,
    batch_pool: Arc<ArrayQueue<BatchBuffers>>,
    result_pool: Arc<ArrayQueue<Vec<f32>>>,
) {
    for batch in batch_rx {
        let TileBatch {
            first_tile,
            tiles,
            buffers,
        } = batch;

        match strategy {
            MultiplyStrategy::DirectAccumulate => {
                let mut data = result_pool.pop().unwrap_or_default();
                data.clear();
                data.resize(tiles * strategy.result_cells_per_tile(), 0.0);
                for t in 0..tiles {
                    kernel::accumulate_tile(
                        &buffers.values[t * TILE_CELLS..],
                        &buffers.addrs[t * TILE_CELLS..],
                        &buffers.collected[t * TILE_CELLS..],
                        &mut data[t * TILE_DIM..(t + 1) * TILE_DIM],
                    );
                }
                if result_tx.send(ResultBlock { first_tile, data }).is_err() {
                    return;
                }
            }
            MultiplyStrategy::BlockMatmul => {
                for t in 0..tiles {
                    let mut data = result_pool.pop().unwrap_or_default();
                    data.clear();
                    data.resize(strategy.result_cells_per_tile(), 0.0);
                    kernel::matmul_tile(
                        &buffers.values[t * TILE_CELLS..],
                        &buffers.collected[t * TILE_CELLS..],
                        &mut data,
                    );
                    let block = ResultBlock {
                        first_tile: first_tile + t,
                        data,
                    };
                    if result_tx.send(block).is_err() {
                        return;
                    }
                }
            }
        }

        let _ = batch_pool.push(buffers);
    }
}

/// Stage 3: land result blocks in the lane's output slice, in FIFO order.
/// Block-matmul results get the diagonal-reorder fixup first; every block
/// is copied out fully before its buffer is released back to the pool
/// (write-then-release ordering).
fn write_back_stage(
    strategy: MultiplyStrategy,
    result_rx: Receiver<ResultBlock>,
    result_pool: Arc<ArrayQueue<Vec<f32>>>,
    assignment: LaneAssignment,
    y_lane: &mut [f32],
) {
    for block in result_rx {
        let ResultBlock {
            first_tile,
            mut data,
        } = block;
        let offset = (first_tile - assignment.start_tile) * TILE_DIM;

        let rows = match strategy {
            MultiplyStrategy::DirectAccumulate => data.len(),
            MultiplyStrategy::BlockMatmul => {
                kernel::reorder_diagonal(&mut data);
                TILE_DIM
            }
        };
        let rows = rows.min(y_lane.len() - offset);
        y_lane[offset..offset + rows].copy_from_slice(&data[..rows]);

        let _ = result_pool.push(data);
    }
}
