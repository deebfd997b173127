// ========================================================================================
//
//                 STREAMING SPMV STRATEGY PERFORMANCE BENCHMARK
//
// ========================================================================================
//
// Measures the two multiply strategies against each other and against the
// scalar oracle on the structured stencil system, across lane counts. The
// stencil problem is the intended workload shape: degree <= 27, banded
// column structure, so per-lane chunk pruning actually bites.
//
// ========================================================================================

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use ellmv::ellpack::EllpackMatrix;
use ellmv::stencil::{self, StencilKind};
use ellmv::tile::TiledEllpack;
use ellmv::{MultiplyStrategy, SpmvContext, spmv};

// --- Benchmark Tuning Parameters ---

/// Grid edge length; the system is `EDGE^3` rows.
const EDGE: usize = 24;
/// Lane counts to sweep. The crossover against the single-lane baseline is
/// the number this benchmark exists to measure.
const LANE_COUNTS: [usize; 4] = [1, 2, 4, 8];

fn setup() -> (TiledEllpack, EllpackMatrix, Vec<f32>) {
    let p = stencil::generate(EDGE, EDGE, EDGE, StencilKind::TwentySevenPoint)
        .expect("stencil generation cannot fail for a valid grid");
    let ell = EllpackMatrix::from_csr(&p.matrix, 32);
    let tiled = TiledEllpack::from_ellpack(&ell);
    let x: Vec<f32> = (0..p.matrix.ncol()).map(|i| (i as f32 * 0.37).sin()).collect();
    (tiled, ell, x)
}

fn bench_strategies(c: &mut Criterion) {
    let (tiled, ell, x) = setup();
    let nnz = (tiled.nrow() * 27) as u64; // upper bound, close enough for throughput

    let mut group = c.benchmark_group("spmv");
    group.throughput(Throughput::Elements(nnz));

    group.bench_function("scalar_oracle", |b| {
        b.iter(|| black_box(ell.spmv_reference(black_box(&x))))
    });

    for strategy in [MultiplyStrategy::DirectAccumulate, MultiplyStrategy::BlockMatmul] {
        for lanes in LANE_COUNTS {
            let ctx = SpmvContext::new(strategy).with_lanes(lanes);
            group.bench_with_input(
                BenchmarkId::new(format!("{strategy:?}"), lanes),
                &lanes,
                |b, _| b.iter(|| black_box(spmv(&ctx, &tiled, black_box(&x)).unwrap())),
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_strategies);
criterion_main!(benches);
