use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use mesh_tiler::tiling::simplifier::simplify;
use mesh_tiler::types::geometry::Triangle;

/// Flat grid of `n x n` quads with normals and UVs.
fn make_grid(n: usize) -> Vec<Triangle> {
    let mut out = Vec::with_capacity(n * n * 2);
    let step = 1.0 / n as f64;
    for y in 0..n {
        for x in 0..n {
            let x0 = x as f64 * step;
            let y0 = y as f64 * step;
            let corners = [
                [x0, y0, 0.0],
                [x0 + step, y0, 0.0],
                [x0 + step, y0 + step, 0.0],
                [x0, y0 + step, 0.0],
            ];
            let normal = [0.0, 0.0, 1.0];
            for idx in [[0usize, 1, 2], [0, 2, 3]] {
                let vs = [corners[idx[0]], corners[idx[1]], corners[idx[2]]];
                let uvs = [
                    [vs[0][0], vs[0][1]],
                    [vs[1][0], vs[1][1]],
                    [vs[2][0], vs[2][1]],
                ];
                out.push(Triangle::new(vs, Some([normal; 3]), Some(uvs), None).unwrap());
            }
        }
    }
    out
}

fn bench_simplify(c: &mut Criterion) {
    let mut group = c.benchmark_group("simplify");

    for n in [32usize, 64, 128] {
        let triangles = make_grid(n);
        group.bench_function(format!("{}_tris_ratio_0.25", triangles.len()), |b| {
            b.iter(|| {
                simplify(
                    black_box(&triangles),
                    black_box(0.25),
                    0.01,
                    true,
                    true,
                )
            })
        });
    }

    let triangles = make_grid(64);
    group.bench_function("8192_tris_positions_only", |b| {
        b.iter(|| simplify(black_box(&triangles), black_box(0.25), 0.01, false, false))
    });

    group.finish();
}

criterion_group!(benches, bench_simplify);
criterion_main!(benches);
