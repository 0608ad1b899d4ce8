use crate::partition::PartitionContext;
use crate::partition::octree::child_bounds;
use crate::types::geometry::{BoundingBox, Triangle, v_length, v_sub};
use crate::types::tile::{TileCoord, TileDescriptor};

/// Regions denser than this many triangles keep subdividing.
const TRIANGLE_BUDGET: usize = 256;

/// Shape-irregularity score above which a region subdivides even when its
/// triangle count is modest.
const CURVATURE_THRESHOLD: f64 = 0.35;
const CURVATURE_MIN_TRIANGLES: usize = 64;

/// Density measurements for one candidate region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DensityMetrics {
    pub triangle_count: usize,
    pub vertex_density: f64,
    pub triangle_density: f64,
    /// Mean normalized edge-length variance across the region's triangles.
    pub curvature_complexity: f64,
    pub surface_area: f64,
}

/// Evaluate region metrics from the shared spatial index. Iteration order is
/// the index's deterministic cell scan, so repeated runs score identically.
pub fn region_metrics(ctx: &PartitionContext<'_>, region: &BoundingBox) -> DensityMetrics {
    let triangles = ctx.index.triangles_overlapping(region, 0.0);
    let volume = {
        let s = region.size();
        (s[0] * s[1] * s[2]).max(1e-12)
    };

    let surface_area: f64 = triangles.iter().map(|t| t.area()).sum();
    let curvature_complexity = mean_shape_irregularity(&triangles);

    DensityMetrics {
        triangle_count: triangles.len(),
        vertex_density: (triangles.len() * 3) as f64 / volume,
        triangle_density: triangles.len() as f64 / volume,
        curvature_complexity,
        surface_area,
    }
}

/// Per-triangle shape score: variance of edge lengths over squared mean edge
/// length. Equilateral triangles score 0; elongated slivers score high.
fn mean_shape_irregularity(triangles: &[&Triangle]) -> f64 {
    if triangles.is_empty() {
        return 0.0;
    }
    let mut sum = 0.0;
    for tri in triangles {
        let [a, b, c] = tri.vertices;
        let edges = [
            v_length(v_sub(b, a)),
            v_length(v_sub(c, b)),
            v_length(v_sub(a, c)),
        ];
        let mean = (edges[0] + edges[1] + edges[2]) / 3.0;
        if mean <= 0.0 {
            continue;
        }
        let variance =
            edges.iter().map(|e| (e - mean) * (e - mean)).sum::<f64>() / 3.0;
        sum += variance / (mean * mean);
    }
    sum / triangles.len() as f64
}

fn should_split(
    ctx: &PartitionContext<'_>,
    bounds: &BoundingBox,
    metrics: &DensityMetrics,
    level: u32,
) -> bool {
    if level >= ctx.config.max_level {
        return false;
    }
    bounds.longest_edge() > ctx.config.tile_size
        || metrics.triangle_count > TRIANGLE_BUDGET
        || (metrics.triangle_count > CURVATURE_MIN_TRIANGLES
            && metrics.curvature_complexity > CURVATURE_THRESHOLD)
}

/// Adaptive: octree-style subdivision driven by region size and geometry
/// density. Regions with no geometry are omitted entirely, so sparse scenes
/// get no tiles in their empty space.
pub fn descriptors(ctx: &PartitionContext<'_>, level: u32) -> Vec<TileDescriptor> {
    if ctx.model_bounds.is_empty() || ctx.index.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::new();
    collect(ctx, ctx.model_bounds, TileCoord::ROOT, level, &mut out);
    out
}

fn collect(
    ctx: &PartitionContext<'_>,
    bounds: BoundingBox,
    coord: TileCoord,
    target_level: u32,
    out: &mut Vec<TileDescriptor>,
) {
    let metrics = region_metrics(ctx, &bounds);
    if metrics.triangle_count == 0 {
        return;
    }

    let will_split = should_split(ctx, &bounds, &metrics, coord.level);

    if coord.level == target_level {
        let children_expected = if will_split {
            let children = coord.children();
            (0..8)
                .filter(|&octant| {
                    region_metrics(ctx, &child_bounds(&bounds, octant)).triangle_count > 0
                        && children[octant].level <= ctx.config.max_level
                })
                .count() as u8
        } else {
            0
        };
        out.push(TileDescriptor {
            coord,
            bounds,
            parent: coord.parent(),
            children_expected,
        });
        return;
    }

    if !will_split {
        return;
    }

    let children = coord.children();
    for octant in 0..8 {
        collect(
            ctx,
            child_bounds(&bounds, octant),
            children[octant],
            target_level,
            out,
        );
    }
}
