use rayon::prelude::*;

use crate::spatial::intersect::triangle_intersects_aabb;
use crate::types::geometry::{BoundingBox, Triangle};

/// Default grid resolution (x, y, z). Scenes are usually wider than tall.
pub const DEFAULT_RESOLUTION: [usize; 3] = [64, 64, 32];

/// Uniform-grid spatial index over a triangle soup.
///
/// Built once per run and read-only afterwards, so it is shared freely
/// across tile workers. Each triangle lands in every cell its AABB overlaps.
#[derive(Debug)]
pub struct GridIndex {
    bounds: BoundingBox,
    dims: [usize; 3],
    cell_size: [f64; 3],
    cells: Vec<Vec<u32>>,
    triangles: Vec<Triangle>,
}

impl GridIndex {
    /// Build the index with the default resolution.
    pub fn build(triangles: Vec<Triangle>, bounds: BoundingBox) -> Self {
        Self::build_with_resolution(triangles, bounds, DEFAULT_RESOLUTION)
    }

    pub fn build_with_resolution(
        triangles: Vec<Triangle>,
        bounds: BoundingBox,
        resolution: [usize; 3],
    ) -> Self {
        let size = bounds.size();
        let mut dims = [1usize; 3];
        let mut cell_size = [1.0f64; 3];
        for axis in 0..3 {
            // Degenerate axes collapse to a single unit cell.
            if size[axis] > f64::EPSILON {
                dims[axis] = resolution[axis].max(1);
                cell_size[axis] = size[axis] / dims[axis] as f64;
            }
        }

        let mut index = Self {
            bounds,
            dims,
            cell_size,
            cells: vec![Vec::new(); dims[0] * dims[1] * dims[2]],
            triangles,
        };

        // Cell ranges are independent per triangle; the fill stays serial.
        let ranges: Vec<([usize; 3], [usize; 3])> = index
            .triangles
            .par_iter()
            .map(|tri| index.cell_range(&tri.aabb()))
            .collect();

        for (tri_index, (lo, hi)) in ranges.into_iter().enumerate() {
            for z in lo[2]..=hi[2] {
                for y in lo[1]..=hi[1] {
                    for x in lo[0]..=hi[0] {
                        let cell = (z * index.dims[1] + y) * index.dims[0] + x;
                        index.cells[cell].push(tri_index as u32);
                    }
                }
            }
        }

        index
    }

    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    pub fn len(&self) -> usize {
        self.triangles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    pub fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }

    /// Inclusive cell index range covering `query`, clamped to the grid.
    fn cell_range(&self, query: &BoundingBox) -> ([usize; 3], [usize; 3]) {
        let mut lo = [0usize; 3];
        let mut hi = [0usize; 3];
        for axis in 0..3 {
            let max_cell = self.dims[axis] as i64 - 1;
            let lo_f = (query.min[axis] - self.bounds.min[axis]) / self.cell_size[axis];
            let hi_f = (query.max[axis] - self.bounds.min[axis]) / self.cell_size[axis];
            lo[axis] = (lo_f.floor() as i64).clamp(0, max_cell) as usize;
            hi[axis] = (hi_f.floor() as i64).clamp(0, max_cell) as usize;
        }
        (lo, hi)
    }

    /// Tolerance policy keyed on query size relative to the scene.
    ///
    /// Small queries get proportionally larger padding: cell quantization
    /// error dominates when a tile covers a sliver of the scene.
    pub fn adaptive_tolerance(&self, query: &BoundingBox) -> f64 {
        let scene = self.bounds.diagonal();
        let q = query.diagonal();
        if scene <= 0.0 {
            return 1e-4;
        }
        let ratio = q / scene;
        if ratio > 0.1 {
            (q * 0.01).max(1e-4)
        } else if ratio > 0.01 {
            (q * 0.05).max(scene * 0.001)
        } else {
            (q * 0.10).max(scene * 0.001)
        }
    }

    /// All triangles intersecting `query` padded by `tolerance`.
    ///
    /// Candidates come from the covered cell range (padded by one cell for
    /// very small queries), deduplicated, then filtered by the exact
    /// conservative test.
    pub fn triangles_overlapping(&self, query: &BoundingBox, tolerance: f64) -> Vec<&Triangle> {
        if self.triangles.is_empty() {
            return Vec::new();
        }

        let padded_query = query.padded(tolerance);
        let (mut lo, mut hi) = self.cell_range(&padded_query);

        let scene = self.bounds.diagonal();
        if scene > 0.0 && query.diagonal() / scene < 0.01 {
            for axis in 0..3 {
                lo[axis] = lo[axis].saturating_sub(1);
                hi[axis] = (hi[axis] + 1).min(self.dims[axis] - 1);
            }
        }

        let mut seen = vec![false; self.triangles.len()];
        let mut out = Vec::new();
        for z in lo[2]..=hi[2] {
            for y in lo[1]..=hi[1] {
                for x in lo[0]..=hi[0] {
                    let cell = (z * self.dims[1] + y) * self.dims[0] + x;
                    for &tri_index in &self.cells[cell] {
                        let i = tri_index as usize;
                        if seen[i] {
                            continue;
                        }
                        seen[i] = true;
                        let tri = &self.triangles[i];
                        if triangle_intersects_aabb(tri, query, tolerance) {
                            out.push(tri);
                        }
                    }
                }
            }
        }
        out
    }

    /// Query with the adaptive tolerance for `query`'s size class.
    pub fn query(&self, query: &BoundingBox) -> Vec<&Triangle> {
        self.triangles_overlapping(query, self.adaptive_tolerance(query))
    }
}
