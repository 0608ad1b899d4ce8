use crate::partition::PartitionContext;
use crate::types::geometry::BoundingBox;
use crate::types::tile::{TileCoord, TileDescriptor};

/// Number of cells per horizontal axis at `level`.
fn horizontal_cells(level: u32) -> u32 {
    1 << level
}

/// Number of vertical cells at `level`: half the horizontal count, floored
/// at one. Scenes are flatter than they are wide.
fn vertical_cells(level: u32) -> u32 {
    if level == 0 { 1 } else { 1 << (level - 1) }
}

/// Uniform grid: divide the model bounds at level L into `2^L` cells per
/// horizontal axis and `max(1, 2^(L-1))` vertically. Every cell is emitted;
/// ordering is x-fastest, then y, then z.
pub fn descriptors(ctx: &PartitionContext<'_>, level: u32) -> Vec<TileDescriptor> {
    let bounds = ctx.model_bounds;
    if bounds.is_empty() {
        return Vec::new();
    }

    let nx = horizontal_cells(level);
    let ny = horizontal_cells(level);
    let nz = vertical_cells(level);
    let size = bounds.size();
    let step = [
        size[0] / f64::from(nx),
        size[1] / f64::from(ny),
        size[2] / f64::from(nz),
    ];

    // Vertical cells only double from level 1 onward.
    let child_z_ratio = vertical_cells(level + 1) / nz;
    let children_expected = if level >= ctx.config.max_level {
        0
    } else {
        (4 * child_z_ratio) as u8
    };

    let mut out = Vec::with_capacity((nx * ny * nz) as usize);
    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                let cell = BoundingBox {
                    min: [
                        bounds.min[0] + f64::from(x) * step[0],
                        bounds.min[1] + f64::from(y) * step[1],
                        bounds.min[2] + f64::from(z) * step[2],
                    ],
                    max: [
                        bounds.min[0] + f64::from(x + 1) * step[0],
                        bounds.min[1] + f64::from(y + 1) * step[1],
                        bounds.min[2] + f64::from(z + 1) * step[2],
                    ],
                };
                let coord = TileCoord::new(level, x, y, z);
                out.push(TileDescriptor {
                    coord,
                    bounds: cell.clipped_to(&bounds),
                    parent: coord.parent(),
                    children_expected,
                });
            }
        }
    }
    out
}
