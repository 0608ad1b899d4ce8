use crate::partition::PartitionContext;
use crate::types::geometry::BoundingBox;
use crate::types::tile::{TileCoord, TileDescriptor};

/// Child bounding box for octant `i` (bit pattern `z | y | x`), offsets
/// `(i mod 2, (i / 2) mod 2, i / 4)` times half the parent size.
pub(crate) fn child_bounds(parent: &BoundingBox, octant: usize) -> BoundingBox {
    let c = parent.center();
    let min_x = if octant & 1 != 0 { c[0] } else { parent.min[0] };
    let max_x = if octant & 1 != 0 { parent.max[0] } else { c[0] };
    let min_y = if octant & 2 != 0 { c[1] } else { parent.min[1] };
    let max_y = if octant & 2 != 0 { parent.max[1] } else { c[1] };
    let min_z = if octant & 4 != 0 { c[2] } else { parent.min[2] };
    let max_z = if octant & 4 != 0 { parent.max[2] } else { c[2] };

    BoundingBox {
        min: [min_x, min_y, min_z],
        max: [max_x, max_y, max_z],
    }
}

/// Whether a node of this size at this level splits further.
fn splits(ctx: &PartitionContext<'_>, bounds: &BoundingBox, level: u32) -> bool {
    bounds.longest_edge() > ctx.config.tile_size && level < ctx.config.max_level
}

/// Octree: the root covers the model bounds; a node splits into 8 children
/// iff its size exceeds `tile_size` and its level is below `max_level`.
/// Nodes are emitted in preorder.
pub fn descriptors(ctx: &PartitionContext<'_>, level: u32) -> Vec<TileDescriptor> {
    if ctx.model_bounds.is_empty() {
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
    let will_split = splits(ctx, &bounds, coord.level);

    if coord.level == target_level {
        out.push(TileDescriptor {
            coord,
            bounds,
            parent: coord.parent(),
            children_expected: if will_split { 8 } else { 0 },
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
