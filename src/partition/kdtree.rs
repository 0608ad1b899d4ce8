use crate::partition::PartitionContext;
use crate::types::geometry::BoundingBox;
use crate::types::tile::{TileCoord, TileDescriptor};

/// Kd-tree: binary split along the node's longest axis (ties break X, Y, Z)
/// until the node fits `tile_size` or `max_level` is reached.
///
/// Labels are allocated deterministically in preorder: a node at depth L
/// carries `x = 2 * parent.x + child_index`, with `y = z = 0`. Labels are
/// unique within a level.
pub fn descriptors(ctx: &PartitionContext<'_>, level: u32) -> Vec<TileDescriptor> {
    if ctx.model_bounds.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::new();
    collect(ctx, ctx.model_bounds, TileCoord::ROOT, level, &mut out);
    out
}

fn splits(ctx: &PartitionContext<'_>, bounds: &BoundingBox, level: u32) -> bool {
    bounds.longest_edge() > ctx.config.tile_size && level < ctx.config.max_level
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
            children_expected: if will_split { 2 } else { 0 },
        });
        return;
    }

    if !will_split {
        return;
    }

    let axis = bounds.longest_axis();
    let mid = bounds.center()[axis];

    let mut lo = bounds;
    lo.max[axis] = mid;
    let mut hi = bounds;
    hi.min[axis] = mid;

    for (child_index, half) in [lo, hi].into_iter().enumerate() {
        let child = TileCoord::new(coord.level + 1, coord.x * 2 + child_index as u32, 0, 0);
        collect(ctx, half, child, target_level, out);
    }
}
