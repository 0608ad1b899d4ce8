pub mod adaptive;
pub mod grid;
pub mod kdtree;
pub mod octree;

use crate::config::{SlicingConfig, Strategy};
use crate::spatial::GridIndex;
use crate::types::geometry::BoundingBox;
use crate::types::tile::TileDescriptor;

/// Shared inputs for strategy evaluation. The adaptive strategy reads the
/// engine's spatial index directly -- density analysis always runs on the
/// already-loaded mesh, never on a re-load.
pub struct PartitionContext<'a> {
    pub model_bounds: BoundingBox,
    pub config: &'a SlicingConfig,
    pub index: &'a GridIndex,
}

/// Ordered descriptors for one level, dispatched by the configured strategy.
///
/// Strategies are pure functions of the context: same mesh and config yield
/// byte-identical descriptor lists.
pub fn descriptors_for_level(ctx: &PartitionContext<'_>, level: u32) -> Vec<TileDescriptor> {
    match ctx.config.strategy {
        Strategy::Grid => grid::descriptors(ctx, level),
        Strategy::Octree => octree::descriptors(ctx, level),
        Strategy::KdTree => kdtree::descriptors(ctx, level),
        Strategy::Adaptive => adaptive::descriptors(ctx, level),
    }
}

/// Geometric error for a tile at `level`:
/// `geometric_error_threshold * 2^(max_level - level)`.
pub fn geometric_error_for_level(config: &SlicingConfig, level: u32) -> f64 {
    let exponent = config.max_level.saturating_sub(level);
    config.geometric_error_threshold * f64::from(1u32 << exponent.min(31))
}
