pub mod grid_index;
pub mod intersect;

pub use grid_index::GridIndex;
pub use intersect::{segment_intersects_aabb, triangle_intersects_aabb};
