pub mod geometry;
pub mod material;
pub mod mesh;
pub mod task;
pub mod tile;

pub use geometry::{BoundingBox, Triangle, Vector3};
pub use material::{Material, MaterialSet, TextureData};
pub use mesh::TileMesh;
pub use task::{ProgressReport, SlicingTask, Stage, TaskStatus};
pub use tile::{IncrementalIndex, IndexedTile, TileCoord, TileDescriptor, TileRecord};
