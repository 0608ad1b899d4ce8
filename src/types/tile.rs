use serde::{Deserialize, Serialize};

use crate::config::Strategy;
use crate::types::geometry::BoundingBox;

/// Address of a tile in the level hierarchy.
///
/// For grid and octree partitioning, `(x, y, z)` identify a cell in that
/// level's implicit grid. For kd-tree and adaptive, they are unique integer
/// labels allocated deterministically in preorder.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TileCoord {
    pub level: u32,
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl TileCoord {
    pub fn new(level: u32, x: u32, y: u32, z: u32) -> Self {
        Self { level, x, y, z }
    }

    pub const ROOT: TileCoord = TileCoord {
        level: 0,
        x: 0,
        y: 0,
        z: 0,
    };

    /// Relative blob path for this tile: `{level}/{x}_{y}_{z}.{ext}`.
    pub fn relative_path(&self, ext: &str) -> String {
        format!("{}/{}_{}_{}.{}", self.level, self.x, self.y, self.z, ext)
    }

    /// The eight coordinates a child of this tile may occupy at the next
    /// level, in preorder (x fastest, then y, then z).
    pub fn children(&self) -> [TileCoord; 8] {
        let mut out = [TileCoord::ROOT; 8];
        for (i, slot) in out.iter_mut().enumerate() {
            let i = i as u32;
            *slot = TileCoord {
                level: self.level + 1,
                x: self.x * 2 + (i & 1),
                y: self.y * 2 + ((i >> 1) & 1),
                z: self.z * 2 + (i >> 2),
            };
        }
        out
    }

    /// The coordinate this tile would refine from.
    pub fn parent(&self) -> Option<TileCoord> {
        if self.level == 0 {
            return None;
        }
        Some(TileCoord {
            level: self.level - 1,
            x: self.x / 2,
            y: self.y / 2,
            z: self.z / 2,
        })
    }
}

impl std::fmt::Display for TileCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}_{}_{}", self.level, self.x, self.y, self.z)
    }
}

/// One tile a partitioning strategy asks the engine to fill. Ephemeral; the
/// engine consumes a level's descriptors and drops them.
#[derive(Debug, Clone, PartialEq)]
pub struct TileDescriptor {
    pub coord: TileCoord,
    /// AABB in model space, clipped to the model bounds.
    pub bounds: BoundingBox,
    pub parent: Option<TileCoord>,
    /// How many children the strategy expects to emit under this tile.
    pub children_expected: u8,
}

/// Persisted record of one produced tile. Unique per `(task_id, coord)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileRecord {
    pub task_id: u64,
    pub coord: TileCoord,
    pub bounds: BoundingBox,
    pub relative_path: String,
    pub byte_size: u64,
    /// Lowercase hex sha256 over `(coord, bounds, payload)`.
    pub content_hash: String,
    /// Unix seconds.
    pub created_at: u64,
}

/// Entry of the incremental-update index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedTile {
    pub coord: TileCoord,
    pub path: String,
    pub content_hash: String,
    pub bounds: BoundingBox,
}

/// Document written as `incremental_index.json`, enabling re-slicing of
/// changed regions only on the next run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncrementalIndex {
    pub task_id: u64,
    /// Unix seconds at emission.
    pub version: u64,
    pub strategy: Strategy,
    pub tile_size: f64,
    pub tiles: Vec<IndexedTile>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_path_format() {
        let coord = TileCoord::new(2, 3, 1, 0);
        assert_eq!(coord.relative_path("b3dm"), "2/3_1_0.b3dm");
        assert_eq!(coord.relative_path("glb"), "2/3_1_0.glb");
    }

    #[test]
    fn children_cover_doubled_cells() {
        let coord = TileCoord::new(1, 1, 0, 1);
        let kids = coord.children();
        assert_eq!(kids[0], TileCoord::new(2, 2, 0, 2));
        assert_eq!(kids[1], TileCoord::new(2, 3, 0, 2));
        assert_eq!(kids[2], TileCoord::new(2, 2, 1, 2));
        assert_eq!(kids[7], TileCoord::new(2, 3, 1, 3));
        for kid in kids {
            assert_eq!(kid.parent(), Some(coord));
        }
    }

    #[test]
    fn root_has_no_parent() {
        assert_eq!(TileCoord::ROOT.parent(), None);
        assert_eq!(TileCoord::new(1, 0, 1, 0).parent(), Some(TileCoord::ROOT));
    }

    #[test]
    fn coord_ordering_is_level_major() {
        let mut coords = vec![
            TileCoord::new(1, 1, 0, 0),
            TileCoord::new(0, 0, 0, 0),
            TileCoord::new(1, 0, 0, 0),
        ];
        coords.sort();
        assert_eq!(coords[0].level, 0);
        assert_eq!(coords[1], TileCoord::new(1, 0, 0, 0));
    }

    #[test]
    fn record_serde_round_trip() {
        let record = TileRecord {
            task_id: 7,
            coord: TileCoord::new(1, 0, 1, 0),
            bounds: BoundingBox {
                min: [0.0; 3],
                max: [1.0; 3],
            },
            relative_path: "1/0_1_0.b3dm".into(),
            byte_size: 1024,
            content_hash: "ab".repeat(32),
            created_at: 1_700_000_000,
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: TileRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
