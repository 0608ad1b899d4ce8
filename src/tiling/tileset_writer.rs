use std::collections::{BTreeMap, BTreeSet};

use serde_json::json;
use tracing::info;

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::partition::geometric_error_for_level;
use crate::storage::BlobStore;
use crate::tiling::engine::unix_now;
use crate::types::geometry::BoundingBox;
use crate::types::task::SlicingTask;
use crate::types::tile::{IncrementalIndex, IndexedTile, TileCoord, TileRecord};

/// Emit `tileset.json` describing the produced tile hierarchy.
///
/// Children link by the coordinate-doubling rule: a tile at `(L, x, y, z)`
/// refines into the records found at `(L+1, 2x..2x+1, 2y..2y+1, 2z..2z+1)`.
/// Records no parent claims hang off the root, so every tile stays
/// reachable regardless of strategy labeling. The document replaces any
/// prior one atomically (the blob store's contract).
pub fn write_tileset(
    blob_store: &dyn BlobStore,
    task: &SlicingTask,
    records: &[TileRecord],
    cancel: &CancelToken,
) -> Result<()> {
    let document = build_tileset_json(task, records);
    let payload = serde_json::to_string_pretty(&document).expect("tileset serialization");

    blob_store.put(
        &task.output_prefix,
        "tileset.json",
        payload.as_bytes(),
        "application/json",
        cancel,
    )?;
    info!(task_id = task.id, tiles = records.len(), "wrote tileset.json");
    Ok(())
}

/// Emit `incremental_index.json` listing the tiles this run changed.
pub fn write_incremental_index(
    blob_store: &dyn BlobStore,
    task: &SlicingTask,
    changed: &[TileRecord],
    cancel: &CancelToken,
) -> Result<()> {
    let mut tiles: Vec<IndexedTile> = changed
        .iter()
        .map(|r| IndexedTile {
            coord: r.coord,
            path: r.relative_path.clone(),
            content_hash: r.content_hash.clone(),
            bounds: r.bounds,
        })
        .collect();
    tiles.sort_by_key(|t| t.coord);

    let index = IncrementalIndex {
        task_id: task.id,
        version: unix_now(),
        strategy: task.config.strategy,
        tile_size: task.config.tile_size,
        tiles,
    };

    let payload = serde_json::to_string_pretty(&index).expect("index serialization");
    blob_store.put(
        &task.output_prefix,
        "incremental_index.json",
        payload.as_bytes(),
        "application/json",
        cancel,
    )?;
    info!(
        task_id = task.id,
        changed = index.tiles.len(),
        "wrote incremental_index.json"
    );
    Ok(())
}

/// Build the tileset document. Deterministic: records are keyed and walked
/// in coordinate order, so the same record set serializes identically.
pub fn build_tileset_json(task: &SlicingTask, records: &[TileRecord]) -> serde_json::Value {
    let by_coord: BTreeMap<TileCoord, &TileRecord> =
        records.iter().map(|r| (r.coord, r)).collect();

    // A record is a root of the forest when no stored record claims it as a
    // child by the doubling rule.
    let claimed: BTreeSet<TileCoord> = by_coord
        .keys()
        .flat_map(|c| c.children().into_iter())
        .filter(|c| by_coord.contains_key(c))
        .collect();
    let roots: Vec<&TileRecord> = by_coord
        .values()
        .filter(|r| !claimed.contains(&r.coord))
        .copied()
        .collect();

    let root_error = geometric_error_for_level(&task.config, 0);

    let root_tile = if roots.len() == 1 && roots[0].coord.level == 0 {
        tile_json(task, roots[0], &by_coord)
    } else {
        // Synthetic root enclosing every produced tile.
        let mut union = BoundingBox::empty();
        for record in records {
            union = union.merge(&record.bounds);
        }
        if union.is_empty() {
            union = BoundingBox {
                min: [0.0; 3],
                max: [0.0; 3],
            };
        }
        let children: Vec<serde_json::Value> = roots
            .iter()
            .map(|r| tile_json(task, r, &by_coord))
            .collect();
        json!({
            "boundingVolume": { "box": bounding_volume_box(&union) },
            "geometricError": root_error,
            "refine": "REPLACE",
            "children": children,
        })
    };

    let mut root_tile = root_tile;
    if let Some(transform) = &task.origin_transform {
        root_tile["transform"] = json!(transform);
    }

    json!({
        "asset": {
            "version": "1.1",
            "generator": "mesh-tiler",
            "tilesetVersion": format!("task-{}", task.id),
        },
        "geometricError": root_error,
        "root": root_tile,
    })
}

fn tile_json(
    task: &SlicingTask,
    record: &TileRecord,
    by_coord: &BTreeMap<TileCoord, &TileRecord>,
) -> serde_json::Value {
    let mut tile = json!({
        "boundingVolume": { "box": bounding_volume_box(&record.bounds) },
        "geometricError": geometric_error_for_level(&task.config, record.coord.level),
        "refine": "REPLACE",
        "content": { "uri": record.relative_path },
    });

    let children: Vec<serde_json::Value> = record
        .coord
        .children()
        .into_iter()
        .filter_map(|c| by_coord.get(&c))
        .map(|child| tile_json(task, child, by_coord))
        .collect();
    if !children.is_empty() {
        tile["children"] = json!(children);
    }

    tile
}

/// Convert a bounding box to the 12-float `boundingVolume.box` layout:
/// center plus three axis-aligned half-axis vectors.
fn bounding_volume_box(bounds: &BoundingBox) -> [f64; 12] {
    let c = bounds.center();
    let he = bounds.half_extents();
    [
        c[0], c[1], c[2], // center
        he[0], 0.0, 0.0, // x half-axis
        0.0, he[1], 0.0, // y half-axis
        0.0, 0.0, he[2], // z half-axis
    ]
}
