use meshopt::{self, SimplifyOptions, VertexDataAdapter};

use crate::types::geometry::Triangle;
use crate::types::mesh::TileMesh;

/// Decimate a triangle soup to roughly `target_ratio` of its index count.
///
/// Steps: dedup vertices (position plus preserved attributes as key),
/// rebuild indices in dedup space, optimize vertex cache / overdraw / fetch
/// order, then edge-collapse simplify. When normals or UVs are preserved
/// they join the simplifier's error metric with weight 0.5 per component.
///
/// The result never exceeds the input index count; it may exceed the target
/// when the error budget would be violated. Borders are locked so adjacent
/// tiles keep crack-free seams.
pub fn simplify(
    triangles: &[Triangle],
    target_ratio: f64,
    target_error: f32,
    preserve_normals: bool,
    preserve_uvs: bool,
) -> Vec<Triangle> {
    if triangles.is_empty() {
        return Vec::new();
    }
    let target_ratio = target_ratio.clamp(0.0, 1.0);

    // Recenter on the soup's box center so f32 buffers keep precision.
    let origin = crate::types::geometry::BoundingBox::of_triangles(triangles).center();
    let mesh = TileMesh::from_triangles(triangles, origin, preserve_normals, preserve_uvs);
    if mesh.is_empty() {
        return Vec::new();
    }

    let vertex_count = mesh.vertex_count();
    let positions_bytes = meshopt::typed_to_bytes(&mesh.positions);
    let adapter = VertexDataAdapter::new(positions_bytes, 12, 0)
        .expect("positions buffer should be valid for VertexDataAdapter");

    // GPU-friendly ordering before the collapse pass.
    let mut indices = meshopt::optimize_vertex_cache(&mesh.indices, vertex_count);
    meshopt::optimize_overdraw_in_place(&mut indices, &adapter, 1.05);
    let fetch_remap = meshopt::optimize_vertex_fetch_remap(&indices, vertex_count);
    let mesh = apply_vertex_remap(&mesh, &fetch_remap);
    let mut indices: Vec<u32> = indices.iter().map(|&i| fetch_remap[i as usize]).collect();

    let positions_bytes = meshopt::typed_to_bytes(&mesh.positions);
    let adapter = VertexDataAdapter::new(positions_bytes, 12, 0)
        .expect("positions buffer should be valid for VertexDataAdapter");

    let target_count = ((indices.len() as f64 * target_ratio) as usize / 3) * 3;

    let (attributes, weights) = attribute_buffers(&mesh, preserve_normals, preserve_uvs);

    let mut result_error = 0.0f32;
    let simplified = if weights.is_empty() {
        meshopt::simplify(
            &indices,
            &adapter,
            target_count,
            target_error,
            SimplifyOptions::LockBorder,
            Some(&mut result_error),
        )
    } else {
        let attribute_stride = weights.len() * std::mem::size_of::<f32>();
        let vertex_lock = vec![false; vertex_count];
        meshopt::simplify_with_attributes_and_locks(
            &indices,
            &adapter,
            &attributes,
            &weights,
            attribute_stride,
            &vertex_lock,
            target_count,
            target_error,
            SimplifyOptions::LockBorder,
            Some(&mut result_error),
        )
    };

    // The collapse pass can only shrink the index buffer; keep the original
    // ordering when it somehow produced nothing useful.
    if !simplified.is_empty() && simplified.len() <= indices.len() {
        indices = simplified;
    }

    let compacted = compact(&mesh, indices);
    compacted.to_triangles(origin)
}

/// Interleaved attribute buffer and per-component weights for the
/// simplifier's error metric.
fn attribute_buffers(
    mesh: &TileMesh,
    preserve_normals: bool,
    preserve_uvs: bool,
) -> (Vec<f32>, Vec<f32>) {
    let use_normals = preserve_normals && mesh.has_normals();
    let use_uvs = preserve_uvs && mesh.has_uvs();
    let mut weights = Vec::new();
    if use_normals {
        weights.extend_from_slice(&[0.5, 0.5, 0.5]);
    }
    if use_uvs {
        weights.extend_from_slice(&[0.5, 0.5]);
    }
    if weights.is_empty() {
        return (Vec::new(), Vec::new());
    }

    let stride = weights.len();
    let mut attributes = Vec::with_capacity(mesh.vertex_count() * stride);
    for v in 0..mesh.vertex_count() {
        if use_normals {
            attributes.extend_from_slice(&mesh.normals[v * 3..v * 3 + 3]);
        }
        if use_uvs {
            attributes.extend_from_slice(&mesh.uvs[v * 2..v * 2 + 2]);
        }
    }
    (attributes, weights)
}

/// Reorder vertex buffers by a meshopt remap table (old index -> new index).
fn apply_vertex_remap(mesh: &TileMesh, remap: &[u32]) -> TileMesh {
    let vertex_count = mesh.vertex_count();
    let mut out = TileMesh {
        positions: vec![0.0; vertex_count * 3],
        normals: if mesh.has_normals() {
            vec![0.0; vertex_count * 3]
        } else {
            vec![]
        },
        uvs: if mesh.has_uvs() {
            vec![0.0; vertex_count * 2]
        } else {
            vec![]
        },
        indices: Vec::new(),
        material_index: mesh.material_index,
    };

    for (old, &new) in remap.iter().enumerate() {
        if new == u32::MAX {
            continue;
        }
        let ni = new as usize;
        out.positions[ni * 3..ni * 3 + 3].copy_from_slice(&mesh.positions[old * 3..old * 3 + 3]);
        if mesh.has_normals() {
            out.normals[ni * 3..ni * 3 + 3].copy_from_slice(&mesh.normals[old * 3..old * 3 + 3]);
        }
        if mesh.has_uvs() {
            out.uvs[ni * 2..ni * 2 + 2].copy_from_slice(&mesh.uvs[old * 2..old * 2 + 2]);
        }
    }
    out
}

/// Remap indices to remove unreferenced vertices and rebuild attribute
/// arrays with only the referenced ones.
pub fn compact(source: &TileMesh, indices: Vec<u32>) -> TileMesh {
    if indices.is_empty() {
        return TileMesh {
            material_index: source.material_index,
            ..Default::default()
        };
    }

    let vertex_count = source.vertex_count();

    let mut remap = vec![u32::MAX; vertex_count];
    let mut next_vertex: u32 = 0;
    for &idx in &indices {
        let i = idx as usize;
        if remap[i] == u32::MAX {
            remap[i] = next_vertex;
            next_vertex += 1;
        }
    }
    let new_vertex_count = next_vertex as usize;

    let new_indices: Vec<u32> = indices.iter().map(|&i| remap[i as usize]).collect();

    let mut new_positions = vec![0.0f32; new_vertex_count * 3];
    let mut new_normals = if source.has_normals() {
        vec![0.0f32; new_vertex_count * 3]
    } else {
        vec![]
    };
    let mut new_uvs = if source.has_uvs() {
        vec![0.0f32; new_vertex_count * 2]
    } else {
        vec![]
    };

    for (old_idx, &new_idx) in remap.iter().enumerate() {
        if new_idx == u32::MAX {
            continue;
        }
        let ni = new_idx as usize;

        new_positions[ni * 3..ni * 3 + 3]
            .copy_from_slice(&source.positions[old_idx * 3..old_idx * 3 + 3]);
        if source.has_normals() {
            new_normals[ni * 3..ni * 3 + 3]
                .copy_from_slice(&source.normals[old_idx * 3..old_idx * 3 + 3]);
        }
        if source.has_uvs() {
            new_uvs[ni * 2..ni * 2 + 2]
                .copy_from_slice(&source.uvs[old_idx * 2..old_idx * 2 + 2]);
        }
    }

    TileMesh {
        positions: new_positions,
        normals: new_normals,
        uvs: new_uvs,
        indices: new_indices,
        material_index: source.material_index,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::geometry::Triangle;

    /// Flat grid of `n x n` quads with normals and UVs.
    fn make_grid(n: usize) -> Vec<Triangle> {
        let mut out = Vec::new();
        let step = 1.0 / n as f64;
        for y in 0..n {
            for x in 0..n {
                let x0 = x as f64 * step;
                let y0 = y as f64 * step;
                let corners = [
                    [x0, y0, 0.0],
                    [x0 + step, y0, 0.0],
                    [x0 + step, y0 + step, 0.0],
                    [x0, y0 + step, 0.0],
                ];
                let normal = [0.0, 0.0, 1.0];
                let uv = |p: [f64; 3]| [p[0], p[1]];
                for tri in [[0, 1, 2], [0, 2, 3]] {
                    let vs = [corners[tri[0]], corners[tri[1]], corners[tri[2]]];
                    out.push(
                        Triangle::new(
                            vs,
                            Some([normal; 3]),
                            Some([uv(vs[0]), uv(vs[1]), uv(vs[2])]),
                            None,
                        )
                        .unwrap(),
                    );
                }
            }
        }
        out
    }

    #[test]
    fn reduces_triangle_count() {
        let tris = make_grid(50); // 5000 triangles
        let result = simplify(&tris, 0.5, 0.01, true, true);
        assert!(!result.is_empty());
        assert!(result.len() < tris.len());
    }

    #[test]
    fn never_exceeds_original_count() {
        let tris = make_grid(20);
        for ratio in [0.0, 0.1, 0.5, 0.9, 1.0] {
            let result = simplify(&tris, ratio, 0.01, true, true);
            assert!(
                result.len() <= tris.len(),
                "ratio {ratio} grew the mesh: {} > {}",
                result.len(),
                tris.len()
            );
        }
    }

    #[test]
    fn empty_input_returns_empty() {
        assert!(simplify(&[], 0.5, 0.01, true, true).is_empty());
    }

    #[test]
    fn ratio_clamped() {
        let tris = make_grid(10);
        // Out-of-range ratios behave as their clamped values
        let high = simplify(&tris, 2.0, 0.01, true, true);
        assert!(high.len() <= tris.len());
        let low = simplify(&tris, -1.0, 0.01, true, true);
        assert!(low.len() <= tris.len());
    }

    #[test]
    fn preserves_attributes_through_decimation() {
        let tris = make_grid(30);
        let result = simplify(&tris, 0.25, 0.05, true, true);
        assert!(!result.is_empty());
        for tri in &result {
            assert!(tri.normals.is_some(), "normals must survive");
            assert!(tri.uvs.is_some(), "UVs must survive");
        }
    }

    #[test]
    fn drops_attributes_when_not_preserved() {
        let tris = make_grid(10);
        let result = simplify(&tris, 0.5, 0.01, false, false);
        assert!(!result.is_empty());
        for tri in &result {
            assert!(tri.normals.is_none());
            assert!(tri.uvs.is_none());
        }
    }

    #[test]
    fn aggressive_ratio_still_valid() {
        let tris = make_grid(40);
        let result = simplify(&tris, 0.01, 0.05, true, true);
        assert!(result.len() < tris.len());
        for tri in &result {
            assert!(tri.area() > 0.0);
        }
    }

    #[test]
    fn compact_removes_unreferenced() {
        let source = TileMesh {
            positions: vec![
                0.0, 0.0, 0.0, //
                1.0, 0.0, 0.0, //
                0.0, 1.0, 0.0, //
                9.0, 9.0, 9.0, // unreferenced
            ],
            normals: vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
            uvs: vec![],
            indices: vec![0, 1, 2],
            material_index: Some(0),
        };

        let compacted = compact(&source, vec![0, 1, 2]);
        assert_eq!(compacted.vertex_count(), 3);
        assert_eq!(compacted.triangle_count(), 1);
        assert!(compacted.has_normals());
        assert_eq!(compacted.material_index, Some(0));
    }

    #[test]
    fn compact_empty_indices() {
        let source = TileMesh {
            positions: vec![0.0; 9],
            material_index: Some(3),
            ..Default::default()
        };
        let compacted = compact(&source, vec![]);
        assert!(compacted.is_empty());
        assert_eq!(compacted.material_index, Some(3));
    }
}
