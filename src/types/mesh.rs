use std::collections::HashMap;

use crate::types::geometry::{Triangle, Vector3, v_sub};

/// Indexed geometry for one tile, ready for meshopt and the tile encoders.
///
/// All buffers are contiguous `Vec<f32>` / `Vec<u32>` for zero-copy interop
/// with meshoptimizer and glTF writers. Positions are tile-local: the world
/// origin they were recentered against travels separately.
#[derive(Debug, Clone, Default)]
pub struct TileMesh {
    /// Interleaved positions: [x, y, z, x, y, z, ...]
    pub positions: Vec<f32>,
    /// Interleaved normals: [nx, ny, nz, ...] or empty
    pub normals: Vec<f32>,
    /// Interleaved UVs: [u, v, u, v, ...] or empty
    pub uvs: Vec<f32>,
    /// Triangle indices into the vertex buffers
    pub indices: Vec<u32>,
    /// Index into the task's material list
    pub material_index: Option<usize>,
}

/// Quantized vertex key for deduplication (1µm precision), optionally
/// including normal and UV so attribute seams stay separate vertices.
#[derive(Hash, Eq, PartialEq)]
struct VertexKey {
    pos: [i64; 3],
    normal: Option<[i64; 3]>,
    uv: Option<[i64; 2]>,
}

fn quantize3(v: Vector3) -> [i64; 3] {
    [
        (v[0] * 1e6).round() as i64,
        (v[1] * 1e6).round() as i64,
        (v[2] * 1e6).round() as i64,
    ]
}

impl TileMesh {
    /// Number of vertices (positions / 3).
    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    /// Number of triangles (indices / 3).
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn has_normals(&self) -> bool {
        !self.normals.is_empty()
    }

    pub fn has_uvs(&self) -> bool {
        !self.uvs.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Build an indexed mesh from a triangle soup, recentered against
    /// `origin` (subtracted in f64 before the f32 cast, so coordinates keep
    /// their precision near the tile center).
    ///
    /// Vertices deduplicate on quantized position plus, when the preserve
    /// flags are set, normal and UV. Normals/UVs are carried only when every
    /// input triangle has them; a mixed soup drops the attribute.
    pub fn from_triangles(
        triangles: &[Triangle],
        origin: Vector3,
        preserve_normals: bool,
        preserve_uvs: bool,
    ) -> TileMesh {
        let carry_normals = preserve_normals && triangles.iter().all(|t| t.normals.is_some());
        let carry_uvs = preserve_uvs && triangles.iter().all(|t| t.uvs.is_some());

        let mut mesh = TileMesh::default();
        let mut lookup: HashMap<VertexKey, u32> = HashMap::new();

        for tri in triangles {
            for corner in 0..3 {
                let local = v_sub(tri.vertices[corner], origin);
                let normal = if carry_normals {
                    tri.normals.map(|ns| ns[corner])
                } else {
                    None
                };
                let uv = if carry_uvs {
                    tri.uvs.map(|uvs| uvs[corner])
                } else {
                    None
                };

                let key = VertexKey {
                    pos: quantize3(local),
                    normal: normal.map(quantize3),
                    uv: uv.map(|uv| [(uv[0] * 1e6).round() as i64, (uv[1] * 1e6).round() as i64]),
                };

                let index = *lookup.entry(key).or_insert_with(|| {
                    let next = mesh.vertex_count() as u32;
                    mesh.positions
                        .extend_from_slice(&[local[0] as f32, local[1] as f32, local[2] as f32]);
                    if let Some(n) = normal {
                        mesh.normals
                            .extend_from_slice(&[n[0] as f32, n[1] as f32, n[2] as f32]);
                    }
                    if let Some(uv) = uv {
                        mesh.uvs.extend_from_slice(&[uv[0] as f32, uv[1] as f32]);
                    }
                    next
                });
                mesh.indices.push(index);
            }
        }

        // Majority material wins; tiles encode one primitive.
        mesh.material_index = majority_material(triangles);
        mesh
    }

    /// Convert back to a triangle soup in world space (adds `origin` back).
    pub fn to_triangles(&self, origin: Vector3) -> Vec<Triangle> {
        let mut out = Vec::with_capacity(self.triangle_count());
        for tri in self.indices.chunks_exact(3) {
            let vertex = |i: u32| -> Vector3 {
                let i = i as usize;
                [
                    self.positions[i * 3] as f64 + origin[0],
                    self.positions[i * 3 + 1] as f64 + origin[1],
                    self.positions[i * 3 + 2] as f64 + origin[2],
                ]
            };
            let normal = |i: u32| -> Vector3 {
                let i = i as usize;
                [
                    self.normals[i * 3] as f64,
                    self.normals[i * 3 + 1] as f64,
                    self.normals[i * 3 + 2] as f64,
                ]
            };
            let uv = |i: u32| -> [f64; 2] {
                let i = i as usize;
                [self.uvs[i * 2] as f64, self.uvs[i * 2 + 1] as f64]
            };

            let normals = self
                .has_normals()
                .then(|| [normal(tri[0]), normal(tri[1]), normal(tri[2])]);
            let uvs = self
                .has_uvs()
                .then(|| [uv(tri[0]), uv(tri[1]), uv(tri[2])]);

            // Decimation can emit slivers below the ingest epsilon; those are
            // dropped rather than re-validated upstream.
            if let Ok(t) = Triangle::new(
                [vertex(tri[0]), vertex(tri[1]), vertex(tri[2])],
                normals,
                uvs,
                self.material_index,
            ) {
                out.push(t);
            }
        }
        out
    }
}

/// Most frequent material index across the soup, if any triangle has one.
fn majority_material(triangles: &[Triangle]) -> Option<usize> {
    let mut counts: HashMap<usize, usize> = HashMap::new();
    for tri in triangles {
        if let Some(m) = tri.material_index {
            *counts.entry(m).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .max_by_key(|&(m, count)| (count, std::cmp::Reverse(m)))
        .map(|(m, _)| m)
}
