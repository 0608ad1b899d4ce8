use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TilerError};
use crate::types::geometry::{BoundingBox, Triangle, Vector3, v_add, v_normalize, v_scale, v_sub};

/// PNTS header length: magic, version, and five chunk-length fields.
pub const HEADER_LEN: usize = 28;

/// How points are selected from the tile's triangles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointSelection {
    /// Deduplicated mesh vertices only.
    VerticesOnly,
    /// Area-proportional barycentric surface samples.
    UniformSurface,
    /// Twice the uniform sampling rate.
    DenseSurface,
}

/// Samples per triangle for uniform surface sampling.
const UNIFORM_SAMPLES_PER_TRIANGLE: usize = 4;

struct PointSet {
    positions: Vec<Vector3>,
    normals: Option<Vec<Vector3>>,
}

/// Encode the tile's triangles as a Point Cloud tile.
///
/// Positions recenter against the tile center (`RTC_CENTER`); colors follow
/// a blue-to-green-to-red height gradient over the tile's z range; normals
/// interpolate barycentrically and renormalize when the source mesh carried
/// them. `seed` keeps surface sampling bit-stable per tile.
pub fn write_pnts(
    triangles: &[Triangle],
    bounds: &BoundingBox,
    selection: PointSelection,
    seed: u64,
) -> Result<Vec<u8>> {
    if triangles.is_empty() {
        return Err(TilerError::Encode("no triangles for point tile".into()));
    }

    let center = bounds.center();
    let points = match selection {
        PointSelection::VerticesOnly => dedup_vertices(triangles),
        PointSelection::UniformSurface => {
            sample_surface(triangles, UNIFORM_SAMPLES_PER_TRIANGLE, seed)
        }
        PointSelection::DenseSurface => {
            sample_surface(triangles, UNIFORM_SAMPLES_PER_TRIANGLE * 2, seed)
        }
    };
    if points.positions.is_empty() {
        return Err(TilerError::Encode("point selection produced nothing".into()));
    }

    let count = points.positions.len();

    // Feature table binary: positions, then RGB, then optional normals.
    let mut body: Vec<u8> = Vec::with_capacity(count * (12 + 3 + 12));
    for p in &points.positions {
        let local = v_sub(*p, center);
        for c in local {
            body.extend_from_slice(&(c as f32).to_le_bytes());
        }
    }
    let rgb_offset = body.len();
    let (z_min, z_max) = (bounds.min[2], bounds.max[2]);
    for p in &points.positions {
        let [r, g, b] = height_gradient(p[2], z_min, z_max);
        body.push(r);
        body.push(g);
        body.push(b);
    }
    let normal_offset = points.normals.as_ref().map(|normals| {
        // Normals start float-aligned
        while body.len() % 4 != 0 {
            body.push(0);
        }
        let offset = body.len();
        for n in normals {
            for c in n {
                body.extend_from_slice(&(*c as f32).to_le_bytes());
            }
        }
        offset
    });

    let mut feature_json = serde_json::json!({
        "POINTS_LENGTH": count,
        "POSITION": { "byteOffset": 0 },
        "RGB": { "byteOffset": rgb_offset },
    });
    if let Some(offset) = normal_offset {
        feature_json["NORMAL"] = serde_json::json!({ "byteOffset": offset });
    }
    if center != [0.0; 3] {
        feature_json["RTC_CENTER"] = serde_json::json!(center);
    }

    let mut feature_json_bytes = feature_json.to_string().into_bytes();
    while (HEADER_LEN + feature_json_bytes.len()) % 4 != 0 {
        feature_json_bytes.push(b' ');
    }
    let mut feature_bin = body;
    while (HEADER_LEN + feature_json_bytes.len() + feature_bin.len()) % 8 != 0 {
        feature_bin.push(0);
    }

    let byte_length = HEADER_LEN + feature_json_bytes.len() + feature_bin.len();
    let mut out = Vec::with_capacity(byte_length);
    out.extend_from_slice(b"pnts");
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&(byte_length as u32).to_le_bytes());
    out.extend_from_slice(&(feature_json_bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&(feature_bin.len() as u32).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // batch table JSON
    out.extend_from_slice(&0u32.to_le_bytes()); // batch table binary
    out.extend_from_slice(&feature_json_bytes);
    out.extend_from_slice(&feature_bin);
    Ok(out)
}

/// Unique vertex positions (1µm quantization), with per-vertex normals when
/// every triangle carries them.
fn dedup_vertices(triangles: &[Triangle]) -> PointSet {
    let carry_normals = triangles.iter().all(|t| t.normals.is_some());
    let mut seen: HashSet<[i64; 3]> = HashSet::new();
    let mut positions = Vec::new();
    let mut normals = carry_normals.then(Vec::new);

    for tri in triangles {
        for corner in 0..3 {
            let p = tri.vertices[corner];
            let key = [
                (p[0] * 1e6).round() as i64,
                (p[1] * 1e6).round() as i64,
                (p[2] * 1e6).round() as i64,
            ];
            if !seen.insert(key) {
                continue;
            }
            positions.push(p);
            if let (Some(ns), Some(tri_normals)) = (normals.as_mut(), tri.normals.as_ref()) {
                ns.push(tri_normals[corner]);
            }
        }
    }

    PointSet { positions, normals }
}

/// Barycentric surface sampling, `per_triangle` points each. Samples with
/// `r1 + r2 > 1` reflect back into the triangle.
fn sample_surface(triangles: &[Triangle], per_triangle: usize, seed: u64) -> PointSet {
    let carry_normals = triangles.iter().all(|t| t.normals.is_some());
    let mut rng = StdRng::seed_from_u64(seed);
    let mut positions = Vec::with_capacity(triangles.len() * per_triangle);
    let mut normals = carry_normals.then(|| Vec::with_capacity(triangles.len() * per_triangle));

    for tri in triangles {
        let [a, b, c] = tri.vertices;
        for _ in 0..per_triangle {
            let mut r1: f64 = rng.r#gen();
            let mut r2: f64 = rng.r#gen();
            if r1 + r2 > 1.0 {
                r1 = 1.0 - r1;
                r2 = 1.0 - r2;
            }
            let p = v_add(
                a,
                v_add(v_scale(v_sub(b, a), r1), v_scale(v_sub(c, a), r2)),
            );
            positions.push(p);

            if let (Some(out), Some([na, nb, nc])) = (normals.as_mut(), tri.normals.as_ref()) {
                let n = v_add(
                    v_scale(*na, 1.0 - r1 - r2),
                    v_add(v_scale(*nb, r1), v_scale(*nc, r2)),
                );
                out.push(v_normalize(n));
            }
        }
    }

    PointSet { positions, normals }
}

/// Blue -> green -> red gradient over the normalized height.
fn height_gradient(z: f64, z_min: f64, z_max: f64) -> [u8; 3] {
    let range = z_max - z_min;
    let t = if range > f64::EPSILON {
        ((z - z_min) / range).clamp(0.0, 1.0)
    } else {
        0.5
    };

    let (r, g, b) = if t < 0.5 {
        let s = t * 2.0;
        (0.0, s, 1.0 - s)
    } else {
        let s = (t - 0.5) * 2.0;
        (s, 1.0 - s, 0.0)
    };
    [
        (r * 255.0).round() as u8,
        (g * 255.0).round() as u8,
        (b * 255.0).round() as u8,
    ]
}

/// Parsed PNTS feature table, for validation and tests.
pub fn parse_feature_table(bytes: &[u8]) -> Option<(serde_json::Value, &[u8])> {
    if bytes.len() < HEADER_LEN || &bytes[0..4] != b"pnts" {
        return None;
    }
    let u32_at =
        |off: usize| u32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]]);
    if u32_at(4) != 1 || u32_at(8) as usize != bytes.len() {
        return None;
    }
    let json_len = u32_at(12) as usize;
    let bin_len = u32_at(16) as usize;
    let json_bytes = bytes.get(HEADER_LEN..HEADER_LEN + json_len)?;
    let bin = bytes.get(HEADER_LEN + json_len..HEADER_LEN + json_len + bin_len)?;
    let json =
        serde_json::from_str(std::str::from_utf8(json_bytes).ok()?.trim_end()).ok()?;
    Some((json, bin))
}
