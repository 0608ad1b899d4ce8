use std::path::Path;

use tracing::debug;

use crate::error::{Result, TilerError};
use crate::types::mesh::TileMesh;

/// Load an STL file (binary or ASCII, detected by content) into a
/// `TileMesh`. The facet normal is assigned to all three corners; a zero
/// facet normal is recomputed from the winding order.
pub fn load_stl(path: &Path) -> Result<TileMesh> {
    let data = std::fs::read(path)
        .map_err(|e| TilerError::SourceUnavailable(format!("failed to read STL: {e}")))?;

    if is_binary(&data) {
        parse_binary(&data)
    } else {
        parse_ascii(&data)
    }
}

/// Binary STL: 80-byte header, u32 triangle count, 50 bytes per triangle.
/// ASCII files start with "solid" but so do some binary headers, so the
/// length arithmetic decides.
fn is_binary(data: &[u8]) -> bool {
    if data.len() < 84 {
        return false;
    }
    let count = u32::from_le_bytes([data[80], data[81], data[82], data[83]]) as usize;
    data.len() == 84 + count * 50
}

fn parse_binary(data: &[u8]) -> Result<TileMesh> {
    let count = u32::from_le_bytes([data[80], data[81], data[82], data[83]]) as usize;
    debug!(triangles = count, "Parsing binary STL");

    let mut mesh = TileMesh {
        positions: Vec::with_capacity(count * 9),
        normals: Vec::with_capacity(count * 9),
        indices: Vec::with_capacity(count * 3),
        ..Default::default()
    };

    let f32_at = |off: usize| {
        f32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
    };

    for i in 0..count {
        let base = 84 + i * 50;
        let normal = [f32_at(base), f32_at(base + 4), f32_at(base + 8)];
        let mut corners = [[0.0f32; 3]; 3];
        for (c, corner) in corners.iter_mut().enumerate() {
            let off = base + 12 + c * 12;
            *corner = [f32_at(off), f32_at(off + 4), f32_at(off + 8)];
        }
        push_facet(&mut mesh, corners, normal);
    }

    Ok(mesh)
}

fn parse_ascii(data: &[u8]) -> Result<TileMesh> {
    let text = std::str::from_utf8(data)
        .map_err(|_| TilerError::SourceUnavailable("STL is neither binary nor ASCII".into()))?;
    if !text.trim_start().starts_with("solid") {
        return Err(TilerError::SourceUnavailable(
            "STL missing 'solid' header".into(),
        ));
    }

    let mut mesh = TileMesh::default();
    let mut normal = [0.0f32; 3];
    let mut corners: Vec<[f32; 3]> = Vec::with_capacity(3);

    for line in text.lines() {
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("facet") => {
                // "facet normal nx ny nz"
                let _ = tokens.next();
                normal = parse_triplet(&mut tokens)?;
                corners.clear();
            }
            Some("vertex") => {
                corners.push(parse_triplet(&mut tokens)?);
            }
            Some("endfacet") => {
                if corners.len() != 3 {
                    return Err(TilerError::SourceUnavailable(format!(
                        "STL facet has {} vertices",
                        corners.len()
                    )));
                }
                push_facet(&mut mesh, [corners[0], corners[1], corners[2]], normal);
            }
            _ => {}
        }
    }

    debug!(triangles = mesh.triangle_count(), "Parsed ASCII STL");
    Ok(mesh)
}

fn parse_triplet<'a>(tokens: &mut impl Iterator<Item = &'a str>) -> Result<[f32; 3]> {
    let mut out = [0.0f32; 3];
    for slot in &mut out {
        *slot = tokens
            .next()
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| TilerError::SourceUnavailable("malformed STL number".into()))?;
    }
    Ok(out)
}

fn push_facet(mesh: &mut TileMesh, corners: [[f32; 3]; 3], facet_normal: [f32; 3]) {
    let normal = if facet_normal.iter().any(|&c| c.abs() > 1e-12) {
        facet_normal
    } else {
        winding_normal(&corners)
    };

    let base = mesh.vertex_count() as u32;
    for corner in corners {
        mesh.positions.extend_from_slice(&corner);
        mesh.normals.extend_from_slice(&normal);
    }
    mesh.indices.extend_from_slice(&[base, base + 1, base + 2]);
}

fn winding_normal(corners: &[[f32; 3]; 3]) -> [f32; 3] {
    let e1 = [
        corners[1][0] - corners[0][0],
        corners[1][1] - corners[0][1],
        corners[1][2] - corners[0][2],
    ];
    let e2 = [
        corners[2][0] - corners[0][0],
        corners[2][1] - corners[0][1],
        corners[2][2] - corners[0][2],
    ];
    let n = [
        e1[1] * e2[2] - e1[2] * e2[1],
        e1[2] * e2[0] - e1[0] * e2[2],
        e1[0] * e2[1] - e1[1] * e2[0],
    ];
    let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
    if len > 1e-12 {
        [n[0] / len, n[1] / len, n[2] / len]
    } else {
        n
    }
}
