use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use ply_rs::parser::Parser;
use ply_rs::ply::{DefaultElement, Property};
use tracing::debug;

use crate::error::{Result, TilerError};
use crate::types::mesh::TileMesh;

/// Load a PLY file into a `TileMesh`.
pub fn load_ply(path: &Path) -> Result<TileMesh> {
    let file = File::open(path)
        .map_err(|e| TilerError::SourceUnavailable(format!("failed to open PLY: {e}")))?;
    let mut reader = BufReader::new(file);

    let parser = Parser::<DefaultElement>::new();
    let ply = parser
        .read_ply(&mut reader)
        .map_err(|e| TilerError::SourceUnavailable(format!("failed to parse PLY: {e}")))?;

    let vertices = ply
        .payload
        .get("vertex")
        .ok_or_else(|| TilerError::SourceUnavailable("PLY file missing 'vertex' element".into()))?;

    debug!(vertex_count = vertices.len(), "Parsing PLY vertices");

    let mut positions = Vec::with_capacity(vertices.len() * 3);
    let mut normals = Vec::new();

    let has_normals = vertices
        .first()
        .map(|v| v.contains_key("nx"))
        .unwrap_or(false);
    if has_normals {
        normals.reserve(vertices.len() * 3);
    }

    for vertex in vertices {
        positions.push(get_float_property(vertex, "x")?);
        positions.push(get_float_property(vertex, "y")?);
        positions.push(get_float_property(vertex, "z")?);

        if has_normals {
            normals.push(get_float_property(vertex, "nx")?);
            normals.push(get_float_property(vertex, "ny")?);
            normals.push(get_float_property(vertex, "nz")?);
        }
    }

    // Parse faces, fan-triangulating polygons
    let mut indices = Vec::new();
    if let Some(faces) = ply.payload.get("face") {
        debug!(face_count = faces.len(), "Parsing PLY faces");
        for face in faces {
            let face_indices = get_index_list(face)?;
            if face_indices.len() >= 3 {
                for i in 1..face_indices.len() - 1 {
                    indices.push(face_indices[0]);
                    indices.push(face_indices[i]);
                    indices.push(face_indices[i + 1]);
                }
            }
        }
    }

    Ok(TileMesh {
        positions,
        normals,
        uvs: Vec::new(), // PLY typically lacks UVs
        indices,
        material_index: None,
    })
}

/// Extract a float property, handling Float/Double/Int/Short types.
fn get_float_property(element: &DefaultElement, key: &str) -> Result<f32> {
    let prop = element.get(key).ok_or_else(|| {
        TilerError::SourceUnavailable(format!("PLY vertex missing property '{key}'"))
    })?;

    match prop {
        Property::Float(v) => Ok(*v),
        Property::Double(v) => Ok(*v as f32),
        Property::Int(v) => Ok(*v as f32),
        Property::Short(v) => Ok(*v as f32),
        Property::UInt(v) => Ok(*v as f32),
        Property::UShort(v) => Ok(*v as f32),
        Property::Char(v) => Ok(*v as f32),
        Property::UChar(v) => Ok(*v as f32),
        _ => Err(TilerError::SourceUnavailable(format!(
            "PLY property '{key}' has unsupported type"
        ))),
    }
}

/// Extract the index list from a face element.
fn get_index_list(face: &DefaultElement) -> Result<Vec<u32>> {
    // Try "vertex_indices" first, then "vertex_index"
    let key = if face.contains_key("vertex_indices") {
        "vertex_indices"
    } else {
        "vertex_index"
    };

    let prop = face.get(key).ok_or_else(|| {
        TilerError::SourceUnavailable("PLY face missing vertex_indices property".into())
    })?;

    match prop {
        Property::ListInt(v) => Ok(v.iter().map(|&i| i as u32).collect()),
        Property::ListUInt(v) => Ok(v.clone()),
        Property::ListUChar(v) => Ok(v.iter().map(|&i| u32::from(i)).collect()),
        Property::ListShort(v) => Ok(v.iter().map(|&i| i as u32).collect()),
        Property::ListUShort(v) => Ok(v.iter().map(|&i| u32::from(i)).collect()),
        _ => Err(TilerError::SourceUnavailable(
            "PLY face vertex_indices has unsupported type".into(),
        )),
    }
}
