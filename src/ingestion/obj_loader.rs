use std::path::Path;

use tracing::{debug, warn};

use crate::error::{Result, TilerError};
use crate::types::material::{Material, MaterialSet, TextureData};
use crate::types::mesh::TileMesh;

/// Load an OBJ file (+ associated MTL and textures).
pub fn load_obj(path: &Path) -> Result<(Vec<TileMesh>, MaterialSet)> {
    let (models, materials_result) = tobj::load_obj(path, &tobj::GPU_LOAD_OPTIONS)
        .map_err(|e| TilerError::SourceUnavailable(format!("failed to load OBJ: {e}")))?;

    debug!(model_count = models.len(), "Loaded OBJ models");

    let obj_dir = path.parent().unwrap_or_else(|| Path::new("."));

    let tobj_materials = match materials_result {
        Ok(mats) => mats,
        Err(e) => {
            warn!("Failed to load MTL: {e}");
            Vec::new()
        }
    };

    let materials = convert_materials(&tobj_materials, obj_dir);

    let meshes: Vec<TileMesh> = models
        .into_iter()
        .map(|model| convert_mesh(model.mesh))
        .collect();

    Ok((meshes, materials))
}

/// Convert a `tobj::Mesh` into a `TileMesh`.
fn convert_mesh(mesh: tobj::Mesh) -> TileMesh {
    // UV V-flip: OBJ uses bottom-left origin, glTF uses top-left
    let uvs: Vec<f32> = mesh
        .texcoords
        .chunks_exact(2)
        .flat_map(|uv| [uv[0], 1.0 - uv[1]])
        .collect();

    TileMesh {
        positions: mesh.positions,
        normals: mesh.normals,
        uvs,
        indices: mesh.indices,
        material_index: mesh.material_id,
    }
}

/// Convert tobj materials into a `MaterialSet`.
fn convert_materials(tobj_mats: &[tobj::Material], obj_dir: &Path) -> MaterialSet {
    let mut set = MaterialSet::default();

    for mat in tobj_mats {
        let mut material = Material {
            name: mat.name.clone(),
            ..Default::default()
        };

        // Kd -> base_color, d -> alpha
        if let Some(diffuse) = mat.diffuse {
            material.base_color = [
                diffuse[0],
                diffuse[1],
                diffuse[2],
                mat.dissolve.unwrap_or(1.0),
            ];
        }

        // map_Kd -> base color texture
        if let Some(ref tex_name) = mat.diffuse_texture {
            let tex_path = obj_dir.join(tex_name);
            match load_texture(&tex_path) {
                Ok(tex) => {
                    let tex_idx = set.textures.len();
                    set.textures.push(tex);
                    material.base_color_texture = Some(tex_idx);
                }
                Err(e) => {
                    warn!(texture = %tex_name, "Failed to load texture: {e}");
                }
            }
        }

        set.materials.push(material);
    }

    set
}

/// Load a texture file: raw bytes plus decoded dimensions.
fn load_texture(path: &Path) -> Result<TextureData> {
    let data = std::fs::read(path).map_err(|e| {
        TilerError::SourceUnavailable(format!("failed to read texture {}: {e}", path.display()))
    })?;

    let img = image::load_from_memory(&data).map_err(|e| {
        TilerError::SourceUnavailable(format!("failed to decode texture {}: {e}", path.display()))
    })?;

    let mime_type = match path.extension().and_then(|e| e.to_str()) {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    };

    Ok(TextureData {
        data,
        mime_type: mime_type.to_string(),
        width: img.width(),
        height: img.height(),
    })
}
