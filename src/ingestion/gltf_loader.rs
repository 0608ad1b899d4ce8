use std::path::Path;

use tracing::debug;

use crate::error::{Result, TilerError};
use crate::types::material::{Material, MaterialSet, TextureData};
use crate::types::mesh::TileMesh;

/// Load a glTF or GLB file.
pub fn load_gltf(path: &Path) -> Result<(Vec<TileMesh>, MaterialSet)> {
    let (document, buffers, images) = gltf::import(path)
        .map_err(|e| TilerError::SourceUnavailable(format!("failed to load glTF: {e}")))?;

    debug!(
        meshes = document.meshes().len(),
        materials = document.materials().len(),
        "Loaded glTF document"
    );

    let mut meshes = Vec::new();

    for mesh in document.meshes() {
        for primitive in mesh.primitives() {
            match extract_primitive(&primitive, &buffers) {
                Ok(mut tile_mesh) => {
                    tile_mesh.material_index = primitive.material().index();
                    meshes.push(tile_mesh);
                }
                Err(e) => {
                    tracing::warn!(mesh = ?mesh.name(), "Skipping primitive: {e}");
                }
            }
        }
    }

    let mut set = MaterialSet::default();
    for material in document.materials() {
        set.materials.push(convert_gltf_material(&material));
    }
    for image_data in &images {
        set.textures.push(convert_gltf_image(image_data));
    }

    Ok((meshes, set))
}

/// Extract geometry from a single glTF primitive.
fn extract_primitive(
    primitive: &gltf::Primitive<'_>,
    buffers: &[gltf::buffer::Data],
) -> Result<TileMesh> {
    let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()]));

    let positions: Vec<f32> = reader
        .read_positions()
        .ok_or_else(|| TilerError::SourceUnavailable("primitive missing positions".into()))?
        .flatten()
        .collect();

    let normals: Vec<f32> = reader
        .read_normals()
        .map(|iter| iter.flatten().collect())
        .unwrap_or_default();

    // No V-flip needed for glTF
    let uvs: Vec<f32> = reader
        .read_tex_coords(0)
        .map(|iter| iter.into_f32().flatten().collect())
        .unwrap_or_default();

    let indices: Vec<u32> = reader
        .read_indices()
        .ok_or_else(|| TilerError::SourceUnavailable("primitive missing indices".into()))?
        .into_u32()
        .collect();

    Ok(TileMesh {
        positions,
        normals,
        uvs,
        indices,
        material_index: None, // set by caller
    })
}

/// Convert a glTF material.
fn convert_gltf_material(material: &gltf::Material<'_>) -> Material {
    let pbr = material.pbr_metallic_roughness();

    let base_color_texture = pbr
        .base_color_texture()
        .map(|info| info.texture().source().index());

    Material {
        name: material.name().unwrap_or("").to_string(),
        base_color: pbr.base_color_factor(),
        metallic: pbr.metallic_factor(),
        roughness: pbr.roughness_factor(),
        base_color_texture,
    }
}

/// Convert decoded glTF image data.
fn convert_gltf_image(image_data: &gltf::image::Data) -> TextureData {
    TextureData {
        data: image_data.pixels.clone(),
        mime_type: "image/png".into(),
        width: image_data.width,
        height: image_data.height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gltf_image_conversion() {
        let image_data = gltf::image::Data {
            pixels: vec![255, 0, 0, 255, 0, 255, 0, 255],
            format: gltf::image::Format::R8G8B8A8,
            width: 2,
            height: 1,
        };

        let tex = convert_gltf_image(&image_data);
        assert_eq!(tex.width, 2);
        assert_eq!(tex.height, 1);
        assert_eq!(tex.data.len(), 8);
    }

    #[test]
    fn round_trip_through_generated_glb() {
        // Write a GLB with our own generator, read it back with the loader
        let mesh = TileMesh {
            positions: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            normals: vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
            uvs: vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
            indices: vec![0, 1, 2],
            material_index: None,
        };
        let bytes = crate::generate::glb::write_glb(
            &mesh,
            [0.0; 3],
            &MaterialSet::default(),
            None,
        );

        let tmp = tempfile::Builder::new().suffix(".glb").tempfile().unwrap();
        std::fs::write(tmp.path(), &bytes).unwrap();

        let (meshes, _materials) = load_gltf(tmp.path()).unwrap();
        assert_eq!(meshes.len(), 1);
        assert_eq!(meshes[0].vertex_count(), 3);
        assert_eq!(meshes[0].triangle_count(), 1);
        assert!(meshes[0].has_normals());
        assert!(meshes[0].has_uvs());
    }

    #[test]
    fn missing_file_errors() {
        assert!(load_gltf(Path::new("/no/such/scene.glb")).is_err());
    }
}
