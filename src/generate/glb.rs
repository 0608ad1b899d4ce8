use std::borrow::Cow;
use std::collections::BTreeMap;

use base64::Engine as _;
use gltf::binary::Glb;
use gltf_json::Index;
use gltf_json::accessor::{ComponentType, GenericComponentType, Type as AccessorType};
use gltf_json::buffer::Target;
use gltf_json::mesh::{Mode, Primitive, Semantic};
use gltf_json::validation::{Checked, USize64};

use crate::types::geometry::{BoundingBox, Vector3};
use crate::types::material::MaterialSet;
use crate::types::mesh::TileMesh;

/// Serialize a recentered `TileMesh` into a binary GLB (glTF 2.0) buffer.
///
/// Produces a self-contained GLB with one buffer (positions + optional
/// normals/UVs + indices + optional texture), one mesh with one primitive
/// (mode = Triangles), one node carrying the tile-center translation, and a
/// material when the mesh references one.
///
/// Indices use u16 when `vertex_count <= 65535`. Position accessors publish
/// exact min/max. When `draco` bytes are supplied the geometry ships as a
/// `KHR_draco_mesh_compression` buffer view instead of raw arrays.
pub fn write_glb(
    mesh: &TileMesh,
    center: Vector3,
    materials: &MaterialSet,
    draco: Option<&[u8]>,
) -> Vec<u8> {
    let (root, bin_data) = build_root(mesh, center, materials, draco);

    let json_string = gltf_json::serialize::to_string(&root).expect("gltf-json serialization");
    let mut json_bytes = json_string.into_bytes();
    // Pad JSON to 4-byte alignment with spaces (per GLB spec)
    while json_bytes.len() % 4 != 0 {
        json_bytes.push(b' ');
    }

    let glb = Glb {
        header: gltf::binary::Header {
            magic: *b"glTF",
            version: 2,
            length: (12 + 8 + json_bytes.len() + 8 + bin_data.len()) as u32,
        },
        json: Cow::Owned(json_bytes),
        bin: Some(Cow::Owned(bin_data)),
    };

    glb.to_vec().expect("GLB serialization")
}

/// Serialize to the JSON `.gltf` flavor: identical document, with the binary
/// buffer embedded as a base64 data URI so a tile stays a single blob.
pub fn write_gltf(mesh: &TileMesh, center: Vector3, materials: &MaterialSet) -> Vec<u8> {
    let (mut root, bin_data) = build_root(mesh, center, materials, None);

    let uri = format!(
        "data:application/octet-stream;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(&bin_data)
    );
    if let Some(buffer) = root.buffers.first_mut() {
        buffer.uri = Some(uri);
    }

    gltf_json::serialize::to_string(&root)
        .expect("gltf-json serialization")
        .into_bytes()
}

/// An 8-vertex cube filling `bounds`, recentered against `center`. Stands in
/// for empty tiles so downstream readers never fault on a zero-vertex mesh.
pub fn placeholder_cube(bounds: &BoundingBox, center: Vector3) -> TileMesh {
    let lo = [
        (bounds.min[0] - center[0]) as f32,
        (bounds.min[1] - center[1]) as f32,
        (bounds.min[2] - center[2]) as f32,
    ];
    let hi = [
        (bounds.max[0] - center[0]) as f32,
        (bounds.max[1] - center[1]) as f32,
        (bounds.max[2] - center[2]) as f32,
    ];

    let mut positions = Vec::with_capacity(24);
    for z in [lo[2], hi[2]] {
        for y in [lo[1], hi[1]] {
            for x in [lo[0], hi[0]] {
                positions.extend_from_slice(&[x, y, z]);
            }
        }
    }

    // 12 triangles, outward winding
    let indices: Vec<u32> = vec![
        0, 2, 1, 1, 2, 3, // -z
        4, 5, 6, 5, 7, 6, // +z
        0, 1, 4, 1, 5, 4, // -y
        2, 6, 3, 3, 6, 7, // +y
        0, 4, 2, 2, 4, 6, // -x
        1, 3, 5, 3, 7, 5, // +x
    ];

    TileMesh {
        positions,
        normals: vec![],
        uvs: vec![],
        indices,
        material_index: None,
    }
}

fn build_root(
    mesh: &TileMesh,
    center: Vector3,
    materials: &MaterialSet,
    draco: Option<&[u8]>,
) -> (gltf_json::Root, Vec<u8>) {
    let mut root = gltf_json::Root {
        asset: gltf_json::Asset {
            version: "2.0".into(),
            generator: Some("mesh-tiler".into()),
            ..Default::default()
        },
        ..Default::default()
    };

    let mut bin_data: Vec<u8> = Vec::new();
    let mut attributes = BTreeMap::new();

    let buffer_idx = Index::new(0); // buffer is pushed at the end

    let raw_views = draco.is_none();

    // --- Positions (required, with exact min/max) ---
    let (pos_min, pos_max) = compute_position_bounds(&mesh.positions);
    let pos_view = raw_views.then(|| {
        write_view(
            &mut root,
            &mut bin_data,
            buffer_idx,
            bytemuck::cast_slice(&mesh.positions),
            Some(Target::ArrayBuffer),
        )
    });

    let pos_accessor = root.push(gltf_json::Accessor {
        buffer_view: pos_view,
        byte_offset: raw_views.then_some(USize64(0)),
        count: USize64::from(mesh.vertex_count()),
        component_type: Checked::Valid(GenericComponentType(ComponentType::F32)),
        type_: Checked::Valid(AccessorType::Vec3),
        min: Some(serde_json::json!(pos_min)),
        max: Some(serde_json::json!(pos_max)),
        name: None,
        normalized: false,
        sparse: None,
        extensions: Default::default(),
        extras: Default::default(),
    });
    attributes.insert(Checked::Valid(Semantic::Positions), pos_accessor);

    // --- Normals (optional) ---
    if mesh.has_normals() {
        let view = raw_views.then(|| {
            write_view(
                &mut root,
                &mut bin_data,
                buffer_idx,
                bytemuck::cast_slice(&mesh.normals),
                Some(Target::ArrayBuffer),
            )
        });
        let accessor = root.push(gltf_json::Accessor {
            buffer_view: view,
            byte_offset: raw_views.then_some(USize64(0)),
            count: USize64::from(mesh.vertex_count()),
            component_type: Checked::Valid(GenericComponentType(ComponentType::F32)),
            type_: Checked::Valid(AccessorType::Vec3),
            min: None,
            max: None,
            name: None,
            normalized: false,
            sparse: None,
            extensions: Default::default(),
            extras: Default::default(),
        });
        attributes.insert(Checked::Valid(Semantic::Normals), accessor);
    }

    // --- UVs (optional) ---
    if mesh.has_uvs() {
        let view = raw_views.then(|| {
            write_view(
                &mut root,
                &mut bin_data,
                buffer_idx,
                bytemuck::cast_slice(&mesh.uvs),
                Some(Target::ArrayBuffer),
            )
        });
        let accessor = root.push(gltf_json::Accessor {
            buffer_view: view,
            byte_offset: raw_views.then_some(USize64(0)),
            count: USize64::from(mesh.vertex_count()),
            component_type: Checked::Valid(GenericComponentType(ComponentType::F32)),
            type_: Checked::Valid(AccessorType::Vec2),
            min: None,
            max: None,
            name: None,
            normalized: false,
            sparse: None,
            extensions: Default::default(),
            extras: Default::default(),
        });
        attributes.insert(Checked::Valid(Semantic::TexCoords(0)), accessor);
    }

    // --- Indices (u16 when vertex_count <= 65535, else u32) ---
    let use_u16_indices = mesh.vertex_count() <= 65535;
    let idx_view = raw_views.then(|| {
        if use_u16_indices {
            let idx_u16: Vec<u16> = mesh.indices.iter().map(|&i| i as u16).collect();
            write_view(
                &mut root,
                &mut bin_data,
                buffer_idx,
                bytemuck::cast_slice(&idx_u16),
                Some(Target::ElementArrayBuffer),
            )
        } else {
            write_view(
                &mut root,
                &mut bin_data,
                buffer_idx,
                bytemuck::cast_slice(&mesh.indices),
                Some(Target::ElementArrayBuffer),
            )
        }
    });

    let idx_component_type = if use_u16_indices {
        ComponentType::U16
    } else {
        ComponentType::U32
    };

    let idx_accessor = root.push(gltf_json::Accessor {
        buffer_view: idx_view,
        byte_offset: raw_views.then_some(USize64(0)),
        count: USize64::from(mesh.indices.len()),
        component_type: Checked::Valid(GenericComponentType(idx_component_type)),
        type_: Checked::Valid(AccessorType::Scalar),
        min: None,
        max: None,
        name: None,
        normalized: false,
        sparse: None,
        extensions: Default::default(),
        extras: Default::default(),
    });

    // --- Draco geometry payload (replaces raw views) ---
    let primitive_extensions = if let Some(payload) = draco {
        let view = write_view(&mut root, &mut bin_data, buffer_idx, payload, None);

        let mut draco_attributes = serde_json::Map::new();
        let mut next_id = 0u32;
        draco_attributes.insert("POSITION".into(), serde_json::json!(next_id));
        if mesh.has_normals() {
            next_id += 1;
            draco_attributes.insert("NORMAL".into(), serde_json::json!(next_id));
        }
        if mesh.has_uvs() {
            next_id += 1;
            draco_attributes.insert("TEXCOORD_0".into(), serde_json::json!(next_id));
        }

        let mut ext_map = serde_json::Map::new();
        ext_map.insert(
            "KHR_draco_mesh_compression".into(),
            serde_json::json!({
                "bufferView": view.value(),
                "attributes": draco_attributes,
            }),
        );
        root.extensions_used.push("KHR_draco_mesh_compression".into());
        root.extensions_required
            .push("KHR_draco_mesh_compression".into());

        Some(gltf_json::extensions::mesh::Primitive { others: ext_map })
    } else {
        None
    };

    // --- Texture (optional, one atlas per tile) ---
    let texture_index = mesh
        .material_index
        .and_then(|m| materials.materials.get(m))
        .and_then(|m| m.base_color_texture)
        .and_then(|t| materials.textures.get(t))
        .map(|tex| {
            let view = write_view(&mut root, &mut bin_data, buffer_idx, &tex.data, None);

            let image_idx = root.push(gltf_json::Image {
                buffer_view: Some(view),
                mime_type: Some(gltf_json::image::MimeType(tex.mime_type.clone())),
                uri: None,
                name: None,
                extensions: Default::default(),
                extras: Default::default(),
            });

            let sampler_idx = root.push(gltf_json::texture::Sampler {
                mag_filter: Some(Checked::Valid(gltf_json::texture::MagFilter::Linear)),
                min_filter: Some(Checked::Valid(
                    gltf_json::texture::MinFilter::LinearMipmapLinear,
                )),
                wrap_s: Checked::Valid(gltf_json::texture::WrappingMode::ClampToEdge),
                wrap_t: Checked::Valid(gltf_json::texture::WrappingMode::ClampToEdge),
                name: None,
                extensions: Default::default(),
                extras: Default::default(),
            });

            if tex.mime_type == "image/ktx2" {
                let ext = "KHR_texture_basisu".to_string();
                root.extensions_used.push(ext.clone());
                root.extensions_required.push(ext);
            }

            root.push(gltf_json::Texture {
                sampler: Some(sampler_idx),
                source: image_idx,
                name: None,
                extensions: Default::default(),
                extras: Default::default(),
            })
        });

    // --- Material (optional) ---
    let material_index = build_material(&mut root, mesh.material_index, materials, texture_index);

    // --- Mesh ---
    let primitive = Primitive {
        attributes,
        indices: Some(idx_accessor),
        material: material_index,
        mode: Checked::Valid(Mode::Triangles),
        targets: None,
        extensions: primitive_extensions,
        extras: Default::default(),
    };

    let mesh_idx = root.push(gltf_json::Mesh {
        primitives: vec![primitive],
        weights: None,
        name: None,
        extensions: Default::default(),
        extras: Default::default(),
    });

    // --- Node (carries the tile-center translation) ---
    let translation =
        (center != [0.0; 3]).then(|| [center[0] as f32, center[1] as f32, center[2] as f32]);
    let node_idx = root.push(gltf_json::Node {
        mesh: Some(mesh_idx),
        translation,
        ..Default::default()
    });

    // --- Scene ---
    let scene_idx = root.push(gltf_json::Scene {
        nodes: vec![node_idx],
        name: None,
        extensions: Default::default(),
        extras: Default::default(),
    });
    root.scene = Some(scene_idx);

    // --- Buffer (the one buffer holding all data) ---
    while bin_data.len() % 4 != 0 {
        bin_data.push(0);
    }

    root.push(gltf_json::Buffer {
        byte_length: USize64::from(bin_data.len()),
        uri: None,
        name: None,
        extensions: Default::default(),
        extras: Default::default(),
    });

    (root, bin_data)
}

/// Append `raw_bytes` to the buffer at 4-byte alignment and register the
/// buffer view.
fn write_view(
    root: &mut gltf_json::Root,
    bin_data: &mut Vec<u8>,
    buffer_idx: Index<gltf_json::Buffer>,
    raw_bytes: &[u8],
    target: Option<Target>,
) -> Index<gltf_json::buffer::View> {
    while bin_data.len() % 4 != 0 {
        bin_data.push(0);
    }

    let byte_offset = bin_data.len();
    bin_data.extend_from_slice(raw_bytes);

    root.push(gltf_json::buffer::View {
        buffer: buffer_idx,
        byte_length: USize64::from(raw_bytes.len()),
        byte_offset: Some(USize64::from(byte_offset)),
        byte_stride: None,
        name: None,
        target: target.map(Checked::Valid),
        extensions: Default::default(),
        extras: Default::default(),
    })
}

/// Build a gltf-json Material if the mesh references one in the set.
fn build_material(
    root: &mut gltf_json::Root,
    material_index: Option<usize>,
    materials: &MaterialSet,
    texture_index: Option<Index<gltf_json::Texture>>,
) -> Option<Index<gltf_json::Material>> {
    let mat_idx = material_index?;
    let mat = materials.materials.get(mat_idx)?;

    let base_color_texture = texture_index.map(|idx| gltf_json::texture::Info {
        index: idx,
        tex_coord: 0,
        extensions: Default::default(),
        extras: Default::default(),
    });

    let pbr = gltf_json::material::PbrMetallicRoughness {
        base_color_factor: gltf_json::material::PbrBaseColorFactor(mat.base_color),
        metallic_factor: gltf_json::material::StrengthFactor(mat.metallic),
        roughness_factor: gltf_json::material::StrengthFactor(mat.roughness),
        base_color_texture,
        metallic_roughness_texture: None,
        extensions: Default::default(),
        extras: Default::default(),
    };

    let gltf_mat = gltf_json::Material {
        pbr_metallic_roughness: pbr,
        alpha_mode: Checked::Valid(gltf_json::material::AlphaMode::Opaque),
        alpha_cutoff: None,
        double_sided: false,
        normal_texture: None,
        occlusion_texture: None,
        emissive_texture: None,
        emissive_factor: gltf_json::material::EmissiveFactor([0.0, 0.0, 0.0]),
        name: None,
        extensions: Default::default(),
        extras: Default::default(),
    };

    Some(root.push(gltf_mat))
}

/// Compute min/max for a flat positions array (stride 3).
fn compute_position_bounds(positions: &[f32]) -> ([f32; 3], [f32; 3]) {
    let mut min = [f32::INFINITY; 3];
    let mut max = [f32::NEG_INFINITY; 3];

    for chunk in positions.chunks_exact(3) {
        for i in 0..3 {
            min[i] = min[i].min(chunk[i]);
            max[i] = max[i].max(chunk[i]);
        }
    }

    (min, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::material::Material;

    fn make_triangle() -> TileMesh {
        TileMesh {
            positions: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            normals: vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
            uvs: vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
            indices: vec![0, 1, 2],
            material_index: None,
        }
    }

    #[test]
    fn glb_magic_and_version() {
        let bytes = write_glb(&make_triangle(), [0.0; 3], &MaterialSet::default(), None);
        assert_eq!(&bytes[0..4], b"glTF");
        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        assert_eq!(version, 2);
    }

    #[test]
    fn glb_round_trip_parseable() {
        let bytes = write_glb(&make_triangle(), [0.0; 3], &MaterialSet::default(), None);
        let glb = Glb::from_slice(&bytes).expect("GLB should be parseable");
        assert_eq!(&glb.header.magic, b"glTF");
        assert!(glb.bin.is_some());
    }

    #[test]
    fn glb_round_trip_attributes() {
        let bytes = write_glb(&make_triangle(), [0.0; 3], &MaterialSet::default(), None);
        let (doc, _buffers, _images) = gltf::import_slice(&bytes).unwrap();
        let prim = doc.meshes().next().unwrap().primitives().next().unwrap();

        let pos = prim.get(&Semantic::Positions).expect("positions");
        assert_eq!(pos.count(), 3);
        assert!(prim.get(&Semantic::Normals).is_some());
        assert!(prim.get(&Semantic::TexCoords(0)).is_some());
        assert_eq!(prim.indices().unwrap().count(), 3);
        assert_eq!(prim.mode(), gltf::mesh::Mode::Triangles);
    }

    #[test]
    fn glb_u16_indices_for_small_mesh() {
        let bytes = write_glb(&make_triangle(), [0.0; 3], &MaterialSet::default(), None);
        let (doc, _buffers, _images) = gltf::import_slice(&bytes).unwrap();
        let prim = doc.meshes().next().unwrap().primitives().next().unwrap();
        assert_eq!(
            prim.indices().unwrap().data_type(),
            gltf::accessor::DataType::U16
        );
    }

    #[test]
    fn glb_position_bounds_published() {
        let bytes = write_glb(&make_triangle(), [0.0; 3], &MaterialSet::default(), None);
        let (doc, _buffers, _images) = gltf::import_slice(&bytes).unwrap();
        let prim = doc.meshes().next().unwrap().primitives().next().unwrap();
        let bb = prim.bounding_box();
        assert_eq!(bb.min, [0.0, 0.0, 0.0]);
        assert_eq!(bb.max, [1.0, 1.0, 0.0]);
    }

    #[test]
    fn glb_node_carries_center_translation() {
        let bytes = write_glb(
            &make_triangle(),
            [100.0, 200.0, 300.0],
            &MaterialSet::default(),
            None,
        );
        let (doc, _buffers, _images) = gltf::import_slice(&bytes).unwrap();
        let node = doc.nodes().next().unwrap();
        let (translation, _, _) = node.transform().decomposed();
        assert_eq!(translation, [100.0, 200.0, 300.0]);
    }

    #[test]
    fn glb_with_material() {
        let mut materials = MaterialSet::default();
        materials.materials.push(Material {
            name: "test".into(),
            base_color: [0.8, 0.2, 0.1, 1.0],
            metallic: 0.5,
            roughness: 0.7,
            base_color_texture: None,
        });
        let mesh = TileMesh {
            material_index: Some(0),
            ..make_triangle()
        };

        let bytes = write_glb(&mesh, [0.0; 3], &materials, None);
        let (doc, _buffers, _images) = gltf::import_slice(&bytes).unwrap();
        let mat = doc.materials().next().expect("material");
        let pbr = mat.pbr_metallic_roughness();
        assert!((pbr.base_color_factor()[0] - 0.8).abs() < 1e-3);
        assert!((pbr.metallic_factor() - 0.5).abs() < 1e-3);
        assert!((pbr.roughness_factor() - 0.7).abs() < 1e-3);
    }

    #[test]
    fn placeholder_cube_fills_bounds() {
        let bounds = BoundingBox {
            min: [0.0, 0.0, 0.0],
            max: [2.0, 4.0, 6.0],
        };
        let cube = placeholder_cube(&bounds, bounds.center());
        assert_eq!(cube.vertex_count(), 8);
        assert_eq!(cube.triangle_count(), 12);

        let (min, max) = compute_position_bounds(&cube.positions);
        assert_eq!(min, [-1.0, -2.0, -3.0]);
        assert_eq!(max, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn placeholder_cube_glb_parseable() {
        let bounds = BoundingBox {
            min: [0.0; 3],
            max: [1.0; 3],
        };
        let cube = placeholder_cube(&bounds, bounds.center());
        let bytes = write_glb(&cube, bounds.center(), &MaterialSet::default(), None);
        let (doc, _buffers, _images) = gltf::import_slice(&bytes).unwrap();
        let prim = doc.meshes().next().unwrap().primitives().next().unwrap();
        assert_eq!(prim.get(&Semantic::Positions).unwrap().count(), 8);
        assert_eq!(prim.indices().unwrap().count(), 36);
    }

    #[test]
    fn gltf_json_flavor_parseable() {
        let bytes = write_gltf(&make_triangle(), [0.0; 3], &MaterialSet::default());
        let text = std::str::from_utf8(&bytes).unwrap();
        let doc: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(doc["asset"]["version"], "2.0");
        let uri = doc["buffers"][0]["uri"].as_str().unwrap();
        assert!(uri.starts_with("data:application/octet-stream;base64,"));

        // Full import resolves the data URI
        let (gltf_doc, buffers, _images) = gltf::import_slice(&bytes).unwrap();
        assert_eq!(gltf_doc.meshes().count(), 1);
        assert!(!buffers.is_empty());
    }

    #[test]
    fn glb_with_embedded_texture() {
        let img = image::RgbaImage::from_fn(4, 4, |x, y| {
            if (x + y) % 2 == 0 {
                image::Rgba([255, 0, 0, 255])
            } else {
                image::Rgba([0, 255, 0, 255])
            }
        });
        let mut buf = std::io::Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();

        let mut materials = MaterialSet::default();
        materials.textures.push(crate::types::material::TextureData {
            data: buf.into_inner(),
            mime_type: "image/png".into(),
            width: 4,
            height: 4,
        });
        materials.materials.push(Material {
            name: "textured".into(),
            base_color_texture: Some(0),
            ..Default::default()
        });

        let mesh = TileMesh {
            material_index: Some(0),
            ..make_triangle()
        };
        let bytes = write_glb(&mesh, [0.0; 3], &materials, None);
        let (doc, _buffers, images) = gltf::import_slice(&bytes).unwrap();
        assert_eq!(doc.textures().count(), 1);
        assert_eq!(doc.images().count(), 1);
        assert_eq!(images[0].width, 4);
    }

    #[test]
    fn draco_payload_declares_extension() {
        let payload = vec![0xDE, 0xAD, 0xBE, 0xEF];
        let bytes = write_glb(
            &make_triangle(),
            [0.0; 3],
            &MaterialSet::default(),
            Some(&payload),
        );
        let glb = Glb::from_slice(&bytes).unwrap();
        let json_str = std::str::from_utf8(&glb.json).unwrap();
        assert!(json_str.contains("KHR_draco_mesh_compression"));
        assert!(json_str.contains("POSITION"));
    }
}
