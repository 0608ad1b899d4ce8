pub mod gltf_loader;
pub mod obj_loader;
pub mod ply_loader;
pub mod stl_loader;

use std::path::Path;

use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::error::{Result, TilerError};
use crate::types::geometry::{BoundingBox, Triangle};
use crate::types::material::MaterialSet;
use crate::types::mesh::TileMesh;

/// Source-model decoding collaborator. The pipeline sees only triangles.
pub trait ModelLoader: Send + Sync {
    /// Whether this loader handles files with `extension` (lowercase, no dot).
    fn supports(&self, extension: &str) -> bool;

    /// Load the source into a triangle soup with world bounds and materials.
    fn load(&self, path: &Path, cancel: &CancelToken) -> Result<LoadedModel>;
}

/// Result of loading a source model.
#[derive(Debug)]
pub struct LoadedModel {
    pub triangles: Vec<Triangle>,
    pub bounds: BoundingBox,
    pub materials: MaterialSet,
    pub stats: LoadStats,
}

/// Statistics about the ingested data.
#[derive(Debug, Default)]
pub struct LoadStats {
    pub total_vertices: usize,
    pub total_triangles: usize,
    pub dropped_triangles: usize,
    pub has_normals: bool,
    pub has_uvs: bool,
    pub material_count: usize,
    pub texture_count: usize,
    pub input_format: String,
}

/// Supported input formats in the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Obj,
    Stl,
    Ply,
    Gltf,
    Glb,
}

impl InputFormat {
    /// Detect format from file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        Self::from_extension(&ext).ok_or_else(|| {
            TilerError::SourceUnavailable(format!("unsupported file format: .{ext}"))
        })
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "obj" => Some(InputFormat::Obj),
            "stl" => Some(InputFormat::Stl),
            "ply" => Some(InputFormat::Ply),
            "gltf" => Some(InputFormat::Gltf),
            "glb" => Some(InputFormat::Glb),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InputFormat::Obj => "OBJ",
            InputFormat::Stl => "STL",
            InputFormat::Ply => "PLY",
            InputFormat::Gltf => "glTF",
            InputFormat::Glb => "GLB",
        }
    }
}

impl std::fmt::Display for InputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Built-in loader for the core formats: OBJ, STL, PLY, glTF, GLB.
#[derive(Debug, Default, Clone, Copy)]
pub struct MeshLoader;

impl ModelLoader for MeshLoader {
    fn supports(&self, extension: &str) -> bool {
        InputFormat::from_extension(&extension.to_lowercase()).is_some()
    }

    fn load(&self, path: &Path, cancel: &CancelToken) -> Result<LoadedModel> {
        cancel.check()?;
        if !path.exists() {
            return Err(TilerError::SourceUnavailable(format!(
                "input file not found: {}",
                path.display()
            )));
        }

        let format = InputFormat::from_path(path)?;
        info!(format = %format, path = %path.display(), "Detected input format");

        let (meshes, materials) = match format {
            InputFormat::Obj => obj_loader::load_obj(path)?,
            InputFormat::Stl => {
                let mesh = stl_loader::load_stl(path)?;
                (vec![mesh], MaterialSet::default())
            }
            InputFormat::Ply => {
                let mesh = ply_loader::load_ply(path)?;
                (vec![mesh], MaterialSet::default())
            }
            InputFormat::Gltf | InputFormat::Glb => gltf_loader::load_gltf(path)?,
        };
        cancel.check()?;

        Ok(assemble(meshes, materials, format))
    }
}

/// Flatten loaded meshes into a validated triangle soup with world bounds.
/// Degenerate triangles are dropped and counted, never fatal.
fn assemble(meshes: Vec<TileMesh>, materials: MaterialSet, format: InputFormat) -> LoadedModel {
    let total_vertices: usize = meshes.iter().map(|m| m.vertex_count()).sum();
    let source_triangles: usize = meshes.iter().map(|m| m.triangle_count()).sum();
    let has_normals = meshes.iter().any(|m| m.has_normals());
    let has_uvs = meshes.iter().any(|m| m.has_uvs());

    let mut triangles = Vec::with_capacity(source_triangles);
    for mesh in &meshes {
        triangles.extend(mesh.to_triangles([0.0; 3]));
    }
    let dropped = source_triangles - triangles.len();
    if dropped > 0 {
        debug!(dropped, "dropped degenerate triangles on ingest");
    }

    let bounds = BoundingBox::of_triangles(&triangles);

    let stats = LoadStats {
        total_vertices,
        total_triangles: triangles.len(),
        dropped_triangles: dropped,
        has_normals,
        has_uvs,
        material_count: materials.materials.len(),
        texture_count: materials.textures.len(),
        input_format: format.to_string(),
    };

    LoadedModel {
        triangles,
        bounds,
        materials,
        stats,
    }
}
