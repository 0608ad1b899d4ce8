use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TilerError};

/// Spatial partitioning strategy.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    #[value(name = "grid")]
    Grid,
    #[value(name = "octree")]
    Octree,
    #[value(name = "kdtree")]
    KdTree,
    #[value(name = "adaptive")]
    Adaptive,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Grid => write!(f, "grid"),
            Strategy::Octree => write!(f, "octree"),
            Strategy::KdTree => write!(f, "kdtree"),
            Strategy::Adaptive => write!(f, "adaptive"),
        }
    }
}

/// Per-tile payload container format.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[value(name = "b3dm")]
    B3dm,
    #[value(name = "glb")]
    Glb,
    #[value(name = "gltf")]
    Gltf,
    #[value(name = "pnts")]
    Pnts,
}

impl OutputFormat {
    /// File extension used in tile relative paths.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::B3dm => "b3dm",
            OutputFormat::Glb => "glb",
            OutputFormat::Gltf => "gltf",
            OutputFormat::Pnts => "pnts",
        }
    }

    /// Content type for object-store PUTs.
    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::B3dm | OutputFormat::Pnts => "application/octet-stream",
            OutputFormat::Glb => "model/gltf-binary",
            OutputFormat::Gltf => "model/gltf+json",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Where tile payloads land.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum StorageLocation {
    #[value(name = "local_filesystem")]
    LocalFilesystem,
    #[value(name = "object_store")]
    ObjectStore,
}

/// Tiling parameters, deserialized from the task request's
/// `slicing_config` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlicingConfig {
    pub strategy: Strategy,
    /// Base cell edge length in model units.
    pub tile_size: f64,
    /// Finest level, inclusive. 0..=20.
    pub max_level: u32,
    pub output_format: OutputFormat,
    /// Screen-space error budget for the root; a tile at level L gets
    /// `threshold * 2^(max_level - L)`.
    pub geometric_error_threshold: f64,
    /// 0 disables the gzip wrap; 1-9 select the flate2 level.
    pub compression_level: u32,
    #[serde(rename = "parallel_processing_count")]
    pub parallel_count: usize,
    pub preserve_normals: bool,
    #[serde(rename = "preserve_texture_coords")]
    pub preserve_uvs: bool,
    pub enable_incremental_updates: bool,
    pub enable_texture_compression: bool,
    pub enable_draco: bool,
    /// Explicit storage override. Absent means "resolve from the output
    /// path": absolute paths go to the local filesystem, everything else to
    /// the object store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_location: Option<StorageLocation>,
}

impl Default for SlicingConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Octree,
            tile_size: 100.0,
            max_level: 4,
            output_format: OutputFormat::B3dm,
            geometric_error_threshold: 16.0,
            compression_level: 0,
            parallel_count: 4,
            preserve_normals: true,
            preserve_uvs: true,
            enable_incremental_updates: false,
            enable_texture_compression: false,
            enable_draco: false,
            storage_location: None,
        }
    }
}

impl SlicingConfig {
    /// Reject out-of-range values before a task is created.
    pub fn validate(&self) -> Result<()> {
        if !(self.tile_size.is_finite() && self.tile_size > 0.0) {
            return Err(TilerError::InvalidRequest(format!(
                "tile_size must be positive, got {}",
                self.tile_size
            )));
        }
        if self.max_level > 20 {
            return Err(TilerError::InvalidRequest(format!(
                "max_level must be 0..=20, got {}",
                self.max_level
            )));
        }
        if !(self.geometric_error_threshold.is_finite() && self.geometric_error_threshold > 0.0) {
            return Err(TilerError::InvalidRequest(format!(
                "geometric_error_threshold must be positive, got {}",
                self.geometric_error_threshold
            )));
        }
        if self.compression_level > 9 {
            return Err(TilerError::InvalidRequest(format!(
                "compression_level must be 0..=9, got {}",
                self.compression_level
            )));
        }
        if self.parallel_count == 0 {
            return Err(TilerError::InvalidRequest(
                "parallel_processing_count must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// One slicing job as submitted to the orchestrator (JSON wire format).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub name: String,
    pub source_model_path: String,
    pub model_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(default)]
    pub slicing_config: SlicingConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_object_id: Option<String>,
    /// Optional column-major origin transform attached to the tileset root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_transform: Option<[f64; 16]>,
}

impl TaskRequest {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(TilerError::InvalidRequest("task name is empty".into()));
        }
        if self.source_model_path.trim().is_empty() {
            return Err(TilerError::InvalidRequest(
                "source_model_path is empty".into(),
            ));
        }
        self.slicing_config.validate()
    }
}

/// CLI argument definition (clap derive).
#[derive(Parser, Debug)]
#[command(
    name = "mesh-tiler",
    about = "Large-mesh to Cesium 3D Tiles slicing pipeline",
    version
)]
pub struct CliArgs {
    /// JSON task request file; flags below override its fields
    #[arg(long)]
    pub request: Option<PathBuf>,

    /// Input model (OBJ, STL, PLY, glTF, GLB)
    #[arg(short = 'i', long)]
    pub input: Option<PathBuf>,

    /// Output directory or prefix
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Task name
    #[arg(long, default_value = "slice")]
    pub name: String,

    /// Partitioning strategy
    #[arg(long, value_enum)]
    pub strategy: Option<Strategy>,

    /// Base tile edge length in model units
    #[arg(long)]
    pub tile_size: Option<f64>,

    /// Finest subdivision level (0-20)
    #[arg(long)]
    pub max_level: Option<u32>,

    /// Tile payload format
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Root geometric error budget
    #[arg(long)]
    pub geometric_error: Option<f64>,

    /// Gzip level for tile payloads (0 = off)
    #[arg(long)]
    pub compression_level: Option<u32>,

    /// Drop vertex normals from tile output
    #[arg(long)]
    pub no_normals: bool,

    /// Drop texture coordinates from tile output
    #[arg(long)]
    pub no_uvs: bool,

    /// Keep prior tiles and rewrite only changed regions
    #[arg(long)]
    pub incremental: bool,

    /// Compress embedded textures (KTX2 when built with the ktx2 feature)
    #[arg(long)]
    pub texture_compression: bool,

    /// Encode geometry through the Draco codec when one is configured
    #[arg(long)]
    pub draco: bool,

    /// Force a storage backend instead of resolving it from the output path
    #[arg(long, value_enum)]
    pub storage: Option<StorageLocation>,

    /// Scan input and report stats only
    #[arg(long)]
    pub dry_run: bool,

    /// Run tileset validation after slicing
    #[arg(long)]
    pub validate: bool,

    /// Enable verbose logging
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Worker thread count
    #[arg(short = 'j', long)]
    pub threads: Option<usize>,
}

impl CliArgs {
    /// Assemble the task request: start from `--request` when given, then
    /// apply flag overrides.
    pub fn to_request(&self) -> Result<TaskRequest> {
        let mut request = match &self.request {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    TilerError::InvalidRequest(format!(
                        "cannot read request file {}: {e}",
                        path.display()
                    ))
                })?;
                serde_json::from_str::<TaskRequest>(&text).map_err(|e| {
                    TilerError::InvalidRequest(format!("malformed request JSON: {e}"))
                })?
            }
            None => {
                let input = self.input.as_ref().ok_or_else(|| {
                    TilerError::InvalidRequest("either --request or --input is required".into())
                })?;
                let model_type = input
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("")
                    .to_lowercase();
                TaskRequest {
                    name: self.name.clone(),
                    source_model_path: input.display().to_string(),
                    model_type,
                    output_path: None,
                    slicing_config: SlicingConfig::default(),
                    scene_object_id: None,
                    origin_transform: None,
                }
            }
        };

        if let Some(input) = &self.input {
            request.source_model_path = input.display().to_string();
        }
        if let Some(output) = &self.output {
            request.output_path = Some(output.display().to_string());
        }

        let cfg = &mut request.slicing_config;
        if let Some(s) = self.strategy {
            cfg.strategy = s;
        }
        if let Some(t) = self.tile_size {
            cfg.tile_size = t;
        }
        if let Some(l) = self.max_level {
            cfg.max_level = l;
        }
        if let Some(f) = self.format {
            cfg.output_format = f;
        }
        if let Some(g) = self.geometric_error {
            cfg.geometric_error_threshold = g;
        }
        if let Some(c) = self.compression_level {
            cfg.compression_level = c;
        }
        if let Some(j) = self.threads {
            cfg.parallel_count = j;
        }
        if self.no_normals {
            cfg.preserve_normals = false;
        }
        if self.no_uvs {
            cfg.preserve_uvs = false;
        }
        if self.incremental {
            cfg.enable_incremental_updates = true;
        }
        if self.texture_compression {
            cfg.enable_texture_compression = true;
        }
        if self.draco {
            cfg.enable_draco = true;
        }
        if let Some(storage) = self.storage {
            cfg.storage_location = Some(storage);
        }

        request.validate()?;
        Ok(request)
    }
}
