pub mod b3dm;
pub mod glb;
pub mod pnts;

use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use flate2::Compression;
use flate2::write::GzEncoder;

use crate::codec::GeometryCodec;
use crate::config::{OutputFormat, SlicingConfig};
use crate::error::{Result, TilerError};
use crate::types::geometry::{BoundingBox, Triangle};
use crate::types::material::MaterialSet;
use crate::types::mesh::TileMesh;

pub use pnts::PointSelection;

/// Single-tile payload ceiling: a tile bigger than this fails with
/// `Oversize` instead of being written.
pub const DEFAULT_BYTE_CEILING: usize = 50 * 1024 * 1024;

/// Draco position quantization when a geometry codec is wired in.
const DRACO_QUANTIZATION_BITS: u32 = 14;

/// Encodes one tile's triangles into the configured container format.
///
/// Every format recenters geometry against the tile center: GLB/GLTF carry
/// the center as a node translation, B3DM and PNTS as `RTC_CENTER`. The
/// tile's world placement additionally rides in the tileset hierarchy.
#[derive(Clone)]
pub struct TileGenerator {
    pub format: OutputFormat,
    pub preserve_normals: bool,
    pub preserve_uvs: bool,
    pub point_selection: PointSelection,
    pub compression_level: u32,
    pub byte_ceiling: usize,
    pub enable_draco: bool,
    pub geometry_codec: Option<Arc<dyn GeometryCodec>>,
}

impl TileGenerator {
    pub fn from_config(
        config: &SlicingConfig,
        geometry_codec: Option<Arc<dyn GeometryCodec>>,
    ) -> Self {
        Self {
            format: config.output_format,
            preserve_normals: config.preserve_normals,
            preserve_uvs: config.preserve_uvs,
            point_selection: PointSelection::VerticesOnly,
            compression_level: config.compression_level,
            byte_ceiling: DEFAULT_BYTE_CEILING,
            enable_draco: config.enable_draco,
            geometry_codec,
        }
    }

    /// Encode the tile. `seed` keeps stochastic point sampling per-tile
    /// deterministic; mesh formats ignore it.
    ///
    /// Empty input encodes the placeholder cube for mesh formats and is an
    /// `EncodeError` for point tiles.
    pub fn generate(
        &self,
        triangles: &[Triangle],
        bounds: &BoundingBox,
        materials: &MaterialSet,
        seed: u64,
    ) -> Result<Vec<u8>> {
        let payload = match self.format {
            OutputFormat::Pnts => {
                pnts::write_pnts(triangles, bounds, self.point_selection, seed)?
            }
            OutputFormat::Glb | OutputFormat::Gltf | OutputFormat::B3dm => {
                let center = bounds.center();
                let mesh = if triangles.is_empty() {
                    glb::placeholder_cube(bounds, center)
                } else {
                    TileMesh::from_triangles(
                        triangles,
                        center,
                        self.preserve_normals,
                        self.preserve_uvs,
                    )
                };

                let draco_payload = self.encode_draco(&mesh)?;

                match self.format {
                    OutputFormat::Glb => {
                        glb::write_glb(&mesh, center, materials, draco_payload.as_deref())
                    }
                    OutputFormat::Gltf => glb::write_gltf(&mesh, center, materials),
                    OutputFormat::B3dm => {
                        // The embedded GLB stays at the origin; RTC_CENTER
                        // carries the placement.
                        let inner =
                            glb::write_glb(&mesh, [0.0; 3], materials, draco_payload.as_deref());
                        b3dm::write_b3dm(&inner, center, 0)
                    }
                    OutputFormat::Pnts => unreachable!(),
                }
            }
        };

        let payload = self.wrap(payload)?;
        if payload.len() > self.byte_ceiling {
            return Err(TilerError::Oversize {
                size: payload.len(),
                ceiling: self.byte_ceiling,
            });
        }
        Ok(payload)
    }

    /// Encode and write to a filesystem path, creating parent directories.
    pub fn save(
        &self,
        triangles: &[Triangle],
        bounds: &BoundingBox,
        materials: &MaterialSet,
        seed: u64,
        path: &Path,
    ) -> Result<usize> {
        let payload = self.generate(triangles, bounds, materials, seed)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &payload)?;
        Ok(payload.len())
    }

    fn encode_draco(&self, mesh: &TileMesh) -> Result<Option<Vec<u8>>> {
        if !self.enable_draco {
            return Ok(None);
        }
        let Some(codec) = &self.geometry_codec else {
            return Ok(None);
        };
        let payload = codec.encode_draco(
            &mesh.positions,
            &mesh.normals,
            &mesh.uvs,
            &mesh.indices,
            DRACO_QUANTIZATION_BITS,
        )?;
        Ok(Some(payload))
    }

    /// Optional gzip wrap selected by `compression_level`.
    fn wrap(&self, payload: Vec<u8>) -> Result<Vec<u8>> {
        if self.compression_level == 0 {
            return Ok(payload);
        }
        let mut encoder = GzEncoder::new(
            Vec::with_capacity(payload.len() / 2),
            Compression::new(self.compression_level),
        );
        encoder
            .write_all(&payload)
            .and_then(|()| encoder.finish())
            .map_err(|e| TilerError::Encode(format!("gzip wrap failed: {e}")))
    }
}
