use std::io::Cursor;

use tracing::warn;

use crate::error::{Result, TilerError};
use crate::types::material::TextureData;

/// Texture encoding collaborator. Implementations wrap the actual codecs;
/// the pipeline only moves bytes.
pub trait TextureCodec: Send + Sync {
    /// Encode RGBA pixels to KTX2 (Basis Universal).
    fn encode_ktx2(&self, rgba: &[u8], width: u32, height: u32) -> Result<Vec<u8>>;

    /// Encode RGBA pixels to JPEG at `quality` (0-100); alpha is dropped.
    fn encode_jpeg(&self, rgba: &[u8], width: u32, height: u32, quality: u8) -> Result<Vec<u8>>;

    /// KTX2 with JPEG fallback: the compressed-texture path must always
    /// produce something displayable.
    fn encode_preferred(&self, rgba: &[u8], width: u32, height: u32, quality: u8) -> Result<TextureData> {
        match self.encode_ktx2(rgba, width, height) {
            Ok(data) => Ok(TextureData {
                data,
                mime_type: "image/ktx2".into(),
                width,
                height,
            }),
            Err(e) => {
                warn!("KTX2 encoding failed ({e}), falling back to JPEG");
                let data = self.encode_jpeg(rgba, width, height, quality)?;
                Ok(TextureData {
                    data,
                    mime_type: "image/jpeg".into(),
                    width,
                    height,
                })
            }
        }
    }
}

/// Geometry compression collaborator, invoked only when `enable_draco` is
/// set and a codec instance is supplied.
pub trait GeometryCodec: Send + Sync {
    fn encode_draco(
        &self,
        positions: &[f32],
        normals: &[f32],
        uvs: &[f32],
        indices: &[u32],
        quantization_bits: u32,
    ) -> Result<Vec<u8>>;
}

/// Built-in texture codec: JPEG via the image crate, KTX2 via Basis
/// Universal when the `ktx2` feature is enabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinTextureCodec;

impl TextureCodec for BuiltinTextureCodec {
    #[cfg(feature = "ktx2")]
    fn encode_ktx2(&self, rgba: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
        use basis_universal::encoding::{ColorSpace, Compressor, CompressorParams, encoder_init};
        use basis_universal::BasisTextureFormat;

        // Thread-safe, idempotent
        encoder_init();

        let mut params = CompressorParams::new();
        params.set_basis_format(BasisTextureFormat::UASTC4x4);
        params.set_rdo_uastc(Some(1.0));
        params.set_generate_mipmaps(false);
        params.set_color_space(ColorSpace::Srgb);
        params.source_image_mut(0).init(rgba, width, height, 4);

        let mut compressor = Compressor::new(4);
        // SAFETY: params and compressor are valid, encoder_init() was called
        unsafe {
            compressor.init(&params);
            compressor
                .process()
                .map_err(|e| TilerError::Encode(format!("Basis compressor failed: {e:?}")))?;
        }

        let data = compressor.basis_file().to_vec();
        if data.is_empty() {
            return Err(TilerError::Encode("Basis produced empty output".into()));
        }
        Ok(data)
    }

    #[cfg(not(feature = "ktx2"))]
    fn encode_ktx2(&self, _rgba: &[u8], _width: u32, _height: u32) -> Result<Vec<u8>> {
        Err(TilerError::Encode(
            "KTX2 support requires the 'ktx2' feature".into(),
        ))
    }

    fn encode_jpeg(&self, rgba: &[u8], width: u32, height: u32, quality: u8) -> Result<Vec<u8>> {
        let img = image::RgbaImage::from_raw(width, height, rgba.to_vec())
            .ok_or_else(|| TilerError::Encode("RGBA buffer does not match dimensions".into()))?;
        let rgb = image::DynamicImage::ImageRgba8(img).to_rgb8();

        let mut buf = Cursor::new(Vec::new());
        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
        rgb.write_with_encoder(encoder)
            .map_err(|e| TilerError::Encode(format!("JPEG encoding failed: {e}")))?;
        Ok(buf.into_inner())
    }
}
