use crate::types::geometry::Vector3;

/// B3DM header length: magic, version, and five chunk-length fields.
pub const HEADER_LEN: usize = 28;

/// Wrap a GLB payload in a Batched 3D Model container.
///
/// Layout: 28-byte header, Feature Table JSON (4-byte aligned, space
/// padded), Feature Table Binary (8-byte aligned, zero padded), Batch Table
/// JSON (4-byte aligned), Batch Table Binary, embedded GLB. `byteLength`
/// covers the whole tile; the tile-center translation rides in `RTC_CENTER`.
pub fn write_b3dm(glb: &[u8], rtc_center: Vector3, batch_length: u32) -> Vec<u8> {
    let mut feature_json = serde_json::json!({
        "BATCH_LENGTH": batch_length,
    });
    if rtc_center != [0.0; 3] {
        feature_json["RTC_CENTER"] = serde_json::json!(rtc_center);
    }
    let mut feature_json_bytes = feature_json.to_string().into_bytes();
    while (HEADER_LEN + feature_json_bytes.len()) % 4 != 0 {
        feature_json_bytes.push(b' ');
    }

    // No per-batch binary attributes; keep the section aligned anyway.
    let mut feature_bin: Vec<u8> = Vec::new();
    while (HEADER_LEN + feature_json_bytes.len() + feature_bin.len()) % 8 != 0 {
        feature_bin.push(0);
    }

    let mut batch_json_bytes = b"{}".to_vec();
    while (HEADER_LEN + feature_json_bytes.len() + feature_bin.len() + batch_json_bytes.len()) % 4
        != 0
    {
        batch_json_bytes.push(b' ');
    }

    let batch_bin: Vec<u8> = Vec::new();

    let byte_length = HEADER_LEN
        + feature_json_bytes.len()
        + feature_bin.len()
        + batch_json_bytes.len()
        + batch_bin.len()
        + glb.len();

    let mut out = Vec::with_capacity(byte_length);
    out.extend_from_slice(b"b3dm");
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&(byte_length as u32).to_le_bytes());
    out.extend_from_slice(&(feature_json_bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&(feature_bin.len() as u32).to_le_bytes());
    out.extend_from_slice(&(batch_json_bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&(batch_bin.len() as u32).to_le_bytes());
    out.extend_from_slice(&feature_json_bytes);
    out.extend_from_slice(&feature_bin);
    out.extend_from_slice(&batch_json_bytes);
    out.extend_from_slice(&batch_bin);
    out.extend_from_slice(glb);
    out
}

/// Parsed B3DM chunk layout, for validation and tests.
#[derive(Debug, PartialEq, Eq)]
pub struct B3dmLayout {
    pub byte_length: u32,
    pub feature_json_len: u32,
    pub feature_bin_len: u32,
    pub batch_json_len: u32,
    pub batch_bin_len: u32,
}

impl B3dmLayout {
    pub fn parse(bytes: &[u8]) -> Option<(B3dmLayout, &[u8])> {
        if bytes.len() < HEADER_LEN || &bytes[0..4] != b"b3dm" {
            return None;
        }
        let u32_at =
            |off: usize| u32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]]);
        if u32_at(4) != 1 {
            return None;
        }
        let layout = B3dmLayout {
            byte_length: u32_at(8),
            feature_json_len: u32_at(12),
            feature_bin_len: u32_at(16),
            batch_json_len: u32_at(20),
            batch_bin_len: u32_at(24),
        };
        let glb_offset = HEADER_LEN
            + (layout.feature_json_len
                + layout.feature_bin_len
                + layout.batch_json_len
                + layout.batch_bin_len) as usize;
        if bytes.len() < glb_offset || layout.byte_length as usize != bytes.len() {
            return None;
        }
        Some((layout, &bytes[glb_offset..]))
    }
}
