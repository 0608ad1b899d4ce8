/// Raw texture image data, identified by its index in the task's texture
/// list. Payload bytes flow through the texture codec, not the tile model.
#[derive(Debug, Clone)]
pub struct TextureData {
    pub data: Vec<u8>,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
}

/// PBR metallic-roughness material.
#[derive(Debug, Clone)]
pub struct Material {
    pub name: String,
    /// Base color factor [r, g, b, a].
    pub base_color: [f32; 4],
    pub metallic: f32,
    pub roughness: f32,
    /// Index into `MaterialSet::textures`.
    pub base_color_texture: Option<usize>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: String::new(),
            base_color: [1.0, 1.0, 1.0, 1.0],
            metallic: 0.0,
            roughness: 1.0,
            base_color_texture: None,
        }
    }
}

/// Materials and their associated textures for one loaded model.
#[derive(Debug, Clone, Default)]
pub struct MaterialSet {
    pub materials: Vec<Material>,
    pub textures: Vec<TextureData>,
}
