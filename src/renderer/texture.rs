// renderer/texture.rs

use std::path::Path;
use std::sync::Arc;

use crate::asset::next_resource_id;
use crate::error::RenderError;
use crate::renderer::backend::{
    CompareFunc, DataType, InternalFormat, PixelFormat, TexelFormat, TextureFilter, TextureTarget,
    TextureWrap,
};
use crate::renderer::render_target::RenderTarget;

/// CPU pixel buffer. `depth` is the layer count of 3D and array images, 1 otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub data: Vec<u8>,
    pub format: TexelFormat,
}

impl Image {
    pub fn from_rgba8(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            depth: 1,
            data,
            format: TexelFormat::RGBA8,
        }
    }

    /// RGBA float data stored as half floats.
    pub fn from_rgba_f32(width: u32, height: u32, data: &[f32]) -> Self {
        let halves: Vec<half::f16> = data.iter().map(|&v| half::f16::from_f32(v)).collect();
        Self {
            width,
            height,
            depth: 1,
            data: bytemuck::cast_slice(&halves).to_vec(),
            format: TexelFormat::RGBA16F,
        }
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    /// Decodes a PNG/JPEG/... file into RGBA8.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RenderError> {
        let path = path.as_ref();
        log::info!("Loading image: {:?}", path);
        let img = image::open(path)
            .map_err(|e| RenderError::resource(format!("Failed to load image {:?}: {}", path, e)))?;
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        let image = Self::from_rgba8(width, height, rgba.into_raw());
        image.validate()?;
        Ok(image)
    }

    /// Decodes an in-memory encoded image into RGBA8.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RenderError> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| RenderError::resource(format!("Failed to decode image: {}", e)))?;
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        let image = Self::from_rgba8(width, height, rgba.into_raw());
        image.validate()?;
        Ok(image)
    }

    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.depth as usize * self.format.bytes_per_texel()
    }

    pub fn validate(&self) -> Result<(), RenderError> {
        if self.width == 0 || self.height == 0 || self.depth == 0 {
            return Err(RenderError::resource(format!(
                "image has zero size ({}x{}x{})",
                self.width, self.height, self.depth
            )));
        }
        if self.data.len() < self.byte_len() {
            return Err(RenderError::resource(format!(
                "image data is {} bytes, {}x{}x{} {:?} needs {}",
                self.data.len(),
                self.width,
                self.height,
                self.depth,
                self.format.internal,
                self.byte_len()
            )));
        }
        Ok(())
    }

    /// Rows in bottom-to-top order, per layer.
    pub fn flipped_y(&self) -> Vec<u8> {
        let row = self.width as usize * self.format.bytes_per_texel();
        let layer = row * self.height as usize;
        let mut out = Vec::with_capacity(self.data.len());
        for chunk in self.data.chunks(layer.max(1)) {
            for line in chunk.chunks(row.max(1)).rev() {
                out.extend_from_slice(line);
            }
        }
        out
    }

    /// Color channels multiplied by alpha. Only 8-bit RGBA data is converted.
    pub fn premultiplied(&self, data: &[u8]) -> Option<Vec<u8>> {
        if self.format != TexelFormat::RGBA8 {
            return None;
        }
        let mut out = data.to_vec();
        for px in out.chunks_exact_mut(4) {
            let a = px[3] as u16;
            for c in &mut px[..3] {
                *c = ((*c as u16 * a + 127) / 255) as u8;
            }
        }
        Some(out)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompressedMip {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Which texture of a render target an aliasing texture reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetAttachment {
    Color(u32),
    Depth,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TextureSource {
    /// Storage only; the size must come from a render target.
    Empty,
    Image(Arc<Image>),
    /// +X, -X, +Y, -Y, +Z, -Z.
    Cube([Arc<Image>; 6]),
    Compressed {
        format: InternalFormat,
        mips: Vec<CompressedMip>,
    },
    /// 3D texture, or a 2D array when `array` is set.
    Volume { image: Arc<Image>, array: bool },
    Depth {
        width: u32,
        height: u32,
        stencil: bool,
    },
    /// Reads a texture owned by a render target.
    RenderTarget {
        target: u64,
        attachment: TargetAttachment,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColorSpace {
    #[default]
    Linear,
    Srgb,
}

/// How environment textures are sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureMapping {
    #[default]
    Uv,
    CubeReflection,
    CubeRefraction,
    EquirectReflection,
    EquirectRefraction,
    /// PMREM cube-UV atlas.
    CubeUvReflection,
}

impl TextureMapping {
    pub fn is_cube(self) -> bool {
        matches!(self, TextureMapping::CubeReflection | TextureMapping::CubeRefraction)
    }

    pub fn is_refraction(self) -> bool {
        matches!(
            self,
            TextureMapping::CubeRefraction | TextureMapping::EquirectRefraction
        )
    }
}

#[derive(Debug)]
pub struct Texture {
    id: u64,
    pub name: String,
    pub source: TextureSource,
    pub wrap_s: TextureWrap,
    pub wrap_t: TextureWrap,
    pub wrap_r: TextureWrap,
    pub mag_filter: TextureFilter,
    pub min_filter: TextureFilter,
    pub anisotropy: f32,
    pub generate_mipmaps: bool,
    pub color_space: ColorSpace,
    pub mapping: TextureMapping,
    pub flip_y: bool,
    pub premultiply_alpha: bool,
    pub unpack_alignment: i32,
    /// Depth comparison for shadow samplers.
    pub compare: Option<CompareFunc>,
    /// Face size of a PMREM cube-UV atlas.
    pub cube_uv_size: Option<u32>,
    version: u64,
}

impl Clone for Texture {
    fn clone(&self) -> Self {
        Self {
            id: next_resource_id(),
            name: self.name.clone(),
            source: self.source.clone(),
            wrap_s: self.wrap_s,
            wrap_t: self.wrap_t,
            wrap_r: self.wrap_r,
            mag_filter: self.mag_filter,
            min_filter: self.min_filter,
            anisotropy: self.anisotropy,
            generate_mipmaps: self.generate_mipmaps,
            color_space: self.color_space,
            mapping: self.mapping,
            flip_y: self.flip_y,
            premultiply_alpha: self.premultiply_alpha,
            unpack_alignment: self.unpack_alignment,
            compare: self.compare,
            cube_uv_size: self.cube_uv_size,
            version: self.version,
        }
    }
}

impl Texture {
    pub fn new(source: TextureSource) -> Self {
        let mapping = match source {
            TextureSource::Cube(_) => TextureMapping::CubeReflection,
            _ => TextureMapping::Uv,
        };
        let depth = matches!(source, TextureSource::Depth { .. });
        Self {
            id: next_resource_id(),
            name: String::new(),
            source,
            wrap_s: TextureWrap::ClampToEdge,
            wrap_t: TextureWrap::ClampToEdge,
            wrap_r: TextureWrap::ClampToEdge,
            mag_filter: if depth { TextureFilter::Nearest } else { TextureFilter::Linear },
            min_filter: if depth {
                TextureFilter::Nearest
            } else {
                TextureFilter::LinearMipmapLinear
            },
            anisotropy: 1.0,
            generate_mipmaps: !depth,
            color_space: ColorSpace::Linear,
            mapping,
            flip_y: false,
            premultiply_alpha: false,
            unpack_alignment: 4,
            compare: None,
            cube_uv_size: None,
            version: 0,
        }
    }

    pub fn from_image(image: Image) -> Self {
        Self::new(TextureSource::Image(Arc::new(image)))
    }

    /// Shares `image` with other textures; they share one backend texture when their
    /// sampling parameters match.
    pub fn from_shared(image: Arc<Image>) -> Self {
        Self::new(TextureSource::Image(image))
    }

    pub fn cube(faces: [Arc<Image>; 6]) -> Self {
        Self::new(TextureSource::Cube(faces))
    }

    pub fn depth(width: u32, height: u32, stencil: bool) -> Self {
        Self::new(TextureSource::Depth {
            width,
            height,
            stencil,
        })
    }

    pub fn volume(image: Image, array: bool) -> Self {
        Self::new(TextureSource::Volume {
            image: Arc::new(image),
            array,
        })
    }

    pub fn compressed(format: InternalFormat, mips: Vec<CompressedMip>) -> Self {
        let mut texture = Self::new(TextureSource::Compressed { format, mips });
        texture.generate_mipmaps = false;
        texture
    }

    /// Aliases a texture of `target`, e.g. to sample a rendered image on a material.
    pub fn from_render_target(target: &RenderTarget, attachment: TargetAttachment) -> Self {
        let mut texture = Self::new(TextureSource::RenderTarget {
            target: target.id(),
            attachment,
        });
        texture.generate_mipmaps = false;
        texture.min_filter = TextureFilter::Linear;
        if target.cube {
            texture.mapping = TextureMapping::CubeReflection;
        }
        texture
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_wrap(mut self, wrap: TextureWrap) -> Self {
        self.wrap_s = wrap;
        self.wrap_t = wrap;
        self.wrap_r = wrap;
        self
    }

    pub fn with_filters(mut self, mag: TextureFilter, min: TextureFilter) -> Self {
        self.mag_filter = mag;
        self.min_filter = min;
        self
    }

    pub fn with_color_space(mut self, color_space: ColorSpace) -> Self {
        self.color_space = color_space;
        self
    }

    pub fn with_mapping(mut self, mapping: TextureMapping) -> Self {
        self.mapping = mapping;
        self
    }

    pub fn with_anisotropy(mut self, anisotropy: f32) -> Self {
        self.anisotropy = anisotropy;
        self
    }

    pub fn without_mipmaps(mut self) -> Self {
        self.generate_mipmaps = false;
        self.min_filter = self.min_filter.without_mipmaps();
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Marks pixel data or sampling parameters as changed.
    pub fn needs_update(&mut self) {
        self.version += 1;
    }

    pub fn target(&self) -> TextureTarget {
        match &self.source {
            TextureSource::Cube(_) => TextureTarget::CubeMap,
            TextureSource::Volume { array: false, .. } => TextureTarget::Texture3D,
            TextureSource::Volume { array: true, .. } => TextureTarget::Texture2DArray,
            _ => TextureTarget::Texture2D,
        }
    }

    /// Base level size as (width, height, depth); `None` for render-target aliases and
    /// empty textures.
    pub fn size(&self) -> Option<(u32, u32, u32)> {
        match &self.source {
            TextureSource::Image(image) => Some((image.width, image.height, 1)),
            TextureSource::Cube(faces) => Some((faces[0].width, faces[0].height, 1)),
            TextureSource::Compressed { mips, .. } => mips.first().map(|m| (m.width, m.height, 1)),
            TextureSource::Volume { image, .. } => Some((image.width, image.height, image.depth)),
            TextureSource::Depth { width, height, .. } => Some((*width, *height, 1)),
            TextureSource::Empty | TextureSource::RenderTarget { .. } => None,
        }
    }

    pub fn is_power_of_two(&self) -> bool {
        self.size()
            .map(|(w, h, _)| w.is_power_of_two() && h.is_power_of_two())
            .unwrap_or(true)
    }

    /// Storage format after applying the color space.
    pub fn texel_format(&self) -> TexelFormat {
        let base = match &self.source {
            TextureSource::Image(image) | TextureSource::Volume { image, .. } => image.format,
            TextureSource::Cube(faces) => faces[0].format,
            TextureSource::Depth { stencil: true, .. } => TexelFormat {
                internal: InternalFormat::Depth24Stencil8,
                format: PixelFormat::DepthStencil,
                data_type: DataType::UnsignedInt248,
            },
            TextureSource::Depth { stencil: false, .. } => TexelFormat {
                internal: InternalFormat::DepthComponent24,
                format: PixelFormat::DepthComponent,
                data_type: DataType::UnsignedInt,
            },
            _ => TexelFormat::RGBA8,
        };
        if self.color_space == ColorSpace::Srgb && base.internal == InternalFormat::Rgba8 {
            TexelFormat {
                internal: InternalFormat::Srgb8Alpha8,
                ..base
            }
        } else {
            base
        }
    }

    pub fn validate(&self) -> Result<(), RenderError> {
        match &self.source {
            TextureSource::Image(image) | TextureSource::Volume { image, .. } => image.validate(),
            TextureSource::Cube(faces) => {
                for face in faces.iter() {
                    face.validate()?;
                    if face.width != face.height || face.width != faces[0].width {
                        return Err(RenderError::resource(
                            "cube faces must be square and equally sized",
                        ));
                    }
                }
                Ok(())
            }
            TextureSource::Compressed { mips, .. } if mips.is_empty() => {
                Err(RenderError::resource("compressed texture has no mip levels"))
            }
            TextureSource::Depth { width, height, .. } if *width == 0 || *height == 0 => {
                Err(RenderError::resource("depth texture has zero size"))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_data_is_rejected() {
        let image = Image::from_rgba8(4, 4, vec![0; 10]);
        assert!(image.validate().is_err());
        let empty = Image::from_rgba8(0, 4, vec![]);
        assert!(empty.validate().is_err());
    }

    #[test]
    fn flip_reverses_rows() {
        let image = Image::from_rgba8(1, 2, vec![1, 1, 1, 1, 2, 2, 2, 2]);
        assert_eq!(image.flipped_y(), vec![2, 2, 2, 2, 1, 1, 1, 1]);
    }

    #[test]
    fn premultiply_scales_color() {
        let image = Image::from_rgba8(1, 1, vec![255, 128, 0, 128]);
        let out = image.premultiplied(&image.data).unwrap();
        assert_eq!(out, vec![128, 64, 0, 128]);
    }

    #[test]
    fn srgb_images_use_srgb_storage() {
        let texture = Texture::from_image(Image::from_rgba8(2, 2, vec![0; 16]))
            .with_color_space(ColorSpace::Srgb);
        assert_eq!(texture.texel_format().internal, InternalFormat::Srgb8Alpha8);
    }

    #[test]
    fn npot_detection() {
        let texture = Texture::from_image(Image::from_rgba8(3, 4, vec![0; 48]));
        assert!(!texture.is_power_of_two());
        assert_eq!(texture.target(), TextureTarget::Texture2D);
    }

    #[test]
    fn decodes_png_bytes() {
        let mut png = Vec::new();
        image::RgbaImage::from_pixel(2, 3, image::Rgba([10, 20, 30, 255]))
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        let decoded = Image::from_bytes(&png).unwrap();
        assert_eq!((decoded.width, decoded.height), (2, 3));
        assert_eq!(&decoded.data[..4], &[10, 20, 30, 255]);
    }
}
