use crate::asset::next_resource_id;
use crate::renderer::backend::{TexelFormat, TextureFilter, TextureWrap};
use crate::renderer::texture::ColorSpace;

/// One color attachment of a [`RenderTarget`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetTexture {
    pub format: TexelFormat,
    pub min_filter: TextureFilter,
    pub mag_filter: TextureFilter,
    pub wrap: TextureWrap,
    pub generate_mipmaps: bool,
    pub color_space: ColorSpace,
}

impl Default for TargetTexture {
    fn default() -> Self {
        Self {
            format: TexelFormat::RGBA8,
            min_filter: TextureFilter::Linear,
            mag_filter: TextureFilter::Linear,
            wrap: TextureWrap::ClampToEdge,
            generate_mipmaps: false,
            color_space: ColorSpace::Linear,
        }
    }
}

/// Off-screen drawing surface. Framebuffers are created lazily by the renderer and
/// rebuilt whenever the version changes (e.g. after `set_size`).
#[derive(Debug)]
pub struct RenderTarget {
    id: u64,
    pub width: u32,
    pub height: u32,
    /// Layer count for array/3D targets.
    pub depth: u32,
    pub textures: Vec<TargetTexture>,
    pub depth_buffer: bool,
    pub stencil_buffer: bool,
    /// Depth is written to a sampleable texture instead of a renderbuffer.
    pub depth_texture: bool,
    pub samples: u32,
    pub cube: bool,
    /// Apply tone mapping and output color space conversion when drawing into it.
    pub tone_mapped: bool,
    version: u64,
}

impl Clone for RenderTarget {
    fn clone(&self) -> Self {
        Self {
            id: next_resource_id(),
            width: self.width,
            height: self.height,
            depth: self.depth,
            textures: self.textures.clone(),
            depth_buffer: self.depth_buffer,
            stencil_buffer: self.stencil_buffer,
            depth_texture: self.depth_texture,
            samples: self.samples,
            cube: self.cube,
            tone_mapped: self.tone_mapped,
            version: self.version,
        }
    }
}

impl RenderTarget {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            id: next_resource_id(),
            width: width.max(1),
            height: height.max(1),
            depth: 1,
            textures: vec![TargetTexture::default()],
            depth_buffer: true,
            stencil_buffer: false,
            depth_texture: false,
            samples: 0,
            cube: false,
            tone_mapped: false,
            version: 0,
        }
    }

    /// A six-face cube target with square faces of `size`.
    pub fn cube(size: u32) -> Self {
        let mut target = Self::new(size, size);
        target.cube = true;
        target
    }

    pub fn with_format(mut self, format: TexelFormat) -> Self {
        for texture in &mut self.textures {
            texture.format = format;
        }
        self
    }

    pub fn with_filters(mut self, mag: TextureFilter, min: TextureFilter) -> Self {
        for texture in &mut self.textures {
            texture.mag_filter = mag;
            texture.min_filter = min;
            texture.generate_mipmaps = min.uses_mipmaps();
        }
        self
    }

    /// Multiple render targets: `count` color attachments sharing the first one's
    /// settings.
    pub fn with_color_attachments(mut self, count: usize) -> Self {
        let first = self.textures.first().copied().unwrap_or_default();
        self.textures.resize(count.max(1), first);
        self
    }

    pub fn with_samples(mut self, samples: u32) -> Self {
        self.samples = samples;
        self
    }

    pub fn with_depth_texture(mut self) -> Self {
        self.depth_buffer = true;
        self.depth_texture = true;
        self
    }

    pub fn with_stencil(mut self) -> Self {
        self.stencil_buffer = true;
        self
    }

    pub fn without_depth(mut self) -> Self {
        self.depth_buffer = false;
        self.stencil_buffer = false;
        self.depth_texture = false;
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn needs_update(&mut self) {
        self.version += 1;
    }

    /// Resizes the attachments. The backing storage is reallocated on next use.
    pub fn set_size(&mut self, width: u32, height: u32) {
        let (width, height) = (width.max(1), height.max(1));
        if self.width != width || self.height != height {
            log::debug!(
                "Render target {} resized {}x{} -> {}x{}",
                self.id,
                self.width,
                self.height,
                width,
                height
            );
            self.width = width;
            self.height = height;
            self.version += 1;
        }
    }

    pub fn generates_mipmaps(&self) -> bool {
        self.textures.iter().any(|t| t.generate_mipmaps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_bumps_version_once() {
        let mut target = RenderTarget::new(64, 64);
        target.set_size(128, 64);
        target.set_size(128, 64);
        assert_eq!(target.version(), 1);
        assert_eq!((target.width, target.height), (128, 64));
    }

    #[test]
    fn mrt_copies_first_attachment() {
        let target = RenderTarget::new(8, 8)
            .with_format(TexelFormat::RGBA16F)
            .with_color_attachments(3);
        assert_eq!(target.textures.len(), 3);
        assert!(target.textures.iter().all(|t| t.format == TexelFormat::RGBA16F));
    }
}
