use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::RenderError;
use crate::renderer::backend::{
    Attachment, Backend, ClearFlags, DataType, FramebufferId, FramebufferTarget, ImageTarget,
    InternalFormat, PixelFormat, PixelStore, Rect, RenderbufferId, TexParam, TexelFormat,
    TextureFilter, TextureId, TextureTarget, TextureWrap,
};
use crate::renderer::render_target::{RenderTarget, TargetTexture};
use crate::renderer::state::StateCache;
use crate::renderer::texture::{Image, TargetAttachment, Texture, TextureSource};

/// Identity of the backend texture behind a descriptor. Textures built from the same
/// shared image with identical sampling reuse one backend texture.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum SourceKey {
    Shared(usize, String),
    Unique(u64),
}

#[derive(Debug)]
struct GpuTexture {
    texture: TextureId,
    target: TextureTarget,
    format: TexelFormat,
    size: (u32, u32, u32),
    users: usize,
    uploaded_by: Option<(u64, u64)>,
}

#[derive(Debug)]
struct Multisample {
    framebuffer: FramebufferId,
    color: Vec<RenderbufferId>,
    depth: Option<RenderbufferId>,
}

/// Backend objects of one [`RenderTarget`].
#[derive(Debug)]
pub(crate) struct GpuRenderTarget {
    version: u64,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) framebuffer: FramebufferId,
    pub(crate) color: Vec<TextureId>,
    formats: Vec<TargetTexture>,
    pub(crate) depth_texture: Option<TextureId>,
    depth_renderbuffer: Option<RenderbufferId>,
    multisample: Option<Multisample>,
    pub(crate) cube: bool,
    array: bool,
    attached: (u8, u32),
}

impl GpuRenderTarget {
    pub(crate) fn color_target(&self) -> TextureTarget {
        if self.cube {
            TextureTarget::CubeMap
        } else if self.array {
            TextureTarget::Texture2DArray
        } else {
            TextureTarget::Texture2D
        }
    }

    pub(crate) fn format(&self) -> TexelFormat {
        self.formats.first().map(|t| t.format).unwrap_or(TexelFormat::RGBA8)
    }

    fn objects(&self) -> usize {
        self.color.len() + self.depth_texture.is_some() as usize
    }
}

/// Uploads textures, allocates texture units per draw and owns render-target
/// framebuffers.
#[derive(Default)]
pub(crate) struct TextureManager {
    sources: HashMap<SourceKey, GpuTexture>,
    textures: HashMap<u64, SourceKey>,
    targets: HashMap<u64, GpuRenderTarget>,
    next_unit: u32,
    warned: HashSet<(u64, &'static str)>,
    pub(crate) warn_on_npot: bool,
    pub(crate) warn_once: bool,
    /// Capability clamps since the last `take_capability_warnings`.
    capability_warnings: u32,
}

impl TextureManager {
    pub(crate) fn new(warn_on_npot: bool, warn_once: bool) -> Self {
        Self {
            sources: HashMap::new(),
            textures: HashMap::new(),
            targets: HashMap::new(),
            next_unit: 0,
            warned: HashSet::new(),
            warn_on_npot,
            warn_once,
            capability_warnings: 0,
        }
    }

    /// Live backend textures, render-target attachments included.
    pub(crate) fn len(&self) -> usize {
        self.sources.len() + self.targets.values().map(GpuRenderTarget::objects).sum::<usize>()
    }

    pub(crate) fn take_capability_warnings(&mut self) -> u32 {
        std::mem::take(&mut self.capability_warnings)
    }

    fn capability_warning(&mut self, resource: u64, feature: &'static str, message: String) {
        self.capability_warnings += 1;
        if !self.warn_once || self.warned.insert((resource, feature)) {
            log::warn!("{}", message);
        }
    }

    pub(crate) fn reset_units(&mut self) {
        self.next_unit = 0;
    }

    pub(crate) fn allocate_unit(&mut self, max_units: u32) -> u32 {
        let unit = self.next_unit;
        if unit >= max_units {
            self.capability_warning(
                0,
                "texture_units",
                format!(
                    "Trying to use {} texture units while this backend supports only {}",
                    unit + 1,
                    max_units
                ),
            );
        }
        self.next_unit += 1;
        unit
    }

    /// Uploads `texture` if needed and binds it to `unit`. Render-target aliases bind
    /// the target's texture, which must have been set up already.
    pub(crate) fn bind(
        &mut self,
        backend: &mut dyn Backend,
        state: &mut StateCache,
        texture: &Texture,
        unit: u32,
    ) -> Result<(), RenderError> {
        if let TextureSource::RenderTarget { target, attachment } = texture.source {
            return self.bind_target_attachment(backend, state, target, attachment, unit);
        }
        self.upload(backend, state, texture, unit)?;
        let gpu = self
            .textures
            .get(&texture.id())
            .and_then(|key| self.sources.get(key))
            .map(|gpu| (gpu.target, gpu.texture));
        if let Some((target, id)) = gpu {
            state.bind_texture(backend, unit, target, Some(id));
        }
        Ok(())
    }

    pub(crate) fn bind_target_attachment(
        &mut self,
        backend: &mut dyn Backend,
        state: &mut StateCache,
        target: u64,
        attachment: TargetAttachment,
        unit: u32,
    ) -> Result<(), RenderError> {
        let Some(gpu) = self.targets.get(&target) else {
            state.bind_texture(backend, unit, TextureTarget::Texture2D, None);
            return Err(RenderError::resource(format!(
                "render target {} has not been rendered to yet",
                target
            )));
        };
        let (texture_target, id) = match attachment {
            TargetAttachment::Color(index) => (gpu.color_target(), gpu.color.get(index as usize).copied()),
            TargetAttachment::Depth => (TextureTarget::Texture2D, gpu.depth_texture),
        };
        state.bind_texture(backend, unit, texture_target, id);
        Ok(())
    }

    /// Binds nothing to `unit` for a sampler that has no texture this draw.
    pub(crate) fn bind_empty(
        &mut self,
        backend: &mut dyn Backend,
        state: &mut StateCache,
        target: TextureTarget,
        unit: u32,
    ) {
        state.bind_texture(backend, unit, target, None);
    }

    fn source_key(texture: &Texture) -> SourceKey {
        match &texture.source {
            TextureSource::Image(image) => SourceKey::Shared(
                Arc::as_ptr(image) as usize,
                format!(
                    "{:?}{:?}{:?}{:?}{:?}{}{}{}{:?}",
                    texture.wrap_s,
                    texture.wrap_t,
                    texture.mag_filter,
                    texture.min_filter,
                    texture.color_space,
                    texture.generate_mipmaps,
                    texture.flip_y,
                    texture.premultiply_alpha,
                    texture.anisotropy.to_bits()
                ),
            ),
            _ => SourceKey::Unique(texture.id()),
        }
    }

    fn upload(
        &mut self,
        backend: &mut dyn Backend,
        state: &mut StateCache,
        texture: &Texture,
        unit: u32,
    ) -> Result<(), RenderError> {
        let key = Self::source_key(texture);
        let stamp = (texture.id(), texture.version());

        if let Some(previous) = self.textures.get(&texture.id()) {
            if *previous != key {
                let previous = previous.clone();
                self.release_source(backend, state, &previous);
                self.textures.remove(&texture.id());
            }
        }
        if !self.textures.contains_key(&texture.id()) {
            self.textures.insert(texture.id(), key.clone());
            if let Some(gpu) = self.sources.get_mut(&key) {
                gpu.users += 1;
            }
        }

        if let Some(gpu) = self.sources.get(&key) {
            // a shared source uploaded through another texture is current as well
            let current = match gpu.uploaded_by {
                Some((id, version)) => id != texture.id() || version >= texture.version(),
                None => false,
            };
            if current {
                return Ok(());
            }
        }

        texture.validate()?;
        let caps = backend.capabilities().clone();
        let target = texture.target();
        let format = texture.texel_format();
        let size = texture
            .size()
            .ok_or_else(|| RenderError::resource(format!("texture '{}' has no storage", texture.name)))?;

        let recreate = self
            .sources
            .get(&key)
            .map_or(true, |gpu| gpu.target != target || gpu.format != format || gpu.size != size);
        if recreate {
            let users = self.sources.get(&key).map_or(1, |gpu| gpu.users);
            if let Some(old) = self.sources.remove(&key) {
                state.forget_texture(old.texture);
                backend.delete_texture(old.texture);
            }
            let id = backend.create_texture()?;
            log::debug!("Created texture {:?} for '{}' ({:?})", id, texture.name, target);
            self.sources.insert(
                key.clone(),
                GpuTexture {
                    texture: id,
                    target,
                    format,
                    size,
                    users,
                    uploaded_by: None,
                },
            );
        }
        let Some(gpu_id) = self.sources.get(&key).map(|gpu| gpu.texture) else {
            return Err(RenderError::resource("texture storage vanished during upload"));
        };

        state.bind_texture(backend, unit, target, Some(gpu_id));
        backend.pixel_store(PixelStore::UnpackAlignment(texture.unpack_alignment));

        let pot = texture.is_power_of_two();
        let npot_fallback = !pot && !caps.npot_mipmaps;
        if npot_fallback && self.warn_on_npot {
            self.capability_warning(
                texture.id(),
                "npot",
                format!(
                    "Texture '{}' is {}x{} (not a power of two); using clamp and non-mip filtering",
                    texture.name, size.0, size.1
                ),
            );
        }
        let mut uploaded_levels = 1;

        match &texture.source {
            TextureSource::Image(image) => {
                let image = self.clamp_to_max_size(texture.id(), image, caps.max_texture_size);
                let data = prepare_pixels(texture, &image);
                backend.tex_image_2d(
                    ImageTarget::Texture2D,
                    0,
                    format,
                    image.width,
                    image.height,
                    Some(&data),
                );
            }
            TextureSource::Cube(faces) => {
                for (face, image) in faces.iter().enumerate() {
                    let image = self.clamp_to_max_size(texture.id(), image, caps.max_cube_map_size);
                    let data = prepare_pixels(texture, &image);
                    backend.tex_image_2d(
                        ImageTarget::CubeFace(face as u8),
                        0,
                        format,
                        image.width,
                        image.height,
                        Some(&data),
                    );
                }
            }
            TextureSource::Compressed { format: internal, mips } => {
                for (level, mip) in mips.iter().enumerate() {
                    backend.compressed_tex_image_2d(
                        ImageTarget::Texture2D,
                        level as u32,
                        *internal,
                        mip.width,
                        mip.height,
                        &mip.data,
                    );
                }
                uploaded_levels = mips.len();
            }
            TextureSource::Volume { image, .. } => {
                backend.tex_image_3d(
                    target,
                    0,
                    format,
                    image.width,
                    image.height,
                    image.depth,
                    Some(&image.data),
                );
            }
            TextureSource::Depth { width, height, .. } => {
                backend.tex_image_2d(ImageTarget::Texture2D, 0, format, *width, *height, None);
            }
            TextureSource::Empty | TextureSource::RenderTarget { .. } => {}
        }

        let (wrap_s, wrap_t, min_filter) = if npot_fallback {
            (
                TextureWrap::ClampToEdge,
                TextureWrap::ClampToEdge,
                texture.min_filter.without_mipmaps(),
            )
        } else {
            (texture.wrap_s, texture.wrap_t, texture.min_filter)
        };
        let min_filter = if uploaded_levels > 1 || texture.generate_mipmaps || !min_filter.uses_mipmaps() {
            min_filter
        } else {
            min_filter.without_mipmaps()
        };
        let min_filter = if format.internal.is_float() && !caps.float_linear_filtering {
            self.capability_warning(
                texture.id(),
                "float_linear",
                format!("Float texture '{}' cannot be filtered linearly here", texture.name),
            );
            TextureFilter::Nearest
        } else {
            min_filter
        };

        backend.tex_parameter(target, TexParam::WrapS(wrap_s));
        backend.tex_parameter(target, TexParam::WrapT(wrap_t));
        if matches!(target, TextureTarget::CubeMap | TextureTarget::Texture3D | TextureTarget::Texture2DArray) {
            backend.tex_parameter(target, TexParam::WrapR(texture.wrap_r));
        }
        backend.tex_parameter(target, TexParam::MagFilter(texture.mag_filter));
        backend.tex_parameter(target, TexParam::MinFilter(min_filter));
        if uploaded_levels > 1 {
            backend.tex_parameter(target, TexParam::MaxLevel(uploaded_levels as i32 - 1));
        }
        if format.internal.is_depth() {
            backend.tex_parameter(target, TexParam::CompareFunc(texture.compare));
        }
        if texture.anisotropy > 1.0 {
            if caps.max_anisotropy <= 0.0 {
                self.capability_warning(
                    texture.id(),
                    "anisotropy",
                    format!("Anisotropic filtering is unavailable for '{}'", texture.name),
                );
            } else {
                let level = if texture.anisotropy > caps.max_anisotropy {
                    self.capability_warning(
                        texture.id(),
                        "anisotropy",
                        format!(
                            "Anisotropy {} of '{}' clamped to {}",
                            texture.anisotropy, texture.name, caps.max_anisotropy
                        ),
                    );
                    caps.max_anisotropy
                } else {
                    texture.anisotropy
                };
                backend.tex_parameter(target, TexParam::MaxAnisotropy(level));
            }
        }

        if texture.generate_mipmaps && min_filter.uses_mipmaps() && !npot_fallback && uploaded_levels == 1 {
            backend.generate_mipmap(target);
        }

        if let Some(gpu) = self.sources.get_mut(&key) {
            gpu.uploaded_by = Some(stamp);
        }
        Ok(())
    }

    fn clamp_to_max_size<'a>(&mut self, id: u64, image: &'a Arc<Image>, max: u32) -> Cow<'a, Image> {
        if image.width <= max && image.height <= max {
            return Cow::Borrowed(&**image);
        }
        let scale = max as f32 / image.width.max(image.height) as f32;
        let width = ((image.width as f32 * scale).floor() as u32).max(1);
        let height = ((image.height as f32 * scale).floor() as u32).max(1);
        self.capability_warning(
            id,
            "texture_size",
            format!(
                "Image is too big ({}x{}); resized to {}x{}",
                image.width, image.height, width, height
            ),
        );
        if image.format != TexelFormat::RGBA8 {
            return Cow::Borrowed(&**image);
        }
        let Some(buffer) = image::RgbaImage::from_raw(image.width, image.height, image.data.clone()) else {
            return Cow::Borrowed(&**image);
        };
        let resized = image::imageops::resize(&buffer, width, height, image::imageops::FilterType::Triangle);
        Cow::Owned(Image::from_rgba8(width, height, resized.into_raw()))
    }

    fn release_source(&mut self, backend: &mut dyn Backend, state: &mut StateCache, key: &SourceKey) {
        let Some(gpu) = self.sources.get_mut(key) else {
            return;
        };
        gpu.users = gpu.users.saturating_sub(1);
        if gpu.users == 0 {
            if let Some(gpu) = self.sources.remove(key) {
                state.forget_texture(gpu.texture);
                backend.delete_texture(gpu.texture);
            }
        }
    }

    pub(crate) fn dispose_texture(&mut self, backend: &mut dyn Backend, state: &mut StateCache, texture: u64) {
        if let Some(key) = self.textures.remove(&texture) {
            self.release_source(backend, state, &key);
        }
    }

    // ===================================================================================
    // render targets

    pub(crate) fn render_target(&self, id: u64) -> Option<&GpuRenderTarget> {
        self.targets.get(&id)
    }

    /// Creates or rebuilds the framebuffer of `target` when its version or size changed.
    pub(crate) fn setup_render_target(
        &mut self,
        backend: &mut dyn Backend,
        state: &mut StateCache,
        target: &RenderTarget,
    ) -> Result<(), RenderError> {
        if let Some(existing) = self.targets.get(&target.id()) {
            if existing.version == target.version()
                && existing.width == target.width
                && existing.height == target.height
            {
                return Ok(());
            }
        }
        self.dispose_render_target(backend, state, target.id());

        let caps = backend.capabilities().clone();
        let mut formats = target.textures.clone();
        for (index, attachment) in formats.iter_mut().enumerate() {
            let supported = match attachment.format.internal {
                InternalFormat::Rgba16F | InternalFormat::Rgb16F | InternalFormat::R16F => {
                    caps.color_buffer_half_float
                }
                InternalFormat::Rgba32F | InternalFormat::Rgb32F | InternalFormat::R32F => caps.color_buffer_float,
                _ => true,
            };
            if !supported {
                self.capability_warning(
                    target.id(),
                    "color_buffer_float",
                    format!(
                        "Render target {} attachment {} format {:?} is not renderable; using RGBA8",
                        target.id(),
                        index,
                        attachment.format.internal
                    ),
                );
                attachment.format = TexelFormat::RGBA8;
            }
        }
        let max = if target.cube { caps.max_cube_map_size } else { caps.max_texture_size };
        let (width, height) = if target.width > max || target.height > max {
            self.capability_warning(
                target.id(),
                "target_size",
                format!(
                    "Render target {}x{} exceeds the maximum size {}; clamped",
                    target.width, target.height, max
                ),
            );
            (target.width.min(max), target.height.min(max))
        } else {
            (target.width, target.height)
        };
        let samples = if target.samples > caps.max_samples {
            self.capability_warning(
                target.id(),
                "samples",
                format!("{} samples requested, {} supported", target.samples, caps.max_samples),
            );
            caps.max_samples
        } else {
            target.samples
        };

        let framebuffer = backend.create_framebuffer()?;
        state.bind_framebuffer(backend, FramebufferTarget::Framebuffer, Some(framebuffer));

        let array = !target.cube && target.depth > 1;
        let texture_target = if target.cube {
            TextureTarget::CubeMap
        } else if array {
            TextureTarget::Texture2DArray
        } else {
            TextureTarget::Texture2D
        };
        let mut color = Vec::with_capacity(formats.len());
        for (index, attachment) in formats.iter().enumerate() {
            let texture = backend.create_texture()?;
            state.bind_texture(backend, 0, texture_target, Some(texture));
            if target.cube {
                for face in 0..6u8 {
                    backend.tex_image_2d(ImageTarget::CubeFace(face), 0, attachment.format, width, height, None);
                }
            } else if array {
                backend.tex_image_3d(
                    TextureTarget::Texture2DArray,
                    0,
                    attachment.format,
                    width,
                    height,
                    target.depth,
                    None,
                );
            } else {
                backend.tex_image_2d(ImageTarget::Texture2D, 0, attachment.format, width, height, None);
            }
            backend.tex_parameter(texture_target, TexParam::WrapS(attachment.wrap));
            backend.tex_parameter(texture_target, TexParam::WrapT(attachment.wrap));
            backend.tex_parameter(texture_target, TexParam::MagFilter(attachment.mag_filter));
            backend.tex_parameter(texture_target, TexParam::MinFilter(attachment.min_filter));
            if attachment.generate_mipmaps {
                backend.generate_mipmap(texture_target);
            }
            if array {
                backend.framebuffer_texture_layer(Attachment::Color(index as u32), Some(texture), 0, 0);
            } else {
                let image_target = if target.cube { ImageTarget::CubeFace(0) } else { ImageTarget::Texture2D };
                backend.framebuffer_texture_2d(Attachment::Color(index as u32), image_target, Some(texture), 0);
            }
            color.push(texture);
        }
        if formats.len() > 1 {
            backend.draw_buffers(formats.len() as u32);
        }

        let depth_format = if target.stencil_buffer {
            (InternalFormat::Depth24Stencil8, Attachment::DepthStencil)
        } else {
            (InternalFormat::DepthComponent24, Attachment::Depth)
        };
        let mut depth_texture = None;
        let mut depth_renderbuffer = None;
        if target.depth_texture {
            let texture = backend.create_texture()?;
            state.bind_texture(backend, 0, TextureTarget::Texture2D, Some(texture));
            let format = if target.stencil_buffer {
                TexelFormat {
                    internal: InternalFormat::Depth24Stencil8,
                    format: PixelFormat::DepthStencil,
                    data_type: DataType::UnsignedInt248,
                }
            } else {
                TexelFormat {
                    internal: InternalFormat::DepthComponent24,
                    format: PixelFormat::DepthComponent,
                    data_type: DataType::UnsignedInt,
                }
            };
            backend.tex_image_2d(ImageTarget::Texture2D, 0, format, width, height, None);
            backend.tex_parameter(TextureTarget::Texture2D, TexParam::MinFilter(TextureFilter::Nearest));
            backend.tex_parameter(TextureTarget::Texture2D, TexParam::MagFilter(TextureFilter::Nearest));
            backend.framebuffer_texture_2d(depth_format.1, ImageTarget::Texture2D, Some(texture), 0);
            depth_texture = Some(texture);
        } else if target.depth_buffer {
            let renderbuffer = backend.create_renderbuffer()?;
            backend.bind_renderbuffer(Some(renderbuffer));
            backend.renderbuffer_storage(depth_format.0, 0, width, height);
            backend.framebuffer_renderbuffer(depth_format.1, Some(renderbuffer));
            depth_renderbuffer = Some(renderbuffer);
        }

        let multisample = if samples > 0 {
            let framebuffer = backend.create_framebuffer()?;
            state.bind_framebuffer(backend, FramebufferTarget::Framebuffer, Some(framebuffer));
            let mut buffers = Vec::with_capacity(formats.len());
            for (index, attachment) in formats.iter().enumerate() {
                let renderbuffer = backend.create_renderbuffer()?;
                backend.bind_renderbuffer(Some(renderbuffer));
                backend.renderbuffer_storage(attachment.format.internal, samples, width, height);
                backend.framebuffer_renderbuffer(Attachment::Color(index as u32), Some(renderbuffer));
                buffers.push(renderbuffer);
            }
            let depth = if target.depth_buffer {
                let renderbuffer = backend.create_renderbuffer()?;
                backend.bind_renderbuffer(Some(renderbuffer));
                backend.renderbuffer_storage(depth_format.0, samples, width, height);
                backend.framebuffer_renderbuffer(depth_format.1, Some(renderbuffer));
                Some(renderbuffer)
            } else {
                None
            };
            Some(Multisample {
                framebuffer,
                color: buffers,
                depth,
            })
        } else {
            None
        };
        backend.bind_renderbuffer(None);
        state.bind_framebuffer(backend, FramebufferTarget::Framebuffer, None);

        log::debug!(
            "Render target {} ready: {}x{}, {} color attachment(s), {} samples",
            target.id(),
            width,
            height,
            color.len(),
            samples
        );
        self.targets.insert(
            target.id(),
            GpuRenderTarget {
                version: target.version(),
                width: target.width,
                height: target.height,
                framebuffer,
                color,
                formats,
                depth_texture,
                depth_renderbuffer,
                multisample,
                cube: target.cube,
                array,
                attached: (0, 0),
            },
        );
        Ok(())
    }

    /// Framebuffer that draws into `target`; the multisampled one when present. Cube
    /// faces (or array layers) and mip levels are attached on demand.
    pub(crate) fn bind_render_target(
        &mut self,
        backend: &mut dyn Backend,
        state: &mut StateCache,
        target: u64,
        face: u8,
        mip: u32,
    ) -> Option<FramebufferId> {
        let gpu = self.targets.get_mut(&target)?;
        let framebuffer = gpu
            .multisample
            .as_ref()
            .map_or(gpu.framebuffer, |ms| ms.framebuffer);
        state.bind_framebuffer(backend, FramebufferTarget::Framebuffer, Some(framebuffer));
        if gpu.multisample.is_none() && gpu.attached != (face, mip) {
            if let Some(color) = gpu.color.first() {
                if gpu.array {
                    backend.framebuffer_texture_layer(Attachment::Color(0), Some(*color), mip, face as u32);
                } else {
                    let image_target = if gpu.cube { ImageTarget::CubeFace(face) } else { ImageTarget::Texture2D };
                    backend.framebuffer_texture_2d(Attachment::Color(0), image_target, Some(*color), mip);
                }
            }
            gpu.attached = (face, mip);
        }
        Some(framebuffer)
    }

    /// Resolves a multisampled target into its sampleable textures.
    pub(crate) fn update_multisample_render_target(
        &mut self,
        backend: &mut dyn Backend,
        state: &mut StateCache,
        target: u64,
    ) {
        let Some(gpu) = self.targets.get(&target) else {
            return;
        };
        let Some(ms) = &gpu.multisample else {
            return;
        };
        let rect = Rect::new(0, 0, gpu.width as i32, gpu.height as i32);
        state.bind_framebuffer(backend, FramebufferTarget::Read, Some(ms.framebuffer));
        state.bind_framebuffer(backend, FramebufferTarget::Draw, Some(gpu.framebuffer));
        let mut mask = ClearFlags::COLOR;
        if gpu.depth_renderbuffer.is_some() || gpu.depth_texture.is_some() {
            mask |= ClearFlags::DEPTH;
        }
        backend.blit_framebuffer(rect, rect, mask, false);
        state.bind_framebuffer(backend, FramebufferTarget::Read, None);
        state.bind_framebuffer(backend, FramebufferTarget::Draw, Some(ms.framebuffer));
    }

    pub(crate) fn update_render_target_mipmap(
        &mut self,
        backend: &mut dyn Backend,
        state: &mut StateCache,
        target: u64,
    ) {
        let Some(gpu) = self.targets.get(&target) else {
            return;
        };
        let texture_target = gpu.color_target();
        for (texture, format) in gpu.color.iter().zip(&gpu.formats) {
            if format.generate_mipmaps && format.min_filter.uses_mipmaps() {
                state.bind_texture(backend, 0, texture_target, Some(*texture));
                backend.generate_mipmap(texture_target);
            }
        }
    }

    pub(crate) fn dispose_render_target(&mut self, backend: &mut dyn Backend, state: &mut StateCache, target: u64) {
        let Some(gpu) = self.targets.remove(&target) else {
            return;
        };
        state.forget_framebuffer(gpu.framebuffer);
        backend.delete_framebuffer(gpu.framebuffer);
        for texture in gpu.color.iter().chain(gpu.depth_texture.as_ref()) {
            state.forget_texture(*texture);
            backend.delete_texture(*texture);
        }
        if let Some(renderbuffer) = gpu.depth_renderbuffer {
            backend.delete_renderbuffer(renderbuffer);
        }
        if let Some(ms) = gpu.multisample {
            state.forget_framebuffer(ms.framebuffer);
            backend.delete_framebuffer(ms.framebuffer);
            for renderbuffer in ms.color.into_iter().chain(ms.depth) {
                backend.delete_renderbuffer(renderbuffer);
            }
        }
    }

    /// Drops every table without backend calls; the objects died with the context.
    pub(crate) fn forget_all(&mut self) {
        self.sources.clear();
        self.textures.clear();
        self.targets.clear();
        self.next_unit = 0;
    }

    pub(crate) fn dispose_all(&mut self, backend: &mut dyn Backend, state: &mut StateCache) {
        let targets: Vec<u64> = self.targets.keys().copied().collect();
        for target in targets {
            self.dispose_render_target(backend, state, target);
        }
        for (_, gpu) in self.sources.drain() {
            state.forget_texture(gpu.texture);
            backend.delete_texture(gpu.texture);
        }
        self.textures.clear();
    }
}

fn prepare_pixels<'a>(texture: &Texture, image: &'a Image) -> Cow<'a, [u8]> {
    let mut data = Cow::Borrowed(image.data.as_slice());
    if texture.flip_y {
        data = Cow::Owned(image.flipped_y());
    }
    if texture.premultiply_alpha {
        if let Some(premultiplied) = image.premultiplied(&data) {
            data = Cow::Owned(premultiplied);
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::{Call, Capabilities, RecordingBackend};

    fn rgba(width: u32, height: u32) -> Image {
        Image::from_rgba8(width, height, vec![255; (width * height * 4) as usize])
    }

    #[test]
    fn uploads_once_and_generates_mipmaps() {
        let mut backend = RecordingBackend::default();
        let mut state = StateCache::new();
        let mut textures = TextureManager::new(false, true);
        let texture = Texture::from_image(rgba(4, 4));

        textures.bind(&mut backend, &mut state, &texture, 0).unwrap();
        textures.bind(&mut backend, &mut state, &texture, 0).unwrap();
        assert_eq!(backend.count(|c| matches!(c, Call::TexImage2D { .. })), 1);
        assert_eq!(backend.count(|c| matches!(c, Call::GenerateMipmap(_))), 1);
        assert_eq!(textures.len(), 1);
    }

    #[test]
    fn npot_falls_back_without_mipmaps() {
        let caps = Capabilities {
            npot_mipmaps: false,
            ..Default::default()
        };
        let mut backend = RecordingBackend::new(caps);
        let mut state = StateCache::new();
        let mut textures = TextureManager::new(false, true);
        let texture = Texture::from_image(rgba(3, 5)).with_wrap(TextureWrap::Repeat);

        textures.bind(&mut backend, &mut state, &texture, 0).unwrap();
        let calls = backend.calls();
        assert!(calls.contains(&Call::TexParameter(
            TextureTarget::Texture2D,
            TexParam::WrapS(TextureWrap::ClampToEdge)
        )));
        assert!(calls.contains(&Call::TexParameter(
            TextureTarget::Texture2D,
            TexParam::MinFilter(TextureFilter::Linear)
        )));
        assert_eq!(backend.count(|c| matches!(c, Call::GenerateMipmap(_))), 0);
        assert_eq!(textures.take_capability_warnings(), 0);
    }

    #[test]
    fn shared_images_share_one_texture() {
        let mut backend = RecordingBackend::default();
        let mut state = StateCache::new();
        let mut textures = TextureManager::new(false, true);
        let image = Arc::new(rgba(2, 2));
        let a = Texture::from_shared(image.clone());
        let b = Texture::from_shared(image);

        textures.bind(&mut backend, &mut state, &a, 0).unwrap();
        textures.bind(&mut backend, &mut state, &b, 1).unwrap();
        assert_eq!(backend.live_texture_count(), 1);

        textures.dispose_texture(&mut backend, &mut state, a.id());
        assert_eq!(backend.live_texture_count(), 1);
        textures.dispose_texture(&mut backend, &mut state, b.id());
        assert_eq!(backend.live_texture_count(), 0);
    }

    #[test]
    fn version_bump_reuploads() {
        let mut backend = RecordingBackend::default();
        let mut state = StateCache::new();
        let mut textures = TextureManager::new(false, true);
        let mut texture = Texture::from_image(rgba(2, 2));
        textures.bind(&mut backend, &mut state, &texture, 0).unwrap();
        texture.needs_update();
        textures.bind(&mut backend, &mut state, &texture, 0).unwrap();
        textures.bind(&mut backend, &mut state, &texture, 0).unwrap();
        assert_eq!(backend.count(|c| matches!(c, Call::TexImage2D { .. })), 2);
        assert_eq!(backend.count(|c| matches!(c, Call::CreateTexture(_))), 1);
    }

    #[test]
    fn anisotropy_is_clamped_with_warning() {
        let mut backend = RecordingBackend::default();
        let mut state = StateCache::new();
        let mut textures = TextureManager::new(false, true);
        let texture = Texture::from_image(rgba(2, 2)).with_anisotropy(64.0);
        textures.bind(&mut backend, &mut state, &texture, 0).unwrap();
        assert!(backend.calls().contains(&Call::TexParameter(
            TextureTarget::Texture2D,
            TexParam::MaxAnisotropy(16.0)
        )));
        assert_eq!(textures.take_capability_warnings(), 1);
    }

    #[test]
    fn unit_overflow_is_a_capability_warning() {
        let mut textures = TextureManager::new(false, true);
        textures.reset_units();
        assert_eq!(textures.allocate_unit(2), 0);
        assert_eq!(textures.allocate_unit(2), 1);
        textures.allocate_unit(2);
        assert_eq!(textures.take_capability_warnings(), 1);
    }

    #[test]
    fn render_target_is_built_once_and_rebuilt_on_resize() {
        let mut backend = RecordingBackend::default();
        let mut state = StateCache::new();
        let mut textures = TextureManager::new(false, true);
        let mut target = RenderTarget::new(64, 32);

        textures.setup_render_target(&mut backend, &mut state, &target).unwrap();
        textures.setup_render_target(&mut backend, &mut state, &target).unwrap();
        assert_eq!(backend.count(|c| matches!(c, Call::CreateFramebuffer(_))), 1);
        assert_eq!(backend.count(|c| matches!(c, Call::RenderbufferStorage { .. })), 1);

        target.set_size(128, 32);
        textures.setup_render_target(&mut backend, &mut state, &target).unwrap();
        assert_eq!(backend.count(|c| matches!(c, Call::CreateFramebuffer(_))), 2);
        assert_eq!(backend.count(|c| matches!(c, Call::DeleteFramebuffer(_))), 1);
        assert_eq!(textures.render_target(target.id()).map(|t| t.width), Some(128));
    }

    #[test]
    fn multisample_targets_resolve_with_a_blit() {
        let mut backend = RecordingBackend::default();
        let mut state = StateCache::new();
        let mut textures = TextureManager::new(false, true);
        let target = RenderTarget::new(16, 16).with_samples(4);
        textures.setup_render_target(&mut backend, &mut state, &target).unwrap();
        textures.update_multisample_render_target(&mut backend, &mut state, target.id());
        assert_eq!(backend.count(|c| matches!(c, Call::BlitFramebuffer { .. })), 1);
    }
}
