use glam::{UVec2, Vec2};

use crate::asset::AssetCache;
use crate::error::RenderError;
use crate::renderer::backend::{
    Backend, ClearFlags, DataType, FramebufferTarget, PixelFormat, Rect, TexelFormat, TextureFilter,
};
use crate::renderer::info::RenderInfo;
use crate::renderer::internal::background::BackgroundPass;
use crate::renderer::internal::clipping::Clipping;
use crate::renderer::internal::dispatch::{
    clear_buffers, DrawDispatcher, ErrorLog, ObjectDraw, TransmissionSource, VertexState, ViewState,
};
use crate::renderer::internal::geometries::GeometryManager;
use crate::renderer::internal::programs::ProgramCache;
use crate::renderer::internal::properties::MaterialProperties;
use crate::renderer::internal::render_list::{Bucket, RenderItem, RenderList};
use crate::renderer::internal::shadows::ShadowPipeline;
use crate::renderer::internal::textures::TextureManager;
use crate::renderer::lights::LightsState;
use crate::renderer::material::{Material, Side};
use crate::renderer::render_target::RenderTarget;
use crate::renderer::state::StateCache;
use crate::renderer::geometry::Geometry;
use crate::renderer::texture::Texture;
use crate::scene::{ArrayCamera, Camera, Drawable, Plane, Scene};
use crate::settings::{OutputColorSpace, Precision, RendererSettings, ToneMapping};

const DEFAULT_WIDTH: u32 = 300;
const DEFAULT_HEIGHT: u32 = 150;

/// Render target currently drawn into instead of the default framebuffer.
#[derive(Debug, Clone, Copy)]
struct CurrentTarget {
    id: u64,
    width: u32,
    height: u32,
    tone_mapped: bool,
    face: u8,
    mip: u32,
    samples: u32,
    mipmaps: bool,
}

/// Backend plus every table that outlives a frame. Kept apart from the passes so a
/// [`DrawDispatcher`] can borrow it while the passes are borrowed too.
pub(crate) struct GpuContext<B: Backend> {
    pub(crate) backend: B,
    pub(crate) settings: RendererSettings,
    pub(crate) state: StateCache,
    pub(crate) geometries: GeometryManager,
    pub(crate) textures: TextureManager,
    pub(crate) programs: ProgramCache,
    pub(crate) properties: MaterialProperties,
    pub(crate) vertex: VertexState,
    pub(crate) info: RenderInfo,
    pub(crate) errors: ErrorLog,
    pub(crate) lights: LightsState,
    pub(crate) clipping: Clipping,
    pub(crate) precision: Precision,
}

impl<B: Backend> GpuContext<B> {
    pub(crate) fn dispatcher<'a>(&'a mut self, textures: &'a AssetCache<Texture>) -> DrawDispatcher<'a> {
        let frame = self.info.frame;
        DrawDispatcher {
            backend: &mut self.backend,
            state: &mut self.state,
            geometries: &mut self.geometries,
            textures: &mut self.textures,
            programs: &mut self.programs,
            properties: &mut self.properties,
            vertex: &mut self.vertex,
            info: &mut self.info,
            errors: &mut self.errors,
            lights: &self.lights,
            settings: &self.settings,
            clipping: &self.clipping,
            texture_assets: textures,
            precision: self.precision,
            frame,
        }
    }

    fn forget_all(&mut self) {
        self.geometries.forget_all();
        self.textures.forget_all();
        self.programs.forget_all();
        self.properties.clear();
        self.vertex.reset();
        self.errors.clear();
        self.state.reset(&mut self.backend);
    }
}

/// Retained-mode renderer over a GL-style [`Backend`].
///
/// Owns every GPU-side table; scenes, descriptors and render targets stay with the
/// caller and are uploaded lazily the first time a frame needs them.
pub struct Renderer<B: Backend> {
    gpu: GpuContext<B>,
    render_list: RenderList,
    shadows: ShadowPipeline,
    background: BackgroundPass,
    width: u32,
    height: u32,
    pixel_ratio: f32,
    viewport: Rect,
    scissor: Rect,
    scissor_test: bool,
    current: Option<CurrentTarget>,
    transmission: Option<RenderTarget>,
    context_lost: bool,
    generation: u64,
}

impl<B: Backend> Renderer<B> {
    pub fn new(backend: B, settings: RendererSettings) -> Self {
        let settings = settings.validate();
        let capabilities = backend.capabilities();
        log::info!(
            "Renderer backend: {:?}, max texture size {}, {} texture units, {} max samples",
            capabilities.glsl,
            capabilities.max_texture_size,
            capabilities.max_texture_units,
            capabilities.max_samples
        );
        let precision = settings.precision.supported(capabilities.precision);
        let textures = TextureManager::new(settings.warn_on_npot, settings.log_capability_once);
        let clipping = Clipping {
            global: Vec::new(),
            local_enabled: settings.local_clipping,
        };
        let pixel_ratio = settings.pixel_ratio;
        let full = Rect::new(0, 0, DEFAULT_WIDTH as i32, DEFAULT_HEIGHT as i32);

        Self {
            gpu: GpuContext {
                backend,
                settings,
                state: StateCache::new(),
                geometries: GeometryManager::default(),
                textures,
                programs: ProgramCache::default(),
                properties: MaterialProperties::default(),
                vertex: VertexState::default(),
                info: RenderInfo::new(),
                errors: ErrorLog::default(),
                lights: LightsState::new(),
                clipping,
                precision,
            },
            render_list: RenderList::default(),
            shadows: ShadowPipeline::new(),
            background: BackgroundPass::default(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            pixel_ratio,
            viewport: full,
            scissor: full,
            scissor_test: false,
            current: None,
            transmission: None,
            context_lost: false,
            generation: 0,
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.set_size(width, height);
        self
    }

    pub fn backend(&self) -> &B {
        &self.gpu.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.gpu.backend
    }

    pub fn settings(&self) -> &RendererSettings {
        &self.gpu.settings
    }

    pub fn info(&self) -> &RenderInfo {
        &self.gpu.info
    }

    pub fn info_mut(&mut self) -> &mut RenderInfo {
        &mut self.gpu.info
    }

    pub fn size(&self) -> UVec2 {
        UVec2::new(self.width, self.height)
    }

    pub fn pixel_ratio(&self) -> f32 {
        self.pixel_ratio
    }

    /// Size of the default framebuffer in device pixels.
    pub fn drawing_buffer_size(&self) -> UVec2 {
        UVec2::new(
            ((self.width as f32 * self.pixel_ratio).floor() as u32).max(1),
            ((self.height as f32 * self.pixel_ratio).floor() as u32).max(1),
        )
    }

    /// Resizes the drawing area and resets viewport and scissor to cover it.
    pub fn set_size(&mut self, width: u32, height: u32) {
        let (width, height) = (width.max(1), height.max(1));
        if (width, height) != (self.width, self.height) {
            log::debug!("Renderer resized {}x{} -> {}x{}", self.width, self.height, width, height);
        }
        self.width = width;
        self.height = height;
        let full = Rect::new(0, 0, width as i32, height as i32);
        self.viewport = full;
        self.scissor = full;
    }

    pub fn set_pixel_ratio(&mut self, ratio: f32) {
        if !ratio.is_finite() || ratio <= 0.0 {
            log::warn!("Ignoring pixel ratio {}", ratio);
            return;
        }
        self.pixel_ratio = ratio;
        self.gpu.settings.pixel_ratio = ratio;
    }

    /// Viewport in CSS pixels, scaled by the pixel ratio when drawing to the screen.
    pub fn set_viewport(&mut self, viewport: Rect) {
        self.viewport = viewport;
    }

    pub fn viewport(&self) -> Rect {
        self.viewport
    }

    pub fn set_scissor(&mut self, scissor: Rect) {
        self.scissor = scissor;
    }

    pub fn set_scissor_test(&mut self, enabled: bool) {
        self.scissor_test = enabled;
        self.gpu.state.set_scissor_test(&mut self.gpu.backend, enabled);
    }

    pub fn set_clear_color(&mut self, color: [f32; 4]) {
        self.gpu.settings.clear_color = color.map(|c| if c.is_finite() { c.clamp(0.0, 1.0) } else { 0.0 });
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.gpu.settings.clear_color
    }

    pub fn set_auto_clear(&mut self, enabled: bool) {
        self.gpu.settings.auto_clear.enabled = enabled;
    }

    pub fn set_sort_objects(&mut self, sort: bool) {
        self.gpu.settings.sort_objects = sort;
    }

    /// Renderer-wide clip planes in world space, applied to every material.
    pub fn set_clipping_planes(&mut self, planes: Vec<Plane>) {
        self.gpu.clipping.global = planes;
    }

    pub fn set_local_clipping(&mut self, enabled: bool) {
        self.gpu.clipping.local_enabled = enabled;
        self.gpu.settings.local_clipping = enabled;
    }

    pub fn set_tone_mapping(&mut self, tone_mapping: ToneMapping, exposure: f32) {
        self.gpu.settings.tone_mapping = tone_mapping;
        if exposure.is_finite() && exposure >= 0.0 {
            self.gpu.settings.tone_mapping_exposure = exposure;
        }
    }

    pub fn is_context_lost(&self) -> bool {
        self.context_lost
    }

    /// Marks the context as lost; rendering stops until it is restored.
    pub fn notify_context_lost(&mut self) {
        if !self.context_lost {
            log::warn!("Graphics context lost");
        }
        self.context_lost = true;
    }

    /// Drops every cached GPU object. Resources upload again on the next frame.
    pub fn notify_context_restored(&mut self) {
        log::info!("Graphics context restored; dropping cached GPU state");
        self.context_lost = false;
        self.gpu.forget_all();
        self.shadows.forget_all();
        self.transmission = None;
        if let Some(current) = self.current.take() {
            log::warn!("Render target {} must be set again after a context restore", current.id);
        }
    }

    fn poll_context_lost(&mut self) -> bool {
        if !self.context_lost && self.gpu.backend.is_context_lost() {
            self.notify_context_lost();
        }
        self.context_lost
    }

    /// Directs subsequent renders to `target` (a cube face and mip level of it), or
    /// back to the default framebuffer with `None`.
    pub fn set_render_target(
        &mut self,
        target: Option<&RenderTarget>,
        face: u8,
        mip: u32,
    ) -> Result<(), RenderError> {
        if self.context_lost {
            return Err(RenderError::ContextLost);
        }
        let gpu = &mut self.gpu;
        let Some(target) = target else {
            self.current = None;
            gpu.state
                .bind_framebuffer(&mut gpu.backend, FramebufferTarget::Framebuffer, None);
            return Ok(());
        };
        gpu.textures
            .setup_render_target(&mut gpu.backend, &mut gpu.state, target)?;
        gpu.textures
            .bind_render_target(&mut gpu.backend, &mut gpu.state, target.id(), face, mip);
        self.current = Some(CurrentTarget {
            id: target.id(),
            width: (target.width >> mip).max(1),
            height: (target.height >> mip).max(1),
            tone_mapped: target.tone_mapped,
            face,
            mip,
            samples: target.samples,
            mipmaps: target.generates_mipmaps(),
        });
        Ok(())
    }

    pub fn render_target_id(&self) -> Option<u64> {
        self.current.map(|c| c.id)
    }

    fn bind_current_target(&mut self) {
        let gpu = &mut self.gpu;
        match self.current {
            Some(current) => {
                gpu.textures.bind_render_target(
                    &mut gpu.backend,
                    &mut gpu.state,
                    current.id,
                    current.face,
                    current.mip,
                );
            }
            None => {
                gpu.state
                    .bind_framebuffer(&mut gpu.backend, FramebufferTarget::Framebuffer, None);
            }
        }
    }

    /// Viewport in device pixels of whatever is currently bound.
    fn target_viewport(&self, css: Rect) -> Rect {
        match self.current {
            Some(current) => Rect::new(0, 0, current.width as i32, current.height as i32),
            None => scale_rect(css, self.pixel_ratio),
        }
    }

    fn apply_viewport(&mut self, viewport: Rect) {
        let scissor = match self.current {
            Some(_) => viewport,
            None => scale_rect(self.scissor, self.pixel_ratio),
        };
        let gpu = &mut self.gpu;
        gpu.state.set_viewport(&mut gpu.backend, viewport);
        gpu.state.set_scissor(&mut gpu.backend, scissor);
        gpu.state
            .set_scissor_test(&mut gpu.backend, self.scissor_test && self.current.is_none());
    }

    /// Clears the current target with the configured clear color.
    pub fn clear(&mut self, color: bool, depth: bool, stencil: bool) {
        if self.context_lost {
            return;
        }
        let mut flags = ClearFlags::empty();
        flags.set(ClearFlags::COLOR, color);
        flags.set(ClearFlags::DEPTH, depth);
        flags.set(ClearFlags::STENCIL, stencil);
        self.bind_current_target();
        let viewport = self.target_viewport(self.viewport);
        self.apply_viewport(viewport);
        let clear_color = self.gpu.settings.clear_color;
        clear_buffers(&mut self.gpu.backend, &mut self.gpu.state, Some(clear_color), flags);
    }

    fn begin_frame(&mut self) {
        let info = &mut self.gpu.info;
        info.frame += 1;
        if info.auto_reset {
            info.reset();
        }
    }

    fn end_frame(&mut self) {
        if let Some(current) = self.current {
            let gpu = &mut self.gpu;
            if current.samples > 0 {
                gpu.textures
                    .update_multisample_render_target(&mut gpu.backend, &mut gpu.state, current.id);
            }
            if current.mipmaps {
                gpu.textures
                    .update_render_target_mipmap(&mut gpu.backend, &mut gpu.state, current.id);
            }
            self.bind_current_target();
        }
        let gpu = &mut self.gpu;
        gpu.info.errors.capability += gpu.textures.take_capability_warnings();
        gpu.info.programs = gpu.programs.len();
        gpu.info.geometries = gpu.geometries.len();
        gpu.info.textures = gpu.textures.len();
        log::trace!(
            "Frame {}: {} calls ({} shadow), {} triangles, {} lines, {} points, {} programs",
            gpu.info.frame,
            gpu.info.calls,
            gpu.info.shadow_calls,
            gpu.info.triangles,
            gpu.info.lines,
            gpu.info.points,
            gpu.info.programs
        );
    }

    /// Culls, sorts and draws `scene` as seen by `camera` into the current target.
    pub fn render(&mut self, scene: &mut Scene, camera: &Camera) {
        if self.poll_context_lost() {
            log::trace!("Skipping frame: context lost");
            return;
        }
        scene.update_world_transforms();
        self.begin_frame();
        self.prepare(scene, camera);

        let viewport = self.target_viewport(camera.viewport.unwrap_or(self.viewport));
        self.render_background(scene, camera, viewport);
        self.render_camera(scene, camera, viewport);
        self.end_frame();
    }

    /// Renders every sub-camera of `cameras` into its own viewport. Culling, lights
    /// and shadow maps are shared through the main camera.
    pub fn render_multiview(&mut self, scene: &mut Scene, cameras: &ArrayCamera) {
        if self.poll_context_lost() {
            return;
        }
        scene.update_world_transforms();
        self.begin_frame();
        self.prepare(scene, &cameras.main);

        let full = self.target_viewport(self.viewport);
        self.render_background(scene, &cameras.main, full);
        for camera in &cameras.cameras {
            let viewport = match (camera.viewport, self.current) {
                (Some(rect), None) => scale_rect(rect, self.pixel_ratio),
                (Some(rect), Some(_)) => rect,
                (None, _) => full,
            };
            self.render_camera(scene, camera, viewport);
        }
        self.end_frame();
    }

    /// Builds the render list, renders shadow maps and aggregates the lights.
    fn prepare(&mut self, scene: &Scene, camera: &Camera) {
        self.render_list
            .build(scene, camera, self.gpu.settings.sort_objects);
        {
            let mut dispatch = self.gpu.dispatcher(&scene.assets.textures);
            self.shadows.render(
                &mut dispatch,
                scene,
                &mut self.render_list.lights,
                &self.render_list.casters,
            );
        }
        let physically_correct = self.gpu.settings.physically_correct_lights;
        self.gpu.lights.setup(&self.render_list.lights, physically_correct);
        self.bind_current_target();
    }

    fn view_state(&mut self, scene: &Scene, camera: &Camera, viewport: Rect) -> ViewState {
        self.generation += 1;
        let settings = &self.gpu.settings;
        let tone_mapped = self.current.map_or(true, |c| c.tone_mapped);
        let view = camera.view_matrix();
        self.gpu.lights.setup_view(&view);
        ViewState {
            view,
            projection: camera.projection_matrix(),
            camera_position: camera.position(),
            orthographic: camera.is_orthographic(),
            generation: self.generation,
            fog: scene.fog,
            environment: scene.environment,
            tone_mapping: if tone_mapped {
                settings.tone_mapping
            } else {
                ToneMapping::None
            },
            output_srgb: tone_mapped && settings.output_color_space == OutputColorSpace::Srgb,
            transmission: None,
            shadow_pass: false,
            distance_reference: None,
            drawing_height: viewport.height as f32,
            pixel_ratio: self.pixel_ratio,
        }
    }

    fn render_background(&mut self, scene: &Scene, camera: &Camera, viewport: Rect) {
        self.apply_viewport(viewport);
        let view = self.view_state(scene, camera, viewport);
        let auto_clear = self.gpu.settings.auto_clear;
        let clear_color = self.gpu.settings.clear_color;
        let mut dispatch = self.gpu.dispatcher(&scene.assets.textures);
        self.background
            .render(&mut dispatch, scene.background, &view, &auto_clear, clear_color);
    }

    /// Opaque, then transmissive (after the transmission copy), then transparent.
    fn render_camera(&mut self, scene: &Scene, camera: &Camera, viewport: Rect) {
        let opaque = self.render_list.bucket(Bucket::Opaque);
        let transmissive = self.render_list.bucket(Bucket::Transmissive);
        let transparent = self.render_list.bucket(Bucket::Transparent);

        let mut view = self.view_state(scene, camera, viewport);

        if !transmissive.is_empty() {
            view.transmission = self.render_transmission_pass(scene, &view, &opaque, &transmissive);
            self.bind_current_target();
        }

        self.apply_viewport(viewport);
        let mut dispatch = self.gpu.dispatcher(&scene.assets.textures);
        render_items(&mut dispatch, scene, &opaque, &view, false);
        render_items(&mut dispatch, scene, &transmissive, &view, true);
        render_items(&mut dispatch, scene, &transparent, &view, true);
    }

    /// Draws the opaque objects (and the back faces of double-sided transmissive ones)
    /// into a mipmapped half-float copy that transmissive materials sample.
    fn render_transmission_pass(
        &mut self,
        scene: &Scene,
        view: &ViewState,
        opaque: &[RenderItem],
        transmissive: &[RenderItem],
    ) -> Option<TransmissionSource> {
        let scale = self.gpu.settings.transmission_resolution_scale;
        let buffer = match self.current {
            Some(current) => UVec2::new(current.width, current.height),
            None => self.drawing_buffer_size(),
        };
        let size = UVec2::new(
            ((buffer.x as f32 * scale) as u32).max(1),
            ((buffer.y as f32 * scale) as u32).max(1),
        );

        let capabilities = self.gpu.backend.capabilities();
        let half_float = capabilities.color_buffer_half_float;
        let samples = self.gpu.settings.antialias.min(capabilities.max_samples);
        let target = self.transmission.get_or_insert_with(|| {
            let format = if half_float {
                TexelFormat::RGBA16F
            } else {
                TexelFormat::RGBA8
            };
            log::debug!("Creating {}x{} transmission target", size.x, size.y);
            RenderTarget::new(size.x, size.y)
                .with_format(format)
                .with_filters(TextureFilter::Linear, TextureFilter::LinearMipmapLinear)
                .with_samples(samples)
        });
        target.set_size(size.x, size.y);

        let gpu = &mut self.gpu;
        if !half_float {
            let error = RenderError::Capability(
                "half-float color buffers are unavailable; transmission uses an 8-bit target".to_string(),
            );
            gpu.errors.report(&mut gpu.info, &error);
        }
        if let Err(error) = gpu
            .textures
            .setup_render_target(&mut gpu.backend, &mut gpu.state, target)
        {
            gpu.errors.report(&mut gpu.info, &error);
            return None;
        }
        gpu.textures
            .bind_render_target(&mut gpu.backend, &mut gpu.state, target.id(), 0, 0);
        let full = Rect::new(0, 0, size.x as i32, size.y as i32);
        gpu.state.set_viewport(&mut gpu.backend, full);
        gpu.state.set_scissor_test(&mut gpu.backend, false);
        let clear_color = gpu.settings.clear_color;
        clear_buffers(
            &mut gpu.backend,
            &mut gpu.state,
            Some(clear_color),
            ClearFlags::COLOR | ClearFlags::DEPTH,
        );

        let copy_view = ViewState {
            tone_mapping: ToneMapping::None,
            output_srgb: false,
            transmission: None,
            drawing_height: size.y as f32,
            ..view.clone()
        };
        {
            let mut dispatch = gpu.dispatcher(&scene.assets.textures);
            render_items(&mut dispatch, scene, opaque, &copy_view, false);
            for item in transmissive {
                render_item(&mut dispatch, scene, item, &copy_view, |material| {
                    (material.side == Side::Double).then_some(Side::Back)
                });
            }
        }

        let id = target.id();
        gpu.textures
            .update_multisample_render_target(&mut gpu.backend, &mut gpu.state, id);
        gpu.textures
            .update_render_target_mipmap(&mut gpu.backend, &mut gpu.state, id);
        Some(TransmissionSource {
            target: id,
            size: Vec2::new(size.x as f32, size.y as f32),
        })
    }

    /// Compiles every program the scene needs from `camera` without drawing color.
    /// Shadow maps are rendered so shadow variants match the next frame.
    pub fn compile(&mut self, scene: &mut Scene, camera: &Camera) {
        if self.poll_context_lost() {
            return;
        }
        scene.update_world_transforms();
        self.prepare(scene, camera);
        let viewport = self.target_viewport(camera.viewport.unwrap_or(self.viewport));
        let view = self.view_state(scene, camera, viewport);

        let items: Vec<RenderItem> = [Bucket::Opaque, Bucket::Transmissive, Bucket::Transparent]
            .into_iter()
            .flat_map(|bucket| self.render_list.bucket(bucket))
            .collect();
        let before = self.gpu.programs.len();
        let mut dispatch = self.gpu.dispatcher(&scene.assets.textures);
        for item in &items {
            let Ok(drawable) = scene.world.get::<&Drawable>(item.entity) else {
                continue;
            };
            let (Some(geometry), Some(material)) = (
                scene.assets.geometries.get(item.geometry),
                scene.assets.materials.get(item.material),
            ) else {
                continue;
            };
            let draw = object_draw(item, &drawable, geometry, material, material.side);
            let clip = dispatch.clipping.planes(material, &view.view, false);
            let env = dispatch.env_map(material, &view);
            let inputs = dispatch.program_inputs(&draw, &view, &clip, env);
            dispatch.set_program(material, inputs);
        }
        log::debug!(
            "Compiled scene: {} new programs ({} live)",
            self.gpu.programs.len().saturating_sub(before),
            self.gpu.programs.len()
        );
        self.bind_current_target();
    }

    /// Reads RGBA8 pixels of `rect` from `target`, which must have been rendered to.
    pub fn read_render_target_pixels(
        &mut self,
        target: &RenderTarget,
        rect: Rect,
        out: &mut [u8],
    ) -> Result<(), RenderError> {
        if self.context_lost {
            return Err(RenderError::ContextLost);
        }
        let gpu = &mut self.gpu;
        let Some(resident) = gpu.textures.render_target(target.id()) else {
            return Err(RenderError::resource(format!(
                "render target {} has no framebuffer; render to it first",
                target.id()
            )));
        };
        if rect.x < 0
            || rect.y < 0
            || rect.width <= 0
            || rect.height <= 0
            || (rect.x + rect.width) as u32 > resident.width
            || (rect.y + rect.height) as u32 > resident.height
        {
            return Err(RenderError::resource(format!(
                "read rectangle {:?} is outside the {}x{} target",
                rect, resident.width, resident.height
            )));
        }
        let needed = rect.width as usize * rect.height as usize * 4;
        if out.len() < needed {
            return Err(RenderError::resource(format!(
                "pixel buffer holds {} bytes, {} needed",
                out.len(),
                needed
            )));
        }
        let framebuffer = resident.framebuffer;
        gpu.state
            .bind_framebuffer(&mut gpu.backend, FramebufferTarget::Framebuffer, Some(framebuffer));
        gpu.backend
            .read_pixels(rect, PixelFormat::Rgba, DataType::UnsignedByte, &mut out[..needed]);
        self.bind_current_target();
        Ok(())
    }

    pub fn dispose_geometry(&mut self, geometry: &Geometry) {
        self.gpu.geometries.dispose(&mut self.gpu.backend, geometry.id());
    }

    /// Releases the programs of `material`, including its shadow substitutes.
    pub fn dispose_material(&mut self, material: &Material) {
        let gpu = &mut self.gpu;
        let mut ids = self.shadows.forget_material(material.id());
        ids.push(material.id());
        for id in ids {
            gpu.properties.dispose(&mut gpu.backend, &mut gpu.programs, id);
        }
    }

    pub fn dispose_texture(&mut self, texture: &Texture) {
        let gpu = &mut self.gpu;
        gpu.textures
            .dispose_texture(&mut gpu.backend, &mut gpu.state, texture.id());
    }

    pub fn dispose_render_target(&mut self, target: &RenderTarget) {
        if self.current.is_some_and(|c| c.id == target.id()) {
            self.current = None;
        }
        let gpu = &mut self.gpu;
        gpu.textures
            .dispose_render_target(&mut gpu.backend, &mut gpu.state, target.id());
    }

    /// Deletes every GPU object the renderer created.
    pub fn dispose(&mut self) {
        log::info!("Disposing renderer resources");
        let no_textures = AssetCache::new();
        {
            let mut dispatch = self.gpu.dispatcher(&no_textures);
            self.shadows.dispose(&mut dispatch);
        }
        let gpu = &mut self.gpu;
        let materials = self
            .shadows
            .material_ids()
            .into_iter()
            .chain(self.background.material_ids());
        for id in materials {
            gpu.properties.dispose(&mut gpu.backend, &mut gpu.programs, id);
        }
        for id in self.background.geometry_ids() {
            gpu.geometries.dispose(&mut gpu.backend, id);
        }
        if let Some(target) = self.transmission.take() {
            gpu.textures
                .dispose_render_target(&mut gpu.backend, &mut gpu.state, target.id());
        }
        gpu.geometries.dispose_all(&mut gpu.backend);
        gpu.textures.dispose_all(&mut gpu.backend, &mut gpu.state);
        gpu.programs.dispose_all(&mut gpu.backend);
        gpu.properties.clear();
        gpu.vertex.reset();
        self.current = None;
    }

    /// Runs `f` with a dispatcher over the renderer's tables, for auxiliary passes.
    pub(crate) fn with_dispatcher<R>(
        &mut self,
        textures: &AssetCache<Texture>,
        f: impl FnOnce(&mut DrawDispatcher<'_>) -> R,
    ) -> R {
        let mut dispatch = self.gpu.dispatcher(textures);
        let result = f(&mut dispatch);
        drop(dispatch);
        self.bind_current_target();
        result
    }

    pub(crate) fn capabilities(&self) -> &crate::renderer::backend::Capabilities {
        self.gpu.backend.capabilities()
    }
}

fn scale_rect(rect: Rect, ratio: f32) -> Rect {
    Rect::new(
        (rect.x as f32 * ratio).floor() as i32,
        (rect.y as f32 * ratio).floor() as i32,
        (rect.width as f32 * ratio).floor() as i32,
        (rect.height as f32 * ratio).floor() as i32,
    )
}

fn object_draw<'o>(
    item: &RenderItem,
    drawable: &'o Drawable,
    geometry: &'o Geometry,
    material: &'o Material,
    side: Side,
) -> ObjectDraw<'o> {
    ObjectDraw {
        world: item.world,
        drawable: Some(drawable),
        geometry,
        material,
        group: item.group,
        side,
        mode: drawable.mode,
    }
}

/// Draws one list item. `side_for` picks the face to render, or skips the item.
fn render_item(
    dispatch: &mut DrawDispatcher<'_>,
    scene: &Scene,
    item: &RenderItem,
    view: &ViewState,
    side_for: impl Fn(&Material) -> Option<Side>,
) {
    let Ok(drawable) = scene.world.get::<&Drawable>(item.entity) else {
        return;
    };
    let (Some(geometry), Some(material)) = (
        scene.assets.geometries.get(item.geometry),
        scene.assets.materials.get(item.material),
    ) else {
        return;
    };
    let Some(side) = side_for(material) else {
        return;
    };
    dispatch.render_object(&object_draw(item, &drawable, geometry, material, side), view);
}

/// Draws `items` in order. With `two_pass`, double-sided materials that allow it draw
/// their back faces before their front faces.
fn render_items(
    dispatch: &mut DrawDispatcher<'_>,
    scene: &Scene,
    items: &[RenderItem],
    view: &ViewState,
    two_pass: bool,
) {
    for item in items {
        let split = two_pass
            && scene
                .assets
                .materials
                .get(item.material)
                .is_some_and(|m| m.side == Side::Double && !m.force_single_pass);
        if split {
            render_item(dispatch, scene, item, view, |_| Some(Side::Back));
            render_item(dispatch, scene, item, view, |_| Some(Side::Front));
        } else {
            render_item(dispatch, scene, item, view, |material| Some(material.side));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::RecordingBackend;

    #[test]
    fn rects_scale_with_pixel_ratio() {
        assert_eq!(scale_rect(Rect::new(10, 20, 100, 50), 2.0), Rect::new(20, 40, 200, 100));
    }

    #[test]
    fn drawing_buffer_follows_size_and_ratio() {
        let mut renderer = Renderer::new(RecordingBackend::default(), RendererSettings::default()).with_size(640, 480);
        renderer.set_pixel_ratio(1.5);
        assert_eq!(renderer.drawing_buffer_size(), UVec2::new(960, 720));
        renderer.set_pixel_ratio(-1.0);
        assert_eq!(renderer.pixel_ratio(), 1.5);
    }

    #[test]
    fn reading_an_unrendered_target_fails() {
        let mut renderer = Renderer::new(RecordingBackend::default(), RendererSettings::default());
        let target = RenderTarget::new(4, 4);
        let mut pixels = vec![0u8; 64];
        let result = renderer.read_render_target_pixels(&target, Rect::new(0, 0, 4, 4), &mut pixels);
        assert!(matches!(result, Err(RenderError::Resource(_))));
    }

    #[test]
    fn read_pixels_checks_bounds_and_buffer_length() {
        let mut renderer = Renderer::new(RecordingBackend::default(), RendererSettings::default());
        let target = RenderTarget::new(4, 4);
        renderer.set_render_target(Some(&target), 0, 0).unwrap();

        let mut short = vec![0u8; 8];
        assert!(renderer
            .read_render_target_pixels(&target, Rect::new(0, 0, 4, 4), &mut short)
            .is_err());
        let mut pixels = vec![0u8; 64];
        assert!(renderer
            .read_render_target_pixels(&target, Rect::new(2, 2, 4, 4), &mut pixels)
            .is_err());
        assert!(renderer
            .read_render_target_pixels(&target, Rect::new(0, 0, 4, 4), &mut pixels)
            .is_ok());
    }
}
