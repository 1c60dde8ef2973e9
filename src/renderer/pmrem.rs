//! Prefiltered, mipmapped radiance environment maps.
//!
//! An environment (equirect texture, cube texture or a rendered scene) is resampled
//! into a cube-UV atlas: mip `k` holds six faces of `S / 2^k` pixels in a 3x2 grid,
//! stacked above mip `k - 1`. Each mip after the first is a Gaussian blur of the one
//! before it, so sampling mip `roughness * max_mip` approximates a rough reflection.

use std::f32::consts::PI;

use glam::{Mat4, Vec3};

use crate::asset::{AssetCache, Handle};
use crate::error::RenderError;
use crate::renderer::backend::{Backend, ClearFlags, Rect, TexelFormat, TextureFilter, UniformValue};
use crate::renderer::geometry::Geometry;
use crate::renderer::internal::dispatch::{clear_buffers, DrawDispatcher, ObjectDraw, ViewState};
use crate::renderer::internal::parameters::cube_uv_defines;
use crate::renderer::internal::shader_lib;
use crate::renderer::material::{Blending, Material, MaterialKind, ShaderMaterial, ShaderUniform};
use crate::renderer::primitives::plane_geometry;
use crate::renderer::render_target::RenderTarget;
use crate::renderer::renderer::Renderer;
use crate::renderer::texture::{TargetAttachment, Texture, TextureMapping, TextureSource};
use crate::scene::{Camera, Scene};
use crate::settings::ToneMapping;

const DEFAULT_FACE_SIZE: u32 = 256;
const MIN_FACE_SIZE: u32 = 16;
const MAX_SAMPLES: usize = 20;
const STANDARD_DEVIATIONS: f32 = 3.0;

const PHI: f32 = 1.618_034;
const INV_PHI: f32 = 1.0 / PHI;

/// Blur axes, cycled per mip so the separable passes do not line up.
const AXES: [Vec3; 10] = [
    Vec3::new(-PHI, INV_PHI, 0.0),
    Vec3::new(PHI, INV_PHI, 0.0),
    Vec3::new(-INV_PHI, 0.0, PHI),
    Vec3::new(INV_PHI, 0.0, PHI),
    Vec3::new(0.0, PHI, -INV_PHI),
    Vec3::new(0.0, PHI, INV_PHI),
    Vec3::new(-1.0, 1.0, -1.0),
    Vec3::new(1.0, 1.0, -1.0),
    Vec3::new(-1.0, 1.0, 1.0),
    Vec3::new(1.0, 1.0, 1.0),
];

/// Look direction and up vector of each cube face, in GL face order.
const CUBE_CAMERAS: [(Vec3, Vec3); 6] = [
    (Vec3::X, Vec3::NEG_Y),
    (Vec3::NEG_X, Vec3::NEG_Y),
    (Vec3::Y, Vec3::Z),
    (Vec3::NEG_Y, Vec3::NEG_Z),
    (Vec3::Z, Vec3::NEG_Y),
    (Vec3::NEG_Z, Vec3::NEG_Y),
];

/// A finished prefiltered environment. The atlas target belongs to the caller, who
/// disposes it through [`Renderer::dispose_render_target`].
#[derive(Debug)]
pub struct Pmrem {
    pub target: RenderTarget,
    pub face_size: u32,
}

impl Pmrem {
    /// Texture sampling the atlas, for `Scene::environment` or a material env map.
    pub fn texture(&self) -> Texture {
        let mut texture = Texture::from_render_target(&self.target, TargetAttachment::Color(0))
            .with_mapping(TextureMapping::CubeUvReflection)
            .with_name("pmrem");
        texture.cube_uv_size = Some(self.face_size);
        texture
    }

    pub fn max_mip(&self) -> u32 {
        max_mip(self.face_size)
    }
}

fn max_mip(face_size: u32) -> u32 {
    face_size.max(MIN_FACE_SIZE).ilog2() - 2
}

/// Pixel size of the atlas for faces of `face_size`.
pub(crate) fn atlas_size(face_size: u32) -> (u32, u32) {
    let size = face_size.max(MIN_FACE_SIZE);
    let mips = max_mip(size) + 1;
    let height = 4.0 * size as f32 * (1.0 - 0.5f32.powi(mips as i32));
    (3 * size, height.round() as u32)
}

/// Viewport of `face` at mip `mip` inside the atlas.
pub(crate) fn face_rect(face_size: u32, mip: u32, face: u32) -> Rect {
    let size = face_size >> mip;
    let offset = 4.0 * face_size as f32 * (1.0 - 0.5f32.powi(mip as i32));
    Rect::new(
        ((face % 3) * size) as i32,
        offset.round() as i32 + ((face / 3) * size) as i32,
        size as i32,
        size as i32,
    )
}

/// Normalized Gaussian weights for one blur pass and the sample count they cover.
pub(crate) fn blur_weights(sigma_radians: f32, radians_per_pixel: f32) -> (Vec<f32>, usize) {
    let sigma_pixels = sigma_radians / radians_per_pixel;
    let wanted = 1 + (STANDARD_DEVIATIONS * sigma_pixels).floor() as usize;
    if wanted > MAX_SAMPLES {
        log::warn!(
            "PMREM blur sigma {:.4} needs {} samples; clamped to {}",
            sigma_radians,
            wanted,
            MAX_SAMPLES
        );
    }
    let samples = wanted.min(MAX_SAMPLES);

    let mut weights = Vec::with_capacity(MAX_SAMPLES);
    let mut sum = 0.0;
    for i in 0..MAX_SAMPLES {
        let x = i as f32 / sigma_pixels;
        let weight = (-x * x / 2.0).exp();
        weights.push(weight);
        if i == 0 {
            sum += weight;
        } else if i < samples {
            sum += 2.0 * weight;
        }
    }
    for weight in &mut weights {
        *weight /= sum;
    }
    (weights, samples)
}

fn set_uniform(material: &mut Material, name: &str, value: UniformValue) {
    if let MaterialKind::Shader(shader) = &mut material.kind {
        shader.uniforms.insert(name.to_string(), ShaderUniform::Value(value));
    }
}

fn fullscreen_material(shader: ShaderMaterial, name: &str) -> Material {
    let mut material = Material::shader(shader).with_name(name);
    material.depth_test = false;
    material.depth_write = false;
    material.blending = Blending::None;
    material.fog = false;
    material.tone_mapped = false;
    material
}

fn quad_view(height: u32) -> ViewState {
    ViewState {
        view: Mat4::IDENTITY,
        projection: Mat4::IDENTITY,
        camera_position: Vec3::ZERO,
        orthographic: true,
        generation: 0,
        fog: None,
        environment: None,
        tone_mapping: ToneMapping::None,
        output_srgb: false,
        transmission: None,
        shadow_pass: false,
        distance_reference: None,
        drawing_height: height as f32,
        pixel_ratio: 1.0,
    }
}

/// What the conversion pass samples.
enum Source {
    Equirect(Handle<Texture>),
    Cube { texture: Handle<Texture>, flip: f32 },
    CubeTarget(u64),
}

/// Builds [`Pmrem`] atlases. Holds the shared full-screen quad between calls.
pub struct PmremGenerator {
    face_size: u32,
    quad: Geometry,
}

impl Default for PmremGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl PmremGenerator {
    pub fn new() -> Self {
        Self {
            face_size: DEFAULT_FACE_SIZE,
            quad: plane_geometry(2.0, 2.0, 1, 1),
        }
    }

    /// Face size of mip 0, rounded to a power of two of at least 16.
    pub fn with_face_size(mut self, size: u32) -> Self {
        let rounded = size.max(MIN_FACE_SIZE).next_power_of_two();
        if rounded != size {
            log::warn!("PMREM face size {} is not a power of two >= 16; using {}", size, rounded);
        }
        self.face_size = rounded;
        self
    }

    pub fn face_size(&self) -> u32 {
        self.face_size
    }

    /// Prefilters an equirectangular texture stored in `textures`.
    pub fn from_equirectangular<B: Backend>(
        &mut self,
        renderer: &mut Renderer<B>,
        textures: &AssetCache<Texture>,
        source: Handle<Texture>,
    ) -> Result<Pmrem, RenderError> {
        if textures.get(source).is_none() {
            return Err(RenderError::resource("PMREM source texture handle is stale"));
        }
        self.generate(renderer, textures, Source::Equirect(source))
    }

    /// Prefilters a six-face cube texture stored in `textures`.
    pub fn from_cubemap<B: Backend>(
        &mut self,
        renderer: &mut Renderer<B>,
        textures: &AssetCache<Texture>,
        source: Handle<Texture>,
    ) -> Result<Pmrem, RenderError> {
        let Some(texture) = textures.get(source) else {
            return Err(RenderError::resource("PMREM source texture handle is stale"));
        };
        // Cube images are stored mirrored; rendered cubes are not.
        let flip = if matches!(texture.source, TextureSource::Cube(_)) {
            -1.0
        } else {
            1.0
        };
        self.generate(renderer, textures, Source::Cube { texture: source, flip })
    }

    /// Renders `scene` into a cube around `position` and prefilters the result. The
    /// renderer draws to the default framebuffer afterwards.
    pub fn from_scene<B: Backend>(
        &mut self,
        renderer: &mut Renderer<B>,
        scene: &mut Scene,
        position: Vec3,
        near: f32,
        far: f32,
    ) -> Result<Pmrem, RenderError> {
        let format = if renderer.capabilities().color_buffer_half_float {
            TexelFormat::RGBA16F
        } else {
            TexelFormat::RGBA8
        };
        let cube = RenderTarget::cube(self.face_size)
            .with_format(format)
            .with_filters(TextureFilter::Linear, TextureFilter::Linear);

        for (face, (direction, up)) in CUBE_CAMERAS.iter().enumerate() {
            let camera = Camera::perspective(90.0, 1.0, near, far).look_at(position, position + *direction, *up);
            renderer.set_render_target(Some(&cube), face as u8, 0)?;
            renderer.render(scene, &camera);
        }
        renderer.set_render_target(None, 0, 0)?;

        let result = self.generate(renderer, &AssetCache::new(), Source::CubeTarget(cube.id()));
        renderer.dispose_render_target(&cube);
        result
    }

    fn generate<B: Backend>(
        &mut self,
        renderer: &mut Renderer<B>,
        textures: &AssetCache<Texture>,
        source: Source,
    ) -> Result<Pmrem, RenderError> {
        let face_size = self.face_size;
        let (width, height) = atlas_size(face_size);
        let format = if renderer.capabilities().color_buffer_half_float {
            TexelFormat::RGBA16F
        } else {
            TexelFormat::RGBA8
        };
        let atlas_target = |name: &str| {
            log::debug!("Creating {}x{} PMREM {} target", width, height, name);
            RenderTarget::new(width, height)
                .with_format(format)
                .with_filters(TextureFilter::Linear, TextureFilter::Linear)
                .without_depth()
        };
        let atlas = atlas_target("atlas");
        let scratch = atlas_target("scratch");

        let mut convert = convert_material(source);
        let mut from_atlas = blur_material(face_size, atlas.id());
        let mut from_scratch = blur_material(face_size, scratch.id());
        let quad = &self.quad;

        let result = renderer.with_dispatcher(textures, |dispatch| {
            for target in [&atlas, &scratch] {
                dispatch
                    .textures
                    .setup_render_target(dispatch.backend, dispatch.state, target)?;
                dispatch
                    .textures
                    .bind_render_target(dispatch.backend, dispatch.state, target.id(), 0, 0);
                dispatch
                    .state
                    .set_viewport(dispatch.backend, Rect::new(0, 0, width as i32, height as i32));
                dispatch.state.set_scissor_test(dispatch.backend, false);
                clear_buffers(dispatch.backend, dispatch.state, Some([0.0, 0.0, 0.0, 1.0]), ClearFlags::COLOR);
            }

            let view = quad_view(height);
            draw_faces(dispatch, &atlas, quad, &mut convert, face_size, 0, &view);

            let last = max_mip(face_size);
            for mip in 1..=last {
                let sigma_out = 1.0 / (face_size >> mip) as f32;
                let sigma_in = 1.0 / (face_size >> (mip - 1)) as f32;
                let sigma = (sigma_out * sigma_out - sigma_in * sigma_in).sqrt();
                let axis = AXES[(last - mip) as usize % AXES.len()].normalize();

                half_blur(dispatch, &mut from_atlas, HalfBlur {
                    destination: &scratch,
                    mip_in: mip - 1,
                    mip_out: mip,
                    sigma,
                    latitudinal: true,
                    axis,
                }, quad, face_size, &view);
                half_blur(dispatch, &mut from_scratch, HalfBlur {
                    destination: &atlas,
                    mip_in: mip,
                    mip_out: mip,
                    sigma,
                    latitudinal: false,
                    axis,
                }, quad, face_size, &view);
            }

            for material in [&convert, &from_atlas, &from_scratch] {
                dispatch
                    .properties
                    .dispose(dispatch.backend, dispatch.programs, material.id());
            }
            dispatch
                .textures
                .dispose_render_target(dispatch.backend, dispatch.state, scratch.id());
            Ok::<(), RenderError>(())
        });

        match result {
            Ok(()) => {
                log::info!(
                    "Prefiltered environment: {} mips, face size {}",
                    max_mip(face_size) + 1,
                    face_size
                );
                Ok(Pmrem {
                    target: atlas,
                    face_size,
                })
            }
            Err(error) => {
                renderer.dispose_render_target(&atlas);
                Err(error)
            }
        }
    }

    /// Releases the quad's buffers.
    pub fn dispose<B: Backend>(&mut self, renderer: &mut Renderer<B>) {
        renderer.dispose_geometry(&self.quad);
    }
}

fn convert_material(source: Source) -> Material {
    let mut shader = ShaderMaterial::new(
        shader_lib::PMREM_CONVERT.vertex,
        shader_lib::PMREM_CONVERT.fragment,
    )
    .with_uniform("face", UniformValue::Float(0.0));
    shader = match source {
        Source::Equirect(texture) => shader
            .with_texture("envMap", texture)
            .with_uniform("flipEnvMap", UniformValue::Float(1.0)),
        Source::Cube { texture, flip } => shader
            .with_define("ENVMAP_TYPE_CUBE", "1")
            .with_texture("envMap", texture)
            .with_uniform("flipEnvMap", UniformValue::Float(flip)),
        Source::CubeTarget(target) => shader
            .with_define("ENVMAP_TYPE_CUBE", "1")
            .with_render_target("envMap", target, TargetAttachment::Color(0))
            .with_uniform("flipEnvMap", UniformValue::Float(1.0)),
    };
    fullscreen_material(shader, "pmrem-convert")
}

fn blur_material(face_size: u32, source: u64) -> Material {
    let mut shader = ShaderMaterial::new(shader_lib::PMREM_BLUR.vertex, shader_lib::PMREM_BLUR.fragment)
        .with_define("SAMPLE_COUNT", MAX_SAMPLES.to_string())
        .with_define("ENVMAP_TYPE_CUBE_UV", "1")
        .with_render_target("envMap", source, TargetAttachment::Color(0))
        .with_uniform("face", UniformValue::Float(0.0));
    for (name, value) in cube_uv_defines(face_size) {
        shader = shader.with_define(name, value);
    }
    fullscreen_material(shader, "pmrem-blur")
}

/// Draws `material` once per face into the mip `mip` cells of `target`.
fn draw_faces(
    dispatch: &mut DrawDispatcher<'_>,
    target: &RenderTarget,
    quad: &Geometry,
    material: &mut Material,
    face_size: u32,
    mip: u32,
    view: &ViewState,
) {
    dispatch
        .textures
        .bind_render_target(dispatch.backend, dispatch.state, target.id(), 0, 0);
    for face in 0..6 {
        set_uniform(material, "face", UniformValue::Float(face as f32));
        dispatch
            .state
            .set_viewport(dispatch.backend, face_rect(face_size, mip, face));
        dispatch.render_object(&ObjectDraw::new(Mat4::IDENTITY, quad, material), view);
    }
}

struct HalfBlur<'t> {
    destination: &'t RenderTarget,
    mip_in: u32,
    mip_out: u32,
    sigma: f32,
    latitudinal: bool,
    axis: Vec3,
}

fn half_blur(
    dispatch: &mut DrawDispatcher<'_>,
    material: &mut Material,
    pass: HalfBlur<'_>,
    quad: &Geometry,
    face_size: u32,
    view: &ViewState,
) {
    let pixels = ((face_size >> pass.mip_in) as f32 - 1.0).max(1.0);
    let radians_per_pixel = PI / (2.0 * pixels);
    let (weights, samples) = blur_weights(pass.sigma, radians_per_pixel);

    set_uniform(material, "weights", UniformValue::FloatArray(weights));
    set_uniform(material, "samples", UniformValue::Int(samples as i32));
    set_uniform(material, "latitudinal", UniformValue::bool(pass.latitudinal));
    set_uniform(material, "dTheta", UniformValue::Float(radians_per_pixel));
    set_uniform(material, "mipInt", UniformValue::Float(pass.mip_in as f32));
    set_uniform(material, "poleAxis", UniformValue::Vec3(pass.axis.to_array()));

    draw_faces(dispatch, pass.destination, quad, material, face_size, pass.mip_out, view);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atlas_stacks_mips_below_four_pixel_faces() {
        assert_eq!(max_mip(256), 6);
        assert_eq!(atlas_size(256), (768, 1016));
        assert_eq!(atlas_size(16), (48, 56));
    }

    #[test]
    fn face_cells_follow_the_cube_uv_layout() {
        assert_eq!(face_rect(256, 0, 0), Rect::new(0, 0, 256, 256));
        assert_eq!(face_rect(256, 0, 4), Rect::new(256, 256, 256, 256));
        assert_eq!(face_rect(256, 1, 0), Rect::new(0, 512, 128, 128));
        assert_eq!(face_rect(256, 1, 5), Rect::new(256, 640, 128, 128));
        // The last mip ends exactly at the top of the atlas.
        let top = face_rect(256, 6, 3);
        assert_eq!((top.y + top.height) as u32, atlas_size(256).1);
    }

    #[test]
    fn blur_weights_are_normalized_over_the_used_samples() {
        let (weights, samples) = blur_weights(0.01, PI / (2.0 * 127.0));
        assert_eq!(weights.len(), MAX_SAMPLES);
        assert!(samples > 1 && samples <= MAX_SAMPLES);
        let total: f32 = weights[0] + 2.0 * weights[1..samples].iter().sum::<f32>();
        assert!((total - 1.0).abs() < 1e-4);
        assert!(weights[0] > weights[1]);
    }

    #[test]
    fn wide_blurs_are_clamped() {
        let (_, samples) = blur_weights(1.0, 0.001);
        assert_eq!(samples, MAX_SAMPLES);
    }

    #[test]
    fn face_size_rounds_to_a_power_of_two() {
        assert_eq!(PmremGenerator::new().with_face_size(100).face_size(), 128);
        assert_eq!(PmremGenerator::new().with_face_size(4).face_size(), 16);
    }

    #[test]
    fn pmrem_texture_samples_as_cube_uv() {
        let pmrem = Pmrem {
            target: RenderTarget::new(48, 56),
            face_size: 16,
        };
        let texture = pmrem.texture();
        assert_eq!(texture.mapping, TextureMapping::CubeUvReflection);
        assert_eq!(texture.cube_uv_size, Some(16));
        assert_eq!(pmrem.max_mip(), 2);
    }
}
