use std::collections::{HashMap, HashSet};

use glam::{Mat4, UVec2, Vec2, Vec3};
use hecs::Entity;

use crate::error::RenderError;
use crate::renderer::backend::{ClearFlags, Rect, TextureFilter, UniformValue};
use crate::renderer::geometry::Geometry;
use crate::renderer::lights::{CollectedLight, ShadowMapInfo};
use crate::renderer::material::{
    Blending, DepthMaterial, DistanceMaterial, Material, MaterialKind, ShaderMaterial, ShaderUniform, Side,
};
use crate::renderer::primitives::plane_geometry;
use crate::renderer::render_target::RenderTarget;
use crate::renderer::texture::TargetAttachment;
use crate::scene::{Drawable, Frustum, LightKind, LightShadow, Scene};
use crate::settings::{ShadowType, ToneMapping};

use super::dispatch::{clear_buffers, DistanceReference, DrawDispatcher, ObjectDraw, ViewState};
use super::render_list::{is_visible, world_bounds, RenderItem};
use super::shader_lib;

const DEFAULT_SHADOW_FAR: f32 = 500.0;

/// Cube face directions, ups and atlas cells (in face-size units) of point-light maps.
const CUBE_FACES: [(Vec3, Vec3, (i32, i32)); 6] = [
    (Vec3::X, Vec3::Y, (2, 1)),
    (Vec3::NEG_X, Vec3::Y, (0, 1)),
    (Vec3::Z, Vec3::Y, (3, 1)),
    (Vec3::NEG_Z, Vec3::Y, (1, 1)),
    (Vec3::Y, Vec3::Z, (3, 0)),
    (Vec3::NEG_Y, Vec3::NEG_Z, (1, 0)),
];

/// Maps clip space to `[0, 1]` texture space.
const SHADOW_BIAS: Mat4 = Mat4::from_cols_array(&[
    0.5, 0.0, 0.0, 0.0, //
    0.0, 0.5, 0.0, 0.0, //
    0.0, 0.0, 0.5, 0.0, //
    0.5, 0.5, 0.5, 1.0,
]);

/// One camera rendering into part of a shadow map.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ShadowView {
    pub(crate) view: Mat4,
    pub(crate) projection: Mat4,
    pub(crate) viewport: Rect,
}

/// Cameras and lookup matrix of one shadow-casting light.
#[derive(Debug, Clone)]
pub(crate) struct ShadowCameras {
    pub(crate) views: Vec<ShadowView>,
    /// World to shadow-map texture coordinates; a plain world-to-light translation for
    /// point lights, whose maps are looked up by direction.
    pub(crate) matrix: Mat4,
    pub(crate) near: f32,
    pub(crate) far: f32,
    pub(crate) orthographic: bool,
    pub(crate) position: Vec3,
    /// Full size of the map texture.
    pub(crate) target_size: UVec2,
}

fn up_for(direction: Vec3) -> Vec3 {
    if direction.normalize_or_zero().cross(Vec3::Y).length_squared() < 1e-6 {
        Vec3::Z
    } else {
        Vec3::Y
    }
}

/// Near and far planes of a shadow camera. A degenerate range is widened.
fn shadow_range(shadow: &LightShadow, light_distance: f32) -> (f32, f32) {
    let near = shadow.camera_near.max(1e-4);
    let far = if shadow.camera_far > 0.0 {
        shadow.camera_far
    } else if light_distance > 0.0 {
        light_distance
    } else {
        DEFAULT_SHADOW_FAR
    };
    if far <= near {
        log::warn!(
            "Shadow camera far plane {} is not beyond near plane {}, using {}",
            far,
            near,
            near + 1.0
        );
        return (near, near + 1.0);
    }
    (near, far)
}

/// Computes the shadow cameras of `light` for a map of `map_size` texels per face.
pub(crate) fn shadow_cameras(light: &CollectedLight, shadow: &LightShadow, map_size: UVec2) -> Option<ShadowCameras> {
    let position = light.world.w_axis.truncate();
    let full = Rect::new(0, 0, map_size.x as i32, map_size.y as i32);
    match light.light.kind {
        LightKind::Directional { target } => {
            let (near, far) = shadow_range(shadow, 0.0);
            let e = shadow.camera_extent;
            let view = Mat4::look_at_rh(position, target, up_for(target - position));
            let projection = Mat4::orthographic_rh_gl(-e, e, -e, e, near, far);
            Some(ShadowCameras {
                views: vec![ShadowView {
                    view,
                    projection,
                    viewport: full,
                }],
                matrix: SHADOW_BIAS * projection * view,
                near,
                far,
                orthographic: true,
                position,
                target_size: map_size,
            })
        }
        LightKind::Spot {
            distance,
            angle,
            target,
            ..
        } => {
            let (near, far) = shadow_range(shadow, distance);
            let aspect = map_size.x as f32 / map_size.y.max(1) as f32;
            let view = Mat4::look_at_rh(position, target, up_for(target - position));
            let projection = Mat4::perspective_rh_gl(2.0 * angle, aspect, near, far);
            Some(ShadowCameras {
                views: vec![ShadowView {
                    view,
                    projection,
                    viewport: full,
                }],
                matrix: SHADOW_BIAS * projection * view,
                near,
                far,
                orthographic: false,
                position,
                target_size: map_size,
            })
        }
        LightKind::Point { distance, .. } => {
            let (near, far) = shadow_range(shadow, distance);
            let projection = Mat4::perspective_rh_gl(std::f32::consts::FRAC_PI_2, 1.0, near, far);
            let (w, h) = (map_size.x as i32, map_size.y as i32);
            let views = CUBE_FACES
                .iter()
                .map(|(direction, up, (cx, cy))| ShadowView {
                    view: Mat4::look_at_rh(position, position + *direction, *up),
                    projection,
                    viewport: Rect::new(cx * w, cy * h, w, h),
                })
                .collect();
            Some(ShadowCameras {
                views,
                matrix: Mat4::from_translation(-position),
                near,
                far,
                orthographic: false,
                position,
                target_size: UVec2::new(map_size.x * 4, map_size.y * 2),
            })
        }
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SubstituteKind {
    Depth,
    Distance,
}

/// Depth or distance stand-in for a source material, refreshed when the source
/// changes.
struct Substitute {
    source_version: u64,
    material: Material,
}

fn substitute_for(source: &Material, kind: SubstituteKind) -> Material {
    let mut material = Material::new(match kind {
        SubstituteKind::Depth => MaterialKind::Depth(DepthMaterial::default()),
        SubstituteKind::Distance => MaterialKind::Distance(DistanceMaterial::default()),
    });
    material.name = format!("{}-{}", source.name, source.kind.name());
    copy_shadow_inputs(source, &mut material);
    material
}

/// Carries over everything that changes the silhouette of the source material.
fn copy_shadow_inputs(source: &Material, target: &mut Material) {
    let (map, alpha_map, displacement) = match &source.kind {
        MaterialKind::Basic(m) => (m.map, m.alpha_map, None),
        MaterialKind::Lambert(m) => (m.map, m.alpha_map, None),
        MaterialKind::Phong(m) => (m.map, m.alpha_map, None),
        MaterialKind::Toon(m) => (m.map, m.alpha_map, None),
        MaterialKind::Standard(m) => (
            m.map,
            m.alpha_map,
            Some((m.displacement_map, m.displacement_scale, m.displacement_bias)),
        ),
        MaterialKind::Physical(m) => (
            m.base.map,
            m.base.alpha_map,
            Some((m.base.displacement_map, m.base.displacement_scale, m.base.displacement_bias)),
        ),
        MaterialKind::Points(m) => (m.map, m.alpha_map, None),
        MaterialKind::Sprite(m) => (m.map, m.alpha_map, None),
        _ => (None, None, None),
    };
    // Color maps only matter for their alpha when alpha testing.
    let map = map.filter(|_| source.alpha_test > 0.0);
    let (displacement_map, displacement_scale, displacement_bias) =
        displacement.unwrap_or((None, 1.0, 0.0));
    match &mut target.kind {
        MaterialKind::Depth(m) => {
            m.map = map;
            m.alpha_map = alpha_map;
            m.displacement_map = displacement_map;
            m.displacement_scale = displacement_scale;
            m.displacement_bias = displacement_bias;
        }
        MaterialKind::Distance(m) => {
            m.map = map;
            m.alpha_map = alpha_map;
            m.displacement_map = displacement_map;
            m.displacement_scale = displacement_scale;
            m.displacement_bias = displacement_bias;
        }
        _ => {}
    }
    target.alpha_test = source.alpha_test;
    target.clipping_planes = source.clipping_planes.clone();
    target.clip_intersection = source.clip_intersection;
    target.clip_shadows = source.clip_shadows;
    target.blending = Blending::None;
}

/// Side drawn into the map: the explicit shadow side, else the opposite side for
/// VSM (whose blur hides acne) and the material side otherwise.
fn shadow_side(material: &Material, kind: ShadowType) -> Side {
    match (material.shadow_side, kind) {
        (Some(side), _) => side,
        (None, ShadowType::Vsm) => match material.side {
            Side::Front => Side::Back,
            Side::Back => Side::Front,
            Side::Double => Side::Double,
        },
        (None, _) => material.side,
    }
}

/// Two-pass blur of a VSM map: the first pass reads packed depth into a scratch
/// target, the second writes mean and deviation back into the map.
struct VsmBlur {
    scratch: RenderTarget,
    first: Material,
    second: Material,
    samples: u32,
}

impl VsmBlur {
    fn new(size: UVec2, map: u64, samples: u32) -> Self {
        let scratch = RenderTarget::new(size.x, size.y)
            .with_filters(TextureFilter::Linear, TextureFilter::Linear)
            .without_depth();
        let pass = |source: u64, horizontal: bool| {
            let mut shader = ShaderMaterial::new(shader_lib::VSM.vertex, shader_lib::VSM.fragment)
                .with_define("VSM_SAMPLES", samples.to_string())
                .with_render_target("shadow_pass", source, TargetAttachment::Color(0));
            if horizontal {
                shader = shader.with_define("HORIZONTAL_PASS", "1");
            }
            let mut material = Material::shader(shader).with_name("vsm-blur");
            material.depth_test = false;
            material.depth_write = false;
            material.blending = Blending::None;
            material
        };
        let first = pass(map, false);
        let second = pass(scratch.id(), true);
        Self {
            scratch,
            first,
            second,
            samples,
        }
    }

    fn set_uniforms(&mut self, size: Vec2, radius: f32) {
        for material in [&mut self.first, &mut self.second] {
            if let MaterialKind::Shader(shader) = &mut material.kind {
                shader.uniforms.insert(
                    "resolution".to_string(),
                    ShaderUniform::Value(UniformValue::Vec2(size.to_array())),
                );
                shader
                    .uniforms
                    .insert("radius".to_string(), ShaderUniform::Value(UniformValue::Float(radius)));
            }
        }
    }
}

struct ShadowMap {
    target: RenderTarget,
    kind: ShadowType,
    blur: Option<VsmBlur>,
    requests: u64,
    rendered: bool,
}

impl ShadowMap {
    fn new(size: UVec2, kind: ShadowType) -> Self {
        let filter = if kind == ShadowType::Vsm {
            TextureFilter::Linear
        } else {
            TextureFilter::Nearest
        };
        Self {
            target: RenderTarget::new(size.x, size.y).with_filters(filter, filter),
            kind,
            blur: None,
            requests: 0,
            rendered: false,
        }
    }
}

/// Renders the shadow maps of every shadow-casting light before the color passes.
#[derive(Default)]
pub(crate) struct ShadowPipeline {
    maps: HashMap<Entity, ShadowMap>,
    substitutes: HashMap<(u64, SubstituteKind), Substitute>,
    quad: Option<Geometry>,
}

impl ShadowPipeline {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn map_count(&self) -> usize {
        self.maps.len()
    }

    /// Updates the shadow cameras of `lights`, fills in their map info and re-renders
    /// the maps that need it.
    pub(crate) fn render(
        &mut self,
        dispatch: &mut DrawDispatcher<'_>,
        scene: &Scene,
        lights: &mut [CollectedLight],
        casters: &[RenderItem],
    ) {
        let settings = dispatch.settings;
        if !settings.shadows.enabled {
            return;
        }
        let kind = settings.shadows.kind;
        let max_size = dispatch.backend.capabilities().max_texture_size;
        let mut seen = HashSet::new();

        for light in lights.iter_mut() {
            let Some(shadow) = light.light.shadow else {
                continue;
            };
            let point = matches!(light.light.kind, LightKind::Point { .. });
            let map_size = clamp_map_size(dispatch, shadow.map_size, max_size, point);
            let Some(cameras) = shadow_cameras(light, &shadow, map_size) else {
                continue;
            };
            seen.insert(light.entity);

            let map = self.maps.entry(light.entity).or_insert_with(|| {
                log::debug!("Creating {:?} shadow map for {:?}", kind, light.entity);
                ShadowMap::new(cameras.target_size, kind)
            });
            if map.kind != kind {
                dispose_map(dispatch, map);
                *map = ShadowMap::new(cameras.target_size, kind);
            }
            if map.target.width != cameras.target_size.x || map.target.height != cameras.target_size.y {
                map.target.set_size(cameras.target_size.x, cameras.target_size.y);
                map.rendered = false;
            }

            light.shadow_map = Some(ShadowMapInfo {
                target: map.target.id(),
                matrix: cameras.matrix,
                map_size: map_size.as_vec2(),
                camera_near: cameras.near,
                camera_far: cameras.far,
            });

            let requested = shadow.update_requests() != map.requests;
            if map.rendered && !settings.shadows.auto_update && !shadow.auto_update && !requested {
                continue;
            }
            map.requests = shadow.update_requests();

            let result = render_map(
                dispatch,
                scene,
                map,
                &mut self.substitutes,
                &cameras,
                &shadow,
                point,
                casters,
            );
            match result {
                Ok(()) => map.rendered = true,
                Err(error) => dispatch.errors.report(dispatch.info, &error),
            }

            if kind == ShadowType::Vsm {
                let quad = self.quad.get_or_insert_with(|| plane_geometry(2.0, 2.0, 1, 1));
                if let Err(error) = blur_map(dispatch, map, quad, &shadow) {
                    dispatch.errors.report(dispatch.info, &error);
                }
            }
        }

        let stale: Vec<Entity> = self.maps.keys().filter(|e| !seen.contains(*e)).copied().collect();
        for entity in stale {
            if let Some(map) = self.maps.remove(&entity) {
                dispose_map(dispatch, &map);
            }
        }
    }

    /// Drops substitutes whose source material is gone.
    pub(crate) fn forget_material(&mut self, material: u64) -> Vec<u64> {
        let keys: Vec<_> = self
            .substitutes
            .keys()
            .filter(|(source, _)| *source == material)
            .copied()
            .collect();
        keys.into_iter()
            .filter_map(|key| self.substitutes.remove(&key))
            .map(|s| s.material.id())
            .collect()
    }

    /// Releases every map target along with the blur passes' programs.
    pub(crate) fn dispose(&mut self, dispatch: &mut DrawDispatcher<'_>) {
        for (_, map) in self.maps.drain() {
            dispose_map(dispatch, &map);
        }
    }

    /// Forgets GPU state after a context loss; maps re-render on the next frame.
    pub(crate) fn forget_all(&mut self) {
        self.maps.clear();
    }

    /// Ids of the substitute materials, for releasing their programs. Blur materials
    /// are released together with their map.
    pub(crate) fn material_ids(&self) -> Vec<u64> {
        self.substitutes.values().map(|s| s.material.id()).collect()
    }
}

fn clamp_map_size(dispatch: &mut DrawDispatcher<'_>, size: UVec2, max_size: u32, point: bool) -> UVec2 {
    let (limit_x, limit_y) = if point {
        (max_size / 4, max_size / 2)
    } else {
        (max_size, max_size)
    };
    let clamped = UVec2::new(size.x.clamp(1, limit_x.max(1)), size.y.clamp(1, limit_y.max(1)));
    if clamped != size {
        let error = RenderError::Capability(format!(
            "Shadow map size {}x{} exceeds the maximum texture size {}, clamped to {}x{}",
            size.x, size.y, max_size, clamped.x, clamped.y
        ));
        dispatch.errors.report(dispatch.info, &error);
    }
    clamped
}

fn dispose_map(dispatch: &mut DrawDispatcher<'_>, map: &ShadowMap) {
    dispatch
        .textures
        .dispose_render_target(dispatch.backend, dispatch.state, map.target.id());
    if let Some(blur) = &map.blur {
        dispose_blur(dispatch, blur);
    }
}

/// Frees the scratch target and drops the blur passes' program references.
fn dispose_blur(dispatch: &mut DrawDispatcher<'_>, blur: &VsmBlur) {
    dispatch
        .textures
        .dispose_render_target(dispatch.backend, dispatch.state, blur.scratch.id());
    for material in [&blur.first, &blur.second] {
        dispatch
            .properties
            .dispose(dispatch.backend, dispatch.programs, material.id());
    }
}

fn shadow_view_state(cameras: &ShadowCameras, view: &ShadowView, point: bool) -> ViewState {
    ViewState {
        view: view.view,
        projection: view.projection,
        camera_position: cameras.position,
        orthographic: cameras.orthographic,
        generation: 0,
        fog: None,
        environment: None,
        tone_mapping: ToneMapping::None,
        output_srgb: false,
        transmission: None,
        shadow_pass: true,
        distance_reference: point.then_some(DistanceReference {
            position: cameras.position,
            near: cameras.near,
            far: cameras.far,
        }),
        drawing_height: view.viewport.height as f32,
        pixel_ratio: 1.0,
    }
}

#[allow(clippy::too_many_arguments)]
fn render_map(
    dispatch: &mut DrawDispatcher<'_>,
    scene: &Scene,
    map: &mut ShadowMap,
    substitutes: &mut HashMap<(u64, SubstituteKind), Substitute>,
    cameras: &ShadowCameras,
    shadow: &LightShadow,
    point: bool,
    casters: &[RenderItem],
) -> Result<(), RenderError> {
    let target = map.target.id();
    dispatch
        .textures
        .setup_render_target(dispatch.backend, dispatch.state, &map.target)?;
    dispatch
        .textures
        .bind_render_target(dispatch.backend, dispatch.state, target, 0, 0);
    let full = Rect::new(0, 0, map.target.width as i32, map.target.height as i32);
    dispatch.state.set_scissor_test(dispatch.backend, false);
    dispatch.state.set_viewport(dispatch.backend, full);
    clear_buffers(
        dispatch.backend,
        dispatch.state,
        Some([1.0, 1.0, 1.0, 1.0]),
        ClearFlags::COLOR | ClearFlags::DEPTH,
    );

    let substitute_kind = if point {
        SubstituteKind::Distance
    } else {
        SubstituteKind::Depth
    };
    let assets = &scene.assets;
    let mut drawn = 0usize;

    for view in &cameras.views {
        dispatch.state.set_viewport(dispatch.backend, view.viewport);
        let frustum = Frustum::from_matrix(&(view.projection * view.view));
        let view_state = shadow_view_state(cameras, view, point);

        for caster in casters {
            let Ok(drawable) = scene.world.get::<&Drawable>(caster.entity) else {
                continue;
            };
            let (Some(geometry), Some(material)) = (
                assets.geometries.get(caster.geometry),
                assets.materials.get(caster.material),
            ) else {
                continue;
            };
            if drawable.frustum_culled
                && !is_visible(&frustum, &world_bounds(geometry, &drawable, &caster.world))
            {
                continue;
            }

            let entry = substitutes
                .entry((material.id(), substitute_kind))
                .or_insert_with(|| Substitute {
                    source_version: material.version(),
                    material: substitute_for(material, substitute_kind),
                });
            if entry.source_version != material.version() {
                copy_shadow_inputs(material, &mut entry.material);
                entry.material.needs_update();
                entry.source_version = material.version();
            }

            let draw = ObjectDraw {
                world: caster.world,
                drawable: Some(&drawable),
                geometry,
                material: &entry.material,
                group: caster.group,
                side: shadow_side(material, map.kind),
                mode: drawable.mode,
            };
            if dispatch.render_object(&draw, &view_state) {
                drawn += 1;
            }
        }
    }
    log::trace!(
        "Shadow map {} ({}x{}): {} caster draws, bias {}",
        target,
        map.target.width,
        map.target.height,
        drawn,
        shadow.bias
    );
    Ok(())
}

fn blur_map(
    dispatch: &mut DrawDispatcher<'_>,
    map: &mut ShadowMap,
    quad: &Geometry,
    shadow: &LightShadow,
) -> Result<(), RenderError> {
    let size = UVec2::new(map.target.width, map.target.height);
    let samples = shadow.blur_samples.max(1);
    let rebuild = map.blur.as_ref().map_or(true, |blur| blur.samples != samples);
    if rebuild {
        if let Some(old) = map.blur.take() {
            dispose_blur(dispatch, &old);
        }
        map.blur = Some(VsmBlur::new(size, map.target.id(), samples));
    }
    let Some(blur) = map.blur.as_mut() else {
        return Ok(());
    };
    if blur.scratch.width != size.x || blur.scratch.height != size.y {
        blur.scratch.set_size(size.x, size.y);
    }
    blur.set_uniforms(size.as_vec2(), shadow.radius);

    let rect = Rect::new(0, 0, size.x as i32, size.y as i32);
    let view_state = ViewState {
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
        shadow_pass: true,
        distance_reference: None,
        drawing_height: size.y as f32,
        pixel_ratio: 1.0,
    };

    for (destination, material) in [
        (blur.scratch.id(), &blur.first),
        (map.target.id(), &blur.second),
    ] {
        let target = if destination == blur.scratch.id() {
            &blur.scratch
        } else {
            &map.target
        };
        dispatch
            .textures
            .setup_render_target(dispatch.backend, dispatch.state, target)?;
        dispatch
            .textures
            .bind_render_target(dispatch.backend, dispatch.state, destination, 0, 0);
        dispatch.state.set_viewport(dispatch.backend, rect);
        clear_buffers(dispatch.backend, dispatch.state, Some([1.0; 4]), ClearFlags::COLOR);
        dispatch.render_object(&ObjectDraw::new(Mat4::IDENTITY, quad, material), &view_state);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Light;

    fn collected(light: Light, world: Mat4) -> CollectedLight {
        CollectedLight {
            entity: Entity::DANGLING,
            light,
            world,
            shadow_map: None,
        }
    }

    #[test]
    fn directional_matrix_maps_target_to_map_center() {
        let light = collected(
            Light::directional(Vec3::ONE, 1.0),
            Mat4::from_translation(Vec3::new(0.0, 10.0, 0.0)),
        );
        let shadow = LightShadow::default();
        let cameras = shadow_cameras(&light, &shadow, UVec2::splat(512)).unwrap();
        assert!(cameras.orthographic);
        assert_eq!(cameras.views.len(), 1);
        let uv = cameras.matrix.project_point3(Vec3::ZERO);
        assert!((uv.x - 0.5).abs() < 1e-4);
        assert!((uv.y - 0.5).abs() < 1e-4);
    }

    #[test]
    fn point_lights_render_six_faces_into_an_atlas() {
        let light = collected(
            Light::point(Vec3::ONE, 1.0, 20.0, 2.0),
            Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)),
        );
        let cameras = shadow_cameras(&light, &LightShadow::default(), UVec2::splat(256)).unwrap();
        assert_eq!(cameras.views.len(), 6);
        assert_eq!(cameras.target_size, UVec2::new(1024, 512));
        assert_eq!(cameras.far, 20.0);
        assert_eq!(cameras.views[0].viewport, Rect::new(512, 256, 256, 256));
        assert!(cameras
            .matrix
            .transform_point3(Vec3::new(1.0, 2.0, 3.0))
            .abs_diff_eq(Vec3::ZERO, 1e-6));
    }

    #[test]
    fn degenerate_range_is_widened() {
        let shadow = LightShadow {
            camera_near: 5.0,
            camera_far: 2.0,
            ..LightShadow::default()
        };
        assert_eq!(shadow_range(&shadow, 0.0), (5.0, 6.0));
    }

    #[test]
    fn ambient_lights_have_no_shadow_camera() {
        let light = collected(Light::ambient(Vec3::ONE, 1.0), Mat4::IDENTITY);
        assert!(shadow_cameras(&light, &LightShadow::default(), UVec2::splat(64)).is_none());
    }

    #[test]
    fn vsm_renders_the_opposite_side() {
        let material = Material::basic(Vec3::ONE);
        assert_eq!(shadow_side(&material, ShadowType::Pcf), Side::Front);
        assert_eq!(shadow_side(&material, ShadowType::Vsm), Side::Back);
        let mut explicit = Material::basic(Vec3::ONE);
        explicit.shadow_side = Some(Side::Double);
        assert_eq!(shadow_side(&explicit, ShadowType::Vsm), Side::Double);
    }

    #[test]
    fn substitutes_keep_alpha_test_and_clipping() {
        let mut source = Material::basic(Vec3::ONE).with_alpha_test(0.5);
        source.clip_shadows = true;
        let substitute = substitute_for(&source, SubstituteKind::Depth);
        assert_eq!(substitute.alpha_test, 0.5);
        assert!(substitute.clip_shadows);
        assert!(matches!(substitute.kind, MaterialKind::Depth(_)));
        assert_eq!(substitute.blending, Blending::None);
    }
}
