//! Per-object draw path: program selection, vertex bindings, uniform diffing and the
//! draw call itself.

use std::collections::HashSet;

use glam::{Mat3, Mat4, Vec2, Vec3};

use crate::asset::{AssetCache, Handle};
use crate::error::RenderError;
use crate::renderer::backend::{
    Backend, BufferTarget, ClearFlags, DataType, GlslType, IndexType, PrimitiveMode, ProgramId, TextureTarget,
    UniformValue,
};
use crate::renderer::geometry::{AttributeName, Geometry, GeometryGroup};
use crate::renderer::info::RenderInfo;
use crate::renderer::lights::{LightsState, ShadowArrays};
use crate::renderer::material::{MapSlot, Material, MaterialKind, ShaderUniform, Side, StandardMaterial};
use crate::renderer::state::StateCache;
use crate::renderer::texture::{TargetAttachment, Texture, TextureSource};
use crate::scene::{DrawMode, Drawable, Fog, Instancing};
use crate::settings::{Precision, RendererSettings, ToneMapping};

use super::clipping::{ClipPlanes, Clipping};
use super::geometries::GeometryManager;
use super::parameters::{EnvMapInfo, FogKind, ProgramInputs, ProgramParameters};
use super::programs::{AttributeSource, ProgramAttribute};
use super::programs::ProgramCache;
use super::properties::MaterialProperties;
use super::textures::TextureManager;
use super::uniforms::{mat3, mat4, vec3, SamplerSource, Uniform, UniformTable};

/// Enabled vertex arrays and their divisors, diffed between draws.
#[derive(Debug, Default)]
pub(crate) struct VertexState {
    enabled: Vec<bool>,
    wanted: Vec<bool>,
    divisors: Vec<u32>,
    constants: Vec<Option<[f32; 4]>>,
}

impl VertexState {
    fn grow(&mut self, location: u32) -> usize {
        let index = location as usize;
        if self.enabled.len() <= index {
            self.enabled.resize(index + 1, false);
            self.wanted.resize(index + 1, false);
            self.divisors.resize(index + 1, 0);
            self.constants.resize(index + 1, None);
        }
        index
    }

    fn begin(&mut self) {
        self.wanted.iter_mut().for_each(|w| *w = false);
    }

    fn enable(&mut self, backend: &mut dyn Backend, location: u32, divisor: u32) {
        let index = self.grow(location);
        self.wanted[index] = true;
        if !self.enabled[index] {
            backend.enable_vertex_attrib(location);
            self.enabled[index] = true;
            self.constants[index] = None;
        }
        if self.divisors[index] != divisor {
            backend.vertex_attrib_divisor(location, divisor);
            self.divisors[index] = divisor;
        }
    }

    fn constant(&mut self, backend: &mut dyn Backend, location: u32, value: [f32; 4]) {
        let index = self.grow(location);
        if self.constants[index] != Some(value) {
            backend.vertex_attrib_4f(location, value);
            self.constants[index] = Some(value);
        }
    }

    fn disable_unused(&mut self, backend: &mut dyn Backend) {
        for (index, enabled) in self.enabled.iter_mut().enumerate() {
            if *enabled && !self.wanted[index] {
                backend.disable_vertex_attrib(index as u32);
                *enabled = false;
            }
        }
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Logs each distinct error once and counts every occurrence.
#[derive(Debug, Default)]
pub(crate) struct ErrorLog {
    seen: HashSet<String>,
}

impl ErrorLog {
    pub(crate) fn report(&mut self, info: &mut RenderInfo, error: &RenderError) {
        match error {
            RenderError::Compile(_) => info.errors.compile += 1,
            RenderError::Capability(_) => info.errors.capability += 1,
            _ => info.errors.resource += 1,
        }
        let message = error.to_string();
        if self.seen.insert(message.clone()) {
            match error {
                RenderError::Capability(_) => log::warn!("{}", message),
                _ => log::error!("{}", message),
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        self.seen.clear();
    }
}

/// Color-pass copy sampled by transmissive materials.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TransmissionSource {
    pub(crate) target: u64,
    pub(crate) size: Vec2,
}

/// Reference point of distance materials rendering point-light shadows.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DistanceReference {
    pub(crate) position: Vec3,
    pub(crate) near: f32,
    pub(crate) far: f32,
}

/// Everything a draw needs to know about the camera and the pass it belongs to.
#[derive(Debug, Clone)]
pub(crate) struct ViewState {
    pub(crate) view: Mat4,
    pub(crate) projection: Mat4,
    pub(crate) camera_position: Vec3,
    pub(crate) orthographic: bool,
    /// Changes whenever the camera or the lights seen through it change.
    pub(crate) generation: u64,
    pub(crate) fog: Option<Fog>,
    pub(crate) environment: Option<Handle<Texture>>,
    pub(crate) tone_mapping: ToneMapping,
    pub(crate) output_srgb: bool,
    pub(crate) transmission: Option<TransmissionSource>,
    pub(crate) shadow_pass: bool,
    pub(crate) distance_reference: Option<DistanceReference>,
    /// Height of the target in pixels, for point sizes.
    pub(crate) drawing_height: f32,
    pub(crate) pixel_ratio: f32,
}

/// One object (or group of it) to draw with a resolved material.
#[derive(Clone, Copy)]
pub(crate) struct ObjectDraw<'o> {
    pub(crate) world: Mat4,
    pub(crate) drawable: Option<&'o Drawable>,
    pub(crate) geometry: &'o Geometry,
    pub(crate) material: &'o Material,
    pub(crate) group: Option<GeometryGroup>,
    pub(crate) side: Side,
    pub(crate) mode: DrawMode,
}

impl<'o> ObjectDraw<'o> {
    pub(crate) fn new(world: Mat4, geometry: &'o Geometry, material: &'o Material) -> Self {
        Self {
            world,
            drawable: None,
            geometry,
            material,
            group: None,
            side: material.side,
            mode: DrawMode::Mesh,
        }
    }

    fn instancing(&self) -> Option<&'o Instancing> {
        self.drawable
            .and_then(|d| d.instancing.as_ref())
            .filter(|i| i.count > 0)
    }
}

/// Borrowed view over the renderer's managers for the duration of one pass.
pub(crate) struct DrawDispatcher<'a> {
    pub(crate) backend: &'a mut dyn Backend,
    pub(crate) state: &'a mut StateCache,
    pub(crate) geometries: &'a mut GeometryManager,
    pub(crate) textures: &'a mut TextureManager,
    pub(crate) programs: &'a mut ProgramCache,
    pub(crate) properties: &'a mut MaterialProperties,
    pub(crate) vertex: &'a mut VertexState,
    pub(crate) info: &'a mut RenderInfo,
    pub(crate) errors: &'a mut ErrorLog,
    pub(crate) lights: &'a LightsState,
    pub(crate) settings: &'a RendererSettings,
    pub(crate) clipping: &'a Clipping,
    pub(crate) texture_assets: &'a AssetCache<Texture>,
    pub(crate) precision: Precision,
    pub(crate) frame: u64,
}

impl<'a> DrawDispatcher<'a> {
    fn report(&mut self, error: &RenderError) {
        self.errors.report(self.info, error);
    }

    /// Draws one object. Returns whether a draw call was issued; failures are
    /// recorded in the frame info and only skip this object.
    pub(crate) fn render_object(&mut self, draw: &ObjectDraw, view: &ViewState) -> bool {
        if let Err(error) = self.geometries.update(self.backend, draw.geometry, self.frame) {
            self.report(&error);
            return false;
        }
        let instancing = draw.instancing();
        if let Some(instancing) = instancing {
            if let Err(error) = self.geometries.update_instancing(self.backend, instancing) {
                self.report(&error);
                return false;
            }
        }

        let clip = self.clipping.planes(draw.material, &view.view, view.shadow_pass);
        let env_map = self.env_map(draw.material, view);
        let inputs = self.program_inputs(draw, view, &clip, env_map);
        let Some(program) = self.set_program(draw.material, inputs) else {
            return false;
        };

        let front_face_cw = draw.world.determinant() < 0.0;
        self.state
            .set_material(self.backend, draw.material, draw.side, front_face_cw);
        self.state.use_program(self.backend, Some(program));

        let Some(info) = self.programs.get_mut(program) else {
            return false;
        };
        let attributes = &info.attributes;
        let uniforms = &mut info.uniforms;

        if let Err(error) = bind_attributes(
            self.backend,
            self.vertex,
            self.geometries,
            attributes,
            draw.geometry,
            instancing,
        ) {
            self.errors.report(self.info, &error);
            return false;
        }

        upload_camera_uniforms(self.backend, uniforms, view, self.settings, &clip);
        if uniforms.lights_generation != Some(view.generation) {
            upload_light_uniforms(self.backend, uniforms, self.lights);
            uniforms.lights_generation = Some(view.generation);
        }
        upload_object_uniforms(self.backend, uniforms, draw, view);
        upload_material_uniforms(self.backend, uniforms, draw.material, view, env_map);

        let errors = bind_samplers(
            self.backend,
            self.state,
            self.textures,
            uniforms,
            SamplerInputs {
                material: draw.material,
                env_map,
                view,
                lights: self.lights,
                assets: self.texture_assets,
            },
        );
        for error in &errors {
            self.errors.report(self.info, error);
        }

        match issue_draw(self.backend, self.state, self.geometries, draw, instancing) {
            Ok(Some((count, mode, instances))) => {
                if view.shadow_pass {
                    self.info.shadow_calls += 1;
                } else {
                    self.info.update(count, mode, instances);
                }
                true
            }
            Ok(None) => false,
            Err(error) => {
                self.report(&error);
                false
            }
        }
    }

    /// Resolves the program for `material` under `inputs`, compiling on a miss.
    pub(crate) fn set_program(&mut self, material: &Material, inputs: ProgramInputs) -> Option<ProgramId> {
        let lights_version = if material.kind.uses_lights() {
            self.lights.version()
        } else {
            0
        };
        if let Some(id) =
            self.properties
                .cached_program(material.id(), material.version(), lights_version, &inputs)
        {
            return Some(id);
        }

        let params = ProgramParameters::new(material, &inputs);
        match self.programs.acquire(self.backend, &params) {
            Ok(id) => {
                self.properties.insert(
                    self.backend,
                    self.programs,
                    material.id(),
                    material.version(),
                    lights_version,
                    inputs,
                    id,
                );
                Some(id)
            }
            Err(RenderError::Compile(_)) => {
                self.info.errors.compile += 1;
                None
            }
            Err(error) => {
                self.report(&error);
                None
            }
        }
    }

    /// Environment sampled by `material`: its own map, or the scene environment for
    /// physically based materials.
    pub(crate) fn env_map(&self, material: &Material, view: &ViewState) -> Option<&'a Texture> {
        let handle = material.map(MapSlot::EnvMap).or_else(|| {
            material
                .kind
                .is_physically_based()
                .then_some(view.environment)
                .flatten()
        })?;
        self.texture_assets.get(handle)
    }

    pub(crate) fn program_inputs(
        &self,
        draw: &ObjectDraw,
        view: &ViewState,
        clip: &ClipPlanes,
        env_map: Option<&Texture>,
    ) -> ProgramInputs {
        let geometry = draw.geometry;
        let instancing = draw.instancing();
        let color_size = geometry.attribute(&AttributeName::Color).map(|a| a.item_size);
        ProgramInputs {
            lights: self.lights.counts(),
            physically_correct_lights: self.settings.physically_correct_lights,
            shadow_map: self
                .settings
                .shadows
                .enabled
                .then_some(self.settings.shadows.kind),
            fog: view.fog.map(|fog| match fog {
                Fog::Linear { .. } => FogKind::Linear,
                Fog::Exp2 { .. } => FogKind::Exp2,
            }),
            env_map: env_map.map(|texture| EnvMapInfo {
                mapping: texture.mapping,
                cube_uv_size: texture.cube_uv_size,
            }),
            tone_mapping: view.tone_mapping,
            output_srgb: view.output_srgb,
            clipping_planes: clip.count,
            clipping_intersection: clip.intersection,
            side: draw.side,
            instancing: instancing.is_some(),
            instancing_color: instancing.is_some_and(|i| i.colors.is_some()),
            bones: draw
                .drawable
                .and_then(|d| d.skeleton.as_ref())
                .map_or(0, |s| s.bone_matrices.len()),
            morph_targets: geometry.morph_positions().len(),
            morph_normals: !geometry.morph_normals().is_empty(),
            vertex_alphas: draw.material.vertex_colors && color_size == Some(4),
            vertex_tangents: geometry.has_attribute(&AttributeName::Tangent)
                && draw.material.map(MapSlot::NormalMap).is_some(),
            uv1: geometry.has_attribute(&AttributeName::Uv1),
            precision: self.precision,
            glsl: self.backend.capabilities().glsl,
        }
    }
}

fn bind_attributes(
    backend: &mut dyn Backend,
    vertex: &mut VertexState,
    geometries: &GeometryManager,
    attributes: &[ProgramAttribute],
    geometry: &Geometry,
    instancing: Option<&Instancing>,
) -> Result<(), RenderError> {
    vertex.begin();
    for attribute in attributes {
        let location = attribute.location;
        let integer = matches!(
            attribute.ty,
            GlslType::Int | GlslType::IVec2 | GlslType::IVec3 | GlslType::IVec4 | GlslType::UInt
        );

        let source = match &attribute.source {
            AttributeSource::InstanceMatrix | AttributeSource::InstanceColor => {
                let Some(instancing) = instancing else {
                    continue;
                };
                let matrix = attribute.source == AttributeSource::InstanceMatrix;
                let source = if matrix {
                    Some(&instancing.matrices)
                } else {
                    instancing.colors.as_ref()
                };
                let Some(gpu) = source.and_then(|a| geometries.buffers.get(a.id())) else {
                    continue;
                };
                backend.bind_buffer(BufferTarget::Array, Some(gpu.buffer));
                if matrix {
                    for column in 0..4u32 {
                        vertex.enable(backend, location + column, 1);
                        backend.vertex_attrib_pointer(
                            location + column,
                            4,
                            DataType::Float,
                            false,
                            64,
                            16 * column as i32,
                            false,
                        );
                    }
                } else {
                    vertex.enable(backend, location, 1);
                    backend.vertex_attrib_pointer(location, 3, DataType::Float, false, 0, 0, false);
                }
                continue;
            }
            AttributeSource::MorphTarget(index) => geometry.morph_positions().get(*index),
            AttributeSource::MorphNormal(index) => geometry.morph_normals().get(*index),
            AttributeSource::Geometry(name) => geometry.attribute(name),
        };

        let gpu = source.and_then(|a| geometries.buffers.get(a.id()).map(|gpu| (a, gpu)));
        match gpu {
            Some((attr, gpu)) => {
                backend.bind_buffer(BufferTarget::Array, Some(gpu.buffer));
                for column in 0..attribute.ty.location_span() {
                    vertex.enable(backend, location + column, 0);
                }
                backend.vertex_attrib_pointer(
                    location,
                    attr.item_size as i32,
                    gpu.data_type,
                    attr.normalized,
                    0,
                    0,
                    integer && gpu.data_type.is_integer(),
                );
            }
            None => {
                let value = if attribute.source == AttributeSource::Geometry(AttributeName::Color) {
                    [1.0, 1.0, 1.0, 1.0]
                } else {
                    [0.0, 0.0, 0.0, 1.0]
                };
                vertex.constant(backend, location, value);
            }
        }
    }
    vertex.disable_unused(backend);
    Ok(())
}

fn upload_camera_uniforms(
    backend: &mut dyn Backend,
    table: &mut UniformTable,
    view: &ViewState,
    settings: &RendererSettings,
    clip: &ClipPlanes,
) {
    table.set_with(backend, Uniform::ProjectionMatrix, || mat4(&view.projection));
    table.set_with(backend, Uniform::ViewMatrix, || mat4(&view.view));
    table.set_with(backend, Uniform::CameraPosition, || vec3(view.camera_position));
    table.set_with(backend, Uniform::IsOrthographic, || UniformValue::bool(view.orthographic));
    table.set_with(backend, Uniform::ToneMappingExposure, || {
        UniformValue::Float(settings.tone_mapping_exposure)
    });
    if let Some(planes) = clip.uniform() {
        table.set(backend, Uniform::ClippingPlanes, planes);
    }
}

fn upload_object_uniforms(backend: &mut dyn Backend, table: &mut UniformTable, draw: &ObjectDraw, view: &ViewState) {
    let model_view = view.view * draw.world;
    table.set(backend, Uniform::ModelMatrix, mat4(&draw.world));
    table.set_with(backend, Uniform::ModelViewMatrix, || mat4(&model_view));
    table.set_with(backend, Uniform::NormalMatrix, || {
        mat3(&Mat3::from_mat4(model_view).inverse().transpose())
    });

    let Some(drawable) = draw.drawable else {
        table.set_with(backend, Uniform::ReceiveShadow, || UniformValue::bool(false));
        return;
    };
    table.set_with(backend, Uniform::ReceiveShadow, || UniformValue::bool(drawable.receive_shadow));
    if let Some(skeleton) = &drawable.skeleton {
        table.set_with(backend, Uniform::BoneMatrices, || {
            UniformValue::Mat4Array(skeleton.bone_matrices.iter().flat_map(|m| m.to_cols_array()).collect())
        });
    }
    let morph_count = draw.geometry.morph_positions().len();
    if morph_count > 0 {
        table.set_with(backend, Uniform::MorphTargetInfluences, || {
            let mut influences = drawable.morph_influences.clone();
            influences.resize(morph_count, 0.0);
            UniformValue::FloatArray(influences)
        });
    }
}

/// Writes `values` into one row of a light struct array, field by field.
fn set_row<const N: usize>(
    backend: &mut dyn Backend,
    table: &mut UniformTable,
    row: [Option<usize>; N],
    values: [UniformValue; N],
) {
    for (slot, value) in row.into_iter().zip(values) {
        table.set_at(backend, slot, value);
    }
}

fn upload_light_uniforms(backend: &mut dyn Backend, table: &mut UniformTable, lights: &LightsState) {
    table.set_with(backend, Uniform::AmbientLightColor, || vec3(lights.ambient));

    for (i, light) in lights.directional.iter().enumerate() {
        let Some(&row) = table.lights.directional.get(i) else { break };
        set_row(backend, table, row, [vec3(light.direction), vec3(light.color)]);
    }
    for (i, light) in lights.point.iter().enumerate() {
        let Some(&row) = table.lights.point.get(i) else { break };
        let values = [
            vec3(light.position),
            vec3(light.color),
            UniformValue::Float(light.distance),
            UniformValue::Float(light.decay),
        ];
        set_row(backend, table, row, values);
    }
    for (i, light) in lights.spot.iter().enumerate() {
        let Some(&row) = table.lights.spot.get(i) else { break };
        let values = [
            vec3(light.position),
            vec3(light.direction),
            vec3(light.color),
            UniformValue::Float(light.distance),
            UniformValue::Float(light.decay),
            UniformValue::Float(light.cone_cos),
            UniformValue::Float(light.penumbra_cos),
        ];
        set_row(backend, table, row, values);
    }
    for (i, light) in lights.hemisphere.iter().enumerate() {
        let Some(&row) = table.lights.hemisphere.get(i) else { break };
        let values = [vec3(light.direction), vec3(light.sky_color), vec3(light.ground_color)];
        set_row(backend, table, row, values);
    }
    for (i, light) in lights.rect_area.iter().enumerate() {
        let Some(&row) = table.lights.rect_area.get(i) else { break };
        let values = [
            vec3(light.color),
            vec3(light.position),
            vec3(light.half_width),
            vec3(light.half_height),
        ];
        set_row(backend, table, row, values);
    }

    shadow_uniforms(backend, table, ShadowKind::Directional, &lights.directional_shadows);
    shadow_uniforms(backend, table, ShadowKind::Spot, &lights.spot_shadows);
    shadow_uniforms(backend, table, ShadowKind::Point, &lights.point_shadows);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShadowKind {
    Directional,
    Spot,
    Point,
}

fn shadow_uniforms(backend: &mut dyn Backend, table: &mut UniformTable, kind: ShadowKind, shadows: &ShadowArrays) {
    for (i, shadow) in shadows.params.iter().enumerate() {
        let rows = match kind {
            ShadowKind::Directional => &table.lights.directional_shadows,
            ShadowKind::Spot => &table.lights.spot_shadows,
            ShadowKind::Point => &table.lights.point_shadows,
        };
        let Some(&row) = rows.get(i) else { break };
        let values = [
            UniformValue::Float(shadow.bias),
            UniformValue::Float(shadow.normal_bias),
            UniformValue::Float(shadow.radius),
            UniformValue::Vec2(shadow.map_size.to_array()),
            UniformValue::Float(shadow.camera_near),
            UniformValue::Float(shadow.camera_far),
        ];
        // Only point shadows declare the camera range; the other rows have no slots for it.
        set_row(backend, table, row, values);
    }
    if !shadows.matrices.is_empty() {
        let uniform = match kind {
            ShadowKind::Directional => Uniform::DirectionalShadowMatrix,
            ShadowKind::Spot => Uniform::SpotShadowMatrix,
            ShadowKind::Point => Uniform::PointShadowMatrix,
        };
        table.set_with(backend, uniform, || {
            UniformValue::Mat4Array(shadows.matrices.iter().flat_map(|m| m.to_cols_array()).collect())
        });
    }
}

fn set_float(backend: &mut dyn Backend, table: &mut UniformTable, uniform: Uniform, value: f32) {
    table.set_with(backend, uniform, || UniformValue::Float(value));
}

fn set_vec3(backend: &mut dyn Backend, table: &mut UniformTable, uniform: Uniform, value: Vec3) {
    table.set_with(backend, uniform, || vec3(value));
}

fn standard_uniforms(backend: &mut dyn Backend, table: &mut UniformTable, m: &StandardMaterial) {
    set_vec3(backend, table, Uniform::Diffuse, m.color);
    set_vec3(backend, table, Uniform::Emissive, m.emissive * m.emissive_intensity);
    set_float(backend, table, Uniform::Roughness, m.roughness);
    set_float(backend, table, Uniform::Metalness, m.metalness);
    set_float(backend, table, Uniform::AoMapIntensity, m.ao_map_intensity);
    set_float(backend, table, Uniform::EnvMapIntensity, m.env_map_intensity);
    set_float(backend, table, Uniform::DisplacementScale, m.displacement_scale);
    set_float(backend, table, Uniform::DisplacementBias, m.displacement_bias);
    table.set_with(backend, Uniform::NormalScale, || UniformValue::Vec2(m.normal_scale.to_array()));
}

fn upload_material_uniforms(
    backend: &mut dyn Backend,
    table: &mut UniformTable,
    material: &Material,
    view: &ViewState,
    env_map: Option<&Texture>,
) {
    set_float(backend, table, Uniform::Opacity, material.opacity);
    set_float(backend, table, Uniform::AlphaTest, material.alpha_test);

    match &material.kind {
        MaterialKind::Basic(m) => {
            set_vec3(backend, table, Uniform::Diffuse, m.color);
            set_float(backend, table, Uniform::AoMapIntensity, m.ao_map_intensity);
            set_float(backend, table, Uniform::Reflectivity, m.reflectivity);
        }
        MaterialKind::Lambert(m) => {
            set_vec3(backend, table, Uniform::Diffuse, m.color);
            set_vec3(backend, table, Uniform::Emissive, m.emissive * m.emissive_intensity);
            set_float(backend, table, Uniform::AoMapIntensity, m.ao_map_intensity);
            set_float(backend, table, Uniform::Reflectivity, m.reflectivity);
            table.set_with(backend, Uniform::NormalScale, || UniformValue::Vec2(m.normal_scale.to_array()));
        }
        MaterialKind::Phong(m) => {
            set_vec3(backend, table, Uniform::Diffuse, m.color);
            set_vec3(backend, table, Uniform::Emissive, m.emissive * m.emissive_intensity);
            set_vec3(backend, table, Uniform::Specular, m.specular);
            set_float(backend, table, Uniform::Shininess, m.shininess.max(1e-4));
            set_float(backend, table, Uniform::AoMapIntensity, m.ao_map_intensity);
            set_float(backend, table, Uniform::Reflectivity, m.reflectivity);
            table.set_with(backend, Uniform::NormalScale, || UniformValue::Vec2(m.normal_scale.to_array()));
        }
        MaterialKind::Toon(m) => {
            set_vec3(backend, table, Uniform::Diffuse, m.color);
            set_vec3(backend, table, Uniform::Emissive, m.emissive * m.emissive_intensity);
            set_float(backend, table, Uniform::AoMapIntensity, m.ao_map_intensity);
            table.set_with(backend, Uniform::NormalScale, || UniformValue::Vec2(m.normal_scale.to_array()));
        }
        MaterialKind::Standard(m) => standard_uniforms(backend, table, m),
        MaterialKind::Physical(m) => {
            standard_uniforms(backend, table, &m.base);
            set_float(backend, table, Uniform::Clearcoat, m.clearcoat);
            set_float(backend, table, Uniform::ClearcoatRoughness, m.clearcoat_roughness);
            set_float(backend, table, Uniform::Transmission, m.transmission);
            set_float(backend, table, Uniform::Thickness, m.thickness);
            set_float(backend, table, Uniform::Ior, m.ior);
            set_float(backend, table, Uniform::AttenuationDistance, m.attenuation_distance);
            set_vec3(backend, table, Uniform::AttenuationColor, m.attenuation_color);
            set_vec3(backend, table, Uniform::SheenColor, m.sheen_color * m.sheen);
            set_float(backend, table, Uniform::SheenRoughness, m.sheen_roughness);
            set_float(backend, table, Uniform::SpecularIntensity, m.specular_intensity);
            set_vec3(backend, table, Uniform::SpecularColor, m.specular_color);
            if let Some(transmission) = view.transmission {
                table.set_with(backend, Uniform::TransmissionSamplerSize, || {
                    UniformValue::Vec2(transmission.size.to_array())
                });
            }
        }
        MaterialKind::Points(m) => {
            set_vec3(backend, table, Uniform::Diffuse, m.color);
            set_float(backend, table, Uniform::Size, m.size * view.pixel_ratio);
            set_float(backend, table, Uniform::Scale, view.drawing_height * 0.5);
        }
        MaterialKind::Line(m) => set_vec3(backend, table, Uniform::Diffuse, m.color),
        MaterialKind::Depth(m) => {
            set_float(backend, table, Uniform::DisplacementScale, m.displacement_scale);
            set_float(backend, table, Uniform::DisplacementBias, m.displacement_bias);
        }
        MaterialKind::Distance(m) => {
            set_float(backend, table, Uniform::DisplacementScale, m.displacement_scale);
            set_float(backend, table, Uniform::DisplacementBias, m.displacement_bias);
            if let Some(reference) = view.distance_reference {
                set_vec3(backend, table, Uniform::ReferencePosition, reference.position);
                set_float(backend, table, Uniform::NearDistance, reference.near);
                set_float(backend, table, Uniform::FarDistance, reference.far);
            }
        }
        MaterialKind::Shadow(m) => set_vec3(backend, table, Uniform::Diffuse, m.color),
        MaterialKind::Sprite(m) => {
            set_vec3(backend, table, Uniform::Diffuse, m.color);
            set_float(backend, table, Uniform::Rotation, m.rotation);
        }
        MaterialKind::Shader(m) => {
            for (name, uniform) in &m.uniforms {
                if let ShaderUniform::Value(value) = uniform {
                    if table.has(name) {
                        table.set_named(backend, name, value.clone());
                    }
                }
            }
        }
    }

    if let Some(env) = env_map {
        // Cube maps from images are stored mirrored; rendered ones are not.
        let flip = matches!(env.source, TextureSource::Cube(_)) && env.mapping.is_cube();
        set_float(backend, table, Uniform::FlipEnvMap, if flip { -1.0 } else { 1.0 });
        set_float(backend, table, Uniform::RefractionRatio, 0.98);
    }
}

#[derive(Debug, Clone, Copy)]
enum SamplerBinding<'t> {
    Texture(&'t Texture),
    Target(u64, TargetAttachment),
    Missing,
}

struct SamplerInputs<'s> {
    material: &'s Material,
    env_map: Option<&'s Texture>,
    view: &'s ViewState,
    lights: &'s LightsState,
    assets: &'s AssetCache<Texture>,
}

impl<'s> SamplerInputs<'s> {
    fn resolve(&self, name: &str, source: SamplerSource, index: usize) -> SamplerBinding<'s> {
        let shadow_maps = match source {
            SamplerSource::DirectionalShadowMap => Some(&self.lights.directional_shadows),
            SamplerSource::SpotShadowMap => Some(&self.lights.spot_shadows),
            SamplerSource::PointShadowMap => Some(&self.lights.point_shadows),
            _ => None,
        };
        if let Some(shadows) = shadow_maps {
            return shadows
                .maps
                .get(index)
                .map_or(SamplerBinding::Missing, |target| {
                    SamplerBinding::Target(*target, TargetAttachment::Color(0))
                });
        }
        if source == SamplerSource::TransmissionSamplerMap {
            return self
                .view
                .transmission
                .map_or(SamplerBinding::Missing, |t| {
                    SamplerBinding::Target(t.target, TargetAttachment::Color(0))
                });
        }
        if let MaterialKind::Shader(shader) = &self.material.kind {
            match shader.uniforms.get(name) {
                Some(ShaderUniform::Texture(handle)) => {
                    return self
                        .assets
                        .get(*handle)
                        .map_or(SamplerBinding::Missing, SamplerBinding::Texture);
                }
                Some(ShaderUniform::RenderTarget { target, attachment }) => {
                    return SamplerBinding::Target(*target, *attachment);
                }
                _ => {}
            }
        }
        match source {
            SamplerSource::Map(MapSlot::EnvMap) => {
                self.env_map.map_or(SamplerBinding::Missing, SamplerBinding::Texture)
            }
            SamplerSource::Map(slot) => self
                .material
                .map(slot)
                .and_then(|handle| self.assets.get(handle))
                .map_or(SamplerBinding::Missing, SamplerBinding::Texture),
            _ => SamplerBinding::Missing,
        }
    }
}

fn sampler_target(ty: GlslType) -> TextureTarget {
    match ty {
        GlslType::SamplerCube => TextureTarget::CubeMap,
        GlslType::Sampler3D => TextureTarget::Texture3D,
        GlslType::Sampler2DArray => TextureTarget::Texture2DArray,
        _ => TextureTarget::Texture2D,
    }
}

/// Assigns texture units to every sampler of the program for this draw.
fn bind_samplers(
    backend: &mut dyn Backend,
    state: &mut StateCache,
    textures: &mut TextureManager,
    table: &mut UniformTable,
    inputs: SamplerInputs,
) -> Vec<RenderError> {
    let mut errors = Vec::new();
    let max_units = backend.capabilities().max_texture_units;
    textures.reset_units();

    for index in 0..table.samplers().len() {
        let sampler = table.samplers()[index];
        let Some(slot) = table.slot_at(sampler.slot) else {
            continue;
        };
        let (name, ty, size) = (slot.name.as_str(), slot.ty, slot.size.max(1) as usize);
        let mut units = Vec::with_capacity(size);
        for element in 0..size {
            let unit = textures.allocate_unit(max_units);
            let result = match inputs.resolve(name, sampler.source, element) {
                SamplerBinding::Texture(texture) => textures.bind(backend, state, texture, unit),
                SamplerBinding::Target(target, attachment) => {
                    textures.bind_target_attachment(backend, state, target, attachment, unit)
                }
                SamplerBinding::Missing => {
                    textures.bind_empty(backend, state, sampler_target(ty), unit);
                    Ok(())
                }
            };
            if let Err(error) = result {
                textures.bind_empty(backend, state, sampler_target(ty), unit);
                errors.push(error);
            }
            units.push(unit as i32);
        }
        let value = if size > 1 {
            UniformValue::IntArray(units)
        } else {
            UniformValue::Int(units[0])
        };
        table.set_at(backend, Some(sampler.slot), value);
    }
    errors
}

/// Clears the bound framebuffer. Write masks left by the last material are opened
/// first, or the clear would be masked out.
pub(crate) fn clear_buffers(
    backend: &mut dyn Backend,
    state: &mut StateCache,
    color: Option<[f32; 4]>,
    flags: ClearFlags,
) {
    if flags.is_empty() {
        return;
    }
    if flags.contains(ClearFlags::COLOR) {
        state.set_color_mask(backend, [true; 4]);
        if let Some(color) = color {
            state.set_clear_color(backend, color);
        }
    }
    if flags.contains(ClearFlags::DEPTH) {
        state.set_depth_mask(backend, true);
        state.set_clear_depth(backend, 1.0);
    }
    if flags.contains(ClearFlags::STENCIL) {
        state.set_stencil_mask(backend, u32::MAX);
        state.set_clear_stencil(backend, 0);
    }
    backend.clear(flags);
}

fn primitive_mode(mode: DrawMode, wireframe: bool) -> PrimitiveMode {
    match mode {
        DrawMode::Mesh | DrawMode::Sprite if wireframe => PrimitiveMode::Lines,
        DrawMode::Mesh | DrawMode::Sprite => PrimitiveMode::Triangles,
        DrawMode::Line => PrimitiveMode::Lines,
        DrawMode::LineStrip => PrimitiveMode::LineStrip,
        DrawMode::LineLoop => PrimitiveMode::LineLoop,
        DrawMode::Points => PrimitiveMode::Points,
    }
}

/// Issues the draw call. Returns the vertex count, mode and instance count actually
/// drawn, or `None` when the range is empty.
fn issue_draw(
    backend: &mut dyn Backend,
    state: &mut StateCache,
    geometries: &mut GeometryManager,
    draw: &ObjectDraw,
    instancing: Option<&Instancing>,
) -> Result<Option<(u32, PrimitiveMode, u32)>, RenderError> {
    let geometry = draw.geometry;
    let material = draw.material;
    let wireframe = material.wireframe && draw.mode == DrawMode::Mesh;
    let mode = primitive_mode(draw.mode, wireframe);

    let mut index: Option<IndexType> = None;
    let mut total = geometry.element_count();
    let mut factor = 1;
    if wireframe {
        let (gpu, index_type, len) = geometries.wireframe_index(backend, geometry)?;
        backend.bind_buffer(BufferTarget::ElementArray, Some(gpu.buffer));
        index = Some(index_type);
        total = len;
        factor = 2;
    } else if let Some(attribute) = geometry.index() {
        let Some(gpu) = geometries.buffers.get(attribute.id()) else {
            return Err(RenderError::resource(format!(
                "index buffer of geometry '{}' was not uploaded",
                geometry.name
            )));
        };
        backend.bind_buffer(BufferTarget::ElementArray, Some(gpu.buffer));
        index = Some(attribute.index_type().unwrap_or(IndexType::U32));
    }

    let range = geometry.draw_range;
    let mut start = range.start * factor;
    let mut end = range.count.map_or(total, |count| (range.start + count) * factor);
    if let Some(group) = draw.group {
        start = start.max(group.start * factor);
        end = end.min((group.start + group.count) * factor);
    }
    end = end.min(total);
    if end <= start {
        return Ok(None);
    }
    let count = end - start;

    if matches!(
        mode,
        PrimitiveMode::Lines | PrimitiveMode::LineStrip | PrimitiveMode::LineLoop
    ) {
        let width = match &material.kind {
            MaterialKind::Line(line) if !wireframe => line.linewidth,
            _ => material.wireframe_linewidth,
        };
        state.set_line_width(backend, width);
    }

    let instances = instancing.map(|i| i.count as i32);
    match (index, instances) {
        (Some(index_type), Some(instances)) => backend.draw_elements_instanced(
            mode,
            count as i32,
            index_type,
            (start * index_type.size()) as i32,
            instances,
        ),
        (Some(index_type), None) => {
            backend.draw_elements(mode, count as i32, index_type, (start * index_type.size()) as i32)
        }
        (None, Some(instances)) => {
            backend.draw_arrays_instanced(mode, start as i32, count as i32, instances)
        }
        (None, None) => backend.draw_arrays(mode, start as i32, count as i32),
    }
    Ok(Some((count as u32, mode, instances.unwrap_or(1) as u32)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::{Call, RecordingBackend};
    use crate::renderer::primitives::plane_geometry;
    use crate::renderer::material::ShaderMaterial;

    #[derive(Default)]
    struct Fixture {
        backend: RecordingBackend,
        state: StateCache,
        geometries: GeometryManager,
        textures: TextureManager,
        programs: ProgramCache,
        properties: MaterialProperties,
        vertex: VertexState,
        info: RenderInfo,
        errors: ErrorLog,
        lights: LightsState,
        settings: RendererSettings,
        clipping: Clipping,
        assets: AssetCache<Texture>,
    }

    impl Fixture {
        fn dispatcher(&mut self) -> DrawDispatcher<'_> {
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
                texture_assets: &self.assets,
                precision: Precision::Highp,
                frame: 1,
            }
        }
    }

    fn view() -> ViewState {
        ViewState {
            view: Mat4::IDENTITY,
            projection: Mat4::perspective_rh_gl(1.0, 1.0, 0.1, 100.0),
            camera_position: Vec3::ZERO,
            orthographic: false,
            generation: 1,
            fog: None,
            environment: None,
            tone_mapping: ToneMapping::None,
            output_srgb: false,
            transmission: None,
            shadow_pass: false,
            distance_reference: None,
            drawing_height: 600.0,
            pixel_ratio: 1.0,
        }
    }

    #[test]
    fn draws_indexed_geometry_once() {
        let mut fixture = Fixture::default();
        let geometry = plane_geometry(1.0, 1.0, 1, 1);
        let material = Material::basic(Vec3::ONE);
        let draw = ObjectDraw::new(Mat4::from_translation(Vec3::X), &geometry, &material);

        assert!(fixture.dispatcher().render_object(&draw, &view()));
        let draws = fixture.backend.draws();
        assert_eq!(draws.len(), 1);
        assert!(draws[0].indexed);
        assert_eq!(draws[0].count, 6);
        assert_eq!(draws[0].translation(), Some(Vec3::X));
        assert_eq!(fixture.info.triangles, 2);
    }

    #[test]
    fn unchanged_uniforms_are_not_reuploaded() {
        let mut fixture = Fixture::default();
        let geometry = plane_geometry(1.0, 1.0, 1, 1);
        let material = Material::basic(Vec3::ONE);
        let draw = ObjectDraw::new(Mat4::IDENTITY, &geometry, &material);

        fixture.dispatcher().render_object(&draw, &view());
        let first = fixture.backend.count(|c| matches!(c, Call::Uniform(..)));
        fixture.backend.clear_calls();
        fixture.dispatcher().render_object(&draw, &view());
        let second = fixture.backend.count(|c| matches!(c, Call::Uniform(..)));
        assert!(first > 0);
        assert_eq!(second, 0);
    }

    #[test]
    fn instanced_matrices_span_four_locations() {
        let mut fixture = Fixture::default();
        let geometry = plane_geometry(1.0, 1.0, 1, 1);
        let material = Material::basic(Vec3::ONE);
        let geometry_handle = Handle::new(0, 0);
        let drawable = Drawable::mesh(geometry_handle, Handle::new(0, 0))
            .with_instancing(Instancing::new(&[Mat4::IDENTITY, Mat4::from_translation(Vec3::Y)]));
        let draw = ObjectDraw {
            drawable: Some(&drawable),
            ..ObjectDraw::new(Mat4::IDENTITY, &geometry, &material)
        };

        assert!(fixture.dispatcher().render_object(&draw, &view()));
        let divisors = fixture
            .backend
            .count(|c| matches!(c, Call::VertexAttribDivisor(_, 1)));
        assert_eq!(divisors, 4);
        assert_eq!(fixture.backend.draws()[0].instances, Some(2));
    }

    #[test]
    fn wireframe_draws_lines() {
        let mut fixture = Fixture::default();
        let geometry = plane_geometry(1.0, 1.0, 1, 1);
        let material = Material::basic(Vec3::ONE).with_wireframe();
        let draw = ObjectDraw::new(Mat4::IDENTITY, &geometry, &material);

        assert!(fixture.dispatcher().render_object(&draw, &view()));
        let draws = fixture.backend.draws();
        assert_eq!(draws[0].mode, PrimitiveMode::Lines);
        assert_eq!(draws[0].count, 12);
    }

    #[test]
    fn groups_restrict_the_range() {
        let mut fixture = Fixture::default();
        let geometry = plane_geometry(1.0, 1.0, 1, 1);
        let material = Material::basic(Vec3::ONE);
        let draw = ObjectDraw {
            group: Some(GeometryGroup {
                start: 3,
                count: 3,
                material_index: 0,
            }),
            ..ObjectDraw::new(Mat4::IDENTITY, &geometry, &material)
        };

        fixture.dispatcher().render_object(&draw, &view());
        let draws = fixture.backend.draws();
        assert_eq!(draws[0].count, 3);
        assert_eq!(draws[0].first, 3);
    }

    #[test]
    fn compile_failure_skips_only_the_broken_material() {
        let mut fixture = Fixture::default();
        fixture.backend.fail_compile_containing("BROKEN");
        let geometry = plane_geometry(1.0, 1.0, 1, 1);
        let broken = Material::shader(ShaderMaterial::new(
            "void main() { gl_Position = vec4( position, 1.0 ); }",
            "void main() { BROKEN; }",
        ));
        let fine = Material::basic(Vec3::ONE);

        let mut dispatcher = fixture.dispatcher();
        assert!(!dispatcher.render_object(&ObjectDraw::new(Mat4::IDENTITY, &geometry, &broken), &view()));
        assert!(dispatcher.render_object(&ObjectDraw::new(Mat4::IDENTITY, &geometry, &fine), &view()));
        assert_eq!(fixture.info.errors.compile, 1);
        assert_eq!(fixture.backend.draws().len(), 1);
    }

    #[test]
    fn missing_texture_binds_nothing_and_still_draws() {
        let mut fixture = Fixture::default();
        let geometry = plane_geometry(1.0, 1.0, 1, 1);
        let material = Material::basic(Vec3::ONE).with_map(Handle::new(7, 0));
        let draw = ObjectDraw::new(Mat4::IDENTITY, &geometry, &material);

        assert!(fixture.dispatcher().render_object(&draw, &view()));
        assert!(fixture
            .backend
            .calls()
            .iter()
            .any(|c| matches!(c, Call::BindTexture(TextureTarget::Texture2D, None))));
    }
}
