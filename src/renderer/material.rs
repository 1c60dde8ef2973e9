// renderer/material.rs

use std::collections::BTreeMap;

use glam::{Vec2, Vec3};

use crate::asset::{next_resource_id, Handle};
use crate::renderer::backend::{BlendEquation, BlendFactor, CompareFunc, StencilOp, UniformValue};
use crate::renderer::texture::{TargetAttachment, Texture};
use crate::scene::bounds::Plane;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Side {
    #[default]
    Front,
    Back,
    Double,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Blending {
    None,
    #[default]
    Normal,
    Additive,
    Subtractive,
    Multiply,
    Custom {
        equation: BlendEquation,
        alpha_equation: BlendEquation,
        src: BlendFactor,
        dst: BlendFactor,
        src_alpha: BlendFactor,
        dst_alpha: BlendFactor,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilState {
    pub func: CompareFunc,
    pub reference: i32,
    pub func_mask: u32,
    pub write_mask: u32,
    pub fail: StencilOp,
    pub z_fail: StencilOp,
    pub z_pass: StencilOp,
}

impl Default for StencilState {
    fn default() -> Self {
        Self {
            func: CompareFunc::Always,
            reference: 0,
            func_mask: 0xff,
            write_mask: 0xff,
            fail: StencilOp::Keep,
            z_fail: StencilOp::Keep,
            z_pass: StencilOp::Keep,
        }
    }
}

/// How a depth material encodes depth into the color buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DepthPacking {
    /// Linear grey value.
    Basic,
    /// 32 bits spread over the RGBA channels.
    #[default]
    Rgba,
}

/// Texture inputs a material can sample, in texture-unit allocation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MapSlot {
    Map,
    AlphaMap,
    NormalMap,
    EmissiveMap,
    RoughnessMap,
    MetalnessMap,
    AoMap,
    SpecularMap,
    EnvMap,
    GradientMap,
    DisplacementMap,
    TransmissionMap,
    TransmissionSamplerMap,
}

impl MapSlot {
    pub const ALL: [MapSlot; 13] = [
        MapSlot::Map,
        MapSlot::AlphaMap,
        MapSlot::NormalMap,
        MapSlot::EmissiveMap,
        MapSlot::RoughnessMap,
        MapSlot::MetalnessMap,
        MapSlot::AoMap,
        MapSlot::SpecularMap,
        MapSlot::EnvMap,
        MapSlot::GradientMap,
        MapSlot::DisplacementMap,
        MapSlot::TransmissionMap,
        MapSlot::TransmissionSamplerMap,
    ];

    pub fn uniform_name(self) -> &'static str {
        match self {
            MapSlot::Map => "map",
            MapSlot::AlphaMap => "alphaMap",
            MapSlot::NormalMap => "normalMap",
            MapSlot::EmissiveMap => "emissiveMap",
            MapSlot::RoughnessMap => "roughnessMap",
            MapSlot::MetalnessMap => "metalnessMap",
            MapSlot::AoMap => "aoMap",
            MapSlot::SpecularMap => "specularMap",
            MapSlot::EnvMap => "envMap",
            MapSlot::GradientMap => "gradientMap",
            MapSlot::DisplacementMap => "displacementMap",
            MapSlot::TransmissionMap => "transmissionMap",
            MapSlot::TransmissionSamplerMap => "transmissionSamplerMap",
        }
    }

    /// Preprocessor define enabling the slot in the built-in shaders.
    pub fn define(self) -> &'static str {
        match self {
            MapSlot::Map => "USE_MAP",
            MapSlot::AlphaMap => "USE_ALPHAMAP",
            MapSlot::NormalMap => "USE_NORMALMAP",
            MapSlot::EmissiveMap => "USE_EMISSIVEMAP",
            MapSlot::RoughnessMap => "USE_ROUGHNESSMAP",
            MapSlot::MetalnessMap => "USE_METALNESSMAP",
            MapSlot::AoMap => "USE_AOMAP",
            MapSlot::SpecularMap => "USE_SPECULARMAP",
            MapSlot::EnvMap => "USE_ENVMAP",
            MapSlot::GradientMap => "USE_GRADIENTMAP",
            MapSlot::DisplacementMap => "USE_DISPLACEMENTMAP",
            MapSlot::TransmissionMap => "USE_TRANSMISSIONMAP",
            MapSlot::TransmissionSamplerMap => "USE_TRANSMISSION",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasicMaterial {
    pub color: Vec3,
    pub map: Option<Handle<Texture>>,
    pub alpha_map: Option<Handle<Texture>>,
    pub ao_map: Option<Handle<Texture>>,
    pub ao_map_intensity: f32,
    pub specular_map: Option<Handle<Texture>>,
    pub env_map: Option<Handle<Texture>>,
    pub reflectivity: f32,
}

impl Default for BasicMaterial {
    fn default() -> Self {
        Self {
            color: Vec3::ONE,
            map: None,
            alpha_map: None,
            ao_map: None,
            ao_map_intensity: 1.0,
            specular_map: None,
            env_map: None,
            reflectivity: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LambertMaterial {
    pub color: Vec3,
    pub emissive: Vec3,
    pub emissive_intensity: f32,
    pub map: Option<Handle<Texture>>,
    pub alpha_map: Option<Handle<Texture>>,
    pub normal_map: Option<Handle<Texture>>,
    pub normal_scale: Vec2,
    pub emissive_map: Option<Handle<Texture>>,
    pub ao_map: Option<Handle<Texture>>,
    pub ao_map_intensity: f32,
    pub specular_map: Option<Handle<Texture>>,
    pub env_map: Option<Handle<Texture>>,
    pub reflectivity: f32,
}

impl Default for LambertMaterial {
    fn default() -> Self {
        Self {
            color: Vec3::ONE,
            emissive: Vec3::ZERO,
            emissive_intensity: 1.0,
            map: None,
            alpha_map: None,
            normal_map: None,
            normal_scale: Vec2::ONE,
            emissive_map: None,
            ao_map: None,
            ao_map_intensity: 1.0,
            specular_map: None,
            env_map: None,
            reflectivity: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhongMaterial {
    pub color: Vec3,
    pub emissive: Vec3,
    pub emissive_intensity: f32,
    pub specular: Vec3,
    pub shininess: f32,
    pub map: Option<Handle<Texture>>,
    pub alpha_map: Option<Handle<Texture>>,
    pub normal_map: Option<Handle<Texture>>,
    pub normal_scale: Vec2,
    pub emissive_map: Option<Handle<Texture>>,
    pub ao_map: Option<Handle<Texture>>,
    pub ao_map_intensity: f32,
    pub specular_map: Option<Handle<Texture>>,
    pub env_map: Option<Handle<Texture>>,
    pub reflectivity: f32,
    pub flat_shading: bool,
}

impl Default for PhongMaterial {
    fn default() -> Self {
        Self {
            color: Vec3::ONE,
            emissive: Vec3::ZERO,
            emissive_intensity: 1.0,
            specular: Vec3::splat(0.067),
            shininess: 30.0,
            map: None,
            alpha_map: None,
            normal_map: None,
            normal_scale: Vec2::ONE,
            emissive_map: None,
            ao_map: None,
            ao_map_intensity: 1.0,
            specular_map: None,
            env_map: None,
            reflectivity: 1.0,
            flat_shading: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToonMaterial {
    pub color: Vec3,
    pub emissive: Vec3,
    pub emissive_intensity: f32,
    pub map: Option<Handle<Texture>>,
    /// Lookup of the light ramp; without it two hard bands are used.
    pub gradient_map: Option<Handle<Texture>>,
    pub alpha_map: Option<Handle<Texture>>,
    pub normal_map: Option<Handle<Texture>>,
    pub normal_scale: Vec2,
    pub emissive_map: Option<Handle<Texture>>,
    pub ao_map: Option<Handle<Texture>>,
    pub ao_map_intensity: f32,
}

impl Default for ToonMaterial {
    fn default() -> Self {
        Self {
            color: Vec3::ONE,
            emissive: Vec3::ZERO,
            emissive_intensity: 1.0,
            map: None,
            gradient_map: None,
            alpha_map: None,
            normal_map: None,
            normal_scale: Vec2::ONE,
            emissive_map: None,
            ao_map: None,
            ao_map_intensity: 1.0,
        }
    }
}

/// Metallic-roughness PBR material.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardMaterial {
    pub color: Vec3,
    pub emissive: Vec3,
    pub emissive_intensity: f32,
    pub roughness: f32,
    pub metalness: f32,
    pub map: Option<Handle<Texture>>,
    pub alpha_map: Option<Handle<Texture>>,
    pub normal_map: Option<Handle<Texture>>,
    pub normal_scale: Vec2,
    pub emissive_map: Option<Handle<Texture>>,
    pub roughness_map: Option<Handle<Texture>>,
    pub metalness_map: Option<Handle<Texture>>,
    pub ao_map: Option<Handle<Texture>>,
    pub ao_map_intensity: f32,
    /// Falls back to the scene environment when unset.
    pub env_map: Option<Handle<Texture>>,
    pub env_map_intensity: f32,
    pub displacement_map: Option<Handle<Texture>>,
    pub displacement_scale: f32,
    pub displacement_bias: f32,
    pub flat_shading: bool,
}

impl Default for StandardMaterial {
    fn default() -> Self {
        Self {
            color: Vec3::ONE,
            emissive: Vec3::ZERO,
            emissive_intensity: 1.0,
            roughness: 1.0,
            metalness: 0.0,
            map: None,
            alpha_map: None,
            normal_map: None,
            normal_scale: Vec2::ONE,
            emissive_map: None,
            roughness_map: None,
            metalness_map: None,
            ao_map: None,
            ao_map_intensity: 1.0,
            env_map: None,
            env_map_intensity: 1.0,
            displacement_map: None,
            displacement_scale: 1.0,
            displacement_bias: 0.0,
            flat_shading: false,
        }
    }
}

/// Standard material extended with clearcoat, sheen, specular and transmission.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalMaterial {
    pub base: StandardMaterial,
    pub clearcoat: f32,
    pub clearcoat_roughness: f32,
    pub transmission: f32,
    pub transmission_map: Option<Handle<Texture>>,
    pub thickness: f32,
    pub ior: f32,
    /// Zero means no absorption.
    pub attenuation_distance: f32,
    pub attenuation_color: Vec3,
    pub sheen: f32,
    pub sheen_color: Vec3,
    pub sheen_roughness: f32,
    pub specular_intensity: f32,
    pub specular_color: Vec3,
}

impl Default for PhysicalMaterial {
    fn default() -> Self {
        Self {
            base: StandardMaterial::default(),
            clearcoat: 0.0,
            clearcoat_roughness: 0.0,
            transmission: 0.0,
            transmission_map: None,
            thickness: 0.0,
            ior: 1.5,
            attenuation_distance: 0.0,
            attenuation_color: Vec3::ONE,
            sheen: 0.0,
            sheen_color: Vec3::ZERO,
            sheen_roughness: 1.0,
            specular_intensity: 1.0,
            specular_color: Vec3::ONE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointsMaterial {
    pub color: Vec3,
    pub size: f32,
    pub size_attenuation: bool,
    pub map: Option<Handle<Texture>>,
    pub alpha_map: Option<Handle<Texture>>,
}

impl Default for PointsMaterial {
    fn default() -> Self {
        Self {
            color: Vec3::ONE,
            size: 1.0,
            size_attenuation: true,
            map: None,
            alpha_map: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineMaterial {
    pub color: Vec3,
    pub linewidth: f32,
}

impl Default for LineMaterial {
    fn default() -> Self {
        Self {
            color: Vec3::ONE,
            linewidth: 1.0,
        }
    }
}

/// Writes depth as color; the substitute used for directional and spot shadow maps.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthMaterial {
    pub packing: DepthPacking,
    pub map: Option<Handle<Texture>>,
    pub alpha_map: Option<Handle<Texture>>,
    pub displacement_map: Option<Handle<Texture>>,
    pub displacement_scale: f32,
    pub displacement_bias: f32,
}

impl Default for DepthMaterial {
    fn default() -> Self {
        Self {
            packing: DepthPacking::Rgba,
            map: None,
            alpha_map: None,
            displacement_map: None,
            displacement_scale: 1.0,
            displacement_bias: 0.0,
        }
    }
}

/// Writes the normalized distance to a reference point; the point-light substitute.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMaterial {
    pub map: Option<Handle<Texture>>,
    pub alpha_map: Option<Handle<Texture>>,
    pub displacement_map: Option<Handle<Texture>>,
    pub displacement_scale: f32,
    pub displacement_bias: f32,
}

impl Default for DistanceMaterial {
    fn default() -> Self {
        Self {
            map: None,
            alpha_map: None,
            displacement_map: None,
            displacement_scale: 1.0,
            displacement_bias: 0.0,
        }
    }
}

/// Draws only the shadows received by the surface.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowMaterial {
    pub color: Vec3,
}

impl Default for ShadowMaterial {
    fn default() -> Self {
        Self { color: Vec3::ZERO }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpriteMaterial {
    pub color: Vec3,
    pub map: Option<Handle<Texture>>,
    pub alpha_map: Option<Handle<Texture>>,
    /// Rotation in radians around the view axis.
    pub rotation: f32,
    pub size_attenuation: bool,
}

impl Default for SpriteMaterial {
    fn default() -> Self {
        Self {
            color: Vec3::ONE,
            map: None,
            alpha_map: None,
            rotation: 0.0,
            size_attenuation: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShaderUniform {
    Value(UniformValue),
    Texture(Handle<Texture>),
    /// Samples an attachment of a render target set up by the renderer.
    RenderTarget {
        target: u64,
        attachment: TargetAttachment,
    },
}

/// User-provided GLSL. The renderer prepends its prefix (version, precision, defines,
/// built-in uniforms and attributes) and resolves `#include <chunk>` directives.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ShaderMaterial {
    pub vertex_shader: String,
    pub fragment_shader: String,
    pub uniforms: BTreeMap<String, ShaderUniform>,
    pub defines: BTreeMap<String, String>,
    /// Receives the scene light uniforms.
    pub lights: bool,
}

impl ShaderMaterial {
    pub fn new(vertex_shader: impl Into<String>, fragment_shader: impl Into<String>) -> Self {
        Self {
            vertex_shader: vertex_shader.into(),
            fragment_shader: fragment_shader.into(),
            ..Default::default()
        }
    }

    pub fn with_uniform(mut self, name: impl Into<String>, value: UniformValue) -> Self {
        self.uniforms.insert(name.into(), ShaderUniform::Value(value));
        self
    }

    pub fn with_texture(mut self, name: impl Into<String>, texture: Handle<Texture>) -> Self {
        self.uniforms.insert(name.into(), ShaderUniform::Texture(texture));
        self
    }

    pub fn with_render_target(
        mut self,
        name: impl Into<String>,
        target: u64,
        attachment: TargetAttachment,
    ) -> Self {
        self.uniforms
            .insert(name.into(), ShaderUniform::RenderTarget { target, attachment });
        self
    }

    pub fn with_define(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.defines.insert(name.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MaterialKind {
    Basic(BasicMaterial),
    Lambert(LambertMaterial),
    Phong(PhongMaterial),
    Standard(StandardMaterial),
    Physical(PhysicalMaterial),
    Toon(ToonMaterial),
    Points(PointsMaterial),
    Line(LineMaterial),
    Depth(DepthMaterial),
    Distance(DistanceMaterial),
    Shadow(ShadowMaterial),
    Sprite(SpriteMaterial),
    Shader(ShaderMaterial),
}

impl MaterialKind {
    /// Short name used in variant keys and logs.
    pub fn name(&self) -> &'static str {
        match self {
            MaterialKind::Basic(_) => "basic",
            MaterialKind::Lambert(_) => "lambert",
            MaterialKind::Phong(_) => "phong",
            MaterialKind::Standard(_) => "standard",
            MaterialKind::Physical(_) => "physical",
            MaterialKind::Toon(_) => "toon",
            MaterialKind::Points(_) => "points",
            MaterialKind::Line(_) => "line",
            MaterialKind::Depth(_) => "depth",
            MaterialKind::Distance(_) => "distance",
            MaterialKind::Shadow(_) => "shadow",
            MaterialKind::Sprite(_) => "sprite",
            MaterialKind::Shader(_) => "shader",
        }
    }

    /// Whether the material reads the scene lights.
    pub fn uses_lights(&self) -> bool {
        match self {
            MaterialKind::Lambert(_)
            | MaterialKind::Phong(_)
            | MaterialKind::Standard(_)
            | MaterialKind::Physical(_)
            | MaterialKind::Toon(_)
            | MaterialKind::Shadow(_) => true,
            MaterialKind::Shader(shader) => shader.lights,
            _ => false,
        }
    }

    pub fn is_physically_based(&self) -> bool {
        matches!(self, MaterialKind::Standard(_) | MaterialKind::Physical(_))
    }
}

#[derive(Debug)]
pub struct Material {
    id: u64,
    pub name: String,
    pub kind: MaterialKind,
    pub side: Side,
    /// Side rendered into shadow maps; `None` uses the opposite of `side` for VSM and
    /// `side` otherwise.
    pub shadow_side: Option<Side>,
    pub transparent: bool,
    pub opacity: f32,
    pub blending: Blending,
    pub premultiplied_alpha: bool,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_func: CompareFunc,
    pub color_write: bool,
    pub stencil: Option<StencilState>,
    /// `(factor, units)`.
    pub polygon_offset: Option<(f32, f32)>,
    /// Fragments with alpha below this value are discarded; zero disables the test.
    pub alpha_test: f32,
    pub alpha_to_coverage: bool,
    pub vertex_colors: bool,
    pub fog: bool,
    pub tone_mapped: bool,
    pub dithering: bool,
    pub wireframe: bool,
    pub wireframe_linewidth: f32,
    pub clipping_planes: Vec<Plane>,
    pub clip_intersection: bool,
    pub clip_shadows: bool,
    pub force_single_pass: bool,
    pub visible: bool,
    version: u64,
}

impl Clone for Material {
    fn clone(&self) -> Self {
        Self {
            id: next_resource_id(),
            name: self.name.clone(),
            kind: self.kind.clone(),
            side: self.side,
            shadow_side: self.shadow_side,
            transparent: self.transparent,
            opacity: self.opacity,
            blending: self.blending,
            premultiplied_alpha: self.premultiplied_alpha,
            depth_test: self.depth_test,
            depth_write: self.depth_write,
            depth_func: self.depth_func,
            color_write: self.color_write,
            stencil: self.stencil,
            polygon_offset: self.polygon_offset,
            alpha_test: self.alpha_test,
            alpha_to_coverage: self.alpha_to_coverage,
            vertex_colors: self.vertex_colors,
            fog: self.fog,
            tone_mapped: self.tone_mapped,
            dithering: self.dithering,
            wireframe: self.wireframe,
            wireframe_linewidth: self.wireframe_linewidth,
            clipping_planes: self.clipping_planes.clone(),
            clip_intersection: self.clip_intersection,
            clip_shadows: self.clip_shadows,
            force_single_pass: self.force_single_pass,
            visible: self.visible,
            version: self.version,
        }
    }
}

impl Material {
    pub fn new(kind: MaterialKind) -> Self {
        let fog = !matches!(
            kind,
            MaterialKind::Depth(_) | MaterialKind::Distance(_) | MaterialKind::Shader(_)
        );
        let transparent = matches!(kind, MaterialKind::Shadow(_) | MaterialKind::Sprite(_));
        Self {
            id: next_resource_id(),
            name: String::new(),
            kind,
            side: Side::Front,
            shadow_side: None,
            transparent,
            opacity: 1.0,
            blending: Blending::Normal,
            premultiplied_alpha: false,
            depth_test: true,
            depth_write: true,
            depth_func: CompareFunc::LessEqual,
            color_write: true,
            stencil: None,
            polygon_offset: None,
            alpha_test: 0.0,
            alpha_to_coverage: false,
            vertex_colors: false,
            fog,
            tone_mapped: true,
            dithering: false,
            wireframe: false,
            wireframe_linewidth: 1.0,
            clipping_planes: Vec::new(),
            clip_intersection: false,
            clip_shadows: false,
            force_single_pass: false,
            visible: true,
            version: 0,
        }
    }

    pub fn basic(color: Vec3) -> Self {
        Self::new(MaterialKind::Basic(BasicMaterial {
            color,
            ..Default::default()
        }))
    }

    pub fn lambert(color: Vec3) -> Self {
        Self::new(MaterialKind::Lambert(LambertMaterial {
            color,
            ..Default::default()
        }))
    }

    pub fn phong(color: Vec3) -> Self {
        Self::new(MaterialKind::Phong(PhongMaterial {
            color,
            ..Default::default()
        }))
    }

    pub fn standard(color: Vec3, roughness: f32, metalness: f32) -> Self {
        Self::new(MaterialKind::Standard(StandardMaterial {
            color,
            roughness: roughness.clamp(0.0, 1.0),
            metalness: metalness.clamp(0.0, 1.0),
            ..Default::default()
        }))
    }

    pub fn physical(physical: PhysicalMaterial) -> Self {
        Self::new(MaterialKind::Physical(physical))
    }

    pub fn toon(color: Vec3) -> Self {
        Self::new(MaterialKind::Toon(ToonMaterial {
            color,
            ..Default::default()
        }))
    }

    pub fn points(color: Vec3, size: f32) -> Self {
        Self::new(MaterialKind::Points(PointsMaterial {
            color,
            size,
            ..Default::default()
        }))
    }

    pub fn line(color: Vec3) -> Self {
        Self::new(MaterialKind::Line(LineMaterial {
            color,
            ..Default::default()
        }))
    }

    pub fn shadow(color: Vec3) -> Self {
        Self::new(MaterialKind::Shadow(ShadowMaterial { color }))
    }

    pub fn sprite(color: Vec3) -> Self {
        Self::new(MaterialKind::Sprite(SpriteMaterial {
            color,
            ..Default::default()
        }))
    }

    pub fn shader(shader: ShaderMaterial) -> Self {
        Self::new(MaterialKind::Shader(shader))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_side(mut self, side: Side) -> Self {
        self.side = side;
        self
    }

    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity.clamp(0.0, 1.0);
        self.transparent = true;
        self
    }

    pub fn with_transparent(mut self, transparent: bool) -> Self {
        self.transparent = transparent;
        self
    }

    pub fn with_blending(mut self, blending: Blending) -> Self {
        self.blending = blending;
        self
    }

    pub fn with_alpha_test(mut self, alpha_test: f32) -> Self {
        self.alpha_test = alpha_test;
        self
    }

    pub fn with_vertex_colors(mut self) -> Self {
        self.vertex_colors = true;
        self
    }

    pub fn with_wireframe(mut self) -> Self {
        self.wireframe = true;
        self
    }

    pub fn with_clipping_planes(mut self, planes: Vec<Plane>) -> Self {
        self.clipping_planes = planes;
        self
    }

    pub fn with_map(mut self, texture: Handle<Texture>) -> Self {
        self.set_map(MapSlot::Map, Some(texture));
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Marks the material as changed; programs and uniforms are re-evaluated.
    pub fn needs_update(&mut self) {
        self.version += 1;
    }

    /// Transmission factor; greater than zero routes the object to the transmissive list.
    pub fn transmission(&self) -> f32 {
        match &self.kind {
            MaterialKind::Physical(physical) => physical.transmission,
            _ => 0.0,
        }
    }

    pub fn is_double_sided(&self) -> bool {
        self.side == Side::Double
    }

    /// Texture bound to `slot`, if the material kind has that slot.
    pub fn map(&self, slot: MapSlot) -> Option<Handle<Texture>> {
        match (&self.kind, slot) {
            (MaterialKind::Basic(m), MapSlot::Map) => m.map,
            (MaterialKind::Basic(m), MapSlot::AlphaMap) => m.alpha_map,
            (MaterialKind::Basic(m), MapSlot::AoMap) => m.ao_map,
            (MaterialKind::Basic(m), MapSlot::SpecularMap) => m.specular_map,
            (MaterialKind::Basic(m), MapSlot::EnvMap) => m.env_map,

            (MaterialKind::Lambert(m), MapSlot::Map) => m.map,
            (MaterialKind::Lambert(m), MapSlot::AlphaMap) => m.alpha_map,
            (MaterialKind::Lambert(m), MapSlot::NormalMap) => m.normal_map,
            (MaterialKind::Lambert(m), MapSlot::EmissiveMap) => m.emissive_map,
            (MaterialKind::Lambert(m), MapSlot::AoMap) => m.ao_map,
            (MaterialKind::Lambert(m), MapSlot::SpecularMap) => m.specular_map,
            (MaterialKind::Lambert(m), MapSlot::EnvMap) => m.env_map,

            (MaterialKind::Phong(m), MapSlot::Map) => m.map,
            (MaterialKind::Phong(m), MapSlot::AlphaMap) => m.alpha_map,
            (MaterialKind::Phong(m), MapSlot::NormalMap) => m.normal_map,
            (MaterialKind::Phong(m), MapSlot::EmissiveMap) => m.emissive_map,
            (MaterialKind::Phong(m), MapSlot::AoMap) => m.ao_map,
            (MaterialKind::Phong(m), MapSlot::SpecularMap) => m.specular_map,
            (MaterialKind::Phong(m), MapSlot::EnvMap) => m.env_map,

            (MaterialKind::Toon(m), MapSlot::Map) => m.map,
            (MaterialKind::Toon(m), MapSlot::GradientMap) => m.gradient_map,
            (MaterialKind::Toon(m), MapSlot::AlphaMap) => m.alpha_map,
            (MaterialKind::Toon(m), MapSlot::NormalMap) => m.normal_map,
            (MaterialKind::Toon(m), MapSlot::EmissiveMap) => m.emissive_map,
            (MaterialKind::Toon(m), MapSlot::AoMap) => m.ao_map,

            (MaterialKind::Standard(m), slot) => standard_map(m, slot),
            (MaterialKind::Physical(m), MapSlot::TransmissionMap) => m.transmission_map,
            (MaterialKind::Physical(m), slot) => standard_map(&m.base, slot),

            (MaterialKind::Points(m), MapSlot::Map) => m.map,
            (MaterialKind::Points(m), MapSlot::AlphaMap) => m.alpha_map,
            (MaterialKind::Sprite(m), MapSlot::Map) => m.map,
            (MaterialKind::Sprite(m), MapSlot::AlphaMap) => m.alpha_map,

            (MaterialKind::Depth(m), MapSlot::Map) => m.map,
            (MaterialKind::Depth(m), MapSlot::AlphaMap) => m.alpha_map,
            (MaterialKind::Depth(m), MapSlot::DisplacementMap) => m.displacement_map,
            (MaterialKind::Distance(m), MapSlot::Map) => m.map,
            (MaterialKind::Distance(m), MapSlot::AlphaMap) => m.alpha_map,
            (MaterialKind::Distance(m), MapSlot::DisplacementMap) => m.displacement_map,
            _ => None,
        }
    }

    /// Assigns a texture to `slot`. Returns false when the kind has no such slot.
    pub fn set_map(&mut self, slot: MapSlot, texture: Option<Handle<Texture>>) -> bool {
        let kind_name = self.kind.name();
        let target = match (&mut self.kind, slot) {
            (MaterialKind::Basic(m), MapSlot::Map) => &mut m.map,
            (MaterialKind::Basic(m), MapSlot::AlphaMap) => &mut m.alpha_map,
            (MaterialKind::Basic(m), MapSlot::AoMap) => &mut m.ao_map,
            (MaterialKind::Basic(m), MapSlot::SpecularMap) => &mut m.specular_map,
            (MaterialKind::Basic(m), MapSlot::EnvMap) => &mut m.env_map,
            (MaterialKind::Lambert(m), MapSlot::Map) => &mut m.map,
            (MaterialKind::Lambert(m), MapSlot::NormalMap) => &mut m.normal_map,
            (MaterialKind::Lambert(m), MapSlot::EnvMap) => &mut m.env_map,
            (MaterialKind::Phong(m), MapSlot::Map) => &mut m.map,
            (MaterialKind::Phong(m), MapSlot::NormalMap) => &mut m.normal_map,
            (MaterialKind::Phong(m), MapSlot::EnvMap) => &mut m.env_map,
            (MaterialKind::Toon(m), MapSlot::Map) => &mut m.map,
            (MaterialKind::Toon(m), MapSlot::GradientMap) => &mut m.gradient_map,
            (MaterialKind::Standard(m), MapSlot::Map) => &mut m.map,
            (MaterialKind::Standard(m), MapSlot::NormalMap) => &mut m.normal_map,
            (MaterialKind::Standard(m), MapSlot::RoughnessMap) => &mut m.roughness_map,
            (MaterialKind::Standard(m), MapSlot::MetalnessMap) => &mut m.metalness_map,
            (MaterialKind::Standard(m), MapSlot::EnvMap) => &mut m.env_map,
            (MaterialKind::Standard(m), MapSlot::AoMap) => &mut m.ao_map,
            (MaterialKind::Standard(m), MapSlot::EmissiveMap) => &mut m.emissive_map,
            (MaterialKind::Standard(m), MapSlot::DisplacementMap) => &mut m.displacement_map,
            (MaterialKind::Physical(m), MapSlot::Map) => &mut m.base.map,
            (MaterialKind::Physical(m), MapSlot::EnvMap) => &mut m.base.env_map,
            (MaterialKind::Physical(m), MapSlot::NormalMap) => &mut m.base.normal_map,
            (MaterialKind::Physical(m), MapSlot::TransmissionMap) => &mut m.transmission_map,
            (MaterialKind::Points(m), MapSlot::Map) => &mut m.map,
            (MaterialKind::Sprite(m), MapSlot::Map) => &mut m.map,
            (MaterialKind::Depth(m), MapSlot::Map) => &mut m.map,
            (MaterialKind::Depth(m), MapSlot::AlphaMap) => &mut m.alpha_map,
            (MaterialKind::Depth(m), MapSlot::DisplacementMap) => &mut m.displacement_map,
            (MaterialKind::Distance(m), MapSlot::Map) => &mut m.map,
            (MaterialKind::Distance(m), MapSlot::AlphaMap) => &mut m.alpha_map,
            (MaterialKind::Distance(m), MapSlot::DisplacementMap) => &mut m.displacement_map,
            _ => {
                log::warn!("Material kind '{}' has no settable {:?} slot", kind_name, slot);
                return false;
            }
        };
        *target = texture;
        self.version += 1;
        true
    }

    /// All textures referenced by the material, built-in slots first.
    pub fn textures(&self) -> Vec<Handle<Texture>> {
        let mut out: Vec<Handle<Texture>> =
            MapSlot::ALL.iter().filter_map(|&slot| self.map(slot)).collect();
        if let MaterialKind::Shader(shader) = &self.kind {
            out.extend(shader.uniforms.values().filter_map(|u| match u {
                ShaderUniform::Texture(handle) => Some(*handle),
                ShaderUniform::Value(_) | ShaderUniform::RenderTarget { .. } => None,
            }));
        }
        out
    }
}

fn standard_map(m: &StandardMaterial, slot: MapSlot) -> Option<Handle<Texture>> {
    match slot {
        MapSlot::Map => m.map,
        MapSlot::AlphaMap => m.alpha_map,
        MapSlot::NormalMap => m.normal_map,
        MapSlot::EmissiveMap => m.emissive_map,
        MapSlot::RoughnessMap => m.roughness_map,
        MapSlot::MetalnessMap => m.metalness_map,
        MapSlot::AoMap => m.ao_map,
        MapSlot::EnvMap => m.env_map,
        MapSlot::DisplacementMap => m.displacement_map,
        _ => None,
    }
}

impl Default for Material {
    fn default() -> Self {
        Self::basic(Vec3::ONE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_gets_new_id_same_content() {
        let a = Material::standard(Vec3::new(0.5, 0.2, 0.1), 0.4, 0.0);
        let b = a.clone();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.kind, b.kind);
    }

    #[test]
    fn transmission_only_on_physical() {
        let glass = Material::physical(PhysicalMaterial {
            transmission: 1.0,
            ..Default::default()
        });
        assert_eq!(glass.transmission(), 1.0);
        assert_eq!(Material::phong(Vec3::ONE).transmission(), 0.0);
    }

    #[test]
    fn set_map_bumps_version_and_reads_back() {
        let mut material = Material::standard(Vec3::ONE, 0.5, 0.5);
        let texture = Handle::new(3, 1);
        assert!(material.set_map(MapSlot::RoughnessMap, Some(texture)));
        assert_eq!(material.version(), 1);
        assert_eq!(material.map(MapSlot::RoughnessMap), Some(texture));
        assert_eq!(material.textures(), vec![texture]);
    }

    #[test]
    fn unsupported_slot_is_rejected() {
        let mut material = Material::line(Vec3::ONE);
        assert!(!material.set_map(MapSlot::NormalMap, Some(Handle::new(0, 0))));
        assert_eq!(material.version(), 0);
    }

    #[test]
    fn shadow_and_sprite_are_transparent_by_default() {
        assert!(Material::shadow(Vec3::ZERO).transparent);
        assert!(Material::sprite(Vec3::ONE).transparent);
        assert!(!Material::basic(Vec3::ONE).transparent);
    }
}
