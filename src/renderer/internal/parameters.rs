//! Everything that selects a program variant, and the GLSL prefixes derived from it.

use std::borrow::Cow;
use std::collections::hash_map::DefaultHasher;
use std::fmt::Write;
use std::hash::{Hash, Hasher};

use crate::renderer::backend::GlslVersion;
use crate::renderer::lights::LightCounts;
use crate::renderer::material::{DepthPacking, MapSlot, Material, MaterialKind, Side};
use crate::renderer::texture::TextureMapping;
use crate::settings::{Precision, ShadowType, ToneMapping};

use super::shader_lib::{self, Template};

/// Environment map as seen by the program: only its sampling mode matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct EnvMapInfo {
    pub(crate) mapping: TextureMapping,
    /// Face size of a cube-UV atlas.
    pub(crate) cube_uv_size: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum FogKind {
    Linear,
    Exp2,
}

/// Per-draw inputs that pick a variant but do not live on the material.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ProgramInputs {
    pub(crate) lights: LightCounts,
    pub(crate) physically_correct_lights: bool,
    pub(crate) shadow_map: Option<ShadowType>,
    pub(crate) fog: Option<FogKind>,
    pub(crate) env_map: Option<EnvMapInfo>,
    pub(crate) tone_mapping: ToneMapping,
    pub(crate) output_srgb: bool,
    pub(crate) clipping_planes: usize,
    pub(crate) clipping_intersection: usize,
    /// Side actually drawn; double-sided transparent objects draw back then front.
    pub(crate) side: Side,
    pub(crate) instancing: bool,
    pub(crate) instancing_color: bool,
    pub(crate) bones: usize,
    pub(crate) morph_targets: usize,
    pub(crate) morph_normals: bool,
    pub(crate) vertex_alphas: bool,
    pub(crate) vertex_tangents: bool,
    pub(crate) uv1: bool,
    pub(crate) precision: Precision,
    pub(crate) glsl: GlslVersion,
}

impl Default for ProgramInputs {
    fn default() -> Self {
        Self {
            lights: LightCounts::default(),
            physically_correct_lights: true,
            shadow_map: None,
            fog: None,
            env_map: None,
            tone_mapping: ToneMapping::None,
            output_srgb: false,
            clipping_planes: 0,
            clipping_intersection: 0,
            side: Side::Front,
            instancing: false,
            instancing_color: false,
            bones: 0,
            morph_targets: 0,
            morph_normals: false,
            vertex_alphas: false,
            vertex_tangents: false,
            uv1: false,
            precision: Precision::Highp,
            glsl: GlslVersion::Es300,
        }
    }
}

/// Fully resolved description of one program variant.
#[derive(Debug, Clone)]
pub(crate) struct ProgramParameters {
    pub(crate) shader_name: String,
    pub(crate) vertex_source: Cow<'static, str>,
    pub(crate) fragment_source: Cow<'static, str>,
    pub(crate) custom: bool,
    custom_hash: u64,
    pub(crate) defines: Vec<(String, String)>,
    pub(crate) lights: LightCounts,
    pub(crate) clipping_planes: usize,
    pub(crate) clipping_intersection: usize,
    pub(crate) morph_targets: usize,
    pub(crate) morph_normals: bool,
    pub(crate) tone_mapping: ToneMapping,
    pub(crate) precision: Precision,
    pub(crate) glsl: GlslVersion,
}

const UV_SLOTS: [MapSlot; 10] = [
    MapSlot::Map,
    MapSlot::AlphaMap,
    MapSlot::NormalMap,
    MapSlot::EmissiveMap,
    MapSlot::RoughnessMap,
    MapSlot::MetalnessMap,
    MapSlot::AoMap,
    MapSlot::SpecularMap,
    MapSlot::DisplacementMap,
    MapSlot::TransmissionMap,
];

impl ProgramParameters {
    pub(crate) fn new(material: &Material, inputs: &ProgramInputs) -> Self {
        let kind = &material.kind;
        let lit = kind.uses_lights();
        let depth_like = matches!(kind, MaterialKind::Depth(_) | MaterialKind::Distance(_));

        let lights = if lit { inputs.lights } else { LightCounts::default() };
        let tone_mapping = if material.tone_mapped && !depth_like {
            inputs.tone_mapping
        } else {
            ToneMapping::None
        };

        let (template, custom) = match kind {
            MaterialKind::Basic(_) | MaterialKind::Line(_) => (Some(shader_lib::MESH_BASIC), false),
            MaterialKind::Lambert(_)
            | MaterialKind::Phong(_)
            | MaterialKind::Toon(_)
            | MaterialKind::Standard(_)
            | MaterialKind::Physical(_) => (Some(shader_lib::MESH_LIT), false),
            MaterialKind::Points(_) => (Some(shader_lib::POINTS), false),
            MaterialKind::Sprite(_) => (Some(shader_lib::SPRITE), false),
            MaterialKind::Depth(_) => (Some(shader_lib::DEPTH), false),
            MaterialKind::Distance(_) => (Some(shader_lib::DISTANCE), false),
            MaterialKind::Shadow(_) => (Some(shader_lib::SHADOW), false),
            MaterialKind::Shader(_) => (None, true),
        };

        let (vertex_source, fragment_source, custom_hash) = match (template, kind) {
            (Some(Template { vertex, fragment, .. }), _) => {
                (Cow::Borrowed(vertex), Cow::Borrowed(fragment), 0)
            }
            (None, MaterialKind::Shader(shader)) => {
                let mut hasher = DefaultHasher::new();
                shader.vertex_shader.hash(&mut hasher);
                shader.fragment_shader.hash(&mut hasher);
                (
                    Cow::Owned(shader.vertex_shader.clone()),
                    Cow::Owned(shader.fragment_shader.clone()),
                    hasher.finish(),
                )
            }
            (None, _) => (Cow::Borrowed(""), Cow::Borrowed(""), 0),
        };

        // Display names stay out of the key so equal variants share one program.
        let shader_name = kind.name().to_string();

        let mut defines = Defines::default();
        kind_defines(&mut defines, material);

        if !custom {
            for slot in MapSlot::ALL {
                if slot != MapSlot::EnvMap && material.map(slot).is_some() {
                    defines.flag(slot.define());
                }
            }
            if UV_SLOTS.iter().any(|slot| material.map(*slot).is_some()) {
                defines.flag("USE_UV");
            }
            if material.map(MapSlot::NormalMap).is_some() && inputs.vertex_tangents {
                defines.flag("USE_TANGENT");
            }
            let takes_env = matches!(
                kind,
                MaterialKind::Basic(_)
                    | MaterialKind::Lambert(_)
                    | MaterialKind::Phong(_)
                    | MaterialKind::Standard(_)
                    | MaterialKind::Physical(_)
            );
            if let (true, Some(env)) = (takes_env, inputs.env_map) {
                env_defines(&mut defines, env);
            }
            if material.vertex_colors {
                defines.flag(if inputs.vertex_alphas { "USE_COLOR_ALPHA" } else { "USE_COLOR" });
            }
            if material.alpha_test > 0.0 {
                defines.flag("USE_ALPHATEST");
            }
            if material.alpha_to_coverage {
                defines.flag("ALPHA_TO_COVERAGE");
            }
            if !material.transparent
                && material.blending == crate::renderer::material::Blending::Normal
                && !material.alpha_to_coverage
            {
                defines.flag("OPAQUE");
            }
            if material.premultiplied_alpha {
                defines.flag("PREMULTIPLIED_ALPHA");
            }
            if material.dithering {
                defines.flag("DITHERING");
            }
        }

        if inputs.uv1 {
            defines.flag("USE_UV1");
        }
        if inputs.instancing {
            defines.flag("USE_INSTANCING");
        }
        if inputs.instancing_color {
            defines.flag("USE_INSTANCING_COLOR");
        }
        if inputs.bones > 0 {
            defines.flag("USE_SKINNING");
            defines.value("MAX_BONES", inputs.bones.to_string());
        }
        if inputs.morph_targets > 0 && inputs.morph_normals {
            defines.flag("USE_MORPHNORMALS");
        }
        match inputs.side {
            Side::Double => defines.flag("DOUBLE_SIDED"),
            Side::Back => defines.flag("FLIP_SIDED"),
            Side::Front => {}
        }
        if material.fog && !depth_like {
            match inputs.fog {
                Some(FogKind::Linear) => defines.flag("USE_FOG"),
                Some(FogKind::Exp2) => {
                    defines.flag("USE_FOG");
                    defines.flag("FOG_EXP2");
                }
                None => {}
            }
        }
        if lit {
            let shadow_count = lights.directional_shadows + lights.point_shadows + lights.spot_shadows;
            if let (Some(shadow_type), true) = (inputs.shadow_map, shadow_count > 0) {
                defines.flag("USE_SHADOWMAP");
                defines.flag(shadow_type.define());
            }
            if !inputs.physically_correct_lights {
                defines.flag("LEGACY_LIGHTS");
            }
        }
        if tone_mapping != ToneMapping::None {
            defines.flag("TONE_MAPPING");
        }
        if inputs.output_srgb && !depth_like {
            defines.flag("OUTPUT_SRGB");
        }

        if let MaterialKind::Shader(shader) = kind {
            for (name, value) in &shader.defines {
                defines.value(name, value.clone());
            }
        }

        Self {
            shader_name,
            vertex_source,
            fragment_source,
            custom,
            custom_hash,
            defines: defines.0,
            lights,
            clipping_planes: inputs.clipping_planes,
            clipping_intersection: inputs.clipping_intersection.min(inputs.clipping_planes),
            morph_targets: inputs.morph_targets,
            morph_normals: inputs.morph_normals,
            tone_mapping,
            precision: inputs.precision,
            glsl: inputs.glsl,
        }
    }

    pub(crate) fn has_define(&self, name: &str) -> bool {
        self.defines.iter().any(|(n, _)| n == name)
    }

    /// Identifies the variant; equal keys compile to identical sources.
    pub(crate) fn cache_key(&self) -> String {
        let mut key = String::with_capacity(256);
        key.push_str(&self.shader_name);
        if self.custom {
            let _ = write!(key, "#{:016x}", self.custom_hash);
        }
        for (name, value) in &self.defines {
            key.push(',');
            key.push_str(name);
            if !value.is_empty() {
                key.push('=');
                key.push_str(value);
            }
        }
        let l = &self.lights;
        let _ = write!(
            key,
            "|{},{},{},{},{}|{},{},{}|{},{}|{},{}|{:?}|{:?}|{:?}",
            l.directional,
            l.point,
            l.spot,
            l.hemisphere,
            l.rect_area,
            l.directional_shadows,
            l.point_shadows,
            l.spot_shadows,
            self.clipping_planes,
            self.clipping_intersection,
            self.morph_targets,
            self.morph_normals,
            self.tone_mapping,
            self.precision,
            self.glsl,
        );
        key
    }

    /// Tokens replaced by their counts in the assembled sources, longest first.
    pub(crate) fn replacements(&self) -> [(&'static str, usize); 11] {
        let l = &self.lights;
        [
            ("NUM_DIR_LIGHT_SHADOWS", l.directional_shadows),
            ("NUM_SPOT_LIGHT_SHADOWS", l.spot_shadows),
            ("NUM_POINT_LIGHT_SHADOWS", l.point_shadows),
            ("NUM_RECT_AREA_LIGHTS", l.rect_area),
            ("UNION_CLIPPING_PLANES", self.clipping_planes - self.clipping_intersection),
            ("NUM_CLIPPING_PLANES", self.clipping_planes),
            ("MORPHTARGETS_COUNT", self.morph_targets),
            ("NUM_POINT_LIGHTS", l.point),
            ("NUM_SPOT_LIGHTS", l.spot),
            ("NUM_HEMI_LIGHTS", l.hemisphere),
            ("NUM_DIR_LIGHTS", l.directional),
        ]
    }

    fn header(&self, out: &mut String) {
        out.push_str(match self.glsl {
            GlslVersion::Es300 => "#version 300 es\n",
            GlslVersion::Core330 => "#version 330 core\n",
        });
        let p = self.precision.as_str();
        for ty in ["float", "int", "sampler3D", "sampler2DArray", "sampler2DShadow"] {
            let _ = writeln!(out, "precision {p} {ty};");
        }
        let _ = writeln!(out, "#define SHADER_NAME {}", self.shader_name);
        for (name, value) in &self.defines {
            let _ = writeln!(out, "#define {name} {value}");
        }
    }

    pub(crate) fn vertex_prefix(&self) -> String {
        let mut out = String::with_capacity(2048);
        self.header(&mut out);
        out.push_str(
            "uniform mat4 modelMatrix;\n\
             uniform mat4 modelViewMatrix;\n\
             uniform mat4 projectionMatrix;\n\
             uniform mat4 viewMatrix;\n\
             uniform mat3 normalMatrix;\n\
             uniform vec3 cameraPosition;\n\
             uniform bool isOrthographic;\n\
             in vec3 position;\n\
             in vec3 normal;\n\
             in vec2 uv;\n",
        );
        if self.has_define("USE_UV1") {
            out.push_str("in vec2 uv1;\n");
        }
        if self.has_define("USE_TANGENT") {
            out.push_str("in vec4 tangent;\n");
        }
        if self.has_define("USE_COLOR_ALPHA") {
            out.push_str("in vec4 color;\n");
        } else if self.has_define("USE_COLOR") {
            out.push_str("in vec3 color;\n");
        }
        if self.has_define("USE_SKINNING") {
            out.push_str("in vec4 skinIndex;\nin vec4 skinWeight;\n");
        }
        if self.has_define("USE_INSTANCING") {
            out.push_str("in mat4 instanceMatrix;\n");
        }
        if self.has_define("USE_INSTANCING_COLOR") {
            out.push_str("in vec3 instanceColor;\n");
        }
        for i in 0..self.morph_targets {
            let _ = writeln!(out, "in vec3 morphTarget{i};");
            if self.morph_normals {
                let _ = writeln!(out, "in vec3 morphNormal{i};");
            }
        }
        if self.custom {
            out.push_str("#define varying out\n#define texture2D texture\n");
        }
        out.push('\n');
        out
    }

    pub(crate) fn fragment_prefix(&self) -> String {
        let mut out = String::with_capacity(1024);
        self.header(&mut out);
        let _ = writeln!(out, "out {} vec4 fragColor;", self.precision.as_str());
        out.push_str(
            "uniform mat4 viewMatrix;\n\
             uniform vec3 cameraPosition;\n\
             uniform bool isOrthographic;\n",
        );
        if let Some(function) = self.tone_mapping.function_name() {
            let _ = writeln!(out, "#define toneMapping( a ) {function}( a )");
        }
        if self.custom {
            out.push_str(
                "#define varying in\n#define gl_FragColor fragColor\n#define texture2D texture\n",
            );
        }
        out.push('\n');
        out
    }
}

#[derive(Default)]
struct Defines(Vec<(String, String)>);

impl Defines {
    fn flag(&mut self, name: &str) {
        self.value(name, String::new());
    }

    fn value(&mut self, name: &str, value: String) {
        match self.0.iter_mut().find(|(n, _)| n == name) {
            Some(existing) => existing.1 = value,
            None => self.0.push((name.to_string(), value)),
        }
    }
}

fn kind_defines(defines: &mut Defines, material: &Material) {
    match &material.kind {
        MaterialKind::Lambert(_) => defines.flag("LAMBERT"),
        MaterialKind::Phong(m) => {
            defines.flag("PHONG");
            if m.flat_shading {
                defines.flag("FLAT_SHADED");
            }
        }
        MaterialKind::Toon(_) => defines.flag("TOON"),
        MaterialKind::Standard(m) => {
            defines.flag("STANDARD");
            if m.flat_shading {
                defines.flag("FLAT_SHADED");
            }
        }
        MaterialKind::Physical(m) => {
            defines.flag("STANDARD");
            defines.flag("PHYSICAL");
            if m.base.flat_shading {
                defines.flag("FLAT_SHADED");
            }
            if m.clearcoat > 0.0 {
                defines.flag("USE_CLEARCOAT");
            }
            if m.sheen > 0.0 {
                defines.flag("USE_SHEEN");
            }
            if m.transmission > 0.0 {
                defines.flag("USE_TRANSMISSION");
            }
        }
        MaterialKind::Points(m) => {
            if m.size_attenuation {
                defines.flag("USE_SIZEATTENUATION");
            }
        }
        MaterialKind::Sprite(m) => {
            if m.size_attenuation {
                defines.flag("USE_SIZEATTENUATION");
            }
        }
        MaterialKind::Depth(m) => {
            if m.packing == DepthPacking::Basic {
                defines.flag("DEPTH_PACKING_BASIC");
            }
        }
        MaterialKind::Basic(_)
        | MaterialKind::Line(_)
        | MaterialKind::Distance(_)
        | MaterialKind::Shadow(_)
        | MaterialKind::Shader(_) => {}
    }
}

/// Defines for the cube-UV atlas layout of a prefiltered environment.
pub(crate) fn cube_uv_defines(face_size: u32) -> [(&'static str, String); 4] {
    let size = face_size.max(16);
    let max_mip = (size as f32).log2() - 2.0;
    let width = 3.0 * size as f32;
    let height = 4.0 * size as f32 * (1.0 - 0.5f32.powi(max_mip as i32 + 1));
    [
        ("CUBEUV_SIZE", format!("{:.1}", size as f32)),
        ("CUBEUV_TEXEL_WIDTH", format!("{:.8}", 1.0 / width)),
        ("CUBEUV_TEXEL_HEIGHT", format!("{:.8}", 1.0 / height)),
        ("CUBEUV_MAX_MIP", format!("{:.1}", max_mip)),
    ]
}

fn env_defines(defines: &mut Defines, env: EnvMapInfo) {
    defines.flag("USE_ENVMAP");
    match env.mapping {
        TextureMapping::CubeReflection | TextureMapping::CubeRefraction => {
            defines.flag("ENVMAP_TYPE_CUBE")
        }
        TextureMapping::CubeUvReflection => {
            defines.flag("ENVMAP_TYPE_CUBE_UV");
            for (name, value) in cube_uv_defines(env.cube_uv_size.unwrap_or(256)) {
                defines.value(name, value);
            }
        }
        _ => {}
    }
    if env.mapping.is_refraction() {
        defines.flag("ENVMAP_MODE_REFRACTION");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::Handle;
    use crate::renderer::material::ShaderMaterial;
    use glam::Vec3;

    fn key(material: &Material, inputs: &ProgramInputs) -> String {
        ProgramParameters::new(material, inputs).cache_key()
    }

    #[test]
    fn identical_inputs_share_a_key() {
        let a = Material::standard(Vec3::ONE, 0.5, 0.0);
        let b = Material::standard(Vec3::new(1.0, 0.0, 0.0), 0.1, 1.0);
        let inputs = ProgramInputs::default();
        assert_eq!(key(&a, &inputs), key(&b, &inputs));
    }

    #[test]
    fn light_count_changes_the_key() {
        let material = Material::lambert(Vec3::ONE);
        let mut inputs = ProgramInputs::default();
        let before = key(&material, &inputs);
        inputs.lights.point = 2;
        assert_ne!(before, key(&material, &inputs));
    }

    #[test]
    fn unlit_materials_ignore_lights() {
        let material = Material::basic(Vec3::ONE);
        let mut inputs = ProgramInputs::default();
        let before = key(&material, &inputs);
        inputs.lights.directional = 3;
        inputs.shadow_map = Some(ShadowType::Pcf);
        assert_eq!(before, key(&material, &inputs));
    }

    #[test]
    fn map_enables_uv_and_map_defines() {
        let material = Material::basic(Vec3::ONE).with_map(Handle::new(0, 0));
        let params = ProgramParameters::new(&material, &ProgramInputs::default());
        assert!(params.has_define("USE_MAP"));
        assert!(params.has_define("USE_UV"));
        assert!(params.has_define("OPAQUE"));
        assert!(!params.has_define("USE_ENVMAP"));
    }

    #[test]
    fn shadow_define_needs_a_shadowed_light() {
        let material = Material::phong(Vec3::ONE);
        let mut inputs = ProgramInputs {
            shadow_map: Some(ShadowType::Vsm),
            ..Default::default()
        };
        inputs.lights.directional = 1;
        assert!(!ProgramParameters::new(&material, &inputs).has_define("USE_SHADOWMAP"));
        inputs.lights.directional_shadows = 1;
        let params = ProgramParameters::new(&material, &inputs);
        assert!(params.has_define("USE_SHADOWMAP"));
        assert!(params.has_define("SHADOWMAP_TYPE_VSM"));
    }

    #[test]
    fn custom_sources_are_hashed() {
        let a = Material::shader(ShaderMaterial::new("void main() {}", "void main() {}"));
        let b = Material::shader(ShaderMaterial::new(
            "void main() { gl_Position = vec4(0.0); }",
            "void main() {}",
        ));
        let inputs = ProgramInputs::default();
        assert_ne!(key(&a, &inputs), key(&b, &inputs));
        let params = ProgramParameters::new(&a, &inputs);
        assert!(params.fragment_prefix().contains("#define gl_FragColor fragColor"));
        assert!(params.vertex_prefix().contains("#define varying out"));
    }

    #[test]
    fn cube_uv_env_map_sets_layout_defines() {
        let material = Material::standard(Vec3::ONE, 0.5, 0.0);
        let inputs = ProgramInputs {
            env_map: Some(EnvMapInfo {
                mapping: TextureMapping::CubeUvReflection,
                cube_uv_size: Some(256),
            }),
            ..Default::default()
        };
        let params = ProgramParameters::new(&material, &inputs);
        assert!(params.has_define("ENVMAP_TYPE_CUBE_UV"));
        let prefix = params.fragment_prefix();
        assert!(prefix.contains("#define CUBEUV_SIZE 256.0"));
        assert!(prefix.contains("#define CUBEUV_MAX_MIP 6.0"));
    }

    #[test]
    fn prefix_declares_versioned_outputs() {
        let material = Material::basic(Vec3::ONE);
        let inputs = ProgramInputs {
            tone_mapping: ToneMapping::AcesFilmic,
            output_srgb: true,
            glsl: GlslVersion::Core330,
            ..Default::default()
        };
        let params = ProgramParameters::new(&material, &inputs);
        let fragment = params.fragment_prefix();
        assert!(fragment.starts_with("#version 330 core"));
        assert!(fragment.contains("#define toneMapping( a ) ACESFilmicToneMapping( a )"));
        assert!(fragment.contains("#define OUTPUT_SRGB"));
        assert!(fragment.contains("out highp vec4 fragColor;"));
    }

    #[test]
    fn morph_targets_declare_attributes() {
        let material = Material::basic(Vec3::ONE);
        let inputs = ProgramInputs {
            morph_targets: 2,
            morph_normals: true,
            ..Default::default()
        };
        let prefix = ProgramParameters::new(&material, &inputs).vertex_prefix();
        assert!(prefix.contains("in vec3 morphTarget1;"));
        assert!(prefix.contains("in vec3 morphNormal0;"));
    }
}
