use std::collections::HashMap;

use crate::renderer::backend::{
    ActiveVariable, Backend, GlslType, ProgramId, UniformLocationId, UniformValue,
};
use crate::renderer::material::MapSlot;

/// One active uniform of a linked program with the last value uploaded to it.
#[derive(Debug)]
pub(crate) struct UniformSlot {
    pub(crate) name: String,
    pub(crate) location: UniformLocationId,
    pub(crate) ty: GlslType,
    pub(crate) size: i32,
    last: Option<UniformValue>,
}

macro_rules! uniforms {
    ($($variant:ident => $name:literal,)*) => {
        /// Uniforms the built-in shaders declare, resolved to slots once per program.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub(crate) enum Uniform {
            $($variant,)*
        }

        impl Uniform {
            pub(crate) const ALL: &'static [Uniform] = &[$(Uniform::$variant,)*];

            pub(crate) fn name(self) -> &'static str {
                match self {
                    $(Uniform::$variant => $name,)*
                }
            }
        }
    };
}

uniforms! {
    ProjectionMatrix => "projectionMatrix",
    ViewMatrix => "viewMatrix",
    CameraPosition => "cameraPosition",
    IsOrthographic => "isOrthographic",
    ToneMappingExposure => "toneMappingExposure",
    ClippingPlanes => "clippingPlanes",
    ModelMatrix => "modelMatrix",
    ModelViewMatrix => "modelViewMatrix",
    NormalMatrix => "normalMatrix",
    ReceiveShadow => "receiveShadow",
    BoneMatrices => "boneMatrices",
    MorphTargetInfluences => "morphTargetInfluences",
    AmbientLightColor => "ambientLightColor",
    DirectionalShadowMatrix => "directionalShadowMatrix",
    SpotShadowMatrix => "spotShadowMatrix",
    PointShadowMatrix => "pointShadowMatrix",
    Opacity => "opacity",
    AlphaTest => "alphaTest",
    Diffuse => "diffuse",
    Emissive => "emissive",
    Specular => "specular",
    Shininess => "shininess",
    Roughness => "roughness",
    Metalness => "metalness",
    AoMapIntensity => "aoMapIntensity",
    EnvMapIntensity => "envMapIntensity",
    Reflectivity => "reflectivity",
    DisplacementScale => "displacementScale",
    DisplacementBias => "displacementBias",
    NormalScale => "normalScale",
    Clearcoat => "clearcoat",
    ClearcoatRoughness => "clearcoatRoughness",
    Transmission => "transmission",
    Thickness => "thickness",
    Ior => "ior",
    AttenuationDistance => "attenuationDistance",
    AttenuationColor => "attenuationColor",
    SheenColor => "sheenColor",
    SheenRoughness => "sheenRoughness",
    SpecularIntensity => "specularIntensity",
    SpecularColor => "specularColor",
    TransmissionSamplerSize => "transmissionSamplerSize",
    Size => "size",
    Scale => "scale",
    Rotation => "rotation",
    ReferencePosition => "referencePosition",
    NearDistance => "nearDistance",
    FarDistance => "farDistance",
    FlipEnvMap => "flipEnvMap",
    RefractionRatio => "refractionRatio",
}

pub(crate) const DIRECTIONAL_FIELDS: [&str; 2] = ["direction", "color"];
pub(crate) const POINT_FIELDS: [&str; 4] = ["position", "color", "distance", "decay"];
pub(crate) const SPOT_FIELDS: [&str; 7] = [
    "position",
    "direction",
    "color",
    "distance",
    "decay",
    "coneCos",
    "penumbraCos",
];
pub(crate) const HEMISPHERE_FIELDS: [&str; 3] = ["direction", "skyColor", "groundColor"];
pub(crate) const RECT_AREA_FIELDS: [&str; 4] = ["color", "position", "halfWidth", "halfHeight"];
pub(crate) const SHADOW_FIELDS: [&str; 6] = [
    "shadowBias",
    "shadowNormalBias",
    "shadowRadius",
    "shadowMapSize",
    "shadowCameraNear",
    "shadowCameraFar",
];

/// Slots of the light struct arrays, one row per array element in field order.
#[derive(Debug, Default)]
pub(crate) struct LightSlots {
    pub(crate) directional: Vec<[Option<usize>; 2]>,
    pub(crate) point: Vec<[Option<usize>; 4]>,
    pub(crate) spot: Vec<[Option<usize>; 7]>,
    pub(crate) hemisphere: Vec<[Option<usize>; 3]>,
    pub(crate) rect_area: Vec<[Option<usize>; 4]>,
    pub(crate) directional_shadows: Vec<[Option<usize>; 6]>,
    pub(crate) spot_shadows: Vec<[Option<usize>; 6]>,
    pub(crate) point_shadows: Vec<[Option<usize>; 6]>,
}

impl LightSlots {
    fn new(index: &HashMap<String, usize>) -> Self {
        Self {
            directional: struct_array(index, "directionalLights", &DIRECTIONAL_FIELDS),
            point: struct_array(index, "pointLights", &POINT_FIELDS),
            spot: struct_array(index, "spotLights", &SPOT_FIELDS),
            hemisphere: struct_array(index, "hemisphereLights", &HEMISPHERE_FIELDS),
            rect_area: struct_array(index, "rectAreaLights", &RECT_AREA_FIELDS),
            directional_shadows: struct_array(index, "directionalLightShadows", &SHADOW_FIELDS),
            spot_shadows: struct_array(index, "spotLightShadows", &SHADOW_FIELDS),
            point_shadows: struct_array(index, "pointLightShadows", &SHADOW_FIELDS),
        }
    }
}

fn struct_array<const N: usize>(
    index: &HashMap<String, usize>,
    array: &str,
    fields: &[&str; N],
) -> Vec<[Option<usize>; N]> {
    let mut rows = Vec::new();
    loop {
        let element = rows.len();
        let row: [Option<usize>; N] =
            std::array::from_fn(|f| index.get(&format!("{array}[{element}].{}", fields[f])).copied());
        if row.iter().all(Option::is_none) {
            return rows;
        }
        rows.push(row);
    }
}

/// What a sampler uniform reads from, resolved once per program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SamplerSource {
    DirectionalShadowMap,
    SpotShadowMap,
    PointShadowMap,
    TransmissionSamplerMap,
    Map(MapSlot),
    /// Only custom shader materials can bind it.
    Custom,
}

impl SamplerSource {
    fn from_glsl(name: &str) -> Self {
        match name {
            "directionalShadowMap" => Self::DirectionalShadowMap,
            "spotShadowMap" => Self::SpotShadowMap,
            "pointShadowMap" => Self::PointShadowMap,
            "transmissionSamplerMap" => Self::TransmissionSamplerMap,
            _ => MapSlot::ALL
                .iter()
                .find(|slot| slot.uniform_name() == name)
                .map_or(Self::Custom, |slot| Self::Map(*slot)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SamplerSlot {
    pub(crate) slot: usize,
    pub(crate) source: SamplerSource,
}

/// Active uniforms of a program.
///
/// Primitive arrays are stored under their bare name (`boneMatrices`), members of
/// struct arrays under the full path (`pointLights[1].color`). The draw path goes
/// through the slot indices in `known`, `lights` and `samplers`; names are only
/// looked up for custom shader uniforms.
#[derive(Debug, Default)]
pub(crate) struct UniformTable {
    slots: Vec<UniformSlot>,
    index: HashMap<String, usize>,
    known: Vec<Option<usize>>,
    pub(crate) lights: LightSlots,
    samplers: Vec<SamplerSlot>,
    /// Camera generation whose light values were last written.
    pub(crate) lights_generation: Option<u64>,
}

impl UniformTable {
    pub(crate) fn new(
        backend: &mut dyn Backend,
        program: ProgramId,
        active: &[ActiveVariable],
    ) -> Self {
        let mut slots = Vec::new();
        let mut index = HashMap::new();
        for variable in active {
            let Some(location) = backend.uniform_location(program, &variable.name) else {
                continue;
            };
            let name = variable
                .name
                .strip_suffix("[0]")
                .unwrap_or(&variable.name)
                .to_string();
            index.insert(name.clone(), slots.len());
            slots.push(UniformSlot {
                name,
                location,
                ty: variable.ty,
                size: variable.size,
                last: None,
            });
        }

        let mut samplers: Vec<SamplerSlot> = slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.ty.is_sampler())
            .map(|(i, slot)| SamplerSlot {
                slot: i,
                source: SamplerSource::from_glsl(&slot.name),
            })
            .collect();
        samplers.sort_by(|a, b| slots[a.slot].name.cmp(&slots[b.slot].name));

        let known = Uniform::ALL.iter().map(|u| index.get(u.name()).copied()).collect();
        let lights = LightSlots::new(&index);
        Self {
            slots,
            index,
            known,
            lights,
            samplers,
            lights_generation: None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn has(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub(crate) fn slot(&self, name: &str) -> Option<&UniformSlot> {
        self.index.get(name).map(|&i| &self.slots[i])
    }

    pub(crate) fn slot_at(&self, index: usize) -> Option<&UniformSlot> {
        self.slots.get(index)
    }

    /// Sampler uniforms sorted by name.
    pub(crate) fn samplers(&self) -> &[SamplerSlot] {
        &self.samplers
    }

    pub(crate) fn contains(&self, uniform: Uniform) -> bool {
        self.known_slot(uniform).is_some()
    }

    fn known_slot(&self, uniform: Uniform) -> Option<usize> {
        self.known.get(uniform as usize).copied().flatten()
    }

    /// Uploads `value` to the slot at `index` unless the program already holds it.
    /// Returns whether a call was issued.
    pub(crate) fn set_at(&mut self, backend: &mut dyn Backend, index: Option<usize>, value: UniformValue) -> bool {
        let Some(slot) = index.and_then(|i| self.slots.get_mut(i)) else {
            return false;
        };
        if slot.last.as_ref() == Some(&value) {
            return false;
        }
        backend.set_uniform(slot.location, &value);
        slot.last = Some(value);
        true
    }

    pub(crate) fn set(&mut self, backend: &mut dyn Backend, uniform: Uniform, value: UniformValue) -> bool {
        let index = self.known_slot(uniform);
        self.set_at(backend, index, value)
    }

    /// Like [`UniformTable::set`] but only builds the value when the program reads it.
    pub(crate) fn set_with(
        &mut self,
        backend: &mut dyn Backend,
        uniform: Uniform,
        value: impl FnOnce() -> UniformValue,
    ) -> bool {
        let Some(index) = self.known_slot(uniform) else {
            return false;
        };
        self.set_at(backend, Some(index), value())
    }

    /// Sets a uniform by GLSL name, for custom shader uniforms.
    pub(crate) fn set_named(&mut self, backend: &mut dyn Backend, name: &str, value: UniformValue) -> bool {
        let index = self.index.get(name).copied();
        self.set_at(backend, index, value)
    }
}

/// Column-major upload of a 4x4 matrix.
pub(crate) fn mat4(m: &glam::Mat4) -> UniformValue {
    UniformValue::Mat4(m.to_cols_array())
}

pub(crate) fn mat3(m: &glam::Mat3) -> UniformValue {
    UniformValue::Mat3(m.to_cols_array())
}

pub(crate) fn vec3(v: glam::Vec3) -> UniformValue {
    UniformValue::Vec3(v.to_array())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::{Call, RecordingBackend, ShaderKind};

    fn program(backend: &mut RecordingBackend, fragment: &str) -> ProgramId {
        let vs = backend
            .create_shader(
                ShaderKind::Vertex,
                "#version 300 es\nuniform mat4 modelMatrix;\nuniform float weights[4];\nvoid main() {}",
            )
            .unwrap();
        let fs = backend.create_shader(ShaderKind::Fragment, fragment).unwrap();
        backend.create_program(vs, fs).unwrap()
    }

    fn table(backend: &mut RecordingBackend, fragment: &str) -> UniformTable {
        let id = program(backend, fragment);
        let active = backend.active_uniforms(id);
        UniformTable::new(backend, id, &active)
    }

    const FRAGMENT: &str = "#version 300 es\nuniform sampler2D map;\nuniform sampler2D lookup;\nuniform vec3 diffuse;\nvoid main() {}";

    #[test]
    fn arrays_are_stored_by_bare_name() {
        let mut backend = RecordingBackend::default();
        let table = table(&mut backend, FRAGMENT);
        assert!(table.has("weights"));
        assert_eq!(table.slot("weights").map(|s| s.size), Some(4));
        assert!(table.contains(Uniform::ModelMatrix));
        assert!(!table.contains(Uniform::ViewMatrix));

        let sources: Vec<_> = table.samplers().iter().map(|s| s.source).collect();
        assert_eq!(sources, vec![SamplerSource::Custom, SamplerSource::Map(MapSlot::Map)]);
    }

    #[test]
    fn repeated_values_are_not_uploaded() {
        let mut backend = RecordingBackend::default();
        let mut table = table(&mut backend, FRAGMENT);

        assert!(table.set(&mut backend, Uniform::Diffuse, UniformValue::Vec3([1.0, 0.0, 0.0])));
        assert!(!table.set(&mut backend, Uniform::Diffuse, UniformValue::Vec3([1.0, 0.0, 0.0])));
        assert!(table.set(&mut backend, Uniform::Diffuse, UniformValue::Vec3([0.0, 1.0, 0.0])));
        assert!(!table.set(&mut backend, Uniform::Opacity, UniformValue::Float(1.0)));
        assert!(!table.set_named(&mut backend, "missing", UniformValue::Float(1.0)));
        assert_eq!(backend.count(|c| matches!(c, Call::Uniform(..))), 2);
    }

    #[test]
    fn light_struct_arrays_resolve_per_element() {
        let mut backend = RecordingBackend::default();
        let fragment = "#version 300 es\n\
            struct PointLight { vec3 position; vec3 color; float distance; float decay; };\n\
            uniform PointLight pointLights[2];\n\
            void main() {}";
        let table = table(&mut backend, fragment);

        assert_eq!(table.lights.point.len(), 2);
        assert!(table.lights.point.iter().all(|row| row.iter().all(Option::is_some)));
        assert!(table.lights.directional.is_empty());
        assert_eq!(
            table.lights.point[1][3].and_then(|i| table.slot_at(i)).map(|s| s.name.as_str()),
            Some("pointLights[1].decay")
        );
    }
}
