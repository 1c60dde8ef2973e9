//! Built-in GLSL chunks and shader templates, embedded at compile time.
//!
//! Templates pull chunks in with `#include <name>`; the program cache resolves them
//! recursively before compiling.

/// Looks up a chunk by the name used in `#include <name>`.
pub(crate) fn chunk(name: &str) -> Option<&'static str> {
    Some(match name {
        "alphamap_fragment" => include_str!("../../shader/chunks/alphamap_fragment.glsl"),
        "alphamap_pars_fragment" => include_str!("../../shader/chunks/alphamap_pars_fragment.glsl"),
        "alphatest_fragment" => include_str!("../../shader/chunks/alphatest_fragment.glsl"),
        "alphatest_pars_fragment" => include_str!("../../shader/chunks/alphatest_pars_fragment.glsl"),
        "aomap_fragment" => include_str!("../../shader/chunks/aomap_fragment.glsl"),
        "aomap_pars_fragment" => include_str!("../../shader/chunks/aomap_pars_fragment.glsl"),
        "begin_vertex" => include_str!("../../shader/chunks/begin_vertex.glsl"),
        "beginnormal_vertex" => include_str!("../../shader/chunks/beginnormal_vertex.glsl"),
        "clipping_planes_fragment" => include_str!("../../shader/chunks/clipping_planes_fragment.glsl"),
        "clipping_planes_pars_fragment" => include_str!("../../shader/chunks/clipping_planes_pars_fragment.glsl"),
        "clipping_planes_pars_vertex" => include_str!("../../shader/chunks/clipping_planes_pars_vertex.glsl"),
        "clipping_planes_vertex" => include_str!("../../shader/chunks/clipping_planes_vertex.glsl"),
        "color_fragment" => include_str!("../../shader/chunks/color_fragment.glsl"),
        "color_pars_fragment" => include_str!("../../shader/chunks/color_pars_fragment.glsl"),
        "color_pars_vertex" => include_str!("../../shader/chunks/color_pars_vertex.glsl"),
        "color_vertex" => include_str!("../../shader/chunks/color_vertex.glsl"),
        "colorspace_fragment" => include_str!("../../shader/chunks/colorspace_fragment.glsl"),
        "colorspace_pars_fragment" => include_str!("../../shader/chunks/colorspace_pars_fragment.glsl"),
        "common" => include_str!("../../shader/chunks/common.glsl"),
        "cube_uv_reflection_fragment" => include_str!("../../shader/chunks/cube_uv_reflection_fragment.glsl"),
        "defaultnormal_vertex" => include_str!("../../shader/chunks/defaultnormal_vertex.glsl"),
        "displacementmap_pars_vertex" => include_str!("../../shader/chunks/displacementmap_pars_vertex.glsl"),
        "displacementmap_vertex" => include_str!("../../shader/chunks/displacementmap_vertex.glsl"),
        "dithering_fragment" => include_str!("../../shader/chunks/dithering_fragment.glsl"),
        "dithering_pars_fragment" => include_str!("../../shader/chunks/dithering_pars_fragment.glsl"),
        "emissivemap_fragment" => include_str!("../../shader/chunks/emissivemap_fragment.glsl"),
        "emissivemap_pars_fragment" => include_str!("../../shader/chunks/emissivemap_pars_fragment.glsl"),
        "envmap_common_pars_fragment" => include_str!("../../shader/chunks/envmap_common_pars_fragment.glsl"),
        "envmap_fragment" => include_str!("../../shader/chunks/envmap_fragment.glsl"),
        "envmap_pars_fragment" => include_str!("../../shader/chunks/envmap_pars_fragment.glsl"),
        "envmap_physical_pars_fragment" => include_str!("../../shader/chunks/envmap_physical_pars_fragment.glsl"),
        "fog_fragment" => include_str!("../../shader/chunks/fog_fragment.glsl"),
        "fog_pars_fragment" => include_str!("../../shader/chunks/fog_pars_fragment.glsl"),
        "fog_pars_vertex" => include_str!("../../shader/chunks/fog_pars_vertex.glsl"),
        "fog_vertex" => include_str!("../../shader/chunks/fog_vertex.glsl"),
        "gradientmap_pars_fragment" => include_str!("../../shader/chunks/gradientmap_pars_fragment.glsl"),
        "lights_fragment_begin" => include_str!("../../shader/chunks/lights_fragment_begin.glsl"),
        "lights_fragment_end" => include_str!("../../shader/chunks/lights_fragment_end.glsl"),
        "lights_fragment_maps" => include_str!("../../shader/chunks/lights_fragment_maps.glsl"),
        "lights_model_fragment" => include_str!("../../shader/chunks/lights_model_fragment.glsl"),
        "lights_model_pars_fragment" => include_str!("../../shader/chunks/lights_model_pars_fragment.glsl"),
        "lights_pars_begin" => include_str!("../../shader/chunks/lights_pars_begin.glsl"),
        "map_fragment" => include_str!("../../shader/chunks/map_fragment.glsl"),
        "map_pars_fragment" => include_str!("../../shader/chunks/map_pars_fragment.glsl"),
        "map_particle_fragment" => include_str!("../../shader/chunks/map_particle_fragment.glsl"),
        "map_particle_pars_fragment" => include_str!("../../shader/chunks/map_particle_pars_fragment.glsl"),
        "metalnessmap_fragment" => include_str!("../../shader/chunks/metalnessmap_fragment.glsl"),
        "metalnessmap_pars_fragment" => include_str!("../../shader/chunks/metalnessmap_pars_fragment.glsl"),
        "morphnormal_vertex" => include_str!("../../shader/chunks/morphnormal_vertex.glsl"),
        "morphtarget_pars_vertex" => include_str!("../../shader/chunks/morphtarget_pars_vertex.glsl"),
        "morphtarget_vertex" => include_str!("../../shader/chunks/morphtarget_vertex.glsl"),
        "normal_fragment_begin" => include_str!("../../shader/chunks/normal_fragment_begin.glsl"),
        "normal_fragment_maps" => include_str!("../../shader/chunks/normal_fragment_maps.glsl"),
        "normal_pars_fragment" => include_str!("../../shader/chunks/normal_pars_fragment.glsl"),
        "normal_pars_vertex" => include_str!("../../shader/chunks/normal_pars_vertex.glsl"),
        "normal_vertex" => include_str!("../../shader/chunks/normal_vertex.glsl"),
        "normalmap_pars_fragment" => include_str!("../../shader/chunks/normalmap_pars_fragment.glsl"),
        "opaque_fragment" => include_str!("../../shader/chunks/opaque_fragment.glsl"),
        "packing" => include_str!("../../shader/chunks/packing.glsl"),
        "physical_fragment_end" => include_str!("../../shader/chunks/physical_fragment_end.glsl"),
        "pmrem_common" => include_str!("../../shader/chunks/pmrem_common.glsl"),
        "premultiplied_alpha_fragment" => include_str!("../../shader/chunks/premultiplied_alpha_fragment.glsl"),
        "project_vertex" => include_str!("../../shader/chunks/project_vertex.glsl"),
        "roughnessmap_fragment" => include_str!("../../shader/chunks/roughnessmap_fragment.glsl"),
        "roughnessmap_pars_fragment" => include_str!("../../shader/chunks/roughnessmap_pars_fragment.glsl"),
        "shadowmap_pars_fragment" => include_str!("../../shader/chunks/shadowmap_pars_fragment.glsl"),
        "shadowmap_pars_vertex" => include_str!("../../shader/chunks/shadowmap_pars_vertex.glsl"),
        "shadowmap_vertex" => include_str!("../../shader/chunks/shadowmap_vertex.glsl"),
        "shadowmask_pars_fragment" => include_str!("../../shader/chunks/shadowmask_pars_fragment.glsl"),
        "skinbase_vertex" => include_str!("../../shader/chunks/skinbase_vertex.glsl"),
        "skinning_pars_vertex" => include_str!("../../shader/chunks/skinning_pars_vertex.glsl"),
        "skinning_vertex" => include_str!("../../shader/chunks/skinning_vertex.glsl"),
        "skinnormal_vertex" => include_str!("../../shader/chunks/skinnormal_vertex.glsl"),
        "specularmap_fragment" => include_str!("../../shader/chunks/specularmap_fragment.glsl"),
        "specularmap_pars_fragment" => include_str!("../../shader/chunks/specularmap_pars_fragment.glsl"),
        "tonemapping_fragment" => include_str!("../../shader/chunks/tonemapping_fragment.glsl"),
        "tonemapping_pars_fragment" => include_str!("../../shader/chunks/tonemapping_pars_fragment.glsl"),
        "transmission_fragment" => include_str!("../../shader/chunks/transmission_fragment.glsl"),
        "transmission_pars_fragment" => include_str!("../../shader/chunks/transmission_pars_fragment.glsl"),
        "uv_pars_fragment" => include_str!("../../shader/chunks/uv_pars_fragment.glsl"),
        "uv_pars_vertex" => include_str!("../../shader/chunks/uv_pars_vertex.glsl"),
        "uv_vertex" => include_str!("../../shader/chunks/uv_vertex.glsl"),
        "worldpos_pars_fragment" => include_str!("../../shader/chunks/worldpos_pars_fragment.glsl"),
        "worldpos_pars_vertex" => include_str!("../../shader/chunks/worldpos_pars_vertex.glsl"),
        "worldpos_vertex" => include_str!("../../shader/chunks/worldpos_vertex.glsl"),
        _ => return None,
    })
}

/// Vertex and fragment template of a built-in shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Template {
    pub(crate) name: &'static str,
    pub(crate) vertex: &'static str,
    pub(crate) fragment: &'static str,
}

macro_rules! template {
    ($name:literal, $vertex:literal, $fragment:literal) => {
        Template {
            name: $name,
            vertex: include_str!(concat!("../../shader/templates/", $vertex)),
            fragment: include_str!(concat!("../../shader/templates/", $fragment)),
        }
    };
}

pub(crate) const MESH_BASIC: Template = template!("meshbasic", "meshbasic.vert", "meshbasic.frag");
pub(crate) const MESH_LIT: Template = template!("meshlit", "meshlit.vert", "meshlit.frag");
pub(crate) const POINTS: Template = template!("points", "points.vert", "points.frag");
pub(crate) const SPRITE: Template = template!("sprite", "sprite.vert", "sprite.frag");
pub(crate) const DEPTH: Template = template!("depth", "depth.vert", "depth.frag");
pub(crate) const DISTANCE: Template = template!("distance", "distance.vert", "distance.frag");
pub(crate) const SHADOW: Template = template!("shadow", "meshlit.vert", "shadow.frag");
pub(crate) const BACKGROUND: Template = template!("background", "background.vert", "background.frag");
pub(crate) const BACKGROUND_CUBE: Template =
    template!("background_cube", "background_cube.vert", "background_cube.frag");
pub(crate) const VSM: Template = template!("vsm", "fullscreen.vert", "vsm.frag");
pub(crate) const PMREM_CONVERT: Template =
    template!("pmrem_convert", "fullscreen.vert", "pmrem_convert.frag");
pub(crate) const PMREM_BLUR: Template = template!("pmrem_blur", "fullscreen.vert", "pmrem_blur.frag");

#[cfg(test)]
mod tests {
    use super::*;

    fn includes(source: &str) -> impl Iterator<Item = &str> {
        source.lines().filter_map(|line| {
            line.trim()
                .strip_prefix("#include")
                .map(|rest| rest.trim().trim_start_matches('<').trim_end_matches('>'))
        })
    }

    #[test]
    fn every_include_resolves() {
        let templates = [
            MESH_BASIC, MESH_LIT, POINTS, SPRITE, DEPTH, DISTANCE, SHADOW, BACKGROUND,
            BACKGROUND_CUBE, VSM, PMREM_CONVERT, PMREM_BLUR,
        ];
        for template in templates {
            for source in [template.vertex, template.fragment] {
                for name in includes(source) {
                    let chunk = chunk(name)
                        .unwrap_or_else(|| panic!("{} includes unknown chunk {name}", template.name));
                    for nested in includes(chunk) {
                        assert!(chunk_exists(nested), "{name} includes unknown chunk {nested}");
                    }
                }
            }
        }
    }

    fn chunk_exists(name: &str) -> bool {
        chunk(name).is_some()
    }

    #[test]
    fn unknown_chunk_is_none() {
        assert!(chunk("does_not_exist").is_none());
        assert!(chunk("common").is_some_and(|c| c.contains("RECIPROCAL_PI")));
    }
}
