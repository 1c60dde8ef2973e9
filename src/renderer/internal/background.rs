use glam::{Mat4, Vec3};

use crate::asset::Handle;
use crate::renderer::backend::{ClearFlags, UniformValue};
use crate::renderer::geometry::Geometry;
use crate::renderer::material::{Material, ShaderMaterial, Side};
use crate::renderer::primitives::{box_geometry, plane_geometry};
use crate::renderer::texture::{Texture, TextureMapping, TextureSource};
use crate::scene::Background;
use crate::settings::AutoClear;

use super::dispatch::{clear_buffers, DrawDispatcher, ObjectDraw, ViewState};
use super::parameters::cube_uv_defines;
use super::shader_lib;

/// Mesh drawn behind the scene, rebuilt when its texture or sampling mode changes.
struct BackgroundMesh {
    geometry: Geometry,
    material: Material,
    texture: Handle<Texture>,
    mapping: TextureMapping,
}

/// Clears the target and draws the scene background: a clear color, a full-screen
/// textured plane, or an inside-out box sampling a cube or equirect environment.
#[derive(Default)]
pub(crate) struct BackgroundPass {
    plane: Option<BackgroundMesh>,
    cube: Option<BackgroundMesh>,
}

fn flags(auto_clear: &AutoClear) -> ClearFlags {
    let mut flags = ClearFlags::empty();
    flags.set(ClearFlags::COLOR, auto_clear.color);
    flags.set(ClearFlags::DEPTH, auto_clear.depth);
    flags.set(ClearFlags::STENCIL, auto_clear.stencil);
    flags
}

fn background_material(shader: ShaderMaterial, side: Side) -> Material {
    let mut material = Material::shader(shader.with_uniform("backgroundIntensity", UniformValue::Float(1.0)))
        .with_name("background")
        .with_side(side);
    material.depth_test = false;
    material.depth_write = false;
    material.fog = false;
    material
}

fn plane_mesh(texture: Handle<Texture>, mapping: TextureMapping) -> BackgroundMesh {
    let shader = ShaderMaterial::new(shader_lib::BACKGROUND.vertex, shader_lib::BACKGROUND.fragment)
        .with_texture("t2D", texture);
    BackgroundMesh {
        geometry: plane_geometry(2.0, 2.0, 1, 1),
        material: background_material(shader, Side::Front),
        texture,
        mapping,
    }
}

fn cube_mesh(handle: Handle<Texture>, texture: &Texture) -> BackgroundMesh {
    let mut shader = ShaderMaterial::new(
        shader_lib::BACKGROUND_CUBE.vertex,
        shader_lib::BACKGROUND_CUBE.fragment,
    )
    .with_texture("envMap", handle)
    .with_uniform("backgroundBlurriness", UniformValue::Float(0.0));

    let cube_source = matches!(texture.source, TextureSource::Cube(_));
    if texture.mapping.is_cube() || cube_source {
        shader = shader.with_define("ENVMAP_TYPE_CUBE", "1");
    } else if texture.mapping == TextureMapping::CubeUvReflection {
        shader = shader.with_define("ENVMAP_TYPE_CUBE_UV", "1");
        for (name, value) in cube_uv_defines(texture.cube_uv_size.unwrap_or(256)) {
            shader = shader.with_define(name, value);
        }
    }
    let flip = if cube_source { -1.0 } else { 1.0 };
    shader = shader.with_uniform("flipEnvMap", UniformValue::Float(flip));

    BackgroundMesh {
        geometry: box_geometry(1.0, 1.0, 1.0),
        material: background_material(shader, Side::Back),
        texture: handle,
        mapping: texture.mapping,
    }
}

impl BackgroundPass {
    /// Clears according to `auto_clear` (a color background always clears color) and
    /// draws the textured background, if any.
    pub(crate) fn render(
        &mut self,
        dispatch: &mut DrawDispatcher<'_>,
        background: Option<Background>,
        view: &ViewState,
        auto_clear: &AutoClear,
        clear_color: [f32; 4],
    ) {
        let mut color = clear_color;
        let mut force_color = false;
        if let Some(Background::Color(c)) = background {
            color = [c.x, c.y, c.z, 1.0];
            force_color = true;
        }

        let mut clear = if auto_clear.enabled {
            flags(auto_clear)
        } else {
            ClearFlags::empty()
        };
        if force_color {
            clear |= ClearFlags::COLOR;
        }
        clear_buffers(dispatch.backend, dispatch.state, Some(color), clear);

        match background {
            Some(Background::Texture(handle)) => {
                let Some(texture) = dispatch.texture_assets.get(handle) else {
                    log::trace!("Background texture handle is stale");
                    return;
                };
                let stale = self
                    .plane
                    .as_ref()
                    .map_or(true, |m| m.texture != handle || m.mapping != texture.mapping);
                if stale {
                    self.plane = Some(plane_mesh(handle, texture.mapping));
                }
                if let Some(mesh) = &self.plane {
                    let draw = ObjectDraw::new(Mat4::IDENTITY, &mesh.geometry, &mesh.material);
                    dispatch.render_object(&draw, view);
                }
            }
            Some(Background::Cube(handle)) => {
                let Some(texture) = dispatch.texture_assets.get(handle) else {
                    log::trace!("Background environment handle is stale");
                    return;
                };
                let stale = self
                    .cube
                    .as_ref()
                    .map_or(true, |m| m.texture != handle || m.mapping != texture.mapping);
                if stale {
                    self.cube = Some(cube_mesh(handle, texture));
                }
                if let Some(mesh) = &self.cube {
                    // The box follows the camera so only its orientation shows.
                    let world = Mat4::from_translation(view.camera_position) * Mat4::from_scale(Vec3::splat(2.0));
                    let draw = ObjectDraw::new(world, &mesh.geometry, &mesh.material);
                    dispatch.render_object(&draw, view);
                }
            }
            Some(Background::Color(_)) | None => {}
        }
    }

    /// Ids of the background materials, for releasing their programs.
    pub(crate) fn material_ids(&self) -> Vec<u64> {
        self.plane
            .iter()
            .chain(self.cube.iter())
            .map(|m| m.material.id())
            .collect()
    }

    pub(crate) fn geometry_ids(&self) -> Vec<u64> {
        self.plane
            .iter()
            .chain(self.cube.iter())
            .map(|m| m.geometry.id())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_clear_flags_follow_settings() {
        let auto_clear = AutoClear {
            enabled: true,
            color: true,
            depth: true,
            stencil: false,
        };
        assert_eq!(flags(&auto_clear), ClearFlags::COLOR | ClearFlags::DEPTH);
    }

    #[test]
    fn cube_sources_sample_as_cube_maps() {
        let face = std::sync::Arc::new(crate::renderer::texture::Image::from_rgba8(1, 1, vec![255, 0, 0, 255]));
        let texture = Texture::cube(std::array::from_fn(|_| face.clone()));
        let mesh = cube_mesh(Handle::new(0, 0), &texture);
        let crate::renderer::material::MaterialKind::Shader(shader) = &mesh.material.kind else {
            panic!("background uses a shader material");
        };
        assert!(shader.defines.contains_key("ENVMAP_TYPE_CUBE"));
        assert_eq!(mesh.material.side, Side::Back);
        assert!(!mesh.material.depth_write);
    }
}
