mod common;

use glam::Vec3;
use scenegl::renderer::backend::{BufferTarget, Call, Capabilities, Rect};
use scenegl::renderer::{
    AttributeName, Image, Material, PmremGenerator, RecordingBackend, RenderTarget, Renderer,
    ShaderMaterial, Texture,
};
use scenegl::scene::{ArrayCamera, Background, Camera, Scene};
use scenegl::settings::RendererSettings;

use common::{add_sphere, forward_camera, init_logging, renderer};

fn translucent(color: Vec3) -> Material {
    Material::basic(color).with_transparent(true).with_opacity(0.5)
}

#[test]
fn transparent_objects_draw_back_to_front() {
    let mut renderer = renderer(RendererSettings::default());
    let mut scene = Scene::new();
    for distance in [5.0, 10.0, 2.0] {
        add_sphere(&mut scene, Vec3::new(0.0, 0.0, -distance), translucent(Vec3::ONE));
    }
    renderer.render(&mut scene, &forward_camera());

    let order: Vec<f32> = renderer
        .backend()
        .draws()
        .iter()
        .filter_map(|d| d.translation())
        .map(|t| -t.z)
        .collect();
    assert_eq!(order, vec![10.0, 5.0, 2.0]);
}

#[test]
fn opaque_objects_draw_before_transparent_ones() {
    let mut renderer = renderer(RendererSettings::default());
    let mut scene = Scene::new();
    add_sphere(&mut scene, Vec3::new(0.5, 0.0, -6.0), translucent(Vec3::X));
    add_sphere(&mut scene, Vec3::new(-0.5, 0.0, -3.0), Material::basic(Vec3::Y));
    renderer.render(&mut scene, &forward_camera());

    let xs: Vec<f32> = renderer
        .backend()
        .draws()
        .iter()
        .filter_map(|d| d.translation())
        .map(|t| t.x)
        .collect();
    assert_eq!(xs, vec![-0.5, 0.5]);
}

#[test]
fn unchanged_geometry_is_uploaded_once() {
    let mut renderer = renderer(RendererSettings::default());
    let mut scene = Scene::new();
    add_sphere(&mut scene, Vec3::new(0.0, 0.0, -4.0), Material::basic(Vec3::ONE));
    let camera = forward_camera();

    renderer.render(&mut scene, &camera);
    assert!(renderer.backend().count(|c| matches!(c, Call::BufferData { .. })) > 0);

    renderer.backend_mut().clear_calls();
    renderer.render(&mut scene, &camera);
    let backend = renderer.backend();
    assert_eq!(backend.count(|c| matches!(c, Call::BufferData { .. })), 0);
    assert_eq!(backend.count(|c| matches!(c, Call::BufferSubData { .. })), 0);
    assert_eq!(backend.draws().len(), 1);
}

#[test]
fn version_bump_reuploads_exactly_once() {
    let mut renderer = renderer(RendererSettings::default());
    let mut scene = Scene::new();
    add_sphere(&mut scene, Vec3::new(0.0, 0.0, -4.0), Material::basic(Vec3::ONE));
    let camera = forward_camera();
    renderer.render(&mut scene, &camera);

    let handle = scene.assets.geometries.iter().map(|(h, _)| h).next().unwrap();
    let positions = scene
        .assets
        .geometries
        .get_mut(handle)
        .and_then(|g| g.attribute_mut(&AttributeName::Position))
        .unwrap();
    positions.set_f32(0, 0.25);
    positions.needs_update();
    let byte_len = positions.data.as_bytes().len();

    renderer.backend_mut().clear_calls();
    renderer.render(&mut scene, &camera);
    assert_eq!(
        renderer
            .backend()
            .count(|c| matches!(c, Call::BufferSubData { offset: 0, len, .. } if *len == byte_len)),
        1
    );

    renderer.backend_mut().clear_calls();
    renderer.render(&mut scene, &camera);
    assert_eq!(renderer.backend().count(|c| matches!(c, Call::BufferSubData { .. })), 0);
}

#[test]
fn update_ranges_upload_only_the_dirty_span() {
    let mut renderer = renderer(RendererSettings::default());
    let mut scene = Scene::new();
    add_sphere(&mut scene, Vec3::new(0.0, 0.0, -4.0), Material::basic(Vec3::ONE));
    let camera = forward_camera();
    renderer.render(&mut scene, &camera);

    let handle = scene.assets.geometries.iter().map(|(h, _)| h).next().unwrap();
    let positions = scene
        .assets
        .geometries
        .get_mut(handle)
        .and_then(|g| g.attribute_mut(&AttributeName::Position))
        .unwrap();
    positions.set_f32(3, 0.1);
    positions.set_f32(4, 0.1);
    positions.set_f32(5, 0.1);
    positions.add_update_range(3, 3);
    positions.needs_update();

    renderer.backend_mut().clear_calls();
    renderer.render(&mut scene, &camera);
    let calls = renderer.backend().calls();
    assert!(calls.contains(&Call::BufferSubData {
        target: BufferTarget::Array,
        offset: 12,
        len: 12,
    }));
}

#[test]
fn vertex_attributes_bind_in_location_order() {
    let record = || {
        let mut renderer = renderer(RendererSettings::default());
        let mut scene = Scene::new();
        add_sphere(&mut scene, Vec3::new(0.0, 0.0, -4.0), Material::standard(Vec3::ONE, 0.5, 0.0));
        renderer.render(&mut scene, &forward_camera());
        renderer.backend().calls().to_vec()
    };
    let calls = record();
    assert_eq!(calls, record());

    let locations: Vec<u32> = calls
        .iter()
        .filter_map(|c| match c {
            Call::VertexAttribPointer { index, .. } => Some(*index),
            _ => None,
        })
        .collect();
    assert!(locations.len() >= 3);
    assert!(locations.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn lost_context_skips_rendering_until_restored() {
    let mut renderer = renderer(RendererSettings::default());
    let mut scene = Scene::new();
    add_sphere(&mut scene, Vec3::new(0.0, 0.0, -4.0), Material::basic(Vec3::ONE));
    let camera = forward_camera();
    renderer.render(&mut scene, &camera);

    renderer.backend_mut().set_context_lost(true);
    renderer.backend_mut().clear_calls();
    renderer.render(&mut scene, &camera);
    assert!(renderer.is_context_lost());
    assert!(renderer.backend().draws().is_empty());

    renderer.backend_mut().set_context_lost(false);
    renderer.notify_context_restored();
    renderer.render(&mut scene, &camera);
    let backend = renderer.backend();
    assert!(!renderer.is_context_lost());
    assert_eq!(backend.draws().len(), 1);
    // Everything is rebuilt from the descriptors.
    assert!(backend.count(|c| matches!(c, Call::LinkProgram(_))) > 0);
    assert!(backend.count(|c| matches!(c, Call::BufferData { .. })) > 0);
}

#[test]
fn broken_shader_only_skips_its_own_object() {
    init_logging();
    let mut backend = RecordingBackend::default();
    backend.fail_compile_containing("BROKEN_SHADER");
    let mut renderer = Renderer::new(backend, RendererSettings::default()).with_size(64, 64);

    let mut scene = Scene::new();
    let broken = ShaderMaterial::new(
        "void main() { gl_Position = projectionMatrix * modelViewMatrix * vec4(position, 1.0); }",
        "// BROKEN_SHADER\nvoid main() { gl_FragColor = vec4(1.0); }",
    );
    add_sphere(&mut scene, Vec3::new(1.0, 0.0, -4.0), Material::shader(broken));
    add_sphere(&mut scene, Vec3::new(-1.0, 0.0, -4.0), Material::basic(Vec3::ONE));

    let camera = forward_camera();
    renderer.render(&mut scene, &camera);
    assert_eq!(renderer.info().calls, 1);
    assert_eq!(renderer.info().errors.compile, 1);

    // The failure is remembered rather than retried every frame.
    renderer.backend_mut().clear_calls();
    renderer.render(&mut scene, &camera);
    assert_eq!(renderer.info().calls, 1);
    assert_eq!(renderer.backend().count(|c| matches!(c, Call::CompileShader(..))), 0);
}

#[test]
fn npot_textures_fall_back_without_mipmaps() {
    init_logging();
    let capabilities = Capabilities {
        npot_mipmaps: false,
        ..Capabilities::default()
    };
    let mut renderer =
        Renderer::new(RecordingBackend::new(capabilities), RendererSettings::default()).with_size(64, 64);

    let mut scene = Scene::new();
    let image = Image::from_rgba8(3, 5, vec![255; 3 * 5 * 4]);
    let texture = scene.assets.textures.insert(Texture::from_image(image));
    add_sphere(
        &mut scene,
        Vec3::new(0.0, 0.0, -4.0),
        Material::basic(Vec3::ONE).with_map(texture),
    );
    renderer.render(&mut scene, &forward_camera());

    let backend = renderer.backend();
    assert_eq!(backend.count(|c| matches!(c, Call::TexImage2D { width: 3, height: 5, .. })), 1);
    assert_eq!(backend.count(|c| matches!(c, Call::GenerateMipmap(_))), 0);
    assert_eq!(backend.draws().len(), 1);
}

#[test]
fn each_view_of_an_array_camera_draws_once() {
    let mut renderer = renderer(RendererSettings::default());
    let mut scene = Scene::new();
    add_sphere(&mut scene, Vec3::new(0.0, 0.0, -4.0), Material::basic(Vec3::ONE));

    let left = forward_camera().with_viewport(Rect::new(0, 0, 32, 64));
    let right = forward_camera().with_viewport(Rect::new(32, 0, 32, 64));
    let cameras = ArrayCamera::new(forward_camera(), vec![left, right]);
    renderer.render_multiview(&mut scene, &cameras);

    let viewports: Vec<Rect> = renderer.backend().draws().iter().map(|d| d.viewport).collect();
    assert_eq!(viewports, vec![Rect::new(0, 0, 32, 64), Rect::new(32, 0, 32, 64)]);
    assert_eq!(renderer.info().calls, 2);
}

#[test]
fn color_background_clears_and_adds_no_draws() {
    let mut renderer = renderer(RendererSettings::default());
    let mut scene = Scene::new();
    scene.background = Some(Background::Color(Vec3::new(0.2, 0.4, 0.6)));
    renderer.render(&mut scene, &Camera::default());

    let backend = renderer.backend();
    assert!(backend.calls().contains(&Call::ClearColor([0.2, 0.4, 0.6, 1.0])));
    assert!(backend.draws().is_empty());
}

#[test]
fn render_target_contents_can_be_read_back() {
    let mut renderer = renderer(RendererSettings::default());
    let mut scene = Scene::new();
    add_sphere(&mut scene, Vec3::new(0.0, 0.0, -4.0), Material::basic(Vec3::ONE));

    let target = RenderTarget::new(16, 16);
    renderer.set_render_target(Some(&target), 0, 0).unwrap();
    renderer.render(&mut scene, &forward_camera());
    assert!(renderer.backend().draws()[0].framebuffer.is_some());

    let mut pixels = vec![0u8; 16 * 16 * 4];
    renderer
        .read_render_target_pixels(&target, Rect::new(0, 0, 16, 16), &mut pixels)
        .unwrap();
    assert!(renderer.backend().calls().contains(&Call::ReadPixels(Rect::new(0, 0, 16, 16))));
}

#[test]
fn prefiltering_draws_every_face_of_every_mip() {
    let mut renderer = renderer(RendererSettings::default());
    let mut textures = scenegl::AssetCache::new();
    let sky = textures.insert(Texture::from_image(Image::from_rgba8(8, 4, vec![128; 8 * 4 * 4])));

    let mut generator = PmremGenerator::new().with_face_size(16);
    let pmrem = generator
        .from_equirectangular(&mut renderer, &textures, sky)
        .unwrap();

    // Six faces for the conversion, then two blur passes of six faces per mip.
    assert_eq!(pmrem.max_mip(), 2);
    assert_eq!(renderer.backend().draws().len(), 6 + 12 * 2);
    assert_eq!((pmrem.target.width, pmrem.target.height), (48, 56));

    let texture = pmrem.texture();
    assert_eq!(texture.cube_uv_size, Some(16));
    generator.dispose(&mut renderer);
    renderer.dispose_render_target(&pmrem.target);
}

#[test]
fn prefiltering_a_stale_handle_fails() {
    let mut renderer = renderer(RendererSettings::default());
    let mut textures = scenegl::AssetCache::new();
    let sky = textures.insert(Texture::from_image(Image::from_rgba8(2, 1, vec![0; 8])));
    textures.remove(sky);

    let result = PmremGenerator::new().from_equirectangular(&mut renderer, &textures, sky);
    assert!(result.is_err());
    assert!(renderer.backend().draws().is_empty());
}
