mod common;

use glam::Vec3;
use scenegl::renderer::backend::Call;
use scenegl::renderer::Material;
use scenegl::scene::components::{Drawable, LightComponent, TransformComponent};
use scenegl::scene::{Light, Scene, Transform};
use scenegl::settings::RendererSettings;

use common::{add_sphere, forward_camera, overview_camera, renderer, shadow_scene, shadow_settings};

fn add_point_light(scene: &mut Scene, position: Vec3) {
    scene.add((
        TransformComponent(Transform::from_translation(position)),
        LightComponent(Light::point(Vec3::ONE, 1.0, 0.0, 2.0)),
    ));
}

#[test]
fn identical_materials_share_a_program() {
    let mut renderer = renderer(RendererSettings::default());
    let mut scene = Scene::new();
    add_point_light(&mut scene, Vec3::new(0.0, 2.0, 0.0));
    add_sphere(&mut scene, Vec3::new(-1.0, 0.0, -4.0), Material::lambert(Vec3::X));
    add_sphere(&mut scene, Vec3::new(1.0, 0.0, -4.0), Material::lambert(Vec3::Y));
    renderer.render(&mut scene, &forward_camera());

    let backend = renderer.backend();
    let draws = backend.draws();
    assert_eq!(draws.len(), 2);
    assert_eq!(draws[0].program, draws[1].program);
    assert_eq!(backend.count(|c| matches!(c, Call::LinkProgram(_))), 1);
    assert_eq!(renderer.info().programs, 1);
}

#[test]
fn material_names_do_not_split_variants() {
    let mut renderer = renderer(RendererSettings::default());
    let mut scene = Scene::new();
    add_sphere(&mut scene, Vec3::new(-1.0, 0.0, -4.0), Material::basic(Vec3::X).with_name("red"));
    add_sphere(&mut scene, Vec3::new(1.0, 0.0, -4.0), Material::basic(Vec3::Y).with_name("green"));
    renderer.render(&mut scene, &forward_camera());

    let backend = renderer.backend();
    let draws = backend.draws();
    assert_eq!(draws.len(), 2);
    assert_eq!(draws[0].program, draws[1].program);
    assert_eq!(backend.count(|c| matches!(c, Call::LinkProgram(_))), 1);
}

#[test]
fn casters_of_different_kinds_share_one_depth_program() {
    let mut renderer = renderer(shadow_settings());
    let mut scene = shadow_scene();
    let handles: Vec<_> = scene.assets.materials.iter().map(|(h, _)| h).collect();
    for handle in handles {
        if let Some(material) = scene.assets.materials.get_mut(handle) {
            material.name = "metal".to_string();
        }
    }
    let rock = add_sphere(&mut scene, Vec3::new(2.0, 1.0, 0.0), Material::lambert(Vec3::ONE).with_name("rock"));
    if let Ok(mut drawable) = scene.world.get::<&mut Drawable>(rock) {
        drawable.cast_shadow = true;
    }
    renderer.render(&mut scene, &overview_camera());

    let draws = renderer.backend().draws();
    let depth: Vec<_> = draws.iter().filter(|d| d.framebuffer.is_some()).collect();
    assert_eq!(depth.len(), 2);
    assert_eq!(depth[0].program, depth[1].program);
    assert_eq!(renderer.info().shadow_calls, 2);
}

#[test]
fn adding_a_light_selects_a_new_variant() {
    let mut renderer = renderer(RendererSettings::default());
    let mut scene = Scene::new();
    add_point_light(&mut scene, Vec3::new(0.0, 2.0, 0.0));
    add_sphere(&mut scene, Vec3::new(0.0, 0.0, -4.0), Material::lambert(Vec3::ONE));
    let camera = forward_camera();

    renderer.render(&mut scene, &camera);
    let first = renderer.backend().draws()[0].program;

    add_point_light(&mut scene, Vec3::new(0.0, -2.0, 0.0));
    renderer.backend_mut().clear_calls();
    renderer.render(&mut scene, &camera);
    let backend = renderer.backend();
    assert_eq!(backend.count(|c| matches!(c, Call::LinkProgram(_))), 1);
    assert_ne!(backend.draws()[0].program, first);

    // Unlit materials do not depend on the light set.
    let mut unlit = Scene::new();
    add_point_light(&mut unlit, Vec3::ZERO);
    add_sphere(&mut unlit, Vec3::new(0.0, 0.0, -4.0), Material::basic(Vec3::ONE));
    renderer.render(&mut unlit, &camera);
    add_point_light(&mut unlit, Vec3::ONE);
    renderer.backend_mut().clear_calls();
    renderer.render(&mut unlit, &camera);
    assert_eq!(renderer.backend().count(|c| matches!(c, Call::LinkProgram(_))), 0);
}

#[test]
fn shared_program_is_deleted_after_the_last_material() {
    let mut renderer = renderer(RendererSettings::default());
    let mut scene = Scene::new();
    add_sphere(&mut scene, Vec3::new(-1.0, 0.0, -4.0), Material::basic(Vec3::X));
    add_sphere(&mut scene, Vec3::new(1.0, 0.0, -4.0), Material::basic(Vec3::Y));
    renderer.render(&mut scene, &forward_camera());
    assert_eq!(renderer.backend().live_program_count(), 1);

    let handles: Vec<_> = scene.assets.materials.iter().map(|(h, _)| h).collect();
    let mut materials = handles.into_iter().filter_map(|h| scene.assets.materials.remove(h));
    let first = materials.next().unwrap();
    let second = materials.next().unwrap();

    renderer.dispose_material(&first);
    assert_eq!(renderer.backend().count(|c| matches!(c, Call::DeleteProgram(_))), 0);
    assert_eq!(renderer.backend().live_program_count(), 1);

    renderer.dispose_material(&second);
    assert_eq!(renderer.backend().count(|c| matches!(c, Call::DeleteProgram(_))), 1);
    assert_eq!(renderer.backend().live_program_count(), 0);
}

#[test]
fn material_update_recompiles_only_when_the_variant_changes() {
    let mut renderer = renderer(RendererSettings::default());
    let mut scene = Scene::new();
    add_sphere(&mut scene, Vec3::new(0.0, 0.0, -4.0), Material::basic(Vec3::ONE));
    let camera = forward_camera();
    renderer.render(&mut scene, &camera);

    let handle = scene.assets.materials.iter().map(|(h, _)| h).next().unwrap();
    if let Some(material) = scene.assets.materials.get_mut(handle) {
        material.needs_update();
    }
    renderer.backend_mut().clear_calls();
    renderer.render(&mut scene, &camera);
    assert_eq!(renderer.backend().count(|c| matches!(c, Call::LinkProgram(_))), 0);

    if let Some(material) = scene.assets.materials.get_mut(handle) {
        material.vertex_colors = true;
        material.needs_update();
    }
    renderer.backend_mut().clear_calls();
    renderer.render(&mut scene, &camera);
    assert_eq!(renderer.backend().count(|c| matches!(c, Call::LinkProgram(_))), 1);
}

#[test]
fn compile_prepares_every_variant_ahead_of_the_first_frame() {
    let mut renderer = renderer(RendererSettings::default());
    let mut scene = Scene::new();
    add_point_light(&mut scene, Vec3::new(0.0, 2.0, 0.0));
    add_sphere(&mut scene, Vec3::new(-1.0, 0.0, -4.0), Material::lambert(Vec3::X));
    add_sphere(&mut scene, Vec3::new(1.0, 0.0, -4.0), Material::phong(Vec3::Y));
    let camera = forward_camera();

    renderer.compile(&mut scene, &camera);
    let backend = renderer.backend();
    assert_eq!(backend.count(|c| matches!(c, Call::LinkProgram(_))), 2);
    assert!(backend.draws().is_empty());

    renderer.backend_mut().clear_calls();
    renderer.render(&mut scene, &camera);
    assert_eq!(renderer.backend().count(|c| matches!(c, Call::LinkProgram(_))), 0);
    assert_eq!(renderer.backend().draws().len(), 2);
}
