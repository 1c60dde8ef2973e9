#![allow(dead_code)]

use glam::{Quat, Vec3};
use hecs::Entity;

use scenegl::renderer::{plane_geometry, sphere_geometry, Material, RecordingBackend, Renderer};
use scenegl::scene::components::{Drawable, LightComponent, TransformComponent};
use scenegl::scene::{Camera, Light, LightShadow, Scene, Transform};
use scenegl::settings::RendererSettings;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn renderer(settings: RendererSettings) -> Renderer<RecordingBackend> {
    init_logging();
    Renderer::new(RecordingBackend::default(), settings).with_size(64, 64)
}

pub fn shadow_settings() -> RendererSettings {
    let mut settings = RendererSettings::default();
    settings.shadows.enabled = true;
    settings
}

/// Camera at the origin looking down -Z.
pub fn forward_camera() -> Camera {
    Camera::perspective(60.0, 1.0, 0.1, 100.0).look_at(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y)
}

pub fn overview_camera() -> Camera {
    Camera::perspective(60.0, 1.0, 0.1, 100.0).look_at(Vec3::new(0.0, 5.0, 10.0), Vec3::ZERO, Vec3::Y)
}

pub fn add_sphere(scene: &mut Scene, position: Vec3, material: Material) -> Entity {
    let geometry = scene.assets.geometries.insert(sphere_geometry(0.5, 16, 8));
    let material = scene.assets.materials.insert(material);
    scene.add((
        TransformComponent(Transform::from_translation(position)),
        Drawable::mesh(geometry, material),
    ))
}

/// Unit sphere caster above a 10x10 receiving ground plane, lit by one directional
/// light with a 512x512 shadow map.
pub fn shadow_scene() -> Scene {
    let mut scene = Scene::new();
    let sphere = scene.assets.geometries.insert(sphere_geometry(1.0, 16, 8));
    let plane = scene.assets.geometries.insert(plane_geometry(10.0, 10.0, 1, 1));
    let sphere_material = scene
        .assets
        .materials
        .insert(Material::standard(Vec3::splat(0.8), 0.5, 0.0));
    let ground_material = scene
        .assets
        .materials
        .insert(Material::standard(Vec3::splat(0.8), 0.5, 0.0));

    scene.add((
        TransformComponent(Transform::from_translation(Vec3::new(0.0, 1.0, 0.0))),
        Drawable::mesh(sphere, sphere_material).casting_shadow(),
    ));
    scene.add((
        TransformComponent(
            Transform::IDENTITY.with_rotation(Quat::from_rotation_x(-std::f32::consts::FRAC_PI_2)),
        ),
        Drawable::mesh(plane, ground_material).receiving_shadow(),
    ));
    scene.add((
        TransformComponent(Transform::from_translation(Vec3::new(3.0, 10.0, 3.0))),
        LightComponent(
            Light::directional(Vec3::ONE, 1.0)
                .with_target(Vec3::ZERO)
                .with_shadow(LightShadow::default().with_map_size(512, 512)),
        ),
    ));
    scene
}
