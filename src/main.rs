//! Headless demo: builds a small solar system, prefilters a procedural sky and renders
//! a few frames through the recording backend, logging what each frame cost.

use glam::{Mat4, Quat, Vec3};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use scenegl::renderer::{
    box_geometry, sphere_geometry, Image, Material, PmremGenerator, RecordingBackend, Renderer,
    Texture, TextureMapping,
};
use scenegl::scene::components::{
    Drawable, Instancing, LightComponent, Name, OrbitAnimation, RotateAnimation, TransformComponent,
};
use scenegl::scene::{Background, Camera, Light, LightShadow, Scene, Transform};
use scenegl::settings::RendererSettings;
use scenegl::time::FrameTimer;

const FRAMES: u32 = 8;
const ASTEROIDS: usize = 200;

/// Vertical gradient from horizon to zenith, stored as an equirect image.
fn sky_texture() -> Texture {
    let (width, height) = (64u32, 32u32);
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        let t = y as f32 / (height - 1) as f32;
        let color = Vec3::new(0.02, 0.03, 0.08).lerp(Vec3::new(0.25, 0.35, 0.6), 1.0 - t);
        for _ in 0..width {
            data.extend_from_slice(&[
                (color.x * 255.0) as u8,
                (color.y * 255.0) as u8,
                (color.z * 255.0) as u8,
                255,
            ]);
        }
    }
    Texture::from_image(Image::from_rgba8(width, height, data))
        .with_name("sky")
        .with_mapping(TextureMapping::EquirectReflection)
}

fn build_solar_system(scene: &mut Scene, rng: &mut SmallRng) {
    let sphere = scene.assets.geometries.insert(sphere_geometry(1.0, 32, 16));
    let rock = scene.assets.geometries.insert(box_geometry(0.1, 0.1, 0.1));

    let sun_material = scene.assets.materials.insert(Material::basic(Vec3::new(1.0, 0.8, 0.3)));
    scene.add((
        Name::new("Sun"),
        TransformComponent(Transform::IDENTITY.with_scale(Vec3::splat(2.0))),
        Drawable::mesh(sphere, sun_material),
        RotateAnimation {
            axis: Vec3::Y,
            speed: 0.2,
        },
    ));
    scene.add((
        Name::new("Sunlight"),
        TransformComponent(Transform::IDENTITY),
        LightComponent(Light::point(Vec3::ONE, 40.0, 0.0, 2.0).with_shadow(LightShadow::default())),
    ));
    scene.add((
        Name::new("Ambient"),
        TransformComponent(Transform::IDENTITY),
        LightComponent(Light::ambient(Vec3::new(0.4, 0.45, 0.6), 0.1)),
    ));

    let planets = [
        ("Mercury", 4.0, 0.3, Vec3::new(0.6, 0.55, 0.5), 1.6),
        ("Venus", 6.0, 0.5, Vec3::new(0.9, 0.7, 0.4), 1.2),
        ("Earth", 8.5, 0.55, Vec3::new(0.2, 0.4, 0.9), 1.0),
        ("Mars", 11.0, 0.4, Vec3::new(0.8, 0.3, 0.2), 0.8),
    ];
    for (name, radius, size, color, speed) in planets {
        let material = scene
            .assets
            .materials
            .insert(Material::standard(color, 0.8, 0.0));
        let planet = scene.add((
            Name::new(name),
            TransformComponent(Transform::from_translation(Vec3::new(radius, 0.0, 0.0)).with_scale(Vec3::splat(size))),
            Drawable::mesh(sphere, material).casting_shadow().receiving_shadow(),
            OrbitAnimation {
                center: Vec3::ZERO,
                radius,
                speed: speed * 0.5,
                offset: rng.gen_range(0.0..std::f32::consts::TAU),
            },
        ));
        if name == "Earth" {
            let moon_material = scene.assets.materials.insert(Material::standard(Vec3::splat(0.7), 0.9, 0.0));
            scene.add_child(
                planet,
                (
                    Name::new("Moon"),
                    TransformComponent(Transform::from_translation(Vec3::new(1.8, 0.0, 0.0)).with_scale(Vec3::splat(0.3))),
                    Drawable::mesh(sphere, moon_material).casting_shadow(),
                ),
            );
        }
    }

    let belt: Vec<Mat4> = (0..ASTEROIDS)
        .map(|_| {
            let angle = rng.gen_range(0.0..std::f32::consts::TAU);
            let distance = rng.gen_range(13.0..15.5);
            let height = rng.gen_range(-0.3..0.3);
            let rotation = Quat::from_euler(
                glam::EulerRot::XYZ,
                rng.gen_range(0.0..3.0),
                rng.gen_range(0.0..3.0),
                rng.gen_range(0.0..3.0),
            );
            Mat4::from_rotation_translation(
                rotation,
                Vec3::new(angle.cos() * distance, height, angle.sin() * distance),
            )
        })
        .collect();
    let rock_material = scene.assets.materials.insert(Material::lambert(Vec3::new(0.5, 0.45, 0.4)));
    scene.add((
        Name::new("Asteroid belt"),
        TransformComponent(Transform::IDENTITY),
        Drawable::mesh(rock, rock_material)
            .with_instancing(Instancing::new(&belt))
            .without_culling(),
    ));
}

fn main() {
    scenegl::init_logging();

    let settings = match std::env::args().nth(1) {
        Some(path) => RendererSettings::load_from_path(path),
        None => {
            let mut settings = RendererSettings::load();
            settings.shadows.enabled = true;
            settings
        }
    };
    let mut renderer = Renderer::new(RecordingBackend::default(), settings).with_size(1280, 720);

    let mut scene = Scene::new();
    let mut rng = SmallRng::seed_from_u64(7);
    build_solar_system(&mut scene, &mut rng);

    let sky = scene.assets.textures.insert(sky_texture());
    scene.background = Some(Background::Cube(sky));

    let mut pmrem = PmremGenerator::new().with_face_size(64);
    match pmrem.from_equirectangular(&mut renderer, &scene.assets.textures, sky) {
        Ok(prefiltered) => {
            log::info!("Environment atlas ready ({} mips)", prefiltered.max_mip() + 1);
            scene.environment = Some(scene.assets.textures.insert(prefiltered.texture()));
        }
        Err(err) => log::error!("Failed to prefilter sky: {}", err),
    }
    pmrem.dispose(&mut renderer);

    let camera = Camera::perspective(50.0, 1280.0 / 720.0, 0.1, 200.0).look_at(
        Vec3::new(0.0, 12.0, 24.0),
        Vec3::ZERO,
        Vec3::Y,
    );
    renderer.compile(&mut scene, &camera);

    let mut timer = FrameTimer::new();
    for _ in 0..FRAMES {
        let dt = timer.tick().max(1.0 / 60.0);
        scene.update(dt);
        renderer.render(&mut scene, &camera);
        let info = renderer.info();
        log::info!(
            "Frame {}: {} draws, {} shadow draws, {} triangles, {} programs",
            info.frame,
            info.calls,
            info.shadow_calls,
            info.triangles,
            info.programs
        );
    }

    let backend = renderer.backend();
    log::info!(
        "Recorded {} backend calls; {} live programs, {} live textures, {} live buffers",
        backend.calls().len(),
        backend.live_program_count(),
        backend.live_texture_count(),
        backend.live_buffer_count()
    );
    renderer.dispose();
}
