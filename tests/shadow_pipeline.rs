mod common;

use scenegl::renderer::backend::Call;
use scenegl::scene::components::LightComponent;
use scenegl::settings::ShadowType;

use common::{overview_camera, renderer, shadow_scene, shadow_settings};

#[test]
fn caster_and_receiver_scenario() {
    let mut renderer = renderer(shadow_settings());
    let mut scene = shadow_scene();
    renderer.render(&mut scene, &overview_camera());

    let info = renderer.info();
    assert_eq!(info.shadow_calls, 1, "only the sphere casts");
    assert_eq!(info.calls, 2, "sphere and ground, nothing transparent");

    let draws = renderer.backend().draws();
    let color: Vec<_> = draws.iter().filter(|d| d.framebuffer.is_none()).collect();
    assert_eq!(color.len(), 2);
    assert_eq!(color[0].program, color[1].program);
    assert_eq!(info.programs, 2, "one depth program and one shared color program");
}

#[test]
fn shadow_depth_is_drawn_before_it_is_sampled() {
    let mut renderer = renderer(shadow_settings());
    let mut scene = shadow_scene();
    renderer.render(&mut scene, &overview_camera());

    let draws = renderer.backend().draws();
    let first_color = draws
        .iter()
        .position(|d| d.framebuffer.is_none())
        .expect("color draws");
    let last_shadow = draws
        .iter()
        .rposition(|d| d.framebuffer.is_some())
        .expect("shadow draws");
    assert!(last_shadow < first_color);
    assert_eq!(draws[last_shadow].viewport.width, 512);
}

#[test]
fn shadow_maps_are_skipped_when_disabled() {
    let mut renderer = renderer(Default::default());
    let mut scene = shadow_scene();
    renderer.render(&mut scene, &overview_camera());

    assert_eq!(renderer.info().shadow_calls, 0);
    assert!(renderer.backend().draws().iter().all(|d| d.framebuffer.is_none()));
}

#[test]
fn vsm_blurs_the_map_in_two_passes() {
    let mut settings = shadow_settings();
    settings.shadows.kind = ShadowType::Vsm;
    let mut renderer = renderer(settings);
    let mut scene = shadow_scene();
    renderer.render(&mut scene, &overview_camera());

    // One depth draw plus the two blur passes.
    assert_eq!(renderer.info().shadow_calls, 3);
    assert_eq!(renderer.info().calls, 2);
}

#[test]
fn maps_are_kept_between_frames_without_auto_update() {
    let mut settings = shadow_settings();
    settings.shadows.auto_update = false;
    let mut renderer = renderer(settings);
    let mut scene = shadow_scene();
    for (_, light) in scene.world.query_mut::<&mut LightComponent>() {
        if let Some(shadow) = light.0.shadow.as_mut() {
            shadow.auto_update = false;
        }
    }
    let camera = overview_camera();

    renderer.render(&mut scene, &camera);
    assert_eq!(renderer.info().shadow_calls, 1);

    renderer.render(&mut scene, &camera);
    assert_eq!(renderer.info().shadow_calls, 0);

    for (_, light) in scene.world.query_mut::<&mut LightComponent>() {
        if let Some(shadow) = light.0.shadow.as_mut() {
            shadow.request_update();
        }
    }
    renderer.render(&mut scene, &camera);
    assert_eq!(renderer.info().shadow_calls, 1);
}

#[test]
fn changing_vsm_samples_releases_the_old_blur_programs() {
    let mut settings = shadow_settings();
    settings.shadows.kind = ShadowType::Vsm;
    let mut renderer = renderer(settings);
    let mut scene = shadow_scene();
    let camera = overview_camera();

    renderer.render(&mut scene, &camera);
    let programs = renderer.info().programs;
    assert_eq!(renderer.backend().live_program_count(), programs);

    for (_, light) in scene.world.query_mut::<&mut LightComponent>() {
        if let Some(shadow) = light.0.shadow.as_mut() {
            shadow.blur_samples = 4;
        }
    }
    renderer.render(&mut scene, &camera);
    assert_eq!(renderer.info().shadow_calls, 3);
    assert_eq!(renderer.info().programs, programs);
    assert_eq!(renderer.backend().live_program_count(), programs);
    assert_eq!(renderer.backend().count(|c| matches!(c, Call::DeleteProgram(_))), 2);
}

#[test]
fn removing_a_vsm_light_releases_its_blur_programs() {
    let mut settings = shadow_settings();
    settings.shadows.kind = ShadowType::Vsm;
    let mut renderer = renderer(settings);
    let mut scene = shadow_scene();
    let camera = overview_camera();
    renderer.render(&mut scene, &camera);

    let lights: Vec<_> = scene
        .world
        .query_mut::<&LightComponent>()
        .into_iter()
        .map(|(entity, _)| entity)
        .collect();
    for entity in lights {
        let _ = scene.world.despawn(entity);
    }
    renderer.render(&mut scene, &camera);

    // Depth substitute and one shared color program remain; both blur passes are gone.
    assert_eq!(renderer.backend().count(|c| matches!(c, Call::DeleteProgram(_))), 3);
    assert_eq!(renderer.backend().live_program_count(), renderer.info().programs);
}

#[test]
fn shadow_map_storage_is_released_on_dispose() {
    let mut renderer = renderer(shadow_settings());
    let mut scene = shadow_scene();
    renderer.render(&mut scene, &overview_camera());
    assert!(renderer.backend().count(|c| matches!(c, Call::CreateFramebuffer(_))) > 0);

    renderer.dispose();
    let backend = renderer.backend();
    assert_eq!(
        backend.count(|c| matches!(c, Call::CreateFramebuffer(_))),
        backend.count(|c| matches!(c, Call::DeleteFramebuffer(_)))
    );
    assert_eq!(backend.live_program_count(), 0);
    assert_eq!(backend.live_texture_count(), 0);
}
