use crate::scene::components::{OrbitAnimation, RotateAnimation, TransformComponent};
use glam::{Quat, Vec3};
use hecs::World;

pub(crate) fn update_rotate_animations(world: &mut World, dt: f64) {
    for (_, (transform, anim)) in world.query_mut::<(&mut TransformComponent, &RotateAnimation)>() {
        let rotation = Quat::from_axis_angle(anim.axis.normalize_or_zero(), anim.speed * dt as f32);
        transform.0.rotation = (rotation * transform.0.rotation).normalize();
    }
}

/// Places orbiting entities on their circle (in the XZ plane around `center`) at `time`.
pub(crate) fn update_orbit_animations(world: &mut World, time: f64) {
    let time = time as f32;
    for (_, (transform, orbit)) in world.query_mut::<(&mut TransformComponent, &OrbitAnimation)>() {
        let angle = time * orbit.speed + orbit.offset;
        transform.0.translation =
            orbit.center + Vec3::new(angle.cos() * orbit.radius, 0.0, angle.sin() * orbit.radius);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::transform::Transform;

    #[test]
    fn orbit_keeps_radius() {
        let mut world = World::new();
        let e = world.spawn((
            TransformComponent(Transform::IDENTITY),
            OrbitAnimation {
                center: Vec3::new(1.0, 0.0, 0.0),
                radius: 4.0,
                speed: 0.7,
                offset: 0.3,
            },
        ));
        update_orbit_animations(&mut world, 2.5);
        let t = world.get::<&TransformComponent>(e).unwrap();
        let d = t.0.translation - Vec3::new(1.0, 0.0, 0.0);
        assert!((d.length() - 4.0).abs() < 1e-4);
    }

    #[test]
    fn rotation_accumulates() {
        let mut world = World::new();
        let e = world.spawn((
            TransformComponent(Transform::IDENTITY),
            RotateAnimation {
                axis: Vec3::Y,
                speed: std::f32::consts::FRAC_PI_2,
            },
        ));
        update_rotate_animations(&mut world, 1.0);
        update_rotate_animations(&mut world, 1.0);
        let t = world.get::<&TransformComponent>(e).unwrap();
        let rotated = t.0.rotation * Vec3::X;
        assert!(rotated.abs_diff_eq(Vec3::new(-1.0, 0.0, 0.0), 1e-4));
    }
}
