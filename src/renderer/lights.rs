//! Per-frame aggregation of the scene lights into the flat arrays the lit shaders read.
//!
//! `setup` runs once per frame with world-space input; `setup_view` re-expresses
//! positions and directions in the space of one camera and may run several times per
//! frame (one per view of an array camera).

use std::f32::consts::PI;

use glam::{Mat3, Mat4, Vec2, Vec3};
use hecs::Entity;

use crate::scene::{Light, LightKind};

/// Number of lights of each kind, as baked into program variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct LightCounts {
    pub directional: usize,
    pub point: usize,
    pub spot: usize,
    pub hemisphere: usize,
    pub rect_area: usize,
    pub directional_shadows: usize,
    pub point_shadows: usize,
    pub spot_shadows: usize,
}

impl LightCounts {
    pub fn total(&self) -> usize {
        self.directional + self.point + self.spot + self.hemisphere + self.rect_area
    }
}

/// Shadow map produced for one light during the current frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowMapInfo {
    /// Id of the render target holding the map.
    pub target: u64,
    /// World to shadow-map texture coordinates.
    pub matrix: Mat4,
    pub map_size: Vec2,
    pub camera_near: f32,
    pub camera_far: f32,
}

/// A light found while walking the scene.
#[derive(Debug, Clone, Copy)]
pub struct CollectedLight {
    pub entity: Entity,
    pub light: Light,
    pub world: Mat4,
    pub shadow_map: Option<ShadowMapInfo>,
}

impl CollectedLight {
    pub fn position(&self) -> Vec3 {
        self.world.w_axis.truncate()
    }

    pub fn casts_shadow(&self) -> bool {
        self.light.shadow.is_some() && self.shadow_map.is_some()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DirectionalLightUniforms {
    pub direction: Vec3,
    pub color: Vec3,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PointLightUniforms {
    pub position: Vec3,
    pub color: Vec3,
    pub distance: f32,
    pub decay: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpotLightUniforms {
    pub position: Vec3,
    pub direction: Vec3,
    pub color: Vec3,
    pub distance: f32,
    pub decay: f32,
    pub cone_cos: f32,
    pub penumbra_cos: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HemisphereLightUniforms {
    pub direction: Vec3,
    pub sky_color: Vec3,
    pub ground_color: Vec3,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RectAreaLightUniforms {
    pub position: Vec3,
    pub color: Vec3,
    pub half_width: Vec3,
    pub half_height: Vec3,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ShadowUniforms {
    pub bias: f32,
    pub normal_bias: f32,
    pub radius: f32,
    pub map_size: Vec2,
    pub camera_near: f32,
    pub camera_far: f32,
}

/// Shadow maps and matrices of one light kind, indexed like its light array.
#[derive(Debug, Clone, Default)]
pub struct ShadowArrays {
    pub params: Vec<ShadowUniforms>,
    pub maps: Vec<u64>,
    pub matrices: Vec<Mat4>,
}

impl ShadowArrays {
    fn clear(&mut self) {
        self.params.clear();
        self.maps.clear();
        self.matrices.clear();
    }

    fn push(&mut self, shadow: &crate::scene::LightShadow, map: &ShadowMapInfo) {
        self.params.push(ShadowUniforms {
            bias: shadow.bias,
            normal_bias: shadow.normal_bias,
            radius: shadow.radius,
            map_size: map.map_size,
            camera_near: map.camera_near,
            camera_far: map.camera_far,
        });
        self.maps.push(map.target);
        self.matrices.push(map.matrix);
    }
}

#[derive(Debug, Default)]
pub struct LightsState {
    pub ambient: Vec3,
    pub directional: Vec<DirectionalLightUniforms>,
    pub directional_shadows: ShadowArrays,
    pub point: Vec<PointLightUniforms>,
    pub point_shadows: ShadowArrays,
    pub spot: Vec<SpotLightUniforms>,
    pub spot_shadows: ShadowArrays,
    pub hemisphere: Vec<HemisphereLightUniforms>,
    pub rect_area: Vec<RectAreaLightUniforms>,
    counts: LightCounts,
    version: u64,
    // world-space copies, re-projected by `setup_view`
    sources: Vec<CollectedLight>,
}

impl LightsState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counts(&self) -> LightCounts {
        self.counts
    }

    /// Bumped whenever the light counts change, which invalidates program variants.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Aggregates `lights` (world space). Shadow casters are placed first so shadow
    /// array `i` always belongs to light `i`.
    pub fn setup(&mut self, lights: &[CollectedLight], physically_correct: bool) {
        let scale = if physically_correct { 1.0 } else { PI };

        let mut sorted: Vec<CollectedLight> = lights.to_vec();
        sorted.sort_by_key(|l| !l.casts_shadow());

        self.ambient = Vec3::ZERO;
        self.directional.clear();
        self.point.clear();
        self.spot.clear();
        self.hemisphere.clear();
        self.rect_area.clear();
        self.directional_shadows.clear();
        self.point_shadows.clear();
        self.spot_shadows.clear();

        for collected in &sorted {
            let light = &collected.light;
            let color = light.color * light.intensity;
            let shadow = light.shadow.as_ref().zip(collected.shadow_map.as_ref());
            match light.kind {
                LightKind::Ambient => self.ambient += color,
                LightKind::Directional { .. } => {
                    self.directional.push(DirectionalLightUniforms {
                        direction: Vec3::ZERO,
                        color: color * scale,
                    });
                    if let Some((shadow, map)) = shadow {
                        self.directional_shadows.push(shadow, map);
                    }
                }
                LightKind::Point { distance, decay } => {
                    self.point.push(PointLightUniforms {
                        position: Vec3::ZERO,
                        color: color * scale,
                        distance,
                        decay,
                    });
                    if let Some((shadow, map)) = shadow {
                        self.point_shadows.push(shadow, map);
                    }
                }
                LightKind::Spot {
                    distance,
                    angle,
                    penumbra,
                    decay,
                    ..
                } => {
                    self.spot.push(SpotLightUniforms {
                        position: Vec3::ZERO,
                        direction: Vec3::ZERO,
                        color: color * scale,
                        distance,
                        decay,
                        cone_cos: angle.cos(),
                        penumbra_cos: (angle * (1.0 - penumbra)).cos(),
                    });
                    if let Some((shadow, map)) = shadow {
                        self.spot_shadows.push(shadow, map);
                    }
                }
                LightKind::Hemisphere { ground_color } => {
                    self.hemisphere.push(HemisphereLightUniforms {
                        direction: Vec3::ZERO,
                        sky_color: color,
                        ground_color: ground_color * light.intensity,
                    });
                }
                LightKind::RectArea { .. } => {
                    self.rect_area.push(RectAreaLightUniforms {
                        position: Vec3::ZERO,
                        color,
                        half_width: Vec3::ZERO,
                        half_height: Vec3::ZERO,
                    });
                }
            }
        }

        let counts = LightCounts {
            directional: self.directional.len(),
            point: self.point.len(),
            spot: self.spot.len(),
            hemisphere: self.hemisphere.len(),
            rect_area: self.rect_area.len(),
            directional_shadows: self.directional_shadows.maps.len(),
            point_shadows: self.point_shadows.maps.len(),
            spot_shadows: self.spot_shadows.maps.len(),
        };
        if counts != self.counts {
            log::debug!("Light counts changed: {:?} -> {:?}", self.counts, counts);
            self.counts = counts;
            self.version += 1;
        }
        self.sources = sorted;
    }

    /// Moves positions and directions into the view space of `view_matrix`.
    pub fn setup_view(&mut self, view_matrix: &Mat4) {
        let rotation = Mat3::from_mat4(*view_matrix);
        let (mut d, mut p, mut s, mut h, mut r) = (0, 0, 0, 0, 0);

        for collected in &self.sources {
            let position = collected.position();
            let view_position = view_matrix.transform_point3(position);
            match collected.light.kind {
                LightKind::Ambient => {}
                LightKind::Directional { target } => {
                    if let Some(uniforms) = self.directional.get_mut(d) {
                        uniforms.direction = (rotation * (position - target)).normalize_or_zero();
                    }
                    d += 1;
                }
                LightKind::Point { .. } => {
                    if let Some(uniforms) = self.point.get_mut(p) {
                        uniforms.position = view_position;
                    }
                    p += 1;
                }
                LightKind::Spot { target, .. } => {
                    if let Some(uniforms) = self.spot.get_mut(s) {
                        uniforms.position = view_position;
                        uniforms.direction = (rotation * (position - target)).normalize_or_zero();
                    }
                    s += 1;
                }
                LightKind::Hemisphere { .. } => {
                    if let Some(uniforms) = self.hemisphere.get_mut(h) {
                        uniforms.direction = (rotation * position).normalize_or_zero();
                    }
                    h += 1;
                }
                LightKind::RectArea { width, height } => {
                    if let Some(uniforms) = self.rect_area.get_mut(r) {
                        let basis = rotation * Mat3::from_mat4(collected.world);
                        uniforms.position = view_position;
                        uniforms.half_width = basis * Vec3::new(width * 0.5, 0.0, 0.0);
                        uniforms.half_height = basis * Vec3::new(0.0, height * 0.5, 0.0);
                    }
                    r += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::LightShadow;

    fn collected(light: Light, position: Vec3, shadow: bool) -> CollectedLight {
        CollectedLight {
            entity: Entity::DANGLING,
            light: if shadow {
                light.with_shadow(LightShadow::default())
            } else {
                light
            },
            world: Mat4::from_translation(position),
            shadow_map: shadow.then(|| ShadowMapInfo {
                target: 7,
                matrix: Mat4::IDENTITY,
                map_size: Vec2::splat(512.0),
                camera_near: 0.5,
                camera_far: 500.0,
            }),
        }
    }

    #[test]
    fn counts_and_version_follow_light_set() {
        let mut state = LightsState::new();
        let sun = collected(Light::directional(Vec3::ONE, 1.0), Vec3::Y, true);
        state.setup(&[sun], true);
        assert_eq!(state.counts().directional, 1);
        assert_eq!(state.counts().directional_shadows, 1);
        let version = state.version();

        state.setup(&[sun], true);
        assert_eq!(state.version(), version);

        let lamp = collected(Light::point(Vec3::ONE, 2.0, 10.0, 2.0), Vec3::X, false);
        state.setup(&[sun, lamp], true);
        assert_eq!(state.version(), version + 1);
        assert_eq!(state.counts().total(), 2);
    }

    #[test]
    fn shadow_casters_come_first() {
        let mut state = LightsState::new();
        let plain = collected(Light::directional(Vec3::X, 1.0), Vec3::Y, false);
        let caster = collected(Light::directional(Vec3::Z, 1.0), Vec3::Y, true);
        state.setup(&[plain, caster], true);
        assert_eq!(state.directional[0].color, Vec3::Z);
        assert_eq!(state.directional_shadows.maps, vec![7]);
    }

    #[test]
    fn ambient_accumulates_and_legacy_mode_scales_punctual_lights() {
        let mut state = LightsState::new();
        let a = collected(Light::ambient(Vec3::ONE, 0.25), Vec3::ZERO, false);
        let b = collected(Light::ambient(Vec3::ONE, 0.5), Vec3::ZERO, false);
        let sun = collected(Light::directional(Vec3::ONE, 1.0), Vec3::Y, false);
        state.setup(&[a, b, sun], false);
        assert!(state.ambient.abs_diff_eq(Vec3::splat(0.75), 1e-6));
        assert!((state.directional[0].color.x - PI).abs() < 1e-6);
    }

    #[test]
    fn view_space_direction_points_towards_light() {
        let mut state = LightsState::new();
        let sun = collected(Light::directional(Vec3::ONE, 1.0), Vec3::new(0.0, 10.0, 0.0), false);
        state.setup(&[sun], true);
        state.setup_view(&Mat4::IDENTITY);
        assert!(state.directional[0].direction.abs_diff_eq(Vec3::Y, 1e-6));

        let spot = collected(
            Light::spot(Vec3::ONE, 1.0, 0.0, 0.5, 0.2),
            Vec3::new(0.0, 0.0, 5.0),
            false,
        );
        state.setup(&[spot], true);
        let view = Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0));
        state.setup_view(&view);
        assert!(state.spot[0].position.abs_diff_eq(Vec3::ZERO, 1e-6));
        assert!((state.spot[0].cone_cos - 0.5f32.cos()).abs() < 1e-6);
    }
}
