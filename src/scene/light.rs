use glam::{UVec2, Vec3};

/// Light variants with their falloff parameters. Directions are expressed through a
/// world-space `target` point, as the light's position comes from its transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightKind {
    Ambient,
    Directional {
        target: Vec3,
    },
    Point {
        /// Cutoff distance; zero means unbounded.
        distance: f32,
        decay: f32,
    },
    Spot {
        distance: f32,
        /// Half-angle of the cone in radians.
        angle: f32,
        /// Fraction of the cone over which the edge fades, 0..1.
        penumbra: f32,
        decay: f32,
        target: Vec3,
    },
    Hemisphere {
        ground_color: Vec3,
    },
    RectArea {
        width: f32,
        height: f32,
    },
}

/// Shadow parameters of a shadow-casting light.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightShadow {
    pub bias: f32,
    pub normal_bias: f32,
    /// Blur radius used by PCF-soft and VSM filtering.
    pub radius: f32,
    pub blur_samples: u32,
    pub map_size: UVec2,
    pub camera_near: f32,
    /// Zero derives the far plane from the light (spot/point distance) or 500.
    pub camera_far: f32,
    /// Half extent of the orthographic shadow camera of directional lights.
    pub camera_extent: f32,
    /// Re-render the map every frame even when the pipeline's auto update is off.
    pub auto_update: bool,
    pub(crate) update_requests: u64,
}

impl Default for LightShadow {
    fn default() -> Self {
        Self {
            bias: 0.0,
            normal_bias: 0.0,
            radius: 1.0,
            blur_samples: 8,
            map_size: UVec2::splat(512),
            camera_near: 0.5,
            camera_far: 0.0,
            camera_extent: 5.0,
            auto_update: true,
            update_requests: 0,
        }
    }
}

impl LightShadow {
    pub fn with_map_size(mut self, width: u32, height: u32) -> Self {
        self.map_size = UVec2::new(width, height);
        self
    }

    pub fn with_bias(mut self, bias: f32) -> Self {
        self.bias = bias;
        self
    }

    /// Asks for one re-render of the map on the next frame.
    pub fn request_update(&mut self) {
        self.update_requests += 1;
    }

    pub fn update_requests(&self) -> u64 {
        self.update_requests
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub kind: LightKind,
    pub color: Vec3,
    pub intensity: f32,
    pub shadow: Option<LightShadow>,
}

impl Light {
    pub fn ambient(color: Vec3, intensity: f32) -> Self {
        Self::new(LightKind::Ambient, color, intensity)
    }

    pub fn directional(color: Vec3, intensity: f32) -> Self {
        Self::new(LightKind::Directional { target: Vec3::ZERO }, color, intensity)
    }

    pub fn point(color: Vec3, intensity: f32, distance: f32, decay: f32) -> Self {
        Self::new(LightKind::Point { distance, decay }, color, intensity)
    }

    pub fn spot(color: Vec3, intensity: f32, distance: f32, angle: f32, penumbra: f32) -> Self {
        Self::new(
            LightKind::Spot {
                distance,
                angle,
                penumbra,
                decay: 2.0,
                target: Vec3::ZERO,
            },
            color,
            intensity,
        )
    }

    pub fn hemisphere(sky_color: Vec3, ground_color: Vec3, intensity: f32) -> Self {
        Self::new(LightKind::Hemisphere { ground_color }, sky_color, intensity)
    }

    pub fn rect_area(color: Vec3, intensity: f32, width: f32, height: f32) -> Self {
        Self::new(LightKind::RectArea { width, height }, color, intensity)
    }

    fn new(kind: LightKind, color: Vec3, intensity: f32) -> Self {
        Self {
            kind,
            color,
            intensity,
            shadow: None,
        }
    }

    pub fn with_target(mut self, point: Vec3) -> Self {
        let kind = self.kind;
        match &mut self.kind {
            LightKind::Directional { target } | LightKind::Spot { target, .. } => *target = point,
            _ => log::warn!("Light kind {:?} has no target", kind),
        }
        self
    }

    /// Enables shadow casting. Only directional, spot and point lights cast shadows.
    pub fn with_shadow(mut self, shadow: LightShadow) -> Self {
        if self.can_cast_shadow() {
            self.shadow = Some(shadow);
        } else {
            log::warn!("Light kind {:?} cannot cast shadows", self.kind);
        }
        self
    }

    pub fn can_cast_shadow(&self) -> bool {
        matches!(
            self.kind,
            LightKind::Directional { .. } | LightKind::Spot { .. } | LightKind::Point { .. }
        )
    }

    pub fn casts_shadow(&self) -> bool {
        self.shadow.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ambient_lights_reject_shadows() {
        let light = Light::ambient(Vec3::ONE, 1.0).with_shadow(LightShadow::default());
        assert!(!light.casts_shadow());
    }

    #[test]
    fn update_requests_accumulate() {
        let mut shadow = LightShadow::default();
        shadow.request_update();
        shadow.request_update();
        assert_eq!(shadow.update_requests(), 2);
    }
}
