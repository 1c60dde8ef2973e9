use glam::{Mat4, Vec3};

use crate::renderer::Rect;
use crate::scene::bounds::Frustum;
use crate::scene::components::Layers;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Projection {
    Perspective {
        fov_y_radians: f32,
        aspect: f32,
        near: f32,
        far: f32,
    },
    Orthographic {
        left: f32,
        right: f32,
        top: f32,
        bottom: f32,
        near: f32,
        far: f32,
    },
}

/// A camera with an explicit world matrix. Projections follow GL clip conventions
/// (depth in -1..1).
#[derive(Clone, Copy, Debug)]
pub struct Camera {
    pub projection: Projection,
    pub world: Mat4,
    pub layers: Layers,
    /// Sub-rectangle of the drawing surface in logical pixels; used by [`ArrayCamera`]
    /// views.
    pub viewport: Option<Rect>,
}

impl Camera {
    pub fn perspective(fov_y_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            projection: Projection::Perspective {
                fov_y_radians: fov_y_degrees.to_radians(),
                aspect,
                near,
                far,
            },
            world: Mat4::IDENTITY,
            layers: Layers::default(),
            viewport: None,
        }
    }

    pub fn orthographic(left: f32, right: f32, top: f32, bottom: f32, near: f32, far: f32) -> Self {
        Self {
            projection: Projection::Orthographic {
                left,
                right,
                top,
                bottom,
                near,
                far,
            },
            world: Mat4::IDENTITY,
            layers: Layers::default(),
            viewport: None,
        }
    }

    pub fn look_at(mut self, eye: Vec3, target: Vec3, up: Vec3) -> Self {
        self.world = Mat4::look_at_rh(eye, target, up).inverse();
        self
    }

    pub fn with_viewport(mut self, viewport: Rect) -> Self {
        self.viewport = Some(viewport);
        self
    }

    pub fn set_aspect(&mut self, value: f32) {
        if let Projection::Perspective { aspect, .. } = &mut self.projection {
            *aspect = value;
        }
    }

    pub fn projection_matrix(&self) -> Mat4 {
        match self.projection {
            Projection::Perspective {
                fov_y_radians,
                aspect,
                near,
                far,
            } => Mat4::perspective_rh_gl(fov_y_radians, aspect, near, far),
            Projection::Orthographic {
                left,
                right,
                top,
                bottom,
                near,
                far,
            } => Mat4::orthographic_rh_gl(left, right, bottom, top, near, far),
        }
    }

    pub fn view_matrix(&self) -> Mat4 {
        self.world.inverse()
    }

    pub fn view_proj(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    pub fn position(&self) -> Vec3 {
        self.world.w_axis.truncate()
    }

    /// Unit vector the camera looks along (its local -Z).
    pub fn forward(&self) -> Vec3 {
        (-self.world.z_axis.truncate()).normalize_or_zero()
    }

    pub fn near(&self) -> f32 {
        match self.projection {
            Projection::Perspective { near, .. } | Projection::Orthographic { near, .. } => near,
        }
    }

    pub fn far(&self) -> f32 {
        match self.projection {
            Projection::Perspective { far, .. } | Projection::Orthographic { far, .. } => far,
        }
    }

    pub fn is_orthographic(&self) -> bool {
        matches!(self.projection, Projection::Orthographic { .. })
    }

    pub fn frustum(&self) -> Frustum {
        Frustum::from_matrix(&self.view_proj())
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::perspective(60.0, 1.0, 0.1, 100.0).look_at(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO, Vec3::Y)
    }
}

/// A set of views rendered in one pass (stereo, split screen). Culling uses `main`.
#[derive(Clone, Debug)]
pub struct ArrayCamera {
    pub main: Camera,
    pub cameras: Vec<Camera>,
}

impl ArrayCamera {
    pub fn new(main: Camera, cameras: Vec<Camera>) -> Self {
        Self { main, cameras }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_proj_is_reasonable() {
        let cam = Camera::default();
        let vp = cam.view_proj();
        let inv = vp.inverse();
        let id = vp * inv;
        let eps = 1e-4;
        assert!(id.abs_diff_eq(Mat4::IDENTITY, eps));
    }

    #[test]
    fn look_at_sets_position_and_forward() {
        let cam = Camera::perspective(45.0, 1.0, 0.1, 50.0).look_at(
            Vec3::new(0.0, 0.0, 10.0),
            Vec3::ZERO,
            Vec3::Y,
        );
        assert!(cam.position().abs_diff_eq(Vec3::new(0.0, 0.0, 10.0), 1e-5));
        assert!(cam.forward().abs_diff_eq(Vec3::new(0.0, 0.0, -1.0), 1e-5));
    }

    #[test]
    fn gl_projection_maps_near_plane_to_minus_one() {
        let cam = Camera::perspective(60.0, 1.0, 1.0, 10.0);
        let clip = cam.projection_matrix() * glam::Vec4::new(0.0, 0.0, -1.0, 1.0);
        assert!((clip.z / clip.w + 1.0).abs() < 1e-5);
    }
}
