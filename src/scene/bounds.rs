use glam::{Mat3, Mat4, Vec3, Vec4};

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Box3 {
    pub min: Vec3,
    pub max: Vec3,
}

impl Box3 {
    pub const EMPTY: Box3 = Box3 {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        let mut bounds = Self::EMPTY;
        for point in points {
            bounds.expand(point);
        }
        bounds
    }

    pub fn expand(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn is_empty(&self) -> bool {
        self.max.x < self.min.x || self.max.y < self.min.y || self.max.z < self.min.z
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sphere {
    pub center: Vec3,
    pub radius: f32,
}

impl Default for Sphere {
    fn default() -> Self {
        Self {
            center: Vec3::ZERO,
            radius: -1.0,
        }
    }
}

impl Sphere {
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }

    pub fn is_empty(&self) -> bool {
        self.radius < 0.0
    }

    /// Smallest sphere centered on the box of `points` that encloses all of them.
    pub fn from_points(points: &[Vec3]) -> Self {
        let bounds = Box3::from_points(points.iter().copied());
        if bounds.is_empty() {
            return Self::default();
        }
        let center = bounds.center();
        let radius = points
            .iter()
            .map(|p| p.distance_squared(center))
            .fold(0.0f32, f32::max)
            .sqrt();
        Self { center, radius }
    }

    /// Transforms the sphere; the radius grows with the largest axis scale.
    pub fn transformed(&self, matrix: &Mat4) -> Self {
        let scale = matrix
            .x_axis
            .truncate()
            .length_squared()
            .max(matrix.y_axis.truncate().length_squared())
            .max(matrix.z_axis.truncate().length_squared())
            .sqrt();
        Self {
            center: matrix.transform_point3(self.center),
            radius: self.radius * scale,
        }
    }

    pub fn union(&self, other: &Sphere) -> Self {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let offset = other.center - self.center;
        let distance = offset.length();
        if distance + other.radius <= self.radius {
            return *self;
        }
        if distance + self.radius <= other.radius {
            return *other;
        }
        let radius = (distance + self.radius + other.radius) * 0.5;
        let center = self.center + offset * ((radius - self.radius) / distance);
        Self { center, radius }
    }
}

/// Plane in Hessian normal form: points `p` with `normal · p + constant == 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub constant: f32,
}

impl Plane {
    pub fn new(normal: Vec3, constant: f32) -> Self {
        Self { normal, constant }
    }

    pub fn from_normal_and_point(normal: Vec3, point: Vec3) -> Self {
        let normal = normal.normalize();
        Self {
            normal,
            constant: -normal.dot(point),
        }
    }

    fn from_vec4(v: Vec4) -> Self {
        let length = v.truncate().length();
        if length <= f32::EPSILON {
            return Self::new(Vec3::Z, 0.0);
        }
        Self {
            normal: v.truncate() / length,
            constant: v.w / length,
        }
    }

    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.constant
    }

    pub fn transformed(&self, matrix: &Mat4) -> Self {
        let normal_matrix = Mat3::from_mat4(*matrix).inverse().transpose();
        let point = matrix.transform_point3(self.normal * -self.constant);
        let normal = (normal_matrix * self.normal).normalize();
        Self {
            normal,
            constant: -point.dot(normal),
        }
    }

    pub fn to_vec4(&self) -> Vec4 {
        self.normal.extend(self.constant)
    }
}

/// Six clip planes extracted from a view-projection matrix (GL clip conventions).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    pub planes: [Plane; 6],
}

impl Frustum {
    pub fn from_matrix(m: &Mat4) -> Self {
        let r0 = m.row(0);
        let r1 = m.row(1);
        let r2 = m.row(2);
        let r3 = m.row(3);
        Self {
            planes: [
                Plane::from_vec4(r3 + r0),
                Plane::from_vec4(r3 - r0),
                Plane::from_vec4(r3 + r1),
                Plane::from_vec4(r3 - r1),
                Plane::from_vec4(r3 + r2),
                Plane::from_vec4(r3 - r2),
            ],
        }
    }

    pub fn intersects_sphere(&self, sphere: &Sphere) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.distance_to_point(sphere.center) >= -sphere.radius)
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.distance_to_point(point) >= 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    #[test]
    fn sphere_from_points_encloses_all() {
        let points = [
            Vec3::new(-1.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 2.0, 0.0),
        ];
        let sphere = Sphere::from_points(&points);
        for p in points {
            assert!(p.distance(sphere.center) <= sphere.radius + EPS);
        }
    }

    #[test]
    fn transformed_sphere_scales_radius() {
        let sphere = Sphere::new(Vec3::ZERO, 1.0);
        let m = Mat4::from_scale_rotation_translation(
            Vec3::new(1.0, 3.0, 2.0),
            glam::Quat::IDENTITY,
            Vec3::new(5.0, 0.0, 0.0),
        );
        let t = sphere.transformed(&m);
        assert!(t.center.abs_diff_eq(Vec3::new(5.0, 0.0, 0.0), EPS));
        assert!((t.radius - 3.0).abs() < EPS);
    }

    #[test]
    fn union_contains_both() {
        let a = Sphere::new(Vec3::ZERO, 1.0);
        let b = Sphere::new(Vec3::new(4.0, 0.0, 0.0), 1.0);
        let u = a.union(&b);
        assert!((u.radius - 3.0).abs() < EPS);
        assert!(u.center.abs_diff_eq(Vec3::new(2.0, 0.0, 0.0), EPS));
    }

    #[test]
    fn frustum_culls_spheres_behind_camera() {
        let projection = Mat4::perspective_rh_gl(60f32.to_radians(), 1.0, 0.1, 100.0);
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
        let frustum = Frustum::from_matrix(&(projection * view));

        assert!(frustum.intersects_sphere(&Sphere::new(Vec3::ZERO, 1.0)));
        assert!(!frustum.intersects_sphere(&Sphere::new(Vec3::new(0.0, 0.0, 20.0), 1.0)));
        assert!(!frustum.intersects_sphere(&Sphere::new(Vec3::new(0.0, 0.0, -200.0), 1.0)));
    }

    #[test]
    fn plane_transform_keeps_points_on_plane() {
        let plane = Plane::from_normal_and_point(Vec3::Y, Vec3::new(0.0, 1.0, 0.0));
        let m = Mat4::from_translation(Vec3::new(0.0, 2.0, 0.0));
        let moved = plane.transformed(&m);
        assert!(moved.distance_to_point(Vec3::new(7.0, 3.0, -2.0)).abs() < EPS);
    }
}
