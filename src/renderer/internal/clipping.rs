use glam::Mat4;

use crate::renderer::backend::UniformValue;
use crate::renderer::material::Material;
use crate::scene::Plane;

/// Clip planes of one draw: renderer-wide planes first, then the material's.
///
/// Planes are uploaded in view space as `(normal, constant)`; the shader discards
/// fragments on the negative side.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ClipPlanes {
    pub(crate) count: usize,
    /// Trailing planes combined by intersection instead of union.
    pub(crate) intersection: usize,
    values: Vec<f32>,
}

impl ClipPlanes {
    pub(crate) fn uniform(&self) -> Option<UniformValue> {
        (self.count > 0).then(|| UniformValue::Vec4Array(self.values.clone()))
    }
}

/// Renderer-wide clipping configuration.
#[derive(Debug, Clone, Default)]
pub(crate) struct Clipping {
    pub(crate) global: Vec<Plane>,
    pub(crate) local_enabled: bool,
}

impl Clipping {
    /// Planes that apply to `material` seen through `view`. Shadow passes only clip
    /// with the material planes when it asks for it.
    pub(crate) fn planes(&self, material: &Material, view: &Mat4, shadow_pass: bool) -> ClipPlanes {
        let use_local = self.local_enabled
            && !material.clipping_planes.is_empty()
            && (!shadow_pass || material.clip_shadows);
        let global: &[Plane] = if shadow_pass && !use_local { &[] } else { &self.global };
        let local: &[Plane] = if use_local { &material.clipping_planes } else { &[] };

        let mut values = Vec::with_capacity((global.len() + local.len()) * 4);
        for plane in global.iter().chain(local) {
            values.extend_from_slice(&plane.transformed(view).to_vec4().to_array());
        }
        ClipPlanes {
            count: global.len() + local.len(),
            intersection: if use_local && material.clip_intersection {
                local.len()
            } else {
                0
            },
            values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn clipped_material() -> Material {
        let mut material = Material::basic(Vec3::ONE).with_clipping_planes(vec![
            Plane::new(Vec3::X, 0.0),
            Plane::new(Vec3::Y, 1.0),
        ]);
        material.clip_intersection = true;
        material
    }

    #[test]
    fn local_planes_need_local_clipping() {
        let clipping = Clipping {
            global: vec![Plane::new(Vec3::Z, 0.0)],
            local_enabled: false,
        };
        let planes = clipping.planes(&clipped_material(), &Mat4::IDENTITY, false);
        assert_eq!(planes.count, 1);
        assert_eq!(planes.intersection, 0);
    }

    #[test]
    fn material_planes_follow_global_ones() {
        let clipping = Clipping {
            global: vec![Plane::new(Vec3::Z, 0.0)],
            local_enabled: true,
        };
        let planes = clipping.planes(&clipped_material(), &Mat4::IDENTITY, false);
        assert_eq!(planes.count, 3);
        assert_eq!(planes.intersection, 2);
        let Some(UniformValue::Vec4Array(values)) = planes.uniform() else {
            panic!("expected a vec4 array");
        };
        assert_eq!(&values[..4], &[0.0, 0.0, 1.0, 0.0]);
        assert_eq!(&values[8..], &[0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn planes_move_into_view_space() {
        let clipping = Clipping {
            global: vec![Plane::new(Vec3::Y, 0.0)],
            local_enabled: false,
        };
        let view = Mat4::from_translation(Vec3::new(0.0, -2.0, 0.0));
        let planes = clipping.planes(&Material::basic(Vec3::ONE), &view, false);
        let Some(UniformValue::Vec4Array(values)) = planes.uniform() else {
            panic!("expected a vec4 array");
        };
        assert!((values[3] - 2.0).abs() < 1e-5);
    }

    #[test]
    fn shadow_pass_skips_planes_unless_requested() {
        let clipping = Clipping {
            global: vec![Plane::new(Vec3::Z, 0.0)],
            local_enabled: true,
        };
        let mut material = clipped_material();
        assert_eq!(clipping.planes(&material, &Mat4::IDENTITY, true).count, 0);
        material.clip_shadows = true;
        assert_eq!(clipping.planes(&material, &Mat4::IDENTITY, true).count, 3);
    }
}
