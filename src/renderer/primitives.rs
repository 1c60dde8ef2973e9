use super::geometry::{AttributeData, AttributeName, BufferAttribute, Geometry};
use glam::Vec3;
use std::f32::consts::PI;

fn indexed(
    name: &str,
    positions: Vec<f32>,
    normals: Vec<f32>,
    uvs: Vec<f32>,
    indices: Vec<u32>,
) -> Geometry {
    let vertex_count = positions.len() / 3;
    let index = if vertex_count <= u16::MAX as usize {
        AttributeData::U16(indices.into_iter().map(|i| i as u16).collect())
    } else {
        AttributeData::U32(indices)
    };
    Geometry::new()
        .with_name(name)
        .with_attribute(AttributeName::Position, BufferAttribute::f32(positions, 3))
        .with_attribute(AttributeName::Normal, BufferAttribute::f32(normals, 3))
        .with_attribute(AttributeName::Uv, BufferAttribute::f32(uvs, 2))
        .with_index(BufferAttribute::new(index, 1))
}

/// UV sphere centered at the origin, counter-clockwise when seen from outside.
pub fn sphere_geometry(radius: f32, segments: u32, rings: u32) -> Geometry {
    let segments = segments.max(3);
    let rings = rings.max(2);
    let mut positions = Vec::new();
    let mut normals = Vec::new();
    let mut uvs = Vec::new();
    let mut tangents = Vec::new();
    let mut indices = Vec::new();

    for ring in 0..=rings {
        let phi = PI * ring as f32 / rings as f32;
        let y = phi.cos();
        let ring_radius = phi.sin();

        for segment in 0..=segments {
            let theta = 2.0 * PI * segment as f32 / segments as f32;
            let normal = Vec3::new(ring_radius * theta.cos(), y, ring_radius * theta.sin());

            positions.extend_from_slice(&(normal * radius).to_array());
            normals.extend_from_slice(&normal.to_array());
            uvs.extend_from_slice(&[segment as f32 / segments as f32, 1.0 - ring as f32 / rings as f32]);
            // Tangent points in the direction of increasing theta (around the sphere)
            tangents.extend_from_slice(&[-theta.sin(), 0.0, theta.cos(), 1.0]);
        }
    }

    for ring in 0..rings {
        for segment in 0..segments {
            let current = ring * (segments + 1) + segment;
            let next = current + segments + 1;

            indices.extend_from_slice(&[current, current + 1, next]);
            indices.extend_from_slice(&[current + 1, next + 1, next]);
        }
    }

    let mut geometry = indexed("sphere", positions, normals, uvs, indices);
    geometry.set_attribute(AttributeName::Tangent, BufferAttribute::f32(tangents, 4));
    geometry
}

/// Plane in the XY plane facing +Z.
pub fn plane_geometry(width: f32, height: f32, width_segments: u32, height_segments: u32) -> Geometry {
    let gx = width_segments.max(1);
    let gy = height_segments.max(1);
    let mut positions = Vec::new();
    let mut normals = Vec::new();
    let mut uvs = Vec::new();
    let mut indices = Vec::new();

    for iy in 0..=gy {
        let v = iy as f32 / gy as f32;
        for ix in 0..=gx {
            let u = ix as f32 / gx as f32;
            positions.extend_from_slice(&[(u - 0.5) * width, (v - 0.5) * height, 0.0]);
            normals.extend_from_slice(&[0.0, 0.0, 1.0]);
            uvs.extend_from_slice(&[u, v]);
        }
    }

    for iy in 0..gy {
        for ix in 0..gx {
            let a = iy * (gx + 1) + ix;
            let b = a + 1;
            let c = a + gx + 1;
            let d = c + 1;
            indices.extend_from_slice(&[a, b, d, a, d, c]);
        }
    }

    indexed("plane", positions, normals, uvs, indices)
}

/// Axis-aligned box with one geometry group per face (+X, -X, +Y, -Y, +Z, -Z).
pub fn box_geometry(width: f32, height: f32, depth: f32) -> Geometry {
    let dims = Vec3::new(width, height, depth);
    // (normal, u axis, v axis) with u x v == normal
    let faces = [
        (Vec3::X, Vec3::NEG_Z, Vec3::Y),
        (Vec3::NEG_X, Vec3::Z, Vec3::Y),
        (Vec3::Y, Vec3::X, Vec3::NEG_Z),
        (Vec3::NEG_Y, Vec3::X, Vec3::Z),
        (Vec3::Z, Vec3::X, Vec3::Y),
        (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
    ];

    let mut positions = Vec::new();
    let mut normals = Vec::new();
    let mut uvs = Vec::new();
    let mut indices = Vec::new();

    for (face, (normal, u_axis, v_axis)) in faces.iter().enumerate() {
        let half_n = normal.abs().dot(dims) * 0.5;
        let half_u = u_axis.abs().dot(dims) * 0.5;
        let half_v = v_axis.abs().dot(dims) * 0.5;
        for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let p = *normal * half_n + *u_axis * (su * half_u) + *v_axis * (sv * half_v);
            positions.extend_from_slice(&p.to_array());
            normals.extend_from_slice(&normal.to_array());
            uvs.extend_from_slice(&[(su + 1.0) * 0.5, (sv + 1.0) * 0.5]);
        }
        let o = face as u32 * 4;
        indices.extend_from_slice(&[o, o + 1, o + 2, o, o + 2, o + 3]);
    }

    let mut geometry = indexed("box", positions, normals, uvs, indices);
    for face in 0..6 {
        geometry.add_group(face * 6, 6, face);
    }
    geometry
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle_normal(geometry: &Geometry, tri: usize) -> (Vec3, Vec3) {
        let index = geometry.index().unwrap();
        let position = geometry.attribute(&AttributeName::Position).unwrap();
        let normal = geometry.attribute(&AttributeName::Normal).unwrap();
        let ids: Vec<usize> = (0..3)
            .map(|k| index.data.get_index(tri * 3 + k).unwrap() as usize)
            .collect();
        let p: Vec<Vec3> = ids.iter().map(|&i| position.get_vec3(i).unwrap()).collect();
        let face = (p[1] - p[0]).cross(p[2] - p[0]);
        (face, normal.get_vec3(ids[0]).unwrap())
    }

    #[test]
    fn cube_counts_look_right() {
        let geometry = box_geometry(1.0, 1.0, 1.0);
        assert_eq!(geometry.attribute(&AttributeName::Position).unwrap().count(), 24);
        assert_eq!(geometry.element_count(), 36);
        assert_eq!(geometry.groups.len(), 6);
    }

    #[test]
    fn box_faces_wind_counter_clockwise() {
        let geometry = box_geometry(2.0, 1.0, 3.0);
        for tri in 0..12 {
            let (face, normal) = triangle_normal(&geometry, tri);
            assert!(face.dot(normal) > 0.0, "triangle {} faces inward", tri);
        }
    }

    #[test]
    fn sphere_faces_outward_and_bounds() {
        let geometry = sphere_geometry(2.0, 16, 8);
        // skip the degenerate pole triangles of the first ring
        let (face, normal) = triangle_normal(&geometry, 16 * 2 * 3 + 1);
        assert!(face.dot(normal) > 0.0);
        assert!((geometry.bounding_sphere().radius - 2.0).abs() < 1e-4);
    }

    #[test]
    fn plane_faces_plus_z() {
        let geometry = plane_geometry(4.0, 4.0, 2, 2);
        assert_eq!(geometry.element_count(), 24);
        let (face, _) = triangle_normal(&geometry, 0);
        assert!(face.z > 0.0);
    }
}
