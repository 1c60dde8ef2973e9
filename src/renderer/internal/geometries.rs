use std::collections::HashMap;

use crate::error::RenderError;
use crate::renderer::backend::{Backend, BufferTarget, IndexType};
use crate::renderer::geometry::{AttributeData, BufferAttribute, Geometry};
use crate::scene::Instancing;

use super::buffers::{BufferManager, GpuBuffer};

struct WireframeIndex {
    geometry_version: u64,
    attribute: BufferAttribute,
}

#[derive(Default)]
struct GeometryRecord {
    attributes: Vec<u64>,
    updated_frame: Option<u64>,
    wireframe: Option<WireframeIndex>,
}

/// Uploads geometry attributes at most once per frame and owns the derived wireframe
/// index buffers.
#[derive(Default)]
pub(crate) struct GeometryManager {
    pub(crate) buffers: BufferManager,
    geometries: HashMap<u64, GeometryRecord>,
    // per-object instancing attributes, keyed by attribute id
    instanced: Vec<u64>,
}

impl GeometryManager {
    pub(crate) fn len(&self) -> usize {
        self.geometries.len()
    }

    pub(crate) fn update(
        &mut self,
        backend: &mut dyn Backend,
        geometry: &Geometry,
        frame: u64,
    ) -> Result<(), RenderError> {
        let record = self.geometries.entry(geometry.id()).or_default();
        if record.updated_frame == Some(frame) {
            return Ok(());
        }
        geometry.validate()?;

        let mut live = Vec::new();
        for (_, attribute) in geometry.attributes() {
            self.buffers.upload(backend, attribute, BufferTarget::Array)?;
            live.push(attribute.id());
        }
        for attribute in geometry.morph_positions().iter().chain(geometry.morph_normals()) {
            attribute.validate()?;
            self.buffers.upload(backend, attribute, BufferTarget::Array)?;
            live.push(attribute.id());
        }
        if let Some(index) = geometry.index() {
            self.buffers.upload(backend, index, BufferTarget::ElementArray)?;
            live.push(index.id());
        }

        for stale in record.attributes.iter().filter(|id| !live.contains(id)) {
            self.buffers.remove(backend, *stale);
        }
        record.attributes = live;
        record.updated_frame = Some(frame);
        Ok(())
    }

    pub(crate) fn update_instancing(
        &mut self,
        backend: &mut dyn Backend,
        instancing: &Instancing,
    ) -> Result<(), RenderError> {
        for attribute in std::iter::once(&instancing.matrices).chain(instancing.colors.as_ref()) {
            attribute.validate()?;
            self.buffers.upload(backend, attribute, BufferTarget::Array)?;
            if !self.instanced.contains(&attribute.id()) {
                self.instanced.push(attribute.id());
            }
        }
        Ok(())
    }

    /// Line-list index covering every triangle edge, rebuilt when the geometry
    /// version changes.
    pub(crate) fn wireframe_index(
        &mut self,
        backend: &mut dyn Backend,
        geometry: &Geometry,
    ) -> Result<(GpuBuffer, IndexType, usize), RenderError> {
        let record = self.geometries.entry(geometry.id()).or_default();
        let stale = record
            .wireframe
            .as_ref()
            .map_or(true, |w| w.geometry_version != geometry.version());
        if stale {
            if let Some(old) = record.wireframe.take() {
                self.buffers.remove(backend, old.attribute.id());
            }
            record.wireframe = Some(WireframeIndex {
                geometry_version: geometry.version(),
                attribute: build_wireframe(geometry),
            });
        }
        let Some(wireframe) = record.wireframe.as_ref() else {
            return Err(RenderError::resource("wireframe index missing"));
        };
        let gpu = self
            .buffers
            .upload(backend, &wireframe.attribute, BufferTarget::ElementArray)?;
        let index_type = wireframe.attribute.index_type().unwrap_or(IndexType::U32);
        Ok((gpu, index_type, wireframe.attribute.data.len()))
    }

    pub(crate) fn dispose(&mut self, backend: &mut dyn Backend, geometry: u64) {
        let Some(record) = self.geometries.remove(&geometry) else {
            return;
        };
        for id in record.attributes {
            self.buffers.remove(backend, id);
        }
        if let Some(wireframe) = record.wireframe {
            self.buffers.remove(backend, wireframe.attribute.id());
        }
        log::debug!("Disposed geometry {}", geometry);
    }

    pub(crate) fn dispose_instancing(&mut self, backend: &mut dyn Backend, instancing: &Instancing) {
        for attribute in std::iter::once(&instancing.matrices).chain(instancing.colors.as_ref()) {
            self.buffers.remove(backend, attribute.id());
            self.instanced.retain(|id| *id != attribute.id());
        }
    }

    pub(crate) fn forget_all(&mut self) {
        self.buffers.forget_all();
        self.geometries.clear();
        self.instanced.clear();
    }

    pub(crate) fn dispose_all(&mut self, backend: &mut dyn Backend) {
        self.buffers.dispose_all(backend);
        self.geometries.clear();
        self.instanced.clear();
    }
}

fn build_wireframe(geometry: &Geometry) -> BufferAttribute {
    let mut lines: Vec<u32> = Vec::new();
    let mut push_triangle = |a: u32, b: u32, c: u32| {
        lines.extend_from_slice(&[a, b, b, c, c, a]);
    };
    match geometry.index() {
        Some(index) => {
            for tri in 0..index.data.len() / 3 {
                let fetch = |k: usize| index.data.get_index(tri * 3 + k).unwrap_or(0);
                push_triangle(fetch(0), fetch(1), fetch(2));
            }
        }
        None => {
            let count = geometry.element_count() as u32;
            for base in (0..count.saturating_sub(2)).step_by(3) {
                push_triangle(base, base + 1, base + 2);
            }
        }
    }
    let max = lines.iter().copied().max().unwrap_or(0);
    let data = if max <= u16::MAX as u32 {
        AttributeData::U16(lines.into_iter().map(|i| i as u16).collect())
    } else {
        AttributeData::U32(lines)
    };
    BufferAttribute::new(data, 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::{Call, RecordingBackend};
    use crate::renderer::primitives::plane_geometry;

    #[test]
    fn updates_once_per_frame() {
        let mut backend = RecordingBackend::default();
        let mut geometries = GeometryManager::default();
        let mut geometry = plane_geometry(1.0, 1.0, 1, 1);

        geometries.update(&mut backend, &geometry, 1).unwrap();
        let uploads = backend.count(|c| matches!(c, Call::BufferData { .. }));
        assert_eq!(uploads, 4);

        geometry
            .attribute_mut(&crate::renderer::AttributeName::Position)
            .unwrap()
            .needs_update();
        geometries.update(&mut backend, &geometry, 1).unwrap();
        assert_eq!(backend.count(|c| matches!(c, Call::BufferSubData { .. })), 0);
        geometries.update(&mut backend, &geometry, 2).unwrap();
        assert_eq!(backend.count(|c| matches!(c, Call::BufferSubData { .. })), 1);
    }

    #[test]
    fn wireframe_covers_each_edge() {
        let mut backend = RecordingBackend::default();
        let mut geometries = GeometryManager::default();
        let geometry = plane_geometry(1.0, 1.0, 1, 1);
        let (_, index_type, count) = geometries.wireframe_index(&mut backend, &geometry).unwrap();
        assert_eq!(index_type, IndexType::U16);
        assert_eq!(count, 12);
        geometries.wireframe_index(&mut backend, &geometry).unwrap();
        assert_eq!(backend.count(|c| matches!(c, Call::CreateBuffer(_))), 1);
    }

    #[test]
    fn dispose_deletes_buffers() {
        let mut backend = RecordingBackend::default();
        let mut geometries = GeometryManager::default();
        let geometry = plane_geometry(1.0, 1.0, 1, 1);
        geometries.update(&mut backend, &geometry, 1).unwrap();
        assert_eq!(backend.live_buffer_count(), 4);
        geometries.dispose(&mut backend, geometry.id());
        assert_eq!(backend.live_buffer_count(), 0);
        assert_eq!(geometries.len(), 0);
    }
}
