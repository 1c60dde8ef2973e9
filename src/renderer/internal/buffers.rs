use std::collections::HashMap;

use crate::error::RenderError;
use crate::renderer::backend::{Backend, BufferId, BufferTarget, DataType};
use crate::renderer::geometry::BufferAttribute;

/// Backend side of one [`BufferAttribute`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct GpuBuffer {
    pub(crate) buffer: BufferId,
    pub(crate) data_type: DataType,
    pub(crate) bytes_per_element: usize,
    pub(crate) byte_len: usize,
    pub(crate) version: u64,
}

/// Maps attribute ids to backend buffers and keeps them in sync with the attribute
/// version.
#[derive(Default)]
pub(crate) struct BufferManager {
    buffers: HashMap<u64, GpuBuffer>,
}

impl BufferManager {
    pub(crate) fn get(&self, attribute: u64) -> Option<&GpuBuffer> {
        self.buffers.get(&attribute)
    }

    pub(crate) fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Creates the buffer on first use and re-uploads when the attribute version
    /// moved past the uploaded one.
    pub(crate) fn upload(
        &mut self,
        backend: &mut dyn Backend,
        attribute: &BufferAttribute,
        target: BufferTarget,
    ) -> Result<GpuBuffer, RenderError> {
        let bytes = attribute.data.as_bytes();

        let Some(gpu) = self.buffers.get_mut(&attribute.id()) else {
            let buffer = backend.create_buffer()?;
            backend.bind_buffer(target, Some(buffer));
            backend.buffer_data(target, bytes, attribute.usage);
            log::debug!(
                "Uploaded buffer {:?}: {} bytes ({:?})",
                buffer,
                bytes.len(),
                attribute.data.data_type()
            );
            let gpu = GpuBuffer {
                buffer,
                data_type: attribute.data.data_type(),
                bytes_per_element: attribute.data.bytes_per_element(),
                byte_len: bytes.len(),
                version: attribute.version(),
            };
            self.buffers.insert(attribute.id(), gpu);
            return Ok(gpu);
        };

        if gpu.version >= attribute.version() {
            return Ok(*gpu);
        }

        backend.bind_buffer(target, Some(gpu.buffer));
        if bytes.len() != gpu.byte_len || attribute.data.data_type() != gpu.data_type {
            log::warn!(
                "Buffer {:?} changed size ({} -> {} bytes); reallocating",
                gpu.buffer,
                gpu.byte_len,
                bytes.len()
            );
            backend.buffer_data(target, bytes, attribute.usage);
            gpu.byte_len = bytes.len();
            gpu.data_type = attribute.data.data_type();
            gpu.bytes_per_element = attribute.data.bytes_per_element();
        } else if attribute.update_ranges.is_empty() {
            backend.buffer_sub_data(target, 0, bytes);
        } else {
            let element = gpu.bytes_per_element;
            for range in &attribute.update_ranges {
                let start = (range.start * element).min(bytes.len());
                let end = (range.end * element).min(bytes.len());
                if start < end {
                    backend.buffer_sub_data(target, start, &bytes[start..end]);
                }
            }
        }
        gpu.version = attribute.version();
        Ok(*gpu)
    }

    pub(crate) fn remove(&mut self, backend: &mut dyn Backend, attribute: u64) {
        if let Some(gpu) = self.buffers.remove(&attribute) {
            backend.delete_buffer(gpu.buffer);
        }
    }

    /// Forgets every buffer without touching the backend (context loss).
    pub(crate) fn forget_all(&mut self) {
        self.buffers.clear();
    }

    pub(crate) fn dispose_all(&mut self, backend: &mut dyn Backend) {
        for (_, gpu) in self.buffers.drain() {
            backend.delete_buffer(gpu.buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::{Call, RecordingBackend};

    #[test]
    fn uploads_once_per_version() {
        let mut backend = RecordingBackend::default();
        let mut buffers = BufferManager::default();
        let mut attribute = BufferAttribute::f32(vec![0.0; 9], 3);

        buffers.upload(&mut backend, &attribute, BufferTarget::Array).unwrap();
        buffers.upload(&mut backend, &attribute, BufferTarget::Array).unwrap();
        assert_eq!(backend.count(|c| matches!(c, Call::BufferData { .. })), 1);

        attribute.needs_update();
        buffers.upload(&mut backend, &attribute, BufferTarget::Array).unwrap();
        assert_eq!(backend.count(|c| matches!(c, Call::BufferSubData { len: 36, .. })), 1);
    }

    #[test]
    fn update_ranges_upload_partial_data() {
        let mut backend = RecordingBackend::default();
        let mut buffers = BufferManager::default();
        let mut attribute = BufferAttribute::f32(vec![0.0; 12], 3);
        buffers.upload(&mut backend, &attribute, BufferTarget::Array).unwrap();

        attribute.add_update_range(3, 3);
        attribute.needs_update();
        buffers.upload(&mut backend, &attribute, BufferTarget::Array).unwrap();
        assert!(backend.calls().contains(&Call::BufferSubData {
            target: BufferTarget::Array,
            offset: 12,
            len: 12,
        }));
    }

    #[test]
    fn size_change_reallocates() {
        let mut backend = RecordingBackend::default();
        let mut buffers = BufferManager::default();
        let mut attribute = BufferAttribute::f32(vec![0.0; 3], 3);
        buffers.upload(&mut backend, &attribute, BufferTarget::Array).unwrap();
        attribute.data = crate::renderer::geometry::AttributeData::F32(vec![0.0; 6]);
        attribute.needs_update();
        let gpu = buffers.upload(&mut backend, &attribute, BufferTarget::Array).unwrap();
        assert_eq!(gpu.byte_len, 24);
        assert_eq!(backend.count(|c| matches!(c, Call::BufferData { .. })), 2);
    }
}
