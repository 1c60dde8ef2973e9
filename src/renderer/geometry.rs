use std::collections::BTreeMap;
use std::ops::Range;

use glam::Vec3;
use half::f16;

use crate::asset::next_resource_id;
use crate::error::RenderError;
use crate::renderer::backend::{BufferUsage, DataType, IndexType};
use crate::scene::bounds::Sphere;

/// Typed element storage of a [`BufferAttribute`].
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeData {
    F32(Vec<f32>),
    F16(Vec<f16>),
    U32(Vec<u32>),
    I32(Vec<i32>),
    U16(Vec<u16>),
    I16(Vec<i16>),
    U8(Vec<u8>),
    I8(Vec<i8>),
}

impl AttributeData {
    pub fn len(&self) -> usize {
        match self {
            AttributeData::F32(v) => v.len(),
            AttributeData::F16(v) => v.len(),
            AttributeData::U32(v) => v.len(),
            AttributeData::I32(v) => v.len(),
            AttributeData::U16(v) => v.len(),
            AttributeData::I16(v) => v.len(),
            AttributeData::U8(v) => v.len(),
            AttributeData::I8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element type declared to the backend.
    pub fn data_type(&self) -> DataType {
        match self {
            AttributeData::F32(_) => DataType::Float,
            AttributeData::F16(_) => DataType::HalfFloat,
            AttributeData::U32(_) => DataType::UnsignedInt,
            AttributeData::I32(_) => DataType::Int,
            AttributeData::U16(_) => DataType::UnsignedShort,
            AttributeData::I16(_) => DataType::Short,
            AttributeData::U8(_) => DataType::UnsignedByte,
            AttributeData::I8(_) => DataType::Byte,
        }
    }

    pub fn bytes_per_element(&self) -> usize {
        self.data_type().size()
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            AttributeData::F32(v) => bytemuck::cast_slice(v),
            AttributeData::F16(v) => bytemuck::cast_slice(v),
            AttributeData::U32(v) => bytemuck::cast_slice(v),
            AttributeData::I32(v) => bytemuck::cast_slice(v),
            AttributeData::U16(v) => bytemuck::cast_slice(v),
            AttributeData::I16(v) => bytemuck::cast_slice(v),
            AttributeData::U8(v) => v.as_slice(),
            AttributeData::I8(v) => bytemuck::cast_slice(v),
        }
    }

    /// Element `index` widened to `f32`.
    pub fn get_f32(&self, index: usize) -> Option<f32> {
        Some(match self {
            AttributeData::F32(v) => *v.get(index)?,
            AttributeData::F16(v) => v.get(index)?.to_f32(),
            AttributeData::U32(v) => *v.get(index)? as f32,
            AttributeData::I32(v) => *v.get(index)? as f32,
            AttributeData::U16(v) => *v.get(index)? as f32,
            AttributeData::I16(v) => *v.get(index)? as f32,
            AttributeData::U8(v) => *v.get(index)? as f32,
            AttributeData::I8(v) => *v.get(index)? as f32,
        })
    }

    /// Element `index` read as an unsigned vertex index.
    pub fn get_index(&self, index: usize) -> Option<u32> {
        Some(match self {
            AttributeData::U32(v) => *v.get(index)?,
            AttributeData::U16(v) => *v.get(index)? as u32,
            AttributeData::U8(v) => *v.get(index)? as u32,
            other => other.get_f32(index)? as u32,
        })
    }
}

/// Typed vertex (or index) data plus the metadata the backend needs to read it.
#[derive(Debug)]
pub struct BufferAttribute {
    id: u64,
    pub data: AttributeData,
    pub item_size: usize,
    pub normalized: bool,
    pub usage: BufferUsage,
    /// Element ranges uploaded with sub-data calls on the next version bump instead of
    /// the whole buffer.
    pub update_ranges: Vec<Range<usize>>,
    version: u64,
}

impl Clone for BufferAttribute {
    fn clone(&self) -> Self {
        Self {
            id: next_resource_id(),
            data: self.data.clone(),
            item_size: self.item_size,
            normalized: self.normalized,
            usage: self.usage,
            update_ranges: self.update_ranges.clone(),
            version: self.version,
        }
    }
}

impl BufferAttribute {
    pub fn new(data: AttributeData, item_size: usize) -> Self {
        Self {
            id: next_resource_id(),
            data,
            item_size,
            normalized: false,
            usage: BufferUsage::StaticDraw,
            update_ranges: Vec::new(),
            version: 0,
        }
    }

    pub fn f32(data: Vec<f32>, item_size: usize) -> Self {
        Self::new(AttributeData::F32(data), item_size)
    }

    pub fn from_vec3s(values: &[Vec3]) -> Self {
        Self::f32(values.iter().flat_map(|v| v.to_array()).collect(), 3)
    }

    pub fn normalized(mut self) -> Self {
        self.normalized = true;
        self
    }

    pub fn with_usage(mut self, usage: BufferUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Marks the data as changed; the next frame re-uploads it.
    pub fn needs_update(&mut self) {
        self.version += 1;
    }

    pub fn add_update_range(&mut self, start: usize, count: usize) {
        self.update_ranges.push(start..start + count);
    }

    pub fn clear_update_ranges(&mut self) {
        self.update_ranges.clear();
    }

    /// Number of items (vertices) in the attribute.
    pub fn count(&self) -> usize {
        if self.item_size == 0 {
            0
        } else {
            self.data.len() / self.item_size
        }
    }

    pub fn get(&self, item: usize, component: usize) -> Option<f32> {
        if component >= self.item_size {
            return None;
        }
        self.data.get_f32(item * self.item_size + component)
    }

    pub fn get_vec3(&self, item: usize) -> Option<Vec3> {
        Some(Vec3::new(
            self.get(item, 0)?,
            self.get(item, 1).unwrap_or(0.0),
            self.get(item, 2).unwrap_or(0.0),
        ))
    }

    pub fn set_f32(&mut self, index: usize, value: f32) {
        if let AttributeData::F32(values) = &mut self.data {
            if let Some(slot) = values.get_mut(index) {
                *slot = value;
            }
        }
    }

    pub fn validate(&self) -> Result<(), RenderError> {
        if self.item_size == 0 || self.item_size > 16 {
            return Err(RenderError::resource(format!(
                "attribute item size {} is out of range",
                self.item_size
            )));
        }
        if self.data.len() % self.item_size != 0 {
            return Err(RenderError::resource(format!(
                "attribute length {} is not a multiple of item size {}",
                self.data.len(),
                self.item_size
            )));
        }
        Ok(())
    }

    /// Index element type, for attributes used as an index buffer.
    pub fn index_type(&self) -> Option<IndexType> {
        match self.data {
            AttributeData::U8(_) => Some(IndexType::U8),
            AttributeData::U16(_) => Some(IndexType::U16),
            AttributeData::U32(_) => Some(IndexType::U32),
            _ => None,
        }
    }
}

/// Well-known vertex inputs map to the shader attribute names used by the built-in
/// programs; anything else is passed through under its own name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttributeName {
    Position,
    Normal,
    Uv,
    Uv1,
    Color,
    Tangent,
    SkinIndex,
    SkinWeight,
    Custom(String),
}

impl AttributeName {
    pub fn glsl_name(&self) -> &str {
        match self {
            AttributeName::Position => "position",
            AttributeName::Normal => "normal",
            AttributeName::Uv => "uv",
            AttributeName::Uv1 => "uv1",
            AttributeName::Color => "color",
            AttributeName::Tangent => "tangent",
            AttributeName::SkinIndex => "skinIndex",
            AttributeName::SkinWeight => "skinWeight",
            AttributeName::Custom(name) => name,
        }
    }

    pub fn from_glsl(name: &str) -> Self {
        match name {
            "position" => AttributeName::Position,
            "normal" => AttributeName::Normal,
            "uv" => AttributeName::Uv,
            "uv1" => AttributeName::Uv1,
            "color" => AttributeName::Color,
            "tangent" => AttributeName::Tangent,
            "skinIndex" => AttributeName::SkinIndex,
            "skinWeight" => AttributeName::SkinWeight,
            other => AttributeName::Custom(other.to_string()),
        }
    }
}

/// A sub-range of the index (or vertex) stream drawn with its own material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryGroup {
    pub start: usize,
    pub count: usize,
    pub material_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawRange {
    pub start: usize,
    /// `None` draws to the end of the stream.
    pub count: Option<usize>,
}

impl Default for DrawRange {
    fn default() -> Self {
        Self {
            start: 0,
            count: None,
        }
    }
}

#[derive(Debug)]
pub struct Geometry {
    id: u64,
    pub name: String,
    attributes: BTreeMap<AttributeName, BufferAttribute>,
    index: Option<BufferAttribute>,
    pub groups: Vec<GeometryGroup>,
    pub draw_range: DrawRange,
    morph_positions: Vec<BufferAttribute>,
    morph_normals: Vec<BufferAttribute>,
    bounding_sphere: Sphere,
    version: u64,
}

impl Clone for Geometry {
    fn clone(&self) -> Self {
        Self {
            id: next_resource_id(),
            name: self.name.clone(),
            attributes: self.attributes.clone(),
            index: self.index.clone(),
            groups: self.groups.clone(),
            draw_range: self.draw_range,
            morph_positions: self.morph_positions.clone(),
            morph_normals: self.morph_normals.clone(),
            bounding_sphere: self.bounding_sphere,
            version: self.version,
        }
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self::new()
    }
}

impl Geometry {
    pub fn new() -> Self {
        Self {
            id: next_resource_id(),
            name: String::new(),
            attributes: BTreeMap::new(),
            index: None,
            groups: Vec::new(),
            draw_range: DrawRange::default(),
            morph_positions: Vec::new(),
            morph_normals: Vec::new(),
            bounding_sphere: Sphere::default(),
            version: 0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Marks the geometry layout as changed (attributes added or removed, groups edited).
    pub fn needs_update(&mut self) {
        self.version += 1;
        self.compute_bounding_sphere();
    }

    pub fn set_attribute(&mut self, name: AttributeName, attribute: BufferAttribute) {
        let recompute = name == AttributeName::Position;
        self.attributes.insert(name, attribute);
        self.version += 1;
        if recompute {
            self.compute_bounding_sphere();
        }
    }

    pub fn with_attribute(mut self, name: AttributeName, attribute: BufferAttribute) -> Self {
        self.set_attribute(name, attribute);
        self
    }

    pub fn remove_attribute(&mut self, name: &AttributeName) -> Option<BufferAttribute> {
        let removed = self.attributes.remove(name);
        if removed.is_some() {
            self.version += 1;
        }
        removed
    }

    pub fn attribute(&self, name: &AttributeName) -> Option<&BufferAttribute> {
        self.attributes.get(name)
    }

    pub fn attribute_mut(&mut self, name: &AttributeName) -> Option<&mut BufferAttribute> {
        self.attributes.get_mut(name)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&AttributeName, &BufferAttribute)> {
        self.attributes.iter()
    }

    pub fn has_attribute(&self, name: &AttributeName) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn set_index(&mut self, index: BufferAttribute) {
        self.index = Some(index);
        self.version += 1;
    }

    pub fn with_index(mut self, index: BufferAttribute) -> Self {
        self.set_index(index);
        self
    }

    pub fn index(&self) -> Option<&BufferAttribute> {
        self.index.as_ref()
    }

    pub fn index_mut(&mut self) -> Option<&mut BufferAttribute> {
        self.index.as_mut()
    }

    pub fn add_group(&mut self, start: usize, count: usize, material_index: usize) {
        self.groups.push(GeometryGroup {
            start,
            count,
            material_index,
        });
        self.version += 1;
    }

    pub fn set_draw_range(&mut self, start: usize, count: Option<usize>) {
        self.draw_range = DrawRange { start, count };
    }

    pub fn add_morph_target(&mut self, positions: BufferAttribute, normals: Option<BufferAttribute>) {
        self.morph_positions.push(positions);
        if let Some(normals) = normals {
            self.morph_normals.push(normals);
        }
        self.version += 1;
    }

    pub fn morph_positions(&self) -> &[BufferAttribute] {
        &self.morph_positions
    }

    pub fn morph_normals(&self) -> &[BufferAttribute] {
        &self.morph_normals
    }

    /// Number of vertices (or indices when indexed) in the full stream.
    pub fn element_count(&self) -> usize {
        match &self.index {
            Some(index) => index.data.len(),
            None => self
                .attributes
                .get(&AttributeName::Position)
                .map(BufferAttribute::count)
                .unwrap_or(0),
        }
    }

    pub fn bounding_sphere(&self) -> Sphere {
        self.bounding_sphere
    }

    pub fn compute_bounding_sphere(&mut self) {
        let Some(position) = self.attributes.get(&AttributeName::Position) else {
            self.bounding_sphere = Sphere::default();
            return;
        };
        let points: Vec<Vec3> = (0..position.count())
            .filter_map(|i| position.get_vec3(i))
            .collect();
        let mut sphere = Sphere::from_points(&points);
        // Morph targets may move vertices outside the base shape.
        for target in &self.morph_positions {
            let moved: Vec<Vec3> = (0..target.count()).filter_map(|i| target.get_vec3(i)).collect();
            sphere = sphere.union(&Sphere::from_points(&moved));
        }
        if sphere.radius.is_nan() {
            log::error!(
                "Geometry '{}' has NaN positions; bounding sphere is invalid",
                self.name
            );
        }
        self.bounding_sphere = sphere;
    }

    /// Checks every attribute against its declared item size.
    pub fn validate(&self) -> Result<(), RenderError> {
        for (name, attribute) in &self.attributes {
            attribute.validate().map_err(|err| {
                RenderError::resource(format!("attribute '{}': {}", name.glsl_name(), err))
            })?;
        }
        if let Some(index) = &self.index {
            if index.index_type().is_none() {
                return Err(RenderError::resource(
                    "index attribute must hold u8, u16 or u32 data",
                ));
            }
        }
        if !self.attributes.contains_key(&AttributeName::Position) {
            return Err(RenderError::resource("geometry has no position attribute"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_type_follows_element_type() {
        assert_eq!(AttributeData::F32(vec![]).data_type(), DataType::Float);
        assert_eq!(
            AttributeData::F16(vec![f16::from_f32(1.0)]).data_type(),
            DataType::HalfFloat
        );
        assert_eq!(AttributeData::U16(vec![1]).data_type(), DataType::UnsignedShort);
        assert_eq!(AttributeData::I8(vec![1]).data_type(), DataType::Byte);
    }

    #[test]
    fn item_size_must_divide_length() {
        let attribute = BufferAttribute::f32(vec![0.0; 7], 3);
        assert!(attribute.validate().is_err());
        let attribute = BufferAttribute::f32(vec![0.0; 9], 3);
        assert!(attribute.validate().is_ok());
        assert_eq!(attribute.count(), 3);
    }

    #[test]
    fn clone_gets_fresh_id() {
        let attribute = BufferAttribute::f32(vec![0.0; 3], 3);
        let copy = attribute.clone();
        assert_ne!(attribute.id(), copy.id());
        assert_eq!(attribute.version(), copy.version());
    }

    #[test]
    fn position_updates_bounding_sphere() {
        let geometry = Geometry::new().with_attribute(
            AttributeName::Position,
            BufferAttribute::from_vec3s(&[Vec3::new(-2.0, 0.0, 0.0), Vec3::new(2.0, 0.0, 0.0)]),
        );
        let sphere = geometry.bounding_sphere();
        assert!(sphere.center.abs_diff_eq(Vec3::ZERO, 1e-6));
        assert!((sphere.radius - 2.0).abs() < 1e-6);
    }

    #[test]
    fn geometry_without_position_is_rejected() {
        let geometry = Geometry::new()
            .with_attribute(AttributeName::Normal, BufferAttribute::f32(vec![0.0; 3], 3));
        assert!(geometry.validate().is_err());
    }
}
