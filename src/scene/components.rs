// scene/components.rs
// Pure hecs components - no custom entity system

use crate::asset::Handle;
use crate::renderer::{AttributeData, BufferAttribute, Geometry, Material};
use crate::scene::light::Light;
use crate::scene::Transform;
use glam::{Mat4, Vec3};

// ============================================================================
// Core Rendering Components
// ============================================================================

/// Transform component (position, rotation, scale)
#[derive(Debug, Clone, Copy)]
pub struct TransformComponent(pub Transform);

/// World-space matrix (computed from hierarchy by `Scene::update_world_transforms`)
#[derive(Debug, Clone, Copy)]
pub struct WorldTransform(pub Mat4);

/// Visibility component. An invisible entity hides its whole subtree.
#[derive(Debug, Clone, Copy)]
pub struct Visible(pub bool);

impl Default for Visible {
    fn default() -> Self {
        Self(true)
    }
}

/// Bit mask of the layers an entity belongs to; a camera renders entities sharing at
/// least one layer with its own mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Layers(pub u32);

impl Default for Layers {
    fn default() -> Self {
        Self(1)
    }
}

impl Layers {
    pub const ALL: Layers = Layers(u32::MAX);

    pub fn only(layer: u32) -> Self {
        Self(1 << (layer & 31))
    }

    pub fn enable(&mut self, layer: u32) {
        self.0 |= 1 << (layer & 31);
    }

    pub fn disable(&mut self, layer: u32) {
        self.0 &= !(1 << (layer & 31));
    }

    pub fn test(&self, other: &Layers) -> bool {
        self.0 & other.0 != 0
    }
}

/// Sort priority shared by all drawables below a group entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupOrder(pub i32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DrawMode {
    #[default]
    Mesh,
    Line,
    LineStrip,
    LineLoop,
    Points,
    Sprite,
}

/// One material for the whole geometry, or one per geometry group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaterialSlot {
    Single(Handle<Material>),
    Multi(Vec<Handle<Material>>),
}

impl MaterialSlot {
    pub fn get(&self, index: usize) -> Option<Handle<Material>> {
        match self {
            MaterialSlot::Single(handle) => Some(*handle),
            MaterialSlot::Multi(handles) => handles.get(index).copied(),
        }
    }
}

/// Per-instance transforms (and optional colors) drawn with one instanced call.
#[derive(Debug, Clone)]
pub struct Instancing {
    pub matrices: BufferAttribute,
    pub colors: Option<BufferAttribute>,
    pub count: usize,
}

impl Instancing {
    pub fn new(matrices: &[Mat4]) -> Self {
        let data: Vec<f32> = matrices.iter().flat_map(|m| m.to_cols_array()).collect();
        Self {
            matrices: BufferAttribute::f32(data, 16)
                .with_usage(crate::renderer::BufferUsage::DynamicDraw),
            colors: None,
            count: matrices.len(),
        }
    }

    pub fn with_colors(mut self, colors: &[Vec3]) -> Self {
        self.colors = Some(BufferAttribute::from_vec3s(colors));
        self
    }

    pub fn matrix(&self, index: usize) -> Option<Mat4> {
        let AttributeData::F32(values) = &self.matrices.data else {
            return None;
        };
        let start = index * 16;
        let slice = values.get(start..start + 16)?;
        Some(Mat4::from_cols_slice(slice))
    }

    pub fn set_matrix(&mut self, index: usize, matrix: Mat4) {
        if index >= self.count {
            log::warn!("Instance index {} out of range ({})", index, self.count);
            return;
        }
        for (i, value) in matrix.to_cols_array().into_iter().enumerate() {
            self.matrices.set_f32(index * 16 + i, value);
        }
        self.matrices.needs_update();
    }
}

#[derive(Debug, Clone, Default)]
pub struct Skeleton {
    /// Bone world matrices multiplied by their inverse bind matrices.
    pub bone_matrices: Vec<Mat4>,
}

/// Something the renderer draws: geometry, material(s) and per-object draw flags.
#[derive(Debug, Clone)]
pub struct Drawable {
    pub geometry: Handle<Geometry>,
    pub material: MaterialSlot,
    pub mode: DrawMode,
    pub render_order: i32,
    pub frustum_culled: bool,
    pub cast_shadow: bool,
    pub receive_shadow: bool,
    pub instancing: Option<Instancing>,
    pub skeleton: Option<Skeleton>,
    pub morph_influences: Vec<f32>,
}

impl Drawable {
    pub fn mesh(geometry: Handle<Geometry>, material: Handle<Material>) -> Self {
        Self::with_slot(geometry, MaterialSlot::Single(material))
    }

    /// One material per geometry group.
    pub fn multi(geometry: Handle<Geometry>, materials: Vec<Handle<Material>>) -> Self {
        Self::with_slot(geometry, MaterialSlot::Multi(materials))
    }

    fn with_slot(geometry: Handle<Geometry>, material: MaterialSlot) -> Self {
        Self {
            geometry,
            material,
            mode: DrawMode::Mesh,
            render_order: 0,
            frustum_culled: true,
            cast_shadow: false,
            receive_shadow: false,
            instancing: None,
            skeleton: None,
            morph_influences: Vec::new(),
        }
    }

    pub fn with_mode(mut self, mode: DrawMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_render_order(mut self, order: i32) -> Self {
        self.render_order = order;
        self
    }

    pub fn casting_shadow(mut self) -> Self {
        self.cast_shadow = true;
        self
    }

    pub fn receiving_shadow(mut self) -> Self {
        self.receive_shadow = true;
        self
    }

    pub fn without_culling(mut self) -> Self {
        self.frustum_culled = false;
        self
    }

    pub fn with_instancing(mut self, instancing: Instancing) -> Self {
        self.instancing = Some(instancing);
        self
    }

    pub fn with_skeleton(mut self, skeleton: Skeleton) -> Self {
        self.skeleton = Some(skeleton);
        self
    }

    pub fn with_morph_influences(mut self, influences: Vec<f32>) -> Self {
        self.morph_influences = influences;
        self
    }
}

// ============================================================================
// Lighting Components
// ============================================================================

/// A light placed by the entity's world transform.
#[derive(Debug, Clone, Copy)]
pub struct LightComponent(pub Light);

// ============================================================================
// Utility Components
// ============================================================================

/// Name component for debugging
#[derive(Debug, Clone)]
pub struct Name(pub String);

impl Name {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

// ============================================================================
// Animation Components
// ============================================================================

/// Rotation animation component
#[derive(Debug, Clone, Copy)]
pub struct RotateAnimation {
    pub axis: Vec3,
    pub speed: f32,
}

/// Orbit animation component
#[derive(Debug, Clone, Copy)]
pub struct OrbitAnimation {
    pub center: Vec3,
    pub radius: f32,
    pub speed: f32,
    pub offset: f32,
}

// ============================================================================
// Hierarchy Components
// ============================================================================

/// Parent entity reference
#[derive(Debug, Clone, Copy)]
pub struct Parent(pub hecs::Entity);

/// List of children entities
#[derive(Debug, Clone)]
pub struct Children(pub Vec<hecs::Entity>);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layers_share_bits() {
        let mut a = Layers::default();
        let b = Layers::only(3);
        assert!(!a.test(&b));
        a.enable(3);
        assert!(a.test(&b));
        a.disable(3);
        a.disable(0);
        assert!(!a.test(&Layers::ALL));
    }

    #[test]
    fn instance_matrices_round_trip_and_bump_version() {
        let mut instancing = Instancing::new(&[Mat4::IDENTITY, Mat4::IDENTITY]);
        let moved = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let before = instancing.matrices.version();
        instancing.set_matrix(1, moved);
        assert_eq!(instancing.matrix(1), Some(moved));
        assert_eq!(instancing.matrices.version(), before + 1);
    }
}
