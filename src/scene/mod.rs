// scene/mod.rs

pub mod bounds;
pub mod camera;
pub mod components;
mod internal;
pub mod light;
pub mod scene;
pub mod transform;

// Re-export commonly used types
pub use bounds::{Box3, Frustum, Plane, Sphere};
pub use camera::{ArrayCamera, Camera, Projection};
pub use light::{Light, LightKind, LightShadow};
pub use scene::{Background, Fog, NodeView, Scene};
pub use transform::Transform;

// Re-export all components
pub use components::{
    Children, DrawMode, Drawable, GroupOrder, Instancing, Layers, LightComponent, MaterialSlot,
    Name, OrbitAnimation, Parent, RotateAnimation, Skeleton, TransformComponent, Visible,
    WorldTransform,
};
