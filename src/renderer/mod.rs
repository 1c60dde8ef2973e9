pub mod backend;
pub mod geometry;
pub mod info;
pub(crate) mod internal;
pub mod lights;
pub mod material;
pub mod pmrem;
pub mod primitives;
pub mod render_target;
#[allow(clippy::module_inception)]
pub mod renderer;
pub mod state;
pub mod texture;

pub use backend::{
    Backend, BufferUsage, Capabilities, GlowBackend, Rect, RecordingBackend, TexelFormat,
    TextureFilter, TextureWrap, UniformValue,
};
pub use geometry::{AttributeData, AttributeName, BufferAttribute, DrawRange, Geometry, GeometryGroup};
pub use info::RenderInfo;
pub use lights::LightCounts;
pub use material::{
    BasicMaterial, Blending, DepthPacking, LambertMaterial, MapSlot, Material, MaterialKind,
    PhongMaterial, PhysicalMaterial, PointsMaterial, ShaderMaterial, ShaderUniform, Side,
    StandardMaterial,
};
pub use pmrem::{Pmrem, PmremGenerator};
pub use primitives::{box_geometry, plane_geometry, sphere_geometry};
pub use render_target::RenderTarget;
pub use renderer::Renderer;
pub use state::StateCache;
pub use texture::{ColorSpace, Image, TargetAttachment, Texture, TextureMapping, TextureSource};
