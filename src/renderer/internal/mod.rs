pub(crate) mod background;
pub(crate) mod buffers;
pub(crate) mod clipping;
pub(crate) mod dispatch;
pub(crate) mod geometries;
pub(crate) mod parameters;
pub(crate) mod programs;
pub(crate) mod properties;
pub(crate) mod render_list;
pub(crate) mod shader_lib;
pub(crate) mod shadows;
pub(crate) mod textures;
pub(crate) mod uniforms;
