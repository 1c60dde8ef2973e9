//! The stateful GL-style API the renderer drives.
//!
//! Object handles are small integer newtypes so the renderer core never touches the
//! native handle types of a particular binding.

mod gl;
mod introspect;
mod recording;

pub use gl::GlowBackend;
pub use recording::{Call, DrawRecord, RecordingBackend};

use bitflags::bitflags;

use crate::error::RenderError;

macro_rules! backend_id {
    ($($name:ident),* $(,)?) => {
        $(
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u32);
        )*
    };
}

backend_id!(
    BufferId,
    TextureId,
    ShaderId,
    ProgramId,
    FramebufferId,
    RenderbufferId,
    UniformLocationId,
);

bitflags! {
    /// Buffers touched by `clear` and `blit_framebuffer`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClearFlags: u8 {
        const COLOR = 0b001;
        const DEPTH = 0b010;
        const STENCIL = 0b100;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            x: (self.x as f32 * factor).floor() as i32,
            y: (self.y as f32 * factor).floor() as i32,
            width: (self.width as f32 * factor).floor() as i32,
            height: (self.height as f32 * factor).floor() as i32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferTarget {
    Array,
    ElementArray,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BufferUsage {
    #[default]
    StaticDraw,
    DynamicDraw,
    StreamDraw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnableCap {
    Blend,
    CullFace,
    DepthTest,
    Dither,
    PolygonOffsetFill,
    SampleAlphaToCoverage,
    ScissorTest,
    StencilTest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendEquation {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
    DstColor,
    OneMinusDstColor,
    SrcAlphaSaturate,
    ConstantColor,
    OneMinusConstantColor,
    ConstantAlpha,
    OneMinusConstantAlpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompareFunc {
    Never,
    Less,
    Equal,
    #[default]
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullFaceMode {
    Back,
    Front,
    FrontAndBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrontFace {
    Ccw,
    Cw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StencilOp {
    #[default]
    Keep,
    Zero,
    Replace,
    Increment,
    IncrementWrap,
    Decrement,
    DecrementWrap,
    Invert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureTarget {
    Texture2D,
    CubeMap,
    Texture3D,
    Texture2DArray,
}

/// Destination of a 2D image upload: a plain texture or one face of a cube map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageTarget {
    Texture2D,
    CubeFace(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveMode {
    Points,
    Lines,
    LineStrip,
    LineLoop,
    Triangles,
    TriangleStrip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexType {
    U8,
    U16,
    U32,
}

impl IndexType {
    pub fn size(self) -> usize {
        match self {
            IndexType::U8 => 1,
            IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderKind {
    Vertex,
    Fragment,
}

/// Component type of vertex attributes and pixel data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Float,
    HalfFloat,
    UnsignedInt,
    Int,
    UnsignedShort,
    Short,
    UnsignedByte,
    Byte,
    UnsignedInt248,
}

impl DataType {
    pub fn size(self) -> usize {
        match self {
            DataType::Float | DataType::UnsignedInt | DataType::Int | DataType::UnsignedInt248 => 4,
            DataType::HalfFloat | DataType::UnsignedShort | DataType::Short => 2,
            DataType::UnsignedByte | DataType::Byte => 1,
        }
    }

    pub fn is_integer(self) -> bool {
        !matches!(self, DataType::Float | DataType::HalfFloat)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Alpha,
    Red,
    RedInteger,
    Rg,
    Rgb,
    Rgba,
    RgbaInteger,
    Luminance,
    LuminanceAlpha,
    DepthComponent,
    DepthStencil,
}

impl PixelFormat {
    pub fn components(self) -> usize {
        match self {
            PixelFormat::Alpha
            | PixelFormat::Red
            | PixelFormat::RedInteger
            | PixelFormat::Luminance
            | PixelFormat::DepthComponent
            | PixelFormat::DepthStencil => 1,
            PixelFormat::Rg | PixelFormat::LuminanceAlpha => 2,
            PixelFormat::Rgb => 3,
            PixelFormat::Rgba | PixelFormat::RgbaInteger => 4,
        }
    }
}

/// Sized internal storage formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InternalFormat {
    Alpha,
    Luminance,
    LuminanceAlpha,
    R8,
    R16F,
    R32F,
    Rg8,
    Rg16F,
    Rg32F,
    Rgb8,
    Rgb16F,
    Rgb32F,
    Rgba8,
    Srgb8Alpha8,
    Rgba16F,
    Rgba32F,
    R32UI,
    Rgba32UI,
    DepthComponent16,
    DepthComponent24,
    DepthComponent32F,
    Depth24Stencil8,
    StencilIndex8,
    /// Raw compressed format enum as exposed by the texture compression extension.
    Compressed(u32),
}

impl InternalFormat {
    pub fn is_depth(self) -> bool {
        matches!(
            self,
            InternalFormat::DepthComponent16
                | InternalFormat::DepthComponent24
                | InternalFormat::DepthComponent32F
                | InternalFormat::Depth24Stencil8
        )
    }

    pub fn is_float(self) -> bool {
        matches!(
            self,
            InternalFormat::R16F
                | InternalFormat::R32F
                | InternalFormat::Rg16F
                | InternalFormat::Rg32F
                | InternalFormat::Rgb16F
                | InternalFormat::Rgb32F
                | InternalFormat::Rgba16F
                | InternalFormat::Rgba32F
        )
    }
}

/// Complete description of texel storage for one upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TexelFormat {
    pub internal: InternalFormat,
    pub format: PixelFormat,
    pub data_type: DataType,
}

impl TexelFormat {
    pub const RGBA8: TexelFormat = TexelFormat {
        internal: InternalFormat::Rgba8,
        format: PixelFormat::Rgba,
        data_type: DataType::UnsignedByte,
    };

    pub const RGBA16F: TexelFormat = TexelFormat {
        internal: InternalFormat::Rgba16F,
        format: PixelFormat::Rgba,
        data_type: DataType::HalfFloat,
    };

    pub fn bytes_per_texel(&self) -> usize {
        match self.data_type {
            DataType::UnsignedInt248 => 4,
            data_type => data_type.size() * self.format.components(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureWrap {
    Repeat,
    #[default]
    ClampToEdge,
    MirroredRepeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFilter {
    Nearest,
    Linear,
    NearestMipmapNearest,
    LinearMipmapNearest,
    NearestMipmapLinear,
    LinearMipmapLinear,
}

impl TextureFilter {
    pub fn uses_mipmaps(self) -> bool {
        !matches!(self, TextureFilter::Nearest | TextureFilter::Linear)
    }

    /// The closest filter that reads only the base level.
    pub fn without_mipmaps(self) -> Self {
        match self {
            TextureFilter::Nearest
            | TextureFilter::NearestMipmapNearest
            | TextureFilter::NearestMipmapLinear => TextureFilter::Nearest,
            _ => TextureFilter::Linear,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TexParam {
    WrapS(TextureWrap),
    WrapT(TextureWrap),
    WrapR(TextureWrap),
    MinFilter(TextureFilter),
    MagFilter(TextureFilter),
    MaxAnisotropy(f32),
    CompareFunc(Option<CompareFunc>),
    MaxLevel(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelStore {
    UnpackAlignment(i32),
    PackAlignment(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attachment {
    Color(u32),
    Depth,
    Stencil,
    DepthStencil,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramebufferTarget {
    Framebuffer,
    Draw,
    Read,
}

/// GLSL type tag of an introspected uniform or attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlslType {
    Float,
    Vec2,
    Vec3,
    Vec4,
    Int,
    IVec2,
    IVec3,
    IVec4,
    UInt,
    Bool,
    Mat2,
    Mat3,
    Mat4,
    Sampler2D,
    SamplerCube,
    Sampler3D,
    Sampler2DArray,
    Sampler2DShadow,
    Unknown(u32),
}

impl GlslType {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "float" => GlslType::Float,
            "vec2" => GlslType::Vec2,
            "vec3" => GlslType::Vec3,
            "vec4" => GlslType::Vec4,
            "int" => GlslType::Int,
            "ivec2" => GlslType::IVec2,
            "ivec3" => GlslType::IVec3,
            "ivec4" => GlslType::IVec4,
            "uint" => GlslType::UInt,
            "bool" => GlslType::Bool,
            "mat2" => GlslType::Mat2,
            "mat3" => GlslType::Mat3,
            "mat4" => GlslType::Mat4,
            "sampler2D" => GlslType::Sampler2D,
            "samplerCube" => GlslType::SamplerCube,
            "sampler3D" => GlslType::Sampler3D,
            "sampler2DArray" => GlslType::Sampler2DArray,
            "sampler2DShadow" => GlslType::Sampler2DShadow,
            _ => return None,
        })
    }

    pub fn is_sampler(self) -> bool {
        matches!(
            self,
            GlslType::Sampler2D
                | GlslType::SamplerCube
                | GlslType::Sampler3D
                | GlslType::Sampler2DArray
                | GlslType::Sampler2DShadow
        )
    }

    /// Number of consecutive attribute locations a vertex input of this type occupies.
    pub fn location_span(self) -> u32 {
        match self {
            GlslType::Mat2 => 2,
            GlslType::Mat3 => 3,
            GlslType::Mat4 => 4,
            _ => 1,
        }
    }
}

/// One entry of a program's active uniform or attribute list.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveVariable {
    pub name: String,
    pub size: i32,
    pub ty: GlslType,
}

/// A typed uniform upload. Array variants hold the flattened components.
#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Int(i32),
    IVec2([i32; 2]),
    IVec3([i32; 3]),
    IVec4([i32; 4]),
    UInt(u32),
    Mat2([f32; 4]),
    Mat3([f32; 9]),
    Mat4([f32; 16]),
    FloatArray(Vec<f32>),
    Vec2Array(Vec<f32>),
    Vec3Array(Vec<f32>),
    Vec4Array(Vec<f32>),
    IntArray(Vec<i32>),
    Mat3Array(Vec<f32>),
    Mat4Array(Vec<f32>),
}

impl UniformValue {
    pub fn bool(value: bool) -> Self {
        UniformValue::Int(value as i32)
    }
}

/// GLSL dialect accepted by the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlslVersion {
    /// `#version 300 es` (WebGL2 / GLES 3).
    Es300,
    /// `#version 330 core` (desktop GL).
    Core330,
}

/// Limits and optional features reported by the context at creation.
#[derive(Debug, Clone, PartialEq)]
pub struct Capabilities {
    pub glsl: GlslVersion,
    pub max_texture_size: u32,
    pub max_cube_map_size: u32,
    pub max_texture_units: u32,
    pub max_vertex_texture_units: u32,
    pub max_vertex_attribs: u32,
    pub max_samples: u32,
    /// Zero when anisotropic filtering is unavailable.
    pub max_anisotropy: f32,
    /// False in a WebGL1-class profile, where NPOT textures cannot mip or repeat.
    pub npot_mipmaps: bool,
    pub float_linear_filtering: bool,
    pub color_buffer_float: bool,
    pub color_buffer_half_float: bool,
    pub precision: &'static str,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            glsl: GlslVersion::Es300,
            max_texture_size: 4096,
            max_cube_map_size: 4096,
            max_texture_units: 16,
            max_vertex_texture_units: 16,
            max_vertex_attribs: 16,
            max_samples: 4,
            max_anisotropy: 16.0,
            npot_mipmaps: true,
            float_linear_filtering: true,
            color_buffer_float: true,
            color_buffer_half_float: true,
            precision: "highp",
        }
    }
}

/// A bind-then-draw graphics context with global state.
///
/// Calls never report errors except object creation, which may fail once the context
/// is gone; the orchestrator polls `is_context_lost` instead.
pub trait Backend {
    fn capabilities(&self) -> &Capabilities;
    fn is_context_lost(&mut self) -> bool;

    fn create_buffer(&mut self) -> Result<BufferId, RenderError>;
    fn delete_buffer(&mut self, buffer: BufferId);
    fn bind_buffer(&mut self, target: BufferTarget, buffer: Option<BufferId>);
    fn buffer_data(&mut self, target: BufferTarget, data: &[u8], usage: BufferUsage);
    fn buffer_sub_data(&mut self, target: BufferTarget, offset: usize, data: &[u8]);

    fn create_texture(&mut self) -> Result<TextureId, RenderError>;
    fn delete_texture(&mut self, texture: TextureId);
    fn active_texture(&mut self, unit: u32);
    fn bind_texture(&mut self, target: TextureTarget, texture: Option<TextureId>);
    fn pixel_store(&mut self, param: PixelStore);
    #[allow(clippy::too_many_arguments)]
    fn tex_image_2d(
        &mut self,
        target: ImageTarget,
        level: u32,
        format: TexelFormat,
        width: u32,
        height: u32,
        data: Option<&[u8]>,
    );
    #[allow(clippy::too_many_arguments)]
    fn tex_image_3d(
        &mut self,
        target: TextureTarget,
        level: u32,
        format: TexelFormat,
        width: u32,
        height: u32,
        depth: u32,
        data: Option<&[u8]>,
    );
    fn compressed_tex_image_2d(
        &mut self,
        target: ImageTarget,
        level: u32,
        internal: InternalFormat,
        width: u32,
        height: u32,
        data: &[u8],
    );
    fn tex_parameter(&mut self, target: TextureTarget, param: TexParam);
    fn generate_mipmap(&mut self, target: TextureTarget);

    fn create_shader(&mut self, kind: ShaderKind, source: &str) -> Result<ShaderId, RenderError>;
    fn shader_compile_status(&mut self, shader: ShaderId) -> bool;
    fn shader_info_log(&mut self, shader: ShaderId) -> String;
    fn delete_shader(&mut self, shader: ShaderId);
    fn create_program(
        &mut self,
        vertex: ShaderId,
        fragment: ShaderId,
    ) -> Result<ProgramId, RenderError>;
    fn program_link_status(&mut self, program: ProgramId) -> bool;
    fn program_info_log(&mut self, program: ProgramId) -> String;
    fn delete_program(&mut self, program: ProgramId);
    fn use_program(&mut self, program: Option<ProgramId>);
    fn active_uniforms(&mut self, program: ProgramId) -> Vec<ActiveVariable>;
    fn active_attributes(&mut self, program: ProgramId) -> Vec<ActiveVariable>;
    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<UniformLocationId>;
    fn attrib_location(&mut self, program: ProgramId, name: &str) -> Option<u32>;
    fn set_uniform(&mut self, location: UniformLocationId, value: &UniformValue);

    fn enable_vertex_attrib(&mut self, index: u32);
    fn disable_vertex_attrib(&mut self, index: u32);
    #[allow(clippy::too_many_arguments)]
    fn vertex_attrib_pointer(
        &mut self,
        index: u32,
        size: i32,
        data_type: DataType,
        normalized: bool,
        stride: i32,
        offset: i32,
        integer: bool,
    );
    fn vertex_attrib_divisor(&mut self, index: u32, divisor: u32);
    fn vertex_attrib_4f(&mut self, index: u32, value: [f32; 4]);

    fn enable(&mut self, cap: EnableCap);
    fn disable(&mut self, cap: EnableCap);
    fn blend_equation_separate(&mut self, rgb: BlendEquation, alpha: BlendEquation);
    fn blend_func_separate(
        &mut self,
        src_rgb: BlendFactor,
        dst_rgb: BlendFactor,
        src_alpha: BlendFactor,
        dst_alpha: BlendFactor,
    );
    fn blend_color(&mut self, color: [f32; 4]);
    fn depth_func(&mut self, func: CompareFunc);
    fn depth_mask(&mut self, write: bool);
    fn color_mask(&mut self, mask: [bool; 4]);
    fn stencil_func(&mut self, func: CompareFunc, reference: i32, mask: u32);
    fn stencil_op(&mut self, fail: StencilOp, depth_fail: StencilOp, pass: StencilOp);
    fn stencil_mask(&mut self, mask: u32);
    fn cull_face(&mut self, mode: CullFaceMode);
    fn front_face(&mut self, face: FrontFace);
    fn polygon_offset(&mut self, factor: f32, units: f32);
    fn line_width(&mut self, width: f32);
    fn viewport(&mut self, rect: Rect);
    fn scissor(&mut self, rect: Rect);
    fn clear_color(&mut self, color: [f32; 4]);
    fn clear_depth(&mut self, depth: f32);
    fn clear_stencil(&mut self, stencil: i32);
    fn clear(&mut self, flags: ClearFlags);

    fn create_framebuffer(&mut self) -> Result<FramebufferId, RenderError>;
    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);
    fn bind_framebuffer(&mut self, target: FramebufferTarget, framebuffer: Option<FramebufferId>);
    fn framebuffer_texture_2d(
        &mut self,
        attachment: Attachment,
        target: ImageTarget,
        texture: Option<TextureId>,
        level: u32,
    );
    fn framebuffer_texture_layer(
        &mut self,
        attachment: Attachment,
        texture: Option<TextureId>,
        level: u32,
        layer: u32,
    );
    fn create_renderbuffer(&mut self) -> Result<RenderbufferId, RenderError>;
    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferId);
    fn bind_renderbuffer(&mut self, renderbuffer: Option<RenderbufferId>);
    fn renderbuffer_storage(
        &mut self,
        internal: InternalFormat,
        samples: u32,
        width: u32,
        height: u32,
    );
    fn framebuffer_renderbuffer(&mut self, attachment: Attachment, renderbuffer: Option<RenderbufferId>);
    fn draw_buffers(&mut self, color_attachments: u32);
    fn blit_framebuffer(&mut self, src: Rect, dst: Rect, mask: ClearFlags, linear: bool);
    fn read_pixels(&mut self, rect: Rect, format: PixelFormat, data_type: DataType, out: &mut [u8]);

    fn draw_arrays(&mut self, mode: PrimitiveMode, first: i32, count: i32);
    fn draw_elements(&mut self, mode: PrimitiveMode, count: i32, index_type: IndexType, offset: i32);
    fn draw_arrays_instanced(&mut self, mode: PrimitiveMode, first: i32, count: i32, instances: i32);
    fn draw_elements_instanced(
        &mut self,
        mode: PrimitiveMode,
        count: i32,
        index_type: IndexType,
        offset: i32,
        instances: i32,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_drop_mip_sampling() {
        assert_eq!(
            TextureFilter::LinearMipmapLinear.without_mipmaps(),
            TextureFilter::Linear
        );
        assert_eq!(
            TextureFilter::NearestMipmapLinear.without_mipmaps(),
            TextureFilter::Nearest
        );
        assert!(!TextureFilter::Linear.uses_mipmaps());
    }

    #[test]
    fn texel_sizes() {
        assert_eq!(TexelFormat::RGBA8.bytes_per_texel(), 4);
        assert_eq!(TexelFormat::RGBA16F.bytes_per_texel(), 8);
    }

    #[test]
    fn rect_scales_by_pixel_ratio() {
        let rect = Rect::new(10, 20, 300, 150).scaled(2.0);
        assert_eq!(rect, Rect::new(20, 40, 600, 300));
    }
}
