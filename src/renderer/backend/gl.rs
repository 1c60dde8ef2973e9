use std::collections::HashMap;

use glow::HasContext;

use super::*;
use crate::error::RenderError;

/// Id table mapping our integer handles to native objects.
struct Slots<T> {
    items: Vec<Option<T>>,
    free: Vec<u32>,
}

impl<T: Copy> Slots<T> {
    fn new() -> Self {
        Self {
            items: Vec::new(),
            free: Vec::new(),
        }
    }

    fn insert(&mut self, item: T) -> u32 {
        if let Some(index) = self.free.pop() {
            self.items[index as usize] = Some(item);
            return index;
        }
        self.items.push(Some(item));
        (self.items.len() - 1) as u32
    }

    fn get(&self, id: u32) -> Option<T> {
        self.items.get(id as usize).copied().flatten()
    }

    fn remove(&mut self, id: u32) -> Option<T> {
        let item = self.items.get_mut(id as usize)?.take()?;
        self.free.push(id);
        Some(item)
    }
}

/// [`Backend`] over an OpenGL / WebGL2 context provided by `glow`.
///
/// All calls go straight to the driver; the renderer's `StateCache` is what keeps
/// them minimal.
pub struct GlowBackend {
    gl: glow::Context,
    capabilities: Capabilities,
    buffers: Slots<glow::Buffer>,
    textures: Slots<glow::Texture>,
    shaders: Slots<glow::Shader>,
    programs: Slots<glow::Program>,
    framebuffers: Slots<glow::Framebuffer>,
    renderbuffers: Slots<glow::Renderbuffer>,
    uniform_locations: Vec<Option<glow::UniformLocation>>,
    program_locations: HashMap<ProgramId, Vec<UniformLocationId>>,
    _vertex_array: Option<glow::VertexArray>,
}

fn has_extension(gl: &glow::Context, names: &[&str]) -> bool {
    let extensions = gl.supported_extensions();
    names.iter().any(|name| {
        extensions.contains(*name) || extensions.contains(&format!("GL_{name}"))
    })
}

impl GlowBackend {
    pub fn new(gl: glow::Context) -> Self {
        let capabilities = unsafe { Self::query_capabilities(&gl) };
        log::info!(
            "GL context: {:?}, max texture {}, {} texture units, anisotropy {}",
            capabilities.glsl,
            capabilities.max_texture_size,
            capabilities.max_texture_units,
            capabilities.max_anisotropy
        );

        // Core profiles refuse attribute setup without a bound vertex array.
        let vertex_array = unsafe {
            match gl.create_vertex_array() {
                Ok(vao) => {
                    gl.bind_vertex_array(Some(vao));
                    Some(vao)
                }
                Err(err) => {
                    log::warn!("Failed to create default vertex array: {}", err);
                    None
                }
            }
        };

        Self {
            gl,
            capabilities,
            buffers: Slots::new(),
            textures: Slots::new(),
            shaders: Slots::new(),
            programs: Slots::new(),
            framebuffers: Slots::new(),
            renderbuffers: Slots::new(),
            uniform_locations: Vec::new(),
            program_locations: HashMap::new(),
            _vertex_array: vertex_array,
        }
    }

    pub fn context(&self) -> &glow::Context {
        &self.gl
    }

    unsafe fn query_capabilities(gl: &glow::Context) -> Capabilities {
        let embedded = cfg!(target_arch = "wasm32") || gl.version().is_embedded;
        let max_anisotropy = if has_extension(
            gl,
            &[
                "EXT_texture_filter_anisotropic",
                "WEBKIT_EXT_texture_filter_anisotropic",
            ],
        ) {
            gl.get_parameter_f32(glow::MAX_TEXTURE_MAX_ANISOTROPY_EXT)
        } else {
            0.0
        };
        let color_buffer_float = !embedded || has_extension(gl, &["EXT_color_buffer_float"]);

        Capabilities {
            glsl: if embedded {
                GlslVersion::Es300
            } else {
                GlslVersion::Core330
            },
            max_texture_size: gl.get_parameter_i32(glow::MAX_TEXTURE_SIZE).max(1) as u32,
            max_cube_map_size: gl.get_parameter_i32(glow::MAX_CUBE_MAP_TEXTURE_SIZE).max(1) as u32,
            max_texture_units: gl.get_parameter_i32(glow::MAX_TEXTURE_IMAGE_UNITS).max(1) as u32,
            max_vertex_texture_units: gl
                .get_parameter_i32(glow::MAX_VERTEX_TEXTURE_IMAGE_UNITS)
                .max(0) as u32,
            max_vertex_attribs: gl.get_parameter_i32(glow::MAX_VERTEX_ATTRIBS).max(1) as u32,
            max_samples: gl.get_parameter_i32(glow::MAX_SAMPLES).max(0) as u32,
            max_anisotropy,
            npot_mipmaps: true,
            float_linear_filtering: !embedded
                || has_extension(gl, &["OES_texture_float_linear"]),
            color_buffer_float,
            color_buffer_half_float: color_buffer_float
                || has_extension(gl, &["EXT_color_buffer_half_float"]),
            precision: "highp",
        }
    }

    fn buffer(&self, id: BufferId) -> Option<glow::Buffer> {
        self.buffers.get(id.0)
    }

    fn texture(&self, id: Option<TextureId>) -> Option<glow::Texture> {
        id.and_then(|id| self.textures.get(id.0))
    }

    fn program(&self, id: ProgramId) -> Option<glow::Program> {
        self.programs.get(id.0)
    }
}

fn gl_buffer_target(target: BufferTarget) -> u32 {
    match target {
        BufferTarget::Array => glow::ARRAY_BUFFER,
        BufferTarget::ElementArray => glow::ELEMENT_ARRAY_BUFFER,
    }
}

fn gl_usage(usage: BufferUsage) -> u32 {
    match usage {
        BufferUsage::StaticDraw => glow::STATIC_DRAW,
        BufferUsage::DynamicDraw => glow::DYNAMIC_DRAW,
        BufferUsage::StreamDraw => glow::STREAM_DRAW,
    }
}

fn gl_texture_target(target: TextureTarget) -> u32 {
    match target {
        TextureTarget::Texture2D => glow::TEXTURE_2D,
        TextureTarget::CubeMap => glow::TEXTURE_CUBE_MAP,
        TextureTarget::Texture3D => glow::TEXTURE_3D,
        TextureTarget::Texture2DArray => glow::TEXTURE_2D_ARRAY,
    }
}

fn gl_image_target(target: ImageTarget) -> u32 {
    match target {
        ImageTarget::Texture2D => glow::TEXTURE_2D,
        ImageTarget::CubeFace(face) => glow::TEXTURE_CUBE_MAP_POSITIVE_X + face as u32,
    }
}

fn gl_internal_format(format: InternalFormat) -> u32 {
    match format {
        InternalFormat::Alpha => glow::ALPHA,
        InternalFormat::Luminance => glow::LUMINANCE,
        InternalFormat::LuminanceAlpha => glow::LUMINANCE_ALPHA,
        InternalFormat::R8 => glow::R8,
        InternalFormat::R16F => glow::R16F,
        InternalFormat::R32F => glow::R32F,
        InternalFormat::Rg8 => glow::RG8,
        InternalFormat::Rg16F => glow::RG16F,
        InternalFormat::Rg32F => glow::RG32F,
        InternalFormat::Rgb8 => glow::RGB8,
        InternalFormat::Rgb16F => glow::RGB16F,
        InternalFormat::Rgb32F => glow::RGB32F,
        InternalFormat::Rgba8 => glow::RGBA8,
        InternalFormat::Srgb8Alpha8 => glow::SRGB8_ALPHA8,
        InternalFormat::Rgba16F => glow::RGBA16F,
        InternalFormat::Rgba32F => glow::RGBA32F,
        InternalFormat::R32UI => glow::R32UI,
        InternalFormat::Rgba32UI => glow::RGBA32UI,
        InternalFormat::DepthComponent16 => glow::DEPTH_COMPONENT16,
        InternalFormat::DepthComponent24 => glow::DEPTH_COMPONENT24,
        InternalFormat::DepthComponent32F => glow::DEPTH_COMPONENT32F,
        InternalFormat::Depth24Stencil8 => glow::DEPTH24_STENCIL8,
        InternalFormat::StencilIndex8 => glow::STENCIL_INDEX8,
        InternalFormat::Compressed(raw) => raw,
    }
}

fn gl_pixel_format(format: PixelFormat) -> u32 {
    match format {
        PixelFormat::Alpha => glow::ALPHA,
        PixelFormat::Red => glow::RED,
        PixelFormat::RedInteger => glow::RED_INTEGER,
        PixelFormat::Rg => glow::RG,
        PixelFormat::Rgb => glow::RGB,
        PixelFormat::Rgba => glow::RGBA,
        PixelFormat::RgbaInteger => glow::RGBA_INTEGER,
        PixelFormat::Luminance => glow::LUMINANCE,
        PixelFormat::LuminanceAlpha => glow::LUMINANCE_ALPHA,
        PixelFormat::DepthComponent => glow::DEPTH_COMPONENT,
        PixelFormat::DepthStencil => glow::DEPTH_STENCIL,
    }
}

fn gl_data_type(data_type: DataType) -> u32 {
    match data_type {
        DataType::Float => glow::FLOAT,
        DataType::HalfFloat => glow::HALF_FLOAT,
        DataType::UnsignedInt => glow::UNSIGNED_INT,
        DataType::Int => glow::INT,
        DataType::UnsignedShort => glow::UNSIGNED_SHORT,
        DataType::Short => glow::SHORT,
        DataType::UnsignedByte => glow::UNSIGNED_BYTE,
        DataType::Byte => glow::BYTE,
        DataType::UnsignedInt248 => glow::UNSIGNED_INT_24_8,
    }
}

fn gl_wrap(wrap: TextureWrap) -> i32 {
    (match wrap {
        TextureWrap::Repeat => glow::REPEAT,
        TextureWrap::ClampToEdge => glow::CLAMP_TO_EDGE,
        TextureWrap::MirroredRepeat => glow::MIRRORED_REPEAT,
    }) as i32
}

fn gl_filter(filter: TextureFilter) -> i32 {
    (match filter {
        TextureFilter::Nearest => glow::NEAREST,
        TextureFilter::Linear => glow::LINEAR,
        TextureFilter::NearestMipmapNearest => glow::NEAREST_MIPMAP_NEAREST,
        TextureFilter::LinearMipmapNearest => glow::LINEAR_MIPMAP_NEAREST,
        TextureFilter::NearestMipmapLinear => glow::NEAREST_MIPMAP_LINEAR,
        TextureFilter::LinearMipmapLinear => glow::LINEAR_MIPMAP_LINEAR,
    }) as i32
}

fn gl_compare(func: CompareFunc) -> u32 {
    match func {
        CompareFunc::Never => glow::NEVER,
        CompareFunc::Less => glow::LESS,
        CompareFunc::Equal => glow::EQUAL,
        CompareFunc::LessEqual => glow::LEQUAL,
        CompareFunc::Greater => glow::GREATER,
        CompareFunc::NotEqual => glow::NOTEQUAL,
        CompareFunc::GreaterEqual => glow::GEQUAL,
        CompareFunc::Always => glow::ALWAYS,
    }
}

fn gl_cap(cap: EnableCap) -> u32 {
    match cap {
        EnableCap::Blend => glow::BLEND,
        EnableCap::CullFace => glow::CULL_FACE,
        EnableCap::DepthTest => glow::DEPTH_TEST,
        EnableCap::Dither => glow::DITHER,
        EnableCap::PolygonOffsetFill => glow::POLYGON_OFFSET_FILL,
        EnableCap::SampleAlphaToCoverage => glow::SAMPLE_ALPHA_TO_COVERAGE,
        EnableCap::ScissorTest => glow::SCISSOR_TEST,
        EnableCap::StencilTest => glow::STENCIL_TEST,
    }
}

fn gl_blend_equation(equation: BlendEquation) -> u32 {
    match equation {
        BlendEquation::Add => glow::FUNC_ADD,
        BlendEquation::Subtract => glow::FUNC_SUBTRACT,
        BlendEquation::ReverseSubtract => glow::FUNC_REVERSE_SUBTRACT,
        BlendEquation::Min => glow::MIN,
        BlendEquation::Max => glow::MAX,
    }
}

fn gl_blend_factor(factor: BlendFactor) -> u32 {
    match factor {
        BlendFactor::Zero => glow::ZERO,
        BlendFactor::One => glow::ONE,
        BlendFactor::SrcColor => glow::SRC_COLOR,
        BlendFactor::OneMinusSrcColor => glow::ONE_MINUS_SRC_COLOR,
        BlendFactor::SrcAlpha => glow::SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => glow::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DstAlpha => glow::DST_ALPHA,
        BlendFactor::OneMinusDstAlpha => glow::ONE_MINUS_DST_ALPHA,
        BlendFactor::DstColor => glow::DST_COLOR,
        BlendFactor::OneMinusDstColor => glow::ONE_MINUS_DST_COLOR,
        BlendFactor::SrcAlphaSaturate => glow::SRC_ALPHA_SATURATE,
        BlendFactor::ConstantColor => glow::CONSTANT_COLOR,
        BlendFactor::OneMinusConstantColor => glow::ONE_MINUS_CONSTANT_COLOR,
        BlendFactor::ConstantAlpha => glow::CONSTANT_ALPHA,
        BlendFactor::OneMinusConstantAlpha => glow::ONE_MINUS_CONSTANT_ALPHA,
    }
}

fn gl_stencil_op(op: StencilOp) -> u32 {
    match op {
        StencilOp::Keep => glow::KEEP,
        StencilOp::Zero => glow::ZERO,
        StencilOp::Replace => glow::REPLACE,
        StencilOp::Increment => glow::INCR,
        StencilOp::IncrementWrap => glow::INCR_WRAP,
        StencilOp::Decrement => glow::DECR,
        StencilOp::DecrementWrap => glow::DECR_WRAP,
        StencilOp::Invert => glow::INVERT,
    }
}

fn gl_attachment(attachment: Attachment) -> u32 {
    match attachment {
        Attachment::Color(index) => glow::COLOR_ATTACHMENT0 + index,
        Attachment::Depth => glow::DEPTH_ATTACHMENT,
        Attachment::Stencil => glow::STENCIL_ATTACHMENT,
        Attachment::DepthStencil => glow::DEPTH_STENCIL_ATTACHMENT,
    }
}

fn gl_framebuffer_target(target: FramebufferTarget) -> u32 {
    match target {
        FramebufferTarget::Framebuffer => glow::FRAMEBUFFER,
        FramebufferTarget::Draw => glow::DRAW_FRAMEBUFFER,
        FramebufferTarget::Read => glow::READ_FRAMEBUFFER,
    }
}

fn gl_mode(mode: PrimitiveMode) -> u32 {
    match mode {
        PrimitiveMode::Points => glow::POINTS,
        PrimitiveMode::Lines => glow::LINES,
        PrimitiveMode::LineStrip => glow::LINE_STRIP,
        PrimitiveMode::LineLoop => glow::LINE_LOOP,
        PrimitiveMode::Triangles => glow::TRIANGLES,
        PrimitiveMode::TriangleStrip => glow::TRIANGLE_STRIP,
    }
}

fn gl_index_type(index_type: IndexType) -> u32 {
    match index_type {
        IndexType::U8 => glow::UNSIGNED_BYTE,
        IndexType::U16 => glow::UNSIGNED_SHORT,
        IndexType::U32 => glow::UNSIGNED_INT,
    }
}

fn gl_clear_mask(flags: ClearFlags) -> u32 {
    let mut mask = 0;
    if flags.contains(ClearFlags::COLOR) {
        mask |= glow::COLOR_BUFFER_BIT;
    }
    if flags.contains(ClearFlags::DEPTH) {
        mask |= glow::DEPTH_BUFFER_BIT;
    }
    if flags.contains(ClearFlags::STENCIL) {
        mask |= glow::STENCIL_BUFFER_BIT;
    }
    mask
}

fn glsl_type(raw: u32) -> GlslType {
    match raw {
        glow::FLOAT => GlslType::Float,
        glow::FLOAT_VEC2 => GlslType::Vec2,
        glow::FLOAT_VEC3 => GlslType::Vec3,
        glow::FLOAT_VEC4 => GlslType::Vec4,
        glow::INT => GlslType::Int,
        glow::INT_VEC2 => GlslType::IVec2,
        glow::INT_VEC3 => GlslType::IVec3,
        glow::INT_VEC4 => GlslType::IVec4,
        glow::UNSIGNED_INT => GlslType::UInt,
        glow::BOOL => GlslType::Bool,
        glow::FLOAT_MAT2 => GlslType::Mat2,
        glow::FLOAT_MAT3 => GlslType::Mat3,
        glow::FLOAT_MAT4 => GlslType::Mat4,
        glow::SAMPLER_2D => GlslType::Sampler2D,
        glow::SAMPLER_CUBE => GlslType::SamplerCube,
        glow::SAMPLER_3D => GlslType::Sampler3D,
        glow::SAMPLER_2D_ARRAY => GlslType::Sampler2DArray,
        glow::SAMPLER_2D_SHADOW => GlslType::Sampler2DShadow,
        other => GlslType::Unknown(other),
    }
}

impl Backend for GlowBackend {
    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn is_context_lost(&mut self) -> bool {
        unsafe { self.gl.get_error() == glow::CONTEXT_LOST }
    }

    fn create_buffer(&mut self) -> Result<BufferId, RenderError> {
        let buffer = unsafe { self.gl.create_buffer() }.map_err(RenderError::Backend)?;
        Ok(BufferId(self.buffers.insert(buffer)))
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        if let Some(native) = self.buffers.remove(buffer.0) {
            unsafe { self.gl.delete_buffer(native) };
        }
    }

    fn bind_buffer(&mut self, target: BufferTarget, buffer: Option<BufferId>) {
        let native = buffer.and_then(|b| self.buffer(b));
        unsafe { self.gl.bind_buffer(gl_buffer_target(target), native) };
    }

    fn buffer_data(&mut self, target: BufferTarget, data: &[u8], usage: BufferUsage) {
        unsafe {
            self.gl
                .buffer_data_u8_slice(gl_buffer_target(target), data, gl_usage(usage))
        };
    }

    fn buffer_sub_data(&mut self, target: BufferTarget, offset: usize, data: &[u8]) {
        unsafe {
            self.gl
                .buffer_sub_data_u8_slice(gl_buffer_target(target), offset as i32, data)
        };
    }

    fn create_texture(&mut self) -> Result<TextureId, RenderError> {
        let texture = unsafe { self.gl.create_texture() }.map_err(RenderError::Backend)?;
        Ok(TextureId(self.textures.insert(texture)))
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if let Some(native) = self.textures.remove(texture.0) {
            unsafe { self.gl.delete_texture(native) };
        }
    }

    fn active_texture(&mut self, unit: u32) {
        unsafe { self.gl.active_texture(glow::TEXTURE0 + unit) };
    }

    fn bind_texture(&mut self, target: TextureTarget, texture: Option<TextureId>) {
        let native = self.texture(texture);
        unsafe { self.gl.bind_texture(gl_texture_target(target), native) };
    }

    fn pixel_store(&mut self, param: PixelStore) {
        let (name, value) = match param {
            PixelStore::UnpackAlignment(v) => (glow::UNPACK_ALIGNMENT, v),
            PixelStore::PackAlignment(v) => (glow::PACK_ALIGNMENT, v),
        };
        unsafe { self.gl.pixel_store_i32(name, value) };
    }

    fn tex_image_2d(
        &mut self,
        target: ImageTarget,
        level: u32,
        format: TexelFormat,
        width: u32,
        height: u32,
        data: Option<&[u8]>,
    ) {
        unsafe {
            self.gl.tex_image_2d(
                gl_image_target(target),
                level as i32,
                gl_internal_format(format.internal) as i32,
                width as i32,
                height as i32,
                0,
                gl_pixel_format(format.format),
                gl_data_type(format.data_type),
                glow::PixelUnpackData::Slice(data),
            )
        };
    }

    fn tex_image_3d(
        &mut self,
        target: TextureTarget,
        level: u32,
        format: TexelFormat,
        width: u32,
        height: u32,
        depth: u32,
        data: Option<&[u8]>,
    ) {
        unsafe {
            self.gl.tex_image_3d(
                gl_texture_target(target),
                level as i32,
                gl_internal_format(format.internal) as i32,
                width as i32,
                height as i32,
                depth as i32,
                0,
                gl_pixel_format(format.format),
                gl_data_type(format.data_type),
                glow::PixelUnpackData::Slice(data),
            )
        };
    }

    fn compressed_tex_image_2d(
        &mut self,
        target: ImageTarget,
        level: u32,
        internal: InternalFormat,
        width: u32,
        height: u32,
        data: &[u8],
    ) {
        unsafe {
            self.gl.compressed_tex_image_2d(
                gl_image_target(target),
                level as i32,
                gl_internal_format(internal) as i32,
                width as i32,
                height as i32,
                0,
                data.len() as i32,
                data,
            )
        };
    }

    fn tex_parameter(&mut self, target: TextureTarget, param: TexParam) {
        let target = gl_texture_target(target);
        unsafe {
            match param {
                TexParam::WrapS(w) => self.gl.tex_parameter_i32(target, glow::TEXTURE_WRAP_S, gl_wrap(w)),
                TexParam::WrapT(w) => self.gl.tex_parameter_i32(target, glow::TEXTURE_WRAP_T, gl_wrap(w)),
                TexParam::WrapR(w) => self.gl.tex_parameter_i32(target, glow::TEXTURE_WRAP_R, gl_wrap(w)),
                TexParam::MinFilter(f) => {
                    self.gl
                        .tex_parameter_i32(target, glow::TEXTURE_MIN_FILTER, gl_filter(f))
                }
                TexParam::MagFilter(f) => {
                    self.gl
                        .tex_parameter_i32(target, glow::TEXTURE_MAG_FILTER, gl_filter(f))
                }
                TexParam::MaxAnisotropy(value) => {
                    self.gl
                        .tex_parameter_f32(target, glow::TEXTURE_MAX_ANISOTROPY_EXT, value)
                }
                TexParam::CompareFunc(Some(func)) => {
                    self.gl.tex_parameter_i32(
                        target,
                        glow::TEXTURE_COMPARE_MODE,
                        glow::COMPARE_REF_TO_TEXTURE as i32,
                    );
                    self.gl
                        .tex_parameter_i32(target, glow::TEXTURE_COMPARE_FUNC, gl_compare(func) as i32);
                }
                TexParam::CompareFunc(None) => {
                    self.gl
                        .tex_parameter_i32(target, glow::TEXTURE_COMPARE_MODE, glow::NONE as i32)
                }
                TexParam::MaxLevel(level) => {
                    self.gl.tex_parameter_i32(target, glow::TEXTURE_MAX_LEVEL, level)
                }
            }
        }
    }

    fn generate_mipmap(&mut self, target: TextureTarget) {
        unsafe { self.gl.generate_mipmap(gl_texture_target(target)) };
    }

    fn create_shader(&mut self, kind: ShaderKind, source: &str) -> Result<ShaderId, RenderError> {
        let stage = match kind {
            ShaderKind::Vertex => glow::VERTEX_SHADER,
            ShaderKind::Fragment => glow::FRAGMENT_SHADER,
        };
        let shader = unsafe {
            let shader = self.gl.create_shader(stage).map_err(RenderError::Backend)?;
            self.gl.shader_source(shader, source);
            self.gl.compile_shader(shader);
            shader
        };
        Ok(ShaderId(self.shaders.insert(shader)))
    }

    fn shader_compile_status(&mut self, shader: ShaderId) -> bool {
        self.shaders
            .get(shader.0)
            .map(|s| unsafe { self.gl.get_shader_compile_status(s) })
            .unwrap_or(false)
    }

    fn shader_info_log(&mut self, shader: ShaderId) -> String {
        self.shaders
            .get(shader.0)
            .map(|s| unsafe { self.gl.get_shader_info_log(s) })
            .unwrap_or_default()
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        if let Some(native) = self.shaders.remove(shader.0) {
            unsafe { self.gl.delete_shader(native) };
        }
    }

    fn create_program(
        &mut self,
        vertex: ShaderId,
        fragment: ShaderId,
    ) -> Result<ProgramId, RenderError> {
        let (Some(vs), Some(fs)) = (self.shaders.get(vertex.0), self.shaders.get(fragment.0)) else {
            return Err(RenderError::backend("program references an unknown shader"));
        };
        let program = unsafe {
            let program = self.gl.create_program().map_err(RenderError::Backend)?;
            self.gl.attach_shader(program, vs);
            self.gl.attach_shader(program, fs);
            self.gl.link_program(program);
            self.gl.detach_shader(program, vs);
            self.gl.detach_shader(program, fs);
            program
        };
        Ok(ProgramId(self.programs.insert(program)))
    }

    fn program_link_status(&mut self, program: ProgramId) -> bool {
        self.program(program)
            .map(|p| unsafe { self.gl.get_program_link_status(p) })
            .unwrap_or(false)
    }

    fn program_info_log(&mut self, program: ProgramId) -> String {
        self.program(program)
            .map(|p| unsafe { self.gl.get_program_info_log(p) })
            .unwrap_or_default()
    }

    fn delete_program(&mut self, program: ProgramId) {
        if let Some(locations) = self.program_locations.remove(&program) {
            for location in locations {
                if let Some(slot) = self.uniform_locations.get_mut(location.0 as usize) {
                    *slot = None;
                }
            }
        }
        if let Some(native) = self.programs.remove(program.0) {
            unsafe { self.gl.delete_program(native) };
        }
    }

    fn use_program(&mut self, program: Option<ProgramId>) {
        let native = program.and_then(|p| self.program(p));
        unsafe { self.gl.use_program(native) };
    }

    fn active_uniforms(&mut self, program: ProgramId) -> Vec<ActiveVariable> {
        let Some(native) = self.program(program) else {
            return Vec::new();
        };
        unsafe {
            let count = self.gl.get_active_uniforms(native);
            (0..count)
                .filter_map(|index| self.gl.get_active_uniform(native, index))
                .map(|u| ActiveVariable {
                    name: u.name,
                    size: u.size,
                    ty: glsl_type(u.utype),
                })
                .collect()
        }
    }

    fn active_attributes(&mut self, program: ProgramId) -> Vec<ActiveVariable> {
        let Some(native) = self.program(program) else {
            return Vec::new();
        };
        unsafe {
            let count = self.gl.get_active_attributes(native);
            (0..count)
                .filter_map(|index| self.gl.get_active_attribute(native, index))
                .map(|a| ActiveVariable {
                    name: a.name,
                    size: a.size,
                    ty: glsl_type(a.atype),
                })
                .collect()
        }
    }

    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<UniformLocationId> {
        let native = self.program(program)?;
        let location = unsafe { self.gl.get_uniform_location(native, name) }?;
        let id = UniformLocationId(self.uniform_locations.len() as u32);
        self.uniform_locations.push(Some(location));
        self.program_locations.entry(program).or_default().push(id);
        Some(id)
    }

    fn attrib_location(&mut self, program: ProgramId, name: &str) -> Option<u32> {
        let native = self.program(program)?;
        unsafe { self.gl.get_attrib_location(native, name) }
    }

    fn set_uniform(&mut self, location: UniformLocationId, value: &UniformValue) {
        let Some(Some(loc)) = self.uniform_locations.get(location.0 as usize) else {
            return;
        };
        let loc = Some(loc);
        let gl = &self.gl;
        unsafe {
            match value {
                UniformValue::Float(v) => gl.uniform_1_f32(loc, *v),
                UniformValue::Vec2(v) => gl.uniform_2_f32(loc, v[0], v[1]),
                UniformValue::Vec3(v) => gl.uniform_3_f32(loc, v[0], v[1], v[2]),
                UniformValue::Vec4(v) => gl.uniform_4_f32(loc, v[0], v[1], v[2], v[3]),
                UniformValue::Int(v) => gl.uniform_1_i32(loc, *v),
                UniformValue::IVec2(v) => gl.uniform_2_i32(loc, v[0], v[1]),
                UniformValue::IVec3(v) => gl.uniform_3_i32(loc, v[0], v[1], v[2]),
                UniformValue::IVec4(v) => gl.uniform_4_i32(loc, v[0], v[1], v[2], v[3]),
                UniformValue::UInt(v) => gl.uniform_1_u32(loc, *v),
                UniformValue::Mat2(m) => gl.uniform_matrix_2_f32_slice(loc, false, m),
                UniformValue::Mat3(m) => gl.uniform_matrix_3_f32_slice(loc, false, m),
                UniformValue::Mat4(m) => gl.uniform_matrix_4_f32_slice(loc, false, m),
                UniformValue::FloatArray(v) => gl.uniform_1_f32_slice(loc, v),
                UniformValue::Vec2Array(v) => gl.uniform_2_f32_slice(loc, v),
                UniformValue::Vec3Array(v) => gl.uniform_3_f32_slice(loc, v),
                UniformValue::Vec4Array(v) => gl.uniform_4_f32_slice(loc, v),
                UniformValue::IntArray(v) => gl.uniform_1_i32_slice(loc, v),
                UniformValue::Mat3Array(v) => gl.uniform_matrix_3_f32_slice(loc, false, v),
                UniformValue::Mat4Array(v) => gl.uniform_matrix_4_f32_slice(loc, false, v),
            }
        }
    }

    fn enable_vertex_attrib(&mut self, index: u32) {
        unsafe { self.gl.enable_vertex_attrib_array(index) };
    }

    fn disable_vertex_attrib(&mut self, index: u32) {
        unsafe { self.gl.disable_vertex_attrib_array(index) };
    }

    fn vertex_attrib_pointer(
        &mut self,
        index: u32,
        size: i32,
        data_type: DataType,
        normalized: bool,
        stride: i32,
        offset: i32,
        integer: bool,
    ) {
        unsafe {
            if integer {
                self.gl
                    .vertex_attrib_pointer_i32(index, size, gl_data_type(data_type), stride, offset)
            } else {
                self.gl.vertex_attrib_pointer_f32(
                    index,
                    size,
                    gl_data_type(data_type),
                    normalized,
                    stride,
                    offset,
                )
            }
        }
    }

    fn vertex_attrib_divisor(&mut self, index: u32, divisor: u32) {
        unsafe { self.gl.vertex_attrib_divisor(index, divisor) };
    }

    fn vertex_attrib_4f(&mut self, index: u32, value: [f32; 4]) {
        unsafe {
            self.gl
                .vertex_attrib_4_f32(index, value[0], value[1], value[2], value[3])
        };
    }

    fn enable(&mut self, cap: EnableCap) {
        unsafe { self.gl.enable(gl_cap(cap)) };
    }

    fn disable(&mut self, cap: EnableCap) {
        unsafe { self.gl.disable(gl_cap(cap)) };
    }

    fn blend_equation_separate(&mut self, rgb: BlendEquation, alpha: BlendEquation) {
        unsafe {
            self.gl
                .blend_equation_separate(gl_blend_equation(rgb), gl_blend_equation(alpha))
        };
    }

    fn blend_func_separate(
        &mut self,
        src_rgb: BlendFactor,
        dst_rgb: BlendFactor,
        src_alpha: BlendFactor,
        dst_alpha: BlendFactor,
    ) {
        unsafe {
            self.gl.blend_func_separate(
                gl_blend_factor(src_rgb),
                gl_blend_factor(dst_rgb),
                gl_blend_factor(src_alpha),
                gl_blend_factor(dst_alpha),
            )
        };
    }

    fn blend_color(&mut self, color: [f32; 4]) {
        unsafe { self.gl.blend_color(color[0], color[1], color[2], color[3]) };
    }

    fn depth_func(&mut self, func: CompareFunc) {
        unsafe { self.gl.depth_func(gl_compare(func)) };
    }

    fn depth_mask(&mut self, write: bool) {
        unsafe { self.gl.depth_mask(write) };
    }

    fn color_mask(&mut self, mask: [bool; 4]) {
        unsafe { self.gl.color_mask(mask[0], mask[1], mask[2], mask[3]) };
    }

    fn stencil_func(&mut self, func: CompareFunc, reference: i32, mask: u32) {
        unsafe { self.gl.stencil_func(gl_compare(func), reference, mask) };
    }

    fn stencil_op(&mut self, fail: StencilOp, depth_fail: StencilOp, pass: StencilOp) {
        unsafe {
            self.gl.stencil_op(
                gl_stencil_op(fail),
                gl_stencil_op(depth_fail),
                gl_stencil_op(pass),
            )
        };
    }

    fn stencil_mask(&mut self, mask: u32) {
        unsafe { self.gl.stencil_mask(mask) };
    }

    fn cull_face(&mut self, mode: CullFaceMode) {
        let mode = match mode {
            CullFaceMode::Back => glow::BACK,
            CullFaceMode::Front => glow::FRONT,
            CullFaceMode::FrontAndBack => glow::FRONT_AND_BACK,
        };
        unsafe { self.gl.cull_face(mode) };
    }

    fn front_face(&mut self, face: FrontFace) {
        let face = match face {
            FrontFace::Ccw => glow::CCW,
            FrontFace::Cw => glow::CW,
        };
        unsafe { self.gl.front_face(face) };
    }

    fn polygon_offset(&mut self, factor: f32, units: f32) {
        unsafe { self.gl.polygon_offset(factor, units) };
    }

    fn line_width(&mut self, width: f32) {
        unsafe { self.gl.line_width(width) };
    }

    fn viewport(&mut self, rect: Rect) {
        unsafe { self.gl.viewport(rect.x, rect.y, rect.width, rect.height) };
    }

    fn scissor(&mut self, rect: Rect) {
        unsafe { self.gl.scissor(rect.x, rect.y, rect.width, rect.height) };
    }

    fn clear_color(&mut self, color: [f32; 4]) {
        unsafe { self.gl.clear_color(color[0], color[1], color[2], color[3]) };
    }

    fn clear_depth(&mut self, depth: f32) {
        unsafe { self.gl.clear_depth_f32(depth) };
    }

    fn clear_stencil(&mut self, stencil: i32) {
        unsafe { self.gl.clear_stencil(stencil) };
    }

    fn clear(&mut self, flags: ClearFlags) {
        unsafe { self.gl.clear(gl_clear_mask(flags)) };
    }

    fn create_framebuffer(&mut self) -> Result<FramebufferId, RenderError> {
        let framebuffer = unsafe { self.gl.create_framebuffer() }.map_err(RenderError::Backend)?;
        Ok(FramebufferId(self.framebuffers.insert(framebuffer)))
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        if let Some(native) = self.framebuffers.remove(framebuffer.0) {
            unsafe { self.gl.delete_framebuffer(native) };
        }
    }

    fn bind_framebuffer(&mut self, target: FramebufferTarget, framebuffer: Option<FramebufferId>) {
        let native = framebuffer.and_then(|f| self.framebuffers.get(f.0));
        unsafe {
            self.gl
                .bind_framebuffer(gl_framebuffer_target(target), native)
        };
    }

    fn framebuffer_texture_2d(
        &mut self,
        attachment: Attachment,
        target: ImageTarget,
        texture: Option<TextureId>,
        level: u32,
    ) {
        let native = self.texture(texture);
        unsafe {
            self.gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                gl_attachment(attachment),
                gl_image_target(target),
                native,
                level as i32,
            )
        };
    }

    fn framebuffer_texture_layer(
        &mut self,
        attachment: Attachment,
        texture: Option<TextureId>,
        level: u32,
        layer: u32,
    ) {
        let native = self.texture(texture);
        unsafe {
            self.gl.framebuffer_texture_layer(
                glow::FRAMEBUFFER,
                gl_attachment(attachment),
                native,
                level as i32,
                layer as i32,
            )
        };
    }

    fn create_renderbuffer(&mut self) -> Result<RenderbufferId, RenderError> {
        let renderbuffer = unsafe { self.gl.create_renderbuffer() }.map_err(RenderError::Backend)?;
        Ok(RenderbufferId(self.renderbuffers.insert(renderbuffer)))
    }

    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferId) {
        if let Some(native) = self.renderbuffers.remove(renderbuffer.0) {
            unsafe { self.gl.delete_renderbuffer(native) };
        }
    }

    fn bind_renderbuffer(&mut self, renderbuffer: Option<RenderbufferId>) {
        let native = renderbuffer.and_then(|r| self.renderbuffers.get(r.0));
        unsafe { self.gl.bind_renderbuffer(glow::RENDERBUFFER, native) };
    }

    fn renderbuffer_storage(
        &mut self,
        internal: InternalFormat,
        samples: u32,
        width: u32,
        height: u32,
    ) {
        let format = gl_internal_format(internal);
        unsafe {
            if samples > 0 {
                self.gl.renderbuffer_storage_multisample(
                    glow::RENDERBUFFER,
                    samples as i32,
                    format,
                    width as i32,
                    height as i32,
                )
            } else {
                self.gl
                    .renderbuffer_storage(glow::RENDERBUFFER, format, width as i32, height as i32)
            }
        }
    }

    fn framebuffer_renderbuffer(&mut self, attachment: Attachment, renderbuffer: Option<RenderbufferId>) {
        let native = renderbuffer.and_then(|r| self.renderbuffers.get(r.0));
        unsafe {
            self.gl.framebuffer_renderbuffer(
                glow::FRAMEBUFFER,
                gl_attachment(attachment),
                glow::RENDERBUFFER,
                native,
            )
        };
    }

    fn draw_buffers(&mut self, color_attachments: u32) {
        let buffers: Vec<u32> = (0..color_attachments)
            .map(|i| glow::COLOR_ATTACHMENT0 + i)
            .collect();
        unsafe { self.gl.draw_buffers(&buffers) };
    }

    fn blit_framebuffer(&mut self, src: Rect, dst: Rect, mask: ClearFlags, linear: bool) {
        let filter = if linear { glow::LINEAR } else { glow::NEAREST };
        unsafe {
            self.gl.blit_framebuffer(
                src.x,
                src.y,
                src.x + src.width,
                src.y + src.height,
                dst.x,
                dst.y,
                dst.x + dst.width,
                dst.y + dst.height,
                gl_clear_mask(mask),
                filter,
            )
        };
    }

    fn read_pixels(&mut self, rect: Rect, format: PixelFormat, data_type: DataType, out: &mut [u8]) {
        unsafe {
            self.gl.read_pixels(
                rect.x,
                rect.y,
                rect.width,
                rect.height,
                gl_pixel_format(format),
                gl_data_type(data_type),
                glow::PixelPackData::Slice(Some(out)),
            )
        };
    }

    fn draw_arrays(&mut self, mode: PrimitiveMode, first: i32, count: i32) {
        unsafe { self.gl.draw_arrays(gl_mode(mode), first, count) };
    }

    fn draw_elements(&mut self, mode: PrimitiveMode, count: i32, index_type: IndexType, offset: i32) {
        unsafe {
            self.gl
                .draw_elements(gl_mode(mode), count, gl_index_type(index_type), offset)
        };
    }

    fn draw_arrays_instanced(&mut self, mode: PrimitiveMode, first: i32, count: i32, instances: i32) {
        unsafe {
            self.gl
                .draw_arrays_instanced(gl_mode(mode), first, count, instances)
        };
    }

    fn draw_elements_instanced(
        &mut self,
        mode: PrimitiveMode,
        count: i32,
        index_type: IndexType,
        offset: i32,
        instances: i32,
    ) {
        unsafe {
            self.gl.draw_elements_instanced(
                gl_mode(mode),
                count,
                gl_index_type(index_type),
                offset,
                instances,
            )
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_reuse_freed_ids() {
        let mut slots = Slots::new();
        let a = slots.insert(10u8);
        let b = slots.insert(20u8);
        assert_eq!(slots.remove(a), Some(10));
        assert_eq!(slots.get(a), None);
        let c = slots.insert(30u8);
        assert_eq!(c, a);
        assert_eq!(slots.get(b), Some(20));
    }

    #[test]
    fn clear_mask_combines_bits() {
        let mask = gl_clear_mask(ClearFlags::COLOR | ClearFlags::DEPTH);
        assert_eq!(mask, glow::COLOR_BUFFER_BIT | glow::DEPTH_BUFFER_BIT);
    }

    #[test]
    fn cube_faces_map_to_consecutive_targets() {
        assert_eq!(
            gl_image_target(ImageTarget::CubeFace(5)),
            glow::TEXTURE_CUBE_MAP_NEGATIVE_Z
        );
    }
}
