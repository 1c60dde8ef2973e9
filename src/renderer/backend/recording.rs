use std::collections::{HashMap, HashSet};

use glam::{Mat4, Vec3};

use super::introspect;
use super::*;
use crate::error::RenderError;

/// Snapshot of the pipeline at the moment a draw was issued.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub mode: PrimitiveMode,
    pub first: i32,
    pub count: i32,
    pub indexed: bool,
    pub instances: Option<i32>,
    pub program: Option<ProgramId>,
    pub framebuffer: Option<FramebufferId>,
    pub viewport: Rect,
    /// Value of the `modelMatrix` uniform of the bound program, if it has one.
    pub model_matrix: Option<Mat4>,
}

impl DrawRecord {
    pub fn translation(&self) -> Option<Vec3> {
        self.model_matrix.map(|m| m.w_axis.truncate())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateBuffer(BufferId),
    DeleteBuffer(BufferId),
    BindBuffer(BufferTarget, Option<BufferId>),
    BufferData {
        target: BufferTarget,
        len: usize,
        usage: BufferUsage,
    },
    BufferSubData {
        target: BufferTarget,
        offset: usize,
        len: usize,
    },
    CreateTexture(TextureId),
    DeleteTexture(TextureId),
    ActiveTexture(u32),
    BindTexture(TextureTarget, Option<TextureId>),
    PixelStore(PixelStore),
    TexImage2D {
        target: ImageTarget,
        level: u32,
        format: TexelFormat,
        width: u32,
        height: u32,
        has_data: bool,
    },
    TexImage3D {
        target: TextureTarget,
        level: u32,
        format: TexelFormat,
        width: u32,
        height: u32,
        depth: u32,
    },
    CompressedTexImage2D {
        target: ImageTarget,
        level: u32,
        width: u32,
        height: u32,
        len: usize,
    },
    TexParameter(TextureTarget, TexParam),
    GenerateMipmap(TextureTarget),
    CompileShader(ShaderId, ShaderKind),
    DeleteShader(ShaderId),
    LinkProgram(ProgramId),
    DeleteProgram(ProgramId),
    UseProgram(Option<ProgramId>),
    Uniform(UniformLocationId, UniformValue),
    EnableVertexAttrib(u32),
    DisableVertexAttrib(u32),
    VertexAttribPointer {
        index: u32,
        size: i32,
        data_type: DataType,
        normalized: bool,
        stride: i32,
        offset: i32,
    },
    VertexAttribDivisor(u32, u32),
    VertexAttrib4f(u32, [f32; 4]),
    Enable(EnableCap),
    Disable(EnableCap),
    BlendEquation(BlendEquation, BlendEquation),
    BlendFunc(BlendFactor, BlendFactor, BlendFactor, BlendFactor),
    BlendColor([f32; 4]),
    DepthFunc(CompareFunc),
    DepthMask(bool),
    ColorMask([bool; 4]),
    StencilFunc(CompareFunc, i32, u32),
    StencilOp(StencilOp, StencilOp, StencilOp),
    StencilMask(u32),
    CullFace(CullFaceMode),
    FrontFace(FrontFace),
    PolygonOffset(f32, f32),
    LineWidth(f32),
    Viewport(Rect),
    Scissor(Rect),
    ClearColor([f32; 4]),
    ClearDepth(f32),
    ClearStencil(i32),
    Clear(ClearFlags),
    CreateFramebuffer(FramebufferId),
    DeleteFramebuffer(FramebufferId),
    BindFramebuffer(FramebufferTarget, Option<FramebufferId>),
    FramebufferTexture2D {
        attachment: Attachment,
        target: ImageTarget,
        texture: Option<TextureId>,
        level: u32,
    },
    FramebufferTextureLayer {
        attachment: Attachment,
        texture: Option<TextureId>,
        level: u32,
        layer: u32,
    },
    CreateRenderbuffer(RenderbufferId),
    DeleteRenderbuffer(RenderbufferId),
    BindRenderbuffer(Option<RenderbufferId>),
    RenderbufferStorage {
        internal: InternalFormat,
        samples: u32,
        width: u32,
        height: u32,
    },
    FramebufferRenderbuffer(Attachment, Option<RenderbufferId>),
    DrawBuffers(u32),
    BlitFramebuffer {
        src: Rect,
        dst: Rect,
        mask: ClearFlags,
    },
    ReadPixels(Rect),
    Draw(DrawRecord),
}

struct ShaderRecord {
    kind: ShaderKind,
    source: String,
    failure: Option<String>,
}

struct ProgramRecord {
    vertex: String,
    fragment: String,
    uniforms: Vec<ActiveVariable>,
    attributes: Vec<ActiveVariable>,
}

/// In-memory implementation of [`Backend`] that records every call.
///
/// Shader sources are reflected at the source level so uniform tables and attribute
/// layouts behave like a driver's. Compilation can be forced to fail for sources that
/// contain a marker string.
pub struct RecordingBackend {
    calls: Vec<Call>,
    capabilities: Capabilities,
    next_id: u32,
    shaders: HashMap<ShaderId, ShaderRecord>,
    programs: HashMap<ProgramId, ProgramRecord>,
    locations: HashMap<(ProgramId, String), UniformLocationId>,
    location_names: HashMap<UniformLocationId, (ProgramId, String)>,
    uniform_values: HashMap<UniformLocationId, UniformValue>,
    live_textures: HashSet<TextureId>,
    live_buffers: HashSet<BufferId>,
    current_program: Option<ProgramId>,
    draw_framebuffer: Option<FramebufferId>,
    viewport: Rect,
    clear_color: [f32; 4],
    fail_markers: Vec<String>,
    context_lost: bool,
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new(Capabilities::default())
    }
}

impl RecordingBackend {
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            calls: Vec::new(),
            capabilities,
            next_id: 1,
            shaders: HashMap::new(),
            programs: HashMap::new(),
            locations: HashMap::new(),
            location_names: HashMap::new(),
            uniform_values: HashMap::new(),
            live_textures: HashSet::new(),
            live_buffers: HashSet::new(),
            current_program: None,
            draw_framebuffer: None,
            viewport: Rect::default(),
            clear_color: [0.0; 4],
            fail_markers: Vec::new(),
            context_lost: false,
        }
    }

    /// Any shader whose source contains `marker` fails to compile.
    pub fn fail_compile_containing(&mut self, marker: impl Into<String>) {
        self.fail_markers.push(marker.into());
    }

    pub fn set_context_lost(&mut self, lost: bool) {
        self.context_lost = lost;
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| predicate(c)).count()
    }

    pub fn draws(&self) -> Vec<&DrawRecord> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::Draw(record) => Some(record),
                _ => None,
            })
            .collect()
    }

    /// Name of the uniform behind `location`, for asserting on `Call::Uniform` entries.
    pub fn uniform_name(&self, location: UniformLocationId) -> Option<&str> {
        self.location_names
            .get(&location)
            .map(|(_, name)| name.as_str())
    }

    pub fn program_sources(&self, program: ProgramId) -> Option<(&str, &str)> {
        self.programs
            .get(&program)
            .map(|p| (p.vertex.as_str(), p.fragment.as_str()))
    }

    pub fn live_program_count(&self) -> usize {
        self.programs.len()
    }

    pub fn live_texture_count(&self) -> usize {
        self.live_textures.len()
    }

    pub fn live_buffer_count(&self) -> usize {
        self.live_buffers.len()
    }

    fn next(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn bound_model_matrix(&self) -> Option<Mat4> {
        let program = self.current_program?;
        let location = self.locations.get(&(program, "modelMatrix".to_string()))?;
        match self.uniform_values.get(location)? {
            UniformValue::Mat4(m) => Some(Mat4::from_cols_array(m)),
            _ => None,
        }
    }

    fn record_draw(
        &mut self,
        mode: PrimitiveMode,
        first: i32,
        count: i32,
        indexed: bool,
        instances: Option<i32>,
    ) {
        let record = DrawRecord {
            mode,
            first,
            count,
            indexed,
            instances,
            program: self.current_program,
            framebuffer: self.draw_framebuffer,
            viewport: self.viewport,
            model_matrix: self.bound_model_matrix(),
        };
        self.calls.push(Call::Draw(record));
    }
}

fn forced_failure(source: &str, markers: &[String]) -> Option<String> {
    markers.iter().find_map(|marker| {
        source.lines().enumerate().find_map(|(index, line)| {
            line.contains(marker.as_str())
                .then(|| format!("ERROR: 0:{}: '{}' : forced failure", index + 1, marker))
        })
    })
}

impl Backend for RecordingBackend {
    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn is_context_lost(&mut self) -> bool {
        self.context_lost
    }

    fn create_buffer(&mut self) -> Result<BufferId, RenderError> {
        let id = BufferId(self.next());
        self.live_buffers.insert(id);
        self.calls.push(Call::CreateBuffer(id));
        Ok(id)
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        self.live_buffers.remove(&buffer);
        self.calls.push(Call::DeleteBuffer(buffer));
    }

    fn bind_buffer(&mut self, target: BufferTarget, buffer: Option<BufferId>) {
        self.calls.push(Call::BindBuffer(target, buffer));
    }

    fn buffer_data(&mut self, target: BufferTarget, data: &[u8], usage: BufferUsage) {
        self.calls.push(Call::BufferData {
            target,
            len: data.len(),
            usage,
        });
    }

    fn buffer_sub_data(&mut self, target: BufferTarget, offset: usize, data: &[u8]) {
        self.calls.push(Call::BufferSubData {
            target,
            offset,
            len: data.len(),
        });
    }

    fn create_texture(&mut self) -> Result<TextureId, RenderError> {
        let id = TextureId(self.next());
        self.live_textures.insert(id);
        self.calls.push(Call::CreateTexture(id));
        Ok(id)
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.live_textures.remove(&texture);
        self.calls.push(Call::DeleteTexture(texture));
    }

    fn active_texture(&mut self, unit: u32) {
        self.calls.push(Call::ActiveTexture(unit));
    }

    fn bind_texture(&mut self, target: TextureTarget, texture: Option<TextureId>) {
        self.calls.push(Call::BindTexture(target, texture));
    }

    fn pixel_store(&mut self, param: PixelStore) {
        self.calls.push(Call::PixelStore(param));
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
        self.calls.push(Call::TexImage2D {
            target,
            level,
            format,
            width,
            height,
            has_data: data.is_some(),
        });
    }

    fn tex_image_3d(
        &mut self,
        target: TextureTarget,
        level: u32,
        format: TexelFormat,
        width: u32,
        height: u32,
        depth: u32,
        _data: Option<&[u8]>,
    ) {
        self.calls.push(Call::TexImage3D {
            target,
            level,
            format,
            width,
            height,
            depth,
        });
    }

    fn compressed_tex_image_2d(
        &mut self,
        target: ImageTarget,
        level: u32,
        _internal: InternalFormat,
        width: u32,
        height: u32,
        data: &[u8],
    ) {
        self.calls.push(Call::CompressedTexImage2D {
            target,
            level,
            width,
            height,
            len: data.len(),
        });
    }

    fn tex_parameter(&mut self, target: TextureTarget, param: TexParam) {
        self.calls.push(Call::TexParameter(target, param));
    }

    fn generate_mipmap(&mut self, target: TextureTarget) {
        self.calls.push(Call::GenerateMipmap(target));
    }

    fn create_shader(&mut self, kind: ShaderKind, source: &str) -> Result<ShaderId, RenderError> {
        let id = ShaderId(self.next());
        let failure = forced_failure(source, &self.fail_markers);
        self.shaders.insert(
            id,
            ShaderRecord {
                kind,
                source: source.to_string(),
                failure,
            },
        );
        self.calls.push(Call::CompileShader(id, kind));
        Ok(id)
    }

    fn shader_compile_status(&mut self, shader: ShaderId) -> bool {
        self.shaders
            .get(&shader)
            .map(|s| s.failure.is_none())
            .unwrap_or(false)
    }

    fn shader_info_log(&mut self, shader: ShaderId) -> String {
        self.shaders
            .get(&shader)
            .and_then(|s| s.failure.clone())
            .unwrap_or_default()
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        self.shaders.remove(&shader);
        self.calls.push(Call::DeleteShader(shader));
    }

    fn create_program(
        &mut self,
        vertex: ShaderId,
        fragment: ShaderId,
    ) -> Result<ProgramId, RenderError> {
        let (Some(vs), Some(fs)) = (self.shaders.get(&vertex), self.shaders.get(&fragment)) else {
            return Err(RenderError::backend("program references an unknown shader"));
        };
        debug_assert_eq!(vs.kind, ShaderKind::Vertex);
        debug_assert_eq!(fs.kind, ShaderKind::Fragment);
        let record = ProgramRecord {
            uniforms: introspect::uniforms(&[&vs.source, &fs.source]),
            attributes: introspect::attributes(&vs.source),
            vertex: vs.source.clone(),
            fragment: fs.source.clone(),
        };
        let id = ProgramId(self.next());
        self.programs.insert(id, record);
        self.calls.push(Call::LinkProgram(id));
        Ok(id)
    }

    fn program_link_status(&mut self, program: ProgramId) -> bool {
        self.programs.contains_key(&program)
    }

    fn program_info_log(&mut self, _program: ProgramId) -> String {
        String::new()
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
        self.locations.retain(|(p, _), _| *p != program);
        if self.current_program == Some(program) {
            self.current_program = None;
        }
        self.calls.push(Call::DeleteProgram(program));
    }

    fn use_program(&mut self, program: Option<ProgramId>) {
        self.current_program = program;
        self.calls.push(Call::UseProgram(program));
    }

    fn active_uniforms(&mut self, program: ProgramId) -> Vec<ActiveVariable> {
        self.programs
            .get(&program)
            .map(|p| p.uniforms.clone())
            .unwrap_or_default()
    }

    fn active_attributes(&mut self, program: ProgramId) -> Vec<ActiveVariable> {
        self.programs
            .get(&program)
            .map(|p| p.attributes.clone())
            .unwrap_or_default()
    }

    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<UniformLocationId> {
        let record = self.programs.get(&program)?;
        let canonical = record
            .uniforms
            .iter()
            .find(|v| v.name == name || v.name.strip_suffix("[0]") == Some(name))?
            .name
            .clone();
        if let Some(location) = self.locations.get(&(program, canonical.clone())) {
            return Some(*location);
        }
        let location = UniformLocationId(self.next());
        self.locations.insert((program, canonical.clone()), location);
        self.location_names.insert(location, (program, canonical));
        Some(location)
    }

    fn attrib_location(&mut self, program: ProgramId, name: &str) -> Option<u32> {
        let record = self.programs.get(&program)?;
        let mut location = 0;
        for attribute in &record.attributes {
            if attribute.name == name {
                return Some(location);
            }
            location += attribute.ty.location_span();
        }
        None
    }

    fn set_uniform(&mut self, location: UniformLocationId, value: &UniformValue) {
        self.uniform_values.insert(location, value.clone());
        self.calls.push(Call::Uniform(location, value.clone()));
    }

    fn enable_vertex_attrib(&mut self, index: u32) {
        self.calls.push(Call::EnableVertexAttrib(index));
    }

    fn disable_vertex_attrib(&mut self, index: u32) {
        self.calls.push(Call::DisableVertexAttrib(index));
    }

    fn vertex_attrib_pointer(
        &mut self,
        index: u32,
        size: i32,
        data_type: DataType,
        normalized: bool,
        stride: i32,
        offset: i32,
        _integer: bool,
    ) {
        self.calls.push(Call::VertexAttribPointer {
            index,
            size,
            data_type,
            normalized,
            stride,
            offset,
        });
    }

    fn vertex_attrib_divisor(&mut self, index: u32, divisor: u32) {
        self.calls.push(Call::VertexAttribDivisor(index, divisor));
    }

    fn vertex_attrib_4f(&mut self, index: u32, value: [f32; 4]) {
        self.calls.push(Call::VertexAttrib4f(index, value));
    }

    fn enable(&mut self, cap: EnableCap) {
        self.calls.push(Call::Enable(cap));
    }

    fn disable(&mut self, cap: EnableCap) {
        self.calls.push(Call::Disable(cap));
    }

    fn blend_equation_separate(&mut self, rgb: BlendEquation, alpha: BlendEquation) {
        self.calls.push(Call::BlendEquation(rgb, alpha));
    }

    fn blend_func_separate(
        &mut self,
        src_rgb: BlendFactor,
        dst_rgb: BlendFactor,
        src_alpha: BlendFactor,
        dst_alpha: BlendFactor,
    ) {
        self.calls
            .push(Call::BlendFunc(src_rgb, dst_rgb, src_alpha, dst_alpha));
    }

    fn blend_color(&mut self, color: [f32; 4]) {
        self.calls.push(Call::BlendColor(color));
    }

    fn depth_func(&mut self, func: CompareFunc) {
        self.calls.push(Call::DepthFunc(func));
    }

    fn depth_mask(&mut self, write: bool) {
        self.calls.push(Call::DepthMask(write));
    }

    fn color_mask(&mut self, mask: [bool; 4]) {
        self.calls.push(Call::ColorMask(mask));
    }

    fn stencil_func(&mut self, func: CompareFunc, reference: i32, mask: u32) {
        self.calls.push(Call::StencilFunc(func, reference, mask));
    }

    fn stencil_op(&mut self, fail: StencilOp, depth_fail: StencilOp, pass: StencilOp) {
        self.calls.push(Call::StencilOp(fail, depth_fail, pass));
    }

    fn stencil_mask(&mut self, mask: u32) {
        self.calls.push(Call::StencilMask(mask));
    }

    fn cull_face(&mut self, mode: CullFaceMode) {
        self.calls.push(Call::CullFace(mode));
    }

    fn front_face(&mut self, face: FrontFace) {
        self.calls.push(Call::FrontFace(face));
    }

    fn polygon_offset(&mut self, factor: f32, units: f32) {
        self.calls.push(Call::PolygonOffset(factor, units));
    }

    fn line_width(&mut self, width: f32) {
        self.calls.push(Call::LineWidth(width));
    }

    fn viewport(&mut self, rect: Rect) {
        self.viewport = rect;
        self.calls.push(Call::Viewport(rect));
    }

    fn scissor(&mut self, rect: Rect) {
        self.calls.push(Call::Scissor(rect));
    }

    fn clear_color(&mut self, color: [f32; 4]) {
        self.clear_color = color;
        self.calls.push(Call::ClearColor(color));
    }

    fn clear_depth(&mut self, depth: f32) {
        self.calls.push(Call::ClearDepth(depth));
    }

    fn clear_stencil(&mut self, stencil: i32) {
        self.calls.push(Call::ClearStencil(stencil));
    }

    fn clear(&mut self, flags: ClearFlags) {
        self.calls.push(Call::Clear(flags));
    }

    fn create_framebuffer(&mut self) -> Result<FramebufferId, RenderError> {
        let id = FramebufferId(self.next());
        self.calls.push(Call::CreateFramebuffer(id));
        Ok(id)
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        if self.draw_framebuffer == Some(framebuffer) {
            self.draw_framebuffer = None;
        }
        self.calls.push(Call::DeleteFramebuffer(framebuffer));
    }

    fn bind_framebuffer(&mut self, target: FramebufferTarget, framebuffer: Option<FramebufferId>) {
        if target != FramebufferTarget::Read {
            self.draw_framebuffer = framebuffer;
        }
        self.calls.push(Call::BindFramebuffer(target, framebuffer));
    }

    fn framebuffer_texture_2d(
        &mut self,
        attachment: Attachment,
        target: ImageTarget,
        texture: Option<TextureId>,
        level: u32,
    ) {
        self.calls.push(Call::FramebufferTexture2D {
            attachment,
            target,
            texture,
            level,
        });
    }

    fn framebuffer_texture_layer(
        &mut self,
        attachment: Attachment,
        texture: Option<TextureId>,
        level: u32,
        layer: u32,
    ) {
        self.calls.push(Call::FramebufferTextureLayer {
            attachment,
            texture,
            level,
            layer,
        });
    }

    fn create_renderbuffer(&mut self) -> Result<RenderbufferId, RenderError> {
        let id = RenderbufferId(self.next());
        self.calls.push(Call::CreateRenderbuffer(id));
        Ok(id)
    }

    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferId) {
        self.calls.push(Call::DeleteRenderbuffer(renderbuffer));
    }

    fn bind_renderbuffer(&mut self, renderbuffer: Option<RenderbufferId>) {
        self.calls.push(Call::BindRenderbuffer(renderbuffer));
    }

    fn renderbuffer_storage(
        &mut self,
        internal: InternalFormat,
        samples: u32,
        width: u32,
        height: u32,
    ) {
        self.calls.push(Call::RenderbufferStorage {
            internal,
            samples,
            width,
            height,
        });
    }

    fn framebuffer_renderbuffer(&mut self, attachment: Attachment, renderbuffer: Option<RenderbufferId>) {
        self.calls
            .push(Call::FramebufferRenderbuffer(attachment, renderbuffer));
    }

    fn draw_buffers(&mut self, color_attachments: u32) {
        self.calls.push(Call::DrawBuffers(color_attachments));
    }

    fn blit_framebuffer(&mut self, src: Rect, dst: Rect, mask: ClearFlags, _linear: bool) {
        self.calls.push(Call::BlitFramebuffer { src, dst, mask });
    }

    fn read_pixels(&mut self, rect: Rect, _format: PixelFormat, _data_type: DataType, out: &mut [u8]) {
        let texel = self.clear_color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = texel[i % 4];
        }
        self.calls.push(Call::ReadPixels(rect));
    }

    fn draw_arrays(&mut self, mode: PrimitiveMode, first: i32, count: i32) {
        self.record_draw(mode, first, count, false, None);
    }

    fn draw_elements(&mut self, mode: PrimitiveMode, count: i32, index_type: IndexType, offset: i32) {
        self.record_draw(mode, offset / index_type.size() as i32, count, true, None);
    }

    fn draw_arrays_instanced(&mut self, mode: PrimitiveMode, first: i32, count: i32, instances: i32) {
        self.record_draw(mode, first, count, false, Some(instances));
    }

    fn draw_elements_instanced(
        &mut self,
        mode: PrimitiveMode,
        count: i32,
        index_type: IndexType,
        offset: i32,
        instances: i32,
    ) {
        self.record_draw(
            mode,
            offset / index_type.size() as i32,
            count,
            true,
            Some(instances),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VS: &str = "#version 300 es\nuniform mat4 modelMatrix;\nin vec3 position;\nin mat4 instanceMatrix;\nin vec3 normal;\nvoid main() {}\n";
    const FS: &str = "#version 300 es\nprecision highp float;\nuniform vec3 diffuse;\nout vec4 color;\nvoid main() {}\n";

    fn link(backend: &mut RecordingBackend) -> ProgramId {
        let vs = backend.create_shader(ShaderKind::Vertex, VS).unwrap();
        let fs = backend.create_shader(ShaderKind::Fragment, FS).unwrap();
        backend.create_program(vs, fs).unwrap()
    }

    #[test]
    fn reflects_uniforms_from_both_stages() {
        let mut backend = RecordingBackend::default();
        let program = link(&mut backend);
        let names: Vec<String> = backend
            .active_uniforms(program)
            .into_iter()
            .map(|v| v.name)
            .collect();
        assert_eq!(names, vec!["modelMatrix", "diffuse"]);
    }

    #[test]
    fn matrix_inputs_span_locations() {
        let mut backend = RecordingBackend::default();
        let program = link(&mut backend);
        assert_eq!(backend.attrib_location(program, "position"), Some(0));
        assert_eq!(backend.attrib_location(program, "instanceMatrix"), Some(1));
        assert_eq!(backend.attrib_location(program, "normal"), Some(5));
    }

    #[test]
    fn draw_captures_model_matrix() {
        let mut backend = RecordingBackend::default();
        let program = link(&mut backend);
        backend.use_program(Some(program));
        let location = backend.uniform_location(program, "modelMatrix").unwrap();
        let model = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        backend.set_uniform(location, &UniformValue::Mat4(model.to_cols_array()));
        backend.draw_arrays(PrimitiveMode::Triangles, 0, 3);

        let draws = backend.draws();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].translation(), Some(Vec3::new(1.0, 2.0, 3.0)));
        assert_eq!(draws[0].program, Some(program));
    }

    #[test]
    fn marker_forces_compile_failure() {
        let mut backend = RecordingBackend::default();
        backend.fail_compile_containing("diffuse");
        let fs = backend.create_shader(ShaderKind::Fragment, FS).unwrap();
        assert!(!backend.shader_compile_status(fs));
        assert!(backend.shader_info_log(fs).starts_with("ERROR: 0:3:"));
    }
}
