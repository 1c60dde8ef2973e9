//! Shadow copy of the backend's global state.
//!
//! Every setter compares against the last value it applied and only talks to the
//! backend when something changed. A `None` cache entry means "unknown", so the next
//! setter always issues its call.

use std::collections::HashMap;

use crate::renderer::backend::{
    Backend, BlendEquation, BlendFactor, CompareFunc, CullFaceMode, EnableCap, FramebufferId,
    FramebufferTarget, FrontFace, ProgramId, Rect, StencilOp, TextureId, TextureTarget,
};
use crate::renderer::material::{Blending, Material, Side, StencilState};

type BlendFuncs = (BlendFactor, BlendFactor, BlendFactor, BlendFactor);

#[derive(Debug, Default)]
pub struct StateCache {
    enabled: HashMap<EnableCap, bool>,
    program: Option<Option<ProgramId>>,
    blend_equation: Option<(BlendEquation, BlendEquation)>,
    blend_funcs: Option<BlendFuncs>,
    blend_color: Option<[f32; 4]>,
    depth_func: Option<CompareFunc>,
    depth_mask: Option<bool>,
    color_mask: Option<[bool; 4]>,
    stencil_func: Option<(CompareFunc, i32, u32)>,
    stencil_op: Option<(StencilOp, StencilOp, StencilOp)>,
    stencil_mask: Option<u32>,
    cull_face: Option<CullFaceMode>,
    front_face: Option<FrontFace>,
    polygon_offset: Option<(f32, f32)>,
    line_width: Option<f32>,
    viewport: Option<Rect>,
    scissor: Option<Rect>,
    clear_color: Option<[f32; 4]>,
    clear_depth: Option<f32>,
    clear_stencil: Option<i32>,
    active_unit: Option<u32>,
    textures: HashMap<u32, (TextureTarget, Option<TextureId>)>,
    framebuffers: HashMap<FramebufferTarget, Option<FramebufferId>>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn set_enabled(&mut self, backend: &mut dyn Backend, cap: EnableCap, on: bool) {
        if self.enabled.get(&cap) == Some(&on) {
            return;
        }
        if on {
            backend.enable(cap);
        } else {
            backend.disable(cap);
        }
        self.enabled.insert(cap, on);
    }

    pub fn is_enabled(&self, cap: EnableCap) -> Option<bool> {
        self.enabled.get(&cap).copied()
    }

    pub fn set_blending(&mut self, backend: &mut dyn Backend, blending: Blending, premultiplied: bool) {
        use BlendFactor::*;

        if blending == Blending::None {
            self.set_enabled(backend, EnableCap::Blend, false);
            return;
        }
        self.set_enabled(backend, EnableCap::Blend, true);

        let (equation, funcs) = match blending {
            Blending::Custom {
                equation,
                alpha_equation,
                src,
                dst,
                src_alpha,
                dst_alpha,
            } => ((equation, alpha_equation), (src, dst, src_alpha, dst_alpha)),
            Blending::Normal if premultiplied => {
                (Self::ADD, (One, OneMinusSrcAlpha, One, OneMinusSrcAlpha))
            }
            Blending::Normal => (Self::ADD, (SrcAlpha, OneMinusSrcAlpha, One, OneMinusSrcAlpha)),
            Blending::Additive if premultiplied => (Self::ADD, (One, One, One, One)),
            Blending::Additive => (Self::ADD, (SrcAlpha, One, SrcAlpha, One)),
            Blending::Subtractive if premultiplied => {
                (Self::ADD, (Zero, OneMinusSrcColor, Zero, One))
            }
            Blending::Subtractive => (Self::ADD, (Zero, OneMinusSrcColor, Zero, OneMinusSrcColor)),
            Blending::Multiply if premultiplied => (Self::ADD, (Zero, SrcColor, Zero, SrcAlpha)),
            Blending::Multiply => (Self::ADD, (Zero, SrcColor, Zero, SrcColor)),
            Blending::None => return,
        };

        if self.blend_equation != Some(equation) {
            backend.blend_equation_separate(equation.0, equation.1);
            self.blend_equation = Some(equation);
        }
        if self.blend_funcs != Some(funcs) {
            backend.blend_func_separate(funcs.0, funcs.1, funcs.2, funcs.3);
            self.blend_funcs = Some(funcs);
        }
    }

    const ADD: (BlendEquation, BlendEquation) = (BlendEquation::Add, BlendEquation::Add);

    pub fn set_blend_color(&mut self, backend: &mut dyn Backend, color: [f32; 4]) {
        if self.blend_color != Some(color) {
            backend.blend_color(color);
            self.blend_color = Some(color);
        }
    }

    /// Applies all fixed-function state of `material` drawn with `side` (which may
    /// differ from `material.side` for shadow and two-pass rendering).
    pub fn set_material(
        &mut self,
        backend: &mut dyn Backend,
        material: &Material,
        side: Side,
        front_face_cw: bool,
    ) {
        if side == Side::Double {
            self.set_cull_face(backend, None);
        } else {
            self.set_cull_face(backend, Some(CullFaceMode::Back));
        }
        let flip = (side == Side::Back) != front_face_cw;
        self.set_flip_sided(backend, flip);

        if material.blending == Blending::Normal && !material.transparent {
            self.set_blending(backend, Blending::None, false);
        } else {
            self.set_blending(backend, material.blending, material.premultiplied_alpha);
        }

        self.set_depth_func(backend, material.depth_func);
        self.set_depth_test(backend, material.depth_test);
        self.set_depth_mask(backend, material.depth_write);
        self.set_color_mask(backend, [material.color_write; 4]);

        match material.stencil {
            Some(stencil) => self.set_stencil(backend, &stencil),
            None => self.set_stencil_test(backend, false),
        }

        self.set_polygon_offset(backend, material.polygon_offset);
        self.set_enabled(
            backend,
            EnableCap::SampleAlphaToCoverage,
            material.alpha_to_coverage,
        );
    }

    pub fn set_flip_sided(&mut self, backend: &mut dyn Backend, flip: bool) {
        let face = if flip { FrontFace::Cw } else { FrontFace::Ccw };
        if self.front_face != Some(face) {
            backend.front_face(face);
            self.front_face = Some(face);
        }
    }

    /// `None` disables culling.
    pub fn set_cull_face(&mut self, backend: &mut dyn Backend, mode: Option<CullFaceMode>) {
        match mode {
            Some(mode) => {
                self.set_enabled(backend, EnableCap::CullFace, true);
                if self.cull_face != Some(mode) {
                    backend.cull_face(mode);
                    self.cull_face = Some(mode);
                }
            }
            None => self.set_enabled(backend, EnableCap::CullFace, false),
        }
    }

    pub fn set_depth_test(&mut self, backend: &mut dyn Backend, on: bool) {
        self.set_enabled(backend, EnableCap::DepthTest, on);
    }

    pub fn set_depth_func(&mut self, backend: &mut dyn Backend, func: CompareFunc) {
        if self.depth_func != Some(func) {
            backend.depth_func(func);
            self.depth_func = Some(func);
        }
    }

    pub fn set_depth_mask(&mut self, backend: &mut dyn Backend, write: bool) {
        if self.depth_mask != Some(write) {
            backend.depth_mask(write);
            self.depth_mask = Some(write);
        }
    }

    pub fn set_color_mask(&mut self, backend: &mut dyn Backend, mask: [bool; 4]) {
        if self.color_mask != Some(mask) {
            backend.color_mask(mask);
            self.color_mask = Some(mask);
        }
    }

    pub fn set_stencil_test(&mut self, backend: &mut dyn Backend, on: bool) {
        self.set_enabled(backend, EnableCap::StencilTest, on);
    }

    pub fn set_stencil_func(&mut self, backend: &mut dyn Backend, func: CompareFunc, reference: i32, mask: u32) {
        let value = (func, reference, mask);
        if self.stencil_func != Some(value) {
            backend.stencil_func(func, reference, mask);
            self.stencil_func = Some(value);
        }
    }

    pub fn set_stencil_op(&mut self, backend: &mut dyn Backend, fail: StencilOp, z_fail: StencilOp, z_pass: StencilOp) {
        let value = (fail, z_fail, z_pass);
        if self.stencil_op != Some(value) {
            backend.stencil_op(fail, z_fail, z_pass);
            self.stencil_op = Some(value);
        }
    }

    pub fn set_stencil_mask(&mut self, backend: &mut dyn Backend, mask: u32) {
        if self.stencil_mask != Some(mask) {
            backend.stencil_mask(mask);
            self.stencil_mask = Some(mask);
        }
    }

    fn set_stencil(&mut self, backend: &mut dyn Backend, stencil: &StencilState) {
        self.set_stencil_test(backend, true);
        self.set_stencil_mask(backend, stencil.write_mask);
        self.set_stencil_func(backend, stencil.func, stencil.reference, stencil.func_mask);
        self.set_stencil_op(backend, stencil.fail, stencil.z_fail, stencil.z_pass);
    }

    /// `Some((factor, units))` enables polygon offset.
    pub fn set_polygon_offset(&mut self, backend: &mut dyn Backend, offset: Option<(f32, f32)>) {
        match offset {
            Some(value) => {
                self.set_enabled(backend, EnableCap::PolygonOffsetFill, true);
                if self.polygon_offset != Some(value) {
                    backend.polygon_offset(value.0, value.1);
                    self.polygon_offset = Some(value);
                }
            }
            None => self.set_enabled(backend, EnableCap::PolygonOffsetFill, false),
        }
    }

    pub fn set_line_width(&mut self, backend: &mut dyn Backend, width: f32) {
        if self.line_width != Some(width) {
            backend.line_width(width);
            self.line_width = Some(width);
        }
    }

    pub fn set_scissor_test(&mut self, backend: &mut dyn Backend, on: bool) {
        self.set_enabled(backend, EnableCap::ScissorTest, on);
    }

    pub fn set_dithering(&mut self, backend: &mut dyn Backend, on: bool) {
        self.set_enabled(backend, EnableCap::Dither, on);
    }

    /// Returns true when the program actually changed.
    pub fn use_program(&mut self, backend: &mut dyn Backend, program: Option<ProgramId>) -> bool {
        if self.program == Some(program) {
            return false;
        }
        backend.use_program(program);
        self.program = Some(program);
        true
    }

    pub fn current_program(&self) -> Option<ProgramId> {
        self.program.flatten()
    }

    pub fn bind_texture(
        &mut self,
        backend: &mut dyn Backend,
        unit: u32,
        target: TextureTarget,
        texture: Option<TextureId>,
    ) {
        if self.textures.get(&unit) == Some(&(target, texture)) {
            return;
        }
        self.active_texture(backend, unit);
        backend.bind_texture(target, texture);
        self.textures.insert(unit, (target, texture));
    }

    /// Selects `unit` for texture uploads that bind outside of `bind_texture`.
    pub fn active_texture(&mut self, backend: &mut dyn Backend, unit: u32) {
        if self.active_unit != Some(unit) {
            backend.active_texture(unit);
            self.active_unit = Some(unit);
        }
    }

    /// Forgets bindings of a deleted texture so a reused id is rebound.
    pub fn forget_texture(&mut self, texture: TextureId) {
        self.textures.retain(|_, (_, bound)| *bound != Some(texture));
    }

    pub fn forget_program(&mut self, program: ProgramId) {
        if self.program == Some(Some(program)) {
            self.program = None;
        }
    }

    /// Returns true when the binding changed.
    pub fn bind_framebuffer(
        &mut self,
        backend: &mut dyn Backend,
        target: FramebufferTarget,
        framebuffer: Option<FramebufferId>,
    ) -> bool {
        if self.framebuffers.get(&target) == Some(&framebuffer) {
            return false;
        }
        backend.bind_framebuffer(target, framebuffer);
        if target == FramebufferTarget::Framebuffer {
            // Binding FRAMEBUFFER binds both draw and read.
            self.framebuffers.insert(FramebufferTarget::Draw, framebuffer);
            self.framebuffers.insert(FramebufferTarget::Read, framebuffer);
        } else {
            self.framebuffers.remove(&FramebufferTarget::Framebuffer);
        }
        self.framebuffers.insert(target, framebuffer);
        true
    }

    pub fn forget_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.framebuffers.retain(|_, bound| *bound != Some(framebuffer));
    }

    pub fn bound_framebuffer(&self) -> Option<FramebufferId> {
        self.framebuffers
            .get(&FramebufferTarget::Draw)
            .copied()
            .flatten()
    }

    pub fn set_viewport(&mut self, backend: &mut dyn Backend, rect: Rect) {
        if self.viewport != Some(rect) {
            backend.viewport(rect);
            self.viewport = Some(rect);
        }
    }

    pub fn viewport(&self) -> Option<Rect> {
        self.viewport
    }

    pub fn set_scissor(&mut self, backend: &mut dyn Backend, rect: Rect) {
        if self.scissor != Some(rect) {
            backend.scissor(rect);
            self.scissor = Some(rect);
        }
    }

    pub fn set_clear_color(&mut self, backend: &mut dyn Backend, color: [f32; 4]) {
        if self.clear_color != Some(color) {
            backend.clear_color(color);
            self.clear_color = Some(color);
        }
    }

    pub fn set_clear_depth(&mut self, backend: &mut dyn Backend, depth: f32) {
        if self.clear_depth != Some(depth) {
            backend.clear_depth(depth);
            self.clear_depth = Some(depth);
        }
    }

    pub fn set_clear_stencil(&mut self, backend: &mut dyn Backend, stencil: i32) {
        if self.clear_stencil != Some(stencil) {
            backend.clear_stencil(stencil);
            self.clear_stencil = Some(stencil);
        }
    }

    /// Puts the backend into its default state and drops every cached value.
    pub fn reset(&mut self, backend: &mut dyn Backend) {
        for cap in [
            EnableCap::Blend,
            EnableCap::CullFace,
            EnableCap::DepthTest,
            EnableCap::PolygonOffsetFill,
            EnableCap::SampleAlphaToCoverage,
            EnableCap::ScissorTest,
            EnableCap::StencilTest,
        ] {
            backend.disable(cap);
        }
        backend.blend_equation_separate(BlendEquation::Add, BlendEquation::Add);
        backend.blend_func_separate(
            BlendFactor::One,
            BlendFactor::Zero,
            BlendFactor::One,
            BlendFactor::Zero,
        );
        backend.depth_func(CompareFunc::Less);
        backend.depth_mask(true);
        backend.color_mask([true; 4]);
        backend.stencil_mask(0xffff_ffff);
        backend.stencil_func(CompareFunc::Always, 0, 0xffff_ffff);
        backend.stencil_op(StencilOp::Keep, StencilOp::Keep, StencilOp::Keep);
        backend.cull_face(CullFaceMode::Back);
        backend.front_face(FrontFace::Ccw);
        backend.polygon_offset(0.0, 0.0);
        backend.clear_color([0.0; 4]);
        backend.clear_depth(1.0);
        backend.clear_stencil(0);
        backend.active_texture(0);
        backend.use_program(None);
        backend.bind_framebuffer(FramebufferTarget::Framebuffer, None);

        *self = Self::default();
        log::debug!("GPU state cache reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::{Call, RecordingBackend};
    use glam::Vec3;

    #[test]
    fn blending_none_is_issued_once() {
        let mut backend = RecordingBackend::default();
        let mut state = StateCache::new();
        state.set_blending(&mut backend, Blending::None, false);
        state.set_blending(&mut backend, Blending::None, false);
        assert_eq!(backend.calls(), &[Call::Disable(EnableCap::Blend)]);
    }

    #[test]
    fn normal_blending_uses_alpha_factors() {
        let mut backend = RecordingBackend::default();
        let mut state = StateCache::new();
        state.set_blending(&mut backend, Blending::Normal, false);
        assert!(backend.calls().contains(&Call::BlendFunc(
            BlendFactor::SrcAlpha,
            BlendFactor::OneMinusSrcAlpha,
            BlendFactor::One,
            BlendFactor::OneMinusSrcAlpha,
        )));
        backend.clear_calls();
        state.set_blending(&mut backend, Blending::Normal, false);
        assert!(backend.calls().is_empty());
        state.set_blending(&mut backend, Blending::Normal, true);
        assert_eq!(backend.calls().len(), 1);
    }

    #[test]
    fn opaque_material_disables_blending_and_culls_back() {
        let mut backend = RecordingBackend::default();
        let mut state = StateCache::new();
        let material = Material::basic(Vec3::ONE);
        state.set_material(&mut backend, &material, material.side, false);
        assert_eq!(state.is_enabled(EnableCap::Blend), Some(false));
        assert_eq!(state.is_enabled(EnableCap::CullFace), Some(true));
        backend.clear_calls();
        state.set_material(&mut backend, &material, material.side, false);
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn back_side_flips_front_face() {
        let mut backend = RecordingBackend::default();
        let mut state = StateCache::new();
        state.set_flip_sided(&mut backend, false);
        let material = Material::basic(Vec3::ONE).with_side(Side::Back);
        backend.clear_calls();
        state.set_material(&mut backend, &material, Side::Back, false);
        assert!(backend.calls().contains(&Call::FrontFace(FrontFace::Cw)));
    }

    #[test]
    fn texture_binds_are_deduplicated_per_unit() {
        let mut backend = RecordingBackend::default();
        let mut state = StateCache::new();
        let tex = Some(TextureId(7));
        state.bind_texture(&mut backend, 0, TextureTarget::Texture2D, tex);
        state.bind_texture(&mut backend, 0, TextureTarget::Texture2D, tex);
        state.bind_texture(&mut backend, 1, TextureTarget::Texture2D, tex);
        let binds = backend
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::BindTexture(..)))
            .count();
        assert_eq!(binds, 2);
    }

    #[test]
    fn reset_forgets_cached_values() {
        let mut backend = RecordingBackend::default();
        let mut state = StateCache::new();
        state.set_depth_mask(&mut backend, false);
        state.reset(&mut backend);
        backend.clear_calls();
        state.set_depth_mask(&mut backend, true);
        assert_eq!(backend.calls(), &[Call::DepthMask(true)]);
    }
}
