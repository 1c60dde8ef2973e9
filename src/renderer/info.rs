use crate::renderer::backend::PrimitiveMode;

/// Errors recorded while rendering; `render()` never returns them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ErrorCounts {
    pub resource: u32,
    pub compile: u32,
    pub capability: u32,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RenderInfo {
    /// Frames rendered since the renderer was created.
    pub frame: u64,
    pub calls: u32,
    pub triangles: u64,
    pub lines: u64,
    pub points: u64,
    pub shadow_calls: u32,
    /// Live programs.
    pub programs: usize,
    /// Geometries with GPU buffers.
    pub geometries: usize,
    /// Live backend textures.
    pub textures: usize,
    pub errors: ErrorCounts,
    /// Clear the per-frame counters at the start of every `render`.
    pub auto_reset: bool,
}

impl RenderInfo {
    pub fn new() -> Self {
        Self {
            auto_reset: true,
            ..Default::default()
        }
    }

    /// Clears per-frame counters; the frame number and memory counts survive.
    pub fn reset(&mut self) {
        self.calls = 0;
        self.triangles = 0;
        self.lines = 0;
        self.points = 0;
        self.shadow_calls = 0;
        self.errors = ErrorCounts::default();
    }

    /// Accounts one draw of `count` vertices (times `instances`).
    pub fn update(&mut self, count: u32, mode: PrimitiveMode, instances: u32) {
        self.calls += 1;
        let count = count as u64 * instances.max(1) as u64;
        match mode {
            PrimitiveMode::Triangles => self.triangles += count / 3,
            PrimitiveMode::TriangleStrip => self.triangles += count.saturating_sub(2),
            PrimitiveMode::Lines => self.lines += count / 2,
            PrimitiveMode::LineStrip => self.lines += count.saturating_sub(1),
            PrimitiveMode::LineLoop => self.lines += count,
            PrimitiveMode::Points => self.points += count,
        }
    }

    pub fn total_primitives(&self) -> u64 {
        self.triangles + self.lines + self.points
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_primitives_per_mode() {
        let mut info = RenderInfo::new();
        info.update(36, PrimitiveMode::Triangles, 1);
        info.update(6, PrimitiveMode::Triangles, 10);
        info.update(4, PrimitiveMode::LineStrip, 1);
        info.update(5, PrimitiveMode::Points, 1);
        assert_eq!(info.calls, 4);
        assert_eq!(info.triangles, 12 + 20);
        assert_eq!(info.lines, 3);
        assert_eq!(info.points, 5);
        info.reset();
        assert_eq!(info.calls, 0);
        assert_eq!(info.total_primitives(), 0);
    }
}
