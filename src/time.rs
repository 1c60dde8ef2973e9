pub use instant::Instant;

use std::time::Duration;

/// Frame clock: delta since the previous tick plus a smoothed frames-per-second value.
#[derive(Debug, Clone)]
pub struct FrameTimer {
    start: Instant,
    last: Instant,
    frames: u64,
    fps: f64,
    /// Longest delta handed out, so a stall does not fling animations.
    max_delta: Duration,
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameTimer {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last: now,
            frames: 0,
            fps: 0.0,
            max_delta: Duration::from_millis(100),
        }
    }

    pub fn with_max_delta(mut self, max_delta: Duration) -> Self {
        self.max_delta = max_delta;
        self
    }

    /// Seconds since the previous call, clamped to the max delta.
    pub fn tick(&mut self) -> f64 {
        let now = Instant::now();
        let delta = now.duration_since(self.last).min(self.max_delta);
        self.last = now;
        self.frames += 1;

        let seconds = delta.as_secs_f64();
        if seconds > 0.0 {
            let instant_fps = 1.0 / seconds;
            self.fps = if self.fps == 0.0 {
                instant_fps
            } else {
                self.fps * 0.9 + instant_fps * 0.1
            };
        }
        seconds
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_are_clamped_and_counted() {
        let mut timer = FrameTimer::new().with_max_delta(Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(20));
        let dt = timer.tick();
        assert!(dt <= 0.005 + 1e-9);
        assert_eq!(timer.frames(), 1);
        assert!(timer.fps() > 0.0);
    }
}
