// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::time::{Duration, Instant};

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}

/// Wall-clock frame timing: per-frame delta plus time since start.
#[derive(Debug)]
pub struct FrameClock {
    start: Instant,
    last: Instant,
    dt: f32,
    frames: u32,
    fps_window: Instant,
}

impl FrameClock {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last: now,
            dt: 0.0,
            frames: 0,
            fps_window: now,
        }
    }

    /// Advance to `now`. Returns the delta in seconds.
    pub fn tick_at(&mut self, now: Instant) -> f32 {
        self.dt = now.saturating_duration_since(self.last).as_secs_f32();
        self.last = now;
        self.frames = self.frames.saturating_add(1);
        self.dt
    }

    pub fn tick(&mut self) -> f32 {
        self.tick_at(Instant::now())
    }

    pub fn dt(&self) -> f32 {
        self.dt
    }

    pub fn elapsed(&self) -> f32 {
        self.last.saturating_duration_since(self.start).as_secs_f32()
    }

    /// Frames counted since the last report, once at least a second has passed.
    pub fn take_fps(&mut self) -> Option<u32> {
        if self.last.saturating_duration_since(self.fps_window) < Duration::from_secs(1) {
            return None;
        }
        let n = self.frames;
        self.frames = 0;
        self.fps_window = self.last;
        Some(n)
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_reports_delta_between_calls() {
        let mut clock = FrameClock::new();
        let t0 = clock.last;
        let dt = clock.tick_at(t0 + Duration::from_millis(250));
        assert!((dt - 0.25).abs() < 1e-4);
        assert!((clock.elapsed() - 0.25).abs() < 1e-4);
    }

    #[test]
    fn fps_is_reported_once_per_second() {
        let mut clock = FrameClock::new();
        let t0 = clock.last;
        for i in 1..=10 {
            clock.tick_at(t0 + Duration::from_millis(50 * i));
        }
        assert_eq!(clock.take_fps(), None);
        clock.tick_at(t0 + Duration::from_millis(1100));
        assert_eq!(clock.take_fps(), Some(11));
        assert_eq!(clock.take_fps(), None);
    }

    #[test]
    fn init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
    }
}
