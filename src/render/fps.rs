//! Frame rate measurement
//!
//! Samples elapsed time per window of frames and yields an estimated
//! frames-per-second. Diagnostic only; never feeds back into the
//! pipeline.

use std::time::Instant;

/// Number of frames between fps reports
const DEFAULT_WINDOW: u32 = 20;

/// Windowed fps estimator
#[derive(Debug)]
pub struct FpsMeasurer {
    window: u32,
    count: u32,
    window_start: Instant,
}

impl FpsMeasurer {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    pub fn with_window(window: u32) -> Self {
        Self {
            window: window.max(1),
            count: 0,
            window_start: Instant::now(),
        }
    }

    /// Record one frame; returns an fps estimate every `window` frames.
    pub fn tick(&mut self) -> Option<f32> {
        self.count += 1;
        if self.count < self.window {
            return None;
        }
        let elapsed = self.window_start.elapsed().as_secs_f32();
        let fps = if elapsed > 0.0 {
            self.count as f32 / elapsed
        } else {
            0.0
        };
        self.count = 0;
        self.window_start = Instant::now();
        Some(fps)
    }
}

impl Default for FpsMeasurer {
    fn default() -> Self {
        Self::new()
    }
}
