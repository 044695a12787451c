//! Frame throughput metering.

use std::time::{Duration, Instant};

use tracing::info;

/// Totals reported when a session ends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    pub frames: u64,
    pub elapsed: Duration,
    pub fps: f64,
}

/// Counts rendered frames between start and report.
#[derive(Debug, Default)]
pub struct FrameMeter {
    started: Option<Instant>,
    frames: u64,
}

impl FrameMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        self.started = Some(Instant::now());
        self.frames = 0;
    }

    pub fn frame(&mut self) {
        self.frames += 1;
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Log and return the totals. `None` if metering never started.
    pub fn report(&mut self) -> Option<FrameStats> {
        let started = self.started.take()?;
        let elapsed = started.elapsed();
        let secs = elapsed.as_secs_f64();
        let fps = if secs > 0.0 {
            self.frames as f64 / secs
        } else {
            0.0
        };
        let stats = FrameStats {
            frames: self.frames,
            elapsed,
            fps,
        };
        info!(frames = stats.frames, fps, ?elapsed, "session throughput");
        Some(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_frames_between_start_and_report() {
        let mut meter = FrameMeter::new();
        meter.start();
        for _ in 0..10 {
            meter.frame();
        }
        let stats = meter.report().unwrap();
        assert_eq!(stats.frames, 10);
        assert!(stats.fps >= 0.0);
    }

    #[test]
    fn report_without_start_is_none() {
        let mut meter = FrameMeter::new();
        meter.frame();
        assert!(meter.report().is_none());
    }

    #[test]
    fn start_resets_count() {
        let mut meter = FrameMeter::new();
        meter.start();
        meter.frame();
        meter.start();
        assert_eq!(meter.frames(), 0);
    }
}
