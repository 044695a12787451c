//! Core value types used across the recording pipeline.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// A pixel resolution (width, height).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width / height as a float. Returns 0.0 for a degenerate height.
    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            0.0
        } else {
            self.width as f64 / self.height as f64
        }
    }

    /// True when the longer edge runs vertically.
    pub fn is_portrait(&self) -> bool {
        self.height > self.width
    }

    pub const fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A presentation timestamp in nanoseconds.
///
/// Frame timestamps arrive from the render surface in nanoseconds and
/// are converted to [`PtsMicros`] at the container boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PtsNanos(pub i64);

impl PtsNanos {
    pub const ZERO: Self = Self(0);

    pub fn as_micros(&self) -> PtsMicros {
        PtsMicros(self.0 / 1_000)
    }
}

/// A presentation timestamp in microseconds, the muxer's native unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PtsMicros(pub i64);

impl PtsMicros {
    pub const ZERO: Self = Self(0);

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    pub fn saturating_sub(&self, other: PtsMicros) -> PtsMicros {
        PtsMicros(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for PtsMicros {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}

/// Opaque identifier for a GPU texture owned by the caller's renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextureId(pub u32);

/// A 4x4 column-major texture coordinate transform, as produced by the
/// capture surface for each frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureTransform(pub [f32; 16]);

impl TextureTransform {
    pub const IDENTITY: Self = Self([
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]);
}

impl Default for TextureTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Opaque handle to a graphics context that render resources can be
/// shared with. Carried by the migration command so a rebuilt renderer
/// can join a new context's share group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SharedContextHandle(pub u64);

/// Wall-clock session timebase.
///
/// Encoded samples are stamped with the time they leave the encoder,
/// not the time they entered it. The clock hands out monotonic
/// microseconds/nanoseconds since its creation; the muxer rebases all
/// tracks to the first written sample.
#[derive(Debug, Clone)]
pub struct SessionClock {
    origin: Instant,
}

impl SessionClock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now_micros(&self) -> PtsMicros {
        PtsMicros(self.origin.elapsed().as_micros() as i64)
    }

    pub fn now_nanos(&self) -> PtsNanos {
        PtsNanos(self.origin.elapsed().as_nanos() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_display_and_ratio() {
        let r = Resolution::new(1920, 1080);
        assert_eq!(r.to_string(), "1920x1080");
        assert!((r.aspect_ratio() - 16.0 / 9.0).abs() < 1e-9);
        assert!(!r.is_portrait());
        assert!(Resolution::new(1080, 1920).is_portrait());
    }

    #[test]
    fn degenerate_resolution_ratio_is_zero() {
        assert_eq!(Resolution::new(100, 0).aspect_ratio(), 0.0);
    }

    #[test]
    fn nanos_truncate_to_micros() {
        assert_eq!(PtsNanos(1_999).as_micros(), PtsMicros(1));
        assert_eq!(PtsNanos(2_000).as_micros(), PtsMicros(2));
    }

    #[test]
    fn session_clock_is_monotonic() {
        let clock = SessionClock::start();
        let a = clock.now_micros();
        let b = clock.now_micros();
        assert!(b.0 >= a.0);
    }
}
