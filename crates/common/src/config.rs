//! Recording session configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RecordError, RecordResult};
use crate::types::{Resolution, SharedContextHandle};

/// Fractional crop applied to the captured surface before encoding.
///
/// Each field is the fraction of the source removed from that edge.
/// Valid values lie in `[0, 1)` and opposing edges must leave a
/// non-empty remainder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropRect {
    pub top: f32,
    pub bottom: f32,
    pub left: f32,
    pub right: f32,
}

impl CropRect {
    pub const NONE: Self = Self {
        top: 0.0,
        bottom: 0.0,
        left: 0.0,
        right: 0.0,
    };

    pub fn validate(&self) -> RecordResult<()> {
        let edges = [
            ("top", self.top),
            ("bottom", self.bottom),
            ("left", self.left),
            ("right", self.right),
        ];
        for (name, v) in edges {
            if !(0.0..1.0).contains(&v) || !v.is_finite() {
                return Err(RecordError::Configuration(format!(
                    "crop {name} must be in [0, 1), got {v}"
                )));
            }
        }
        if self.top + self.bottom >= 1.0 {
            return Err(RecordError::Configuration(format!(
                "vertical crop consumes the whole frame: top {} + bottom {}",
                self.top, self.bottom
            )));
        }
        if self.left + self.right >= 1.0 {
            return Err(RecordError::Configuration(format!(
                "horizontal crop consumes the whole frame: left {} + right {}",
                self.left, self.right
            )));
        }
        Ok(())
    }

    /// Fraction of the width that survives cropping.
    pub fn width_scale(&self) -> f32 {
        1.0 - self.left - self.right
    }

    /// Fraction of the height that survives cropping.
    pub fn height_scale(&self) -> f32 {
        1.0 - self.top - self.bottom
    }
}

impl Default for CropRect {
    fn default() -> Self {
        Self::NONE
    }
}

/// Audio leg of a recording, present only when audio capture is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioEncoderConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for AudioEncoderConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 1,
        }
    }
}

/// Everything a recording session needs up front.
#[derive(Debug, Clone)]
pub struct RecordingConfig {
    /// Destination MP4 path.
    pub output_path: PathBuf,
    /// Requested capture size before crop and ladder selection.
    pub width: u32,
    pub height: u32,
    /// Fractional crop applied to the capture.
    pub crop: CropRect,
    /// Video bit rate in bits per second.
    pub bit_rate: u32,
    /// Context to share render resources with, if any.
    pub shared_context: Option<SharedContextHandle>,
    /// `Some` turns the audio track on.
    pub audio: Option<AudioEncoderConfig>,
    /// Draw the watermark overlay pass on every frame.
    pub overlay_enabled: bool,
    /// Delay between session start and the first rendered frame.
    pub start_delay: Duration,
    /// Bounds of the display the capture must fit strictly inside.
    pub display_bounds: Resolution,
}

impl RecordingConfig {
    pub fn validate(&self) -> RecordResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(RecordError::Configuration(format!(
                "capture size must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if self.bit_rate == 0 {
            return Err(RecordError::Configuration(
                "bit rate must be non-zero".into(),
            ));
        }
        if self.display_bounds.width == 0 || self.display_bounds.height == 0 {
            return Err(RecordError::Configuration(
                "display bounds must be non-zero".into(),
            ));
        }
        self.crop.validate()
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> RecordingConfig {
        RecordingConfig {
            output_path: PathBuf::from("/tmp/out.mp4"),
            width: 1080,
            height: 1920,
            crop: CropRect::NONE,
            bit_rate: 4_000_000,
            shared_context: None,
            audio: None,
            overlay_enabled: false,
            start_delay: Duration::ZERO,
            display_bounds: Resolution::new(1080, 1920),
        }
    }

    #[test]
    fn valid_config_passes() {
        base_config().validate().unwrap();
    }

    #[test]
    fn crop_edge_out_of_range_rejected() {
        let crop = CropRect {
            top: 1.0,
            ..CropRect::NONE
        };
        assert!(crop.validate().is_err());
        let crop = CropRect {
            left: -0.1,
            ..CropRect::NONE
        };
        assert!(crop.validate().is_err());
    }

    #[test]
    fn crop_consuming_whole_axis_rejected() {
        let crop = CropRect {
            top: 0.6,
            bottom: 0.5,
            ..CropRect::NONE
        };
        assert!(crop.validate().is_err());
        let crop = CropRect {
            left: 0.5,
            right: 0.5,
            ..CropRect::NONE
        };
        assert!(crop.validate().is_err());
    }

    #[test]
    fn crop_scales() {
        let crop = CropRect {
            top: 0.1,
            bottom: 0.2,
            left: 0.25,
            right: 0.25,
        };
        crop.validate().unwrap();
        assert!((crop.height_scale() - 0.7).abs() < 1e-6);
        assert!((crop.width_scale() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn zero_dimensions_rejected() {
        let mut cfg = base_config();
        cfg.width = 0;
        assert!(cfg.validate().is_err());
        let mut cfg = base_config();
        cfg.bit_rate = 0;
        assert!(cfg.validate().is_err());
    }
}
