//! Capture-size selection.
//!
//! Hardware codecs fail to open above device-dependent limits, so
//! session setup walks a fixed ladder of long-edge sizes, keeps the
//! source aspect ratio, and takes the first candidate that both fits
//! strictly inside the display and yields a working device.

use tracing::{debug, warn};

use sr_common::{CropRect, RecordError, RecordResult, Resolution};

use crate::device::{VideoDeviceFactory, VideoEncoderDevice, VideoFormat, FRAME_RATE, IFRAME_INTERVAL};

/// Long-edge candidates, largest first.
pub const RESOLUTION_LADDER: [u32; 6] = [1920, 1440, 1280, 720, 640, 320];

/// Round down to even. Codecs require even dimensions.
pub fn even_floor(n: u32) -> u32 {
    n & !1
}

/// Apply the crop fractions to the requested capture size. A scaled
/// dimension that lands odd is bumped up by one.
pub fn cropped_target(width: u32, height: u32, crop: CropRect) -> Resolution {
    let scale_dim = |dim: u32, scale: f32| -> u32 {
        let mut scaled = (dim as f32 * scale) as u32;
        if scaled % 2 == 1 {
            scaled += 1;
        }
        scaled
    };
    Resolution::new(
        scale_dim(width, crop.width_scale()),
        scale_dim(height, crop.height_scale()),
    )
}

/// Walk the ladder and create the first video device that fits.
///
/// For each candidate long edge the short edge follows the target's
/// aspect ratio. A candidate is viable only if both dimensions are
/// strictly smaller than the display bounds; a viable candidate whose
/// device creation fails falls through to the next size.
pub fn select_video_device(
    factory: &dyn VideoDeviceFactory,
    target: Resolution,
    display: Resolution,
    bit_rate: u32,
) -> RecordResult<(Box<dyn VideoEncoderDevice>, Resolution)> {
    if target.width == 0 || target.height == 0 {
        return Err(RecordError::Configuration(format!(
            "degenerate capture target {target}"
        )));
    }
    let ratio = target.width as f64 / target.height as f64;

    for &candidate in &RESOLUTION_LADDER {
        let height = (candidate as f64 / ratio) as u32;
        if !(candidate < display.width && height < display.height) {
            continue;
        }
        let resolution = Resolution::new(even_floor(candidate), even_floor(height));
        let format = VideoFormat {
            resolution,
            bit_rate,
            frame_rate: FRAME_RATE,
            iframe_interval: IFRAME_INTERVAL,
        };
        match factory.create(&format) {
            Ok(device) => {
                debug!(%resolution, candidate, "video device created");
                return Ok((device, resolution));
            }
            Err(e) => {
                warn!(%resolution, error = %e, "device creation failed, trying next size");
            }
        }
    }

    Err(RecordError::Configuration(format!(
        "no encodable resolution for target {target} within display {display}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackVideoFactory;

    #[test]
    fn even_floor_drops_odd_bit() {
        assert_eq!(even_floor(1281), 1280);
        assert_eq!(even_floor(1280), 1280);
        assert_eq!(even_floor(0), 0);
    }

    #[test]
    fn crop_scales_and_bumps_odd_up() {
        let crop = CropRect {
            top: 0.1,
            bottom: 0.0,
            left: 0.0,
            right: 0.0,
        };
        // 1920 * 0.9 = 1728 (even, kept); 1081 * 1.0 = 1081 -> 1082.
        let r = cropped_target(1081, 1920, crop);
        assert_eq!(r.width, 1082);
        assert_eq!(r.height, 1728);
    }

    #[test]
    fn no_crop_is_identity_for_even_sizes() {
        let r = cropped_target(1080, 1920, CropRect::NONE);
        assert_eq!(r, Resolution::new(1080, 1920));
    }

    #[test]
    fn portrait_display_selects_720_wide() {
        let factory = LoopbackVideoFactory::default();
        let (_, resolution) = select_video_device(
            &factory,
            Resolution::new(1080, 1920),
            Resolution::new(1080, 1920),
            4_000_000,
        )
        .unwrap();
        // 1920/1440/1280 are not strictly under the 1080 display
        // width; 720 at 9:16 gives 720x1280.
        assert_eq!(resolution, Resolution::new(720, 1280));
    }

    #[test]
    fn landscape_display_selects_1440_wide() {
        let factory = LoopbackVideoFactory::default();
        let (_, resolution) = select_video_device(
            &factory,
            Resolution::new(1600, 900),
            Resolution::new(1920, 1080),
            4_000_000,
        )
        .unwrap();
        // 1920 fails the strict bound; 1440 at 16:9 gives 1440x810.
        assert_eq!(resolution, Resolution::new(1440, 810));
    }

    #[test]
    fn creation_failure_falls_down_the_ladder() {
        let factory = LoopbackVideoFactory {
            max_pixels: Some(1_000_000),
        };
        let (_, resolution) = select_video_device(
            &factory,
            Resolution::new(1080, 1920),
            Resolution::new(2000, 4000),
            4_000_000,
        )
        .unwrap();
        // Candidates down through 1280 wide exceed the pixel cap;
        // 720x1280 (921,600 px) is the first one the codec accepts.
        assert_eq!(resolution, Resolution::new(720, 1280));
    }

    #[test]
    fn tiny_display_exhausts_ladder() {
        let factory = LoopbackVideoFactory::default();
        let err = select_video_device(
            &factory,
            Resolution::new(1080, 1920),
            Resolution::new(100, 100),
            4_000_000,
        )
        .err()
        .unwrap();
        assert!(matches!(err, RecordError::Configuration(_)));
    }

    #[test]
    fn odd_ladder_height_is_floored_even() {
        let factory = LoopbackVideoFactory::default();
        let (_, resolution) = select_video_device(
            &factory,
            Resolution::new(1080, 1920),
            Resolution::new(2000, 4000),
            4_000_000,
        )
        .unwrap();
        // 1920 long edge: height 1920/0.5625 = 3413 -> floored to 3412.
        assert_eq!(resolution, Resolution::new(1920, 3412));
    }
}
