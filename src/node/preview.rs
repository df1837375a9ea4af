// SPDX-License-Identifier: GPL-3.0-or-later
//! The preview loop: capture, transform, encode, send, repeat at the
//! target frame rate until told to stop or until too many consecutive
//! errors accumulate.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::ImageEncoder;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use crate::node::arbiter::{Arbiter, FrameSink};
use crate::sensor::Sensor;
use crate::transform;

/// Practical cap for a preview frame so it fits comfortably in one UDP
/// datagram.
const SIZE_CAP_BYTES: usize = 60_000;
/// Fallback encoder quality used for a single re-encode attempt when the
/// first pass exceeds [`SIZE_CAP_BYTES`].
const FALLBACK_QUALITY: u8 = 50;
/// Consecutive send failures tolerated before the loop gives up and lets
/// the arbiter fall back to `Idle`.
const MAX_CONSECUTIVE_ERRORS: u32 = 10;

#[instrument(skip_all)]
pub(crate) async fn run<S: Sensor + 'static>(
    arbiter: Arc<Arbiter<S>>,
    sink: Arc<dyn FrameSink>,
    mut stop_rx: mpsc::Receiver<()>,
) {
    let mut consecutive_errors: u32 = 0;

    loop {
        if stop_rx.try_recv().is_ok() {
            debug!("preview loop received stop signal");
            return;
        }

        match run_iteration(&arbiter, sink.as_ref()).await {
            Ok(target_interval) => {
                consecutive_errors = 0;
                tokio::select! {
                    _ = tokio::time::sleep(target_interval) => {}
                    _ = stop_rx.recv() => {
                        debug!("preview loop received stop signal mid-sleep");
                        return;
                    }
                }
            }
            Err(e) => {
                consecutive_errors += 1;
                warn!(error = %e, consecutive_errors, "preview iteration failed");
                if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    warn!("too many consecutive preview errors, stopping preview loop");
                    return;
                }
            }
        }
    }
}

async fn run_iteration<S: Sensor + 'static>(
    arbiter: &Arc<Arbiter<S>>,
    sink: &dyn FrameSink,
) -> anyhow::Result<Duration> {
    let settings = arbiter.settings_snapshot().await;
    let frame = arbiter.capture_preview_frame().await?;
    let transformed = transform::transform(&frame, &settings);

    let mut encoded = encode_jpeg(&transformed, settings.jpeg_quality)?;
    if encoded.len() > SIZE_CAP_BYTES {
        debug!(
            size = encoded.len(),
            "preview frame exceeded size cap, re-encoding at fallback quality"
        );
        encoded = encode_jpeg(&transformed, FALLBACK_QUALITY)?;
    }

    sink.send_frame(&encoded)?;

    let fps = settings.fps.max(1);
    Ok(Duration::from_secs_f64(1.0 / fps as f64))
}

fn encode_jpeg(frame: &image::RgbImage, quality: u8) -> anyhow::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(Cursor::new(&mut buffer), quality).write_image(
        frame.as_raw(),
        frame.width(),
        frame.height(),
        image::ExtendedColorType::Rgb8,
    )?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::DeviceSettings;
    use image::RgbImage;

    #[test]
    fn encoding_a_tiny_frame_stays_well_under_the_size_cap() {
        let frame = RgbImage::from_pixel(16, 16, image::Rgb([10, 20, 30]));
        let encoded = encode_jpeg(&frame, DeviceSettings::default().jpeg_quality).unwrap();
        assert!(encoded.len() < SIZE_CAP_BYTES);
        assert!(!encoded.is_empty());
    }

    #[test]
    fn fallback_quality_produces_a_smaller_or_equal_encoding() {
        let frame = RgbImage::from_fn(200, 200, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        });
        let high = encode_jpeg(&frame, 95).unwrap();
        let low = encode_jpeg(&frame, FALLBACK_QUALITY).unwrap();
        assert!(low.len() <= high.len());
    }
}
