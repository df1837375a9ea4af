// SPDX-License-Identifier: GPL-3.0-or-later
//! The still-capture protocol: run the arbiter's capture transition,
//! transform for still quality, and upload over TCP with a small retry
//! budget.

use std::io::Cursor;
use std::net::SocketAddr;
use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::ImageEncoder;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{info, instrument, warn};

use crate::error::NodeError;
use crate::node::arbiter::Arbiter;
use crate::sensor::Sensor;
use crate::transform;

/// Quality floor for the still encoder.
const STILL_JPEG_QUALITY: u8 = 95;
const UPLOAD_RETRIES: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Run the full still-capture-and-upload protocol against `controller`.
#[instrument(skip(arbiter))]
pub async fn capture_and_upload<S: Sensor + 'static>(
    arbiter: &std::sync::Arc<Arbiter<S>>,
    controller: SocketAddr,
) -> Result<(), NodeError> {
    let capture = arbiter.capture_still().await?;
    let transformed = transform::transform_for_still(&capture.frame, &capture.settings);
    let encoded = encode_still(&transformed)
        .map_err(|e| NodeError::UploadFailed(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

    upload_with_retry(controller, &encoded).await
}

fn encode_still(frame: &image::RgbImage) -> anyhow::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(Cursor::new(&mut buffer), STILL_JPEG_QUALITY).write_image(
        frame.as_raw(),
        frame.width(),
        frame.height(),
        image::ExtendedColorType::Rgb8,
    )?;
    Ok(buffer)
}

async fn upload_with_retry(controller: SocketAddr, body: &[u8]) -> Result<(), NodeError> {
    let mut last_error = None;
    for attempt in 0..=UPLOAD_RETRIES {
        match upload_once(controller, body).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(attempt, error = %e, "still upload attempt failed");
                last_error = Some(e);
                if attempt < UPLOAD_RETRIES {
                    tokio::time::sleep(RETRY_BACKOFF * (attempt + 1)).await;
                }
            }
        }
    }
    Err(NodeError::UploadFailed(last_error.unwrap()))
}

async fn upload_once(controller: SocketAddr, body: &[u8]) -> std::io::Result<()> {
    let mut stream = TcpStream::connect(controller).await?;
    stream.write_all(body).await?;
    stream.shutdown().await?;
    info!(bytes = body.len(), "still image uploaded");
    Ok(())
}
