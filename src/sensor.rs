//! The sensor driver interface (real hardware access is out of scope
//! beyond this trait boundary) and a [`MockSensor`] standing in for it in
//! tests.

use image::RgbImage;

use crate::settings::Resolution;

/// Which of the two configurations the camera arbiter can put the sensor
/// into. Only one can be active at a time; see the arbiter state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureMode {
    /// Low-latency preview: the configured `resolution`, tuned for
    /// throughput over fidelity.
    Video,
    /// One-shot full-resolution still capture.
    Still,
}

/// The subset of [`crate::settings::DeviceSettings`] that maps onto sensor
/// controls, as opposed to pure frame transforms.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SensorControls {
    pub brightness: i32,
    pub contrast: i32,
    pub saturation: i32,
    pub iso: i32,
    pub white_balance: crate::settings::WhiteBalance,
    pub fps: u32,
}

impl From<&crate::settings::DeviceSettings> for SensorControls {
    fn from(settings: &crate::settings::DeviceSettings) -> Self {
        Self {
            brightness: settings.brightness,
            contrast: settings.contrast,
            saturation: settings.saturation,
            iso: settings.iso,
            white_balance: settings.white_balance,
            fps: settings.fps,
        }
    }
}

/// The operations the camera arbiter needs from the underlying camera
/// sensor. A real implementation is out of scope for this crate; the
/// arbiter only ever touches the sensor through this trait, which is the
/// single-writer boundary the whole capture protocol depends on.
pub trait Sensor: Send {
    /// Configure the sensor for video or still capture at the given
    /// resolution and controls. May be called while stopped.
    fn configure(
        &mut self,
        mode: CaptureMode,
        resolution: Resolution,
        controls: SensorControls,
    ) -> anyhow::Result<()>;

    /// Start the sensor streaming frames internally (capture_frame may
    /// still block until one is ready).
    fn start(&mut self) -> anyhow::Result<()>;

    /// Block until a frame is available and return it.
    fn capture_frame(&mut self) -> anyhow::Result<RgbImage>;

    /// Stop the sensor. Idempotent.
    fn stop(&mut self) -> anyhow::Result<()>;
}

/// A sensor standing in for real hardware in tests: synthesizes a
/// deterministic, resolution-sized frame on every [`Sensor::capture_frame`]
/// call, and can be told to fail its next N captures to exercise
/// [`crate::error::NodeError::SensorFault`] handling.
pub struct MockSensor {
    mode: CaptureMode,
    resolution: Resolution,
    running: bool,
    frame_counter: u64,
    fail_next: u32,
}

impl Default for MockSensor {
    fn default() -> Self {
        Self {
            mode: CaptureMode::Video,
            resolution: Resolution::new(320, 240),
            running: false,
            frame_counter: 0,
            fail_next: 0,
        }
    }
}

impl MockSensor {
    /// Make the next `count` calls to [`Sensor::capture_frame`] return an
    /// error, simulating a flaky driver.
    pub fn fail_next_captures(&mut self, count: u32) {
        self.fail_next = count;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

impl Sensor for MockSensor {
    fn configure(
        &mut self,
        mode: CaptureMode,
        resolution: Resolution,
        _controls: SensorControls,
    ) -> anyhow::Result<()> {
        self.mode = mode;
        self.resolution = resolution;
        Ok(())
    }

    fn start(&mut self) -> anyhow::Result<()> {
        self.running = true;
        Ok(())
    }

    fn capture_frame(&mut self) -> anyhow::Result<RgbImage> {
        if !self.running {
            anyhow::bail!("capture_frame called while sensor is stopped");
        }
        if self.fail_next > 0 {
            self.fail_next -= 1;
            anyhow::bail!("simulated sensor fault");
        }
        self.frame_counter += 1;
        let shade = (self.frame_counter % 256) as u8;
        Ok(RgbImage::from_fn(
            self.resolution.width,
            self.resolution.height,
            |x, y| {
                let edge = x == 0 || y == 0;
                if edge {
                    image::Rgb([255, 255, 255])
                } else {
                    image::Rgb([shade, shade, shade])
                }
            },
        ))
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        self.running = false;
        Ok(())
    }
}
