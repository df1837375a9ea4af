//! The per-node device settings model.
//!
//! [`DeviceSettings`] is the single source of truth for both the sensor
//! controls (brightness, contrast, saturation, iso, white balance, fps,
//! resolution, jpeg quality) and the pure frame transforms (crop, flip,
//! rotation, grayscale). The distinction matters: mutating a sensor control
//! requires the camera arbiter to restart the preview loop, while mutating a
//! transform does not (see [`DeviceSettings::affects_sensor`]).

mod resolution;
mod store;

pub use resolution::Resolution;
pub use store::SettingsStore;

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Brightness is stored on the signed `-50..=50` scale. A value of 50 or
/// greater on disk is a legacy artifact of an older unsigned `0..=100`
/// scale (50 was "neutral" there) and is migrated to 0 on load.
pub const BRIGHTNESS_MIN: i32 = -50;
pub const BRIGHTNESS_MAX: i32 = 50;
pub const CONTRAST_MIN: i32 = 0;
pub const CONTRAST_MAX: i32 = 100;
pub const SATURATION_MIN: i32 = 0;
pub const SATURATION_MAX: i32 = 100;
pub const ISO_MIN: i32 = 100;
pub const ISO_MAX: i32 = 6400;
pub const FPS_MIN: u32 = 1;
pub const FPS_MAX: u32 = 60;
pub const JPEG_QUALITY_MIN: u8 = 20;
pub const JPEG_QUALITY_MAX: u8 = 100;

/// White balance presets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhiteBalance {
    #[default]
    Auto,
    Daylight,
    Cloudy,
    Tungsten,
    Fluorescent,
}

/// Frame rotation, one of the four values the transform pipeline supports.
///
/// Stored on disk as its plain degree value (`0`, `90`, `180`, `270`),
/// matching the on-disk format of the settings this crate migrated from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u16)]
pub enum Rotation {
    #[default]
    Zero = 0,
    Ninety = 90,
    OneEighty = 180,
    TwoSeventy = 270,
}

impl Rotation {
    /// Parse a rotation from its degree value, as it appears in
    /// `SET_CAMERA_ROTATION_<n>` commands.
    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees {
            0 => Some(Self::Zero),
            90 => Some(Self::Ninety),
            180 => Some(Self::OneEighty),
            270 => Some(Self::TwoSeventy),
            _ => None,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Self::Zero => 0,
            Self::Ninety => 90,
            Self::OneEighty => 180,
            Self::TwoSeventy => 270,
        }
    }
}

/// The region of interest used when `crop_enabled` is set. Fields are
/// clamped to the source frame (with a 10px minimum per side) at transform
/// time, not at settings load time, since the frame size isn't known until
/// then.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crop {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for Crop {
    fn default() -> Self {
        // Matches the default resolution below, so an enabled-but-untouched
        // crop is a no-op.
        Self {
            x: 0,
            y: 0,
            width: 4608,
            height: 2592,
        }
    }
}

/// The full per-node device settings, persisted as one JSON object per
/// logical node name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub brightness: i32,
    pub contrast: i32,
    pub saturation: i32,
    pub iso: i32,
    pub white_balance: WhiteBalance,
    pub fps: u32,
    pub resolution: Resolution,
    pub jpeg_quality: u8,
    pub crop_enabled: bool,
    #[serde(flatten)]
    pub crop: Crop,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
    pub rotation: Rotation,
    pub grayscale: bool,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            brightness: 0,
            contrast: 50,
            saturation: 50,
            iso: 100,
            white_balance: WhiteBalance::Auto,
            fps: 30,
            resolution: Resolution::default(),
            jpeg_quality: 95,
            crop_enabled: false,
            crop: Crop::default(),
            flip_horizontal: false,
            flip_vertical: false,
            rotation: Rotation::default(),
            grayscale: false,
        }
    }
}

fn clamp_i32(value: i32, min: i32, max: i32) -> i32 {
    value.clamp(min, max)
}

impl DeviceSettings {
    /// Names of the fields that reconfigure the sensor (as opposed to the
    /// pure frame transforms). A change to any of these requires the
    /// preview loop to be restarted; a change to anything else does not.
    pub const SENSOR_FIELDS: &'static [&'static str] = &[
        "brightness",
        "contrast",
        "saturation",
        "iso",
        "white_balance",
        "fps",
        "resolution",
    ];

    /// Whether a named settings field affects the sensor (and therefore
    /// requires a preview restart) as opposed to being a pure frame
    /// transform applied on the next iteration.
    pub fn affects_sensor(field: &str) -> bool {
        Self::SENSOR_FIELDS.contains(&field)
    }

    /// Apply the legacy brightness migration and range clamps.
    /// Idempotent: running it twice has no further effect. Returns `true`
    /// if any field was changed, so callers can decide whether the
    /// settings need to be rewritten to disk.
    pub fn migrate_and_clamp(&mut self) -> bool {
        let before = self.clone();
        if self.brightness >= BRIGHTNESS_MAX {
            // Legacy unsigned 0..=100 scale detected (50 was neutral there
            // too); 0 is the new neutral.
            self.brightness = 0;
        } else {
            self.brightness = clamp_i32(self.brightness, BRIGHTNESS_MIN, BRIGHTNESS_MAX);
        }
        self.contrast = clamp_i32(self.contrast, CONTRAST_MIN, CONTRAST_MAX);
        self.saturation = clamp_i32(self.saturation, SATURATION_MIN, SATURATION_MAX);
        self.iso = clamp_i32(self.iso, ISO_MIN, ISO_MAX);
        self.fps = self.fps.clamp(FPS_MIN, FPS_MAX);
        self.jpeg_quality = self.jpeg_quality.clamp(JPEG_QUALITY_MIN, JPEG_QUALITY_MAX);
        *self != before
    }
}
