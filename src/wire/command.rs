// SPDX-License-Identifier: GPL-3.0-or-later
use std::str::FromStr;

/// Which flip axis a `SET_CAMERA_FLIP_<axis>_<bool>` command names.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlipAxis {
    Horizontal,
    Vertical,
}

/// Which crop rectangle field a `SET_CAMERA_CROP_<field>_<v>` command
/// names.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CropField {
    Enabled,
    X,
    Y,
    Width,
    Height,
}

/// A parsed control-plane command, as received on a node's `control` or
/// `video_control` port. One value per datagram; the payload is consumed
/// once here and never re-inspected as raw bytes downstream.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    StartStream,
    StopStream,
    CaptureStill,
    RestartStreamWithSettings,
    /// `SET_QUALITY_<n>`, already range-checked to `20..=100`.
    SetQuality(u8),
    SetCameraFlip { axis: FlipAxis, value: bool },
    SetCameraGrayscale(bool),
    /// `SET_CAMERA_ROTATION_<n>`, degrees as received (still needs
    /// validating against the four supported values downstream).
    SetCameraRotation(u32),
    SetCameraCrop { field: CropField, value: u32 },
    /// `SET_CAMERA_<field>_<v>` for any field not covered by a more
    /// specific variant above: a sensor-control key/value pair looked up
    /// against the device settings field table.
    SetCameraField { field: String, value: String },
    /// `SET_ALL_SETTINGS_<json>`, the raw JSON body. Left unparsed here
    /// since the settings store, not the wire layer, owns validating it
    /// against [`crate::settings::DeviceSettings`].
    SetAllSettings(serde_json::Value),
    ResetDefaults,
    /// `SET_TIME_<YYYY-MM-DD HH:MM:SS>`, the raw timestamp text.
    SetTime(String),
    Shutdown,
    Reboot,
}

impl Command {
    /// Parse one UDP datagram's payload into a command. Returns `None` on
    /// anything unrecognized or out of range; callers map that to
    /// [`crate::error::NodeError::BadCommand`] and log-and-ignore.
    pub fn parse(payload: &[u8]) -> Option<Command> {
        let text = std::str::from_utf8(payload).ok()?.trim();
        Self::parse_str(text)
    }

    fn parse_str(text: &str) -> Option<Command> {
        match text {
            "START_STREAM" => return Some(Command::StartStream),
            "STOP_STREAM" => return Some(Command::StopStream),
            "CAPTURE_STILL" => return Some(Command::CaptureStill),
            "RESTART_STREAM_WITH_SETTINGS" => return Some(Command::RestartStreamWithSettings),
            "RESET_CAMERA_DEFAULTS" | "RESET_TO_FACTORY_DEFAULTS" => {
                return Some(Command::ResetDefaults)
            }
            "SHUTDOWN" => return Some(Command::Shutdown),
            "REBOOT" => return Some(Command::Reboot),
            _ => {}
        }

        if let Some(rest) = text.strip_prefix("SET_QUALITY_") {
            let n: u8 = rest.parse().ok()?;
            return (20..=100).contains(&n).then_some(Command::SetQuality(n));
        }

        if let Some(rest) = text.strip_prefix("SET_CAMERA_FLIP_HORIZONTAL_") {
            return Some(Command::SetCameraFlip {
                axis: FlipAxis::Horizontal,
                value: parse_bool(rest)?,
            });
        }
        if let Some(rest) = text.strip_prefix("SET_CAMERA_FLIP_VERTICAL_") {
            return Some(Command::SetCameraFlip {
                axis: FlipAxis::Vertical,
                value: parse_bool(rest)?,
            });
        }

        if let Some(rest) = text.strip_prefix("SET_CAMERA_GRAYSCALE_") {
            return Some(Command::SetCameraGrayscale(parse_bool(rest)?));
        }

        if let Some(rest) = text.strip_prefix("SET_CAMERA_ROTATION_") {
            return Some(Command::SetCameraRotation(rest.parse().ok()?));
        }

        if let Some(rest) = text.strip_prefix("SET_CAMERA_CROP_") {
            let (field, value) = rest.split_once('_')?;
            let field = match field {
                "ENABLED" => CropField::Enabled,
                "X" => CropField::X,
                "Y" => CropField::Y,
                "WIDTH" => CropField::Width,
                "HEIGHT" => CropField::Height,
                _ => return None,
            };
            let value: u32 = value.parse().ok()?;
            return Some(Command::SetCameraCrop { field, value });
        }

        if let Some(rest) = text.strip_prefix("SET_ALL_SETTINGS_") {
            let json = serde_json::Value::from_str(rest).ok()?;
            return Some(Command::SetAllSettings(json));
        }

        if let Some(rest) = text.strip_prefix("SET_TIME_") {
            return Some(Command::SetTime(rest.to_string()));
        }

        if let Some(rest) = text.strip_prefix("SET_CAMERA_") {
            let (field, value) = rest.split_once('_')?;
            return Some(Command::SetCameraField {
                field: field.to_ascii_lowercase(),
                value: value.to_string(),
            });
        }

        None
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_commands() {
        assert_eq!(Command::parse(b"START_STREAM"), Some(Command::StartStream));
        assert_eq!(Command::parse(b"STOP_STREAM"), Some(Command::StopStream));
        assert_eq!(Command::parse(b"CAPTURE_STILL"), Some(Command::CaptureStill));
        assert_eq!(Command::parse(b"SHUTDOWN"), Some(Command::Shutdown));
        assert_eq!(Command::parse(b"REBOOT"), Some(Command::Reboot));
    }

    #[test]
    fn both_reset_spellings_map_to_the_same_command() {
        assert_eq!(
            Command::parse(b"RESET_CAMERA_DEFAULTS"),
            Some(Command::ResetDefaults)
        );
        assert_eq!(
            Command::parse(b"RESET_TO_FACTORY_DEFAULTS"),
            Some(Command::ResetDefaults)
        );
    }

    #[test]
    fn set_quality_enforces_range() {
        assert_eq!(Command::parse(b"SET_QUALITY_50"), Some(Command::SetQuality(50)));
        assert_eq!(Command::parse(b"SET_QUALITY_19"), None);
        assert_eq!(Command::parse(b"SET_QUALITY_101"), None);
    }

    #[test]
    fn set_camera_flip_picks_the_right_axis() {
        assert_eq!(
            Command::parse(b"SET_CAMERA_FLIP_HORIZONTAL_true"),
            Some(Command::SetCameraFlip {
                axis: FlipAxis::Horizontal,
                value: true
            })
        );
        assert_eq!(
            Command::parse(b"SET_CAMERA_FLIP_VERTICAL_false"),
            Some(Command::SetCameraFlip {
                axis: FlipAxis::Vertical,
                value: false
            })
        );
    }

    #[test]
    fn set_camera_crop_parses_each_field() {
        assert_eq!(
            Command::parse(b"SET_CAMERA_CROP_WIDTH_640"),
            Some(Command::SetCameraCrop {
                field: CropField::Width,
                value: 640
            })
        );
        assert_eq!(Command::parse(b"SET_CAMERA_CROP_BOGUS_1"), None);
    }

    #[test]
    fn generic_set_camera_field_falls_through_to_sensor_lookup() {
        assert_eq!(
            Command::parse(b"SET_CAMERA_BRIGHTNESS_10"),
            Some(Command::SetCameraField {
                field: "brightness".to_string(),
                value: "10".to_string()
            })
        );
    }

    #[test]
    fn set_all_settings_carries_the_raw_json_body() {
        let cmd = Command::parse(br#"SET_ALL_SETTINGS_{"brightness":5}"#).unwrap();
        match cmd {
            Command::SetAllSettings(value) => {
                assert_eq!(value["brightness"], 5);
            }
            other => panic!("expected SetAllSettings, got {other:?}"),
        }
    }

    #[test]
    fn set_time_keeps_the_embedded_space() {
        assert_eq!(
            Command::parse(b"SET_TIME_2026-08-01 12:30:00"),
            Some(Command::SetTime("2026-08-01 12:30:00".to_string()))
        );
    }

    #[test]
    fn unrecognized_payload_is_rejected() {
        assert_eq!(Command::parse(b"NOT_A_COMMAND"), None);
        assert_eq!(Command::parse(b"SET_CAMERA_ROTATION_abc"), None);
    }
}
