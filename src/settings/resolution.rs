// SPDX-License-Identifier: GPL-3.0-or-later
use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserialize, Deserializer};
use serde::Serialize;

/// A `WxH` preview output size, as it appears in the settings file and in
/// `SET_CAMERA_RESOLUTION_<w>x<h>` commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        // The sensor's full native resolution, matching the device this
        // settings model was migrated from.
        Self::new(4608, 2592)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = ParseResolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| ParseResolutionError(s.to_string()))?;
        let width: u32 = w.parse().map_err(|_| ParseResolutionError(s.to_string()))?;
        let height: u32 = h.parse().map_err(|_| ParseResolutionError(s.to_string()))?;
        if width == 0 || height == 0 {
            return Err(ParseResolutionError(s.to_string()));
        }
        Ok(Self::new(width, height))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseResolutionError(String);

impl fmt::Display for ParseResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid resolution string {:?}, expected \"WxH\"", self.0)
    }
}

impl std::error::Error for ParseResolutionError {}

impl Serialize for Resolution {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Resolution {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_string() {
        let res = Resolution::new(1920, 1080);
        assert_eq!(res.to_string(), "1920x1080");
        assert_eq!("1920x1080".parse::<Resolution>().unwrap(), res);
    }

    #[test]
    fn rejects_malformed_strings() {
        assert!("1920".parse::<Resolution>().is_err());
        assert!("0x1080".parse::<Resolution>().is_err());
        assert!("abcxdef".parse::<Resolution>().is_err());
    }
}
