use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// A rendition of a source asset. `Original` is the uploaded file itself and
/// is never encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Quality {
    P360,
    P480,
    P720,
    P1080,
    Original,
}

impl Quality {
    /// Encodable renditions, smallest first.
    pub const LADDER: [Quality; 4] = [Quality::P360, Quality::P480, Quality::P720, Quality::P1080];

    pub fn label(&self) -> &'static str {
        match self {
            Quality::P360 => "360p",
            Quality::P480 => "480p",
            Quality::P720 => "720p",
            Quality::P1080 => "1080p",
            Quality::Original => "original",
        }
    }

    /// Target (width, height) in pixels; `None` for the original.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match self {
            Quality::P360 => Some((640, 360)),
            Quality::P480 => Some((854, 480)),
            Quality::P720 => Some((1280, 720)),
            Quality::P1080 => Some((1920, 1080)),
            Quality::Original => None,
        }
    }

    pub fn height(&self) -> Option<u32> {
        self.dimensions().map(|(_, h)| h)
    }

    pub fn bitrate_kbps(&self) -> Option<u32> {
        match self {
            Quality::P360 => Some(1000),
            Quality::P480 => Some(2500),
            Quality::P720 => Some(5000),
            Quality::P1080 => Some(8000),
            Quality::Original => None,
        }
    }

    /// Never upscale: a rendition is only produced when it is strictly
    /// smaller than the source.
    pub fn fits_source(&self, source_height: u32) -> bool {
        match self.height() {
            Some(h) => h < source_height,
            None => true,
        }
    }
}

/// Label shown for the uploaded file's own resolution, e.g. `1080p`.
pub fn original_quality_label(height: u32) -> String {
    format!("{}p", height)
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Quality {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "360p" => Ok(Quality::P360),
            "480p" => Ok(Quality::P480),
            "720p" => Ok(Quality::P720),
            "1080p" => Ok(Quality::P1080),
            "original" => Ok(Quality::Original),
            other => Err(AppError::InvalidArgument(format!(
                "unknown quality '{}' (expected one of 360p, 480p, 720p, 1080p)",
                other
            ))),
        }
    }
}

impl Serialize for Quality {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for Quality {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_parse_back() {
        for q in Quality::LADDER {
            assert_eq!(q.label().parse::<Quality>().unwrap(), q);
        }
        assert_eq!("ORIGINAL".parse::<Quality>().unwrap(), Quality::Original);
        assert!("4k".parse::<Quality>().is_err());
    }

    #[test]
    fn never_upscales() {
        assert!(Quality::P720.fits_source(1080));
        assert!(!Quality::P1080.fits_source(1080));
        assert!(!Quality::P720.fits_source(480));
        assert!(Quality::Original.fits_source(240));
    }

    #[test]
    fn ladder_is_ordered_by_height() {
        let heights: Vec<u32> = Quality::LADDER.iter().filter_map(|q| q.height()).collect();
        let mut sorted = heights.clone();
        sorted.sort();
        assert_eq!(heights, sorted);
    }
}
