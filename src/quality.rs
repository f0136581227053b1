#![forbid(unsafe_code)]

use serde::Serialize;

/// Maximum video height a client may ask for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum QualityTier {
    #[serde(rename = "1080")]
    P1080,
    #[default]
    #[serde(rename = "720")]
    P720,
    #[serde(rename = "480")]
    P480,
    #[serde(rename = "360")]
    P360,
}

impl QualityTier {
    pub const ALL: [QualityTier; 4] = [Self::P1080, Self::P720, Self::P480, Self::P360];

    /// Maps a client hint onto a tier. Anything that is not exactly one of
    /// the four wire values selects 720.
    pub fn normalize(requested: Option<&str>) -> Self {
        requested
            .and_then(|value| Self::ALL.into_iter().find(|tier| tier.as_str() == value))
            .unwrap_or_default()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::P1080 => "1080",
            Self::P720 => "720",
            Self::P480 => "480",
            Self::P360 => "360",
        }
    }

    pub fn height(self) -> u32 {
        match self {
            Self::P1080 => 1080,
            Self::P720 => 720,
            Self::P480 => 480,
            Self::P360 => 360,
        }
    }

    pub fn resolution(self) -> &'static str {
        match self {
            Self::P1080 => "1920x1080",
            Self::P720 => "1280x720",
            Self::P480 => "854x480",
            Self::P360 => "640x360",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::P1080 => "1080p (Full HD)",
            Self::P720 => "720p (HD)",
            Self::P480 => "480p",
            Self::P360 => "360p",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_values_map_to_themselves() {
        for tier in QualityTier::ALL {
            assert_eq!(QualityTier::normalize(Some(tier.as_str())), tier);
        }
    }

    #[test]
    fn everything_else_defaults_to_720() {
        for value in [None, Some(""), Some("2160"), Some("720p"), Some(" 480"), Some("abc")] {
            assert_eq!(QualityTier::normalize(value), QualityTier::P720, "{value:?}");
        }
    }

    #[test]
    fn serializes_as_wire_value() {
        assert_eq!(serde_json::to_string(&QualityTier::P1080).unwrap(), "\"1080\"");
    }

    #[test]
    fn height_matches_wire_value() {
        for tier in QualityTier::ALL {
            assert_eq!(tier.height().to_string(), tier.as_str());
        }
    }
}
