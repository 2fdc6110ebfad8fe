//! Quality presets for the transcoder.
//!
//! `Auto` passes the source video through untouched. The other variants
//! re-encode with x264 at a fixed speed/quality/bitrate ceiling.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Encoder settings carried by a re-encoding quality preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderParams {
    /// x264 speed preset
    pub preset: &'static str,
    /// Constant rate factor (lower is better quality)
    pub crf: u8,
    /// Bitrate ceiling in kbps
    pub max_bitrate_kbps: u32,
}

impl EncoderParams {
    /// Lower the bitrate ceiling to `limit_kbps` if that is tighter.
    pub fn capped(mut self, limit_kbps: Option<u32>) -> Self {
        if let Some(limit) = limit_kbps {
            self.max_bitrate_kbps = self.max_bitrate_kbps.min(limit);
        }
        self
    }
}

const LOW: EncoderParams = EncoderParams {
    preset: "veryfast",
    crf: 28,
    max_bitrate_kbps: 800,
};

const MEDIUM: EncoderParams = EncoderParams {
    preset: "veryfast",
    crf: 23,
    max_bitrate_kbps: 2000,
};

const HIGH: EncoderParams = EncoderParams {
    preset: "fast",
    crf: 20,
    max_bitrate_kbps: 4000,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityProfile {
    Low,
    Medium,
    High,
    #[default]
    Auto,
}

/// How the video track is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoMode {
    Copy,
    Encode(EncoderParams),
}

impl QualityProfile {
    /// Fixed encoder parameters, or `None` for pass-through.
    pub fn encoder_params(self) -> Option<EncoderParams> {
        match self {
            QualityProfile::Low => Some(LOW),
            QualityProfile::Medium => Some(MEDIUM),
            QualityProfile::High => Some(HIGH),
            QualityProfile::Auto => None,
        }
    }

    /// Resolve the video mode for this profile and an optional bitrate hint.
    ///
    /// `Auto` copies unless a bitrate hint is given, in which case it falls
    /// back to the medium preset capped at the hint.
    pub fn video_mode(self, max_bitrate_kbps: Option<u32>) -> VideoMode {
        match (self.encoder_params(), max_bitrate_kbps) {
            (Some(params), hint) => VideoMode::Encode(params.capped(hint)),
            (None, Some(hint)) => VideoMode::Encode(MEDIUM.capped(Some(hint))),
            (None, None) => VideoMode::Copy,
        }
    }
}

impl fmt::Display for QualityProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QualityProfile::Low => "low",
            QualityProfile::Medium => "medium",
            QualityProfile::High => "high",
            QualityProfile::Auto => "auto",
        };
        f.write_str(name)
    }
}

impl FromStr for QualityProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(QualityProfile::Low),
            "medium" => Ok(QualityProfile::Medium),
            "high" => Ok(QualityProfile::High),
            "auto" | "" => Ok(QualityProfile::Auto),
            other => Err(format!("unknown quality profile: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_copies_without_hint() {
        assert_eq!(QualityProfile::Auto.video_mode(None), VideoMode::Copy);
    }

    #[test]
    fn test_auto_with_hint_reencodes_capped() {
        match QualityProfile::Auto.video_mode(Some(1200)) {
            VideoMode::Encode(params) => {
                assert_eq!(params.preset, "veryfast");
                assert_eq!(params.max_bitrate_kbps, 1200);
            }
            VideoMode::Copy => panic!("expected re-encode"),
        }
    }

    #[test]
    fn test_hint_never_raises_ceiling() {
        match QualityProfile::Low.video_mode(Some(5000)) {
            VideoMode::Encode(params) => assert_eq!(params.max_bitrate_kbps, 800),
            VideoMode::Copy => panic!("expected re-encode"),
        }
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!("HIGH".parse::<QualityProfile>().unwrap(), QualityProfile::High);
        assert_eq!("".parse::<QualityProfile>().unwrap(), QualityProfile::Auto);
        assert!("ultra".parse::<QualityProfile>().is_err());
        assert_eq!(QualityProfile::Medium.to_string(), "medium");
    }
}
