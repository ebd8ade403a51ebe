//! Rendition profiles and the quality ladder.

use crate::{Error, Result};

/// A named output rendition.
///
/// Bitrates are in kbit/s.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct QualityProfile {
    pub name: &'static str,
    pub width: u32,
    pub height: u32,
    pub video_kbps: u32,
    pub audio_kbps: u32,
    pub max_kbps: u32,
    pub buffer_kbps: u32,
    /// H.264 profile passed to the encoder.
    pub profile: &'static str,
    /// H.264 level passed to the encoder.
    pub level: &'static str,
    /// Keyframe interval in frames.
    pub keyint: u32,
}

impl QualityProfile {
    /// Advertised bandwidth in bits per second (video + audio target).
    pub fn bandwidth(&self) -> u64 {
        (u64::from(self.video_kbps) + u64::from(self.audio_kbps)) * 1000
    }

    /// Whether this profile fits inside a `width` x `height` source.
    pub fn fits(&self, width: u32, height: u32) -> bool {
        self.width <= width && self.height <= height
    }

    /// Resolution as a `WxH` string.
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// Rendition served when nothing else fits or the source is unknown.
pub const BASELINE_QUALITY: &str = "240p";

/// All profiles, widest first.
pub static PROFILES: [QualityProfile; 5] = [
    QualityProfile {
        name: "1080p",
        width: 1920,
        height: 1080,
        video_kbps: 5000,
        audio_kbps: 192,
        max_kbps: 5350,
        buffer_kbps: 7500,
        profile: "high",
        level: "4.1",
        keyint: 48,
    },
    QualityProfile {
        name: "720p",
        width: 1280,
        height: 720,
        video_kbps: 2800,
        audio_kbps: 128,
        max_kbps: 2996,
        buffer_kbps: 4200,
        profile: "main",
        level: "3.1",
        keyint: 48,
    },
    QualityProfile {
        name: "480p",
        width: 854,
        height: 480,
        video_kbps: 1400,
        audio_kbps: 128,
        max_kbps: 1498,
        buffer_kbps: 2100,
        profile: "main",
        level: "3.0",
        keyint: 48,
    },
    QualityProfile {
        name: "360p",
        width: 640,
        height: 360,
        video_kbps: 800,
        audio_kbps: 96,
        max_kbps: 856,
        buffer_kbps: 1200,
        profile: "baseline",
        level: "3.0",
        keyint: 48,
    },
    QualityProfile {
        name: "240p",
        width: 426,
        height: 240,
        video_kbps: 400,
        audio_kbps: 64,
        max_kbps: 428,
        buffer_kbps: 600,
        profile: "baseline",
        level: "3.0",
        keyint: 48,
    },
];

/// Look up a profile by name.
pub fn find(name: &str) -> Option<&'static QualityProfile> {
    PROFILES.iter().find(|p| p.name == name)
}

/// Look up a profile by name, failing for unknown names.
pub fn require(name: &str) -> Result<&'static QualityProfile> {
    find(name).ok_or_else(|| Error::UnknownQuality(name.to_string()))
}

/// The baseline profile.
pub fn baseline() -> &'static QualityProfile {
    // PROFILES is sorted widest first and ends with the baseline.
    &PROFILES[PROFILES.len() - 1]
}

/// Renditions for a source of the given size.
///
/// Every profile no larger than the source in both dimensions, widest first.
/// Never empty: a source smaller than every profile gets the baseline.
pub fn ladder(width: u32, height: u32) -> Vec<&'static QualityProfile> {
    let mut out: Vec<_> = PROFILES.iter().filter(|p| p.fits(width, height)).collect();
    out.sort_by(|a, b| b.width.cmp(&a.width));
    if out.is_empty() {
        out.push(baseline());
    }
    out
}
