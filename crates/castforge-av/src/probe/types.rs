//! Types describing an inspected source.

use serde::Serialize;
use std::time::Duration;

/// What the delivery pipeline needs to know about a source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceDescriptor {
    /// Width of the first video stream in pixels.
    pub width: u32,
    /// Height of the first video stream in pixels.
    pub height: u32,
    /// Container duration, when reported.
    #[serde(serialize_with = "serialize_secs")]
    pub duration: Option<Duration>,
    /// Overall bitrate in bits per second, when reported.
    pub bit_rate: Option<u64>,
    /// Codec of the first video stream (e.g. "h264", "hevc").
    pub video_codec: String,
    /// Codec of the first audio stream, if any.
    pub audio_codec: Option<String>,
    /// Container format name as reported by the prober.
    pub container: String,
}

impl SourceDescriptor {
    /// Resolution as a `WxH` string.
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

fn serialize_secs<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match duration {
        Some(d) => serializer.serialize_some(&d.as_secs_f64()),
        None => serializer.serialize_none(),
    }
}

/// Outcome of inspecting a source.
///
/// Inspection never fails with an error: anything that prevents a usable
/// descriptor is reported as [`SourceStatus::Unavailable`].
#[derive(Debug, Clone, PartialEq)]
pub enum SourceStatus {
    /// The source was inspected successfully.
    Available(SourceDescriptor),
    /// The source could not be inspected, with a human-readable reason.
    Unavailable(String),
}

impl SourceStatus {
    /// Returns the descriptor if the source is available.
    pub fn descriptor(&self) -> Option<&SourceDescriptor> {
        match self {
            SourceStatus::Available(d) => Some(d),
            SourceStatus::Unavailable(_) => None,
        }
    }

    /// Returns true if the source could be inspected.
    pub fn is_available(&self) -> bool {
        matches!(self, SourceStatus::Available(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SourceDescriptor {
        SourceDescriptor {
            width: 1920,
            height: 1080,
            duration: Some(Duration::from_secs_f64(90.5)),
            bit_rate: Some(8_000_000),
            video_codec: "h264".into(),
            audio_codec: Some("aac".into()),
            container: "matroska,webm".into(),
        }
    }

    #[test]
    fn test_resolution() {
        assert_eq!(sample().resolution(), "1920x1080");
    }

    #[test]
    fn test_serializes_duration_as_seconds() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["duration"], 90.5);
        assert_eq!(json["video_codec"], "h264");
    }

    #[test]
    fn test_status_accessors() {
        let available = SourceStatus::Available(sample());
        assert!(available.is_available());
        assert_eq!(available.descriptor().map(|d| d.width), Some(1920));

        let unavailable = SourceStatus::Unavailable("no video stream".into());
        assert!(!unavailable.is_available());
        assert!(unavailable.descriptor().is_none());
    }
}
