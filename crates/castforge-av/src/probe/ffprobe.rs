//! FFprobe-based source inspection.

use super::types::*;
use super::Prober;
use crate::command::ToolCommand;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: String,
    duration: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    bit_rate: Option<String>,
}

/// Inspects sources by running `ffprobe` with JSON output.
///
/// Each probe runs under a deadline; the ffprobe process is killed when it
/// expires.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    program: PathBuf,
    timeout: Duration,
}

impl FfprobeProber {
    /// Create a prober using the given ffprobe executable and deadline.
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    async fn run(&self, path: &Path) -> Result<SourceDescriptor> {
        if !path.exists() {
            return Err(Error::file_not_found(path));
        }

        let output = ToolCommand::new(self.program.clone())
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path.to_string_lossy())
            .timeout(self.timeout)
            .execute()
            .await?;

        parse_ffprobe_json(&output.stdout)
    }
}

#[async_trait]
impl Prober for FfprobeProber {
    async fn probe(&self, path: &Path) -> SourceStatus {
        match self.run(path).await {
            Ok(descriptor) => {
                tracing::debug!(
                    path = %path.display(),
                    resolution = %descriptor.resolution(),
                    codec = %descriptor.video_codec,
                    "Probed source"
                );
                SourceStatus::Available(descriptor)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Source probe failed");
                SourceStatus::Unavailable(e.to_string())
            }
        }
    }
}

/// Parse ffprobe's `-print_format json -show_format -show_streams` output.
pub(crate) fn parse_ffprobe_json(json: &str) -> Result<SourceDescriptor> {
    let output: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| Error::parse_error("ffprobe", e.to_string()))?;

    let video = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| Error::InvalidInput("no video stream".to_string()))?;

    let (width, height) = match (video.width, video.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => {
            return Err(Error::parse_error(
                "ffprobe",
                "video stream has no dimensions",
            ))
        }
    };

    let audio_codec = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"))
        .and_then(|s| s.codec_name.clone());

    let duration = output
        .format
        .duration
        .as_deref()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64);

    let bit_rate = output
        .format
        .bit_rate
        .as_deref()
        .or(video.bit_rate.as_deref())
        .and_then(|s| s.parse::<u64>().ok());

    Ok(SourceDescriptor {
        width,
        height,
        duration,
        bit_rate,
        video_codec: video.codec_name.clone().unwrap_or_default(),
        audio_codec,
        container: output.format.format_name,
    })
}
