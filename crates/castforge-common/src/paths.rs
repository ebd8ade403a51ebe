//! Path utilities for media detection and content types.

use std::path::Path;

/// Supported video file extensions.
const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "m4v", "ts", "webm", "mov", "wmv", "flv",
];

/// Extensions a browser can play without conversion.
const BROWSER_PLAYABLE_EXTENSIONS: &[&str] = &["mp4", "m4v", "webm", "mp3", "m4a"];

/// Suffix marking a file that is still being downloaded.
pub const PARTIAL_SUFFIX: &str = "part";

fn extension_of(path: &Path) -> Option<String> {
    let path = if is_partial_file(path) {
        Path::new(path.file_stem()?)
    } else {
        path
    };
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

/// Check if a path has a video file extension.
///
/// A trailing `.part` suffix is ignored, so `movie.mkv.part` counts as video.
///
/// ```
/// use std::path::Path;
/// use castforge_common::paths::is_video_file;
///
/// assert!(is_video_file(Path::new("movie.mkv")));
/// assert!(is_video_file(Path::new("movie.mkv.part")));
/// assert!(!is_video_file(Path::new("subtitle.srt")));
/// ```
pub fn is_video_file(path: &Path) -> bool {
    extension_of(path)
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Check if a path names a still-downloading file.
pub fn is_partial_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(PARTIAL_SUFFIX))
        .unwrap_or(false)
}

/// Check if a file can be handed to a browser as-is.
pub fn is_browser_playable(path: &Path) -> bool {
    extension_of(path)
        .map(|ext| BROWSER_PLAYABLE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Determine the MIME type from a file extension.
pub fn content_type_for_path(path: &Path) -> &'static str {
    match extension_of(path).as_deref() {
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("mkv") => "video/x-matroska",
        Some("webm") => "video/webm",
        Some("avi") => "video/x-msvideo",
        Some("mov") => "video/quicktime",
        Some("wmv") => "video/x-ms-wmv",
        Some("flv") => "video/x-flv",
        Some("ts") | Some("m2ts") => "video/mp2t",
        Some("m4a") => "audio/mp4",
        Some("mp3") => "audio/mpeg",
        Some("flac") => "audio/flac",
        Some("wav") => "audio/wav",
        _ => "application/octet-stream",
    }
}

/// Get the list of video file extensions.
#[must_use]
pub fn video_extensions() -> &'static [&'static str] {
    VIDEO_EXTENSIONS
}
