//! External tool detection and management.
//!
//! The [`Toolchain`] resolves the ffmpeg and ffprobe executables once at
//! startup, preferring configured paths over a `PATH` lookup.

use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Information about an external tool.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolInfo {
    /// Name of the tool.
    pub name: String,
    /// Whether the tool is available.
    pub available: bool,
    /// Version string if available.
    pub version: Option<String>,
    /// Path to the tool executable.
    pub path: Option<PathBuf>,
}

/// Check if a tool is available and get its information.
///
/// ffmpeg-family tools take `-version` rather than `--version`.
///
/// # Example
///
/// ```no_run
/// use castforge_av::check_tool;
///
/// let info = check_tool("ffprobe");
/// if info.available {
///     println!("ffprobe version: {:?}", info.version);
/// }
/// ```
pub fn check_tool(name: &str) -> ToolInfo {
    check_tool_with_arg(name, "-version")
}

/// Check if a tool is available using a custom version argument.
pub fn check_tool_with_arg(name: &str, version_arg: &str) -> ToolInfo {
    let result = Command::new(name).arg(version_arg).output();

    match result {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .map(|s| s.to_string());

            let path = which::which(name).ok();

            ToolInfo {
                name: name.to_string(),
                available: true,
                version,
                path,
            }
        }
        _ => ToolInfo {
            name: name.to_string(),
            available: false,
            version: None,
            path: None,
        },
    }
}

/// Require that a tool is available, returning its path.
///
/// # Errors
///
/// Returns an error if the tool is not found.
pub fn require_tool(name: &str) -> Result<PathBuf> {
    which::which(name).map_err(|_| Error::tool_not_found(name))
}

/// Get the path to a tool, preferring a configured path over PATH lookup.
pub fn get_tool_path(name: &str, config_path: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = config_path {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
    }

    require_tool(name)
}

/// Resolved executables for ffmpeg and ffprobe.
#[derive(Debug, Clone)]
pub struct Toolchain {
    /// Encoder executable.
    pub ffmpeg: PathBuf,
    /// Inspector executable.
    pub ffprobe: PathBuf,
}

impl Toolchain {
    /// Resolve both tools.
    ///
    /// A tool that cannot be found keeps its bare name so that later spawns
    /// fail with a clear error (rendition `Failed`, probe `Unavailable`)
    /// instead of preventing the server from starting.
    pub fn discover(ffmpeg: Option<&Path>, ffprobe: Option<&Path>) -> Self {
        Self {
            ffmpeg: resolve_or_bare("ffmpeg", ffmpeg),
            ffprobe: resolve_or_bare("ffprobe", ffprobe),
        }
    }

    /// Run both executables and report what they say about themselves.
    pub fn check(&self) -> Vec<ToolInfo> {
        [("ffmpeg", &self.ffmpeg), ("ffprobe", &self.ffprobe)]
            .into_iter()
            .map(|(name, path)| ToolInfo {
                name: name.to_string(),
                ..check_tool(&path.to_string_lossy())
            })
            .collect()
    }

    /// Use explicit paths without any lookup.
    pub fn with_paths(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }
}

fn resolve_or_bare(name: &str, configured: Option<&Path>) -> PathBuf {
    match get_tool_path(name, configured) {
        Ok(path) => {
            tracing::debug!(tool = name, path = %path.display(), "Resolved tool");
            path
        }
        Err(_) => {
            tracing::warn!(tool = name, "Tool not found in PATH");
            configured
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(name))
        }
    }
}
