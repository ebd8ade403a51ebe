use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub library: LibraryConfig,

    #[serde(default)]
    pub streaming: StreamingConfig,

    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LibraryConfig {
    /// Directory that `file_ref` values are resolved against
    #[serde(default = "default_library_root")]
    pub root: PathBuf,
}

fn default_library_root() -> PathBuf {
    PathBuf::from("./media")
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            root: default_library_root(),
        }
    }
}

/// How rendition playlists expose encoder output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaylistMode {
    /// Sliding window of recent segments; older files are deleted.
    #[default]
    Live,
    /// Every segment is kept and listed.
    Vod,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamingConfig {
    /// Parent of the server-owned `sessions/` directory
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    /// Target segment duration in seconds
    #[serde(default = "default_segment_duration")]
    pub segment_duration_secs: u32,

    /// Number of segments kept in a live playlist
    #[serde(default = "default_window_size")]
    pub window_size: u32,

    #[serde(default)]
    pub playlist_mode: PlaylistMode,

    /// Sessions not read for this long are torn down by the sweep
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Time between SIGTERM and SIGKILL when stopping an encoder
    #[serde(default = "default_kill_grace")]
    pub kill_grace_secs: u64,

    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// Give up on a direct transcode that produced no output by then
    #[serde(default = "default_watchdog")]
    pub watchdog_secs: u64,

    /// Empirical bytes-per-second used to turn a byte offset into a seek time
    #[serde(default = "default_direct_bytes_per_second")]
    pub direct_bytes_per_second: u64,

    /// Serve the baseline rendition when a source cannot be probed
    #[serde(default = "default_true")]
    pub fallback_on_probe_failure: bool,

    /// Chunks buffered between the encoder and a direct response
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("castforge")
}
fn default_segment_duration() -> u32 {
    4
}
fn default_window_size() -> u32 {
    5
}
fn default_idle_timeout() -> u64 {
    120
}
fn default_sweep_interval() -> u64 {
    30
}
fn default_kill_grace() -> u64 {
    5
}
fn default_probe_timeout() -> u64 {
    15
}
fn default_watchdog() -> u64 {
    20
}
fn default_direct_bytes_per_second() -> u64 {
    1_000_000
}
fn default_true() -> bool {
    true
}
fn default_channel_capacity() -> usize {
    16
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            scratch_dir: default_scratch_dir(),
            segment_duration_secs: default_segment_duration(),
            window_size: default_window_size(),
            playlist_mode: PlaylistMode::default(),
            idle_timeout_secs: default_idle_timeout(),
            sweep_interval_secs: default_sweep_interval(),
            kill_grace_secs: default_kill_grace(),
            probe_timeout_secs: default_probe_timeout(),
            watchdog_secs: default_watchdog(),
            direct_bytes_per_second: default_direct_bytes_per_second(),
            fallback_on_probe_failure: default_true(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl StreamingConfig {
    /// Directory holding one scratch directory per session.
    ///
    /// Only this subdirectory is ever cleared; other entries under
    /// `scratch_dir` are left alone.
    pub fn session_root(&self) -> PathBuf {
        self.scratch_dir.join("sessions")
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn watchdog(&self) -> Duration {
        Duration::from_secs(self.watchdog_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ToolsConfig {
    /// Custom path to ffmpeg (otherwise found in PATH)
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Custom path to ffprobe (otherwise found in PATH)
    #[serde(default)]
    pub ffprobe_path: Option<PathBuf>,
}
