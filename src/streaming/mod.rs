//! Media delivery.
//!
//! # Routes
//!
//! HLS routes (adaptive, per-session encoders):
//! - `POST /hls/sessions` - Open a session for a library file
//! - `GET /hls/sessions` - List active sessions
//! - `GET /hls/{session_id}/master.m3u8` - Master playlist
//! - `GET /hls/{session_id}/{quality}/index.m3u8` - Media playlist (starts the encoder)
//! - `POST /hls/{session_id}/{quality}/start` - Explicit (re)start of a rendition
//! - `GET /hls/{session_id}/{quality}/{segment}` - MPEG-TS segment
//! - `DELETE /hls/{session_id}` - Stop a session
//!
//! Direct routes:
//! - `GET /direct/{file_ref}/{file_index}` - Raw range serving or real-time transcode

mod content;
pub mod direct;
mod hls;
pub mod sessions;
pub mod transcoder;

pub use content::{ByteStream, ContentFile, ContentProvider, LocalLibrary};
pub use direct::{stream_file, DirectOptions, DirectTranscodeStream};
pub use hls::{
    create_session, list_sessions, master_playlist, media_playlist, segment, start_rendition,
    stop_session,
};
pub use sessions::{start_sweep_task, SessionRegistry, SessionSource, StreamingSession};
pub use transcoder::{RenditionStatus, RenditionTranscoder};

use axum::{
    routing::{delete, get, post},
    Router,
};
use castforge_av::Toolchain;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{PlaylistMode, StreamingConfig};
use crate::server::AppContext;

/// Runtime view of `[streaming]` plus the resolved encoder path.
#[derive(Debug, Clone)]
pub struct StreamingSettings {
    pub ffmpeg: PathBuf,
    pub scratch_root: PathBuf,
    pub segment_secs: u32,
    pub window_size: u32,
    pub playlist_mode: PlaylistMode,
    pub idle_timeout: Duration,
    pub kill_grace: Duration,
    pub watchdog: Duration,
    pub bytes_per_second: u64,
    pub fallback_on_probe_failure: bool,
    pub channel_capacity: usize,
}

impl StreamingSettings {
    pub fn from_config(config: &StreamingConfig, tools: &Toolchain) -> Self {
        Self {
            ffmpeg: tools.ffmpeg.clone(),
            scratch_root: config.session_root(),
            segment_secs: config.segment_duration_secs,
            window_size: config.window_size,
            playlist_mode: config.playlist_mode,
            idle_timeout: config.idle_timeout(),
            kill_grace: config.kill_grace(),
            watchdog: config.watchdog(),
            bytes_per_second: config.direct_bytes_per_second,
            fallback_on_probe_failure: config.fallback_on_probe_failure,
            channel_capacity: config.channel_capacity,
        }
    }
}

/// Create HLS streaming router.
pub fn hls_router() -> Router<AppContext> {
    Router::new()
        .route("/sessions", post(create_session).get(list_sessions))
        .route("/:session_id", delete(stop_session))
        .route("/:session_id/master.m3u8", get(master_playlist))
        .route("/:session_id/:quality/index.m3u8", get(media_playlist))
        .route("/:session_id/:quality/start", post(start_rendition))
        .route("/:session_id/:quality/:segment", get(segment))
}

/// Create direct streaming router.
pub fn direct_router() -> Router<AppContext> {
    Router::new().route("/:file_ref/:file_index", get(stream_file))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routers_build() {
        let _hls: Router<AppContext> = hls_router();
        let _direct: Router<AppContext> = direct_router();
    }

    #[test]
    fn test_settings_from_config() {
        let config = StreamingConfig {
            window_size: 8,
            playlist_mode: PlaylistMode::Vod,
            kill_grace_secs: 3,
            ..Default::default()
        };
        let tools = Toolchain::with_paths("/opt/ffmpeg", "/opt/ffprobe");
        let settings = StreamingSettings::from_config(&config, &tools);

        assert_eq!(settings.ffmpeg, PathBuf::from("/opt/ffmpeg"));
        assert_eq!(settings.window_size, 8);
        assert_eq!(settings.segment_secs, 4);
        assert_eq!(settings.playlist_mode, PlaylistMode::Vod);
        assert_eq!(settings.kill_grace, Duration::from_secs(3));
        assert_eq!(settings.watchdog, Duration::from_secs(20));
        assert_eq!(settings.scratch_root, config.scratch_dir.join("sessions"));
    }
}
