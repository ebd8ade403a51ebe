//! HLS rendition encoding: H.264/AAC into fixed-duration MPEG-TS segments.

use std::path::{Path, PathBuf};

use crate::encoder::EncoderCommand;

/// Segment file name pattern handed to ffmpeg.
pub const SEGMENT_PATTERN: &str = "segment_%05d.ts";

/// Playlist file ffmpeg keeps rewriting.
pub const PLAYLIST_FILE: &str = "index.m3u8";

/// How much of the encode the playlist retains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HlsWindow {
    /// Keep only the most recent `n` segments; older files are deleted.
    Live(u32),
    /// Keep every segment.
    Vod,
}

/// Encoding parameters for one rendition.
#[derive(Debug, Clone)]
pub struct HlsRendition {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub width: u32,
    pub height: u32,
    pub video_kbps: u32,
    pub max_kbps: u32,
    pub buffer_kbps: u32,
    pub audio_kbps: u32,
    pub profile: String,
    pub level: String,
    pub keyint: u32,
    pub segment_secs: u32,
    pub window: HlsWindow,
}

impl HlsRendition {
    /// Build the ffmpeg command for this rendition.
    pub fn command(&self, ffmpeg: &Path) -> EncoderCommand {
        let seg_pattern = self.output_dir.join(SEGMENT_PATTERN);
        let playlist_path = self.output_dir.join(PLAYLIST_FILE);

        let (list_size, flags) = match self.window {
            HlsWindow::Live(n) => (n, "delete_segments+temp_file+independent_segments"),
            HlsWindow::Vod => (0, "temp_file+independent_segments"),
        };

        let mut cmd = EncoderCommand::new(ffmpeg);
        cmd.args(["-hide_banner", "-loglevel", "error", "-nostdin", "-y"]);
        cmd.arg("-i").arg(self.input.to_string_lossy());
        cmd.args(["-map", "0:v:0", "-map", "0:a:0?"]);

        // Video
        cmd.args(["-c:v", "libx264", "-preset", "veryfast"]);
        cmd.args(["-profile:v", &self.profile, "-level:v", &self.level]);
        cmd.arg("-vf").arg(format!(
            "scale={}:{}:force_original_aspect_ratio=decrease:force_divisible_by=2",
            self.width, self.height
        ));
        cmd.args(["-b:v", &format!("{}k", self.video_kbps)]);
        cmd.args(["-maxrate", &format!("{}k", self.max_kbps)]);
        cmd.args(["-bufsize", &format!("{}k", self.buffer_kbps)]);
        let keyint = self.keyint.to_string();
        cmd.args(["-g", &keyint, "-keyint_min", &keyint, "-sc_threshold", "0"]);

        // Audio
        cmd.args(["-c:a", "aac", "-b:a", &format!("{}k", self.audio_kbps), "-ac", "2"]);

        // Segmenter
        cmd.args(["-f", "hls"]);
        cmd.args(["-hls_time", &self.segment_secs.to_string()]);
        cmd.args(["-hls_list_size", &list_size.to_string()]);
        cmd.args(["-hls_flags", flags]);
        cmd.args(["-hls_segment_type", "mpegts"]);
        cmd.arg("-hls_segment_filename").arg(seg_pattern.to_string_lossy());
        cmd.arg(playlist_path.to_string_lossy());
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendition(window: HlsWindow) -> HlsRendition {
        HlsRendition {
            input: PathBuf::from("/media/movie.mkv"),
            output_dir: PathBuf::from("/tmp/cf/abc/720p"),
            width: 1280,
            height: 720,
            video_kbps: 2800,
            max_kbps: 2996,
            buffer_kbps: 4200,
            audio_kbps: 128,
            profile: "main".into(),
            level: "3.1".into(),
            keyint: 48,
            segment_secs: 4,
            window,
        }
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_live_args() {
        let cmd = rendition(HlsWindow::Live(5)).command(Path::new("ffmpeg"));
        let args = cmd.get_args();
        assert_eq!(value_after(args, "-i"), Some("/media/movie.mkv"));
        assert_eq!(value_after(args, "-b:v"), Some("2800k"));
        assert_eq!(value_after(args, "-maxrate"), Some("2996k"));
        assert_eq!(value_after(args, "-bufsize"), Some("4200k"));
        assert_eq!(value_after(args, "-profile:v"), Some("main"));
        assert_eq!(value_after(args, "-g"), Some("48"));
        assert_eq!(value_after(args, "-hls_time"), Some("4"));
        assert_eq!(value_after(args, "-hls_list_size"), Some("5"));
        assert!(value_after(args, "-hls_flags")
            .unwrap()
            .contains("delete_segments"));
        assert_eq!(
            value_after(args, "-hls_segment_filename"),
            Some("/tmp/cf/abc/720p/segment_%05d.ts")
        );
        assert_eq!(args.last().map(String::as_str), Some("/tmp/cf/abc/720p/index.m3u8"));
    }

    #[test]
    fn test_vod_keeps_every_segment() {
        let cmd = rendition(HlsWindow::Vod).command(Path::new("ffmpeg"));
        let args = cmd.get_args();
        assert_eq!(value_after(args, "-hls_list_size"), Some("0"));
        assert!(!value_after(args, "-hls_flags")
            .unwrap()
            .contains("delete_segments"));
    }
}
