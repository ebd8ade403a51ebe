//! Real-time single-pass transcode to fragmented MP4 on stdout.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::encoder::EncoderCommand;

/// Where the encoder reads its input from.
#[derive(Debug, Clone)]
pub enum DirectInput {
    /// A seekable file, optionally starting at an approximate time offset.
    File { path: PathBuf, seek: Option<Duration> },
    /// A live byte stream written to the encoder's stdin.
    Pipe,
}

/// A browser-compatible fMP4 transcode streamed to stdout.
#[derive(Debug, Clone)]
pub struct DirectEncode {
    pub input: DirectInput,
    pub video_kbps: u32,
    pub audio_kbps: u32,
}

impl DirectEncode {
    /// Build the ffmpeg command.
    pub fn command(&self, ffmpeg: &Path) -> EncoderCommand {
        let mut cmd = EncoderCommand::new(ffmpeg);
        cmd.args(["-hide_banner", "-loglevel", "error"]);

        match &self.input {
            DirectInput::File { path, seek } => {
                cmd.arg("-nostdin");
                if let Some(offset) = seek.filter(|d| !d.is_zero()) {
                    cmd.args(["-ss", &format!("{:.3}", offset.as_secs_f64())]);
                }
                cmd.arg("-i").arg(path.to_string_lossy());
            }
            DirectInput::Pipe => {
                cmd.args(["-i", "pipe:0"]);
                cmd.pipe_stdin();
            }
        }

        cmd.args(["-map", "0:v:0", "-map", "0:a:0?"]);
        cmd.args(["-c:v", "libx264", "-preset", "veryfast", "-tune", "zerolatency"]);
        cmd.args(["-b:v", &format!("{}k", self.video_kbps)]);
        cmd.args(["-c:a", "aac", "-b:a", &format!("{}k", self.audio_kbps), "-ac", "2"]);
        cmd.args(["-f", "mp4", "-movflags", "frag_keyframe+empty_moov+default_base_moof"]);
        cmd.arg("pipe:1");
        cmd.pipe_stdout();
        cmd
    }
}
