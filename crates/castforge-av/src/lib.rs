//! # castforge-av
//!
//! External media tooling for castforge.
//!
//! This crate provides functionality for:
//! - Locating ffmpeg/ffprobe on the host
//! - Inspecting sources with ffprobe under a bounded deadline
//! - Building ffmpeg invocations for HLS renditions and real-time fMP4 output
//! - Owning encoder processes with a SIGTERM, grace, SIGKILL release path
//! - Managing per-rendition scratch directories
//!
//! ## Example
//!
//! ```no_run
//! use castforge_av::{FfprobeProber, Prober, SourceStatus};
//! use std::path::Path;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let prober = FfprobeProber::new("ffprobe", Duration::from_secs(15));
//! match prober.probe(Path::new("/path/to/video.mkv")).await {
//!     SourceStatus::Available(source) => println!("{}x{}", source.width, source.height),
//!     SourceStatus::Unavailable(reason) => println!("unavailable: {reason}"),
//! }
//! # }
//! ```

mod error;

pub mod actions;
pub mod command;
pub mod encoder;
pub mod probe;
pub mod tools;
pub mod workspace;

// Re-exports
pub use command::{ToolCommand, ToolOutput};
pub use encoder::{EncoderCommand, EncoderProcess, ExitOutcome};
pub use error::{Error, Result};
pub use probe::{FfprobeProber, Prober, SourceDescriptor, SourceStatus, StaticProber};
pub use tools::{check_tool, require_tool, ToolInfo, Toolchain};
pub use workspace::ScratchDir;
