//! ffmpeg invocations used by the delivery pipeline.
//!
//! - [`hls`]: one rendition, segmented into MPEG-TS with a rolling playlist
//! - [`fmp4`]: single-pass real-time transcode to fragmented MP4 on stdout

pub mod fmp4;
pub mod hls;

pub use fmp4::{DirectEncode, DirectInput};
pub use hls::{HlsRendition, HlsWindow};
