//! castforge-media: rendition ladder and HLS playlist generation
//!
//! Everything in this crate is pure computation over static tables and
//! encoder output on disk; no processes are spawned here.
//!
//! # Modules
//!
//! - `quality` - Static rendition profiles and the ladder function
//! - `segment` - Segment file naming and scratch directory scans
//! - `hls` - Master and media playlist rendering (m3u8)
//!
//! # Example
//!
//! ```
//! use castforge_media::quality::ladder;
//!
//! let names: Vec<_> = ladder(1280, 720).iter().map(|q| q.name).collect();
//! assert_eq!(names, ["720p", "480p", "360p", "240p"]);
//! ```

pub mod error;
pub mod hls;
pub mod quality;
pub mod segment;

pub use error::{Error, Result};
pub use hls::{MasterPlaylist, MediaPlaylist, PlaylistType};
pub use quality::{ladder, QualityProfile, BASELINE_QUALITY};
pub use segment::{segment_name, SegmentScan};
