//! HLS playlist generation.
//!
//! This module renders M3U8 master and media playlists.

mod playlist;

pub use playlist::{MasterPlaylist, MediaPlaylist, PlaylistType, SegmentEntry, VariantStream};
