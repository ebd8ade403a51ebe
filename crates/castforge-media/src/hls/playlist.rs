//! HLS playlist structures.

use crate::quality::QualityProfile;
use crate::segment::segment_name;
use std::fmt;

/// Protocol version written to every playlist.
const HLS_VERSION: u32 = 3;

/// Playlist type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistType {
    Vod,
    Event,
}

/// A segment entry in a media playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentEntry {
    /// Duration in seconds.
    pub duration: f64,
    /// Segment URI.
    pub uri: String,
}

/// Media playlist for a single rendition.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    /// Target duration in seconds.
    pub target_duration: u32,
    /// Media sequence number of the first listed segment.
    pub media_sequence: u32,
    /// Optional `#EXT-X-PLAYLIST-TYPE`.
    pub playlist_type: Option<PlaylistType>,
    /// Segment entries.
    pub segments: Vec<SegmentEntry>,
    /// Whether `#EXT-X-ENDLIST` is written.
    pub ended: bool,
}

impl MediaPlaylist {
    /// A valid playlist with no segments, for renditions with nothing to serve yet.
    pub fn empty(target_duration: u32) -> Self {
        Self {
            target_duration,
            media_sequence: 0,
            playlist_type: None,
            segments: Vec::new(),
            ended: false,
        }
    }

    /// Sliding window over the most recent `window` of `produced` segments.
    ///
    /// The sequence number is `produced - window` (floored at 0), so players see
    /// monotonically increasing sequence numbers as old segments roll off.
    pub fn live(produced: u32, window: u32, target_duration: u32) -> Self {
        let first = produced.saturating_sub(window);
        Self {
            media_sequence: first,
            segments: entries(first..produced, target_duration),
            ..Self::empty(target_duration)
        }
    }

    /// Every segment from the start.
    ///
    /// While the encoder is still running this is an `EVENT` playlist without
    /// an end marker; once it has finished it becomes `VOD` and ends.
    pub fn vod(produced: u32, complete: bool, target_duration: u32) -> Self {
        Self {
            playlist_type: Some(if complete {
                PlaylistType::Vod
            } else {
                PlaylistType::Event
            }),
            segments: entries(0..produced, target_duration),
            ended: complete,
            ..Self::empty(target_duration)
        }
    }

    /// Render to M3U8 string.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

fn entries(indices: std::ops::Range<u32>, target_duration: u32) -> Vec<SegmentEntry> {
    indices
        .map(|i| SegmentEntry {
            duration: f64::from(target_duration),
            uri: segment_name(i),
        })
        .collect()
}

impl fmt::Display for MediaPlaylist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "#EXTM3U")?;
        writeln!(f, "#EXT-X-VERSION:{}", HLS_VERSION)?;
        writeln!(f, "#EXT-X-TARGETDURATION:{}", self.target_duration)?;
        writeln!(f, "#EXT-X-MEDIA-SEQUENCE:{}", self.media_sequence)?;

        match self.playlist_type {
            Some(PlaylistType::Vod) => writeln!(f, "#EXT-X-PLAYLIST-TYPE:VOD")?,
            Some(PlaylistType::Event) => writeln!(f, "#EXT-X-PLAYLIST-TYPE:EVENT")?,
            None => {}
        }

        for segment in &self.segments {
            writeln!(f, "#EXTINF:{:.3},", segment.duration)?;
            writeln!(f, "{}", segment.uri)?;
        }

        if self.ended {
            writeln!(f, "#EXT-X-ENDLIST")?;
        }

        Ok(())
    }
}

/// Master playlist with multiple renditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MasterPlaylist {
    /// Stream variants, in ladder order.
    pub variants: Vec<VariantStream>,
}

impl MasterPlaylist {
    /// Create a new master playlist.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a ladder, mapping each quality name to its playlist URI.
    pub fn from_ladder<F>(ladder: &[&QualityProfile], uri_for: F) -> Self
    where
        F: Fn(&str) -> String,
    {
        ladder.iter().fold(Self::new(), |master, profile| {
            master.add_variant(VariantStream {
                bandwidth: profile.bandwidth(),
                width: profile.width,
                height: profile.height,
                uri: uri_for(profile.name),
            })
        })
    }

    /// Add a stream variant.
    pub fn add_variant(mut self, variant: VariantStream) -> Self {
        self.variants.push(variant);
        self
    }

    /// Render to M3U8 string.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for MasterPlaylist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "#EXTM3U")?;
        writeln!(f, "#EXT-X-VERSION:{}", HLS_VERSION)?;

        for variant in &self.variants {
            writeln!(
                f,
                "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{}",
                variant.bandwidth, variant.width, variant.height
            )?;
            writeln!(f, "{}", variant.uri)?;
        }

        Ok(())
    }
}

/// Stream variant information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantStream {
    /// Bandwidth in bits per second.
    pub bandwidth: u64,
    /// Video width.
    pub width: u32,
    /// Video height.
    pub height: u32,
    /// Media playlist URI.
    pub uri: String,
}
