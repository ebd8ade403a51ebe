//! Segment file naming and encoder output scans.
//!
//! Segments are named `segment_` + a five digit, zero-padded index starting
//! at 0 + `.ts`. The encoder writes through temporary files and renames them
//! into place, so any file matching the pattern is complete.

use crate::{Error, Result};
use std::io::ErrorKind;
use std::path::Path;

const PREFIX: &str = "segment_";
const EXTENSION: &str = ".ts";
const INDEX_DIGITS: usize = 5;

/// File name for the segment at `index`.
///
/// ```
/// assert_eq!(castforge_media::segment_name(7), "segment_00007.ts");
/// ```
pub fn segment_name(index: u32) -> String {
    format!("{PREFIX}{index:0width$}{EXTENSION}", width = INDEX_DIGITS)
}

/// Parse a segment file name back into its index.
pub fn parse_segment_name(name: &str) -> Option<u32> {
    let digits = name.strip_prefix(PREFIX)?.strip_suffix(EXTENSION)?;
    if digits.len() < INDEX_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Validate a client-supplied segment name.
pub fn validate_segment_name(name: &str) -> Result<u32> {
    parse_segment_name(name).ok_or_else(|| Error::InvalidSegmentName(name.to_string()))
}

/// Segments currently present in a scratch directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentScan {
    /// Indices present on disk, ascending.
    pub present: Vec<u32>,
}

impl SegmentScan {
    /// Scan `dir`; a missing directory scans as empty.
    pub fn scan(dir: &Path) -> Result<Self> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };

        let mut present = Vec::new();
        for entry in entries {
            let entry = entry?;
            if let Some(index) = entry.file_name().to_str().and_then(parse_segment_name) {
                present.push(index);
            }
        }
        present.sort_unstable();
        Ok(Self { present })
    }

    /// Number of segments the encoder has produced so far.
    ///
    /// Indices are dense from 0, so this is the highest index plus one even
    /// when older segments were already deleted from a live window.
    pub fn produced(&self) -> u32 {
        self.present.last().map(|i| i + 1).unwrap_or(0)
    }

    /// Whether any segment exists.
    pub fn is_empty(&self) -> bool {
        self.present.is_empty()
    }
}
