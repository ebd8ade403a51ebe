//! castforge-common: shared types and utilities.
//!
//! - **Typed IDs**: [`SessionId`], the opaque handle of an adaptive streaming session
//! - **Path utilities**: media detection, content types, and browser compatibility
//! - **Error handling**: the [`Error`] type every HTTP-facing layer funnels into
//!
//! # Examples
//!
//! ```
//! use castforge_common::SessionId;
//! use castforge_common::paths::{content_type_for_path, is_video_file};
//! use std::path::Path;
//!
//! let id = SessionId::new();
//! let parsed: SessionId = id.to_string().parse().unwrap();
//! assert_eq!(id, parsed);
//!
//! assert!(is_video_file(Path::new("movie.mkv")));
//! assert_eq!(content_type_for_path(Path::new("movie.mp4")), "video/mp4");
//! ```

pub mod error;
pub mod ids;
pub mod paths;

pub use error::{Error, Result};
pub use ids::*;
