//! Source inspection.
//!
//! [`Prober`] is the seam between the session layer and the inspection
//! backend. [`FfprobeProber`] shells out to ffprobe; [`StaticProber`] returns
//! a fixed answer and is what tests plug in.

mod ffprobe;
mod types;

pub use ffprobe::FfprobeProber;
pub use types::{SourceDescriptor, SourceStatus};

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Inspects a media source.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Inspect `path`, reporting [`SourceStatus::Unavailable`] on any failure.
    async fn probe(&self, path: &Path) -> SourceStatus;
}

/// Prober that always returns the same status.
#[derive(Debug)]
pub struct StaticProber {
    status: SourceStatus,
    calls: AtomicUsize,
}

impl StaticProber {
    /// Create a prober answering with `status`.
    pub fn new(status: SourceStatus) -> Self {
        Self {
            status,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of probes served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for StaticProber {
    async fn probe(&self, _path: &Path) -> SourceStatus {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.status.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_prober_counts_calls() {
        let prober = StaticProber::new(SourceStatus::Unavailable("test".into()));
        assert_eq!(
            prober.probe(Path::new("a.mkv")).await,
            SourceStatus::Unavailable("test".into())
        );
        prober.probe(Path::new("b.mkv")).await;
        assert_eq!(prober.calls(), 2);
    }
}
