//! Per-rendition encoder lifecycle.
//!
//! A [`RenditionTranscoder`] owns at most one ffmpeg process and the scratch
//! directory it writes into. Its status moves
//! `NotStarted -> Running -> {Completed | Failed | Killed}`; process exit is
//! observed by a supervisor task, and every path out of `Running` ends with the
//! process reaped.

use castforge_av::actions::{HlsRendition, HlsWindow};
use castforge_av::workspace::remove_dir_best_effort;
use castforge_av::{ExitOutcome, ScratchDir};
use castforge_common::{Error, Result, SessionId};
use castforge_media::segment::{validate_segment_name, SegmentScan};
use castforge_media::{MediaPlaylist, QualityProfile};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::StreamingSettings;
use crate::config::PlaylistMode;

/// Lifecycle state of a rendition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum RenditionStatus {
    NotStarted,
    Running,
    /// The encoder finished the whole source.
    Completed,
    /// Spawn failure or non-zero exit.
    Failed(String),
    /// Stopped by session teardown.
    Killed,
}

impl RenditionStatus {
    /// Whether a start request should leave the rendition alone.
    fn is_active(&self) -> bool {
        matches!(self, RenditionStatus::Running | RenditionStatus::Completed)
    }
}

/// Serializable view of a rendition.
#[derive(Debug, Clone, Serialize)]
pub struct RenditionSummary {
    pub quality: &'static str,
    pub status: RenditionStatus,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub segments: u32,
}

struct Supervisor {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct RenditionState {
    status: RenditionStatus,
    started_at: Option<DateTime<Utc>>,
    pid: Option<u32>,
    supervisor: Option<Supervisor>,
}

/// Encoder lifecycle manager for one (session, quality) pair.
pub struct RenditionTranscoder {
    session_id: SessionId,
    profile: &'static QualityProfile,
    source: PathBuf,
    dir: PathBuf,
    settings: Arc<StreamingSettings>,
    tracker: TaskTracker,
    state: Mutex<RenditionState>,
}

impl RenditionTranscoder {
    pub fn new(
        session_id: SessionId,
        profile: &'static QualityProfile,
        source: PathBuf,
        dir: PathBuf,
        settings: Arc<StreamingSettings>,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            session_id,
            profile,
            source,
            dir,
            settings,
            tracker,
            state: Mutex::new(RenditionState {
                status: RenditionStatus::NotStarted,
                started_at: None,
                pid: None,
                supervisor: None,
            }),
        }
    }

    pub fn profile(&self) -> &'static QualityProfile {
        self.profile
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.dir
    }

    pub fn status(&self) -> RenditionStatus {
        self.state.lock().status.clone()
    }

    pub fn pid(&self) -> Option<u32> {
        self.state.lock().pid
    }

    /// Launch the encoder unless it is already running or has completed.
    ///
    /// Returns `Ok(true)` when a new process was spawned. Concurrent callers
    /// serialize on the state lock, so at most one process is ever spawned
    /// per rendition at a time.
    pub fn start(self: &Arc<Self>) -> Result<bool> {
        let mut state = self.state.lock();
        if state.status.is_active() {
            return Ok(false);
        }

        // Blocking filesystem work under the state lock. It stays cheap: a
        // failed encoder's directory is removed before `Failed` is published,
        // and `Killed` is only reached during teardown, so this sees a missing
        // or empty directory.
        let scratch = ScratchDir::create(&self.dir).map_err(|e| {
            state.status = RenditionStatus::Failed(e.to_string());
            Error::Internal(e.to_string())
        })?;

        let window = match self.settings.playlist_mode {
            PlaylistMode::Live => HlsWindow::Live(self.settings.window_size),
            PlaylistMode::Vod => HlsWindow::Vod,
        };
        let encode = HlsRendition {
            input: self.source.clone(),
            output_dir: scratch.path().to_path_buf(),
            width: self.profile.width,
            height: self.profile.height,
            video_kbps: self.profile.video_kbps,
            max_kbps: self.profile.max_kbps,
            buffer_kbps: self.profile.buffer_kbps,
            audio_kbps: self.profile.audio_kbps,
            profile: self.profile.profile.to_string(),
            level: self.profile.level.to_string(),
            keyint: self.profile.keyint,
            segment_secs: self.settings.segment_secs,
            window,
        };

        let label = format!("{}/{}", self.session_id, self.profile.name);
        let process = match encode.command(&self.settings.ffmpeg).spawn(label) {
            Ok(process) => process,
            Err(e) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    quality = self.profile.name,
                    error = %e,
                    "Failed to start rendition encoder"
                );
                state.status = RenditionStatus::Failed(e.to_string());
                state.pid = None;
                // Nothing else can own the directory: no process was spawned.
                let _ = std::fs::remove_dir_all(scratch.path());
                return Err(Error::tool("ffmpeg", e.to_string()));
            }
        };

        let pid = process.pid();
        let cancel = CancellationToken::new();
        let task = self
            .tracker
            .spawn(supervise(Arc::clone(self), process, cancel.clone()));

        state.status = RenditionStatus::Running;
        state.started_at = Some(Utc::now());
        state.pid = pid;
        state.supervisor = Some(Supervisor { cancel, task });

        tracing::info!(
            session_id = %self.session_id,
            quality = self.profile.name,
            pid,
            "Rendition encoder started"
        );
        Ok(true)
    }

    /// Terminate the encoder (SIGTERM, grace, SIGKILL) and remove the
    /// scratch directory.
    ///
    /// Returns once the process has been reaped and the directory is gone.
    pub async fn stop(&self) {
        let supervisor = self.state.lock().supervisor.take();
        if let Some(Supervisor { cancel, task }) = supervisor {
            cancel.cancel();
            if let Err(e) = task.await {
                tracing::error!(
                    session_id = %self.session_id,
                    quality = self.profile.name,
                    error = %e,
                    "Rendition supervisor panicked"
                );
            }
        }

        remove_dir_best_effort(&self.dir).await;

        let mut state = self.state.lock();
        if matches!(state.status, RenditionStatus::Running | RenditionStatus::NotStarted) {
            state.status = RenditionStatus::Killed;
        }
        state.pid = None;
    }

    /// Segments currently on disk.
    pub fn scan(&self) -> SegmentScan {
        match SegmentScan::scan(&self.dir) {
            Ok(scan) => scan,
            Err(e) => {
                tracing::debug!(dir = %self.dir.display(), error = %e, "Segment scan failed");
                SegmentScan::default()
            }
        }
    }

    /// Media playlist reflecting the current encoder output.
    pub fn playlist(&self) -> MediaPlaylist {
        let target = self.settings.segment_secs;
        let status = self.status();
        let produced = self.scan().produced();

        match (status, self.settings.playlist_mode) {
            (RenditionStatus::Running, PlaylistMode::Live) => {
                MediaPlaylist::live(produced, self.settings.window_size, target)
            }
            (RenditionStatus::Completed, PlaylistMode::Live) => MediaPlaylist {
                ended: true,
                ..MediaPlaylist::live(produced, self.settings.window_size, target)
            },
            (RenditionStatus::Running, PlaylistMode::Vod) => {
                MediaPlaylist::vod(produced, false, target)
            }
            (RenditionStatus::Completed, PlaylistMode::Vod) => {
                MediaPlaylist::vod(produced, true, target)
            }
            _ => MediaPlaylist::empty(target),
        }
    }

    /// Path of a finished segment, validating the client-supplied name.
    pub fn segment_path(&self, name: &str) -> Result<PathBuf> {
        validate_segment_name(name).map_err(|e| Error::Validation(e.to_string()))?;
        let path = self.dir.join(name);
        if !path.is_file() {
            return Err(Error::not_found("segment", name));
        }
        Ok(path)
    }

    pub fn summary(&self) -> RenditionSummary {
        let (status, pid, started_at) = {
            let state = self.state.lock();
            (state.status.clone(), state.pid, state.started_at)
        };
        RenditionSummary {
            quality: self.profile.name,
            status,
            pid,
            started_at,
            segments: self.scan().produced(),
        }
    }
}

/// Own the encoder until it exits or is cancelled.
async fn supervise(
    rendition: Arc<RenditionTranscoder>,
    mut process: castforge_av::EncoderProcess,
    cancel: CancellationToken,
) {
    let session_id = rendition.session_id;
    let quality = rendition.profile.name;

    let next = tokio::select! {
        result = process.wait() => match result {
            Ok(status) if status.success() => RenditionStatus::Completed,
            Ok(status) => RenditionStatus::Failed(format!("encoder exited with {status}")),
            Err(e) => RenditionStatus::Failed(e.to_string()),
        },
        _ = cancel.cancelled() => {
            let outcome = process.terminate(rendition.settings.kill_grace).await;
            tracing::debug!(%session_id, quality, ?outcome, "Rendition encoder stopped");
            if let ExitOutcome::Killed = outcome {
                tracing::warn!(%session_id, quality, "Encoder ignored SIGTERM, killed");
            }
            RenditionStatus::Killed
        }
    };

    match &next {
        RenditionStatus::Completed => {
            tracing::info!(%session_id, quality, "Rendition encode completed");
        }
        RenditionStatus::Failed(reason) => {
            tracing::warn!(%session_id, quality, %reason, "Rendition encoder failed");
            // Remove before publishing the status so a restart cannot race
            // with this removal.
            remove_dir_best_effort(&rendition.dir).await;
        }
        _ => {}
    }

    let mut state = rendition.state.lock();
    state.status = next;
    state.pid = None;
}
