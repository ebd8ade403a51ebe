//! Adaptive streaming session registry.
//!
//! Sessions are created by the first adaptive request for a source, read by
//! every playlist and segment request, and destroyed by an explicit stop or
//! by the idle sweep. Both destruction paths run the same teardown, exactly
//! once per session.

use castforge_av::workspace::remove_dir_best_effort;
use castforge_av::{Prober, SourceDescriptor, SourceStatus};
use castforge_common::{Error, Result, SessionId};
use castforge_media::quality::{self, QualityProfile};
use castforge_media::MasterPlaylist;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::transcoder::{RenditionSummary, RenditionTranscoder};
use crate::config::PlaylistMode;
use super::StreamingSettings;

/// Where a session's media comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSource {
    pub file_ref: String,
    pub file_index: usize,
    pub path: PathBuf,
}

struct RenditionTable {
    /// Set when teardown begins; no renditions are created afterwards.
    closed: bool,
    map: HashMap<&'static str, Arc<RenditionTranscoder>>,
}

/// One adaptive streaming session.
pub struct StreamingSession {
    pub id: SessionId,
    pub source: SessionSource,
    pub descriptor: Option<SourceDescriptor>,
    pub ladder: Vec<&'static QualityProfile>,
    pub created_at: DateTime<Utc>,
    last_accessed: Mutex<Instant>,
    renditions: Mutex<RenditionTable>,
    scratch_root: PathBuf,
    settings: Arc<StreamingSettings>,
    tracker: TaskTracker,
    torn_down: OnceCell<()>,
}

/// Serializable view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub source: SessionSource,
    pub probe: Option<SourceDescriptor>,
    pub qualities: Vec<&'static str>,
    pub mode: PlaylistMode,
    pub renditions: Vec<RenditionSummary>,
    pub created_at: DateTime<Utc>,
    pub idle_secs: u64,
}

impl StreamingSession {
    /// Record a read.
    pub fn touch(&self) {
        *self.last_accessed.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_accessed.lock().elapsed()
    }

    pub fn is_idle(&self, threshold: Duration) -> bool {
        self.idle_for() > threshold
    }

    /// Whether teardown has begun.
    pub fn is_closed(&self) -> bool {
        self.renditions.lock().closed
    }

    pub fn quality_names(&self) -> Vec<&'static str> {
        self.ladder.iter().map(|p| p.name).collect()
    }

    fn profile(&self, quality: &str) -> Result<&'static QualityProfile> {
        self.ladder
            .iter()
            .copied()
            .find(|p| p.name == quality)
            .ok_or_else(|| Error::not_found("quality", quality))
    }

    /// Master playlist with absolute media playlist URLs.
    pub fn master_playlist(&self) -> MasterPlaylist {
        MasterPlaylist::from_ladder(&self.ladder, |quality| {
            format!("/api/hls/{}/{}/index.m3u8", self.id, quality)
        })
    }

    /// Existing rendition for `quality`, if one was ever requested.
    pub fn rendition(&self, quality: &str) -> Result<Option<Arc<RenditionTranscoder>>> {
        self.profile(quality)?;
        let table = self.renditions.lock();
        if table.closed {
            return Err(Error::SessionClosed(self.id.to_string()));
        }
        Ok(table.map.get(quality).cloned())
    }

    /// Rendition for playback: created and started on first request only.
    ///
    /// A rendition that already exists is returned as is, whatever its state;
    /// failed encoders are restarted only through [`Self::start_rendition`].
    pub fn ensure_rendition(&self, quality: &str) -> Result<Arc<RenditionTranscoder>> {
        self.with_rendition(quality, false)
    }

    /// Explicitly (re)start a rendition.
    ///
    /// No-op for a running or completed rendition; a failed one is restarted.
    pub fn start_rendition(&self, quality: &str) -> Result<Arc<RenditionTranscoder>> {
        self.with_rendition(quality, true)
    }

    fn with_rendition(&self, quality: &str, restart: bool) -> Result<Arc<RenditionTranscoder>> {
        let profile = self.profile(quality)?;
        let mut table = self.renditions.lock();
        if table.closed {
            return Err(Error::SessionClosed(self.id.to_string()));
        }

        if let Some(existing) = table.map.get(profile.name) {
            let existing = Arc::clone(existing);
            if restart {
                existing.start()?;
            }
            return Ok(existing);
        }

        let rendition = Arc::new(RenditionTranscoder::new(
            self.id,
            profile,
            self.source.path.clone(),
            self.scratch_root.join(profile.name),
            Arc::clone(&self.settings),
            self.tracker.clone(),
        ));
        table.map.insert(profile.name, Arc::clone(&rendition));
        // Start while holding the table lock: the entry and its process
        // appear together. `start` creates an empty scratch directory and
        // spawns synchronously, so other requests on this session wait only
        // for that.
        rendition.start()?;
        Ok(rendition)
    }

    /// Stop every rendition and remove all scratch state.
    ///
    /// Runs exactly once; concurrent callers wait for the first to finish.
    pub async fn teardown(&self) {
        self.torn_down
            .get_or_init(|| async {
                let renditions: Vec<_> = {
                    let mut table = self.renditions.lock();
                    table.closed = true;
                    table.map.drain().map(|(_, r)| r).collect()
                };

                join_all(renditions.iter().map(|r| r.stop())).await;
                remove_dir_best_effort(&self.scratch_root).await;

                tracing::info!(
                    session_id = %self.id,
                    renditions = renditions.len(),
                    lifetime_secs = (Utc::now() - self.created_at).num_seconds(),
                    "Session torn down"
                );
            })
            .await;
    }

    pub fn mode(&self) -> PlaylistMode {
        self.settings.playlist_mode
    }

    pub fn summary(&self) -> SessionSummary {
        let mut renditions: Vec<_> = self
            .renditions
            .lock()
            .map
            .values()
            .map(|r| r.summary())
            .collect();
        renditions.sort_by_key(|r| std::cmp::Reverse(quality::find(r.quality).map(|p| p.width)));

        SessionSummary {
            session_id: self.id,
            source: self.source.clone(),
            probe: self.descriptor.clone(),
            qualities: self.quality_names(),
            mode: self.mode(),
            renditions,
            created_at: self.created_at,
            idle_secs: self.idle_for().as_secs(),
        }
    }
}

/// Concurrency-safe store of active sessions.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<StreamingSession>>,
    prober: Arc<dyn Prober>,
    settings: Arc<StreamingSettings>,
    tracker: TaskTracker,
}

impl SessionRegistry {
    pub fn new(
        prober: Arc<dyn Prober>,
        settings: Arc<StreamingSettings>,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            prober,
            settings,
            tracker,
        }
    }

    pub fn settings(&self) -> &StreamingSettings {
        &self.settings
    }

    /// Probe the source, compute its ladder and register a new session.
    pub async fn create(&self, source: SessionSource) -> Result<Arc<StreamingSession>> {
        self.create_with_mode(source, None).await
    }

    /// Like [`Self::create`], overriding the configured playlist mode.
    pub async fn create_with_mode(
        &self,
        source: SessionSource,
        mode: Option<PlaylistMode>,
    ) -> Result<Arc<StreamingSession>> {
        let (descriptor, ladder) = match self.prober.probe(&source.path).await {
            SourceStatus::Available(descriptor) => {
                let ladder = quality::ladder(descriptor.width, descriptor.height);
                (Some(descriptor), ladder)
            }
            SourceStatus::Unavailable(reason) if self.settings.fallback_on_probe_failure => {
                tracing::warn!(
                    path = %source.path.display(),
                    %reason,
                    "Source probe unavailable, falling back to baseline rendition"
                );
                (None, vec![quality::baseline()])
            }
            SourceStatus::Unavailable(reason) => return Err(Error::SourceUnavailable(reason)),
        };

        let settings = match mode {
            Some(mode) if mode != self.settings.playlist_mode => Arc::new(StreamingSettings {
                playlist_mode: mode,
                ..(*self.settings).clone()
            }),
            _ => Arc::clone(&self.settings),
        };

        let id = SessionId::new();
        let session = Arc::new(StreamingSession {
            id,
            source,
            descriptor,
            ladder,
            created_at: Utc::now(),
            last_accessed: Mutex::new(Instant::now()),
            renditions: Mutex::new(RenditionTable {
                closed: false,
                map: HashMap::new(),
            }),
            scratch_root: self.settings.scratch_root.join(id.to_string()),
            settings,
            tracker: self.tracker.clone(),
            torn_down: OnceCell::new(),
        });

        self.sessions.insert(id, Arc::clone(&session));
        tracing::info!(
            session_id = %id,
            file_ref = %session.source.file_ref,
            file_index = session.source.file_index,
            qualities = ?session.quality_names(),
            mode = ?session.mode(),
            "Created streaming session"
        );

        Ok(session)
    }

    /// Look up a live session and mark it as accessed.
    pub fn get(&self, id: &SessionId) -> Option<Arc<StreamingSession>> {
        let session = self.sessions.get(id).map(|entry| Arc::clone(entry.value()))?;
        if session.is_closed() {
            return None;
        }
        session.touch();
        Some(session)
    }

    /// Like [`Self::get`], failing with `NotFound` for unknown ids.
    pub fn require(&self, id: &SessionId) -> Result<Arc<StreamingSession>> {
        self.get(id).ok_or_else(|| Error::not_found("session", id))
    }

    /// Tear down a session. Idempotent.
    ///
    /// Returns `true` if the session existed. Concurrent calls (including a
    /// racing sweep) all return after the single teardown has finished.
    pub async fn stop(&self, id: &SessionId) -> bool {
        let Some(session) = self.sessions.get(id).map(|entry| Arc::clone(entry.value())) else {
            return false;
        };
        session.teardown().await;
        self.sessions
            .remove_if(id, |_, current| Arc::ptr_eq(current, &session));
        true
    }

    /// Tear down a session only if it is still idle.
    ///
    /// A session read since it was picked for eviction is kept.
    pub async fn stop_if_idle(&self, id: &SessionId, threshold: Duration) -> bool {
        let Some(session) = self.sessions.get(id).map(|entry| Arc::clone(entry.value())) else {
            return false;
        };
        if !session.is_idle(threshold) {
            tracing::debug!(session_id = %id, "Session touched before eviction, keeping it");
            return false;
        }
        tracing::info!(session_id = %id, "Evicting idle session");
        self.stop(id).await
    }

    /// Tear down every session idle for longer than the configured threshold.
    ///
    /// Returns the number of sessions removed.
    pub async fn sweep(&self) -> usize {
        let threshold = self.settings.idle_timeout;
        let idle: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_idle(threshold))
            .map(|entry| *entry.key())
            .collect();

        if idle.is_empty() {
            return 0;
        }

        let stopped = join_all(idle.iter().map(|id| self.stop_if_idle(id, threshold))).await;

        let removed = stopped.into_iter().filter(|s| *s).count();
        tracing::debug!(removed, "Swept idle sessions");
        removed
    }

    /// Snapshot of active sessions, newest first.
    pub fn list(&self) -> Vec<SessionSummary> {
        let mut sessions: Vec<_> = self
            .sessions
            .iter()
            .filter(|entry| !entry.value().is_closed())
            .map(|entry| entry.value().summary())
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Tear down every session.
    pub async fn shutdown(&self) {
        let ids: Vec<SessionId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        if !ids.is_empty() {
            tracing::info!(sessions = ids.len(), "Stopping all streaming sessions");
        }
        join_all(ids.iter().map(|id| self.stop(id))).await;
    }
}

/// Start a background task that periodically evicts idle sessions.
///
/// The task exits when `shutdown` is cancelled.
pub fn start_sweep_task(
    registry: Arc<SessionRegistry>,
    interval: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    registry.sweep().await;
                }
            }
        }
        tracing::debug!("Session sweep task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use castforge_av::StaticProber;
    use std::time::Duration;

    fn descriptor(width: u32, height: u32) -> SourceDescriptor {
        SourceDescriptor {
            width,
            height,
            duration: Some(Duration::from_secs(60)),
            bit_rate: None,
            video_codec: "h264".into(),
            audio_codec: Some("aac".into()),
            container: "matroska,webm".into(),
        }
    }

    fn source(root: &std::path::Path) -> SessionSource {
        SessionSource {
            file_ref: "show".into(),
            file_index: 0,
            path: root.join("movie.mkv"),
        }
    }

    fn registry_with(
        root: &std::path::Path,
        status: SourceStatus,
        ffmpeg: PathBuf,
        tweak: impl FnOnce(&mut StreamingSettings),
    ) -> SessionRegistry {
        let mut settings = super::super::test_support::settings_with(
            ffmpeg,
            root.join("scratch"),
            crate::config::PlaylistMode::Live,
        );
        tweak(&mut settings);
        SessionRegistry::new(
            Arc::new(StaticProber::new(status)),
            Arc::new(settings),
            TaskTracker::new(),
        )
    }

    #[tokio::test]
    async fn test_create_computes_ladder() {
        let root = tempfile::tempdir().unwrap();
        let registry = registry_with(
            root.path(),
            SourceStatus::Available(descriptor(1280, 720)),
            PathBuf::from("ffmpeg"),
            |_| {},
        );

        let session = registry.create(source(root.path())).await.unwrap();
        assert_eq!(session.quality_names(), ["720p", "480p", "360p", "240p"]);
        assert_eq!(registry.len(), 1);

        let m3u8 = session.master_playlist().render();
        assert!(m3u8.contains(&format!("/api/hls/{}/720p/index.m3u8", session.id)));
    }

    #[tokio::test]
    async fn test_probe_failure_falls_back_to_baseline() {
        let root = tempfile::tempdir().unwrap();
        let registry = registry_with(
            root.path(),
            SourceStatus::Unavailable("ffprobe not found".into()),
            PathBuf::from("ffmpeg"),
            |_| {},
        );
        let session = registry.create(source(root.path())).await.unwrap();
        assert_eq!(session.quality_names(), ["240p"]);
        assert!(session.descriptor.is_none());
    }

    #[tokio::test]
    async fn test_probe_failure_rejected_when_configured() {
        let root = tempfile::tempdir().unwrap();
        let registry = registry_with(
            root.path(),
            SourceStatus::Unavailable("corrupt".into()),
            PathBuf::from("ffmpeg"),
            |s| s.fallback_on_probe_failure = false,
        );
        let err = registry.create(source(root.path())).await.err().unwrap();
        assert_eq!(err.http_status(), 422);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_mode_override_applies_to_one_session() {
        use crate::config::PlaylistMode;

        let root = tempfile::tempdir().unwrap();
        let registry = registry_with(
            root.path(),
            SourceStatus::Available(descriptor(640, 360)),
            PathBuf::from("ffmpeg"),
            |_| {},
        );
        let vod = registry
            .create_with_mode(source(root.path()), Some(PlaylistMode::Vod))
            .await
            .unwrap();
        let live = registry.create(source(root.path())).await.unwrap();

        assert_eq!(vod.mode(), PlaylistMode::Vod);
        assert_eq!(live.mode(), PlaylistMode::Live);
        assert_eq!(registry.settings().playlist_mode, PlaylistMode::Live);
        assert_ne!(vod.id, live.id);
    }

    #[tokio::test]
    async fn test_unknown_quality_is_not_found() {
        let root = tempfile::tempdir().unwrap();
        let registry = registry_with(
            root.path(),
            SourceStatus::Available(descriptor(640, 360)),
            PathBuf::from("ffmpeg"),
            |_| {},
        );
        let session = registry.create(source(root.path())).await.unwrap();
        let err = session.ensure_rendition("1080p").err().unwrap();
        assert_eq!(err.http_status(), 404);
    }

    #[tokio::test]
    async fn test_get_touches_and_stop_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let registry = registry_with(
            root.path(),
            SourceStatus::Available(descriptor(1920, 1080)),
            PathBuf::from("ffmpeg"),
            |_| {},
        );
        let session = registry.create(source(root.path())).await.unwrap();
        let id = session.id;

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(session.idle_for() >= Duration::from_millis(30));
        registry.get(&id).unwrap();
        assert!(session.idle_for() < Duration::from_millis(30));

        let (first, _second) = tokio::join!(registry.stop(&id), registry.stop(&id));
        assert!(first);
        assert!(registry.get(&id).is_none());
        assert!(!registry.stop(&id).await);
        assert!(registry.is_empty());

        let err = session.ensure_rendition("720p").err().unwrap();
        assert_matches::assert_matches!(err, Error::SessionClosed(_));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_terminates_renditions() {
        use super::super::test_support::{fake_ffmpeg, HANGING};
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let root = tempfile::tempdir().unwrap();
        let ffmpeg = fake_ffmpeg(root.path(), HANGING);
        let registry = registry_with(
            root.path(),
            SourceStatus::Available(descriptor(1920, 1080)),
            ffmpeg,
            |_| {},
        );
        let session = registry.create(source(root.path())).await.unwrap();

        let pids: Vec<u32> = ["1080p", "480p"]
            .into_iter()
            .map(|q| session.ensure_rendition(q).unwrap().pid().unwrap())
            .collect();
        let dirs: Vec<PathBuf> = ["1080p", "480p"]
            .into_iter()
            .map(|q| session.rendition(q).unwrap().unwrap().scratch_dir().to_path_buf())
            .collect();
        assert!(dirs.iter().all(|d| d.is_dir()));

        assert!(registry.stop(&session.id).await);

        for pid in pids {
            assert_eq!(kill(Pid::from_raw(pid as i32), None), Err(Errno::ESRCH));
        }
        assert!(dirs.iter().all(|d| !d.exists()));
        assert!(!root.path().join("scratch").join(session.id.to_string()).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sweep_evicts_idle_sessions() {
        use super::super::test_support::{fake_ffmpeg, HANGING};

        let root = tempfile::tempdir().unwrap();
        let ffmpeg = fake_ffmpeg(root.path(), HANGING);
        let registry = registry_with(
            root.path(),
            SourceStatus::Available(descriptor(1280, 720)),
            ffmpeg,
            |s| s.idle_timeout = Duration::from_millis(100),
        );

        let idle = registry.create(source(root.path())).await.unwrap();
        let rendition = idle.ensure_rendition("720p").unwrap();
        let active = registry.create(source(root.path())).await.unwrap();

        assert_eq!(registry.sweep().await, 0);

        tokio::time::sleep(Duration::from_millis(150)).await;
        registry.get(&active.id).unwrap();

        assert_eq!(registry.sweep().await, 1);
        assert!(registry.get(&idle.id).is_none());
        assert!(registry.get(&active.id).is_some());
        assert!(!rendition.scratch_dir().exists());
        assert_eq!(
            rendition.status(),
            crate::streaming::transcoder::RenditionStatus::Killed
        );
    }

    #[tokio::test]
    async fn test_touched_session_survives_eviction() {
        let root = tempfile::tempdir().unwrap();
        let registry = registry_with(
            root.path(),
            SourceStatus::Available(descriptor(1280, 720)),
            PathBuf::from("ffmpeg"),
            |_| {},
        );
        let session = registry.create(source(root.path())).await.unwrap();
        let threshold = Duration::from_millis(50);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(session.is_idle(threshold));
        // Read between selection and eviction.
        registry.get(&session.id).unwrap();

        assert!(!registry.stop_if_idle(&session.id, threshold).await);
        assert!(registry.get(&session.id).is_some());
        assert!(!session.is_closed());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(registry.stop_if_idle(&session.id, threshold).await);
        assert!(registry.get(&session.id).is_none());
    }

    #[tokio::test]
    async fn test_sweep_task_stops_on_cancel() {
        let root = tempfile::tempdir().unwrap();
        let registry = Arc::new(registry_with(
            root.path(),
            SourceStatus::Available(descriptor(1280, 720)),
            PathBuf::from("ffmpeg"),
            |s| s.idle_timeout = Duration::from_millis(10),
        ));
        registry.create(source(root.path())).await.unwrap();

        let token = CancellationToken::new();
        let handle = start_sweep_task(
            Arc::clone(&registry),
            Duration::from_millis(20),
            token.clone(),
        );

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !registry.is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(registry.is_empty());

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_list_and_shutdown() {
        let root = tempfile::tempdir().unwrap();
        let registry = registry_with(
            root.path(),
            SourceStatus::Available(descriptor(854, 480)),
            PathBuf::from("ffmpeg"),
            |_| {},
        );
        registry.create(source(root.path())).await.unwrap();
        registry.create(source(root.path())).await.unwrap();

        let list = registry.list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].qualities, ["480p", "360p", "240p"]);

        registry.shutdown().await;
        assert!(registry.is_empty());
    }
}
