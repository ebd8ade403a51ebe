//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which lays out a library and scratch directory in
//! a temp dir, writes a shell script standing in for ffmpeg, and serves the
//! full router on a random port.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use castforge::config::Config;
use castforge::server::{self, AppContext};
use castforge::streaming::LocalLibrary;
use castforge_av::{SourceDescriptor, SourceStatus, StaticProber, Toolchain};
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Stand-in encoder.
///
/// HLS invocations (last argument is a playlist path) write three segments
/// and keep running. Real-time invocations (`pipe:1`) echo their arguments,
/// then either copy stdin (`pipe:0` input) or emit an endless stream.
pub const FAKE_FFMPEG: &str = r#"for last; do :; done
if [ "$last" = "pipe:1" ]; then
  case " $* " in
    *" pipe:0 "*) exec cat ;;
  esac
  printf 'args: %s\n' "$*"
  exec yes chunk
fi
dir=$(dirname "$last")
for i in 0 1 2; do
  printf 'ts%s' "$i" > "$dir/segment_0000$i.ts"
done
exec sleep 30"#;

/// Encoder that never writes anything.
pub const SILENT_FFMPEG: &str = "exec sleep 30";

pub fn descriptor(width: u32, height: u32) -> SourceDescriptor {
    SourceDescriptor {
        width,
        height,
        duration: Some(Duration::from_secs(600)),
        bit_rate: Some(4_000_000),
        video_codec: "hevc".into(),
        audio_codec: Some("aac".into()),
        container: "matroska,webm".into(),
    }
}

/// Harness options.
pub struct HarnessOptions {
    pub probe: SourceStatus,
    pub script: &'static str,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            probe: SourceStatus::Available(descriptor(1280, 720)),
            script: FAKE_FFMPEG,
        }
    }
}

/// A running server over a temp-dir library.
pub struct TestHarness {
    pub ctx: AppContext,
    pub addr: SocketAddr,
    pub prober: Arc<StaticProber>,
    dir: TempDir,
    stop: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<anyhow::Result<()>>>,
}

impl TestHarness {
    /// Start with default options.
    pub async fn start() -> Self {
        Self::start_with(HarnessOptions::default(), |_| {}).await
    }

    /// Start with custom options and a config tweak.
    pub async fn start_with(options: HarnessOptions, tweak: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let library = dir.path().join("library");
        std::fs::create_dir_all(&library).unwrap();
        let ffmpeg = write_script(dir.path(), options.script);

        let mut config = Config::default();
        config.library.root = library.clone();
        config.streaming.scratch_dir = dir.path().join("scratch");
        config.tools.ffmpeg_path = Some(ffmpeg.clone());
        tweak(&mut config);

        let prober = Arc::new(StaticProber::new(options.probe));
        let content =
            Arc::new(LocalLibrary::new(library).with_poll_interval(Duration::from_millis(50)));
        let ctx = AppContext::with_parts(
            config,
            Toolchain::with_paths(ffmpeg, "ffprobe"),
            prober.clone(),
            content,
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        let (stop, stopped) = oneshot::channel::<()>();
        let server = tokio::spawn(server::serve(listener, ctx.clone(), async move {
            stopped.await.ok();
        }));

        Self {
            ctx,
            addr,
            prober,
            dir,
            stop: Some(stop),
            server: Some(server),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn library(&self) -> PathBuf {
        self.dir.path().join("library")
    }

    /// Where session scratch directories land.
    pub fn scratch(&self) -> PathBuf {
        self.dir.path().join("scratch").join("sessions")
    }

    /// Write a file under the library root.
    pub fn add_file(&self, rel: &str, contents: &[u8]) -> PathBuf {
        let path = self.library().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, contents).unwrap();
        path
    }

    /// Open a session for `file_ref` and return its JSON response.
    pub async fn create_session(&self, file_ref: &str) -> serde_json::Value {
        let resp = reqwest::Client::new()
            .post(self.url("/api/hls/sessions"))
            .json(&serde_json::json!({ "file_ref": file_ref, "file_index": 0 }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
        resp.json().await.unwrap()
    }

    /// Trigger graceful shutdown and wait for the server to drain.
    pub async fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop.send(()).ok();
        }
        if let Some(server) = self.server.take() {
            tokio::time::timeout(Duration::from_secs(10), server)
                .await
                .expect("server did not shut down")
                .unwrap()
                .unwrap();
        }
    }
}

fn write_script(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-ffmpeg.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

/// Whether a process id no longer exists.
pub fn process_gone(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), None) == Err(Errno::ESRCH)
}
