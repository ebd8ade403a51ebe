//! Direct streaming: raw byte ranges or a real-time transcode.
//!
//! Browser-playable, fully downloaded files are served as-is with HTTP range
//! support. Everything else goes through a single-pass ffmpeg transcode to
//! fragmented MP4 whose output is piped straight into the response body.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
};
use bytes::Bytes;
use castforge_av::actions::{DirectEncode, DirectInput};
use castforge_av::EncoderCommand;
use castforge_common::paths::is_browser_playable;
use castforge_common::{Error, Result};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::io::SeekFrom;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio_util::io::ReaderStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tokio_util::task::TaskTracker;

use super::content::{ByteStream, ContentFile};
use crate::server::{error::AppError, AppContext};

/// Target bitrates for the real-time transcode, in kbit/s.
const DIRECT_VIDEO_KBPS: u32 = 2800;
const DIRECT_AUDIO_KBPS: u32 = 128;

#[derive(Debug, Default, Deserialize)]
pub struct DirectQuery {
    #[serde(default)]
    pub transcode: bool,
}

/// Serve a library file, transcoding when the browser cannot play it.
pub async fn stream_file(
    State(ctx): State<AppContext>,
    Path((file_ref, file_index)): Path<(String, usize)>,
    Query(query): Query<DirectQuery>,
    headers: HeaderMap,
) -> std::result::Result<Response, AppError> {
    let file = ctx.content.resolve(&file_ref, file_index).await?;

    let range = headers.get(header::RANGE).and_then(|h| h.to_str().ok());
    let needs_transcode = query.transcode || !is_browser_playable(&file.path) || !file.complete;

    if !needs_transcode {
        return serve_raw(&file, range).await.map_err(AppError::from);
    }

    // A live stream cannot seek; its range requests get the whole stream.
    let start = range.filter(|_| file.complete).and_then(parse_range_start);
    let input = if file.complete {
        let seek = start.map(|offset| estimate_seek(offset, ctx.settings.bytes_per_second));
        DirectInput::File {
            path: file.path.clone(),
            seek,
        }
    } else {
        DirectInput::Pipe
    };
    let live = match input {
        DirectInput::Pipe => Some(ctx.content.open_live(&file).await?),
        DirectInput::File { .. } => None,
    };

    let encode = DirectEncode {
        input,
        video_kbps: DIRECT_VIDEO_KBPS,
        audio_kbps: DIRECT_AUDIO_KBPS,
    };
    tracing::info!(
        file_ref = %file_ref,
        file_index,
        path = %file.path.display(),
        complete = file.complete,
        range_start = ?start,
        "Starting direct transcode"
    );

    let mut stream = DirectTranscodeStream::spawn(
        &encode.command(&ctx.settings.ffmpeg),
        live,
        DirectOptions::from_settings(&ctx.settings),
        &ctx.shutdown,
        &ctx.tracker,
    )?;

    let first = stream.first_chunk(ctx.settings.watchdog).await?;

    let mut response = Response::builder()
        .header(header::CONTENT_TYPE, "video/mp4")
        .header(header::TRANSFER_ENCODING, "chunked")
        .header(header::CACHE_CONTROL, "no-store");
    response = match start {
        Some(start) => response
            .status(StatusCode::PARTIAL_CONTENT)
            .header(header::CONTENT_RANGE, format!("bytes {}-*/*", start)),
        None => response.status(StatusCode::OK),
    };

    let body = futures::stream::once(async move { Ok::<_, std::io::Error>(first) }).chain(stream);
    response
        .body(Body::from_stream(body))
        .map_err(|e| AppError::from(Error::Internal(e.to_string())))
}

/// Serve the file bytes with standard range semantics.
async fn serve_raw(file: &ContentFile, range: Option<&str>) -> Result<Response> {
    let file_size = file.size;
    let range = range.and_then(|s| parse_range_header(s, file_size));

    let response = match range {
        Some((start, end)) => {
            // Partial content response
            let length = end - start + 1;

            let mut handle = File::open(&file.path).await?;
            handle.seek(SeekFrom::Start(start)).await?;

            let body = Body::from_stream(ReaderStream::new(handle.take(length)));

            Response::builder()
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_TYPE, file.mime)
                .header(header::CONTENT_LENGTH, length.to_string())
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {}-{}/{}", start, end, file_size),
                )
                .header(header::ACCEPT_RANGES, "bytes")
                .body(body)
        }
        None => {
            // Full file response
            let handle = File::open(&file.path).await?;
            let body = Body::from_stream(ReaderStream::new(handle));

            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, file.mime)
                .header(header::CONTENT_LENGTH, file_size.to_string())
                .header(header::ACCEPT_RANGES, "bytes")
                .body(body)
        }
    };

    response.map_err(|e| Error::Internal(e.to_string()))
}

/// Parse HTTP Range header.
///
/// Supports formats:
/// - bytes=0-499
/// - bytes=500-
/// - bytes=-500 (last 500 bytes)
fn parse_range_header(header: &str, file_size: u64) -> Option<(u64, u64)> {
    let header = header.strip_prefix("bytes=")?;
    let (start, end) = header.split_once('-')?;
    let (start, end) = (start.trim(), end.trim());

    if file_size == 0 {
        return None;
    }

    match (start.is_empty(), end.is_empty()) {
        // bytes=-500 (last 500 bytes)
        (true, false) => {
            let suffix_len: u64 = end.parse().ok()?;
            if suffix_len == 0 {
                return None;
            }
            Some((file_size.saturating_sub(suffix_len), file_size - 1))
        }
        // bytes=500- (from 500 to end)
        (false, true) => {
            let start: u64 = start.parse().ok()?;
            if start >= file_size {
                return None;
            }
            Some((start, file_size - 1))
        }
        // bytes=0-499
        (false, false) => {
            let start: u64 = start.parse().ok()?;
            let end: u64 = end.parse().ok()?;
            if start >= file_size {
                return None;
            }
            let end = end.min(file_size - 1);
            if start > end {
                return None;
            }
            Some((start, end))
        }
        // bytes=- (invalid)
        (true, true) => None,
    }
}

/// Start offset of a `bytes=N-` range against output of unknown length.
///
/// Suffix ranges cannot be honoured without a length and are ignored.
fn parse_range_start(header: &str) -> Option<u64> {
    let (start, _) = header.strip_prefix("bytes=")?.split_once('-')?;
    start.trim().parse().ok()
}

/// Approximate time offset for a byte offset into the source.
fn estimate_seek(offset: u64, bytes_per_second: u64) -> Duration {
    Duration::from_secs_f64(offset as f64 / bytes_per_second.max(1) as f64)
}

/// Tunables for one direct transcode.
#[derive(Debug, Clone, Copy)]
pub struct DirectOptions {
    /// Chunks buffered between the encoder and the response body.
    pub channel_capacity: usize,
    /// Time between SIGTERM and SIGKILL.
    pub kill_grace: Duration,
}

impl DirectOptions {
    pub fn from_settings(settings: &super::StreamingSettings) -> Self {
        Self {
            channel_capacity: settings.channel_capacity,
            kill_grace: settings.kill_grace,
        }
    }
}

/// A running real-time transcode whose stdout is consumed as a stream.
///
/// The encoder is owned by a supervisor task. Dropping the stream (client
/// disconnect, response error) or cancelling the parent token stops the pump,
/// closes the encoder's stdin and terminates the encoder; the supervisor does
/// this exactly once.
pub struct DirectTranscodeStream {
    pid: Option<u32>,
    rx: mpsc::Receiver<std::io::Result<Bytes>>,
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
    _guard: DropGuard,
}

impl DirectTranscodeStream {
    /// Spawn the encoder and its pump/feeder/supervisor tasks.
    ///
    /// `input` is forwarded to the encoder's stdin when present (the command
    /// must have been built with a piped stdin).
    pub fn spawn(
        command: &EncoderCommand,
        input: Option<ByteStream>,
        options: DirectOptions,
        parent: &CancellationToken,
        tracker: &TaskTracker,
    ) -> Result<Self> {
        let mut command = command.clone();
        command.pipe_stdout();
        if input.is_some() {
            command.pipe_stdin();
        }

        let mut process = command
            .spawn("direct")
            .map_err(|e| Error::tool("ffmpeg", e.to_string()))?;
        let pid = process.pid();
        let stdout = process
            .take_stdout()
            .ok_or_else(|| Error::Internal("encoder stdout not captured".into()))?;
        let stdin = process.take_stdin();

        let cancel = parent.child_token();
        let (tx, rx) = mpsc::channel(options.channel_capacity.max(1));
        let (done_tx, done) = watch::channel(false);

        // Pump: encoder stdout -> bounded channel.
        tracker.spawn({
            let cancel = cancel.clone();
            async move {
                let mut reader = ReaderStream::new(stdout);
                loop {
                    let chunk = tokio::select! {
                        _ = cancel.cancelled() => break,
                        chunk = reader.next() => chunk,
                    };
                    let Some(chunk) = chunk else { break };
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        sent = tx.send(chunk) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        });

        // Feeder: live input -> encoder stdin.
        if let (Some(mut input), Some(mut stdin)) = (input, stdin) {
            let cancel = cancel.clone();
            tracker.spawn(async move {
                loop {
                    let item = tokio::select! {
                        _ = cancel.cancelled() => break,
                        item = input.next() => item,
                    };
                    match item {
                        Some(Ok(bytes)) => {
                            let written = tokio::select! {
                                _ = cancel.cancelled() => break,
                                written = stdin.write_all(&bytes) => written,
                            };
                            if written.is_err() {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            tracing::debug!(error = %e, "Live input failed");
                            break;
                        }
                        None => break,
                    }
                }
                // Dropping stdin closes the pipe; dropping input releases the source.
                drop(stdin);
                drop(input);
            });
        }

        // Supervisor: owns the process, releases it exactly once.
        tracker.spawn({
            let cancel = cancel.clone();
            async move {
                tokio::select! {
                    status = process.wait() => match status {
                        Ok(status) if status.success() => {
                            tracing::debug!(pid, "Direct transcode finished");
                        }
                        Ok(status) => {
                            tracing::warn!(pid, %status, "Direct transcode encoder failed");
                        }
                        Err(e) => {
                            tracing::warn!(pid, error = %e, "Failed waiting for direct encoder");
                        }
                    },
                    _ = cancel.cancelled() => {
                        let outcome = process.terminate(options.kill_grace).await;
                        tracing::debug!(pid, ?outcome, "Direct transcode stopped (client gone or shutdown)");
                    }
                }
                let _ = done_tx.send(true);
            }
        });

        Ok(Self {
            pid,
            rx,
            _guard: cancel.clone().drop_guard(),
            cancel,
            done,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Resolves to `true` once the encoder has been reaped.
    pub fn done_signal(&self) -> watch::Receiver<bool> {
        self.done.clone()
    }

    /// Stop the transcode without dropping the stream.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the first output chunk.
    ///
    /// Fails with a timeout (and stops the encoder) when nothing arrives in
    /// `watchdog`, and with a tool error when the encoder exits silently.
    pub async fn first_chunk(&mut self, watchdog: Duration) -> Result<Bytes> {
        match tokio::time::timeout(watchdog, self.rx.recv()).await {
            Ok(Some(Ok(bytes))) => Ok(bytes),
            Ok(Some(Err(e))) => {
                self.cancel();
                Err(e.into())
            }
            Ok(None) => Err(Error::tool("ffmpeg", "encoder produced no output")),
            Err(_) => {
                self.cancel();
                tracing::warn!(pid = self.pid, ?watchdog, "Direct transcode produced no output in time");
                Err(Error::Timeout(format!(
                    "no encoder output within {}s",
                    watchdog.as_secs_f64()
                )))
            }
        }
    }
}

impl Stream for DirectTranscodeStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
