//! HLS session handlers.
//!
//! A session is opened with `POST /hls/sessions`; the client then follows the
//! master playlist to one media playlist per quality. The first media
//! playlist request for a quality starts its encoder, and segments are read
//! straight from that rendition's scratch directory.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use castforge_common::{Error, SessionId};
use serde::{Deserialize, Serialize};

use super::sessions::{SessionSource, SessionSummary, StreamingSession};
use super::transcoder::RenditionSummary;
use crate::config::PlaylistMode;
use crate::server::{error::AppError, AppContext};
use std::sync::Arc;

const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
const SEGMENT_CONTENT_TYPE: &str = "video/mp2t";

type HandlerResult<T> = std::result::Result<T, AppError>;

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub file_ref: String,
    #[serde(default)]
    pub file_index: usize,
    #[serde(default)]
    pub mode: Option<PlaylistMode>,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: SessionId,
    pub qualities: Vec<&'static str>,
    pub master_playlist_url: String,
}

#[derive(Debug, Serialize)]
pub struct StopSessionResponse {
    pub session_id: SessionId,
    pub stopped: bool,
}

fn parse_session_id(raw: &str) -> std::result::Result<SessionId, Error> {
    raw.parse()
        .map_err(|_| Error::not_found("session", raw))
}

fn lookup(ctx: &AppContext, raw: &str) -> std::result::Result<Arc<StreamingSession>, Error> {
    let id = parse_session_id(raw)?;
    ctx.registry.require(&id)
}

fn playlist_response(body: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, PLAYLIST_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

/// Open a new adaptive session for a library file.
pub async fn create_session(
    State(ctx): State<AppContext>,
    Json(request): Json<CreateSessionRequest>,
) -> HandlerResult<(StatusCode, Json<CreateSessionResponse>)> {
    let file = ctx
        .content
        .resolve(&request.file_ref, request.file_index)
        .await?;
    // A growing file would encode to its current end and look finished.
    if !file.complete {
        return Err(Error::SourceIncomplete(file.path.display().to_string()).into());
    }

    let source = SessionSource {
        file_ref: request.file_ref,
        file_index: request.file_index,
        path: file.path,
    };
    let session = ctx.registry.create_with_mode(source, request.mode).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id: session.id,
            qualities: session.quality_names(),
            master_playlist_url: format!("/api/hls/{}/master.m3u8", session.id),
        }),
    ))
}

/// Snapshot of every active session.
pub async fn list_sessions(State(ctx): State<AppContext>) -> Json<Vec<SessionSummary>> {
    Json(ctx.registry.list())
}

pub async fn master_playlist(
    State(ctx): State<AppContext>,
    Path(session_id): Path<String>,
) -> HandlerResult<Response> {
    let session = lookup(&ctx, &session_id)?;
    Ok(playlist_response(session.master_playlist().render()))
}

/// Media playlist for one quality, starting its encoder on first request.
pub async fn media_playlist(
    State(ctx): State<AppContext>,
    Path((session_id, quality)): Path<(String, String)>,
) -> HandlerResult<Response> {
    let session = lookup(&ctx, &session_id)?;
    let rendition = session.ensure_rendition(&quality)?;
    Ok(playlist_response(rendition.playlist().render()))
}

/// Explicitly (re)start a rendition's encoder.
pub async fn start_rendition(
    State(ctx): State<AppContext>,
    Path((session_id, quality)): Path<(String, String)>,
) -> HandlerResult<Json<RenditionSummary>> {
    let session = lookup(&ctx, &session_id)?;
    let rendition = session.start_rendition(&quality)?;
    Ok(Json(rendition.summary()))
}

pub async fn segment(
    State(ctx): State<AppContext>,
    Path((session_id, quality, name)): Path<(String, String, String)>,
) -> HandlerResult<Response> {
    let session = lookup(&ctx, &session_id)?;
    let rendition = session
        .rendition(&quality)?
        .ok_or_else(|| Error::not_found("rendition", &quality))?;
    let path = rendition.segment_path(&name)?;

    // Live mode may delete the segment between the check and the read.
    let data = match tokio::fs::read(&path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::not_found("segment", &name).into());
        }
        Err(e) => return Err(Error::from(e).into()),
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, SEGMENT_CONTENT_TYPE)
        .header(header::CONTENT_LENGTH, data.len().to_string())
        .header(header::CACHE_CONTROL, "max-age=3600")
        .body(Body::from(data))
        .map_err(|e| Error::Internal(e.to_string()).into())
}

pub async fn stop_session(
    State(ctx): State<AppContext>,
    Path(session_id): Path<String>,
) -> HandlerResult<Json<StopSessionResponse>> {
    let id = parse_session_id(&session_id)?;
    let stopped = ctx.registry.stop(&id).await;
    Ok(Json(StopSessionResponse {
        session_id: id,
        stopped,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_defaults() {
        let request: CreateSessionRequest =
            serde_json::from_str(r#"{"file_ref": "movie.mkv"}"#).unwrap();
        assert_eq!(request.file_ref, "movie.mkv");
        assert_eq!(request.file_index, 0);
        assert!(request.mode.is_none());

        let request: CreateSessionRequest =
            serde_json::from_str(r#"{"file_ref": "show", "file_index": 2, "mode": "vod"}"#)
                .unwrap();
        assert_eq!(request.file_index, 2);
        assert_eq!(request.mode, Some(PlaylistMode::Vod));
    }

    #[test]
    fn test_bad_session_id_is_not_found() {
        let err = parse_session_id("not-a-uuid").unwrap_err();
        assert_eq!(err.http_status(), 404);
    }
}
