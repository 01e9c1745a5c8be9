//! HTTP route handlers.
//!
//! Accepts audio uploads for matching, queues ingestion requests, and exposes
//! task/song administration plus library stats. "No match" is a normal
//! response, never an error status.

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::fingerprint::fingerprint_bytes;
use crate::ingest::IngestTask;
use crate::matcher::match_fingerprints;
use crate::params::MIN_ABSOLUTE_MATCHES;
use crate::persistance::Song;
use crate::server::AppState;

/// JSON body for the `/api/match` endpoint.
#[derive(Serialize, Default)]
pub struct MatchResponse {
    pub success: bool,
    pub match_found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub song_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
    /// Seconds into the reference where the query aligns, floored and
    /// clamped to zero for presentation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(rename = "coverArt", skip_serializing_if = "Option::is_none")]
    pub cover_art: Option<String>,
    #[serde(rename = "youtubeId", skip_serializing_if = "Option::is_none")]
    pub youtube_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Deserialize)]
pub struct IngestRequest {
    pub locator: String,
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = match &self {
            EngineError::InvalidInput(_) | EngineError::Decode(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound => StatusCode::NOT_FOUND,
            EngineError::DuplicateTrack { .. } => StatusCode::CONFLICT,
            EngineError::Timeout => StatusCode::REQUEST_TIMEOUT,
            EngineError::IndexUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Numeric(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({ "success": false, "error": self.to_string() }));
        (status, body).into_response()
    }
}

/// Handle a multipart upload of query audio and return the best match.
///
/// Expects a form field named `audio_data`. The whole pipeline runs under
/// the configured deadline; numeric hiccups inside the DSP degrade to
/// "no match" rather than an error.
pub async fn match_audio(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<MatchResponse>, EngineError> {
    let mut audio_bytes = Vec::new();

    loop {
        let field = multipart
            .next_field()
            .await
            .map_err(|e| EngineError::InvalidInput(format!("malformed multipart body: {e}")))?;
        let Some(field) = field else { break };

        if field.name() == Some("audio_data") {
            audio_bytes = field
                .bytes()
                .await
                .map_err(|e| EngineError::InvalidInput(format!("reading audio_data: {e}")))?
                .to_vec();
        }
    }

    if audio_bytes.is_empty() {
        return Err(EngineError::InvalidInput(
            "missing audio_data form field".into(),
        ));
    }

    let db = state.db.clone();
    let scored = tokio::time::timeout(state.config.match_deadline, async move {
        let fingerprints = tokio::task::spawn_blocking(move || fingerprint_bytes(audio_bytes))
            .await
            .map_err(|e| EngineError::Numeric(format!("fingerprint task failed: {e}")))??;

        match_fingerprints(&db, &fingerprints, 1, MIN_ABSOLUTE_MATCHES).await
    })
    .await
    .map_err(|_| EngineError::Timeout)?;

    let candidates = match scored {
        Ok(candidates) => candidates,
        // A numeric failure on the query path is a non-match, not a fault.
        Err(EngineError::Numeric(reason)) => {
            warn!(%reason, "query degraded to no-match");
            return Ok(Json(no_match(Some(reason))));
        }
        Err(e) => return Err(e),
    };

    let Some(best) = candidates.first() else {
        info!("no confident match");
        return Ok(Json(no_match(None)));
    };

    let song = state.db.get_song(best.song_id).await?;
    let Some(song) = song else {
        // The track vanished between scoring and metadata fetch.
        warn!(song_id = best.song_id, "matched track no longer exists");
        return Ok(Json(no_match(None)));
    };

    info!(
        song_id = best.song_id,
        score = best.score,
        offset_seconds = best.offset_seconds,
        title = %song.title,
        "match found"
    );

    Ok(Json(MatchResponse {
        success: true,
        match_found: true,
        song_id: Some(best.song_id),
        score: Some(best.score),
        timestamp: Some((best.offset_seconds.floor() as i64).max(0)),
        title: Some(song.title),
        artist: Some(song.artist),
        album: song.album,
        cover_art: song.cover_url,
        youtube_id: song.youtube_id,
        error: None,
    }))
}

fn no_match(error: Option<String>) -> MatchResponse {
    MatchResponse {
        success: true,
        match_found: false,
        error,
        ..Default::default()
    }
}

/// Queue a track for background ingestion; responds 202 with the task id.
pub async fn ingest_song(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), EngineError> {
    if request.locator.trim().is_empty() {
        return Err(EngineError::InvalidInput("locator must not be empty".into()));
    }

    let task_id = Uuid::new_v4().to_string();
    state.db.create_task(&task_id, &request.locator).await?;

    let task = IngestTask {
        task_id: task_id.clone(),
        locator: request.locator,
    };
    if state.ingest_tx.send(task).await.is_err() {
        // Worker pool is gone; the task row would dangle as pending forever.
        state
            .db
            .finish_task(
                &task_id,
                crate::persistance::TaskStatus::Failed,
                None,
                Some("ingestion workers unavailable"),
            )
            .await?;
        return Err(EngineError::Numeric("ingestion queue closed".into()));
    }

    info!(%task_id, "ingest task queued");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "success": true, "task_id": task_id })),
    ))
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<serde_json::Value>, EngineError> {
    let task = state
        .db
        .get_task(&task_id)
        .await?
        .ok_or(EngineError::NotFound)?;

    Ok(Json(json!({ "success": true, "task": task })))
}

pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<serde_json::Value>, EngineError> {
    state.db.cancel_task(&task_id).await?;
    info!(%task_id, "ingest task cancelled");
    Ok(Json(json!({ "success": true })))
}

pub async fn list_songs(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, EngineError> {
    let songs: Vec<Song> = state.db.list_songs().await?;
    Ok(Json(json!({ "success": true, "songs": songs })))
}

pub async fn delete_song(
    State(state): State<AppState>,
    Path(song_id): Path<i64>,
) -> Result<Json<serde_json::Value>, EngineError> {
    state.db.delete_song(song_id).await?;
    info!(song_id, "song deleted");
    Ok(Json(json!({ "success": true })))
}

pub async fn stats(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, EngineError> {
    let song_count = state.db.song_count().await?;
    Ok(Json(json!({ "song_count": song_count })))
}
