//! HTTP server wiring.
//!
//! Builds the axum router over the shared application state: the database
//! handle and the ingestion queue.

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::ingest::IngestTask;
use crate::persistance::Database;
use crate::routes;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub ingest_tx: mpsc::Sender<IngestTask>,
    pub config: Config,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/match", post(routes::match_audio))
        .route("/api/songs", post(routes::ingest_song).get(routes::list_songs))
        .route("/api/songs/:song_id", delete(routes::delete_song))
        .route(
            "/api/tasks/:task_id",
            get(routes::get_task).delete(routes::cancel_task),
        )
        .route("/stats", get(routes::stats))
        .route("/health", get(|| async { "healthy" }))
        .with_state(state)
}
