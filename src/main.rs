//! HTTP server exposing the recognition API.
//!
//! Binds the axum router over a shared database handle and spawns the
//! background ingestion worker pool.

use std::sync::Arc;

use earmark::config::Config;
use earmark::ingest::{self, FileSource};
use earmark::persistance::Database;
use earmark::server::{router, AppState};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    info!(?config, "starting");

    let db = Arc::new(Database::connect(&config.database_url).await?);

    let ingest_tx = ingest::spawn_workers(
        config.ingest_workers,
        config.ingest_queue_capacity,
        Arc::clone(&db),
        Arc::new(FileSource),
    );

    let state = AppState {
        db,
        ingest_tx,
        config: config.clone(),
    };

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, router(state)).await?;

    Ok(())
}
