//! Background ingestion.
//!
//! Tracks enter the library through a bounded work queue drained by a fixed
//! pool of workers. Each task moves through three stages — fetch,
//! fingerprint, insert — with cancellation honored between stages, never
//! inside one. A cancelled or failed task leaves the index unchanged; the
//! fingerprint insert itself is transactional.

pub mod source;

pub use source::{AudioSource, FetchedTrack, FileSource};

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::error::{EngineError, Result};
use crate::fingerprint::fingerprint_bytes;
use crate::persistance::{Database, TaskStatus};

/// A queued ingestion request. Self-contained: workers need nothing else.
#[derive(Debug, Clone)]
pub struct IngestTask {
    pub task_id: String,
    pub locator: String,
}

/// Spawn `worker_count` workers draining a new bounded queue; returns the
/// submission handle. Dropping every handle shuts the workers down.
pub fn spawn_workers(
    worker_count: usize,
    queue_capacity: usize,
    db: Arc<Database>,
    audio_source: Arc<dyn AudioSource>,
) -> mpsc::Sender<IngestTask> {
    let (tx, rx) = mpsc::channel::<IngestTask>(queue_capacity);
    let rx = Arc::new(Mutex::new(rx));

    for worker in 0..worker_count {
        let rx = Arc::clone(&rx);
        let db = Arc::clone(&db);
        let audio_source = Arc::clone(&audio_source);

        tokio::spawn(async move {
            loop {
                let task = rx.lock().await.recv().await;
                let Some(task) = task else { break };

                debug!(worker, task_id = %task.task_id, "picked up ingest task");
                if let Err(e) = process_task(&db, audio_source.as_ref(), &task).await {
                    // Only store faults escape process_task; the task row may
                    // not reflect the failure, but the index is consistent.
                    error!(task_id = %task.task_id, error = %e, "ingest task aborted");
                }
            }
            debug!(worker, "ingest worker shutting down");
        });
    }

    tx
}

/// Run one ingestion task to a terminal state.
///
/// Fetch and fingerprint failures are recorded on the task row and are not
/// errors of this function; only store faults propagate.
pub async fn process_task(
    db: &Database,
    audio_source: &dyn AudioSource,
    task: &IngestTask,
) -> Result<()> {
    if !db.start_task(&task.task_id).await? {
        debug!(task_id = %task.task_id, "task cancelled before start");
        return Ok(());
    }

    // Stage 1: resolve the locator to audio bytes.
    let fetched = match audio_source.fetch(&task.locator).await {
        Ok(fetched) => fetched,
        Err(e) => {
            warn!(task_id = %task.task_id, error = %e, "fetch failed");
            return db
                .finish_task(&task.task_id, TaskStatus::Failed, None, Some(&e.to_string()))
                .await;
        }
    };

    if db.task_cancelled(&task.task_id).await? {
        info!(task_id = %task.task_id, "task cancelled after fetch");
        return Ok(());
    }

    // Stage 2: fingerprint on the blocking pool; the DSP is pure CPU.
    let FetchedTrack { bytes, metadata } = fetched;
    let fingerprints = match tokio::task::spawn_blocking(move || fingerprint_bytes(bytes)).await {
        Ok(Ok(fingerprints)) if !fingerprints.is_empty() => fingerprints,
        Ok(Ok(_)) => {
            return db
                .finish_task(
                    &task.task_id,
                    TaskStatus::Failed,
                    None,
                    Some("audio produced no fingerprints"),
                )
                .await;
        }
        Ok(Err(e)) => {
            warn!(task_id = %task.task_id, error = %e, "fingerprinting failed");
            return db
                .finish_task(&task.task_id, TaskStatus::Failed, None, Some(&e.to_string()))
                .await;
        }
        Err(join_error) => {
            error!(task_id = %task.task_id, error = %join_error, "fingerprint task panicked");
            return db
                .finish_task(
                    &task.task_id,
                    TaskStatus::Failed,
                    None,
                    Some("internal fingerprinting failure"),
                )
                .await;
        }
    };

    if db.task_cancelled(&task.task_id).await? {
        info!(task_id = %task.task_id, "task cancelled after fingerprinting");
        return Ok(());
    }

    // Stage 3: insert track and fingerprints. Not cancellable.
    match db.insert_song(&metadata).await {
        Ok(song_id) => {
            if let Err(e) = db.insert_fingerprints(song_id, &fingerprints).await {
                // Roll the bare track row back so no empty track lingers.
                if let Err(cleanup) = db.delete_song(song_id).await {
                    warn!(song_id, error = %cleanup, "cleanup after failed insert");
                }
                db.finish_task(&task.task_id, TaskStatus::Failed, None, Some(&e.to_string()))
                    .await?;
                return Err(e);
            }

            info!(
                task_id = %task.task_id,
                song_id,
                fingerprints = fingerprints.len(),
                "track ingested"
            );
            db.finish_task(&task.task_id, TaskStatus::Completed, Some(song_id), None)
                .await
        }
        Err(EngineError::DuplicateTrack { source_type, source_id }) => {
            let existing = db.song_by_source(&source_type, &source_id).await?;
            info!(task_id = %task.task_id, source_id = %source_id, "track already present");
            db.finish_task(
                &task.task_id,
                TaskStatus::AlreadyPresent,
                existing.map(|song| song.id),
                None,
            )
            .await
        }
        Err(e) => {
            db.finish_task(&task.task_id, TaskStatus::Failed, None, Some(&e.to_string()))
                .await?;
            Err(e)
        }
    }
}
