//! SQLite-backed fingerprint index and track metadata store.
//!
//! Single point of persistence for the service: track rows, their
//! fingerprints, and ingestion task bookkeeping. Fingerprint inserts are
//! transactional per track so concurrent matchers observe either none or all
//! of a track's hashes. Transient SQLite faults (busy, locked, I/O) retry
//! with bounded backoff before surfacing.

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use futures::TryStreamExt;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Row, SqlitePool};
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::fingerprint::Fingerprint;

const SCHEMA: &str = include_str!("schema.sql");

/// Hashes per `IN (...)` clause; kept under SQLite's bind-variable ceiling.
const LOOKUP_CHUNK: usize = 500;

/// Fingerprint rows per batched `INSERT`.
const INSERT_CHUNK: usize = 2_000;

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(50);

/// Metadata for a track about to be inserted. The enrichment collaborator
/// owns the optional fields; the engine only requires the source identity.
#[derive(Debug, Clone, Default)]
pub struct TrackMetadata {
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub duration_ms: Option<i64>,
    pub source_type: String,
    pub source_id: String,
    pub cover_url: Option<String>,
    pub release_date: Option<String>,
    pub spotify_url: Option<String>,
    pub youtube_url: Option<String>,
    pub youtube_id: Option<String>,
}

/// A stored track row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Song {
    pub id: i64,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub duration_ms: Option<i64>,
    pub source_type: String,
    pub source_id: String,
    pub cover_url: Option<String>,
    pub release_date: Option<String>,
    pub spotify_url: Option<String>,
    pub youtube_url: Option<String>,
    pub youtube_id: Option<String>,
    pub created_at: String,
}

/// Lifecycle of a background ingestion task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    AlreadyPresent,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::AlreadyPresent => "already_present",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

/// A stored ingestion task row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct IngestTaskRow {
    pub task_id: String,
    pub locator: String,
    pub status: String,
    pub error: Option<String>,
    pub song_id: Option<i64>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) the database at `url` and apply the schema.
    ///
    /// In-memory databases get a single never-expiring connection, since each
    /// new SQLite `:memory:` connection would otherwise start from scratch.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(EngineError::IndexUnavailable)?
            .create_if_missing(true)
            .foreign_keys(true);

        let in_memory = url.contains(":memory:");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(8)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(EngineError::IndexUnavailable)?;

        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .map_err(EngineError::IndexUnavailable)?;

        Ok(Self { pool })
    }

    /// Insert a new track row and return its id.
    ///
    /// A second insert for the same `(source_type, source_id)` fails with
    /// [`EngineError::DuplicateTrack`]; the caller decides whether that is an
    /// error or an idempotent success.
    pub async fn insert_song(&self, meta: &TrackMetadata) -> Result<i64> {
        let result = self
            .with_retry(|| async move {
                sqlx::query_scalar::<_, i64>(
                    r#"
                    INSERT INTO songs (
                        title, artist, album, duration_ms, source_type, source_id,
                        cover_url, release_date, spotify_url, youtube_url, youtube_id
                    )
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    RETURNING id
                    "#,
                )
                .bind(&meta.title)
                .bind(&meta.artist)
                .bind(&meta.album)
                .bind(meta.duration_ms)
                .bind(&meta.source_type)
                .bind(&meta.source_id)
                .bind(&meta.cover_url)
                .bind(&meta.release_date)
                .bind(&meta.spotify_url)
                .bind(&meta.youtube_url)
                .bind(&meta.youtube_id)
                .fetch_one(&self.pool)
                .await
            })
            .await;

        match result {
            Ok(id) => {
                debug!(song_id = id, source_id = %meta.source_id, "inserted track");
                Ok(id)
            }
            Err(EngineError::IndexUnavailable(sqlx::Error::Database(db)))
                if db.is_unique_violation() =>
            {
                Err(EngineError::DuplicateTrack {
                    source_type: meta.source_type.clone(),
                    source_id: meta.source_id.clone(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Append all of a track's fingerprints in one transaction.
    pub async fn insert_fingerprints(
        &self,
        song_id: i64,
        fingerprints: &[Fingerprint],
    ) -> Result<()> {
        if fingerprints.is_empty() {
            return Ok(());
        }

        self.with_retry(|| async move {
            let mut tx = self.pool.begin().await?;

            for chunk in fingerprints.chunks(INSERT_CHUNK) {
                let mut builder =
                    QueryBuilder::new("INSERT INTO fingerprints (hash, song_id, anchor_frame) ");
                builder.push_values(chunk, |mut row, fp| {
                    row.push_bind(fp.hash as i64)
                        .push_bind(song_id)
                        .push_bind(fp.anchor_frame as i64);
                });
                builder.build().execute(&mut *tx).await?;
            }

            tx.commit().await
        })
        .await?;

        debug!(song_id, count = fingerprints.len(), "stored fingerprints");
        Ok(())
    }

    /// Delete a track; its fingerprints cascade away with it.
    pub async fn delete_song(&self, song_id: i64) -> Result<()> {
        let affected = self
            .with_retry(|| async move {
                sqlx::query("DELETE FROM songs WHERE id = ?")
                    .bind(song_id)
                    .execute(&self.pool)
                    .await
                    .map(|r| r.rows_affected())
            })
            .await?;

        if affected == 0 {
            return Err(EngineError::NotFound);
        }
        Ok(())
    }

    /// Every stored occurrence of any of `hashes`, as
    /// `(hash, song_id, anchor_frame)` triples. Duplicates are preserved.
    pub async fn lookup_fingerprints(&self, hashes: &[u32]) -> Result<Vec<(u32, i64, u32)>> {
        let mut matches = Vec::new();

        for chunk in hashes.chunks(LOOKUP_CHUNK) {
            let rows = self
                .with_retry(|| async move {
                    let mut builder = QueryBuilder::new(
                        "SELECT hash, song_id, anchor_frame FROM fingerprints WHERE hash IN (",
                    );
                    let mut in_list = builder.separated(", ");
                    for hash in chunk {
                        in_list.push_bind(*hash as i64);
                    }
                    builder.push(")");

                    let mut stream = builder.build().fetch(&self.pool);
                    let mut rows = Vec::new();
                    while let Some(row) = stream.try_next().await? {
                        rows.push((
                            row.get::<i64, _>(0) as u32,
                            row.get::<i64, _>(1),
                            row.get::<i64, _>(2) as u32,
                        ));
                    }
                    Ok(rows)
                })
                .await?;

            matches.extend(rows);
        }

        Ok(matches)
    }

    pub async fn get_song(&self, song_id: i64) -> Result<Option<Song>> {
        self.with_retry(|| async move {
            sqlx::query_as::<_, Song>("SELECT * FROM songs WHERE id = ?")
                .bind(song_id)
                .fetch_optional(&self.pool)
                .await
        })
        .await
    }

    pub async fn song_by_source(&self, source_type: &str, source_id: &str) -> Result<Option<Song>> {
        self.with_retry(|| async move {
            sqlx::query_as::<_, Song>("SELECT * FROM songs WHERE source_type = ? AND source_id = ?")
                .bind(source_type)
                .bind(source_id)
                .fetch_optional(&self.pool)
                .await
        })
        .await
    }

    pub async fn list_songs(&self) -> Result<Vec<Song>> {
        self.with_retry(|| async move {
            sqlx::query_as::<_, Song>("SELECT * FROM songs ORDER BY artist, title")
                .fetch_all(&self.pool)
                .await
        })
        .await
    }

    pub async fn song_count(&self) -> Result<i64> {
        self.with_retry(|| async move {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM songs")
                .fetch_one(&self.pool)
                .await
        })
        .await
    }

    pub async fn create_task(&self, task_id: &str, locator: &str) -> Result<()> {
        self.with_retry(|| async move {
            sqlx::query("INSERT INTO ingest_tasks (task_id, locator, status) VALUES (?, ?, ?)")
                .bind(task_id)
                .bind(locator)
                .bind(TaskStatus::Pending.as_str())
                .execute(&self.pool)
                .await
                .map(|_| ())
        })
        .await
    }

    /// Move a pending task to running. Returns false when the task was
    /// cancelled (or vanished) before the worker got to it.
    pub async fn start_task(&self, task_id: &str) -> Result<bool> {
        let now = chrono::Utc::now().to_rfc3339();
        let now = now.as_str();
        let affected = self
            .with_retry(|| async move {
                sqlx::query(
                    "UPDATE ingest_tasks SET status = ?, started_at = ? \
                     WHERE task_id = ? AND status = ?",
                )
                .bind(TaskStatus::Running.as_str())
                .bind(now)
                .bind(task_id)
                .bind(TaskStatus::Pending.as_str())
                .execute(&self.pool)
                .await
                .map(|r| r.rows_affected())
            })
            .await?;

        Ok(affected > 0)
    }

    /// Terminal transition for a task.
    pub async fn finish_task(
        &self,
        task_id: &str,
        status: TaskStatus,
        song_id: Option<i64>,
        error: Option<&str>,
    ) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let now = now.as_str();
        let status = status.as_str();
        self.with_retry(|| async move {
            sqlx::query(
                "UPDATE ingest_tasks SET status = ?, song_id = ?, error = ?, completed_at = ? \
                 WHERE task_id = ?",
            )
            .bind(status)
            .bind(song_id)
            .bind(error)
            .bind(now)
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map(|_| ())
        })
        .await
    }

    /// Request cancellation of a task that has not finished yet.
    pub async fn cancel_task(&self, task_id: &str) -> Result<()> {
        let affected = self
            .with_retry(|| async move {
                sqlx::query(
                    "UPDATE ingest_tasks SET status = ? \
                     WHERE task_id = ? AND status IN (?, ?)",
                )
                .bind(TaskStatus::Cancelled.as_str())
                .bind(task_id)
                .bind(TaskStatus::Pending.as_str())
                .bind(TaskStatus::Running.as_str())
                .execute(&self.pool)
                .await
                .map(|r| r.rows_affected())
            })
            .await?;

        if affected == 0 {
            return Err(EngineError::NotFound);
        }
        Ok(())
    }

    /// Whether cancellation was requested for `task_id`. Workers poll this
    /// between pipeline stages.
    pub async fn task_cancelled(&self, task_id: &str) -> Result<bool> {
        let status = self
            .with_retry(|| async move {
                sqlx::query_scalar::<_, String>("SELECT status FROM ingest_tasks WHERE task_id = ?")
                    .bind(task_id)
                    .fetch_optional(&self.pool)
                    .await
            })
            .await?;

        Ok(status.as_deref() == Some(TaskStatus::Cancelled.as_str()))
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Option<IngestTaskRow>> {
        self.with_retry(|| async move {
            sqlx::query_as::<_, IngestTaskRow>("SELECT * FROM ingest_tasks WHERE task_id = ?")
                .bind(task_id)
                .fetch_optional(&self.pool)
                .await
        })
        .await
    }

    /// Run `op`, retrying transient faults with doubling backoff before
    /// giving up and surfacing the last error.
    async fn with_retry<T, Fut>(&self, op: impl Fn() -> Fut) -> Result<T>
    where
        Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        let mut delay = RETRY_BASE_DELAY;
        let mut attempt = 0;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt + 1 < RETRY_ATTEMPTS && is_transient(&e) => {
                    warn!(error = %e, attempt, "transient store fault, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(EngineError::IndexUnavailable(e)),
            }
        }
    }
}

fn is_transient(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
        // SQLITE_BUSY (5), SQLITE_LOCKED (6) and their extended forms.
        sqlx::Error::Database(db) => matches!(
            db.code().as_deref(),
            Some("5") | Some("6") | Some("261") | Some("517")
        ),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_db() -> Database {
        Database::connect("sqlite::memory:").await.unwrap()
    }

    fn meta(source_id: &str) -> TrackMetadata {
        TrackMetadata {
            title: format!("Track {source_id}"),
            artist: "Tester".into(),
            source_type: "file".into(),
            source_id: source_id.into(),
            ..Default::default()
        }
    }

    fn fps(pairs: &[(u32, u32)]) -> Vec<Fingerprint> {
        pairs
            .iter()
            .map(|&(hash, anchor_frame)| Fingerprint { hash, anchor_frame })
            .collect()
    }

    #[tokio::test]
    async fn insert_and_fetch_song() {
        let db = memory_db().await;
        let id = db.insert_song(&meta("a")).await.unwrap();

        let song = db.get_song(id).await.unwrap().unwrap();
        assert_eq!(song.title, "Track a");
        assert_eq!(db.song_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicate_source_tuple_is_rejected() {
        let db = memory_db().await;
        db.insert_song(&meta("a")).await.unwrap();

        match db.insert_song(&meta("a")).await {
            Err(EngineError::DuplicateTrack { source_id, .. }) => assert_eq!(source_id, "a"),
            other => panic!("expected DuplicateTrack, got {other:?}"),
        }
        assert_eq!(db.song_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn lookup_preserves_duplicates() {
        let db = memory_db().await;
        let id = db.insert_song(&meta("a")).await.unwrap();
        db.insert_fingerprints(id, &fps(&[(7, 1), (7, 1), (7, 9), (8, 2)]))
            .await
            .unwrap();

        let rows = db.lookup_fingerprints(&[7]).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows.iter().filter(|r| r.2 == 1).count(), 2);
    }

    #[tokio::test]
    async fn lookup_handles_more_hashes_than_one_chunk() {
        let db = memory_db().await;
        let id = db.insert_song(&meta("a")).await.unwrap();
        db.insert_fingerprints(id, &fps(&[(0, 0), (600, 6)]))
            .await
            .unwrap();

        let hashes: Vec<u32> = (0..(LOOKUP_CHUNK as u32 + 200)).collect();
        let rows = db.lookup_fingerprints(&hashes).await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn delete_cascades_to_fingerprints() {
        let db = memory_db().await;
        let id = db.insert_song(&meta("a")).await.unwrap();
        db.insert_fingerprints(id, &fps(&[(7, 1), (8, 2)]))
            .await
            .unwrap();

        db.delete_song(id).await.unwrap();
        assert!(db.lookup_fingerprints(&[7, 8]).await.unwrap().is_empty());
        assert!(matches!(
            db.delete_song(id).await,
            Err(EngineError::NotFound)
        ));
    }

    #[tokio::test]
    async fn task_lifecycle() {
        let db = memory_db().await;
        db.create_task("t1", "file:///x.mp3").await.unwrap();

        assert!(db.start_task("t1").await.unwrap());
        assert!(!db.start_task("t1").await.unwrap());

        db.finish_task("t1", TaskStatus::Completed, Some(42), None)
            .await
            .unwrap();
        let row = db.get_task("t1").await.unwrap().unwrap();
        assert_eq!(row.status, "completed");
        assert_eq!(row.song_id, Some(42));
        assert!(row.completed_at.is_some());
    }

    #[tokio::test]
    async fn cancel_marks_unfinished_tasks_only() {
        let db = memory_db().await;
        db.create_task("t1", "file:///x.mp3").await.unwrap();

        db.cancel_task("t1").await.unwrap();
        assert!(db.task_cancelled("t1").await.unwrap());

        // Terminal tasks cannot be cancelled again.
        assert!(matches!(
            db.cancel_task("t1").await,
            Err(EngineError::NotFound)
        ));
        assert!(matches!(
            db.cancel_task("missing").await,
            Err(EngineError::NotFound)
        ));
    }
}
