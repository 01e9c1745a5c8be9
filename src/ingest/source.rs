//! Audio source seam.
//!
//! Ingestion receives an opaque locator; an [`AudioSource`] turns it into
//! audio bytes plus track metadata. External fetchers (streaming catalogs,
//! object stores) plug in here; the built-in implementation reads local
//! files, which is all the engine itself needs.

use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;

use crate::persistance::TrackMetadata;

/// Audio bytes and metadata resolved from a locator.
pub struct FetchedTrack {
    pub bytes: Vec<u8>,
    pub metadata: TrackMetadata,
}

#[async_trait]
pub trait AudioSource: Send + Sync {
    async fn fetch(&self, locator: &str) -> anyhow::Result<FetchedTrack>;
}

/// Resolves `file://` locators (or bare paths) against the local filesystem.
pub struct FileSource;

#[async_trait]
impl AudioSource for FileSource {
    async fn fetch(&self, locator: &str) -> anyhow::Result<FetchedTrack> {
        let path = locator.strip_prefix("file://").unwrap_or(locator);
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading {path}"))?;

        let title = Path::new(path)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("Unknown Title")
            .to_string();

        Ok(FetchedTrack {
            bytes,
            metadata: TrackMetadata {
                title,
                artist: "Unknown Artist".into(),
                source_type: "file".into(),
                source_id: path.to_string(),
                ..Default::default()
            },
        })
    }
}
