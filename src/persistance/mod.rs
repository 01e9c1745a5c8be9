//! Durable fingerprint index and track metadata.

pub mod database;

pub use database::{Database, IngestTaskRow, Song, TaskStatus, TrackMetadata};
