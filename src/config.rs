//! Runtime configuration from the environment.

use std::time::Duration;

/// Service-level knobs. Engine tuning lives in [`crate::params`]; these only
/// affect deployment concerns and never the hash values.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub ingest_workers: usize,
    pub ingest_queue_capacity: usize,
    pub match_deadline: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        let ingest_workers = std::env::var("INGEST_WORKERS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&n: &usize| n > 0)
            .unwrap_or_else(default_workers);

        let match_deadline_secs = std::env::var("MATCH_DEADLINE_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&n: &u64| n > 0)
            .unwrap_or(10);

        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:earmark.db?mode=rwc".into()),
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            ingest_workers,
            ingest_queue_capacity: 64,
            match_deadline: Duration::from_secs(match_deadline_secs),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".into(),
            bind_addr: "127.0.0.1:0".into(),
            ingest_workers: 2,
            ingest_queue_capacity: 64,
            match_deadline: Duration::from_secs(10),
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
}
