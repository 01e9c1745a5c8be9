//! Histogram-alignment matching.
//!
//! A true match shows up as many query/reference hash pairs agreeing on a
//! single frame delta. Scoring counts votes per `(song, delta)` cell and
//! keeps each song's best cell; noise spreads its votes across deltas and
//! stays under the acceptance floor.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::params::seconds_per_frame;
use crate::persistance::Database;

/// One scored alignment against a reference track.
#[derive(Debug, Clone, Serialize)]
pub struct MatchCandidate {
    pub song_id: i64,
    /// Number of hash pairs agreeing on the winning delta.
    pub score: u32,
    /// Where the query aligns inside the reference, in seconds. Negative when
    /// the aligned position precedes the reference start, which only happens
    /// on noisy near-misses; it is reported as computed.
    pub offset_seconds: f64,
}

/// Score a query fingerprint set against the index.
///
/// Returns at most `top_k` candidates sorted by descending score, empty when
/// nothing reaches `min_absolute_matches` votes
/// ([`crate::params::MIN_ABSOLUTE_MATCHES`] in production).
pub async fn match_fingerprints(
    db: &Database,
    query: &[Fingerprint],
    top_k: usize,
    min_absolute_matches: u32,
) -> Result<Vec<MatchCandidate>> {
    if query.is_empty() || top_k == 0 {
        return Ok(Vec::new());
    }

    // Hash -> every query anchor frame that produced it.
    let mut query_anchors: HashMap<u32, Vec<u32>> = HashMap::new();
    for fp in query {
        query_anchors.entry(fp.hash).or_default().push(fp.anchor_frame);
    }

    let hashes: Vec<u32> = query_anchors.keys().copied().collect();
    let rows = db.lookup_fingerprints(&hashes).await?;
    debug!(
        query_hashes = hashes.len(),
        index_rows = rows.len(),
        "index lookup complete"
    );

    // Vote per (song, delta); signed deltas cover queries that align before
    // the reference start.
    let mut histogram: HashMap<(i64, i64), u32> = HashMap::new();
    for (hash, song_id, db_anchor) in rows {
        if let Some(anchors) = query_anchors.get(&hash) {
            for &query_anchor in anchors {
                let delta = db_anchor as i64 - query_anchor as i64;
                *histogram.entry((song_id, delta)).or_insert(0) += 1;
            }
        }
    }

    // Per-song argmax; ties fall to the smaller |delta|, then smaller delta,
    // for stable output under equal vote counts.
    let mut best: HashMap<i64, (u32, i64)> = HashMap::new();
    for (&(song_id, delta), &count) in &histogram {
        match best.get_mut(&song_id) {
            None => {
                best.insert(song_id, (count, delta));
            }
            Some(entry) => {
                let (best_count, best_delta) = *entry;
                if count > best_count
                    || (count == best_count
                        && (delta.abs(), delta) < (best_delta.abs(), best_delta))
                {
                    *entry = (count, delta);
                }
            }
        }
    }

    let mut candidates: Vec<MatchCandidate> = best
        .into_iter()
        .filter(|&(_, (score, _))| score >= min_absolute_matches)
        .map(|(song_id, (score, delta))| MatchCandidate {
            song_id,
            score,
            offset_seconds: delta as f64 * seconds_per_frame(),
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| a.song_id.cmp(&b.song_id))
    });
    candidates.truncate(top_k);

    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistance::TrackMetadata;

    async fn memory_db() -> Database {
        Database::connect("sqlite::memory:").await.unwrap()
    }

    async fn add_song(db: &Database, source_id: &str, fps: &[(u32, u32)]) -> i64 {
        let id = db
            .insert_song(&TrackMetadata {
                title: source_id.into(),
                artist: "Tester".into(),
                source_type: "file".into(),
                source_id: source_id.into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let fps: Vec<Fingerprint> = fps
            .iter()
            .map(|&(hash, anchor_frame)| Fingerprint { hash, anchor_frame })
            .collect();
        db.insert_fingerprints(id, &fps).await.unwrap();
        id
    }

    fn query(pairs: &[(u32, u32)]) -> Vec<Fingerprint> {
        pairs
            .iter()
            .map(|&(hash, anchor_frame)| Fingerprint { hash, anchor_frame })
            .collect()
    }

    #[tokio::test]
    async fn empty_query_matches_nothing() {
        let db = memory_db().await;
        add_song(&db, "a", &[(1, 0), (2, 5)]).await;
        assert!(match_fingerprints(&db, &[], 1, 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_library_matches_nothing() {
        let db = memory_db().await;
        let q = query(&[(1, 0), (2, 5), (3, 9)]);
        assert!(match_fingerprints(&db, &q, 1, 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn aligned_votes_win_with_the_right_offset() {
        let db = memory_db().await;
        // Reference hashes anchored 100 frames after where the query sees
        // them: the clip starts 100 frames into the track.
        let id = add_song(&db, "a", &[(1, 100), (2, 105), (3, 110), (4, 117)]).await;

        let q = query(&[(1, 0), (2, 5), (3, 10), (4, 17)]);
        let matches = match_fingerprints(&db, &q, 3, 2).await.unwrap();

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].song_id, id);
        assert_eq!(matches[0].score, 4);
        let expected = 100.0 * seconds_per_frame();
        assert!((matches[0].offset_seconds - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn single_agreeing_vote_is_below_the_floor() {
        let db = memory_db().await;
        // One shared hash, plus one scattered: best delta gets one vote.
        add_song(&db, "a", &[(1, 100), (2, 500)]).await;

        let q = query(&[(1, 0), (2, 0)]);
        assert!(match_fingerprints(&db, &q, 1, 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stronger_alignment_outranks_weaker() {
        let db = memory_db().await;
        let strong = add_song(&db, "strong", &[(1, 50), (2, 55), (3, 60)]).await;
        // Shares the same hashes but at inconsistent deltas.
        let weak = add_song(&db, "weak", &[(1, 50), (2, 200), (3, 60)]).await;

        let q = query(&[(1, 0), (2, 5), (3, 10)]);
        let matches = match_fingerprints(&db, &q, 2, 2).await.unwrap();

        assert_eq!(matches[0].song_id, strong);
        assert_eq!(matches[0].score, 3);
        if let Some(second) = matches.get(1) {
            assert_eq!(second.song_id, weak);
            assert!(second.score < matches[0].score);
        }
    }

    #[tokio::test]
    async fn negative_offsets_are_reported_as_computed() {
        let db = memory_db().await;
        // Query anchors sit after the reference anchors.
        let id = add_song(&db, "a", &[(1, 0), (2, 5)]).await;

        let q = query(&[(1, 30), (2, 35)]);
        let matches = match_fingerprints(&db, &q, 1, 2).await.unwrap();

        assert_eq!(matches[0].song_id, id);
        assert!(matches[0].offset_seconds < 0.0);
    }

    #[tokio::test]
    async fn top_k_truncates_the_candidate_list() {
        let db = memory_db().await;
        for i in 0..4 {
            add_song(
                &db,
                &format!("s{i}"),
                &[(1, 10), (2, 15), (3, 20)],
            )
            .await;
        }

        let q = query(&[(1, 0), (2, 5), (3, 10)]);
        let matches = match_fingerprints(&db, &q, 2, 2).await.unwrap();
        assert_eq!(matches.len(), 2);
        // Equal scores: ordering falls back to song id for determinism.
        assert!(matches[0].song_id < matches[1].song_id);
    }

    #[tokio::test]
    async fn deleted_song_disappears_from_candidates() {
        let db = memory_db().await;
        let id = add_song(&db, "a", &[(1, 10), (2, 15)]).await;

        let q = query(&[(1, 0), (2, 5)]);
        assert_eq!(match_fingerprints(&db, &q, 1, 2).await.unwrap()[0].song_id, id);

        db.delete_song(id).await.unwrap();
        assert!(match_fingerprints(&db, &q, 1, 2).await.unwrap().is_empty());
    }
}
