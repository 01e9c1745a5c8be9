//! Landmark extraction.
//!
//! Reduces the dB surface to the sparse set of cells that dominate their
//! local time-frequency neighborhood and clear the amplitude floor.

use std::collections::VecDeque;

use crate::fingerprint::spectrogram::Spectrogram;
use crate::params::{MIN_AMPLITUDE_DB, NEIGHBORHOOD_HALF_F, NEIGHBORHOOD_HALF_T};

/// A spectral landmark: one local maximum of the spectrogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peak {
    pub t_idx: u32,
    pub f_idx: u16,
}

/// Find all peaks, ordered by `(t_idx, f_idx)` ascending.
///
/// A cell is a peak when it equals the maximum of the rectangular
/// neighborhood centered on it (edges clipped), sits at or above
/// [`MIN_AMPLITUDE_DB`], and no equal-valued cell earlier in `(t, f)` order
/// shares its neighborhood. The tie rule keeps output stable under exact
/// floating-point equality.
pub fn find_peaks(spec: &Spectrogram) -> Vec<Peak> {
    let t_len = spec.frames();
    let f_len = spec.bins();
    if t_len == 0 {
        return Vec::new();
    }

    // Separable sliding maximum: first along frequency within each frame,
    // then along time within each bin column.
    let mut freq_max = vec![0.0f32; t_len * f_len];
    for t in 0..t_len {
        let row = spec.row(t);
        let out = &mut freq_max[t * f_len..(t + 1) * f_len];
        sliding_max(f_len, NEIGHBORHOOD_HALF_F, |i| row[i], |i, v| out[i] = v);
    }

    let mut neighborhood_max = vec![0.0f32; t_len * f_len];
    for f in 0..f_len {
        sliding_max(
            t_len,
            NEIGHBORHOOD_HALF_T,
            |t| freq_max[t * f_len + f],
            |t, v| neighborhood_max[t * f_len + f] = v,
        );
    }

    let mut peaks = Vec::new();
    for t in 0..t_len {
        for f in 0..f_len {
            let value = spec.at(t, f);
            if value < MIN_AMPLITUDE_DB {
                continue;
            }
            if value != neighborhood_max[t * f_len + f] {
                continue;
            }
            if !first_of_ties(spec, t, f, value, t_len, f_len) {
                continue;
            }
            peaks.push(Peak {
                t_idx: t as u32,
                f_idx: f as u16,
            });
        }
    }

    peaks
}

/// Windowed maximum with half-extent `half`, edges clipped. Monotonic-deque
/// scan, linear in `len`.
fn sliding_max(
    len: usize,
    half: usize,
    src: impl Fn(usize) -> f32,
    mut dst: impl FnMut(usize, f32),
) {
    let mut deque: VecDeque<usize> = VecDeque::new();

    for i in 0..len {
        while let Some(&back) = deque.back() {
            if src(back) <= src(i) {
                deque.pop_back();
            } else {
                break;
            }
        }
        deque.push_back(i);

        if i >= half {
            let center = i - half;
            while deque.front().map_or(false, |&front| front + half < center) {
                deque.pop_front();
            }
            dst(center, src(*deque.front().unwrap()));
        }
    }

    // Tail positions whose right extent is clipped by the edge.
    let tail_start = if len > half { len - half } else { 0 };
    for center in tail_start..len {
        while deque.front().map_or(false, |&front| front + half < center) {
            deque.pop_front();
        }
        dst(center, src(*deque.front().unwrap()));
    }
}

/// True when `(t, f)` is the lexicographically smallest cell of its
/// neighborhood holding `value`. Only runs on cells already known to equal
/// their neighborhood maximum, so ties are rare.
fn first_of_ties(
    spec: &Spectrogram,
    t: usize,
    f: usize,
    value: f32,
    t_len: usize,
    f_len: usize,
) -> bool {
    let t_end = (t + NEIGHBORHOOD_HALF_T).min(t_len - 1);
    let f_end = (f + NEIGHBORHOOD_HALF_F).min(f_len - 1);

    for tn in t.saturating_sub(NEIGHBORHOOD_HALF_T)..=t_end {
        for fb in f.saturating_sub(NEIGHBORHOOD_HALF_F)..=f_end {
            if spec.at(tn, fb) == value {
                return (tn, fb) == (t, f);
            }
        }
    }

    // Unreachable: the cell itself holds `value`.
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::spectrogram::spectrogram;
    use crate::params::{HOP_SIZE, SAMPLE_RATE, WINDOW_SIZE};
    use crate::test_util::synthetic_spectrogram;

    #[test]
    fn silence_has_no_peaks() {
        let spec = spectrogram(&vec![0.0; WINDOW_SIZE + 10 * HOP_SIZE]);
        assert!(find_peaks(&spec).is_empty());
    }

    #[test]
    fn single_hot_cell_is_the_only_peak() {
        let spec = synthetic_spectrogram(40, &[(12, 300, -10.0)], -90.0);
        let peaks = find_peaks(&spec);
        assert_eq!(peaks, vec![Peak { t_idx: 12, f_idx: 300 }]);
    }

    #[test]
    fn floor_suppresses_quiet_maxima() {
        let spec = synthetic_spectrogram(40, &[(12, 300, -80.0)], -90.0);
        assert!(find_peaks(&spec).is_empty());
    }

    #[test]
    fn nearby_cells_collapse_to_the_strongest() {
        // Two cells in one neighborhood; only the louder survives.
        let spec = synthetic_spectrogram(40, &[(12, 300, -10.0), (14, 305, -20.0)], -90.0);
        let peaks = find_peaks(&spec);
        assert_eq!(peaks, vec![Peak { t_idx: 12, f_idx: 300 }]);
    }

    #[test]
    fn separated_cells_both_survive() {
        let spec = synthetic_spectrogram(60, &[(12, 300, -10.0), (40, 300, -10.0)], -90.0);
        let peaks = find_peaks(&spec);
        assert_eq!(
            peaks,
            vec![
                Peak { t_idx: 12, f_idx: 300 },
                Peak { t_idx: 40, f_idx: 300 },
            ]
        );
    }

    #[test]
    fn equal_ties_keep_the_lexicographically_smallest() {
        let spec = synthetic_spectrogram(40, &[(12, 300, -10.0), (13, 290, -10.0)], -90.0);
        let peaks = find_peaks(&spec);
        assert_eq!(peaks, vec![Peak { t_idx: 12, f_idx: 300 }]);

        // Same frame, different bins: smaller bin wins.
        let spec = synthetic_spectrogram(40, &[(12, 290, -10.0), (12, 300, -10.0)], -90.0);
        let peaks = find_peaks(&spec);
        assert_eq!(peaks, vec![Peak { t_idx: 12, f_idx: 290 }]);
    }

    #[test]
    fn edge_cells_use_clipped_neighborhoods() {
        let spec = synthetic_spectrogram(40, &[(0, 0, -10.0), (39, 2048, -10.0)], -90.0);
        let peaks = find_peaks(&spec);
        assert_eq!(
            peaks,
            vec![
                Peak { t_idx: 0, f_idx: 0 },
                Peak { t_idx: 39, f_idx: 2048 },
            ]
        );
    }

    #[test]
    fn output_is_ordered_by_time_then_frequency() {
        let samples: Vec<f32> = (0..SAMPLE_RATE as usize * 3)
            .map(|i| {
                let t = i as f32 / SAMPLE_RATE as f32;
                (2.0 * std::f32::consts::PI * (500.0 + 400.0 * t) * t).sin() * 0.7
            })
            .collect();
        let peaks = find_peaks(&spectrogram(&samples));
        assert!(!peaks.is_empty());
        for pair in peaks.windows(2) {
            assert!(
                (pair[0].t_idx, pair[0].f_idx) < (pair[1].t_idx, pair[1].f_idx),
                "peaks out of order: {pair:?}"
            );
        }
    }
}
