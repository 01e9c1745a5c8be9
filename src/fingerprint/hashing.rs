//! Combinatorial peak pairing.
//!
//! Pairs each anchor peak with the peaks that follow it inside a bounded
//! target zone and packs every pair into a 32-bit hash:
//! `[ anchor bin (12 bits) | target bin (10 bits) | frame delta (10 bits) ]`.

use serde::{Deserialize, Serialize};

use crate::fingerprint::peaks::Peak;
use crate::params::{FAN_VALUE, TARGET_ZONE_T_LEN, TARGET_ZONE_T_START};

/// One hashed peak pair, annotated with the anchor's STFT frame index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub hash: u32,
    pub anchor_frame: u32,
}

/// Pack an anchor bin, target bin and frame delta into one hash.
///
/// Fields wider than their slot are masked down, never rejected.
pub fn pack_hash(f1: u16, f2: u16, dt: u32) -> u32 {
    let f1 = (f1 as u32) & 0xFFF;
    let f2 = (f2 as u32) & 0x3FF;
    let dt = dt & 0x3FF;
    (f1 << 20) | (f2 << 10) | dt
}

/// Inverse of [`pack_hash`], modulo the field masks.
pub fn unpack_hash(hash: u32) -> (u16, u16, u32) {
    let f1 = ((hash >> 20) & 0xFFF) as u16;
    let f2 = ((hash >> 10) & 0x3FF) as u16;
    let dt = hash & 0x3FF;
    (f1, f2, dt)
}

/// Generate fingerprints from a peak list sorted by `(t_idx, f_idx)`.
///
/// Each anchor pairs with at most [`FAN_VALUE`] later peaks whose frame delta
/// falls inside the target zone. Output order follows anchor order; duplicate
/// hashes are kept.
pub fn generate_fingerprints(peaks: &[Peak]) -> Vec<Fingerprint> {
    let mut fingerprints = Vec::new();

    for (i, anchor) in peaks.iter().enumerate() {
        let mut fan = 0;
        for target in &peaks[i + 1..] {
            let dt = target.t_idx - anchor.t_idx;
            if dt < TARGET_ZONE_T_START {
                continue;
            }
            if dt >= TARGET_ZONE_T_START + TARGET_ZONE_T_LEN {
                break;
            }

            fingerprints.push(Fingerprint {
                hash: pack_hash(anchor.f_idx, target.f_idx, dt),
                anchor_frame: anchor.t_idx,
            });

            fan += 1;
            if fan == FAN_VALUE {
                break;
            }
        }
    }

    fingerprints
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peak(t: u32, f: u16) -> Peak {
        Peak { t_idx: t, f_idx: f }
    }

    #[test]
    fn pack_unpack_round_trips_in_field_widths() {
        for &(f1, f2, dt) in &[
            (0u16, 0u16, 0u32),
            (1, 1, 1),
            (0xFFF, 0x3FF, 0x3FF),
            (2048, 1023, 100),
            (517, 338, 42),
        ] {
            assert_eq!(unpack_hash(pack_hash(f1, f2, dt)), (f1, f2, dt));
        }
    }

    #[test]
    fn overflowing_fields_mask_instead_of_panicking() {
        let hash = pack_hash(0xFFFF, 0xFFFF, 0xFFFF_FFFF);
        assert_eq!(unpack_hash(hash), (0xFFF, 0x3FF, 0x3FF));

        // Bin 2048 aliases to 0 in the 10-bit target slot.
        let (_, f2, _) = unpack_hash(pack_hash(100, 2048, 5));
        assert_eq!(f2, 0);
    }

    #[test]
    fn pairs_only_inside_the_target_zone() {
        let peaks = vec![
            peak(0, 100),
            peak(0, 200),  // dt 0: before the zone
            peak(1, 300),  // dt 1: first eligible
            peak(100, 400), // dt 100: last eligible
            peak(101, 500), // dt 101: past the zone
        ];
        let fps = generate_fingerprints(&peaks);
        let from_first: Vec<_> = fps.iter().filter(|fp| fp.anchor_frame == 0).collect();

        // Anchors at t=0 are the first two peaks; each sees dt 1 and dt 100.
        assert_eq!(from_first.len(), 4);
        for fp in &from_first {
            let (_, _, dt) = unpack_hash(fp.hash);
            assert!((1..=100).contains(&dt));
        }
    }

    #[test]
    fn fan_value_caps_targets_per_anchor() {
        // One anchor followed by more in-zone peaks than the fan-out allows.
        let mut peaks = vec![peak(0, 10)];
        for i in 0..FAN_VALUE as u32 + 10 {
            peaks.push(peak(1 + i, 20));
        }
        let fps = generate_fingerprints(&peaks);
        let from_anchor = fps.iter().filter(|fp| fp.anchor_frame == 0).count();
        assert_eq!(from_anchor, FAN_VALUE);
    }

    #[test]
    fn duplicate_pairs_are_preserved() {
        // Two identical pair geometries produce the same hash twice.
        let peaks = vec![peak(0, 100), peak(5, 200), peak(50, 100), peak(55, 200)];
        let fps = generate_fingerprints(&peaks);
        let target = pack_hash(100, 200, 5);
        assert_eq!(fps.iter().filter(|fp| fp.hash == target).count(), 2);
    }

    #[test]
    fn empty_peaks_produce_no_fingerprints() {
        assert!(generate_fingerprints(&[]).is_empty());
    }
}
