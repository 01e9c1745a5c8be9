//! Fingerprint pipeline glue.
//!
//! Wires preprocessing, spectral analysis, peak extraction and hashing
//! together. Ingestion and matching both run through here, so equivalent
//! audio always hashes to identical values.

pub mod hashing;
pub mod peaks;
pub mod preprocess;
pub mod spectrogram;

pub use hashing::Fingerprint;
pub use peaks::Peak;

use crate::decode::{decode_bytes, DecodedAudio};
use crate::error::Result;

/// Fingerprint decoded PCM.
///
/// Clips shorter than one STFT window come back as an empty vector, which
/// the matcher treats as "no match" rather than an error.
pub fn fingerprint_pcm(samples: &[f32], sample_rate: u32, channels: usize) -> Result<Vec<Fingerprint>> {
    let canonical = preprocess::preprocess(samples, sample_rate, channels)?;
    let spec = spectrogram::spectrogram(&canonical);
    let peaks = peaks::find_peaks(&spec);
    Ok(hashing::generate_fingerprints(&peaks))
}

/// Decode an uploaded payload and fingerprint it.
pub fn fingerprint_bytes(audio_bytes: Vec<u8>) -> Result<Vec<Fingerprint>> {
    let DecodedAudio {
        samples,
        sample_rate,
        channels,
    } = decode_bytes(audio_bytes)?;

    fingerprint_pcm(&samples, sample_rate, channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{SAMPLE_RATE, WINDOW_SIZE};
    use crate::test_util::sine;

    #[test]
    fn pipeline_is_deterministic() {
        let samples = sine(440.0, 3.0, 0.8);
        let a = fingerprint_pcm(&samples, SAMPLE_RATE, 1).unwrap();
        let b = fingerprint_pcm(&samples, SAMPLE_RATE, 1).unwrap();
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn sub_window_clip_yields_no_fingerprints() {
        let samples = vec![0.5; WINDOW_SIZE - 1];
        let fps = fingerprint_pcm(&samples, SAMPLE_RATE, 1).unwrap();
        assert!(fps.is_empty());
    }

    #[test]
    fn silence_yields_no_fingerprints() {
        let samples = vec![0.0; SAMPLE_RATE as usize * 2];
        let fps = fingerprint_pcm(&samples, SAMPLE_RATE, 1).unwrap();
        assert!(fps.is_empty());
    }
}
