//! Shared signal generators for unit tests.

use crate::fingerprint::spectrogram::{synthetic, Spectrogram};
use crate::params::{FREQ_BINS, SAMPLE_RATE};

/// A pure sine tone at the canonical sample rate.
pub fn sine(freq: f32, seconds: f32, amplitude: f32) -> Vec<f32> {
    let n = (seconds * SAMPLE_RATE as f32) as usize;
    (0..n)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * freq * t).sin() * amplitude
        })
        .collect()
}

/// A spectrogram filled with `baseline` dB plus explicit hot cells.
pub fn synthetic_spectrogram(
    frames: usize,
    cells: &[(usize, usize, f32)],
    baseline: f32,
) -> Spectrogram {
    let mut data = vec![baseline; frames * FREQ_BINS];
    for &(t, f, value) in cells {
        data[t * FREQ_BINS + f] = value;
    }
    synthetic(frames, data)
}

/// Minimal mono/stereo 16-bit PCM WAV container around `samples`.
pub fn wav_bytes(samples: &[i16], sample_rate: u32, channels: u16) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let byte_rate = sample_rate * channels as u32 * 2;
    let block_align = channels * 2;

    let mut bytes = Vec::with_capacity(44 + data_len as usize);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVE");
    bytes.extend_from_slice(b"fmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes()); // PCM
    bytes.extend_from_slice(&channels.to_le_bytes());
    bytes.extend_from_slice(&sample_rate.to_le_bytes());
    bytes.extend_from_slice(&byte_rate.to_le_bytes());
    bytes.extend_from_slice(&block_align.to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    for s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    bytes
}
