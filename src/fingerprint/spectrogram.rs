//! Short-time spectral analysis.
//!
//! Slices the canonical PCM buffer into overlapping Hann-windowed frames and
//! computes a dB-scaled magnitude spectrum per frame.

use std::f32::consts::PI;

use rayon::prelude::*;
use rustfft::{num_complex::Complex, FftPlanner};

use crate::params::{DB_FLOOR, FREQ_BINS, HOP_SIZE, WINDOW_SIZE};

/// A dB-magnitude surface, row-major: `frames` rows of [`FREQ_BINS`] bins.
pub struct Spectrogram {
    data: Vec<f32>,
    frames: usize,
}

impl Spectrogram {
    /// Number of time frames.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Number of frequency bins per frame.
    pub fn bins(&self) -> usize {
        FREQ_BINS
    }

    /// One frame's worth of bins.
    pub fn row(&self, t: usize) -> &[f32] {
        &self.data[t * FREQ_BINS..(t + 1) * FREQ_BINS]
    }

    /// Value at time frame `t`, frequency bin `f`.
    pub fn at(&self, t: usize, f: usize) -> f32 {
        self.data[t * FREQ_BINS + f]
    }
}

/// Compute the spectrogram of a mono canonical-rate buffer.
///
/// Buffers shorter than one window produce zero frames; the caller treats
/// that as "no fingerprints" rather than an error.
pub fn spectrogram(samples: &[f32]) -> Spectrogram {
    if samples.len() < WINDOW_SIZE {
        return Spectrogram {
            data: Vec::new(),
            frames: 0,
        };
    }

    let frames = 1 + (samples.len() - WINDOW_SIZE) / HOP_SIZE;
    let window = hann_window(WINDOW_SIZE);

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(WINDOW_SIZE);

    let data: Vec<f32> = (0..frames)
        .into_par_iter()
        .flat_map_iter(|t| {
            let start = t * HOP_SIZE;
            let mut buffer: Vec<Complex<f32>> = samples[start..start + WINDOW_SIZE]
                .iter()
                .zip(window.iter())
                .map(|(&s, &w)| Complex { re: s * w, im: 0.0 })
                .collect();

            fft.process(&mut buffer);

            buffer[..FREQ_BINS]
                .iter()
                .map(|c| {
                    let magnitude = (c.re * c.re + c.im * c.im).sqrt();
                    20.0 * magnitude.max(DB_FLOOR).log10()
                })
                .collect::<Vec<f32>>()
        })
        .collect();

    Spectrogram { data, frames }
}

#[cfg(test)]
pub(crate) fn synthetic(frames: usize, data: Vec<f32>) -> Spectrogram {
    assert_eq!(data.len(), frames * FREQ_BINS);
    Spectrogram { data, frames }
}

fn hann_window(size: usize) -> Vec<f32> {
    let n = size as f32;
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / (n - 1.0)).cos()))
        .collect()
}
