//! PCM canonicalization.
//!
//! Turns decoded PCM of any rate and channel count into the mono 11 025 Hz
//! f32 buffer the spectral stages expect.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::error::{EngineError, Result};
use crate::params::SAMPLE_RATE;

const RESAMPLE_CHUNK: usize = 1024;

/// Canonicalize a decoded PCM buffer.
///
/// `samples` is interleaved when `channels > 1`. The output is mono at
/// [`SAMPLE_RATE`] with peak magnitude at most 1.0.
pub fn preprocess(samples: &[f32], sample_rate: u32, channels: usize) -> Result<Vec<f32>> {
    if samples.is_empty() {
        return Err(EngineError::InvalidInput("empty PCM buffer".into()));
    }
    if sample_rate == 0 {
        return Err(EngineError::InvalidInput("sample rate must be positive".into()));
    }
    if channels == 0 {
        return Err(EngineError::InvalidInput("channel count must be positive".into()));
    }

    let mono = downmix(samples, channels);
    let mut resampled = resample(mono, sample_rate)?;
    normalize(&mut resampled);

    Ok(resampled)
}

/// Average interleaved channels into a single one.
fn downmix(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return samples.to_vec();
    }

    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Sinc resample to the canonical rate.
///
/// Fixed parameters and fixed-size input chunks with a zero-padded tail keep
/// the output a pure function of the input buffer.
fn resample(input: Vec<f32>, input_rate: u32) -> Result<Vec<f32>> {
    if input_rate == SAMPLE_RATE {
        return Ok(input);
    }

    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        oversampling_factor: 64,
        interpolation: SincInterpolationType::Linear,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(
        SAMPLE_RATE as f64 / input_rate as f64,
        2.0,
        params,
        RESAMPLE_CHUNK,
        1,
    )
    .map_err(|e| EngineError::Numeric(format!("resampler construction: {e}")))?;

    let mut output = Vec::with_capacity(
        (input.len() as u64 * SAMPLE_RATE as u64 / input_rate as u64) as usize + RESAMPLE_CHUNK,
    );
    let mut position = 0;

    while position + RESAMPLE_CHUNK <= input.len() {
        let chunk = vec![input[position..position + RESAMPLE_CHUNK].to_vec()];
        let result = resampler
            .process(&chunk, None)
            .map_err(|e| EngineError::Numeric(format!("resample: {e}")))?;
        output.extend_from_slice(&result[0]);
        position += RESAMPLE_CHUNK;
    }

    let remaining = input.len() - position;
    if remaining > 0 {
        let mut padded = vec![0.0; RESAMPLE_CHUNK];
        padded[..remaining].copy_from_slice(&input[position..]);
        let result = resampler
            .process(&[padded], None)
            .map_err(|e| EngineError::Numeric(format!("resample tail: {e}")))?;
        output.extend_from_slice(&result[0]);
    }

    Ok(output)
}

/// Scale down so the loudest sample sits at ±1.0. Buffers already inside the
/// range are left untouched, which keeps the canonical form a fixed point.
fn normalize(samples: &mut [f32]) {
    let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    if peak > 1.0 {
        for s in samples.iter_mut() {
            *s /= peak;
        }
    }
}
