//! Tuning constants shared by ingestion and matching.
//!
//! Both paths must hash equivalent audio to identical values, so every
//! quantity that feeds the pipeline lives here and nowhere else.

/// Canonical sample rate after preprocessing, in Hz.
pub const SAMPLE_RATE: u32 = 11_025;

/// STFT window length in samples.
pub const WINDOW_SIZE: usize = 4096;

/// STFT hop between successive frames, in samples.
pub const HOP_SIZE: usize = 1024;

/// Frequency bins per spectrogram frame (DC through Nyquist).
pub const FREQ_BINS: usize = WINDOW_SIZE / 2 + 1;

/// Half-extent of the peak neighborhood along the time axis, in frames.
pub const NEIGHBORHOOD_HALF_T: usize = 10;

/// Half-extent of the peak neighborhood along the frequency axis, in bins.
pub const NEIGHBORHOOD_HALF_F: usize = 10;

/// Spectrogram cells quieter than this never become peaks.
pub const MIN_AMPLITUDE_DB: f32 = -70.0;

/// First frame after the anchor eligible as a pairing target.
pub const TARGET_ZONE_T_START: u32 = 1;

/// Length of the pairing target zone, in frames.
pub const TARGET_ZONE_T_LEN: u32 = 100;

/// Maximum targets paired with a single anchor.
pub const FAN_VALUE: usize = 15;

/// Candidates scoring below this many aligned votes are discarded.
pub const MIN_ABSOLUTE_MATCHES: u32 = 2;

/// Floor applied before log scaling so silence maps to a finite dB value.
pub const DB_FLOOR: f32 = 1e-10;

/// Seconds of audio covered by one hop at the canonical rate.
pub fn seconds_per_frame() -> f64 {
    HOP_SIZE as f64 / SAMPLE_RATE as f64
}
