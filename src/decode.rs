//! Container decoding.
//!
//! Probes uploaded bytes with symphonia and decodes the default track into
//! interleaved f32 PCM. This is the only place the service touches container
//! formats; everything downstream works on bare samples.

use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{EngineError, Result};

/// Interleaved PCM as it came out of the decoder.
#[derive(Debug)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: usize,
}

impl DecodedAudio {
    /// Clip length in seconds, before any resampling.
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / (self.sample_rate as f64 * self.channels as f64)
    }
}

/// Decode a complete in-memory audio payload.
pub fn decode_bytes(bytes: Vec<u8>) -> Result<DecodedAudio> {
    if bytes.is_empty() {
        return Err(EngineError::InvalidInput("empty audio payload".into()));
    }

    let stream = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());
    let mut format = probe_format(stream)?;

    let track = format
        .default_track()
        .ok_or_else(|| EngineError::Decode("no default track in container".into()))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| EngineError::Decode("track is missing a sample rate".into()))?;
    let channels = track
        .codec_params
        .channels
        .map(|c| c.count())
        .ok_or_else(|| EngineError::Decode("track is missing a channel layout".into()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| EngineError::Decode(format!("unsupported codec: {e}")))?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            // End of stream surfaces as an IO error in symphonia.
            Err(SymphoniaError::IoError(_)) => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(EngineError::Decode(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        // Skip undecodable packets rather than failing the whole clip.
        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(EngineError::Decode(e.to_string())),
        };

        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
        buffer.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buffer.samples());
    }

    if samples.is_empty() {
        return Err(EngineError::Decode("no decodable audio in payload".into()));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}

fn probe_format(stream: MediaSourceStream) -> Result<Box<dyn FormatReader>> {
    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| EngineError::Decode(format!("unsupported format: {e}")))?;

    Ok(probed.format)
}
