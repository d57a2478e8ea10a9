//! OPUS decoder wrapper.
//!
//! Decodes one RTP payload per call into a reusable interleaved f32
//! scratch buffer. OPUS frames are at most 120 ms, which bounds the
//! scratch at `0.12 * sample_rate` samples per channel.

use opus::Channels;

use crate::error::CodecError;

/// Largest OPUS frame: 120ms at 48kHz.
const MAX_SAMPLES_PER_CHANNEL: usize = 5760;

/// Stateful OPUS decoder with a reusable PCM scratch buffer.
pub struct OpusDecoder {
    decoder: opus::Decoder,
    sample_rate: u32,
    channels: u16,
    pcm: Vec<f32>,
}

impl OpusDecoder {
    pub fn new(sample_rate: u32, channels: Channels) -> Result<Self, CodecError> {
        let decoder = opus::Decoder::new(sample_rate, channels)
            .map_err(|e| CodecError::CreateFailed(e.to_string()))?;
        let channels = match channels {
            Channels::Mono => 1,
            Channels::Stereo => 2,
        };

        Ok(Self {
            decoder,
            sample_rate,
            channels,
            pcm: vec![0.0; MAX_SAMPLES_PER_CHANNEL * channels as usize],
        })
    }

    /// Decode one packet. Returns the interleaved samples; the slice is
    /// valid until the next call.
    pub fn decode(&mut self, payload: &[u8]) -> Result<(&[f32], u32), CodecError> {
        let samples_per_channel = self
            .decoder
            .decode_float(payload, &mut self.pcm, false)
            .map_err(|e| CodecError::Decode(e.to_string()))?;

        let total = samples_per_channel * self.channels as usize;
        Ok((&self.pcm[..total], samples_per_channel as u32))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}
