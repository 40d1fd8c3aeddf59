//! PCM codec for the realtime channel.
//!
//! Microphone frames go out as 16-bit little-endian PCM, base64-encoded so
//! they can ride inside JSON. Agent speech comes back the same way and is
//! decoded into planar f32 chunks for playback.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::AudioError;

/// Capture sample rate expected by the agent.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of the agent's audio output.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Samples per captured frame (256 ms at 16 kHz).
pub const FRAME_SAMPLES: usize = 4096;

/// A block of mono microphone samples in [-1, 1] at [`INPUT_SAMPLE_RATE`].
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<f32>,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// MIME type announced to the agent for this frame.
    pub fn mime_type() -> String {
        format!("audio/pcm;rate={INPUT_SAMPLE_RATE}")
    }

    /// Encode for the wire: 16-bit PCM, then base64.
    pub fn to_base64(&self) -> String {
        encode_base64(&encode_frame(&self.samples))
    }
}

/// Decoded agent audio, one sample vector per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackChunk {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl PlaybackChunk {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> u16 {
        self.channels.len() as u16
    }

    pub fn frame_count(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// Samples of the first channel.
    pub fn samples(&self) -> &[f32] {
        self.channels.first().map_or(&[], Vec::as_slice)
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Playing time of the chunk at its sample rate.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frame_count() as f64 / self.sample_rate as f64)
    }

    /// Re-interleave channels for an output device.
    pub fn interleaved(&self) -> Vec<f32> {
        let frames = self.frame_count();
        let mut out = Vec::with_capacity(frames * self.channels.len());
        for i in 0..frames {
            for ch in &self.channels {
                out.push(ch[i]);
            }
        }
        out
    }
}

/// Convert float samples to 16-bit little-endian PCM.
///
/// Out-of-range input is clamped to [-1, 1]. Samples scale by 32768 and
/// saturate at `i16::MAX`, so `1.0` maps to 32767, `-1.0` to -32768, and
/// every value produced by [`decode_chunk`] encodes back to its source bytes.
pub fn encode_frame(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
        let scaled = (clamped * 32768.0).round();
        let pcm = scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        out.extend_from_slice(&pcm.to_le_bytes());
    }
    out
}

/// Interpret `bytes` as interleaved 16-bit little-endian PCM.
///
/// Fails with [`AudioError::MalformedAudio`] when the length is not a whole
/// number of frames for `channel_count`.
pub fn decode_chunk(
    bytes: &[u8],
    sample_rate: u32,
    channel_count: u16,
) -> Result<PlaybackChunk, AudioError> {
    let channel_count = channel_count as usize;
    let frame_bytes = 2 * channel_count;
    if channel_count == 0 || bytes.len() % frame_bytes != 0 {
        return Err(AudioError::MalformedAudio {
            len: bytes.len(),
            frame_bytes,
        });
    }

    let frames = bytes.len() / frame_bytes;
    let mut channels = vec![Vec::with_capacity(frames); channel_count];
    for (i, pair) in bytes.chunks_exact(2).enumerate() {
        let sample = i16::from_le_bytes([pair[0], pair[1]]);
        channels[i % channel_count].push(sample as f32 / 32768.0);
    }

    Ok(PlaybackChunk {
        sample_rate,
        channels,
    })
}

/// Base64-encode raw bytes for a JSON channel.
pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Inverse of [`encode_base64`].
pub fn decode_base64(text: &str) -> Result<Vec<u8>, AudioError> {
    Ok(BASE64.decode(text)?)
}
