//! Binary frame codec.
//!
//! - Outbound: f32 samples in [-1, 1] → s16le PCM → base64 `WireBlob`
//! - Inbound: base64 → s16le bytes → per-channel f32 `PlayableBuffer`

use base64::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// A block of mono microphone samples, as delivered by the capture device.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }
}

/// Binary audio encoded for the wire, tagged with its MIME descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireBlob {
    pub mime_type: String,
    pub data: String,
}

/// Audio payload received from the remote session.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundChunk {
    pub mime_type: String,
    pub data: String,
}

impl InboundChunk {
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    pub fn decode(&self) -> Result<Vec<u8>> {
        decode(&self.data)
    }

    /// Sample rate announced by the MIME type, or `default` when absent.
    pub fn sample_rate_or(&self, default: u32) -> u32 {
        parse_rate(&self.mime_type).unwrap_or(default)
    }
}

impl From<WireBlob> for InboundChunk {
    fn from(blob: WireBlob) -> Self {
        Self::new(blob.mime_type, blob.data)
    }
}

/// Decoded, device-ready audio. One sample vector per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayableBuffer {
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl PlayableBuffer {
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

pub fn mime_for_rate(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Extract the `rate=` parameter from a MIME descriptor such as `audio/pcm;rate=24000`.
pub fn parse_rate(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("rate"))
        .and_then(|(_, value)| value.trim().parse().ok())
}

/// Encode float samples as base64 s16le PCM.
pub fn encode(samples: &[f32], sample_rate: u32) -> WireBlob {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        // `as` saturates, so +1.0 lands on i16::MAX and NaN on 0
        let value = (sample.clamp(-1.0, 1.0) * 32768.0) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    WireBlob {
        mime_type: mime_for_rate(sample_rate),
        data: BASE64_STANDARD.encode(&bytes),
    }
}

pub fn decode(data: &str) -> Result<Vec<u8>> {
    Ok(BASE64_STANDARD.decode(data.trim())?)
}

/// Interpret interleaved s16le bytes as a playable buffer.
///
/// Bytes that do not complete a frame are dropped. An empty payload becomes a
/// single sample of silence so the scheduler never sees a zero-length buffer.
pub fn to_playable_buffer(
    bytes: &[u8],
    sample_rate: u32,
    channel_count: usize,
) -> Result<PlayableBuffer> {
    if channel_count == 0 {
        return Err(PipelineError::Codec("channel count must be at least 1".into()));
    }
    if sample_rate == 0 {
        return Err(PipelineError::Codec("sample rate must be positive".into()));
    }

    let frame_bytes = channel_count * 2;
    let frame_count = bytes.len() / frame_bytes;
    if bytes.len() % frame_bytes != 0 {
        log::debug!(
            "Truncating {} trailing bytes of a {} byte chunk",
            bytes.len() % frame_bytes,
            bytes.len()
        );
    }

    if frame_count == 0 {
        return Ok(PlayableBuffer {
            channels: vec![vec![0.0]; channel_count],
            sample_rate,
        });
    }

    let mut channels: Vec<Vec<f32>> = (0..channel_count)
        .map(|_| Vec::with_capacity(frame_count))
        .collect();
    for frame in bytes[..frame_count * frame_bytes].chunks_exact(frame_bytes) {
        for (ch, sample) in frame.chunks_exact(2).enumerate() {
            let value = i16::from_le_bytes([sample[0], sample[1]]);
            channels[ch].push(value as f32 / 32768.0);
        }
    }

    Ok(PlayableBuffer {
        channels,
        sample_rate,
    })
}
