//! Box-filter downsampling and PCM16 conversion
//!
//! Captured audio arrives as `f32` at whatever rate the input device runs at.
//! The server expects 16 kHz mono PCM16 little-endian, so each capture block
//! is averaged down to the wire rate and scaled to `i16`.

use crate::protocol::{FrameKind, encode};

/// Sample rate of audio on the wire (both directions)
pub const WIRE_SAMPLE_RATE: u32 = 16000;

/// Downsample `buf` from `source_rate` to `target_rate`
///
/// Each output sample is the mean of the input samples falling in its window
/// `[round(i * ratio), round((i + 1) * ratio))`. Output length is
/// `round(buf.len() * target_rate / source_rate)`. Equal rates return the
/// input unchanged; an empty input or a zero rate yields an empty output.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn downsample(buf: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate {
        return buf.to_vec();
    }
    if buf.is_empty() || source_rate == 0 || target_rate == 0 {
        return Vec::new();
    }

    let ratio = f64::from(source_rate) / f64::from(target_rate);
    let out_len = (buf.len() as f64 / ratio).round() as usize;

    let mut out = Vec::with_capacity(out_len);
    let mut start = 0usize;
    for i in 0..out_len {
        let end = (((i + 1) as f64) * ratio).round() as usize;
        let window = buf.get(start..end.min(buf.len())).unwrap_or(&[]);

        let sample = if window.is_empty() {
            // Upsampling leaves some windows empty; hold the previous value
            out.last().copied().unwrap_or(0.0)
        } else {
            window.iter().sum::<f32>() / window.len() as f32
        };
        out.push(sample);
        start = end;
    }
    out
}

/// Convert float samples to PCM16 little-endian bytes
///
/// Samples are clamped to `[-1.0, 1.0]`; negatives scale by `0x8000`,
/// positives by `0x7FFF`.
#[must_use]
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let s = s.clamp(-1.0, 1.0);
        #[allow(clippy::cast_possible_truncation)]
        let v = if s < 0.0 { s * 32768.0 } else { s * 32767.0 } as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Convert PCM16 little-endian bytes to float samples in `[-1.0, 1.0)`
///
/// A trailing odd byte is ignored.
#[must_use]
pub fn decode_pcm16(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect()
}

/// Converts capture blocks at a fixed device rate into outbound stream frames
#[derive(Debug, Clone, Copy)]
pub struct Resampler {
    source_rate: u32,
    target_rate: u32,
}

impl Resampler {
    /// Create a resampler from the device rate to the wire rate
    #[must_use]
    pub const fn to_wire(source_rate: u32) -> Self {
        Self {
            source_rate,
            target_rate: WIRE_SAMPLE_RATE,
        }
    }

    /// Input sample rate
    #[must_use]
    pub const fn source_rate(&self) -> u32 {
        self.source_rate
    }

    /// Downsample one capture block
    #[must_use]
    pub fn process(&self, block: &[f32]) -> Vec<f32> {
        downsample(block, self.source_rate, self.target_rate)
    }

    /// Downsample, encode and wrap one capture block in a stream envelope
    #[must_use]
    pub fn frame(&self, block: &[f32]) -> Vec<u8> {
        encode(FrameKind::Stream, &encode_pcm16(&self.process(block)))
    }
}
