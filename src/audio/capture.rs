//! Audio capture from microphone

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};

use super::encode_pcm16;
use crate::{Error, Result};

/// Samples per capture block handed to the callback
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Accumulates mono samples and yields fixed-size blocks
#[derive(Debug, Clone)]
pub struct BlockBuffer {
    block_size: usize,
    pending: Vec<f32>,
}

impl BlockBuffer {
    /// Buffer emitting blocks of `block_size` samples (at least one)
    #[must_use]
    pub fn new(block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self {
            block_size,
            pending: Vec::with_capacity(block_size),
        }
    }

    /// Append `samples`, calling `on_block` for every completed block
    pub fn push(&mut self, samples: &[f32], mut on_block: impl FnMut(&[f32])) {
        let mut rest = samples;
        while !rest.is_empty() {
            let take = (self.block_size - self.pending.len()).min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.pending.len() == self.block_size {
                on_block(&self.pending);
                self.pending.clear();
            }
        }
    }

    /// Samples waiting for a full block
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Captures audio from the default input device at its native rate
pub struct AudioCapture {
    device: Device,
    config: StreamConfig,
    format: SampleFormat,
    block_size: usize,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Open the default input device
    ///
    /// # Errors
    ///
    /// Returns error if no input device or config is available
    pub fn new(block_size: usize) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let supported = device
            .default_input_config()
            .map_err(|e| Error::Audio(e.to_string()))?;
        let format = supported.sample_format();
        let config = supported.config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            format = ?format,
            "audio capture initialized"
        );

        Ok(Self {
            device,
            config,
            format,
            block_size,
            stream: None,
        })
    }

    /// Start capturing; `on_block` receives mono blocks at [`Self::sample_rate`]
    ///
    /// Runs on the audio thread, so the callback must not block.
    ///
    /// # Errors
    ///
    /// Returns error if the stream cannot be built or started
    pub fn start(&mut self, on_block: impl FnMut(&[f32]) + Send + 'static) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let stream = match self.format {
            SampleFormat::F32 => self.build_input::<f32>(on_block)?,
            SampleFormat::I16 => self.build_input::<i16>(on_block)?,
            SampleFormat::U16 => self.build_input::<u16>(on_block)?,
            other => {
                return Err(Error::Audio(format!("unsupported sample format: {other:?}")));
            }
        };

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    fn build_input<T>(&self, mut on_block: impl FnMut(&[f32]) + Send + 'static) -> Result<Stream>
    where
        T: SizedSample,
        f32: FromSample<T>,
    {
        let channels = usize::from(self.config.channels.max(1));
        let mut blocks = BlockBuffer::new(self.block_size);
        let mut mono = Vec::new();

        self.device
            .build_input_stream(
                &self.config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    mono.clear();
                    mono.extend(data.chunks(channels).map(mix_down::<T>));
                    blocks.push(&mono, &mut on_block);
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))
    }

    /// Stop capturing audio
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    /// Native rate of the input device
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }
}

#[allow(clippy::cast_precision_loss)]
fn mix_down<T>(frame: &[T]) -> f32
where
    T: Sample,
    f32: FromSample<T>,
{
    if frame.is_empty() {
        return 0.0;
    }
    frame.iter().map(|&s| f32::from_sample(s)).sum::<f32>() / frame.len() as f32
}

/// Calculate RMS (root mean square) of audio samples
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Encode mono f32 samples as a 16-bit WAV file
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for pair in encode_pcm16(samples).chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_buffer_frames_exact_blocks() {
        let mut buf = BlockBuffer::new(4);
        let mut blocks: Vec<Vec<f32>> = Vec::new();

        buf.push(&[1.0, 2.0, 3.0], |b| blocks.push(b.to_vec()));
        assert!(blocks.is_empty());
        assert_eq!(buf.pending(), 3);

        buf.push(&[4.0, 5.0, 6.0, 7.0, 8.0, 9.0], |b| blocks.push(b.to_vec()));
        assert_eq!(
            blocks,
            vec![vec![1.0, 2.0, 3.0, 4.0], vec![5.0, 6.0, 7.0, 8.0]]
        );
        assert_eq!(buf.pending(), 1);
    }

    #[test]
    fn test_block_buffer_zero_size_clamped() {
        let mut buf = BlockBuffer::new(0);
        let mut count = 0;
        buf.push(&[0.1, 0.2], |_| count += 1);
        assert_eq!(count, 2);
    }

    #[test]
    fn test_mix_down_averages_channels() {
        assert!((mix_down(&[0.5f32, -0.5]) - 0.0).abs() < f32::EPSILON);
        assert!((mix_down(&[0.25f32, 0.75]) - 0.5).abs() < f32::EPSILON);
        assert!(mix_down::<f32>(&[]).abs() < f32::EPSILON);
    }

    #[test]
    fn test_mix_down_converts_integer_samples() {
        let v = mix_down(&[i16::MIN]);
        assert!((v + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_calculate_rms() {
        assert!(calculate_rms(&[]).abs() < f32::EPSILON);
        assert!((calculate_rms(&[0.5, -0.5, 0.5, -0.5]) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_samples_to_wav() {
        let wav = samples_to_wav(&[0.0, 0.5, -0.5, 1.0], 16000).unwrap();
        let mut reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        assert_eq!(reader.spec().channels, 1);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0, 16383, -16384, 32767]);
    }
}
