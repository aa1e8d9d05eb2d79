//! Audio capture, playback and wire conversion

mod capture;
mod playback;
mod resample;

pub use capture::{
    AudioCapture, BlockBuffer, DEFAULT_BLOCK_SIZE, calculate_rms, samples_to_wav,
};
pub use playback::SpeakerSink;
pub use resample::{Resampler, WIRE_SAMPLE_RATE, decode_pcm16, downsample, encode_pcm16};
