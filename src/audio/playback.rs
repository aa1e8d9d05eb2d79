//! Audio playback to speakers

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::downsample;
use crate::player::{Channel, ContentKind, EngineEvent, EngineEvents, MediaSink};
use crate::{Error, Result};

/// Poll interval while waiting for a clip to drain
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Control flags shared with a playing clip
#[derive(Debug, Default)]
struct ClipControl {
    cancelled: AtomicBool,
    paused: AtomicBool,
}

/// Plays decoded TTS clips on the default output device
///
/// URL media is not decoded here; `play_url` only records the request so an
/// external player can pick it up.
pub struct SpeakerSink {
    events: EngineEvents,
    clips: HashMap<Channel, Arc<ClipControl>>,
}

impl SpeakerSink {
    /// Sink reporting clip completion on `events`
    #[must_use]
    pub fn new(events: EngineEvents) -> Self {
        Self {
            events,
            clips: HashMap::new(),
        }
    }
}

impl MediaSink for SpeakerSink {
    fn play_url(&mut self, channel: Channel, url: Option<&str>, content: ContentKind) {
        tracing::info!(%channel, url, ?content, "media playback requested");
    }

    fn play_pcm(&mut self, channel: Channel, clip: u64, samples: Vec<f32>, sample_rate: u32) {
        if let Some(previous) = self.clips.remove(&channel) {
            previous.cancelled.store(true, Ordering::SeqCst);
        }

        let control = Arc::new(ClipControl::default());
        self.clips.insert(channel, Arc::clone(&control));
        let events = self.events.clone();

        let job = move || {
            let played = match play_blocking(&samples, sample_rate, &control) {
                Ok(played) => played,
                Err(e) => {
                    tracing::warn!(%channel, error = %e, "tts playback failed");
                    samples.len()
                }
            };
            if control.cancelled.load(Ordering::SeqCst) {
                return;
            }
            #[allow(clippy::cast_precision_loss)]
            let play_time = played as f64 / f64::from(sample_rate.max(1));
            let _ = events.send(EngineEvent::TtsFinished {
                channel,
                clip,
                play_time,
            });
        };

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            drop(handle.spawn_blocking(job));
        } else {
            std::thread::spawn(job);
        }
    }

    fn pause(&mut self, channel: Channel) {
        if let Some(clip) = self.clips.get(&channel) {
            clip.paused.store(true, Ordering::SeqCst);
        }
    }

    fn resume(&mut self, channel: Channel) {
        if let Some(clip) = self.clips.get(&channel) {
            clip.paused.store(false, Ordering::SeqCst);
        }
    }

    fn stop(&mut self, channel: Channel) {
        if let Some(clip) = self.clips.remove(&channel) {
            clip.cancelled.store(true, Ordering::SeqCst);
        }
    }
}

/// Play `samples` and block until done or cancelled
///
/// Returns how many source samples were played.
fn play_blocking(samples: &[f32], sample_rate: u32, control: &ClipControl) -> Result<usize> {
    if samples.is_empty() {
        return Ok(0);
    }

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device".to_string()))?;
    let config = device
        .default_output_config()
        .map_err(|e| Error::Audio(e.to_string()))?
        .config();

    let device_rate = config.sample_rate.0;
    let channels = usize::from(config.channels.max(1));
    let output = Arc::new(downsample(samples, sample_rate, device_rate));
    let position = Arc::new(AtomicUsize::new(0));

    let paused = Arc::new(AtomicBool::new(false));

    let stream = {
        let output = Arc::clone(&output);
        let position = Arc::clone(&position);
        let paused = Arc::clone(&paused);
        device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let hold = paused.load(Ordering::Relaxed);
                    for frame in data.chunks_mut(channels) {
                        let pos = position.load(Ordering::Relaxed);
                        let sample = if hold {
                            0.0
                        } else {
                            output.get(pos).copied().unwrap_or(0.0)
                        };
                        frame.fill(sample);
                        if !hold && pos < output.len() {
                            position.store(pos + 1, Ordering::Relaxed);
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?
    };
    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    let mut budget = clip_duration(output.len(), device_rate) + Duration::from_millis(500);
    let mut last = Instant::now();
    while position.load(Ordering::Relaxed) < output.len() {
        if control.cancelled.load(Ordering::SeqCst) {
            break;
        }
        let hold = control.paused.load(Ordering::SeqCst);
        paused.store(hold, Ordering::Relaxed);

        let now = Instant::now();
        if !hold {
            budget = budget.saturating_sub(now - last);
            if budget.is_zero() {
                break;
            }
        }
        last = now;
        std::thread::sleep(POLL_INTERVAL);
    }
    drop(stream);

    let played = position.load(Ordering::Relaxed).min(output.len());
    tracing::debug!(samples = played, device_rate, "playback complete");
    Ok(scale_position(played, output.len(), samples.len()))
}

#[allow(clippy::cast_precision_loss)]
fn clip_duration(samples: usize, rate: u32) -> Duration {
    Duration::from_secs_f64(samples as f64 / f64::from(rate.max(1)))
}

/// Map a position in the resampled clip back onto the source clip
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn scale_position(played: usize, output_len: usize, source_len: usize) -> usize {
    if output_len == 0 {
        return 0;
    }
    ((played as f64 / output_len as f64) * source_len as f64).round() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_position() {
        assert_eq!(scale_position(0, 0, 100), 0);
        assert_eq!(scale_position(300, 300, 100), 100);
        assert_eq!(scale_position(150, 300, 100), 50);
    }

    #[test]
    fn test_clip_duration() {
        assert_eq!(clip_duration(16000, 16000), Duration::from_secs(1));
        assert_eq!(clip_duration(8000, 16000), Duration::from_millis(500));
    }

    #[test]
    fn test_stop_cancels_clip() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let mut sink = SpeakerSink::new(tx);
        let control = Arc::new(ClipControl::default());
        sink.clips.insert(Channel::TTS, Arc::clone(&control));

        sink.pause(Channel::TTS);
        assert!(control.paused.load(Ordering::SeqCst));
        sink.resume(Channel::TTS);
        assert!(!control.paused.load(Ordering::SeqCst));

        sink.stop(Channel::TTS);
        assert!(control.cancelled.load(Ordering::SeqCst));
        assert!(sink.clips.is_empty());
    }
}
