//! Shared test utilities

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::{Arc, Mutex};

use inside_client::observer::{ConnectionStatus, RecordingStatus, SessionObserver};
use inside_client::player::{
    Channel, ContentKind, EngineEvent, EngineEvents, MediaInfo, MediaSink,
};
use inside_client::protocol::{DeviceCommand, FrameKind, encode};
use serde_json::{Value, json};

/// Observer that records every event as a short string
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<String>>,
}

impl RecordingObserver {
    /// Shared observer
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of recorded events
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Whether `event` was recorded
    pub fn saw(&self, event: &str) -> bool {
        self.events().iter().any(|e| e == event)
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl SessionObserver for RecordingObserver {
    fn connection_status(&self, status: ConnectionStatus) {
        self.push(format!("connection:{status}"));
    }

    fn recording_status(&self, status: RecordingStatus) {
        self.push(format!("recording:{status}"));
    }

    fn final_result(&self, message: &str) {
        self.push(format!("result:{message}"));
    }

    fn media_info(&self, info: &MediaInfo) {
        self.push(format!(
            "media:{}",
            info.title.as_deref().unwrap_or_default()
        ));
    }

    fn media_progress(&self, percent: f64) {
        self.push(format!("progress:{percent:.0}"));
    }

    fn open_url(&self, url: &str) {
        self.push(format!("open:{url}"));
    }
}

/// Media sink that logs calls and completes TTS clips immediately
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    pub calls: Arc<Mutex<Vec<String>>>,
    events: Option<EngineEvents>,
}

impl RecordingSink {
    /// Sink reporting TTS completion on `events`
    #[must_use]
    pub fn with_events(events: EngineEvents) -> Self {
        Self {
            calls: Arc::default(),
            events: Some(events),
        }
    }

    /// Snapshot of recorded calls
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn push(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl MediaSink for RecordingSink {
    fn play_url(&mut self, channel: Channel, url: Option<&str>, content: ContentKind) {
        self.push(format!("play_url:{channel}:{}:{content:?}", url.unwrap_or("-")));
    }

    #[allow(clippy::cast_precision_loss)]
    fn play_pcm(&mut self, channel: Channel, clip: u64, samples: Vec<f32>, sample_rate: u32) {
        self.push(format!("play_pcm:{channel}:{}", samples.len()));
        if let Some(events) = &self.events {
            let play_time = samples.len() as f64 / f64::from(sample_rate);
            let _ = events.send(EngineEvent::TtsFinished {
                channel,
                clip,
                play_time,
            });
        }
    }

    fn pause(&mut self, channel: Channel) {
        self.push(format!("pause:{channel}"));
    }

    fn resume(&mut self, channel: Channel) {
        self.push(format!("resume:{channel}"));
    }

    fn stop(&mut self, channel: Channel) {
        self.push(format!("stop:{channel}"));
    }
}

/// `srvCommand` envelope text with the payload double-encoded
#[must_use]
pub fn server_command(msg_type: &str, payload: &Value) -> String {
    json!({
        "srvCommand": {"msgType": msg_type, "msgPayload": payload.to_string()}
    })
    .to_string()
}

/// Control frame carrying a server command
#[must_use]
pub fn server_frame(msg_type: &str, payload: &Value) -> Vec<u8> {
    encode(FrameKind::Control, server_command(msg_type, payload).as_bytes())
}

/// Decoded `msgPayload` of an outbound command
pub fn payload_of(command: &DeviceCommand) -> Value {
    serde_json::from_str(&command.msg_payload).unwrap()
}

/// 16 kHz mono 16-bit WAV file holding `samples`
pub fn wav_bytes(samples: &[i16]) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// Stream frame carrying a WAV-headered TTS clip
pub fn tts_frame(samples: &[i16]) -> Vec<u8> {
    encode(FrameKind::Stream, &wav_bytes(samples))
}

/// Generate sine wave audio samples
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn sine(frequency: f32, sample_rate: u32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let n = (sample_rate as f32 * duration_secs) as usize;
    (0..n)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}
