//! Multi-channel media playback
//!
//! Channel 0 carries TTS clips streamed over the socket. Channel 101 carries
//! general media (music, radio, podcast) played from a URL. Actual audio I/O
//! is behind [`MediaSink`]; the engine only tracks state and reports.

mod engine;
mod ticker;

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

pub use engine::{MediaState, PlayState, PlaybackEngine};
pub use ticker::{TICK_PERIOD, TickHandle, Ticker};

/// Addressable playback slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Channel(pub u32);

impl Channel {
    /// TTS / voice prompt channel
    pub const TTS: Self = Self(0);

    /// General media channel (radio, podcast, music)
    pub const MEDIA: Self = Self(101);

    /// Whether this is the general media channel
    #[must_use]
    pub fn is_media(self) -> bool {
        self == Self::MEDIA
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status reported to the server in a media status message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaStatus {
    /// Playback started or resumed on request
    Started,
    /// Playback finished or was stopped on request
    Complete,
    /// Paused on request
    Paused,
    /// Stopped to make room for TTS
    Stopped,
    /// Resumed after TTS
    Resumed,
    /// Scheduled playback-position notification
    Noti,
}

impl MediaStatus {
    /// Wire string
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Complete => "complete",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Resumed => "resumed",
            Self::Noti => "noti",
        }
    }
}

/// A playback callback, translated into an outbound status message
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaReport {
    /// What happened
    pub status: MediaStatus,
    /// Seconds played on the channel
    pub play_time: f64,
    /// Channel the report concerns
    pub channel: Channel,
}

impl MediaReport {
    /// Build a report
    #[must_use]
    pub const fn new(status: MediaStatus, play_time: f64, channel: Channel) -> Self {
        Self {
            status,
            play_time,
            channel,
        }
    }

    /// `{status, playTime, channel}` object; whole seconds are written as integers
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn to_json(&self) -> Value {
        let play_time = if self.play_time.fract() == 0.0 && self.play_time >= 0.0 {
            Value::from(self.play_time as u64)
        } else {
            Value::from(self.play_time)
        };
        serde_json::json!({
            "status": self.status.as_str(),
            "playTime": play_time,
            "channel": self.channel.0,
        })
    }
}

/// Content type of media on the general channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// Finite track with duration tracking
    Music,
    /// Continuous live stream
    Radio,
    /// Podcast episode
    Podcast,
    /// Anything else
    #[serde(other)]
    Other,
}

/// Display details of a media item
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoDetail {
    /// Title
    #[serde(default)]
    pub title: Option<String>,
    /// Artist
    #[serde(default)]
    pub artist: Option<String>,
    /// Cover image
    #[serde(default, alias = "imageurl")]
    pub image_url: Option<String>,
    /// Duration in seconds
    #[serde(default)]
    pub duration: Option<f64>,
}

/// `metaInfo` block of a media-play command
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaInfo {
    /// Content type on the media channel
    #[serde(default)]
    pub content_type: Option<ContentKind>,
    /// Display details
    #[serde(default)]
    pub info_detail: Option<InfoDetail>,
    /// Spoken text of a TTS prompt (may contain `<ktml>` tags)
    #[serde(default)]
    pub mesg: Option<String>,
}

/// Media metadata handed to the observer when playback starts
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    /// Content type
    pub content: ContentKind,
    /// Title
    pub title: Option<String>,
    /// Artist
    pub artist: Option<String>,
    /// Cover image
    pub image_url: Option<String>,
    /// Duration in seconds (music only)
    pub duration: Option<u64>,
}

/// Deserialize `playNotiTime`, which the server sends as an array of seconds
/// or as `0` / `null` when there is nothing to notify
///
/// # Errors
///
/// Returns error if the value is neither an array of numbers nor a scalar
pub fn deserialize_notify_times<'de, D>(deserializer: D) -> Result<Vec<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Array(items) => Ok(items.iter().filter_map(Value::as_u64).collect()),
        Value::Null | Value::Number(_) | Value::Bool(_) | Value::String(_) => Ok(Vec::new()),
        Value::Object(_) => Err(serde::de::Error::custom("playNotiTime must be an array")),
    }
}

/// Events posted back into the session loop by timers and the audio sink
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// One-second progress tick for a music channel
    Tick {
        /// Channel being ticked
        channel: Channel,
        /// Sequence of the tick handle that produced it
        seq: u64,
    },
    /// A TTS clip finished playing
    TtsFinished {
        /// Channel the clip played on
        channel: Channel,
        /// Sequence the engine handed out when the clip started
        clip: u64,
        /// Clip length in seconds
        play_time: f64,
    },
}

/// Sender used by timers and sinks to reach the session loop
pub type EngineEvents = mpsc::UnboundedSender<EngineEvent>;

/// Audio output collaborator
///
/// Implementations must not block; PCM completion is reported later through
/// [`EngineEvent::TtsFinished`].
pub trait MediaSink: Send {
    /// Start playing a URL on a channel
    fn play_url(&mut self, channel: Channel, url: Option<&str>, content: ContentKind);

    /// Start playing decoded PCM on a channel
    ///
    /// `clip` must be echoed back in the completion event.
    fn play_pcm(&mut self, channel: Channel, clip: u64, samples: Vec<f32>, sample_rate: u32);

    /// Pause a channel
    fn pause(&mut self, channel: Channel);

    /// Resume a paused channel
    fn resume(&mut self, channel: Channel);

    /// Stop a channel and release its source
    fn stop(&mut self, channel: Channel);
}

/// Sink for headless runs: nothing is heard, PCM clips finish immediately
#[derive(Debug, Clone, Default)]
pub struct NullSink {
    events: Option<EngineEvents>,
}

impl NullSink {
    /// Create a sink that reports clip completion on `events`
    #[must_use]
    pub const fn new(events: Option<EngineEvents>) -> Self {
        Self { events }
    }
}

impl MediaSink for NullSink {
    fn play_url(&mut self, channel: Channel, url: Option<&str>, content: ContentKind) {
        tracing::debug!(%channel, url, ?content, "null sink: play url");
    }

    #[allow(clippy::cast_precision_loss)]
    fn play_pcm(&mut self, channel: Channel, clip: u64, samples: Vec<f32>, sample_rate: u32) {
        let play_time = samples.len() as f64 / f64::from(sample_rate.max(1));
        if let Some(events) = &self.events {
            let _ = events.send(EngineEvent::TtsFinished {
                channel,
                clip,
                play_time,
            });
        }
    }

    fn pause(&mut self, _channel: Channel) {}

    fn resume(&mut self, _channel: Channel) {}

    fn stop(&mut self, _channel: Channel) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_json_integer_seconds() {
        let report = MediaReport::new(MediaStatus::Complete, 5.0, Channel::MEDIA);
        assert_eq!(
            report.to_json(),
            serde_json::json!({"status": "complete", "playTime": 5, "channel": 101})
        );
    }

    #[test]
    fn test_report_json_fractional_seconds() {
        let report = MediaReport::new(MediaStatus::Complete, 2.5, Channel::TTS);
        assert_eq!(report.to_json()["playTime"], 2.5);
    }

    #[test]
    fn test_meta_info_parsing() {
        let meta: MetaInfo = serde_json::from_value(serde_json::json!({
            "contentType": "music",
            "infoDetail": {"title": "Song", "imageurl": "http://img", "duration": 180}
        }))
        .unwrap();

        assert_eq!(meta.content_type, Some(ContentKind::Music));
        let detail = meta.info_detail.unwrap();
        assert_eq!(detail.image_url.as_deref(), Some("http://img"));
        assert_eq!(detail.duration, Some(180.0));
    }

    #[test]
    fn test_unknown_content_kind() {
        let meta: MetaInfo =
            serde_json::from_value(serde_json::json!({"contentType": "audiobook"})).unwrap();
        assert_eq!(meta.content_type, Some(ContentKind::Other));
    }
}
