//! Status events emitted by the session
//!
//! The session never renders anything itself. Whatever sits on top (a CLI, a
//! desktop shell, a test) implements [`SessionObserver`] and decides how to
//! surface connection state, recording state, results and media metadata.

use std::fmt;

use crate::player::MediaInfo;

/// Socket connection status as shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Socket is being opened
    Connecting,
    /// Socket is open and authenticated
    Connected,
    /// No socket
    Disconnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Microphone streaming status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingStatus {
    /// Not streaming audio
    Idle,
    /// Streaming captured audio to the server
    Recording,
}

impl fmt::Display for RecordingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Recording => write!(f, "recording"),
        }
    }
}

/// Message surfaced when the server reports a failed recognition
pub const RECOGNITION_FAILED: &str = "voice recognition failed";

/// Receives state-change events from the session
///
/// All methods default to no-ops.
pub trait SessionObserver: Send + Sync {
    /// Connection status changed
    fn connection_status(&self, _status: ConnectionStatus) {}

    /// Recording status changed
    fn recording_status(&self, _status: RecordingStatus) {}

    /// Final result of a voice command, or a failure notice
    fn final_result(&self, _message: &str) {}

    /// New media started on a channel
    fn media_info(&self, _info: &MediaInfo) {}

    /// Music playback progress in percent
    fn media_progress(&self, _percent: f64) {}

    /// Server asked the device to open a URL (OAuth consent page)
    fn open_url(&self, _url: &str) {}
}

/// Observer that renders every event as a log line
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl SessionObserver for TracingObserver {
    fn connection_status(&self, status: ConnectionStatus) {
        tracing::info!(%status, "connection status");
    }

    fn recording_status(&self, status: RecordingStatus) {
        tracing::info!(%status, "recording status");
    }

    fn final_result(&self, message: &str) {
        if !message.is_empty() {
            tracing::info!(message, "result");
        }
    }

    fn media_info(&self, info: &MediaInfo) {
        tracing::info!(
            content = ?info.content,
            title = info.title.as_deref().unwrap_or_default(),
            artist = info.artist.as_deref().unwrap_or_default(),
            duration = info.duration,
            "now playing"
        );
    }

    fn media_progress(&self, percent: f64) {
        tracing::trace!(percent, "media progress");
    }

    fn open_url(&self, url: &str) {
        tracing::info!(url, "open this url to continue");
    }
}
