//! Inside Client - Voice assistant client for the Inside device protocol
//!
//! This library provides the core functionality of an Inside device:
//! - Signed challenge/response authentication over a websocket
//! - Binary framing of control messages and audio streams
//! - Server command dispatch and multi-channel media playback
//! - Microphone capture, downsampling and PCM16 encoding
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   frames    ┌──────────────────────────────────┐
//! │ AudioCapture ├────────────►│             Session              │
//! │ + Resampler  │  try_send   │  ConnectionMachine  DssStatusSet │
//! └──────────────┘             │  CommandDispatcher  StreamState  │
//!                              │  PlaybackEngine ──► MediaSink    │
//! ┌──────────────┐  commands   │                                  │
//! │ SessionHandle├────────────►│  SessionObserver (status out)    │
//! └──────────────┘             └───────┬──────────────────▲───────┘
//!                                      │ single writer    │ reader
//!                              ┌───────▼──────────────────┴───────┐
//!                              │        websocket (server)        │
//!                              └──────────────────────────────────┘
//! ```

pub mod audio;
pub mod auth;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod observer;
pub mod player;
pub mod protocol;

pub use auth::{AuthClient, ClientCredentials, CredentialStore, StoredClient};
pub use config::Config;
pub use connection::{ConnectionState, Session, SessionHandle};
pub use dispatch::{CommandDispatcher, DssStatusSet};
pub use error::{Error, Result};
pub use observer::{ConnectionStatus, RecordingStatus, SessionObserver, TracingObserver};
pub use player::{Channel, MediaSink, PlaybackEngine};
