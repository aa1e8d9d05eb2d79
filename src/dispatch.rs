//! Server command dispatch
//!
//! Turns decoded server commands into playback calls, flag changes and
//! outbound messages. The dispatcher borrows the session's state for the
//! duration of one command; it owns nothing.

use indexmap::IndexSet;
use serde::{Deserialize, Deserializer};
use serde::de::DeserializeOwned;

use crate::observer::{RECOGNITION_FAILED, RecordingStatus, SessionObserver};
use crate::player::{Channel, MediaReport, MetaInfo, PlaybackEngine, deserialize_notify_times};
use crate::protocol::{DeviceCommand, ServerCommand};

/// Result code meaning success
pub const RC_SUCCESS: i64 = 200;

/// Device state tags reported to the server; mutated only on server instruction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DssStatusSet(IndexSet<String>);

impl DssStatusSet {
    /// Set seeded with `tags`
    #[must_use]
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(tags.into_iter().map(Into::into).collect())
    }

    /// Add `set` tags then remove `clear` tags
    pub fn apply(&mut self, set: &[String], clear: &[String]) {
        for tag in set {
            self.0.insert(tag.clone());
        }
        for tag in clear {
            self.0.shift_remove(tag);
        }
    }

    /// Whether `tag` is present
    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains(tag)
    }

    /// Tags in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// Audio streaming flags driven by the server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamState {
    /// Captured audio is forwarded to the server
    pub sending: bool,
    /// Inbound stream frames are played on this TTS channel
    pub receiving: Option<Channel>,
}

/// Side effect the session must carry out after dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Send a control message
    Send(DeviceCommand),
    /// Drop the connection and reconnect after the configured delay
    ServiceDisconnect,
}

impl From<MediaReport> for Effect {
    fn from(report: MediaReport) -> Self {
        Self::Send(DeviceCommand::media_status(&report))
    }
}

/// Known server command types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// `Res_VOCM`: result of a voice command request
    VoiceResultAck,
    /// `Req_STRV`: start streaming microphone audio
    StreamRequest,
    /// `Req_STPV`: stop streaming, recognition finished
    StreamStop,
    /// `Req_PLMD`: play media or TTS
    MediaPlay,
    /// `Req_UPMD`: stop / pause / resume a channel
    MediaUpdate,
    /// `Req_UPDS`: update DSS status tags
    DssUpdate,
    /// `Req_OAuth`: open an OAuth consent page
    OAuthRequest,
    /// `Snd_SVEV`: server event
    ServerEvent,
}

impl CommandKind {
    /// Map a wire message type
    #[must_use]
    pub fn from_msg_type(msg_type: &str) -> Option<Self> {
        Some(match msg_type {
            "Res_VOCM" => Self::VoiceResultAck,
            "Req_STRV" => Self::StreamRequest,
            "Req_STPV" => Self::StreamStop,
            "Req_PLMD" => Self::MediaPlay,
            "Req_UPMD" => Self::MediaUpdate,
            "Req_UPDS" => Self::DssUpdate,
            "Req_OAuth" => Self::OAuthRequest,
            "Snd_SVEV" => Self::ServerEvent,
            _ => return None,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DssOpt {
    #[serde(default, deserialize_with = "null_as_empty")]
    set_dss_status: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    clear_dss_status: Vec<String>,
}

/// A `null` tag list means nothing to change
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Deserialize)]
struct VoiceAck {
    rc: i64,
}

#[derive(Debug, Default, Deserialize)]
struct StopOpt {
    #[serde(default)]
    uword: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayOpt {
    channel: Channel,
    #[serde(default)]
    url: Option<String>,
    meta_info: MetaInfo,
    #[serde(default, deserialize_with = "deserialize_notify_times")]
    play_noti_time: Vec<u64>,
    #[serde(default)]
    act_on_other: Option<String>,
    #[serde(flatten)]
    dss: DssOpt,
}

#[derive(Debug, Deserialize)]
struct UpdateOpt {
    channel: Channel,
    #[serde(default)]
    act: Option<String>,
    #[serde(flatten)]
    dss: DssOpt,
}

#[derive(Debug, Deserialize)]
struct OAuthOpt {
    oauth_url: String,
}

#[derive(Debug, Deserialize)]
struct EventOpt {
    #[serde(rename = "type")]
    kind: String,
}

fn parse<T: DeserializeOwned>(cmd: &ServerCommand, value: &serde_json::Value) -> Option<T> {
    match T::deserialize(value) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(msg_type = %cmd.msg_type, error = %e, "malformed command dropped");
            None
        }
    }
}

/// Strip the markup tags the server wraps around spoken text
#[must_use]
pub fn strip_markup(text: &str) -> String {
    text.replace("<ktml>", "").replace("</ktml>", "")
}

/// Applies server commands to session state
pub struct CommandDispatcher<'a> {
    stream: &'a mut StreamState,
    dss: &'a mut DssStatusSet,
    engine: &'a mut PlaybackEngine,
    observer: &'a dyn SessionObserver,
}

impl<'a> CommandDispatcher<'a> {
    /// Borrow the state a command may touch
    pub fn new(
        stream: &'a mut StreamState,
        dss: &'a mut DssStatusSet,
        engine: &'a mut PlaybackEngine,
        observer: &'a dyn SessionObserver,
    ) -> Self {
        Self {
            stream,
            dss,
            engine,
            observer,
        }
    }

    /// Dispatch `cmd` and, if it names one, its chained follow-up
    ///
    /// Chaining is one hop: a `nextCmd` inside the follow-up is not processed.
    pub fn dispatch(&mut self, cmd: &ServerCommand) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.dispatch_one(cmd, &mut effects);

        if let Some(next) = cmd.chained() {
            tracing::debug!(from = %cmd.msg_type, next = %next.msg_type, "chained command");
            self.dispatch_one(&next, &mut effects);
        }
        effects
    }

    fn dispatch_one(&mut self, cmd: &ServerCommand, effects: &mut Vec<Effect>) {
        let Some(kind) = CommandKind::from_msg_type(&cmd.msg_type) else {
            tracing::debug!(msg_type = %cmd.msg_type, "unhandled command");
            return;
        };
        tracing::debug!(msg_type = %cmd.msg_type, ?kind, "dispatch");

        let opt = cmd.cmd_opt();
        match kind {
            CommandKind::VoiceResultAck => {
                if let Some(ack) = parse::<VoiceAck>(cmd, &cmd.payload) {
                    if ack.rc != RC_SUCCESS {
                        tracing::info!(rc = ack.rc, "voice command rejected");
                        self.observer.final_result(RECOGNITION_FAILED);
                    }
                }
            }
            CommandKind::StreamRequest => {
                self.stream.sending = true;
                self.observer.recording_status(RecordingStatus::Recording);
            }
            CommandKind::StreamStop => {
                let stop: StopOpt = parse(cmd, opt).unwrap_or_default();
                tracing::info!(uword = stop.uword.as_deref(), "voice command recognized");
                self.stream.sending = false;
                self.observer.recording_status(RecordingStatus::Idle);
                if stop.uword.as_deref().is_none_or(str::is_empty) {
                    self.observer.final_result(RECOGNITION_FAILED);
                }
            }
            CommandKind::MediaPlay => {
                if let Some(play) = parse::<PlayOpt>(cmd, opt) {
                    self.media_play(play, effects);
                }
            }
            CommandKind::MediaUpdate => {
                if let Some(update) = parse::<UpdateOpt>(cmd, opt) {
                    let report = match update.act.as_deref() {
                        Some("stop") => self.engine.stop(update.channel),
                        Some("pause") => self.engine.pause(update.channel),
                        Some("resume") => self.engine.resume(update.channel),
                        other => {
                            tracing::debug!(act = other, "unknown media action");
                            None
                        }
                    };
                    effects.extend(report.map(Effect::from));
                    self.apply_dss(&update.dss);
                }
            }
            CommandKind::DssUpdate => {
                let dss: DssOpt = parse(cmd, opt).unwrap_or_default();
                self.apply_dss(&dss);
            }
            CommandKind::OAuthRequest => {
                if let Some(oauth) = parse::<OAuthOpt>(cmd, opt) {
                    self.observer.open_url(&oauth.oauth_url);
                }
            }
            CommandKind::ServerEvent => {
                if let Some(event) = parse::<EventOpt>(cmd, opt) {
                    match event.kind.as_str() {
                        "servDisc" | "disconnect" => effects.push(Effect::ServiceDisconnect),
                        "standby" => tracing::debug!("server standby"),
                        other => tracing::debug!(kind = other, "unhandled server event"),
                    }
                }
            }
        }
    }

    fn media_play(&mut self, play: PlayOpt, effects: &mut Vec<Effect>) {
        effects.extend(
            self.engine
                .arbitrate(play.channel, play.act_on_other.as_deref())
                .map(Effect::from),
        );

        if play.channel.is_media() {
            let report = self.engine.play(
                play.channel,
                play.url.as_deref(),
                &play.meta_info,
                play.play_noti_time,
            );
            effects.extend(report.map(Effect::from));
        } else {
            self.stream.receiving = Some(play.channel);
            if let Some(mesg) = &play.meta_info.mesg {
                self.observer.final_result(&strip_markup(mesg));
            }
        }

        self.apply_dss(&play.dss);
    }

    fn apply_dss(&mut self, dss: &DssOpt) {
        if dss.set_dss_status.is_empty() && dss.clear_dss_status.is_empty() {
            return;
        }
        self.dss.apply(&dss.set_dss_status, &dss.clear_dss_status);
        tracing::debug!(dss = ?self.dss, "dss status updated");
    }
}
