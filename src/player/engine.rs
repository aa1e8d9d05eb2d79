//! Per-channel playback state machine
//!
//! ```text
//! Stopped --play--> Playing --pause--> Paused
//!    ^                 |  ^              |
//!    |                 |  +---resume-----+
//!    +------stop-------+--------stop-----+
//! ```
//!
//! Music on the media channel is ticked once per second; the tick handle is
//! dropped (cancelling the timer) on every path out of `Playing`.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use super::{
    Channel, ContentKind, EngineEvent, MediaInfo, MediaReport, MediaSink, MediaStatus, MetaInfo,
    TickHandle, Ticker,
};
use crate::observer::SessionObserver;

/// Playback status of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayState {
    /// Idle
    #[default]
    Stopped,
    /// Producing audio
    Playing,
    /// Suspended, position kept
    Paused,
}

/// State of one channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaState {
    /// Playback status
    pub status: PlayState,
    /// Track duration in seconds, when the server sent a positive one
    pub duration: Option<u64>,
    /// Seconds played so far
    pub played: u64,
    /// Play positions at which the server wants a `noti` report
    pub notify_at: VecDeque<u64>,
    tracked: bool,
}

impl MediaState {
    /// Whether this channel is ticked for progress
    #[must_use]
    pub const fn is_tracked(&self) -> bool {
        self.tracked
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Owns every channel's state and its progress timer
pub struct PlaybackEngine {
    channels: BTreeMap<Channel, MediaState>,
    ticks: HashMap<Channel, TickHandle>,
    ticker: Ticker,
    clips: HashMap<Channel, u64>,
    next_clip: u64,
    sink: Box<dyn MediaSink>,
    observer: Arc<dyn SessionObserver>,
}

impl PlaybackEngine {
    /// Engine with TTS channels `0..tts_channels` plus the media channel
    #[must_use]
    pub fn new(
        tts_channels: u32,
        sink: Box<dyn MediaSink>,
        observer: Arc<dyn SessionObserver>,
        ticker: Ticker,
    ) -> Self {
        let mut channels: BTreeMap<Channel, MediaState> = (0..tts_channels.max(1))
            .map(|n| (Channel(n), MediaState::default()))
            .collect();
        channels.insert(Channel::MEDIA, MediaState::default());

        Self {
            channels,
            ticks: HashMap::new(),
            ticker,
            clips: HashMap::new(),
            next_clip: 0,
            sink,
            observer,
        }
    }

    /// State of a channel, if it exists
    #[must_use]
    pub fn state(&self, channel: Channel) -> Option<&MediaState> {
        self.channels.get(&channel)
    }

    /// Whether a progress timer is live for `channel`
    #[must_use]
    pub fn is_ticking(&self, channel: Channel) -> bool {
        self.ticks.contains_key(&channel)
    }

    fn slot(&mut self, channel: Channel) -> Option<&mut MediaState> {
        let slot = self.channels.get_mut(&channel);
        if slot.is_none() {
            tracing::warn!(%channel, "no such playback channel");
        }
        slot
    }

    fn cancel_tick(&mut self, channel: Channel) {
        if self.ticks.remove(&channel).is_some() {
            tracing::trace!(%channel, "tick cancelled");
        }
    }

    fn start_tick(&mut self, channel: Channel) {
        let handle = self.ticker.start(channel);
        // Replacing drops (and aborts) any previous timer for the channel
        self.ticks.insert(channel, handle);
    }

    /// Start playing a URL on `channel`
    ///
    /// Music gets duration tracking and notifications; radio, podcast and
    /// anything else play continuously. Music without a known duration is
    /// still ticked for notifications but never completes on its own.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn play(
        &mut self,
        channel: Channel,
        url: Option<&str>,
        meta: &MetaInfo,
        notify_at: Vec<u64>,
    ) -> Option<MediaReport> {
        let content = meta.content_type.unwrap_or(ContentKind::Other);
        tracing::info!(%channel, ?content, "play");

        self.cancel_tick(channel);
        self.clips.remove(&channel);
        let detail = meta.info_detail.clone().unwrap_or_default();
        let duration = detail.duration.map(|d| d.max(0.0).round() as u64);

        let state = self.slot(channel)?;
        state.reset();
        state.status = PlayState::Playing;
        if content == ContentKind::Music {
            state.duration = duration.filter(|&d| d > 0);
            state.notify_at = notify_at.into();
            state.tracked = true;
        }
        let tracked = state.tracked;

        if content != ContentKind::Other {
            self.observer.media_info(&MediaInfo {
                content,
                title: detail.title,
                artist: detail.artist,
                image_url: detail.image_url,
                duration: duration.filter(|&d| tracked && d > 0),
            });
        }

        self.sink.play_url(channel, url, content);
        if tracked {
            self.start_tick(channel);
        }

        Some(MediaReport::new(MediaStatus::Started, 0.0, channel))
    }

    /// Start a TTS clip on `channel`; the report follows on completion
    pub fn play_tts(&mut self, channel: Channel, samples: Vec<f32>, sample_rate: u32) {
        self.cancel_tick(channel);
        let Some(state) = self.slot(channel) else {
            return;
        };
        state.reset();
        state.status = PlayState::Playing;

        self.next_clip += 1;
        let clip = self.next_clip;
        self.clips.insert(channel, clip);

        tracing::debug!(%channel, clip, samples = samples.len(), "play tts");
        self.sink.play_pcm(channel, clip, samples, sample_rate);
    }

    /// TTS clip `clip` ended on its own
    ///
    /// Completions for a clip that was since replaced or stopped are
    /// dropped.
    pub fn finish_tts(
        &mut self,
        channel: Channel,
        clip: u64,
        play_time: f64,
    ) -> Option<MediaReport> {
        if self.clips.get(&channel) != Some(&clip) {
            tracing::trace!(%channel, clip, "stale tts completion ignored");
            return None;
        }
        self.clips.remove(&channel);
        let state = self.slot(channel)?;
        state.reset();
        tracing::debug!(%channel, play_time, "tts complete");
        Some(MediaReport::new(MediaStatus::Complete, play_time, channel))
    }

    /// Stop `channel`; stopping an idle channel still reports completion
    #[allow(clippy::cast_precision_loss)]
    pub fn stop(&mut self, channel: Channel) -> Option<MediaReport> {
        self.cancel_tick(channel);
        self.clips.remove(&channel);
        let state = self.slot(channel)?;
        let active = state.status != PlayState::Stopped;
        let played = state.played;
        state.reset();

        if active {
            self.sink.stop(channel);
        }
        tracing::debug!(%channel, played, "stop");
        Some(MediaReport::new(MediaStatus::Complete, played as f64, channel))
    }

    /// Pause `channel`, keeping its position
    #[allow(clippy::cast_precision_loss)]
    pub fn pause(&mut self, channel: Channel) -> Option<MediaReport> {
        self.cancel_tick(channel);
        let state = self.slot(channel)?;
        let was_playing = state.status == PlayState::Playing;
        if was_playing {
            state.status = PlayState::Paused;
        }
        let played = state.played;

        if was_playing {
            self.sink.pause(channel);
        }
        tracing::debug!(%channel, played, "pause");
        Some(MediaReport::new(MediaStatus::Paused, played as f64, channel))
    }

    /// Resume a paused `channel` from where it stopped
    pub fn resume(&mut self, channel: Channel) -> Option<MediaReport> {
        let state = self.slot(channel)?;
        let was_paused = state.status == PlayState::Paused;
        if was_paused {
            state.status = PlayState::Playing;
        }
        let tracked = state.tracked;

        if was_paused {
            self.sink.resume(channel);
            if tracked {
                self.start_tick(channel);
            }
        }
        tracing::debug!(%channel, was_paused, "resume");
        Some(MediaReport::new(MediaStatus::Started, 0.0, channel))
    }

    /// Advance a music channel by one second
    #[allow(clippy::cast_precision_loss)]
    pub fn tick(&mut self, channel: Channel) -> Vec<MediaReport> {
        let mut reports = Vec::new();
        let Some(state) = self.channels.get_mut(&channel) else {
            return reports;
        };
        if state.status != PlayState::Playing || !state.tracked {
            return reports;
        }

        state.played += 1;
        let played = state.played;

        while state.notify_at.front().is_some_and(|&at| at < played) {
            state.notify_at.pop_front();
        }
        if state.notify_at.front() == Some(&played) {
            state.notify_at.pop_front();
            reports.push(MediaReport::new(MediaStatus::Noti, played as f64, channel));
        }

        match state.duration {
            Some(duration) if played >= duration => {
                tracing::debug!(%channel, played, "track finished");
                reports.extend(self.stop(channel));
            }
            Some(duration) => {
                let percent = 100.0 * played as f64 / duration as f64;
                self.observer.media_progress(percent);
            }
            None => {}
        }
        reports
    }

    /// Apply an event posted by a timer or the sink
    pub fn handle_event(&mut self, event: EngineEvent) -> Vec<MediaReport> {
        match event {
            EngineEvent::Tick { channel, seq } => {
                if self.ticks.get(&channel).map(TickHandle::seq) == Some(seq) {
                    self.tick(channel)
                } else {
                    tracing::trace!(%channel, seq, "stale tick ignored");
                    Vec::new()
                }
            }
            EngineEvent::TtsFinished {
                channel,
                clip,
                play_time,
            } => self.finish_tts(channel, clip, play_time).into_iter().collect(),
        }
    }

    /// Make room on the media channel before TTS plays on `channel`
    ///
    /// Only TTS on channel 0 competes with media. A playing media channel
    /// honours `pause`/`pauseR` and `stop`/`stopR`; a paused one honours
    /// `resume` and `stop`/`stopR`. Anything else leaves media untouched.
    pub fn arbitrate(&mut self, channel: Channel, action: Option<&str>) -> Option<MediaReport> {
        if channel != Channel::TTS {
            return None;
        }
        let media = self.state(Channel::MEDIA)?.status;
        let action = action?;

        let status = match (media, action) {
            (PlayState::Playing, "pause" | "pauseR") => {
                self.pause(Channel::MEDIA);
                MediaStatus::Paused
            }
            (PlayState::Playing | PlayState::Paused, "stop" | "stopR") => {
                self.stop(Channel::MEDIA);
                MediaStatus::Stopped
            }
            (PlayState::Paused, "resume") => {
                self.resume(Channel::MEDIA);
                MediaStatus::Resumed
            }
            _ => return None,
        };

        tracing::debug!(action, status = status.as_str(), "media channel yielded to tts");
        Some(MediaReport::new(status, 0.0, Channel::MEDIA))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::player::InfoDetail;

    #[derive(Clone, Default)]
    struct LogSink(Arc<Mutex<Vec<String>>>);

    impl MediaSink for LogSink {
        fn play_url(&mut self, channel: Channel, _url: Option<&str>, _content: ContentKind) {
            self.0.lock().unwrap().push(format!("play {channel}"));
        }
        fn play_pcm(&mut self, channel: Channel, _clip: u64, samples: Vec<f32>, _rate: u32) {
            self.0.lock().unwrap().push(format!("pcm {channel} {}", samples.len()));
        }
        fn pause(&mut self, channel: Channel) {
            self.0.lock().unwrap().push(format!("pause {channel}"));
        }
        fn resume(&mut self, channel: Channel) {
            self.0.lock().unwrap().push(format!("resume {channel}"));
        }
        fn stop(&mut self, channel: Channel) {
            self.0.lock().unwrap().push(format!("stop {channel}"));
        }
    }

    struct Quiet;
    impl SessionObserver for Quiet {}

    fn engine() -> (PlaybackEngine, LogSink) {
        let sink = LogSink::default();
        let engine = PlaybackEngine::new(
            2,
            Box::new(sink.clone()),
            Arc::new(Quiet),
            Ticker::detached(),
        );
        (engine, sink)
    }

    fn music(duration: f64) -> MetaInfo {
        music_with(Some(duration))
    }

    fn music_with(duration: Option<f64>) -> MetaInfo {
        MetaInfo {
            content_type: Some(ContentKind::Music),
            info_detail: Some(InfoDetail {
                duration,
                ..InfoDetail::default()
            }),
            mesg: None,
        }
    }

    #[test]
    fn test_channel_pool() {
        let (engine, _) = engine();
        assert!(engine.state(Channel(0)).is_some());
        assert!(engine.state(Channel(1)).is_some());
        assert!(engine.state(Channel::MEDIA).is_some());
        assert!(engine.state(Channel(2)).is_none());
    }

    #[test]
    fn test_music_completes_after_duration() {
        let (mut engine, sink) = engine();
        let started = engine.play(Channel::MEDIA, Some("http://a"), &music(5.0), vec![]);
        assert_eq!(started.unwrap().status, MediaStatus::Started);
        assert!(engine.is_ticking(Channel::MEDIA));

        let mut reports = Vec::new();
        for _ in 0..5 {
            reports.extend(engine.tick(Channel::MEDIA));
        }

        assert_eq!(reports, vec![MediaReport::new(MediaStatus::Complete, 5.0, Channel::MEDIA)]);
        assert_eq!(engine.state(Channel::MEDIA).unwrap().status, PlayState::Stopped);
        assert!(!engine.is_ticking(Channel::MEDIA));
        assert_eq!(sink.0.lock().unwrap().last().unwrap(), "stop 101");

        // Further ticks on a stopped channel do nothing
        assert!(engine.tick(Channel::MEDIA).is_empty());
    }

    #[test]
    fn test_notifications_consumed_in_order() {
        let (mut engine, _) = engine();
        engine.play(Channel::MEDIA, None, &music(10.0), vec![2, 4]);

        let reports: Vec<_> = (0..4).flat_map(|_| engine.tick(Channel::MEDIA)).collect();
        assert_eq!(
            reports,
            vec![
                MediaReport::new(MediaStatus::Noti, 2.0, Channel::MEDIA),
                MediaReport::new(MediaStatus::Noti, 4.0, Channel::MEDIA),
            ]
        );
        assert!(engine.state(Channel::MEDIA).unwrap().notify_at.is_empty());
    }

    #[test]
    fn test_pause_resume_preserves_position() {
        let (mut engine, _) = engine();
        engine.play(Channel::MEDIA, None, &music(10.0), vec![]);
        engine.tick(Channel::MEDIA);
        engine.tick(Channel::MEDIA);

        let paused = engine.pause(Channel::MEDIA).unwrap();
        assert_eq!(paused, MediaReport::new(MediaStatus::Paused, 2.0, Channel::MEDIA));
        assert!(!engine.is_ticking(Channel::MEDIA));

        // Paused channels do not advance
        assert!(engine.tick(Channel::MEDIA).is_empty());
        assert_eq!(engine.state(Channel::MEDIA).unwrap().played, 2);

        engine.resume(Channel::MEDIA);
        assert!(engine.is_ticking(Channel::MEDIA));
        engine.tick(Channel::MEDIA);
        assert_eq!(engine.state(Channel::MEDIA).unwrap().played, 3);
    }

    #[test]
    fn test_stop_idle_channel_reports_zero() {
        let (mut engine, sink) = engine();
        let report = engine.stop(Channel::MEDIA).unwrap();
        assert_eq!(report, MediaReport::new(MediaStatus::Complete, 0.0, Channel::MEDIA));
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_radio_is_not_ticked() {
        let (mut engine, _) = engine();
        let meta = MetaInfo {
            content_type: Some(ContentKind::Radio),
            ..MetaInfo::default()
        };
        engine.play(Channel::MEDIA, Some("http://live.m3u8"), &meta, vec![]);

        assert!(!engine.is_ticking(Channel::MEDIA));
        assert!(engine.tick(Channel::MEDIA).is_empty());
        assert_eq!(engine.state(Channel::MEDIA).unwrap().status, PlayState::Playing);
    }

    #[test]
    fn test_stale_tick_ignored() {
        let (mut engine, _) = engine();
        engine.play(Channel::MEDIA, None, &music(10.0), vec![]);
        let old = EngineEvent::Tick { channel: Channel::MEDIA, seq: 0 };
        assert!(engine.handle_event(old).is_empty());
        assert_eq!(engine.state(Channel::MEDIA).unwrap().played, 0);
    }

    #[test]
    fn test_arbitrate_stop() {
        let (mut engine, _) = engine();
        engine.play(Channel::MEDIA, None, &music(10.0), vec![]);

        let report = engine.arbitrate(Channel::TTS, Some("stop")).unwrap();
        assert_eq!(report, MediaReport::new(MediaStatus::Stopped, 0.0, Channel::MEDIA));
        assert_eq!(engine.state(Channel::MEDIA).unwrap().status, PlayState::Stopped);
    }

    #[test]
    fn test_arbitrate_pause_then_resume() {
        let (mut engine, _) = engine();
        engine.play(Channel::MEDIA, None, &music(10.0), vec![]);

        let paused = engine.arbitrate(Channel::TTS, Some("pauseR")).unwrap();
        assert_eq!(paused.status, MediaStatus::Paused);
        assert_eq!(engine.state(Channel::MEDIA).unwrap().status, PlayState::Paused);

        // Pause does not apply to an already paused channel
        assert!(engine.arbitrate(Channel::TTS, Some("pause")).is_none());

        let resumed = engine.arbitrate(Channel::TTS, Some("resume")).unwrap();
        assert_eq!(resumed.status, MediaStatus::Resumed);
        assert_eq!(engine.state(Channel::MEDIA).unwrap().status, PlayState::Playing);
    }

    #[test]
    fn test_arbitrate_ignores_other_channels_and_idle_media() {
        let (mut engine, _) = engine();
        assert!(engine.arbitrate(Channel::TTS, Some("stop")).is_none());

        engine.play(Channel::MEDIA, None, &music(10.0), vec![]);
        assert!(engine.arbitrate(Channel(1), Some("stop")).is_none());
        assert!(engine.arbitrate(Channel::TTS, None).is_none());
    }

    #[test]
    fn test_tts_lifecycle() {
        let (mut engine, sink) = engine();
        engine.play_tts(Channel::TTS, vec![0.0; 8000], 16000);
        assert_eq!(engine.state(Channel::TTS).unwrap().status, PlayState::Playing);
        assert_eq!(sink.0.lock().unwrap().as_slice(), ["pcm 0 8000"]);

        let reports = engine.handle_event(EngineEvent::TtsFinished {
            channel: Channel::TTS,
            clip: 1,
            play_time: 0.5,
        });
        assert_eq!(reports, vec![MediaReport::new(MediaStatus::Complete, 0.5, Channel::TTS)]);
        assert_eq!(engine.state(Channel::TTS).unwrap().status, PlayState::Stopped);
    }

    #[test]
    fn test_replaced_tts_clip_completion_ignored() {
        let (mut engine, _) = engine();
        engine.play_tts(Channel::TTS, vec![0.0; 8000], 16000);
        engine.play_tts(Channel::TTS, vec![0.0; 4000], 16000);

        let first = EngineEvent::TtsFinished {
            channel: Channel::TTS,
            clip: 1,
            play_time: 0.5,
        };
        assert!(engine.handle_event(first).is_empty());
        assert_eq!(engine.state(Channel::TTS).unwrap().status, PlayState::Playing);

        let second = EngineEvent::TtsFinished {
            channel: Channel::TTS,
            clip: 2,
            play_time: 0.25,
        };
        assert_eq!(
            engine.handle_event(second.clone()),
            vec![MediaReport::new(MediaStatus::Complete, 0.25, Channel::TTS)]
        );
        assert_eq!(engine.state(Channel::TTS).unwrap().status, PlayState::Stopped);

        // A clip completes once
        assert!(engine.handle_event(second).is_empty());
    }

    #[test]
    fn test_stopped_tts_clip_completion_ignored() {
        let (mut engine, _) = engine();
        engine.play_tts(Channel::TTS, vec![0.0; 8000], 16000);
        engine.stop(Channel::TTS);

        let late = EngineEvent::TtsFinished {
            channel: Channel::TTS,
            clip: 1,
            play_time: 0.1,
        };
        assert!(engine.handle_event(late).is_empty());
    }

    #[test]
    fn test_music_without_duration_plays_on() {
        let (mut engine, _) = engine();
        engine.play(Channel::MEDIA, None, &music_with(None), vec![3]);
        assert_eq!(engine.state(Channel::MEDIA).unwrap().duration, None);
        assert!(engine.is_ticking(Channel::MEDIA));

        let reports: Vec<_> = (0..10).flat_map(|_| engine.tick(Channel::MEDIA)).collect();
        assert_eq!(reports, vec![MediaReport::new(MediaStatus::Noti, 3.0, Channel::MEDIA)]);

        let state = engine.state(Channel::MEDIA).unwrap();
        assert_eq!(state.status, PlayState::Playing);
        assert_eq!(state.played, 10);
    }

    #[test]
    fn test_music_with_zero_duration_plays_on() {
        let (mut engine, _) = engine();
        engine.play(Channel::MEDIA, None, &music(0.0), vec![]);
        assert_eq!(engine.state(Channel::MEDIA).unwrap().duration, None);

        assert!(engine.tick(Channel::MEDIA).is_empty());
        assert_eq!(engine.state(Channel::MEDIA).unwrap().status, PlayState::Playing);
    }
}
