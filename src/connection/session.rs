//! Session actor
//!
//! One task owns the connection state, streaming flags, DSS status and the
//! playback engine. Socket traffic, user commands, engine events, captured
//! audio and the reconnect deadline all arrive as messages and are handled
//! one at a time. A separate writer task owns the socket sink so control and
//! stream frames never interleave.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;

use super::state::{ConnectionMachine, ConnectionState, HandshakeStep};
use crate::audio::decode_pcm16;
use crate::auth::{ClientCredentials, timestamp};
use crate::config::Config;
use crate::dispatch::{CommandDispatcher, DssStatusSet, Effect, StreamState};
use crate::observer::{ConnectionStatus, RecordingStatus, SessionObserver};
use crate::player::{EngineEvent, EngineEvents, MediaSink, PlaybackEngine, TICK_PERIOD, Ticker};
use crate::protocol::{DeviceCommand, Frame, FrameKind, ServerCommand, decode, encode};
use crate::{Error, Result};

/// Captured frames buffered before the capture side starts dropping
pub const AUDIO_QUEUE_DEPTH: usize = 32;

/// Requests from the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// Open the socket and authenticate
    Connect,
    /// Close the socket
    Disconnect,
    /// Ask the server for a voice command session
    StartVoiceCommand,
    /// Abandon the current voice command
    CancelVoiceCommand,
    /// Close the socket and end the session task
    Shutdown,
}

/// Socket activity, tagged with the connection generation it belongs to
#[derive(Debug)]
pub enum SocketEvent {
    /// Socket open; `outbound` feeds the writer task
    Opened {
        generation: u64,
        outbound: mpsc::UnboundedSender<Message>,
    },
    /// Connect failed before the socket opened
    Failed { generation: u64, error: String },
    /// Text message (handshake traffic)
    Text { generation: u64, text: String },
    /// Binary message (framed traffic)
    Binary { generation: u64, data: Vec<u8> },
    /// Socket closed by the peer or by an error
    Closed {
        generation: u64,
        error: Option<String>,
    },
}

impl SocketEvent {
    const fn generation(&self) -> u64 {
        match self {
            Self::Opened { generation, .. }
            | Self::Failed { generation, .. }
            | Self::Text { generation, .. }
            | Self::Binary { generation, .. }
            | Self::Closed { generation, .. } => *generation,
        }
    }
}

/// Cloneable handle for driving a running [`Session`]
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    audio: mpsc::Sender<Vec<u8>>,
}

impl SessionHandle {
    fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::SessionClosed)
    }

    /// Connect and authenticate
    ///
    /// # Errors
    ///
    /// Returns error if the session task has ended
    pub fn connect(&self) -> Result<()> {
        self.send(SessionCommand::Connect)
    }

    /// Disconnect
    ///
    /// # Errors
    ///
    /// Returns error if the session task has ended
    pub fn disconnect(&self) -> Result<()> {
        self.send(SessionCommand::Disconnect)
    }

    /// Start a voice command
    ///
    /// # Errors
    ///
    /// Returns error if the session task has ended
    pub fn start_voice_command(&self) -> Result<()> {
        self.send(SessionCommand::StartVoiceCommand)
    }

    /// Cancel the current voice command
    ///
    /// # Errors
    ///
    /// Returns error if the session task has ended
    pub fn cancel_voice_command(&self) -> Result<()> {
        self.send(SessionCommand::CancelVoiceCommand)
    }

    /// Disconnect and stop the session task
    ///
    /// # Errors
    ///
    /// Returns error if the session task has already ended
    pub fn shutdown(&self) -> Result<()> {
        self.send(SessionCommand::Shutdown)
    }

    /// Queue an encoded stream frame; never blocks
    ///
    /// Returns false if the frame was dropped because the queue is full or
    /// the session has ended.
    pub fn push_audio_frame(&self, frame: Vec<u8>) -> bool {
        match self.audio.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::trace!("audio queue full, block dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

struct Mailboxes {
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    socket: mpsc::UnboundedReceiver<SocketEvent>,
    engine: mpsc::UnboundedReceiver<EngineEvent>,
    audio: mpsc::Receiver<Vec<u8>>,
}

/// The session actor; consume with [`Session::run`]
pub struct Session {
    config: Config,
    credentials: ClientCredentials,
    observer: Arc<dyn SessionObserver>,
    machine: ConnectionMachine,
    stream: StreamState,
    dss: DssStatusSet,
    engine: PlaybackEngine,
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    socket_task: Option<JoinHandle<()>>,
    socket_events: mpsc::UnboundedSender<SocketEvent>,
    reconnect_at: Option<Instant>,
    mailboxes: Option<Mailboxes>,
}

impl Session {
    /// Build a session; `make_sink` receives the channel for completion events
    pub fn new(
        config: Config,
        credentials: ClientCredentials,
        observer: Arc<dyn SessionObserver>,
        make_sink: impl FnOnce(EngineEvents) -> Box<dyn MediaSink>,
    ) -> (Self, SessionHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (socket_tx, socket_rx) = mpsc::unbounded_channel();
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let (audio_tx, audio_rx) = mpsc::channel(AUDIO_QUEUE_DEPTH);

        let ticker = Ticker::new(engine_tx.clone(), TICK_PERIOD);
        let engine = PlaybackEngine::new(
            config.audio.tts_channels,
            make_sink(engine_tx),
            Arc::clone(&observer),
            ticker,
        );
        let dss = DssStatusSet::new(config.initial_dss_status.iter().cloned());

        let session = Self {
            config,
            credentials,
            observer,
            machine: ConnectionMachine::new(),
            stream: StreamState::default(),
            dss,
            engine,
            generation: 0,
            outbound: None,
            socket_task: None,
            socket_events: socket_tx,
            reconnect_at: None,
            mailboxes: Some(Mailboxes {
                commands: command_rx,
                socket: socket_rx,
                engine: engine_rx,
                audio: audio_rx,
            }),
        };
        let handle = SessionHandle {
            commands: command_tx,
            audio: audio_tx,
        };
        (session, handle)
    }

    /// Current connection state
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    /// Current DSS status tags
    #[must_use]
    pub const fn dss_status(&self) -> &DssStatusSet {
        &self.dss
    }

    /// Current streaming flags
    #[must_use]
    pub const fn stream_state(&self) -> StreamState {
        self.stream
    }

    /// Playback engine
    #[must_use]
    pub const fn engine(&self) -> &PlaybackEngine {
        &self.engine
    }

    /// Process messages until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        let Some(mut mailboxes) = self.mailboxes.take() else {
            return;
        };
        tracing::debug!(server = %self.config.server, "session started");

        loop {
            let deadline = self.reconnect_at;
            let reconnect = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                command = mailboxes.commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(event) = mailboxes.socket.recv() => self.handle_socket_event(event),
                Some(event) = mailboxes.engine.recv() => self.handle_engine_event(event),
                Some(frame) = mailboxes.audio.recv() => self.forward_audio(frame),
                () = reconnect => {
                    tracing::info!("reconnecting after service disconnect");
                    self.reconnect_at = None;
                    self.connect();
                }
            }
        }

        self.disconnect();
        tracing::debug!("session ended");
    }

    /// Apply a user command
    pub fn handle_command(&mut self, command: SessionCommand) {
        tracing::debug!(?command, state = %self.machine.state(), "command");
        match command {
            SessionCommand::Connect => {
                self.reconnect_at = None;
                self.connect();
            }
            SessionCommand::Disconnect | SessionCommand::Shutdown => {
                self.reconnect_at = None;
                self.disconnect();
            }
            SessionCommand::StartVoiceCommand => self.start_voice_command(),
            SessionCommand::CancelVoiceCommand => self.cancel_voice_command(),
        }
    }

    fn connect(&mut self) {
        if !self.machine.connect_requested() {
            tracing::debug!(state = %self.machine.state(), "already connected");
            return;
        }
        self.generation += 1;
        self.observer.connection_status(ConnectionStatus::Connecting);

        let url = self.config.websocket_url();
        tracing::info!(%url, attempt = self.machine.retry_count(), "connecting");
        self.socket_task = Some(tokio::spawn(run_socket(
            url,
            self.config.subprotocol.clone(),
            self.generation,
            self.socket_events.clone(),
        )));
    }

    fn disconnect(&mut self) {
        let had_socket = self.outbound.is_some() || self.socket_task.is_some();
        if let Some(outbound) = self.outbound.take() {
            let _ = outbound.send(Message::Close(None));
        }
        if let Some(task) = self.socket_task.take() {
            task.abort();
        }
        // Anything still in flight from the old socket is stale
        self.generation += 1;

        let previous = self.machine.closed();
        if had_socket || previous != ConnectionState::Disconnected {
            tracing::info!(%previous, "disconnected");
            self.reset_streaming();
            self.observer
                .connection_status(ConnectionStatus::Disconnected);
        }
    }

    fn service_disconnect(&mut self) {
        let delay = self.config.reconnect.service_disconnect_delay;
        tracing::info!(delay_secs = delay.as_secs(), "service disconnect requested");
        self.disconnect();
        self.reconnect_at = Some(Instant::now() + delay);
    }

    fn transport_down(&mut self, error: Option<String>) {
        self.outbound = None;
        self.socket_task = None;
        let previous = self.machine.closed();
        match &error {
            Some(error) => tracing::warn!(%previous, %error, "connection lost"),
            None => tracing::info!(%previous, "connection closed by server"),
        }
        self.reset_streaming();
        self.observer
            .connection_status(ConnectionStatus::Disconnected);

        if self
            .config
            .reconnect
            .should_retry(self.machine.retry_count())
        {
            tracing::info!(attempt = self.machine.retry_count(), "auto reconnect");
            self.connect();
        }
    }

    fn reset_streaming(&mut self) {
        let was_sending = self.stream.sending;
        self.stream = StreamState::default();
        if was_sending {
            self.observer.recording_status(RecordingStatus::Idle);
        }
    }

    fn start_voice_command(&mut self) {
        if !self.machine.is_authenticated() {
            tracing::warn!(state = %self.machine.state(), "voice command needs a connection");
            return;
        }
        if self.stream.sending {
            self.cancel_voice_command();
        }
        let request = DeviceCommand::voice_request(self.dss.iter());
        self.send_command(&request);
    }

    fn cancel_voice_command(&mut self) {
        if !self.stream.sending {
            tracing::debug!("no voice command to cancel");
            return;
        }
        self.stream.sending = false;
        self.observer.recording_status(RecordingStatus::Idle);
        self.send_command(&DeviceCommand::voice_cancel());
    }

    /// Apply a socket event; events from a superseded socket are dropped
    pub fn handle_socket_event(&mut self, event: SocketEvent) {
        if event.generation() != self.generation {
            tracing::trace!(
                event_generation = event.generation(),
                generation = self.generation,
                "stale socket event dropped"
            );
            return;
        }

        match event {
            SocketEvent::Opened { outbound, .. } => {
                if self.machine.socket_opened() {
                    tracing::debug!("socket open, awaiting challenge");
                    self.outbound = Some(outbound);
                }
            }
            SocketEvent::Failed { error, .. } => self.transport_down(Some(error)),
            SocketEvent::Closed { error, .. } => self.transport_down(error),
            SocketEvent::Text { text, .. } => self.handle_text(&text),
            SocketEvent::Binary { data, .. } => self.handle_binary(&data),
        }
    }

    fn handle_text(&mut self, text: &str) {
        if self.machine.is_authenticated() {
            tracing::warn!("text message after authentication dropped");
            return;
        }

        let step = self.machine.on_handshake(
            text,
            &self.credentials,
            &self.config.client_type,
            &timestamp(),
        );
        match step {
            Ok(HandshakeStep::Respond(response)) => match serde_json::to_string(&response) {
                Ok(json) => {
                    tracing::debug!("answering identity challenge");
                    self.send_message(Message::text(json));
                }
                Err(e) => tracing::warn!(error = %e, "failed to encode identity response"),
            },
            Ok(HandshakeStep::Authenticated) => {
                tracing::info!("authenticated");
                self.observer.connection_status(ConnectionStatus::Connected);
            }
            Ok(HandshakeStep::Ignored) => {}
            Err(e) => tracing::warn!(error = %e, "handshake message dropped"),
        }
    }

    fn handle_binary(&mut self, data: &[u8]) {
        if !self.machine.is_authenticated() {
            tracing::debug!(len = data.len(), "binary message before authentication dropped");
            return;
        }

        let frame = match decode(data) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "frame dropped");
                return;
            }
        };

        match frame.kind {
            FrameKind::Control => self.handle_control(&frame),
            FrameKind::Stream => self.handle_stream(&frame),
        }
    }

    fn handle_control(&mut self, frame: &Frame<'_>) {
        let command = frame
            .control_text()
            .and_then(ServerCommand::parse);
        match command {
            Ok(Some(command)) => self.dispatch(&command),
            Ok(None) => tracing::debug!("control frame without srvCommand ignored"),
            Err(e) => tracing::warn!(error = %e, "control frame dropped"),
        }
    }

    fn handle_stream(&mut self, frame: &Frame<'_>) {
        let Some(channel) = self.stream.receiving else {
            tracing::trace!(len = frame.length, "stream frame without consumer dropped");
            return;
        };
        let Some(pcm) = frame.stream_pcm() else {
            tracing::warn!(len = frame.length, "stream frame shorter than its header dropped");
            return;
        };
        let samples = decode_pcm16(pcm);
        self.engine
            .play_tts(channel, samples, self.config.audio.wire_sample_rate);
    }

    fn dispatch(&mut self, command: &ServerCommand) {
        let effects = CommandDispatcher::new(
            &mut self.stream,
            &mut self.dss,
            &mut self.engine,
            self.observer.as_ref(),
        )
        .dispatch(command);

        for effect in effects {
            match effect {
                Effect::Send(command) => self.send_command(&command),
                Effect::ServiceDisconnect => self.service_disconnect(),
            }
        }
    }

    /// Apply a timer or sink event and report the result
    pub fn handle_engine_event(&mut self, event: EngineEvent) {
        for report in self.engine.handle_event(event) {
            self.send_command(&DeviceCommand::media_status(&report));
        }
    }

    fn forward_audio(&mut self, frame: Vec<u8>) {
        if self.stream.sending && self.machine.is_authenticated() {
            self.send_message(Message::binary(frame));
        }
    }

    fn send_command(&mut self, command: &DeviceCommand) {
        if !self.machine.is_authenticated() {
            tracing::debug!(msg_type = %command.msg_type, "not authenticated, command dropped");
            return;
        }
        match command.to_json() {
            Ok(json) => {
                tracing::debug!(msg_type = %command.msg_type, "send");
                self.send_message(Message::binary(encode(FrameKind::Control, json.as_bytes())));
            }
            Err(e) => tracing::warn!(error = %e, "failed to encode command"),
        }
    }

    fn send_message(&mut self, message: Message) {
        let Some(outbound) = &self.outbound else {
            tracing::debug!("no socket, message dropped");
            return;
        };
        if outbound.send(message).is_err() {
            tracing::debug!("writer gone, message dropped");
            self.outbound = None;
        }
    }
}

/// Open the socket, then pump inbound messages into `events`
async fn run_socket(
    url: String,
    subprotocol: String,
    generation: u64,
    events: mpsc::UnboundedSender<SocketEvent>,
) {
    let stream = match open_socket(&url, &subprotocol).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = events.send(SocketEvent::Failed {
                generation,
                error: e.to_string(),
            });
            return;
        }
    };

    let (mut write, mut read) = stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Single writer: everything sent on the socket goes through this task
    tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if let Err(e) = write.send(message).await {
                tracing::debug!(error = %e, "socket write failed");
                break;
            }
            if closing {
                break;
            }
        }
        let _ = write.close().await;
    });

    if events
        .send(SocketEvent::Opened {
            generation,
            outbound: outbound_tx,
        })
        .is_err()
    {
        return;
    }

    let mut error = None;
    while let Some(message) = read.next().await {
        let event = match message {
            Ok(Message::Text(text)) => SocketEvent::Text {
                generation,
                text: text.as_str().to_owned(),
            },
            Ok(Message::Binary(data)) => SocketEvent::Binary {
                generation,
                data: data.to_vec(),
            },
            Ok(Message::Close(frame)) => {
                tracing::debug!(?frame, "close frame received");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                error = Some(e.to_string());
                break;
            }
        };
        if events.send(event).is_err() {
            return;
        }
    }

    let _ = events.send(SocketEvent::Closed { generation, error });
}

async fn open_socket(
    url: &str,
    subprotocol: &str,
) -> Result<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
> {
    let mut request = url.into_client_request()?;
    let protocol = HeaderValue::from_str(subprotocol)
        .map_err(|e| Error::Config(format!("invalid subprotocol {subprotocol:?}: {e}")))?;
    request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", protocol);

    let (stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| Error::Connection(format!("{url}: {e}")))?;
    Ok(stream)
}
