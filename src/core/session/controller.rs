//! Session controller: single owner of the session state machine.
//!
//! Commands from [`SessionHandle`]s, channel callbacks, setup completion and
//! playback completion all arrive as messages and are processed one at a time
//! by [`SessionController::run`]. Every event produced on behalf of a session is
//! tagged with the epoch it was started under; cleanup bumps the epoch so late
//! events for a released session are dropped.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use zeroize::Zeroizing;

use super::state::{SessionSnapshot, SessionState, SessionStatus};
use crate::config::AppConfig;
use crate::core::audio::{
    AudioBackend, AudioPipeline, CAPTURE_SAMPLE_RATE, CaptureEncoder, CaptureInput, CaptureSpec,
    CapturedFrame, InputLevel, PLAYBACK_SAMPLE_RATE, PlaybackOutput, PlaybackScheduler,
    PlaybackSpec, SourceEndedCallback, SourceId, decode_chunk,
};
use crate::core::realtime::{
    ChannelConfig, ChannelConnector, ChannelEvent, ChannelEventCallback, ChannelHandle,
    InboundMessage, ResponseModality,
};
use crate::core::tools::{ToolCallDispatcher, ToolCallRequest};
use crate::errors::{SessionError, SessionResult};

/// Capacity of the command queue.
const COMMAND_BUFFER_SIZE: usize = 64;

// =============================================================================
// Settings
// =============================================================================

/// Everything a session needs besides its collaborators.
#[derive(Clone)]
pub struct SessionSettings {
    pub api_key: Option<Zeroizing<String>>,
    /// Declared channel configuration; tools are filled from the dispatcher
    pub channel: ChannelConfig,
    pub frame_size: usize,
    pub capture_queue_capacity: usize,
}

impl SessionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            api_key: config.api_key.clone().map(Zeroizing::new),
            channel: ChannelConfig {
                model: config.model.clone(),
                system_instruction: config.system_instruction.clone(),
                response_modality: ResponseModality::Audio,
                voice: config.voice.clone(),
                tools: Vec::new(),
            },
            frame_size: config.frame_size,
            capture_queue_capacity: config.capture_queue_capacity,
        }
    }
}

impl std::fmt::Debug for SessionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.channel.model)
            .field("voice", &self.channel.voice)
            .field("frame_size", &self.frame_size)
            .finish()
    }
}

// =============================================================================
// Messages
// =============================================================================

enum SessionCommand {
    Start,
    Stop,
    Toggle,
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Shutdown,
}

enum SessionEvent {
    SetupFinished {
        epoch: u64,
        result: SessionResult<SessionResources>,
    },
    Channel {
        epoch: u64,
        event: ChannelEvent,
    },
    SourceEnded {
        epoch: u64,
        id: SourceId,
    },
}

/// Resources acquired by a setup task, handed to the controller when complete.
struct SessionResources {
    capture: CaptureInput,
    playback: Box<dyn PlaybackOutput>,
    channel: ChannelHandle,
}

impl SessionResources {
    fn close(mut self) {
        self.capture.pipeline.close();
        self.playback.close();
        self.channel.close();
    }
}

/// Resources of the live session.
struct ActiveSession {
    epoch: u64,
    channel: ChannelHandle,
    frames: Option<mpsc::Receiver<CapturedFrame>>,
    capture: Box<dyn AudioPipeline>,
    playback: PlaybackScheduler,
    encoder: Option<CaptureEncoder>,
}

impl ActiveSession {
    fn new(epoch: u64, resources: SessionResources) -> Self {
        Self {
            epoch,
            channel: resources.channel,
            frames: Some(resources.capture.frames),
            capture: resources.capture.pipeline,
            playback: PlaybackScheduler::new(resources.playback),
            encoder: None,
        }
    }

    /// Audio captured while connecting is stale by the time the channel opens.
    fn start_encoder(&mut self) {
        if let Some(mut frames) = self.frames.take() {
            let mut stale = 0usize;
            while frames.try_recv().is_ok() {
                stale += 1;
            }
            if stale > 0 {
                tracing::debug!(epoch = self.epoch, stale, "Discarding audio captured before open");
            }
            self.encoder = Some(CaptureEncoder::spawn(frames, self.channel.clone()));
        }
    }

    fn chunks_sent(&self) -> u64 {
        self.encoder.as_ref().map_or(0, CaptureEncoder::chunks_sent)
    }

    fn release(mut self) {
        // Encoder lets go of the frame queue before the device is closed
        if let Some(encoder) = self.encoder.take() {
            encoder.stop();
        }
        self.frames = None;
        self.playback.close();
        self.capture.close();
        self.channel.close();
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Cloneable control surface for a running [`SessionController`].
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    status: watch::Receiver<SessionStatus>,
    level: watch::Receiver<InputLevel>,
}

impl SessionHandle {
    async fn send(&self, command: SessionCommand) -> SessionResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::ControllerStopped)
    }

    pub async fn start(&self) -> SessionResult<()> {
        self.send(SessionCommand::Start).await
    }

    pub async fn stop(&self) -> SessionResult<()> {
        self.send(SessionCommand::Stop).await
    }

    /// Stop while connecting or connected, start otherwise.
    pub async fn toggle(&self) -> SessionResult<()> {
        self.send(SessionCommand::Toggle).await
    }

    pub async fn snapshot(&self) -> SessionResult<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Snapshot(tx)).await?;
        rx.await.map_err(|_| SessionError::ControllerStopped)
    }

    /// Release everything and end the controller task.
    pub async fn shutdown(&self) -> SessionResult<()> {
        self.send(SessionCommand::Shutdown).await
    }

    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    pub fn current_status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Level of the most recent captured frame.
    pub fn input_level(&self) -> watch::Receiver<InputLevel> {
        self.level.clone()
    }
}

// =============================================================================
// Controller
// =============================================================================

/// Owns the session and drives its state machine.
pub struct SessionController {
    settings: SessionSettings,
    audio: Arc<dyn AudioBackend>,
    connector: Arc<dyn ChannelConnector>,
    tools: Arc<ToolCallDispatcher>,

    status: watch::Sender<SessionStatus>,
    level: Arc<watch::Sender<InputLevel>>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,

    epoch: u64,
    setup: Option<JoinHandle<()>>,
    /// Channel events that arrived before the setup task reported back
    early_events: Vec<ChannelEvent>,
    session: Option<ActiveSession>,
}

impl SessionController {
    pub fn new(
        mut settings: SessionSettings,
        audio: Arc<dyn AudioBackend>,
        connector: Arc<dyn ChannelConnector>,
        tools: Arc<ToolCallDispatcher>,
    ) -> Self {
        settings.channel.tools = tools.declarations();
        let (status, _) = watch::channel(SessionStatus::default());
        let (level, _) = watch::channel(InputLevel::default());
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            settings,
            audio,
            connector,
            tools,
            status,
            level: Arc::new(level),
            events_tx,
            events_rx,
            epoch: 0,
            setup: None,
            early_events: Vec::new(),
            session: None,
        }
    }

    /// Run the controller on its own task.
    pub fn spawn(self) -> (SessionHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER_SIZE);
        let handle = SessionHandle {
            commands: commands_tx,
            status: self.status.subscribe(),
            level: self.level.subscribe(),
        };
        let task = tokio::spawn(self.run(commands_rx));
        (handle, task)
    }

    /// Process commands and events until shutdown or until every handle is dropped.
    async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        tracing::info!(
            provider = self.connector.provider_name(),
            "Session controller started"
        );

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event),
            }
        }

        self.stop();
        tracing::info!("Session controller stopped");
    }

    fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    fn set_status(&self, state: SessionState, error: Option<String>) {
        let previous = self.state();
        self.status.send_replace(SessionStatus { state, error });
        if previous != state {
            tracing::info!(epoch = self.epoch, from = %previous, to = %state, "Session state changed");
        }
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Start => self.start(),
            SessionCommand::Stop => self.stop(),
            SessionCommand::Toggle => {
                if self.state().is_active() {
                    self.stop();
                } else {
                    self.start();
                }
            }
            SessionCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            SessionCommand::Shutdown => {}
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        let status = self.status.borrow().clone();
        let session = self.session.as_ref();
        SessionSnapshot {
            state: status.state,
            error: status.error,
            epoch: self.epoch,
            channel_open: session.is_some_and(|s| s.channel.is_open()),
            active_sources: session.map_or(0, |s| s.playback.active_count()),
            next_start: session.map_or(0.0, |s| s.playback.next_start()),
            chunks_sent: session.map_or(0, ActiveSession::chunks_sent),
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    fn start(&mut self) {
        // Never two channels at once
        if self.state().is_active() {
            tracing::info!(epoch = self.epoch, "Restarting active session");
        }
        self.release();
        let epoch = self.epoch;

        let Some(api_key) = self
            .settings
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
        else {
            self.fail(SessionError::MissingCredential);
            return;
        };

        self.set_status(SessionState::Connecting, None);

        let setup = SetupTask {
            epoch,
            api_key,
            audio: self.audio.clone(),
            connector: self.connector.clone(),
            channel: self.settings.channel.clone(),
            capture: CaptureSpec {
                sample_rate: CAPTURE_SAMPLE_RATE,
                frame_size: self.settings.frame_size,
                queue_capacity: self.settings.capture_queue_capacity,
                level: self.level.clone(),
            },
            events: self.events_tx.clone(),
        };
        self.setup = Some(tokio::spawn(setup.run()));
    }

    /// Release everything and land in DISCONNECTED. Idempotent.
    fn stop(&mut self) {
        self.release();
        self.set_status(SessionState::Disconnected, None);
    }

    /// Release everything, then land in ERROR with a user-facing message.
    fn fail(&mut self, error: SessionError) {
        tracing::error!(epoch = self.epoch, "Session failed: {}", error);
        self.release();
        self.set_status(SessionState::Error, Some(error.user_message()));
    }

    /// Invalidate the current epoch and free every owned resource.
    fn release(&mut self) {
        self.epoch += 1;
        if let Some(setup) = self.setup.take() {
            setup.abort();
        }
        self.early_events.clear();
        if let Some(session) = self.session.take() {
            tracing::debug!(epoch = session.epoch, "Releasing session resources");
            session.release();
        }
    }

    // -------------------------------------------------------------------------
    // Events
    // -------------------------------------------------------------------------

    fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::SetupFinished { epoch, result } => {
                if epoch != self.epoch || self.setup.is_none() {
                    tracing::debug!(epoch, "Discarding stale setup result");
                    if let Ok(resources) = result {
                        resources.close();
                    }
                    return;
                }
                self.setup = None;

                match result {
                    Ok(resources) => {
                        self.session = Some(ActiveSession::new(epoch, resources));
                        for event in std::mem::take(&mut self.early_events) {
                            self.handle_channel_event(event);
                        }
                    }
                    Err(error) => self.fail(error),
                }
            }
            SessionEvent::Channel { epoch, event } => {
                if epoch != self.epoch {
                    tracing::trace!(epoch, "Ignoring event for released channel");
                    return;
                }
                if self.session.is_some() {
                    self.handle_channel_event(event);
                } else if self.setup.is_some() {
                    self.early_events.push(event);
                }
            }
            SessionEvent::SourceEnded { epoch, id } => {
                if let Some(session) = self.session.as_mut()
                    && session.epoch == epoch
                {
                    session.playback.on_source_ended(id);
                }
            }
        }
    }

    fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Open => {
                if self.state() != SessionState::Connecting {
                    return;
                }
                if let Some(session) = self.session.as_mut() {
                    session.start_encoder();
                }
                self.set_status(SessionState::Connected, None);
            }
            ChannelEvent::Message(message) => self.handle_message(message),
            ChannelEvent::Closed { reason } => {
                tracing::info!(epoch = self.epoch, ?reason, "{}", SessionError::ChannelClosedUnexpectedly);
                self.stop();
            }
            ChannelEvent::Error(error) => self.report(SessionError::from(error)),
        }
    }

    /// Fatal faults end the session; the rest are logged and the session goes on.
    fn report(&mut self, error: SessionError) {
        if error.is_fatal() {
            self.fail(error);
        } else {
            tracing::warn!(epoch = self.epoch, notice = %error.user_message(), "{}", error);
        }
    }

    fn handle_message(&mut self, message: InboundMessage) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        match message {
            InboundMessage::Audio(payload) => match decode_chunk(&payload, PLAYBACK_SAMPLE_RATE) {
                Ok(buffer) => {
                    if let Err(e) = session.playback.enqueue(buffer) {
                        tracing::warn!("Failed to schedule playback: {}", e);
                    }
                }
                Err(e) => self.report(SessionError::from(e)),
            },
            InboundMessage::Interrupted => {
                tracing::debug!(
                    stopped = session.playback.active_count(),
                    "Model interrupted, flushing playback"
                );
                session.playback.stop_all();
            }
            InboundMessage::TurnComplete => {
                tracing::debug!("Model turn complete");
            }
            InboundMessage::ToolCall(requests) => {
                for request in requests {
                    dispatch_tool_call(&self.tools, &session.channel, request);
                }
            }
            InboundMessage::ToolCallCancellation(ids) => {
                tracing::info!(?ids, "Service cancelled tool calls");
            }
            InboundMessage::GoAway { time_left } => {
                tracing::warn!(?time_left, "Service is going away");
            }
        }
    }
}

/// Run a tool call and send its result on its own task.
fn dispatch_tool_call(tools: &ToolCallDispatcher, channel: &ChannelHandle, request: ToolCallRequest) {
    let result = tools.dispatch(&request);
    let channel = channel.clone();
    tokio::spawn(async move {
        let call_id = result.id.clone();
        if let Err(e) = channel.send_tool_response(result).await {
            tracing::debug!(%call_id, "Tool response not sent: {}", e);
        }
    });
}

// =============================================================================
// Setup
// =============================================================================

/// Acquires the microphone, the speaker and the channel for one epoch.
struct SetupTask {
    epoch: u64,
    api_key: Zeroizing<String>,
    audio: Arc<dyn AudioBackend>,
    connector: Arc<dyn ChannelConnector>,
    channel: ChannelConfig,
    capture: CaptureSpec,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SetupTask {
    async fn run(self) {
        let epoch = self.epoch;
        let events = self.events.clone();
        let result = self.acquire().await;
        if let Err(mpsc::error::SendError(SessionEvent::SetupFinished {
            result: Ok(resources),
            ..
        })) = events.send(SessionEvent::SetupFinished { epoch, result })
        {
            resources.close();
        }
    }

    async fn acquire(self) -> SessionResult<SessionResources> {
        let epoch = self.epoch;

        let audio = self.audio.clone();
        let capture_spec = self.capture;
        let mut capture = tokio::task::spawn_blocking(move || audio.open_capture(capture_spec))
            .await
            .map_err(|e| SessionError::AudioDevice(e.to_string()))?
            .map_err(|e| SessionError::PermissionDenied(e.to_string()))?;

        let on_ended: SourceEndedCallback = {
            let events = self.events.clone();
            Arc::new(move |id| {
                let _ = events.send(SessionEvent::SourceEnded { epoch, id });
            })
        };
        let audio = self.audio.clone();
        let mut playback = match tokio::task::spawn_blocking(move || {
            audio.open_playback(
                PlaybackSpec {
                    sample_rate: PLAYBACK_SAMPLE_RATE,
                },
                on_ended,
            )
        })
        .await
        {
            Ok(Ok(playback)) => playback,
            Ok(Err(e)) => {
                capture.pipeline.close();
                return Err(SessionError::from(e));
            }
            Err(e) => {
                capture.pipeline.close();
                return Err(SessionError::AudioDevice(e.to_string()));
            }
        };

        let on_event: ChannelEventCallback = {
            let events = self.events.clone();
            Arc::new(move |event| {
                let _ = events.send(SessionEvent::Channel { epoch, event });
            })
        };

        tracing::debug!(epoch, provider = self.connector.provider_name(), "Opening channel");
        match self.connector.open(&self.api_key, self.channel, on_event).await {
            Ok(channel) => Ok(SessionResources {
                capture,
                playback,
                channel,
            }),
            Err(e) => {
                capture.pipeline.close();
                playback.close();
                Err(SessionError::from(e))
            }
        }
    }
}
