//! Session lifecycle and the single event loop tying capture, transport and
//! playback together.
//!
//! Everything that mutates session state, the playback cursor or the
//! in-flight set runs on the task that drives [`SessionController::run`].
//! Device threads, the socket task and a pending session open only talk to
//! it through channels, so no lifecycle step ever parks the loop.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::audio::PlaybackHandle;
use crate::codec::AudioFrame;
use crate::error::{PipelineError, Result};
use crate::persona::PersonaProvider;
use crate::pipeline::{CaptureEvent, CapturePipeline};
use crate::scheduler::PlaybackScheduler;
use crate::transport::{Session, Transport, TransportEvent};

/// Events buffered per session between the socket task and the loop.
const EVENT_QUEUE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Uninitialized,
    Connecting,
    Open,
    Recording,
    Idle,
    Closed,
}

/// What the user currently sees. `status` and `error` are never both set.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct StatusReport {
    pub state: SessionState,
    pub status: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlCommand {
    Record,
    StopRecording,
    Reset,
    Shutdown,
}

/// A session open running off the loop. Its events stay parked here until
/// the handshake hands back a session.
struct PendingOpen {
    task: JoinHandle<Result<Box<dyn Session>>>,
    events: mpsc::Receiver<TransportEvent>,
}

enum Wake {
    Opened(Result<Box<dyn Session>>),
    Transport(Option<TransportEvent>),
    Finished(PlaybackHandle),
    Capture(CaptureEvent),
    Command(Option<ControlCommand>),
}

pub struct SessionController {
    state: SessionState,
    transport: Arc<dyn Transport>,
    persona: Box<dyn PersonaProvider>,
    persona_text: Option<String>,
    pending_open: Option<PendingOpen>,
    session: Option<Box<dyn Session>>,
    events: Option<mpsc::Receiver<TransportEvent>>,
    /// Start the microphone as soon as the pending session is set up.
    record_when_open: bool,
    /// The pending session replaces one torn down by `reset`.
    announce_reset: bool,
    pipeline: CapturePipeline,
    scheduler: PlaybackScheduler,
    finished: mpsc::UnboundedReceiver<PlaybackHandle>,
    status: watch::Sender<StatusReport>,
}

impl SessionController {
    pub fn new(
        transport: Arc<dyn Transport>,
        persona: Box<dyn PersonaProvider>,
        pipeline: CapturePipeline,
        scheduler: PlaybackScheduler,
        finished: mpsc::UnboundedReceiver<PlaybackHandle>,
    ) -> Self {
        let (status, _) = watch::channel(StatusReport::default());
        Self {
            state: SessionState::Uninitialized,
            transport,
            persona,
            persona_text: None,
            pending_open: None,
            session: None,
            events: None,
            record_when_open: false,
            announce_reset: false,
            pipeline,
            scheduler,
            finished,
            status,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn status(&self) -> StatusReport {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusReport> {
        self.status.subscribe()
    }

    // ======================== Lifecycle ========================

    /// Start opening a session and return right away. The loop moves to
    /// `Open` once the remote side accepts it, or to `Closed` if it refuses.
    pub fn initialize(&mut self) -> Result<()> {
        let persona = match self.load_persona() {
            Ok(persona) => persona,
            Err(e) => {
                self.update_error(format!("Cannot initialize session: {}", e));
                return Err(e);
            }
        };

        self.close_session();
        self.set_state(SessionState::Connecting);
        self.update_status("Connecting...");

        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        let transport = self.transport.clone();
        let task = tokio::spawn(async move { transport.open(&persona, tx).await });
        self.pending_open = Some(PendingOpen { task, events: rx });
        Ok(())
    }

    fn load_persona(&mut self) -> Result<String> {
        if let Some(text) = &self.persona_text {
            return Ok(text.clone());
        }
        let text = self.persona.load()?;
        log::info!("System prompt loaded ({} bytes)", text.len());
        self.persona_text = Some(text.clone());
        Ok(text)
    }

    /// The handshake finished. The session only counts as open once its
    /// `Opened` event comes through.
    fn session_opened(&mut self, opened: Result<Box<dyn Session>>) {
        let Some(pending) = self.pending_open.take() else {
            return;
        };
        match opened {
            Ok(session) => {
                log::debug!("Session handshake done, waiting for setup to complete");
                self.session = Some(session);
                self.events = Some(pending.events);
            }
            Err(e) => self.fail_open(e),
        }
    }

    fn finish_open(&mut self) {
        self.set_state(SessionState::Open);
        if std::mem::take(&mut self.announce_reset) {
            self.update_status("Session reset. Ready for a new chat!");
        } else {
            self.update_status("Connection Opened. Ready to chat!");
        }
        if std::mem::take(&mut self.record_when_open) {
            if let Err(e) = self.record() {
                log::debug!("Deferred record failed: {}", e);
            }
        }
    }

    fn fail_open(&mut self, error: PipelineError) {
        self.close_session();
        self.record_when_open = false;
        self.set_state(SessionState::Closed);
        if std::mem::take(&mut self.announce_reset) {
            self.update_error(format!("Failed to reset session: {}", error));
        } else {
            self.update_error(format!("Failed to initialize session: {}", error));
        }
    }

    /// Ask for the microphone. While a session is still being set up the
    /// request is held until it opens.
    pub fn record(&mut self) -> Result<()> {
        if self.state == SessionState::Recording || self.pipeline.is_starting() {
            return Ok(());
        }
        if self.state == SessionState::Connecting {
            self.record_when_open = true;
            return Ok(());
        }

        if self.session.is_none() {
            self.update_error("Session not initialized. Please reset.");
            if self.initialize().is_err() {
                return Err(PipelineError::State("session not initialized".into()));
            }
            self.record_when_open = true;
            return Ok(());
        }

        if !matches!(self.state, SessionState::Open | SessionState::Idle) {
            return Err(PipelineError::State(format!(
                "cannot record while {:?}",
                self.state
            )));
        }

        self.update_status("Requesting microphone access...");
        if let Err(e) = self.pipeline.start() {
            self.halt_capture();
            self.update_error(format!("Error starting recording: {}", e));
            return Err(e);
        }
        Ok(())
    }

    pub fn stop_recording(&mut self) {
        self.record_when_open = false;
        if !self.pipeline.is_recording()
            && !self.pipeline.is_starting()
            && self.state != SessionState::Recording
        {
            return;
        }
        self.update_status("Stopping recording...");
        self.halt_capture();
        self.update_status("Recording stopped. Click Start to chat again.");
    }

    /// Release the microphone without touching the visible status.
    fn halt_capture(&mut self) {
        self.pipeline.stop();
        if self.state == SessionState::Recording {
            self.set_state(SessionState::Idle);
        }
    }

    /// Tear everything down and start opening a fresh session.
    pub fn reset(&mut self) -> Result<()> {
        self.update_status("Resetting session...");
        self.halt_capture();
        self.scheduler.reset();
        self.close_session();
        self.record_when_open = false;

        self.announce_reset = true;
        if let Err(e) = self.initialize() {
            self.announce_reset = false;
            self.update_error(format!("Failed to reset session: {}", e));
            return Err(e);
        }
        Ok(())
    }

    fn close_session(&mut self) {
        if let Some(pending) = self.pending_open.take() {
            log::info!("Abandoning session setup in progress");
            pending.task.abort();
        }
        // events still queued for the old session are discarded with the receiver
        self.events = None;
        if let Some(mut session) = self.session.take() {
            session.close();
        }
    }

    pub fn shutdown(&mut self) {
        log::info!("Shutting down session controller");
        self.halt_capture();
        self.scheduler.reset();
        self.close_session();
        self.record_when_open = false;
        self.announce_reset = false;
        self.set_state(SessionState::Closed);
    }

    // ======================== Events ========================

    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        if self.state == SessionState::Connecting {
            self.handle_setup_event(event);
            return;
        }

        match event {
            TransportEvent::Opened => log::debug!("Ignoring repeated setup completion"),
            TransportEvent::InboundChunk(chunk) => {
                if let Err(e) = self.scheduler.enqueue(&chunk) {
                    if e.is_session_level() {
                        self.update_error(e.to_string());
                    } else {
                        log::warn!("Dropping inbound chunk: {}", e);
                    }
                }
            }
            TransportEvent::Interrupted => {
                self.scheduler.interrupt();
            }
            TransportEvent::Error(message) => {
                self.update_error(format!("Connection Error: {}", message));
            }
            TransportEvent::Closed(reason) => {
                self.halt_capture();
                self.close_session();
                self.set_state(SessionState::Closed);
                self.update_status(format!("Connection Closed: {}", reason));
            }
        }
    }

    fn handle_setup_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => self.finish_open(),
            TransportEvent::Error(message) => self.fail_open(PipelineError::Transport(message)),
            TransportEvent::Closed(reason) => self.fail_open(PipelineError::Transport(format!(
                "connection closed: {}",
                reason
            ))),
            _ => log::warn!("Ignoring session event received before setup completed"),
        }
    }

    pub fn handle_capture_event(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::Started => {
                self.set_state(SessionState::Recording);
                self.update_status("Recording... Capturing audio.");
            }
            CaptureEvent::Failed(e) => {
                self.halt_capture();
                self.update_error(format!("Error starting recording: {}", e));
            }
            CaptureEvent::Frame(frame) => self.handle_frame(frame),
            CaptureEvent::Ended => {
                self.halt_capture();
                self.update_error("Microphone stream ended unexpectedly.");
            }
        }
    }

    pub fn handle_frame(&mut self, frame: AudioFrame) {
        let sent = self.pipeline.forward(&frame, self.session.as_deref());
        if let Err(e) = sent {
            log::error!("Error sending audio frame: {}", e);
            self.halt_capture();
            self.update_error("Error sending audio data. Session might be closed.");
        }
    }

    pub fn handle_playback_finished(&mut self, handle: PlaybackHandle) {
        if self.scheduler.finished(handle) {
            log::debug!(
                "Playback of {:?} finished, {} in flight",
                handle,
                self.scheduler.in_flight()
            );
        }
    }

    pub fn handle_command(&mut self, command: ControlCommand) {
        log::info!("Control command: {:?}", command);
        let result = match command {
            ControlCommand::Record => self.record(),
            ControlCommand::StopRecording => {
                self.stop_recording();
                Ok(())
            }
            ControlCommand::Reset => self.reset(),
            ControlCommand::Shutdown => {
                self.shutdown();
                Ok(())
            }
        };
        if let Err(e) = result {
            log::debug!("{:?} failed: {}", command, e);
        }
    }

    /// Drive the session until `Shutdown` arrives or every command sender is gone.
    ///
    /// Transport events are always drained ahead of playback completions,
    /// capture events and commands, so an interruption is applied before
    /// any chunk that arrived after it.
    pub async fn run(&mut self, mut commands: mpsc::Receiver<ControlCommand>) {
        loop {
            let wake = self.next_wake(&mut commands).await;
            if !self.dispatch(wake) {
                break;
            }
        }
        self.shutdown();
    }

    async fn next_wake(&mut self, commands: &mut mpsc::Receiver<ControlCommand>) -> Wake {
        tokio::select! {
            biased;
            opened = setup_result(&mut self.pending_open) => Wake::Opened(opened),
            event = next_event(&mut self.events) => Wake::Transport(event),
            Some(handle) = self.finished.recv() => Wake::Finished(handle),
            event = self.pipeline.next_event() => Wake::Capture(event),
            command = commands.recv() => Wake::Command(command),
        }
    }

    /// Apply one wake-up. Returns false once the loop should stop.
    fn dispatch(&mut self, wake: Wake) -> bool {
        match wake {
            Wake::Opened(opened) => self.session_opened(opened),
            Wake::Transport(Some(event)) => self.handle_transport_event(event),
            Wake::Transport(None) if self.state == SessionState::Connecting => {
                self.fail_open(PipelineError::Transport("connection lost during setup".into()));
            }
            Wake::Transport(None) => {
                self.handle_transport_event(TransportEvent::Closed("No reason provided".into()));
            }
            Wake::Finished(handle) => self.handle_playback_finished(handle),
            Wake::Capture(event) => self.handle_capture_event(event),
            Wake::Command(Some(ControlCommand::Shutdown)) | Wake::Command(None) => return false,
            Wake::Command(Some(command)) => self.handle_command(command),
        }
        true
    }

    // ======================== Status ========================

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            log::info!("Session state: {:?} -> {:?}", self.state, state);
            self.state = state;
            self.status.send_modify(|report| report.state = state);
        }
    }

    pub fn update_status(&self, message: impl Into<String>) {
        let message = message.into();
        log::info!("{}", message);
        self.status.send_modify(|report| {
            report.status = Some(message);
            report.error = None;
        });
    }

    pub fn update_error(&self, message: impl Into<String>) {
        let message = message.into();
        log::error!("{}", message);
        self.status.send_modify(|report| {
            report.error = Some(message);
            report.status = None;
        });
    }
}

async fn setup_result(pending: &mut Option<PendingOpen>) -> Result<Box<dyn Session>> {
    match pending {
        Some(open) => match (&mut open.task).await {
            Ok(opened) => opened,
            Err(e) => Err(PipelineError::Transport(format!("session setup task failed: {}", e))),
        },
        None => std::future::pending().await,
    }
}

async fn next_event(events: &mut Option<mpsc::Receiver<TransportEvent>>) -> Option<TransportEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
