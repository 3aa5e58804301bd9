//! In-memory devices and transport for unit tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::audio::{CaptureDevice, CaptureReady, PlaybackDevice, PlaybackHandle};
use crate::codec::{AudioFrame, PlayableBuffer, WireBlob};
use crate::error::{PipelineError, Result};
use crate::transport::{Session, Transport, TransportEvent};

// ======================== Capture ========================

#[derive(Default)]
struct CaptureState {
    frames: Option<mpsc::Sender<AudioFrame>>,
    deny: bool,
    hold: bool,
    ready: Option<oneshot::Sender<Result<()>>>,
    acquires: usize,
    releases: usize,
    block_size: usize,
}

/// Microphone whose frames are pushed by the test.
#[derive(Clone, Default)]
pub struct FakeCapture {
    state: Arc<Mutex<CaptureState>>,
}

impl FakeCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny_access(&self) {
        self.state.lock().unwrap().deny = true;
    }

    /// Leave the device opening until `finish_open` is called.
    pub fn hold_open(&self) {
        self.state.lock().unwrap().hold = true;
    }

    pub fn finish_open(&self) {
        if let Some(ready) = self.state.lock().unwrap().ready.take() {
            let _ = ready.send(Ok(()));
        }
    }

    pub fn push(&self, samples: Vec<f32>) -> bool {
        let state = self.state.lock().unwrap();
        match &state.frames {
            Some(tx) => tx.try_send(AudioFrame::new(samples, 16000)).is_ok(),
            None => false,
        }
    }

    pub fn is_acquired(&self) -> bool {
        self.state.lock().unwrap().frames.is_some()
    }

    pub fn acquires(&self) -> usize {
        self.state.lock().unwrap().acquires
    }

    pub fn releases(&self) -> usize {
        self.state.lock().unwrap().releases
    }

    pub fn block_size(&self) -> usize {
        self.state.lock().unwrap().block_size
    }
}

impl CaptureDevice for FakeCapture {
    fn acquire(
        &mut self,
        block_size: usize,
        _sample_rate: u32,
        frames: mpsc::Sender<AudioFrame>,
    ) -> Result<CaptureReady> {
        let mut state = self.state.lock().unwrap();
        let (ready_tx, ready_rx) = oneshot::channel();
        if state.deny {
            let _ = ready_tx.send(Err(PipelineError::DeviceAccess("permission denied".into())));
            return Ok(ready_rx);
        }
        state.acquires += 1;
        state.block_size = block_size;
        state.frames = Some(frames);
        if state.hold {
            state.ready = Some(ready_tx);
        } else {
            let _ = ready_tx.send(Ok(()));
        }
        Ok(ready_rx)
    }

    fn release(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.frames = None;
        state.ready = None;
        state.releases += 1;
    }
}

// ======================== Playback ========================

#[derive(Default)]
struct PlaybackState {
    time: f64,
    next_handle: u64,
    scheduled: Vec<(PlaybackHandle, f64, f64)>,
    stopped: Vec<PlaybackHandle>,
    discards: usize,
    flushes: usize,
    fail_next: bool,
    completions: Option<mpsc::UnboundedSender<PlaybackHandle>>,
}

/// Speaker with a manually driven clock.
#[derive(Clone, Default)]
pub struct FakePlayback {
    state: Arc<Mutex<PlaybackState>>,
}

impl FakePlayback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_completions(completions: mpsc::UnboundedSender<PlaybackHandle>) -> Self {
        let device = Self::default();
        device.state.lock().unwrap().completions = Some(completions);
        device
    }

    pub fn set_time(&self, time: f64) {
        self.state.lock().unwrap().time = time;
    }

    pub fn advance(&self, seconds: f64) {
        self.state.lock().unwrap().time += seconds;
    }

    pub fn fail_next_schedule(&self) {
        self.state.lock().unwrap().fail_next = true;
    }

    /// `(handle, start_at, duration)` in scheduling order.
    pub fn scheduled(&self) -> Vec<(PlaybackHandle, f64, f64)> {
        self.state.lock().unwrap().scheduled.clone()
    }

    pub fn stopped(&self) -> Vec<PlaybackHandle> {
        self.state.lock().unwrap().stopped.clone()
    }

    pub fn discards(&self) -> usize {
        self.state.lock().unwrap().discards
    }

    pub fn flushes(&self) -> usize {
        self.state.lock().unwrap().flushes
    }

    /// Report a natural completion the way a real device would.
    pub fn complete(&self, handle: PlaybackHandle) {
        let state = self.state.lock().unwrap();
        if let Some(tx) = &state.completions {
            let _ = tx.send(handle);
        }
    }
}

impl PlaybackDevice for FakePlayback {
    fn now(&self) -> f64 {
        self.state.lock().unwrap().time
    }

    fn schedule(&mut self, buffer: PlayableBuffer, start_at: f64) -> Result<PlaybackHandle> {
        let mut state = self.state.lock().unwrap();
        if std::mem::take(&mut state.fail_next) {
            return Err(PipelineError::DeviceAccess("device unplugged".into()));
        }
        state.next_handle += 1;
        let handle = PlaybackHandle(state.next_handle);
        state.scheduled.push((handle, start_at, buffer.duration()));
        Ok(handle)
    }

    fn stop(&mut self, handle: PlaybackHandle) {
        self.state.lock().unwrap().stopped.push(handle);
    }

    fn discard_queued(&mut self) {
        self.state.lock().unwrap().discards += 1;
    }

    fn flush(&mut self) {
        self.state.lock().unwrap().flushes += 1;
    }
}

// ======================== Transport ========================

struct TransportState {
    open_error: Option<String>,
    hang_open: bool,
    first_event: Option<TransportEvent>,
    events: Option<mpsc::Sender<TransportEvent>>,
    personas: Vec<String>,
    sent: Vec<WireBlob>,
    fail_send: bool,
    closes: usize,
}

impl Default for TransportState {
    fn default() -> Self {
        Self {
            open_error: None,
            hang_open: false,
            first_event: Some(TransportEvent::Opened),
            events: None,
            personas: Vec::new(),
            sent: Vec::new(),
            fail_send: false,
            closes: 0,
        }
    }
}

/// Transport that opens instantly and records everything sent.
#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<TransportState>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_open(&self, message: &str) {
        self.state.lock().unwrap().open_error = Some(message.to_string());
    }

    /// Make `open` never complete, like a server that never answers the handshake.
    pub fn hang_open(&self) {
        self.state.lock().unwrap().hang_open = true;
    }

    /// Event delivered right after `open` instead of `Opened`.
    pub fn answer_open_with(&self, event: Option<TransportEvent>) {
        self.state.lock().unwrap().first_event = event;
    }

    pub fn fail_send(&self, fail: bool) {
        self.state.lock().unwrap().fail_send = fail;
    }

    /// Push an event into the most recently opened session.
    pub fn emit(&self, event: TransportEvent) -> bool {
        let state = self.state.lock().unwrap();
        match &state.events {
            Some(tx) => tx.try_send(event).is_ok(),
            None => false,
        }
    }

    pub fn opens(&self) -> usize {
        self.state.lock().unwrap().personas.len()
    }

    pub fn personas(&self) -> Vec<String> {
        self.state.lock().unwrap().personas.clone()
    }

    pub fn sent(&self) -> Vec<WireBlob> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(
        &self,
        persona: &str,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Box<dyn Session>> {
        let hang = self.state.lock().unwrap().hang_open;
        if hang {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock().unwrap();
        if let Some(message) = &state.open_error {
            return Err(PipelineError::Transport(message.clone()));
        }
        state.personas.push(persona.to_string());
        if let Some(event) = state.first_event.clone() {
            let _ = events.try_send(event);
        }
        state.events = Some(events);
        Ok(Box::new(FakeSession {
            state: self.state.clone(),
        }))
    }
}

pub struct FakeSession {
    state: Arc<Mutex<TransportState>>,
}

impl Session for FakeSession {
    fn send(&self, blob: &WireBlob) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_send {
            return Err(PipelineError::Transport("socket closed".into()));
        }
        state.sent.push(blob.clone());
        Ok(())
    }

    fn close(&mut self) {
        self.state.lock().unwrap().closes += 1;
    }
}
