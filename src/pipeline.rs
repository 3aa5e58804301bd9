//! Microphone capture → wire frames.

use tokio::sync::mpsc;

use crate::audio::{CaptureDevice, CaptureReady};
use crate::codec::{self, AudioFrame};
use crate::error::{PipelineError, Result};
use crate::transport::Session;

/// Frames buffered between the capture thread and the controller loop.
const FRAME_QUEUE: usize = 32;

#[derive(Debug)]
pub enum CaptureEvent {
    /// The device opened; frames follow.
    Started,
    /// The device could not be opened. The pipeline is stopped again.
    Failed(PipelineError),
    Frame(AudioFrame),
    /// The device went away on its own.
    Ended,
}

pub struct CapturePipeline {
    device: Box<dyn CaptureDevice>,
    block_size: usize,
    sample_rate: u32,
    opening: Option<CaptureReady>,
    frames: Option<mpsc::Receiver<AudioFrame>>,
    recording: bool,
}

impl CapturePipeline {
    pub fn new(device: Box<dyn CaptureDevice>, block_size: usize, sample_rate: u32) -> Self {
        Self {
            device,
            block_size,
            sample_rate,
            opening: None,
            frames: None,
            recording: false,
        }
    }

    /// Begin acquiring the microphone. The outcome arrives from `next_event`
    /// as `Started` or `Failed`.
    pub fn start(&mut self) -> Result<()> {
        if self.recording || self.opening.is_some() {
            return Ok(());
        }

        let (tx, rx) = mpsc::channel(FRAME_QUEUE);
        match self.device.acquire(self.block_size, self.sample_rate, tx) {
            Ok(ready) => {
                self.opening = Some(ready);
                self.frames = Some(rx);
                Ok(())
            }
            Err(e) => {
                self.device.release();
                Err(e)
            }
        }
    }

    /// Next thing the capture side has to report. Never resolves while stopped.
    ///
    /// Cancel safe: dropping the future leaves any pending open or frame in place.
    pub async fn next_event(&mut self) -> CaptureEvent {
        if let Some(ready) = self.opening.as_mut() {
            let opened = ready.await.unwrap_or_else(|_| {
                Err(PipelineError::DeviceAccess(
                    "capture thread exited before the device was ready".into(),
                ))
            });
            self.opening = None;
            return match opened {
                Ok(()) => {
                    self.recording = true;
                    log::info!(
                        "Capture started: {} samples @ {} Hz per frame",
                        self.block_size,
                        self.sample_rate
                    );
                    CaptureEvent::Started
                }
                Err(e) => {
                    self.stop();
                    CaptureEvent::Failed(e)
                }
            };
        }

        match self.frames.as_mut() {
            Some(rx) => match rx.recv().await {
                Some(frame) => CaptureEvent::Frame(frame),
                None => {
                    self.frames = None;
                    CaptureEvent::Ended
                }
            },
            None => std::future::pending().await,
        }
    }

    /// Encode and send one frame. Frames arriving after stop or without a
    /// session are dropped.
    pub fn forward(&self, frame: &AudioFrame, session: Option<&dyn Session>) -> Result<()> {
        if !self.recording {
            return Ok(());
        }
        let Some(session) = session else {
            log::debug!("No session, dropping captured frame");
            return Ok(());
        };
        let blob = codec::encode(&frame.samples, frame.sample_rate);
        session.send(&blob)
    }

    pub fn stop(&mut self) {
        // stop accepting frames before the device thread is joined
        self.opening = None;
        self.frames = None;
        if self.recording {
            self.recording = false;
            log::info!("Capture stopped");
        }
        self.device.release();
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn is_starting(&self) -> bool {
        self.opening.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::mime_for_rate;
    use crate::testing::{FakeCapture, FakeTransport};
    use crate::transport::Transport;
    use std::time::Duration;

    fn pipeline() -> (CapturePipeline, FakeCapture) {
        let device = FakeCapture::new();
        (CapturePipeline::new(Box::new(device.clone()), 1024, 16000), device)
    }

    async fn started(pipeline: &mut CapturePipeline) {
        pipeline.start().unwrap();
        match pipeline.next_event().await {
            CaptureEvent::Started => {}
            other => panic!("expected Started, got {:?}", other),
        }
    }

    async fn next_frame(pipeline: &mut CapturePipeline) -> AudioFrame {
        match pipeline.next_event().await {
            CaptureEvent::Frame(frame) => frame,
            other => panic!("expected a frame, got {:?}", other),
        }
    }

    async fn session(transport: &FakeTransport) -> Box<dyn Session> {
        let (tx, _rx) = mpsc::channel(4);
        match transport.open("persona", tx).await {
            Ok(session) => session,
            Err(e) => panic!("open failed: {}", e),
        }
    }

    #[tokio::test]
    async fn test_start_acquires_once() {
        let (mut pipeline, device) = pipeline();
        started(&mut pipeline).await;
        pipeline.start().unwrap();
        assert!(pipeline.is_recording());
        assert_eq!(device.acquires(), 1);
        assert_eq!(device.block_size(), 1024);
    }

    #[tokio::test]
    async fn test_start_does_not_wait_for_device() {
        let (mut pipeline, device) = pipeline();
        device.hold_open();
        pipeline.start().unwrap();
        assert!(pipeline.is_starting());
        assert!(!pipeline.is_recording());

        let waited = tokio::time::timeout(Duration::from_millis(20), pipeline.next_event()).await;
        assert!(waited.is_err());
        assert!(pipeline.is_starting());

        device.finish_open();
        assert!(matches!(pipeline.next_event().await, CaptureEvent::Started));
        assert!(pipeline.is_recording());
    }

    #[tokio::test]
    async fn test_denied_device_leaves_pipeline_stopped() {
        let (mut pipeline, device) = pipeline();
        device.deny_access();
        pipeline.start().unwrap();
        match pipeline.next_event().await {
            CaptureEvent::Failed(PipelineError::DeviceAccess(_)) => {}
            other => panic!("expected DeviceAccess failure, got {:?}", other),
        }
        assert!(!pipeline.is_recording());
        assert!(!pipeline.is_starting());
        assert_eq!(device.releases(), 1);
    }

    #[tokio::test]
    async fn test_frames_forwarded_in_capture_order() {
        let (mut pipeline, device) = pipeline();
        let transport = FakeTransport::new();
        let session = session(&transport).await;
        started(&mut pipeline).await;

        for value in [0.1f32, 0.2, 0.3] {
            assert!(device.push(vec![value; 1024]));
        }
        for _ in 0..3 {
            let frame = next_frame(&mut pipeline).await;
            pipeline.forward(&frame, Some(session.as_ref())).unwrap();
        }

        let sent = transport.sent();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|b| b.mime_type == mime_for_rate(16000)));
        let first = codec::decode(&sent[0].data).unwrap();
        assert_eq!(first.len(), 2048);
        assert_eq!(i16::from_le_bytes([first[0], first[1]]), 3276);
        let last = codec::decode(&sent[2].data).unwrap();
        assert_eq!(i16::from_le_bytes([last[0], last[1]]), 9830);
    }

    #[tokio::test]
    async fn test_frame_without_session_is_dropped() {
        let (mut pipeline, _device) = pipeline();
        started(&mut pipeline).await;
        let frame = AudioFrame::new(vec![0.0; 1024], 16000);
        assert!(pipeline.forward(&frame, None).is_ok());
    }

    #[tokio::test]
    async fn test_send_error_reaches_caller() {
        let (mut pipeline, _device) = pipeline();
        let transport = FakeTransport::new();
        let session = session(&transport).await;
        transport.fail_send(true);
        started(&mut pipeline).await;

        let frame = AudioFrame::new(vec![0.0; 1024], 16000);
        let err = pipeline.forward(&frame, Some(session.as_ref())).unwrap_err();
        assert!(matches!(err, PipelineError::Transport(_)));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_drops_late_frames() {
        let (mut pipeline, device) = pipeline();
        pipeline.stop();
        started(&mut pipeline).await;
        pipeline.stop();
        pipeline.stop();

        assert!(!pipeline.is_recording());
        assert!(!device.is_acquired());
        assert!(!device.push(vec![0.0; 1024]));

        let transport = FakeTransport::new();
        let session = session(&transport).await;
        let frame = AudioFrame::new(vec![0.5; 1024], 16000);
        pipeline.forward(&frame, Some(session.as_ref())).unwrap();
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_stop_while_opening_abandons_start() {
        let (mut pipeline, device) = pipeline();
        device.hold_open();
        pipeline.start().unwrap();
        pipeline.stop();

        assert!(!pipeline.is_starting());
        let waited = tokio::time::timeout(Duration::from_millis(20), pipeline.next_event()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_next_event_pending_while_stopped() {
        let (mut pipeline, _device) = pipeline();
        let waited = tokio::time::timeout(Duration::from_millis(20), pipeline.next_event()).await;
        assert!(waited.is_err());
    }
}
