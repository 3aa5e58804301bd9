//! Device seams between the pipeline and the audio hardware.

use tokio::sync::{mpsc, oneshot};

use crate::codec::{AudioFrame, PlayableBuffer};
use crate::error::Result;

/// Audio device configuration.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// ALSA capture device name (e.g. "default", "plughw:0,0")
    pub capture_device: String,
    /// ALSA playback device name
    pub playback_device: String,
    /// Rate of outbound frames sent to the session (16000)
    pub input_sample_rate: u32,
    /// Rate of inbound chunks received from the session (24000)
    pub output_sample_rate: u32,
    /// Samples per outbound frame
    pub block_size: usize,
    /// Desired ALSA channel count for capture
    pub capture_channels: u32,
    /// Desired ALSA playback sample rate
    pub playback_sample_rate: u32,
    /// Desired ALSA playback channel count
    pub playback_channels: u32,
    /// Desired ALSA playback period size (0 = let ALSA decide)
    pub playback_period_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_device: "default".to_string(),
            playback_device: "default".to_string(),
            input_sample_rate: 16000,
            output_sample_rate: 24000,
            block_size: 1024,
            capture_channels: 1,
            playback_sample_rate: 24000,
            playback_channels: 2,
            playback_period_size: 512,
        }
    }
}

/// Identifies one buffer handed to a playback device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaybackHandle(pub u64);

/// Resolves once the capture device is open, or with the reason it is not.
pub type CaptureReady = oneshot::Receiver<Result<()>>;

/// Microphone source.
///
/// Blocks are pushed into `frames` in capture order, each exactly
/// `block_size` samples long, until `release` is called or the receiver is
/// dropped.
pub trait CaptureDevice: Send {
    /// Begin opening the device without waiting for it.
    fn acquire(
        &mut self,
        block_size: usize,
        sample_rate: u32,
        frames: mpsc::Sender<AudioFrame>,
    ) -> Result<CaptureReady>;

    /// Stop delivery and free the hardware. Must be safe to call repeatedly.
    fn release(&mut self);
}

/// Speaker sink with a monotonic clock and start-time scheduling.
///
/// Buffers that play to the end are reported on the completion channel the
/// device was built with; stopped buffers are not.
pub trait PlaybackDevice: Send {
    /// Current device time in seconds.
    fn now(&self) -> f64;

    fn schedule(&mut self, buffer: PlayableBuffer, start_at: f64) -> Result<PlaybackHandle>;

    /// Halt a buffer immediately. Unknown handles are ignored.
    fn stop(&mut self, handle: PlaybackHandle);

    /// Drop audio already handed to the hardware but not yet heard.
    fn discard_queued(&mut self);

    /// Drop every voice and any per-stream state (resampler history).
    fn flush(&mut self);
}
