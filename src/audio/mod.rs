//! audio - Audio capture, playback and device plumbing
//!
//! Uses ALSA for audio I/O on dedicated OS threads (NOT tokio tasks) and
//! SpeexDSP for resampling between hardware and stream rates.

mod alsa_device;
mod capture;
mod device;
mod playback;
mod speex;

pub use capture::AlsaCapture;
pub use device::{AudioConfig, CaptureDevice, CaptureReady, PlaybackDevice, PlaybackHandle};
pub use playback::AlsaPlayback;
