//! ALSA microphone capture on a dedicated OS thread.
//!
//! capture thread: ALSA read → mono mixdown → resample → fixed-size blocks → `frames`

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use tokio::sync::{mpsc, oneshot};

use super::alsa_device;
use super::device::{AudioConfig, CaptureDevice, CaptureReady};
use super::speex::Resampler;
use crate::codec::AudioFrame;
use crate::error::{PipelineError, Result};

pub struct AlsaCapture {
    config: AudioConfig,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AlsaCapture {
    pub fn new(config: AudioConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }
}

impl CaptureDevice for AlsaCapture {
    fn acquire(
        &mut self,
        block_size: usize,
        sample_rate: u32,
        frames: mpsc::Sender<AudioFrame>,
    ) -> Result<CaptureReady> {
        self.release();

        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = oneshot::channel();
        let handle = {
            let running = running.clone();
            let config = self.config.clone();
            thread::Builder::new()
                .name("audio-capture".into())
                .spawn(move || {
                    capture_thread(&config, block_size, sample_rate, frames, &running, ready_tx)
                })
                .map_err(|e| {
                    PipelineError::DeviceAccess(format!("failed to spawn capture thread: {}", e))
                })?
        };

        // a thread that failed to open exits by itself; release() joins it either way
        self.running = running;
        self.handle = Some(handle);
        Ok(ready_rx)
    }

    fn release(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
            log::info!("Capture device released");
        }
    }
}

impl Drop for AlsaCapture {
    fn drop(&mut self) {
        self.release();
    }
}

fn capture_thread(
    config: &AudioConfig,
    block_size: usize,
    sample_rate: u32,
    frames: mpsc::Sender<AudioFrame>,
    running: &AtomicBool,
    ready: oneshot::Sender<Result<()>>,
) {
    let (pcm, params) = match alsa_device::open_capture(
        &config.capture_device,
        sample_rate,
        config.capture_channels,
    ) {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let actual_rate = params.sample_rate;
    let actual_channels = params.channels.max(1) as usize;

    let mut resampler = if actual_rate != sample_rate {
        match Resampler::new(1, actual_rate, sample_rate) {
            Ok(r) => Some(r),
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        }
    } else {
        None
    };

    let io = match pcm.io_i16() {
        Ok(io) => io,
        Err(e) => {
            let _ = ready.send(Err(PipelineError::DeviceAccess(format!(
                "capture I/O unavailable: {}",
                e
            ))));
            return;
        }
    };

    if ready.send(Ok(())).is_err() {
        return;
    }

    log::info!(
        "Capture started: hw_rate={}, hw_ch={}, period={}, block={}@{}Hz",
        actual_rate,
        actual_channels,
        params.period_size,
        block_size,
        sample_rate,
    );

    let mut read_buf = vec![0i16; params.period_size * actual_channels];
    let mut mono: Vec<f32> = Vec::with_capacity(params.period_size);
    let mut accum: Vec<f32> = Vec::with_capacity(block_size * 2);

    while running.load(Ordering::Relaxed) {
        match io.readi(&mut read_buf) {
            Ok(n) => {
                mono.clear();
                mono.extend(
                    read_buf[..n * actual_channels]
                        .chunks_exact(actual_channels)
                        .map(mixdown),
                );

                match resampler.as_mut() {
                    Some(r) => match r.process(0, &mono) {
                        Ok(resampled) => accum.extend_from_slice(&resampled),
                        Err(e) => log::error!("Capture resample error: {}", e),
                    },
                    None => accum.extend_from_slice(&mono),
                }

                while accum.len() >= block_size {
                    let block: Vec<f32> = accum.drain(..block_size).collect();
                    if frames
                        .blocking_send(AudioFrame::new(block, sample_rate))
                        .is_err()
                    {
                        log::debug!("Frame receiver dropped, ending capture");
                        return;
                    }
                }
            }
            Err(e) => {
                log::warn!("ALSA capture error: {}, recovering...", e);
                if let Err(e2) = pcm.prepare() {
                    log::error!("Failed to recover PCM capture: {}", e2);
                    break;
                }
            }
        }
    }

    log::info!("Capture stopped");
}

/// Average one interleaved frame down to a normalized mono sample.
fn mixdown(frame: &[i16]) -> f32 {
    let sum: i32 = frame.iter().map(|&s| s as i32).sum();
    sum as f32 / frame.len() as f32 / 32768.0
}
