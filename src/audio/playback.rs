//! Software mixer feeding one ALSA playback stream.
//!
//! The mixer thread renders one period at a time, summing every voice whose
//! span overlaps the period, and writes it to ALSA. Silence is rendered when
//! nothing is scheduled so the device clock keeps advancing in real time.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc;

use super::alsa_device;
use super::device::{AudioConfig, PlaybackDevice, PlaybackHandle};
use super::speex::Resampler;
use crate::codec::PlayableBuffer;
use crate::error::{PipelineError, Result};

struct Voice {
    handle: PlaybackHandle,
    start_frame: u64,
    channels: Vec<Vec<f32>>,
}

impl Voice {
    fn len(&self) -> u64 {
        self.channels.first().map_or(0, Vec::len) as u64
    }
}

/// State shared between the owner and the mixer thread.
#[derive(Default)]
struct Mixer {
    voices: Mutex<Vec<Voice>>,
    /// Frames rendered so far; the device clock.
    rendered: AtomicU64,
    /// Set while the mixer thread is writing to the device.
    alive: AtomicBool,
    /// Ask the mixer thread to drop what ALSA has buffered.
    discard: AtomicBool,
}

impl Mixer {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn take_discard(&self) -> bool {
        self.discard.swap(false, Ordering::AcqRel)
    }

    fn voices(&self) -> MutexGuard<'_, Vec<Voice>> {
        // a panic while holding the lock leaves plain data behind; keep going
        self.voices.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Render the next period into `mix` (interleaved, `channels` wide).
    /// Returns handles of voices that reached their end inside this period.
    fn render(&self, mix: &mut [f32], channels: usize) -> Vec<PlaybackHandle> {
        mix.fill(0.0);
        let mut voices = self.voices();
        let frames = (mix.len() / channels) as u64;
        let base = self.rendered.load(Ordering::Acquire);
        let period_end = base + frames;
        let mut finished = Vec::new();

        voices.retain(|voice| {
            let end = voice.start_frame + voice.len();
            let from = voice.start_frame.max(base);
            let to = end.min(period_end);
            for t in from..to {
                let src = (t - voice.start_frame) as usize;
                let dst = (t - base) as usize * channels;
                for c in 0..channels {
                    let channel = &voice.channels[c % voice.channels.len()];
                    mix[dst + c] += channel[src];
                }
            }
            if end <= period_end {
                finished.push(voice.handle);
                false
            } else {
                true
            }
        });

        // clock and voice list move together under the lock
        self.rendered.store(period_end, Ordering::Release);
        finished
    }
}

/// Marks the mixer alive for as long as it is held, whichever way the thread exits.
struct AliveGuard<'a>(&'a AtomicBool);

impl<'a> AliveGuard<'a> {
    fn arm(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for AliveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct AlsaPlayback {
    mixer: Arc<Mixer>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    sample_rate: u32,
    next_handle: u64,
    resampler: Option<Resampler>,
}

impl AlsaPlayback {
    /// Open the playback device and start the mixer thread.
    ///
    /// Naturally finished buffers are reported on `finished`.
    pub fn start(
        config: &AudioConfig,
        finished: mpsc::UnboundedSender<PlaybackHandle>,
    ) -> Result<Self> {
        let mixer = Arc::new(Mixer::default());
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel(1);

        let handle = {
            let mixer = mixer.clone();
            let running = running.clone();
            let config = config.clone();
            thread::Builder::new()
                .name("audio-play".into())
                .spawn(move || play_thread(&config, &mixer, &running, finished, ready_tx))
                .map_err(|e| {
                    PipelineError::DeviceAccess(format!("failed to spawn playback thread: {}", e))
                })?
        };

        let (sample_rate, channels) = match ready_rx.recv() {
            Ok(Ok(params)) => params,
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(PipelineError::DeviceAccess(
                    "playback thread exited before the device was ready".into(),
                ));
            }
        };
        log::debug!("Playback device ready: {}Hz, {}ch", sample_rate, channels);

        Ok(Self {
            mixer,
            running,
            handle: Some(handle),
            sample_rate,
            next_handle: 0,
            resampler: None,
        })
    }

    fn to_device_rate(&mut self, buffer: PlayableBuffer) -> Result<Vec<Vec<f32>>> {
        if buffer.sample_rate == self.sample_rate {
            return Ok(buffer.channels);
        }
        let channel_count = buffer.channel_count() as u32;
        let reuse = self
            .resampler
            .as_ref()
            .is_some_and(|r| r.matches(channel_count, buffer.sample_rate, self.sample_rate));
        if !reuse {
            self.resampler = Some(Resampler::new(
                channel_count,
                buffer.sample_rate,
                self.sample_rate,
            )?);
        }
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(buffer.channels);
        };
        buffer
            .channels
            .iter()
            .enumerate()
            .map(|(ch, samples)| resampler.process(ch as u32, samples))
            .collect()
    }

    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl PlaybackDevice for AlsaPlayback {
    fn now(&self) -> f64 {
        self.mixer.rendered.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    fn schedule(&mut self, buffer: PlayableBuffer, start_at: f64) -> Result<PlaybackHandle> {
        if !self.mixer.is_alive() {
            return Err(PipelineError::DeviceAccess("playback device stopped".into()));
        }
        let channels = self.to_device_rate(buffer)?;
        if channels.first().is_none_or(Vec::is_empty) {
            return Err(PipelineError::Codec("buffer is empty after resampling".into()));
        }

        self.next_handle += 1;
        let handle = PlaybackHandle(self.next_handle);
        let requested = (start_at.max(0.0) * self.sample_rate as f64).round() as u64;

        let mut voices = self.mixer.voices();
        // the period being rendered is already gone; never start inside it
        let start_frame = requested.max(self.mixer.rendered.load(Ordering::Acquire));
        voices.push(Voice {
            handle,
            start_frame,
            channels,
        });
        Ok(handle)
    }

    fn stop(&mut self, handle: PlaybackHandle) {
        self.mixer.voices().retain(|v| v.handle != handle);
    }

    fn discard_queued(&mut self) {
        self.mixer.discard.store(true, Ordering::Release);
    }

    fn flush(&mut self) {
        self.mixer.discard.store(true, Ordering::Release);
        self.mixer.voices().clear();
        if let Some(r) = self.resampler.as_mut() {
            r.reset();
        }
    }
}

impl Drop for AlsaPlayback {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn play_thread(
    config: &AudioConfig,
    mixer: &Mixer,
    running: &AtomicBool,
    finished: mpsc::UnboundedSender<PlaybackHandle>,
    ready: std::sync::mpsc::SyncSender<Result<(u32, u32)>>,
) {
    let period_size_opt = if config.playback_period_size > 0 {
        Some(config.playback_period_size)
    } else {
        None
    };
    let (pcm, params) = match alsa_device::open_playback(
        &config.playback_device,
        config.playback_sample_rate,
        config.playback_channels,
        period_size_opt,
    ) {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let io = match pcm.io_i16() {
        Ok(io) => io,
        Err(e) => {
            let _ = ready.send(Err(PipelineError::DeviceAccess(format!(
                "playback I/O unavailable: {}",
                e
            ))));
            return;
        }
    };

    let _alive = AliveGuard::arm(&mixer.alive);
    let channels = params.channels.max(1) as usize;
    if ready.send(Ok((params.sample_rate, params.channels.max(1)))).is_err() {
        return;
    }

    log::info!(
        "Playback started: rate={}, ch={}, period={}",
        params.sample_rate,
        channels,
        params.period_size,
    );

    let mut mix = vec![0.0f32; params.period_size.max(1) * channels];
    let mut out = vec![0i16; mix.len()];

    while running.load(Ordering::Relaxed) {
        if mixer.take_discard() {
            if let Err(e) = pcm.drop() {
                log::warn!("Failed to drop queued playback: {}", e);
            }
            if let Err(e) = pcm.prepare() {
                log::error!("Failed to restart PCM playback: {}", e);
                return;
            }
        }

        for handle in mixer.render(&mut mix, channels) {
            if finished.send(handle).is_err() {
                log::debug!("Completion receiver dropped");
            }
        }
        for (dst, src) in out.iter_mut().zip(&mix) {
            *dst = (src.clamp(-1.0, 1.0) * 32767.0) as i16;
        }

        // Write with retry to handle short writes and XRUN recovery.
        let total_frames = out.len() / channels;
        let mut frames_written = 0;
        let mut retry_count = 0u32;
        while frames_written < total_frames {
            match io.writei(&out[frames_written * channels..]) {
                Ok(n) => {
                    frames_written += n;
                    retry_count = 0;
                }
                Err(e) => {
                    log::warn!("ALSA XRUN or error: {}, recovering...", e);
                    retry_count += 1;
                    if let Err(e2) = pcm.prepare() {
                        log::error!("Failed to recover PCM playback: {}", e2);
                        return;
                    }
                    if retry_count >= 3 {
                        log::error!(
                            "Max recovery retries ({}) reached. Dropping {} unwritten frames.",
                            retry_count,
                            total_frames - frames_written
                        );
                        break;
                    }
                }
            }
        }
    }

    log::info!("Playback stopped");
}
