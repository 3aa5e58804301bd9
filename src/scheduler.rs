//! Gapless playback scheduling.
//!
//! Keeps a single forward cursor ("next free slot" on the device clock) and
//! places each decoded chunk at `max(cursor, now)`, so consecutive chunks
//! join without gaps or overlaps while a stalled stream catches up to the
//! device clock instead of being scheduled in the past.
//!
//! Every scheduled buffer is tracked until it finishes or is stopped;
//! an interruption stops them all and drops the backlog.

use std::collections::HashMap;

use crate::audio::{PlaybackDevice, PlaybackHandle};
use crate::codec::{self, InboundChunk, PlayableBuffer};
use crate::error::Result;

/// Where one buffer landed on the device timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledBuffer {
    pub handle: PlaybackHandle,
    pub start_at: f64,
    pub duration: f64,
}

impl ScheduledBuffer {
    pub fn end(&self) -> f64 {
        self.start_at + self.duration
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Scheduled,
    Playing,
}

pub struct PlaybackScheduler {
    device: Box<dyn PlaybackDevice>,
    sample_rate: u32,
    channels: usize,
    cursor: f64,
    in_flight: HashMap<PlaybackHandle, ScheduledBuffer>,
}

impl PlaybackScheduler {
    /// `sample_rate`/`channels` describe inbound chunks that carry no rate of their own.
    pub fn new(device: Box<dyn PlaybackDevice>, sample_rate: u32, channels: usize) -> Self {
        let cursor = device.now();
        Self {
            device,
            sample_rate,
            channels,
            cursor,
            in_flight: HashMap::new(),
        }
    }

    /// Decode an inbound chunk and queue it behind everything already scheduled.
    pub fn enqueue(&mut self, chunk: &InboundChunk) -> Result<ScheduledBuffer> {
        let bytes = chunk.decode()?;
        let rate = chunk.sample_rate_or(self.sample_rate);
        let buffer = codec::to_playable_buffer(&bytes, rate, self.channels)?;
        self.schedule(buffer)
    }

    pub fn schedule(&mut self, buffer: PlayableBuffer) -> Result<ScheduledBuffer> {
        let start_at = self.cursor.max(self.device.now());
        let duration = buffer.duration();
        let handle = self.device.schedule(buffer, start_at)?;

        let scheduled = ScheduledBuffer {
            handle,
            start_at,
            duration,
        };
        if self.in_flight.insert(handle, scheduled).is_some() {
            log::warn!("Device reused live handle {:?}", handle);
        }
        self.cursor = scheduled.end();

        log::debug!(
            "Scheduled {:?} at {:.3}s for {:.3}s ({} in flight)",
            handle,
            start_at,
            duration,
            self.in_flight.len()
        );
        Ok(scheduled)
    }

    /// A buffer played to its end. Returns false for handles no longer tracked.
    pub fn finished(&mut self, handle: PlaybackHandle) -> bool {
        self.in_flight.remove(&handle).is_some()
    }

    /// Stop everything in flight immediately and drop the backlog.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.in_flight.len();
        if stopped == 0 {
            self.cursor = 0.0;
            return 0;
        }

        let audible = self
            .in_flight
            .keys()
            .filter(|&&handle| self.state_of(handle) == Some(BufferState::Playing))
            .count();
        for (handle, _) in self.in_flight.drain() {
            self.device.stop(handle);
        }
        self.device.discard_queued();
        self.cursor = 0.0;
        log::info!(
            "Playback interrupted, stopped {} buffers ({} playing, {} queued)",
            stopped,
            audible,
            stopped - audible
        );
        stopped
    }

    /// Interrupt and also tear down device-level state.
    pub fn reset(&mut self) {
        self.interrupt();
        self.device.flush();
    }

    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn state_of(&self, handle: PlaybackHandle) -> Option<BufferState> {
        let scheduled = self.in_flight.get(&handle)?;
        if self.device.now() < scheduled.start_at {
            Some(BufferState::Scheduled)
        } else {
            Some(BufferState::Playing)
        }
    }
}
