//! Bidirectional streaming session seam.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::codec::{InboundChunk, WireBlob};
use crate::error::Result;

/// Everything a session reports back to the controller, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened,
    InboundChunk(InboundChunk),
    /// Remote side started a new utterance; queued output must be discarded.
    Interrupted,
    Error(String),
    Closed(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a session configured with `persona`. Events for this session,
    /// starting with `Opened`, are delivered on `events`.
    async fn open(
        &self,
        persona: &str,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Box<dyn Session>>;
}

pub trait Session: Send {
    /// Queue an outbound frame without waiting for the network.
    fn send(&self, blob: &WireBlob) -> Result<()>;

    fn close(&mut self);
}
