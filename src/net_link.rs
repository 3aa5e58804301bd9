use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use crate::codec::WireBlob;
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::transport::{Session, Transport, TransportEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outbound frames queued per session before `send` starts failing.
const OUTBOUND_QUEUE: usize = 256;

#[derive(Debug)]
pub enum NetCommand {
    SendAudio(WireBlob),
    Close,
}

/// WebSocket client for a Live bidirectional audio session.
#[derive(Debug, Clone)]
pub struct LiveTransport {
    ws_url: String,
    api_key: Option<String>,
    model: String,
    voice_name: String,
    language_code: String,
}

impl LiveTransport {
    pub fn new(config: &Config) -> Self {
        Self {
            ws_url: config.ws_url.to_string(),
            api_key: config.api_key(),
            model: config.model.to_string(),
            voice_name: config.voice_name.to_string(),
            language_code: config.language_code.to_string(),
        }
    }

    fn session_url(&self) -> Result<Url> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            PipelineError::Transport(
                "API key is missing. Please set the API key environment variable.".into(),
            )
        })?;
        let mut url = Url::parse(&self.ws_url)
            .map_err(|e| PipelineError::Transport(format!("invalid url {}: {}", self.ws_url, e)))?;
        url.query_pairs_mut().append_pair("key", api_key);
        Ok(url)
    }
}

#[async_trait]
impl Transport for LiveTransport {
    async fn open(
        &self,
        persona: &str,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Box<dyn Session>> {
        let url = self.session_url()?;

        log::info!("Connecting to {}...", self.ws_url);
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        log::info!("WebSocket connected, sending setup for {}", self.model);

        let (mut write, read) = ws_stream.split();

        let setup = ClientMessage::setup(&self.model, &self.voice_name, &self.language_code, persona);
        let setup_json = serde_json::to_string(&setup)
            .map_err(|e| PipelineError::Transport(format!("setup serialization: {}", e)))?;
        write.send(Message::Text(setup_json.into())).await?;

        let (tx_cmd, rx_cmd) = mpsc::channel(OUTBOUND_QUEUE);
        tokio::spawn(NetLink { write, read, events, rx_cmd }.run());

        Ok(Box::new(LiveSession { tx_cmd }))
    }
}

pub struct LiveSession {
    tx_cmd: mpsc::Sender<NetCommand>,
}

impl Session for LiveSession {
    fn send(&self, blob: &WireBlob) -> Result<()> {
        self.tx_cmd
            .try_send(NetCommand::SendAudio(blob.clone()))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    PipelineError::Transport("outbound audio queue is full".into())
                }
                mpsc::error::TrySendError::Closed(_) => {
                    PipelineError::Transport("session is closed".into())
                }
            })
    }

    fn close(&mut self) {
        // the link also closes once every sender is gone
        let _ = self.tx_cmd.try_send(NetCommand::Close);
    }
}

/// Owns the socket for one session; lives until the socket or the session ends.
struct NetLink {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
    events: mpsc::Sender<TransportEvent>,
    rx_cmd: mpsc::Receiver<NetCommand>,
}

impl NetLink {
    async fn run(mut self) {
        let reason = match self.pump().await {
            Ok(reason) => reason,
            Err(e) => {
                log::error!("Session link error: {}", e);
                let _ = self.events.send(TransportEvent::Error(e.to_string())).await;
                e.to_string()
            }
        };
        log::info!("Session link closed: {}", reason);
        let _ = self.events.send(TransportEvent::Closed(reason)).await;
    }

    /// Returns the close reason on an orderly shutdown.
    async fn pump(&mut self) -> Result<String> {
        loop {
            tokio::select! {
                msg = self.read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if !self.dispatch(text.as_bytes()).await {
                                return Ok("controller went away".into());
                            }
                        }
                        Some(Ok(Message::Binary(data))) => {
                            if !self.dispatch(&data).await {
                                return Ok("controller went away".into());
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let reason = frame
                                .map(|f| f.reason.as_str().to_string())
                                .filter(|r| !r.is_empty())
                                .unwrap_or_else(|| "No reason provided".to_string());
                            return Ok(reason);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok("connection closed".into()),
                    }
                }
                cmd = self.rx_cmd.recv() => {
                    match cmd {
                        Some(NetCommand::SendAudio(blob)) => {
                            let json = serde_json::to_string(&ClientMessage::audio(blob))
                                .map_err(|e| PipelineError::Transport(e.to_string()))?;
                            self.write.send(Message::Text(json.into())).await?;
                        }
                        Some(NetCommand::Close) | None => {
                            let _ = self.write.send(Message::Close(None)).await;
                            return Ok("closed by client".into());
                        }
                    }
                }
            }
        }
    }

    /// Forward one server message. Returns false once nobody listens anymore.
    async fn dispatch(&self, payload: &[u8]) -> bool {
        let msg: ServerMessage = match serde_json::from_slice(payload) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("Ignoring unparseable server message: {}", e);
                return true;
            }
        };
        for event in msg.into_events() {
            if self.events.send(event).await.is_err() {
                return false;
            }
        }
        true
    }
}
