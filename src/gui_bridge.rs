use crate::config::Config;
use crate::controller::{ControlCommand, StatusReport};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

#[derive(Serialize)]
struct StatusMessage<'a> {
    #[serde(rename = "type")]
    msg_type: &'static str,
    #[serde(flatten)]
    report: &'a StatusReport,
}

// UI process and core talk over local UDP; ports come from config
pub struct GuiBridge {
    socket: Arc<UdpSocket>,
    target_addr: String,
    tx: mpsc::Sender<ControlCommand>,
}

impl GuiBridge {
    pub async fn new(config: &Config, tx: mpsc::Sender<ControlCommand>) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(format!("0.0.0.0:{}", config.gui_local_port)).await?;
        let target_addr = format!("{}:{}", config.gui_remote_ip, config.gui_remote_port);

        Ok(Self {
            socket: Arc::new(socket),
            target_addr,
            tx,
        })
    }

    /// Forward control commands from the UI until the controller goes away.
    pub async fn run(&self) -> anyhow::Result<()> {
        let mut buf = [0u8; 4096];
        loop {
            let (len, peer) = self.socket.recv_from(&mut buf).await?;
            if len == 0 {
                continue;
            }
            let command = match parse_command(&buf[..len]) {
                Some(command) => command,
                None => {
                    log::warn!(
                        "Ignoring GUI message from {}: {}",
                        peer,
                        String::from_utf8_lossy(&buf[..len])
                    );
                    continue;
                }
            };
            if let Err(e) = self.tx.send(command).await {
                log::error!("Failed to send GUI command: {}", e);
                break;
            }
        }
        Ok(())
    }

    pub async fn send_status(&self, report: &StatusReport) -> anyhow::Result<()> {
        self.send_message(&status_json(report)?).await
    }

    pub async fn send_message(&self, msg: &str) -> anyhow::Result<()> {
        self.socket
            .send_to(msg.as_bytes(), &self.target_addr)
            .await?;
        Ok(())
    }
}

fn parse_command(payload: &[u8]) -> Option<ControlCommand> {
    serde_json::from_slice(payload).ok()
}

fn status_json(report: &StatusReport) -> anyhow::Result<String> {
    Ok(serde_json::to_string(&StatusMessage {
        msg_type: "status",
        report,
    })?)
}
