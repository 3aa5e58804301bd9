//! Live bidirectional session wire messages (JSON over WebSocket).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::WireBlob;
use crate::transport::TransportEvent;

// ======================== Client → Server ========================

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
    pub language_code: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<WireBlob>,
}

impl ClientMessage {
    pub fn setup(model: &str, voice_name: &str, language_code: &str, persona: &str) -> Self {
        ClientMessage::Setup(Setup {
            model: model.to_string(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice_name.to_string(),
                        },
                    },
                    language_code: language_code.to_string(),
                },
            },
            system_instruction: Content {
                parts: vec![Part {
                    text: Some(persona.to_string()),
                    inline_data: None,
                }],
            },
        })
    }

    pub fn audio(blob: WireBlob) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![blob],
        })
    }
}

// ======================== Shared ========================

#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<WireBlob>,
}

// ======================== Server → Client ========================

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<Value>,
    pub server_content: Option<ServerContent>,
    pub go_away: Option<Value>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

impl ServerMessage {
    /// Translate into transport events. An interruption is always emitted
    /// before audio carried in the same message.
    pub fn into_events(self) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        if self.setup_complete.is_some() {
            events.push(TransportEvent::Opened);
        }
        if let Some(content) = self.server_content {
            if content.interrupted {
                events.push(TransportEvent::Interrupted);
            }
            let parts = content.model_turn.map(|turn| turn.parts).unwrap_or_default();
            events.extend(
                parts
                    .into_iter()
                    .filter_map(|part| part.inline_data)
                    .filter(|blob| blob.mime_type.starts_with("audio/"))
                    .map(|blob| TransportEvent::InboundChunk(blob.into())),
            );
            if content.turn_complete {
                log::debug!("Model turn complete");
            }
        }
        if self.go_away.is_some() {
            log::warn!("Server announced it will close the session soon");
        }
        events
    }
}
