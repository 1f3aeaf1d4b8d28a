//! # Realtime Wire Protocol
//!
//! JSON messages exchanged with the bidirectional streaming endpoint.
//!
//! ## Client → Server:
//! - `setup`: sent once, right after the socket opens (model, response
//!   modality, voice, persona instruction)
//! - `realtimeInput`: one outbound audio frame as a base64 PCM16 media chunk
//!
//! ## Server → Client:
//! - `setupComplete`: the session is ready, treated as "opened"
//! - `serverContent`: model turn parts (inline audio, text), plus the
//!   `interrupted` and `turnComplete` flags
//! - `goAway`: the server is about to drop the connection
//!
//! Unknown fields are ignored so newer server versions keep working.

use crate::audio::pcm::{encode_pcm16_base64, pcm_mime_type};
use crate::config::AppConfig;
use serde::{Deserialize, Serialize};

/// Fixed per-session parameters sent at connect time.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveConnectConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
}

impl LiveConnectConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            endpoint: config.live.endpoint.clone(),
            api_key: config.live.api_key.clone(),
            model: config.live.model.clone(),
            voice: config.live.voice.clone(),
            system_instruction: config.live.system_instruction.clone(),
        }
    }

    /// Endpoint URL including the key. Never log the result.
    pub fn url(&self) -> String {
        format!("{}?key={}", self.endpoint, self.api_key)
    }

    /// The `setup` message for this configuration.
    pub fn setup_message(&self) -> ClientMessage {
        ClientMessage::Setup(SetupMessage {
            model: self.model.clone(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: self.voice.clone(),
                        },
                    },
                },
            },
            system_instruction: Content {
                parts: vec![Part::text(&self.system_instruction)],
            },
        })
    }
}

// Client messages

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(SetupMessage),
    RealtimeInput(RealtimeInput),
}

impl ClientMessage {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SetupMessage {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

/// An outbound audio frame: one capture chunk encoded for the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundFrame {
    pub media: Blob,
}

impl OutboundFrame {
    pub fn from_samples(samples: &[f32], sample_rate: u32) -> Self {
        Self {
            media: Blob {
                mime_type: pcm_mime_type(sample_rate),
                data: encode_pcm16_base64(samples),
            },
        }
    }

    /// Size of the base64 payload, used for the bytes-sent counter.
    pub fn payload_len(&self) -> usize {
        self.media.data.len()
    }

    pub fn into_message(self) -> ClientMessage {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![self.media],
        })
    }
}

// Shared content types

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

impl Part {
    pub fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }
}

/// Base64 payload tagged with a MIME type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    #[serde(default)]
    pub mime_type: String,
    pub data: String,
}

impl Blob {
    /// Audio blobs carry an `audio/...` MIME type; a missing type is treated as
    /// audio since only audio responses are requested.
    pub fn is_audio(&self) -> bool {
        self.mime_type.is_empty() || self.mime_type.starts_with("audio/")
    }
}

// Server messages

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
}

impl ServerMessage {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// First inline audio payload of the model turn, if any.
    pub fn audio_payload(&self) -> Option<&Blob> {
        self.server_content
            .as_ref()?
            .model_turn
            .as_ref()?
            .parts
            .iter()
            .filter_map(|part| part.inline_data.as_ref())
            .find(|blob| blob.is_audio())
    }

    /// Concatenated text parts of the model turn (empty when there are none).
    pub fn text(&self) -> String {
        self.server_content
            .as_ref()
            .and_then(|content| content.model_turn.as_ref())
            .map(|turn| {
                turn.parts
                    .iter()
                    .filter_map(|part| part.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }

    pub fn is_interrupted(&self) -> bool {
        self.server_content
            .as_ref()
            .map(|content| content.interrupted)
            .unwrap_or(false)
    }

    pub fn is_turn_complete(&self) -> bool {
        self.server_content
            .as_ref()
            .map(|content| content.turn_complete)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}
