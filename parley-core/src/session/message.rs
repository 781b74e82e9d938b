//! JSON envelopes exchanged with a live conversational endpoint.
//!
//! Only the fields the audio engine cares about are modelled; unknown fields
//! are ignored so newer server payloads still parse.

use serde::{Deserialize, Serialize};

use crate::codec::EncodedBlock;
use crate::engine::EngineEvent;
use crate::error::{ParleyError, Result};

/// One message pushed by the server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_content: Option<ServerContent>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_turn: Option<ModelTurn>,
    /// Set when the user barged in over the assistant.
    #[serde(default)]
    pub interrupted: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[serde(default)]
    pub mime_type: Option<String>,
    pub data: String,
}

impl ServerMessage {
    /// Parse a raw text frame.
    ///
    /// # Errors
    /// `ParleyError::Transport` for frames that are not valid JSON.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| ParleyError::Transport(format!("bad server frame: {e}")))
    }

    /// Audio payload of the first model-turn part, if any.
    pub fn audio(&self) -> Option<&InlineData> {
        self.server_content
            .as_ref()?
            .model_turn
            .as_ref()?
            .parts
            .first()?
            .inline_data
            .as_ref()
    }

    pub fn is_interrupted(&self) -> bool {
        self.server_content.as_ref().is_some_and(|c| c.interrupted)
    }

    /// Engine events carried by this message, in handling order: the audio
    /// chunk first, then the interruption.
    pub fn into_events(self) -> Vec<EngineEvent> {
        let interrupted = self.is_interrupted();
        let mut events = Vec::with_capacity(2);
        if let Some(inline) = self
            .server_content
            .and_then(|c| c.model_turn)
            .and_then(|t| t.parts.into_iter().next())
            .and_then(|p| p.inline_data)
        {
            events.push(EngineEvent::ChunkReceived {
                data: inline.data,
                mime_type: inline.mime_type,
            });
        }
        if interrupted {
            events.push(EngineEvent::Interrupted);
        }
        events
    }
}

/// Outbound `{"realtimeInput": {"mediaChunks": [...]}}` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<EncodedBlock>,
}

impl ClientMessage {
    pub fn realtime_input(block: EncodedBlock) -> Self {
        Self {
            realtime_input: RealtimeInput {
                media_chunks: vec![block],
            },
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ParleyError::Transport(e.to_string()))
    }
}
