//! Gemini Live API WebSocket message types.
//!
//! Every frame is a JSON object with exactly one top-level key naming the message.
//!
//! # Protocol Overview
//!
//! Client messages (sent to server):
//! - setup - Model, generation config, system instruction and tools (first frame)
//! - realtimeInput - Streaming audio chunks
//! - toolResponse - Results of function calls
//!
//! Server messages (received from server):
//! - setupComplete - Setup accepted, the session is live
//! - serverContent - Model audio, interruption and turn completion
//! - toolCall - Function calls to run on the client
//! - toolCallCancellation - Calls the server no longer needs
//! - goAway - The server is about to disconnect

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::config::qualified_model_name;
use crate::core::audio::EncodedChunk;
use crate::core::realtime::base::{ChannelConfig, ChannelEvent, InboundMessage, ResponseModality};
use crate::core::tools::{ToolCallRequest, ToolCallResult, ToolDeclaration};

// =============================================================================
// Client Messages
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponse),
}

/// Session setup, sent once as the first frame.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    /// Fully qualified model name (`models/...`)
    pub model: String,

    pub generation_config: GenerationConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<ResponseModality>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

/// Text content with one or more parts.
#[derive(Debug, Clone, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextPart {
    pub text: String,
}

/// Tool group containing function declarations.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments
    pub parameters: Value,
}

/// Streaming audio input.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

/// Inline binary data, base64 encoded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
}

impl ClientMessage {
    /// Build the setup frame from the declared channel configuration.
    pub fn setup(config: &ChannelConfig) -> Self {
        let speech_config = (config.response_modality == ResponseModality::Audio).then(|| {
            SpeechConfig {
                voice_config: VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig {
                        voice_name: config.voice.clone(),
                    },
                },
            }
        });

        let system_instruction = (!config.system_instruction.is_empty()).then(|| Content {
            parts: vec![TextPart {
                text: config.system_instruction.clone(),
            }],
        });

        let tools = if config.tools.is_empty() {
            Vec::new()
        } else {
            vec![Tool {
                function_declarations: config.tools.iter().map(FunctionDeclaration::from).collect(),
            }]
        };

        ClientMessage::Setup(Setup {
            model: qualified_model_name(&config.model),
            generation_config: GenerationConfig {
                response_modalities: vec![config.response_modality],
                speech_config,
            },
            system_instruction,
            tools,
        })
    }

    /// Wrap an encoded capture chunk.
    pub fn audio(chunk: &EncodedChunk) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob {
                mime_type: chunk.mime_type(),
                data: chunk.data.clone(),
            }],
        })
    }

    /// Wrap a single tool result.
    pub fn tool_response(result: &ToolCallResult) -> Self {
        ClientMessage::ToolResponse(ToolResponse {
            function_responses: vec![FunctionResponse {
                id: result.id.clone(),
                name: result.name.clone(),
                response: result.response.clone(),
            }],
        })
    }
}

impl From<&ToolDeclaration> for FunctionDeclaration {
    fn from(decl: &ToolDeclaration) -> Self {
        Self {
            name: decl.name.clone(),
            description: decl.description.clone(),
            parameters: decl.parameters.clone(),
        }
    }
}

// =============================================================================
// Server Messages
// =============================================================================

/// Messages received from server. Unknown keys are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<Value>,

    #[serde(default)]
    pub server_content: Option<ServerContent>,

    #[serde(default)]
    pub tool_call: Option<ToolCall>,

    #[serde(default)]
    pub tool_call_cancellation: Option<ToolCallCancellation>,

    #[serde(default)]
    pub go_away: Option<GoAway>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<ModelTurn>,

    #[serde(default)]
    pub interrupted: bool,

    #[serde(default)]
    pub turn_complete: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<ServerPart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerPart {
    #[serde(default)]
    pub text: Option<String>,

    #[serde(default)]
    pub inline_data: Option<Blob>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolCallCancellation {
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

impl ServerMessage {
    /// Translate into channel events, in the order the service intends them.
    pub fn into_events(self) -> Vec<ChannelEvent> {
        let mut events = Vec::new();

        if self.setup_complete.is_some() {
            events.push(ChannelEvent::Open);
        }

        if let Some(content) = self.server_content {
            if content.interrupted {
                events.push(ChannelEvent::Message(InboundMessage::Interrupted));
            }
            if let Some(turn) = content.model_turn {
                for part in turn.parts {
                    if let Some(blob) = part.inline_data {
                        if blob.mime_type.starts_with("audio/") || blob.mime_type.is_empty() {
                            events.push(ChannelEvent::Message(InboundMessage::Audio(blob.data)));
                        } else {
                            tracing::debug!("Ignoring inline data of type {}", blob.mime_type);
                        }
                    } else if let Some(text) = part.text {
                        tracing::debug!("Model text part: {}", text);
                    }
                }
            }
            if content.turn_complete {
                events.push(ChannelEvent::Message(InboundMessage::TurnComplete));
            }
        }

        if let Some(tool_call) = self.tool_call
            && !tool_call.function_calls.is_empty()
        {
            let requests = tool_call
                .function_calls
                .into_iter()
                .map(|call| ToolCallRequest {
                    id: call.id,
                    name: call.name,
                    args: match call.args {
                        Value::Object(map) => map,
                        _ => serde_json::Map::new(),
                    },
                })
                .collect();
            events.push(ChannelEvent::Message(InboundMessage::ToolCall(requests)));
        }

        if let Some(cancellation) = self.tool_call_cancellation {
            events.push(ChannelEvent::Message(InboundMessage::ToolCallCancellation(
                cancellation.ids,
            )));
        }

        if let Some(go_away) = self.go_away {
            events.push(ChannelEvent::Message(InboundMessage::GoAway {
                time_left: go_away.time_left,
            }));
        }

        events
    }
}
