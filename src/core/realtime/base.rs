//! Base traits and types for the bidirectional conversational channel.
//!
//! A channel carries 16 kHz PCM audio and tool results to the remote service and
//! delivers 24 kHz audio, tool calls and turn signals back. Delivery is callback
//! based: the connector invokes a [`ChannelEventCallback`] from its own task, and
//! the session controller turns every invocation into a message on its event queue.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::audio::EncodedChunk;
use crate::core::tools::{ToolCallRequest, ToolCallResult, ToolDeclaration};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during realtime operations.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Connection to the provider failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Configuration Types
// =============================================================================

/// Output modality requested from the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseModality {
    #[default]
    Audio,
    Text,
}

impl fmt::Display for ResponseModality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseModality::Audio => write!(f, "AUDIO"),
            ResponseModality::Text => write!(f, "TEXT"),
        }
    }
}

/// Declared configuration sent when a channel is opened.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Model identifier (without the `models/` prefix)
    pub model: String,
    /// Persona and task instructions
    pub system_instruction: String,
    pub response_modality: ResponseModality,
    /// Prebuilt voice name
    pub voice: String,
    /// Tools the service may call
    pub tools: Vec<ToolDeclaration>,
}

// =============================================================================
// Events
// =============================================================================

/// Decoded inbound message from the service.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Base64 PCM16 audio at 24 kHz, one entry per inline part
    Audio(String),
    /// One or more function calls to run locally
    ToolCall(Vec<ToolCallRequest>),
    /// The user spoke over the model; queued audio must be discarded
    Interrupted,
    /// The model finished its turn
    TurnComplete,
    /// Previously issued calls the service no longer wants answered
    ToolCallCancellation(Vec<String>),
    /// The server will close the connection soon
    GoAway { time_left: Option<String> },
}

/// Callback-style delivery from the channel.
#[derive(Debug)]
pub enum ChannelEvent {
    /// The service acknowledged the setup and is ready for audio
    Open,
    Message(InboundMessage),
    /// The remote side closed the connection
    Closed { reason: Option<String> },
    /// The transport failed
    Error(RealtimeError),
}

/// Callback invoked by the connector for every channel event.
pub type ChannelEventCallback = Arc<dyn Fn(ChannelEvent) + Send + Sync>;

/// Outbound message queued for the channel writer.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Audio(EncodedChunk),
    ToolResponse(ToolCallResult),
}

// =============================================================================
// Channel Handle
// =============================================================================

/// Handle to an open channel.
///
/// Clones share the same connection. Once [`ChannelHandle::close`] has been called
/// every clone reports [`RealtimeError::NotConnected`] on send.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    outbound: mpsc::Sender<OutboundMessage>,
    cancel: CancellationToken,
}

impl ChannelHandle {
    pub fn new(outbound: mpsc::Sender<OutboundMessage>, cancel: CancellationToken) -> Self {
        Self { outbound, cancel }
    }

    /// Queue a message, waiting for room in the outbound queue.
    pub async fn send(&self, message: OutboundMessage) -> RealtimeResult<()> {
        if self.cancel.is_cancelled() {
            return Err(RealtimeError::NotConnected);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(RealtimeError::NotConnected),
            result = self.outbound.send(message) => result.map_err(|_| RealtimeError::NotConnected),
        }
    }

    pub async fn send_audio(&self, chunk: EncodedChunk) -> RealtimeResult<()> {
        self.send(OutboundMessage::Audio(chunk)).await
    }

    pub async fn send_tool_response(&self, result: ToolCallResult) -> RealtimeResult<()> {
        self.send(OutboundMessage::ToolResponse(result)).await
    }

    /// Close the channel. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_open(&self) -> bool {
        !self.cancel.is_cancelled() && !self.outbound.is_closed()
    }
}

// =============================================================================
// Connector Trait
// =============================================================================

/// Opens channels to a conversational service.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    /// Connect, send the declared configuration and start delivering events.
    ///
    /// Returns once the connection is established. [`ChannelEvent::Open`] is
    /// delivered through `on_event` when the service is ready.
    async fn open(
        &self,
        api_key: &str,
        config: ChannelConfig,
        on_event: ChannelEventCallback,
    ) -> RealtimeResult<ChannelHandle>;

    /// Provider name for logging.
    fn provider_name(&self) -> &'static str;
}
