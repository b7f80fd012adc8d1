//! Gemini Live WebSocket client.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::config::GEMINI_LIVE_URL;
use super::messages::{ClientMessage, ServerMessage};
use crate::core::realtime::base::{
    ChannelConfig, ChannelConnector, ChannelEvent, ChannelEventCallback, ChannelHandle,
    OutboundMessage, RealtimeError, RealtimeResult,
};

/// Default capacity of the outbound message queue.
pub const WS_CHANNEL_CAPACITY: usize = 256;

/// Connector for the Gemini Live bidirectional streaming API.
#[derive(Debug, Clone)]
pub struct GeminiLiveConnector {
    endpoint: String,
    outbound_capacity: usize,
}

impl Default for GeminiLiveConnector {
    fn default() -> Self {
        Self::new(GEMINI_LIVE_URL, WS_CHANNEL_CAPACITY)
    }
}

impl GeminiLiveConnector {
    pub fn new(endpoint: impl Into<String>, outbound_capacity: usize) -> Self {
        Self {
            endpoint: endpoint.into(),
            outbound_capacity: outbound_capacity.max(1),
        }
    }

    /// Build the WebSocket URL with the API key as query parameter.
    fn build_ws_url(&self, api_key: &str) -> RealtimeResult<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| RealtimeError::InvalidConfiguration(format!("Invalid endpoint: {e}")))?;
        url.query_pairs_mut().append_pair("key", api_key);
        Ok(url)
    }

    /// Serialize an outbound message into a WebSocket text frame.
    fn encode(message: &OutboundMessage) -> RealtimeResult<Message> {
        let client_message = match message {
            OutboundMessage::Audio(chunk) => ClientMessage::audio(chunk),
            OutboundMessage::ToolResponse(result) => ClientMessage::tool_response(result),
        };
        let json = serde_json::to_string(&client_message)
            .map_err(|e| RealtimeError::SerializationError(e.to_string()))?;
        Ok(Message::Text(json.into()))
    }

    /// Parse a server payload and deliver the resulting events.
    fn dispatch_payload(payload: &[u8], on_event: &ChannelEventCallback) {
        match serde_json::from_slice::<ServerMessage>(payload) {
            Ok(message) => {
                for event in message.into_events() {
                    on_event(event);
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to parse server message: {} - {}",
                    e,
                    String::from_utf8_lossy(payload)
                );
            }
        }
    }
}

#[async_trait]
impl ChannelConnector for GeminiLiveConnector {
    async fn open(
        &self,
        api_key: &str,
        config: ChannelConfig,
        on_event: ChannelEventCallback,
    ) -> RealtimeResult<ChannelHandle> {
        if api_key.trim().is_empty() {
            return Err(RealtimeError::AuthenticationFailed(
                "API key is empty".to_string(),
            ));
        }

        let url = self.build_ws_url(api_key)?;

        let (ws_stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;

        tracing::info!(model = %config.model, voice = %config.voice, "Connected to Gemini Live API");

        let (mut ws_sink, mut ws_stream) = ws_stream.split();

        // Setup must be the first frame on the wire
        let setup = serde_json::to_string(&ClientMessage::setup(&config))
            .map_err(|e| RealtimeError::SerializationError(e.to_string()))?;
        ws_sink
            .send(Message::Text(setup.into()))
            .await
            .map_err(|e| RealtimeError::WebSocketError(e.to_string()))?;

        let (tx, mut rx) = mpsc::channel::<OutboundMessage>(self.outbound_capacity);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    // Local close: no event is delivered
                    _ = task_cancel.cancelled() => {
                        tracing::debug!("Closing Gemini Live connection");
                        let _ = ws_sink.send(Message::Close(None)).await;
                        break;
                    }

                    // Handle outgoing messages
                    Some(message) = rx.recv() => {
                        let frame = match Self::encode(&message) {
                            Ok(frame) => frame,
                            Err(e) => {
                                tracing::error!("Failed to serialize message: {}", e);
                                continue;
                            }
                        };

                        if let Err(e) = ws_sink.send(frame).await {
                            tracing::error!("Failed to send WebSocket message: {}", e);
                            on_event(ChannelEvent::Error(RealtimeError::WebSocketError(e.to_string())));
                            break;
                        }
                    }

                    // Handle incoming messages
                    msg = ws_stream.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                Self::dispatch_payload(text.as_bytes(), &on_event);
                            }
                            Some(Ok(Message::Binary(data))) => {
                                Self::dispatch_payload(&data, &on_event);
                            }
                            Some(Ok(Message::Close(frame))) => {
                                let reason = frame
                                    .map(|f| f.reason.as_str().to_string())
                                    .filter(|r| !r.is_empty());
                                tracing::info!("WebSocket closed by server: {:?}", reason);
                                on_event(ChannelEvent::Closed { reason });
                                break;
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    tracing::error!("Failed to send pong: {}", e);
                                }
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::error!("WebSocket error: {}", e);
                                on_event(ChannelEvent::Error(RealtimeError::WebSocketError(e.to_string())));
                                break;
                            }
                            None => {
                                tracing::info!("WebSocket stream ended");
                                on_event(ChannelEvent::Closed { reason: None });
                                break;
                            }
                        }
                    }
                }
            }

            task_cancel.cancel();
            tracing::debug!("Gemini Live connection task finished");
        });

        Ok(ChannelHandle::new(tx, cancel))
    }

    fn provider_name(&self) -> &'static str {
        "gemini-live"
    }
}
