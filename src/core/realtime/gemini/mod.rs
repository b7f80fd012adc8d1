//! Gemini Live API module.
//!
//! Bidirectional audio streaming with function calling over the
//! `BidiGenerateContent` WebSocket endpoint.
//!
//! # Audio Format
//!
//! Input audio is PCM 16-bit signed little-endian at 16kHz, output audio is the
//! same encoding at 24kHz. Both travel base64 encoded inside JSON frames.

mod client;
mod config;
pub mod messages;

pub use client::{GeminiLiveConnector, WS_CHANNEL_CAPACITY};
pub use config::{DEFAULT_GEMINI_LIVE_MODEL, GEMINI_LIVE_URL, GeminiVoice, qualified_model_name};
