//! Realtime conversational channel module.
//!
//! This module provides the transport abstraction used by the session controller
//! and its implementation for the Gemini Live API.
//!
//! # Architecture
//!
//! - `ChannelConnector` opens a channel and returns a cloneable `ChannelHandle`
//! - Inbound traffic is delivered as `ChannelEvent`s through a callback
//! - Outbound traffic goes through a bounded queue drained by the connection task
//!
//! # Audio Format
//!
//! - Upstream: PCM 16-bit signed little-endian, mono, 16kHz
//! - Downstream: PCM 16-bit signed little-endian, mono, 24kHz
//!
//! # Example
//!
//! ```rust,ignore
//! use live_reception::core::realtime::{ChannelConnector, GeminiLiveConnector};
//! use std::sync::Arc;
//!
//! let connector = GeminiLiveConnector::default();
//! let handle = connector
//!     .open(&api_key, channel_config, Arc::new(|event| println!("{event:?}")))
//!     .await?;
//! handle.send_audio(chunk).await?;
//! ```

mod base;
pub mod gemini;

pub use base::{
    ChannelConfig, ChannelConnector, ChannelEvent, ChannelEventCallback, ChannelHandle,
    InboundMessage, OutboundMessage, RealtimeError, RealtimeResult, ResponseModality,
};
pub use gemini::GeminiLiveConnector;
