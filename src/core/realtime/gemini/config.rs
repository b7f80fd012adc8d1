//! Gemini Live API configuration types.
//!
//! This module contains the endpoint, default model and the prebuilt voices
//! accepted by the Live API.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Gemini Live bidirectional WebSocket endpoint.
pub const GEMINI_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Native audio model used by default.
pub const DEFAULT_GEMINI_LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Prefix the API expects in front of model identifiers.
const MODEL_PREFIX: &str = "models/";

/// Qualify a model identifier with the `models/` prefix if it is missing.
pub fn qualified_model_name(model: &str) -> String {
    if model.starts_with(MODEL_PREFIX) {
        model.to_string()
    } else {
        format!("{MODEL_PREFIX}{model}")
    }
}

// =============================================================================
// Voices
// =============================================================================

/// Prebuilt Gemini Live voices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GeminiVoice {
    Puck,
    Charon,
    Kore,
    /// Male, warm and deep
    #[default]
    Fenrir,
    Aoede,
    Leda,
    Orus,
    Zephyr,
}

impl GeminiVoice {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Puck => "Puck",
            Self::Charon => "Charon",
            Self::Kore => "Kore",
            Self::Fenrir => "Fenrir",
            Self::Aoede => "Aoede",
            Self::Leda => "Leda",
            Self::Orus => "Orus",
            Self::Zephyr => "Zephyr",
        }
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "puck" => Self::Puck,
            "charon" => Self::Charon,
            "kore" => Self::Kore,
            "fenrir" => Self::Fenrir,
            "aoede" => Self::Aoede,
            "leda" => Self::Leda,
            "orus" => Self::Orus,
            "zephyr" => Self::Zephyr,
            other => {
                tracing::warn!("Unknown Gemini voice '{}', using default", other);
                Self::default()
            }
        }
    }

    /// All supported voices.
    pub fn all() -> &'static [GeminiVoice] {
        &[
            Self::Puck,
            Self::Charon,
            Self::Kore,
            Self::Fenrir,
            Self::Aoede,
            Self::Leda,
            Self::Orus,
            Self::Zephyr,
        ]
    }
}

impl fmt::Display for GeminiVoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
