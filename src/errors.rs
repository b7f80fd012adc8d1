//! Session-level error taxonomy.
//!
//! Every fault that can end or abort a session is funnelled into
//! [`SessionError`]. Transport, audio and tool layers keep their own error
//! enums and are converted here at the controller boundary.

use thiserror::Error;

use crate::core::audio::{AudioError, DecodeError};
use crate::core::realtime::RealtimeError;

/// Faults surfaced by the session controller.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Microphone access was refused or no capture device is available.
    #[error("Microphone access denied: {0}")]
    PermissionDenied(String),

    /// No API key was configured.
    #[error("Missing API key")]
    MissingCredential,

    /// The transport failed while opening or after it was open.
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// The remote service closed the channel.
    #[error("Channel closed unexpectedly")]
    ChannelClosedUnexpectedly,

    /// An inbound audio payload could not be decoded.
    #[error("Failed to decode audio payload: {0}")]
    DecodeFailure(#[from] DecodeError),

    /// The playback device could not be opened.
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    /// The controller task is no longer running.
    #[error("Session controller stopped")]
    ControllerStopped,
}

impl SessionError {
    /// Text shown to the operator when the session lands in the error state.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::PermissionDenied(_) => {
                "Impossibile accedere al microfono. Controlla i permessi.".to_string()
            }
            SessionError::MissingCredential => "API Key mancante".to_string(),
            SessionError::ChannelError(_) | SessionError::ChannelClosedUnexpectedly => {
                "Errore di connessione. Riprova.".to_string()
            }
            SessionError::DecodeFailure(_) => "Audio ricevuto non valido.".to_string(),
            SessionError::AudioDevice(_) => {
                "Impossibile aprire il dispositivo audio.".to_string()
            }
            SessionError::ControllerStopped => "Sessione terminata.".to_string(),
        }
    }

    /// Whether the fault ends the session.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SessionError::DecodeFailure(_))
    }
}

impl From<RealtimeError> for SessionError {
    fn from(err: RealtimeError) -> Self {
        SessionError::ChannelError(err.to_string())
    }
}

impl From<AudioError> for SessionError {
    fn from(err: AudioError) -> Self {
        SessionError::AudioDevice(err.to_string())
    }
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
