use serde::Serialize;
use std::fmt;

/// Lifecycle state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    #[default]
    Disconnected,
    /// Audio devices and channel are being opened
    Connecting,
    /// The service accepted the setup; audio flows both ways
    Connected,
    /// Setup or transport failed. Left only by an explicit start or stop.
    Error,
}

impl SessionState {
    /// Whether a channel is open or being opened.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Connected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "DISCONNECTED"),
            SessionState::Connecting => write!(f, "CONNECTING"),
            SessionState::Connected => write!(f, "CONNECTED"),
            SessionState::Error => write!(f, "ERROR"),
        }
    }
}

/// State published to observers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    /// User-facing message, set only in [`SessionState::Error`]
    pub error: Option<String>,
}

/// Point-in-time view of the controller, for diagnostics and tests.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub error: Option<String>,
    /// Incremented by every start and cleanup
    pub epoch: u64,
    pub channel_open: bool,
    pub active_sources: usize,
    /// Playback cursor in seconds
    pub next_start: f64,
    pub chunks_sent: u64,
}
