pub mod audio;
pub mod realtime;
pub mod session;
pub mod tools;

// Re-export commonly used types for convenience
pub use audio::{AudioBackend, AudioError, CpalAudioBackend, InputLevel};

pub use realtime::{
    ChannelConfig, ChannelConnector, ChannelEvent, ChannelHandle, GeminiLiveConnector,
    InboundMessage, RealtimeError, RealtimeResult,
};

pub use session::{
    SessionController, SessionHandle, SessionSettings, SessionSnapshot, SessionState,
    SessionStatus,
};

pub use tools::{
    Appointment, AppointmentStore, BookAppointmentTool, ToolCallDispatcher, ToolCallRequest,
    ToolCallResult, ToolDeclaration, ToolHandler,
};
