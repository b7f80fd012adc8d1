//! Local tools the conversational service can invoke.
//!
//! A tool declares a JSON parameter schema that is sent with the channel setup,
//! and handles calls whose arguments were decoded into a typed struct.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;
use thiserror::Error;

mod appointments;
mod dispatcher;

pub use appointments::{
    Appointment, AppointmentStore, BOOK_APPOINTMENT, BookAppointmentArgs, BookAppointmentTool,
    DEFAULT_VISIT_TYPE,
};
pub use dispatcher::{ToolCallDispatcher, ToolHandler};

/// Errors raised while running a tool.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },
}

/// Schema of a tool as declared to the service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments
    pub parameters: Value,
}

/// Function call requested by the service.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub args: Map<String, Value>,
}

/// Outcome of a tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Success,
    Error,
}

impl fmt::Display for ToolCallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolCallStatus::Success => write!(f, "success"),
            ToolCallStatus::Error => write!(f, "error"),
        }
    }
}

/// Result sent back to the service, keyed by the originating call id.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallResult {
    pub id: String,
    pub name: String,
    pub status: ToolCallStatus,
    /// `{"result": "success" | "error", "message": ...}`
    pub response: Value,
}

impl ToolCallResult {
    pub fn success(id: impl Into<String>, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(id, name, ToolCallStatus::Success, message)
    }

    pub fn failure(id: impl Into<String>, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(id, name, ToolCallStatus::Error, message)
    }

    fn with_status(
        id: impl Into<String>,
        name: impl Into<String>,
        status: ToolCallStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status,
            response: json!({
                "result": status.to_string(),
                "message": message.into(),
            }),
        }
    }

    /// Human-readable message carried in the response.
    pub fn message(&self) -> Option<&str> {
        self.response.get("message").and_then(Value::as_str)
    }
}
