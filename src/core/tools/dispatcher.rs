//! Name-keyed registry that routes tool calls to their handlers.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::{ToolCallRequest, ToolCallResult, ToolDeclaration, ToolError};

/// A locally executed tool.
pub trait ToolHandler: Send + Sync {
    fn declaration(&self) -> ToolDeclaration;

    /// Run the tool and return the confirmation text.
    fn invoke(&self, args: &Map<String, Value>) -> Result<String, ToolError>;
}

/// Routes function calls to registered handlers by name.
#[derive(Clone, Default)]
pub struct ToolCallDispatcher {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
    /// Registration order, used for declarations
    order: Vec<String>,
}

impl ToolCallDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its declared name, replacing any previous one.
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        let name = handler.declaration().name;
        if self.handlers.insert(name.clone(), handler).is_none() {
            self.order.push(name);
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn ToolHandler>) -> Self {
        self.register(handler);
        self
    }

    /// Declarations of every registered tool, in registration order.
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.order
            .iter()
            .filter_map(|name| self.handlers.get(name))
            .map(|handler| handler.declaration())
            .collect()
    }

    /// Run one call. Always yields a result carrying the request id.
    pub fn dispatch(&self, request: &ToolCallRequest) -> ToolCallResult {
        let outcome = match self.handlers.get(&request.name) {
            Some(handler) => handler.invoke(&request.args),
            None => Err(ToolError::UnknownTool(request.name.clone())),
        };

        match outcome {
            Ok(message) => {
                tracing::info!(call_id = %request.id, tool = %request.name, "Tool call succeeded");
                ToolCallResult::success(&request.id, &request.name, message)
            }
            Err(e) => {
                tracing::warn!(call_id = %request.id, tool = %request.name, "Tool call failed: {}", e);
                ToolCallResult::failure(&request.id, &request.name, e.to_string())
            }
        }
    }
}

impl std::fmt::Debug for ToolCallDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCallDispatcher")
            .field("tools", &self.order)
            .finish()
    }
}
