use crate::internal::exec::context::ExecuteError;
use crate::internal::message::envelope::{Command, ContentType, Endpoint, Message};
use crate::internal::project::manager::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("{endpoint} does not support command '{command}'")]
    UnsupportedCommand { endpoint: Endpoint, command: String },
    #[error("Missing metadata field: {0}")]
    MissingField(&'static str),
    #[error("Invalid metadata field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("Expected {expected} content, got {found}")]
    InvalidContent {
        expected: ContentType,
        found: ContentType,
    },
    #[error(transparent)]
    Execute(#[from] ExecuteError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    pub fn unsupported(command: Command) -> Self {
        HandlerError::UnsupportedCommand {
            endpoint: command.endpoint(),
            command: command.as_str().to_string(),
        }
    }
}

/// Per-endpoint request processor.
///
/// `handle` runs on the dispatch loop and must not wait on a kernel. Replies
/// go out through the outbox the handler was built with, either before
/// `handle` returns or later from a spawned task. A returned error becomes a
/// single error reply addressed to the request.
pub trait Handler: Send + Sync {
    fn endpoint(&self) -> Endpoint;

    fn handle(&self, message: Message) -> Result<(), HandlerError>;

    /// Best-effort resource release; called at most once, must not panic.
    fn shutdown(&self) {}
}

/// Reads a string field from request metadata.
pub fn required_str<'a>(message: &'a Message, field: &'static str) -> Result<&'a str, HandlerError> {
    match message.metadata.get(field) {
        None | Some(serde_json::Value::Null) => Err(HandlerError::MissingField(field)),
        Some(serde_json::Value::String(value)) => Ok(value),
        Some(other) => Err(HandlerError::InvalidField {
            field,
            reason: format!("expected a string, got {}", other),
        }),
    }
}

/// Reads a non-negative integer field, defaulting when absent.
pub fn optional_u64(message: &Message, field: &'static str, default: u64) -> Result<u64, HandlerError> {
    match message.metadata.get(field) {
        None | Some(serde_json::Value::Null) => Ok(default),
        Some(value) => value.as_u64().ok_or_else(|| HandlerError::InvalidField {
            field,
            reason: format!("expected a non-negative integer, got {}", value),
        }),
    }
}
