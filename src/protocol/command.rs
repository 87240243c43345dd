/// Wire types for the backend command surface
///
/// Every command is a one-shot request carrying a fresh request id. Successful
/// replies are wrapped in `{"data": ...}`, failures in `{"message": "..."}`.
use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{Display, EnumIter};
use uuid::Uuid;

use super::config::StartOptions;

/// Identifier correlating a command with its reply.
pub type RequestId = Uuid;

/// Generate a new request id.
pub fn new_request_id() -> RequestId {
    Uuid::new_v4()
}

/// The commands understood by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum CommandKind {
    Start,
    Stop,
    GetStatus,
    #[strum(serialize = "get_available_com_ports")]
    ListComPorts,
}

impl CommandKind {
    /// Route/command name used by the HTTP binding.
    pub fn endpoint(self) -> String {
        format!("/cmd_{self}")
    }
}

/// Body of commands that carry nothing but the request id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    pub request_id: RequestId,
}

/// Body of the start command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub request_id: RequestId,
    pub options: StartOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse<T> {
    pub data: T,
}

impl<T> CommandResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandError {
    pub message: String,
}

impl CommandError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CommandError {}
