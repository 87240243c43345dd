/// Command gateway - the controller's view of the broadcaster backend
///
/// This module defines the abstract request/response surface. It is independent
/// of how the backend is reached; `LocalGateway` calls an in-process backend and
/// `HttpGateway` talks to a remote one.
use async_trait::async_trait;
use derive_more::{Display, Error};

use crate::protocol::{command::RequestId, config::StartOptions};

/// Failure of a single gateway call.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum GatewayError {
    /// Backend unreachable, connection dropped or call timed out.
    #[display("gateway unreachable: {message}")]
    Transport {
        #[error(not(source))]
        message: String,
    },
    /// Reply could not be decoded or had an unexpected shape.
    #[display("malformed gateway response: {message}")]
    Protocol {
        #[error(not(source))]
        message: String,
    },
    /// Backend received the command and reported a failure.
    #[display("backend rejected command: {message}")]
    Rejected {
        #[error(not(source))]
        message: String,
    },
}

impl GatewayError {
    pub fn transport(message: impl Into<String>) -> Self {
        GatewayError::Transport {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        GatewayError::Protocol {
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        GatewayError::Rejected {
            message: message.into(),
        }
    }

    /// Detail text without the category prefix.
    pub fn message(&self) -> &str {
        match self {
            GatewayError::Transport { message }
            | GatewayError::Protocol { message }
            | GatewayError::Rejected { message } => message,
        }
    }
}

/// One-shot request/response calls to the backend.
///
/// Every call carries the request id the caller generated for it, so replies
/// can be correlated on both sides.
#[async_trait]
pub trait CommandGateway: Send + Sync {
    /// Begin broadcasting with the given options. Safe to repeat.
    async fn start(&self, request_id: RequestId, options: StartOptions)
        -> Result<(), GatewayError>;

    /// Stop broadcasting.
    async fn stop(&self, request_id: RequestId) -> Result<(), GatewayError>;

    /// Whether the backend currently considers the link healthy.
    async fn get_status(&self, request_id: RequestId) -> Result<bool, GatewayError>;

    /// Serial ports visible to the backend, in no particular order.
    async fn list_available_com_ports(
        &self,
        request_id: RequestId,
    ) -> Result<Vec<String>, GatewayError>;
}
