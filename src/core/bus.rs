use serde::Serialize;
use std::fmt;

use super::controller::{ConnectionState, ControllerError};
use crate::protocol::config::{RefreshRate, TransportConfig};

/// Reply slot for commands whose outcome the caller needs.
pub type Reply = oneshot::Sender<Result<(), ControllerError>>;

/// Messages sent from the presentation layer to the controller event loop.
pub enum ControllerCommand {
    /// Begin connecting with the current configuration.
    Start,
    /// Disconnect. Always ends in `Disconnected`.
    Stop,
    /// Replace the transport configuration (only while disconnected).
    SetConfig(TransportConfig, Reply),
    /// Replace the refresh rate (only while disconnected).
    SetRefreshRate(RefreshRate, Reply),
    /// Fetch a fresh serial port list.
    RefreshComPorts,
    /// Stop the event loop. Issues a stop first when connected.
    Shutdown,
}

impl fmt::Debug for ControllerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerCommand::Start => write!(f, "Start"),
            ControllerCommand::Stop => write!(f, "Stop"),
            ControllerCommand::SetConfig(config, _) => write!(f, "SetConfig({config})"),
            ControllerCommand::SetRefreshRate(rate, _) => write!(f, "SetRefreshRate({rate})"),
            ControllerCommand::RefreshComPorts => write!(f, "RefreshComPorts"),
            ControllerCommand::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// Everything the presentation layer renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerSnapshot {
    pub state: ConnectionState,
    pub config: TransportConfig,
    pub refresh_rate: RefreshRate,
    pub available_com_ports: Vec<String>,
}

impl ControllerSnapshot {
    /// Form fields are editable only while disconnected.
    pub fn is_editable(&self) -> bool {
        self.state == ConnectionState::Disconnected
    }
}
