//! Connection lifecycle state machine
//!
//! `ConnectionController` owns the connection intent and is driven entirely by
//! discrete events: presentation commands, timer expiries and gateway
//! completions. It performs no I/O itself; every event returns the gateway
//! calls that should be issued, and the timers required by the current state are
//! described by [`ConnectionController::timer_plan`]. The event loop in
//! [`crate::core::runtime`] applies both.

use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use crate::{
    api::gateway::GatewayError,
    protocol::{
        command::{new_request_id, CommandKind, RequestId},
        config::{ConfigError, RefreshRate, StartOptions, TransportConfig},
    },
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn is_active(self) -> bool {
        self != ConnectionState::Disconnected
    }
}

/// Intervals driving the retry and poll timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerTimings {
    /// Delay between start re-issues while connecting.
    pub retry_interval: Duration,
    /// Status poll interval while connecting.
    pub connecting_poll_interval: Duration,
    /// Status poll interval once connected.
    pub connected_poll_interval: Duration,
}

impl Default for ControllerTimings {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_millis(3000),
            connecting_poll_interval: Duration::from_millis(500),
            connected_poll_interval: Duration::from_millis(3000),
        }
    }
}

/// Timers that must be running for a given state. `None` means stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerPlan {
    pub retry: Option<Duration>,
    pub poll: Option<Duration>,
}

/// A gateway call the event loop has to issue on the controller's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    Start {
        request_id: RequestId,
        options: StartOptions,
    },
    Stop {
        request_id: RequestId,
    },
    GetStatus {
        request_id: RequestId,
    },
    ListComPorts {
        request_id: RequestId,
    },
}

impl GatewayCall {
    pub fn kind(&self) -> CommandKind {
        match self {
            GatewayCall::Start { .. } => CommandKind::Start,
            GatewayCall::Stop { .. } => CommandKind::Stop,
            GatewayCall::GetStatus { .. } => CommandKind::GetStatus,
            GatewayCall::ListComPorts { .. } => CommandKind::ListComPorts,
        }
    }

    pub fn request_id(&self) -> RequestId {
        match self {
            GatewayCall::Start { request_id, .. }
            | GatewayCall::Stop { request_id }
            | GatewayCall::GetStatus { request_id }
            | GatewayCall::ListComPorts { request_id } => *request_id,
        }
    }
}

/// Reply to a previously issued [`GatewayCall`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCompletion {
    Start {
        request_id: RequestId,
        result: Result<(), GatewayError>,
    },
    Stop {
        request_id: RequestId,
        result: Result<(), GatewayError>,
    },
    Status {
        request_id: RequestId,
        result: Result<bool, GatewayError>,
    },
    ComPorts {
        request_id: RequestId,
        result: Result<Vec<String>, GatewayError>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum ControllerError {
    /// Configuration can only change while disconnected.
    #[display("configuration is locked while {state:?}")]
    ConfigLocked {
        #[error(not(source))]
        state: ConnectionState,
    },
    #[display("invalid transport configuration: {_0}")]
    InvalidConfig(ConfigError),
    /// The controller event loop is gone.
    #[display("connection controller has shut down")]
    Closed,
}

/// An outstanding request awaiting its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    pub request_id: RequestId,
    pub command: CommandKind,
    pub issued_at: Instant,
}

/// Latest outstanding request id per command.
///
/// Issuing a command replaces whatever was outstanding for it, so only the
/// reply to the newest request is ever accepted.
#[derive(Debug, Default)]
pub struct PendingRequests {
    latest: HashMap<CommandKind, PendingRequest>,
}

impl PendingRequests {
    pub fn issue(&mut self, command: CommandKind) -> RequestId {
        let request_id = new_request_id();
        self.latest.insert(
            command,
            PendingRequest {
                request_id,
                command,
                issued_at: Instant::now(),
            },
        );
        request_id
    }

    /// Accept a reply. Returns the pending entry when `request_id` is the latest
    /// outstanding request for `command`, `None` for stale replies.
    pub fn settle(&mut self, command: CommandKind, request_id: RequestId) -> Option<PendingRequest> {
        match self.latest.get(&command) {
            Some(pending) if pending.request_id == request_id => self.latest.remove(&command),
            _ => None,
        }
    }

    pub fn latest(&self, command: CommandKind) -> Option<&PendingRequest> {
        self.latest.get(&command)
    }

    pub fn forget(&mut self, command: CommandKind) {
        self.latest.remove(&command);
    }
}

/// The state machine itself.
#[derive(Debug)]
pub struct ConnectionController {
    state: ConnectionState,
    config: TransportConfig,
    refresh_rate: RefreshRate,
    available_com_ports: Vec<String>,
    pending: PendingRequests,
    timings: ControllerTimings,
}

impl Default for ConnectionController {
    fn default() -> Self {
        Self::new(
            TransportConfig::default(),
            RefreshRate::default(),
            ControllerTimings::default(),
        )
    }
}

impl ConnectionController {
    pub fn new(config: TransportConfig, refresh_rate: RefreshRate, timings: ControllerTimings) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            config,
            refresh_rate,
            available_com_ports: Vec::new(),
            pending: PendingRequests::default(),
            timings,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn refresh_rate(&self) -> RefreshRate {
        self.refresh_rate
    }

    pub fn available_com_ports(&self) -> &[String] {
        &self.available_com_ports
    }

    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    /// Timers the current state requires.
    pub fn timer_plan(&self) -> TimerPlan {
        match self.state {
            ConnectionState::Disconnected => TimerPlan {
                retry: None,
                poll: None,
            },
            ConnectionState::Connecting => TimerPlan {
                retry: Some(self.timings.retry_interval),
                poll: Some(self.timings.connecting_poll_interval),
            },
            ConnectionState::Connected => TimerPlan {
                retry: None,
                poll: Some(self.timings.connected_poll_interval),
            },
        }
    }

    /// Startup calls: when the initial transport is serial the port list is
    /// fetched right away.
    pub fn initialize(&mut self) -> Vec<GatewayCall> {
        if self.config.is_serial() {
            vec![self.issue_list_com_ports()]
        } else {
            Vec::new()
        }
    }

    /// User pressed connect.
    pub fn start(&mut self) -> Result<Vec<GatewayCall>, ControllerError> {
        if self.state.is_active() {
            log::debug!("Start ignored, controller is already {:?}", self.state);
            return Ok(Vec::new());
        }
        self.config.validate().map_err(ControllerError::InvalidConfig)?;

        self.transition(ConnectionState::Connecting);
        Ok(vec![self.issue_start()])
    }

    /// User pressed disconnect. The transition is unconditional; the stop call
    /// is best-effort.
    pub fn stop(&mut self) -> Vec<GatewayCall> {
        if !self.state.is_active() {
            log::debug!("Stop ignored, controller is already disconnected");
            return Vec::new();
        }

        self.pending.forget(CommandKind::Start);
        self.pending.forget(CommandKind::GetStatus);
        self.transition(ConnectionState::Disconnected);

        let request_id = self.pending.issue(CommandKind::Stop);
        vec![GatewayCall::Stop { request_id }]
    }

    pub fn set_config(&mut self, config: TransportConfig) -> Result<Vec<GatewayCall>, ControllerError> {
        self.ensure_mutable()?;
        config.validate().map_err(ControllerError::InvalidConfig)?;

        let serial_selected = config.is_serial() && !self.config.is_serial();
        log::info!("Transport configuration set to {config}");
        self.config = config;

        if serial_selected {
            Ok(vec![self.issue_list_com_ports()])
        } else {
            Ok(Vec::new())
        }
    }

    pub fn set_refresh_rate(&mut self, refresh_rate: RefreshRate) -> Result<(), ControllerError> {
        self.ensure_mutable()?;
        log::info!("Refresh rate set to {refresh_rate}");
        self.refresh_rate = refresh_rate;
        Ok(())
    }

    /// Explicit port list refresh. Allowed in any state.
    pub fn refresh_com_ports(&mut self) -> Vec<GatewayCall> {
        vec![self.issue_list_com_ports()]
    }

    /// The connect-retry timer fired.
    pub fn retry_elapsed(&mut self) -> Vec<GatewayCall> {
        if self.state != ConnectionState::Connecting {
            return Vec::new();
        }
        log::debug!("Still connecting, re-issuing start");
        vec![self.issue_start()]
    }

    /// The status poll timer fired.
    pub fn poll_elapsed(&mut self) -> Vec<GatewayCall> {
        if !self.state.is_active() {
            return Vec::new();
        }
        let request_id = self.pending.issue(CommandKind::GetStatus);
        vec![GatewayCall::GetStatus { request_id }]
    }

    /// Feed a gateway reply back into the state machine.
    pub fn complete(&mut self, completion: GatewayCompletion) {
        match completion {
            GatewayCompletion::Start { request_id, result } => {
                if self.settle(CommandKind::Start, request_id).is_none() {
                    return;
                }
                if let Err(err) = result {
                    log::warn!("Start command {request_id} failed: {err}");
                }
            }
            GatewayCompletion::Stop { request_id, result } => {
                if self.settle(CommandKind::Stop, request_id).is_none() {
                    return;
                }
                if let Err(err) = result {
                    log::warn!("Stop command {request_id} failed: {err}");
                }
            }
            GatewayCompletion::Status { request_id, result } => {
                if self.settle(CommandKind::GetStatus, request_id).is_none() {
                    return;
                }
                let healthy = result.unwrap_or_else(|err| {
                    log::warn!("Status poll {request_id} failed: {err}");
                    false
                });
                self.apply_health(healthy);
            }
            GatewayCompletion::ComPorts { request_id, result } => {
                if self.settle(CommandKind::ListComPorts, request_id).is_none() {
                    return;
                }
                match result {
                    Ok(ports) => self.apply_com_ports(ports),
                    Err(err) => {
                        log::warn!("Listing serial ports ({request_id}) failed: {err}")
                    }
                }
            }
        }
    }

    fn apply_health(&mut self, healthy: bool) {
        match (self.state, healthy) {
            (ConnectionState::Connecting, true) => self.transition(ConnectionState::Connected),
            (ConnectionState::Connected, false) => self.transition(ConnectionState::Connecting),
            _ => {}
        }
    }

    fn apply_com_ports(&mut self, mut ports: Vec<String>) {
        ports.sort();
        ports.dedup();
        log::debug!("Available serial ports: {ports:?}");

        if self.state == ConnectionState::Disconnected {
            if let (TransportConfig::Serial(serial), Some(first)) = (&mut self.config, ports.first())
            {
                if !ports.contains(&serial.port) {
                    log::info!("Serial port '{}' not available, selecting {first}", serial.port);
                    serial.port = first.clone();
                }
            }
        }

        self.available_com_ports = ports;
    }

    fn ensure_mutable(&self) -> Result<(), ControllerError> {
        if self.state.is_active() {
            return Err(ControllerError::ConfigLocked { state: self.state });
        }
        Ok(())
    }

    fn settle(&mut self, command: CommandKind, request_id: RequestId) -> Option<PendingRequest> {
        let settled = self.pending.settle(command, request_id);
        match &settled {
            Some(pending) => log::trace!(
                "{command} reply {request_id} after {:?}",
                pending.issued_at.elapsed()
            ),
            None => log::debug!("Discarding stale {command} reply {request_id}"),
        }
        settled
    }

    fn issue_start(&mut self) -> GatewayCall {
        let request_id = self.pending.issue(CommandKind::Start);
        GatewayCall::Start {
            request_id,
            options: StartOptions {
                refresh_rate: self.refresh_rate,
                config: self.config.clone(),
            },
        }
    }

    fn issue_list_com_ports(&mut self) -> GatewayCall {
        let request_id = self.pending.issue(CommandKind::ListComPorts);
        GatewayCall::ListComPorts { request_id }
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            log::info!("Connection state {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::net::Ipv4Addr;

    use super::*;
    use crate::protocol::config::{SerialConfig, UdpConfig};

    fn serial(port: &str) -> TransportConfig {
        TransportConfig::Serial(SerialConfig {
            port: port.to_string(),
            baud_rate: 4800,
        })
    }

    fn status_id(calls: &[GatewayCall]) -> RequestId {
        match calls {
            [GatewayCall::GetStatus { request_id }] => *request_id,
            other => panic!("expected a single status call, got {other:?}"),
        }
    }

    #[test]
    fn test_start_from_default_issues_one_start() {
        let mut controller = ConnectionController::default();
        let calls = controller.start().unwrap();

        assert_eq!(controller.state(), ConnectionState::Connecting);
        assert_eq!(calls.len(), 1);
        match &calls[0] {
            GatewayCall::Start { options, .. } => {
                assert_eq!(options.refresh_rate, RefreshRate::Fast);
                assert_eq!(
                    options.config,
                    TransportConfig::Udp(UdpConfig {
                        port: 49002,
                        address: Ipv4Addr::BROADCAST,
                    })
                );
            }
            other => panic!("unexpected call {other:?}"),
        }
        assert_eq!(
            controller.timer_plan(),
            TimerPlan {
                retry: Some(Duration::from_millis(3000)),
                poll: Some(Duration::from_millis(500)),
            }
        );

        // a second start while connecting is a no-op
        assert!(controller.start().unwrap().is_empty());
    }

    #[test]
    fn test_healthy_status_connects_and_unhealthy_reconnects() {
        let mut controller = ConnectionController::default();
        controller.start().unwrap();

        let id = status_id(&controller.poll_elapsed());
        controller.complete(GatewayCompletion::Status {
            request_id: id,
            result: Ok(true),
        });
        assert_eq!(controller.state(), ConnectionState::Connected);
        assert_eq!(
            controller.timer_plan(),
            TimerPlan {
                retry: None,
                poll: Some(Duration::from_millis(3000)),
            }
        );
        assert!(controller.retry_elapsed().is_empty());

        let id = status_id(&controller.poll_elapsed());
        controller.complete(GatewayCompletion::Status {
            request_id: id,
            result: Ok(false),
        });
        assert_eq!(controller.state(), ConnectionState::Connecting);
        assert_eq!(
            controller.timer_plan(),
            TimerPlan {
                retry: Some(Duration::from_millis(3000)),
                poll: Some(Duration::from_millis(500)),
            }
        );
    }

    #[test]
    fn test_gateway_failure_counts_as_unhealthy() {
        let mut controller = ConnectionController::default();
        controller.start().unwrap();
        let id = status_id(&controller.poll_elapsed());
        controller.complete(GatewayCompletion::Status {
            request_id: id,
            result: Ok(true),
        });

        let id = status_id(&controller.poll_elapsed());
        controller.complete(GatewayCompletion::Status {
            request_id: id,
            result: Err(GatewayError::transport("connection refused")),
        });
        assert_eq!(controller.state(), ConnectionState::Connecting);

        let id = status_id(&controller.poll_elapsed());
        controller.complete(GatewayCompletion::Status {
            request_id: id,
            result: Err(GatewayError::protocol("expected boolean")),
        });
        assert_eq!(controller.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_superseded_status_reply_is_discarded() {
        let mut controller = ConnectionController::default();
        controller.start().unwrap();

        let first = status_id(&controller.poll_elapsed());
        let second = status_id(&controller.poll_elapsed());

        controller.complete(GatewayCompletion::Status {
            request_id: first,
            result: Ok(true),
        });
        assert_eq!(controller.state(), ConnectionState::Connecting);

        controller.complete(GatewayCompletion::Status {
            request_id: second,
            result: Ok(true),
        });
        assert_eq!(controller.state(), ConnectionState::Connected);

        // duplicate delivery of an already settled reply
        controller.complete(GatewayCompletion::Status {
            request_id: second,
            result: Ok(false),
        });
        assert_eq!(controller.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_stop_while_connecting_ignores_late_replies() {
        let mut controller = ConnectionController::default();
        let start_id = controller.start().unwrap()[0].request_id();
        let status = status_id(&controller.poll_elapsed());

        let calls = controller.stop();
        assert_eq!(controller.state(), ConnectionState::Disconnected);
        assert!(matches!(calls.as_slice(), [GatewayCall::Stop { .. }]));
        assert_eq!(
            controller.timer_plan(),
            TimerPlan {
                retry: None,
                poll: None,
            }
        );

        controller.complete(GatewayCompletion::Start {
            request_id: start_id,
            result: Ok(()),
        });
        controller.complete(GatewayCompletion::Status {
            request_id: status,
            result: Ok(true),
        });
        assert_eq!(controller.state(), ConnectionState::Disconnected);

        let stop_id = calls[0].request_id();
        controller.complete(GatewayCompletion::Stop {
            request_id: stop_id,
            result: Err(GatewayError::transport("timed out")),
        });
        assert_eq!(controller.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_stop_always_disconnects() {
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for _ in 0..200 {
            let mut controller = ConnectionController::default();
            let mut outstanding: Vec<GatewayCall> = Vec::new();

            for _ in 0..rng.random_range(1..20) {
                match rng.random_range(0..5) {
                    0 => outstanding.extend(controller.start().unwrap()),
                    1 => {
                        outstanding.extend(controller.stop());
                        assert_eq!(controller.state(), ConnectionState::Disconnected);
                    }
                    2 => outstanding.extend(controller.poll_elapsed()),
                    3 => outstanding.extend(controller.retry_elapsed()),
                    _ => {
                        if !outstanding.is_empty() {
                            let idx = rng.random_range(0..outstanding.len());
                            let call = outstanding.swap_remove(idx);
                            let healthy = rng.random_bool(0.7);
                            controller.complete(match call {
                                GatewayCall::Start { request_id, .. } => GatewayCompletion::Start {
                                    request_id,
                                    result: Ok(()),
                                },
                                GatewayCall::Stop { request_id } => GatewayCompletion::Stop {
                                    request_id,
                                    result: Err(GatewayError::transport("down")),
                                },
                                GatewayCall::GetStatus { request_id } => {
                                    GatewayCompletion::Status {
                                        request_id,
                                        result: Ok(healthy),
                                    }
                                }
                                GatewayCall::ListComPorts { request_id } => {
                                    GatewayCompletion::ComPorts {
                                        request_id,
                                        result: Ok(vec![]),
                                    }
                                }
                            });
                        }
                    }
                }
            }

            controller.stop();
            assert_eq!(controller.state(), ConnectionState::Disconnected);

            // replies still in flight cannot revive the connection
            for call in outstanding {
                if let GatewayCall::GetStatus { request_id } = call {
                    controller.complete(GatewayCompletion::Status {
                        request_id,
                        result: Ok(true),
                    });
                }
            }
            assert_eq!(controller.state(), ConnectionState::Disconnected);
        }
    }

    #[test]
    fn test_config_locked_while_active() {
        let mut controller = ConnectionController::default();
        controller.start().unwrap();

        assert_eq!(
            controller.set_config(serial("COM1")),
            Err(ControllerError::ConfigLocked {
                state: ConnectionState::Connecting
            })
        );
        assert!(controller.set_refresh_rate(RefreshRate::Slow).is_err());
        assert_eq!(controller.config(), &TransportConfig::default());
        assert_eq!(controller.refresh_rate(), RefreshRate::Fast);

        controller.stop();
        assert!(controller.set_refresh_rate(RefreshRate::Slow).is_ok());
        assert_eq!(controller.refresh_rate(), RefreshRate::Slow);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut controller = ConnectionController::default();
        let result = controller.set_config(TransportConfig::Udp(UdpConfig {
            port: 0,
            address: Ipv4Addr::BROADCAST,
        }));
        assert!(matches!(result, Err(ControllerError::InvalidConfig(_))));
        assert_eq!(controller.config(), &TransportConfig::default());
    }

    #[test]
    fn test_selecting_serial_lists_ports_and_defaults_selection() {
        let mut controller = ConnectionController::default();
        let calls = controller.set_config(serial("COM9")).unwrap();
        let request_id = match calls.as_slice() {
            [GatewayCall::ListComPorts { request_id }] => *request_id,
            other => panic!("expected a port listing, got {other:?}"),
        };

        controller.complete(GatewayCompletion::ComPorts {
            request_id,
            result: Ok(vec!["COM3".to_string(), "COM1".to_string()]),
        });
        assert_eq!(controller.available_com_ports(), ["COM1", "COM3"]);
        assert_eq!(controller.config(), &serial("COM1"));

        // switching serial -> serial does not list again
        assert!(controller.set_config(serial("COM3")).unwrap().is_empty());

        let request_id = controller.refresh_com_ports()[0].request_id();
        controller.complete(GatewayCompletion::ComPorts {
            request_id,
            result: Ok(vec!["COM4".to_string(), "COM3".to_string()]),
        });
        assert_eq!(controller.available_com_ports(), ["COM3", "COM4"]);
        assert_eq!(controller.config(), &serial("COM3"));
    }

    #[test]
    fn test_port_listing_failure_keeps_snapshot() {
        let mut controller = ConnectionController::new(
            serial("COM1"),
            RefreshRate::Fast,
            ControllerTimings::default(),
        );
        let request_id = controller.initialize()[0].request_id();
        controller.complete(GatewayCompletion::ComPorts {
            request_id,
            result: Ok(vec!["COM1".to_string()]),
        });

        let request_id = controller.refresh_com_ports()[0].request_id();
        controller.complete(GatewayCompletion::ComPorts {
            request_id,
            result: Err(GatewayError::transport("unreachable")),
        });
        assert_eq!(controller.available_com_ports(), ["COM1"]);
    }

    #[test]
    fn test_pending_requests_keep_latest_only() {
        let mut pending = PendingRequests::default();
        let first = pending.issue(CommandKind::GetStatus);
        let second = pending.issue(CommandKind::GetStatus);
        let ports = pending.issue(CommandKind::ListComPorts);

        assert_ne!(first, second);
        assert!(pending.settle(CommandKind::GetStatus, first).is_none());
        assert!(pending.settle(CommandKind::ListComPorts, second).is_none());
        assert_eq!(
            pending
                .settle(CommandKind::GetStatus, second)
                .map(|p| p.command),
            Some(CommandKind::GetStatus)
        );
        assert!(pending.latest(CommandKind::GetStatus).is_none());
        assert!(pending.latest(CommandKind::ListComPorts).is_some());
        assert!(pending.settle(CommandKind::ListComPorts, ports).is_some());
    }
}
