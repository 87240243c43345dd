/// Controller event loop
///
/// A single task owns the [`ConnectionController`] and is the only place its
/// state changes. It multiplexes presentation commands, the retry and poll
/// timers, and gateway completions. Gateway calls run as separate tasks and
/// report back through a queue, so the loop never blocks on the backend.
use std::{sync::Arc, time::Duration};

use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval_at, timeout, Instant, Interval, MissedTickBehavior},
};

use super::{
    bus::{ControllerCommand, ControllerSnapshot},
    controller::{ConnectionController, ControllerError, GatewayCall, GatewayCompletion},
    task_manager::spawn_task,
};
use crate::{
    api::gateway::{CommandGateway, GatewayError},
    protocol::config::{RefreshRate, TransportConfig},
};

/// Upper bound for a single gateway call before it counts as a transport failure.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Cloneable front door used by the presentation layer.
#[derive(Clone)]
pub struct ControllerHandle {
    commands: flume::Sender<ControllerCommand>,
    snapshots: watch::Receiver<ControllerSnapshot>,
}

impl ControllerHandle {
    pub fn start(&self) -> Result<(), ControllerError> {
        self.send(ControllerCommand::Start)
    }

    pub fn stop(&self) -> Result<(), ControllerError> {
        self.send(ControllerCommand::Stop)
    }

    pub fn refresh_com_ports(&self) -> Result<(), ControllerError> {
        self.send(ControllerCommand::RefreshComPorts)
    }

    /// Stop the event loop; a stop is issued first if a connection is active.
    pub fn shutdown(&self) -> Result<(), ControllerError> {
        self.send(ControllerCommand::Shutdown)
    }

    pub async fn set_config(&self, config: TransportConfig) -> Result<(), ControllerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(ControllerCommand::SetConfig(config, reply_tx))?;
        reply_rx.await.map_err(|_| ControllerError::Closed)?
    }

    pub async fn set_refresh_rate(&self, refresh_rate: RefreshRate) -> Result<(), ControllerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(ControllerCommand::SetRefreshRate(refresh_rate, reply_tx))?;
        reply_rx.await.map_err(|_| ControllerError::Closed)?
    }

    /// Current state as last published by the event loop.
    pub fn snapshot(&self) -> ControllerSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver woken on every published change.
    pub fn subscribe(&self) -> watch::Receiver<ControllerSnapshot> {
        self.snapshots.clone()
    }

    fn send(&self, command: ControllerCommand) -> Result<(), ControllerError> {
        self.commands
            .send(command)
            .map_err(|_| ControllerError::Closed)
    }
}

/// Spawn the event loop for `controller`, talking to `gateway`.
pub fn spawn_controller(
    gateway: Arc<dyn CommandGateway>,
    controller: ConnectionController,
) -> (ControllerHandle, JoinHandle<()>) {
    spawn_controller_with_timeout(gateway, controller, DEFAULT_CALL_TIMEOUT)
}

pub fn spawn_controller_with_timeout(
    gateway: Arc<dyn CommandGateway>,
    controller: ConnectionController,
    call_timeout: Duration,
) -> (ControllerHandle, JoinHandle<()>) {
    let (command_tx, command_rx) = flume::unbounded();
    let (completion_tx, completion_rx) = flume::unbounded();
    let (snapshot_tx, snapshot_rx) = watch::channel(snapshot_of(&controller));

    let event_loop = EventLoop {
        controller,
        gateway,
        call_timeout,
        completion_tx,
        snapshots: snapshot_tx,
        retry: None,
        poll: None,
    };
    let handle = spawn_task(event_loop.run(command_rx, completion_rx));

    (
        ControllerHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
        },
        handle,
    )
}

enum Event {
    Command(Option<ControllerCommand>),
    Completion(GatewayCompletion),
    RetryElapsed,
    PollElapsed,
}

struct EventLoop {
    controller: ConnectionController,
    gateway: Arc<dyn CommandGateway>,
    call_timeout: Duration,
    completion_tx: flume::Sender<GatewayCompletion>,
    snapshots: watch::Sender<ControllerSnapshot>,
    retry: Option<Interval>,
    poll: Option<Interval>,
}

impl EventLoop {
    async fn run(
        mut self,
        commands: flume::Receiver<ControllerCommand>,
        completions: flume::Receiver<GatewayCompletion>,
    ) {
        log::info!("Connection controller started");
        let calls = self.controller.initialize();
        self.dispatch(calls);

        loop {
            let before = self.controller.state();

            let event = tokio::select! {
                command = commands.recv_async() => Event::Command(command.ok()),
                Ok(completion) = completions.recv_async() => Event::Completion(completion),
                _ = next_tick(&mut self.retry) => Event::RetryElapsed,
                _ = next_tick(&mut self.poll) => Event::PollElapsed,
            };

            match event {
                Event::Command(Some(ControllerCommand::Shutdown)) | Event::Command(None) => {
                    self.shutdown().await;
                    break;
                }
                Event::Command(Some(command)) => self.handle_command(command),
                Event::Completion(completion) => self.controller.complete(completion),
                Event::RetryElapsed => {
                    let calls = self.controller.retry_elapsed();
                    self.dispatch(calls);
                }
                Event::PollElapsed => {
                    let calls = self.controller.poll_elapsed();
                    self.dispatch(calls);
                }
            }

            if self.controller.state() != before {
                self.reset_timers();
            }
            self.publish();
        }

        log::info!("Connection controller stopped");
    }

    fn handle_command(&mut self, command: ControllerCommand) {
        log::debug!("Controller received {command:?}");
        match command {
            ControllerCommand::Start => match self.controller.start() {
                Ok(calls) => self.dispatch(calls),
                Err(err) => log::warn!("Cannot start: {err}"),
            },
            ControllerCommand::Stop => {
                let calls = self.controller.stop();
                self.dispatch(calls);
            }
            ControllerCommand::SetConfig(config, reply) => {
                let result = self.controller.set_config(config).map(|calls| {
                    self.dispatch(calls);
                });
                if reply.send(result).is_err() {
                    log::debug!("SetConfig caller went away before the reply");
                }
            }
            ControllerCommand::SetRefreshRate(refresh_rate, reply) => {
                let result = self.controller.set_refresh_rate(refresh_rate);
                if reply.send(result).is_err() {
                    log::debug!("SetRefreshRate caller went away before the reply");
                }
            }
            ControllerCommand::RefreshComPorts => {
                let calls = self.controller.refresh_com_ports();
                self.dispatch(calls);
            }
            ControllerCommand::Shutdown => {}
        }
    }

    /// Stop the connection and wait for the stop call so it is not lost when
    /// the process exits right after.
    async fn shutdown(&mut self) {
        self.retry = None;
        self.poll = None;
        for call in self.controller.stop() {
            let completion = execute(self.gateway.as_ref(), call, self.call_timeout).await;
            self.controller.complete(completion);
        }
        self.publish();
    }

    fn dispatch(&self, calls: Vec<GatewayCall>) {
        for call in calls {
            log::debug!("Issuing {} ({})", call.kind(), call.request_id());
            let gateway = self.gateway.clone();
            let completions = self.completion_tx.clone();
            let call_timeout = self.call_timeout;
            spawn_task(async move {
                let completion = execute(gateway.as_ref(), call, call_timeout).await;
                if completions.send(completion).is_err() {
                    log::debug!("Controller gone, dropping gateway completion");
                }
            });
        }
    }

    /// Replace the running timers with the ones the current state requires.
    fn reset_timers(&mut self) {
        let plan = self.controller.timer_plan();
        self.retry = plan.retry.map(repeating);
        self.poll = plan.poll.map(repeating);
    }

    fn publish(&self) {
        let next = snapshot_of(&self.controller);
        self.snapshots.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

async fn execute(
    gateway: &dyn CommandGateway,
    call: GatewayCall,
    call_timeout: Duration,
) -> GatewayCompletion {
    match call {
        GatewayCall::Start {
            request_id,
            options,
        } => GatewayCompletion::Start {
            request_id,
            result: bounded(call_timeout, gateway.start(request_id, options)).await,
        },
        GatewayCall::Stop { request_id } => GatewayCompletion::Stop {
            request_id,
            result: bounded(call_timeout, gateway.stop(request_id)).await,
        },
        GatewayCall::GetStatus { request_id } => GatewayCompletion::Status {
            request_id,
            result: bounded(call_timeout, gateway.get_status(request_id)).await,
        },
        GatewayCall::ListComPorts { request_id } => GatewayCompletion::ComPorts {
            request_id,
            result: bounded(call_timeout, gateway.list_available_com_ports(request_id)).await,
        },
    }
}

async fn bounded<T>(
    limit: Duration,
    call: impl std::future::Future<Output = Result<T, GatewayError>>,
) -> Result<T, GatewayError> {
    timeout(limit, call)
        .await
        .unwrap_or_else(|_| Err(GatewayError::transport(format!("no reply within {limit:?}"))))
}

fn repeating(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn snapshot_of(controller: &ConnectionController) -> ControllerSnapshot {
    ControllerSnapshot {
        state: controller.state(),
        config: controller.config().clone(),
        refresh_rate: controller.refresh_rate(),
        available_com_ports: controller.available_com_ports().to_vec(),
    }
}
