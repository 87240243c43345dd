use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use super::gateway::{CommandGateway, GatewayError};
use crate::{
    backend::Backend,
    core::task_manager::spawn_blocking_task,
    protocol::{
        command::{CommandKind, RequestId},
        config::StartOptions,
    },
};

/// Gateway to a backend living in this process.
///
/// Backend calls may block on sockets, serial ports or thread joins, so each
/// one runs on the blocking pool.
#[derive(Clone)]
pub struct LocalGateway {
    backend: Arc<Mutex<Backend>>,
}

impl LocalGateway {
    pub fn new(backend: Backend) -> Self {
        Self::shared(Arc::new(Mutex::new(backend)))
    }

    pub fn shared(backend: Arc<Mutex<Backend>>) -> Self {
        Self { backend }
    }

    async fn call<T, F>(
        &self,
        command: CommandKind,
        request_id: RequestId,
        func: F,
    ) -> Result<T, GatewayError>
    where
        F: FnOnce(&mut Backend) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        log::debug!("Backend handling {command} ({request_id})");
        let backend = self.backend.clone();
        spawn_blocking_task(move || func(&mut backend.lock()))
            .await
            .map_err(|err| GatewayError::transport(format!("backend task failed: {err}")))?
            .map_err(|err| {
                log::warn!("Backend rejected {command} ({request_id}): {err:#}");
                GatewayError::rejected(format!("{err:#}"))
            })
    }
}

#[async_trait]
impl CommandGateway for LocalGateway {
    async fn start(&self, request_id: RequestId, options: StartOptions) -> Result<(), GatewayError> {
        self.call(CommandKind::Start, request_id, move |backend| {
            backend.start(options)
        })
        .await
    }

    async fn stop(&self, request_id: RequestId) -> Result<(), GatewayError> {
        self.call(CommandKind::Stop, request_id, |backend| {
            backend.stop();
            Ok(())
        })
        .await
    }

    async fn get_status(&self, request_id: RequestId) -> Result<bool, GatewayError> {
        self.call(CommandKind::GetStatus, request_id, |backend| Ok(backend.status()))
            .await
    }

    async fn list_available_com_ports(
        &self,
        request_id: RequestId,
    ) -> Result<Vec<String>, GatewayError> {
        self.call(CommandKind::ListComPorts, request_id, |backend| {
            backend.list_available_com_ports()
        })
        .await
    }
}
