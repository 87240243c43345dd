/// HTTP binding of the command surface
///
/// Each command is a `POST /cmd_<name>` with a JSON body carrying the request
/// id. Success replies `200 {"data": ...}`; a command the backend refused
/// replies `500 {"message": "..."}`.
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::{de::DeserializeOwned, Serialize};
use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use super::gateway::{CommandGateway, GatewayError};
use crate::{
    core::task_manager::spawn_blocking_task,
    protocol::{
        command::{CommandError, CommandKind, CommandResponse, RequestEnvelope, RequestId, StartRequest},
        config::StartOptions,
    },
};

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

type Shared = Arc<dyn CommandGateway>;
type Reply<T> = Result<Json<CommandResponse<T>>, (StatusCode, Json<CommandError>)>;

fn reply<T>(command: CommandKind, result: Result<T, GatewayError>) -> Reply<T> {
    result.map(|data| Json(CommandResponse::new(data))).map_err(|err| {
        log::warn!("HTTP {command} failed: {err}");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(CommandError::new(err.message())),
        )
    })
}

async fn handle_start(State(gateway): State<Shared>, Json(body): Json<StartRequest>) -> Reply<()> {
    log::debug!("HTTP start ({}) with {}", body.request_id, body.options.config);
    reply(
        CommandKind::Start,
        gateway.start(body.request_id, body.options).await,
    )
}

async fn handle_stop(State(gateway): State<Shared>, Json(body): Json<RequestEnvelope>) -> Reply<()> {
    reply(CommandKind::Stop, gateway.stop(body.request_id).await)
}

async fn handle_get_status(
    State(gateway): State<Shared>,
    Json(body): Json<RequestEnvelope>,
) -> Reply<bool> {
    reply(CommandKind::GetStatus, gateway.get_status(body.request_id).await)
}

async fn handle_list_com_ports(
    State(gateway): State<Shared>,
    Json(body): Json<RequestEnvelope>,
) -> Reply<Vec<String>> {
    reply(
        CommandKind::ListComPorts,
        gateway.list_available_com_ports(body.request_id).await,
    )
}

/// Router exposing `gateway` under the command endpoints.
pub fn router(gateway: Shared) -> Router {
    Router::new()
        .route(&CommandKind::Start.endpoint(), post(handle_start))
        .route(&CommandKind::Stop.endpoint(), post(handle_stop))
        .route(&CommandKind::GetStatus.endpoint(), post(handle_get_status))
        .route(
            &CommandKind::ListComPorts.endpoint(),
            post(handle_list_com_ports),
        )
        .with_state(gateway)
}

/// Serve `gateway` on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: tokio::net::TcpListener,
    gateway: Shared,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = listener.local_addr()?;
    log::info!("Command server listening on {addr}");

    axum::serve(listener, router(gateway))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| anyhow!("HTTP server error: {}", e))?;

    log::info!("Command server on {addr} stopped");
    Ok(())
}

/// Bind `addr` and serve `gateway` on it.
pub async fn bind_and_serve(
    addr: SocketAddr,
    gateway: Shared,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow!("Failed to bind HTTP server to {}: {}", addr, e))?;
    serve(listener, gateway, shutdown).await
}

/// Gateway to a backend reached over HTTP.
#[derive(Clone)]
pub struct HttpGateway {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_timeout(base_url, DEFAULT_HTTP_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            agent,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B, T>(&self, command: CommandKind, body: B) -> Result<T, GatewayError>
    where
        B: Serialize + Send + 'static,
        T: DeserializeOwned + Send + 'static,
    {
        let url = format!("{}{}", self.base_url, command.endpoint());
        let agent = self.agent.clone();
        spawn_blocking_task(move || post_blocking(&agent, &url, &body))
            .await
            .map_err(|err| GatewayError::transport(format!("request task failed: {err}")))?
    }
}

fn post_blocking<B: Serialize, T: DeserializeOwned>(
    agent: &ureq::Agent,
    url: &str,
    body: &B,
) -> Result<T, GatewayError> {
    let mut response = agent.post(url).send_json(body).map_err(|err| match err {
        ureq::Error::Json(err) => GatewayError::protocol(format!("cannot encode request: {err}")),
        err => GatewayError::transport(format!("{url}: {err}")),
    })?;

    let status = response.status();
    let text = response
        .body_mut()
        .read_to_string()
        .map_err(|err| GatewayError::transport(format!("{url}: {err}")))?;

    decode_reply(status.as_u16(), &text)
}

/// Turn an HTTP status and body into the command outcome.
pub(crate) fn decode_reply<T: DeserializeOwned>(status: u16, body: &str) -> Result<T, GatewayError> {
    if (200..300).contains(&status) {
        return serde_json::from_str::<CommandResponse<T>>(body)
            .map(|reply| reply.data)
            .map_err(|err| GatewayError::protocol(format!("unexpected reply body: {err}")));
    }

    match serde_json::from_str::<CommandError>(body) {
        Ok(error) => Err(GatewayError::rejected(error.message)),
        Err(_) => Err(GatewayError::protocol(format!(
            "unexpected HTTP status {status}"
        ))),
    }
}

#[async_trait]
impl CommandGateway for HttpGateway {
    async fn start(&self, request_id: RequestId, options: StartOptions) -> Result<(), GatewayError> {
        self.post(CommandKind::Start, StartRequest { request_id, options })
            .await
    }

    async fn stop(&self, request_id: RequestId) -> Result<(), GatewayError> {
        self.post(CommandKind::Stop, RequestEnvelope { request_id })
            .await
    }

    async fn get_status(&self, request_id: RequestId) -> Result<bool, GatewayError> {
        self.post(CommandKind::GetStatus, RequestEnvelope { request_id })
            .await
    }

    async fn list_available_com_ports(
        &self,
        request_id: RequestId,
    ) -> Result<Vec<String>, GatewayError> {
        self.post(CommandKind::ListComPorts, RequestEnvelope { request_id })
            .await
    }
}
