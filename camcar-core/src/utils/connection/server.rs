//! HTTP Server Module
//!
//! This module defines the control server using the `picoserve` framework.
//! `/controls` decodes the query in the worker, forwards validated commands to
//! the controller task over [`CONTROL_LINK`] and answers with a bare status
//! line. `/status` reports the last published actuator state as JSON.

use embassy_net::Stack;
use embassy_time::Duration;
use embedded_io_async::Read;
use picoserve::{
    extract::FromRequest,
    request::{RequestBody, RequestParts},
    response::{IntoResponse, Json, Response, StatusCode},
    Router,
};

use crate::utils::{
    controllers::{ControlLink, CONTROL_LINK},
    controls::{decode, ControlCommand, ControlError, ControlStatus, CONTROL_CONTENT_TYPE},
};

impl From<ControlStatus> for StatusCode {
    fn from(status: ControlStatus) -> Self {
        match status {
            ControlStatus::Ok => StatusCode::OK,
            ControlStatus::BadRequest => StatusCode::BAD_REQUEST,
            ControlStatus::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Decoded `/controls` query.
///
/// Decoding never rejects the request at the extractor level; the handler
/// turns a decode error into the matching status itself.
pub struct ControlQuery(pub Result<ControlCommand, ControlError>);

impl<'r, S> FromRequest<'r, S> for ControlQuery {
    type Rejection = core::convert::Infallible;

    async fn from_request<R: Read>(
        _state: &'r S,
        parts: RequestParts<'r>,
        _body: RequestBody<'r, R>,
    ) -> Result<Self, Self::Rejection> {
        let query = parts.query().map(|query| query.0);
        Ok(ControlQuery(decode(query)))
    }
}

/// Resolve a decoded query to its terminal status, submitting it over `link`.
pub async fn dispatch(
    link: &ControlLink,
    query: ControlQuery,
) -> ControlStatus {
    let command = match query.0 {
        Ok(command) => command,
        Err(error) => {
            let status = error.status();
            match status {
                ControlStatus::InternalServerError => {
                    tracing::error!(?error, "control query could not be parsed")
                }
                _ => tracing::warn!(?error, "control query rejected"),
            }
            return status;
        }
    };

    match link.submit(command).await {
        Ok(state) => {
            tracing::info!(?command, ?state, "control applied");
            ControlStatus::Ok
        }
        Err(_) => ControlStatus::InternalServerError,
    }
}

fn status_response(status: ControlStatus) -> impl IntoResponse {
    Response::new(StatusCode::from(status), "")
        .with_headers([("Content-Type", CONTROL_CONTENT_TYPE)])
}

/// Creates the control server and serves forever.
pub async fn run(
    id: usize,
    port: u16,
    stack: Stack<'static>,
    config: Option<&'static picoserve::Config<Duration>>,
) -> ! {
    let default_config = picoserve::Config::new(picoserve::Timeouts {
        start_read_request: Some(Duration::from_secs(5)),
        persistent_start_read_request: None,
        read_request: Some(Duration::from_secs(1)),
        write: Some(Duration::from_secs(5)),
    });

    let config = config.unwrap_or(&default_config);

    let router = Router::new()
        // Single command per request, status line only
        .route(
            "/controls",
            picoserve::routing::get(|query: ControlQuery| async move {
                status_response(dispatch(&CONTROL_LINK, query).await)
            }),
        )
        .route(
            "/status",
            picoserve::routing::get(|| async { Json(CONTROL_LINK.snapshot()) }),
        );

    if let Some(ip_cfg) = stack.config_v4() {
        tracing::info!("Starting control server at {}:{}", ip_cfg.address, port);
    } else {
        tracing::warn!(
            "Starting control server on port {port}, but no IPv4 address is assigned yet!"
        );
    }

    let (mut rx_buffer, mut tx_buffer, mut http_buffer) = ([0; 1024], [0; 1024], [0; 2048]);

    picoserve::listen_and_serve_with_state(
        id,
        &router,
        config,
        stack,
        port,
        &mut rx_buffer,
        &mut tx_buffer,
        &mut http_buffer,
        &(),
    )
    .await
}
