//! Admin-plane HTTP server: rule CRUD, configuration, analytics queries
//! and the WebSocket push channel.
//!
//! Bound to loopback only; there is no further authentication on this
//! surface.

use super::api::{AdminApi, AdminError, BodyLimitPatch, QueuePatch};
use super::ws;
use crate::analytics::{AnalyticsBroadcaster, AnalyticsService, TrafficLogWriter};
use crate::gateway::{empty_body, full_body, BoxedBody, ADMIN_BASE_PATH};
use crate::gateway::{GatewayError, GatewayResult};
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Cap on admin request bodies; rules are small.
const MAX_ADMIN_BODY: usize = 256 * 1024;

/// Shared state of the admin plane.
pub struct AdminState {
    /// Rule and settings mutation.
    pub api: AdminApi,
    /// Analytics read side.
    pub analytics: Arc<AnalyticsService>,
    /// Decision log reader.
    pub traffic_log: Arc<TrafficLogWriter>,
    /// Push channel registry.
    pub broadcaster: Arc<AnalyticsBroadcaster>,
}

impl std::fmt::Debug for AdminState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminState").finish()
    }
}

/// The admin HTTP server.
pub struct AdminServer {
    addr: SocketAddr,
    state: Arc<AdminState>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl std::fmt::Debug for AdminServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminServer")
            .field("addr", &self.addr)
            .field("running", &self.shutdown_tx.is_some())
            .finish()
    }
}

impl AdminServer {
    /// Create a server for the given loopback address.
    #[must_use]
    pub fn new(addr: SocketAddr, state: Arc<AdminState>) -> Self {
        Self {
            addr,
            state,
            shutdown_tx: None,
        }
    }

    /// Bind and serve until [`AdminServer::stop`]. Returns the bound
    /// address.
    pub async fn start(&mut self) -> GatewayResult<SocketAddr> {
        if self.shutdown_tx.is_some() {
            return Err(GatewayError::AlreadyRunning);
        }

        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| GatewayError::BindError(format!("{}: {e}", self.addr)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| GatewayError::BindError(e.to_string()))?;
        info!(addr = %local_addr, "admin server listening");

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, _remote)) => {
                                let state = Arc::clone(&state);
                                tokio::spawn(async move {
                                    let io = TokioIo::new(stream);
                                    let service = service_fn(move |req| {
                                        let state = Arc::clone(&state);
                                        async move {
                                            Ok::<_, std::convert::Infallible>(route(&state, req).await)
                                        }
                                    });
                                    if let Err(e) = http1::Builder::new()
                                        .serve_connection(io, service)
                                        .with_upgrades()
                                        .await
                                    {
                                        debug!("admin connection error: {e}");
                                    }
                                });
                            },
                            Err(e) => error!("admin accept error: {e}"),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("admin server shutting down");
                        break;
                    }
                }
            }
        });

        Ok(local_addr)
    }

    /// Stop accepting connections.
    pub async fn stop(&mut self) -> GatewayResult<()> {
        match self.shutdown_tx.take() {
            Some(tx) => {
                let _ = tx.send(()).await;
                Ok(())
            },
            None => Err(GatewayError::NotRunning),
        }
    }
}

/// Dispatch one admin request.
async fn route(state: &Arc<AdminState>, req: Request<Incoming>) -> Response<BoxedBody> {
    let path = req.uri().path().to_string();
    let Some(rest) = path.strip_prefix(ADMIN_BASE_PATH) else {
        return status(StatusCode::NOT_FOUND);
    };
    let rest = rest.trim_end_matches('/').to_string();
    let method = req.method().clone();
    debug!(%method, path = %rest, "admin request");

    match (method, rest.as_str()) {
        (Method::GET, "/ws/analytics") if ws::is_upgrade_request(&req) => ws::handle_upgrade(
            req,
            Arc::clone(&state.analytics),
            Arc::clone(&state.broadcaster),
        ),

        (Method::GET, "/rules") => respond(state.api.list_rules().await),
        (Method::GET, "/rules/active") => respond(state.api.list_active_rules().await),
        (Method::POST, "/rules") => match read_json(req).await {
            Ok(rule) => respond(state.api.create_rule(rule).await),
            Err(response) => response,
        },
        (Method::POST, "/rules/refresh") => {
            let count = state.api.refresh().await;
            json(StatusCode::OK, &serde_json::json!({ "activeRules": count }))
        },

        (Method::GET, "/config") => match state.api.settings().all().await {
            Ok(entries) => {
                let map: serde_json::Map<String, serde_json::Value> = entries
                    .into_iter()
                    .map(|(k, v)| (k, serde_json::Value::String(v)))
                    .collect();
                json(StatusCode::OK, &map)
            },
            Err(err) => error_response(&AdminError::Store(err)),
        },

        (Method::GET, "/analytics/summary") => match state.analytics.summary().await {
            Ok(summary) => json(StatusCode::OK, &summary),
            Err(err) => error_response(&AdminError::Store(err)),
        },
        (Method::GET, "/analytics/timeseries") => {
            let hours = query_param(&req, "hours").unwrap_or(24).clamp(1, 168);
            match state.analytics.time_series(hours).await {
                Ok(points) => json(StatusCode::OK, &points),
                Err(err) => error_response(&AdminError::Store(err)),
            }
        },
        (Method::GET, "/analytics/traffic") => {
            let limit = query_param(&req, "limit").unwrap_or(100).clamp(1, 10_000);
            match state.traffic_log.recent(limit as u64).await {
                Ok(entries) => json(StatusCode::OK, &entries),
                Err(err) => error_response(&AdminError::Store(err)),
            }
        },

        (Method::POST, rest) if rest.starts_with("/config/") => {
            let key = rest.trim_start_matches("/config/").to_string();
            if key.is_empty() || key.contains('/') {
                status(StatusCode::NOT_FOUND)
            } else {
                handle_config_update(state, &key, req).await
            }
        },

        (method, rest) => route_rule_item(state, method, rest, req).await,
    }
}

/// `/rules/{id}` and its sub-resources.
async fn route_rule_item(
    state: &Arc<AdminState>,
    method: Method,
    rest: &str,
    req: Request<Incoming>,
) -> Response<BoxedBody> {
    let Some(tail) = rest.strip_prefix("/rules/") else {
        return status(StatusCode::NOT_FOUND);
    };

    let mut segments = tail.splitn(2, '/');
    let id: Uuid = match segments.next().unwrap_or("").parse() {
        Ok(id) => id,
        Err(_) => return status(StatusCode::NOT_FOUND),
    };
    let sub = segments.next();

    match (method, sub) {
        (Method::GET, None) => respond(state.api.get_rule(id).await),
        (Method::PUT, None) => match read_json(req).await {
            Ok(rule) => respond(state.api.replace_rule(id, rule).await),
            Err(response) => response,
        },
        (Method::DELETE, None) => match state.api.delete_rule(id).await {
            Ok(()) => status(StatusCode::NO_CONTENT),
            Err(err) => error_response(&err),
        },
        (Method::PATCH, Some("queue")) => match read_json::<QueuePatch>(req).await {
            Ok(patch) => respond(state.api.patch_queue(id, patch).await),
            Err(response) => response,
        },
        (Method::PATCH, Some("body-limit")) => match read_json::<BodyLimitPatch>(req).await {
            Ok(patch) => respond(state.api.patch_body_limit(id, patch).await),
            Err(response) => response,
        },
        _ => status(StatusCode::NOT_FOUND),
    }
}

/// Body of `POST /config/{key}`.
#[derive(Debug, Deserialize)]
struct ConfigUpdate {
    value: String,
}

/// Handle `POST /config/{key}`.
async fn handle_config_update(
    state: &Arc<AdminState>,
    key: &str,
    req: Request<Incoming>,
) -> Response<BoxedBody> {
    match read_json::<ConfigUpdate>(req).await {
        Ok(update) => match state.api.settings().update(key, &update.value).await {
            Ok(()) => json(
                StatusCode::OK,
                &serde_json::json!({ "key": key, "value": update.value }),
            ),
            Err(err) => error_response(&AdminError::Store(err)),
        },
        Err(response) => response,
    }
}

fn respond<T: serde::Serialize>(result: Result<T, AdminError>) -> Response<BoxedBody> {
    match result {
        Ok(value) => json(StatusCode::OK, &value),
        Err(err) => error_response(&err),
    }
}

fn error_response(err: &AdminError) -> Response<BoxedBody> {
    let status_code =
        StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    json(status_code, &serde_json::json!({ "error": err.to_string() }))
}

async fn read_json<T: serde::de::DeserializeOwned>(
    req: Request<Incoming>,
) -> Result<T, Response<BoxedBody>> {
    let bytes = read_body(req).await?;
    serde_json::from_slice(&bytes)
        .map_err(|e| error_response(&AdminError::InvalidBody(e.to_string())))
}

async fn read_body(req: Request<Incoming>) -> Result<Bytes, Response<BoxedBody>> {
    Limited::new(req.into_body(), MAX_ADMIN_BODY)
        .collect()
        .await
        .map(http_body_util::Collected::to_bytes)
        .map_err(|_| status(StatusCode::PAYLOAD_TOO_LARGE))
}

fn query_param(req: &Request<Incoming>, name: &str) -> Option<i64> {
    req.uri().query()?.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name).then(|| value.parse().ok()).flatten()
    })
}

fn status(code: StatusCode) -> Response<BoxedBody> {
    let mut response = Response::new(empty_body());
    *response.status_mut() = code;
    response
}

fn json<T: serde::Serialize>(code: StatusCode, value: &T) -> Response<BoxedBody> {
    let body = serde_json::to_vec(value).unwrap_or_default();
    let mut response = Response::new(full_body(body));
    *response.status_mut() = code;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, http::HeaderValue::from_static("application/json"));
    response
}
