//! Public data-plane server: port guard, token endpoints, rate limiting,
//! anti-bot validation and upstream forwarding.

use super::error::{GatewayError, GatewayResult};
use super::proxy::UpstreamProxy;
use crate::analytics::{DecisionCounters, TrafficLogWriter};
use crate::antibot::{challenge, AntiBotValidator, ChallengeKind, TOKEN_CHALLENGE_COOKIE};
use crate::limiter::{RateLimiterService, RequestIdentity};
use crate::model::{Decision, TrafficLogEntry};
use crate::settings::SettingsService;
use bytes::Bytes;
use chrono::Utc;
use http::header::{CONTENT_TYPE, HOST, SET_COOKIE};
use http::{HeaderMap, Method, Request, Response, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Admin base path; requests for it on the public port are refused.
pub const ADMIN_BASE_PATH: &str = "/poormansRateLimit/api/admin";

/// Marker header on queued or queue-rejected responses.
pub const QUEUED_HEADER: &str = "X-RateLimit-Queued";
/// Applied delay on queued responses, in milliseconds.
pub const DELAY_HEADER: &str = "X-RateLimit-Delay-Ms";
/// Anti-bot rejection reason.
pub const REJECTION_REASON_HEADER: &str = "X-Rejection-Reason";
/// Marker header on idempotency conflicts.
pub const DUPLICATE_HEADER: &str = "X-Duplicate-Request";

/// Unified response body type for the data plane.
pub type BoxedBody = BoxBody<Bytes, hyper::Error>;

/// A complete body from a byte buffer.
#[must_use]
pub fn full_body(bytes: impl Into<Bytes>) -> BoxedBody {
    Full::new(bytes.into()).map_err(|never| match never {}).boxed()
}

/// An empty body.
#[must_use]
pub fn empty_body() -> BoxedBody {
    full_body(Bytes::new())
}

/// Everything the request handler needs, shared across connections.
pub struct GatewayState {
    /// Runtime-tunable settings.
    pub settings: Arc<SettingsService>,
    /// The rate limiter.
    pub limiter: Arc<RateLimiterService>,
    /// The anti-bot validator.
    pub antibot: Arc<AntiBotValidator>,
    /// Decision log writer.
    pub traffic_log: Arc<TrafficLogWriter>,
    /// In-memory allowed/blocked counters for the aggregator.
    pub counters: Arc<DecisionCounters>,
    /// Upstream client.
    pub proxy: UpstreamProxy,
    /// Fallback upstream when no matched rule names one.
    pub default_upstream: Option<String>,
    /// Hard cap on buffered write bodies.
    pub max_body_bytes: usize,
}

impl std::fmt::Debug for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayState")
            .field("default_upstream", &self.default_upstream)
            .field("max_body_bytes", &self.max_body_bytes)
            .finish()
    }
}

/// The public HTTP server.
pub struct GatewayServer {
    addr: SocketAddr,
    state: Arc<GatewayState>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl std::fmt::Debug for GatewayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayServer")
            .field("addr", &self.addr)
            .field("running", &self.shutdown_tx.is_some())
            .finish()
    }
}

impl GatewayServer {
    /// Create a server for the given address and shared state.
    #[must_use]
    pub fn new(addr: SocketAddr, state: Arc<GatewayState>) -> Self {
        Self {
            addr,
            state,
            shutdown_tx: None,
        }
    }

    /// Bind the listener and start serving until [`GatewayServer::stop`].
    ///
    /// Returns the actual bound address (useful with port 0).
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
        info!(addr = %local_addr, "gateway listening");

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, remote)) => {
                                let state = Arc::clone(&state);
                                tokio::spawn(async move {
                                    let io = TokioIo::new(stream);
                                    let client_ip = remote.ip().to_string();
                                    let service = service_fn(move |req| {
                                        let state = Arc::clone(&state);
                                        let client_ip = client_ip.clone();
                                        async move {
                                            Ok::<_, std::convert::Infallible>(
                                                handle_request(&state, req, &client_ip).await,
                                            )
                                        }
                                    });
                                    if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                        debug!("connection error: {e}");
                                    }
                                });
                            },
                            Err(e) => error!("accept error: {e}"),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("gateway shutting down");
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

/// Run one request through the filter chain.
///
/// Stage order is fixed: port guard, token endpoints, body capture,
/// rate limit, anti-bot, proxy. Every terminal decision writes one
/// decision log entry and bumps the in-memory counters.
pub async fn handle_request<B>(
    state: &GatewayState,
    req: Request<B>,
    client_ip: &str,
) -> Response<BoxedBody>
where
    B: hyper::body::Body,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req
        .uri()
        .path_and_query()
        .map_or_else(|| path.clone(), |pq| pq.to_string());

    // Port guard: the admin surface does not exist on this port.
    if path.starts_with(ADMIN_BASE_PATH) {
        debug!(%path, "refusing admin path on the public port");
        return status_response(StatusCode::NOT_FOUND);
    }

    if method == Method::GET && path == "/api/tokens/form" {
        return issue_token_response(state).await;
    }
    if method == Method::GET && path == "/api/tokens/challenge" {
        return challenge_response(state, &path).await;
    }

    let is_write = matches!(method, Method::POST | Method::PUT | Method::PATCH);
    let (parts, body) = req.into_parts();
    let host = host_of(&parts.headers);

    // Body capture: buffered once, observed by both the identifier
    // resolver and the upstream.
    let body_bytes = if is_write {
        match buffer_body(body, state.max_body_bytes).await {
            Ok(bytes) => bytes,
            Err(GatewayError::BodyTooLarge { .. }) => {
                return status_response(StatusCode::PAYLOAD_TOO_LARGE);
            },
            Err(err) => {
                debug!(error = %err, "failed to read request body");
                return status_response(StatusCode::BAD_REQUEST);
            },
        }
    } else {
        Bytes::new()
    };

    let identity = RequestIdentity {
        headers: &parts.headers,
        client_ip,
        body: is_write.then(|| body_bytes.as_ref()),
    };

    let outcome = state
        .limiter
        .check(&identity, &path, method.as_str(), host.as_deref())
        .await;

    if !outcome.allowed {
        state.counters.record_blocked();
        log_decision(
            state,
            &method,
            &path,
            host,
            client_ip,
            &outcome.identifier,
            Decision::Blocked,
            StatusCode::TOO_MANY_REQUESTS.as_u16(),
            0,
            outcome.rule_ids.clone(),
        )
        .await;

        let mut response = status_response(StatusCode::TOO_MANY_REQUESTS);
        if outcome.queued {
            insert_header(&mut response, QUEUED_HEADER, "true");
        }
        return response;
    }

    if is_write && state.settings.get_bool("antibot-enabled", true).await {
        if let Err(rejection) = state.antibot.validate(&parts.headers, client_ip).await {
            state.counters.record_blocked();
            log_decision(
                state,
                &method,
                &path,
                host,
                client_ip,
                &outcome.identifier,
                Decision::RejectedByAntibot,
                rejection.status(),
                0,
                outcome.rule_ids.clone(),
            )
            .await;

            let status = StatusCode::from_u16(rejection.status())
                .unwrap_or(StatusCode::FORBIDDEN);
            let mut response = status_response(status);
            if status == StatusCode::CONFLICT {
                insert_header(&mut response, DUPLICATE_HEADER, "true");
            } else {
                insert_header(&mut response, REJECTION_REASON_HEADER, rejection.reason());
            }
            return response;
        }
    }

    let decision = if outcome.delay_ms > 0 {
        Decision::Queued
    } else {
        Decision::Allowed
    };
    state.counters.record_allowed();
    log_decision(
        state,
        &method,
        &path,
        host,
        client_ip,
        &outcome.identifier,
        decision,
        StatusCode::OK.as_u16(),
        outcome.delay_ms,
        outcome.rule_ids.clone(),
    )
    .await;

    if outcome.delay_ms > 0 {
        debug!(delay_ms = outcome.delay_ms, "delaying request before forwarding");
        tokio::time::sleep(Duration::from_millis(outcome.delay_ms)).await;
    }

    let target = outcome
        .target_uri
        .as_deref()
        .or(state.default_upstream.as_deref());
    let Some(target) = target else {
        debug!(%path, "no upstream target for request");
        return status_response(StatusCode::BAD_GATEWAY);
    };

    match state
        .proxy
        .forward(target, method, &query, &parts.headers, body_bytes, client_ip)
        .await
    {
        Ok(upstream) => {
            let mut response = upstream.map(|b| b.boxed());
            if outcome.delay_ms > 0 {
                insert_header(&mut response, QUEUED_HEADER, "true");
                insert_header(&mut response, DELAY_HEADER, &outcome.delay_ms.to_string());
            }
            response
        },
        Err(GatewayError::UpstreamTimeout { .. }) => status_response(StatusCode::GATEWAY_TIMEOUT),
        Err(_) => status_response(StatusCode::BAD_GATEWAY),
    }
}

/// `GET /api/tokens/form`: issue a one-time token as JSON.
async fn issue_token_response(state: &GatewayState) -> Response<BoxedBody> {
    let issued = state.antibot.issue_token().await;
    json_response(StatusCode::OK, &issued)
}

/// `GET /api/tokens/challenge`: serve the configured challenge flavor.
async fn challenge_response(state: &GatewayState, path: &str) -> Response<BoxedBody> {
    let kind_text = state.settings.get_str("antibot-challenge-type", "metarefresh").await;

    match ChallengeKind::parse(&kind_text) {
        ChallengeKind::MetaRefresh => {
            let issued = state.antibot.issue_token().await;
            let delay = state.settings.get_i64("antibot-metarefresh-delay", 3).await;
            let html = challenge::meta_refresh_page(delay, path);
            let cookie = format!(
                "{TOKEN_CHALLENGE_COOKIE}={}; Path=/; Max-Age=600; SameSite=Lax",
                issued.token
            );
            let mut response = html_response(html);
            if let Ok(value) = cookie.parse() {
                response.headers_mut().insert(SET_COOKIE, value);
            }
            response
        },
        ChallengeKind::Preact => {
            let issued = state.antibot.issue_token().await;
            let delay = state
                .settings
                .get_i64("antibot-preact-difficulty", 1)
                .await
                .max(1);
            html_response(challenge::preact_page(&issued.token, delay, path))
        },
        ChallengeKind::Javascript => {
            let issued = state.antibot.issue_token().await;
            json_response(StatusCode::OK, &issued)
        },
    }
}

/// Buffer a write body up to `limit` bytes.
async fn buffer_body<B>(body: B, limit: usize) -> GatewayResult<Bytes>
where
    B: hyper::body::Body,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => {
            Err(GatewayError::BodyTooLarge { limit })
        },
        Err(err) => Err(GatewayError::BodyRead(err.to_string())),
    }
}

#[allow(clippy::too_many_arguments)]
async fn log_decision(
    state: &GatewayState,
    method: &Method,
    path: &str,
    host: Option<String>,
    client_ip: &str,
    identifier: &str,
    decision: Decision,
    status_code: u16,
    delay_ms: u64,
    rule_ids: Vec<Uuid>,
) {
    let entry = TrafficLogEntry {
        id: Uuid::new_v4(),
        timestamp: Utc::now(),
        method: method.to_string(),
        path: path.to_string(),
        host,
        client_ip: client_ip.to_string(),
        identifier: identifier.to_string(),
        decision,
        status_code,
        delay_ms,
        rule_ids,
    };
    state.traffic_log.append(&entry).await;
}

fn host_of(headers: &HeaderMap) -> Option<String> {
    headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(|h| h.split(':').next().unwrap_or(h).to_string())
}

fn status_response(status: StatusCode) -> Response<BoxedBody> {
    let mut response = Response::new(empty_body());
    *response.status_mut() = status;
    response
}

fn json_response<T: serde::Serialize>(status: StatusCode, value: &T) -> Response<BoxedBody> {
    let body = serde_json::to_vec(value).unwrap_or_default();
    let mut response = Response::new(full_body(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, http::HeaderValue::from_static("application/json"));
    response
}

fn html_response(html: String) -> Response<BoxedBody> {
    let mut response = Response::new(full_body(html));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, http::HeaderValue::from_static("text/html; charset=utf-8"));
    response
}

fn insert_header(response: &mut Response<BoxedBody>, name: &str, value: &str) {
    if let (Ok(name), Ok(value)) = (http::HeaderName::from_bytes(name.as_bytes()), value.parse()) {
        response.headers_mut().insert(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_header_strips_port() {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, "api.example.com:8080".parse().unwrap());
        assert_eq!(host_of(&headers).as_deref(), Some("api.example.com"));

        headers.insert(HOST, "plain.example.com".parse().unwrap());
        assert_eq!(host_of(&headers).as_deref(), Some("plain.example.com"));
    }

    #[tokio::test]
    async fn buffer_body_enforces_the_cap() {
        let small = Full::new(Bytes::from_static(b"hello"));
        assert_eq!(buffer_body(small, 16).await.unwrap(), Bytes::from_static(b"hello"));

        let big = Full::new(Bytes::from(vec![0u8; 64]));
        assert!(matches!(
            buffer_body(big, 16).await,
            Err(GatewayError::BodyTooLarge { limit: 16 })
        ));
    }
}
