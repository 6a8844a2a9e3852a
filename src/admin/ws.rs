//! Analytics WebSocket endpoint.
//!
//! Handshake per RFC 6455; after the upgrade the subscriber receives one
//! `snapshot` message and then a `summary` message per publish tick until
//! it disconnects. Nothing the client sends is interpreted.

use crate::analytics::{envelope, AnalyticsBroadcaster, AnalyticsService};
use crate::gateway::{empty_body, BoxedBody};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use http::header::{CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, UPGRADE};
use http::{Request, Response, StatusCode};
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use sha1::{Digest, Sha1};
use std::sync::Arc;
use tokio_tungstenite::tungstenite::protocol::{Message, Role};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

/// WebSocket magic GUID for the accept-key calculation.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Compute the `Sec-WebSocket-Accept` value for a client key.
#[must_use]
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Whether the request asks for a WebSocket upgrade.
#[must_use]
pub fn is_upgrade_request(req: &Request<Incoming>) -> bool {
    let upgrade = req
        .headers()
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    let connection = req
        .headers()
        .get(CONNECTION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("upgrade"));
    upgrade && connection
}

/// Accept the upgrade and run the subscriber session to completion.
pub fn handle_upgrade(
    mut req: Request<Incoming>,
    analytics: Arc<AnalyticsService>,
    broadcaster: Arc<AnalyticsBroadcaster>,
) -> Response<BoxedBody> {
    let Some(key) = req
        .headers()
        .get(SEC_WEBSOCKET_KEY)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
    else {
        let mut response = Response::new(empty_body());
        *response.status_mut() = StatusCode::BAD_REQUEST;
        return response;
    };

    let accept = accept_key(&key);
    let upgrade = hyper::upgrade::on(&mut req);

    tokio::spawn(async move {
        let upgraded = match upgrade.await {
            Ok(upgraded) => upgraded,
            Err(err) => {
                warn!(error = %err, "websocket upgrade failed");
                return;
            },
        };

        let stream =
            WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await;
        run_session(stream, analytics, broadcaster).await;
    });

    let mut response = Response::new(empty_body());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    let headers = response.headers_mut();
    headers.insert(UPGRADE, http::HeaderValue::from_static("websocket"));
    headers.insert(CONNECTION, http::HeaderValue::from_static("Upgrade"));
    if let Ok(value) = accept.parse() {
        headers.insert(SEC_WEBSOCKET_ACCEPT, value);
    }
    response
}

/// Pump one subscriber: snapshot first, then broadcast messages until the
/// client goes away.
async fn run_session<S>(
    stream: WebSocketStream<S>,
    analytics: Arc<AnalyticsService>,
    broadcaster: Arc<AnalyticsBroadcaster>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut sink, mut source) = stream.split();

    // Initial fill before any ticks flow.
    match analytics.summary().await {
        Ok(summary) => {
            if let Some(snapshot) = envelope("snapshot", &summary) {
                if sink.send(Message::Text(snapshot)).await.is_err() {
                    return;
                }
            }
        },
        Err(err) => warn!(error = %err, "failed to compute connect snapshot"),
    }

    let mut subscription = broadcaster.subscribe();
    info!(id = subscription.id, "analytics websocket session started");

    loop {
        tokio::select! {
            outgoing = subscription.rx.recv() => {
                let Some(text) = outgoing else {
                    break;
                };
                if sink.send(Message::Text(text)).await.is_err() {
                    debug!(id = subscription.id, "subscriber sink closed");
                    break;
                }
            }
            incoming = source.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Anything else from the client is ignored.
                    Some(Ok(_)) => {},
                }
            }
        }
    }

    broadcaster.unsubscribe(subscription.id);
    info!(id = subscription.id, "analytics websocket session ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_key_matches_rfc_example() {
        // The example handshake from RFC 6455 section 1.3.
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }
}
