//! Upstream forwarding.

use super::error::{GatewayError, GatewayResult};
use bytes::Bytes;
use http::header::{HeaderName, CONNECTION, HOST, TRANSFER_ENCODING, UPGRADE};
use http::{HeaderMap, Method, Request, Response, Uri};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use tracing::{debug, warn};

/// Headers that must not travel across the proxy hop.
const HOP_BY_HOP: [HeaderName; 3] = [CONNECTION, TRANSFER_ENCODING, UPGRADE];

/// HTTP client forwarding admitted requests to their upstream.
pub struct UpstreamProxy {
    client: Client<HttpConnector, Full<Bytes>>,
    response_timeout: Duration,
}

impl std::fmt::Debug for UpstreamProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamProxy")
            .field("response_timeout", &self.response_timeout)
            .finish()
    }
}

impl UpstreamProxy {
    /// Create a proxy client with the given response timeout.
    #[must_use]
    pub fn new(response_timeout: Duration) -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
            response_timeout,
        }
    }

    /// Forward a request to `target`, preserving path, query, method and
    /// headers, with the already-buffered body.
    pub async fn forward(
        &self,
        target: &str,
        method: Method,
        path_and_query: &str,
        headers: &HeaderMap,
        body: Bytes,
        client_ip: &str,
    ) -> GatewayResult<Response<Incoming>> {
        let uri = build_uri(target, path_and_query)?;
        debug!(%uri, %method, "forwarding to upstream");

        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(out_headers) = builder.headers_mut() {
            for (name, value) in headers {
                if *name == HOST || HOP_BY_HOP.contains(name) {
                    continue;
                }
                out_headers.append(name.clone(), value.clone());
            }
            if let Ok(forwarded) = client_ip.parse() {
                out_headers.append("x-forwarded-for", forwarded);
            }
        }

        let request = builder
            .body(Full::new(body))
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;

        let response = tokio::time::timeout(self.response_timeout, self.client.request(request))
            .await
            .map_err(|_| {
                warn!(target, "upstream timed out");
                GatewayError::UpstreamTimeout {
                    timeout_ms: self.response_timeout.as_millis() as u64,
                }
            })?
            .map_err(|e| {
                warn!(target, error = %e, "upstream request failed");
                GatewayError::Upstream(e.to_string())
            })?;

        Ok(response)
    }
}

/// Join an upstream base URI with the request's path and query.
fn build_uri(target: &str, path_and_query: &str) -> GatewayResult<Uri> {
    let base = target.trim_end_matches('/');
    format!("{base}{path_and_query}")
        .parse()
        .map_err(|e: http::uri::InvalidUri| GatewayError::Upstream(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_joins_base_and_path() {
        let uri = build_uri("http://127.0.0.1:9000", "/api/x?y=1").unwrap();
        assert_eq!(uri.to_string(), "http://127.0.0.1:9000/api/x?y=1");

        let uri = build_uri("http://backend:3000/", "/hello").unwrap();
        assert_eq!(uri.to_string(), "http://backend:3000/hello");
    }

    #[test]
    fn invalid_target_is_an_error() {
        assert!(build_uri("http://exa mple", "/x").is_err());
    }
}
