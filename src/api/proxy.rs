//! Per-route proxy handler.
//!
//! The request path: take a snapshot of the route's healthy subset, let the
//! strategy pick a backend, rewrite the request against the backend base
//! URL and forward it with retries, then stream the backend response back
//! to the caller.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::error::{AppError, Result};
use crate::services::balancer::RouteBalancer;
use crate::services::registry::Backend;
use crate::services::strategy::LoadBalancingStrategy;

/// Maximum number of forwarding attempts per request.
const MAX_ATTEMPTS: usize = 3;

/// HTTP entry point for one route.
pub struct ProxyHandler {
    balancer: RouteBalancer,
    strategy: Arc<dyn LoadBalancingStrategy>,
    client: reqwest::Client,
}

impl ProxyHandler {
    pub fn new(
        balancer: RouteBalancer,
        strategy: Arc<dyn LoadBalancingStrategy>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            balancer,
            strategy,
            client,
        }
    }

    /// Current healthy subset of the route.
    pub fn healthy_snapshot(&self) -> Vec<Backend> {
        self.balancer.healthy_snapshot()
    }

    async fn handle(&self, req: Request) -> Result<Response> {
        let start = Instant::now();

        let candidates = self.balancer.healthy_snapshot();
        if candidates.is_empty() {
            return Err(AppError::NoHealthyBackends);
        }
        let backend = self.strategy.next_backend(&candidates)?.clone();

        let (parts, body) = req.into_parts();
        let target = build_target_url(&backend.url, parts.uri.path(), parts.uri.query());

        // The body is buffered in full so it can be replayed on retries.
        let body = axum::body::to_bytes(body, usize::MAX)
            .await
            .map_err(|err| AppError::Internal(format!("failed to read request body: {err}")))?;
        let headers = forwarded_headers(&parts.headers);

        let upstream = self
            .execute_with_retries(parts.method, &target, headers, body)
            .await?;

        let status = upstream.status();
        let response = relay_response(upstream);

        tracing::debug!(
            backend = %backend.url,
            status = %status,
            duration = ?start.elapsed(),
            "request proxied"
        );
        Ok(response)
    }

    /// Forward the request, retrying transport errors, 5xx and 429.
    ///
    /// A 2xx response is returned immediately; a 4xx other than 429 is
    /// terminal and passed through to the caller. When every attempt is
    /// used up, the last backend response (if any) is relayed; exhaustion
    /// on transport errors surfaces as a gateway failure. Between attempts
    /// the wait is `attempt * 1s` plus up to 100ms of jitter.
    async fn execute_with_retries(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<reqwest::Response> {
        let mut attempt = 0;
        loop {
            let outcome = self
                .client
                .request(method.clone(), url)
                .headers(headers.clone())
                .body(body.clone())
                .send()
                .await;
            let last_attempt = attempt + 1 == MAX_ATTEMPTS;

            match outcome {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp);
                    }
                    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
                        tracing::error!(url, status = %status, "backend returned non-retryable status");
                        return Ok(resp);
                    }
                    if last_attempt {
                        tracing::error!(url, status = %status, "retries exhausted, relaying last backend response");
                        return Ok(resp);
                    }
                    tracing::warn!(url, status = %status, attempt, "backend returned retryable status");
                }
                Err(err) => {
                    if last_attempt {
                        tracing::error!(url, error = %err, "request to backend failed");
                        return Err(AppError::Upstream(err));
                    }
                    tracing::warn!(url, error = %err, attempt, "request to backend failed, retrying");
                }
            }

            let jitter = rand::thread_rng().gen_range(0..100);
            let backoff = Duration::from_secs(attempt as u64) + Duration::from_millis(jitter);
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }
}

/// Axum handler: proxy one inbound request for this route.
pub async fn serve(State(handler): State<Arc<ProxyHandler>>, req: Request) -> Response {
    match handler.handle(req).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

/// Target URL: backend base URL + inbound path + raw query, if any.
fn build_target_url(base_url: &str, path: &str, query: Option<&str>) -> String {
    match query {
        Some(query) if !query.is_empty() => format!("{base_url}{path}?{query}"),
        _ => format!("{base_url}{path}"),
    }
}

/// Clone the inbound headers for forwarding.
///
/// `host` is dropped (the outbound host follows the target URL) and so is
/// `content-length` (the client recomputes it from the buffered body).
fn forwarded_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = headers.clone();
    forwarded.remove(header::HOST);
    forwarded.remove(header::CONTENT_LENGTH);
    forwarded
}

/// Turn the backend response into the caller-facing response: headers,
/// then status, then the body streamed through without re-buffering.
fn relay_response(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    // hyper re-frames the streamed body itself.
    headers.remove(header::TRANSFER_ENCODING);

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
