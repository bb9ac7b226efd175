//! Router assembly and rate-limit middleware.
//!
//! Every configured route path (and its subtree) is bound to its proxy
//! handler behind the rate-limit middleware; `/clients` exposes the
//! limiter management surface and is not rate limited.

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{any, get},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::api::clients;
use crate::api::proxy::{self, ProxyHandler};
use crate::core::error::AppError;
use crate::services::limiter::TokenBucketLimiter;

/// Build the full application router.
pub fn build_router(
    proxies: Vec<(String, Arc<ProxyHandler>)>,
    limiter: Arc<TokenBucketLimiter>,
) -> Router {
    let mut proxy_routes = Router::new();
    for (path, handler) in proxies {
        let prefix = path.trim_end_matches('/');
        proxy_routes = proxy_routes
            .route(&path, any(proxy::serve).with_state(Arc::clone(&handler)))
            .route(
                &format!("{prefix}/*rest"),
                any(proxy::serve).with_state(handler),
            );
        tracing::debug!(path, "load balancer route registered");
    }
    let proxy_routes = proxy_routes.layer(middleware::from_fn_with_state(
        Arc::clone(&limiter),
        rate_limit_middleware,
    ));

    let client_routes = Router::new()
        .route(
            "/clients",
            get(clients::list_clients)
                .post(clients::create_client)
                .delete(clients::delete_client),
        )
        .with_state(limiter);

    proxy_routes
        .merge(client_routes)
        .layer(TraceLayer::new_for_http())
}

/// Reject a request before proxying when its client is out of tokens.
async fn rate_limit_middleware(
    State(limiter): State<Arc<TokenBucketLimiter>>,
    req: Request,
    next: Next,
) -> Response {
    let key = client_key(&req);
    if !limiter.allow(&key) {
        tracing::debug!(client = %key, "request rejected by rate limiter");
        return AppError::RateLimited.into_response();
    }
    next.run(req).await
}

/// Client key: the peer IP without the port. When the peer address is not
/// available the key is empty, which never matches a registered client and
/// falls through to the default bucket.
fn client_key(req: &Request) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_default()
}
