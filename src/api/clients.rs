//! Management surface for rate limiter clients.
//!
//! CRUD over the limiter's client map: list, create and delete. Payloads
//! use the [`ClientConfig`] JSON shape (`client_ip`, `capacity`,
//! `interval` in nanoseconds).

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::Deserialize;
use std::sync::Arc;

use crate::services::limiter::{ClientConfig, TokenBucketLimiter};

/// `GET /clients` — snapshot of all registered clients.
pub async fn list_clients(State(limiter): State<Arc<TokenBucketLimiter>>) -> Response {
    let clients = limiter.list_clients();
    tracing::debug!(clients_count = clients.len(), "returning clients list");
    Json(clients).into_response()
}

/// `POST /clients` — register a client from a JSON config.
///
/// The body is decoded leniently (missing fields default, unknown fields
/// are ignored), so validation of the key happens here rather than in the
/// deserializer.
pub async fn create_client(
    State(limiter): State<Arc<TokenBucketLimiter>>,
    body: Bytes,
) -> Response {
    let config: ClientConfig = match serde_json::from_slice(&body) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(error = %err, "invalid client config payload");
            return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
        }
    };

    if config.ip.is_empty() {
        tracing::warn!("client config without client_ip rejected");
        return (StatusCode::BAD_REQUEST, "client_id is required").into_response();
    }

    limiter.add_client(config.clone());
    (StatusCode::CREATED, Json(config)).into_response()
}

#[derive(Debug, Deserialize)]
pub struct DeleteClientParams {
    client_ip: Option<String>,
}

/// `DELETE /clients?client_ip=<key>` — remove a client and its bucket.
pub async fn delete_client(
    State(limiter): State<Arc<TokenBucketLimiter>>,
    Query(params): Query<DeleteClientParams>,
) -> Response {
    let Some(client_ip) = params.client_ip.filter(|ip| !ip.is_empty()) else {
        tracing::warn!("client_ip parameter missing in DELETE request");
        return (StatusCode::BAD_REQUEST, "client_ip is required").into_response();
    };

    limiter.delete_client(&client_ip);
    StatusCode::NO_CONTENT.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn limiter() -> Arc<TokenBucketLimiter> {
        Arc::new(TokenBucketLimiter::new(10, Duration::from_secs(30)))
    }

    #[tokio::test]
    async fn test_create_client_missing_ip() {
        let response = create_client(
            State(limiter()),
            Bytes::from_static(br#"{"capacity": 5}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"client_id is required");
    }

    #[tokio::test]
    async fn test_create_client_malformed_json() {
        let response =
            create_client(State(limiter()), Bytes::from_static(b"{not json")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_client_stores_config() {
        let limiter = limiter();
        let response = create_client(
            State(Arc::clone(&limiter)),
            Bytes::from_static(
                br#"{"client_ip":"192.168.1.1","capacity":20,"interval":10000000000}"#,
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let stored = limiter.get_client("192.168.1.1").unwrap();
        assert_eq!(stored.capacity, 20);
        assert_eq!(stored.interval, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_delete_client_missing_param() {
        let response = delete_client(
            State(limiter()),
            Query(DeleteClientParams { client_ip: None }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_delete_client_removes_entry() {
        let limiter = limiter();
        limiter.add_client(ClientConfig {
            ip: "192.168.1.1".to_string(),
            capacity: 20,
            interval: Duration::from_secs(10),
        });

        let response = delete_client(
            State(Arc::clone(&limiter)),
            Query(DeleteClientParams {
                client_ip: Some("192.168.1.1".to_string()),
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(limiter.get_client("192.168.1.1").is_none());
    }
}
