//! HTTP routes: proxy fallback, status, reload and HTTPS redirect

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use glb_core::{RegistryBackend, RegistrySnapshot};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::proxy::{error_response, proxy_handler};
use crate::state::ProxyState;

/// Create the application router
pub fn create_router(state: Arc<ProxyState>) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/reload", get(reload).post(reload))
        .fallback(proxy_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Registry dump returned by `/status`
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub basic: bool,
    pub registry_backend: RegistryBackend,
    pub loaded_at: DateTime<Utc>,
    pub services: RegistrySnapshot,
}

async fn get_status(State(state): State<Arc<ProxyState>>) -> Json<StatusResponse> {
    let runtime = state.current().await;

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        basic: runtime.config.basic,
        registry_backend: runtime.config.registry_backend,
        loaded_at: runtime.loaded_at,
        services: runtime.registry.snapshot().await,
    })
}

/// Outcome of a successful `/reload`
#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub services: usize,
    pub loaded_at: DateTime<Utc>,
}

async fn reload(State(state): State<Arc<ProxyState>>) -> Response {
    info!("Reload requested");

    match state.reload().await {
        Ok(runtime) => Json(ReloadResponse {
            services: runtime.config.registry.len(),
            loaded_at: runtime.loaded_at,
        })
        .into_response(),
        Err(e) => error_response(&e),
    }
}

/// Router answering every request with a 301 to the HTTPS listener
///
/// The redirect keeps the request's host name when it has one and falls
/// back to `default_host` otherwise.
pub fn create_redirect_router(default_host: String, ssl_port: u16) -> Router {
    let target = Arc::new(RedirectTarget {
        default_host,
        ssl_port,
    });

    Router::new()
        .fallback(redirect_to_https)
        .layer(TraceLayer::new_for_http())
        .with_state(target)
}

struct RedirectTarget {
    default_host: String,
    ssl_port: u16,
}

async fn redirect_to_https(State(target): State<Arc<RedirectTarget>>, req: Request) -> Response {
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(strip_port)
        .filter(|host| !host.is_empty())
        .unwrap_or(&target.default_host);
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let location = format!("https://{}:{}{}", host, target.ssl_port, path_and_query);
    match header::HeaderValue::from_str(&location) {
        Ok(location) => {
            (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response()
        }
        Err(e) => {
            warn!(location = %location, error = %e, "Invalid redirect location");
            StatusCode::BAD_REQUEST.into_response()
        }
    }
}

/// "example.com:8080" -> "example.com", "[::1]:80" -> "[::1]"
fn strip_port(host: &str) -> &str {
    match host.rfind(':') {
        Some(i) if !host[i..].contains(']') => &host[..i],
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Runtime;
    use axum::body::Body;
    use axum::http::Request;
    use glb_core::ProxyConfig;
    use tower::ServiceExt;

    async fn state() -> Arc<ProxyState> {
        let mut config = ProxyConfig::default();
        config
            .registry
            .entry("service1".to_string())
            .or_default()
            .insert("v1".to_string(), vec!["127.0.0.1:8080".to_string()]);
        Arc::new(ProxyState::new(Runtime::from_config(config).await.unwrap(), None))
    }

    #[tokio::test]
    async fn test_create_router() {
        let _router = create_router(state().await);
    }

    #[tokio::test]
    async fn test_status() {
        let router = create_router(state().await);
        let response = router
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let status: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(status["services"][0]["service"], "service1");
        assert_eq!(status["services"][0]["keys"][0]["targets"][0]["failures"], 0);
    }

    #[tokio::test]
    async fn test_invalid_path() {
        let router = create_router(state().await);
        let response = router
            .oneshot(Request::builder().uri("/service1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"proxy: invalid path to resource");
    }

    #[tokio::test]
    async fn test_reload_without_file() {
        let router = create_router(state().await);
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/reload")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_redirect() {
        let router = create_redirect_router("lb.local".to_string(), 8443);

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/service1/v1/x?y=1")
                    .header(header::HOST, "example.com:8080")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            response.headers()[header::LOCATION],
            "https://example.com:8443/service1/v1/x?y=1"
        );

        let response = router
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.headers()[header::LOCATION], "https://lb.local:8443/");
    }

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("example.com:8080"), "example.com");
        assert_eq!(strip_port("example.com"), "example.com");
        assert_eq!(strip_port("[::1]:80"), "[::1]");
        assert_eq!(strip_port("[::1]"), "[::1]");
    }
}
