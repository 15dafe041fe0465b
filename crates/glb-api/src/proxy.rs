//! Reverse-proxy handler

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{
        header::{self, HeaderMap, HeaderName, HeaderValue},
        StatusCode, Uri, Version,
    },
    response::{IntoResponse, Response},
};
use glb_core::{GlbError, GlbResult};
use glb_network::{router, synthetic_host, Route};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::state::{ProxyState, Runtime};

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REQUEST_ID: &str = "x-request-id";

/// Route, rewrite and forward one request
pub async fn proxy_handler(
    State(state): State<Arc<ProxyState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    mut req: Request,
) -> Response {
    let request_id = ensure_request_id(req.headers_mut());
    let runtime = state.current().await;

    let route = match router::route(req.uri().path(), runtime.config.basic) {
        Ok(route) => route,
        Err(e) => {
            warn!(path = %req.uri().path(), error = %e, "Rejected request path");
            return error_response(&e);
        }
    };

    let client_ip = connect_info.map(|ConnectInfo(addr)| addr.ip());
    match forward(&runtime, &route, client_ip, &request_id, req).await {
        Ok(response) => response,
        Err(e) => {
            error!(
                request_id = %request_id,
                service = %route.service,
                key = %route.key,
                error = %e,
                "Proxy request failed"
            );
            error_response(&e)
        }
    }
}

async fn forward(
    runtime: &Runtime,
    route: &Route,
    client_ip: Option<IpAddr>,
    request_id: &str,
    req: Request,
) -> GlbResult<Response> {
    let (mut parts, body) = req.into_parts();

    preserve_host(&mut parts.headers, &parts.uri);
    parts.uri = upstream_uri(route, parts.uri.query())?;
    parts.version = Version::HTTP_11;
    strip_hop_by_hop(&mut parts.headers);
    if let Some(ip) = client_ip {
        append_forwarded_for(&mut parts.headers, ip);
    }

    debug!(
        request_id = %request_id,
        service = %route.service,
        key = %route.key,
        path = %route.path,
        "Forwarding request"
    );

    let response = runtime
        .client
        .request(Request::from_parts(parts, body))
        .await
        .map_err(upstream_error)?;

    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    if let Ok(value) = HeaderValue::from_str(request_id) {
        parts.headers.entry(X_REQUEST_ID).or_insert(value);
    }
    Ok(Response::from_parts(parts, Body::new(body)))
}

/// `http://<hex of service/key><path>?<query>`
fn upstream_uri(route: &Route, query: Option<&str>) -> GlbResult<Uri> {
    let path_and_query = match query {
        Some(query) => format!("{}?{}", route.path, query),
        None => route.path.clone(),
    };

    Uri::builder()
        .scheme("http")
        .authority(synthetic_host(&route.service, &route.key))
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| GlbError::InvalidTarget(e.to_string()))
}

/// HTTP/2 requests carry the client's host in the URI, not in `Host`
fn preserve_host(headers: &mut HeaderMap, uri: &Uri) {
    if headers.contains_key(header::HOST) {
        return;
    }
    if let Some(value) = uri
        .authority()
        .and_then(|authority| HeaderValue::from_str(authority.as_str()).ok())
    {
        headers.insert(header::HOST, value);
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // headers named in Connection are hop-by-hop as well
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }

    for name in [
        header::CONNECTION,
        HeaderName::from_static("keep-alive"),
        header::PROXY_AUTHENTICATE,
        header::PROXY_AUTHORIZATION,
        header::TE,
        header::TRAILER,
        header::TRANSFER_ENCODING,
        header::UPGRADE,
    ] {
        headers.remove(name);
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, ip: IpAddr) {
    let value = match headers
        .get(X_FORWARDED_FOR)
        .and_then(|existing| existing.to_str().ok())
    {
        Some(existing) => format!("{}, {}", existing, ip),
        None => ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

/// Reuse the client's request id or mint a new one
fn ensure_request_id(headers: &mut HeaderMap) -> String {
    if let Some(id) = headers.get(X_REQUEST_ID).and_then(|v| v.to_str().ok()) {
        return id.to_string();
    }

    let id = Uuid::new_v4().to_string();
    if let Ok(value) = HeaderValue::from_str(&id) {
        headers.insert(X_REQUEST_ID, value);
    }
    id
}

/// Recover the balancer's error from the client's error chain
fn upstream_error(err: hyper_util::client::legacy::Error) -> GlbError {
    let mut source = std::error::Error::source(&err);
    while let Some(e) = source {
        if let Some(glb) = e.downcast_ref::<GlbError>() {
            return match glb {
                GlbError::NoEndpointAvailable { service, key } => {
                    GlbError::no_endpoint_available(service, key)
                }
                GlbError::ServiceNotFound { service, key } => {
                    GlbError::service_not_found(service, key)
                }
                GlbError::InvalidTarget(target) => GlbError::InvalidTarget(target.clone()),
                other => GlbError::Internal(other.to_string()),
            };
        }
        source = e.source();
    }
    GlbError::Internal(format!("upstream request failed: {}", err))
}

/// Routing and balancing failures are a plain-text 500
pub(crate) fn error_response(err: &GlbError) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
}
