//! HTTP client connector that dials through the load balancer
//!
//! Outbound requests carry their routing intent in the URI authority as the
//! synthetic host `<service>/<key>`. A URI host admits neither `/` nor `%`,
//! so the token travels as lowercase hex (`svc/v1` -> `7376632f7631`) and is
//! decoded again here. Hex keeps distinct tokens distinct under the
//! case-insensitive host comparison the connection pool uses. The host is
//! never resolved.

use glb_core::{GlbError, GlbResult};
use hyper::Uri;
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::net::TcpStream;
use tower::Service;

use crate::balancer::LoadBalancer;
use crate::registry::Registry;

/// Encode service/key into a URI authority
pub fn synthetic_host(service: &str, key: &str) -> String {
    hex::encode(format!("{}/{}", service, key))
}

/// Decode the service/key carried by `uri`
pub fn parse_synthetic_host(uri: &Uri) -> GlbResult<(String, String)> {
    let host = uri
        .host()
        .ok_or_else(|| GlbError::InvalidTarget(uri.to_string()))?;
    let decoded = hex::decode(host)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| GlbError::InvalidTarget(host.to_string()))?;

    match decoded.split_once('/') {
        Some((service, key)) if !service.is_empty() && !key.is_empty() => {
            Ok((service.to_string(), key.to_string()))
        }
        _ => Err(GlbError::InvalidTarget(decoded)),
    }
}

/// Connector for `hyper_util`'s client backed by a registry
#[derive(Clone)]
pub struct BalancedConnector {
    registry: Arc<dyn Registry>,
    balancer: LoadBalancer,
}

impl BalancedConnector {
    pub fn new(registry: Arc<dyn Registry>, balancer: LoadBalancer) -> Self {
        Self { registry, balancer }
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }
}

impl Service<Uri> for BalancedConnector {
    type Response = TokioIo<TcpStream>;
    type Error = GlbError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let registry = self.registry.clone();
        let balancer = self.balancer.clone();

        Box::pin(async move {
            let (service, key) = parse_synthetic_host(&uri)?;
            let stream = balancer.dial(&service, &key, registry.as_ref()).await?;
            Ok(TokioIo::new(stream))
        })
    }
}
