//! TLS termination for the HTTPS listener

use axum::{body::Body, extract::ConnectInfo, Router};
use glb_core::{GlbError, GlbResult, TlsConfig};
use hyper::body::Incoming;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::fs::File;
use std::future::Future;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use tracing::{debug, error, info, warn};

/// Pause after a failed accept so persistent errors (fd exhaustion) do not spin
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Build an acceptor from the PEM files named in `config`
pub fn load_acceptor(config: &TlsConfig) -> GlbResult<TlsAcceptor> {
    let certs = load_certs(&config.cert_path)?;
    let key = load_key(&config.key_path)?;

    let server_config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| GlbError::Tls(format!("Failed to configure certificate: {}", e)))?;

    info!(cert = %config.cert_path.display(), "Loaded TLS certificate");
    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

fn open(path: &Path) -> GlbResult<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| GlbError::Tls(format!("Failed to open {}: {}", path.display(), e)))
}

fn load_certs(path: &Path) -> GlbResult<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut open(path)?).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(GlbError::Tls(format!(
            "No certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> GlbResult<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut open(path)?)?
        .ok_or_else(|| GlbError::Tls(format!("No private key found in {}", path.display())))
}

/// Accept TLS connections on `listener` and serve `app` on each
///
/// Handshakes that do not finish within `handshake_timeout` are dropped.
pub async fn serve(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    app: Router,
    handshake_timeout: Duration,
) -> GlbResult<()> {
    let listener = &listener;
    loop {
        let (tcp_stream, peer_addr) = accept_with_backoff(move || listener.accept()).await;

        let acceptor = acceptor.clone();
        let app = app.clone();

        tokio::spawn(async move {
            let tls_stream =
                match tokio::time::timeout(handshake_timeout, acceptor.accept(tcp_stream)).await {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(e)) => {
                        warn!(peer = %peer_addr, error = %e, "TLS handshake failed");
                        return;
                    }
                    Err(_) => {
                        warn!(peer = %peer_addr, "TLS handshake timed out");
                        return;
                    }
                };
            debug!(peer = %peer_addr, "TLS connection established");

            let service = hyper::service::service_fn(move |mut req: Request<Incoming>| {
                req.extensions_mut().insert(ConnectInfo(peer_addr));
                app.clone().oneshot(req.map(Body::new))
            });

            if let Err(e) = auto::Builder::new(TokioExecutor::new())
                .serve_connection(TokioIo::new(tls_stream), service)
                .await
            {
                debug!(peer = %peer_addr, error = %e, "HTTPS connection closed with error");
            }
        });
    }
}

/// Retry `accept` until it yields, pausing after each failure
async fn accept_with_backoff<T, F, Fut>(mut accept: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(accepted) => return accepted,
            Err(e) => {
                error!(error = %e, "Failed to accept HTTPS connection");
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
            }
        }
    }
}
