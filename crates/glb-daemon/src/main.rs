//! glb daemon
//!
//! Reverse-proxy load balancer serving `/<service>/<key>/...` over the
//! configured registry.

mod tls;

use anyhow::Context;
use axum::Router;
use clap::Parser;
use glb_api::{create_redirect_router, create_router, ProxyState, Runtime};
use glb_core::{GlbError, ProxyConfig};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// glb daemon - reverse-proxy load balancer
#[derive(Parser, Debug)]
#[command(name = "glbd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML, or JSON with a .json extension)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level, overrides the configuration file
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => ProxyConfig::from_file(path)?,
        None => ProxyConfig::default(),
    };

    let log_level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    init_logging(log_level, &config.logging.format)?;

    info!("Starting glb daemon v{}", env!("CARGO_PKG_VERSION"));

    let runtime = match Runtime::from_config(config.clone()).await {
        Ok(runtime) => runtime,
        Err(e @ GlbError::ServiceNameNotAllowed(_)) => {
            error!(error = %e, "Registry uses a reserved service name");
            return Err(e).context("rename the service, \"status\" and \"reload\" are reserved");
        }
        Err(e) => return Err(e.into()),
    };
    info!(
        services = runtime.config.registry.len(),
        basic = runtime.config.basic,
        backend = ?runtime.config.registry_backend,
        "Registry loaded"
    );

    let state = Arc::new(ProxyState::new(runtime, args.config.clone()));
    let app = create_router(state);

    tokio::select! {
        result = run(&config, app) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    }
}

/// Plain HTTP, or HTTPS plus a redirect listener when `ssl_port` is set
async fn run(config: &ProxyConfig, app: Router) -> anyhow::Result<()> {
    let (ssl_port, tls_config) = match (config.host.ssl_port, &config.tls) {
        (Some(ssl_port), Some(tls_config)) => (ssl_port, tls_config),
        _ => {
            let plain = bind(&config.host.addr, config.host.port).await?;
            return serve_plain(plain, app).await;
        }
    };

    let acceptor = tls::load_acceptor(tls_config)?;
    let redirect = create_redirect_router(config.host.addr.clone(), ssl_port);

    let plain = bind(&config.host.addr, config.host.port).await?;
    let secure = bind(&config.host.addr, ssl_port).await?;
    info!("Redirecting HTTP traffic to port {}", ssl_port);

    let handshake_timeout = config.tls_handshake_timeout();
    tokio::try_join!(serve_plain(plain, redirect), async {
        tls::serve(secure, acceptor, app, handshake_timeout)
            .await
            .context("HTTPS server error")
    })?;
    Ok(())
}

fn init_logging(level: &str, format: &str) -> anyhow::Result<()> {
    let log_level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false);

    let result = if format.eq_ignore_ascii_case("json") {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    result.context("Failed to set subscriber")
}

async fn bind(address: &str, port: u16) -> anyhow::Result<TcpListener> {
    let ip: IpAddr = address
        .parse()
        .with_context(|| format!("Invalid address {}", address))?;
    let addr = SocketAddr::from((ip, port));

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);
    Ok(listener)
}

async fn serve_plain(listener: TcpListener, app: Router) -> anyhow::Result<()> {
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server error")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args() {
        let args = Args::parse_from(["glbd", "--config", "glb.toml", "--log-level", "debug"]);
        assert_eq!(args.config, Some(PathBuf::from("glb.toml")));
        assert_eq!(args.log_level.as_deref(), Some("debug"));

        let args = Args::parse_from(["glbd"]);
        assert!(args.config.is_none());
        assert!(args.log_level.is_none());
    }

    #[tokio::test]
    async fn test_bind_rejects_bad_address() {
        assert!(bind("not an address", 0).await.is_err());
    }

    #[tokio::test]
    async fn test_bind_ipv4_and_ipv6() {
        let listener = bind("127.0.0.1", 0).await.unwrap();
        assert!(listener.local_addr().unwrap().is_ipv4());

        // hosts without an IPv6 stack cannot bind ::1
        if let Ok(listener) = bind("::1", 0).await {
            assert!(listener.local_addr().unwrap().is_ipv6());
        }
    }
}
