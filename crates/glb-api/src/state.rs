//! Reloadable proxy state

use axum::body::Body;
use chrono::{DateTime, Utc};
use glb_core::{GlbError, GlbResult, ProxyConfig};
use glb_network::{build_registry, BalancedConnector, LoadBalancer, Registry};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info};

/// HTTP client whose connections come from the load balancer
pub type ProxyClient = Client<BalancedConnector, Body>;

/// Everything a request needs, built from one configuration
pub struct Runtime {
    pub config: ProxyConfig,
    pub registry: Arc<dyn Registry>,
    pub client: ProxyClient,
    pub loaded_at: DateTime<Utc>,
}

impl Runtime {
    /// Validate `config`, then build and seed its registry
    pub async fn from_config(config: ProxyConfig) -> GlbResult<Self> {
        config.validate()?;
        let registry = build_registry(&config).await?;
        Ok(Self::with_registry(config, registry))
    }

    /// Use an already populated registry
    pub fn with_registry(config: ProxyConfig, registry: Arc<dyn Registry>) -> Self {
        let client = build_client(&config, registry.clone());
        Self {
            config,
            registry,
            client,
            loaded_at: Utc::now(),
        }
    }
}

fn build_client(config: &ProxyConfig, registry: Arc<dyn Registry>) -> ProxyClient {
    let connector = BalancedConnector::new(registry, LoadBalancer::new(config.dial_timeout()));

    let mut builder = Client::builder(TokioExecutor::new());
    builder.pool_idle_timeout(config.idle_conn_timeout());
    if config.disable_keep_alives {
        builder.pool_max_idle_per_host(0);
    }
    builder.build(connector)
}

/// Handle to the current runtime, swapped wholesale on reload
pub struct ProxyState {
    runtime: RwLock<Arc<Runtime>>,
    /// File re-read by `reload`
    config_path: Option<PathBuf>,
    /// Serializes reloads
    reload_lock: Mutex<()>,
}

impl ProxyState {
    pub fn new(runtime: Runtime, config_path: Option<PathBuf>) -> Self {
        Self {
            runtime: RwLock::new(Arc::new(runtime)),
            config_path,
            reload_lock: Mutex::new(()),
        }
    }

    /// Runtime to use for the whole of one request
    pub async fn current(&self) -> Arc<Runtime> {
        self.runtime.read().await.clone()
    }

    /// Re-read the configuration file and replace the runtime
    ///
    /// The new runtime is built and validated before the write lock is taken;
    /// on failure the current runtime stays in place.
    pub async fn reload(&self) -> GlbResult<Arc<Runtime>> {
        let _guard = self.reload_lock.lock().await;

        let path = self.config_path.as_ref().ok_or_else(|| {
            GlbError::Config("proxy was started without a configuration file".to_string())
        })?;

        let runtime = match load(path).await {
            Ok(runtime) => Arc::new(runtime),
            Err(e) => {
                error!(path = %path.display(), error = %e, "Reload rejected");
                return Err(e);
            }
        };

        *self.runtime.write().await = runtime.clone();

        info!(
            path = %path.display(),
            services = runtime.config.registry.len(),
            basic = runtime.config.basic,
            "Configuration reloaded"
        );
        Ok(runtime)
    }
}

async fn load(path: &std::path::Path) -> GlbResult<Runtime> {
    let config = ProxyConfig::from_file(path)?;
    Runtime::from_config(config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, Write};

    fn write_config(file: &mut tempfile::NamedTempFile, body: &str) {
        let f = file.as_file_mut();
        f.set_len(0).unwrap();
        f.rewind().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f.flush().unwrap();
    }

    #[tokio::test]
    async fn test_reload_swaps_runtime() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write_config(&mut file, "[registry.s1]\nv1 = [\"127.0.0.1:8080\"]\n");

        let config = ProxyConfig::from_file(file.path()).unwrap();
        let state = ProxyState::new(
            Runtime::from_config(config).await.unwrap(),
            Some(file.path().to_path_buf()),
        );
        let before = state.current().await;

        write_config(
            &mut file,
            "basic = true\n[registry.s2]\nv2 = [\"127.0.0.1:8081\", \"127.0.0.1:8082\"]\n",
        );
        state.reload().await.unwrap();

        let after = state.current().await;
        assert!(after.config.basic);
        assert_eq!(after.registry.lookup("s2", "v2").await.unwrap().len(), 2);
        assert!(after.registry.lookup("s1", "v1").await.is_err());
        // in-flight holders keep the old runtime intact
        assert_eq!(before.registry.lookup("s1", "v1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reload_rejects_reserved_names() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write_config(&mut file, "[registry.s1]\nv1 = [\"127.0.0.1:8080\"]\n");

        let config = ProxyConfig::from_file(file.path()).unwrap();
        let state = ProxyState::new(
            Runtime::from_config(config).await.unwrap(),
            Some(file.path().to_path_buf()),
        );

        write_config(&mut file, "[registry.status]\nv1 = [\"127.0.0.1:8080\"]\n");
        assert!(matches!(
            state.reload().await,
            Err(GlbError::ServiceNameNotAllowed(_))
        ));
        assert!(state.current().await.registry.lookup("s1", "v1").await.is_ok());
    }

    #[tokio::test]
    async fn test_reload_without_config_path() {
        let state = ProxyState::new(
            Runtime::from_config(ProxyConfig::default()).await.unwrap(),
            None,
        );
        assert!(matches!(state.reload().await, Err(GlbError::Config(_))));
    }
}
