//! CLI commands implementation

use anyhow::Result;
use glb_core::{ProxyConfig, RegistryBackend, RegistrySnapshot};
use serde::Deserialize;
use std::fmt::Write;
use std::path::Path;

/// API client for communicating with the daemon
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// `/status` response
#[derive(Debug, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub basic: bool,
    pub registry_backend: RegistryBackend,
    pub loaded_at: String,
    pub services: RegistrySnapshot,
}

/// `/reload` response
#[derive(Debug, Deserialize)]
pub struct ReloadResponse {
    pub services: usize,
    pub loaded_at: String,
}

/// Show the daemon's registry
pub async fn status(client: &ApiClient, service: Option<String>, json: bool) -> Result<()> {
    let response = client.client.get(client.url("/status")).send().await?;

    if !response.status().is_success() {
        let error = response.text().await?;
        anyhow::bail!("Failed to get status: {}", error);
    }

    if json {
        let document: serde_json::Value = response.json().await?;
        println!("{}", serde_json::to_string_pretty(&document)?);
        return Ok(());
    }

    let status: StatusResponse = response.json().await?;
    print!("{}", format_status(&status, service.as_deref()));
    Ok(())
}

/// Ask the daemon to re-read its configuration file
pub async fn reload(client: &ApiClient) -> Result<()> {
    let response = client.client.post(client.url("/reload")).send().await?;

    if response.status().is_success() {
        let reloaded: ReloadResponse = response.json().await?;
        println!(
            "Configuration reloaded: {} services (loaded at {})",
            reloaded.services, reloaded.loaded_at
        );
        Ok(())
    } else {
        let error = response.text().await?;
        anyhow::bail!("Reload rejected: {}", error)
    }
}

/// Parse and validate a configuration file locally
pub fn check(path: &Path) -> Result<()> {
    let config = ProxyConfig::from_file(path)?;
    config.validate()?;

    let keys: usize = config.registry.values().map(|keys| keys.len()).sum();
    let targets: usize = config
        .registry
        .values()
        .flat_map(|keys| keys.values())
        .map(|targets| targets.len())
        .sum();
    println!(
        "{} is valid: {} services, {} keys, {} targets",
        path.display(),
        config.registry.len(),
        keys,
        targets
    );
    Ok(())
}

fn format_status(status: &StatusResponse, only: Option<&str>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "glb v{}", status.version);
    let _ = writeln!(
        out,
        "Loaded at {} ({:?} registry{})",
        status.loaded_at,
        status.registry_backend,
        if status.basic { ", basic mode" } else { "" }
    );

    let services: Vec<_> = status
        .services
        .iter()
        .filter(|s| only.map_or(true, |name| s.service == name))
        .collect();

    if services.is_empty() {
        let _ = writeln!(out, "\nNo services registered");
        return out;
    }

    let _ = writeln!(
        out,
        "\n{:<20} {:<15} {:<8} {:<30} {:<8}",
        "SERVICE", "KEY", "CURSOR", "TARGET", "FAILURES"
    );
    let _ = writeln!(out, "{}", "-".repeat(85));
    for service in services {
        for key in &service.keys {
            for target in &key.targets {
                let _ = writeln!(
                    out,
                    "{:<20} {:<15} {:<8} {:<30} {:<8}",
                    service.service, key.key, key.round_robin_cursor, target.address, target.failures
                );
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use glb_core::{KeySnapshot, ServiceSnapshot, Target};
    use std::io::Write as _;

    fn sample() -> StatusResponse {
        StatusResponse {
            version: "0.1.0".to_string(),
            basic: false,
            registry_backend: RegistryBackend::Standard,
            loaded_at: "2024-01-01T00:00:00Z".to_string(),
            services: vec![
                ServiceSnapshot {
                    service: "service1".to_string(),
                    keys: vec![KeySnapshot {
                        key: "v1".to_string(),
                        round_robin_cursor: 1,
                        targets: vec![
                            Target::new("127.0.0.1:8080"),
                            Target {
                                address: "127.0.0.1:8081".to_string(),
                                failures: 3,
                            },
                        ],
                    }],
                },
                ServiceSnapshot {
                    service: "service2".to_string(),
                    keys: vec![KeySnapshot {
                        key: "v2".to_string(),
                        round_robin_cursor: 0,
                        targets: vec![Target::new("127.0.0.1:9000")],
                    }],
                },
            ],
        }
    }

    #[test]
    fn test_url() {
        let client = ApiClient::new("http://localhost:9090/");
        assert_eq!(client.url("/status"), "http://localhost:9090/status");
    }

    #[test]
    fn test_status_response_parses() {
        let body = r#"{
            "version": "0.1.0",
            "basic": true,
            "registry_backend": "map",
            "loaded_at": "2024-01-01T00:00:00Z",
            "services": [
                {"service": "s", "keys": [
                    {"key": "k", "round_robin_cursor": 2, "targets": [
                        {"address": "10.0.0.1:80", "failures": 1}
                    ]}
                ]}
            ]
        }"#;

        let status: StatusResponse = serde_json::from_str(body).unwrap();
        assert!(status.basic);
        assert_eq!(status.registry_backend, RegistryBackend::Map);
        assert_eq!(status.services[0].keys[0].round_robin_cursor, 2);
        assert_eq!(status.services[0].keys[0].targets[0].failures, 1);
    }

    #[test]
    fn test_format_status() {
        let out = format_status(&sample(), None);
        assert!(out.contains("glb v0.1.0"));
        assert!(out.contains("127.0.0.1:8081"));
        assert!(out.contains("service2"));
    }

    #[test]
    fn test_format_status_filtered() {
        let out = format_status(&sample(), Some("service2"));
        assert!(out.contains("127.0.0.1:9000"));
        assert!(!out.contains("service1"));

        let out = format_status(&sample(), Some("missing"));
        assert!(out.contains("No services registered"));
    }

    #[test]
    fn test_check() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[registry.service1]\nv1 = [\"127.0.0.1:8080\"]").unwrap();
        assert!(check(file.path()).is_ok());

        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[registry.status]\nv1 = [\"127.0.0.1:8080\"]").unwrap();
        assert!(check(file.path()).is_err());
    }
}
