//! Entry point configuration: the routing document plus listener settings.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use nimbus_core::config::RoutingConfig;
use nimbus_core::ConfigError;

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// PEM files for TLS termination.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TlsFiles {
    /// Certificate chain.
    pub cert: PathBuf,
    /// Private key.
    pub key: PathBuf,
}

/// The whole configuration file of the entry point.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Address to accept users on.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Serve HTTPS when present.
    #[serde(default)]
    pub tls: Option<TlsFiles>,
    /// Router settings, sites and latencies.
    #[serde(flatten)]
    pub routing: RoutingConfig,
}

impl GatewayConfig {
    /// Read and parse a configuration file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_keys_sit_beside_listener_keys() {
        let config: GatewayConfig = serde_json::from_str(
            r#"{
                "listen": "127.0.0.1:9000",
                "tls": { "cert": "/etc/nimbus/cert.pem", "key": "/etc/nimbus/key.pem" },
                "latencySlaMs": 40,
                "batchPeriodMs": 100,
                "siteResponseTimeoutMs": 2000,
                "maxRequestPeriodMs": 5000,
                "sites": [
                    { "name": "LOCAL", "admissionController": "-", "loadBalancer": "127.0.0.1",
                      "kind": { "type": "promiscuous" } }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.listen, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.tls.unwrap().key, PathBuf::from("/etc/nimbus/key.pem"));
        assert_eq!(config.routing.latency_sla_ms, 40.0);
        assert_eq!(config.routing.sites[0].name, "LOCAL");
        assert!(config.routing.latencies.is_empty());
    }

    #[test]
    fn listener_defaults_to_plain_http_on_8080() {
        let config: GatewayConfig = serde_json::from_str(
            r#"{ "latencySlaMs": 40, "batchPeriodMs": 100, "siteResponseTimeoutMs": 2000,
                 "maxRequestPeriodMs": 5000, "sites": [] }"#,
        )
        .unwrap();

        assert_eq!(config.listen, default_listen());
        assert!(config.tls.is_none());
    }

    #[test]
    fn missing_file_is_reported_with_its_path() {
        let err = GatewayConfig::from_path(Path::new("/no/such/nimbus.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { ref path, .. } if path == Path::new("/no/such/nimbus.json")));
    }
}
