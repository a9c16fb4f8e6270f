//! Configuration handling for the ARQ link binary.
//!
//! Settings come from an optional YAML file, then environment variables,
//! then command-line flags (applied by `main`).

use anyhow::Result;
use arq_session::SessionConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Link process configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkConfig {
    /// Address to accept one peer on
    pub listen: Option<SocketAddr>,
    /// Address of the peer to dial
    pub connect: Option<SocketAddr>,
    /// Retransmission interval (milliseconds)
    pub retry_interval_ms: u64,
    /// Heartbeat ACK interval (milliseconds)
    pub ack_interval_ms: u64,
    /// Transport read buffer size in bytes
    pub read_buffer_size: usize,
    /// Corrupt the first transmission of the first N distinct outgoing data frames
    pub corrupt_first: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            listen: None,
            connect: None,
            retry_interval_ms: 100,
            ack_interval_ms: 100,
            read_buffer_size: 4 * 1024,
            corrupt_first: 0,
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Deserialize)]
struct RootConfig {
    link: Option<LinkSection>,
}

#[derive(Debug, Deserialize)]
struct LinkSection {
    listen: Option<SocketAddr>,
    connect: Option<SocketAddr>,
    retry_interval_ms: Option<u64>,
    ack_interval_ms: Option<u64>,
    read_buffer_size: Option<usize>,
    corrupt_first: Option<usize>,
}

impl LinkConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();

        if let Ok(content) = std::fs::read_to_string(&config_path) {
            match serde_yaml::from_str::<RootConfig>(&content) {
                Ok(root_config) => {
                    config.apply_root_config(root_config);
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                }
                Err(e) => warn!(
                    "Failed to parse config file {:?}, using defaults: {}",
                    config_path.as_ref(),
                    e
                ),
            }
        } else {
            info!("Config file {:?} not found, using defaults", config_path.as_ref());
        }

        config.apply_environment_overrides(|key| std::env::var(key).ok());

        info!(
            "Final link configuration: listen={:?}, connect={:?}, retry_interval={}ms, ack_interval={}ms",
            config.listen, config.connect, config.retry_interval_ms, config.ack_interval_ms
        );

        Ok(config)
    }

    /// Session settings derived from this configuration
    pub fn session_config(&self, label: &str) -> SessionConfig {
        SessionConfig::default()
            .with_label(label)
            .with_retry_interval(Duration::from_millis(self.retry_interval_ms))
            .with_ack_interval(Duration::from_millis(self.ack_interval_ms))
            .with_read_buffer_size(self.read_buffer_size)
    }

    fn apply_root_config(&mut self, root_config: RootConfig) {
        let Some(link) = root_config.link else {
            return;
        };

        if link.listen.is_some() {
            self.listen = link.listen;
        }
        if link.connect.is_some() {
            self.connect = link.connect;
        }
        if let Some(ms) = link.retry_interval_ms {
            self.retry_interval_ms = ms;
        }
        if let Some(ms) = link.ack_interval_ms {
            self.ack_interval_ms = ms;
        }
        if let Some(size) = link.read_buffer_size {
            self.read_buffer_size = size;
        }
        if let Some(n) = link.corrupt_first {
            self.corrupt_first = n;
        }
    }

    /// Apply environment variable overrides read through `lookup`
    fn apply_environment_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(listen) = lookup("ARQ_LISTEN") {
            match listen.parse::<SocketAddr>() {
                Ok(addr) => {
                    self.listen = Some(addr);
                    info!("Listen address overridden by environment: {}", addr);
                }
                Err(e) => warn!("Ignoring ARQ_LISTEN={:?}: {}", listen, e),
            }
        }

        if let Some(connect) = lookup("ARQ_CONNECT") {
            match connect.parse::<SocketAddr>() {
                Ok(addr) => {
                    self.connect = Some(addr);
                    info!("Connect address overridden by environment: {}", addr);
                }
                Err(e) => warn!("Ignoring ARQ_CONNECT={:?}: {}", connect, e),
            }
        }

        if let Some(ms) = lookup("ARQ_RETRY_INTERVAL_MS").and_then(|v| v.parse::<u64>().ok()) {
            self.retry_interval_ms = ms;
            info!("Retry interval overridden by environment: {}ms", ms);
        }

        if let Some(ms) = lookup("ARQ_ACK_INTERVAL_MS").and_then(|v| v.parse::<u64>().ok()) {
            self.ack_interval_ms = ms;
            info!("ACK interval overridden by environment: {}ms", ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = LinkConfig::default();
        assert_eq!(config.listen, None);
        assert_eq!(config.connect, None);
        assert_eq!(config.retry_interval_ms, 100);
        assert_eq!(config.ack_interval_ms, 100);
        assert_eq!(config.corrupt_first, 0);

        let session = config.session_config("link");
        assert_eq!(session.retry_interval, Duration::from_millis(100));
        assert_eq!(session.ack_interval, Duration::from_millis(100));
        assert_eq!(session.read_buffer_size, 4 * 1024);
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
link:
  connect: 127.0.0.1:9600
  retry_interval_ms: 250
  corrupt_first: 2
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = LinkConfig::load_from_file(temp_file.path()).unwrap();

        assert_eq!(config.connect, Some("127.0.0.1:9600".parse().unwrap()));
        assert_eq!(config.retry_interval_ms, 250);
        assert_eq!(config.corrupt_first, 2);
        assert_eq!(config.read_buffer_size, 4 * 1024);
    }

    #[test]
    fn test_invalid_file_uses_defaults() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"link: [not, a, map").unwrap();

        let config = LinkConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.read_buffer_size, 4 * 1024);
        assert_eq!(config.corrupt_first, 0);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = LinkConfig::load_from_file(dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.read_buffer_size, 4 * 1024);
    }

    #[test]
    fn test_environment_overrides() {
        let env: HashMap<&str, &str> = [
            ("ARQ_LISTEN", "0.0.0.0:9700"),
            ("ARQ_CONNECT", "not an address"),
            ("ARQ_RETRY_INTERVAL_MS", "40"),
            ("ARQ_ACK_INTERVAL_MS", "fast"),
        ]
        .into_iter()
        .collect();

        let mut config = LinkConfig::default();
        config.apply_environment_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.listen, Some("0.0.0.0:9700".parse().unwrap()));
        assert_eq!(config.connect, None);
        assert_eq!(config.retry_interval_ms, 40);
        assert_eq!(config.ack_interval_ms, 100);
    }
}
