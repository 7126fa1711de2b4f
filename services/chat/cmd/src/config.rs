//! Configuration handling for the chat binary.
//!
//! Values come from, in increasing precedence: built-in defaults, the shared
//! YAML config file, `CHAT_*` environment variables, and command-line flags
//! (applied by `main`).

use anyhow::Result;
use chat_session::{Endpoint, SessionConfig, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_READ_CHUNK_SIZE};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// Chat service configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// Host the listener binds to / the connector dials
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Upper bound for one read from the peer
    pub read_chunk_size: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Deserialize)]
struct RootConfig {
    services: Option<ServicesConfig>,
}

#[derive(Debug, Deserialize)]
struct ServicesConfig {
    chat: Option<ServiceConfig>,
}

#[derive(Debug, Deserialize)]
struct ServiceConfig {
    args: Option<Vec<String>>,
    config: Option<HashMap<String, String>>,
}

impl ChatConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();

        match std::fs::read_to_string(&config_path) {
            Ok(content) => match serde_yaml::from_str::<RootConfig>(&content) {
                Ok(root_config) => {
                    config.apply_root_config(root_config);
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                }
                Err(e) => warn!(
                    "Failed to parse config file {:?} ({}), using defaults",
                    config_path.as_ref(),
                    e
                ),
            },
            Err(_) => info!(
                "Config file {:?} not found, using defaults",
                config_path.as_ref()
            ),
        }

        config.apply_environment_overrides();

        info!(
            "Final chat configuration: host={}, port={}, read_chunk_size={}",
            config.host, config.port, config.read_chunk_size
        );

        Ok(config)
    }

    /// Endpoint for the session
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }

    /// Session-level settings
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            read_chunk_size: self.read_chunk_size,
            ..SessionConfig::default()
        }
    }

    fn apply_root_config(&mut self, root_config: RootConfig) {
        if let Some(chat_service) = root_config.services.and_then(|s| s.chat) {
            self.apply_service_config(chat_service);
        }
    }

    fn apply_service_config(&mut self, service_config: ServiceConfig) {
        for arg in service_config.args.unwrap_or_default() {
            if let Some(port) = arg.strip_prefix("--port=") {
                self.set("services.chat.port", port);
            } else if let Some(host) = arg.strip_prefix("--host=") {
                self.set("services.chat.host", host);
            }
        }

        for (key, value) in service_config.config.unwrap_or_default() {
            self.set(&key, &value);
        }
    }

    /// Apply one dotted key. Unknown keys and unparsable values are ignored.
    fn set(&mut self, key: &str, value: &str) {
        match key {
            "services.chat.host" => {
                if !value.trim().is_empty() {
                    self.host = value.trim().to_string();
                }
            }
            "services.chat.port" => {
                if let Ok(port) = value.trim().parse::<u16>() {
                    self.port = port;
                }
            }
            "services.chat.read_chunk_size" => {
                if let Ok(size) = value.trim().parse::<usize>() {
                    if size > 0 {
                        self.read_chunk_size = size;
                    }
                }
            }
            _ => {}
        }
    }

    fn apply_environment_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        const OVERRIDES: [(&str, &str); 3] = [
            ("CHAT_HOST", "services.chat.host"),
            ("CHAT_PORT", "services.chat.port"),
            ("CHAT_READ_CHUNK_SIZE", "services.chat.read_chunk_size"),
        ];

        for (var, key) in OVERRIDES {
            if let Some(value) = lookup(var) {
                self.set(key, &value);
                info!("{} overridden by environment: {}", key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = ChatConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 15777);
        assert_eq!(config.read_chunk_size, 1024);
        assert_eq!(config.endpoint().to_string(), "127.0.0.1:15777");
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
supervisor:
  port: 50000

services:
  chat:
    enabled: true
    args:
      - --port=16000
    config:
      services.chat.host: "localhost"
      services.chat.read_chunk_size: "4096"
      services.chat.unknown: "ignored"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = ChatConfig::load_from_file(temp_file.path()).unwrap();

        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 16000);
        assert_eq!(config.read_chunk_size, 4096);
        assert_eq!(config.session_config().read_chunk_size, 4096);
        assert_eq!(config.session_config().quit_token, "/q");
    }

    #[test]
    fn test_config_map_wins_over_args() {
        let mut config = ChatConfig::default();
        config.apply_service_config(ServiceConfig {
            args: Some(vec!["--port=16000".into(), "--host=10.0.0.1".into()]),
            config: Some(HashMap::from([(
                "services.chat.port".to_string(),
                "17000".to_string(),
            )])),
        });
        assert_eq!(config.host, "10.0.0.1");
        assert_eq!(config.port, 17000);
    }

    #[test]
    fn test_missing_or_broken_file_falls_back_to_defaults() {
        let config = ChatConfig::load_from_file("/nonexistent/chat.yaml").unwrap();
        assert_eq!(config.port, ChatConfig::default().port);

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"services: [not, a, map").unwrap();
        let config = ChatConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.host, ChatConfig::default().host);
    }

    #[test]
    fn test_environment_overrides() {
        let env = HashMap::from([
            ("CHAT_PORT", "18000"),
            ("CHAT_HOST", "::1"),
            ("CHAT_READ_CHUNK_SIZE", "0"),
        ]);

        let mut config = ChatConfig::default();
        config.apply_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.port, 18000);
        assert_eq!(config.host, "::1");
        // zero is rejected
        assert_eq!(config.read_chunk_size, 1024);
    }
}
