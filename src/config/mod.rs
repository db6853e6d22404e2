//! Configuration management

use crate::protocol::{Credentials, HandshakeOptions};
use crate::session::SessionConfig;
use crate::transport::TransportConfig;
use crate::tunnel::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Client configuration
    pub client: Option<ClientConfig>,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, crate::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), crate::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| crate::Error::Config(format!("Failed to write config: {}", e)))
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Gateway address (`host`, `host:port`, IPv6 literal with or without brackets)
    pub host: String,
    pub username: String,
    pub password: String,
    /// Virtual hub to log into
    pub hub: String,
    /// Name of the TAP interface
    pub interface_name: String,
    /// TCP connect and TLS handshake timeout, each
    pub connect_timeout_secs: u64,
    pub keepalive_interval_secs: u64,
    pub dhcp_attempts: u32,
    pub dhcp_attempt_timeout_secs: u64,
    /// DHCP client command; the interface name is appended
    pub dhcp_command: String,
    pub max_connection: u32,
    pub use_encrypt: bool,
    pub use_compress: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            username: String::new(),
            password: String::new(),
            hub: "DEFAULT".to_string(),
            interface_name: crate::DEFAULT_INTERFACE_NAME.to_string(),
            connect_timeout_secs: 30,
            keepalive_interval_secs: crate::tunnel::KEEPALIVE_INTERVAL,
            dhcp_attempts: 3,
            dhcp_attempt_timeout_secs: 15,
            dhcp_command: "dhclient -1".to_string(),
            max_connection: 8,
            use_encrypt: true,
            use_compress: false,
        }
    }
}

impl ClientConfig {
    /// Transport settings for the gateway dial
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout: self.connect_timeout_secs,
        }
    }

    /// Session parameters derived from this section
    pub fn session_config(&self) -> SessionConfig {
        let mut session = SessionConfig::new(
            self.host.clone(),
            Credentials::new(self.username.clone(), self.password.clone()),
        );
        session.options = HandshakeOptions {
            hub: self.hub.clone(),
            max_connection: self.max_connection,
            use_encrypt: self.use_encrypt,
            use_compress: self.use_compress,
        };
        session.interface_name = self.interface_name.clone();
        session.pipeline = PipelineConfig {
            keepalive_interval: Duration::from_secs(self.keepalive_interval_secs.max(1)),
            ..PipelineConfig::default()
        };
        session.dhcp_attempts = self.dhcp_attempts;
        session.dhcp_attempt_timeout = Duration::from_secs(self.dhcp_attempt_timeout_secs);
        session
    }
}

/// Output format of console and file logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Where log events go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSink {
    /// Discard everything
    Off,
    /// Standard error
    #[default]
    Console,
    /// Append to `file`
    File,
    /// Line-oriented TLS collector at `remote`
    Remote,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or an `EnvFilter` directive
    pub level: String,
    pub format: LogFormat,
    pub sink: LogSink,
    /// Log file path, for the `file` sink
    pub file: Option<String>,
    /// Collector `host:port`, for the `remote` sink
    pub remote: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            sink: LogSink::Console,
            file: None,
            remote: None,
        }
    }
}

/// Generate example configuration
pub fn generate_example_config() -> Config {
    Config {
        client: Some(ClientConfig {
            host: "vpn.example.com".to_string(),
            username: "user".to_string(),
            password: "password".to_string(),
            ..ClientConfig::default()
        }),
        logging: LoggingConfig::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_keys() {
        let config: Config = toml::from_str(
            r#"
            [client]
            host = "vpn.example.com:8443"
            username = "alice"
            password = "pw"
            "#,
        )
        .unwrap();

        let client = config.client.unwrap();
        assert_eq!(client.hub, "DEFAULT");
        assert_eq!(client.interface_name, "vpn_go");
        assert_eq!(client.connect_timeout_secs, 30);
        assert_eq!(client.dhcp_attempts, 3);
        assert_eq!(config.logging.sink, LogSink::Console);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_logging_section() {
        let config: Config = toml::from_str(
            r#"
            [logging]
            level = "debug"
            format = "json"
            sink = "remote"
            remote = "logs.example.com:6514"
            "#,
        )
        .unwrap();

        assert!(config.client.is_none());
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.sink, LogSink::Remote);
        assert_eq!(config.logging.remote.as_deref(), Some("logs.example.com:6514"));
    }

    #[test]
    fn test_session_config() {
        let client = ClientConfig {
            host: "10.0.0.1".to_string(),
            username: "alice".to_string(),
            password: "pw".to_string(),
            hub: "VPN".to_string(),
            keepalive_interval_secs: 5,
            dhcp_attempt_timeout_secs: 2,
            use_compress: true,
            ..ClientConfig::default()
        };

        let session = client.session_config();
        assert_eq!(session.host, "10.0.0.1");
        assert_eq!(session.credentials.username, "alice");
        assert_eq!(session.options.hub, "VPN");
        assert!(session.options.use_compress);
        assert_eq!(session.pipeline.keepalive_interval, Duration::from_secs(5));
        assert_eq!(session.dhcp_attempt_timeout, Duration::from_secs(2));
        assert_eq!(client.transport_config().connect_timeout, 30);
    }

    #[test]
    fn test_example_roundtrips_through_toml() {
        let example = generate_example_config();
        let text = toml::to_string_pretty(&example).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.client.unwrap().host, "vpn.example.com");
    }
}
