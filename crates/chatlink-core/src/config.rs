//! Channel configuration.
//!
//! ```yaml
//! endpoint:
//!   secure: false
//!   host: localhost
//!   port: 8080
//! reconnect:
//!   max_attempts: 5
//!   delay_ms: 3000
//! connect_timeout_ms: 10000   # optional; omitted = wait forever
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::endpoint::Endpoint;
use crate::error::ChannelError;
use crate::policy::ReconnectConfig;

/// Top-level configuration for a [`Channel`](crate::Channel).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default)]
    pub endpoint: Endpoint,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    /// Give up on a transport open after this many milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,
}

impl ChannelConfig {
    /// Config for `endpoint` with default reconnect settings.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            ..Self::default()
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ChannelError> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| ChannelError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ChannelError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| ChannelError::Config(format!("{}: {e}", path.display())))?;
        Self::from_yaml_str(&yaml)
    }

    pub fn validate(&self) -> Result<(), ChannelError> {
        if self.endpoint.host.trim().is_empty() {
            return Err(ChannelError::Config("endpoint.host must not be empty".into()));
        }
        if !self.endpoint.path.starts_with('/') {
            return Err(ChannelError::Config(format!(
                "endpoint.path must start with '/': {}",
                self.endpoint.path
            )));
        }
        if !(self.reconnect.multiplier >= 1.0) {
            return Err(ChannelError::Config(
                "reconnect.multiplier must be >= 1.0".into(),
            ));
        }
        if self.connect_timeout_ms == Some(0) {
            return Err(ChannelError::Config(
                "connect_timeout_ms must be positive when set".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_gives_defaults() {
        let config = ChannelConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, ChannelConfig::default());
        assert_eq!(config.endpoint.port, Some(8080));
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.reconnect.delay_ms, 3_000);
        assert!(config.connect_timeout().is_none());
    }

    #[test]
    fn partial_yaml_overrides() {
        let yaml = r#"
endpoint:
  secure: true
  host: tickets.example.com
reconnect:
  max_attempts: 2
connect_timeout_ms: 1500
"#;
        let config = ChannelConfig::from_yaml_str(yaml).unwrap();
        assert!(config.endpoint.secure);
        assert_eq!(config.endpoint.port, None);
        assert_eq!(config.endpoint.path, "/ws/chat");
        assert_eq!(config.reconnect.max_attempts, 2);
        assert_eq!(config.reconnect.delay_ms, 3_000);
        assert_eq!(config.connect_timeout(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(ChannelConfig::from_yaml_str("endpoint: {host: ''}").is_err());
        assert!(ChannelConfig::from_yaml_str("endpoint: {path: 'ws'}").is_err());
        assert!(ChannelConfig::from_yaml_str("reconnect: {multiplier: 0.5}").is_err());
        assert!(ChannelConfig::from_yaml_str("connect_timeout_ms: 0").is_err());
        assert!(ChannelConfig::from_yaml_str("reconnect: [1, 2]").is_err());
    }
}
