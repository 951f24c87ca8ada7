//! Relay configuration

use crate::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default listen port
pub const DEFAULT_PORT: u16 = 1081;

/// Relay configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listen address, `host:port` (IPv6 as `[::1]:1081`)
    pub listen: String,

    /// Upstream SOCKS5 proxy to chain through; unset or empty connects directly
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream: Option<String>,

    /// Session limits
    pub limits: LimitsConfig,
}

/// Per-process and per-session resource limits.
///
/// Every limit is unset by default, which leaves sessions unbounded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum concurrent sessions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_sessions: Option<usize>,

    /// Outbound setup timeout (dial plus upstream chaining), seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,

    /// Time allowed from accept until the CONNECT request is read, seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handshake_timeout_secs: Option<u64>,

    /// Relay idle timeout per direction, seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_timeout_secs: Option<u64>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: format!("[::1]:{}", DEFAULT_PORT),
            upstream: None,
            limits: LimitsConfig::default(),
        }
    }
}

impl ProxyConfig {
    /// Upstream address with empty strings treated as unset
    pub fn upstream_address(&self) -> Option<&str> {
        self.upstream
            .as_deref()
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
    }

    /// Check the configuration before binding
    pub fn validate(&self) -> Result<()> {
        if self.listen.trim().is_empty() {
            return Err(ProxyError::config("Listen address is empty"));
        }

        if self.limits.max_sessions == Some(0) {
            return Err(ProxyError::config("max_sessions must be at least 1"));
        }

        for (name, value) in [
            ("connect_timeout_secs", self.limits.connect_timeout_secs),
            ("handshake_timeout_secs", self.limits.handshake_timeout_secs),
            ("idle_timeout_secs", self.limits.idle_timeout_secs),
        ] {
            if value == Some(0) {
                return Err(ProxyError::config(format!("{} must be positive", name)));
            }
        }

        Ok(())
    }

    /// Load configuration from file
    pub async fn load_from_file(path: &std::path::Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        toml::from_str(&content)
            .map_err(|e| ProxyError::config(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to file
    pub async fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProxyError::config(format!("Failed to serialize config: {}", e)))?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

impl LimitsConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout_secs.map(Duration::from_secs)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProxyConfig::default();
        assert_eq!(config.listen, "[::1]:1081");
        assert_eq!(config.upstream_address(), None);
        assert_eq!(config.limits.max_sessions, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_upstream_means_direct() {
        let config = ProxyConfig {
            upstream: Some("  ".to_string()),
            ..Default::default()
        };
        assert_eq!(config.upstream_address(), None);

        let config = ProxyConfig {
            upstream: Some("127.0.0.1:1081".to_string()),
            ..Default::default()
        };
        assert_eq!(config.upstream_address(), Some("127.0.0.1:1081"));
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = ProxyConfig::default();
        config.limits.max_sessions = Some(0);
        assert!(matches!(config.validate(), Err(ProxyError::Config(_))));

        let mut config = ProxyConfig::default();
        config.limits.idle_timeout_secs = Some(0);
        assert!(matches!(config.validate(), Err(ProxyError::Config(_))));

        let config = ProxyConfig {
            listen: String::new(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ProxyError::Config(_))));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: ProxyConfig = toml::from_str(
            r#"
            upstream = "10.0.0.1:1080"

            [limits]
            idle_timeout_secs = 300
            "#,
        )
        .unwrap();

        assert_eq!(config.listen, "[::1]:1081");
        assert_eq!(config.upstream_address(), Some("10.0.0.1:1080"));
        assert_eq!(config.limits.idle_timeout(), Some(Duration::from_secs(300)));
        assert_eq!(config.limits.connect_timeout(), None);
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");

        let mut config = ProxyConfig::default();
        config.listen = "127.0.0.1:9050".to_string();
        config.limits.max_sessions = Some(64);
        config.save_to_file(&path).await.unwrap();

        let loaded = ProxyConfig::load_from_file(&path).await.unwrap();
        assert_eq!(loaded, config);
    }
}
