use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ProxyError, Result};

/// Process-wide settings, immutable after startup.
#[derive(Clone, Debug, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default = "default_cert_file")]
    pub cert_file: PathBuf,
    #[serde(default = "default_key_file")]
    pub key_file: PathBuf,
    pub api_key: String,
    pub backend_urls: Vec<String>,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
    #[serde(default = "default_probe_interval_seconds")]
    pub probe_interval_seconds: u64,
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub debug: bool,
}

fn default_listen_port() -> u16 {
    8443
}

fn default_cert_file() -> PathBuf {
    PathBuf::from("ssl/server.crt")
}

fn default_key_file() -> PathBuf {
    PathBuf::from("ssl/server.key")
}

fn default_cache_capacity() -> usize {
    1000
}

fn default_cache_ttl_seconds() -> u64 {
    300
}

fn default_probe_interval_seconds() -> u64 {
    1
}

fn default_max_failures() -> u32 {
    3
}

fn default_max_retries() -> u32 {
    2
}

impl ProxyConfig {
    /// A config with every knob at its default. Callers still need
    /// [`ProxyConfig::validate`] once overrides are applied.
    pub fn new(api_key: impl Into<String>, backend_urls: Vec<String>) -> Self {
        Self {
            listen_port: default_listen_port(),
            cert_file: default_cert_file(),
            key_file: default_key_file(),
            api_key: api_key.into(),
            backend_urls,
            cache_capacity: default_cache_capacity(),
            cache_ttl_seconds: default_cache_ttl_seconds(),
            probe_interval_seconds: default_probe_interval_seconds(),
            max_failures: default_max_failures(),
            max_retries: default_max_retries(),
            debug: false,
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: ProxyConfig =
            toml::from_str(raw).map_err(|err| ProxyError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_key.is_empty() {
            return Err(ProxyError::Config("api_key must not be empty".to_string()));
        }
        if self.backend_urls.is_empty() {
            return Err(ProxyError::Config(
                "backend_urls must list at least one upstream".to_string(),
            ));
        }
        for raw in &self.backend_urls {
            let url = url::Url::parse(raw)
                .map_err(|err| ProxyError::Config(format!("invalid backend url {raw}: {err}")))?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(ProxyError::Config(format!(
                    "backend url {raw} must use http or https"
                )));
            }
        }
        if self.cache_capacity == 0 {
            return Err(ProxyError::Config(
                "cache_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config = ProxyConfig::from_toml_str(
            r#"
            api_key = "test-api-key-123"
            backend_urls = ["https://127.0.0.1:8000"]
            "#,
        )
        .unwrap();

        assert_eq!(config.listen_port, 8443);
        assert_eq!(config.cache_capacity, 1000);
        assert_eq!(config.cache_ttl_seconds, 300);
        assert_eq!(config.probe_interval_seconds, 1);
        assert_eq!(config.max_failures, 3);
        assert_eq!(config.max_retries, 2);
        assert!(!config.debug);
    }

    #[test]
    fn rejects_empty_backend_list() {
        let err = ProxyConfig::from_toml_str(
            r#"
            api_key = "k"
            backend_urls = []
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("backend_urls"));
    }

    #[test]
    fn rejects_non_http_backend_url() {
        let err = ProxyConfig::from_toml_str(
            r#"
            api_key = "k"
            backend_urls = ["ftp://127.0.0.1:8000"]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("http or https"));
    }
}
