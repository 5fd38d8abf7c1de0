use secrecy::{ExposeSecret, SecretString};
use std::env;
use std::time::Duration;

pub const API_KEY_ENV: &str = "ONENET_API_KEY";
pub const DEFAULT_BASE_URL: &str = "https://api.heclouds.com";
pub const DEFAULT_DATASTREAMS: &str = "bat_tem,Hum";
pub const DEFAULT_LIMIT: u32 = 20;

const MIN_TIMEOUT_SECS: u64 = 1;
const MAX_TIMEOUT_SECS: u64 = 15;

/// Gateway configuration, built once at startup and shared through router state.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: Option<SecretString>,
    pub upstream_base_url: String,
    pub upstream_timeout: Duration,
    pub http_addr: String,
    pub normalize: bool,
    pub network_probe_url: String,
}

impl Config {
    pub fn from_env() -> Self {
        let api_key = env::var(API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(SecretString::from);
        let upstream_base_url =
            env::var("ONENET_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let timeout_secs: u64 = env::var("UPSTREAM_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);
        let http_addr = env::var("HTTP_ADDR").unwrap_or_else(|_| "0.0.0.0:8888".to_string());
        let normalize = env::var("NORMALIZE_RESPONSE")
            .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off"))
            .unwrap_or(true);
        let network_probe_url =
            env::var("NETWORK_PROBE_URL").unwrap_or_else(|_| "https://www.baidu.com".to_string());

        Self {
            api_key,
            upstream_base_url,
            upstream_timeout: clamp_timeout(timeout_secs),
            http_addr,
            normalize,
            network_probe_url,
        }
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_ref().map(|key| key.expose_secret())
    }

    pub fn api_key_len(&self) -> usize {
        self.api_key().map_or(0, str::len)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            upstream_base_url: DEFAULT_BASE_URL.to_string(),
            upstream_timeout: Duration::from_secs(10),
            http_addr: "0.0.0.0:8888".to_string(),
            normalize: true,
            network_probe_url: "https://www.baidu.com".to_string(),
        }
    }
}

fn clamp_timeout(secs: u64) -> Duration {
    Duration::from_secs(secs.clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_clamped() {
        assert_eq!(clamp_timeout(0), Duration::from_secs(1));
        assert_eq!(clamp_timeout(12), Duration::from_secs(12));
        assert_eq!(clamp_timeout(60), Duration::from_secs(15));
    }

    #[test]
    fn test_api_key_len_without_key() {
        let config = Config::default();
        assert_eq!(config.api_key(), None);
        assert_eq!(config.api_key_len(), 0);
    }

    #[test]
    fn test_api_key_exposed_only_on_request() {
        let config = Config {
            api_key: Some(SecretString::from("abc123".to_string())),
            ..Config::default()
        };
        assert_eq!(config.api_key(), Some("abc123"));
        assert_eq!(config.api_key_len(), 6);
        assert!(!format!("{:?}", config).contains("abc123"));
    }
}
