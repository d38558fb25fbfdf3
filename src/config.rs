//! Server configuration
//!
//! Loaded once at startup from environment variables (after `.env`).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address (default: 0.0.0.0:5000)
    pub bind_addr: SocketAddr,
    /// Only origin allowed by CORS (default: http://localhost:3000)
    pub cors_origin: String,
    /// Requests per client IP per window (default: 30)
    pub rate_limit_per_window: u32,
    /// Fixed rate-limit window (60s)
    pub rate_limit_window: Duration,
    /// Use the first X-Forwarded-For address as client IP (default: false)
    pub trust_forwarded_for: bool,
    /// JSON body cap in bytes (default: 1MB)
    pub max_body_bytes: usize,
    /// Bytes kept from each of stdout and stderr (default: 64KB)
    pub max_output_bytes: usize,
    /// Requests executing at once; the rest wait (default: 16)
    pub max_concurrent_runs: usize,
    /// Parent directory of per-request workspaces
    pub workspace_dir: PathBuf,
    /// Optional TOML file replacing the embedded language profiles
    pub languages_config: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            cors_origin: "http://localhost:3000".to_string(),
            rate_limit_per_window: 30,
            rate_limit_window: Duration::from_secs(60),
            trust_forwarded_for: false,
            max_body_bytes: 1024 * 1024,
            max_output_bytes: 64 * 1024,
            max_concurrent_runs: 16,
            workspace_dir: std::env::temp_dir().join("coderunner"),
            languages_config: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let text = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Ok(Self {
            bind_addr: parsed(&lookup, "BIND_ADDR")?.unwrap_or(defaults.bind_addr),
            cors_origin: text("CORS_ORIGIN").unwrap_or(defaults.cors_origin),
            rate_limit_per_window: parsed(&lookup, "RATE_LIMIT_PER_MINUTE")?
                .unwrap_or(defaults.rate_limit_per_window),
            rate_limit_window: defaults.rate_limit_window,
            trust_forwarded_for: text("TRUST_FORWARDED_FOR")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.trust_forwarded_for),
            max_body_bytes: parsed(&lookup, "MAX_BODY_BYTES")?.unwrap_or(defaults.max_body_bytes),
            max_output_bytes: parsed(&lookup, "MAX_OUTPUT_BYTES")?
                .unwrap_or(defaults.max_output_bytes),
            max_concurrent_runs: parsed(&lookup, "MAX_CONCURRENT_RUNS")?
                .unwrap_or(defaults.max_concurrent_runs),
            workspace_dir: text("WORKSPACE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_dir),
            languages_config: text("LANGUAGES_CONFIG").map(PathBuf::from),
        })
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key).map(|v| v.trim().to_string()) {
        Some(value) if !value.is_empty() => value
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid value for {}: {:?}", key, value)),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_map(pairs: &[(&str, &str)]) -> Result<ServerConfig> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = from_map(&[]).unwrap();
        assert_eq!(config.bind_addr.port(), 5000);
        assert_eq!(config.cors_origin, "http://localhost:3000");
        assert_eq!(config.rate_limit_per_window, 30);
        assert_eq!(config.rate_limit_window, Duration::from_secs(60));
        assert_eq!(config.max_body_bytes, 1_048_576);
        assert!(!config.trust_forwarded_for);
        assert!(config.languages_config.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = from_map(&[
            ("BIND_ADDR", "127.0.0.1:8080"),
            ("CORS_ORIGIN", "https://dsa.example.com"),
            ("RATE_LIMIT_PER_MINUTE", "5"),
            ("TRUST_FORWARDED_FOR", "true"),
            ("MAX_CONCURRENT_RUNS", "2"),
            ("WORKSPACE_DIR", "/var/lib/coderunner"),
            ("LANGUAGES_CONFIG", "/etc/coderunner/languages.toml"),
        ])
        .unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.cors_origin, "https://dsa.example.com");
        assert_eq!(config.rate_limit_per_window, 5);
        assert!(config.trust_forwarded_for);
        assert_eq!(config.max_concurrent_runs, 2);
        assert_eq!(config.workspace_dir, PathBuf::from("/var/lib/coderunner"));
        assert_eq!(
            config.languages_config,
            Some(PathBuf::from("/etc/coderunner/languages.toml"))
        );
    }

    #[test]
    fn test_blank_values_keep_defaults() {
        let config = from_map(&[("MAX_BODY_BYTES", "  "), ("CORS_ORIGIN", "")]).unwrap();
        assert_eq!(config.max_body_bytes, 1_048_576);
        assert_eq!(config.cors_origin, "http://localhost:3000");
    }

    #[test]
    fn test_invalid_number_is_an_error() {
        let err = from_map(&[("RATE_LIMIT_PER_MINUTE", "lots")]).unwrap_err();
        assert!(err.to_string().contains("RATE_LIMIT_PER_MINUTE"));
    }
}
