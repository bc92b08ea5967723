use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub quic_host: String,
    pub quic_port: u16,
    /// Streams held at once before create requests are refused
    pub max_streams: usize,
    /// Largest accepted chunk payload in bytes
    pub max_chunk_size: usize,
    /// Specification tokens accepted at registration; empty accepts any
    pub specifications: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            quic_host: "0.0.0.0".to_string(),
            quic_port: 8443,
            max_streams: 64,
            max_chunk_size: 1024 * 1024,
            specifications: Vec::new(),
        }
    }
}

impl Config {
    /// Defaults overridden by `PLATFORM_SERVER_*` environment variables
    pub fn load() -> Result<Self> {
        Self::load_from(|key| std::env::var(key).ok())
    }

    fn load_from<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup("PLATFORM_SERVER_HOST") {
            config.quic_host = host;
        }
        if let Some(port) = lookup("PLATFORM_SERVER_PORT") {
            config.quic_port = port
                .parse()
                .with_context(|| format!("Invalid PLATFORM_SERVER_PORT: {}", port))?;
        }
        if let Some(max) = lookup("PLATFORM_SERVER_MAX_STREAMS") {
            config.max_streams = max
                .parse()
                .with_context(|| format!("Invalid PLATFORM_SERVER_MAX_STREAMS: {}", max))?;
        }
        if let Some(size) = lookup("PLATFORM_SERVER_MAX_CHUNK_SIZE") {
            config.max_chunk_size = size
                .parse()
                .with_context(|| format!("Invalid PLATFORM_SERVER_MAX_CHUNK_SIZE: {}", size))?;
        }
        if let Some(specs) = lookup("PLATFORM_SERVER_SPECIFICATIONS") {
            config.specifications = specs
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        Ok(config)
    }

    pub fn quic_addr(&self) -> String {
        format!("{}:{}", self.quic_host, self.quic_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("PLATFORM_SERVER_PORT", "9443"),
            ("PLATFORM_SERVER_MAX_STREAMS", "2"),
            ("PLATFORM_SERVER_SPECIFICATIONS", "spec-1, spec-2,"),
        ]
        .into_iter()
        .collect();

        let config = Config::load_from(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.quic_addr(), "0.0.0.0:9443");
        assert_eq!(config.max_streams, 2);
        assert_eq!(config.max_chunk_size, 1024 * 1024);
        assert_eq!(config.specifications, vec!["spec-1", "spec-2"]);
    }

    #[test]
    fn test_invalid_number_rejected() {
        let result = Config::load_from(|key| {
            (key == "PLATFORM_SERVER_MAX_STREAMS").then(|| "many".to_string())
        });
        assert!(result.is_err());
    }
}
