// Server configuration
//
// Everything the HTTP layer needs besides the component configs owned by
// the outbox, bus, storage and sandbox crates.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::http::HeaderValue;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:9000";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Prefix applied to API routes (health stays at the root)
    pub api_prefix: String,
    /// Only needed when the client is served from a different origin
    pub cors_allowed_origins: Vec<HeaderValue>,
}

impl ServerConfig {
    /// - `BIND_ADDR` (default `0.0.0.0:9000`)
    /// - `API_PREFIX` (default empty), e.g. `/api`
    /// - `CORS_ALLOWED_ORIGINS`: comma separated origins
    pub fn from_env() -> Result<Self> {
        let bind_addr = std::env::var("BIND_ADDR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());

        Ok(Self {
            bind_addr: bind_addr
                .parse()
                .with_context(|| format!("invalid BIND_ADDR: {}", bind_addr))?,
            api_prefix: std::env::var("API_PREFIX").unwrap_or_default(),
            cors_allowed_origins: parse_origins(
                &std::env::var("CORS_ALLOWED_ORIGINS").unwrap_or_default(),
            ),
        })
    }
}

fn parse_origins(raw: &str) -> Vec<HeaderValue> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_origins() {
        let origins = parse_origins("https://a.example.com, https://b.example.com,,");
        assert_eq!(origins.len(), 2);
        assert_eq!(origins[0], "https://a.example.com");
        assert!(parse_origins("").is_empty());
    }

    #[test]
    fn test_default_bind_addr_parses() {
        let addr: SocketAddr = DEFAULT_BIND_ADDR.parse().unwrap();
        assert_eq!(addr.port(), 9000);
    }
}
