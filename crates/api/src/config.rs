//! Application configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// Server configuration with defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default `"0.0.0.0"`)
/// - `PORT`: listen port (default `3000`)
/// - `RUST_LOG`: tracing filter directive (default `"info"`)
/// - `DATABASE_URL`: selects the PostgreSQL backends and broker when set
/// - `REPLAY_DRAIN_INTERVAL_SECS`: periodic replay drain (default `30`)
/// - `REAP_INTERVAL_SECS`: sweep for dropped sockets (default `60`)
/// - `MEMBERSHIP_TTL_SECS`: silence after which another process's room
///   memberships are swept (default `180`)
/// - `CATALOG_FILE`: JSON file of stores and products to load at startup
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub replay_drain_interval: Duration,
    pub reap_interval: Duration,
    pub membership_ttl: Duration,
    pub catalog_file: Option<PathBuf>,
}

fn secs_var(name: &str, default: u64) -> Duration {
    let secs = std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(default);
    Duration::from_secs(secs)
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            replay_drain_interval: secs_var("REPLAY_DRAIN_INTERVAL_SECS", 30),
            reap_interval: secs_var("REAP_INTERVAL_SECS", 60),
            membership_ttl: secs_var("MEMBERSHIP_TTL_SECS", 180),
            catalog_file: std::env::var_os("CATALOG_FILE").map(PathBuf::from),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            replay_drain_interval: Duration::from_secs(30),
            reap_interval: Duration::from_secs(60),
            membership_ttl: Duration::from_secs(180),
            catalog_file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.port, 3000);
        assert!(config.database_url.is_none());
        assert_eq!(config.replay_drain_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_membership_ttl_outlasts_heartbeats() {
        let config = Config::default();
        assert_eq!(config.membership_ttl, Duration::from_secs(180));
        assert!(config.membership_ttl > config.reap_interval * 2);
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_zero_interval_falls_back() {
        assert_eq!(
            secs_var("API_TEST_SURELY_UNSET_INTERVAL", 30),
            Duration::from_secs(30)
        );
    }
}
