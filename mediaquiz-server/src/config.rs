//! HTTP server settings.
//!
//! Everything the router and the binary need beyond the pipeline settings,
//! which live in [`MediaConfig`] and are embedded here.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

use mediaquiz_core::{MediaConfig, MediaError};

const DEFAULT_PORT: u16 = 3000;

/// Ten files of a few megabytes each plus form overhead.
const DEFAULT_BODY_LIMIT_MB: usize = 64;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub host: IpAddr,
    /// `None` allows any origin.
    pub allowed_origins: Option<Vec<String>>,
    pub body_limit_mb: usize,
    pub timeout_secs: u64,
    pub rate_limit_enabled: bool,
    pub rate_limit_per_sec: u64,
    pub rate_limit_burst: u32,
    /// Promotion, eviction, cache refresh and job cleanup schedules.
    pub background_tasks_enabled: bool,
    pub media: MediaConfig,
}

impl Default for Config {
    /// Loopback, no rate limiting and no schedules, suitable for tests.
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            allowed_origins: None,
            body_limit_mb: DEFAULT_BODY_LIMIT_MB,
            timeout_secs: 30,
            rate_limit_enabled: false,
            rate_limit_per_sec: 10,
            rate_limit_burst: 20,
            background_tasks_enabled: false,
            media: MediaConfig::default(),
        }
    }
}

impl Config {
    /// Read `PORT`, `HOST`, `ALLOWED_ORIGINS`, `BODY_LIMIT_MB`,
    /// `REQUEST_TIMEOUT_SECS`, `RATE_LIMIT_*` and `BACKGROUND_TASKS`, then the
    /// pipeline variables.
    ///
    /// Rate limiting and schedules are on unless explicitly set to `false`.
    pub fn from_env() -> mediaquiz_core::Result<Self> {
        let defaults = Self::default();

        let allowed_origins = std::env::var("ALLOWED_ORIGINS").ok().map(|origins| {
            origins
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        });

        Ok(Self {
            port: parsed("PORT", defaults.port)?,
            host: parsed("HOST", defaults.host)?,
            allowed_origins,
            body_limit_mb: parsed("BODY_LIMIT_MB", defaults.body_limit_mb)?,
            timeout_secs: parsed("REQUEST_TIMEOUT_SECS", defaults.timeout_secs)?,
            rate_limit_enabled: flag("RATE_LIMIT_ENABLED"),
            rate_limit_per_sec: parsed("RATE_LIMIT_PER_SEC", defaults.rate_limit_per_sec)?,
            rate_limit_burst: parsed("RATE_LIMIT_BURST", defaults.rate_limit_burst)?,
            background_tasks_enabled: flag("BACKGROUND_TASKS"),
            media: MediaConfig::from_env()?,
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn parsed<T: FromStr>(name: &str, default: T) -> mediaquiz_core::Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| MediaError::Config(format!("{name} has an invalid value: {raw}"))),
        Err(_) => Ok(default),
    }
}

fn flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| !v.trim().eq_ignore_ascii_case("false"))
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 3000);
        assert!(!config.rate_limit_enabled);
        assert!(!config.background_tasks_enabled);
        assert_eq!(config.socket_addr().to_string(), "127.0.0.1:3000");
    }

    #[test]
    fn test_parsed_rejects_garbage() {
        std::env::set_var("MEDIAQUIZ_TEST_PORT", "not-a-port");
        let err = parsed::<u16>("MEDIAQUIZ_TEST_PORT", 1).unwrap_err();
        assert!(matches!(err, MediaError::Config(_)));
        std::env::remove_var("MEDIAQUIZ_TEST_PORT");

        assert_eq!(parsed::<u16>("MEDIAQUIZ_TEST_UNSET_PORT", 7).unwrap(), 7);
    }

    #[test]
    fn test_flag_defaults_on() {
        assert!(flag("MEDIAQUIZ_TEST_UNSET_FLAG"));
        std::env::set_var("MEDIAQUIZ_TEST_FLAG", "FALSE");
        assert!(!flag("MEDIAQUIZ_TEST_FLAG"));
        std::env::remove_var("MEDIAQUIZ_TEST_FLAG");
    }
}
