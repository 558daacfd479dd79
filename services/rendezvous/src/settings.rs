//! Service settings
//!
//! Loaded from `RENDEZVOUS_*` environment variables on top of built-in
//! defaults, e.g. `RENDEZVOUS_SESSION_TTL_SECS=60`.

use std::time::Duration;

use anyhow::Result;
use config::{Config, Environment};
use serde::Deserialize;

use crate::rate_limiter::RateLimiterConfig;

/// Rendezvous service settings
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Address the HTTP server binds to
    pub bind_addr: String,
    /// Lifetime of a login session
    pub session_ttl_secs: u64,
    /// Extra time a watcher waits beyond the session lifetime
    pub watch_margin_secs: u64,
    /// Expiry sweep period; defaults to a quarter of the session lifetime
    pub sweep_interval_secs: Option<u64>,
    /// Longest lifetime accepted on a device assertion
    pub assertion_max_age_secs: u64,
    pub login_max_attempts: u32,
    pub login_window_secs: u64,
    pub login_ban_secs: u64,
}

impl Settings {
    /// Load settings from the environment
    pub fn from_env() -> Result<Self> {
        let settings: Settings = Config::builder()
            .set_default("bind_addr", "0.0.0.0:3000")?
            .set_default("session_ttl_secs", 120)?
            .set_default("watch_margin_secs", 10)?
            .set_default("assertion_max_age_secs", 60)?
            .set_default("login_max_attempts", 5)?
            .set_default("login_window_secs", 300)?
            .set_default("login_ban_secs", 3600)?
            .add_source(Environment::with_prefix("RENDEZVOUS").try_parsing(true))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject combinations the protocol cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.session_ttl_secs == 0 {
            anyhow::bail!("session_ttl_secs must be positive");
        }
        // The sweep runs at whole-second granularity
        let interval = self.sweep_interval().as_secs();
        if interval == 0 {
            anyhow::bail!(
                "sweep interval must be at least one second; session_ttl_secs ({}) needs to be 4 or more",
                self.session_ttl_secs
            );
        }
        if interval * 4 > self.session_ttl_secs {
            anyhow::bail!(
                "sweep_interval_secs ({}) must be at most a quarter of session_ttl_secs ({})",
                interval,
                self.session_ttl_secs
            );
        }
        Ok(())
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn watch_margin(&self) -> Duration {
        Duration::from_secs(self.watch_margin_secs)
    }

    /// Expiry sweep period, rounded down to whole seconds
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(
            self.sweep_interval_secs
                .unwrap_or(self.session_ttl_secs / 4),
        )
    }

    pub fn rate_limiter(&self) -> RateLimiterConfig {
        RateLimiterConfig {
            max_attempts: self.login_max_attempts,
            window_seconds: self.login_window_secs,
            ban_duration_seconds: self.login_ban_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 3] = [
        "RENDEZVOUS_SESSION_TTL_SECS",
        "RENDEZVOUS_SWEEP_INTERVAL_SECS",
        "RENDEZVOUS_BIND_ADDR",
    ];

    fn clear() {
        for var in VARS {
            unsafe {
                std::env::remove_var(var);
            }
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear();

        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.bind_addr, "0.0.0.0:3000");
        assert_eq!(settings.session_ttl(), Duration::from_secs(120));
        assert_eq!(settings.sweep_interval(), Duration::from_secs(30));
        assert_eq!(settings.watch_margin(), Duration::from_secs(10));
        assert_eq!(settings.rate_limiter().max_attempts, 5);
    }

    #[test]
    #[serial]
    fn test_environment_overrides() {
        clear();
        unsafe {
            std::env::set_var("RENDEZVOUS_SESSION_TTL_SECS", "60");
            std::env::set_var("RENDEZVOUS_SWEEP_INTERVAL_SECS", "10");
        }

        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.session_ttl(), Duration::from_secs(60));
        assert_eq!(settings.sweep_interval(), Duration::from_secs(10));

        clear();
    }

    #[test]
    #[serial]
    fn test_sweep_interval_above_quarter_ttl_is_rejected() {
        clear();
        unsafe {
            std::env::set_var("RENDEZVOUS_SESSION_TTL_SECS", "60");
            std::env::set_var("RENDEZVOUS_SWEEP_INTERVAL_SECS", "20");
        }

        assert!(Settings::from_env().is_err());

        clear();
    }

    #[test]
    #[serial]
    fn test_short_ttl_without_whole_second_sweep_is_rejected() {
        clear();
        unsafe {
            std::env::set_var("RENDEZVOUS_SESSION_TTL_SECS", "3");
        }
        assert!(Settings::from_env().is_err());

        unsafe {
            std::env::set_var("RENDEZVOUS_SESSION_TTL_SECS", "6");
        }
        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.sweep_interval(), Duration::from_secs(1));

        unsafe {
            std::env::set_var("RENDEZVOUS_SWEEP_INTERVAL_SECS", "0");
        }
        assert!(Settings::from_env().is_err());

        clear();
    }
}
