//! Configuration module

use std::time::Duration;

use serde::Deserialize;

use crate::models::{Credentials, DeviceClass, Vendor};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub adapters: AdapterConfig,
    /// Devices polled for as long as the process runs
    #[serde(default)]
    pub devices: Vec<WatchedDevice>,
}

/// Scheduler timing knobs
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Delay between the last unsubscribe and teardown
    #[serde(default = "default_grace_timeout")]
    pub grace_timeout_secs: u64,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
    /// Default per-host poll interval
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Used when the status store has no history interval setting
    #[serde(default = "default_history_interval")]
    pub history_interval_secs: u64,
    /// Concurrent polls per scheduler
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            grace_timeout_secs: default_grace_timeout(),
            cleanup_interval_secs: default_cleanup_interval(),
            poll_interval_ms: default_poll_interval(),
            history_interval_secs: default_history_interval(),
            max_workers: default_max_workers(),
            backoff_base_secs: default_backoff_base(),
            backoff_max_secs: default_backoff_max(),
        }
    }
}

impl MonitorConfig {
    pub fn grace_timeout(&self) -> Duration {
        Duration::from_secs(self.grace_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(100))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Max entries per named store
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    /// TTL applied when `set` is called without one
    #[serde(default)]
    pub default_ttl_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            default_ttl_secs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// In-memory store when unset
    #[serde(default)]
    pub mysql_url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            mysql_url: None,
            max_connections: default_max_connections(),
        }
    }
}

/// Per-call device timeouts
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    /// Accept self-signed device certificates
    #[serde(default = "default_true")]
    pub accept_invalid_certs: bool,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            accept_invalid_certs: true,
            ssh_port: default_ssh_port(),
        }
    }
}

impl AdapterConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs.max(1))
    }
}

/// Statically configured device
#[derive(Debug, Clone, Deserialize)]
pub struct WatchedDevice {
    pub host: String,
    pub class: DeviceClass,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    /// Inline login; when incomplete, credentials come from the registry
    #[serde(default)]
    pub vendor: Option<Vendor>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

impl WatchedDevice {
    pub fn inline_credentials(&self) -> Option<Credentials> {
        Some(Credentials::new(
            self.username.as_deref()?,
            self.password.as_deref()?,
            self.vendor?,
            self.port,
        ))
    }
}

fn default_grace_timeout() -> u64 {
    30
}

fn default_cleanup_interval() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    2000
}

fn default_history_interval() -> u64 {
    300
}

fn default_max_workers() -> usize {
    16
}

fn default_backoff_base() -> u64 {
    5
}

fn default_backoff_max() -> u64 {
    60
}

fn default_cache_capacity() -> usize {
    1024
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_read_timeout() -> u64 {
    10
}

fn default_max_connections() -> u32 {
    10
}

fn default_ssh_port() -> u16 {
    22
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::Environment::with_prefix("DEVMON").separator("__"))
            .build()?;

        let config: Config = settings.try_deserialize().unwrap_or_else(|e| {
            tracing::warn!("Configuration invalid, using defaults: {}", e);
            Config::default()
        });

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.monitor.grace_timeout(), Duration::from_secs(30));
        assert_eq!(config.monitor.cleanup_interval(), Duration::from_secs(10));
        assert_eq!(config.monitor.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.monitor.history_interval_secs, 300);
        assert!(config.devices.is_empty());
    }

    #[test]
    fn test_partial_json_uses_field_defaults() {
        let config: Config = serde_json::from_str(
            r#"{
                "monitor": { "grace_timeout_secs": 5 },
                "devices": [ { "host": "10.0.0.1", "class": "router", "vendor": "mikrotik" } ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.monitor.grace_timeout_secs, 5);
        assert_eq!(config.monitor.poll_interval_ms, 2000);
        assert_eq!(config.devices[0].class, DeviceClass::Router);
        assert_eq!(config.devices[0].vendor, Some(Vendor::Mikrotik));
        // No username/password: resolved through the registry
        assert!(config.devices[0].inline_credentials().is_none());
        assert_eq!(config.database.max_connections, 10);
    }

    #[test]
    fn test_inline_credentials() {
        let device: WatchedDevice = serde_json::from_str(
            r#"{ "host": "10.0.0.2", "class": "access_point", "vendor": "ubiquiti",
                 "username": "ubnt", "password": "pw" }"#,
        )
        .unwrap();
        let creds = device.inline_credentials().unwrap();
        assert_eq!(creds.vendor, Vendor::Ubiquiti);
        assert_eq!(creds.effective_port(), 443);
    }
}
