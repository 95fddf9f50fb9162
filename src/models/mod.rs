//! Data models for the device monitor
//!
//! Normalized telemetry snapshots shared by every adapter, plus the
//! credential and classification types the scheduler passes around.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::MonitorError;

// ============================================================================
// Classification
// ============================================================================

/// Device vendor, selects the adapter (and therefore the wire protocol)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    /// RouterOS binary API
    Mikrotik,
    /// airOS HTTP with a CSRF-token session
    Ubiquiti,
}

impl Vendor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Vendor::Mikrotik => "mikrotik",
            Vendor::Ubiquiti => "ubiquiti",
        }
    }

    /// Port used when the credentials don't carry one
    pub fn default_port(&self) -> u16 {
        match self {
            Vendor::Mikrotik => 8729,
            Vendor::Ubiquiti => 443,
        }
    }
}

impl std::str::FromStr for Vendor {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mikrotik" | "routeros" => Ok(Vendor::Mikrotik),
            "ubiquiti" | "ubnt" | "airos" => Ok(Vendor::Ubiquiti),
            other => Err(MonitorError::UnknownVendor(other.to_string())),
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device class; one scheduler (and one named cache store) per class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Router,
    AccessPoint,
    Switch,
}

impl DeviceClass {
    pub const ALL: [DeviceClass; 3] = [
        DeviceClass::Router,
        DeviceClass::AccessPoint,
        DeviceClass::Switch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Router => "router",
            DeviceClass::AccessPoint => "ap",
            DeviceClass::Switch => "switch",
        }
    }

    /// Name of the cache store holding this class's snapshots
    pub fn cache_store(&self) -> &'static str {
        match self {
            DeviceClass::Router => "router_stats",
            DeviceClass::AccessPoint => "ap_stats",
            DeviceClass::Switch => "switch_stats",
        }
    }
}

impl std::str::FromStr for DeviceClass {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "router" => Ok(DeviceClass::Router),
            "ap" | "access_point" | "accesspoint" => Ok(DeviceClass::AccessPoint),
            "switch" => Ok(DeviceClass::Switch),
            other => Err(MonitorError::InvalidKey(format!("device class '{}'", other))),
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// Login material for one device. Opaque to the scheduler.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub vendor: Vendor,
    #[serde(default)]
    pub port: Option<u16>,
}

impl Credentials {
    pub fn new(username: &str, password: &str, vendor: Vendor, port: Option<u16>) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            vendor,
            port,
        }
    }

    /// Port to dial, falling back to the vendor default
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.vendor.default_port())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .field("vendor", &self.vendor)
            .field("port", &self.port)
            .finish()
    }
}

// ============================================================================
// Normalized telemetry
// ============================================================================

/// One station associated to a wireless device (or a leased host on a router)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectedClient {
    pub mac: String,
    pub hostname: Option<String>,
    pub ip_address: Option<String>,
    /// dBm
    pub signal: Option<i32>,
    pub signal_chain0: Option<i32>,
    pub signal_chain1: Option<i32>,
    pub noise_floor: Option<i32>,
    /// Mbps
    pub tx_rate: Option<f64>,
    pub rx_rate: Option<f64>,
    /// Percent
    pub ccq: Option<u32>,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub tx_throughput_kbps: Option<f64>,
    pub rx_throughput_kbps: Option<f64>,
    /// Seconds
    pub uptime: Option<u64>,
    pub interface: Option<String>,
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Snapshot of one device, created fresh on every poll
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub host: String,
    pub vendor: Option<Vendor>,
    pub role: Option<DeviceClass>,
    pub hostname: Option<String>,
    pub model: Option<String>,
    pub mac: Option<String>,
    pub firmware: Option<String>,
    /// Seconds
    pub uptime: Option<u64>,
    pub is_online: bool,
    pub last_error: Option<String>,
    /// MHz
    pub frequency: Option<u32>,
    /// MHz
    pub channel_width: Option<u32>,
    pub essid: Option<String>,
    pub noise_floor: Option<i32>,
    pub client_count: u32,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    /// kbps
    pub tx_throughput: Option<f64>,
    pub rx_throughput: Option<f64>,
    /// Percent
    pub airtime_usage: Option<f64>,
    pub gps_lat: Option<f64>,
    pub gps_lon: Option<f64>,
    pub clients: Vec<ConnectedClient>,
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl DeviceStatus {
    /// Blank online snapshot for `host`
    pub fn online(host: &str, vendor: Vendor, role: DeviceClass) -> Self {
        Self {
            host: host.to_string(),
            vendor: Some(vendor),
            role: Some(role),
            is_online: true,
            ..Default::default()
        }
    }

    /// Snapshot reporting an expected failure (device down, auth rejected)
    pub fn offline(host: &str, vendor: Vendor, role: DeviceClass, error: impl Into<String>) -> Self {
        Self {
            host: host.to_string(),
            vendor: Some(vendor),
            role: Some(role),
            is_online: false,
            last_error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Online/offline marker written to the status store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Online,
    Offline,
}

impl DeviceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Online => "online",
            DeviceState::Offline => "offline",
        }
    }
}

/// One row of a spectral scan (diagnostic stream)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectralSample {
    pub frequency_mhz: f64,
    pub signal_dbm: f64,
    /// Peak-hold value when the device prints one
    pub peak_dbm: Option<f64>,
}

/// Result of an administrative reset/refresh call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResetOutcome {
    pub success: bool,
    pub message: String,
}

/// Result of a one-off connection test
#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    pub success: bool,
    pub hostname: Option<String>,
    pub model: Option<String>,
    pub firmware: Option<String>,
    pub error: Option<String>,
}

impl TestResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            hostname: None,
            model: None,
            firmware: None,
            error: Some(error.into()),
        }
    }
}

// ============================================================================
// Wire / cache schema
// ============================================================================

/// GPS fix as served to viewers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// One station as served to viewers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientPayload {
    pub mac: String,
    pub hostname: Option<String>,
    pub ip: Option<String>,
    pub signal_dbm: Option<i32>,
    pub chain_dbm: [Option<i32>; 2],
    pub noise_dbm: Option<i32>,
    pub tx_rate_mbps: Option<f64>,
    pub rx_rate_mbps: Option<f64>,
    pub ccq_percent: Option<u32>,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub tx_kbps: Option<f64>,
    pub rx_kbps: Option<f64>,
    pub connected_seconds: Option<u64>,
    pub interface: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

impl From<&ConnectedClient> for ClientPayload {
    fn from(c: &ConnectedClient) -> Self {
        Self {
            mac: c.mac.clone(),
            hostname: c.hostname.clone(),
            ip: c.ip_address.clone(),
            signal_dbm: c.signal,
            chain_dbm: [c.signal_chain0, c.signal_chain1],
            noise_dbm: c.noise_floor,
            tx_rate_mbps: c.tx_rate,
            rx_rate_mbps: c.rx_rate,
            ccq_percent: c.ccq,
            tx_bytes: c.tx_bytes,
            rx_bytes: c.rx_bytes,
            tx_kbps: c.tx_throughput_kbps,
            rx_kbps: c.rx_throughput_kbps,
            connected_seconds: c.uptime,
            interface: c.interface.clone(),
            extra: c.extra.clone(),
        }
    }
}

/// What the cache holds for a host and what viewers read back. Field names
/// follow the viewer-facing contract, not the adapter model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsPayload {
    pub host: String,
    pub vendor: Option<Vendor>,
    pub device_type: Option<DeviceClass>,
    pub online: bool,
    pub name: Option<String>,
    pub model: Option<String>,
    pub mac_address: Option<String>,
    pub firmware_version: Option<String>,
    pub uptime_seconds: Option<u64>,
    pub ssid: Option<String>,
    pub frequency_mhz: Option<u32>,
    pub channel_width_mhz: Option<u32>,
    pub noise_dbm: Option<i32>,
    pub client_count: u32,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub tx_kbps: Option<f64>,
    pub rx_kbps: Option<f64>,
    pub airtime_percent: Option<f64>,
    pub location: Option<GeoPoint>,
    pub clients: Vec<ClientPayload>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
    pub polled_at: DateTime<Utc>,
}

impl StatsPayload {
    pub fn from_status(status: &DeviceStatus, polled_at: DateTime<Utc>) -> Self {
        let location = match (status.gps_lat, status.gps_lon) {
            (Some(lat), Some(lon)) => Some(GeoPoint { lat, lon }),
            _ => None,
        };
        Self {
            host: status.host.clone(),
            vendor: status.vendor,
            device_type: status.role,
            online: status.is_online,
            name: status.hostname.clone(),
            model: status.model.clone(),
            mac_address: status.mac.clone(),
            firmware_version: status.firmware.clone(),
            uptime_seconds: status.uptime,
            ssid: status.essid.clone(),
            frequency_mhz: status.frequency,
            channel_width_mhz: status.channel_width,
            noise_dbm: status.noise_floor,
            client_count: status.client_count,
            tx_bytes: status.tx_bytes,
            rx_bytes: status.rx_bytes,
            tx_kbps: status.tx_throughput,
            rx_kbps: status.rx_throughput,
            airtime_percent: status.airtime_usage,
            location,
            clients: status.clients.iter().map(ClientPayload::from).collect(),
            extra: status.extra.clone(),
            polled_at,
        }
    }
}
