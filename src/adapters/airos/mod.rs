//! Ubiquiti airOS adapter
//!
//! airOS has no persistent connection: log in once via `/api/auth`, keep the
//! session cookie plus the `X-CSRF-ID` header, and re-login exactly once when
//! the device answers like the session is gone (non-2xx, or the HTML login
//! page where JSON was expected).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};

use super::DeviceAdapter;
use crate::config::AdapterConfig;
use crate::error::DeviceError;
use crate::models::{ConnectedClient, Credentials, DeviceClass, DeviceStatus, Vendor};
use crate::parsers::{normalize_mac, parse_frequency};

const CSRF_HEADER: &str = "X-CSRF-ID";

/// A successful login. Pre-8.x firmware sends no CSRF token and relies on
/// the cookie alone.
#[derive(Debug, Clone)]
struct AuthSession {
    csrf_token: Option<String>,
    generation: u64,
}

pub struct AirOsAdapter {
    host: String,
    credentials: Credentials,
    role: DeviceClass,
    base_url: String,
    http_client: Client,
    session: RwLock<Option<AuthSession>>,
    logins: AtomicU64,
    /// Serializes logins so concurrent callers don't race two sessions
    auth_lock: Mutex<()>,
}

impl AirOsAdapter {
    pub fn new(
        host: &str,
        credentials: Credentials,
        role: DeviceClass,
        config: &AdapterConfig,
    ) -> Result<Self, DeviceError> {
        let base_url = base_url_for(host, credentials.effective_port());
        Self::with_base_url(host, &base_url, credentials, role, config)
    }

    /// Same as `new` with an explicit URL (non-standard schemes, test servers)
    pub fn with_base_url(
        host: &str,
        base_url: &str,
        credentials: Credentials,
        role: DeviceClass,
        config: &AdapterConfig,
    ) -> Result<Self, DeviceError> {
        let http_client = Client::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certs) // Self-signed device certs
            .cookie_store(true)
            .connect_timeout(config.connect_timeout())
            .timeout(config.read_timeout())
            .build()?;

        Ok(Self {
            host: host.to_string(),
            credentials,
            role,
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
            session: RwLock::new(None),
            logins: AtomicU64::new(0),
            auth_lock: Mutex::new(()),
        })
    }

    async fn current_session(&self) -> Option<AuthSession> {
        self.session.read().await.clone()
    }

    /// Force a fresh login
    async fn authenticate(&self) -> Result<(), DeviceError> {
        let stale = self.current_session().await.map(|s| s.generation);
        self.login(stale).await
    }

    /// Log in unless a session other than `stale` is already in place.
    /// `None` means "any session will do".
    async fn login(&self, stale: Option<u64>) -> Result<(), DeviceError> {
        let _guard = self.auth_lock.lock().await;
        if let Some(current) = self.current_session().await {
            if Some(current.generation) != stale {
                return Ok(());
            }
        }

        let url = format!("{}/api/auth", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .form(&[
                ("username", self.credentials.username.as_str()),
                ("password", self.credentials.password.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(DeviceError::Auth(format!("{} rejected login", self.host)));
        }
        if !status.is_success() {
            return Err(DeviceError::Transport(format!(
                "login to {} returned {}",
                self.host, status
            )));
        }

        let token = response
            .headers()
            .get(CSRF_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        if token.is_none() {
            // Pre-8.x firmware authenticates by cookie alone
            tracing::debug!("[AirOS] {} sent no {} header", self.host, CSRF_HEADER);
        }
        let generation = self.logins.fetch_add(1, Ordering::Relaxed) + 1;
        *self.session.write().await = Some(AuthSession {
            csrf_token: token,
            generation,
        });
        tracing::info!("[AirOS] Logged in to {}", self.host);
        Ok(())
    }

    /// Current session, logging in first if there is none
    async fn ensure_authenticated(&self) -> Result<AuthSession, DeviceError> {
        if let Some(session) = self.current_session().await {
            return Ok(session);
        }
        self.login(None).await?;
        self.current_session().await.ok_or(DeviceError::SessionExpired)
    }

    async fn fetch_json(&self, path: &str, session: &AuthSession) -> Result<Value, DeviceError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http_client.get(&url);
        if let Some(token) = session.csrf_token.as_deref() {
            request = request.header(CSRF_HEADER, token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            tracing::debug!("[AirOS] {}{} returned {}", self.host, path, response.status());
            return Err(DeviceError::SessionExpired);
        }

        let body = response.text().await?;
        if looks_like_html(&body) {
            return Err(DeviceError::SessionExpired);
        }
        serde_json::from_str(&body)
            .map_err(|e| DeviceError::Protocol(format!("{} from {}: {}", path, self.host, e)))
    }

    /// GET a JSON endpoint; an expired session gets one re-login and one retry
    pub async fn get_json(&self, path: &str) -> Result<Value, DeviceError> {
        let session = self.ensure_authenticated().await?;
        match self.fetch_json(path, &session).await {
            Err(DeviceError::SessionExpired) => {
                tracing::info!("[AirOS] Session to {} expired, logging in again", self.host);
                self.login(Some(session.generation)).await?;
                let fresh = self
                    .current_session()
                    .await
                    .ok_or(DeviceError::SessionExpired)?;
                self.fetch_json(path, &fresh).await
            }
            other => other,
        }
    }

    async fn collect_status(&self) -> Result<DeviceStatus, DeviceError> {
        let body = self.get_json("/status.cgi").await?;
        let mut status = status_from_json(&self.host, self.role, &body);

        if body.pointer("/wireless/sta").is_none() {
            // Older firmware keeps stations in a separate endpoint
            status.clients = self.station_list().await?;
            status.client_count = status.clients.len() as u32;
        }
        Ok(status)
    }

    async fn station_list(&self) -> Result<Vec<ConnectedClient>, DeviceError> {
        let body = self.get_json("/sta.cgi").await?;
        Ok(body
            .as_array()
            .map(|stations| stations.iter().filter_map(client_from_json).collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl DeviceAdapter for AirOsAdapter {
    fn host(&self) -> &str {
        &self.host
    }

    fn vendor(&self) -> Vendor {
        Vendor::Ubiquiti
    }

    fn role(&self) -> DeviceClass {
        self.role
    }

    async fn connect(&self) -> Result<(), DeviceError> {
        self.ensure_authenticated().await.map(|_| ())
    }

    async fn get_status(&self) -> DeviceStatus {
        match self.collect_status().await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!("[AirOS] {} poll failed: {}", self.host, e);
                DeviceStatus::offline(&self.host, Vendor::Ubiquiti, self.role, e.to_string())
            }
        }
    }

    async fn get_connected_clients(&self) -> Result<Vec<ConnectedClient>, DeviceError> {
        let body = self.get_json("/status.cgi").await?;
        match body.pointer("/wireless/sta").and_then(Value::as_array) {
            Some(stations) => Ok(stations.iter().filter_map(client_from_json).collect()),
            None => self.station_list().await,
        }
    }

    async fn test_connection(&self) -> Result<(), DeviceError> {
        self.authenticate().await?;
        let session = self
            .current_session()
            .await
            .ok_or(DeviceError::SessionExpired)?;
        self.fetch_json("/status.cgi", &session).await.map(|_| ())
    }

    async fn disconnect(&self) {
        let session = self.session.write().await.take();
        let Some(session) = session else { return };

        let url = format!("{}/logout.cgi", self.base_url);
        let mut request = self.http_client.post(&url).timeout(Duration::from_secs(2));
        if let Some(token) = session.csrf_token {
            request = request.header(CSRF_HEADER, token);
        }
        let result = request.send().await;
        if let Err(e) = result {
            tracing::debug!("[AirOS] Logout from {} failed: {}", self.host, e);
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn base_url_for(host: &str, port: u16) -> String {
    match port {
        443 => format!("https://{}", host),
        80 => format!("http://{}", host),
        _ => format!("https://{}:{}", host, port),
    }
}

/// The login page comes back with 200 once the session is gone
fn looks_like_html(body: &str) -> bool {
    let head: String = body.trim_start().chars().take(64).collect();
    let head = head.to_ascii_lowercase();
    head.starts_with("<!doctype") || head.starts_with("<html") || head.starts_with("<head")
}

fn number(value: &Value, pointer: &str) -> Option<f64> {
    match value.pointer(pointer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn text(value: &Value, pointer: &str) -> Option<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn status_from_json(host: &str, role: DeviceClass, body: &Value) -> DeviceStatus {
    let mut status = DeviceStatus::online(host, Vendor::Ubiquiti, role);

    status.hostname = text(body, "/host/hostname");
    status.model = text(body, "/host/devmodel");
    status.firmware = text(body, "/host/fwversion");
    status.uptime = number(body, "/host/uptime").map(|u| u as u64);

    status.essid = text(body, "/wireless/essid");
    status.frequency = match body.pointer("/wireless/frequency") {
        Some(Value::Number(n)) => n.as_u64().map(|f| f as u32),
        Some(Value::String(s)) => parse_frequency(s),
        _ => None,
    };
    status.channel_width = number(body, "/wireless/chanbw").map(|w| w as u32);
    status.noise_floor = number(body, "/wireless/noisef").map(|n| n as i32);
    status.tx_throughput = number(body, "/wireless/throughput/tx");
    status.rx_throughput = number(body, "/wireless/throughput/rx");
    status.airtime_usage = number(body, "/wireless/polling/use")
        .or_else(|| number(body, "/airmax/airtime"))
        .map(|a| if a > 100.0 { a / 10.0 } else { a });

    if let Some(interfaces) = body.pointer("/interfaces").and_then(Value::as_array) {
        let wired = interfaces
            .iter()
            .find(|i| i.get("ifname").and_then(Value::as_str) == Some("eth0"));
        status.mac = wired
            .or_else(|| interfaces.first())
            .and_then(|i| i.get("hwaddr"))
            .and_then(Value::as_str)
            .map(normalize_mac);

        let wireless = interfaces
            .iter()
            .find(|i| i.get("ifname").and_then(Value::as_str) == Some("ath0"));
        if let Some(radio) = wireless {
            status.tx_bytes = number(radio, "/status/tx_bytes").unwrap_or(0.0) as u64;
            status.rx_bytes = number(radio, "/status/rx_bytes").unwrap_or(0.0) as u64;
        }
    }

    let lat = number(body, "/gps/lat");
    let lon = number(body, "/gps/lon");
    // 0/0 means no fix
    if let (Some(lat), Some(lon)) = (lat, lon) {
        if lat != 0.0 || lon != 0.0 {
            status.gps_lat = Some(lat);
            status.gps_lon = Some(lon);
        }
    }

    if let Some(mode) = text(body, "/wireless/mode") {
        status.extra.insert("mode".into(), json!(mode));
    }
    if let Some(cpu) = number(body, "/host/cpuload") {
        status.extra.insert("cpu_load".into(), json!(cpu));
    }

    if let Some(stations) = body.pointer("/wireless/sta").and_then(Value::as_array) {
        status.clients = stations.iter().filter_map(client_from_json).collect();
    }
    status.client_count = number(body, "/wireless/count")
        .map(|c| c as u32)
        .unwrap_or(status.clients.len() as u32);

    status
}

fn client_from_json(sta: &Value) -> Option<ConnectedClient> {
    let mac = normalize_mac(sta.get("mac")?.as_str()?);
    let chain = |idx: usize| {
        sta.get("chainrssi")
            .and_then(Value::as_array)
            .and_then(|c| c.get(idx))
            .and_then(Value::as_i64)
            .filter(|v| *v != 0)
            .map(|v| v as i32)
    };

    let mut client = ConnectedClient {
        mac,
        hostname: text(sta, "/remote/hostname").or_else(|| text(sta, "/name")),
        ip_address: text(sta, "/lastip"),
        signal: number(sta, "/signal").map(|s| s as i32),
        signal_chain0: chain(0),
        signal_chain1: chain(1),
        noise_floor: number(sta, "/noisefloor").map(|n| n as i32),
        tx_rate: number(sta, "/tx_rate").or_else(|| number(sta, "/tx")),
        rx_rate: number(sta, "/rx_rate").or_else(|| number(sta, "/rx")),
        ccq: number(sta, "/ccq").map(|c| c as u32),
        tx_bytes: number(sta, "/stats/tx_bytes").unwrap_or(0.0) as u64,
        rx_bytes: number(sta, "/stats/rx_bytes").unwrap_or(0.0) as u64,
        tx_throughput_kbps: number(sta, "/remote/tx_throughput"),
        rx_throughput_kbps: number(sta, "/remote/rx_throughput"),
        uptime: number(sta, "/uptime").map(|u| u as u64),
        ..Default::default()
    };
    if let Some(distance) = number(sta, "/distance") {
        client.extra.insert("distance_m".into(), json!(distance));
    }
    if let Some(quality) = number(sta, "/airmax/quality") {
        client.extra.insert("airmax_quality".into(), json!(quality));
    }
    Some(client)
}
