//! MikroTik RouterOS adapter
//!
//! Talks the binary API through the shared session pool. Wireless data comes
//! from whichever sub-API the firmware ships (`wifi`, `wifiwave2` or legacy
//! `wireless`), detected once per adapter.

pub mod session;
pub mod wire;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{Mutex, OnceCell};
use tokio::time::Instant;

use self::session::{ApiCommand, ApiSessionFactory};
use self::wire::Attrs;
use crate::adapters::DeviceAdapter;
use crate::error::DeviceError;
use crate::models::{ConnectedClient, Credentials, DeviceClass, DeviceStatus, Vendor};
use crate::parsers::{
    normalize_mac, parse_bytes, parse_channel_width, parse_flag, parse_frequency, parse_rate,
    parse_signal, parse_uptime,
};
use crate::pool::{ConnectionPool, PoolKey, SessionFactory};

pub type RouterOsPool = ConnectionPool<ApiSessionFactory>;

/// Wireless package exposed by the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WirelessKind {
    /// RouterOS 7.13+ `wifi`
    Wifi,
    /// RouterOS 7 `wifiwave2` package
    WifiWave2,
    /// Legacy `wireless` package
    Wireless,
    /// No radios
    None,
}

impl WirelessKind {
    /// Detection order; first one the device answers wins
    const DETECT_ORDER: [WirelessKind; 3] = [
        WirelessKind::Wifi,
        WirelessKind::WifiWave2,
        WirelessKind::Wireless,
    ];

    pub fn base_path(&self) -> Option<&'static str> {
        match self {
            WirelessKind::Wifi => Some("/interface/wifi"),
            WirelessKind::WifiWave2 => Some("/interface/wifiwave2"),
            WirelessKind::Wireless => Some("/interface/wireless"),
            WirelessKind::None => None,
        }
    }
}

/// Per-client byte counters from the previous poll
struct CounterSample {
    taken_at: Instant,
    counters: HashMap<String, (u64, u64)>,
}

/// Generic over the session factory so tests can script the device
pub struct RouterOsAdapter<F: SessionFactory = ApiSessionFactory> {
    host: String,
    credentials: Credentials,
    role: DeviceClass,
    pool: Arc<ConnectionPool<F>>,
    key: PoolKey,
    /// Whether this adapter holds a pool reference
    holds_ref: Mutex<bool>,
    wireless: OnceCell<WirelessKind>,
    gps: OnceCell<bool>,
    last_sample: Mutex<Option<CounterSample>>,
}

impl<F> RouterOsAdapter<F>
where
    F: SessionFactory,
    F::Session: ApiCommand,
{
    pub fn new(
        host: &str,
        credentials: Credentials,
        role: DeviceClass,
        pool: Arc<ConnectionPool<F>>,
    ) -> Self {
        let key = PoolKey::new(host, credentials.effective_port(), &credentials.username);
        Self {
            host: host.to_string(),
            credentials,
            role,
            pool,
            key,
            holds_ref: Mutex::new(false),
            wireless: OnceCell::new(),
            gps: OnceCell::new(),
            last_sample: Mutex::new(None),
        }
    }

    async fn ensure_connected(&self) -> Result<(), DeviceError> {
        let mut holds = self.holds_ref.lock().await;
        // The pool may have dropped the session under us (admin reset)
        if !*holds || self.pool.session(&self.key).await.is_none() {
            self.pool
                .acquire(
                    &self.host,
                    &self.credentials.username,
                    &self.credentials.password,
                    self.key.port,
                )
                .await?;
            *holds = true;
        }
        Ok(())
    }

    /// Run one API command through the pool (with its single reconnect)
    pub(crate) async fn query(
        &self,
        path: &str,
        args: &[(&str, &str)],
    ) -> Result<Vec<Attrs>, DeviceError> {
        self.ensure_connected().await?;
        let args: Vec<(String, String)> = args
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        self.pool
            .run(&self.key, |session| {
                let args = args.clone();
                async move { session.command(path, &args).await }
            })
            .await
    }

    /// Detected wireless sub-API, detected on first use
    pub async fn wireless_kind(&self) -> Result<WirelessKind, DeviceError> {
        self.wireless
            .get_or_try_init(|| self.detect_wireless())
            .await
            .copied()
    }

    async fn detect_wireless(&self) -> Result<WirelessKind, DeviceError> {
        for kind in WirelessKind::DETECT_ORDER {
            let Some(base) = kind.base_path() else { continue };
            match self
                .query(&format!("{}/print", base), &[(".proplist", "name")])
                .await
            {
                Ok(_) => {
                    tracing::info!("[RouterOS] {} exposes {:?} wireless API", self.host, kind);
                    return Ok(kind);
                }
                // "no such command prefix": package not installed
                Err(DeviceError::Trap(msg)) => {
                    tracing::debug!("[RouterOS] {} has no {}: {}", self.host, base, msg);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(WirelessKind::None)
    }

    /// Full poll. Errors here become an offline snapshot in `get_status`.
    pub(crate) async fn collect_status(&self) -> Result<DeviceStatus, DeviceError> {
        let mut status = DeviceStatus::online(&self.host, Vendor::Mikrotik, self.role);

        if let Some(resource) = self.query("/system/resource/print", &[]).await?.first() {
            apply_resource(&mut status, resource);
        }
        if let Some(identity) = self.query("/system/identity/print", &[]).await?.first() {
            status.hostname = identity.get("name").cloned();
        }
        match self.query("/system/routerboard/print", &[]).await {
            Ok(rows) => {
                if let Some(rb) = rows.first() {
                    if let Some(model) = rb.get("model").filter(|m| !m.is_empty()) {
                        status.model = Some(model.clone());
                    }
                    if let Some(serial) = rb.get("serial-number") {
                        status.extra.insert("serial".into(), json!(serial));
                    }
                }
            }
            // CHR and x86 installs have no routerboard menu
            Err(DeviceError::Trap(_)) => {}
            Err(e) => return Err(e),
        }

        let interfaces = self
            .query(
                "/interface/print",
                &[(".proplist", "name,type,mac-address,running,disabled,tx-byte,rx-byte")],
            )
            .await?;
        status.mac = interfaces
            .iter()
            .find(|i| i.get("type").map(String::as_str) == Some("ether"))
            .and_then(|i| i.get("mac-address"))
            .map(|m| normalize_mac(m));

        let kind = self.wireless_kind().await?;
        let mut clients = match kind.base_path() {
            Some(base) => {
                let radios = self.query(&format!("{}/print", base), &[]).await?;
                let radio_names: Vec<String> = radios
                    .iter()
                    .filter(|r| !r.get("disabled").map(|d| parse_flag(d)).unwrap_or(false))
                    .filter_map(|r| r.get("name").cloned())
                    .collect();

                let primary = radios
                    .iter()
                    .find(|r| r.get("running").map(|v| parse_flag(v)).unwrap_or(false))
                    .or_else(|| radios.first());
                if let Some(radio) = primary {
                    apply_radio(&mut status, radio, kind);
                    self.apply_radio_monitor(&mut status, radio, kind).await?;
                }

                let (tx_kbps, rx_kbps) = self.sum_traffic(&radio_names).await?;
                status.tx_throughput = Some(tx_kbps);
                status.rx_throughput = Some(rx_kbps);

                let (tx, rx) = sum_counters(&interfaces, |i| {
                    i.get("name").map(|n| radio_names.contains(n)).unwrap_or(false)
                });
                status.tx_bytes = tx;
                status.rx_bytes = rx;

                self.registration_clients(base, kind).await?
            }
            None => {
                let (tx, rx) = sum_counters(&interfaces, |i| {
                    i.get("type").map(String::as_str) == Some("ether")
                });
                status.tx_bytes = tx;
                status.rx_bytes = rx;
                self.lease_clients().await?
            }
        };

        {
            let mut last = self.last_sample.lock().await;
            let sample = apply_client_throughput(&mut clients, last.as_ref(), Instant::now());
            *last = Some(sample);
        }

        if let Some((lat, lon)) = self.read_gps().await {
            status.gps_lat = Some(lat);
            status.gps_lon = Some(lon);
        }

        status.client_count = clients.len() as u32;
        status.clients = clients;
        Ok(status)
    }

    async fn apply_radio_monitor(
        &self,
        status: &mut DeviceStatus,
        radio: &Attrs,
        kind: WirelessKind,
    ) -> Result<(), DeviceError> {
        let (Some(base), Some(name)) = (kind.base_path(), radio.get("name")) else {
            return Ok(());
        };
        let rows = match self
            .query(&format!("{}/monitor", base), &[("numbers", name), ("once", "")])
            .await
        {
            Ok(rows) => rows,
            // A disabled radio can't be monitored; keep the config values
            Err(DeviceError::Trap(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        let Some(monitor) = rows.first() else {
            return Ok(());
        };

        let channel = monitor.get("frequency").or_else(|| monitor.get("channel"));
        if let Some(freq) = channel.and_then(|c| parse_frequency(c)) {
            status.frequency = Some(freq);
        }
        if kind == WirelessKind::Wireless {
            if let Some(width) = channel.and_then(|c| parse_channel_width(c)) {
                status.channel_width = Some(width);
            }
        }
        if let Some(noise) = monitor.get("noise-floor").and_then(|n| parse_signal(n)) {
            status.noise_floor = Some(noise);
        }
        if let Some(ccq) = monitor.get("overall-tx-ccq").and_then(|c| c.parse::<u64>().ok()) {
            status.extra.insert("overall_tx_ccq".into(), json!(ccq));
        }
        Ok(())
    }

    /// Live traffic summed over radios: one monitor-traffic call per interface
    async fn sum_traffic(&self, interfaces: &[String]) -> Result<(f64, f64), DeviceError> {
        let mut tx_kbps = 0.0;
        let mut rx_kbps = 0.0;

        for name in interfaces {
            let rows = match self
                .query("/interface/monitor-traffic", &[("interface", name), ("once", "")])
                .await
            {
                Ok(rows) => rows,
                Err(DeviceError::Trap(msg)) => {
                    tracing::debug!("[RouterOS] {} monitor-traffic {}: {}", self.host, name, msg);
                    continue;
                }
                Err(e) => return Err(e),
            };
            if let Some(sample) = rows.first() {
                tx_kbps += bits_per_second(sample.get("tx-bits-per-second")) / 1000.0;
                rx_kbps += bits_per_second(sample.get("rx-bits-per-second")) / 1000.0;
            }
        }
        Ok((tx_kbps, rx_kbps))
    }

    async fn registration_clients(
        &self,
        base: &str,
        kind: WirelessKind,
    ) -> Result<Vec<ConnectedClient>, DeviceError> {
        let rows = self
            .query(&format!("{}/registration-table/print", base), &[])
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| client_from_registration(row, kind))
            .collect())
    }

    async fn lease_clients(&self) -> Result<Vec<ConnectedClient>, DeviceError> {
        let rows = match self
            .query("/ip/dhcp-server/lease/print", &[("?status", "bound")])
            .await
        {
            Ok(rows) => rows,
            Err(DeviceError::Trap(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        Ok(rows.iter().filter_map(client_from_lease).collect())
    }

    /// Best-effort fix from the GPS package; `None` when absent or invalid
    async fn read_gps(&self) -> Option<(f64, f64)> {
        let supported = self
            .gps
            .get_or_try_init(|| async {
                match self.query("/system/gps/print", &[]).await {
                    Ok(_) => Ok(true),
                    Err(DeviceError::Trap(_)) => Ok(false),
                    Err(e) => Err(e),
                }
            })
            .await
            .ok()
            .copied()
            .unwrap_or(false);
        if !supported {
            return None;
        }

        let rows = self
            .query("/system/gps/monitor", &[("once", "")])
            .await
            .ok()?;
        let fix = rows.first()?;
        if !parse_flag(fix.get("valid")?) {
            return None;
        }
        Some((
            fix.get("latitude")?.parse().ok()?,
            fix.get("longitude")?.parse().ok()?,
        ))
    }
}

#[async_trait]
impl<F> DeviceAdapter for RouterOsAdapter<F>
where
    F: SessionFactory,
    F::Session: ApiCommand,
{
    fn host(&self) -> &str {
        &self.host
    }

    fn vendor(&self) -> Vendor {
        Vendor::Mikrotik
    }

    fn role(&self) -> DeviceClass {
        self.role
    }

    async fn connect(&self) -> Result<(), DeviceError> {
        self.ensure_connected().await
    }

    async fn get_status(&self) -> DeviceStatus {
        match self.collect_status().await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!("[RouterOS] {} poll failed: {}", self.host, e);
                DeviceStatus::offline(&self.host, Vendor::Mikrotik, self.role, e.to_string())
            }
        }
    }

    async fn get_connected_clients(&self) -> Result<Vec<ConnectedClient>, DeviceError> {
        let kind = self.wireless_kind().await?;
        match kind.base_path() {
            Some(base) => self.registration_clients(base, kind).await,
            None => self.lease_clients().await,
        }
    }

    async fn test_connection(&self) -> Result<(), DeviceError> {
        self.query("/system/identity/print", &[]).await.map(|_| ())
    }

    async fn disconnect(&self) {
        let mut holds = self.holds_ref.lock().await;
        if *holds {
            self.pool.release(&self.key).await;
            *holds = false;
        }
    }
}

// ============================================================================
// Field mapping
// ============================================================================

fn apply_resource(status: &mut DeviceStatus, resource: &Attrs) {
    status.uptime = resource.get("uptime").and_then(|u| parse_uptime(u));
    // "7.14.2 (stable)" → "7.14.2"
    status.firmware = resource
        .get("version")
        .and_then(|v| v.split_whitespace().next())
        .map(String::from);
    status.model = resource.get("board-name").cloned();

    for (key, field) in [
        ("cpu-load", "cpu_load"),
        ("free-memory", "free_memory"),
        ("total-memory", "total_memory"),
    ] {
        if let Some(value) = resource.get(key).and_then(|v| v.parse::<u64>().ok()) {
            status.extra.insert(field.into(), json!(value));
        }
    }
    if let Some(arch) = resource.get("architecture-name") {
        status.extra.insert("architecture".into(), json!(arch));
    }
}

fn apply_radio(status: &mut DeviceStatus, radio: &Attrs, kind: WirelessKind) {
    let get = |plain: &str, dotted: &str| radio.get(plain).or_else(|| radio.get(dotted));

    status.essid = get("ssid", "configuration.ssid").cloned();
    status.frequency = get("frequency", "channel.frequency").and_then(|f| parse_frequency(f));
    status.channel_width = match kind {
        WirelessKind::Wireless => radio.get("channel-width"),
        _ => radio.get("channel.width"),
    }
    .and_then(|w| parse_channel_width(w));
}

fn client_from_registration(row: &Attrs, kind: WirelessKind) -> Option<ConnectedClient> {
    let mac = normalize_mac(row.get("mac-address")?);
    let signal_field = match kind {
        WirelessKind::Wireless => "signal-strength",
        _ => "signal",
    };
    let (tx_bytes, rx_bytes) = row
        .get("bytes")
        .and_then(|b| parse_bytes(b))
        .unwrap_or((0, 0));

    let mut client = ConnectedClient {
        mac,
        hostname: row
            .get("radio-name")
            .or_else(|| row.get("comment"))
            .filter(|h| !h.is_empty())
            .cloned(),
        ip_address: row.get("last-ip").cloned(),
        signal: row.get(signal_field).and_then(|s| parse_signal(s)),
        signal_chain0: row.get("signal-strength-ch0").and_then(|s| parse_signal(s)),
        signal_chain1: row.get("signal-strength-ch1").and_then(|s| parse_signal(s)),
        tx_rate: row.get("tx-rate").and_then(|r| parse_rate(r)),
        rx_rate: row.get("rx-rate").and_then(|r| parse_rate(r)),
        ccq: row.get("tx-ccq").and_then(|c| c.parse().ok()),
        tx_bytes,
        rx_bytes,
        uptime: row.get("uptime").and_then(|u| parse_uptime(u)),
        interface: row.get("interface").cloned(),
        ..Default::default()
    };
    if let Some(ssid) = row.get("ssid") {
        client.extra.insert("ssid".into(), json!(ssid));
    }
    Some(client)
}

fn client_from_lease(row: &Attrs) -> Option<ConnectedClient> {
    Some(ConnectedClient {
        mac: normalize_mac(row.get("mac-address")?),
        hostname: row.get("host-name").filter(|h| !h.is_empty()).cloned(),
        ip_address: row
            .get("active-address")
            .or_else(|| row.get("address"))
            .cloned(),
        interface: row.get("server").cloned(),
        ..Default::default()
    })
}

fn sum_counters(interfaces: &[Attrs], include: impl Fn(&Attrs) -> bool) -> (u64, u64) {
    interfaces
        .iter()
        .filter(|i| include(i))
        .fold((0, 0), |(tx, rx), i| {
            (
                tx + i.get("tx-byte").and_then(|v| v.parse::<u64>().ok()).unwrap_or(0),
                rx + i.get("rx-byte").and_then(|v| v.parse::<u64>().ok()).unwrap_or(0),
            )
        })
}

fn bits_per_second(raw: Option<&String>) -> f64 {
    raw.and_then(|v| v.parse::<f64>().ok()).unwrap_or(0.0)
}

/// Fill per-client kbps from the counter delta since `previous`; returns the
/// new sample. Counters that went backwards (re-association) are skipped.
fn apply_client_throughput(
    clients: &mut [ConnectedClient],
    previous: Option<&CounterSample>,
    now: Instant,
) -> CounterSample {
    if let Some(prev) = previous {
        let elapsed = now.duration_since(prev.taken_at).as_secs_f64();
        if elapsed > 0.0 {
            for client in clients.iter_mut() {
                let Some(&(prev_tx, prev_rx)) = prev.counters.get(&client.mac) else {
                    continue;
                };
                if client.tx_bytes < prev_tx || client.rx_bytes < prev_rx {
                    continue;
                }
                if client.tx_bytes == 0 && client.rx_bytes == 0 {
                    continue;
                }
                client.tx_throughput_kbps =
                    Some((client.tx_bytes - prev_tx) as f64 * 8.0 / 1000.0 / elapsed);
                client.rx_throughput_kbps =
                    Some((client.rx_bytes - prev_rx) as f64 * 8.0 / 1000.0 / elapsed);
            }
        }
    }

    CounterSample {
        taken_at: now,
        counters: clients
            .iter()
            .map(|c| (c.mac.clone(), (c.tx_bytes, c.rx_bytes)))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    fn attrs(pairs: &[(&str, &str)]) -> Attrs {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Canned replies keyed by command path (plus `#interface` when given).
    /// Anything unscripted traps the way a missing package does.
    #[derive(Default)]
    struct ScriptedDevice {
        replies: StdMutex<HashMap<String, Result<Vec<Attrs>, DeviceError>>>,
        calls: StdMutex<Vec<String>>,
    }

    impl ScriptedDevice {
        fn reply(&self, key: &str, result: Result<Vec<Attrs>, DeviceError>) {
            self.replies.lock().unwrap().insert(key.to_string(), result);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    struct ScriptedSession(Arc<ScriptedDevice>);

    #[async_trait]
    impl ApiCommand for ScriptedSession {
        async fn command(
            &self,
            path: &str,
            args: &[(String, String)],
        ) -> Result<Vec<Attrs>, DeviceError> {
            self.0.calls.lock().unwrap().push(path.to_string());
            let key = match args.iter().find(|(k, _)| k == "interface") {
                Some((_, name)) => format!("{}#{}", path, name),
                None => path.to_string(),
            };
            self.0
                .replies
                .lock()
                .unwrap()
                .get(&key)
                .cloned()
                .unwrap_or_else(|| Err(DeviceError::Trap("no such command prefix".into())))
        }
    }

    struct ScriptedFactory(Arc<ScriptedDevice>);

    #[async_trait]
    impl SessionFactory for ScriptedFactory {
        type Session = ScriptedSession;

        async fn open(&self, _key: &PoolKey, _password: &str) -> Result<ScriptedSession, DeviceError> {
            Ok(ScriptedSession(self.0.clone()))
        }

        async fn close(&self, _session: Arc<ScriptedSession>) {}
    }

    fn scripted() -> (Arc<ScriptedDevice>, RouterOsAdapter<ScriptedFactory>) {
        let device = Arc::new(ScriptedDevice::default());
        let pool = Arc::new(ConnectionPool::new(ScriptedFactory(device.clone())));
        let creds = Credentials::new("admin", "pw", Vendor::Mikrotik, None);
        let adapter = RouterOsAdapter::new("10.0.0.1", creds, DeviceClass::AccessPoint, pool);
        (device, adapter)
    }

    #[tokio::test]
    async fn test_wireless_api_detection_order() {
        let (device, adapter) = scripted();
        device.reply("/interface/wifiwave2/print", Ok(Vec::new()));
        device.reply("/interface/wireless/print", Ok(Vec::new()));

        assert_eq!(adapter.wireless_kind().await, Ok(WirelessKind::WifiWave2));
        assert_eq!(
            device.calls(),
            vec!["/interface/wifi/print", "/interface/wifiwave2/print"]
        );
    }

    #[tokio::test]
    async fn test_wireless_api_is_detected_once() {
        let (device, adapter) = scripted();
        device.reply("/interface/wifi/print", Ok(Vec::new()));

        assert_eq!(adapter.wireless_kind().await, Ok(WirelessKind::Wifi));
        assert_eq!(adapter.wireless_kind().await, Ok(WirelessKind::Wifi));
        assert_eq!(device.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_no_wireless_package_and_transport_errors() {
        let (device, adapter) = scripted();
        device.reply(
            "/interface/wifi/print",
            Err(DeviceError::Timeout("read".into())),
        );
        // A timeout is not "package missing"; it surfaces and is not remembered
        assert!(matches!(
            adapter.wireless_kind().await,
            Err(DeviceError::Timeout(_))
        ));

        device.replies.lock().unwrap().clear();
        assert_eq!(adapter.wireless_kind().await, Ok(WirelessKind::None));
        let lookups = device
            .calls()
            .into_iter()
            .filter(|c| c.ends_with("/print"))
            .count();
        // Two timeouts (one pool retry), then all three sub-APIs
        assert_eq!(lookups, 5);
    }

    #[tokio::test]
    async fn test_traffic_is_summed_across_radios() {
        let (device, adapter) = scripted();
        device.reply(
            "/interface/monitor-traffic#wlan1",
            Ok(vec![attrs(&[
                ("tx-bits-per-second", "1500000"),
                ("rx-bits-per-second", "500000"),
            ])]),
        );
        device.reply(
            "/interface/monitor-traffic#wlan2",
            Ok(vec![attrs(&[
                ("tx-bits-per-second", "250000"),
                ("rx-bits-per-second", "4000"),
            ])]),
        );
        // wlan3 traps (disabled radio) and is skipped

        let names: Vec<String> = ["wlan1", "wlan2", "wlan3"].iter().map(|n| n.to_string()).collect();
        let (tx, rx) = adapter.sum_traffic(&names).await.unwrap();
        assert_eq!(tx, 1750.0);
        assert_eq!(rx, 504.0);
        assert_eq!(device.calls().len(), 3);
    }

    #[test]
    fn test_apply_resource() {
        let mut status = DeviceStatus::online("10.0.0.1", Vendor::Mikrotik, DeviceClass::Router);
        apply_resource(
            &mut status,
            &attrs(&[
                ("uptime", "1w2d3h4m5s"),
                ("version", "7.14.2 (stable)"),
                ("board-name", "hAP ax^3"),
                ("cpu-load", "7"),
                ("free-memory", "800000000"),
            ]),
        );
        assert_eq!(status.uptime, Some(788_645));
        assert_eq!(status.firmware.as_deref(), Some("7.14.2"));
        assert_eq!(status.model.as_deref(), Some("hAP ax^3"));
        assert_eq!(status.extra["cpu_load"], json!(7));
    }

    #[test]
    fn test_legacy_registration_row() {
        let row = attrs(&[
            ("mac-address", "aa:bb:cc:dd:ee:ff"),
            ("interface", "wlan1"),
            ("uptime", "2h3m"),
            ("signal-strength", "-65dBm@6Mbps"),
            ("signal-strength-ch0", "-67"),
            ("signal-strength-ch1", "-69"),
            ("tx-rate", "300Mbps-40MHz/2S/SGI"),
            ("rx-rate", "270Mbps-40MHz/2S"),
            ("tx-ccq", "91"),
            ("bytes", "1000,2000"),
            ("last-ip", "192.168.88.20"),
            ("radio-name", "CPE-North"),
        ]);
        let client = client_from_registration(&row, WirelessKind::Wireless).unwrap();
        assert_eq!(client.mac, "AA:BB:CC:DD:EE:FF");
        assert_eq!(client.signal, Some(-65));
        assert_eq!(client.signal_chain1, Some(-69));
        assert_eq!(client.tx_rate, Some(300.0));
        assert_eq!(client.ccq, Some(91));
        assert_eq!((client.tx_bytes, client.rx_bytes), (1000, 2000));
        assert_eq!(client.uptime, Some(7380));
        assert_eq!(client.hostname.as_deref(), Some("CPE-North"));
    }

    #[test]
    fn test_wifi_registration_row_uses_signal_field() {
        let row = attrs(&[
            ("mac-address", "11:22:33:44:55:66"),
            ("signal", "-58"),
            ("tx-rate", "866Mbps"),
            ("bytes", "5,6"),
        ]);
        let client = client_from_registration(&row, WirelessKind::Wifi).unwrap();
        assert_eq!(client.signal, Some(-58));
        assert_eq!(client.tx_rate, Some(866.0));
        assert!(client_from_registration(&attrs(&[("signal", "-1")]), WirelessKind::Wifi).is_none());
    }

    #[test]
    fn test_apply_radio_legacy_and_wifi() {
        let mut status = DeviceStatus::default();
        apply_radio(
            &mut status,
            &attrs(&[
                ("ssid", "backhaul"),
                ("frequency", "5180"),
                ("channel-width", "20/40/80mhz-Ceee"),
            ]),
            WirelessKind::Wireless,
        );
        assert_eq!(status.essid.as_deref(), Some("backhaul"));
        assert_eq!(status.frequency, Some(5180));
        assert_eq!(status.channel_width, Some(80));

        let mut status = DeviceStatus::default();
        apply_radio(
            &mut status,
            &attrs(&[
                ("configuration.ssid", "office"),
                ("channel.frequency", "2412"),
                ("channel.width", "20/40mhz"),
            ]),
            WirelessKind::Wifi,
        );
        assert_eq!(status.essid.as_deref(), Some("office"));
        assert_eq!(status.frequency, Some(2412));
        assert_eq!(status.channel_width, Some(40));
    }

    #[test]
    fn test_sum_counters() {
        let interfaces = vec![
            attrs(&[("name", "wlan1"), ("tx-byte", "10"), ("rx-byte", "20")]),
            attrs(&[("name", "wlan2"), ("tx-byte", "1"), ("rx-byte", "2")]),
            attrs(&[("name", "ether1"), ("tx-byte", "1000"), ("rx-byte", "1000")]),
        ];
        let radios = ["wlan1".to_string(), "wlan2".to_string()];
        let (tx, rx) = sum_counters(&interfaces, |i| {
            i.get("name").map(|n| radios.contains(n)).unwrap_or(false)
        });
        assert_eq!((tx, rx), (11, 22));
    }

    #[test]
    fn test_client_throughput_from_deltas() {
        let t0 = Instant::now();
        let mut clients = vec![ConnectedClient {
            mac: "AA:BB:CC:DD:EE:FF".into(),
            tx_bytes: 1_000,
            rx_bytes: 2_000,
            ..Default::default()
        }];
        let first = apply_client_throughput(&mut clients, None, t0);
        assert!(clients[0].tx_throughput_kbps.is_none());

        clients[0].tx_bytes = 1_000 + 250_000; // 2 Mbit over 2 s
        clients[0].rx_bytes = 2_000 + 125_000;
        let second =
            apply_client_throughput(&mut clients, Some(&first), t0 + Duration::from_secs(2));
        assert_eq!(clients[0].tx_throughput_kbps, Some(1000.0));
        assert_eq!(clients[0].rx_throughput_kbps, Some(500.0));

        // Counter reset after re-association yields no figure
        clients[0].tx_bytes = 10;
        clients[0].tx_throughput_kbps = None;
        apply_client_throughput(&mut clients, Some(&second), t0 + Duration::from_secs(4));
        assert!(clients[0].tx_throughput_kbps.is_none());
    }

    #[test]
    fn test_lease_row() {
        let client = client_from_lease(&attrs(&[
            ("mac-address", "aa:bb:cc:00:11:22"),
            ("address", "192.168.88.10"),
            ("host-name", "laptop"),
            ("server", "defconf"),
        ]))
        .unwrap();
        assert_eq!(client.ip_address.as_deref(), Some("192.168.88.10"));
        assert_eq!(client.hostname.as_deref(), Some("laptop"));
    }
}
