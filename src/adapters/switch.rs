//! RouterOS switches (CRS/CSS running RouterOS)
//!
//! Same API as a router; adds the ethernet port table to `extra.ports`.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;

use super::routeros::wire::Attrs;
use super::routeros::RouterOsAdapter;
use super::DeviceAdapter;
use crate::error::DeviceError;
use crate::models::{ConnectedClient, DeviceClass, DeviceStatus, Vendor};
use crate::parsers::{normalize_mac, parse_flag};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwitchPort {
    pub name: String,
    pub mac: Option<String>,
    pub running: bool,
    pub disabled: bool,
    /// e.g. "1Gbps"; only known for ports with link
    pub rate: Option<String>,
    pub full_duplex: Option<bool>,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
}

pub struct SwitchAdapter {
    router: RouterOsAdapter,
}

impl SwitchAdapter {
    pub fn new(router: RouterOsAdapter) -> Self {
        Self { router }
    }

    pub async fn get_ports(&self) -> Result<Vec<SwitchPort>, DeviceError> {
        let rows = self.router.query("/interface/ethernet/print", &[]).await?;
        let mut ports: Vec<SwitchPort> = rows.iter().filter_map(port_from_row).collect();

        let linked: Vec<String> = ports
            .iter()
            .filter(|p| p.running && !p.disabled)
            .map(|p| p.name.clone())
            .collect();
        if linked.is_empty() {
            return Ok(ports);
        }

        let names = linked.join(",");
        match self
            .router
            .query(
                "/interface/ethernet/monitor",
                &[("numbers", names.as_str()), ("once", "")],
            )
            .await
        {
            Ok(monitors) => apply_link_state(&mut ports, &monitors),
            // Some switch chips don't support monitor; the port list is still useful
            Err(DeviceError::Trap(msg)) => {
                tracing::debug!("[Switch] {} ethernet monitor: {}", self.router.host(), msg);
            }
            Err(e) => return Err(e),
        }
        Ok(ports)
    }
}

#[async_trait]
impl DeviceAdapter for SwitchAdapter {
    fn host(&self) -> &str {
        self.router.host()
    }

    fn vendor(&self) -> Vendor {
        Vendor::Mikrotik
    }

    fn role(&self) -> DeviceClass {
        DeviceClass::Switch
    }

    async fn connect(&self) -> Result<(), DeviceError> {
        self.router.connect().await
    }

    async fn get_status(&self) -> DeviceStatus {
        let mut status = self.router.get_status().await;
        if !status.is_online {
            return status;
        }

        match self.get_ports().await {
            Ok(ports) => {
                let up = ports.iter().filter(|p| p.running).count();
                status.extra.insert("ports".into(), json!(ports));
                status.extra.insert("ports_up".into(), json!(up));
            }
            Err(e) => {
                tracing::warn!("[Switch] {} port listing failed: {}", self.host(), e);
                status
                    .extra
                    .insert("ports_error".into(), json!(e.to_string()));
            }
        }
        status
    }

    async fn get_connected_clients(&self) -> Result<Vec<ConnectedClient>, DeviceError> {
        self.router.get_connected_clients().await
    }

    async fn test_connection(&self) -> Result<(), DeviceError> {
        self.router.test_connection().await
    }

    async fn disconnect(&self) {
        self.router.disconnect().await
    }
}

fn port_from_row(row: &Attrs) -> Option<SwitchPort> {
    let counter = |key: &str| row.get(key).and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
    Some(SwitchPort {
        name: row.get("name")?.clone(),
        mac: row.get("mac-address").map(|m| normalize_mac(m)),
        running: row.get("running").map(|v| parse_flag(v)).unwrap_or(false),
        disabled: row.get("disabled").map(|v| parse_flag(v)).unwrap_or(false),
        rate: None,
        full_duplex: None,
        tx_bytes: counter("tx-bytes"),
        rx_bytes: counter("rx-bytes"),
    })
}

fn apply_link_state(ports: &mut [SwitchPort], monitors: &[Attrs]) {
    for monitor in monitors {
        let Some(name) = monitor.get("name") else { continue };
        let Some(port) = ports.iter_mut().find(|p| &p.name == name) else {
            continue;
        };
        port.rate = monitor.get("rate").cloned();
        port.full_duplex = monitor.get("full-duplex").map(|v| parse_flag(v));
        if let Some(status) = monitor.get("status") {
            port.running = status == "link-ok";
        }
    }
}
