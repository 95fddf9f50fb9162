//! In-memory registry and status store for development runs and tests

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{CredentialRegistry, RegisteredDevice, StatusStore};
use crate::error::MonitorError;
use crate::models::{Credentials, DeviceClass, DeviceState};

/// Snapshots kept per device; a day at the default five-minute interval
pub const HISTORY_PER_DEVICE: usize = 288;

type DeviceKey = (String, DeviceClass);

#[derive(Debug, Clone)]
pub struct StatusRecord {
    pub state: DeviceState,
    pub snapshot: Option<Value>,
}

#[derive(Default)]
pub struct MemoryStore {
    devices: RwLock<HashMap<DeviceKey, RegisteredDevice>>,
    status: RwLock<HashMap<DeviceKey, StatusRecord>>,
    history: RwLock<HashMap<DeviceKey, VecDeque<Value>>>,
    history_interval_secs: RwLock<Option<u64>>,
}

fn key(host: &str, class: DeviceClass) -> DeviceKey {
    (host.to_string(), class)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        host: &str,
        class: DeviceClass,
        credentials: Credentials,
        poll_interval_ms: Option<u64>,
    ) {
        self.devices.write().await.insert(
            key(host, class),
            RegisteredDevice {
                host: host.to_string(),
                class,
                credentials,
                poll_interval_ms,
            },
        );
    }

    pub async fn set_history_interval_secs(&self, secs: Option<u64>) {
        *self.history_interval_secs.write().await = secs;
    }

    pub async fn status(&self, host: &str, class: DeviceClass) -> Option<StatusRecord> {
        self.status.read().await.get(&key(host, class)).cloned()
    }

    /// History entries across every class for `host`
    pub async fn history_len(&self, host: &str) -> usize {
        self.history
            .read()
            .await
            .iter()
            .filter(|((h, _), _)| h == host)
            .map(|(_, entries)| entries.len())
            .sum()
    }
}

#[async_trait]
impl CredentialRegistry for MemoryStore {
    async fn get_device_credentials(
        &self,
        host: &str,
        class: DeviceClass,
    ) -> Result<Option<Credentials>, MonitorError> {
        Ok(self
            .devices
            .read()
            .await
            .get(&key(host, class))
            .map(|d| d.credentials.clone()))
    }

    async fn list_devices(&self) -> Result<Vec<RegisteredDevice>, MonitorError> {
        let mut devices: Vec<_> = self.devices.read().await.values().cloned().collect();
        devices.sort_by(|a, b| a.host.cmp(&b.host).then(a.class.as_str().cmp(b.class.as_str())));
        Ok(devices)
    }
}

#[async_trait]
impl StatusStore for MemoryStore {
    async fn update_device_status(
        &self,
        host: &str,
        class: DeviceClass,
        state: DeviceState,
        snapshot: Option<&Value>,
    ) -> Result<(), MonitorError> {
        let mut status = self.status.write().await;
        let entry = status.entry(key(host, class)).or_insert(StatusRecord {
            state,
            snapshot: None,
        });
        entry.state = state;
        // Offline updates keep the last good snapshot
        if let Some(snapshot) = snapshot {
            entry.snapshot = Some(snapshot.clone());
        }
        Ok(())
    }

    async fn append_history(
        &self,
        host: &str,
        class: DeviceClass,
        snapshot: &Value,
    ) -> Result<(), MonitorError> {
        let mut history = self.history.write().await;
        let entries = history.entry(key(host, class)).or_default();
        if entries.len() >= HISTORY_PER_DEVICE {
            entries.pop_front();
        }
        entries.push_back(snapshot.clone());
        Ok(())
    }

    async fn get_history_interval_secs(&self) -> Result<Option<u64>, MonitorError> {
        Ok(*self.history_interval_secs.read().await)
    }
}
