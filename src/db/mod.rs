//! Persistence boundary - device registry and status/history store
//!
//! The scheduler only sees the two traits. `MySqlDb` is the production
//! binding; `MemoryStore` backs development runs and tests. Rows are keyed by
//! `(host, class)` so one box watched as two classes keeps separate records.

pub mod memory;
pub mod mysql;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::MonitorError;
use crate::models::{Credentials, DeviceClass, DeviceState};

pub use self::memory::MemoryStore;
pub use self::mysql::MySqlDb;

/// A device known to the registry
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredDevice {
    pub host: String,
    pub class: DeviceClass,
    pub credentials: Credentials,
    pub poll_interval_ms: Option<u64>,
}

/// Source of device login material
#[async_trait]
pub trait CredentialRegistry: Send + Sync {
    async fn get_device_credentials(
        &self,
        host: &str,
        class: DeviceClass,
    ) -> Result<Option<Credentials>, MonitorError>;

    /// Enabled devices, polled from startup
    async fn list_devices(&self) -> Result<Vec<RegisteredDevice>, MonitorError>;
}

/// Sink for poll results
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Latest state, plus the snapshot when the poll succeeded
    async fn update_device_status(
        &self,
        host: &str,
        class: DeviceClass,
        state: DeviceState,
        snapshot: Option<&Value>,
    ) -> Result<(), MonitorError>;

    async fn append_history(
        &self,
        host: &str,
        class: DeviceClass,
        snapshot: &Value,
    ) -> Result<(), MonitorError>;

    /// Operator override of the history interval, if set
    async fn get_history_interval_secs(&self) -> Result<Option<u64>, MonitorError>;
}
