//! Vendor device adapters
//!
//! - `routeros`: MikroTik RouterOS binary API (pooled, TLS)
//! - `airos`: Ubiquiti airOS HTTP API (CSRF-token session)
//! - `shell`: interactive SSH sessions for diagnostic streams
//! - `switch`: RouterOS switches, composed over the router adapter

pub mod airos;
pub mod routeros;
pub mod shell;
pub mod switch;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::AdapterConfig;
use crate::error::{DeviceError, MonitorError};
use crate::models::{ConnectedClient, Credentials, DeviceClass, DeviceStatus, Vendor};

pub use airos::AirOsAdapter;
pub use routeros::{RouterOsAdapter, RouterOsPool};
pub use shell::{ShellAdapter, SpectralScan};
pub use switch::SwitchAdapter;

/// One device, one wire protocol, normalized output.
///
/// `get_status` never fails: an unreachable or misbehaving device yields a
/// snapshot with `is_online = false` and `last_error` set. `connect` and
/// `test_connection` do return errors so callers can roll back.
#[async_trait]
pub trait DeviceAdapter: Send + Sync {
    fn host(&self) -> &str;

    fn vendor(&self) -> Vendor;

    fn role(&self) -> DeviceClass;

    /// Establish (or verify) the session
    async fn connect(&self) -> Result<(), DeviceError>;

    async fn get_status(&self) -> DeviceStatus;

    async fn get_connected_clients(&self) -> Result<Vec<ConnectedClient>, DeviceError>;

    /// Connect and run one cheap read
    async fn test_connection(&self) -> Result<(), DeviceError>;

    /// Release the live session. Idempotent.
    async fn disconnect(&self);
}

/// Builds the adapter for a host; one implementation per deployment, stubbed in tests
pub trait AdapterFactory: Send + Sync {
    fn create(
        &self,
        class: DeviceClass,
        host: &str,
        credentials: &Credentials,
    ) -> Result<Arc<dyn DeviceAdapter>, MonitorError>;
}

/// Picks the adapter by vendor, sharing one RouterOS session pool
pub struct VendorAdapterFactory {
    routeros_pool: Arc<RouterOsPool>,
    config: AdapterConfig,
}

impl VendorAdapterFactory {
    pub fn new(routeros_pool: Arc<RouterOsPool>, config: AdapterConfig) -> Self {
        Self {
            routeros_pool,
            config,
        }
    }
}

impl AdapterFactory for VendorAdapterFactory {
    fn create(
        &self,
        class: DeviceClass,
        host: &str,
        credentials: &Credentials,
    ) -> Result<Arc<dyn DeviceAdapter>, MonitorError> {
        match (credentials.vendor, class) {
            (Vendor::Mikrotik, DeviceClass::Switch) => {
                let router = RouterOsAdapter::new(
                    host,
                    credentials.clone(),
                    DeviceClass::Switch,
                    self.routeros_pool.clone(),
                );
                Ok(Arc::new(SwitchAdapter::new(router)))
            }
            (Vendor::Mikrotik, role) => Ok(Arc::new(RouterOsAdapter::new(
                host,
                credentials.clone(),
                role,
                self.routeros_pool.clone(),
            ))),
            (Vendor::Ubiquiti, DeviceClass::Switch) => Err(MonitorError::InvalidKey(format!(
                "{} adapter does not drive switches",
                Vendor::Ubiquiti
            ))),
            (Vendor::Ubiquiti, role) => {
                let adapter = AirOsAdapter::new(host, credentials.clone(), role, &self.config)
                    .map_err(|e| MonitorError::InternalError(e.to_string()))?;
                Ok(Arc::new(adapter))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::routeros::session::ApiSessionFactory;
    use crate::pool::ConnectionPool;

    fn factory() -> VendorAdapterFactory {
        let config = AdapterConfig::default();
        let pool = Arc::new(ConnectionPool::new(ApiSessionFactory::new(&config).unwrap()));
        VendorAdapterFactory::new(pool, config)
    }

    #[tokio::test]
    async fn test_factory_selects_by_vendor() {
        let f = factory();
        let mt = Credentials::new("admin", "pw", Vendor::Mikrotik, None);
        let ubnt = Credentials::new("ubnt", "pw", Vendor::Ubiquiti, None);

        let router = f.create(DeviceClass::Router, "10.0.0.1", &mt).unwrap();
        assert_eq!(router.vendor(), Vendor::Mikrotik);
        assert_eq!(router.role(), DeviceClass::Router);

        let switch = f.create(DeviceClass::Switch, "10.0.0.2", &mt).unwrap();
        assert_eq!(switch.role(), DeviceClass::Switch);

        let ap = f.create(DeviceClass::AccessPoint, "10.0.0.3", &ubnt).unwrap();
        assert_eq!(ap.vendor(), Vendor::Ubiquiti);
        assert_eq!(ap.host(), "10.0.0.3");
    }

    #[tokio::test]
    async fn test_factory_rejects_unsupported_pairing() {
        let f = factory();
        let ubnt = Credentials::new("ubnt", "pw", Vendor::Ubiquiti, None);
        let err = f.create(DeviceClass::Switch, "10.0.0.4", &ubnt).err().unwrap();
        assert!(err.is_contract_error());
    }
}
