//! Monitor service - the public surface
//!
//! Owns the cache stores, the RouterOS session pool and one connector +
//! scheduler per device class. Callers (API handlers, the watch list in
//! `main`) only talk to this type.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::adapters::routeros::session::ApiSessionFactory;
use crate::adapters::{AdapterFactory, RouterOsPool, ShellAdapter, VendorAdapterFactory};
use crate::cache::CacheManager;
use crate::config::{AdapterConfig, Config, WatchedDevice};
use crate::connector::{Connector, DeviceConnector};
use crate::db::{CredentialRegistry, StatusStore};
use crate::error::MonitorError;
use crate::models::{Credentials, DeviceClass, ResetOutcome, SpectralSample, TestResult};
use crate::scheduler::{MonitorScheduler, SubscriptionInfo};

/// Longest spectral scan a caller may ask for
const MAX_SCAN_DURATION: Duration = Duration::from_secs(600);

const SCAN_CHANNEL_CAPACITY: usize = 64;

pub struct MonitorService {
    caches: Arc<CacheManager>,
    connectors: HashMap<DeviceClass, Arc<dyn Connector>>,
    schedulers: HashMap<DeviceClass, Arc<MonitorScheduler>>,
    registry: Arc<dyn CredentialRegistry>,
    adapter_config: AdapterConfig,
}

impl MonitorService {
    /// Production wiring: vendor adapters over a shared RouterOS pool
    pub async fn new(
        config: &Config,
        registry: Arc<dyn CredentialRegistry>,
        status_store: Arc<dyn StatusStore>,
    ) -> anyhow::Result<Self> {
        let session_factory = ApiSessionFactory::new(&config.adapters)?;
        let pool = Arc::new(RouterOsPool::new(session_factory));
        let factory = Arc::new(VendorAdapterFactory::new(pool, config.adapters.clone()));
        Ok(Self::with_factory(config, factory, registry, status_store).await)
    }

    pub async fn with_factory(
        config: &Config,
        factory: Arc<dyn AdapterFactory>,
        registry: Arc<dyn CredentialRegistry>,
        status_store: Arc<dyn StatusStore>,
    ) -> Self {
        let caches = Arc::new(CacheManager::new(&config.cache));
        let mut connectors: HashMap<DeviceClass, Arc<dyn Connector>> = HashMap::new();
        let mut schedulers = HashMap::new();

        for class in DeviceClass::ALL {
            let connector: Arc<dyn Connector> = Arc::new(DeviceConnector::new(class, factory.clone()));
            let scheduler = MonitorScheduler::new(
                class,
                connector.clone(),
                caches.store(class.cache_store()).await,
                status_store.clone(),
                registry.clone(),
                config.monitor.clone(),
            );
            connectors.insert(class, connector);
            schedulers.insert(class, Arc::new(scheduler));
        }

        Self {
            caches,
            connectors,
            schedulers,
            registry,
            adapter_config: config.adapters.clone(),
        }
    }

    fn scheduler(&self, class: DeviceClass) -> Result<&Arc<MonitorScheduler>, MonitorError> {
        self.schedulers
            .get(&class)
            .ok_or_else(|| MonitorError::InternalError(format!("no scheduler for {}", class)))
    }

    fn check_host(host: &str) -> Result<(), MonitorError> {
        if host.trim().is_empty() || host.chars().any(char::is_whitespace) {
            return Err(MonitorError::InvalidKey(format!("host '{}'", host)));
        }
        Ok(())
    }

    // ========================================================================
    // Viewer operations
    // ========================================================================

    pub async fn subscribe(
        &self,
        class: DeviceClass,
        host: &str,
        credentials: Credentials,
        poll_interval_ms: Option<u64>,
    ) -> Result<(), MonitorError> {
        Self::check_host(host)?;
        self.scheduler(class)?
            .subscribe(host, credentials, poll_interval_ms.map(Duration::from_millis))
            .await
    }

    pub async fn unsubscribe(&self, class: DeviceClass, host: &str) -> Result<(), MonitorError> {
        self.scheduler(class)?.unsubscribe(host).await;
        Ok(())
    }

    /// Latest cached snapshot (or `{error}` marker) for `host`
    pub async fn cache_get(&self, store_name: &str, host: &str) -> Option<Value> {
        self.caches.get(store_name, host).await
    }

    // ========================================================================
    // Admin operations
    // ========================================================================

    pub async fn refresh_host(&self, class: DeviceClass, host: &str) -> Result<Value, MonitorError> {
        self.scheduler(class)?.refresh(host).await
    }

    pub async fn reset_connection(&self, class: DeviceClass, host: &str) -> ResetOutcome {
        match self.scheduler(class) {
            Ok(scheduler) => scheduler.reset(host).await,
            Err(e) => ResetOutcome {
                success: false,
                message: e.to_string(),
            },
        }
    }

    pub async fn test_connection(
        &self,
        class: DeviceClass,
        host: &str,
        credentials: &Credentials,
    ) -> TestResult {
        if let Err(e) = Self::check_host(host) {
            return TestResult::failed(e.to_string());
        }
        match self.connectors.get(&class) {
            Some(connector) => connector.test_connection(host, credentials).await,
            None => TestResult::failed(format!("no connector for {}", class)),
        }
    }

    /// Run a spectral scan on `interface` for `duration`. Samples arrive on the
    /// returned channel; dropping it ends the scan early.
    pub async fn start_spectral_scan(
        &self,
        host: &str,
        interface: &str,
        duration: Duration,
    ) -> Result<mpsc::Receiver<SpectralSample>, MonitorError> {
        Self::check_host(host)?;
        if interface.trim().is_empty() {
            return Err(MonitorError::InvalidKey("empty interface name".into()));
        }
        if duration.is_zero() || duration > MAX_SCAN_DURATION {
            return Err(MonitorError::InvalidKey(format!(
                "scan duration must be between 1s and {}s",
                MAX_SCAN_DURATION.as_secs()
            )));
        }

        let credentials = self
            .registry
            .get_device_credentials(host, DeviceClass::AccessPoint)
            .await?
            .ok_or_else(|| MonitorError::NoCredentials(host.to_string()))?;

        let shell = ShellAdapter::new(host, credentials, &self.adapter_config);
        let scan = shell.spectral_scan(interface.trim()).await?;

        let (tx, rx) = mpsc::channel(SCAN_CHANNEL_CAPACITY);
        tokio::spawn(scan.stream_for(duration, tx));
        tracing::info!(
            "[Service] Spectral scan on {} {} for {}s",
            host,
            interface,
            duration.as_secs()
        );
        Ok(rx)
    }

    /// Subscription table of every scheduler, keyed by class
    pub async fn snapshot(&self) -> BTreeMap<&'static str, Vec<SubscriptionInfo>> {
        let mut out = BTreeMap::new();
        for (class, scheduler) in &self.schedulers {
            out.insert(class.as_str(), scheduler.snapshot().await);
        }
        out
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub async fn start(&self) {
        for scheduler in self.schedulers.values() {
            scheduler.start().await;
        }
        tracing::info!("[Service] {} schedulers started", self.schedulers.len());
    }

    pub async fn stop(&self) {
        for scheduler in self.schedulers.values() {
            scheduler.stop().await;
        }
        tracing::info!("[Service] Stopped");
    }

    /// Subscribe the static watch list plus every enabled registry device.
    /// These subscriptions belong to the process and are never released.
    /// Returns how many hosts were subscribed.
    pub async fn subscribe_watch_list(&self, watched: &[WatchedDevice]) -> usize {
        let mut subscribed = 0;

        for device in watched {
            let credentials = match device.inline_credentials() {
                Some(credentials) => Some(credentials),
                None => match self
                    .registry
                    .get_device_credentials(&device.host, device.class)
                    .await
                {
                    Ok(credentials) => credentials,
                    Err(e) => {
                        tracing::warn!("[Service] Registry lookup for {} failed: {}", device.host, e);
                        None
                    }
                },
            };
            let Some(credentials) = credentials else {
                tracing::warn!("[Service] No credentials for watched device {}, skipping", device.host);
                continue;
            };
            match self
                .subscribe(device.class, &device.host, credentials, device.poll_interval_ms)
                .await
            {
                Ok(()) => subscribed += 1,
                Err(e) => tracing::warn!("[Service] Watch {} failed: {}", device.host, e),
            }
        }

        match self.registry.list_devices().await {
            Ok(devices) => {
                for device in devices {
                    if watched
                        .iter()
                        .any(|w| w.host == device.host && w.class == device.class)
                    {
                        continue;
                    }
                    match self
                        .subscribe(device.class, &device.host, device.credentials, device.poll_interval_ms)
                        .await
                    {
                        Ok(()) => subscribed += 1,
                        Err(e) => tracing::warn!("[Service] Watch {} failed: {}", device.host, e),
                    }
                }
            }
            Err(e) => tracing::warn!("[Service] Could not list registered devices: {}", e),
        }

        subscribed
    }
}
