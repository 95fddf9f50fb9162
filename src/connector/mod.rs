//! Per-class device connector
//!
//! One adapter factory plus a credential cache behind a uniform
//! subscribe/unsubscribe/fetch_stats/cleanup surface. RouterOS adapters share
//! the session pool through the factory.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::adapters::{AdapterFactory, DeviceAdapter};
use crate::error::MonitorError;
use crate::models::{Credentials, DeviceClass, StatsPayload, TestResult};

/// What the scheduler drives. `DeviceConnector` in production, stubbed in tests.
#[async_trait]
pub trait Connector: Send + Sync {
    fn class(&self) -> DeviceClass;

    /// Store credentials and connect; on failure nothing is left behind
    async fn subscribe(&self, host: &str, credentials: Credentials) -> Result<(), MonitorError>;

    /// Release the live connection, keep credentials for lazy reconnect
    async fn unsubscribe(&self, host: &str);

    /// Poll once. An unreachable device is an `Err`, not an offline payload.
    async fn fetch_stats(&self, host: &str) -> Result<StatsPayload, MonitorError>;

    /// Release the connection, then forget the adapter and credentials
    async fn cleanup(&self, host: &str);

    async fn has_credentials(&self, host: &str) -> bool;

    /// One-off check with throwaway state; never touches the cache
    async fn test_connection(&self, host: &str, credentials: &Credentials) -> TestResult;
}

pub struct DeviceConnector {
    class: DeviceClass,
    factory: Arc<dyn AdapterFactory>,
    credentials: RwLock<HashMap<String, Credentials>>,
    adapters: RwLock<HashMap<String, Arc<dyn DeviceAdapter>>>,
}

impl DeviceConnector {
    pub fn new(class: DeviceClass, factory: Arc<dyn AdapterFactory>) -> Self {
        Self {
            class,
            factory,
            credentials: RwLock::new(HashMap::new()),
            adapters: RwLock::new(HashMap::new()),
        }
    }

    /// Adapter for a known host, recreated from cached credentials if needed
    async fn adapter_for(&self, host: &str) -> Result<Arc<dyn DeviceAdapter>, MonitorError> {
        if let Some(adapter) = self.adapters.read().await.get(host) {
            return Ok(adapter.clone());
        }

        let credentials = self
            .credentials
            .read()
            .await
            .get(host)
            .cloned()
            .ok_or_else(|| MonitorError::NotSubscribed(host.to_string()))?;
        let adapter = self.factory.create(self.class, host, &credentials)?;

        let mut adapters = self.adapters.write().await;
        Ok(adapters
            .entry(host.to_string())
            .or_insert(adapter)
            .clone())
    }

    async fn rollback(&self, host: &str, previous: Option<Credentials>) {
        let mut credentials = self.credentials.write().await;
        match previous {
            Some(creds) => {
                credentials.insert(host.to_string(), creds);
            }
            None => {
                credentials.remove(host);
            }
        }
    }
}

#[async_trait]
impl Connector for DeviceConnector {
    fn class(&self) -> DeviceClass {
        self.class
    }

    async fn subscribe(&self, host: &str, credentials: Credentials) -> Result<(), MonitorError> {
        let previous = self
            .credentials
            .write()
            .await
            .insert(host.to_string(), credentials.clone());

        // Same credentials: keep the adapter (and its detected capabilities)
        let reusable = match (&previous, self.adapters.read().await.get(host)) {
            (Some(prev), Some(adapter)) if *prev == credentials => Some(adapter.clone()),
            _ => None,
        };

        let adapter = match reusable {
            Some(adapter) => adapter,
            None => {
                let stale = self.adapters.write().await.remove(host);
                if let Some(stale) = stale {
                    stale.disconnect().await;
                }
                match self.factory.create(self.class, host, &credentials) {
                    Ok(adapter) => adapter,
                    Err(e) => {
                        self.rollback(host, previous).await;
                        return Err(e);
                    }
                }
            }
        };

        if let Err(e) = adapter.connect().await {
            tracing::warn!(
                "[Connector:{}] Connect to {} failed: {}",
                self.class,
                host,
                e
            );
            adapter.disconnect().await;
            self.adapters.write().await.remove(host);
            self.rollback(host, previous).await;
            return Err(MonitorError::Connection {
                host: host.to_string(),
                message: e.to_string(),
            });
        }

        self.adapters
            .write()
            .await
            .insert(host.to_string(), adapter);
        tracing::info!("[Connector:{}] Connected to {}", self.class, host);
        Ok(())
    }

    async fn unsubscribe(&self, host: &str) {
        let adapter = self.adapters.read().await.get(host).cloned();
        if let Some(adapter) = adapter {
            adapter.disconnect().await;
            tracing::debug!("[Connector:{}] Released connection to {}", self.class, host);
        }
    }

    async fn fetch_stats(&self, host: &str) -> Result<StatsPayload, MonitorError> {
        let adapter = self.adapter_for(host).await?;
        let status = adapter.get_status().await;

        if !status.is_online {
            return Err(MonitorError::Connection {
                host: host.to_string(),
                message: status
                    .last_error
                    .unwrap_or_else(|| "device offline".to_string()),
            });
        }
        Ok(StatsPayload::from_status(&status, Utc::now()))
    }

    async fn cleanup(&self, host: &str) {
        self.unsubscribe(host).await;
        self.adapters.write().await.remove(host);
        if self.credentials.write().await.remove(host).is_some() {
            tracing::info!("[Connector:{}] Cleaned up {}", self.class, host);
        }
    }

    async fn has_credentials(&self, host: &str) -> bool {
        self.credentials.read().await.contains_key(host)
    }

    async fn test_connection(&self, host: &str, credentials: &Credentials) -> TestResult {
        let adapter = match self.factory.create(self.class, host, credentials) {
            Ok(adapter) => adapter,
            Err(e) => return TestResult::failed(e.to_string()),
        };

        let result = match adapter.test_connection().await {
            Ok(()) => {
                let status = adapter.get_status().await;
                TestResult {
                    success: status.is_online,
                    hostname: status.hostname,
                    model: status.model,
                    firmware: status.firmware,
                    error: status.last_error,
                }
            }
            Err(e) => TestResult::failed(e.to_string()),
        };
        adapter.disconnect().await;
        result
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::DeviceError;
    use crate::models::{ConnectedClient, DeviceStatus, Vendor};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Adapter whose connect outcome is scripted per host
    pub struct StubAdapter {
        host: String,
        fail_connect: bool,
        online: bool,
        pub connects: AtomicUsize,
        pub disconnects: AtomicUsize,
    }

    #[async_trait]
    impl DeviceAdapter for StubAdapter {
        fn host(&self) -> &str {
            &self.host
        }

        fn vendor(&self) -> Vendor {
            Vendor::Mikrotik
        }

        fn role(&self) -> DeviceClass {
            DeviceClass::Router
        }

        async fn connect(&self) -> Result<(), DeviceError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail_connect {
                Err(DeviceError::Auth("invalid user name or password".into()))
            } else {
                Ok(())
            }
        }

        async fn get_status(&self) -> DeviceStatus {
            if self.online {
                let mut status = DeviceStatus::online(&self.host, Vendor::Mikrotik, DeviceClass::Router);
                status.hostname = Some("stub".into());
                status
            } else {
                DeviceStatus::offline(&self.host, Vendor::Mikrotik, DeviceClass::Router, "no route to host")
            }
        }

        async fn get_connected_clients(&self) -> Result<Vec<ConnectedClient>, DeviceError> {
            Ok(Vec::new())
        }

        async fn test_connection(&self) -> Result<(), DeviceError> {
            self.connect().await
        }

        async fn disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    pub struct StubFactory {
        pub failing_hosts: Vec<String>,
        pub offline_hosts: Vec<String>,
        pub created: Mutex<Vec<Arc<StubAdapter>>>,
    }

    impl AdapterFactory for StubFactory {
        fn create(
            &self,
            _class: DeviceClass,
            host: &str,
            _credentials: &Credentials,
        ) -> Result<Arc<dyn DeviceAdapter>, MonitorError> {
            let adapter = Arc::new(StubAdapter {
                host: host.to_string(),
                fail_connect: self.failing_hosts.iter().any(|h| h == host),
                online: !self.offline_hosts.iter().any(|h| h == host),
                connects: AtomicUsize::new(0),
                disconnects: AtomicUsize::new(0),
            });
            self.created.lock().unwrap().push(adapter.clone());
            Ok(adapter)
        }
    }

    fn creds() -> Credentials {
        Credentials::new("admin", "pw", Vendor::Mikrotik, None)
    }

    #[tokio::test]
    async fn test_failed_subscribe_rolls_back_credentials() {
        let factory = Arc::new(StubFactory {
            failing_hosts: vec!["10.0.0.9".into()],
            ..Default::default()
        });
        let connector = DeviceConnector::new(DeviceClass::Router, factory.clone());

        let err = connector.subscribe("10.0.0.9", creds()).await.unwrap_err();
        assert!(matches!(err, MonitorError::Connection { .. }));
        assert!(!connector.has_credentials("10.0.0.9").await);
        assert!(matches!(
            connector.fetch_stats("10.0.0.9").await,
            Err(MonitorError::NotSubscribed(_))
        ));
    }

    #[tokio::test]
    async fn test_unsubscribe_keeps_credentials_and_fetch_still_works() {
        let factory = Arc::new(StubFactory::default());
        let connector = DeviceConnector::new(DeviceClass::Router, factory.clone());

        connector.subscribe("10.0.0.1", creds()).await.unwrap();
        connector.unsubscribe("10.0.0.1").await;
        assert!(connector.has_credentials("10.0.0.1").await);

        let payload = connector.fetch_stats("10.0.0.1").await.unwrap();
        assert!(payload.online);
        assert_eq!(payload.name.as_deref(), Some("stub"));

        let adapter = factory.created.lock().unwrap()[0].clone();
        assert_eq!(adapter.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_offline_device_is_an_error() {
        let factory = Arc::new(StubFactory {
            offline_hosts: vec!["10.0.0.2".into()],
            ..Default::default()
        });
        let connector = DeviceConnector::new(DeviceClass::Router, factory);
        connector.subscribe("10.0.0.2", creds()).await.unwrap();

        match connector.fetch_stats("10.0.0.2").await {
            Err(MonitorError::Connection { message, .. }) => {
                assert_eq!(message, "no route to host")
            }
            other => panic!("unexpected {:?}", other.map(|p| p.host)),
        }
    }

    #[tokio::test]
    async fn test_cleanup_disconnects_and_forgets() {
        let factory = Arc::new(StubFactory::default());
        let connector = DeviceConnector::new(DeviceClass::Router, factory.clone());
        connector.subscribe("10.0.0.1", creds()).await.unwrap();

        connector.cleanup("10.0.0.1").await;
        assert!(!connector.has_credentials("10.0.0.1").await);
        let adapter = factory.created.lock().unwrap()[0].clone();
        assert_eq!(adapter.disconnects.load(Ordering::SeqCst), 1);

        // Idempotent
        connector.cleanup("10.0.0.1").await;
        assert_eq!(adapter.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resubscribe_with_same_credentials_reuses_adapter() {
        let factory = Arc::new(StubFactory::default());
        let connector = DeviceConnector::new(DeviceClass::Router, factory.clone());
        connector.subscribe("10.0.0.1", creds()).await.unwrap();
        connector.unsubscribe("10.0.0.1").await;
        connector.subscribe("10.0.0.1", creds()).await.unwrap();

        let created = factory.created.lock().unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_connection_check_is_throwaway() {
        let factory = Arc::new(StubFactory::default());
        let connector = DeviceConnector::new(DeviceClass::Router, factory);
        let result = connector.test_connection("10.0.0.7", &creds()).await;
        assert!(result.success);
        assert_eq!(result.hostname.as_deref(), Some("stub"));
        assert!(!connector.has_credentials("10.0.0.7").await);
    }
}
