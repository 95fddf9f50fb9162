//! MySQL monitored_devices table - the credential registry

use async_trait::async_trait;

use super::MySqlDb;
use crate::db::{CredentialRegistry, RegisteredDevice};
use crate::error::MonitorError;
use crate::models::{Credentials, DeviceClass, Vendor};

#[derive(Debug, sqlx::FromRow)]
struct DeviceRow {
    host: String,
    device_class: String,
    vendor: String,
    username: String,
    password: String,
    port: Option<u16>,
    poll_interval_ms: Option<u64>,
}

impl DeviceRow {
    fn credentials(&self) -> Result<Credentials, MonitorError> {
        let vendor: Vendor = self.vendor.parse()?;
        Ok(Credentials::new(&self.username, &self.password, vendor, self.port))
    }
}

impl MySqlDb {
    pub(super) async fn ensure_devices_table(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS monitored_devices (
                host VARCHAR(255) NOT NULL,
                device_class VARCHAR(20) NOT NULL,
                vendor VARCHAR(20) NOT NULL,
                username VARCHAR(128) NOT NULL,
                password VARCHAR(255) NOT NULL,
                port SMALLINT UNSIGNED NULL,
                poll_interval_ms BIGINT UNSIGNED NULL,
                enabled TINYINT(1) NOT NULL DEFAULT 1,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
                PRIMARY KEY (host, device_class)
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4
            "#,
        )
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CredentialRegistry for MySqlDb {
    async fn get_device_credentials(
        &self,
        host: &str,
        class: DeviceClass,
    ) -> Result<Option<Credentials>, MonitorError> {
        let row = sqlx::query_as::<_, DeviceRow>(
            r#"
            SELECT host, device_class, vendor, username, password, port, poll_interval_ms
            FROM monitored_devices
            WHERE host = ? AND device_class = ?
            "#,
        )
        .bind(host)
        .bind(class.as_str())
        .fetch_optional(self.pool())
        .await?;

        row.map(|r| r.credentials()).transpose()
    }

    async fn list_devices(&self) -> Result<Vec<RegisteredDevice>, MonitorError> {
        let rows = sqlx::query_as::<_, DeviceRow>(
            r#"
            SELECT host, device_class, vendor, username, password, port, poll_interval_ms
            FROM monitored_devices
            WHERE enabled = 1
            ORDER BY host ASC, device_class ASC
            "#,
        )
        .fetch_all(self.pool())
        .await?;

        let mut devices = Vec::with_capacity(rows.len());
        for row in rows {
            // One bad row shouldn't hide the rest of the registry
            let parsed = row
                .device_class
                .parse::<DeviceClass>()
                .and_then(|class| Ok((class, row.credentials()?)));
            match parsed {
                Ok((class, credentials)) => devices.push(RegisteredDevice {
                    host: row.host,
                    class,
                    credentials,
                    poll_interval_ms: row.poll_interval_ms,
                }),
                Err(e) => tracing::warn!("[Registry] Skipping {}: {}", row.host, e),
            }
        }
        Ok(devices)
    }
}
