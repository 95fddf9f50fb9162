//! MySQL device_status / device_status_history tables

use async_trait::async_trait;
use serde_json::Value;

use super::MySqlDb;
use crate::db::StatusStore;
use crate::error::MonitorError;
use crate::models::{DeviceClass, DeviceState};

/// Settings key holding the operator's history interval
pub const HISTORY_INTERVAL_KEY: &str = "history_interval_secs";

impl MySqlDb {
    pub(super) async fn ensure_status_tables(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS device_status (
                host VARCHAR(255) NOT NULL,
                device_class VARCHAR(20) NOT NULL,
                state VARCHAR(10) NOT NULL,
                snapshot JSON NULL,
                last_seen_at DATETIME NULL,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
                PRIMARY KEY (host, device_class)
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4
            "#,
        )
        .execute(self.pool())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS device_status_history (
                id BIGINT AUTO_INCREMENT PRIMARY KEY,
                host VARCHAR(255) NOT NULL,
                device_class VARCHAR(20) NOT NULL,
                snapshot JSON NOT NULL,
                recorded_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                INDEX idx_device_time (host, device_class, recorded_at)
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4
            "#,
        )
        .execute(self.pool())
        .await?;

        Ok(())
    }
}

#[async_trait]
impl StatusStore for MySqlDb {
    async fn update_device_status(
        &self,
        host: &str,
        class: DeviceClass,
        state: DeviceState,
        snapshot: Option<&Value>,
    ) -> Result<(), MonitorError> {
        match snapshot {
            Some(snapshot) => {
                sqlx::query(
                    r#"
                    INSERT INTO device_status (host, device_class, state, snapshot, last_seen_at)
                    VALUES (?, ?, ?, ?, NOW())
                    ON DUPLICATE KEY UPDATE
                        state = VALUES(state),
                        snapshot = VALUES(snapshot),
                        last_seen_at = VALUES(last_seen_at)
                    "#,
                )
                .bind(host)
                .bind(class.as_str())
                .bind(state.as_str())
                .bind(snapshot.to_string())
                .execute(self.pool())
                .await?;
            }
            None => {
                // Keep the last good snapshot around for viewers
                sqlx::query(
                    r#"
                    INSERT INTO device_status (host, device_class, state)
                    VALUES (?, ?, ?)
                    ON DUPLICATE KEY UPDATE state = VALUES(state)
                    "#,
                )
                .bind(host)
                .bind(class.as_str())
                .bind(state.as_str())
                .execute(self.pool())
                .await?;
            }
        }
        Ok(())
    }

    async fn append_history(
        &self,
        host: &str,
        class: DeviceClass,
        snapshot: &Value,
    ) -> Result<(), MonitorError> {
        sqlx::query(
            r#"
            INSERT INTO device_status_history (host, device_class, snapshot)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(host)
        .bind(class.as_str())
        .bind(snapshot.to_string())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn get_history_interval_secs(&self) -> Result<Option<u64>, MonitorError> {
        let value = self.get_setting(HISTORY_INTERVAL_KEY).await?;
        Ok(value.and_then(|v| v.trim().parse().ok()))
    }
}
