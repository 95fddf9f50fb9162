//! Monitor settings (key/value)

use super::MySqlDb;
use crate::error::MonitorError;

impl MySqlDb {
    pub(super) async fn ensure_settings_table(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS monitor_settings (
                setting_key VARCHAR(64) PRIMARY KEY,
                setting_value VARCHAR(255) NULL,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4
            "#,
        )
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Get a single setting by key
    pub async fn get_setting(&self, key: &str) -> Result<Option<String>, MonitorError> {
        let value: Option<(Option<String>,)> = sqlx::query_as(
            r#"
            SELECT setting_value
            FROM monitor_settings
            WHERE setting_key = ?
            "#,
        )
        .bind(key)
        .fetch_optional(self.pool())
        .await?;

        Ok(value.and_then(|(v,)| v))
    }
}
