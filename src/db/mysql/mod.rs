//! MySQL database module

mod devices;
mod settings;
mod status;

use sqlx::mysql::MySqlPoolOptions;
use sqlx::MySqlPool;

use crate::config::Config;

/// MySQL database wrapper
#[derive(Clone)]
pub struct MySqlDb {
    pool: MySqlPool,
}

impl MySqlDb {
    /// Connect to MySQL database
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let url = config
            .database
            .mysql_url
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("MySQL URL not configured"))?;

        tracing::info!("Connecting to MySQL...");

        let pool = MySqlPoolOptions::new()
            .max_connections(config.database.max_connections)
            .min_connections(1)
            .connect(url)
            .await?;

        tracing::info!("MySQL connected successfully");

        Ok(Self { pool })
    }

    /// Get the connection pool
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    /// Create every table the monitor uses (auto-migration on startup)
    pub async fn ensure_tables(&self) -> Result<(), sqlx::Error> {
        self.ensure_devices_table().await?;
        self.ensure_status_tables().await?;
        self.ensure_settings_table().await?;
        Ok(())
    }
}
