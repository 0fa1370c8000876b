//! Postgres persistence.
//!
//! [`Db`] owns the connection pool and implements every storage trait in
//! [`crate::store`], plus the pgmq queue calls the event bus needs.

pub mod complaint;
pub mod department;
pub mod notification;
pub mod pgmq;

use crate::error::{Error, Result};
use crate::model::Location;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Database handle. Owns the connection pool shared across all modules.
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Rebuild a location from its three nullable columns.
fn location_from_columns(
    latitude: Option<f64>,
    longitude: Option<f64>,
    address: Option<String>,
) -> Option<Location> {
    if latitude.is_none() && longitude.is_none() && address.is_none() {
        return None;
    }
    Some(Location {
        latitude,
        longitude,
        address,
    })
}
