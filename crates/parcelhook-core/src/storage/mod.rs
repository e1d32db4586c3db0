//! Database access layer for retry records and shipments.
//!
//! Repositories translate between domain models and the Postgres schema. All
//! SQL lives in this module.

use std::sync::Arc;

use sqlx::PgPool;

pub mod callback_retries;
pub mod shipments;

use crate::error::Result;

/// Container for all repository instances over one shared pool.
#[derive(Clone)]
pub struct Storage {
    /// Retry queue for failed provider callbacks.
    pub callback_retries: Arc<callback_retries::Repository>,

    /// Shipments the callbacks apply to.
    pub shipments: Arc<shipments::Repository>,
}

impl Storage {
    /// Creates a new storage instance with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);

        Self {
            callback_retries: Arc::new(callback_retries::Repository::new(pool.clone())),
            shipments: Arc::new(shipments::Repository::new(pool)),
        }
    }

    /// Performs a health check on the database connection.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) =
            sqlx::query_as("SELECT 1").fetch_one(&*self.callback_retries.pool()).await?;

        Ok(())
    }
}

/// Creates the tables and indexes used by the repositories.
///
/// Every statement is idempotent so this runs on each startup.
///
/// # Errors
///
/// Returns `CoreError::Database` if a statement fails.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS shipments (
            id TEXT PRIMARY KEY,
            provider TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'new',
            external_id TEXT NOT NULL DEFAULT '',
            tracking_number TEXT NOT NULL DEFAULT '',
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS callback_retries (
            id UUID PRIMARY KEY,
            shipment_id TEXT NOT NULL,
            provider_slug TEXT NOT NULL,
            payload JSONB NOT NULL,
            headers JSONB NOT NULL DEFAULT '{}'::jsonb,
            attempts INTEGER NOT NULL DEFAULT 0 CHECK (attempts >= 0),
            next_retry_at TIMESTAMPTZ,
            last_error TEXT,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'succeeded', 'exhausted')),
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE INDEX IF NOT EXISTS idx_callback_retries_due
        ON callback_retries (next_retry_at)
        WHERE status = 'pending'
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE INDEX IF NOT EXISTS idx_callback_retries_shipment
        ON callback_retries (shipment_id)
        ",
    )
    .execute(pool)
    .await?;

    Ok(())
}
