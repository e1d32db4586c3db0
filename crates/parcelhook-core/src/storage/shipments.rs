//! Repository for shipment rows used by the reference callback flow.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;

use crate::{
    error::{CoreError, Result},
    flow::ShipmentRepository,
    models::{Shipment, ShipmentId, ShipmentStatus},
};

/// Repository for shipment database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Inserts a shipment.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::ConstraintViolation` if the ID already exists.
    pub async fn create(&self, shipment: &Shipment) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO shipments (
                id, provider, status, external_id, tracking_number, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(&shipment.id)
        .bind(&shipment.provider)
        .bind(shipment.status.as_str())
        .bind(&shipment.external_id)
        .bind(&shipment.tracking_number)
        .bind(shipment.created_at)
        .bind(shipment.updated_at)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Finds a shipment by ID.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, id: &ShipmentId) -> Result<Option<Shipment>> {
        let shipment = sqlx::query_as::<_, Shipment>(
            r"
            SELECT id, provider, status, external_id, tracking_number, created_at, updated_at
            FROM shipments
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(shipment)
    }

    /// Sets the shipment status and returns the updated row.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if no shipment has this ID.
    pub async fn update_status(&self, id: &ShipmentId, status: ShipmentStatus) -> Result<Shipment> {
        sqlx::query_as::<_, Shipment>(
            r"
            UPDATE shipments
            SET status = $2, updated_at = $3
            WHERE id = $1
            RETURNING id, provider, status, external_id, tracking_number, created_at, updated_at
            ",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(Utc::now())
        .fetch_optional(&*self.pool)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("shipment {id}")))
    }
}

#[async_trait]
impl ShipmentRepository for Repository {
    async fn find_by_id(&self, id: &ShipmentId) -> Result<Option<Shipment>> {
        Repository::find_by_id(self, id).await
    }

    async fn update_status(&self, id: &ShipmentId, status: ShipmentStatus) -> Result<Shipment> {
        Repository::update_status(self, id, status).await
    }
}
