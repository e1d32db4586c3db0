//! Collaborator contracts for applying callbacks to shipments.
//!
//! Ingress and the retry processor only see these two traits. The shipment
//! repository owns shipment persistence; the callback flow owns verification
//! and the status effect. [`RegistryFlow`] is the reference flow that routes
//! callbacks through the provider registry.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tracing::debug;

use crate::{
    error::{CoreError, FlowError, Result},
    models::{Shipment, ShipmentId, ShipmentStatus},
    registry::{Capability, ProviderRegistry},
};

/// Access to shipments owned by the surrounding backend.
#[async_trait]
pub trait ShipmentRepository: Send + Sync {
    /// Loads a shipment. `None` means the shipment does not exist.
    async fn find_by_id(&self, id: &ShipmentId) -> Result<Option<Shipment>>;

    /// Persists a new status and returns the updated shipment.
    ///
    /// Returns `CoreError::NotFound` if the shipment vanished.
    async fn update_status(&self, id: &ShipmentId, status: ShipmentStatus) -> Result<Shipment>;
}

/// Verify-then-apply path for one callback.
///
/// Implementations must tolerate being invoked more than once for the same
/// callback since retries are at-least-once.
#[async_trait]
pub trait CallbackFlow: Send + Sync {
    /// Verifies the callback and applies its effect to the shipment.
    async fn handle_callback(
        &self,
        shipment: &Shipment,
        payload: &serde_json::Value,
        headers: &HashMap<String, String>,
    ) -> std::result::Result<Shipment, FlowError>;
}

/// Reference flow backed by a provider registry and a shipment repository.
pub struct RegistryFlow {
    registry: Arc<ProviderRegistry>,
    repository: Arc<dyn ShipmentRepository>,
}

impl RegistryFlow {
    /// Creates a flow over the given registry and repository.
    pub fn new(registry: Arc<ProviderRegistry>, repository: Arc<dyn ShipmentRepository>) -> Self {
        Self { registry, repository }
    }
}

#[async_trait]
impl CallbackFlow for RegistryFlow {
    async fn handle_callback(
        &self,
        shipment: &Shipment,
        payload: &serde_json::Value,
        headers: &HashMap<String, String>,
    ) -> std::result::Result<Shipment, FlowError> {
        let provider = self.registry.require(&shipment.provider, Capability::PushCallback)?;

        provider.verify_callback(shipment, payload, headers).await?;
        let next = provider.handle_callback(shipment, payload, headers).await?;

        // Replays of an already-applied callback land here.
        if next == shipment.status {
            debug!(shipment_id = %shipment.id, status = %next, "status unchanged, nothing to apply");
            return Ok(shipment.clone());
        }

        if !shipment.status.can_transition_to(next) {
            return Err(FlowError::InvalidTransition { from: shipment.status, to: next });
        }

        self.repository.update_status(&shipment.id, next).await.map_err(|e| match e {
            CoreError::NotFound(_) => FlowError::ShipmentNotFound(shipment.id.clone()),
            other => FlowError::Repository(other),
        })
    }
}
