//! In-memory collaborators with scripted behavior.

use std::{
    collections::{HashMap, VecDeque},
    sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use chrono::Utc;
use parcelhook_core::{
    error::Result as CoreResult, CallbackFlow, CoreError, FlowError, Shipment, ShipmentId,
    ShipmentRepository, ShipmentStatus,
};
use tokio::sync::{Mutex, RwLock};

/// Shipment repository backed by a map.
#[derive(Default)]
pub struct InMemoryShipmentRepository {
    shipments: RwLock<HashMap<ShipmentId, Shipment>>,
    lookup_error: Mutex<Option<String>>,
    updates: AtomicUsize,
}

impl InMemoryShipmentRepository {
    /// Creates an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a shipment.
    pub async fn insert(&self, shipment: Shipment) {
        self.shipments.write().await.insert(shipment.id.clone(), shipment);
    }

    /// Deletes a shipment.
    pub async fn remove(&self, id: &ShipmentId) {
        self.shipments.write().await.remove(id);
    }

    /// Returns the stored shipment.
    pub async fn get(&self, id: &ShipmentId) -> Option<Shipment> {
        self.shipments.read().await.get(id).cloned()
    }

    /// Fails the next `find_by_id` with a database error.
    pub async fn inject_lookup_error(&self, error: impl Into<String>) {
        *self.lookup_error.lock().await = Some(error.into());
    }

    /// Number of `update_status` calls.
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ShipmentRepository for InMemoryShipmentRepository {
    async fn find_by_id(&self, id: &ShipmentId) -> CoreResult<Option<Shipment>> {
        if let Some(error) = self.lookup_error.lock().await.take() {
            return Err(CoreError::Database(error));
        }
        Ok(self.get(id).await)
    }

    async fn update_status(&self, id: &ShipmentId, status: ShipmentStatus) -> CoreResult<Shipment> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        let mut shipments = self.shipments.write().await;
        let shipment =
            shipments.get_mut(id).ok_or_else(|| CoreError::NotFound(format!("shipment {id}")))?;
        shipment.status = status;
        shipment.updated_at = Utc::now();
        Ok(shipment.clone())
    }
}

/// A callback as seen by [`ScriptedFlow`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedCallback {
    /// Shipment the callback was applied to.
    pub shipment_id: ShipmentId,
    /// Payload passed to the flow.
    pub payload: serde_json::Value,
    /// Headers passed to the flow.
    pub headers: HashMap<String, String>,
}

/// Callback flow that replays queued outcomes.
///
/// Each call pops the next scripted outcome. With the queue empty it falls
/// back to the persistent failure if one is set, otherwise it succeeds and
/// returns the shipment unchanged.
#[derive(Default)]
pub struct ScriptedFlow {
    outcomes: Mutex<VecDeque<Result<(), FlowError>>>,
    fallback: Mutex<Option<FlowError>>,
    received: Mutex<Vec<ReceivedCallback>>,
    calls: AtomicUsize,
}

impl ScriptedFlow {
    /// Creates a flow that always succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a failure for the next unscripted call.
    pub async fn fail_next(&self, error: FlowError) {
        self.outcomes.lock().await.push_back(Err(error));
    }

    /// Queues `times` consecutive failures.
    pub async fn fail_times(&self, times: usize, error: FlowError) {
        let mut outcomes = self.outcomes.lock().await;
        for _ in 0..times {
            outcomes.push_back(Err(error.clone()));
        }
    }

    /// Queues a success.
    pub async fn succeed_next(&self) {
        self.outcomes.lock().await.push_back(Ok(()));
    }

    /// Fails every call once the queue is drained.
    pub async fn always_fail(&self, error: FlowError) {
        *self.fallback.lock().await = Some(error);
    }

    /// Number of calls so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Callbacks received so far, in call order.
    pub async fn received(&self) -> Vec<ReceivedCallback> {
        self.received.lock().await.clone()
    }
}

#[async_trait]
impl CallbackFlow for ScriptedFlow {
    async fn handle_callback(
        &self,
        shipment: &Shipment,
        payload: &serde_json::Value,
        headers: &HashMap<String, String>,
    ) -> Result<Shipment, FlowError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.received.lock().await.push(ReceivedCallback {
            shipment_id: shipment.id.clone(),
            payload: payload.clone(),
            headers: headers.clone(),
        });

        let scripted = self.outcomes.lock().await.pop_front();
        let outcome = match scripted {
            Some(outcome) => outcome,
            None => match self.fallback.lock().await.clone() {
                Some(error) => Err(error),
                None => Ok(()),
            },
        };

        outcome.map(|()| shipment.clone())
    }
}
