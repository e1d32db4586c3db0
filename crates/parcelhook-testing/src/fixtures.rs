//! Builders for shipments and callback payloads.

use std::collections::HashMap;

use chrono::Utc;
use parcelhook_core::{FailedCallback, Shipment, ShipmentId, ShipmentStatus};
use serde_json::{json, Value};
use uuid::Uuid;

/// Provider slug used by fixtures unless overridden.
pub const TEST_PROVIDER: &str = "dummy";

/// Builder for test shipments.
pub struct ShipmentBuilder {
    id: ShipmentId,
    provider: String,
    status: ShipmentStatus,
    tracking_number: String,
}

impl ShipmentBuilder {
    /// Creates a builder with a random ID, the test provider and status
    /// `label_ready`.
    pub fn new() -> Self {
        Self {
            id: ShipmentId::new(format!("shp_{}", Uuid::new_v4().simple())),
            provider: TEST_PROVIDER.to_string(),
            status: ShipmentStatus::LabelReady,
            tracking_number: String::new(),
        }
    }

    /// Sets the shipment ID.
    #[must_use]
    pub fn id(mut self, id: impl Into<ShipmentId>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets the provider slug.
    #[must_use]
    pub fn provider(mut self, slug: impl Into<String>) -> Self {
        self.provider = slug.into();
        self
    }

    /// Sets the current status.
    #[must_use]
    pub fn status(mut self, status: ShipmentStatus) -> Self {
        self.status = status;
        self
    }

    /// Sets the tracking number.
    #[must_use]
    pub fn tracking_number(mut self, number: impl Into<String>) -> Self {
        self.tracking_number = number.into();
        self
    }

    /// Builds the shipment.
    pub fn build(self) -> Shipment {
        let now = Utc::now();
        Shipment {
            external_id: format!("ext-{}", self.id),
            id: self.id,
            provider: self.provider,
            status: self.status,
            tracking_number: self.tracking_number,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Default for ShipmentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Callback body reporting `event`.
pub fn callback_payload(event: &str) -> Value {
    json!({
        "event": event,
        "occurred_at": "2025-01-01T12:00:00Z",
    })
}

/// Headers carrying a callback token.
pub fn token_headers(token: &str) -> HashMap<String, String> {
    HashMap::from([
        ("content-type".to_string(), "application/json".to_string()),
        ("x-callback-token".to_string(), token.to_string()),
    ])
}

/// A failed callback for `shipment` ready to enqueue.
pub fn failed_callback(shipment: &Shipment, reason: &str) -> FailedCallback {
    FailedCallback {
        shipment_id: shipment.id.clone(),
        provider_slug: shipment.provider.clone(),
        payload: callback_payload("in_transit"),
        headers: token_headers("secret"),
        reason: Some(reason.to_string()),
    }
}
