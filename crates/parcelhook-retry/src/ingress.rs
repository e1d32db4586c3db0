//! Entry point for inbound provider callbacks.
//!
//! Resolves the shipment, checks the provider route, and hands the payload to
//! the callback flow unmodified. Transient failures are enqueued before the
//! caller is told about them; permanent failures never touch the queue.

use std::{collections::HashMap, sync::Arc};

use parcelhook_core::{
    CallbackError, CallbackFlow, CoreError, FailedCallback, FlowError, RetryId, ShipmentId,
    ShipmentRepository, ShipmentStatus,
};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    backoff::RetryPolicy,
    classify::{classify, FailureClass},
    store::RetryStore,
};

/// One inbound callback as received from a provider.
#[derive(Debug, Clone)]
pub struct CallbackRequest {
    /// Provider the callback was addressed to.
    pub provider_slug: String,
    /// Shipment named in the callback URL.
    pub shipment_id: ShipmentId,
    /// Parsed callback body.
    pub payload: serde_json::Value,
    /// Request headers, lowercase names.
    pub headers: HashMap<String, String>,
}

/// Successful outcome of a callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallbackAccepted {
    /// Provider that sent the callback.
    pub provider: String,
    /// Shipment the callback applied to.
    pub shipment_id: ShipmentId,
    /// Shipment status after the callback.
    pub shipment_status: ShipmentStatus,
}

/// Receives callbacks and routes failures to the retry queue.
pub struct CallbackIngress {
    repository: Arc<dyn ShipmentRepository>,
    flow: Arc<dyn CallbackFlow>,
    retry_store: Option<Arc<dyn RetryStore>>,
    policy: RetryPolicy,
}

impl CallbackIngress {
    /// Creates an ingress without a retry store. Transient failures are
    /// reported but not enqueued until a store is attached.
    pub fn new(
        repository: Arc<dyn ShipmentRepository>,
        flow: Arc<dyn CallbackFlow>,
        policy: RetryPolicy,
    ) -> Self {
        Self { repository, flow, retry_store: None, policy }
    }

    /// Attaches the store used for transient failures.
    #[must_use]
    pub fn with_retry_store(mut self, store: Arc<dyn RetryStore>) -> Self {
        self.retry_store = Some(store);
        self
    }

    /// Retry policy in effect.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Whether `shipment_id` names an existing shipment.
    ///
    /// Lets callers report an unknown shipment before rejecting a malformed
    /// body.
    ///
    /// # Errors
    ///
    /// Returns `CoreError` if the lookup fails.
    pub async fn shipment_exists(&self, shipment_id: &ShipmentId) -> Result<bool, CoreError> {
        Ok(self.repository.find_by_id(shipment_id).await?.is_some())
    }

    /// Handles one callback.
    ///
    /// # Errors
    ///
    /// - `ShipmentNotFound` if the shipment does not exist.
    /// - `ProviderMismatch`, `InvalidCallback`, `InvalidTransition` for
    ///   permanent rejections.
    /// - `Communication` for transient failures, carrying the retry record ID
    ///   when one was enqueued.
    /// - `Storage` if enqueuing failed.
    #[instrument(
        name = "callback_ingress",
        skip(self, request),
        fields(provider = %request.provider_slug, shipment_id = %request.shipment_id)
    )]
    pub async fn handle(
        &self,
        request: CallbackRequest,
    ) -> Result<CallbackAccepted, CallbackError> {
        let lookup = self.repository.find_by_id(&request.shipment_id).await;
        let shipment = match lookup {
            Ok(Some(shipment)) => shipment,
            Ok(None) => return Err(CallbackError::ShipmentNotFound(request.shipment_id)),
            Err(error) => {
                let reason = format!("shipment lookup failed: {error}");
                return Err(self.transient(request, reason).await);
            },
        };

        if shipment.provider != request.provider_slug {
            return Err(CallbackError::ProviderMismatch {
                expected: shipment.provider,
                actual: request.provider_slug,
            });
        }

        let result = self.flow.handle_callback(&shipment, &request.payload, &request.headers).await;
        match result {
            Ok(updated) => {
                info!(status = %updated.status, "callback applied");
                Ok(CallbackAccepted {
                    provider: request.provider_slug,
                    shipment_id: updated.id,
                    shipment_status: updated.status,
                })
            },
            Err(error) => match classify(&error) {
                FailureClass::Transient => Err(self.transient(request, error.to_string()).await),
                FailureClass::NotFound => Err(CallbackError::ShipmentNotFound(request.shipment_id)),
                FailureClass::Permanent => {
                    warn!(error = %error, "callback rejected");
                    Err(permanent(error))
                },
            },
        }
    }

    async fn transient(&self, request: CallbackRequest, reason: String) -> CallbackError {
        match self.enqueue(request, &reason).await {
            Ok(retry_id) => CallbackError::Communication { reason, retry_id },
            Err(error) => error,
        }
    }

    async fn enqueue(
        &self,
        request: CallbackRequest,
        reason: &str,
    ) -> Result<Option<RetryId>, CallbackError> {
        let store = match &self.retry_store {
            Some(store) if self.policy.enabled => store,
            _ => {
                debug!(reason, "retries disabled, callback not enqueued");
                return Ok(None);
            },
        };

        let callback = FailedCallback {
            shipment_id: request.shipment_id,
            provider_slug: request.provider_slug,
            payload: request.payload,
            headers: request.headers,
            reason: Some(reason.to_string()),
        };

        let retry_id = store.store_failed_callback(callback).await.map_err(|e| {
            error!(error = %e, "failed to enqueue callback for retry");
            CallbackError::Storage(e)
        })?;
        warn!(retry_id = %retry_id, reason, "callback failed, enqueued for retry");
        Ok(Some(retry_id))
    }
}

fn permanent(error: FlowError) -> CallbackError {
    match error {
        FlowError::InvalidTransition { from, to } => CallbackError::InvalidTransition { from, to },
        FlowError::InvalidCallback(message) => CallbackError::InvalidCallback(message),
        other => CallbackError::InvalidCallback(other.to_string()),
    }
}
