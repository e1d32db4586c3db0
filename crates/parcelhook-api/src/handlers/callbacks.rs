//! Provider callback endpoint.
//!
//! `POST /callbacks/{provider_slug}/{shipment_id}` parses the body as JSON,
//! passes it with the request headers to the callback ingress and maps the
//! outcome onto a status code. A body that is not JSON is answered with 404
//! when the shipment is unknown and 400 otherwise. Transient failures have already been queued
//! for replay by the time the 502 is returned.

use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use parcelhook_core::{CallbackError, ErrorKind, ShipmentId, ShipmentStatus};
use parcelhook_retry::CallbackRequest;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use super::error_response;
use crate::AppState;

/// Response for an accepted callback.
#[derive(Debug, Serialize)]
pub struct CallbackResponse {
    /// Provider that sent the callback.
    pub provider: String,
    /// Always `"accepted"`.
    pub status: &'static str,
    /// Shipment status after the callback was applied.
    pub shipment_status: ShipmentStatus,
}

/// Receives one provider callback.
///
/// Returns:
/// - 201 when the callback was applied (or was a repeat of the current state)
/// - 404 for an unknown shipment, even when the body is not JSON
/// - 400 for a body that is not JSON or a rejected callback
/// - 409 for a status change the shipment cannot make
/// - 502 for a transient failure
/// - 500 when the failure could not be queued
#[instrument(
    name = "receive_callback",
    skip(state, headers, body),
    fields(body_size = body.len())
)]
pub async fn receive_callback(
    State(state): State<AppState>,
    Path((provider_slug, shipment_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let shipment_id = ShipmentId::new(shipment_id);
    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            debug!(error = %e, "Callback body is not JSON");
            // Unknown shipments win over malformed bodies.
            match state.ingress.shipment_exists(&shipment_id).await {
                Ok(false) => {
                    return callback_error_response(&CallbackError::ShipmentNotFound(shipment_id));
                },
                Ok(true) => {},
                Err(lookup) => warn!(error = %lookup, "Shipment lookup failed for malformed callback"),
            }
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid_payload",
                format!("callback body is not valid JSON: {e}"),
            );
        },
    };

    let request = CallbackRequest {
        provider_slug,
        shipment_id,
        payload,
        headers: extract_headers(&headers),
    };

    match state.ingress.handle(request).await {
        Ok(accepted) => {
            info!(
                provider = %accepted.provider,
                shipment_id = %accepted.shipment_id,
                shipment_status = %accepted.shipment_status,
                "Callback accepted"
            );
            let response = CallbackResponse {
                provider: accepted.provider,
                status: "accepted",
                shipment_status: accepted.shipment_status,
            };
            (StatusCode::CREATED, Json(response)).into_response()
        },
        Err(e) => callback_error_response(&e),
    }
}

/// Maps an ingress error onto an HTTP response.
fn callback_error_response(err: &CallbackError) -> Response {
    let status = status_for(err);
    match err.kind() {
        ErrorKind::Storage => error!(error = %err, "Callback could not be queued"),
        ErrorKind::Communication => warn!(error = %err, "Callback failed transiently"),
        ErrorKind::NotFound | ErrorKind::Validation => {
            debug!(error = %err, code = err.code(), "Callback rejected");
        },
    }
    error_response(status, err.code(), err.to_string())
}

fn status_for(err: &CallbackError) -> StatusCode {
    match err {
        CallbackError::InvalidTransition { .. } => StatusCode::CONFLICT,
        _ => match err.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Communication => StatusCode::BAD_GATEWAY,
            ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

/// Collects headers with lowercase names. Values that are not visible ASCII
/// are dropped and logged by name.
fn extract_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for (name, value) in headers {
        match value.to_str() {
            Ok(value_str) => {
                map.insert(name.as_str().to_string(), value_str.to_string());
            },
            Err(_) => debug!(header = %name, "Dropping header with non-ASCII value"),
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderName, HeaderValue};
    use parcelhook_core::{CoreError, RetryId};

    use super::*;

    #[test]
    fn status_codes_follow_error_kind() {
        let cases = [
            (CallbackError::ShipmentNotFound(ShipmentId::new("s")), StatusCode::NOT_FOUND),
            (CallbackError::InvalidCallback("bad token".into()), StatusCode::BAD_REQUEST),
            (
                CallbackError::ProviderMismatch { expected: "a".into(), actual: "b".into() },
                StatusCode::BAD_REQUEST,
            ),
            (
                CallbackError::InvalidTransition {
                    from: ShipmentStatus::Delivered,
                    to: ShipmentStatus::InTransit,
                },
                StatusCode::CONFLICT,
            ),
            (
                CallbackError::Communication {
                    reason: "timeout".into(),
                    retry_id: Some(RetryId::new()),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                CallbackError::Storage(CoreError::Database("down".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(status_for(&err), expected, "{err}");
        }
    }

    #[test]
    fn header_names_are_lowercase() {
        let mut headers = HeaderMap::new();
        for (name, value) in [("X-Callback-Token", "secret"), ("Content-Type", "application/json")] {
            headers.insert(HeaderName::from_bytes(name.as_bytes()).unwrap(), value.parse().unwrap());
        }

        let map = extract_headers(&headers);

        assert_eq!(map.get("x-callback-token").map(String::as_str), Some("secret"));
        assert_eq!(map.get("content-type").map(String::as_str), Some("application/json"));
    }

    #[test]
    fn non_ascii_header_values_are_dropped() {
        let mut headers = HeaderMap::new();
        headers.insert("x-callback-token", "secret".parse().unwrap());
        headers.insert("x-label", HeaderValue::from_bytes("Zürich".as_bytes()).unwrap());

        let map = extract_headers(&headers);

        assert_eq!(map.len(), 1);
        assert_eq!(map.get("x-callback-token").map(String::as_str), Some("secret"));
        assert!(!map.contains_key("x-label"));
    }
}
