//! Token-authenticated callback provider.
//!
//! Providers configured under `[providers.<slug>]` send a shared secret in a
//! header and describe the event in `payload.event`. The event name maps
//! directly onto a shipment status.

use std::{collections::HashMap, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use parcelhook_core::{
    Capabilities, Capability, FlowError, Provider, ProviderRegistry, Shipment, ShipmentStatus,
};
use tracing::info;

use crate::config::{Config, ProviderConfig};

/// Provider that authenticates callbacks with a shared header token.
#[derive(Debug, Clone)]
pub struct TokenProvider {
    slug: String,
    token: String,
    token_header: String,
}

impl TokenProvider {
    /// Creates a provider for `slug` expecting `token` in `token_header`.
    pub fn new(
        slug: impl Into<String>,
        token: impl Into<String>,
        token_header: impl Into<String>,
    ) -> Self {
        Self {
            slug: slug.into(),
            token: token.into(),
            token_header: token_header.into().to_ascii_lowercase(),
        }
    }

    fn from_config(slug: &str, config: &ProviderConfig) -> Self {
        Self::new(slug, config.token.clone(), config.token_header.clone())
    }
}

#[async_trait]
impl Provider for TokenProvider {
    fn slug(&self) -> &str {
        &self.slug
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::empty().with(Capability::PushCallback)
    }

    async fn verify_callback(
        &self,
        _shipment: &Shipment,
        _payload: &serde_json::Value,
        headers: &HashMap<String, String>,
    ) -> Result<(), FlowError> {
        let presented = headers.get(&self.token_header).map_or("", String::as_str);
        if presented.is_empty() {
            return Err(FlowError::invalid_callback("missing callback token"));
        }
        if !timing_safe_eq(presented, &self.token) {
            return Err(FlowError::invalid_callback("invalid callback token"));
        }
        Ok(())
    }

    async fn handle_callback(
        &self,
        _shipment: &Shipment,
        payload: &serde_json::Value,
        _headers: &HashMap<String, String>,
    ) -> Result<ShipmentStatus, FlowError> {
        let event = payload
            .get("event")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| FlowError::invalid_callback("payload has no event"))?;

        status_for_event(event)
            .ok_or_else(|| FlowError::invalid_callback(format!("unknown event {event:?}")))
    }
}

/// Maps a callback event name onto a shipment status.
fn status_for_event(event: &str) -> Option<ShipmentStatus> {
    let status = match event {
        "created" => ShipmentStatus::Created,
        "label_ready" => ShipmentStatus::LabelReady,
        "picked_up" | "in_transit" => ShipmentStatus::InTransit,
        "out_for_delivery" => ShipmentStatus::OutForDelivery,
        "delivered" => ShipmentStatus::Delivered,
        "returned" => ShipmentStatus::Returned,
        "cancelled" => ShipmentStatus::Cancelled,
        "failed" => ShipmentStatus::Failed,
        _ => return None,
    };
    Some(status)
}

/// Timing-safe string comparison.
///
/// Compares every byte regardless of where the first mismatch occurs.
fn timing_safe_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (a_byte, b_byte) in a.as_bytes().iter().zip(b.as_bytes()) {
        result |= a_byte ^ b_byte;
    }

    result == 0
}

/// Builds the provider registry from `config.providers`.
///
/// # Errors
///
/// Returns an error if two entries resolve to the same slug.
pub fn build_registry(config: &Config) -> Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();

    let mut slugs: Vec<&String> = config.providers.keys().collect();
    slugs.sort_unstable();
    for slug in slugs {
        let provider = TokenProvider::from_config(slug, &config.providers[slug]);
        registry
            .register(Arc::new(provider))
            .with_context(|| format!("failed to register provider {slug}"))?;
    }

    info!(providers = ?registry.slugs(), "Provider registry built");
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn shipment() -> Shipment {
        let now = chrono::Utc::now();
        Shipment {
            id: parcelhook_core::ShipmentId::new("shp_1"),
            provider: "dpd".to_string(),
            status: ShipmentStatus::LabelReady,
            external_id: String::new(),
            tracking_number: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn headers(name: &str, value: &str) -> HashMap<String, String> {
        HashMap::from([(name.to_string(), value.to_string())])
    }

    #[tokio::test]
    async fn accepts_matching_token() {
        let provider = TokenProvider::new("dpd", "s3cret", "X-Callback-Token");

        let result = provider
            .verify_callback(&shipment(), &json!({}), &headers("x-callback-token", "s3cret"))
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn rejects_missing_and_wrong_tokens() {
        let provider = TokenProvider::new("dpd", "s3cret", "x-callback-token");

        let missing = provider.verify_callback(&shipment(), &json!({}), &HashMap::new()).await;
        let wrong = provider
            .verify_callback(&shipment(), &json!({}), &headers("x-callback-token", "s3crex"))
            .await;

        assert!(matches!(missing, Err(FlowError::InvalidCallback(ref m)) if m.contains("missing")));
        assert!(matches!(wrong, Err(FlowError::InvalidCallback(ref m)) if m.contains("invalid")));
    }

    #[tokio::test]
    async fn maps_events_to_statuses() {
        let provider = TokenProvider::new("dpd", "s3cret", "x-callback-token");
        let cases = [
            ("picked_up", ShipmentStatus::InTransit),
            ("in_transit", ShipmentStatus::InTransit),
            ("out_for_delivery", ShipmentStatus::OutForDelivery),
            ("delivered", ShipmentStatus::Delivered),
            ("cancelled", ShipmentStatus::Cancelled),
        ];

        for (event, expected) in cases {
            let status = provider
                .handle_callback(&shipment(), &json!({ "event": event }), &HashMap::new())
                .await
                .unwrap();
            assert_eq!(status, expected, "event {event}");
        }
    }

    #[tokio::test]
    async fn unknown_or_missing_event_is_invalid() {
        let provider = TokenProvider::new("dpd", "s3cret", "x-callback-token");

        let unknown =
            provider.handle_callback(&shipment(), &json!({"event": "teleported"}), &HashMap::new()).await;
        let missing = provider.handle_callback(&shipment(), &json!({}), &HashMap::new()).await;

        assert!(matches!(unknown, Err(FlowError::InvalidCallback(_))));
        assert!(matches!(missing, Err(FlowError::InvalidCallback(_))));
    }

    #[test]
    fn timing_safe_eq_compares_content_and_length() {
        assert!(timing_safe_eq("hello", "hello"));
        assert!(!timing_safe_eq("hello", "world"));
        assert!(!timing_safe_eq("hello", "hello_world"));
    }

    #[test]
    fn registry_contains_configured_providers() {
        let mut config = Config::default();
        for slug in ["inpost", "dpd"] {
            config.providers.insert(slug.to_string(), ProviderConfig {
                token: "t".to_string(),
                token_header: "x-callback-token".to_string(),
            });
        }

        let registry = build_registry(&config).unwrap();

        assert_eq!(registry.slugs(), vec!["dpd", "inpost"]);
        let provider = registry.require("dpd", Capability::PushCallback).unwrap();
        assert!(provider.capabilities().supports(Capability::PushCallback));
        assert!(registry.require("dpd", Capability::Cancel).is_err());
    }
}
