//! Callback endpoint tests.
//!
//! Drives the router with `oneshot` against in-memory collaborators and
//! checks status codes, response bodies and retry queue side effects.

use std::{sync::Arc, time::Duration};

use axum::{
    body::Body,
    http::{Request, Response, StatusCode},
    Router,
};
use parcelhook_api::{create_router, AppState, TokenProvider};
use parcelhook_core::{
    FlowError, ProviderRegistry, RegistryFlow, RetryStatus, ShipmentId, ShipmentStatus,
};
use parcelhook_retry::CallbackIngress;
use parcelhook_testing::{ShipmentBuilder, TestEnv, TEST_PROVIDER};
use serde_json::{json, Value};
use tower::ServiceExt;

fn router(env: &TestEnv) -> Router {
    create_router(AppState::new(Arc::new(env.ingress())), Duration::from_secs(30))
}

fn callback(path: &str, token: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .header("X-Callback-Token", token)
        .body(body.into())
        .unwrap()
}

fn event_body(event: &str) -> String {
    json!({ "event": event }).to_string()
}

async fn json_body(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read response body");
    serde_json::from_slice(&bytes).expect("response should be valid JSON")
}

#[tokio::test]
async fn accepted_callback_returns_created() {
    let env = TestEnv::new();
    let shipment = env.add_shipment(ShipmentBuilder::new().build()).await;
    let path = format!("/callbacks/{TEST_PROVIDER}/{}", shipment.id);

    let response =
        router(&env).oneshot(callback(&path, "secret", event_body("in_transit"))).await.unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(response.headers().contains_key("x-request-id"));
    let body = json_body(response).await;
    assert_eq!(body, json!({
        "provider": TEST_PROVIDER,
        "status": "accepted",
        "shipment_status": "label_ready",
    }));
}

#[tokio::test]
async fn headers_reach_flow_with_lowercase_names() {
    let env = TestEnv::new();
    let shipment = env.add_shipment(ShipmentBuilder::new().build()).await;
    let path = format!("/callbacks/{TEST_PROVIDER}/{}", shipment.id);

    router(&env).oneshot(callback(&path, "secret", event_body("delivered"))).await.unwrap();

    let received = env.flow.received().await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].headers.get("x-callback-token").map(String::as_str), Some("secret"));
    assert_eq!(received[0].payload, json!({ "event": "delivered" }));
}

#[tokio::test]
async fn non_json_body_is_bad_request() {
    let env = TestEnv::new();
    let shipment = env.add_shipment(ShipmentBuilder::new().build()).await;
    let path = format!("/callbacks/{TEST_PROVIDER}/{}", shipment.id);

    let response = router(&env).oneshot(callback(&path, "secret", "not json")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "invalid_payload");
    assert_eq!(env.flow.call_count(), 0);
}

#[tokio::test]
async fn unknown_shipment_is_not_found() {
    let env = TestEnv::new();

    let response = router(&env)
        .oneshot(callback("/callbacks/dummy/shp_missing", "secret", event_body("delivered")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "not_found");
    assert!(body["error"]["message"].as_str().unwrap().contains("shp_missing"));
}

#[tokio::test]
async fn unknown_shipment_with_non_json_body_is_not_found() {
    let env = TestEnv::new();

    let response = router(&env)
        .oneshot(callback("/callbacks/dummy/shp_missing", "secret", "not json"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"]["code"], "not_found");
    assert_eq!(env.flow.call_count(), 0);
}

#[tokio::test]
async fn lookup_outage_with_non_json_body_is_bad_request() {
    let env = TestEnv::new();
    env.shipments.inject_lookup_error("connection reset").await;

    let response = router(&env)
        .oneshot(callback("/callbacks/dummy/shp_1", "secret", "not json"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"]["code"], "invalid_payload");
    assert!(env.retry_store.is_empty().await);
}

#[tokio::test]
async fn rejected_callback_is_bad_request_without_enqueue() {
    let env = TestEnv::new();
    let shipment = env.add_shipment(ShipmentBuilder::new().build()).await;
    env.flow.fail_next(FlowError::invalid_callback("invalid callback token")).await;
    let path = format!("/callbacks/{TEST_PROVIDER}/{}", shipment.id);

    let response = router(&env).oneshot(callback(&path, "wrong", event_body("delivered"))).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"]["code"], "invalid_callback");
    assert!(env.retry_store.is_empty().await);
}

#[tokio::test]
async fn impossible_transition_is_conflict() {
    let env = TestEnv::new();
    let shipment = env.add_shipment(ShipmentBuilder::new().build()).await;
    env.flow
        .fail_next(FlowError::InvalidTransition {
            from: ShipmentStatus::Delivered,
            to: ShipmentStatus::InTransit,
        })
        .await;
    let path = format!("/callbacks/{TEST_PROVIDER}/{}", shipment.id);

    let response = router(&env).oneshot(callback(&path, "secret", event_body("in_transit"))).await.unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(response).await["error"]["code"], "invalid_transition");
}

#[tokio::test]
async fn transient_failure_is_bad_gateway_and_queued() {
    let env = TestEnv::new();
    let shipment = env.add_shipment(ShipmentBuilder::new().build()).await;
    env.flow.fail_next(FlowError::communication("provider API timed out")).await;
    let path = format!("/callbacks/{TEST_PROVIDER}/{}", shipment.id);

    let response = router(&env).oneshot(callback(&path, "secret", event_body("delivered"))).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(json_body(response).await["error"]["code"], "communication_error");

    let records = env.retry_store.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, RetryStatus::Pending);
    assert_eq!(records[0].attempts, 0);
    assert_eq!(records[0].payload, json!({ "event": "delivered" }));
}

#[tokio::test]
async fn queue_failure_is_internal_error() {
    let env = TestEnv::new();
    let shipment = env.add_shipment(ShipmentBuilder::new().build()).await;
    env.flow.fail_next(FlowError::communication("timeout")).await;
    env.retry_store.inject_enqueue_error("disk full").await;
    let path = format!("/callbacks/{TEST_PROVIDER}/{}", shipment.id);

    let response = router(&env).oneshot(callback(&path, "secret", event_body("delivered"))).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(response).await["error"]["code"], "storage_error");
}

#[tokio::test]
async fn wrong_method_is_rejected() {
    let env = TestEnv::new();

    let request = Request::builder()
        .method("GET")
        .uri("/callbacks/dummy/shp_1")
        .body(Body::empty())
        .unwrap();
    let response = router(&env).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

/// Full stack with the token provider and the registry flow.
mod token_provider {
    use parcelhook_testing::InMemoryShipmentRepository;

    use super::*;

    fn app(shipments: Arc<InMemoryShipmentRepository>) -> Router {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(TokenProvider::new("dpd", "s3cret", "x-callback-token"))).unwrap();
        let flow = RegistryFlow::new(Arc::new(registry), shipments.clone());
        let ingress = CallbackIngress::new(shipments, Arc::new(flow), Default::default());

        create_router(AppState::new(Arc::new(ingress)), Duration::from_secs(30))
    }

    #[tokio::test]
    async fn valid_token_updates_shipment() {
        let shipments = Arc::new(InMemoryShipmentRepository::new());
        let shipment = ShipmentBuilder::new().provider("dpd").build();
        shipments.insert(shipment.clone()).await;
        let path = format!("/callbacks/dpd/{}", shipment.id);

        let response =
            app(shipments.clone()).oneshot(callback(&path, "s3cret", event_body("picked_up"))).await.unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(json_body(response).await["shipment_status"], "in_transit");
        let stored = shipments.get(&shipment.id).await.unwrap();
        assert_eq!(stored.status, ShipmentStatus::InTransit);
    }

    #[tokio::test]
    async fn bad_token_leaves_shipment_untouched() {
        let shipments = Arc::new(InMemoryShipmentRepository::new());
        let shipment = ShipmentBuilder::new().provider("dpd").build();
        shipments.insert(shipment.clone()).await;
        let path = format!("/callbacks/dpd/{}", shipment.id);

        let response =
            app(shipments.clone()).oneshot(callback(&path, "guess", event_body("delivered"))).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(shipments.get(&shipment.id).await.unwrap().status, ShipmentStatus::LabelReady);
        assert_eq!(shipments.update_count(), 0);
    }

    #[tokio::test]
    async fn callback_for_other_provider_is_rejected() {
        let shipments = Arc::new(InMemoryShipmentRepository::new());
        let shipment = ShipmentBuilder::new().id(ShipmentId::new("shp_x")).provider("inpost").build();
        shipments.insert(shipment).await;

        let response = app(shipments)
            .oneshot(callback("/callbacks/dpd/shp_x", "s3cret", event_body("delivered")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"]["code"], "provider_mismatch");
    }
}
