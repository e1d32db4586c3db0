//! Callback ingress classification and enqueue behavior.

use parcelhook_core::{CallbackError, ErrorKind, FlowError, RetryStatus, ShipmentId, ShipmentStatus};
use parcelhook_retry::{CallbackIngress, CallbackRequest, RetryPolicy};
use parcelhook_testing::{callback_payload, token_headers, ShipmentBuilder, TestEnv, TEST_PROVIDER};

fn request(shipment_id: &ShipmentId) -> CallbackRequest {
    CallbackRequest {
        provider_slug: TEST_PROVIDER.to_string(),
        shipment_id: shipment_id.clone(),
        payload: callback_payload("in_transit"),
        headers: token_headers("secret"),
    }
}

#[tokio::test]
async fn accepted_callback_returns_shipment_status() {
    let env = TestEnv::new();
    let shipment =
        env.add_shipment(ShipmentBuilder::new().status(ShipmentStatus::InTransit).build()).await;

    let accepted = env.ingress().handle(request(&shipment.id)).await.unwrap();

    assert_eq!(accepted.provider, TEST_PROVIDER);
    assert_eq!(accepted.shipment_id, shipment.id);
    assert_eq!(accepted.shipment_status, ShipmentStatus::InTransit);
    assert!(env.retry_store.is_empty().await);
}

#[tokio::test]
async fn payload_and_headers_reach_flow_unmodified() {
    let env = TestEnv::new();
    let shipment = env.add_shipment(ShipmentBuilder::new().build()).await;
    let req = request(&shipment.id);

    env.ingress().handle(req.clone()).await.unwrap();

    let received = env.flow.received().await;
    assert_eq!(received[0].payload, req.payload);
    assert_eq!(received[0].headers, req.headers);
}

#[tokio::test]
async fn invalid_token_is_permanent_and_not_enqueued() {
    let env = TestEnv::new();
    let shipment = env.add_shipment(ShipmentBuilder::new().build()).await;
    env.flow.fail_next(FlowError::invalid_callback("invalid callback token")).await;

    let err = env.ingress().handle(request(&shipment.id)).await.unwrap_err();

    assert!(matches!(err, CallbackError::InvalidCallback(ref msg) if msg == "invalid callback token"));
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(env.retry_store.is_empty().await);
}

#[tokio::test]
async fn invalid_transition_is_permanent() {
    let env = TestEnv::new();
    let shipment = env.add_shipment(ShipmentBuilder::new().build()).await;
    env.flow
        .fail_next(FlowError::InvalidTransition {
            from: ShipmentStatus::Delivered,
            to: ShipmentStatus::InTransit,
        })
        .await;

    let err = env.ingress().handle(request(&shipment.id)).await.unwrap_err();

    assert_eq!(err.code(), "invalid_transition");
    assert!(env.retry_store.is_empty().await);
}

#[tokio::test]
async fn communication_failure_enqueues_exactly_one_record() {
    let env = TestEnv::new();
    let shipment = env.add_shipment(ShipmentBuilder::new().build()).await;
    env.flow.fail_next(FlowError::communication("provider API timed out")).await;

    let err = env.ingress().handle(request(&shipment.id)).await.unwrap_err();

    let CallbackError::Communication { reason, retry_id: Some(retry_id) } = err else {
        panic!("expected an enqueued communication failure");
    };
    assert!(reason.contains("provider API timed out"));

    let records = env.retry_store.records().await;
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.id, retry_id);
    assert_eq!(record.attempts, 0);
    assert_eq!(record.status, RetryStatus::Pending);
    assert_eq!(record.shipment_id, shipment.id);
    assert_eq!(record.provider_slug, TEST_PROVIDER);
    assert_eq!(record.headers, token_headers("secret"));
    assert_eq!(record.last_error.as_deref(), Some("communication error: provider API timed out"));
}

#[tokio::test]
async fn unknown_shipment_is_not_found() {
    let env = TestEnv::new();

    let err = env.ingress().handle(request(&ShipmentId::new("missing"))).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(env.flow.call_count(), 0);
    assert!(env.retry_store.is_empty().await);
}

#[tokio::test]
async fn shipment_exists_reflects_repository() {
    let env = TestEnv::new();
    let shipment = env.add_shipment(ShipmentBuilder::new().build()).await;
    let ingress = env.ingress();

    assert!(ingress.shipment_exists(&shipment.id).await.unwrap());
    assert!(!ingress.shipment_exists(&ShipmentId::new("missing")).await.unwrap());

    env.shipments.inject_lookup_error("connection reset").await;
    assert!(ingress.shipment_exists(&shipment.id).await.is_err());
}

#[tokio::test]
async fn provider_mismatch_is_rejected_before_flow() {
    let env = TestEnv::new();
    let shipment = env.add_shipment(ShipmentBuilder::new().provider("inpost").build()).await;

    let err = env.ingress().handle(request(&shipment.id)).await.unwrap_err();

    assert!(matches!(
        err,
        CallbackError::ProviderMismatch { ref expected, ref actual }
            if expected == "inpost" && actual == TEST_PROVIDER
    ));
    assert_eq!(env.flow.call_count(), 0);
    assert!(env.retry_store.is_empty().await);
}

#[tokio::test]
async fn repository_outage_is_enqueued() {
    let env = TestEnv::new();
    let shipment = env.add_shipment(ShipmentBuilder::new().build()).await;
    env.shipments.inject_lookup_error("too many connections").await;

    let err = env.ingress().handle(request(&shipment.id)).await.unwrap_err();

    assert!(matches!(err, CallbackError::Communication { retry_id: Some(_), .. }));
    assert_eq!(env.retry_store.len().await, 1);
}

#[tokio::test]
async fn disabled_retries_report_failure_without_enqueue() {
    let env = TestEnv::with_policy(RetryPolicy { enabled: false, ..RetryPolicy::default() });
    let shipment = env.add_shipment(ShipmentBuilder::new().build()).await;
    env.flow.fail_next(FlowError::communication("timeout")).await;

    let err = env.ingress().handle(request(&shipment.id)).await.unwrap_err();

    assert!(matches!(err, CallbackError::Communication { retry_id: None, .. }));
    assert!(env.retry_store.is_empty().await);
}

#[tokio::test]
async fn ingress_without_store_reports_failure() {
    let env = TestEnv::new();
    let shipment = env.add_shipment(ShipmentBuilder::new().build()).await;
    env.flow.fail_next(FlowError::communication("timeout")).await;
    let ingress = CallbackIngress::new(env.shipments.clone(), env.flow.clone(), env.policy);

    let err = ingress.handle(request(&shipment.id)).await.unwrap_err();

    assert!(matches!(err, CallbackError::Communication { retry_id: None, .. }));
}

#[tokio::test]
async fn enqueue_failure_is_a_storage_error() {
    let env = TestEnv::new();
    let shipment = env.add_shipment(ShipmentBuilder::new().build()).await;
    env.flow.fail_next(FlowError::communication("timeout")).await;
    env.retry_store.inject_enqueue_error("disk full").await;

    let err = env.ingress().handle(request(&shipment.id)).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Storage);
    assert_eq!(err.code(), "storage_error");
}

#[tokio::test]
async fn enqueued_callback_is_replayed_later() {
    let env = TestEnv::new();
    let shipment = env.add_shipment(ShipmentBuilder::new().build()).await;
    env.flow.fail_next(FlowError::communication("timeout")).await;
    let _ = env.ingress().handle(request(&shipment.id)).await.unwrap_err();

    assert_eq!(env.process_due(10).await, 0);
    env.advance_past_attempt(1);
    assert_eq!(env.process_due(10).await, 1);

    let records = env.retry_store.records().await;
    assert_eq!(records[0].status, RetryStatus::Succeeded);
    assert_eq!(env.flow.call_count(), 2);
}
