mod common;

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header::AUTHORIZATION},
};
use backend::{
    axum_http::{auth::JwtVerifier, http_serve::build_router},
    config::config_model::BackendServer,
};
use common::{
    FakeGateway, InMemoryLedger, PlanCatalog, VALID_SIGNATURE, checkout_event, package_plan,
};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

fn server() -> BackendServer {
    BackendServer {
        port: 0,
        body_limit: 1,
        timeout: 5,
    }
}

fn app(gateway: FakeGateway, ledger: Arc<InMemoryLedger>) -> Router {
    let plan = package_plan(5, 30);
    build_router(
        Arc::new(PlanCatalog::with(vec![plan])),
        ledger,
        Arc::new(gateway),
        Arc::new(JwtVerifier::new("supersecretjwtsecretforunittesting123")),
        &server(),
    )
    .unwrap()
}

fn webhook_request(signature: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/v1/webhooks/stripe")
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header("Stripe-Signature", signature);
    }
    builder.body(Body::from(r#"{"id":"evt_1"}"#)).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn missing_signature_is_rejected() {
    let response = app(FakeGateway::default(), Arc::new(InMemoryLedger::new()))
        .oneshot(webhook_request(None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn bad_signature_is_rejected_without_touching_ledger() {
    let ledger = Arc::new(InMemoryLedger::new());
    let plan = package_plan(5, 30);
    let gateway = FakeGateway::with_event(checkout_event(Uuid::new_v4(), &plan, "cs_1", None));

    let response = app(gateway, Arc::clone(&ledger))
        .oneshot(webhook_request(Some("t=1,v1=forged")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["code"], 400);
    assert!(ledger.snapshot().is_empty());
}

#[tokio::test]
async fn verified_event_is_acknowledged_with_outcome() {
    let ledger = Arc::new(InMemoryLedger::new());
    let plan = package_plan(5, 30);
    let plan_id = plan.id;
    let gateway = FakeGateway::with_event(checkout_event(Uuid::new_v4(), &plan, "cs_1", None));

    // The router's catalog does not know this plan, so the event is dropped
    // but still acknowledged.
    let response = app(gateway, Arc::clone(&ledger))
        .oneshot(webhook_request(Some(VALID_SIGNATURE)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["received"], true);
    assert_eq!(body["outcome"], "dropped");
    assert!(ledger.snapshot().iter().all(|row| row.plan_id != plan_id));
}

#[tokio::test]
async fn subscription_routes_require_bearer_token() {
    let response = app(FakeGateway::default(), Arc::new(InMemoryLedger::new()))
        .oneshot(
            Request::builder()
                .uri("/api/v1/subscriptions/rights")
                .header(AUTHORIZATION, "Bearer not-a-jwt")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_route_is_json_404() {
    let response = app(FakeGateway::default(), Arc::new(InMemoryLedger::new()))
        .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["code"], 404);
}
