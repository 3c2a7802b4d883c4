use crate::axum_http::error_responses::ErrorResponse;
use crate::usecases::{
    payment_gateway::PaymentGateway,
    subscriptions::SubscriptionError,
    webhook_reconciler::{ReconcileError, WebhookReconciler},
};
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use crates::domain::repositories::{
    plans::PlanRepository, subscriptions::SubscriptionRepository,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, warn};

pub const SIGNATURE_HEADER: &str = "stripe-signature";

pub struct StripeWebhookState<P, S, G>
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    G: PaymentGateway + Send + Sync + 'static,
{
    pub reconciler: WebhookReconciler<P, S, G>,
    pub gateway: Arc<G>,
}

pub fn routes<P, S, G>(state: Arc<StripeWebhookState<P, S, G>>) -> Router
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    G: PaymentGateway + Send + Sync + 'static,
{
    Router::new()
        .route("/stripe", post(stripe_webhook::<P, S, G>))
        .with_state(state)
}

pub async fn stripe_webhook<P, S, G>(
    State(state): State<Arc<StripeWebhookState<P, S, G>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    G: PaymentGateway + Send + Sync + 'static,
{
    let Some(signature) = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
    else {
        warn!(
            security_event = "webhook_signature_missing",
            "webhooks: delivery without signature rejected"
        );
        return SubscriptionError::InvalidWebhookSignature.into_response();
    };

    let event = match state.gateway.verify_webhook_signature(&body, signature) {
        Ok(event) => event,
        Err(err) => {
            warn!(
                security_event = "webhook_signature_invalid",
                error = %err,
                "webhooks: delivery failed verification"
            );
            return SubscriptionError::InvalidWebhookSignature.into_response();
        }
    };

    let event_type = event.event_type().to_string();
    match state.reconciler.reconcile(event).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({ "received": true, "outcome": outcome.as_str() })),
        )
            .into_response(),
        Err(ReconcileError::Internal(err)) => {
            error!(%event_type, error = ?err, "webhooks: reconciliation failed, provider will redeliver");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    code: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                    message: "Internal server error".to_string(),
                }),
            )
                .into_response()
        }
    }
}
