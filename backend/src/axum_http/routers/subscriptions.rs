use crate::axum_http::auth::AuthUser;
use crate::usecases::{
    payment_gateway::PaymentGateway,
    subscriptions::{SubscriptionError, SubscriptionUseCase},
};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use crates::domain::{
    repositories::{plans::PlanRepository, subscriptions::SubscriptionRepository},
    value_objects::{
        plans::ListPlansQuery,
        subscriptions::{HistoryQuery, PurchaseRequest},
    },
};
use std::sync::Arc;
use uuid::Uuid;

pub fn routes<P, S, G>(subscriptions_usecase: Arc<SubscriptionUseCase<P, S, G>>) -> Router
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    G: PaymentGateway + Send + Sync + 'static,
{
    Router::new()
        .route("/plans", get(list_plans::<P, S, G>))
        .route("/rights", get(get_publishing_rights::<P, S, G>))
        .route("/usage", get(get_usage_stats::<P, S, G>))
        .route("/history", get(get_subscription_history::<P, S, G>))
        .route("/subscribe", post(subscribe::<P, S, G>))
        .route("/packages", post(purchase_package::<P, S, G>))
        .route("/:id/cancel", post(cancel_subscription::<P, S, G>))
        .route("/publish", post(record_publish::<P, S, G>))
        .with_state(subscriptions_usecase)
}

pub async fn list_plans<P, S, G>(
    State(subscriptions_usecase): State<Arc<SubscriptionUseCase<P, S, G>>>,
    _auth: AuthUser,
    Query(query): Query<ListPlansQuery>,
) -> Result<impl IntoResponse, SubscriptionError>
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    G: PaymentGateway + Send + Sync + 'static,
{
    let plans = subscriptions_usecase.list_plans(query.plan_type).await?;
    Ok((StatusCode::OK, Json(plans)))
}

pub async fn get_publishing_rights<P, S, G>(
    State(subscriptions_usecase): State<Arc<SubscriptionUseCase<P, S, G>>>,
    auth: AuthUser,
) -> Result<impl IntoResponse, SubscriptionError>
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    G: PaymentGateway + Send + Sync + 'static,
{
    let rights = subscriptions_usecase
        .get_publishing_rights(auth.user_id)
        .await?;
    Ok((StatusCode::OK, Json(rights)))
}

pub async fn get_usage_stats<P, S, G>(
    State(subscriptions_usecase): State<Arc<SubscriptionUseCase<P, S, G>>>,
    auth: AuthUser,
) -> Result<impl IntoResponse, SubscriptionError>
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    G: PaymentGateway + Send + Sync + 'static,
{
    let stats = subscriptions_usecase.get_usage_stats(auth.user_id).await?;
    Ok((StatusCode::OK, Json(stats)))
}

pub async fn get_subscription_history<P, S, G>(
    State(subscriptions_usecase): State<Arc<SubscriptionUseCase<P, S, G>>>,
    auth: AuthUser,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, SubscriptionError>
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    G: PaymentGateway + Send + Sync + 'static,
{
    let history = subscriptions_usecase
        .get_subscription_history(auth.user_id, query)
        .await?;
    Ok((StatusCode::OK, Json(history)))
}

pub async fn subscribe<P, S, G>(
    State(subscriptions_usecase): State<Arc<SubscriptionUseCase<P, S, G>>>,
    auth: AuthUser,
    Json(request): Json<PurchaseRequest>,
) -> Result<impl IntoResponse, SubscriptionError>
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    G: PaymentGateway + Send + Sync + 'static,
{
    let session = subscriptions_usecase
        .purchase_subscription(auth.customer(), request.plan_id)
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn purchase_package<P, S, G>(
    State(subscriptions_usecase): State<Arc<SubscriptionUseCase<P, S, G>>>,
    auth: AuthUser,
    Json(request): Json<PurchaseRequest>,
) -> Result<impl IntoResponse, SubscriptionError>
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    G: PaymentGateway + Send + Sync + 'static,
{
    let session = subscriptions_usecase
        .purchase_package(auth.customer(), request.plan_id)
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn cancel_subscription<P, S, G>(
    State(subscriptions_usecase): State<Arc<SubscriptionUseCase<P, S, G>>>,
    auth: AuthUser,
    Path(entry_id): Path<Uuid>,
) -> Result<impl IntoResponse, SubscriptionError>
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    G: PaymentGateway + Send + Sync + 'static,
{
    let entry = subscriptions_usecase
        .cancel_subscription(auth.user_id, entry_id)
        .await?;
    Ok((StatusCode::OK, Json(entry)))
}

pub async fn record_publish<P, S, G>(
    State(subscriptions_usecase): State<Arc<SubscriptionUseCase<P, S, G>>>,
    auth: AuthUser,
) -> Result<impl IntoResponse, SubscriptionError>
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    G: PaymentGateway + Send + Sync + 'static,
{
    let rights = subscriptions_usecase.record_publish(auth.user_id).await?;
    Ok((StatusCode::OK, Json(rights)))
}
