use crate::{
    axum_http::{
        auth::JwtVerifier,
        default_routers,
        routers::{self, stripe_webhook::StripeWebhookState},
    },
    config::config_model::{BackendServer, DotEnvyConfig},
    usecases::{
        payment_gateway::PaymentGateway, subscriptions::SubscriptionUseCase,
        webhook_reconciler::WebhookReconciler,
    },
};
use anyhow::Result;
use axum::{
    Extension, Router,
    http::{
        Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::get,
};
use crates::{
    domain::repositories::{plans::PlanRepository, subscriptions::SubscriptionRepository},
    infra::db::{
        postgres::postgres_connection::PgPoolSquad,
        repositories::{plans::PlanPostgres, subscriptions::SubscriptionPostgres},
    },
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info};

pub fn build_router<P, S, G>(
    plan_repo: Arc<P>,
    subscription_repo: Arc<S>,
    payment_gateway: Arc<G>,
    jwt_verifier: Arc<JwtVerifier>,
    server: &BackendServer,
) -> Result<Router>
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    G: PaymentGateway + Send + Sync + 'static,
{
    let subscriptions_usecase = SubscriptionUseCase::new(
        Arc::clone(&plan_repo),
        Arc::clone(&subscription_repo),
        Arc::clone(&payment_gateway),
    );
    let webhook_state = StripeWebhookState {
        reconciler: WebhookReconciler::new(
            plan_repo,
            subscription_repo,
            Arc::clone(&payment_gateway),
        ),
        gateway: payment_gateway,
    };

    let app = Router::new()
        .fallback(default_routers::not_found)
        .nest(
            "/api/v1/subscriptions",
            routers::subscriptions::routes(Arc::new(subscriptions_usecase)),
        )
        .nest(
            "/api/v1/webhooks",
            routers::stripe_webhook::routes(Arc::new(webhook_state)),
        )
        .route("/api/v1/health-check", get(default_routers::health_check))
        .layer(Extension(jwt_verifier))
        .layer(TimeoutLayer::new(Duration::from_secs(server.timeout)))
        .layer(RequestBodyLimitLayer::new(
            (server.body_limit * 1024 * 1024).try_into()?,
        ))
        .layer(
            CorsLayer::new()
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([AUTHORIZATION, CONTENT_TYPE])
                .allow_origin(Any),
        )
        .layer(TraceLayer::new_for_http());

    Ok(app)
}

pub async fn start<G>(
    config: Arc<DotEnvyConfig>,
    db_pool: Arc<PgPoolSquad>,
    payment_gateway: Arc<G>,
) -> Result<()>
where
    G: PaymentGateway + Send + Sync + 'static,
{
    let app = build_router(
        Arc::new(PlanPostgres::new(Arc::clone(&db_pool))),
        Arc::new(SubscriptionPostgres::new(Arc::clone(&db_pool))),
        payment_gateway,
        Arc::new(JwtVerifier::new(&config.user_secret.secret)),
        &config.backend_server,
    )?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.backend_server.port));
    let listener = TcpListener::bind(addr).await?;

    info!("Server is running on port {}", config.backend_server.port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "http: failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "http: failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl+C signal"),
        _ = terminate => info!("Received terminate signal"),
    }
}
