use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;
use crates::domain::{
    entities::subscriptions::SubscriptionEntity,
    repositories::{
        plans::PlanRepository,
        subscriptions::{CancelOutcome, LedgerError, SubscriptionRepository},
    },
    value_objects::{
        enums::{checkout_modes::CheckoutMode, plan_types::PlanType, usage_kinds::UsageKind},
        plans::PlanDto,
        publishing_rights::{PublishSource, PublishingRights, RestrictionReason, UsageStats},
        subscriptions::{
            CheckoutCustomer, CheckoutSessionDto, HistoryQuery, LedgerEntryDto,
            SubscriptionHistoryDto,
        },
    },
};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{
    entitlements,
    payment_gateway::PaymentGateway,
    webhook_reconciler::provider_subscription_id,
};

pub const DEFAULT_HISTORY_LIMIT: i64 = 20;
pub const MAX_HISTORY_LIMIT: i64 = 100;

/// A concurrent publish can take the last unit between the rights check and
/// the conditional increment; the decision is then recomputed.
const PUBLISH_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("plan not found")]
    PlanNotFound,
    #[error("subscription not found")]
    SubscriptionNotFound,
    #[error("checkout is already recorded")]
    DuplicateCorrelation,
    #[error("an active subscription already exists")]
    ActiveSubscriptionExists,
    #[error("publishing limit reached{}", .0.map(|r| format!(": {r}")).unwrap_or_default())]
    LimitExceeded(Option<RestrictionReason>),
    #[error("invalid payment combination: {0}")]
    InvalidCombination(String),
    #[error("user email is required for checkout")]
    MissingEmail,
    #[error("only subscriptions can be cancelled")]
    NotCancellable,
    #[error("invalid webhook signature")]
    InvalidWebhookSignature,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl SubscriptionError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            SubscriptionError::PlanNotFound | SubscriptionError::SubscriptionNotFound => {
                StatusCode::NOT_FOUND
            }
            SubscriptionError::DuplicateCorrelation
            | SubscriptionError::ActiveSubscriptionExists => StatusCode::CONFLICT,
            SubscriptionError::LimitExceeded(_) => StatusCode::FORBIDDEN,
            SubscriptionError::InvalidCombination(_)
            | SubscriptionError::MissingEmail
            | SubscriptionError::NotCancellable
            | SubscriptionError::InvalidWebhookSignature => StatusCode::BAD_REQUEST,
            SubscriptionError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<LedgerError> for SubscriptionError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound => SubscriptionError::SubscriptionNotFound,
            LedgerError::DuplicateCorrelation => SubscriptionError::DuplicateCorrelation,
            LedgerError::LimitExceeded => SubscriptionError::LimitExceeded(None),
            LedgerError::Internal(err) => SubscriptionError::Internal(err),
        }
    }
}

pub type UseCaseResult<T> = std::result::Result<T, SubscriptionError>;

pub struct SubscriptionUseCase<P, S, G>
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    G: PaymentGateway + Send + Sync + 'static,
{
    plan_repo: Arc<P>,
    subscription_repo: Arc<S>,
    payment_gateway: Arc<G>,
}

impl<P, S, G> SubscriptionUseCase<P, S, G>
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    G: PaymentGateway + Send + Sync + 'static,
{
    pub fn new(plan_repo: Arc<P>, subscription_repo: Arc<S>, payment_gateway: Arc<G>) -> Self {
        Self {
            plan_repo,
            subscription_repo,
            payment_gateway,
        }
    }

    pub async fn list_plans(&self, plan_type: Option<PlanType>) -> UseCaseResult<Vec<PlanDto>> {
        let plans = self
            .plan_repo
            .list_active_plans(plan_type)
            .await
            .map_err(|err| {
                error!(db_error = ?err, "subscriptions: failed to list plans");
                SubscriptionError::Internal(err)
            })?;

        Ok(plans.into_iter().map(PlanDto::from).collect())
    }

    pub async fn get_publishing_rights(&self, user_id: Uuid) -> UseCaseResult<PublishingRights> {
        let now = Utc::now();
        let entries = self.active_entries(user_id).await?;
        Ok(entitlements::compute_rights(&entries, now))
    }

    pub async fn get_usage_stats(&self, user_id: Uuid) -> UseCaseResult<UsageStats> {
        let now = Utc::now();
        let entries = self.active_entries(user_id).await?;
        Ok(entitlements::compute_usage_stats(&entries, now))
    }

    pub async fn get_subscription_history(
        &self,
        user_id: Uuid,
        query: HistoryQuery,
    ) -> UseCaseResult<SubscriptionHistoryDto> {
        let limit = query
            .limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        let offset = query.offset.unwrap_or(0).max(0);

        let (entries, total) = self
            .subscription_repo
            .get_history_for_user(user_id, limit, offset)
            .await?;

        Ok(SubscriptionHistoryDto {
            entries: entries.into_iter().map(LedgerEntryDto::from).collect(),
            total,
            limit,
            offset,
        })
    }

    pub async fn purchase_subscription(
        &self,
        customer: CheckoutCustomer,
        plan_id: Uuid,
    ) -> UseCaseResult<CheckoutSessionDto> {
        self.purchase(customer, plan_id, PlanType::Subscription).await
    }

    pub async fn purchase_package(
        &self,
        customer: CheckoutCustomer,
        plan_id: Uuid,
    ) -> UseCaseResult<CheckoutSessionDto> {
        self.purchase(customer, plan_id, PlanType::Package).await
    }

    async fn purchase(
        &self,
        customer: CheckoutCustomer,
        plan_id: Uuid,
        expected: PlanType,
    ) -> UseCaseResult<CheckoutSessionDto> {
        let user_id = customer.user_id;
        if customer
            .email
            .as_deref()
            .is_none_or(|email| email.trim().is_empty())
        {
            return Err(SubscriptionError::MissingEmail);
        }

        let plan = self
            .plan_repo
            .find_active_plan_by_id(plan_id)
            .await?
            .ok_or(SubscriptionError::PlanNotFound)?;

        if plan.plan_type != expected {
            return Err(SubscriptionError::InvalidCombination(format!(
                "plan {plan_id} is a {} plan, not a {expected} plan",
                plan.plan_type
            )));
        }

        let snapshot = plan.snapshot().map_err(|err| {
            error!(%plan_id, error = %err, "subscriptions: plan definition is invalid");
            SubscriptionError::Internal(anyhow!(err))
        })?;

        if expected == PlanType::Subscription {
            let now = Utc::now();
            let entries = self.active_entries(user_id).await?;
            if entries
                .iter()
                .any(|entry| entry.is_subscription() && entry.is_live_at(now))
            {
                info!(%user_id, %plan_id, "subscriptions: purchase rejected, subscription already active");
                return Err(SubscriptionError::ActiveSubscriptionExists);
            }
        }

        let mode = CheckoutMode::for_plan_type(plan.plan_type);
        let session = self
            .payment_gateway
            .create_checkout_session(&plan, &customer, mode)
            .await
            .map_err(|err| {
                error!(%user_id, %plan_id, error = ?err, "subscriptions: checkout session creation failed");
                SubscriptionError::Internal(err)
            })?;

        let entry = self
            .subscription_repo
            .create_pending(user_id, snapshot, &session.id)
            .await?;

        info!(
            %user_id,
            %plan_id,
            entry_id = %entry.id,
            session_id = %session.id,
            mode = %mode,
            "subscriptions: checkout started"
        );

        Ok(CheckoutSessionDto {
            entry_id: entry.id,
            session_id: session.id,
            checkout_url: session.url,
        })
    }

    pub async fn cancel_subscription(
        &self,
        user_id: Uuid,
        entry_id: Uuid,
    ) -> UseCaseResult<LedgerEntryDto> {
        let entry = self
            .subscription_repo
            .find_by_id(entry_id)
            .await?
            .filter(|entry| entry.user_id == user_id)
            .ok_or(SubscriptionError::SubscriptionNotFound)?;

        if !entry.is_subscription() {
            return Err(SubscriptionError::NotCancellable);
        }
        if entry.status().is_terminal() {
            return Ok(LedgerEntryDto::from(entry));
        }

        if let Some(provider_id) = provider_subscription_id(&entry) {
            self.payment_gateway
                .cancel_subscription(provider_id)
                .await
                .map_err(|err| {
                    error!(
                        %user_id,
                        %entry_id,
                        error = ?err,
                        "subscriptions: provider cancellation failed, ledger left unchanged"
                    );
                    SubscriptionError::Internal(err)
                })?;
        }

        let outcome = self
            .subscription_repo
            .cancel_by_id(entry_id, Utc::now())
            .await?;

        if let CancelOutcome::Cancelled(entry) = &outcome {
            info!(%user_id, entry_id = %entry.id, "subscriptions: subscription cancelled by user");
        }

        Ok(LedgerEntryDto::from(outcome.entry()))
    }

    /// Charges one publish to the source the entitlement decision picks.
    pub async fn record_publish(&self, user_id: Uuid) -> UseCaseResult<PublishingRights> {
        let mut last_reason = None;

        for attempt in 1..=PUBLISH_ATTEMPTS {
            let rights = self.get_publishing_rights(user_id).await?;
            let Some(source) = rights.next_source else {
                info!(
                    %user_id,
                    reason = ?rights.restriction_reason,
                    "subscriptions: publish denied"
                );
                return Err(SubscriptionError::LimitExceeded(rights.restriction_reason));
            };

            let (entry_id, kind) = match source {
                PublishSource::Subscription(id) => (id, UsageKind::Subscription),
                PublishSource::Package(id) => (id, UsageKind::Credits),
            };

            match self
                .subscription_repo
                .increment_usage(entry_id, kind, Utc::now())
                .await
            {
                Ok(entry) => {
                    info!(%user_id, entry_id = %entry.id, kind = %kind, "subscriptions: publish recorded");
                    return self.get_publishing_rights(user_id).await;
                }
                Err(LedgerError::LimitExceeded | LedgerError::NotFound) => {
                    warn!(%user_id, %entry_id, attempt, "subscriptions: usage source changed concurrently, retrying");
                    last_reason = rights.restriction_reason;
                }
                Err(err) => return Err(err.into()),
            }
        }

        info!(%user_id, "subscriptions: publish denied after concurrent retries");
        Err(SubscriptionError::LimitExceeded(last_reason))
    }

    async fn active_entries(
        &self,
        user_id: Uuid,
    ) -> UseCaseResult<Vec<SubscriptionEntity>> {
        let now = Utc::now();
        self.subscription_repo
            .expire_lapsed_for_user(user_id, now)
            .await?;

        let entries = self
            .subscription_repo
            .list_active_for_user(user_id)
            .await
            .map_err(|err| {
                if let LedgerError::Internal(inner) = &err {
                    error!(%user_id, db_error = ?inner, "subscriptions: failed to load ledger entries");
                }
                err
            })?;

        Ok(entries)
    }
}
