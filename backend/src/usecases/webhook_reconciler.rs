use std::sync::Arc;

use chrono::Utc;
use crates::domain::{
    entities::{plans::PlanDefinitionError, subscriptions::SubscriptionEntity},
    repositories::{
        plans::PlanRepository,
        subscriptions::{
            ActivationOutcome, CancelOutcome, CheckoutActivation, LedgerError,
            SubscriptionRepository,
        },
    },
    value_objects::{
        enums::{checkout_modes::CheckoutMode, plan_types::PlanType},
        webhook_events::{CheckoutCompleted, InvoiceEvent, ProviderEvent, SubscriptionDeleted},
    },
};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::payment_gateway::{
    METADATA_PLAN_ID, METADATA_PLAN_TYPE, METADATA_USER_ID, PaymentGateway,
};

/// Why an event was acknowledged without changing the ledger.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DropReason {
    #[error("missing correlation metadata: {0}")]
    MissingCorrelationMetadata(&'static str),
    #[error("invalid {field} in metadata: {value}")]
    InvalidMetadata { field: &'static str, value: String },
    #[error("unknown checkout mode {0}")]
    UnknownCheckoutMode(String),
    #[error("plan {0} does not exist")]
    UnknownPlan(Uuid),
    #[error("plan {plan_id} is a {found} plan, checkout expected {expected}")]
    PlanTypeMismatch {
        plan_id: Uuid,
        expected: PlanType,
        found: PlanType,
    },
    #[error("invalid plan definition: {0}")]
    InvalidPlanDefinition(PlanDefinitionError),
    #[error("no ledger entry for correlation id {0}")]
    NoMatchingEntry(String),
    #[error("ledger entry {0} is no longer active")]
    EntryInactive(Uuid),
}

#[derive(Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied,
    AlreadyApplied,
    /// Recorded for a human; the ledger is left unchanged.
    FlaggedForOperator,
    Dropped(DropReason),
    Ignored,
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Applied => "applied",
            ReconcileOutcome::AlreadyApplied => "already_applied",
            ReconcileOutcome::FlaggedForOperator => "flagged_for_operator",
            ReconcileOutcome::Dropped(_) => "dropped",
            ReconcileOutcome::Ignored => "ignored",
        }
    }
}

/// Only infrastructure failures escape, so the provider redelivers.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<LedgerError> for ReconcileError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Internal(err) => ReconcileError::Internal(err),
            other => ReconcileError::Internal(anyhow::Error::new(other)),
        }
    }
}

pub type ReconcileResult = std::result::Result<ReconcileOutcome, ReconcileError>;

pub struct WebhookReconciler<P, S, G>
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    G: PaymentGateway + Send + Sync + 'static,
{
    plan_repo: Arc<P>,
    subscription_repo: Arc<S>,
    gateway: Arc<G>,
}

impl<P, S, G> WebhookReconciler<P, S, G>
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    G: PaymentGateway + Send + Sync + 'static,
{
    pub fn new(plan_repo: Arc<P>, subscription_repo: Arc<S>, gateway: Arc<G>) -> Self {
        Self {
            plan_repo,
            subscription_repo,
            gateway,
        }
    }

    pub async fn reconcile(&self, event: ProviderEvent) -> ReconcileResult {
        let event_type = event.event_type().to_string();
        let event_id = event.event_id().map(str::to_string);

        let outcome = match event {
            ProviderEvent::CheckoutCompleted(checkout) => self.checkout_completed(checkout).await?,
            ProviderEvent::InvoiceSucceeded(invoice) => self.invoice_succeeded(invoice).await?,
            ProviderEvent::InvoiceFailed(invoice) => self.invoice_failed(invoice).await?,
            ProviderEvent::SubscriptionDeleted(deleted) => {
                self.subscription_deleted(deleted).await?
            }
            ProviderEvent::Unhandled { .. } => {
                info!(%event_type, ?event_id, "webhooks: unhandled event type ignored");
                ReconcileOutcome::Ignored
            }
        };

        if let ReconcileOutcome::Dropped(reason) = &outcome {
            warn!(%event_type, ?event_id, %reason, "webhooks: event dropped");
        }

        Ok(outcome)
    }

    async fn checkout_completed(&self, checkout: CheckoutCompleted) -> ReconcileResult {
        let Some(raw_mode) = checkout.mode.as_deref() else {
            return Ok(dropped(DropReason::MissingCorrelationMetadata("mode")));
        };
        let Some(mode) = CheckoutMode::from_str(raw_mode) else {
            return Ok(dropped(DropReason::UnknownCheckoutMode(raw_mode.to_string())));
        };

        let user_id = match metadata_uuid(&checkout, METADATA_USER_ID) {
            Ok(user_id) => user_id,
            Err(reason) => return Ok(dropped(reason)),
        };
        let plan_id = match metadata_uuid(&checkout, METADATA_PLAN_ID) {
            Ok(plan_id) => plan_id,
            Err(reason) => return Ok(dropped(reason)),
        };

        let expected_type = mode.plan_type();
        if let Some(raw) = checkout.metadata.get(METADATA_PLAN_TYPE) {
            match PlanType::from_str(raw) {
                Some(found) if found != expected_type => {
                    return Ok(dropped(DropReason::PlanTypeMismatch {
                        plan_id,
                        expected: expected_type,
                        found,
                    }));
                }
                Some(_) => {}
                None => {
                    return Ok(dropped(DropReason::InvalidMetadata {
                        field: METADATA_PLAN_TYPE,
                        value: raw.clone(),
                    }));
                }
            }
        }

        // Recurring plans are keyed by the provider subscription so later
        // invoices and deletions find them; packages by their session.
        let correlation_id = match mode {
            CheckoutMode::Subscription => checkout.subscription_id.clone(),
            CheckoutMode::Payment => checkout.session_id.clone(),
        };
        let Some(correlation_id) = correlation_id else {
            return Ok(dropped(DropReason::MissingCorrelationMetadata(match mode {
                CheckoutMode::Subscription => "subscription",
                CheckoutMode::Payment => "session_id",
            })));
        };

        // Retired plans still resolve: the customer has already paid.
        let Some(plan) = self.plan_repo.find_by_id(plan_id).await? else {
            return Ok(dropped(DropReason::UnknownPlan(plan_id)));
        };
        if plan.plan_type != expected_type {
            return Ok(dropped(DropReason::PlanTypeMismatch {
                plan_id,
                expected: expected_type,
                found: plan.plan_type,
            }));
        }
        let snapshot = match plan.snapshot() {
            Ok(snapshot) => snapshot,
            Err(err) => {
                error!(
                    %plan_id,
                    %user_id,
                    %correlation_id,
                    operator_attention = true,
                    error = %err,
                    "webhooks: paid checkout references an invalid plan definition"
                );
                return Ok(dropped(DropReason::InvalidPlanDefinition(err)));
            }
        };

        let activation = CheckoutActivation {
            checkout_session_id: checkout.session_id.clone(),
            correlation_id: correlation_id.clone(),
            user_id,
            snapshot,
        };

        match self
            .subscription_repo
            .activate_checkout(activation, Utc::now())
            .await
        {
            Ok(outcome) => Ok(self.activation_applied(outcome, &correlation_id).await),
            Err(LedgerError::DuplicateCorrelation) => {
                info!(%correlation_id, "webhooks: checkout already recorded by a concurrent delivery");
                Ok(ReconcileOutcome::AlreadyApplied)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn invoice_succeeded(&self, invoice: InvoiceEvent) -> ReconcileResult {
        let Some(correlation_id) = invoice.subscription_id.clone() else {
            return Ok(dropped(DropReason::MissingCorrelationMetadata("subscription")));
        };

        let outcome = match self
            .subscription_repo
            .activate_by_correlation_id(&correlation_id, Utc::now())
            .await
        {
            Ok(outcome) => self.activation_applied(outcome, &correlation_id).await,
            Err(LedgerError::NotFound) => {
                // The first invoice can arrive before checkout completion; the
                // checkout event activates the entry in that case.
                return Ok(dropped(DropReason::NoMatchingEntry(correlation_id)));
            }
            Err(err) => return Err(err.into()),
        };

        let Some(period_end) = invoice.period_end else {
            return Ok(outcome);
        };
        if matches!(outcome, ReconcileOutcome::Dropped(_)) {
            return Ok(outcome);
        }

        let extended = self
            .subscription_repo
            .extend_period_by_correlation_id(&correlation_id, period_end)
            .await?;
        if extended {
            info!(%correlation_id, %period_end, "webhooks: subscription period extended");
            return Ok(ReconcileOutcome::Applied);
        }

        Ok(outcome)
    }

    async fn invoice_failed(&self, invoice: InvoiceEvent) -> ReconcileResult {
        let Some(correlation_id) = invoice.subscription_id.clone() else {
            return Ok(dropped(DropReason::MissingCorrelationMetadata("subscription")));
        };

        let Some(entry) = self
            .subscription_repo
            .find_by_correlation_id(&correlation_id)
            .await?
        else {
            return Ok(dropped(DropReason::NoMatchingEntry(correlation_id)));
        };

        warn!(
            entry_id = %entry.id,
            user_id = %entry.user_id,
            %correlation_id,
            invoice_id = ?invoice.invoice_id,
            attempt_count = ?invoice.attempt_count,
            amount_due = ?invoice.amount_due,
            status = %entry.status,
            operator_attention = true,
            "webhooks: invoice payment failed, entry left unchanged"
        );

        Ok(ReconcileOutcome::FlaggedForOperator)
    }

    async fn subscription_deleted(&self, deleted: SubscriptionDeleted) -> ReconcileResult {
        let Some(correlation_id) = deleted.subscription_id else {
            return Ok(dropped(DropReason::MissingCorrelationMetadata("subscription")));
        };

        match self
            .subscription_repo
            .cancel_by_correlation_id(&correlation_id, Utc::now())
            .await
        {
            Ok(CancelOutcome::Cancelled(entry)) => {
                info!(
                    entry_id = %entry.id,
                    user_id = %entry.user_id,
                    %correlation_id,
                    "webhooks: subscription cancelled by provider"
                );
                Ok(ReconcileOutcome::Applied)
            }
            Ok(CancelOutcome::AlreadyInactive(entry)) => {
                info!(
                    entry_id = %entry.id,
                    status = %entry.status,
                    "webhooks: subscription already inactive"
                );
                Ok(ReconcileOutcome::AlreadyApplied)
            }
            Err(LedgerError::NotFound) => {
                info!(%correlation_id, "webhooks: deletion for unknown subscription acknowledged");
                Ok(ReconcileOutcome::Dropped(DropReason::NoMatchingEntry(
                    correlation_id,
                )))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn activation_applied(
        &self,
        outcome: ActivationOutcome,
        correlation_id: &str,
    ) -> ReconcileOutcome {
        match outcome {
            ActivationOutcome::Activated { entry, superseded } => {
                info!(
                    entry_id = %entry.id,
                    user_id = %entry.user_id,
                    plan_type = %entry.plan_type,
                    %correlation_id,
                    expired_at = ?entry.expired_at,
                    "webhooks: ledger entry activated"
                );
                self.cancel_superseded_at_provider(&superseded).await;
                ReconcileOutcome::Applied
            }
            ActivationOutcome::AlreadyActive(entry) => {
                info!(entry_id = %entry.id, %correlation_id, "webhooks: ledger entry already active");
                ReconcileOutcome::AlreadyApplied
            }
            ActivationOutcome::Inactive(entry) => ReconcileOutcome::Dropped(
                DropReason::EntryInactive(entry.id),
            ),
        }
    }

    async fn cancel_superseded_at_provider(&self, superseded: &[SubscriptionEntity]) {
        for entry in superseded {
            info!(
                entry_id = %entry.id,
                user_id = %entry.user_id,
                "webhooks: previous subscription superseded"
            );

            let Some(provider_id) = provider_subscription_id(entry) else {
                continue;
            };
            if let Err(err) = self.gateway.cancel_subscription(provider_id).await {
                warn!(
                    entry_id = %entry.id,
                    correlation_id = %provider_id,
                    operator_attention = true,
                    error = ?err,
                    "webhooks: failed to cancel superseded subscription at provider"
                );
            }
        }
    }
}

/// The provider subscription id, once a checkout has re-keyed the entry away
/// from its session id.
pub fn provider_subscription_id(entry: &SubscriptionEntity) -> Option<&str> {
    let correlation_id = entry.provider_correlation_id.as_deref()?;
    match entry.checkout_session_id.as_deref() {
        Some(session_id) if session_id == correlation_id => None,
        _ => Some(correlation_id),
    }
}

fn dropped(reason: DropReason) -> ReconcileOutcome {
    ReconcileOutcome::Dropped(reason)
}

fn metadata_uuid(
    checkout: &CheckoutCompleted,
    field: &'static str,
) -> std::result::Result<Uuid, DropReason> {
    let raw = checkout
        .metadata
        .get(field)
        .filter(|value| !value.trim().is_empty())
        .ok_or(DropReason::MissingCorrelationMetadata(field))?;

    Uuid::parse_str(raw.trim()).map_err(|_| DropReason::InvalidMetadata {
        field,
        value: raw.clone(),
    })
}
