use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::entities::subscriptions::SubscriptionEntity;
use crate::domain::value_objects::{enums::usage_kinds::UsageKind, plans::PlanSnapshot};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger entry not found")]
    NotFound,
    #[error("correlation id is already in use")]
    DuplicateCorrelation,
    #[error("usage limit exceeded")]
    LimitExceeded,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationOutcome {
    /// The entry moved to `active`. `superseded` holds the user's previously
    /// active subscriptions that were cancelled in the same transaction.
    Activated {
        entry: SubscriptionEntity,
        superseded: Vec<SubscriptionEntity>,
    },
    AlreadyActive(SubscriptionEntity),
    /// Cancelled or expired; a late webhook never resurrects it.
    Inactive(SubscriptionEntity),
}

impl ActivationOutcome {
    pub fn entry(&self) -> &SubscriptionEntity {
        match self {
            ActivationOutcome::Activated { entry, .. } => entry,
            ActivationOutcome::AlreadyActive(entry) | ActivationOutcome::Inactive(entry) => entry,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled(SubscriptionEntity),
    AlreadyInactive(SubscriptionEntity),
}

impl CancelOutcome {
    pub fn entry(&self) -> &SubscriptionEntity {
        match self {
            CancelOutcome::Cancelled(entry) | CancelOutcome::AlreadyInactive(entry) => entry,
        }
    }
}

/// Everything a completed checkout tells us about the entry it pays for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutActivation {
    pub checkout_session_id: Option<String>,
    /// Provider subscription id for recurring plans, the session id for
    /// one-time packages.
    pub correlation_id: String,
    pub user_id: Uuid,
    pub snapshot: PlanSnapshot,
}

#[automock]
#[async_trait]
pub trait SubscriptionRepository {
    async fn create_pending(
        &self,
        user_id: Uuid,
        snapshot: PlanSnapshot,
        correlation_id: &str,
    ) -> LedgerResult<SubscriptionEntity>;

    async fn activate_by_correlation_id(
        &self,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> LedgerResult<ActivationOutcome>;

    async fn activate_checkout(
        &self,
        activation: CheckoutActivation,
        now: DateTime<Utc>,
    ) -> LedgerResult<ActivationOutcome>;

    async fn cancel_by_correlation_id(
        &self,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> LedgerResult<CancelOutcome>;

    async fn cancel_by_id(&self, entry_id: Uuid, now: DateTime<Utc>)
    -> LedgerResult<CancelOutcome>;

    /// Moves `expired_at` forward to `period_end`. Returns false when no
    /// active entry matched or the stored expiry is already later.
    async fn extend_period_by_correlation_id(
        &self,
        correlation_id: &str,
        period_end: DateTime<Utc>,
    ) -> LedgerResult<bool>;

    async fn increment_usage(
        &self,
        entry_id: Uuid,
        kind: UsageKind,
        now: DateTime<Utc>,
    ) -> LedgerResult<SubscriptionEntity>;

    async fn find_by_id(&self, entry_id: Uuid) -> LedgerResult<Option<SubscriptionEntity>>;

    async fn find_by_correlation_id(
        &self,
        correlation_id: &str,
    ) -> LedgerResult<Option<SubscriptionEntity>>;

    async fn list_active_for_user(&self, user_id: Uuid) -> LedgerResult<Vec<SubscriptionEntity>>;

    /// Marks lapsed package entries `expired`. Subscription entries stay
    /// `active` past `expired_at` until the provider deletes them, so a late
    /// renewal invoice can still extend the period.
    async fn expire_lapsed_for_user(&self, user_id: Uuid, now: DateTime<Utc>)
    -> LedgerResult<usize>;

    async fn get_history_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> LedgerResult<(Vec<SubscriptionEntity>, i64)>;
}
