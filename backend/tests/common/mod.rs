#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use anyhow::{Result as AnyResult, anyhow};
use async_trait::async_trait;
use backend::usecases::payment_gateway::PaymentGateway;
use chrono::{DateTime, Utc};
use crates::domain::{
    entities::{
        plans::PlanEntity,
        subscriptions::{InsertSubscriptionEntity, SubscriptionEntity},
    },
    repositories::{
        plans::PlanRepository,
        subscriptions::{
            ActivationOutcome, CancelOutcome, CheckoutActivation, LedgerError, LedgerResult,
            SubscriptionRepository,
        },
    },
    value_objects::{
        enums::{
            billing_cycles::BillingCycle, checkout_modes::CheckoutMode, plan_types::PlanType,
            subscription_statuses::SubscriptionStatus, usage_kinds::UsageKind,
        },
        plans::{PlanFeatures, PlanSnapshot},
        subscriptions::{CheckoutCustomer, CheckoutSession},
        usage_periods,
        webhook_events::{CheckoutCompleted, ProviderEvent},
    },
};
use uuid::Uuid;

/// Ledger kept in memory with the same uniqueness and one-active-subscription
/// rules the Postgres schema enforces.
#[derive(Default)]
pub struct InMemoryLedger {
    rows: Mutex<Vec<SubscriptionEntity>>,
}

fn lock(rows: &Mutex<Vec<SubscriptionEntity>>) -> LedgerResult<MutexGuard<'_, Vec<SubscriptionEntity>>> {
    rows.lock()
        .map_err(|_| LedgerError::Internal(anyhow!("ledger mutex poisoned")))
}

fn materialize(insert: InsertSubscriptionEntity, now: DateTime<Utc>) -> SubscriptionEntity {
    SubscriptionEntity {
        id: Uuid::new_v4(),
        user_id: insert.user_id,
        plan_id: insert.plan_id,
        plan_type: insert.plan_type,
        plan_name: insert.plan_name,
        price_minor: insert.price_minor,
        currency: insert.currency,
        weekly_limit: insert.weekly_limit,
        monthly_limit: insert.monthly_limit,
        total_credits: insert.total_credits,
        duration_days: insert.duration_days,
        billing_cycle: insert.billing_cycle,
        used_credits: insert.used_credits,
        weekly_used: insert.weekly_used,
        monthly_used: insert.monthly_used,
        weekly_period_start: insert.weekly_period_start,
        monthly_period_start: insert.monthly_period_start,
        status: insert.status,
        started_at: insert.started_at,
        expired_at: insert.expired_at,
        cancelled_at: None,
        provider_correlation_id: insert.provider_correlation_id,
        checkout_session_id: insert.checkout_session_id,
        created_at: now,
        updated_at: now,
    }
}

fn insert_row(
    rows: &mut Vec<SubscriptionEntity>,
    insert: InsertSubscriptionEntity,
    now: DateTime<Utc>,
) -> LedgerResult<usize> {
    let duplicate = rows.iter().any(|row| {
        (insert.provider_correlation_id.is_some()
            && row.provider_correlation_id == insert.provider_correlation_id)
            || (insert.checkout_session_id.is_some()
                && row.checkout_session_id == insert.checkout_session_id)
    });
    if duplicate {
        return Err(LedgerError::DuplicateCorrelation);
    }

    rows.push(materialize(insert, now));
    Ok(rows.len() - 1)
}

fn activate_at(
    rows: &mut [SubscriptionEntity],
    index: usize,
    now: DateTime<Utc>,
) -> ActivationOutcome {
    let entry = rows[index].clone();
    match entry.status() {
        SubscriptionStatus::Active => return ActivationOutcome::AlreadyActive(entry),
        SubscriptionStatus::Cancelled | SubscriptionStatus::Expired => {
            return ActivationOutcome::Inactive(entry);
        }
        SubscriptionStatus::Pending => {}
    }

    let mut superseded = Vec::new();
    if entry.is_subscription() {
        for row in rows.iter_mut() {
            if row.id != entry.id
                && row.user_id == entry.user_id
                && row.is_subscription()
                && row.status() == SubscriptionStatus::Active
            {
                row.status = SubscriptionStatus::Cancelled.to_string();
                row.cancelled_at = Some(now);
                row.updated_at = now;
                superseded.push(row.clone());
            }
        }
    }

    let row = &mut rows[index];
    row.status = SubscriptionStatus::Active.to_string();
    row.started_at = now;
    row.weekly_period_start = now;
    row.monthly_period_start = now;
    row.weekly_used = 0;
    row.monthly_used = 0;
    row.expired_at =
        usage_periods::expiry_after(row.plan_type(), row.billing_cycle(), row.duration_days, now);
    row.updated_at = now;

    ActivationOutcome::Activated {
        entry: row.clone(),
        superseded,
    }
}

fn cancel_at(rows: &mut [SubscriptionEntity], index: usize, now: DateTime<Utc>) -> CancelOutcome {
    let row = &mut rows[index];
    match row.status() {
        SubscriptionStatus::Pending | SubscriptionStatus::Active => {
            row.status = SubscriptionStatus::Cancelled.to_string();
            row.cancelled_at = Some(now);
            row.updated_at = now;
            CancelOutcome::Cancelled(row.clone())
        }
        _ => CancelOutcome::AlreadyInactive(row.clone()),
    }
}

fn position_by_correlation(rows: &[SubscriptionEntity], correlation_id: &str) -> Option<usize> {
    rows.iter()
        .position(|row| row.provider_correlation_id.as_deref() == Some(correlation_id))
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<SubscriptionEntity> {
        self.rows.lock().map(|rows| rows.clone()).unwrap_or_default()
    }

    pub fn active_subscriptions_for(&self, user_id: Uuid) -> usize {
        self.snapshot()
            .iter()
            .filter(|row| {
                row.user_id == user_id
                    && row.is_subscription()
                    && row.status() == SubscriptionStatus::Active
            })
            .count()
    }
}

#[async_trait]
impl SubscriptionRepository for InMemoryLedger {
    async fn create_pending(
        &self,
        user_id: Uuid,
        snapshot: PlanSnapshot,
        correlation_id: &str,
    ) -> LedgerResult<SubscriptionEntity> {
        let now = Utc::now();
        let mut rows = lock(&self.rows)?;
        let insert = InsertSubscriptionEntity::pending(
            user_id,
            &snapshot,
            correlation_id,
            Some(correlation_id),
            now,
        );
        let index = insert_row(&mut rows, insert, now)?;
        Ok(rows[index].clone())
    }

    async fn activate_by_correlation_id(
        &self,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> LedgerResult<ActivationOutcome> {
        let mut rows = lock(&self.rows)?;
        let index = position_by_correlation(&rows, correlation_id).ok_or(LedgerError::NotFound)?;
        Ok(activate_at(&mut rows, index, now))
    }

    async fn activate_checkout(
        &self,
        activation: CheckoutActivation,
        now: DateTime<Utc>,
    ) -> LedgerResult<ActivationOutcome> {
        let mut rows = lock(&self.rows)?;

        if let Some(index) = position_by_correlation(&rows, &activation.correlation_id) {
            return Ok(activate_at(&mut rows, index, now));
        }

        if let Some(session_id) = activation.checkout_session_id.as_deref() {
            if let Some(index) = rows
                .iter()
                .position(|row| row.checkout_session_id.as_deref() == Some(session_id))
            {
                rows[index].provider_correlation_id = Some(activation.correlation_id.clone());
                rows[index].updated_at = now;
                return Ok(activate_at(&mut rows, index, now));
            }
        }

        let insert = InsertSubscriptionEntity::pending(
            activation.user_id,
            &activation.snapshot,
            &activation.correlation_id,
            activation.checkout_session_id.as_deref(),
            now,
        );
        let index = insert_row(&mut rows, insert, now)?;
        Ok(activate_at(&mut rows, index, now))
    }

    async fn cancel_by_correlation_id(
        &self,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> LedgerResult<CancelOutcome> {
        let mut rows = lock(&self.rows)?;
        let index = position_by_correlation(&rows, correlation_id).ok_or(LedgerError::NotFound)?;
        Ok(cancel_at(&mut rows, index, now))
    }

    async fn cancel_by_id(&self, entry_id: Uuid, now: DateTime<Utc>) -> LedgerResult<CancelOutcome> {
        let mut rows = lock(&self.rows)?;
        let index = rows
            .iter()
            .position(|row| row.id == entry_id)
            .ok_or(LedgerError::NotFound)?;
        Ok(cancel_at(&mut rows, index, now))
    }

    async fn extend_period_by_correlation_id(
        &self,
        correlation_id: &str,
        period_end: DateTime<Utc>,
    ) -> LedgerResult<bool> {
        let mut rows = lock(&self.rows)?;
        let Some(row) = rows.iter_mut().find(|row| {
            row.provider_correlation_id.as_deref() == Some(correlation_id)
                && row.status() == SubscriptionStatus::Active
                && row.expired_at.is_some_and(|expiry| expiry < period_end)
        }) else {
            return Ok(false);
        };

        row.expired_at = Some(period_end);
        Ok(true)
    }

    async fn increment_usage(
        &self,
        entry_id: Uuid,
        kind: UsageKind,
        now: DateTime<Utc>,
    ) -> LedgerResult<SubscriptionEntity> {
        let mut rows = lock(&self.rows)?;
        let row = rows
            .iter_mut()
            .find(|row| row.id == entry_id)
            .ok_or(LedgerError::NotFound)?;

        if !row.is_live_at(now) {
            return Err(LedgerError::LimitExceeded);
        }

        match kind {
            UsageKind::Subscription => {
                if !row.is_subscription() {
                    return Err(LedgerError::LimitExceeded);
                }
                let weekly_start = usage_periods::weekly_period_start(row.started_at, now);
                let monthly_start = usage_periods::monthly_period_start(row.started_at, now);
                let weekly_used =
                    usage_periods::used_in_window(row.weekly_used, row.weekly_period_start, weekly_start);
                let monthly_used = usage_periods::used_in_window(
                    row.monthly_used,
                    row.monthly_period_start,
                    monthly_start,
                );
                if row.weekly_limit.is_some_and(|limit| weekly_used >= limit)
                    || row.monthly_limit.is_some_and(|limit| monthly_used >= limit)
                {
                    return Err(LedgerError::LimitExceeded);
                }

                row.weekly_used = weekly_used + 1;
                row.weekly_period_start = row.weekly_period_start.max(weekly_start);
                row.monthly_used = monthly_used + 1;
                row.monthly_period_start = row.monthly_period_start.max(monthly_start);
            }
            UsageKind::Credits => {
                if row.is_subscription() || row.remaining_credits() <= 0 {
                    return Err(LedgerError::LimitExceeded);
                }
                row.used_credits += 1;
            }
        }

        row.updated_at = now;
        Ok(row.clone())
    }

    async fn find_by_id(&self, entry_id: Uuid) -> LedgerResult<Option<SubscriptionEntity>> {
        let rows = lock(&self.rows)?;
        Ok(rows.iter().find(|row| row.id == entry_id).cloned())
    }

    async fn find_by_correlation_id(
        &self,
        correlation_id: &str,
    ) -> LedgerResult<Option<SubscriptionEntity>> {
        let rows = lock(&self.rows)?;
        Ok(position_by_correlation(&rows, correlation_id).map(|index| rows[index].clone()))
    }

    async fn list_active_for_user(&self, user_id: Uuid) -> LedgerResult<Vec<SubscriptionEntity>> {
        let rows = lock(&self.rows)?;
        let mut entries: Vec<_> = rows
            .iter()
            .filter(|row| row.user_id == user_id && row.status() == SubscriptionStatus::Active)
            .cloned()
            .collect();
        entries.sort_by_key(|row| (row.started_at, row.id));
        Ok(entries)
    }

    async fn expire_lapsed_for_user(&self, user_id: Uuid, now: DateTime<Utc>) -> LedgerResult<usize> {
        let mut rows = lock(&self.rows)?;
        let mut expired = 0;
        for row in rows.iter_mut().filter(|row| {
            row.user_id == user_id
                && !row.is_subscription()
                && row.status() == SubscriptionStatus::Active
                && row.expired_at.is_some_and(|expiry| expiry <= now)
        }) {
            row.status = SubscriptionStatus::Expired.to_string();
            row.updated_at = now;
            expired += 1;
        }
        Ok(expired)
    }

    async fn get_history_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> LedgerResult<(Vec<SubscriptionEntity>, i64)> {
        let rows = lock(&self.rows)?;
        let mut entries: Vec<_> = rows.iter().filter(|row| row.user_id == user_id).cloned().collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = entries.len() as i64;
        let page = entries
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }
}

#[derive(Default)]
pub struct PlanCatalog {
    plans: HashMap<Uuid, PlanEntity>,
}

impl PlanCatalog {
    pub fn with(plans: impl IntoIterator<Item = PlanEntity>) -> Self {
        Self {
            plans: plans.into_iter().map(|plan| (plan.id, plan)).collect(),
        }
    }
}

#[async_trait]
impl PlanRepository for PlanCatalog {
    async fn find_by_id(&self, plan_id: Uuid) -> AnyResult<Option<PlanEntity>> {
        Ok(self.plans.get(&plan_id).cloned())
    }

    async fn find_active_plan_by_id(&self, plan_id: Uuid) -> AnyResult<Option<PlanEntity>> {
        Ok(self.plans.get(&plan_id).filter(|plan| plan.is_active).cloned())
    }

    async fn list_active_plans(&self, plan_type: Option<PlanType>) -> AnyResult<Vec<PlanEntity>> {
        let mut plans: Vec<_> = self
            .plans
            .values()
            .filter(|plan| plan.is_active)
            .filter(|plan| plan_type.is_none_or(|wanted| plan.plan_type == wanted))
            .cloned()
            .collect();
        plans.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then(a.name.cmp(&b.name)));
        Ok(plans)
    }
}

pub const VALID_SIGNATURE: &str = "t=1,v1=valid";

/// Accepts only `VALID_SIGNATURE` and decodes the payload as a checkout
/// completion carrying the event's metadata.
#[derive(Default)]
pub struct FakeGateway {
    pub cancelled: Mutex<Vec<String>>,
    pub events: Mutex<Vec<ProviderEvent>>,
}

impl FakeGateway {
    pub fn with_event(event: ProviderEvent) -> Self {
        Self {
            cancelled: Mutex::new(Vec::new()),
            events: Mutex::new(vec![event]),
        }
    }

    pub fn cancelled_ids(&self) -> Vec<String> {
        self.cancelled.lock().map(|ids| ids.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_checkout_session(
        &self,
        _plan: &PlanEntity,
        _customer: &CheckoutCustomer,
        _mode: CheckoutMode,
    ) -> AnyResult<CheckoutSession> {
        let id = format!("cs_{}", Uuid::new_v4().simple());
        Ok(CheckoutSession {
            url: format!("https://checkout.stripe.com/c/{id}"),
            id,
        })
    }

    async fn cancel_subscription(&self, provider_subscription_id: &str) -> AnyResult<()> {
        self.cancelled
            .lock()
            .map_err(|_| anyhow!("gateway mutex poisoned"))?
            .push(provider_subscription_id.to_string());
        Ok(())
    }

    fn verify_webhook_signature(&self, _payload: &[u8], signature: &str) -> AnyResult<ProviderEvent> {
        if signature != VALID_SIGNATURE {
            return Err(anyhow!("no matching v1 signature"));
        }
        self.events
            .lock()
            .map_err(|_| anyhow!("gateway mutex poisoned"))?
            .pop()
            .ok_or_else(|| anyhow!("no event queued"))
    }
}

pub fn subscription_plan(weekly_limit: Option<i32>, monthly_limit: Option<i32>) -> PlanEntity {
    PlanEntity {
        id: Uuid::new_v4(),
        plan_type: PlanType::Subscription,
        name: "Creator".to_string(),
        price_minor: 1999,
        currency: "usd".to_string(),
        weekly_limit,
        monthly_limit,
        total_credits: None,
        duration_days: None,
        billing_cycle: Some(BillingCycle::Monthly),
        is_active: true,
        sort_order: 1,
        features: PlanFeatures::default(),
        stripe_price_id: None,
    }
}

pub fn package_plan(total_credits: i32, duration_days: i32) -> PlanEntity {
    PlanEntity {
        id: Uuid::new_v4(),
        plan_type: PlanType::Package,
        name: "Pack".to_string(),
        price_minor: 999,
        currency: "usd".to_string(),
        weekly_limit: None,
        monthly_limit: None,
        total_credits: Some(total_credits),
        duration_days: Some(duration_days),
        billing_cycle: None,
        is_active: true,
        sort_order: 2,
        features: PlanFeatures::default(),
        stripe_price_id: None,
    }
}

pub fn checkout_event(
    user_id: Uuid,
    plan: &PlanEntity,
    session_id: &str,
    subscription_id: Option<&str>,
) -> ProviderEvent {
    let mode = CheckoutMode::for_plan_type(plan.plan_type);
    ProviderEvent::CheckoutCompleted(CheckoutCompleted {
        event_id: Some(format!("evt_{}", Uuid::new_v4().simple())),
        session_id: Some(session_id.to_string()),
        mode: Some(mode.as_str().to_string()),
        subscription_id: subscription_id.map(str::to_string),
        metadata: HashMap::from([
            ("user_id".to_string(), user_id.to_string()),
            ("plan_id".to_string(), plan.id.to_string()),
            ("plan_type".to_string(), plan.plan_type.to_string()),
        ]),
    })
}
