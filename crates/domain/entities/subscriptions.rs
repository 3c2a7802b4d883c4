use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::{
    domain::value_objects::{
        enums::{
            billing_cycles::BillingCycle, plan_types::PlanType,
            subscription_statuses::SubscriptionStatus,
        },
        plans::PlanSnapshot,
    },
    infra::db::postgres::schema::subscriptions,
};

/// One ledger entry: a user's purchased instance of a subscription or package
/// plan, carrying its own copy of the plan terms.
#[derive(Debug, Clone, PartialEq, Eq, Identifiable, Selectable, Queryable, QueryableByName)]
#[diesel(table_name = subscriptions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SubscriptionEntity {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub plan_type: String,
    pub plan_name: String,
    pub price_minor: i32,
    pub currency: String,
    pub weekly_limit: Option<i32>,
    pub monthly_limit: Option<i32>,
    pub total_credits: Option<i32>,
    pub duration_days: Option<i32>,
    pub billing_cycle: Option<String>,
    pub used_credits: i32,
    pub weekly_used: i32,
    pub monthly_used: i32,
    pub weekly_period_start: DateTime<Utc>,
    pub monthly_period_start: DateTime<Utc>,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub expired_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub provider_correlation_id: Option<String>,
    pub checkout_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionEntity {
    pub fn status(&self) -> SubscriptionStatus {
        SubscriptionStatus::from_str(&self.status)
    }

    /// Unknown plan types are treated as packages, which never satisfy the
    /// single-active-subscription lookups.
    pub fn plan_type(&self) -> PlanType {
        PlanType::from_str(&self.plan_type).unwrap_or(PlanType::Package)
    }

    pub fn billing_cycle(&self) -> Option<BillingCycle> {
        self.billing_cycle.as_deref().and_then(BillingCycle::from_str)
    }

    pub fn is_subscription(&self) -> bool {
        self.plan_type() == PlanType::Subscription
    }

    /// Active and not yet past its expiry instant.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.status() == SubscriptionStatus::Active
            && self.expired_at.is_none_or(|expired_at| expired_at > now)
    }

    pub fn remaining_credits(&self) -> i32 {
        self.total_credits
            .map(|total| (total - self.used_credits).max(0))
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = subscriptions)]
pub struct InsertSubscriptionEntity {
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub plan_type: String,
    pub plan_name: String,
    pub price_minor: i32,
    pub currency: String,
    pub weekly_limit: Option<i32>,
    pub monthly_limit: Option<i32>,
    pub total_credits: Option<i32>,
    pub duration_days: Option<i32>,
    pub billing_cycle: Option<String>,
    pub used_credits: i32,
    pub weekly_used: i32,
    pub monthly_used: i32,
    pub weekly_period_start: DateTime<Utc>,
    pub monthly_period_start: DateTime<Utc>,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub expired_at: Option<DateTime<Utc>>,
    pub provider_correlation_id: Option<String>,
    pub checkout_session_id: Option<String>,
}

impl InsertSubscriptionEntity {
    pub fn pending(
        user_id: Uuid,
        snapshot: &PlanSnapshot,
        correlation_id: &str,
        checkout_session_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            plan_id: snapshot.plan_id,
            plan_type: snapshot.plan_type.to_string(),
            plan_name: snapshot.name.clone(),
            price_minor: snapshot.price_minor,
            currency: snapshot.currency.clone(),
            weekly_limit: snapshot.weekly_limit,
            monthly_limit: snapshot.monthly_limit,
            total_credits: snapshot.total_credits,
            duration_days: snapshot.duration_days,
            billing_cycle: snapshot.billing_cycle.map(|cycle| cycle.to_string()),
            used_credits: 0,
            weekly_used: 0,
            monthly_used: 0,
            weekly_period_start: now,
            monthly_period_start: now,
            status: SubscriptionStatus::Pending.to_string(),
            started_at: now,
            expired_at: None,
            provider_correlation_id: Some(correlation_id.to_string()),
            checkout_session_id: checkout_session_id.map(str::to_string),
        }
    }
}
