use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::entities::subscriptions::SubscriptionEntity;
use crate::domain::value_objects::enums::{
    billing_cycles::BillingCycle, plan_types::PlanType, subscription_statuses::SubscriptionStatus,
};

/// Buyer details forwarded to the payment provider's checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutCustomer {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub name: Option<String>,
}

/// Provider checkout session created for a purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LedgerEntryDto {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub plan_type: PlanType,
    pub plan_name: String,
    pub price_minor: i32,
    pub currency: String,
    pub status: SubscriptionStatus,
    pub weekly_limit: Option<i32>,
    pub monthly_limit: Option<i32>,
    pub weekly_used: i32,
    pub monthly_used: i32,
    pub total_credits: Option<i32>,
    pub used_credits: i32,
    pub billing_cycle: Option<BillingCycle>,
    pub started_at: DateTime<Utc>,
    pub expired_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&SubscriptionEntity> for LedgerEntryDto {
    fn from(value: &SubscriptionEntity) -> Self {
        Self {
            id: value.id,
            plan_id: value.plan_id,
            plan_type: value.plan_type(),
            plan_name: value.plan_name.clone(),
            price_minor: value.price_minor,
            currency: value.currency.clone(),
            status: value.status(),
            weekly_limit: value.weekly_limit,
            monthly_limit: value.monthly_limit,
            weekly_used: value.weekly_used,
            monthly_used: value.monthly_used,
            total_credits: value.total_credits,
            used_credits: value.used_credits,
            billing_cycle: value.billing_cycle(),
            started_at: value.started_at,
            expired_at: value.expired_at,
            cancelled_at: value.cancelled_at,
            created_at: value.created_at,
        }
    }
}

impl From<SubscriptionEntity> for LedgerEntryDto {
    fn from(value: SubscriptionEntity) -> Self {
        Self::from(&value)
    }
}

#[derive(Debug, Serialize)]
pub struct SubscriptionHistoryDto {
    pub entries: Vec<LedgerEntryDto>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    pub plan_id: Uuid,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CheckoutSessionDto {
    pub entry_id: Uuid,
    pub session_id: String,
    pub checkout_url: String,
}
