use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::entities::plans::PlanEntity;
use crate::domain::value_objects::enums::{billing_cycles::BillingCycle, plan_types::PlanType};

/// Marketing metadata attached to a plan. Stored as JSONB in the database.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct PlanFeatures {
    #[serde(default)]
    pub features: Vec<String>,

    #[serde(default)]
    pub popular: bool,
}

/// Plan terms copied into a ledger entry at purchase time. Later edits to the
/// plan never change an entry that already exists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanSnapshot {
    pub plan_id: Uuid,
    pub plan_type: PlanType,
    pub name: String,
    pub price_minor: i32,
    pub currency: String,
    pub weekly_limit: Option<i32>,
    pub monthly_limit: Option<i32>,
    pub total_credits: Option<i32>,
    pub duration_days: Option<i32>,
    pub billing_cycle: Option<BillingCycle>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlanDto {
    pub id: Uuid,
    pub plan_type: PlanType,
    pub name: String,
    pub price_minor: i32,
    pub currency: String,
    pub weekly_limit: Option<i32>,
    pub monthly_limit: Option<i32>,
    pub total_credits: Option<i32>,
    pub duration_days: Option<i32>,
    pub billing_cycle: Option<BillingCycle>,
    pub sort_order: i32,
    pub features: PlanFeatures,
}

impl From<PlanEntity> for PlanDto {
    fn from(value: PlanEntity) -> Self {
        Self {
            id: value.id,
            plan_type: value.plan_type,
            name: value.name,
            price_minor: value.price_minor,
            currency: value.currency,
            weekly_limit: value.weekly_limit,
            monthly_limit: value.monthly_limit,
            total_credits: value.total_credits,
            duration_days: value.duration_days,
            billing_cycle: value.billing_cycle,
            sort_order: value.sort_order,
            features: value.features,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListPlansQuery {
    #[serde(rename = "type")]
    pub plan_type: Option<PlanType>,
}
