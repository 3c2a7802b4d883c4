use anyhow::anyhow;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    domain::value_objects::{
        enums::{billing_cycles::BillingCycle, plan_types::PlanType},
        plans::{PlanFeatures, PlanSnapshot},
    },
    infra::db::postgres::schema::plans,
};

#[derive(Debug, Clone, PartialEq)]
pub struct PlanEntity {
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
    pub is_active: bool,
    pub sort_order: i32,
    pub features: PlanFeatures,
    pub stripe_price_id: Option<String>,
}

/// Raw row used for Diesel queries. Text enums and JSON features are parsed
/// into `PlanEntity`.
#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = plans)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PlanRow {
    pub id: Uuid,
    pub plan_type: String,
    pub name: String,
    pub price_minor: i32,
    pub currency: String,
    pub weekly_limit: Option<i32>,
    pub monthly_limit: Option<i32>,
    pub total_credits: Option<i32>,
    pub duration_days: Option<i32>,
    pub billing_cycle: Option<String>,
    pub is_active: bool,
    pub sort_order: i32,
    pub features: serde_json::Value,
    pub stripe_price_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PlanRow> for PlanEntity {
    type Error = anyhow::Error;

    fn try_from(value: PlanRow) -> Result<Self, Self::Error> {
        let plan_type = PlanType::from_str(&value.plan_type)
            .ok_or_else(|| anyhow!("plan {} has unknown type {:?}", value.id, value.plan_type))?;
        let billing_cycle = match value.billing_cycle.as_deref() {
            Some(raw) => Some(BillingCycle::from_str(raw).ok_or_else(|| {
                anyhow!("plan {} has unknown billing cycle {:?}", value.id, raw)
            })?),
            None => None,
        };
        let features = serde_json::from_value(value.features).unwrap_or_default();

        Ok(Self {
            id: value.id,
            plan_type,
            name: value.name,
            price_minor: value.price_minor,
            currency: value.currency,
            weekly_limit: value.weekly_limit,
            monthly_limit: value.monthly_limit,
            total_credits: value.total_credits,
            duration_days: value.duration_days,
            billing_cycle,
            is_active: value.is_active,
            sort_order: value.sort_order,
            features,
            stripe_price_id: value.stripe_price_id,
        })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanDefinitionError {
    #[error("package plan {0} has no total_credits")]
    MissingCredits(Uuid),
    #[error("package plan {0} has no duration_days")]
    MissingDuration(Uuid),
    #[error("plan {plan_id} has a non-positive {field}")]
    NonPositive { plan_id: Uuid, field: &'static str },
    #[error("plan {plan_id} has a negative {field}")]
    Negative { plan_id: Uuid, field: &'static str },
}

impl PlanEntity {
    /// Validates the plan terms and copies them for a new ledger entry.
    pub fn snapshot(&self) -> Result<PlanSnapshot, PlanDefinitionError> {
        for (field, value) in [
            ("weekly_limit", self.weekly_limit),
            ("monthly_limit", self.monthly_limit),
            ("price_minor", Some(self.price_minor)),
        ] {
            if value.is_some_and(|v| v < 0) {
                return Err(PlanDefinitionError::Negative {
                    plan_id: self.id,
                    field,
                });
            }
        }

        if self.plan_type == PlanType::Package {
            let credits = self
                .total_credits
                .ok_or(PlanDefinitionError::MissingCredits(self.id))?;
            let days = self
                .duration_days
                .ok_or(PlanDefinitionError::MissingDuration(self.id))?;
            if credits <= 0 {
                return Err(PlanDefinitionError::NonPositive {
                    plan_id: self.id,
                    field: "total_credits",
                });
            }
            if days <= 0 {
                return Err(PlanDefinitionError::NonPositive {
                    plan_id: self.id,
                    field: "duration_days",
                });
            }
        }

        Ok(PlanSnapshot {
            plan_id: self.id,
            plan_type: self.plan_type,
            name: self.name.clone(),
            price_minor: self.price_minor,
            currency: self.currency.clone(),
            weekly_limit: self.weekly_limit,
            monthly_limit: self.monthly_limit,
            total_credits: self.total_credits,
            duration_days: self.duration_days,
            billing_cycle: self.billing_cycle,
        })
    }
}
