use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::value_objects::subscriptions::LedgerEntryDto;

/// Limit/used/remaining triple for one usage window. `limit = None` means the
/// window is unlimited, in which case `remaining` is `None` as well.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Quota {
    pub limit: Option<i32>,
    pub used: i32,
    pub remaining: Option<i32>,
}

impl Quota {
    pub fn new(limit: Option<i32>, used: i32) -> Self {
        Self {
            limit,
            used,
            remaining: limit.map(|limit| (limit - used).max(0)),
        }
    }

    pub fn has_capacity(&self) -> bool {
        self.remaining.is_none_or(|remaining| remaining > 0)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct CreditSummary {
    pub total: i32,
    pub used: i32,
    pub remaining: i32,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RestrictionReason {
    WeeklyLimitReached,
    MonthlyLimitReached,
    CreditsExhausted,
    NoActivePlan,
}

impl RestrictionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestrictionReason::WeeklyLimitReached => "weekly_limit_reached",
            RestrictionReason::MonthlyLimitReached => "monthly_limit_reached",
            RestrictionReason::CreditsExhausted => "credits_exhausted",
            RestrictionReason::NoActivePlan => "no_active_plan",
        }
    }
}

impl std::fmt::Display for RestrictionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ledger entry the next publish is charged to.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "entry_id", rename_all = "snake_case")]
pub enum PublishSource {
    Subscription(Uuid),
    Package(Uuid),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PublishingRights {
    pub can_publish: bool,
    pub weekly: Option<Quota>,
    pub monthly: Option<Quota>,
    pub credits: CreditSummary,
    pub subscription: Option<LedgerEntryDto>,
    pub packages: Vec<LedgerEntryDto>,
    pub restriction_reason: Option<RestrictionReason>,
    pub next_source: Option<PublishSource>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UsageStats {
    pub can_publish: bool,
    pub subscription_plan_name: Option<String>,
    pub weekly: Option<Quota>,
    pub monthly: Option<Quota>,
    pub weekly_resets_at: Option<DateTime<Utc>>,
    pub monthly_resets_at: Option<DateTime<Utc>>,
    pub credits: CreditSummary,
    pub active_package_count: usize,
    pub next_package_expiry: Option<DateTime<Utc>>,
}
