//! Publishing-rights decision. Everything here is a pure function of the
//! ledger entries and `now`; usage windows that have rolled over are
//! recomputed instead of trusted.

use chrono::{DateTime, Utc};
use crates::domain::{
    entities::subscriptions::SubscriptionEntity,
    value_objects::{
        publishing_rights::{
            CreditSummary, PublishSource, PublishingRights, Quota, RestrictionReason, UsageStats,
        },
        subscriptions::LedgerEntryDto,
        usage_periods,
    },
};

/// Live entries split by source, in a canonical order so the result never
/// depends on how the caller ordered its input.
struct Standing<'a> {
    subscription: Option<&'a SubscriptionEntity>,
    /// Soonest-expiring first.
    packages: Vec<&'a SubscriptionEntity>,
    weekly: Option<Quota>,
    monthly: Option<Quota>,
    credits: CreditSummary,
}

impl<'a> Standing<'a> {
    fn new(entries: &'a [SubscriptionEntity], now: DateTime<Utc>) -> Self {
        let live = entries.iter().filter(|entry| entry.is_live_at(now));

        let (subscriptions, mut packages): (Vec<_>, Vec<_>) =
            live.partition(|entry| entry.is_subscription());

        // More than one live subscription should never be stored; if it is,
        // the newest one decides.
        let subscription = subscriptions
            .into_iter()
            .max_by_key(|entry| (entry.started_at, entry.id));

        packages.sort_by_key(|entry| {
            (
                entry.expired_at.is_none(),
                entry.expired_at,
                entry.started_at,
                entry.id,
            )
        });

        let weekly = subscription.map(|entry| {
            let window = usage_periods::weekly_period_start(entry.started_at, now);
            Quota::new(
                entry.weekly_limit,
                usage_periods::used_in_window(entry.weekly_used, entry.weekly_period_start, window),
            )
        });
        let monthly = subscription.map(|entry| {
            let window = usage_periods::monthly_period_start(entry.started_at, now);
            Quota::new(
                entry.monthly_limit,
                usage_periods::used_in_window(
                    entry.monthly_used,
                    entry.monthly_period_start,
                    window,
                ),
            )
        });

        let credits = packages
            .iter()
            .fold(CreditSummary::default(), |summary, entry| CreditSummary {
                total: summary.total + entry.total_credits.unwrap_or(0),
                used: summary.used + entry.used_credits,
                remaining: summary.remaining + entry.remaining_credits(),
            });

        Self {
            subscription,
            packages,
            weekly,
            monthly,
            credits,
        }
    }

    fn subscription_has_capacity(&self) -> bool {
        self.subscription.is_some()
            && self.weekly.is_none_or(|quota| quota.has_capacity())
            && self.monthly.is_none_or(|quota| quota.has_capacity())
    }

    fn next_source(&self) -> Option<PublishSource> {
        if let Some(subscription) = self.subscription.filter(|_| self.subscription_has_capacity()) {
            return Some(PublishSource::Subscription(subscription.id));
        }

        self.packages
            .iter()
            .find(|entry| entry.remaining_credits() > 0)
            .map(|entry| PublishSource::Package(entry.id))
    }

    /// Last exhausted source in the order weekly, monthly, credits.
    fn restriction_reason(&self) -> RestrictionReason {
        if self.subscription.is_none() && self.packages.is_empty() {
            return RestrictionReason::NoActivePlan;
        }

        let mut reason = RestrictionReason::NoActivePlan;
        if self.weekly.is_some_and(|quota| !quota.has_capacity()) {
            reason = RestrictionReason::WeeklyLimitReached;
        }
        if self.monthly.is_some_and(|quota| !quota.has_capacity()) {
            reason = RestrictionReason::MonthlyLimitReached;
        }
        if !self.packages.is_empty() && self.credits.remaining == 0 {
            reason = RestrictionReason::CreditsExhausted;
        }
        reason
    }
}

pub fn compute_rights(entries: &[SubscriptionEntity], now: DateTime<Utc>) -> PublishingRights {
    let standing = Standing::new(entries, now);
    let next_source = standing.next_source();
    let can_publish = next_source.is_some();

    PublishingRights {
        can_publish,
        weekly: standing.weekly,
        monthly: standing.monthly,
        credits: standing.credits,
        subscription: standing.subscription.map(LedgerEntryDto::from),
        packages: standing
            .packages
            .iter()
            .map(|entry| LedgerEntryDto::from(*entry))
            .collect(),
        restriction_reason: (!can_publish).then(|| standing.restriction_reason()),
        next_source,
    }
}

pub fn compute_usage_stats(entries: &[SubscriptionEntity], now: DateTime<Utc>) -> UsageStats {
    let standing = Standing::new(entries, now);

    UsageStats {
        can_publish: standing.next_source().is_some(),
        subscription_plan_name: standing
            .subscription
            .map(|entry| entry.plan_name.clone()),
        weekly: standing.weekly,
        monthly: standing.monthly,
        weekly_resets_at: standing
            .subscription
            .map(|entry| usage_periods::weekly_period_end(entry.started_at, now)),
        monthly_resets_at: standing
            .subscription
            .and_then(|entry| usage_periods::monthly_period_end(entry.started_at, now)),
        credits: standing.credits,
        active_package_count: standing.packages.len(),
        next_package_expiry: standing
            .packages
            .iter()
            .filter_map(|entry| entry.expired_at)
            .min(),
    }
}
