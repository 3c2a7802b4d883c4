//! Usage windows are anchored at an entry's `started_at` and derived from the
//! current time on every read, so no scheduled reset job exists.

use chrono::{DateTime, Datelike, Duration, Months, Utc};

use crate::domain::value_objects::enums::{billing_cycles::BillingCycle, plan_types::PlanType};

pub const DAYS_PER_WEEK: i64 = 7;

/// Start of the weekly window containing `now`.
pub fn weekly_period_start(anchor: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if now <= anchor {
        return anchor;
    }
    let weeks = (now - anchor).num_days() / DAYS_PER_WEEK;
    anchor + Duration::days(weeks * DAYS_PER_WEEK)
}

pub fn weekly_period_end(anchor: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    weekly_period_start(anchor, now) + Duration::days(DAYS_PER_WEEK)
}

/// Start of the monthly window containing `now`. Month ends clamp the way
/// chrono does, so an entry started on Jan 31 rolls over on Feb 28/29.
pub fn monthly_period_start(anchor: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    let months = whole_months_elapsed(anchor, now);
    add_months(anchor, months).unwrap_or(anchor)
}

pub fn monthly_period_end(anchor: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let months = whole_months_elapsed(anchor, now);
    add_months(anchor, months + 1)
}

pub fn add_months(anchor: DateTime<Utc>, months: u32) -> Option<DateTime<Utc>> {
    anchor.checked_add_months(Months::new(months))
}

fn whole_months_elapsed(anchor: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
    if now <= anchor {
        return 0;
    }
    let mut months = (now.year() - anchor.year()) * 12 + now.month() as i32 - anchor.month() as i32;
    while months > 0 {
        match add_months(anchor, months as u32) {
            Some(candidate) if candidate <= now => return months as u32,
            _ => months -= 1,
        }
    }
    0
}

/// A stored counter only counts while it belongs to the current window.
pub fn used_in_window(
    stored_used: i32,
    stored_window_start: DateTime<Utc>,
    current_window_start: DateTime<Utc>,
) -> i32 {
    if stored_window_start < current_window_start {
        0
    } else {
        stored_used
    }
}

/// Expiry instant of an entry activated at `started_at`.
pub fn expiry_after(
    plan_type: PlanType,
    billing_cycle: Option<BillingCycle>,
    duration_days: Option<i32>,
    started_at: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match plan_type {
        PlanType::Package => {
            duration_days.map(|days| started_at + Duration::days(i64::from(days)))
        }
        PlanType::Subscription => match billing_cycle? {
            BillingCycle::Weekly => Some(started_at + Duration::days(DAYS_PER_WEEK)),
            BillingCycle::Monthly => add_months(started_at, 1),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn weekly_window_rolls_every_seven_days() {
        let anchor = at(2026, 3, 2);
        assert_eq!(weekly_period_start(anchor, at(2026, 3, 8)), anchor);
        assert_eq!(weekly_period_start(anchor, at(2026, 3, 10)), at(2026, 3, 9));
        assert_eq!(weekly_period_end(anchor, at(2026, 3, 10)), at(2026, 3, 16));
    }

    #[test]
    fn window_before_anchor_is_the_anchor() {
        let anchor = at(2026, 3, 2);
        assert_eq!(weekly_period_start(anchor, at(2026, 3, 1)), anchor);
        assert_eq!(monthly_period_start(anchor, at(2026, 3, 1)), anchor);
    }

    #[test]
    fn monthly_window_clamps_month_end() {
        let anchor = at(2026, 1, 31);
        assert_eq!(monthly_period_start(anchor, at(2026, 2, 27)), anchor);
        assert_eq!(monthly_period_start(anchor, at(2026, 3, 1)), at(2026, 2, 28));
        assert_eq!(monthly_period_end(anchor, at(2026, 3, 1)), Some(at(2026, 3, 31)));
    }

    #[test]
    fn monthly_window_does_not_roll_before_anchor_time_of_day() {
        let anchor = at(2026, 1, 15);
        let just_before = Utc.with_ymd_and_hms(2026, 2, 15, 11, 59, 59).unwrap();
        assert_eq!(monthly_period_start(anchor, just_before), anchor);
        assert_eq!(monthly_period_start(anchor, at(2026, 2, 15)), at(2026, 2, 15));
    }

    #[test]
    fn stale_counter_reads_as_zero() {
        assert_eq!(used_in_window(3, at(2026, 3, 2), at(2026, 3, 9)), 0);
        assert_eq!(used_in_window(3, at(2026, 3, 9), at(2026, 3, 9)), 3);
    }

    #[test]
    fn expiry_follows_plan_terms() {
        let start = at(2026, 1, 31);
        assert_eq!(
            expiry_after(PlanType::Package, None, Some(30), start),
            Some(at(2026, 3, 2))
        );
        assert_eq!(
            expiry_after(PlanType::Subscription, Some(BillingCycle::Monthly), None, start),
            Some(at(2026, 2, 28))
        );
        assert_eq!(
            expiry_after(PlanType::Subscription, Some(BillingCycle::Weekly), None, start),
            Some(at(2026, 2, 7))
        );
        assert_eq!(expiry_after(PlanType::Subscription, None, None, start), None);
    }
}
