use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::{
    PgConnection, RunQueryDsl, insert_into,
    prelude::*,
    r2d2::{ConnectionManager, PooledConnection},
    result::{DatabaseErrorKind, Error as DieselError},
    sql_types::{Timestamptz, Uuid as SqlUuid},
    update,
};
use std::sync::Arc;
use tokio::task;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    domain,
    infra::db::postgres::{postgres_connection::PgPoolSquad, schema::subscriptions},
};
use domain::{
    entities::subscriptions::{InsertSubscriptionEntity, SubscriptionEntity},
    repositories::subscriptions::{
        ActivationOutcome, CancelOutcome, CheckoutActivation, LedgerError, LedgerResult,
        SubscriptionRepository,
    },
    value_objects::{
        enums::{
            plan_types::PlanType, subscription_statuses::SubscriptionStatus,
            usage_kinds::UsageKind,
        },
        plans::PlanSnapshot,
        usage_periods,
    },
};

const CORRELATION_KEY: &str = "subscriptions_provider_correlation_id_key";
const CHECKOUT_SESSION_KEY: &str = "subscriptions_checkout_session_id_key";
const ONE_ACTIVE_INDEX: &str = "subscriptions_one_active_per_user";

/// Two activations for the same user can race past the row locks when
/// neither sees the other's uncommitted row; the loser retries once and then
/// supersedes the winner.
const ACTIVATION_ATTEMPTS: usize = 2;

const INCREMENT_SUBSCRIPTION_USAGE: &str = r#"
UPDATE subscriptions SET
    weekly_used = CASE WHEN weekly_period_start < $2 THEN 1 ELSE weekly_used + 1 END,
    weekly_period_start = GREATEST(weekly_period_start, $2),
    monthly_used = CASE WHEN monthly_period_start < $3 THEN 1 ELSE monthly_used + 1 END,
    monthly_period_start = GREATEST(monthly_period_start, $3),
    updated_at = $4
WHERE id = $1
  AND status = 'active'
  AND plan_type = 'subscription'
  AND (expired_at IS NULL OR expired_at > $4)
  AND (weekly_limit IS NULL
       OR (CASE WHEN weekly_period_start < $2 THEN 0 ELSE weekly_used END) < weekly_limit)
  AND (monthly_limit IS NULL
       OR (CASE WHEN monthly_period_start < $3 THEN 0 ELSE monthly_used END) < monthly_limit)
RETURNING *
"#;

type PgPooled = PooledConnection<ConnectionManager<PgConnection>>;

fn violated_constraint(err: &DieselError) -> Option<&str> {
    match err {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
            info.constraint_name()
        }
        _ => None,
    }
}

impl From<DieselError> for LedgerError {
    fn from(err: DieselError) -> Self {
        let duplicate = matches!(
            violated_constraint(&err),
            Some(CORRELATION_KEY | CHECKOUT_SESSION_KEY)
        );
        if duplicate {
            return LedgerError::DuplicateCorrelation;
        }

        match err {
            DieselError::NotFound => LedgerError::NotFound,
            other => LedgerError::Internal(other.into()),
        }
    }
}

pub struct SubscriptionPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl SubscriptionPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }

    fn connection(&self) -> LedgerResult<PgPooled> {
        Arc::clone(&self.db_pool)
            .get()
            .map_err(|err| LedgerError::Internal(err.into()))
    }

    /// Runs an activation transaction on the blocking pool, since diesel is
    /// synchronous and the transaction holds row locks for its whole body.
    async fn run_activation<F>(&self, mut activation: F) -> LedgerResult<ActivationOutcome>
    where
        F: FnMut(&mut PgConnection) -> QueryResult<ActivationOutcome> + Send + 'static,
    {
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> LedgerResult<ActivationOutcome> {
            let mut pooled = db_pool
                .get()
                .map_err(|err| LedgerError::Internal(err.into()))?;
            let conn: &mut PgConnection = &mut pooled;

            let mut attempt = 1;
            loop {
                match conn.transaction(|tx| activation(tx)) {
                    Err(err)
                        if attempt < ACTIVATION_ATTEMPTS
                            && violated_constraint(&err) == Some(ONE_ACTIVE_INDEX) =>
                    {
                        warn!(attempt, "subscriptions: concurrent activation for one user, retrying");
                        attempt += 1;
                    }
                    result => return result.map_err(LedgerError::from),
                }
            }
        })
        .await
        .map_err(|err| LedgerError::Internal(err.into()))?
    }
}

fn find_locked_by_correlation(
    conn: &mut PgConnection,
    correlation_id: &str,
) -> QueryResult<Option<SubscriptionEntity>> {
    subscriptions::table
        .filter(subscriptions::provider_correlation_id.eq(correlation_id))
        .select(SubscriptionEntity::as_select())
        .for_update()
        .first::<SubscriptionEntity>(conn)
        .optional()
}

fn find_locked_by_checkout_session(
    conn: &mut PgConnection,
    checkout_session_id: &str,
) -> QueryResult<Option<SubscriptionEntity>> {
    subscriptions::table
        .filter(subscriptions::checkout_session_id.eq(checkout_session_id))
        .select(SubscriptionEntity::as_select())
        .for_update()
        .first::<SubscriptionEntity>(conn)
        .optional()
}

/// Activates a row the caller already holds a lock on. A subscription-type
/// entry cancels the user's other active subscriptions first.
fn activate_locked(
    conn: &mut PgConnection,
    entry: SubscriptionEntity,
    now: DateTime<Utc>,
) -> QueryResult<ActivationOutcome> {
    match entry.status() {
        SubscriptionStatus::Active => return Ok(ActivationOutcome::AlreadyActive(entry)),
        SubscriptionStatus::Cancelled | SubscriptionStatus::Expired => {
            return Ok(ActivationOutcome::Inactive(entry));
        }
        SubscriptionStatus::Pending => {}
    }

    let mut superseded = Vec::new();
    if entry.is_subscription() {
        let other_ids = subscriptions::table
            .filter(subscriptions::user_id.eq(entry.user_id))
            .filter(subscriptions::status.eq(SubscriptionStatus::Active.as_str()))
            .filter(subscriptions::plan_type.eq(PlanType::Subscription.as_str()))
            .filter(subscriptions::id.ne(entry.id))
            .select(subscriptions::id)
            .for_update()
            .load::<Uuid>(conn)?;

        if !other_ids.is_empty() {
            superseded = update(subscriptions::table.filter(subscriptions::id.eq_any(other_ids)))
                .set((
                    subscriptions::status.eq(SubscriptionStatus::Cancelled.as_str()),
                    subscriptions::cancelled_at.eq(Some(now)),
                    subscriptions::updated_at.eq(now),
                ))
                .returning(SubscriptionEntity::as_returning())
                .get_results::<SubscriptionEntity>(conn)?;
        }
    }

    let expires_at = usage_periods::expiry_after(
        entry.plan_type(),
        entry.billing_cycle(),
        entry.duration_days,
        now,
    );

    let activated = update(
        subscriptions::table
            .filter(subscriptions::id.eq(entry.id))
            .filter(subscriptions::status.eq(SubscriptionStatus::Pending.as_str())),
    )
    .set((
        subscriptions::status.eq(SubscriptionStatus::Active.as_str()),
        subscriptions::started_at.eq(now),
        subscriptions::weekly_period_start.eq(now),
        subscriptions::monthly_period_start.eq(now),
        subscriptions::weekly_used.eq(0),
        subscriptions::monthly_used.eq(0),
        subscriptions::expired_at.eq(expires_at),
        subscriptions::updated_at.eq(now),
    ))
    .returning(SubscriptionEntity::as_returning())
    .get_result::<SubscriptionEntity>(conn)?;

    Ok(ActivationOutcome::Activated {
        entry: activated,
        superseded,
    })
}

fn rekey_to_correlation(
    conn: &mut PgConnection,
    entry_id: Uuid,
    correlation_id: &str,
    now: DateTime<Utc>,
) -> QueryResult<SubscriptionEntity> {
    update(subscriptions::table.filter(subscriptions::id.eq(entry_id)))
        .set((
            subscriptions::provider_correlation_id.eq(correlation_id),
            subscriptions::updated_at.eq(now),
        ))
        .returning(SubscriptionEntity::as_returning())
        .get_result::<SubscriptionEntity>(conn)
}

fn insert_from_checkout(
    conn: &mut PgConnection,
    user_id: Uuid,
    snapshot: &PlanSnapshot,
    correlation_id: &str,
    checkout_session_id: Option<&str>,
    now: DateTime<Utc>,
) -> QueryResult<SubscriptionEntity> {
    let insert_entity = InsertSubscriptionEntity::pending(
        user_id,
        snapshot,
        correlation_id,
        checkout_session_id,
        now,
    );

    insert_into(subscriptions::table)
        .values(&insert_entity)
        .returning(SubscriptionEntity::as_returning())
        .get_result::<SubscriptionEntity>(conn)
}

fn cancellable_statuses() -> [&'static str; 2] {
    [
        SubscriptionStatus::Pending.as_str(),
        SubscriptionStatus::Active.as_str(),
    ]
}

#[async_trait]
impl SubscriptionRepository for SubscriptionPostgres {
    async fn create_pending(
        &self,
        user_id: Uuid,
        snapshot: PlanSnapshot,
        correlation_id: &str,
    ) -> LedgerResult<SubscriptionEntity> {
        let mut conn = self.connection()?;

        let entry = insert_from_checkout(
            &mut conn,
            user_id,
            &snapshot,
            correlation_id,
            Some(correlation_id),
            Utc::now(),
        )?;

        Ok(entry)
    }

    async fn activate_by_correlation_id(
        &self,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> LedgerResult<ActivationOutcome> {
        let correlation_id = correlation_id.to_owned();

        self.run_activation(move |conn| {
            let entry =
                find_locked_by_correlation(conn, &correlation_id)?.ok_or(DieselError::NotFound)?;
            activate_locked(conn, entry, now)
        })
        .await
    }

    async fn activate_checkout(
        &self,
        activation: CheckoutActivation,
        now: DateTime<Utc>,
    ) -> LedgerResult<ActivationOutcome> {
        let CheckoutActivation {
            checkout_session_id,
            correlation_id,
            user_id,
            snapshot,
        } = activation;

        let correlation_key = correlation_id.clone();
        let result = self
            .run_activation(move |conn| {
                if let Some(entry) = find_locked_by_correlation(conn, &correlation_key)? {
                    return activate_locked(conn, entry, now);
                }

                if let Some(session_id) = checkout_session_id.as_deref() {
                    if let Some(entry) = find_locked_by_checkout_session(conn, session_id)? {
                        let entry = rekey_to_correlation(conn, entry.id, &correlation_key, now)?;
                        return activate_locked(conn, entry, now);
                    }
                }

                let entry = insert_from_checkout(
                    conn,
                    user_id,
                    &snapshot,
                    &correlation_key,
                    checkout_session_id.as_deref(),
                    now,
                )?;
                activate_locked(conn, entry, now)
            })
            .await;

        match result {
            Err(LedgerError::DuplicateCorrelation) => {
                info!(
                    %correlation_id,
                    "subscriptions: concurrent checkout activation won elsewhere, re-reading"
                );
                self.activate_by_correlation_id(&correlation_id, now).await
            }
            other => other,
        }
    }

    async fn cancel_by_correlation_id(
        &self,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> LedgerResult<CancelOutcome> {
        let mut conn = self.connection()?;

        let cancelled = update(
            subscriptions::table
                .filter(subscriptions::provider_correlation_id.eq(correlation_id))
                .filter(subscriptions::status.eq_any(cancellable_statuses())),
        )
        .set((
            subscriptions::status.eq(SubscriptionStatus::Cancelled.as_str()),
            subscriptions::cancelled_at.eq(Some(now)),
            subscriptions::updated_at.eq(now),
        ))
        .returning(SubscriptionEntity::as_returning())
        .get_result::<SubscriptionEntity>(&mut conn)
        .optional()?;

        if let Some(entry) = cancelled {
            return Ok(CancelOutcome::Cancelled(entry));
        }

        subscriptions::table
            .filter(subscriptions::provider_correlation_id.eq(correlation_id))
            .select(SubscriptionEntity::as_select())
            .first::<SubscriptionEntity>(&mut conn)
            .optional()?
            .map(CancelOutcome::AlreadyInactive)
            .ok_or(LedgerError::NotFound)
    }

    async fn cancel_by_id(&self, entry_id: Uuid, now: DateTime<Utc>) -> LedgerResult<CancelOutcome> {
        let mut conn = self.connection()?;

        let cancelled = update(
            subscriptions::table
                .filter(subscriptions::id.eq(entry_id))
                .filter(subscriptions::status.eq_any(cancellable_statuses())),
        )
        .set((
            subscriptions::status.eq(SubscriptionStatus::Cancelled.as_str()),
            subscriptions::cancelled_at.eq(Some(now)),
            subscriptions::updated_at.eq(now),
        ))
        .returning(SubscriptionEntity::as_returning())
        .get_result::<SubscriptionEntity>(&mut conn)
        .optional()?;

        if let Some(entry) = cancelled {
            return Ok(CancelOutcome::Cancelled(entry));
        }

        subscriptions::table
            .find(entry_id)
            .select(SubscriptionEntity::as_select())
            .first::<SubscriptionEntity>(&mut conn)
            .optional()?
            .map(CancelOutcome::AlreadyInactive)
            .ok_or(LedgerError::NotFound)
    }

    async fn extend_period_by_correlation_id(
        &self,
        correlation_id: &str,
        period_end: DateTime<Utc>,
    ) -> LedgerResult<bool> {
        let mut conn = self.connection()?;

        let updated = update(
            subscriptions::table
                .filter(subscriptions::provider_correlation_id.eq(correlation_id))
                .filter(subscriptions::status.eq(SubscriptionStatus::Active.as_str()))
                .filter(subscriptions::expired_at.lt(period_end)),
        )
        .set((
            subscriptions::expired_at.eq(Some(period_end)),
            subscriptions::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)?;

        Ok(updated > 0)
    }

    async fn increment_usage(
        &self,
        entry_id: Uuid,
        kind: UsageKind,
        now: DateTime<Utc>,
    ) -> LedgerResult<SubscriptionEntity> {
        let mut conn = self.connection()?;

        let entry = subscriptions::table
            .find(entry_id)
            .select(SubscriptionEntity::as_select())
            .first::<SubscriptionEntity>(&mut conn)
            .optional()?
            .ok_or(LedgerError::NotFound)?;

        let updated = match kind {
            UsageKind::Subscription => {
                let weekly_start = usage_periods::weekly_period_start(entry.started_at, now);
                let monthly_start = usage_periods::monthly_period_start(entry.started_at, now);

                diesel::sql_query(INCREMENT_SUBSCRIPTION_USAGE)
                    .bind::<SqlUuid, _>(entry_id)
                    .bind::<Timestamptz, _>(weekly_start)
                    .bind::<Timestamptz, _>(monthly_start)
                    .bind::<Timestamptz, _>(now)
                    .get_result::<SubscriptionEntity>(&mut conn)
                    .optional()?
            }
            UsageKind::Credits => update(
                subscriptions::table
                    .filter(subscriptions::id.eq(entry_id))
                    .filter(subscriptions::status.eq(SubscriptionStatus::Active.as_str()))
                    .filter(subscriptions::plan_type.eq(PlanType::Package.as_str()))
                    .filter(
                        subscriptions::expired_at
                            .is_null()
                            .or(subscriptions::expired_at.gt(now)),
                    )
                    .filter(
                        subscriptions::used_credits
                            .nullable()
                            .lt(subscriptions::total_credits),
                    ),
            )
            .set((
                subscriptions::used_credits.eq(subscriptions::used_credits + 1),
                subscriptions::updated_at.eq(now),
            ))
            .returning(SubscriptionEntity::as_returning())
            .get_result::<SubscriptionEntity>(&mut conn)
            .optional()?,
        };

        updated.ok_or(LedgerError::LimitExceeded)
    }

    async fn find_by_id(&self, entry_id: Uuid) -> LedgerResult<Option<SubscriptionEntity>> {
        let mut conn = self.connection()?;

        let entry = subscriptions::table
            .find(entry_id)
            .select(SubscriptionEntity::as_select())
            .first::<SubscriptionEntity>(&mut conn)
            .optional()?;

        Ok(entry)
    }

    async fn find_by_correlation_id(
        &self,
        correlation_id: &str,
    ) -> LedgerResult<Option<SubscriptionEntity>> {
        let mut conn = self.connection()?;

        let entry = subscriptions::table
            .filter(subscriptions::provider_correlation_id.eq(correlation_id))
            .select(SubscriptionEntity::as_select())
            .first::<SubscriptionEntity>(&mut conn)
            .optional()?;

        Ok(entry)
    }

    async fn list_active_for_user(&self, user_id: Uuid) -> LedgerResult<Vec<SubscriptionEntity>> {
        let mut conn = self.connection()?;

        let entries = subscriptions::table
            .filter(subscriptions::user_id.eq(user_id))
            .filter(subscriptions::status.eq(SubscriptionStatus::Active.as_str()))
            .order((subscriptions::started_at.asc(), subscriptions::id.asc()))
            .select(SubscriptionEntity::as_select())
            .load::<SubscriptionEntity>(&mut conn)?;

        Ok(entries)
    }

    async fn expire_lapsed_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> LedgerResult<usize> {
        let mut conn = self.connection()?;

        let expired = update(
            subscriptions::table
                .filter(subscriptions::user_id.eq(user_id))
                .filter(subscriptions::status.eq(SubscriptionStatus::Active.as_str()))
                .filter(subscriptions::plan_type.eq(PlanType::Package.as_str()))
                .filter(subscriptions::expired_at.le(now)),
        )
        .set((
            subscriptions::status.eq(SubscriptionStatus::Expired.as_str()),
            subscriptions::updated_at.eq(now),
        ))
        .execute(&mut conn)?;

        if expired > 0 {
            info!(%user_id, expired, "subscriptions: lapsed entries marked expired");
        }

        Ok(expired)
    }

    async fn get_history_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> LedgerResult<(Vec<SubscriptionEntity>, i64)> {
        if limit <= 0 || offset < 0 {
            return Err(LedgerError::Internal(anyhow!(
                "invalid history window limit={limit} offset={offset}"
            )));
        }

        let mut conn = self.connection()?;

        let total = subscriptions::table
            .filter(subscriptions::user_id.eq(user_id))
            .count()
            .get_result::<i64>(&mut conn)?;

        let entries = subscriptions::table
            .filter(subscriptions::user_id.eq(user_id))
            .order((subscriptions::created_at.desc(), subscriptions::id.desc()))
            .limit(limit)
            .offset(offset)
            .select(SubscriptionEntity::as_select())
            .load::<SubscriptionEntity>(&mut conn)?;

        Ok((entries, total))
    }
}
