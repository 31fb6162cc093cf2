//! PostgreSQL storage implementation.
//!
//! The selection rule for the current subscription and the version check for
//! compare-and-swap are pushed down into SQL so that concurrent service
//! instances sharing one database agree on them.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use tracing::{info, instrument};

use z_quota_core::{
    BillingHistory, BillingPeriod, Price, Subscription, SubscriptionId, UsageBreakdown,
    UsageRecord, UsageRecordId, User, UserId,
};

use crate::error::{Result, StoreError};
use crate::Store;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, plan_id, billing_cycle, status, price_cents, \
     currency, started_at, ends_at, auto_renew, limits, version, created_at, updated_at";

const USAGE_COLUMNS: &str =
    "id, user_id, resource_type, quantity, period_start, period_end, metadata, created_at";

/// Connection pool settings.
#[derive(Debug, Clone)]
pub struct PgStoreOptions {
    /// Maximum pool size.
    pub max_connections: u32,
    /// How long to wait for a free connection.
    pub acquire_timeout: Duration,
}

impl Default for PgStoreOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// PostgreSQL-backed storage implementation.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to the database at `database_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if no connection can be established.
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, options: &PgStoreOptions) -> Result<Self> {
        info!(
            max_connections = options.max_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(options.acquire_timeout)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending schema migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    #[instrument(skip(self))]
    pub async fn migrate(&self) -> Result<()> {
        info!("Running database migrations");
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

fn to_i64(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn user_from_row(row: &PgRow) -> Result<User> {
    Ok(User {
        id: UserId::from_uuid(row.try_get("id")?),
        email: row.try_get("email")?,
        subscription_plan: row.try_get("subscription_plan")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn subscription_from_row(row: &PgRow) -> Result<Subscription> {
    let id: String = row.try_get("id")?;
    let billing_cycle: String = row.try_get("billing_cycle")?;
    let status: String = row.try_get("status")?;
    let Json(limits): Json<BTreeMap<String, i64>> = row.try_get("limits")?;

    Ok(Subscription {
        id: id
            .parse::<SubscriptionId>()
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        plan_id: row.try_get("plan_id")?,
        billing_cycle: billing_cycle.parse()?,
        status: status.parse()?,
        price: Price {
            amount_cents: row.try_get("price_cents")?,
            currency: row.try_get("currency")?,
        },
        started_at: row.try_get("started_at")?,
        ends_at: row.try_get("ends_at")?,
        auto_renew: row.try_get("auto_renew")?,
        limits,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn usage_from_row(row: &PgRow) -> Result<UsageRecord> {
    let id: String = row.try_get("id")?;
    let Json(metadata): Json<serde_json::Value> = row.try_get("metadata")?;

    Ok(UsageRecord {
        id: id
            .parse::<UsageRecordId>()
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        resource_type: row.try_get("resource_type")?,
        quantity: row.try_get("quantity")?,
        period_start: row.try_get("period_start")?,
        period_end: row.try_get("period_end")?,
        metadata,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // =========================================================================
    // User Operations
    // =========================================================================

    async fn create_user(&self, user: &User) -> Result<()> {
        let inserted = sqlx::query(
            "INSERT INTO users (id, email, subscription_plan, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5) ON CONFLICT (id) DO NOTHING",
        )
        .bind(user.id.as_uuid())
        .bind(&user.email)
        .bind(&user.subscription_plan)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Err(StoreError::Conflict {
                entity: "user",
                id: user.id.to_string(),
            });
        }
        Ok(())
    }

    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>> {
        sqlx::query(
            "SELECT id, email, subscription_plan, created_at, updated_at \
             FROM users WHERE id = $1",
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(user_from_row)
        .transpose()
    }

    async fn set_user_plan_label(
        &self,
        user_id: &UserId,
        plan_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE users SET subscription_plan = $2, updated_at = $3 WHERE id = $1")
            .bind(user_id.as_uuid())
            .bind(plan_id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // =========================================================================
    // Subscription Primitives
    // =========================================================================

    async fn insert_subscription(&self, s: &Subscription) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO subscriptions ({SUBSCRIPTION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
        ))
        .bind(s.id.to_string())
        .bind(s.user_id.as_uuid())
        .bind(&s.plan_id)
        .bind(s.billing_cycle.as_str())
        .bind(s.status.as_str())
        .bind(s.price.amount_cents)
        .bind(&s.price.currency)
        .bind(s.started_at)
        .bind(s.ends_at)
        .bind(s.auto_renew)
        .bind(Json(&s.limits))
        .bind(s.version)
        .bind(s.created_at)
        .bind(s.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_current_subscription(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>> {
        sqlx::query(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
             WHERE user_id = $1 \
               AND (status IN ('active', 'trialing') \
                    OR (status = 'pending_cancellation' AND ends_at > $2)) \
             ORDER BY created_at DESC, id DESC \
             LIMIT 1"
        ))
        .bind(user_id.as_uuid())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(subscription_from_row)
        .transpose()
    }

    async fn swap_subscription(&self, s: &Subscription, expected_version: i64) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE subscriptions SET \
                plan_id = $3, billing_cycle = $4, status = $5, price_cents = $6, \
                currency = $7, ends_at = $8, auto_renew = $9, limits = $10, \
                version = $11, updated_at = $12 \
             WHERE id = $1 AND version = $2",
        )
        .bind(s.id.to_string())
        .bind(expected_version)
        .bind(&s.plan_id)
        .bind(s.billing_cycle.as_str())
        .bind(s.status.as_str())
        .bind(s.price.amount_cents)
        .bind(&s.price.currency)
        .bind(s.ends_at)
        .bind(s.auto_renew)
        .bind(Json(&s.limits))
        .bind(s.version)
        .bind(s.updated_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(updated == 1)
    }

    async fn billing_history(&self, user_id: &UserId, limit: usize) -> Result<BillingHistory> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subscriptions WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
             WHERE user_id = $1 \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2"
        ))
        .bind(user_id.as_uuid())
        .bind(to_i64(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(BillingHistory {
            total: usize::try_from(total).unwrap_or_default(),
            subscriptions: rows
                .iter()
                .map(subscription_from_row)
                .collect::<Result<_>>()?,
        })
    }

    async fn expire_subscriptions(&self, now: DateTime<Utc>) -> Result<u64> {
        let expired = sqlx::query(
            "UPDATE subscriptions \
             SET status = 'canceled', version = version + 1, updated_at = $1 \
             WHERE status = 'pending_cancellation' AND ends_at <= $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(expired)
    }

    // =========================================================================
    // Usage Operations
    // =========================================================================

    async fn record_usage(&self, r: &UsageRecord) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO usage_records ({USAGE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        ))
        .bind(r.id.to_string())
        .bind(r.user_id.as_uuid())
        .bind(&r.resource_type)
        .bind(r.quantity)
        .bind(r.period_start)
        .bind(r.period_end)
        .bind(Json(&r.metadata))
        .bind(r.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn sum_usage(
        &self,
        user_id: &UserId,
        resource_type: &str,
        period: BillingPeriod,
    ) -> Result<i64> {
        let total: i64 = sqlx::query_scalar(
            "SELECT LEAST(COALESCE(SUM(quantity), 0), 9223372036854775807)::BIGINT \
             FROM usage_records \
             WHERE user_id = $1 AND resource_type = $2 \
               AND created_at BETWEEN $3 AND $4",
        )
        .bind(user_id.as_uuid())
        .bind(resource_type)
        .bind(period.start)
        .bind(period.end)
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }

    async fn usage_breakdown(
        &self,
        user_id: &UserId,
        period: BillingPeriod,
        limit: usize,
    ) -> Result<UsageBreakdown> {
        let totals: Vec<(String, i64)> = sqlx::query_as(
            "SELECT resource_type, \
                    LEAST(COALESCE(SUM(quantity), 0), 9223372036854775807)::BIGINT \
             FROM usage_records \
             WHERE user_id = $1 AND created_at BETWEEN $2 AND $3 \
             GROUP BY resource_type",
        )
        .bind(user_id.as_uuid())
        .bind(period.start)
        .bind(period.end)
        .fetch_all(&self.pool)
        .await?;

        let rows = sqlx::query(&format!(
            "SELECT {USAGE_COLUMNS} FROM ( \
                SELECT {USAGE_COLUMNS}, ROW_NUMBER() OVER ( \
                    PARTITION BY resource_type ORDER BY created_at DESC, id DESC \
                ) AS rn \
                FROM usage_records \
                WHERE user_id = $1 AND created_at BETWEEN $2 AND $3 \
             ) ranked \
             WHERE rn <= $4 \
             ORDER BY resource_type, created_at DESC, id DESC"
        ))
        .bind(user_id.as_uuid())
        .bind(period.start)
        .bind(period.end)
        .bind(to_i64(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut breakdown = UsageBreakdown::empty(period);
        for (resource_type, total) in totals {
            breakdown.resources.entry(resource_type).or_default().total = total;
        }
        for row in &rows {
            let record = usage_from_row(row)?;
            breakdown
                .resources
                .entry(record.resource_type.clone())
                .or_default()
                .records
                .push(record);
        }
        Ok(breakdown)
    }
}
