//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.
//! Values are CBOR-encoded. Read-modify-write sequences on subscriptions are
//! serialized by a process-local write lock, which is enough because an
//! embedded database has exactly one writer process.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};
use tokio::sync::Mutex;

use z_quota_core::{
    BillingHistory, BillingPeriod, Subscription, UsageBreakdown, UsageRecord, User, UserId,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::{select_current, Store};

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn put<T: serde::Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        let value = Self::serialize(value)?;
        self.db
            .put_cf(&cf, key, value)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn get<T: serde::de::DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    /// All values under a key prefix, in key order (oldest first).
    fn scan_prefix<T: serde::de::DeserializeOwned>(
        &self,
        cf_name: &str,
        prefix: &[u8],
    ) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));

        let mut values = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            values.push(Self::deserialize(&value)?);
        }
        Ok(values)
    }

    fn user_subscriptions(&self, user_id: &UserId) -> Result<Vec<Subscription>> {
        self.scan_prefix(cf::SUBSCRIPTIONS, &keys::user_prefix(user_id))
    }
}

#[async_trait]
impl Store for RocksStore {
    async fn ping(&self) -> Result<()> {
        self.cf(cf::USERS).map(|_| ())
    }

    // =========================================================================
    // User Operations
    // =========================================================================

    async fn create_user(&self, user: &User) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let key = keys::user_key(&user.id);
        if self.get::<User>(cf::USERS, &key)?.is_some() {
            return Err(StoreError::Conflict {
                entity: "user",
                id: user.id.to_string(),
            });
        }
        self.put(cf::USERS, &key, user)
    }

    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>> {
        self.get(cf::USERS, &keys::user_key(user_id))
    }

    async fn set_user_plan_label(
        &self,
        user_id: &UserId,
        plan_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let key = keys::user_key(user_id);
        if let Some(mut user) = self.get::<User>(cf::USERS, &key)? {
            user.subscription_plan = plan_id.to_string();
            user.updated_at = now;
            self.put(cf::USERS, &key, &user)?;
        }
        Ok(())
    }

    // =========================================================================
    // Subscription Primitives
    // =========================================================================

    async fn insert_subscription(&self, subscription: &Subscription) -> Result<()> {
        let key = keys::subscription_key(&subscription.user_id, &subscription.id);
        self.put(cf::SUBSCRIPTIONS, &key, subscription)
    }

    async fn get_current_subscription(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>> {
        let rows = self.user_subscriptions(user_id)?;
        Ok(select_current(&rows, now).cloned())
    }

    async fn swap_subscription(
        &self,
        subscription: &Subscription,
        expected_version: i64,
    ) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let key = keys::subscription_key(&subscription.user_id, &subscription.id);
        let stored: Subscription =
            self.get(cf::SUBSCRIPTIONS, &key)?
                .ok_or_else(|| StoreError::NotFound {
                    entity: "subscription",
                    id: subscription.id.to_string(),
                })?;

        if stored.version != expected_version {
            return Ok(false);
        }
        self.put(cf::SUBSCRIPTIONS, &key, subscription)?;
        Ok(true)
    }

    async fn billing_history(&self, user_id: &UserId, limit: usize) -> Result<BillingHistory> {
        let mut rows = self.user_subscriptions(user_id)?;
        rows.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));

        Ok(BillingHistory {
            total: rows.len(),
            subscriptions: rows.into_iter().take(limit).collect(),
        })
    }

    async fn expire_subscriptions(&self, now: DateTime<Utc>) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let rows: Vec<Subscription> = self.scan_prefix(cf::SUBSCRIPTIONS, &[])?;

        let cf = self.cf(cf::SUBSCRIPTIONS)?;
        let mut batch = WriteBatch::default();
        let mut expired = 0;
        for mut row in rows {
            if row.expire(now) {
                row.version += 1;
                let key = keys::subscription_key(&row.user_id, &row.id);
                batch.put_cf(&cf, key, Self::serialize(&row)?);
                expired += 1;
            }
        }

        if expired > 0 {
            self.db
                .write(batch)
                .map_err(|e| StoreError::Database(e.to_string()))?;
        }
        Ok(expired)
    }

    // =========================================================================
    // Usage Operations
    // =========================================================================

    async fn record_usage(&self, record: &UsageRecord) -> Result<()> {
        let key = keys::usage_key(&record.user_id, &record.id);
        self.put(cf::USAGE, &key, record)
    }

    async fn sum_usage(
        &self,
        user_id: &UserId,
        resource_type: &str,
        period: BillingPeriod,
    ) -> Result<i64> {
        let records: Vec<UsageRecord> = self.scan_prefix(cf::USAGE, &keys::user_prefix(user_id))?;
        Ok(records
            .iter()
            .filter(|r| r.resource_type == resource_type && period.contains(r.created_at))
            .fold(0, |total: i64, r| total.saturating_add(r.quantity)))
    }

    async fn usage_breakdown(
        &self,
        user_id: &UserId,
        period: BillingPeriod,
        limit: usize,
    ) -> Result<UsageBreakdown> {
        let mut records: Vec<UsageRecord> =
            self.scan_prefix(cf::USAGE, &keys::user_prefix(user_id))?;
        records.retain(|r| period.contains(r.created_at));
        records.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));

        let mut breakdown = UsageBreakdown::empty(period);
        breakdown.absorb(records, limit);
        Ok(breakdown)
    }
}
