//! Key encoding utilities for `RocksDB`.
//!
//! Keys scoped to a user start with the 16 UUID bytes of the user, followed
//! by the 16 big-endian ULID bytes of the row. Lexicographic key order is
//! therefore (user, creation time).

use z_quota_core::{SubscriptionId, UsageRecordId, UserId};

/// Length of a `user_id || ulid` key.
pub const USER_SCOPED_KEY_LEN: usize = 32;

/// Create a user key from a user ID.
#[must_use]
pub fn user_key(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Prefix covering every row owned by a user.
#[must_use]
pub fn user_prefix(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Create a subscription key.
///
/// Format: `user_id (16 bytes) || subscription_id (16 bytes)`
#[must_use]
pub fn subscription_key(user_id: &UserId, subscription_id: &SubscriptionId) -> Vec<u8> {
    user_scoped(user_id, subscription_id.to_bytes())
}

/// Create a usage record key.
///
/// Format: `user_id (16 bytes) || usage_record_id (16 bytes)`
#[must_use]
pub fn usage_key(user_id: &UserId, record_id: &UsageRecordId) -> Vec<u8> {
    user_scoped(user_id, record_id.to_bytes())
}

fn user_scoped(user_id: &UserId, ulid: [u8; 16]) -> Vec<u8> {
    let mut key = Vec::with_capacity(USER_SCOPED_KEY_LEN);
    key.extend_from_slice(user_id.as_bytes());
    key.extend_from_slice(&ulid);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_key_length() {
        let user_id = UserId::generate();
        assert_eq!(user_key(&user_id).len(), 16);
    }

    #[test]
    fn subscription_key_format() {
        let user_id = UserId::generate();
        let sub_id = SubscriptionId::generate();
        let key = subscription_key(&user_id, &sub_id);

        assert_eq!(key.len(), USER_SCOPED_KEY_LEN);
        assert_eq!(&key[..16], user_id.as_bytes());
        assert_eq!(&key[16..], sub_id.to_bytes());
        assert!(key.starts_with(&user_prefix(&user_id)));
    }

    #[test]
    fn later_records_sort_after_earlier_ones() {
        let user_id = UserId::generate();
        let first = usage_key(&user_id, &UsageRecordId::generate());
        let second = usage_key(&user_id, &UsageRecordId::generate());
        assert!(first < second);
    }
}
