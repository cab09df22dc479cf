//! Sticky (user, endpoint) -> variant assignment with TTL (C2).

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Error;

const DEFAULT_TTL_DAYS: u64 = 90;

#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentRecord {
    pub variant_name: String,
    pub expires_at: SystemTime,
}

/// The sticky-assignment store. Implementations stand in for the external
/// key-value store named in the HTTP/config surface (§6); last-writer-wins
/// per key, expired entries are transparently absent.
#[async_trait]
pub trait AssignmentStore: Send + Sync {
    async fn get(&self, user_id: &str, endpoint_name: &str) -> Result<Option<String>, Error>;

    async fn put(
        &self,
        user_id: &str,
        endpoint_name: &str,
        variant_name: &str,
        ttl_days: u64,
    ) -> Result<(), Error>;
}

/// An in-process stand-in for the external assignment store, guarded by a
/// single `RwLock` — the same shape the teacher uses for its mock ClickHouse
/// connection (`ClickHouseConnectionInfo::Mock`).
#[derive(Default)]
pub struct InMemoryAssignmentStore {
    records: RwLock<HashMap<(String, String), AssignmentRecord>>,
}

impl InMemoryAssignmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AssignmentStore for InMemoryAssignmentStore {
    async fn get(&self, user_id: &str, endpoint_name: &str) -> Result<Option<String>, Error> {
        let records = self.records.read().await;
        let key = (user_id.to_string(), endpoint_name.to_string());
        match records.get(&key) {
            Some(record) if record.expires_at > SystemTime::now() => {
                Ok(Some(record.variant_name.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn put(
        &self,
        user_id: &str,
        endpoint_name: &str,
        variant_name: &str,
        ttl_days: u64,
    ) -> Result<(), Error> {
        let expires_at = SystemTime::now() + Duration::from_secs(ttl_days * 86_400);
        let mut records = self.records.write().await;
        records.insert(
            (user_id.to_string(), endpoint_name.to_string()),
            AssignmentRecord {
                variant_name: variant_name.to_string(),
                expires_at,
            },
        );
        Ok(())
    }
}

/// Convenience wrapper around [`AssignmentStore::put`] using the default TTL.
pub async fn put_sticky(
    store: &dyn AssignmentStore,
    user_id: &str,
    endpoint_name: &str,
    variant_name: &str,
) -> Result<(), Error> {
    store
        .put(user_id, endpoint_name, variant_name, DEFAULT_TTL_DAYS)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_returns_none_when_absent() {
        let store = InMemoryAssignmentStore::new();
        assert_eq!(store.get("u1", "e1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = InMemoryAssignmentStore::new();
        put_sticky(&store, "u1", "e1", "ev1").await.unwrap();
        assert_eq!(store.get("u1", "e1").await.unwrap(), Some("ev1".to_string()));
    }

    #[tokio::test]
    async fn last_writer_wins_per_key() {
        let store = InMemoryAssignmentStore::new();
        put_sticky(&store, "u1", "e1", "ev1").await.unwrap();
        put_sticky(&store, "u1", "e1", "ev2").await.unwrap();
        assert_eq!(store.get("u1", "e1").await.unwrap(), Some("ev2".to_string()));
    }

    #[tokio::test]
    async fn expired_entries_are_transparently_absent() {
        let store = InMemoryAssignmentStore::new();
        store.put("u1", "e1", "ev1", 0).await.unwrap();
        // ttl_days=0 means expires_at == now (or a hair after); sleep past it.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(store.get("u1", "e1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn distinct_endpoints_do_not_collide() {
        let store = InMemoryAssignmentStore::new();
        put_sticky(&store, "u1", "e1", "ev1").await.unwrap();
        assert_eq!(store.get("u1", "e2").await.unwrap(), None);
    }
}
