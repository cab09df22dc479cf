//! Per-endpoint strategy params and per-variant counters (C3).

use std::collections::HashMap;
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::bandit::{Strategy, VariantStats};
use crate::error::Error;
use crate::event::{Event, EventKind};

/// A single variant's persisted counters, keyed by `variant_name` in
/// [`EndpointRecord::variants`].
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub initial_variant_weight: f64,
    pub invocation_count: u64,
    pub conversion_count: u64,
    pub reward_sum: f64,
}

impl Variant {
    fn new(initial_variant_weight: f64) -> Self {
        Self {
            initial_variant_weight,
            invocation_count: 0,
            conversion_count: 0,
            reward_sum: 0.,
        }
    }
}

/// The full per-endpoint record: strategy configuration, the ordered variant
/// roster, and each variant's counters.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointRecord {
    pub strategy: Strategy,
    pub epsilon: f64,
    pub warmup: u64,
    pub variant_names: Vec<String>,
    pub variants: HashMap<String, Variant>,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
    pub deleted_at: Option<SystemTime>,
}

/// The projection returned by [`MetricsStore::read`]: everything C6 and the
/// `/stats` handler need, with missing counters already defaulted to zero.
#[derive(Debug, Clone)]
pub struct EndpointSnapshot {
    pub strategy: Strategy,
    pub epsilon: f64,
    pub warmup: u64,
    pub variants: Vec<VariantStats>,
    pub deleted_at: Option<SystemTime>,
}

impl EndpointSnapshot {
    pub fn has_variant(&self, variant_name: &str) -> bool {
        self.variants.iter().any(|v| v.variant_name == variant_name)
    }

    /// Variants that have not yet cleared the warmup threshold:
    /// `invocation_count <= warmup`. Non-empty iff the endpoint as a whole is
    /// still warming up, in which case C6 must force `WeightedSampling`
    /// regardless of the configured strategy.
    pub fn underwarmed(&self) -> Vec<&VariantStats> {
        self.variants
            .iter()
            .filter(|v| v.invocation_count <= self.warmup)
            .collect()
    }
}

/// The metrics store. Implementations stand in for the external store named
/// in §6; `register`/`soft_delete`/`read` are single-record operations, while
/// `fold` applies a batch of events grouped by `(endpoint_name, variant_name)`
/// so that each group only takes one atomic update.
#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Unconditional full-record write. Returns `true` if a prior record
    /// existed (the caller uses this to choose HTTP 200 vs. 201).
    async fn register(
        &self,
        endpoint_name: &str,
        variants: &[(String, f64)],
        strategy: Strategy,
        epsilon: f64,
        warmup: u64,
        ts: SystemTime,
    ) -> Result<bool, Error>;

    async fn soft_delete(&self, endpoint_name: &str, ts: SystemTime) -> Result<(), Error>;

    async fn read(&self, endpoint_name: &str) -> Result<EndpointSnapshot, Error>;

    /// Folds a batch of events into the store. Events are grouped internally
    /// by `(endpoint_name, endpoint_variant)`; counters never decrease, and
    /// soft-deleted records still accept folds.
    async fn fold(&self, events: &[Event]) -> Result<(), Error>;
}

#[derive(Default)]
pub struct InMemoryMetricsStore {
    records: RwLock<HashMap<String, EndpointRecord>>,
}

impl InMemoryMetricsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetricsStore for InMemoryMetricsStore {
    async fn register(
        &self,
        endpoint_name: &str,
        variants: &[(String, f64)],
        strategy: Strategy,
        epsilon: f64,
        warmup: u64,
        ts: SystemTime,
    ) -> Result<bool, Error> {
        let mut records = self.records.write().await;
        let existed = records.contains_key(endpoint_name);
        let variant_names: Vec<String> = variants.iter().map(|(name, _)| name.clone()).collect();
        let variant_map = variants
            .iter()
            .map(|(name, weight)| (name.clone(), Variant::new(*weight)))
            .collect();
        records.insert(
            endpoint_name.to_string(),
            EndpointRecord {
                strategy,
                epsilon,
                warmup,
                variant_names,
                variants: variant_map,
                created_at: ts,
                updated_at: ts,
                deleted_at: None,
            },
        );
        Ok(existed)
    }

    async fn soft_delete(&self, endpoint_name: &str, ts: SystemTime) -> Result<(), Error> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(endpoint_name)
            .ok_or_else(|| Error::EndpointUnknown {
                endpoint_name: endpoint_name.to_string(),
            })?;
        record.deleted_at = Some(ts);
        record.updated_at = ts;
        Ok(())
    }

    async fn read(&self, endpoint_name: &str) -> Result<EndpointSnapshot, Error> {
        let records = self.records.read().await;
        let record = records
            .get(endpoint_name)
            .ok_or_else(|| Error::EndpointUnknown {
                endpoint_name: endpoint_name.to_string(),
            })?;
        let variants = record
            .variant_names
            .iter()
            .map(|name| {
                let variant = record.variants.get(name);
                VariantStats {
                    variant_name: name.clone(),
                    initial_variant_weight: variant.map_or(0., |v| v.initial_variant_weight),
                    invocation_count: variant.map_or(0, |v| v.invocation_count),
                    reward_sum: variant.map_or(0., |v| v.reward_sum),
                }
            })
            .collect();
        Ok(EndpointSnapshot {
            strategy: record.strategy,
            epsilon: record.epsilon,
            warmup: record.warmup,
            variants,
            deleted_at: record.deleted_at,
        })
    }

    async fn fold(&self, events: &[Event]) -> Result<(), Error> {
        // Stable-sort by (endpoint_name, endpoint_variant) so that folds for the
        // same group land in one pass and the hot-key contention is minimized
        // to a single write per group, per the ordering rule in §4.3.
        let mut sorted: Vec<&Event> = events.iter().collect();
        sorted.sort_by(|a, b| {
            (&a.endpoint_name, &a.endpoint_variant).cmp(&(&b.endpoint_name, &b.endpoint_variant))
        });

        let mut records = self.records.write().await;
        let mut index = 0;
        while index < sorted.len() {
            let endpoint_name = sorted[index].endpoint_name.clone();
            let endpoint_variant = sorted[index].endpoint_variant.clone();
            let mut end = index;
            let mut delta_invocations = 0u64;
            let mut delta_conversions = 0u64;
            let mut delta_reward = 0.0f64;
            while end < sorted.len()
                && sorted[end].endpoint_name == endpoint_name
                && sorted[end].endpoint_variant == endpoint_variant
            {
                match &sorted[end].kind {
                    EventKind::Invocation => delta_invocations += 1,
                    EventKind::Conversion { reward } => {
                        delta_conversions += 1;
                        delta_reward += reward;
                    }
                }
                end += 1;
            }

            let now = SystemTime::now();
            let record = records
                .entry(endpoint_name.clone())
                .or_insert_with(|| EndpointRecord {
                    strategy: Strategy::default(),
                    epsilon: 0.1,
                    warmup: 0,
                    variant_names: Vec::new(),
                    variants: HashMap::new(),
                    created_at: now,
                    updated_at: now,
                    deleted_at: None,
                });
            if !record.variants.contains_key(&endpoint_variant) {
                record.variant_names.push(endpoint_variant.clone());
            }
            let variant = record
                .variants
                .entry(endpoint_variant.clone())
                .or_insert_with(|| Variant::new(0.));
            variant.invocation_count += delta_invocations;
            variant.conversion_count += delta_conversions;
            variant.reward_sum += delta_reward;
            record.updated_at = now;

            index = end;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn variants() -> Vec<(String, f64)> {
        vec![("ev1".to_string(), 1.0), ("ev2".to_string(), 0.5)]
    }

    #[tokio::test]
    async fn register_reports_whether_a_prior_record_existed() {
        let store = InMemoryMetricsStore::new();
        let existed = store
            .register(
                "e1",
                &variants(),
                Strategy::EpsilonGreedy,
                0.1,
                0,
                SystemTime::now(),
            )
            .await
            .unwrap();
        assert!(!existed);
        let existed_again = store
            .register(
                "e1",
                &variants(),
                Strategy::EpsilonGreedy,
                0.1,
                0,
                SystemTime::now(),
            )
            .await
            .unwrap();
        assert!(existed_again);
    }

    #[tokio::test]
    async fn read_unknown_endpoint_fails() {
        let store = InMemoryMetricsStore::new();
        assert_eq!(
            store.read("nope").await.unwrap_err(),
            Error::EndpointUnknown {
                endpoint_name: "nope".to_string()
            }
        );
    }

    #[tokio::test]
    async fn fold_groups_by_endpoint_and_variant() {
        let store = InMemoryMetricsStore::new();
        store
            .register(
                "e1",
                &variants(),
                Strategy::EpsilonGreedy,
                0.1,
                0,
                SystemTime::now(),
            )
            .await
            .unwrap();
        let events = vec![
            Event::invocation(1, "e1", "ev1", "ua", Uuid::nil()),
            Event::invocation(1, "e1", "ev2", "ub", Uuid::nil()),
            Event::invocation(1, "e1", "ev2", "uc", Uuid::nil()),
            Event::conversion(1, "e1", "ev2", "uc", Uuid::nil(), 1.0),
        ];
        store.fold(&events).await.unwrap();
        let snapshot = store.read("e1").await.unwrap();
        let ev1 = snapshot.variants.iter().find(|v| v.variant_name == "ev1").unwrap();
        let ev2 = snapshot.variants.iter().find(|v| v.variant_name == "ev2").unwrap();
        assert_eq!((ev1.invocation_count, ev1.reward_sum), (1, 0.));
        assert_eq!((ev2.invocation_count, ev2.reward_sum), (2, 1.));
    }

    #[tokio::test]
    async fn fold_is_commutative_under_permutation() {
        let store_a = InMemoryMetricsStore::new();
        let store_b = InMemoryMetricsStore::new();
        for store in [&store_a, &store_b] {
            store
                .register(
                    "e1",
                    &variants(),
                    Strategy::EpsilonGreedy,
                    0.1,
                    0,
                    SystemTime::now(),
                )
                .await
                .unwrap();
        }
        let events = vec![
            Event::invocation(1, "e1", "ev1", "ua", Uuid::nil()),
            Event::conversion(1, "e1", "ev1", "ua", Uuid::nil(), 1.0),
            Event::invocation(1, "e1", "ev2", "ub", Uuid::nil()),
        ];
        store_a.fold(&events).await.unwrap();
        let mut reversed = events.clone();
        reversed.reverse();
        store_b.fold(&reversed).await.unwrap();

        let a = store_a.read("e1").await.unwrap();
        let b = store_b.read("e1").await.unwrap();
        for (va, vb) in a.variants.iter().zip(b.variants.iter()) {
            assert_eq!(va.invocation_count, vb.invocation_count);
            assert_eq!(va.reward_sum, vb.reward_sum);
        }
    }

    #[tokio::test]
    async fn soft_delete_is_monotonic_and_still_readable() {
        let store = InMemoryMetricsStore::new();
        store
            .register(
                "e1",
                &variants(),
                Strategy::EpsilonGreedy,
                0.1,
                0,
                SystemTime::now(),
            )
            .await
            .unwrap();
        store.soft_delete("e1", SystemTime::now()).await.unwrap();
        let snapshot = store.read("e1").await.unwrap();
        assert!(snapshot.deleted_at.is_some());
    }

    #[tokio::test]
    async fn soft_deleted_records_still_accept_folds() {
        let store = InMemoryMetricsStore::new();
        store
            .register(
                "e1",
                &variants(),
                Strategy::EpsilonGreedy,
                0.1,
                0,
                SystemTime::now(),
            )
            .await
            .unwrap();
        store.soft_delete("e1", SystemTime::now()).await.unwrap();
        store
            .fold(&[Event::invocation(1, "e1", "ev1", "ua", Uuid::nil())])
            .await
            .unwrap();
        let snapshot = store.read("e1").await.unwrap();
        let ev1 = snapshot.variants.iter().find(|v| v.variant_name == "ev1").unwrap();
        assert_eq!(ev1.invocation_count, 1);
    }

    #[tokio::test]
    async fn reregistration_resets_counters() {
        let store = InMemoryMetricsStore::new();
        store
            .register(
                "e1",
                &variants(),
                Strategy::EpsilonGreedy,
                0.1,
                0,
                SystemTime::now(),
            )
            .await
            .unwrap();
        store
            .fold(&[Event::invocation(1, "e1", "ev1", "ua", Uuid::nil())])
            .await
            .unwrap();
        store
            .register(
                "e1",
                &variants(),
                Strategy::EpsilonGreedy,
                0.1,
                0,
                SystemTime::now(),
            )
            .await
            .unwrap();
        let snapshot = store.read("e1").await.unwrap();
        let ev1 = snapshot.variants.iter().find(|v| v.variant_name == "ev1").unwrap();
        assert_eq!(ev1.invocation_count, 0);
    }
}
