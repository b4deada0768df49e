//! In-memory storage port. Test-only.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::model::{BatchMetadata, Cct, DailyAggregate, FlowDirection};

use super::{CommitError, StoragePort};

#[derive(Default)]
struct Inner {
    batches_by_key: HashMap<String, String>,
    batches: Vec<BatchMetadata>,
    daily: HashMap<(String, chrono::NaiveDate), DailyAggregate>,
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn daily_aggregate(
        &self,
        subject_ref: &str,
        date: chrono::NaiveDate,
    ) -> Option<DailyAggregate> {
        let inner = self.inner.lock().await;
        inner.daily.get(&(subject_ref.to_string(), date)).cloned()
    }

    pub async fn batch_count(&self) -> usize {
        self.inner.lock().await.batches.len()
    }
}

#[async_trait]
impl StoragePort for InMemoryStore {
    async fn commit_batch(
        &self,
        metadata: BatchMetadata,
        aggregates: &[DailyAggregate],
    ) -> Result<String, CommitError> {
        let mut inner = self.inner.lock().await;
        if inner.batches_by_key.contains_key(&metadata.idempotency_key) {
            return Err(CommitError::DuplicateBatch);
        }
        let batch_id = Uuid::new_v4().to_string();
        inner
            .batches_by_key
            .insert(metadata.idempotency_key.clone(), batch_id.clone());
        let mut metadata = metadata;
        metadata.batch_id = batch_id.clone();
        inner.batches.push(metadata);

        for agg in aggregates {
            let key = (agg.subject_ref.clone(), agg.date);
            match inner.daily.remove(&key) {
                None => {
                    inner.daily.insert(key, agg.clone());
                }
                Some(mut existing) => {
                    existing.inflow_sum += agg.inflow_sum;
                    existing.outflow_sum += agg.outflow_sum;
                    for cct in Cct::ALL {
                        for dir in [FlowDirection::In, FlowDirection::Out] {
                            let incoming = agg.bucket(cct, dir);
                            let entry = existing.buckets.entry((cct, dir)).or_default();
                            entry.sum += incoming.sum;
                            entry.count += incoming.count;
                        }
                    }
                    // No count-distinct sketch kept: treated as an upper
                    // bound by summing, per spec.md §4.10's documented
                    // fallback for backends without one.
                    existing.unique_payers_count += agg.unique_payers_count;
                    existing.accepted_partial_rows += agg.accepted_partial_rows;
                    existing.unknown_cct_count += agg.unknown_cct_count;
                    inner.daily.insert(key, existing);
                }
            }
        }

        Ok(batch_id)
    }
}
