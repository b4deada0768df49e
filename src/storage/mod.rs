//! Storage port (C11).
//!
//! One operation, atomic with respect to a whole batch: the batch-metadata
//! row and its daily-aggregate upserts commit together or not at all.
//! Implementations must refuse any field not in the allow-list implied by
//! `BatchMetadata`/`DailyAggregate` — there is no raw-row field to refuse in
//! the first place, since neither type carries one.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::model::{BatchMetadata, DailyAggregate};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitError {
    DuplicateBatch,
    Backend(String),
}

#[async_trait]
pub trait StoragePort: Send + Sync {
    /// Checks `idempotency_key` uniqueness, assigns a stable `batch_id`, and
    /// upserts `aggregates` by `(subject_ref, date)` in the same atomic unit
    /// of work. A duplicate key or a backend failure leaves no trace of
    /// either the batch row or its aggregates.
    ///
    /// Conflict policy for repeated days is additive merge: sums and counts
    /// add, distinct-payer cardinality is treated as an upper bound when no
    /// sketch is kept (see each backend's doc comment).
    async fn commit_batch(
        &self,
        metadata: BatchMetadata,
        aggregates: &[DailyAggregate],
    ) -> Result<String, CommitError>;
}
