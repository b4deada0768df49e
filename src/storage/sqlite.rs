//! SQLite storage port.
//!
//! Grounded on the teacher's `vault/vault_db.rs`: a single `Connection`
//! behind `Arc<tokio::sync::Mutex<_>>`, WAL mode, `CREATE TABLE IF NOT
//! EXISTS`, `prepare_cached`, and `ON CONFLICT ... DO UPDATE SET` upserts.
//!
//! Two tables, matching spec.md §3/§6's "exactly two kinds of records"
//! rule: `batch_metadata` and `daily_aggregates`. No other table may be
//! created by this module. Both tables are written inside one SQLite
//! transaction per `commit_batch` call, so a mid-commit failure never
//! leaves a batch row with no matching aggregates.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, Transaction};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::model::{BatchMetadata, Cct, DailyAggregate, FlowDirection};

use super::{CommitError, StoragePort};

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open ingestion db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS batch_metadata (
                batch_id TEXT PRIMARY KEY,
                subject_ref TEXT NOT NULL,
                subject_ref_version TEXT,
                source TEXT NOT NULL,
                idempotency_key TEXT NOT NULL UNIQUE,
                content_hash TEXT NOT NULL,
                filename_hash TEXT,
                file_ext TEXT,
                rows_accepted INTEGER NOT NULL,
                rows_rejected INTEGER NOT NULL,
                rejection_breakdown TEXT NOT NULL,
                accepted_partial_rows INTEGER NOT NULL,
                declared_start TEXT,
                declared_end TEXT,
                inferred_start TEXT NOT NULL,
                inferred_end TEXT NOT NULL,
                cct_unknown_rate REAL NOT NULL,
                payer_token_present INTEGER NOT NULL,
                policy_version TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS daily_aggregates (
                subject_ref TEXT NOT NULL,
                date TEXT NOT NULL,
                inflow_sum TEXT NOT NULL,
                outflow_sum TEXT NOT NULL,
                free_in_sum TEXT NOT NULL, free_in_count INTEGER NOT NULL,
                free_out_sum TEXT NOT NULL, free_out_count INTEGER NOT NULL,
                constrained_in_sum TEXT NOT NULL, constrained_in_count INTEGER NOT NULL,
                constrained_out_sum TEXT NOT NULL, constrained_out_count INTEGER NOT NULL,
                pass_through_in_sum TEXT NOT NULL, pass_through_in_count INTEGER NOT NULL,
                pass_through_out_sum TEXT NOT NULL, pass_through_out_count INTEGER NOT NULL,
                artificial_in_sum TEXT NOT NULL, artificial_in_count INTEGER NOT NULL,
                artificial_out_sum TEXT NOT NULL, artificial_out_count INTEGER NOT NULL,
                conditional_in_sum TEXT NOT NULL, conditional_in_count INTEGER NOT NULL,
                conditional_out_sum TEXT NOT NULL, conditional_out_count INTEGER NOT NULL,
                unknown_in_sum TEXT NOT NULL, unknown_in_count INTEGER NOT NULL,
                unknown_out_sum TEXT NOT NULL, unknown_out_count INTEGER NOT NULL,
                unique_payers_count INTEGER NOT NULL,
                accepted_partial_rows INTEGER NOT NULL,
                unknown_cct_count INTEGER NOT NULL,
                PRIMARY KEY (subject_ref, date)
            )",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Self::new(":memory:")
    }
}

fn bucket_columns(agg: &DailyAggregate) -> [(Decimal, u64); 12] {
    [
        agg.bucket(Cct::Free, FlowDirection::In).into(),
        agg.bucket(Cct::Free, FlowDirection::Out).into(),
        agg.bucket(Cct::Constrained, FlowDirection::In).into(),
        agg.bucket(Cct::Constrained, FlowDirection::Out).into(),
        agg.bucket(Cct::PassThrough, FlowDirection::In).into(),
        agg.bucket(Cct::PassThrough, FlowDirection::Out).into(),
        agg.bucket(Cct::Artificial, FlowDirection::In).into(),
        agg.bucket(Cct::Artificial, FlowDirection::Out).into(),
        agg.bucket(Cct::Conditional, FlowDirection::In).into(),
        agg.bucket(Cct::Conditional, FlowDirection::Out).into(),
        agg.bucket(Cct::Unknown, FlowDirection::In).into(),
        agg.bucket(Cct::Unknown, FlowDirection::Out).into(),
    ]
}

impl From<crate::model::BucketTotal> for (Decimal, u64) {
    fn from(b: crate::model::BucketTotal) -> Self {
        (b.sum, b.count)
    }
}

/// Upserts one `DailyAggregate` inside an already-open transaction.
fn upsert_daily_aggregate(tx: &Transaction<'_>, agg: &DailyAggregate) -> rusqlite::Result<()> {
    let cols = bucket_columns(agg);

    let mut select_stmt = tx.prepare_cached(
        "SELECT inflow_sum, outflow_sum,
            free_in_sum, free_in_count, free_out_sum, free_out_count,
            constrained_in_sum, constrained_in_count, constrained_out_sum, constrained_out_count,
            pass_through_in_sum, pass_through_in_count, pass_through_out_sum, pass_through_out_count,
            artificial_in_sum, artificial_in_count, artificial_out_sum, artificial_out_count,
            conditional_in_sum, conditional_in_count, conditional_out_sum, conditional_out_count,
            unknown_in_sum, unknown_in_count, unknown_out_sum, unknown_out_count,
            unique_payers_count, accepted_partial_rows, unknown_cct_count
         FROM daily_aggregates WHERE subject_ref = ?1 AND date = ?2",
    )?;
    let existing: Option<(String, String, [(String, i64); 12], i64, i64, i64)> = select_stmt
        .query_row(params![agg.subject_ref, agg.date.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                [
                    (row.get::<_, String>(2)?, row.get::<_, i64>(3)?),
                    (row.get::<_, String>(4)?, row.get::<_, i64>(5)?),
                    (row.get::<_, String>(6)?, row.get::<_, i64>(7)?),
                    (row.get::<_, String>(8)?, row.get::<_, i64>(9)?),
                    (row.get::<_, String>(10)?, row.get::<_, i64>(11)?),
                    (row.get::<_, String>(12)?, row.get::<_, i64>(13)?),
                    (row.get::<_, String>(14)?, row.get::<_, i64>(15)?),
                    (row.get::<_, String>(16)?, row.get::<_, i64>(17)?),
                    (row.get::<_, String>(18)?, row.get::<_, i64>(19)?),
                    (row.get::<_, String>(20)?, row.get::<_, i64>(21)?),
                    (row.get::<_, String>(22)?, row.get::<_, i64>(23)?),
                    (row.get::<_, String>(24)?, row.get::<_, i64>(25)?),
                ],
                row.get::<_, i64>(26)?,
                row.get::<_, i64>(27)?,
                row.get::<_, i64>(28)?,
            ))
        })
        .ok();
    drop(select_stmt);

    let (inflow, outflow, bucket_vals, unique_payers, partials, unknown_cct) = match existing {
        None => (
            agg.inflow_sum,
            agg.outflow_sum,
            cols.map(|(sum, count)| (sum, count as i64)),
            agg.unique_payers_count as i64,
            agg.accepted_partial_rows as i64,
            agg.unknown_cct_count as i64,
        ),
        Some((inflow_s, outflow_s, existing_cols, payers, partials, unk)) => {
            let inflow = Decimal::from_str(&inflow_s).unwrap_or_default() + agg.inflow_sum;
            let outflow = Decimal::from_str(&outflow_s).unwrap_or_default() + agg.outflow_sum;
            let mut merged = [(Decimal::ZERO, 0i64); 12];
            for i in 0..12 {
                let existing_sum = Decimal::from_str(&existing_cols[i].0).unwrap_or_default();
                merged[i] = (existing_sum + cols[i].0, existing_cols[i].1 + cols[i].1 as i64);
            }
            (
                inflow,
                outflow,
                merged,
                // No count-distinct sketch kept: additive merge is an upper
                // bound on the true distinct count.
                payers + agg.unique_payers_count as i64,
                partials + agg.accepted_partial_rows as i64,
                unk + agg.unknown_cct_count as i64,
            )
        }
    };

    let mut upsert_stmt = tx.prepare_cached(
        "INSERT INTO daily_aggregates (
            subject_ref, date, inflow_sum, outflow_sum,
            free_in_sum, free_in_count, free_out_sum, free_out_count,
            constrained_in_sum, constrained_in_count, constrained_out_sum, constrained_out_count,
            pass_through_in_sum, pass_through_in_count, pass_through_out_sum, pass_through_out_count,
            artificial_in_sum, artificial_in_count, artificial_out_sum, artificial_out_count,
            conditional_in_sum, conditional_in_count, conditional_out_sum, conditional_out_count,
            unknown_in_sum, unknown_in_count, unknown_out_sum, unknown_out_count,
            unique_payers_count, accepted_partial_rows, unknown_cct_count
        ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23,?24,?25,?26,?27,?28,?29,?30,?31)
        ON CONFLICT (subject_ref, date) DO UPDATE SET
            inflow_sum = excluded.inflow_sum,
            outflow_sum = excluded.outflow_sum,
            free_in_sum = excluded.free_in_sum, free_in_count = excluded.free_in_count,
            free_out_sum = excluded.free_out_sum, free_out_count = excluded.free_out_count,
            constrained_in_sum = excluded.constrained_in_sum, constrained_in_count = excluded.constrained_in_count,
            constrained_out_sum = excluded.constrained_out_sum, constrained_out_count = excluded.constrained_out_count,
            pass_through_in_sum = excluded.pass_through_in_sum, pass_through_in_count = excluded.pass_through_in_count,
            pass_through_out_sum = excluded.pass_through_out_sum, pass_through_out_count = excluded.pass_through_out_count,
            artificial_in_sum = excluded.artificial_in_sum, artificial_in_count = excluded.artificial_in_count,
            artificial_out_sum = excluded.artificial_out_sum, artificial_out_count = excluded.artificial_out_count,
            conditional_in_sum = excluded.conditional_in_sum, conditional_in_count = excluded.conditional_in_count,
            conditional_out_sum = excluded.conditional_out_sum, conditional_out_count = excluded.conditional_out_count,
            unknown_in_sum = excluded.unknown_in_sum, unknown_in_count = excluded.unknown_in_count,
            unknown_out_sum = excluded.unknown_out_sum, unknown_out_count = excluded.unknown_out_count,
            unique_payers_count = excluded.unique_payers_count,
            accepted_partial_rows = excluded.accepted_partial_rows,
            unknown_cct_count = excluded.unknown_cct_count",
    )?;
    upsert_stmt.execute(params![
        agg.subject_ref,
        agg.date.to_string(),
        inflow.to_string(),
        outflow.to_string(),
        bucket_vals[0].0.to_string(), bucket_vals[0].1,
        bucket_vals[1].0.to_string(), bucket_vals[1].1,
        bucket_vals[2].0.to_string(), bucket_vals[2].1,
        bucket_vals[3].0.to_string(), bucket_vals[3].1,
        bucket_vals[4].0.to_string(), bucket_vals[4].1,
        bucket_vals[5].0.to_string(), bucket_vals[5].1,
        bucket_vals[6].0.to_string(), bucket_vals[6].1,
        bucket_vals[7].0.to_string(), bucket_vals[7].1,
        bucket_vals[8].0.to_string(), bucket_vals[8].1,
        bucket_vals[9].0.to_string(), bucket_vals[9].1,
        bucket_vals[10].0.to_string(), bucket_vals[10].1,
        bucket_vals[11].0.to_string(), bucket_vals[11].1,
        unique_payers,
        partials,
        unknown_cct,
    ])?;

    Ok(())
}

#[async_trait]
impl StoragePort for SqliteStore {
    async fn commit_batch(
        &self,
        metadata: BatchMetadata,
        aggregates: &[DailyAggregate],
    ) -> Result<String, CommitError> {
        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .map_err(|e| CommitError::Backend(e.to_string()))?;

        let exists: bool = tx
            .prepare_cached("SELECT 1 FROM batch_metadata WHERE idempotency_key = ?1 LIMIT 1")
            .and_then(|mut stmt| {
                stmt.query_row(params![metadata.idempotency_key], |_| Ok(()))
            })
            .is_ok();
        if exists {
            return Err(CommitError::DuplicateBatch);
        }

        let batch_id = Uuid::new_v4().to_string();
        let rejection_breakdown = serde_json::to_string(&metadata.rejection_breakdown)
            .map_err(|e| CommitError::Backend(e.to_string()))?;
        let (declared_start, declared_end) = metadata
            .declared_range
            .map(|(s, e)| (Some(s.to_string()), Some(e.to_string())))
            .unwrap_or((None, None));

        tx.execute(
            "INSERT INTO batch_metadata (
                batch_id, subject_ref, subject_ref_version, source, idempotency_key,
                content_hash, filename_hash, file_ext, rows_accepted, rows_rejected,
                rejection_breakdown, accepted_partial_rows, declared_start, declared_end,
                inferred_start, inferred_end, cct_unknown_rate, payer_token_present, policy_version
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19)",
            params![
                batch_id,
                metadata.subject_ref,
                metadata.subject_ref_version,
                metadata.source,
                metadata.idempotency_key,
                metadata.content_hash,
                metadata.filename_hash,
                metadata.file_ext,
                metadata.rows_accepted as i64,
                metadata.rows_rejected as i64,
                rejection_breakdown,
                metadata.accepted_partial_rows as i64,
                declared_start,
                declared_end,
                metadata.inferred_range.0.to_string(),
                metadata.inferred_range.1.to_string(),
                metadata.cct_unknown_rate,
                metadata.payer_token_present as i64,
                metadata.policy_version,
            ],
        )
        .map_err(|e| CommitError::Backend(e.to_string()))?;

        for agg in aggregates {
            upsert_daily_aggregate(&tx, agg).map_err(|e| CommitError::Backend(e.to_string()))?;
        }

        tx.commit().map_err(|e| CommitError::Backend(e.to_string()))?;

        Ok(batch_id)
    }
}
