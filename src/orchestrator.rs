//! Orchestrator (C10).
//!
//! Drives the fixed pipeline order — parse, validate, gate, normalize,
//! classify, key, aggregate, commit — for a single batch. Nothing here is
//! reused across batches; each call owns its rows end to end and drops them
//! on every exit path.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::Instrument;

use crate::aggregate;
use crate::classify::cct;
use crate::config::Config;
use crate::error::IngestError;
use crate::idempotency;
use crate::model::Cct;
use crate::normalize::normalize;
use crate::parser::{events, tabular};
use crate::quality_gate::{self, GateOutcome};
use crate::storage::{CommitError, StoragePort};
use crate::validate::validate;

pub struct TabularIngestInput {
    pub subject_ref: String,
    pub subject_ref_version: Option<String>,
    pub source: String,
    pub bytes: Vec<u8>,
    pub filename: Option<String>,
    pub declared_range: Option<(NaiveDate, NaiveDate)>,
}

pub struct FeedIngestInput {
    pub subject_ref: String,
    pub subject_ref_version: Option<String>,
    pub source: String,
    pub watermark_ts: Option<DateTime<Utc>>,
    pub events: Vec<Value>,
    pub declared_range: Option<(NaiveDate, NaiveDate)>,
}

#[derive(Debug, Serialize)]
pub struct IngestOutcome {
    pub status: &'static str,
    pub batch_id: String,
    pub subject_ref: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_ext: Option<String>,
    pub content_hash: String,
    pub idempotency_key: String,
    pub rows_accepted: u64,
    pub rows_rejected: u64,
    pub rejection_breakdown: BTreeMap<String, u64>,
    pub accepted_partial_rows: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub declared_range: Option<(NaiveDate, NaiveDate)>,
    pub inferred_range: (NaiveDate, NaiveDate),
    pub daily_aggregate_days: u64,
    pub daily_control_days: u64,
    pub cct_unknown_rate: f64,
    pub payer_token_present: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watermark_ts: Option<DateTime<Utc>>,
}

/// Hashed for log correlation only; never the raw `subject_ref` (§7 forbids
/// logging it verbatim alongside batch outcomes).
fn hashed_subject(subject_ref: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(subject_ref.as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

struct PipelineResult {
    accepted: Vec<(crate::model::CanonicalRecord, Cct)>,
    rows_accepted: u64,
    rows_rejected: u64,
    rejection_breakdown: BTreeMap<String, u64>,
    accepted_partial_rows: u64,
    unknown_cct_count: u64,
    payer_token_present: bool,
    total_rows: u64,
}

fn run_rows(
    rows: Vec<crate::model::RawRow>,
    subject_ref: &str,
    config: &Config,
) -> PipelineResult {
    let total_rows = rows.len() as u64;
    let mut accepted = Vec::new();
    let mut rows_rejected: u64 = 0;
    let mut rejection_breakdown: BTreeMap<String, u64> = BTreeMap::new();
    let mut accepted_partial_rows: u64 = 0;
    let mut unknown_cct_count: u64 = 0;
    let mut payer_token_present = false;

    for row in rows {
        let validated = match validate(&row) {
            Ok(v) => v,
            Err(reason) => {
                rows_rejected += 1;
                *rejection_breakdown.entry(reason.as_str().to_string()).or_insert(0) += 1;
                continue;
            }
        };

        let validated = match quality_gate::apply(validated) {
            GateOutcome::Accepted(v) => v,
            GateOutcome::Rejected(reason) => {
                rows_rejected += 1;
                *rejection_breakdown.entry(reason.as_str().to_string()).or_insert(0) += 1;
                continue;
            }
        };

        let record = normalize(subject_ref, validated);
        if record.counterparty_token().is_some() {
            payer_token_present = true;
        }
        if record.partial_record {
            accepted_partial_rows += 1;
        }

        let cct_result = cct::classify(&record, config);
        if cct_result.cct == Cct::Unknown {
            unknown_cct_count += 1;
        }

        accepted.push((record, cct_result.cct));
    }

    PipelineResult {
        rows_accepted: accepted.len() as u64,
        accepted,
        rows_rejected,
        rejection_breakdown,
        accepted_partial_rows,
        unknown_cct_count,
        payer_token_present,
        total_rows,
    }
}

fn check_declared_range(
    declared_range: Option<(NaiveDate, NaiveDate)>,
    accepted: &[(crate::model::CanonicalRecord, Cct)],
) -> Result<(), IngestError> {
    let Some((start, end)) = declared_range else {
        return Ok(());
    };
    for (record, _) in accepted {
        let date = record.event_ts.date_naive();
        if date < start || date > end {
            return Err(IngestError::DeclaredRangeViolation);
        }
    }
    Ok(())
}

fn inferred_range(accepted: &[(crate::model::CanonicalRecord, Cct)]) -> (NaiveDate, NaiveDate) {
    let mut min = None;
    let mut max = None;
    for (record, _) in accepted {
        let date = record.event_ts.date_naive();
        min = Some(min.map_or(date, |m: NaiveDate| m.min(date)));
        max = Some(max.map_or(date, |m: NaiveDate| m.max(date)));
    }
    let fallback = Utc::now().date_naive();
    (min.unwrap_or(fallback), max.unwrap_or(fallback))
}

fn check_guardrails(result: &PipelineResult, config: &Config) -> Result<(), IngestError> {
    if result.total_rows == 0 {
        return Err(IngestError::EmptyBatch);
    }
    if result.rows_accepted == 0 {
        return Err(IngestError::NoValidRows);
    }
    if let Some(min_ratio) = config.min_accept_ratio {
        let ratio = result.rows_accepted as f64 / result.total_rows as f64;
        if ratio < min_ratio {
            return Err(IngestError::LowAcceptRatio);
        }
    }
    Ok(())
}

pub async fn ingest_tabular(
    input: TabularIngestInput,
    config: &Config,
    storage: &Arc<dyn StoragePort>,
) -> Result<IngestOutcome, IngestError> {
    let span = tracing::info_span!(
        "ingest_tabular",
        subject_ref_hash = %hashed_subject(&input.subject_ref),
        source = %input.source
    );
    ingest_tabular_inner(input, config, storage)
        .instrument(span)
        .await
}

async fn ingest_tabular_inner(
    input: TabularIngestInput,
    config: &Config,
    storage: &Arc<dyn StoragePort>,
) -> Result<IngestOutcome, IngestError> {
    let parsed = tabular::parse(&input.bytes)?;
    let content_hash = parsed.content_hash.clone();

    let result = run_rows(parsed.rows, &input.subject_ref, config);
    check_guardrails(&result, config)?;
    check_declared_range(input.declared_range, &result.accepted)?;

    let inferred = inferred_range(&result.accepted);
    let key_range = input.declared_range.unwrap_or(inferred);
    let idempotency_key = idempotency::tabular_key(
        &input.subject_ref,
        &input.source,
        &content_hash,
        key_range.0,
        key_range.1,
    );

    let aggregates = aggregate::aggregate(&input.subject_ref, &result.accepted);
    let daily_aggregate_days = aggregates.len() as u64;
    let daily_control_days = aggregates.len() as u64;

    let filename_hash = input.filename.as_ref().map(|f| {
        let mut hasher = Sha256::new();
        hasher.update(f.as_bytes());
        hex::encode(hasher.finalize())
    });
    let file_ext = input
        .filename
        .as_ref()
        .and_then(|f| f.rsplit_once('.'))
        .map(|(_, ext)| ext.to_string());

    let cct_unknown_rate =
        result.unknown_cct_count as f64 / (result.rows_accepted.max(1)) as f64;

    let metadata = crate::model::BatchMetadata {
        batch_id: String::new(),
        subject_ref: input.subject_ref.clone(),
        subject_ref_version: input.subject_ref_version,
        source: input.source.clone(),
        idempotency_key: idempotency_key.clone(),
        content_hash: content_hash.clone(),
        filename_hash: filename_hash.clone(),
        file_ext: file_ext.clone(),
        rows_accepted: result.rows_accepted,
        rows_rejected: result.rows_rejected,
        rejection_breakdown: result.rejection_breakdown.clone(),
        accepted_partial_rows: result.accepted_partial_rows,
        declared_range: input.declared_range,
        inferred_range: inferred,
        cct_unknown_rate,
        payer_token_present: result.payer_token_present,
        policy_version: config.policy_version.clone(),
    };

    let batch_id = commit(storage, metadata, &aggregates).await?;

    Ok(IngestOutcome {
        status: "accepted",
        batch_id,
        subject_ref: input.subject_ref,
        source: input.source,
        filename_hash,
        file_ext,
        content_hash,
        idempotency_key,
        rows_accepted: result.rows_accepted,
        rows_rejected: result.rows_rejected,
        rejection_breakdown: result.rejection_breakdown,
        accepted_partial_rows: result.accepted_partial_rows,
        declared_range: input.declared_range,
        inferred_range: inferred,
        daily_aggregate_days,
        daily_control_days,
        cct_unknown_rate,
        payer_token_present: result.payer_token_present,
        watermark_ts: None,
    })
}

pub async fn ingest_feed(
    input: FeedIngestInput,
    config: &Config,
    storage: &Arc<dyn StoragePort>,
) -> Result<IngestOutcome, IngestError> {
    let span = tracing::info_span!(
        "ingest_feed",
        subject_ref_hash = %hashed_subject(&input.subject_ref),
        source = %input.source
    );
    ingest_feed_inner(input, config, storage).instrument(span).await
}

async fn ingest_feed_inner(
    input: FeedIngestInput,
    config: &Config,
    storage: &Arc<dyn StoragePort>,
) -> Result<IngestOutcome, IngestError> {
    let watermark_ts = match (input.watermark_ts, config.allow_missing_watermark) {
        (Some(ts), _) => ts,
        (None, true) => Utc::now(),
        (None, false) => return Err(IngestError::BadRequest("watermark_ts is required".to_string())),
    };

    let parsed = events::parse(&input.events)?;
    let content_hash = parsed.content_hash.clone();

    let result = run_rows(parsed.rows, &input.subject_ref, config);
    check_guardrails(&result, config)?;
    check_declared_range(input.declared_range, &result.accepted)?;

    let inferred = inferred_range(&result.accepted);
    let (min_ts, max_ts) = event_ts_bounds(&result.accepted);
    let idempotency_key = idempotency::feed_key(
        &input.subject_ref,
        &input.source,
        watermark_ts,
        min_ts,
        max_ts,
        result.accepted.len(),
        &content_hash,
    );

    let aggregates = aggregate::aggregate(&input.subject_ref, &result.accepted);
    let daily_aggregate_days = aggregates.len() as u64;
    let daily_control_days = aggregates.len() as u64;

    let cct_unknown_rate =
        result.unknown_cct_count as f64 / (result.rows_accepted.max(1)) as f64;

    let metadata = crate::model::BatchMetadata {
        batch_id: String::new(),
        subject_ref: input.subject_ref.clone(),
        subject_ref_version: input.subject_ref_version,
        source: input.source.clone(),
        idempotency_key: idempotency_key.clone(),
        content_hash: content_hash.clone(),
        filename_hash: None,
        file_ext: None,
        rows_accepted: result.rows_accepted,
        rows_rejected: result.rows_rejected,
        rejection_breakdown: result.rejection_breakdown.clone(),
        accepted_partial_rows: result.accepted_partial_rows,
        declared_range: None,
        inferred_range: inferred,
        cct_unknown_rate,
        payer_token_present: result.payer_token_present,
        policy_version: config.policy_version.clone(),
    };

    let batch_id = commit(storage, metadata, &aggregates).await?;

    Ok(IngestOutcome {
        status: "accepted",
        batch_id,
        subject_ref: input.subject_ref,
        source: input.source,
        filename_hash: None,
        file_ext: None,
        content_hash,
        idempotency_key,
        rows_accepted: result.rows_accepted,
        rows_rejected: result.rows_rejected,
        rejection_breakdown: result.rejection_breakdown,
        accepted_partial_rows: result.accepted_partial_rows,
        declared_range: None,
        inferred_range: inferred,
        daily_aggregate_days,
        daily_control_days,
        cct_unknown_rate,
        payer_token_present: result.payer_token_present,
        watermark_ts: Some(watermark_ts),
    })
}

fn event_ts_bounds(
    accepted: &[(crate::model::CanonicalRecord, Cct)],
) -> (DateTime<FixedOffset>, DateTime<FixedOffset>) {
    let mut min = None;
    let mut max = None;
    for (record, _) in accepted {
        min = Some(min.map_or(record.event_ts, |m: DateTime<FixedOffset>| m.min(record.event_ts)));
        max = Some(max.map_or(record.event_ts, |m: DateTime<FixedOffset>| m.max(record.event_ts)));
    }
    let fallback = Utc::now().into();
    (min.unwrap_or(fallback), max.unwrap_or(fallback))
}

async fn commit(
    storage: &Arc<dyn StoragePort>,
    metadata: crate::model::BatchMetadata,
    aggregates: &[crate::model::DailyAggregate],
) -> Result<String, IngestError> {
    match storage.commit_batch(metadata, aggregates).await {
        Ok(id) => Ok(id),
        Err(CommitError::DuplicateBatch) => Err(IngestError::AlreadyIngested),
        Err(CommitError::Backend(_)) => Err(IngestError::Internal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemoryStore;
    use std::sync::Arc;

    fn csv_bytes(rows: &str) -> Vec<u8> {
        format!(
            "merchant_id,ts,amount,direction,channel,raw_narration\n{}",
            rows
        )
        .into_bytes()
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let storage: Arc<dyn StoragePort> = Arc::new(InMemoryStore::new());
        let config = Config::default();
        let input = TabularIngestInput {
            subject_ref: "S1".to_string(),
            subject_ref_version: None,
            source: "PAYTM".to_string(),
            bytes: csv_bytes(""),
            filename: None,
            declared_range: None,
        };
        let result = ingest_tabular(input, &config, &storage).await;
        assert_eq!(result.unwrap_err(), IngestError::EmptyBatch);
    }

    #[tokio::test]
    async fn accepted_batch_commits_and_aggregates() {
        let storage: Arc<dyn StoragePort> = Arc::new(InMemoryStore::new());
        let config = Config::default();
        let input = TabularIngestInput {
            subject_ref: "S1".to_string(),
            subject_ref_version: None,
            source: "PAYTM".to_string(),
            bytes: csv_bytes(
                "MRC,2025-11-05T09:01:00+05:30,120.50,credit,UPI,sale to customer\n",
            ),
            filename: Some("nov.csv".to_string()),
            declared_range: None,
        };
        let outcome = ingest_tabular(input, &config, &storage).await.unwrap();
        assert_eq!(outcome.rows_accepted, 1);
        assert_eq!(outcome.status, "accepted");
    }

    #[tokio::test]
    async fn duplicate_commit_is_already_ingested() {
        let storage: Arc<dyn StoragePort> = Arc::new(InMemoryStore::new());
        let config = Config::default();
        let bytes = csv_bytes("MRC,2025-11-05T09:01:00+05:30,120.50,credit,UPI,sale\n");
        let input1 = TabularIngestInput {
            subject_ref: "S1".to_string(),
            subject_ref_version: None,
            source: "PAYTM".to_string(),
            bytes: bytes.clone(),
            filename: None,
            declared_range: None,
        };
        let input2 = TabularIngestInput {
            subject_ref: "S1".to_string(),
            subject_ref_version: None,
            source: "PAYTM".to_string(),
            bytes,
            filename: None,
            declared_range: None,
        };
        ingest_tabular(input1, &config, &storage).await.unwrap();
        let second = ingest_tabular(input2, &config, &storage).await;
        assert_eq!(second.unwrap_err(), IngestError::AlreadyIngested);
    }

    #[tokio::test]
    async fn declared_range_violation_is_rejected_before_commit() {
        let storage: Arc<dyn StoragePort> = Arc::new(InMemoryStore::new());
        let config = Config::default();
        let input = TabularIngestInput {
            subject_ref: "S1".to_string(),
            subject_ref_version: None,
            source: "PAYTM".to_string(),
            bytes: csv_bytes("MRC,2025-11-06T09:01:00+05:30,120.50,credit,UPI,sale\n"),
            filename: None,
            declared_range: Some((
                NaiveDate::from_ymd_opt(2025, 11, 5).unwrap(),
                NaiveDate::from_ymd_opt(2025, 11, 5).unwrap(),
            )),
        };
        let result = ingest_tabular(input, &config, &storage).await;
        assert_eq!(result.unwrap_err(), IngestError::DeclaredRangeViolation);
        assert_eq!(InMemoryStore::new().batch_count().await, 0);
    }
}
