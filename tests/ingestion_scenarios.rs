//! Concrete ingestion scenarios against the in-memory storage port.

use std::sync::Arc;

use cashflow_ingest::config::Config;
use cashflow_ingest::error::IngestError;
use cashflow_ingest::model::{Cct, FlowDirection};
use cashflow_ingest::orchestrator::{ingest_tabular, TabularIngestInput};
use cashflow_ingest::storage::memory::InMemoryStore;
use cashflow_ingest::storage::StoragePort;
use chrono::NaiveDate;

fn csv(header_extra: &str, rows: &str) -> Vec<u8> {
    format!(
        "merchant_id,ts,amount,direction,channel{}\n{}",
        header_extra, rows
    )
    .into_bytes()
}

fn input(bytes: Vec<u8>, declared_range: Option<(NaiveDate, NaiveDate)>) -> TabularIngestInput {
    TabularIngestInput {
        subject_ref: "S1".to_string(),
        subject_ref_version: None,
        source: "PAYTM".to_string(),
        bytes,
        filename: None,
        declared_range,
    }
}

#[tokio::test]
async fn s1_happy_path_tabular() {
    let store = InMemoryStore::new();
    let storage: Arc<dyn StoragePort> = Arc::new(store.clone());
    let config = Config::default();
    let bytes = csv(
        "",
        "MRC,2025-11-05T09:01:00+05:30,120.50,credit,UPI\n\
         MRC,2025-11-05T12:45:10+05:30,80.00,debit,BANK\n",
    );
    let outcome = ingest_tabular(input(bytes, None), &config, &storage)
        .await
        .unwrap();

    assert_eq!(outcome.rows_accepted, 2);
    assert_eq!(outcome.rows_rejected, 0);
    assert_eq!(outcome.daily_aggregate_days, 1);
    assert!((outcome.cct_unknown_rate - 0.5).abs() < 1e-9);

    let date = NaiveDate::from_ymd_opt(2025, 11, 5).unwrap();
    let day = store.daily_aggregate("S1", date).await.unwrap();
    assert!(day.bucket(Cct::Free, FlowDirection::In).count >= 1);
    assert_eq!(day.bucket(Cct::Unknown, FlowDirection::Out).count, 1);
}

#[tokio::test]
async fn s2_duplicate_ingestion_is_rejected() {
    let storage: Arc<dyn StoragePort> = Arc::new(InMemoryStore::new());
    let config = Config::default();
    let bytes = csv("", "MRC,2025-11-05T09:01:00+05:30,120.50,credit,UPI\n");

    ingest_tabular(input(bytes.clone(), None), &config, &storage)
        .await
        .unwrap();
    let second = ingest_tabular(input(bytes, None), &config, &storage).await;
    assert_eq!(second.unwrap_err(), IngestError::AlreadyIngested);
}

#[tokio::test]
async fn s3_validation_mix() {
    let storage: Arc<dyn StoragePort> = Arc::new(InMemoryStore::new());
    let config = Config::default();
    let rows = "\
MRC,2025-11-05T09:00:00+05:30,10,credit,UPI
MRC,2025-11-05T09:01:00+05:30,10,credit,UPI
MRC,2025-11-05T09:02:00+05:30,10,credit,UPI
MRC,2025-11-05T09:03:00+05:30,10,credit,UPI
MRC,2025-11-05T09:04:00+05:30,10,credit,UPI
MRC,2025-11-05T09:05:00+05:30,10,credit,UPI
MRC,2025-11-05T09:06:00+05:30,0,credit,UPI
MRC,2025-11-05T09:07:00+05:30,0,credit,UPI
MRC,2025-11-05T09:08:00+05:30,10,foo,UPI
MRC,not-a-date,10,credit,UPI
";
    let outcome = ingest_tabular(input(csv("", rows), None), &config, &storage)
        .await
        .unwrap();

    assert_eq!(outcome.rows_accepted, 6);
    assert_eq!(outcome.rows_rejected, 4);
    assert_eq!(outcome.rejection_breakdown.get("INVALID_AMOUNT"), Some(&2));
    assert_eq!(outcome.rejection_breakdown.get("INVALID_DIRECTION"), Some(&1));
    assert_eq!(outcome.rejection_breakdown.get("INVALID_TS"), Some(&1));
}

#[tokio::test]
async fn s4_status_gate() {
    let storage: Arc<dyn StoragePort> = Arc::new(InMemoryStore::new());
    let config = Config::default();
    let rows = "\
MRC,2025-11-05T09:00:00+05:30,10,credit,UPI,SUCCESS
MRC,2025-11-05T09:01:00+05:30,10,credit,UPI,SUCCESS
MRC,2025-11-05T09:02:00+05:30,10,credit,UPI,SUCCESS
MRC,2025-11-05T09:03:00+05:30,10,credit,UPI,FAILED_TIMEOUT
MRC,2025-11-05T09:04:00+05:30,10,credit,UPI,PARTIAL_XYZ
";
    let outcome = ingest_tabular(
        input(csv(",record_status", rows), None),
        &config,
        &storage,
    )
    .await
    .unwrap();

    assert_eq!(outcome.rows_accepted, 3);
    assert_eq!(outcome.rejection_breakdown.get("FAILED_TIMEOUT"), Some(&1));
    assert_eq!(outcome.rejection_breakdown.get("UNKNOWN_STATUS"), Some(&1));
}

#[tokio::test]
async fn s5_partial_flag_does_not_reject() {
    let storage: Arc<dyn StoragePort> = Arc::new(InMemoryStore::new());
    let config = Config::default();
    let rows = "\
MRC,2025-11-05T09:00:00+05:30,10,credit,UPI,SUCCESS,true
MRC,2025-11-05T09:01:00+05:30,10,credit,UPI,SUCCESS,true
MRC,2025-11-05T09:02:00+05:30,10,credit,UPI,SUCCESS,false
MRC,2025-11-05T09:03:00+05:30,10,credit,UPI,SUCCESS,false
";
    let outcome = ingest_tabular(
        input(csv(",record_status,partial_record", rows), None),
        &config,
        &storage,
    )
    .await
    .unwrap();

    assert_eq!(outcome.rows_accepted, 4);
    assert_eq!(outcome.rows_rejected, 0);
    assert_eq!(outcome.accepted_partial_rows, 2);
}

#[tokio::test]
async fn s6_declared_range_violation_blocks_persistence() {
    let store = InMemoryStore::new();
    let storage: Arc<dyn StoragePort> = Arc::new(store.clone());
    let config = Config::default();
    let bytes = csv("", "MRC,2025-11-06T09:00:00+05:30,10,credit,UPI\n");
    let declared = Some((
        NaiveDate::from_ymd_opt(2025, 11, 5).unwrap(),
        NaiveDate::from_ymd_opt(2025, 11, 5).unwrap(),
    ));
    let result = ingest_tabular(input(bytes, declared), &config, &storage).await;
    assert_eq!(result.unwrap_err(), IngestError::DeclaredRangeViolation);

    assert_eq!(store.batch_count().await, 0);
}

#[tokio::test]
async fn s7_ambiguous_hints_degrade_to_unknown() {
    let store = InMemoryStore::new();
    let storage: Arc<dyn StoragePort> = Arc::new(store.clone());
    let config = Config::default();
    let rows = "MRC,2025-11-05T09:00:00+05:30,500,credit,BANK,\"platform fee transfer to self account\"\n";
    let outcome = ingest_tabular(
        input(csv(",raw_narration", rows), None),
        &config,
        &storage,
    )
    .await
    .unwrap();

    assert_eq!(outcome.rows_accepted, 1);
    assert!((outcome.cct_unknown_rate - 1.0).abs() < 1e-9);

    let date = NaiveDate::from_ymd_opt(2025, 11, 5).unwrap();
    let day = store.daily_aggregate("S1", date).await.unwrap();
    assert_eq!(day.unknown_cct_count, 1);
}

#[tokio::test]
async fn s8_aggregation_and_declared_range_use_the_record_s_own_offset() {
    // 2025-11-05T01:00:00+05:30 is 2025-11-04T19:30:00Z: if grouping or
    // range-checking used the UTC date instead of the record's own offset,
    // this row would land on Nov 4 and be spuriously rejected against a
    // declared range of [Nov 5, Nov 5].
    let store = InMemoryStore::new();
    let storage: Arc<dyn StoragePort> = Arc::new(store.clone());
    let config = Config::default();
    let bytes = csv("", "MRC,2025-11-05T01:00:00+05:30,50,credit,UPI\n");
    let declared = Some((
        NaiveDate::from_ymd_opt(2025, 11, 5).unwrap(),
        NaiveDate::from_ymd_opt(2025, 11, 5).unwrap(),
    ));
    let outcome = ingest_tabular(input(bytes, declared), &config, &storage)
        .await
        .unwrap();
    assert_eq!(outcome.rows_accepted, 1);

    let date = NaiveDate::from_ymd_opt(2025, 11, 5).unwrap();
    let day = store.daily_aggregate("S1", date).await.unwrap();
    assert_eq!(day.inflow_sum, rust_decimal::Decimal::from(50));
}
