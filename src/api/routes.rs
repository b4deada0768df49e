use axum::extract::{Multipart, State as AxumState};
use axum::response::Json;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::IngestError;
use crate::orchestrator::{self, FeedIngestInput, IngestOutcome, TabularIngestInput};

use super::AppState;

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

fn parse_declared_range(
    start: Option<String>,
    end: Option<String>,
) -> Result<Option<(NaiveDate, NaiveDate)>, IngestError> {
    match (start, end) {
        (None, None) => Ok(None),
        (Some(s), Some(e)) => {
            let start = NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .map_err(|_| IngestError::BadRequest("invalid input_start_date".to_string()))?;
            let end = NaiveDate::parse_from_str(&e, "%Y-%m-%d")
                .map_err(|_| IngestError::BadRequest("invalid input_end_date".to_string()))?;
            Ok(Some((start, end)))
        }
        _ => Err(IngestError::BadRequest(
            "input_start_date and input_end_date must be supplied together".to_string(),
        )),
    }
}

pub async fn ingest_tabular(
    AxumState(state): AxumState<AppState>,
    mut multipart: Multipart,
) -> Result<Json<IngestOutcome>, IngestError> {
    let mut subject_ref: Option<String> = None;
    let mut subject_ref_version: Option<String> = None;
    let mut source: Option<String> = None;
    let mut input_start_date: Option<String> = None;
    let mut input_end_date: Option<String> = None;
    let mut bytes: Option<Vec<u8>> = None;
    let mut filename: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| IngestError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "subject_ref" => {
                subject_ref = Some(field.text().await.map_err(|e| IngestError::BadRequest(e.to_string()))?)
            }
            "subject_ref_version" => {
                subject_ref_version =
                    Some(field.text().await.map_err(|e| IngestError::BadRequest(e.to_string()))?)
            }
            "source" => {
                source = Some(field.text().await.map_err(|e| IngestError::BadRequest(e.to_string()))?)
            }
            "input_start_date" => {
                input_start_date =
                    Some(field.text().await.map_err(|e| IngestError::BadRequest(e.to_string()))?)
            }
            "input_end_date" => {
                input_end_date =
                    Some(field.text().await.map_err(|e| IngestError::BadRequest(e.to_string()))?)
            }
            "file" => {
                filename = field.file_name().map(|s| s.to_string());
                bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| IngestError::BadRequest(e.to_string()))?
                        .to_vec(),
                );
            }
            _ => {}
        }
    }

    let subject_ref =
        subject_ref.ok_or_else(|| IngestError::BadRequest("subject_ref is required".to_string()))?;
    let source = source.ok_or_else(|| IngestError::BadRequest("source is required".to_string()))?;
    let bytes = bytes.ok_or_else(|| IngestError::BadRequest("file is required".to_string()))?;
    let declared_range = parse_declared_range(input_start_date, input_end_date)?;

    let input = TabularIngestInput {
        subject_ref,
        subject_ref_version,
        source,
        bytes,
        filename,
        declared_range,
    };

    let outcome = orchestrator::ingest_tabular(input, &state.config, &state.storage).await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct FeedRequest {
    pub subject_ref: String,
    pub subject_ref_version: Option<String>,
    pub source: String,
    pub watermark_ts: Option<chrono::DateTime<chrono::Utc>>,
    pub events: Vec<Value>,
    pub input_start_date: Option<String>,
    pub input_end_date: Option<String>,
}

pub async fn ingest_feed(
    AxumState(state): AxumState<AppState>,
    Json(request): Json<FeedRequest>,
) -> Result<Json<IngestOutcome>, IngestError> {
    let declared_range =
        parse_declared_range(request.input_start_date, request.input_end_date)?;

    let input = FeedIngestInput {
        subject_ref: request.subject_ref,
        subject_ref_version: request.subject_ref_version,
        source: request.source,
        watermark_ts: request.watermark_ts,
        events: request.events,
        declared_range,
    };

    let outcome = orchestrator::ingest_feed(input, &state.config, &state.storage).await?;
    Ok(Json(outcome))
}
