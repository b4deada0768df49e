//! Row validator (C3).
//!
//! For each row, checks required-field presence, timestamp parseability,
//! amount positivity, and direction/channel membership, in that order. The
//! first failure determines the rejection bucket; a row is never
//! double-counted.

use chrono::{DateTime, FixedOffset};
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::model::{Channel, Direction, RawRow, RejectionReason};

/// A row that has passed field-level validation but not yet the
/// status/quality gate.
#[derive(Debug, Clone)]
pub struct ValidatedRow {
    pub merchant_id: String,
    pub event_ts: DateTime<FixedOffset>,
    pub amount: Decimal,
    pub direction: Direction,
    pub channel: Channel,
    pub record_status: Option<String>,
    pub partial_record: bool,
    pub raw_category: Option<String>,
    pub raw_narration: Option<String>,
    pub raw_counterparty_token: Option<String>,
    pub payer_token: Option<String>,
}

pub fn validate(row: &RawRow) -> Result<ValidatedRow, RejectionReason> {
    let merchant_id = row
        .get("merchant_id")
        .filter(|s| !s.is_empty())
        .ok_or(RejectionReason::MissingRequiredField)?
        .to_string();

    let ts_raw = row
        .get("ts")
        .filter(|s| !s.is_empty())
        .ok_or(RejectionReason::MissingRequiredField)?;

    let amount_raw = row
        .get("amount")
        .filter(|s| !s.is_empty())
        .ok_or(RejectionReason::MissingRequiredField)?;

    let direction_raw = row
        .get("direction")
        .filter(|s| !s.is_empty())
        .ok_or(RejectionReason::MissingRequiredField)?;

    let channel_raw = row
        .get("channel")
        .filter(|s| !s.is_empty())
        .ok_or(RejectionReason::MissingRequiredField)?;

    let event_ts = parse_timestamp(ts_raw).ok_or(RejectionReason::InvalidTs)?;

    let amount = Decimal::from_str(amount_raw.trim()).map_err(|_| RejectionReason::InvalidAmount)?;
    if amount <= Decimal::ZERO {
        return Err(RejectionReason::InvalidAmount);
    }

    let direction = Direction::parse(direction_raw).ok_or(RejectionReason::InvalidDirection)?;
    let channel = Channel::parse(channel_raw).ok_or(RejectionReason::InvalidChannel)?;

    let partial_record = row
        .get("partial_record")
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1"))
        .unwrap_or(false);

    Ok(ValidatedRow {
        merchant_id,
        event_ts,
        amount,
        direction,
        channel,
        record_status: row.get("record_status").map(|s| s.to_string()),
        partial_record,
        raw_category: row.get("raw_category").map(|s| s.to_string()),
        raw_narration: row.get("raw_narration").map(|s| s.to_string()),
        raw_counterparty_token: row.get("raw_counterparty_token").map(|s| s.to_string()),
        payer_token: row.get("payer_token").map(|s| s.to_string()),
    })
}

/// Parses a timestamp that must carry an explicit offset. Bare local
/// timestamps without one are rejected rather than silently assumed UTC.
/// The parsed offset is kept as-is (never normalized to UTC) so later
/// calendar-day grouping reflects the record's own timezone, per the
/// "timezone preserved" requirement.
fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw.trim()).ok()
}
