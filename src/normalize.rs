//! Normalizer (C5). Row map → canonical record. No side effects.

use crate::model::CanonicalRecord;
use crate::validate::ValidatedRow;

pub fn normalize(subject_ref: &str, row: ValidatedRow) -> CanonicalRecord {
    CanonicalRecord {
        subject_ref: subject_ref.to_string(),
        merchant_id: row.merchant_id,
        event_ts: row.event_ts,
        amount: row.amount,
        direction: row.direction,
        channel: row.channel,
        raw_category: row.raw_category,
        raw_narration: row.raw_narration,
        raw_counterparty_token: row.raw_counterparty_token,
        payer_token: row.payer_token,
        partial_record: row.partial_record,
    }
}
