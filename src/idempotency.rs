//! Idempotency keying (C8).
//!
//! Tabular batch key: digest over
//! `subject_ref | source | content_hash | key_min_date | key_max_date`.
//! Event-feed key: digest over
//! `subject_ref | source | watermark_ts | min_ts | max_ts | event_count | content_hash`.
//! `subject_ref_version` never participates in either key.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use sha2::{Digest, Sha256};

pub fn tabular_key(
    subject_ref: &str,
    source: &str,
    content_hash: &str,
    key_min_date: NaiveDate,
    key_max_date: NaiveDate,
) -> String {
    let input = format!(
        "{}|{}|{}|{}|{}",
        subject_ref, source, content_hash, key_min_date, key_max_date
    );
    digest(&input)
}

pub fn feed_key(
    subject_ref: &str,
    source: &str,
    watermark_ts: DateTime<Utc>,
    min_ts: DateTime<FixedOffset>,
    max_ts: DateTime<FixedOffset>,
    event_count: usize,
    content_hash: &str,
) -> String {
    let input = format!(
        "{}|{}|{}|{}|{}|{}|{}",
        subject_ref,
        source,
        watermark_ts.to_rfc3339(),
        min_ts.to_rfc3339(),
        max_ts.to_rfc3339(),
        event_count,
        content_hash
    );
    digest(&input)
}

fn digest(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn same_input_yields_same_key() {
        let d1 = NaiveDate::from_ymd_opt(2025, 11, 5).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2025, 11, 6).unwrap();
        let a = tabular_key("S", "PAYTM", "hash1", d1, d2);
        let b = tabular_key("S", "PAYTM", "hash1", d1, d2);
        assert_eq!(a, b);
    }

    #[test]
    fn different_content_hash_yields_different_key() {
        let d1 = NaiveDate::from_ymd_opt(2025, 11, 5).unwrap();
        let a = tabular_key("S", "PAYTM", "hash1", d1, d1);
        let b = tabular_key("S", "PAYTM", "hash2", d1, d1);
        assert_ne!(a, b);
    }
}
