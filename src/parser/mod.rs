//! Parser adapters (C2).
//!
//! Both adapters share the same output shape: a sequence of row-maps plus a
//! stable `content_hash` over the raw input. Neither adapter retains the raw
//! bytes/payload once rows are produced.

pub mod events;
pub mod tabular;

use crate::model::RawRow;

/// Columns every adapter must find before producing a single row.
pub const REQUIRED_COLUMNS: [&str; 5] = ["merchant_id", "ts", "amount", "direction", "channel"];

/// Optional columns adapters are allowed to carry through; anything else is
/// dropped at the parser boundary.
pub const OPTIONAL_COLUMNS: [&str; 6] = [
    "record_status",
    "partial_record",
    "raw_category",
    "raw_narration",
    "raw_counterparty_token",
    "payer_token",
];

#[derive(Debug)]
pub struct ParsedBatch {
    pub rows: Vec<RawRow>,
    pub content_hash: String,
}

fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
