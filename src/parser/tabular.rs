use std::collections::BTreeMap;

use crate::error::IngestError;
use crate::model::RawRow;

use super::{sha256_hex, ParsedBatch, OPTIONAL_COLUMNS, REQUIRED_COLUMNS};

/// Decodes delimited bytes into row-maps. Fails fast with
/// `MISSING_REQUIRED_COLUMN` if any of the five required columns is absent
/// from the header row. All columns other than the required five and the
/// known optional allow-list are dropped.
pub fn parse(bytes: &[u8]) -> Result<ParsedBatch, IngestError> {
    let content_hash = sha256_hex(bytes);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers = reader
        .headers()
        .map_err(|e| IngestError::BadRequest(e.to_string()))?
        .clone();

    for required in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h == required) {
            return Err(IngestError::MissingRequiredColumn(required.to_string()));
        }
    }

    let kept_columns: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .chain(OPTIONAL_COLUMNS.iter())
        .copied()
        .filter(|col| headers.iter().any(|h| h == *col))
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| IngestError::BadRequest(e.to_string()))?;
        let mut fields = BTreeMap::new();
        for column in &kept_columns {
            if let Some(idx) = headers.iter().position(|h| h == *column) {
                if let Some(value) = record.get(idx) {
                    fields.insert(column.to_string(), value.trim().to_string());
                }
            }
        }
        rows.push(RawRow { fields });
    }

    Ok(ParsedBatch { rows, content_hash })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_required_column() {
        let csv = "merchant_id,ts,amount,direction\nMRC,2025-11-05T09:01:00+05:30,10,credit\n";
        let result = parse(csv.as_bytes());
        assert_eq!(
            result.unwrap_err(),
            IngestError::MissingRequiredColumn("channel".to_string())
        );
    }

    #[test]
    fn drops_unknown_columns_keeps_optional_ones() {
        let csv = "merchant_id,ts,amount,direction,channel,raw_narration,suspicious_col\n\
                   MRC,2025-11-05T09:01:00+05:30,120.50,credit,UPI,sale to customer,drop-me\n";
        let parsed = parse(csv.as_bytes()).unwrap();
        assert_eq!(parsed.rows.len(), 1);
        let row = &parsed.rows[0];
        assert_eq!(row.get("raw_narration"), Some("sale to customer"));
        assert_eq!(row.get("suspicious_col"), None);
    }

    #[test]
    fn content_hash_is_deterministic() {
        let csv = "merchant_id,ts,amount,direction,channel\nMRC,2025-11-05T09:01:00+05:30,1,credit,UPI\n";
        let a = parse(csv.as_bytes()).unwrap();
        let b = parse(csv.as_bytes()).unwrap();
        assert_eq!(a.content_hash, b.content_hash);
    }
}
