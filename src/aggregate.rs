//! Aggregator (C9).
//!
//! Groups accepted, classified records by `event_ts.date()`. Internally
//! parallelized by day-partition via `rayon`, combined sequentially — the
//! combine step is order-insensitive (`Decimal` addition is exact, set
//! union is order-insensitive) so the result is byte-identical to a
//! sequential fold over the same input.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;
use rayon::prelude::*;
use rust_decimal::Decimal;

use crate::model::{BucketTotal, CanonicalRecord, Cct, DailyAggregate};

#[derive(Default, Clone)]
struct DayAccumulator {
    buckets: BTreeMap<(Cct, crate::model::FlowDirection), BucketTotal>,
    inflow_sum: Decimal,
    outflow_sum: Decimal,
    payer_tokens: HashSet<String>,
    partial_rows: u64,
    unknown_cct_count: u64,
}

impl DayAccumulator {
    fn add(&mut self, record: &CanonicalRecord, cct: Cct) {
        let dir = record.direction.flow();
        let bucket = self.buckets.entry((cct, dir)).or_default();
        bucket.sum += record.amount;
        bucket.count += 1;

        match dir {
            crate::model::FlowDirection::In => self.inflow_sum += record.amount,
            crate::model::FlowDirection::Out => self.outflow_sum += record.amount,
        }

        if let Some(token) = record.counterparty_token() {
            self.payer_tokens.insert(token.to_string());
        }
        if record.partial_record {
            self.partial_rows += 1;
        }
        if cct == Cct::Unknown {
            self.unknown_cct_count += 1;
        }
    }

    fn merge(mut self, other: DayAccumulator) -> DayAccumulator {
        for (key, total) in other.buckets {
            let entry = self.buckets.entry(key).or_default();
            entry.sum += total.sum;
            entry.count += total.count;
        }
        self.inflow_sum += other.inflow_sum;
        self.outflow_sum += other.outflow_sum;
        self.payer_tokens.extend(other.payer_tokens);
        self.partial_rows += other.partial_rows;
        self.unknown_cct_count += other.unknown_cct_count;
        self
    }

    fn finish(self, subject_ref: &str, date: NaiveDate) -> DailyAggregate {
        DailyAggregate {
            subject_ref: subject_ref.to_string(),
            date,
            inflow_sum: self.inflow_sum,
            outflow_sum: self.outflow_sum,
            buckets: self.buckets,
            unique_payers_count: self.payer_tokens.len() as u64,
            accepted_partial_rows: self.partial_rows,
            unknown_cct_count: self.unknown_cct_count,
        }
    }
}

/// Aggregates classified records into one `DailyAggregate` per day with at
/// least one accepted row. Days with zero accepted rows produce no row.
pub fn aggregate(
    subject_ref: &str,
    items: &[(CanonicalRecord, Cct)],
) -> Vec<DailyAggregate> {
    let partials: HashMap<NaiveDate, DayAccumulator> = items
        .par_iter()
        .fold(HashMap::new, |mut acc: HashMap<NaiveDate, DayAccumulator>, (record, cct)| {
            let date = record.event_ts.date_naive();
            acc.entry(date).or_default().add(record, *cct);
            acc
        })
        .reduce(HashMap::new, |mut a, b| {
            for (date, acc_b) in b {
                let merged = a.remove(&date).unwrap_or_default().merge(acc_b);
                a.insert(date, merged);
            }
            a
        });

    let mut out: Vec<DailyAggregate> = partials
        .into_iter()
        .map(|(date, acc)| acc.finish(subject_ref, date))
        .collect();
    out.sort_by_key(|d| d.date);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Channel, Direction};
    use chrono::{DateTime, FixedOffset, TimeZone};

    fn record(ts: DateTime<FixedOffset>, amount: i64, direction: Direction) -> CanonicalRecord {
        CanonicalRecord {
            subject_ref: "S".to_string(),
            merchant_id: "MRC".to_string(),
            event_ts: ts,
            amount: Decimal::from(amount),
            direction,
            channel: Channel::Upi,
            raw_category: None,
            raw_narration: None,
            raw_counterparty_token: None,
            payer_token: None,
            partial_record: false,
        }
    }

    fn ist() -> FixedOffset {
        FixedOffset::east_opt(5 * 3600 + 1800).unwrap()
    }

    #[test]
    fn buckets_by_day_and_direction() {
        let day1 = ist().with_ymd_and_hms(2025, 11, 5, 9, 0, 0).unwrap();
        let day2 = ist().with_ymd_and_hms(2025, 11, 6, 9, 0, 0).unwrap();
        let items = vec![
            (record(day1, 100, Direction::Credit), Cct::Free),
            (record(day1, 50, Direction::Debit), Cct::Unknown),
            (record(day2, 10, Direction::Credit), Cct::Free),
        ];
        let days = aggregate("S", &items);
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].date, day1.date_naive());
        assert_eq!(days[0].bucket(Cct::Free, crate::model::FlowDirection::In).count, 1);
        assert_eq!(
            days[0].bucket(Cct::Unknown, crate::model::FlowDirection::Out).count,
            1
        );
    }

    #[test]
    fn grouping_uses_the_record_s_own_offset_not_utc() {
        // 2025-11-05T01:00:00+05:30 is 2025-11-04T19:30:00Z: a UTC-based
        // grouping would misfile this under Nov 4.
        let ts = ist().with_ymd_and_hms(2025, 11, 5, 1, 0, 0).unwrap();
        let days = aggregate("S", &[(record(ts, 100, Direction::Credit), Cct::Free)]);
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].date, NaiveDate::from_ymd_opt(2025, 11, 5).unwrap());
    }

    #[test]
    fn zero_rows_produce_no_aggregate_row() {
        let days = aggregate("S", &[]);
        assert!(days.is_empty());
    }
}
