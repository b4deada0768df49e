//! CCT classifier (C7).
//!
//! Maps the semantic result to a Cash Control Type, then applies the
//! threshold and ambiguity policies from spec.md §4.6.

use crate::classify::semantic;
use crate::config::Config;
use crate::model::{CanonicalRecord, Cct, CctResult, PurposeClass};

fn purpose_to_cct(purpose: PurposeClass) -> Cct {
    match purpose {
        PurposeClass::Sale => Cct::Free,
        PurposeClass::Inventory | PurposeClass::OpexOrStatutory => Cct::Constrained,
        PurposeClass::SettlementOrFee | PurposeClass::RefundOrReversal => Cct::PassThrough,
        PurposeClass::OwnerTransfer => Cct::Artificial,
        PurposeClass::Reimbursement => Cct::Conditional,
        PurposeClass::Unknown => Cct::Unknown,
    }
}

pub fn classify(record: &CanonicalRecord, config: &Config) -> CctResult {
    let mut candidates = semantic::candidates(record);
    let mut top1 = candidates.remove(0);
    let mut rules_fired = vec![top1.rule];
    rules_fired.extend(semantic::apply_adjustments(record, &mut top1));

    let top1_cct = purpose_to_cct(top1.purpose_class);
    let top1_conf = top1.base_confidence;

    // Next candidate landing in a genuinely different bucket; same-bucket
    // candidates are not a source of ambiguity (tie-break: top1 survives).
    let top2 = candidates
        .iter()
        .map(|c| (purpose_to_cct(c.purpose_class), c.base_confidence))
        .find(|(cct, _)| *cct != top1_cct);

    let top2_delta = top2.map(|(_, conf2)| (top1_conf - conf2).abs()).unwrap_or(1.0);

    let mut cct = top1_cct;

    if cct != Cct::Unknown {
        let threshold = config.threshold_for(cct);
        if threshold > 0.0 && top1_conf < threshold {
            rules_fired.push("below_confidence_threshold");
            cct = Cct::Unknown;
        }
    }

    if cct != Cct::Unknown {
        if let Some((cct2, conf2)) = top2 {
            let delta = (top1_conf - conf2).abs();
            if delta <= config.ambiguity_delta {
                rules_fired.push("ambiguity_policy_triggered");
                let _ = cct2;
                cct = Cct::Unknown;
            }
        }
    }

    CctResult {
        cct,
        confidence: top1_conf,
        top2_delta,
        rules_fired,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Channel, Direction};
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn record() -> CanonicalRecord {
        CanonicalRecord {
            subject_ref: "S".to_string(),
            merchant_id: "MRC".to_string(),
            event_ts: Utc::now().into(),
            amount: Decimal::from(500),
            direction: Direction::Credit,
            channel: Channel::Upi,
            raw_category: None,
            raw_narration: None,
            raw_counterparty_token: None,
            payer_token: None,
            partial_record: false,
        }
    }

    #[test]
    fn confident_sale_maps_to_free() {
        let r = record();
        let config = Config::default();
        let result = classify(&r, &config);
        assert_eq!(result.cct, Cct::Free);
    }

    #[test]
    fn low_confidence_unhinted_debit_is_unknown_via_threshold() {
        let mut r = record();
        r.direction = Direction::Debit;
        r.channel = Channel::Bank;
        r.amount = Decimal::from(80);
        let config = Config::default();
        let result = classify(&r, &config);
        assert_eq!(result.cct, Cct::Unknown);
    }

    #[test]
    fn ambiguous_competing_candidates_are_unknown() {
        let mut r = record();
        r.channel = Channel::Bank;
        r.raw_narration = Some("platform fee transfer to self account".to_string());
        let config = Config::default();
        let result = classify(&r, &config);
        assert_eq!(result.cct, Cct::Unknown);
        assert!(result.top2_delta <= config.ambiguity_delta);
    }

    #[test]
    fn zero_threshold_disables_the_gate() {
        let mut r = record();
        r.direction = Direction::Debit;
        r.channel = Channel::Bank;
        r.amount = Decimal::from(80);
        let mut config = Config::default();
        config.min_cct_confidence = 0.0;
        let result = classify(&r, &config);
        // Unhinted -> Unknown purpose already maps to Unknown CCT regardless of threshold.
        assert_eq!(result.cct, Cct::Unknown);
    }
}
