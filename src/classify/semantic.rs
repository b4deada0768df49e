//! Semantic classifier (C6).
//!
//! Priority-ordered rule table, starting confidences per rule, then additive
//! adjustments. Operates purely on ephemeral per-record signals — direction,
//! channel, amount, and optional text hints — never on cross-row history.
//!
//! Every rule is evaluated independently (not short-circuited) so the CCT
//! classifier (C7) can see the top-2 candidates it needs for its ambiguity
//! policy: a record whose hints satisfy two rule clauses at once (e.g. a
//! narration mentioning both a fee and a refund) produces two close-ranked
//! candidates rather than just the highest-priority one.

use rust_decimal::Decimal;

use crate::model::{CanonicalRecord, Channel, Direction, PurposeClass, RoleClass, SemanticResult};

const FEE_KEYWORDS: &[&str] = &["fee", "charge", "commission", "service charge"];
const REFUND_KEYWORDS: &[&str] = &["refund", "reversal", "chargeback", "return"];
const OWNER_KEYWORDS: &[&str] = &["self transfer", "own account", "owner transfer", "self"];
const PLATFORM_KEYWORDS: &[&str] = &["settlement", "payout", "platform fee", "platform payout"];
const SUPPLIER_KEYWORDS: &[&str] = &["supplier", "wholesale", "inventory", "purchase order"];
const STATUTORY_KEYWORDS: &[&str] = &["rent", "utility", "electricity", "gst", "tax", "statutory"];
const REIMBURSEMENT_KEYWORDS: &[&str] = &["reimbursement", "claim", "subsidy"];

/// Amounts at or above this, and evenly divisible by 1000, read as
/// "recurring large round transfer" — the owner-transfer tell called out in
/// spec.md §4.5 rule 3. This threshold is a policy choice, not a spec value
/// (spec.md §9 notes exact recurrence detectors are policy, belonging to a
/// `policy_version` bump).
const LARGE_ROUND_TRANSFER_FLOOR: i64 = 10_000;

/// Credit amounts below this read as a plausible retail sale ticket.
const SALE_TICKET_CEILING: i64 = 50_000;

#[derive(Debug, Clone)]
pub struct Candidate {
    pub role_class: RoleClass,
    pub purpose_class: PurposeClass,
    pub base_confidence: f64,
    pub rule: &'static str,
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    let lower = haystack.to_ascii_lowercase();
    needles.iter().any(|n| lower.contains(n))
}

fn text_hints(record: &CanonicalRecord) -> String {
    let mut combined = String::new();
    if let Some(c) = &record.raw_category {
        combined.push_str(c);
        combined.push(' ');
    }
    if let Some(n) = &record.raw_narration {
        combined.push_str(n);
        combined.push(' ');
    }
    if let Some(t) = &record.raw_counterparty_token {
        combined.push_str(t);
    }
    combined
}

fn is_large_round(amount: Decimal) -> bool {
    let floor = Decimal::from(LARGE_ROUND_TRANSFER_FLOOR);
    amount >= floor && (amount % Decimal::from(1000)) == Decimal::ZERO
}

/// Evaluates every rule in priority order, returning every clause that
/// matched (not just the first). The first entry is the rule the legacy
/// single-result `classify` would have returned.
pub fn candidates(record: &CanonicalRecord) -> Vec<Candidate> {
    let hints = text_hints(record);
    let mut out = Vec::new();

    if contains_any(&hints, FEE_KEYWORDS) {
        out.push(Candidate {
            role_class: RoleClass::Platform,
            purpose_class: PurposeClass::SettlementOrFee,
            base_confidence: 0.85,
            rule: "fee_or_charge_keyword",
        });
    }
    if contains_any(&hints, REFUND_KEYWORDS) {
        out.push(Candidate {
            role_class: RoleClass::Customer,
            purpose_class: PurposeClass::RefundOrReversal,
            base_confidence: 0.85,
            rule: "refund_or_reversal_keyword",
        });
    }
    if contains_any(&hints, OWNER_KEYWORDS)
        || (record.direction == Direction::Debit && is_large_round(record.amount))
    {
        out.push(Candidate {
            role_class: RoleClass::SelfOwner,
            purpose_class: PurposeClass::OwnerTransfer,
            base_confidence: 0.80,
            rule: "owner_or_self_transfer_indicator",
        });
    }
    if contains_any(&hints, PLATFORM_KEYWORDS) || record.channel == Channel::CodSettlement {
        out.push(Candidate {
            role_class: RoleClass::Platform,
            purpose_class: PurposeClass::SettlementOrFee,
            base_confidence: 0.80,
            rule: "platform_settlement_indicator",
        });
    }
    if contains_any(&hints, SUPPLIER_KEYWORDS) {
        out.push(Candidate {
            role_class: RoleClass::Supplier,
            purpose_class: PurposeClass::Inventory,
            base_confidence: 0.75,
            rule: "supplier_or_wholesale_keyword",
        });
    }
    if contains_any(&hints, STATUTORY_KEYWORDS) {
        out.push(Candidate {
            role_class: RoleClass::StatutoryOrUtility,
            purpose_class: PurposeClass::OpexOrStatutory,
            base_confidence: 0.75,
            rule: "utility_rent_or_statutory_keyword",
        });
    }
    if record.direction == Direction::Credit
        && matches!(record.channel, Channel::Upi | Channel::Card | Channel::Wallet)
        && record.amount <= Decimal::from(SALE_TICKET_CEILING)
    {
        out.push(Candidate {
            role_class: RoleClass::Customer,
            purpose_class: PurposeClass::Sale,
            base_confidence: 0.70,
            rule: "sale_like_credit_pattern",
        });
    }
    if contains_any(&hints, REIMBURSEMENT_KEYWORDS) {
        out.push(Candidate {
            role_class: RoleClass::Customer,
            purpose_class: PurposeClass::Reimbursement,
            base_confidence: 0.70,
            rule: "reimbursement_or_claim_keyword",
        });
    }
    if out.is_empty() {
        out.push(Candidate {
            role_class: RoleClass::Unknown,
            purpose_class: PurposeClass::Unknown,
            base_confidence: 0.30,
            rule: "no_rule_matched",
        });
    }

    out
}

/// Adjusts the chosen (top) candidate's confidence in place, returning the
/// adjustment labels that fired.
pub fn apply_adjustments(record: &CanonicalRecord, top: &mut Candidate) -> Vec<&'static str> {
    let mut fired = Vec::new();
    if top.purpose_class == PurposeClass::OwnerTransfer && is_large_round(record.amount) {
        if record.direction == Direction::Debit {
            top.base_confidence += 0.15;
            fired.push("recurrence_matches_expected_pattern");
        } else {
            top.base_confidence -= 0.20;
            fired.push("owner_like_amount_with_conflicting_direction");
        }
    }
    if top.purpose_class == PurposeClass::Sale && record.direction == Direction::Debit {
        top.base_confidence -= 0.20;
        fired.push("conflicting_direction_for_sale_label");
    }
    top.base_confidence = top.base_confidence.clamp(0.0, 1.0);
    fired
}

/// Convenience single-result view used outside the CCT classifier (tests,
/// explainability dumps): first-match-wins candidate, adjusted.
pub fn classify(record: &CanonicalRecord) -> SemanticResult {
    let mut cands = candidates(record);
    let mut top = cands.remove(0);
    let mut rules_fired = vec![top.rule];
    rules_fired.extend(apply_adjustments(record, &mut top));

    SemanticResult {
        role_class: top.role_class,
        purpose_class: top.purpose_class,
        base_confidence: top.base_confidence,
        rules_fired,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Channel, Direction};
    use chrono::Utc;

    fn record(direction: Direction, channel: Channel, amount: i64) -> CanonicalRecord {
        CanonicalRecord {
            subject_ref: "S".to_string(),
            merchant_id: "MRC".to_string(),
            event_ts: Utc::now().into(),
            amount: Decimal::from(amount),
            direction,
            channel,
            raw_category: None,
            raw_narration: None,
            raw_counterparty_token: None,
            payer_token: None,
            partial_record: false,
        }
    }

    #[test]
    fn small_upi_credit_reads_as_sale() {
        let r = record(Direction::Credit, Channel::Upi, 120);
        let result = classify(&r);
        assert_eq!(result.purpose_class, PurposeClass::Sale);
        assert!((result.base_confidence - 0.70).abs() < 1e-9);
    }

    #[test]
    fn unhinted_debit_is_unknown() {
        let r = record(Direction::Debit, Channel::Bank, 80);
        let result = classify(&r);
        assert_eq!(result.purpose_class, PurposeClass::Unknown);
        assert!((result.base_confidence - 0.30).abs() < 1e-9);
    }

    #[test]
    fn large_round_debit_reads_as_owner_transfer_with_bonus() {
        let r = record(Direction::Debit, Channel::Bank, 50_000);
        let result = classify(&r);
        assert_eq!(result.purpose_class, PurposeClass::OwnerTransfer);
        assert!((result.base_confidence - 0.95).abs() < 1e-9);
    }

    #[test]
    fn conflicting_hints_produce_two_close_candidates() {
        let mut r = record(Direction::Credit, Channel::Bank, 500);
        r.raw_narration = Some("platform fee with partial refund".to_string());
        let cands = candidates(&r);
        assert!(cands.len() >= 2);
        assert_eq!(cands[0].purpose_class, PurposeClass::SettlementOrFee);
        assert_eq!(cands[1].purpose_class, PurposeClass::RefundOrReversal);
    }
}
