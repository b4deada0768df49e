//! Canonical model & enums
//!
//! Everything in this module that is marked ephemeral must never outlive a
//! single ingestion request. Only `BatchMetadata` and `DailyAggregate` cross
//! the storage port boundary.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Credit,
    Debit,
}

impl Direction {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "credit" => Some(Self::Credit),
            "debit" => Some(Self::Debit),
            _ => None,
        }
    }

    pub fn flow(self) -> FlowDirection {
        match self {
            Direction::Credit => FlowDirection::In,
            Direction::Debit => FlowDirection::Out,
        }
    }
}

/// Aggregate-level flow direction. Distinct from `Direction` because the
/// aggregator only ever needs to know in/out, never the original label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FlowDirection {
    In,
    Out,
}

impl FlowDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            FlowDirection::In => "IN",
            FlowDirection::Out => "OUT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    Upi,
    Card,
    Bank,
    NetBanking,
    Wallet,
    CodSettlement,
}

impl Channel {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "UPI" => Some(Self::Upi),
            "CARD" => Some(Self::Card),
            "BANK" => Some(Self::Bank),
            "NET_BANKING" => Some(Self::NetBanking),
            "WALLET" => Some(Self::Wallet),
            "COD_SETTLEMENT" => Some(Self::CodSettlement),
            _ => None,
        }
    }
}

/// Cash Control Type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Cct {
    Free,
    Constrained,
    PassThrough,
    Artificial,
    Conditional,
    Unknown,
}

impl Cct {
    pub const ALL: [Cct; 6] = [
        Cct::Free,
        Cct::Constrained,
        Cct::PassThrough,
        Cct::Artificial,
        Cct::Conditional,
        Cct::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Cct::Free => "FREE",
            Cct::Constrained => "CONSTRAINED",
            Cct::PassThrough => "PASS_THROUGH",
            Cct::Artificial => "ARTIFICIAL",
            Cct::Conditional => "CONDITIONAL",
            Cct::Unknown => "UNKNOWN",
        }
    }
}

/// Coarse role of the counterparty in the transaction, used only as an
/// explainability signal alongside `PurposeClass`; it does not participate
/// in CCT thresholding itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoleClass {
    Customer,
    SelfOwner,
    Platform,
    Supplier,
    StatutoryOrUtility,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PurposeClass {
    SettlementOrFee,
    RefundOrReversal,
    OwnerTransfer,
    Inventory,
    OpexOrStatutory,
    Sale,
    Reimbursement,
    Unknown,
}

/// Per-row rejection reasons. Counted only — never attached to any surviving
/// record, never logged with row content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionReason {
    MissingRequiredField,
    InvalidTs,
    InvalidAmount,
    InvalidDirection,
    InvalidChannel,
    FailedInsufficientFunds,
    FailedTimeout,
    FailedNetwork,
    InvalidToken,
    UnknownStatus,
}

impl RejectionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectionReason::MissingRequiredField => "MISSING_REQUIRED_FIELD",
            RejectionReason::InvalidTs => "INVALID_TS",
            RejectionReason::InvalidAmount => "INVALID_AMOUNT",
            RejectionReason::InvalidDirection => "INVALID_DIRECTION",
            RejectionReason::InvalidChannel => "INVALID_CHANNEL",
            RejectionReason::FailedInsufficientFunds => "FAILED_INSUFFICIENT_FUNDS",
            RejectionReason::FailedTimeout => "FAILED_TIMEOUT",
            RejectionReason::FailedNetwork => "FAILED_NETWORK",
            RejectionReason::InvalidToken => "INVALID_TOKEN",
            RejectionReason::UnknownStatus => "UNKNOWN_STATUS",
        }
    }
}

/// A row that survived parsing + required-column enforcement, prior to
/// field-level validation. Owned entirely by the request; never stored.
#[derive(Debug, Clone, Default)]
pub struct RawRow {
    pub fields: BTreeMap<String, String>,
}

impl RawRow {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(|s| s.as_str())
    }
}

/// Ephemeral canonical record. Never placed in a long-lived container and
/// never referenced beyond the batch that produced it.
#[derive(Debug, Clone)]
pub struct CanonicalRecord {
    pub subject_ref: String,
    pub merchant_id: String,
    pub event_ts: DateTime<FixedOffset>,
    pub amount: Decimal,
    pub direction: Direction,
    pub channel: Channel,
    pub raw_category: Option<String>,
    pub raw_narration: Option<String>,
    pub raw_counterparty_token: Option<String>,
    pub payer_token: Option<String>,
    pub partial_record: bool,
}

impl CanonicalRecord {
    pub fn counterparty_token(&self) -> Option<&str> {
        self.payer_token
            .as_deref()
            .or(self.raw_counterparty_token.as_deref())
    }
}

#[derive(Debug, Clone)]
pub struct SemanticResult {
    pub role_class: RoleClass,
    pub purpose_class: PurposeClass,
    pub base_confidence: f64,
    pub rules_fired: Vec<&'static str>,
}

#[derive(Debug, Clone)]
pub struct CctResult {
    pub cct: Cct,
    pub confidence: f64,
    pub top2_delta: f64,
    pub rules_fired: Vec<&'static str>,
}

/// Persisted. Owned by the storage port after commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchMetadata {
    pub batch_id: String,
    pub subject_ref: String,
    pub subject_ref_version: Option<String>,
    pub source: String,
    pub idempotency_key: String,
    pub content_hash: String,
    pub filename_hash: Option<String>,
    pub file_ext: Option<String>,
    pub rows_accepted: u64,
    pub rows_rejected: u64,
    pub rejection_breakdown: BTreeMap<String, u64>,
    pub accepted_partial_rows: u64,
    pub declared_range: Option<(NaiveDate, NaiveDate)>,
    pub inferred_range: (NaiveDate, NaiveDate),
    pub cct_unknown_rate: f64,
    pub payer_token_present: bool,
    pub policy_version: String,
}

/// Persisted. Primary key `(subject_ref, date)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyAggregate {
    pub subject_ref: String,
    pub date: NaiveDate,
    pub inflow_sum: Decimal,
    pub outflow_sum: Decimal,
    pub buckets: BTreeMap<(Cct, FlowDirection), BucketTotal>,
    pub unique_payers_count: u64,
    pub accepted_partial_rows: u64,
    pub unknown_cct_count: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BucketTotal {
    pub sum: Decimal,
    pub count: u64,
}

/// Division guard used throughout derived-ratio computation.
pub const EPSILON: f64 = 1e-9;

impl DailyAggregate {
    pub fn bucket(&self, cct: Cct, dir: FlowDirection) -> BucketTotal {
        self.buckets.get(&(cct, dir)).copied().unwrap_or_default()
    }

    pub fn free_cash_net(&self) -> Decimal {
        self.bucket(Cct::Free, FlowDirection::In).sum - self.bucket(Cct::Free, FlowDirection::Out).sum
    }

    pub fn total_in_sum(&self) -> Decimal {
        Cct::ALL
            .iter()
            .map(|c| self.bucket(*c, FlowDirection::In).sum)
            .sum()
    }

    pub fn total_flow(&self) -> Decimal {
        Cct::ALL
            .iter()
            .flat_map(|c| {
                [
                    self.bucket(*c, FlowDirection::In).sum,
                    self.bucket(*c, FlowDirection::Out).sum,
                ]
            })
            .sum()
    }

    pub fn owner_dependency_ratio(&self) -> f64 {
        let numerator = self
            .bucket(Cct::Artificial, FlowDirection::In)
            .sum
            .to_f64()
            .unwrap_or(0.0);
        let denominator = self.total_in_sum().to_f64().unwrap_or(0.0);
        numerator / denominator.max(EPSILON)
    }

    pub fn pass_through_ratio(&self) -> f64 {
        let numerator = (self.bucket(Cct::PassThrough, FlowDirection::In).sum
            + self.bucket(Cct::PassThrough, FlowDirection::Out).sum)
            .to_f64()
            .unwrap_or(0.0);
        let denominator = self.total_flow().to_f64().unwrap_or(0.0);
        numerator / denominator.max(EPSILON)
    }

    pub fn unknown_flow_ratio(&self) -> f64 {
        let numerator = (self.bucket(Cct::Unknown, FlowDirection::In).sum
            + self.bucket(Cct::Unknown, FlowDirection::Out).sum)
            .to_f64()
            .unwrap_or(0.0);
        let denominator = self.total_flow().to_f64().unwrap_or(0.0);
        numerator / denominator.max(EPSILON)
    }
}
